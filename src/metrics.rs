//! Prometheus self-metrics of the exporter.
//!
//! These describe the exporter's own health (refresh failures, ambiguous
//! matches, timings) and live in the application registry, unlike the
//! per-server families which are rendered from the current snapshot.

use prometheus::{Gauge, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// Refresh stage that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Registry,
    ProcessTable,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Registry => "registry",
            FailureStage::ProcessTable => "process_table",
        }
    }
}

#[derive(Clone)]
pub struct ExporterMetrics {
    pub refresh_failures: IntCounterVec,
    pub ambiguous_matches: IntCounter,
    pub read_failures: IntCounter,
    pub refresh_skipped: IntCounter,
    pub refreshes: IntCounter,
    pub refresh_duration: Gauge,
    pub last_refresh_success: IntGauge,
    pub last_refresh_timestamp: Gauge,
    pub scrape_duration: Gauge,
    pub declared_servers: IntGauge,
    pub running_servers: IntGauge,
}

impl ExporterMetrics {
    /// Creates and registers all exporter metrics with the registry.
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let refresh_failures = IntCounterVec::new(
            Opts::new(
                "tango_exporter_refresh_failures_total",
                "Refresh cycles that kept the previous snapshot, by failing stage",
            ),
            &["stage"],
        )?;
        let ambiguous_matches = IntCounter::new(
            "tango_exporter_ambiguous_matches_total",
            "Servers matched by more than one process, counted once per refresh",
        )?;
        let read_failures = IntCounter::new(
            "tango_exporter_read_failures_total",
            "Matched processes whose counters could not be read",
        )?;
        let refresh_skipped = IntCounter::new(
            "tango_exporter_refresh_skipped_total",
            "Refresh ticks skipped because a refresh was still running",
        )?;
        let refreshes = IntCounter::new(
            "tango_exporter_refreshes_total",
            "Refresh cycles that published a new snapshot",
        )?;
        let refresh_duration = Gauge::new(
            "tango_exporter_refresh_duration_seconds",
            "Duration of the last refresh cycle",
        )?;
        let last_refresh_success = IntGauge::new(
            "tango_exporter_last_refresh_success",
            "Whether the last refresh cycle published a snapshot (1) or failed (0)",
        )?;
        let last_refresh_timestamp = Gauge::new(
            "tango_exporter_last_refresh_timestamp_seconds",
            "Unix time of the last published snapshot",
        )?;
        let scrape_duration = Gauge::new(
            "tango_exporter_scrape_duration_seconds",
            "Time spent rendering the previous /metrics response",
        )?;
        let declared_servers = IntGauge::new(
            "tango_exporter_declared_servers",
            "Servers declared by the registry in the current snapshot",
        )?;
        let running_servers = IntGauge::new(
            "tango_exporter_running_servers",
            "Declared servers with a running process in the current snapshot",
        )?;

        registry.register(Box::new(refresh_failures.clone()))?;
        registry.register(Box::new(ambiguous_matches.clone()))?;
        registry.register(Box::new(read_failures.clone()))?;
        registry.register(Box::new(refresh_skipped.clone()))?;
        registry.register(Box::new(refreshes.clone()))?;
        registry.register(Box::new(refresh_duration.clone()))?;
        registry.register(Box::new(last_refresh_success.clone()))?;
        registry.register(Box::new(last_refresh_timestamp.clone()))?;
        registry.register(Box::new(scrape_duration.clone()))?;
        registry.register(Box::new(declared_servers.clone()))?;
        registry.register(Box::new(running_servers.clone()))?;

        // Expose zero-valued failure series before the first failure.
        for stage in [FailureStage::Registry, FailureStage::ProcessTable] {
            refresh_failures.with_label_values(&[stage.as_str()]);
        }

        Ok(Self {
            refresh_failures,
            ambiguous_matches,
            read_failures,
            refresh_skipped,
            refreshes,
            refresh_duration,
            last_refresh_success,
            last_refresh_timestamp,
            scrape_duration,
            declared_servers,
            running_servers,
        })
    }

    pub fn record_failure(&self, stage: FailureStage) {
        self.refresh_failures
            .with_label_values(&[stage.as_str()])
            .inc();
        self.last_refresh_success.set(0);
    }

    pub fn failures(&self, stage: FailureStage) -> u64 {
        self.refresh_failures
            .with_label_values(&[stage.as_str()])
            .get()
    }
}
