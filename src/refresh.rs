//! Periodic refresh of the published snapshot.
//!
//! One cycle fetches the declared servers and enumerates processes
//! concurrently, then matches, samples and publishes. A failure of either
//! source leaves the previous snapshot in place. Cycles never overlap: a
//! cycle requested while another is running is skipped.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::{interval_at, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::error::ConfigError;
use crate::health_stats::HealthStats;
use crate::matcher::{match_servers, AmbiguityPolicy, KeyDeriver};
use crate::metrics::{ExporterMetrics, FailureStage};
use crate::process::ProcessTable;
use crate::registry::RegistrySource;
use crate::sampler::{self, RawSamples};
use crate::snapshot::{MetricSnapshot, SnapshotStore};

/// Static inputs of every refresh cycle.
#[derive(Debug, Clone)]
pub struct RefreshSettings {
    pub host: String,
    pub db: String,
    pub policy: AmbiguityPolicy,
    pub deriver: KeyDeriver,
}

impl RefreshSettings {
    pub fn from_config(cfg: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            host: cfg.host(),
            db: cfg.db(),
            policy: cfg.ambiguity_policy()?,
            deriver: KeyDeriver::new(cfg.interpreters()),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Published {
        generation: u64,
        declared: usize,
        running: usize,
    },
    /// The previous snapshot was kept.
    Failed(FailureStage),
    /// Another refresh was already running.
    Skipped,
}

/// Clears the in-flight flag when the refresh completes or is dropped.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Refresher {
    registry: Arc<dyn RegistrySource>,
    table: Arc<dyn ProcessTable>,
    store: Arc<SnapshotStore>,
    metrics: ExporterMetrics,
    health: Arc<HealthStats>,
    settings: Arc<RefreshSettings>,
    in_flight: AtomicBool,
    /// CPU readings of the last published cycle.
    raw: Mutex<RawSamples>,
}

impl Refresher {
    pub fn new(
        registry: Arc<dyn RegistrySource>,
        table: Arc<dyn ProcessTable>,
        store: Arc<SnapshotStore>,
        metrics: ExporterMetrics,
        health: Arc<HealthStats>,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            registry,
            table,
            store,
            metrics,
            health,
            settings: Arc::new(settings),
            in_flight: AtomicBool::new(false),
            raw: Mutex::new(RawSamples::new()),
        }
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    fn take_raw(&self) -> RawSamples {
        let mut raw = self.raw.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *raw)
    }

    fn put_raw(&self, samples: RawSamples) {
        *self.raw.lock().unwrap_or_else(|e| e.into_inner()) = samples;
    }

    fn fail(&self, stage: FailureStage) -> RefreshOutcome {
        self.metrics.record_failure(stage);
        self.health.record_failure();
        RefreshOutcome::Failed(stage)
    }

    /// Runs one refresh cycle unless one is already running.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> RefreshOutcome {
        let _guard = match InFlight::try_acquire(&self.in_flight) {
            Some(guard) => guard,
            None => {
                debug!("Refresh already in progress, skipping tick");
                self.metrics.refresh_skipped.inc();
                self.health.record_skip();
                return RefreshOutcome::Skipped;
            }
        };
        let start = Instant::now();

        let table = self.table.clone();
        let (declared, processes) = tokio::join!(
            self.registry.fetch(),
            tokio::task::spawn_blocking(move || table.enumerate())
        );

        let declared = match declared {
            Ok(declared) => declared,
            Err(e) => {
                warn!(
                    "Registry {} failed: {}; keeping snapshot generation {}",
                    self.registry.describe(),
                    e,
                    self.store.generation()
                );
                return self.fail(FailureStage::Registry);
            }
        };

        let processes = match processes {
            Ok(Ok(processes)) => processes,
            Ok(Err(e)) => {
                warn!(
                    "Process enumeration failed: {}; keeping snapshot generation {}",
                    e,
                    self.store.generation()
                );
                return self.fail(FailureStage::ProcessTable);
            }
            Err(e) => {
                warn!("Process enumeration task failed: {}", e);
                return self.fail(FailureStage::ProcessTable);
            }
        };
        debug!(
            "Fetched {} declared servers and {} processes",
            declared.len(),
            processes.len()
        );

        let table = self.table.clone();
        let settings = self.settings.clone();
        let previous = self.take_raw();
        let sampled = tokio::task::spawn_blocking(move || {
            let outcome = match_servers(&declared, &processes, &settings.deriver, settings.policy);
            let sample = sampler::sample(&outcome.results, &previous, table.as_ref());
            (sample, outcome.ambiguous)
        })
        .await;

        let (sample, ambiguous) = match sampled {
            Ok(result) => result,
            Err(e) => {
                warn!("Sampling task failed: {}", e);
                return self.fail(FailureStage::ProcessTable);
            }
        };

        let generation = self.store.generation() + 1;
        let snapshot = MetricSnapshot::new(
            generation,
            Utc::now(),
            self.settings.host.clone(),
            self.settings.db.clone(),
            sample.records,
        );
        let declared = snapshot.records.len();
        let running = snapshot.running_count();
        let completed_at = snapshot.completed_at;

        self.store.publish(snapshot);
        self.put_raw(sample.raw);

        let duration = start.elapsed().as_secs_f64();
        self.metrics.ambiguous_matches.inc_by(ambiguous as u64);
        self.metrics.read_failures.inc_by(sample.read_failures as u64);
        self.metrics.refreshes.inc();
        self.metrics.refresh_duration.set(duration);
        self.metrics.last_refresh_success.set(1);
        if let Some(at) = completed_at {
            self.metrics
                .last_refresh_timestamp
                .set(at.timestamp_millis() as f64 / 1000.0);
        }
        self.metrics.declared_servers.set(declared as i64);
        self.metrics.running_servers.set(running as i64);
        self.health
            .record_refresh(declared as u64, running as u64, duration);

        info!(
            "Published snapshot {}: {}/{} servers running, {} ambiguous, {:.2}ms",
            generation,
            running,
            declared,
            ambiguous,
            duration * 1000.0
        );

        RefreshOutcome::Published {
            generation,
            declared,
            running,
        }
    }

    /// Refreshes every `period` until cancelled. The first tick fires one
    /// period from now; callers do the initial refresh themselves.
    pub async fn run(self: Arc<Self>, period: Duration, cancel: CancellationToken) {
        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(
            "Background refresh task started with {}s interval",
            period.as_secs_f64()
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let started = Instant::now();

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Abandoning in-flight refresh, last published snapshot stays valid");
                    break;
                }
                outcome = self.refresh() => {
                    debug!("Scheduled refresh finished: {:?}", outcome);
                    let missed = missed_ticks(started.elapsed(), period);
                    if missed > 0 {
                        debug!("{} ticks elapsed during the refresh, skipping them", missed);
                        self.metrics.refresh_skipped.inc_by(missed);
                        self.health.record_skips(missed);
                    }
                }
            }
        }

        info!("Background refresh task stopped");
    }
}

/// Ticks that fell inside a refresh of length `elapsed`. The interval
/// fires one of them late, the rest are dropped.
fn missed_ticks(elapsed: Duration, period: Duration) -> u64 {
    if period.is_zero() {
        return 0;
    }
    let ticks = elapsed.as_nanos() / period.as_nanos();
    u64::try_from(ticks).unwrap_or(u64::MAX).saturating_sub(1)
}
