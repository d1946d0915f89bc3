//! Application state shared by the HTTP handlers.

use prometheus::Registry;
use std::sync::Arc;

use crate::config::Config;
use crate::health_stats::HealthStats;
use crate::metrics::ExporterMetrics;
use crate::snapshot::SnapshotStore;

/// Type alias for shared application state.
pub type SharedState = Arc<AppState>;

pub struct AppState {
    /// Registry holding the exporter's self-metrics.
    pub registry: Registry,
    pub metrics: ExporterMetrics,
    /// Snapshot published by the refresh loop.
    pub store: Arc<SnapshotStore>,
    pub config: Arc<Config>,
    pub health_stats: Arc<HealthStats>,
}
