//! HTTP endpoint handlers for the exporter.
//!
//! - `/metrics`: current snapshot plus self-metrics
//! - `/health`: refresh statistics, 503 until a refresh succeeds
//! - `/doc`: plain-text documentation

use axum::{routing::get, Router};

pub mod doc;
pub mod health;
pub mod metrics;

pub use doc::doc_handler;
pub use health::health_handler;
pub use metrics::metrics_handler;

use crate::state::SharedState;

/// Builds the router; `/health` is only mounted when enabled.
pub fn router(state: SharedState) -> Router {
    let mut app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/doc", get(doc_handler));

    if state.config.enable_health() {
        app = app.route("/health", get(health_handler));
    }

    app.with_state(state)
}
