//! Metrics endpoint handler for Prometheus scraping.
//!
//! Renders whatever snapshot is current at request time; a refresh in
//! progress never delays or changes a response.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use std::time::Instant;
use tracing::{debug, error, instrument};

use crate::exposition;
use crate::state::SharedState;

/// Handler for the /metrics endpoint. Always answers 200.
#[instrument(skip(state))]
pub async fn metrics_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let start = Instant::now();
    state.health_stats.record_http_request();

    let snapshot = state.store.current();
    let mut body = match exposition::render(&snapshot) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to render snapshot {}: {}", snapshot.generation, e);
            String::new()
        }
    };

    match exposition::encode_registry(&state.registry) {
        Ok(text) => body.push_str(&text),
        Err(e) => error!("Failed to encode exporter metrics: {}", e),
    }

    // Reported on the next scrape.
    state
        .metrics
        .scrape_duration
        .set(start.elapsed().as_secs_f64());

    debug!(
        "Metrics request completed: generation {}, {} servers, {} bytes",
        snapshot.generation,
        snapshot.records.len(),
        body.len()
    );

    (
        StatusCode::OK,
        [("Content-Type", exposition::content_type())],
        body,
    )
}
