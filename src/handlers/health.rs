//! Health check endpoint handler.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use tracing::{debug, instrument};

use crate::state::SharedState;

/// Footer text for human-readable HTTP endpoints.
pub const FOOTER_TEXT: &str = "tango-server-exporter: see /doc for endpoints and metrics";

/// Handler for the /health endpoint.
#[instrument(skip(state))]
pub async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    state.health_stats.record_http_request();

    let snapshot = state.store.current();
    let healthy = state.health_stats.is_healthy();
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let message = if healthy {
        format!("OK - serving snapshot generation {}", snapshot.generation)
    } else if state.health_stats.last_success_at().is_none() {
        "Waiting for first successful refresh".to_string()
    } else {
        format!(
            "Last refresh failed - serving snapshot generation {}",
            snapshot.generation
        )
    };

    let table = state.health_stats.render_table();

    debug!("Health check: {} - {}", status, message);
    (
        status,
        [("Content-Type", "text/plain; charset=utf-8")],
        format!("{message}\n\n{table}\n{FOOTER_TEXT}\n"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support;

    #[tokio::test]
    async fn test_health_status_follows_refresh_outcome() {
        let state = test_support::state();
        let response = health_handler(State(state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.health_stats.record_refresh(2, 1, 0.01);
        let response = health_handler(State(state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        state.health_stats.record_failure();
        let response = health_handler(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
