//! Documentation endpoint handler.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use tracing::{debug, instrument};

use crate::handlers::health::FOOTER_TEXT;
use crate::state::SharedState;

/// Handler for the /doc endpoint.
#[instrument(skip(state))]
pub async fn doc_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /doc request");
    state.health_stats.record_http_request();

    let version = env!("CARGO_PKG_VERSION");
    let port = state.config.port();
    let doc = format!(
        r#"TANGO SERVER EXPORTER - DOCUMENTATION
=====================================

VERSION: {version}
DESCRIPTION: Prometheus exporter for the processes of declared TANGO device servers

HTTP ENDPOINTS
--------------
GET /metrics     - Prometheus metrics endpoint
GET /health      - Refresh statistics (503 until a refresh has succeeded)
GET /doc         - This documentation (plain text)

AVAILABLE METRICS
-----------------
Every series carries the labels host, server ("<Server>/<instance>") and db.

tango_server_running                - 1 if a process matches the server, else 0
tango_server_starter_controlled     - 1 if the Starter controls the server
tango_server_starter_level          - Starter run level (controlled servers only)
tango_server_cpu_percent            - CPU % since the previous refresh (from the second cycle)
tango_server_cpu_time_user          - User CPU time in seconds
tango_server_cpu_time_system        - System CPU time in seconds
tango_server_mem_rss                - Resident set size in bytes
tango_server_mem_data               - Data segment size in bytes
tango_server_threads_n              - Number of threads
tango_server_open_fds               - Open file descriptors (when readable)
tango_server_uptime_seconds         - Process uptime in seconds
tango_server_extra_processes        - Further processes matching the same server

tango_exporter_*                    - Exporter self-metrics (refreshes, failures, timings)

REFRESH MODEL
-------------
The registry and the process table are read every poll_interval_secs. The
result is published as one snapshot; /metrics always serves the latest
complete snapshot. A failed refresh keeps the previous snapshot and
increments tango_exporter_refresh_failures_total.

CONFIGURATION
-------------
Config file locations (in order):
1. CLI specified: -c /path/to/config.yaml
2. /etc/tango-exporter/tango-exporter.{{yaml,yml,json,toml}}
3. ./tango-exporter.{{yaml,yml,json,toml}}

Key configuration options:
- port: HTTP listen port (default: 9110)
- poll_interval_secs: refresh period (default: 10)
- registry_url / registry_file: where declared servers come from (exactly one)
- ambiguity_policy: newest | oldest | none (default: newest)
- interpreters: launchers whose script/class names the server

CLI COMMANDS
------------
tango-server-exporter                       - Start the exporter
tango-server-exporter check --all           - Validate system requirements
tango-server-exporter config -o config.yaml - Generate config file
tango-server-exporter test -n 2             - Run refresh cycles and print snapshots
tango-server-exporter servers               - List declared servers and match status

EXAMPLE PROMQL QUERIES
----------------------
# Declared servers that are down
tango_server_running == 0

# Top 5 servers by memory
topk(5, tango_server_mem_rss)

PROMETHEUS SCRAPE CONFIG
------------------------
scrape_configs:
  - job_name: 'tango-servers'
    static_configs:
      - targets: ['localhost:{port}']

{FOOTER_TEXT}
"#
    );

    (
        StatusCode::OK,
        [("Content-Type", "text/plain; charset=utf-8")],
        doc,
    )
}
