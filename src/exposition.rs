//! Rendering of a snapshot in the Prometheus text exposition format.

use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};

use crate::snapshot::{MetricRecord, MetricSnapshot};

/// Labels carried by every per-server series.
const LABELS: &[&str] = &["host", "server", "db"];

/// Buffer capacity for metrics encoding.
const BUFFER_CAP: usize = 64 * 1024;

struct Family {
    name: &'static str,
    help: &'static str,
    value: fn(&MetricRecord) -> Option<f64>,
}

fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

const FAMILIES: &[Family] = &[
    Family {
        name: "tango_server_running",
        help: "TANGO server is running",
        value: |r| Some(flag(r.running)),
    },
    Family {
        name: "tango_server_starter_controlled",
        help: "TANGO server controlled by starter",
        value: |r| Some(flag(r.controlled)),
    },
    Family {
        name: "tango_server_starter_level",
        help: "TANGO server starter run level",
        value: |r| r.level.filter(|_| r.controlled).map(f64::from),
    },
    Family {
        name: "tango_server_cpu_percent",
        help: "TANGO server process CPU percentage since the previous refresh",
        value: |r| r.cpu_percent.filter(|_| r.running),
    },
    Family {
        name: "tango_server_cpu_time_user",
        help: "TANGO server process user CPU time in seconds",
        value: |r| Some(r.cpu_user_seconds),
    },
    Family {
        name: "tango_server_cpu_time_system",
        help: "TANGO server process system CPU time in seconds",
        value: |r| Some(r.cpu_system_seconds),
    },
    Family {
        name: "tango_server_mem_rss",
        help: "TANGO server process memory 'resident set size' in bytes",
        value: |r| Some(r.rss_bytes as f64),
    },
    Family {
        name: "tango_server_mem_data",
        help: "TANGO server process memory 'data resident set' in bytes",
        value: |r| Some(r.data_bytes as f64),
    },
    Family {
        name: "tango_server_threads_n",
        help: "TANGO server process number of threads",
        value: |r| Some(r.threads as f64),
    },
    Family {
        name: "tango_server_open_fds",
        help: "TANGO server process open file descriptors",
        value: |r| r.open_fds.filter(|_| r.running).map(|v| v as f64),
    },
    Family {
        name: "tango_server_uptime_seconds",
        help: "TANGO server process uptime in seconds",
        value: |r| Some(r.uptime_seconds),
    },
    Family {
        name: "tango_server_extra_processes",
        help: "Additional processes matching the TANGO server besides the sampled one",
        value: |r| Some(r.extra_processes as f64),
    },
];

/// Builds a private registry holding the snapshot's metric families.
fn snapshot_registry(snapshot: &MetricSnapshot) -> prometheus::Result<Registry> {
    let registry = Registry::new();

    let generation = Gauge::new(
        "tango_exporter_snapshot_generation",
        "Generation number of the snapshot being served",
    )?;
    generation.set(snapshot.generation as f64);
    registry.register(Box::new(generation))?;

    for family in FAMILIES {
        let vec = GaugeVec::new(Opts::new(family.name, family.help), LABELS)?;
        for record in &snapshot.records {
            if let Some(value) = (family.value)(record) {
                let server = record.identity.to_string();
                vec.with_label_values(&[snapshot.host.as_str(), server.as_str(), snapshot.db.as_str()])
                    .set(value);
            }
        }
        registry.register(Box::new(vec))?;
    }

    Ok(registry)
}

/// Renders the snapshot. Same snapshot, same bytes.
pub fn render(snapshot: &MetricSnapshot) -> prometheus::Result<String> {
    let registry = snapshot_registry(snapshot)?;
    encode_registry(&registry)
}

/// Encodes every family of a registry in the text format.
pub fn encode_registry(registry: &Registry) -> prometheus::Result<String> {
    let families = registry.gather();
    let mut buffer = Vec::with_capacity(BUFFER_CAP);
    TextEncoder::new().encode(&families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

/// Content type of the rendered text.
pub fn content_type() -> String {
    TextEncoder::new().format_type().to_string()
}
