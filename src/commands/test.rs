//! Test command implementation.
//!
//! Runs the real refresh pipeline a few times and prints each snapshot, so
//! CPU percentages show up from the second cycle on.

use std::time::Duration;

use crate::cli::TestFormat;
use tango_server_exporter::config::Config;
use tango_server_exporter::refresh::RefreshOutcome;
use tango_server_exporter::snapshot::MetricSnapshot;

pub async fn command_test(
    iterations: usize,
    interval_ms: u64,
    format: TestFormat,
    config: &Config,
) -> anyhow::Result<()> {
    let (refresher, state) = crate::build_exporter(config)?;

    for iteration in 1..=iterations {
        if iteration > 1 {
            tokio::time::sleep(Duration::from_millis(interval_ms)).await;
        }

        let outcome = refresher.refresh().await;
        let snapshot = state.store.current();

        match format {
            TestFormat::Json => println!("{}", serde_json::to_string_pretty(&*snapshot)?),
            TestFormat::Text => {
                println!("\nIteration {}/{}: {:?}", iteration, iterations, outcome);
                print_snapshot(&snapshot);
            }
        }

        if let RefreshOutcome::Failed(stage) = outcome {
            anyhow::bail!("refresh failed at stage {}", stage.as_str());
        }
    }

    Ok(())
}

fn mib(bytes: u64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0
}

fn print_snapshot(snapshot: &MetricSnapshot) {
    println!(
        "   generation {} - {} declared, {} running (host={}, db={})",
        snapshot.generation,
        snapshot.records.len(),
        snapshot.running_count(),
        snapshot.host,
        snapshot.db
    );
    println!(
        "   {:32} | {:>7} | {:>7} | {:>10} | {:>7} | {:>5}",
        "server", "pid", "cpu %", "rss (MiB)", "threads", "extra"
    );
    println!("   {}", "-".repeat(84));
    for r in &snapshot.records {
        let pid = r.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".into());
        let cpu = r
            .cpu_percent
            .map(|c| format!("{:.1}", c))
            .unwrap_or_else(|| "-".into());
        println!(
            "   {:32} | {:>7} | {:>7} | {:>10.1} | {:>7} | {:>5}",
            r.identity.to_string(),
            pid,
            cpu,
            mib(r.rss_bytes),
            r.threads,
            r.extra_processes
        );
    }
}
