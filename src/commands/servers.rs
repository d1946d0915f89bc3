//! Servers command implementation.

use tango_server_exporter::config::Config;
use tango_server_exporter::matcher::{match_servers, MatchStatus};
use tango_server_exporter::process::{ProcFsTable, ProcessTable};
use tango_server_exporter::refresh::RefreshSettings;
use tango_server_exporter::registry::source_from_config;

/// Lists declared servers with their starter attributes and match status.
pub async fn command_servers(config: &Config) -> anyhow::Result<()> {
    let settings = RefreshSettings::from_config(config)?;
    let source = source_from_config(config)?;
    let declared = source.fetch().await?;
    let table = ProcFsTable::new("/proc", config.max_processes)?;
    let processes = tokio::task::spawn_blocking(move || table.enumerate()).await??;

    let outcome = match_servers(&declared, &processes, &settings.deriver, settings.policy);

    println!("Declared servers from {}", source.describe());
    println!(
        "{:32} | {:>10} | {:>5} | {:>8} | {:>12} | {}",
        "server", "controlled", "level", "state", "status", "pids"
    );
    println!("{}", "-".repeat(90));

    for result in &outcome.results {
        let d = result.declared;
        let status = match result.status {
            MatchStatus::Running => "running",
            MatchStatus::NotRunning => "not running",
            MatchStatus::Ambiguous => "ambiguous",
        };
        let pids: Vec<String> = result
            .primary
            .into_iter()
            .chain(result.extras.iter().copied())
            .map(|p| p.pid.to_string())
            .collect();
        println!(
            "{:32} | {:>10} | {:>5} | {:>8} | {:>12} | {}",
            d.identity.to_string(),
            if d.controlled { "yes" } else { "no" },
            d.level.map(|l| l.to_string()).unwrap_or_else(|| "-".into()),
            d.starter_state.as_deref().unwrap_or("-"),
            status,
            pids.join(",")
        );
    }

    println!(
        "\n{} declared, {} ambiguous, {} processes scanned",
        outcome.results.len(),
        outcome.ambiguous,
        processes.len()
    );
    Ok(())
}
