// tango-server-exporter
// Prometheus exporter for TANGO device server processes
use anyhow::Context;
use clap::Parser;
use prometheus::Registry;
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::filter::LevelFilter;

mod cli;
mod commands;

use cli::{Args, Commands, ConfigFormat};
use commands::{command_check, command_config, command_servers, command_test};
use tango_server_exporter::config::{load_config, validate_effective_config, Config};
use tango_server_exporter::handlers;
use tango_server_exporter::health_stats::HealthStats;
use tango_server_exporter::metrics::ExporterMetrics;
use tango_server_exporter::process::ProcFsTable;
use tango_server_exporter::refresh::{RefreshOutcome, RefreshSettings, Refresher};
use tango_server_exporter::registry::source_from_config;
use tango_server_exporter::snapshot::{MetricSnapshot, SnapshotStore};
use tango_server_exporter::state::AppState;

/// Merges config file and CLI flags (CLI wins).
fn resolve_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref())?
    };

    if let Some(bind_ip) = args.bind {
        config.bind = Some(bind_ip.to_string());
    }
    if let Some(port) = args.port {
        config.port = Some(port);
    }
    if let Some(level) = args.log_level {
        config.log_level = Some(level.as_str().to_string());
    }
    if let Some(secs) = args.poll_interval {
        config.poll_interval_secs = Some(secs);
    }

    // A registry given on the command line replaces the configured one.
    if let Some(url) = &args.registry_url {
        config.registry_url = Some(url.clone());
        config.registry_file = None;
    }
    if let Some(path) = &args.registry_file {
        config.registry_file = Some(path.clone());
        config.registry_url = None;
    }

    if let Some(host) = &args.host {
        config.host = Some(host.clone());
    }
    if let Some(db) = &args.db {
        config.db = Some(db.clone());
    }
    if let Some(policy) = &args.ambiguity_policy {
        config.ambiguity_policy = Some(policy.clone());
    }
    if args.max_processes.is_some() {
        config.max_processes = args.max_processes;
    }
    if args.parallelism.is_some() {
        config.parallelism = args.parallelism;
    }
    if args.disable_health {
        config.enable_health = Some(false);
    }

    Ok(config)
}

fn show_config(config: &Config, format: ConfigFormat) -> anyhow::Result<()> {
    let output = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    };
    println!("{output}");
    Ok(())
}

/// Initializes tracing logging subsystem with configured log level
fn setup_logging(config: &Config) {
    let level = config
        .log_level
        .as_deref()
        .and_then(|l| l.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::INFO);

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
    }

    info!("Logging initialized with level: {}", level);
}

fn configure_rayon(config: &Config) {
    if let Some(threads) = config.parallelism.filter(|t| *t > 0) {
        match rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
        {
            Ok(()) => debug!("Rayon thread pool configured with {} threads", threads),
            Err(e) => error!("Failed to set rayon thread pool: {}", e),
        }
    }
}

/// Builds the refresher and the state it shares with the HTTP handlers.
pub(crate) fn build_exporter(config: &Config) -> anyhow::Result<(Arc<Refresher>, Arc<AppState>)> {
    let registry = Registry::new();
    let metrics = ExporterMetrics::new(&registry).context("failed to register exporter metrics")?;

    let settings = RefreshSettings::from_config(config)?;
    let store = Arc::new(SnapshotStore::new(MetricSnapshot::empty(
        settings.host.clone(),
        settings.db.clone(),
    )));
    let health_stats = Arc::new(HealthStats::new());

    let source = source_from_config(config)?;
    let table = Arc::new(ProcFsTable::new("/proc", config.max_processes)?);
    info!(
        "Registry: {}, host label: {}, db label: {}",
        source.describe(),
        settings.host,
        settings.db
    );

    let refresher = Arc::new(Refresher::new(
        source,
        table,
        store.clone(),
        metrics.clone(),
        health_stats.clone(),
        settings,
    ));

    let state = Arc::new(AppState {
        registry,
        metrics,
        store,
        config: Arc::new(config.clone()),
        health_stats,
    });

    Ok((refresher, state))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = resolve_config(&args)?;

    if args.check_config {
        if let Err(e) = validate_effective_config(&config) {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
        println!("Configuration is valid");
        return Ok(());
    }

    if args.show_config {
        return show_config(&config, args.config_format);
    }

    // `config` only writes a template and needs no valid registry.
    if let Some(Commands::Config {
        output,
        format,
        commented,
    }) = &args.command
    {
        return command_config(output.clone(), *format, *commented);
    }

    if let Err(e) = validate_effective_config(&config) {
        eprintln!("Configuration invalid: {}", e);
        std::process::exit(1);
    }

    setup_logging(&config);
    configure_rayon(&config);

    match &args.command {
        Some(Commands::Check {
            proc,
            registry,
            all,
        }) => return command_check(*proc, *registry, *all, &config).await,
        Some(Commands::Test {
            iterations,
            interval_ms,
            format,
        }) => return command_test(*iterations, *interval_ms, *format, &config).await,
        Some(Commands::Servers) => return command_servers(&config).await,
        Some(Commands::Config { .. }) | None => {}
    }

    info!("Starting tango-server-exporter");

    let (refresher, state) = build_exporter(&config)?;

    // Initial refresh before serving so the first scrape has data.
    info!("Performing initial refresh");
    match refresher.refresh().await {
        RefreshOutcome::Published {
            generation,
            declared,
            running,
        } => info!(
            "Initial refresh published generation {}: {}/{} servers running",
            generation, running, declared
        ),
        outcome => warn!("Initial refresh did not publish a snapshot: {:?}", outcome),
    }

    let cancel = CancellationToken::new();
    let background_task = tokio::spawn(
        refresher
            .clone()
            .run(config.poll_interval(), cancel.child_token()),
    );

    let addr: SocketAddr = format!("{}:{}", config.bind(), config.port())
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", config.bind(), config.port()))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("tango-server-exporter listening on http://{}", addr);

    let app = handlers::router(state);
    let server_cancel = cancel.clone();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown_signal() => {}
                _ = server_cancel.cancelled() => {}
            }
        })
        .await;

    // Stop the refresh loop; an in-flight cycle is abandoned.
    cancel.cancel();
    if let Err(e) = background_task.await {
        error!("Refresh task ended abnormally: {}", e);
    }

    if let Err(e) = result {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    info!("tango-server-exporter stopped gracefully");
    Ok(())
}
