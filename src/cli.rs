//! CLI arguments and subcommands for tango-server-exporter.

use clap::{Parser, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Configuration format options for output
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Output format of the `test` subcommand
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TestFormat {
    Text,
    Json,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "tango-server-exporter",
    about = "Prometheus exporter for TANGO device server processes",
    long_about = "Prometheus exporter for TANGO device server processes.\n\n\
                  Reads the declared device servers of a host from the Starter registry, \
                  matches them against running processes and exports liveness, CPU, \
                  memory, thread and file descriptor metrics per server.",
    version,
    propagate_version = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// HTTP listen port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Bind to specific interface/IP
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Log level (overrides the config file)
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,

    /// Refresh period in seconds
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// Starter registry endpoint returning the declared servers
    #[arg(long, conflicts_with = "registry_file")]
    pub registry_url: Option<String>,

    /// File listing the declared servers, one starter line each
    #[arg(long)]
    pub registry_file: Option<PathBuf>,

    /// Value of the `host` label
    #[arg(long)]
    pub host: Option<String>,

    /// Value of the `db` label (TANGO database host:port)
    #[arg(long)]
    pub db: Option<String>,

    /// Which process to sample when several match one server
    #[arg(long, value_parser = ["newest", "oldest", "none"])]
    pub ambiguity_policy: Option<String>,

    /// Maximum number of processes to scan
    #[arg(long)]
    pub max_processes: Option<usize>,

    /// Parallel processing threads (0 = auto)
    #[arg(long)]
    pub parallelism: Option<usize>,

    /// Disable /health endpoint
    #[arg(long)]
    pub disable_health: bool,
}

/// Subcommands for additional functionality
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate configuration and system requirements
    Check {
        /// Check /proc filesystem
        #[arg(long)]
        proc: bool,

        /// Check registry reachability
        #[arg(long)]
        registry: bool,

        /// Check all system requirements
        #[arg(long)]
        all: bool,
    },

    /// Generate configuration files
    Config {
        /// Output file path ("-" for stdout)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: ConfigFormat,

        /// Include comments and examples
        #[arg(long)]
        commented: bool,
    },

    /// Run refresh cycles and print the resulting snapshots
    Test {
        /// Number of refresh cycles
        #[arg(short = 'n', long, default_value_t = 2)]
        iterations: usize,

        /// Pause between cycles in milliseconds
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: TestFormat,
    },

    /// List declared servers and whether a process matches them
    Servers,
}
