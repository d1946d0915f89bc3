//! Config command implementation.

use std::fs;
use std::path::PathBuf;

use crate::cli::ConfigFormat;
use tango_server_exporter::config::Config;

/// Writes a default configuration file ("-" prints to stdout).
pub fn command_config(
    output: Option<PathBuf>,
    format: ConfigFormat,
    commented: bool,
) -> anyhow::Result<()> {
    let config = Config::default();
    let output = output.unwrap_or_else(|| PathBuf::from("tango-exporter.yaml"));

    let content = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(&config)?,
        ConfigFormat::Toml => toml::to_string_pretty(&config)?,
        ConfigFormat::Yaml => {
            let content = serde_yaml::to_string(&config)?;
            if commented {
                add_config_comments(content)
            } else {
                content
            }
        }
    };

    if output.to_string_lossy() == "-" {
        print!("{}", content);
    } else {
        fs::write(&output, content)?;
        println!("Configuration written to: {}", output.display());
    }

    Ok(())
}

/// Adds comments to YAML configuration
fn add_config_comments(yaml: String) -> String {
    let comments = r#"# TANGO Server Exporter Configuration
# ===================================
#
# Server Configuration
# --------------------
# bind: "0.0.0.0"               # Bind IP (0.0.0.0 = all interfaces)
# port: 9110                    # HTTP port
#
# Refresh
# -------
# poll_interval_secs: 10        # Seconds between refresh cycles
#
# Registry (exactly one of the two)
# ---------------------------------
# registry_url: "http://starter:8080/servers"   # JSON list of starter lines
# registry_file: "/etc/tango-exporter/servers"  # One starter line per row
# registry_timeout_ms: 5000     # HTTP timeout
#
# Labels
# ------
# host: null                    # Defaults to the hostname
# db: null                      # Defaults to $TANGO_HOST
#
# Matching
# --------
# ambiguity_policy: newest      # newest | oldest | none
# interpreters: [python, python2, python3, java]
#
# Process table
# -------------
# max_processes: null           # Maximum processes to scan
# parallelism: null             # Parallel threads (null = auto)
#
# Feature Flags
# -------------
# enable_health: true           # Enable /health endpoint
#
# Logging
# -------
# log_level: "info"             # off, error, warn, info, debug, trace
"#;

    format!("{comments}\n{yaml}")
}
