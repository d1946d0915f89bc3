//! Exporter configuration.
//!
//! Every field is optional so a partial config file only overrides what it
//! names; the effective value is resolved by the accessor methods.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::ConfigError;
use crate::matcher::AmbiguityPolicy;
use crate::system;

// Default configuration constants
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9110;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_REGISTRY_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_INTERPRETERS: &[&str] = &["python", "python2", "python3", "java"];

/// Config file locations tried when no path is given.
const DEFAULT_CONFIG_PATHS: &[&str] = &[
    "/etc/tango-exporter/tango-exporter.yaml",
    "/etc/tango-exporter/tango-exporter.yml",
    "/etc/tango-exporter/tango-exporter.json",
    "/etc/tango-exporter/tango-exporter.toml",
    "./tango-exporter.yaml",
    "./tango-exporter.yml",
    "./tango-exporter.json",
    "./tango-exporter.toml",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    // Server configuration
    pub port: Option<u16>,
    pub bind: Option<String>,

    // Refresh
    #[serde(alias = "poll-interval-secs")]
    pub poll_interval_secs: Option<u64>,

    // Registry
    #[serde(alias = "registry-url")]
    pub registry_url: Option<String>,
    #[serde(alias = "registry-file")]
    pub registry_file: Option<PathBuf>,
    #[serde(alias = "registry-timeout-ms")]
    pub registry_timeout_ms: Option<u64>,

    // Labels
    pub host: Option<String>,
    pub db: Option<String>,

    // Matching
    /// "newest" | "oldest" | "none"
    #[serde(alias = "ambiguity-policy")]
    pub ambiguity_policy: Option<String>,
    pub interpreters: Option<Vec<String>>,

    // Process table
    #[serde(alias = "max-processes")]
    pub max_processes: Option<usize>,
    pub parallelism: Option<usize>,

    // Feature flags
    #[serde(alias = "enable-health")]
    pub enable_health: Option<bool>,

    // Logging
    #[serde(alias = "log-level")]
    pub log_level: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: Some(DEFAULT_PORT),
            bind: Some(DEFAULT_BIND_ADDR.to_string()),
            poll_interval_secs: Some(DEFAULT_POLL_INTERVAL_SECS),
            registry_url: None,
            registry_file: None,
            registry_timeout_ms: Some(DEFAULT_REGISTRY_TIMEOUT_MS),
            host: None,
            db: None,
            ambiguity_policy: Some(AmbiguityPolicy::default().to_string()),
            interpreters: Some(DEFAULT_INTERPRETERS.iter().map(|s| s.to_string()).collect()),
            max_processes: None,
            parallelism: None,
            enable_health: Some(true),
            log_level: Some("info".into()),
        }
    }
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn bind(&self) -> &str {
        self.bind.as_deref().unwrap_or(DEFAULT_BIND_ADDR)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.unwrap_or(DEFAULT_POLL_INTERVAL_SECS))
    }

    pub fn registry_timeout(&self) -> Duration {
        Duration::from_millis(self.registry_timeout_ms.unwrap_or(DEFAULT_REGISTRY_TIMEOUT_MS))
    }

    /// Host label; defaults to the machine's hostname.
    pub fn host(&self) -> String {
        self.host.clone().unwrap_or_else(system::hostname)
    }

    /// Database label; defaults to `$TANGO_HOST`.
    pub fn db(&self) -> String {
        self.db
            .clone()
            .or_else(|| std::env::var("TANGO_HOST").ok().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn ambiguity_policy(&self) -> Result<AmbiguityPolicy, ConfigError> {
        match self.ambiguity_policy.as_deref() {
            None => Ok(AmbiguityPolicy::default()),
            Some(s) => s.parse().map_err(ConfigError::Invalid),
        }
    }

    pub fn interpreters(&self) -> Vec<String> {
        self.interpreters
            .clone()
            .unwrap_or_else(|| DEFAULT_INTERPRETERS.iter().map(|s| s.to_string()).collect())
    }

    pub fn enable_health(&self) -> bool {
        self.enable_health.unwrap_or(true)
    }
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.poll_interval_secs == Some(0) {
        return Err(ConfigError::Invalid(
            "poll_interval_secs must be greater than 0".into(),
        ));
    }
    if cfg.registry_timeout_ms == Some(0) {
        return Err(ConfigError::Invalid(
            "registry_timeout_ms must be greater than 0".into(),
        ));
    }

    match (&cfg.registry_url, &cfg.registry_file) {
        (Some(_), Some(_)) => {
            return Err(ConfigError::Invalid(
                "registry_url and registry_file are mutually exclusive".into(),
            ))
        }
        (None, None) => {
            return Err(ConfigError::Invalid(
                "one of registry_url or registry_file must be set".into(),
            ))
        }
        (Some(url), None) => {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!(
                    "registry_url '{}' must start with http:// or https://",
                    url
                )));
            }
        }
        (None, Some(_)) => {}
    }

    cfg.ambiguity_policy()?;

    if cfg.interpreters.as_ref().is_some_and(|v| v.is_empty()) {
        return Err(ConfigError::Invalid(
            "interpreters must not be empty (omit it to use the defaults)".into(),
        ));
    }

    if let Some(level) = cfg.log_level.as_deref() {
        if !matches!(
            level.to_ascii_lowercase().as_str(),
            "off" | "error" | "warn" | "info" | "debug" | "trace"
        ) {
            return Err(ConfigError::Invalid(format!("Invalid log_level '{}'", level)));
        }
    }

    Ok(())
}

/// Loads configuration from `path`, or from the first default location that
/// exists. No file at all yields the defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match DEFAULT_CONFIG_PATHS.iter().map(Path::new).find(|p| p.exists()) {
            Some(p) => p.to_path_buf(),
            None => return Ok(Config::default()),
        },
    };

    let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let config = parse_config(&content, &path)?;
    info!("Loaded configuration from: {}", path.display());
    Ok(config)
}

/// Parses config text, choosing the format from the file extension
/// (YAML unless `.json` or `.toml`).
pub fn parse_config(content: &str, path: &Path) -> Result<Config, ConfigError> {
    let parse_err = |reason: String| ConfigError::Parse {
        path: path.display().to_string(),
        reason,
    };

    let mut config: Config = match path.extension().and_then(|s| s.to_str()) {
        Some("json") => serde_json::from_str(content).map_err(|e| parse_err(e.to_string()))?,
        Some("toml") => toml::from_str(content).map_err(|e| parse_err(e.to_string()))?,
        _ => serde_yaml::from_str(content).map_err(|e| parse_err(e.to_string()))?,
    };

    // Unset fields fall back to the defaults.
    let defaults = Config::default();
    config.port = config.port.or(defaults.port);
    config.bind = config.bind.or(defaults.bind);
    config.poll_interval_secs = config.poll_interval_secs.or(defaults.poll_interval_secs);
    config.registry_timeout_ms = config.registry_timeout_ms.or(defaults.registry_timeout_ms);
    config.ambiguity_policy = config.ambiguity_policy.or(defaults.ambiguity_policy);
    config.interpreters = config.interpreters.or(defaults.interpreters);
    config.enable_health = config.enable_health.or(defaults.enable_health);
    config.log_level = config.log_level.or(defaults.log_level);

    Ok(config)
}
