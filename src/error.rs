//! Error types for the exporter's sources and configuration.

use thiserror::Error;

/// Failure of the server registry (starter) query.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry unavailable: {0}")]
    Unavailable(String),

    #[error("malformed registry response: {0}")]
    Malformed(String),
}

/// Failure to enumerate the process table as a whole.
#[derive(Error, Debug)]
pub enum ProcessTableError {
    #[error("cannot read process table at {path}: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid content in {path}: {reason}")]
    Invalid { path: String, reason: String },
}

/// Failure to read the counters of a single process.
#[derive(Error, Debug)]
pub enum ProcessReadError {
    /// The process exited, or its pid now belongs to another process.
    #[error("process {pid} is gone")]
    Gone { pid: u32 },

    #[error("failed to read process {pid}: {source}")]
    Io {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid stat line for process {pid}: {reason}")]
    Parse { pid: u32, reason: String },
}

/// Invalid effective configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
