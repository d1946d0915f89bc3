//! Prometheus exporter for TANGO device servers.
//!
//! Declared servers are read from a registry, matched against the running
//! processes of the host, sampled, and published as an immutable snapshot
//! that the `/metrics` endpoint renders.

pub mod config;
pub mod error;
pub mod exposition;
pub mod handlers;
pub mod health_stats;
pub mod matcher;
pub mod metrics;
pub mod process;
pub mod refresh;
pub mod registry;
pub mod sampler;
pub mod snapshot;
pub mod state;
pub mod system;

#[cfg(test)]
mod fakes;
