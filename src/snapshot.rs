//! Published metric snapshots.
//!
//! A [`MetricSnapshot`] is built completely by the refresh loop and then
//! handed to [`SnapshotStore::publish`]. Readers get an `Arc` to whichever
//! snapshot was current when they asked and keep it alive for as long as
//! they need it; the store never mutates a published snapshot.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::registry::ServerIdentity;

/// One declared server's readings for one refresh cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRecord {
    pub identity: ServerIdentity,
    pub controlled: bool,
    pub level: Option<u32>,
    pub running: bool,
    pub pid: Option<u32>,
    /// `None` on the first cycle a process is observed.
    pub cpu_percent: Option<f64>,
    pub cpu_user_seconds: f64,
    pub cpu_system_seconds: f64,
    pub rss_bytes: u64,
    pub data_bytes: u64,
    pub threads: u64,
    pub open_fds: Option<u64>,
    pub uptime_seconds: f64,
    /// Matching processes that were not chosen as the primary.
    pub extra_processes: usize,
    /// Generation of the snapshot this record belongs to.
    pub generation: u64,
}

impl MetricRecord {
    /// Record for a server without a usable process.
    pub fn not_running(
        identity: ServerIdentity,
        controlled: bool,
        level: Option<u32>,
        extra_processes: usize,
    ) -> Self {
        Self {
            identity,
            controlled,
            level,
            running: false,
            pid: None,
            cpu_percent: None,
            cpu_user_seconds: 0.0,
            cpu_system_seconds: 0.0,
            rss_bytes: 0,
            data_bytes: 0,
            threads: 0,
            open_fds: None,
            uptime_seconds: 0.0,
            extra_processes,
            generation: 0,
        }
    }
}

/// Complete, immutable result of one refresh cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSnapshot {
    pub generation: u64,
    /// `None` until the first successful refresh.
    pub completed_at: Option<DateTime<Utc>>,
    pub host: String,
    pub db: String,
    pub records: Vec<MetricRecord>,
}

impl MetricSnapshot {
    /// The generation-0 snapshot served before the first refresh completes.
    pub fn empty(host: impl Into<String>, db: impl Into<String>) -> Self {
        Self {
            generation: 0,
            completed_at: None,
            host: host.into(),
            db: db.into(),
            records: Vec::new(),
        }
    }

    /// Builds a snapshot, tagging every record with `generation`.
    pub fn new(
        generation: u64,
        completed_at: DateTime<Utc>,
        host: impl Into<String>,
        db: impl Into<String>,
        mut records: Vec<MetricRecord>,
    ) -> Self {
        for record in &mut records {
            record.generation = generation;
        }
        Self {
            generation,
            completed_at: Some(completed_at),
            host: host.into(),
            db: db.into(),
            records,
        }
    }

    pub fn running_count(&self) -> usize {
        self.records.iter().filter(|r| r.running).count()
    }

    pub fn identities(&self) -> Vec<&ServerIdentity> {
        self.records.iter().map(|r| &r.identity).collect()
    }
}

/// Holder of the currently visible snapshot.
///
/// `publish` is called by the refresh loop only; `current` is lock-free and
/// may be called from any number of scrape handlers.
pub struct SnapshotStore {
    inner: ArcSwap<MetricSnapshot>,
}

impl SnapshotStore {
    pub fn new(initial: MetricSnapshot) -> Self {
        Self {
            inner: ArcSwap::from_pointee(initial),
        }
    }

    /// Replaces the visible snapshot, returning the previous one.
    pub fn publish(&self, snapshot: MetricSnapshot) -> Arc<MetricSnapshot> {
        self.inner.swap(Arc::new(snapshot))
    }

    pub fn current(&self) -> Arc<MetricSnapshot> {
        self.inner.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.inner.load().generation
    }
}
