//! In-memory registry and process table used by unit tests.

use ahash::AHashMap as HashMap;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::error::{ProcessReadError, ProcessTableError, RegistryError};
use crate::process::{ProcessHandle, ProcessStats, ProcessTable};
use crate::registry::{DeclaredServer, RegistrySource, ServerIdentity};

pub fn handle(pid: u32, start_ticks: u64, args: &[&str]) -> ProcessHandle {
    ProcessHandle {
        pid,
        start_ticks,
        started_at: Utc::now(),
        cmdline: args.iter().map(|s| s.to_string()).collect(),
    }
}

pub fn stats_at(read_at: Instant, user: f64, system: f64, rss: u64) -> ProcessStats {
    ProcessStats {
        cpu_user_seconds: user,
        cpu_system_seconds: system,
        rss_bytes: rss,
        data_bytes: rss / 2,
        threads: 4,
        open_fds: Some(12),
        read_at,
        read_wall: Utc::now(),
    }
}

pub fn declared(names: &[&str]) -> Vec<DeclaredServer> {
    names
        .iter()
        .map(|n| DeclaredServer::uncontrolled(ServerIdentity::parse(n).unwrap()))
        .collect()
}

#[derive(Default)]
pub struct FakeTable {
    processes: Mutex<Vec<ProcessHandle>>,
    stats: Mutex<HashMap<u32, ProcessStats>>,
    fail_enumerate: AtomicBool,
}

impl FakeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_processes(&self, processes: Vec<ProcessHandle>) {
        *self.processes.lock().unwrap() = processes;
    }

    pub fn set_stats(&self, pid: u32, stats: ProcessStats) {
        self.stats.lock().unwrap().insert(pid, stats);
    }

    pub fn set_fail_enumerate(&self, fail: bool) {
        self.fail_enumerate.store(fail, Ordering::SeqCst);
    }
}

impl ProcessTable for FakeTable {
    fn enumerate(&self) -> Result<Vec<ProcessHandle>, ProcessTableError> {
        if self.fail_enumerate.load(Ordering::SeqCst) {
            return Err(ProcessTableError::Unreadable {
                path: "/fake".to_string(),
                source: std::io::Error::other("permission denied"),
            });
        }
        Ok(self.processes.lock().unwrap().clone())
    }

    fn read_stats(&self, handle: &ProcessHandle) -> Result<ProcessStats, ProcessReadError> {
        self.stats
            .lock()
            .unwrap()
            .get(&handle.pid)
            .cloned()
            .ok_or(ProcessReadError::Gone { pid: handle.pid })
    }
}

pub struct FakeRegistry {
    servers: Mutex<Vec<DeclaredServer>>,
    fail: AtomicBool,
    malformed: AtomicBool,
    pub calls: AtomicUsize,
    /// Held by a test to keep `fetch` in flight.
    pub gate: Arc<tokio::sync::Mutex<()>>,
}

impl FakeRegistry {
    pub fn new(servers: Vec<DeclaredServer>) -> Self {
        Self {
            servers: Mutex::new(servers),
            fail: AtomicBool::new(false),
            malformed: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn set_servers(&self, servers: Vec<DeclaredServer>) {
        *self.servers.lock().unwrap() = servers;
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_malformed(&self, malformed: bool) {
        self.malformed.store(malformed, Ordering::SeqCst);
    }
}

#[async_trait]
impl RegistrySource for FakeRegistry {
    async fn fetch(&self) -> Result<Vec<DeclaredServer>, RegistryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _gate = self.gate.lock().await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(RegistryError::Unavailable("connection refused".to_string()));
        }
        if self.malformed.load(Ordering::SeqCst) {
            return Err(RegistryError::Malformed("invalid JSON".to_string()));
        }
        Ok(self.servers.lock().unwrap().clone())
    }

    fn describe(&self) -> String {
        "fake".to_string()
    }
}
