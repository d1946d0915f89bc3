//! Live process table access.
//!
//! [`ProcessTable`] is the capability the refresh pipeline needs from the
//! operating system: a cheap enumeration of candidate processes and a
//! per-process counter read. [`ProcFsTable`] implements it on top of a
//! procfs mount.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Instant;
use tracing::debug;

use crate::error::{ProcessReadError, ProcessTableError};
use crate::system;

/// Identity of one OS process instance. Pids are recycled, start ticks
/// disambiguate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessKey {
    pub pid: u32,
    pub start_ticks: u64,
}

/// A live process as seen during one enumeration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessHandle {
    pub pid: u32,
    /// Start time in clock ticks since boot.
    pub start_ticks: u64,
    pub started_at: DateTime<Utc>,
    pub cmdline: Vec<String>,
}

impl ProcessHandle {
    pub fn key(&self) -> ProcessKey {
        ProcessKey {
            pid: self.pid,
            start_ticks: self.start_ticks,
        }
    }
}

/// Raw counters of one process at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessStats {
    pub cpu_user_seconds: f64,
    pub cpu_system_seconds: f64,
    pub rss_bytes: u64,
    pub data_bytes: u64,
    pub threads: u64,
    /// `None` when the fd directory is not readable (other user's process).
    pub open_fds: Option<u64>,
    pub read_at: Instant,
    pub read_wall: DateTime<Utc>,
}

impl ProcessStats {
    pub fn cpu_total_seconds(&self) -> f64 {
        self.cpu_user_seconds + self.cpu_system_seconds
    }
}

/// Capability interface for the OS process table.
pub trait ProcessTable: Send + Sync {
    /// Lists the processes that can be inspected. Processes that vanish
    /// mid-enumeration are skipped.
    fn enumerate(&self) -> Result<Vec<ProcessHandle>, ProcessTableError>;

    /// Reads the counters of one process, failing with
    /// [`ProcessReadError::Gone`] if it exited or its pid was reused.
    fn read_stats(&self, handle: &ProcessHandle) -> Result<ProcessStats, ProcessReadError>;
}

/// Fields of /proc/<pid>/stat used by the exporter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatFields {
    pub utime_ticks: u64,
    pub stime_ticks: u64,
    pub num_threads: u64,
    pub start_ticks: u64,
}

/// Parses /proc/<pid>/stat. The command name may contain spaces and
/// parentheses, so fields are counted from the last `)`.
pub fn parse_stat(content: &str) -> Result<StatFields, String> {
    let close = content
        .rfind(')')
        .ok_or_else(|| "missing ')' after command name".to_string())?;
    // Fields after the command name start at field 3 (state).
    let rest: Vec<&str> = content[close + 1..].split_whitespace().collect();
    if rest.len() < 20 {
        return Err(format!("expected at least 22 fields, got {}", rest.len() + 2));
    }

    let field = |idx: usize, name: &str| -> Result<u64, String> {
        rest[idx]
            .parse::<u64>()
            .map_err(|e| format!("invalid {} '{}': {}", name, rest[idx], e))
    };

    Ok(StatFields {
        utime_ticks: field(11, "utime")?,
        stime_ticks: field(12, "stime")?,
        num_threads: field(17, "num_threads")?,
        start_ticks: field(19, "starttime")?,
    })
}

/// Parses /proc/<pid>/statm into (resident pages, data pages).
pub fn parse_statm(content: &str) -> Result<(u64, u64), String> {
    let parts: Vec<&str> = content.split_whitespace().collect();
    if parts.len() < 6 {
        return Err(format!("expected 7 fields, got {}", parts.len()));
    }
    let resident = parts[1]
        .parse::<u64>()
        .map_err(|e| format!("invalid resident '{}': {}", parts[1], e))?;
    let data = parts[5]
        .parse::<u64>()
        .map_err(|e| format!("invalid data '{}': {}", parts[5], e))?;
    Ok((resident, data))
}

/// Splits a NUL-separated /proc/<pid>/cmdline.
pub fn parse_cmdline(raw: &[u8]) -> Vec<String> {
    raw.split(|&b| b == 0u8)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect()
}

/// Process table backed by a procfs mount (normally `/proc`).
pub struct ProcFsTable {
    root: PathBuf,
    boot_time: i64,
    clk_tck: f64,
    page_size: u64,
    max_processes: Option<usize>,
}

impl ProcFsTable {
    /// Opens the table, reading the boot time from `<root>/stat`.
    pub fn new(root: impl Into<PathBuf>, max_processes: Option<usize>) -> Result<Self, ProcessTableError> {
        let root = root.into();
        let stat_path = root.join("stat");
        let content = fs::read_to_string(&stat_path).map_err(|source| ProcessTableError::Unreadable {
            path: stat_path.display().to_string(),
            source,
        })?;
        let boot_time = system::parse_boot_time(&content).map_err(|reason| ProcessTableError::Invalid {
            path: stat_path.display().to_string(),
            reason,
        })?;

        Ok(Self {
            root,
            boot_time,
            clk_tck: system::clock_ticks_per_second(),
            page_size: system::page_size(),
            max_processes,
        })
    }

    fn started_at(&self, start_ticks: u64) -> DateTime<Utc> {
        let millis = self.boot_time * 1000 + ((start_ticks as f64 / self.clk_tck) * 1000.0) as i64;
        DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_default()
    }

    fn collect_pids(&self) -> Result<Vec<u32>, ProcessTableError> {
        let entries = fs::read_dir(&self.root).map_err(|source| ProcessTableError::Unreadable {
            path: self.root.display().to_string(),
            source,
        })?;

        let mut pids = Vec::new();
        for entry in entries.flatten() {
            let pid = match entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) {
                Some(pid) => pid,
                None => continue,
            };
            pids.push(pid);
            if let Some(max) = self.max_processes {
                if pids.len() >= max {
                    break;
                }
            }
        }
        Ok(pids)
    }

    fn read_handle(&self, pid: u32) -> Option<ProcessHandle> {
        let proc_path = self.root.join(pid.to_string());
        let raw = fs::read(proc_path.join("cmdline")).ok()?;
        let cmdline = parse_cmdline(&raw);
        if cmdline.is_empty() {
            // Kernel threads and zombies have no command line.
            return None;
        }

        let stat = fs::read_to_string(proc_path.join("stat")).ok()?;
        let fields = match parse_stat(&stat) {
            Ok(f) => f,
            Err(e) => {
                debug!("Skipping process {}: {}", pid, e);
                return None;
            }
        };

        Some(ProcessHandle {
            pid,
            start_ticks: fields.start_ticks,
            started_at: self.started_at(fields.start_ticks),
            cmdline,
        })
    }
}

fn read_error(pid: u32, source: std::io::Error) -> ProcessReadError {
    // ESRCH shows up when the process exits while its files are open.
    if source.kind() == ErrorKind::NotFound || source.raw_os_error() == Some(libc::ESRCH) {
        ProcessReadError::Gone { pid }
    } else {
        ProcessReadError::Io { pid, source }
    }
}

impl ProcessTable for ProcFsTable {
    fn enumerate(&self) -> Result<Vec<ProcessHandle>, ProcessTableError> {
        let pids = self.collect_pids()?;
        let handles: Vec<ProcessHandle> = pids
            .par_iter()
            .filter_map(|&pid| self.read_handle(pid))
            .collect();
        debug!(
            "Enumerated {} processes ({} pid entries)",
            handles.len(),
            pids.len()
        );
        Ok(handles)
    }

    fn read_stats(&self, handle: &ProcessHandle) -> Result<ProcessStats, ProcessReadError> {
        let pid = handle.pid;
        let proc_path = self.root.join(pid.to_string());

        let stat = fs::read_to_string(proc_path.join("stat")).map_err(|e| read_error(pid, e))?;
        let read_at = Instant::now();
        let read_wall = Utc::now();
        let fields = parse_stat(&stat).map_err(|reason| ProcessReadError::Parse { pid, reason })?;
        if fields.start_ticks != handle.start_ticks {
            return Err(ProcessReadError::Gone { pid });
        }

        let statm = fs::read_to_string(proc_path.join("statm")).map_err(|e| read_error(pid, e))?;
        let (resident_pages, data_pages) =
            parse_statm(&statm).map_err(|reason| ProcessReadError::Parse { pid, reason })?;

        let open_fds = fs::read_dir(proc_path.join("fd"))
            .ok()
            .map(|entries| entries.flatten().count() as u64);

        Ok(ProcessStats {
            cpu_user_seconds: fields.utime_ticks as f64 / self.clk_tck,
            cpu_system_seconds: fields.stime_ticks as f64 / self.clk_tck,
            rss_bytes: resident_pages * self.page_size,
            data_bytes: data_pages * self.page_size,
            threads: fields.num_threads,
            open_fds,
            read_at,
            read_wall,
        })
    }
}
