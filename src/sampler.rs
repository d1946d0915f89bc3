//! Per-server resource sampling.
//!
//! CPU percent is a rate and needs two readings of the same process. The
//! previous cycle's CPU readings are passed in keyed by [`ProcessKey`], so a
//! restarted server (new pid, or same pid with a new start time) never gets
//! a rate computed against its predecessor.

use ahash::AHashMap as HashMap;
use std::time::Instant;
use tracing::debug;

use crate::matcher::MatchResult;
use crate::process::{ProcessHandle, ProcessKey, ProcessStats, ProcessTable};
use crate::snapshot::MetricRecord;

/// CPU reading kept between cycles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    pub cpu_seconds: f64,
    pub read_at: Instant,
}

pub type RawSamples = HashMap<ProcessKey, RawSample>;

#[derive(Debug, Clone)]
pub struct SampleOutcome {
    pub records: Vec<MetricRecord>,
    /// Readings of this cycle, to be passed to the next one.
    pub raw: RawSamples,
    /// Matched processes whose counters could not be read.
    pub read_failures: usize,
}

/// CPU percent between two readings of the same process.
///
/// Returns `None` without a previous reading, when no wall time elapsed, or
/// when the CPU counter went backwards.
pub fn cpu_percent(previous: Option<&RawSample>, current: &RawSample) -> Option<f64> {
    let previous = previous?;
    let wall = current
        .read_at
        .checked_duration_since(previous.read_at)?
        .as_secs_f64();
    if wall <= 0.0 {
        return None;
    }
    let delta = current.cpu_seconds - previous.cpu_seconds;
    if delta < 0.0 {
        return None;
    }
    Some(delta / wall * 100.0)
}

fn running_record(
    result: &MatchResult<'_>,
    process: &ProcessHandle,
    stats: &ProcessStats,
    cpu_percent: Option<f64>,
) -> MetricRecord {
    let uptime_ms = (stats.read_wall - process.started_at).num_milliseconds();
    MetricRecord {
        identity: result.declared.identity.clone(),
        controlled: result.declared.controlled,
        level: result.declared.level,
        running: true,
        pid: Some(process.pid),
        cpu_percent,
        cpu_user_seconds: stats.cpu_user_seconds,
        cpu_system_seconds: stats.cpu_system_seconds,
        rss_bytes: stats.rss_bytes,
        data_bytes: stats.data_bytes,
        threads: stats.threads,
        open_fds: stats.open_fds,
        uptime_seconds: uptime_ms.max(0) as f64 / 1000.0,
        extra_processes: result.extras.len(),
        generation: 0,
    }
}

/// Samples every match, producing exactly one record per match.
pub fn sample(
    matches: &[MatchResult<'_>],
    previous: &RawSamples,
    table: &dyn ProcessTable,
) -> SampleOutcome {
    let mut records = Vec::with_capacity(matches.len());
    let mut raw = RawSamples::with_capacity(matches.len());
    let mut read_failures = 0usize;

    for result in matches {
        let declared = result.declared;
        let not_running = || {
            MetricRecord::not_running(
                declared.identity.clone(),
                declared.controlled,
                declared.level,
                result.extras.len(),
            )
        };

        let process = match result.primary {
            Some(p) => p,
            None => {
                records.push(not_running());
                continue;
            }
        };

        let stats = match table.read_stats(process) {
            Ok(stats) => stats,
            Err(e) => {
                debug!("Downgrading {} to not running: {}", declared.identity, e);
                read_failures += 1;
                records.push(not_running());
                continue;
            }
        };

        let key = process.key();
        let current = RawSample {
            cpu_seconds: stats.cpu_total_seconds(),
            read_at: stats.read_at,
        };
        let cpu = cpu_percent(previous.get(&key), &current);
        raw.insert(key, current);

        records.push(running_record(result, process, &stats, cpu));
    }

    SampleOutcome {
        records,
        raw,
        read_failures,
    }
}
