//! Running statistics about refresh cycles, shown on /health.

use chrono::{DateTime, Utc};
use std::fmt::Write as FmtWrite;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Clone, Copy, Default)]
struct RunningStat {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    last: f64,
}

impl RunningStat {
    fn add(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
            self.last = value;
            self.sum = value;
            self.count = 1;
            return;
        }
        self.count += 1;
        self.sum += value;
        self.last = value;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / (self.count as f64)
        }
    }
}

#[derive(Default)]
struct Stat {
    inner: Mutex<RunningStat>,
}

impl Stat {
    fn add_sample(&self, value: f64) {
        if let Ok(mut s) = self.inner.lock() {
            s.add(value);
        }
    }

    /// (current, average, max, min, count)
    fn snapshot(&self) -> (f64, f64, f64, f64, u64) {
        if let Ok(s) = self.inner.lock() {
            (s.last, s.avg(), s.max, s.min, s.count)
        } else {
            (0.0, 0.0, 0.0, 0.0, 0)
        }
    }
}

#[derive(Default)]
pub struct HealthStats {
    declared_servers: Stat,
    running_servers: Stat,
    refresh_duration_seconds: Stat,
    total_refreshes: AtomicU64,
    failed_refreshes: AtomicU64,
    skipped_refreshes: AtomicU64,
    http_requests: AtomicU64,
    last_refresh_ok: AtomicBool,
    last_success_at: Mutex<Option<DateTime<Utc>>>,
}

impl HealthStats {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn record_refresh(&self, declared: u64, running: u64, duration_seconds: f64) {
        self.declared_servers.add_sample(declared as f64);
        self.running_servers.add_sample(running as f64);
        self.refresh_duration_seconds.add_sample(duration_seconds);
        self.total_refreshes.fetch_add(1, Ordering::Relaxed);
        self.last_refresh_ok.store(true, Ordering::Relaxed);
        if let Ok(mut at) = self.last_success_at.lock() {
            *at = Some(Utc::now());
        }
    }

    pub fn record_failure(&self) {
        self.failed_refreshes.fetch_add(1, Ordering::Relaxed);
        self.last_refresh_ok.store(false, Ordering::Relaxed);
    }

    pub fn record_skip(&self) {
        self.record_skips(1);
    }

    pub fn record_skips(&self, count: u64) {
        self.skipped_refreshes.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_http_request(&self) {
        self.http_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// True once a refresh has succeeded and the latest one did not fail.
    pub fn is_healthy(&self) -> bool {
        self.last_refresh_ok.load(Ordering::Relaxed) && self.last_success_at().is_some()
    }

    pub fn last_success_at(&self) -> Option<DateTime<Utc>> {
        self.last_success_at.lock().ok().and_then(|at| *at)
    }

    pub fn total_refreshes(&self) -> u64 {
        self.total_refreshes.load(Ordering::Relaxed)
    }

    pub fn failed_refreshes(&self) -> u64 {
        self.failed_refreshes.load(Ordering::Relaxed)
    }

    pub fn skipped_refreshes(&self) -> u64 {
        self.skipped_refreshes.load(Ordering::Relaxed)
    }

    pub fn render_table(&self) -> String {
        let (dc_cur, dc_avg, dc_max, dc_min, _) = self.declared_servers.snapshot();
        let (rn_cur, rn_avg, rn_max, rn_min, _) = self.running_servers.snapshot();
        let (rd_cur, rd_avg, rd_max, rd_min, _) = self.refresh_duration_seconds.snapshot();

        let left_col = 26usize;
        let col_w = 12usize;

        let mut out = String::new();

        writeln!(
            out,
            "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
            "metric",
            "current",
            "average",
            "max",
            "min",
            left = left_col,
            col = col_w
        )
        .ok();

        writeln!(out, "{}", "-".repeat(left_col + 3 + (col_w + 3) * 4)).ok();

        let rows = [
            ("declared servers", dc_cur, dc_avg, dc_max, dc_min, 0usize),
            ("running servers", rn_cur, rn_avg, rn_max, rn_min, 0usize),
            ("refresh duration (s)", rd_cur, rd_avg, rd_max, rd_min, 3usize),
        ];
        for (label, cur, avg, max, min, precision) in rows {
            writeln!(
                out,
                "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
                label,
                format!("{:.p$}", cur, p = precision),
                format!("{:.p$}", avg, p = precision.max(1)),
                format!("{:.p$}", max, p = precision),
                format!("{:.p$}", min, p = precision),
                left = left_col,
                col = col_w
            )
            .ok();
        }

        writeln!(out).ok();
        writeln!(out, "successful refreshes: {}", self.total_refreshes()).ok();
        writeln!(out, "failed refreshes: {}", self.failed_refreshes()).ok();
        writeln!(out, "skipped refreshes: {}", self.skipped_refreshes()).ok();
        writeln!(
            out,
            "http requests: {}",
            self.http_requests.load(Ordering::Relaxed)
        )
        .ok();
        match self.last_success_at() {
            Some(at) => writeln!(out, "last successful refresh: {}", at.to_rfc3339()).ok(),
            None => writeln!(out, "last successful refresh: never").ok(),
        };

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_stat() {
        let mut s = RunningStat::default();
        assert_eq!(s.avg(), 0.0);
        for v in [3.0, 1.0, 2.0] {
            s.add(v);
        }
        assert_eq!(s.count, 3);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 3.0);
        assert_eq!(s.last, 2.0);
        assert!((s.avg() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_health_transitions() {
        let h = HealthStats::new();
        assert!(!h.is_healthy());

        h.record_refresh(4, 3, 0.01);
        assert!(h.is_healthy());

        h.record_failure();
        assert!(!h.is_healthy());
        assert_eq!(h.failed_refreshes(), 1);

        h.record_refresh(4, 4, 0.02);
        assert!(h.is_healthy());
        assert_eq!(h.total_refreshes(), 2);
    }

    #[test]
    fn test_render_table() {
        let h = HealthStats::new();
        h.record_refresh(4, 3, 0.25);
        h.record_skip();
        h.record_skips(2);
        assert_eq!(h.skipped_refreshes(), 3);
        let table = h.render_table();
        assert!(table.contains("declared servers"));
        assert!(table.contains("successful refreshes: 1"));
        assert!(table.contains("skipped refreshes: 3"));
        assert!(table.contains("0.250"));
    }
}
