//! Host-level facts needed to interpret /proc counters.
//!
//! This module provides clock tick and page size detection, the system boot
//! time, the CPU core count and the hostname.

use once_cell::sync::Lazy;
use std::fs;

/// Fallback used when sysconf cannot report the clock tick rate.
const DEFAULT_CLK_TCK: f64 = 100.0;

/// Fallback used when sysconf cannot report the page size.
const DEFAULT_PAGE_SIZE: u64 = 4096;

static CLK_TCK: Lazy<f64> = Lazy::new(|| {
    // SAFETY: sysconf has no preconditions and only reads system configuration.
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 {
        ticks as f64
    } else {
        DEFAULT_CLK_TCK
    }
});

static PAGE_SIZE: Lazy<u64> = Lazy::new(|| {
    // SAFETY: see above.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as u64
    } else {
        DEFAULT_PAGE_SIZE
    }
});

/// Kernel clock ticks per second (USER_HZ), used by /proc/<pid>/stat times.
pub fn clock_ticks_per_second() -> f64 {
    *CLK_TCK
}

/// Memory page size in bytes.
pub fn page_size() -> u64 {
    *PAGE_SIZE
}

/// Reads the system boot time (unix seconds) from /proc/stat.
pub fn read_boot_time() -> Result<i64, String> {
    let content = fs::read_to_string("/proc/stat")
        .map_err(|e| format!("Failed to read /proc/stat: {}", e))?;
    parse_boot_time(&content)
}

/// Extracts the `btime` line from /proc/stat content.
pub fn parse_boot_time(content: &str) -> Result<i64, String> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("btime"))
        .ok_or_else(|| "No btime entry in /proc/stat".to_string())?
        .trim()
        .parse::<i64>()
        .map_err(|e| format!("Failed to parse btime: {}", e))
}

/// Gets the number of CPU cores.
///
/// Reads from /proc/cpuinfo and counts the number of "processor" lines.
pub fn get_cpu_core_count() -> Result<usize, String> {
    let content = fs::read_to_string("/proc/cpuinfo")
        .map_err(|e| format!("Failed to read /proc/cpuinfo: {}", e))?;

    let count = parse_cpu_count_content(&content);
    if count == 0 {
        return Err("No processors found in /proc/cpuinfo".to_string());
    }

    Ok(count)
}

fn parse_cpu_count_content(content: &str) -> usize {
    content
        .lines()
        .filter(|line| line.starts_with("processor"))
        .count()
}

/// Returns the short hostname of this machine.
pub fn hostname() -> String {
    if let Ok(s) = fs::read_to_string("/proc/sys/kernel/hostname") {
        let t = s.trim();
        if !t.is_empty() {
            return t.to_string();
        }
    }

    let mut buf = [0u8; 256];
    // SAFETY: the buffer is valid for buf.len() bytes and gethostname
    // NUL-terminates on success when the name fits.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc == 0 {
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        if let Ok(name) = std::str::from_utf8(&buf[..end]) {
            if !name.is_empty() {
                return name.to_string();
            }
        }
    }
    "localhost".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_boot_time() {
        let stat = "cpu  10 0 20 300 0 0 0 0 0 0\nintr 1 2 3\nctxt 42\nbtime 1700000000\nprocesses 99\n";
        assert_eq!(parse_boot_time(stat), Ok(1_700_000_000));
    }

    #[test]
    fn test_parse_boot_time_missing() {
        let stat = "cpu  10 0 20 300 0 0 0 0 0 0\nctxt 42\n";
        assert!(parse_boot_time(stat).is_err());
    }

    #[test]
    fn test_parse_cpu_count() {
        let cpuinfo = "processor\t: 0\nvendor_id\t: GenuineIntel\nprocessor\t: 1\nvendor_id\t: GenuineIntel\n";
        assert_eq!(parse_cpu_count_content(cpuinfo), 2);
    }

    #[test]
    fn test_clock_ticks_positive() {
        assert!(clock_ticks_per_second() > 0.0);
        assert!(page_size() > 0);
    }

    #[test]
    fn test_hostname_not_empty() {
        assert!(!hostname().is_empty());
    }
}
