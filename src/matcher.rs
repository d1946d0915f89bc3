//! Correlation of declared servers with live processes.
//!
//! A device server runs as `<Server> <instance> [options]`, either as a
//! native executable or as a script under an interpreter
//! (`python3 /opt/ds/Motor.py m1`). Both forms reduce to the key
//! `motor/m1`, which is joined against [`ServerIdentity::match_key`].

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

use crate::process::ProcessHandle;
use crate::registry::{server_key, DeclaredServer};

/// Interpreter options that consume the following argument.
const OPTIONS_WITH_VALUE: &[&str] = &["-cp", "-classpath", "--class-path", "-X", "-W"];

/// Which candidate becomes the primary match when several processes claim
/// the same server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AmbiguityPolicy {
    /// Most recently started process wins.
    #[default]
    Newest,
    /// Longest running process wins.
    Oldest,
    /// No primary; the server is reported as not running.
    None,
}

impl FromStr for AmbiguityPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "newest" => Ok(Self::Newest),
            "oldest" => Ok(Self::Oldest),
            "none" => Ok(Self::None),
            other => Err(format!(
                "Invalid ambiguity_policy '{}', expected 'newest', 'oldest' or 'none'",
                other
            )),
        }
    }
}

impl fmt::Display for AmbiguityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Newest => "newest",
            Self::Oldest => "oldest",
            Self::None => "none",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Running,
    NotRunning,
    Ambiguous,
}

/// Match of one declared server against the process table.
#[derive(Debug, Clone)]
pub struct MatchResult<'a> {
    pub declared: &'a DeclaredServer,
    pub status: MatchStatus,
    pub primary: Option<&'a ProcessHandle>,
    /// Candidates that also matched but were not chosen.
    pub extras: Vec<&'a ProcessHandle>,
}

#[derive(Debug, Clone)]
pub struct MatchOutcome<'a> {
    pub results: Vec<MatchResult<'a>>,
    /// Number of servers with more than one candidate process.
    pub ambiguous: usize,
}

/// Derives server keys from process command lines.
#[derive(Debug, Clone)]
pub struct KeyDeriver {
    interpreters: HashSet<String>,
}

impl KeyDeriver {
    pub fn new<I, S>(interpreters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            interpreters: interpreters
                .into_iter()
                .map(|s| interpreter_family(s.as_ref()))
                .collect(),
        }
    }

    fn is_interpreter(&self, program: &str) -> bool {
        self.interpreters.contains(&interpreter_family(program))
    }

    /// Returns the `server/instance` key for a command line, if it looks
    /// like a device server invocation.
    pub fn derive(&self, cmdline: &[String]) -> Option<String> {
        let program = basename(cmdline.first()?);
        let mut args = cmdline.iter().skip(1);

        let (server, interpreted_by_java) = if self.is_interpreter(program) {
            let mut script = None;
            while let Some(arg) = args.next() {
                if OPTIONS_WITH_VALUE.contains(&arg.as_str()) {
                    args.next();
                } else if !arg.starts_with('-') {
                    script = Some(arg.as_str());
                    break;
                }
            }
            (basename(script?), interpreter_family(program) == "java")
        } else {
            (program, false)
        };

        let server = server.strip_suffix(".py").unwrap_or(server);
        let server = if interpreted_by_java {
            // `-jar Archiver.jar` or a main class such as `org.tango.Archiver`.
            let server = server.strip_suffix(".jar").unwrap_or(server);
            server.rsplit('.').next().unwrap_or(server)
        } else {
            server
        };

        let instance = args.next()?;
        if server.is_empty() || instance.is_empty() || instance.starts_with('-') {
            return None;
        }
        Some(server_key(server, instance))
    }
}

impl Default for KeyDeriver {
    fn default() -> Self {
        Self::new(["python", "python2", "python3", "java"])
    }
}

fn basename(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(path)
}

/// `python3.11` and `python` belong to the same family.
fn interpreter_family(program: &str) -> String {
    basename(program)
        .trim_end_matches(|c: char| c.is_ascii_digit() || c == '.')
        .to_ascii_lowercase()
}

fn pick_primary<'a>(
    mut candidates: Vec<&'a ProcessHandle>,
    policy: AmbiguityPolicy,
) -> (Option<&'a ProcessHandle>, Vec<&'a ProcessHandle>) {
    // Newest first; pid breaks ties between same-tick starts.
    candidates.sort_by(|a, b| (b.start_ticks, b.pid).cmp(&(a.start_ticks, a.pid)));
    match policy {
        AmbiguityPolicy::Newest => {
            let primary = candidates.remove(0);
            (Some(primary), candidates)
        }
        AmbiguityPolicy::Oldest => {
            let primary = candidates.pop();
            (primary, candidates)
        }
        AmbiguityPolicy::None => (None, candidates),
    }
}

/// Joins declared servers with live processes in O(servers + processes).
///
/// Servers declared more than once (same key) are matched once.
pub fn match_servers<'a>(
    declared: &'a [DeclaredServer],
    processes: &'a [ProcessHandle],
    deriver: &KeyDeriver,
    policy: AmbiguityPolicy,
) -> MatchOutcome<'a> {
    let mut by_key: HashMap<String, Vec<&'a ProcessHandle>> = HashMap::with_capacity(processes.len());
    for process in processes {
        if let Some(key) = deriver.derive(&process.cmdline) {
            by_key.entry(key).or_default().push(process);
        }
    }

    let mut seen = HashSet::with_capacity(declared.len());
    let mut results = Vec::with_capacity(declared.len());
    let mut ambiguous = 0usize;

    for server in declared {
        let key = server.identity.match_key();
        if !seen.insert(key.clone()) {
            debug!("Skipping duplicate declaration of {}", server.identity);
            continue;
        }

        let result = match by_key.remove(&key) {
            None => MatchResult {
                declared: server,
                status: MatchStatus::NotRunning,
                primary: None,
                extras: Vec::new(),
            },
            Some(mut candidates) if candidates.len() == 1 => MatchResult {
                declared: server,
                status: MatchStatus::Running,
                primary: candidates.pop(),
                extras: Vec::new(),
            },
            Some(candidates) => {
                ambiguous += 1;
                let pids: Vec<u32> = candidates.iter().map(|p| p.pid).collect();
                let (primary, extras) = pick_primary(candidates, policy);
                debug!(
                    "Ambiguous match for {}: pids {:?}, primary {:?} ({})",
                    server.identity,
                    pids,
                    primary.map(|p| p.pid),
                    policy
                );
                MatchResult {
                    declared: server,
                    status: MatchStatus::Ambiguous,
                    primary,
                    extras,
                }
            }
        };
        results.push(result);
    }

    MatchOutcome { results, ambiguous }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ServerIdentity;
    use chrono::Utc;

    fn cmd(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    fn proc(pid: u32, start_ticks: u64, args: &[&str]) -> ProcessHandle {
        ProcessHandle {
            pid,
            start_ticks,
            started_at: Utc::now(),
            cmdline: cmd(args),
        }
    }

    fn declared(name: &str) -> DeclaredServer {
        DeclaredServer::uncontrolled(ServerIdentity::parse(name).unwrap())
    }

    #[test]
    fn test_derive_native_server() {
        let d = KeyDeriver::default();
        assert_eq!(
            d.derive(&cmd(&["/usr/lib/tango/Motor", "m1", "-v4"])),
            Some("motor/m1".to_string())
        );
        assert_eq!(d.derive(&cmd(&["Motor"])), None);
        assert_eq!(d.derive(&cmd(&["Motor", "-v4"])), None);
    }

    #[test]
    fn test_derive_python_server() {
        let d = KeyDeriver::default();
        assert_eq!(
            d.derive(&cmd(&["/usr/bin/python3.11", "-u", "/opt/ds/Camera.py", "Cam2"])),
            Some("camera/cam2".to_string())
        );
        assert_eq!(d.derive(&cmd(&["python3"])), None);
    }

    #[test]
    fn test_derive_java_server() {
        let d = KeyDeriver::default();
        assert_eq!(
            d.derive(&cmd(&[
                "/usr/bin/java",
                "-cp",
                "/opt/ds/lib/*",
                "-DTANGO_HOST=db:10000",
                "org.tango.Archiver",
                "a1"
            ])),
            Some("archiver/a1".to_string())
        );
        assert_eq!(
            d.derive(&cmd(&["java", "-Xmx512m", "-jar", "/opt/ds/Archiver.jar", "a1"])),
            Some("archiver/a1".to_string())
        );
    }

    #[test]
    fn test_custom_interpreters() {
        let d = KeyDeriver::new(["ruby"]);
        assert_eq!(
            d.derive(&cmd(&["ruby", "Pump.py", "p1"])),
            Some("pump/p1".to_string())
        );
        // python is now a plain executable name.
        assert_eq!(
            d.derive(&cmd(&["python3", "Pump.py", "p1"])),
            Some("python3/pump.py".to_string())
        );
    }

    #[test]
    fn test_match_running_and_not_running() {
        let servers = vec![declared("Motor/m1"), declared("Camera/cam2")];
        let procs = vec![
            proc(100, 10, &["/usr/bin/Motor", "m1"]),
            proc(200, 20, &["/usr/sbin/sshd", "-D"]),
        ];
        let out = match_servers(&servers, &procs, &KeyDeriver::default(), AmbiguityPolicy::Newest);

        assert_eq!(out.results.len(), 2);
        assert_eq!(out.ambiguous, 0);
        assert_eq!(out.results[0].status, MatchStatus::Running);
        assert_eq!(out.results[0].primary.map(|p| p.pid), Some(100));
        assert_eq!(out.results[1].status, MatchStatus::NotRunning);
        assert!(out.results[1].primary.is_none());
    }

    #[test]
    fn test_match_is_case_insensitive() {
        let servers = vec![declared("Motor/M1")];
        let procs = vec![proc(100, 10, &["motor", "m1"])];
        let out = match_servers(&servers, &procs, &KeyDeriver::default(), AmbiguityPolicy::Newest);
        assert_eq!(out.results[0].status, MatchStatus::Running);
    }

    #[test]
    fn test_ambiguous_newest_wins() {
        let servers = vec![declared("Motor/m1")];
        let procs = vec![
            proc(300, 10, &["Motor", "m1"]),
            proc(100, 50, &["Motor", "m1"]),
        ];
        let out = match_servers(&servers, &procs, &KeyDeriver::default(), AmbiguityPolicy::Newest);

        assert_eq!(out.ambiguous, 1);
        let r = &out.results[0];
        assert_eq!(r.status, MatchStatus::Ambiguous);
        assert_eq!(r.primary.map(|p| p.pid), Some(100));
        assert_eq!(r.extras.iter().map(|p| p.pid).collect::<Vec<_>>(), vec![300]);
    }

    #[test]
    fn test_ambiguous_oldest_and_none() {
        let servers = vec![declared("Motor/m1")];
        let procs = vec![
            proc(300, 10, &["Motor", "m1"]),
            proc(100, 50, &["Motor", "m1"]),
            proc(200, 30, &["Motor", "m1"]),
        ];

        let out = match_servers(&servers, &procs, &KeyDeriver::default(), AmbiguityPolicy::Oldest);
        assert_eq!(out.results[0].primary.map(|p| p.pid), Some(300));
        assert_eq!(out.results[0].extras.len(), 2);

        let out = match_servers(&servers, &procs, &KeyDeriver::default(), AmbiguityPolicy::None);
        assert!(out.results[0].primary.is_none());
        assert_eq!(out.results[0].extras.len(), 3);
        assert_eq!(out.ambiguous, 1);
    }

    #[test]
    fn test_same_start_tick_breaks_tie_by_pid() {
        let servers = vec![declared("Motor/m1")];
        let procs = vec![proc(7, 10, &["Motor", "m1"]), proc(9, 10, &["Motor", "m1"])];
        let out = match_servers(&servers, &procs, &KeyDeriver::default(), AmbiguityPolicy::Newest);
        assert_eq!(out.results[0].primary.map(|p| p.pid), Some(9));
    }

    #[test]
    fn test_duplicate_declarations_collapse() {
        let servers = vec![declared("Motor/m1"), declared("motor/M1"), declared("Camera/c")];
        let out = match_servers(&servers, &[], &KeyDeriver::default(), AmbiguityPolicy::Newest);
        assert_eq!(out.results.len(), 2);
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("Newest".parse::<AmbiguityPolicy>(), Ok(AmbiguityPolicy::Newest));
        assert_eq!("none".parse::<AmbiguityPolicy>(), Ok(AmbiguityPolicy::None));
        assert!("latest".parse::<AmbiguityPolicy>().is_err());
        assert_eq!(AmbiguityPolicy::Oldest.to_string(), "oldest");
    }
}
