//! Sources of the "should be running" server list.
//!
//! The starter reports one line per device server on its host in the form
//! `<server>/<instance>\t<state>\t<controlled>\t<level>`. [`HttpRegistry`]
//! reads that list through the starter's REST gateway and [`FileRegistry`]
//! reads the same format from a local file.

use ahash::AHashSet as HashSet;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::config::Config;
use crate::error::{ConfigError, RegistryError};

/// Identity of a declared device server, e.g. `TangoTest/test`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ServerIdentity {
    pub server: String,
    pub instance: String,
}

impl ServerIdentity {
    pub fn new(server: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            instance: instance.into(),
        }
    }

    /// Parses `server/instance`. Both parts must be non-empty.
    pub fn parse(name: &str) -> Option<Self> {
        let (server, instance) = name.trim().split_once('/')?;
        if server.is_empty() || instance.is_empty() || instance.contains('/') {
            return None;
        }
        Some(Self::new(server, instance))
    }

    /// Case-insensitive key used to join against process command lines.
    pub fn match_key(&self) -> String {
        server_key(&self.server, &self.instance)
    }
}

impl fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.server, self.instance)
    }
}

/// Builds the join key shared by identities and process command lines.
pub fn server_key(server: &str, instance: &str) -> String {
    format!("{}/{}", server.to_lowercase(), instance.to_lowercase())
}

/// A server as declared by the starter, with its control attributes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeclaredServer {
    pub identity: ServerIdentity,
    /// Whether the starter controls (starts/stops) this server.
    pub controlled: bool,
    /// Startup level; only meaningful for controlled servers.
    pub level: Option<u32>,
    /// State as reported by the starter (`ON`, `FAULT`, `MOVING`, ...).
    pub starter_state: Option<String>,
}

impl DeclaredServer {
    /// A server that is declared but not starter-controlled.
    pub fn uncontrolled(identity: ServerIdentity) -> Self {
        Self {
            identity,
            controlled: false,
            level: None,
            starter_state: None,
        }
    }
}

/// Capability interface for the server registry.
#[async_trait]
pub trait RegistrySource: Send + Sync {
    /// Returns the servers expected on this host, in registry order.
    async fn fetch(&self) -> Result<Vec<DeclaredServer>, RegistryError>;

    /// Human-readable description of where the list comes from.
    fn describe(&self) -> String;
}

/// Parses one starter line.
pub fn parse_starter_line(line: &str) -> Result<DeclaredServer, RegistryError> {
    let mut fields = line.trim_end_matches(['\r', '\n']).split('\t');
    let name = fields.next().unwrap_or_default();
    let identity = ServerIdentity::parse(name)
        .ok_or_else(|| RegistryError::Malformed(format!("invalid server name '{}'", name)))?;

    let state = fields.next().map(str::trim).filter(|s| !s.is_empty());
    let controlled = match fields.next().map(str::trim) {
        None | Some("0") | Some("") => false,
        Some("1") => true,
        Some(other) => {
            return Err(RegistryError::Malformed(format!(
                "invalid controlled flag '{}' for {}",
                other, identity
            )))
        }
    };
    let level = match fields.next().map(str::trim) {
        Some(v) if controlled && !v.is_empty() => Some(v.parse::<u32>().map_err(|e| {
            RegistryError::Malformed(format!("invalid level '{}' for {}: {}", v, identity, e))
        })?),
        _ => None,
    };

    Ok(DeclaredServer {
        identity,
        controlled,
        level,
        starter_state: state.map(str::to_string),
    })
}

/// Parses a list of starter lines, dropping duplicate servers.
///
/// Blank lines and `#` comments are ignored. The first declaration of a
/// server wins.
pub fn parse_starter_lines<'a, I>(lines: I) -> Result<Vec<DeclaredServer>, RegistryError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for line in lines {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let declared = parse_starter_line(line.trim_start())?;
        if seen.insert(declared.identity.match_key()) {
            out.push(declared);
        } else {
            debug!("Ignoring duplicate declaration of {}", declared.identity);
        }
    }
    Ok(out)
}

/// Parses the REST gateway response body.
///
/// Accepts the attribute-read shape `{"value": [...]}` or a bare array of
/// starter lines.
pub fn parse_registry_body(body: &str) -> Result<Vec<DeclaredServer>, RegistryError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| RegistryError::Malformed(format!("invalid JSON: {}", e)))?;

    let entries = match &value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(map) => match map.get("value") {
            Some(serde_json::Value::Array(items)) => items,
            _ => {
                return Err(RegistryError::Malformed(
                    "expected a 'value' array in response".to_string(),
                ))
            }
        },
        _ => {
            return Err(RegistryError::Malformed(
                "expected an array or object response".to_string(),
            ))
        }
    };

    let lines = entries
        .iter()
        .map(|v| {
            v.as_str().ok_or_else(|| {
                RegistryError::Malformed(format!("expected string entry, got {}", v))
            })
        })
        .collect::<Result<Vec<&str>, _>>()?;

    parse_starter_lines(lines)
}

/// Registry adapter for the starter's REST gateway.
pub struct HttpRegistry {
    client: reqwest::Client,
    url: String,
}

impl HttpRegistry {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RegistryError::Unavailable(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl RegistrySource for HttpRegistry {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> Result<Vec<DeclaredServer>, RegistryError> {
        let response = self
            .client
            .get(&self.url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| RegistryError::Unavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| RegistryError::Unavailable(e.to_string()))?;

        let body = response
            .text()
            .await
            .map_err(|e| RegistryError::Unavailable(format!("failed to read body: {}", e)))?;

        let servers = parse_registry_body(&body)?;
        debug!("Registry returned {} servers", servers.len());
        Ok(servers)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Registry adapter reading a static server list from disk.
pub struct FileRegistry {
    path: PathBuf,
}

impl FileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RegistrySource for FileRegistry {
    async fn fetch(&self) -> Result<Vec<DeclaredServer>, RegistryError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            RegistryError::Unavailable(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        parse_starter_lines(content.lines())
    }

    fn describe(&self) -> String {
        format!("file://{}", self.path.display())
    }
}

/// Builds the registry adapter selected by the configuration.
pub fn source_from_config(cfg: &Config) -> Result<Arc<dyn RegistrySource>, ConfigError> {
    match (&cfg.registry_url, &cfg.registry_file) {
        (Some(url), None) => {
            let http = HttpRegistry::new(url.clone(), cfg.registry_timeout())
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
            Ok(Arc::new(http))
        }
        (None, Some(path)) => Ok(Arc::new(FileRegistry::new(path.clone()))),
        _ => Err(ConfigError::Invalid(
            "exactly one of registry_url or registry_file must be set".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_identity() {
        let id = ServerIdentity::parse("TangoTest/test").unwrap();
        assert_eq!(id.server, "TangoTest");
        assert_eq!(id.instance, "test");
        assert_eq!(id.to_string(), "TangoTest/test");
        assert_eq!(id.match_key(), "tangotest/test");

        assert!(ServerIdentity::parse("TangoTest").is_none());
        assert!(ServerIdentity::parse("/test").is_none());
        assert!(ServerIdentity::parse("a/b/c").is_none());
    }

    #[test]
    fn test_parse_controlled_line() {
        let s = parse_starter_line("Motor/m1\tON\t1\t2").unwrap();
        assert_eq!(s.identity, ServerIdentity::new("Motor", "m1"));
        assert!(s.controlled);
        assert_eq!(s.level, Some(2));
        assert_eq!(s.starter_state.as_deref(), Some("ON"));
    }

    #[test]
    fn test_parse_uncontrolled_line_ignores_level() {
        let s = parse_starter_line("Motor/m1\tFAULT\t0\t0").unwrap();
        assert!(!s.controlled);
        assert_eq!(s.level, None);
    }

    #[test]
    fn test_parse_name_only_line() {
        let s = parse_starter_line("Camera/cam2").unwrap();
        assert_eq!(s, DeclaredServer::uncontrolled(ServerIdentity::new("Camera", "cam2")));
    }

    #[test]
    fn test_parse_rejects_bad_fields() {
        assert!(matches!(
            parse_starter_line("Motor/m1\tON\tyes\t1"),
            Err(RegistryError::Malformed(_))
        ));
        assert!(matches!(
            parse_starter_line("Motor/m1\tON\t1\thigh"),
            Err(RegistryError::Malformed(_))
        ));
        assert!(matches!(
            parse_starter_line("nonsense"),
            Err(RegistryError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_lines_skips_comments_and_duplicates() {
        let text = "# servers\n\nMotor/m1\tON\t1\t1\nmotor/M1\tON\t1\t3\nCamera/cam2\n";
        let servers = parse_starter_lines(text.lines()).unwrap();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].level, Some(1));
        assert_eq!(servers[1].identity.server, "Camera");
    }

    #[test]
    fn test_parse_body_shapes() {
        let wrapped = r#"{"name":"Servers","value":["Motor/m1\tON\t1\t1","Camera/cam2\tON\t0\t0"]}"#;
        assert_eq!(parse_registry_body(wrapped).unwrap().len(), 2);

        let bare = r#"["Motor/m1\tON\t1\t1"]"#;
        assert_eq!(parse_registry_body(bare).unwrap().len(), 1);

        assert!(matches!(
            parse_registry_body("not json"),
            Err(RegistryError::Malformed(_))
        ));
        assert!(matches!(
            parse_registry_body(r#"{"value": 3}"#),
            Err(RegistryError::Malformed(_))
        ));
        assert!(matches!(
            parse_registry_body(r#"[1, 2]"#),
            Err(RegistryError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_file_registry() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Motor/m1\tON\t1\t1").unwrap();
        writeln!(file, "Camera/cam2").unwrap();

        let registry = FileRegistry::new(file.path());
        let servers = registry.fetch().await.unwrap();
        assert_eq!(servers.len(), 2);
        assert!(registry.describe().starts_with("file://"));
    }

    #[tokio::test]
    async fn test_file_registry_missing_file_is_unavailable() {
        let registry = FileRegistry::new("/nonexistent/servers.txt");
        assert!(matches!(
            registry.fetch().await,
            Err(RegistryError::Unavailable(_))
        ));
    }

    #[test]
    fn test_source_from_config() {
        let cfg = Config {
            registry_file: Some(PathBuf::from("/tmp/servers.txt")),
            ..Config::default()
        };
        let source = source_from_config(&cfg).unwrap();
        assert_eq!(source.describe(), "file:///tmp/servers.txt");

        let cfg = Config {
            registry_url: Some("http://starter:8080/servers".into()),
            ..Config::default()
        };
        assert_eq!(
            source_from_config(&cfg).unwrap().describe(),
            "http://starter:8080/servers"
        );

        assert!(source_from_config(&Config::default()).is_err());
    }

    async fn http_source(server: &mockito::Server) -> HttpRegistry {
        HttpRegistry::new(format!("{}/servers", server.url()), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_http_registry_wrapped_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/servers")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"value": ["Motor/m1\tON\t1\t2", "Pump/p1\tOFF\t0\t0"]}"#)
            .create_async()
            .await;

        let servers = http_source(&server).await.fetch().await.unwrap();
        mock.assert_async().await;
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].identity, ServerIdentity::new("Motor", "m1"));
        assert_eq!(servers[0].level, Some(2));
        assert!(!servers[1].controlled);
    }

    #[tokio::test]
    async fn test_http_registry_error_status_is_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/servers")
            .with_status(503)
            .with_body("starter down")
            .create_async()
            .await;

        let err = http_source(&server).await.fetch().await.unwrap_err();
        assert!(matches!(err, RegistryError::Unavailable(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_http_registry_invalid_body_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/servers")
            .with_status(200)
            .with_body("<html>not json</html>")
            .create_async()
            .await;

        let err = http_source(&server).await.fetch().await.unwrap_err();
        assert!(matches!(err, RegistryError::Malformed(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_http_registry_timeout_is_unavailable() {
        // Accepts connections but never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hold = tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                open.push(stream);
            }
        });

        let source = HttpRegistry::new(
            format!("http://{}/servers", addr),
            Duration::from_millis(100),
        )
        .unwrap();
        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, RegistryError::Unavailable(_)), "{:?}", err);
        hold.abort();
    }
}
