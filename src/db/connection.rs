use anyhow::{Context, Result};
use postgres_native_tls::MakeTlsConnector;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ClientError;
use crate::logger::{DefaultLogger, QueryLogger};
use crate::query::Dialect;

/// Database engine a connection targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Engine {
    #[serde(rename = "mysql")]
    MySql,
    #[serde(rename = "maria", alias = "mariadb")]
    Maria,
    #[default]
    #[serde(rename = "pg", alias = "postgres", alias = "postgresql")]
    Postgres,
    #[serde(rename = "sqlite", alias = "sqlite3")]
    Sqlite,
}

impl Engine {
    pub fn dialect(&self) -> Dialect {
        match self {
            Engine::MySql | Engine::Maria => Dialect::MySql,
            Engine::Postgres => Dialect::Postgres,
            Engine::Sqlite => Dialect::Sqlite,
        }
    }

    pub fn default_port(&self) -> Option<u16> {
        match self {
            Engine::MySql | Engine::Maria => Some(3306),
            Engine::Postgres => Some(5432),
            Engine::Sqlite => None,
        }
    }

    /// Engines that open a local file instead of a network socket.
    pub fn is_embedded(&self) -> bool {
        matches!(self, Engine::Sqlite)
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Engine::MySql => write!(f, "mysql"),
            Engine::Maria => write!(f, "maria"),
            Engine::Postgres => write!(f, "pg"),
            Engine::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl FromStr for Engine {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mysql" => Ok(Engine::MySql),
            "maria" | "mariadb" => Ok(Engine::Maria),
            "pg" | "postgres" | "postgresql" => Ok(Engine::Postgres),
            "sqlite" | "sqlite3" => Ok(Engine::Sqlite),
            other => Err(format!("unknown engine '{}'", other)),
        }
    }
}

/// TLS negotiation for PostgreSQL, named after libpq's `sslmode` values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum SslMode {
    /// Plain TCP.
    Disable,
    /// TLS when the server offers it, plain TCP otherwise.
    #[default]
    Prefer,
    /// TLS without certificate checks.
    Require,
    /// TLS with a certificate chained to a trusted root.
    VerifyCa,
    /// `VerifyCa` plus a hostname match.
    VerifyFull,
}

impl SslMode {
    fn as_libpq(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }
}

/// Jump host used to forward the database port over SSH.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Private key passed to `ssh -i`; the agent is used when unset.
    pub identity_file: Option<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 22,
            username: String::new(),
            identity_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub name: String,
    pub engine: Engine,
    pub host: String,
    /// Falls back to the engine's default port when unset.
    pub port: Option<u16>,
    pub database: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub ssl_mode: SslMode,
    /// Accept invalid/self-signed certificates. Only honoured for
    /// `Prefer` and `Require`.
    pub accept_invalid_certs: bool,
    /// Optional path to a custom CA certificate bundle (PEM format).
    pub ca_cert_path: Option<String>,
    /// Database file for embedded engines.
    pub path: Option<String>,
    pub readonly: bool,
    pub pool_size: Option<usize>,
    pub connect_timeout_secs: u64,
    pub ssh: Option<SshConfig>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            name: String::from("Local PostgreSQL"),
            engine: Engine::Postgres,
            host: String::from("localhost"),
            port: None,
            database: String::from("postgres"),
            username: String::from("postgres"),
            password: String::new(),
            ssl_mode: SslMode::default(),
            accept_invalid_certs: false,
            ca_cert_path: None,
            path: None,
            readonly: false,
            pool_size: None,
            connect_timeout_secs: 15,
            ssh: None,
        }
    }
}

impl ConnectionConfig {
    /// Configuration for an embedded database file.
    pub fn sqlite(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            name: path.clone(),
            engine: Engine::Sqlite,
            host: String::new(),
            database: String::from("main"),
            username: String::new(),
            path: Some(path),
            ..Default::default()
        }
    }

    pub fn effective_port(&self) -> u16 {
        self.port
            .or_else(|| self.engine.default_port())
            .unwrap_or_default()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// libpq key=value connection string pointed at `host:port`, which
    /// differs from the configured endpoint when an SSH tunnel is in use.
    pub fn connection_string_for(&self, host: &str, port: u16) -> String {
        format!(
            "host={} port={} dbname={} user={} password={} sslmode={} connect_timeout={}",
            quote_conn_value(host),
            port,
            quote_conn_value(&self.database),
            quote_conn_value(&self.username),
            quote_conn_value(&self.password),
            self.ssl_mode.as_libpq(),
            self.connect_timeout_secs
        )
    }

    pub fn connection_string(&self) -> String {
        self.connection_string_for(&self.host, self.effective_port())
    }

    pub fn display_string(&self) -> String {
        if self.engine.is_embedded() {
            return format!("{}:{}", self.engine, self.path.as_deref().unwrap_or(":memory:"));
        }
        format!(
            "{}://{}@{}:{}/{}",
            self.engine,
            self.username,
            self.host,
            self.effective_port(),
            self.database
        )
    }
}

/// Construction-time parameters of a client.
#[derive(Clone)]
pub struct ClientParams {
    /// Correlation id used for logging and cancellation.
    pub uid: String,
    pub connection: ConnectionConfig,
    /// Overrides `connection.pool_size` when set.
    pub pool_size: Option<usize>,
    pub logger: Option<Arc<dyn QueryLogger>>,
}

impl ClientParams {
    pub fn new(uid: impl Into<String>, connection: ConnectionConfig) -> Self {
        Self {
            uid: uid.into(),
            connection,
            pool_size: None,
            logger: None,
        }
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = Some(size);
        self
    }

    pub fn with_logger(mut self, logger: impl QueryLogger + 'static) -> Self {
        self.logger = Some(Arc::new(logger));
        self
    }

    pub fn engine(&self) -> Engine {
        self.connection.engine
    }

    pub fn effective_pool_size(&self) -> Option<usize> {
        self.pool_size.or(self.connection.pool_size)
    }

    /// The logger override, or a tracing-backed default.
    pub fn logger(&self) -> Arc<dyn QueryLogger> {
        self.logger
            .clone()
            .unwrap_or_else(|| Arc::new(DefaultLogger::tracing()))
    }
}

impl fmt::Debug for ClientParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientParams")
            .field("uid", &self.uid)
            .field("connection", &self.connection.display_string())
            .field("pool_size", &self.pool_size)
            .field("logger", &self.logger.is_some())
            .finish()
    }
}

/// Saved connections and the last used connection name.
#[derive(Debug, Clone)]
pub struct ConnectionStore {
    dir: PathBuf,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SavedConnections {
    #[serde(default)]
    connections: Vec<ConnectionConfig>,
}

impl ConnectionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store under `<config_dir>/polysql`.
    pub fn default_location() -> Self {
        Self::new(
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("polysql"),
        )
    }

    pub fn connections_path(&self) -> PathBuf {
        self.dir.join("connections.toml")
    }

    fn last_connection_path(&self) -> PathBuf {
        self.dir.join("last_connection")
    }

    pub fn load(&self) -> Result<Vec<ConnectionConfig>> {
        let path = self.connections_path();
        if !path.exists() {
            return Ok(vec![]);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let saved: SavedConnections = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(saved.connections)
    }

    pub fn save(&self, connections: &[ConnectionConfig]) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let saved = SavedConnections {
            connections: connections.to_vec(),
        };
        let content = toml::to_string_pretty(&saved)?;
        std::fs::write(self.connections_path(), content)?;
        Ok(())
    }

    pub fn find(&self, name: &str) -> Result<Option<ConnectionConfig>> {
        Ok(self.load()?.into_iter().find(|c| c.name == name))
    }

    pub fn save_last(&self, name: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.last_connection_path(), name)?;
        Ok(())
    }

    pub fn load_last(&self) -> Option<String> {
        std::fs::read_to_string(self.last_connection_path())
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

/// Build a TLS connector for the connection's SSL mode.
///
/// With `strict_verify` (verify-ca / verify-full) certificates are always
/// checked, even if `accept_invalid_certs` is set.
pub(crate) fn build_tls_connector(
    config: &ConnectionConfig,
    strict_verify: bool,
) -> std::result::Result<MakeTlsConnector, ClientError> {
    let mut builder = native_tls::TlsConnector::builder();

    if config.accept_invalid_certs && !strict_verify {
        builder.danger_accept_invalid_certs(true);
        builder.danger_accept_invalid_hostnames(true);
    } else if let Some(ca_path) = &config.ca_cert_path {
        add_ca_certificates(&mut builder, Path::new(ca_path))?;
    }
    // otherwise the system trust store applies

    let connector = builder
        .build()
        .map_err(|e| ClientError::Connection(format!("Failed to build TLS connector: {}", e)))?;
    Ok(MakeTlsConnector::new(connector))
}

fn add_ca_certificates(
    builder: &mut native_tls::TlsConnectorBuilder,
    path: &Path,
) -> std::result::Result<(), ClientError> {
    let pem = std::fs::read_to_string(path).map_err(|e| {
        ClientError::Config(format!(
            "Failed to read CA certificate file {}: {}",
            path.display(),
            e
        ))
    })?;

    for block in split_pem_certificates(&pem).map_err(ClientError::Config)? {
        let cert = native_tls::Certificate::from_pem(block.as_bytes())
            .map_err(|e| ClientError::Config(format!("Failed to parse certificate: {}", e)))?;
        builder.add_root_certificate(cert);
    }
    Ok(())
}

/// Split a PEM bundle into one PEM block per certificate.
fn split_pem_certificates(pem: &str) -> std::result::Result<Vec<String>, String> {
    let mut certs = Vec::new();
    let mut current: Option<String> = None;

    for line in pem.lines() {
        let line = line.trim();
        if line.contains("-----BEGIN CERTIFICATE-----") {
            current = Some(format!("{}\n", line));
        } else if line.contains("-----END CERTIFICATE-----") {
            if let Some(mut block) = current.take() {
                block.push_str(line);
                block.push('\n');
                certs.push(block);
            }
        } else if let Some(block) = current.as_mut() {
            block.push_str(line);
            block.push('\n');
        }
    }

    if certs.is_empty() {
        return Err("No valid certificates found in PEM data".to_string());
    }
    Ok(certs)
}

/// Single-quoted libpq connection string value.
fn quote_conn_value(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if matches!(c, '\\' | '\'') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('\'');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_aliases() {
        assert_eq!("postgresql".parse::<Engine>(), Ok(Engine::Postgres));
        assert_eq!("MariaDB".parse::<Engine>(), Ok(Engine::Maria));
        assert!("oracle".parse::<Engine>().is_err());
        assert_eq!(Engine::Maria.dialect(), Dialect::MySql);
    }

    #[test]
    fn test_connection_string_quotes_values() {
        let config = ConnectionConfig {
            password: "p'w\\d".into(),
            ..Default::default()
        };
        let s = config.connection_string();
        assert!(s.contains("host='localhost' port=5432"));
        assert!(s.contains("password='p\\'w\\\\d'"));
        assert!(s.ends_with("sslmode=prefer connect_timeout=15"));
    }

    #[test]
    fn test_toml_roundtrip_skips_password() {
        let config = ConnectionConfig {
            name: "prod".into(),
            password: "secret".into(),
            ssh: Some(SshConfig {
                host: "bastion".into(),
                username: "ops".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let text = toml::to_string(&config).unwrap();
        assert!(!text.contains("secret"));

        let parsed: ConnectionConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.name, "prod");
        assert!(parsed.password.is_empty());
        assert_eq!(parsed.ssh.unwrap().port, 22);
    }

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let parsed: ConnectionConfig =
            toml::from_str("name = \"local\"\nengine = \"sqlite\"\npath = \"app.db\"").unwrap();
        assert_eq!(parsed.engine, Engine::Sqlite);
        assert_eq!(parsed.path.as_deref(), Some("app.db"));
        assert_eq!(parsed.connect_timeout_secs, 15);
        assert_eq!(parsed.display_string(), "sqlite:app.db");
    }

    #[test]
    fn test_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConnectionStore::new(dir.path());
        assert!(store.load().unwrap().is_empty());
        assert!(store.load_last().is_none());

        store
            .save(&[ConnectionConfig::sqlite("a.db"), ConnectionConfig::default()])
            .unwrap();
        store.save_last("a.db").unwrap();

        assert_eq!(store.load().unwrap().len(), 2);
        assert_eq!(store.find("a.db").unwrap().unwrap().engine, Engine::Sqlite);
        assert_eq!(store.load_last().as_deref(), Some("a.db"));
    }

    #[test]
    fn test_client_params_pool_override() {
        let config = ConnectionConfig {
            pool_size: Some(4),
            ..Default::default()
        };
        let params = ClientParams::new("u1", config.clone());
        assert_eq!(params.effective_pool_size(), Some(4));
        assert_eq!(params.with_pool_size(8).effective_pool_size(), Some(8));
    }

    #[test]
    fn test_split_pem_certificates() {
        let pem = "junk\n-----BEGIN CERTIFICATE-----\nAAAA\nBBBB\n-----END CERTIFICATE-----\n\
                   -----BEGIN CERTIFICATE-----\nCCCC\n-----END CERTIFICATE-----\n";
        let certs = split_pem_certificates(pem).unwrap();
        assert_eq!(certs.len(), 2);
        assert!(certs[0].starts_with("-----BEGIN CERTIFICATE-----\nAAAA\nBBBB\n"));
        assert!(split_pem_certificates("nothing here").is_err());
    }
}
