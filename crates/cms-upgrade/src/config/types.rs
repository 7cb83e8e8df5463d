//! Configuration type definitions.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Database holding the CMS tables. File-only upgrades need none.
    #[serde(default)]
    pub repository: Option<RepositoryConfig>,

    /// Upgrade run settings.
    #[serde(default)]
    pub upgrade: UpgradeSettings,
}

/// Repository database configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Database type: "postgres", "mssql" or "memory" (aliases accepted).
    #[serde(default = "default_postgres")]
    pub r#type: String,

    /// Database host.
    #[serde(default)]
    pub host: String,

    /// Database port (default: 5432 for PostgreSQL, 1433 for SQL Server).
    #[serde(default)]
    pub port: Option<u16>,

    /// Database name.
    #[serde(default)]
    pub database: String,

    /// Username.
    #[serde(default)]
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Schema for unqualified table names (default: "public" or "dbo").
    #[serde(default)]
    pub schema: Option<String>,

    /// PostgreSQL SSL mode (default: "require").
    #[serde(default = "default_require")]
    pub ssl_mode: String,

    /// SQL Server: encrypt connection (default: "true").
    #[serde(default = "default_true_string")]
    pub encrypt: String,

    /// SQL Server: trust server certificate (default: false).
    #[serde(default)]
    pub trust_server_cert: bool,

    /// Pool size (default: 4).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl RepositoryConfig {
    /// Port, falling back to the default of the database type.
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(match self.r#type.to_lowercase().as_str() {
            "mssql" | "sqlserver" | "sql_server" => 1433,
            _ => 5432,
        })
    }

    /// Schema, falling back to the default of the database type.
    pub fn effective_schema(&self) -> String {
        match &self.schema {
            Some(s) if !s.is_empty() => s.clone(),
            _ => match self.r#type.to_lowercase().as_str() {
                "mssql" | "sqlserver" | "sql_server" => "dbo".to_string(),
                _ => "public".to_string(),
            },
        }
    }

    /// Whether SQL Server encryption is requested. Unknown values mean yes.
    pub fn encrypt_enabled(&self) -> bool {
        !matches!(
            self.encrypt.to_lowercase().as_str(),
            "false" | "no" | "0" | "disable"
        )
    }
}

impl fmt::Debug for RepositoryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryConfig")
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Upgrade run settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeSettings {
    /// Plugin document (default: "upgrade-plugins.xml").
    #[serde(default = "default_plugins")]
    pub plugins: PathBuf,

    /// Root of the CMS installation; file plugins never leave it.
    #[serde(default = "default_install_root")]
    pub install_root: PathBuf,

    /// Directory for per-module log files. No files are written when unset.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Compute everything, write nothing.
    #[serde(default)]
    pub dry_run: bool,

    /// Modules to run, in document order. Empty runs all of them.
    #[serde(default)]
    pub modules: Vec<String>,
}

impl Default for UpgradeSettings {
    fn default() -> Self {
        Self {
            plugins: default_plugins(),
            install_root: default_install_root(),
            log_dir: None,
            dry_run: false,
            modules: Vec::new(),
        }
    }
}

fn default_postgres() -> String {
    "postgres".to_string()
}

fn default_require() -> String {
    "require".to_string()
}

fn default_true_string() -> String {
    "true".to_string()
}

fn default_max_connections() -> usize {
    4
}

fn default_plugins() -> PathBuf {
    PathBuf::from("upgrade-plugins.xml")
}

fn default_install_root() -> PathBuf {
    PathBuf::from(".")
}
