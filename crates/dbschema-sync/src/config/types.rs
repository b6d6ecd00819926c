//! Configuration type definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dialect::DbType;
use crate::error::Result;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Target database the schema is applied to.
    pub target: TargetConfig,

    /// Authored schema source.
    pub schema: SchemaConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Target database configuration.
///
/// Network dialects use host/port/database/user/password; the ODBC dialects
/// (Oracle, Firebird) take a full `connection_string`; the embedded dialect
/// takes a file `path`.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database type: embedded, postgres, mssql, oracle, firebird.
    pub r#type: String,

    /// Database host.
    #[serde(default)]
    pub host: String,

    /// Database port (default: the dialect's well-known port).
    #[serde(default, skip_serializing_if = "Option::is_none")]
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

    /// PostgreSQL SSL mode (default: "disable").
    #[serde(default = "default_disable")]
    pub ssl_mode: String,

    /// SQL Server: trust the server certificate (default: false).
    #[serde(default)]
    pub trust_server_cert: bool,

    /// SQL Server: encrypt the connection (default: true).
    #[serde(default = "default_true")]
    pub encrypt: bool,

    /// Full ODBC connection string for Oracle and Firebird.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,

    /// Embedded database file, or ":memory:".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .field("trust_server_cert", &self.trust_server_cert)
            .field("encrypt", &self.encrypt)
            .field(
                "connection_string",
                &self.connection_string.as_ref().map(|_| "[REDACTED]"),
            )
            .field("path", &self.path)
            .finish()
    }
}

impl TargetConfig {
    /// Parsed database kind.
    pub fn db_type(&self) -> Result<DbType> {
        self.r#type.parse()
    }

    /// Configured port, or the dialect default.
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(match self.db_type() {
            Ok(DbType::Mssql) => 1433,
            Ok(DbType::Oracle) => 1521,
            Ok(DbType::Firebird) => 3050,
            _ => 5432,
        })
    }
}

/// Authored schema source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Path of the YAML schema document.
    pub path: String,
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Schema holding the grain registry and sequence counters (default: "dbschema").
    #[serde(default = "default_system_schema")]
    pub system_schema: String,

    /// Initialize the registry even when user tables already exist (default: false).
    #[serde(default)]
    pub force_initialize: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            system_schema: default_system_schema(),
            force_initialize: false,
        }
    }
}

fn default_disable() -> String {
    "disable".to_string()
}

fn default_true() -> bool {
    true
}

fn default_system_schema() -> String {
    "dbschema".to_string()
}
