//! Database driver implementations.
//!
//! Each driver module supplies one dialect family:
//!
//! - [`embedded`]: SQLite through `sqlx`
//! - [`postgres`]: PostgreSQL through `tokio-postgres`
//! - [`mssql`]: SQL Server through `tiberius`
//! - [`oracle`], [`firebird`]: ODBC through `odbc-api`
//! - [`common`]: shared utilities (TLS, the ODBC session)
//!
//! # Architecture
//!
//! A driver's dialect type implements both
//! [`Dialect`](crate::dialect::Dialect) (pure statement rendering) and
//! [`CatalogReader`] (introspection through a caller-owned connection).
//! [`DialectImpl`] is the closed set of those families; the adapter holds one
//! value of it instead of consulting any process-wide registry.
//!
//! # Adding New Databases
//!
//! 1. Create a new module under `drivers/`
//! 2. Implement `Dialect` and `CatalogReader` on the driver's dialect type
//! 3. Add a variant to [`DbType`] and to [`DialectImpl`]
//! 4. Teach [`connect`] how to open a session

pub mod common;
pub mod embedded;
pub mod firebird;
pub mod mssql;
pub mod oracle;
pub mod postgres;

pub use common::{OdbcConnection, SslMode, TlsBuilder};
pub use embedded::{EmbeddedConnection, EmbeddedDialect};
pub use firebird::FirebirdDialect;
pub use mssql::{MssqlConnection, MssqlDialect};
pub use oracle::OracleDialect;
pub use postgres::{PostgresConnection, PostgresDialect};

use std::time::Instant;

use serde::Serialize;
use tracing::info;

use crate::config::TargetConfig;
use crate::core::traits::{CatalogReader, Connection};
use crate::dialect::{DbType, Dialect};
use crate::error::{MigrateError, Result};
use crate::migrate::registry::GRAINS_TABLE;

/// Enum-based dispatch over the supported dialect families.
///
/// Matching on the variant replaces a registry keyed by database kind: the
/// set of dialects is closed and known at compile time.
#[derive(Debug, Clone)]
pub enum DialectImpl {
    Embedded(EmbeddedDialect),
    Postgres(PostgresDialect),
    Mssql(MssqlDialect),
    Oracle(OracleDialect),
    Firebird(FirebirdDialect),
}

impl DialectImpl {
    /// Dialect for `db_type`, with the registry kept in `sys_schema`.
    pub fn from_db_type(db_type: DbType, sys_schema: &str) -> Self {
        match db_type {
            DbType::Embedded => DialectImpl::Embedded(EmbeddedDialect::new(sys_schema)),
            DbType::Postgres => DialectImpl::Postgres(PostgresDialect::new(sys_schema)),
            DbType::Mssql => DialectImpl::Mssql(MssqlDialect::new()),
            DbType::Oracle => DialectImpl::Oracle(OracleDialect::new()),
            DbType::Firebird => DialectImpl::Firebird(FirebirdDialect::new()),
        }
    }

    /// Dialect for the configured target.
    pub fn from_config(config: &TargetConfig, sys_schema: &str) -> Result<Self> {
        Ok(Self::from_db_type(config.db_type()?, sys_schema))
    }

    pub fn db_type(&self) -> DbType {
        self.dialect().db_type()
    }

    /// Statement renderer.
    pub fn dialect(&self) -> &dyn Dialect {
        match self {
            DialectImpl::Embedded(d) => d,
            DialectImpl::Postgres(d) => d,
            DialectImpl::Mssql(d) => d,
            DialectImpl::Oracle(d) => d,
            DialectImpl::Firebird(d) => d,
        }
    }

    /// Catalog introspection.
    pub fn reader(&self) -> &dyn CatalogReader {
        match self {
            DialectImpl::Embedded(d) => d,
            DialectImpl::Postgres(d) => d,
            DialectImpl::Mssql(d) => d,
            DialectImpl::Oracle(d) => d,
            DialectImpl::Firebird(d) => d,
        }
    }
}

/// Open a session on the configured target.
pub async fn connect(config: &TargetConfig) -> Result<Box<dyn Connection>> {
    let db_type = config.db_type()?;
    info!("Connecting to {}", config.describe());
    let conn: Box<dyn Connection> = match db_type {
        DbType::Embedded => {
            let path = config.path.as_deref().ok_or_else(|| {
                MigrateError::Config("target.path is required for the embedded dialect".into())
            })?;
            Box::new(EmbeddedConnection::open(path).await?)
        }
        DbType::Postgres => Box::new(PostgresConnection::connect(config).await?),
        DbType::Mssql => Box::new(MssqlConnection::connect(config).await?),
        DbType::Oracle | DbType::Firebird => {
            let conn_str = config.connection_string.as_deref().ok_or_else(|| {
                MigrateError::Config(format!(
                    "target.connection_string is required for {}",
                    db_type
                ))
            })?;
            // Driver-manager calls block; keep them off the async workers.
            let conn_str = conn_str.to_string();
            let session = tokio::task::spawn_blocking(move || OdbcConnection::open(db_type, &conn_str))
                .await
                .map_err(|e| MigrateError::connection(e.to_string(), "opening ODBC session"))??;
            Box::new(session)
        }
    };
    Ok(conn)
}

/// Outcome of [`health_check`].
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub target: String,
    pub connected: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the grain registry is already initialized.
    pub registry_present: bool,
}

/// Open a session and run one catalog lookup against it.
pub async fn health_check(config: &TargetConfig, sys_schema: &str) -> HealthCheckResult {
    let start = Instant::now();
    let mut result = HealthCheckResult {
        target: config.describe(),
        connected: false,
        latency_ms: 0,
        error: None,
        registry_present: false,
    };
    let lookup = async {
        let dialect = DialectImpl::from_config(config, sys_schema)?;
        let mut conn = connect(config).await?;
        dialect
            .reader()
            .table_exists(conn.as_mut(), sys_schema, GRAINS_TABLE)
            .await
    };
    match lookup.await {
        Ok(present) => {
            result.connected = true;
            result.registry_present = present;
        }
        Err(e) => result.error = Some(e.to_string()),
    }
    result.latency_ms = start.elapsed().as_millis() as u64;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_impl_dispatch() {
        for db_type in DbType::ALL {
            let d = DialectImpl::from_db_type(db_type, "dbschema");
            assert_eq!(d.db_type(), db_type);
        }
        let oracle = DialectImpl::from_db_type(DbType::Oracle, "dbschema");
        assert!(!oracle.dialect().uses_schemas());
        assert_eq!(oracle.dialect().max_identifier_length(), 30);
        let pg = DialectImpl::from_db_type(DbType::Postgres, "dbschema");
        assert_eq!(pg.dialect().param_placeholder(2), "$2");
    }

    #[tokio::test]
    async fn test_connect_requires_path_for_embedded() {
        let config = TargetConfig {
            r#type: "embedded".into(),
            host: String::new(),
            port: None,
            database: String::new(),
            user: String::new(),
            password: String::new(),
            ssl_mode: "disable".into(),
            trust_server_cert: false,
            encrypt: true,
            connection_string: None,
            path: None,
        };
        assert!(matches!(connect(&config).await, Err(MigrateError::Config(_))));
    }

    #[tokio::test]
    async fn test_health_check_embedded() {
        let config = TargetConfig {
            r#type: "embedded".into(),
            host: String::new(),
            port: None,
            database: String::new(),
            user: String::new(),
            password: String::new(),
            ssl_mode: "disable".into(),
            trust_server_cert: false,
            encrypt: true,
            connection_string: None,
            path: Some(":memory:".into()),
        };
        let result = health_check(&config, "dbschema").await;
        assert!(result.connected, "{:?}", result.error);
        assert!(!result.registry_present);
    }
}
