//! Error types for the schema adapter and migration engine.

use thiserror::Error;

/// Main error type for adapter and migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The authored schema is invalid (unknown column kind, malformed default, dangling reference)
    #[error("Schema error: {0}")]
    Schema(String),

    /// Catalog query failed while introspecting one object
    #[error("Introspection of {object} failed: {source}")]
    Introspection {
        object: String,
        #[source]
        source: Box<MigrateError>,
    },

    /// A corrective DDL batch failed for one object
    #[error("DDL for {object} failed: {source}")]
    Ddl {
        object: String,
        #[source]
        source: Box<MigrateError>,
    },

    /// A trigger body cannot be expressed in the target dialect
    #[error("Cannot generate trigger for {object}: {message}")]
    TriggerGeneration { object: String, message: String },

    /// Invalid argument passed to a statement builder
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Connection could not be established
    #[error("Connection error: {message}\n  Context: {context}")]
    Connection { message: String, context: String },

    /// Grain registry is in a state that forbids the run
    #[error("Registry error: {0}")]
    Registry(String),

    /// The migration run did not complete
    #[error("Migration failed: {0}")]
    Migration(String),

    /// PostgreSQL driver error
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// SQL Server driver error
    #[error("SQL Server error: {0}")]
    Mssql(#[from] tiberius::error::Error),

    /// Embedded engine (SQLite) driver error
    #[error("Embedded database error: {0}")]
    Embedded(#[from] sqlx::Error),

    /// ODBC driver error (Oracle, Firebird)
    #[error("ODBC error: {0}")]
    Odbc(#[from] odbc_api::Error),

    /// TLS configuration error
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrateError {
    /// Create a Connection error with context about where it occurred
    pub fn connection(message: impl Into<String>, context: impl Into<String>) -> Self {
        MigrateError::Connection {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Attach the identity of the object being introspected.
    pub fn introspection(object: impl Into<String>, source: MigrateError) -> Self {
        MigrateError::Introspection {
            object: object.into(),
            source: Box::new(source),
        }
    }

    /// Attach the identity of the object whose DDL batch failed.
    pub fn ddl(object: impl Into<String>, source: MigrateError) -> Self {
        MigrateError::Ddl {
            object: object.into(),
            source: Box::new(source),
        }
    }

    /// Create a TriggerGeneration error
    pub fn trigger(object: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::TriggerGeneration {
            object: object.into(),
            message: message.into(),
        }
    }

    /// Process exit code for this error class.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_)
            | MigrateError::Schema(_)
            | MigrateError::Yaml(_)
            | MigrateError::Json(_) => 1,
            MigrateError::Connection { .. }
            | MigrateError::Postgres(_)
            | MigrateError::Mssql(_)
            | MigrateError::Embedded(_)
            | MigrateError::Odbc(_)
            | MigrateError::Tls(_) => 2,
            MigrateError::Introspection { .. } => 3,
            MigrateError::Ddl { .. } | MigrateError::TriggerGeneration { .. } => 4,
            MigrateError::Registry(_) | MigrateError::Migration(_) => 5,
            MigrateError::InvalidArgument(_) => 6,
            MigrateError::Io(_) => 7,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for adapter and migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(MigrateError::Config("x".into()).exit_code(), 1);
        assert_eq!(MigrateError::Schema("x".into()).exit_code(), 1);
        assert_eq!(
            MigrateError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone")).exit_code(),
            7
        );
        let wrapped = MigrateError::ddl("shop.orders", MigrateError::InvalidArgument("x".into()));
        assert_eq!(wrapped.exit_code(), 4);
    }

    #[test]
    fn test_format_detailed_walks_chain() {
        let err = MigrateError::introspection(
            "shop.orders.title",
            MigrateError::Registry("catalog unavailable".into()),
        );
        let text = err.format_detailed();
        assert!(text.starts_with("Error: Introspection of shop.orders.title failed"));
        assert!(text.contains("Caused by:\n  1: Registry error: catalog unavailable"));
    }
}
