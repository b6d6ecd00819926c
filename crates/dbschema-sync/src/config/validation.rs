//! Configuration validation.

use super::Config;
use crate::core::identifier::validate_identifier;
use crate::dialect::DbType;
use crate::drivers::common::SslMode;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    let target = &config.target;
    let db_type = target.db_type()?;

    match db_type {
        DbType::Postgres | DbType::Mssql => {
            if target.host.is_empty() {
                return Err(MigrateError::Config("target.host is required".into()));
            }
            if target.database.is_empty() {
                return Err(MigrateError::Config("target.database is required".into()));
            }
            if target.user.is_empty() {
                return Err(MigrateError::Config("target.user is required".into()));
            }
        }
        DbType::Oracle | DbType::Firebird => {
            if target.connection_string.as_deref().map_or(true, str::is_empty) {
                return Err(MigrateError::Config(format!(
                    "target.connection_string is required for {}",
                    db_type
                )));
            }
        }
        DbType::Embedded => {
            if target.path.as_deref().map_or(true, str::is_empty) {
                return Err(MigrateError::Config(
                    "target.path is required for embedded".into(),
                ));
            }
        }
    }

    if db_type == DbType::Postgres {
        SslMode::parse(&target.ssl_mode)?;
    }

    if config.schema.path.trim().is_empty() {
        return Err(MigrateError::Config("schema.path is required".into()));
    }

    validate_identifier(&config.migration.system_schema).map_err(|e| {
        MigrateError::Config(format!("migration.system_schema is invalid: {}", e))
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MigrationConfig, SchemaConfig, TargetConfig};

    fn valid_config() -> Config {
        Config {
            target: TargetConfig {
                r#type: "postgres".to_string(),
                host: "localhost".to_string(),
                port: Some(5432),
                database: "app".to_string(),
                user: "postgres".to_string(),
                password: "password".to_string(),
                ssl_mode: "disable".to_string(),
                trust_server_cert: false,
                encrypt: true,
                connection_string: None,
                path: None,
            },
            schema: SchemaConfig {
                path: "schema.yaml".to_string(),
            },
            migration: MigrationConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = valid_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_missing_host() {
        let mut config = valid_config();
        config.target.host = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_unknown_type() {
        let mut config = valid_config();
        config.target.r#type = "mysql".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_bad_ssl_mode() {
        let mut config = valid_config();
        config.target.ssl_mode = "sometimes".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_odbc_requires_connection_string() {
        let mut config = valid_config();
        config.target.r#type = "oracle".to_string();
        assert!(validate(&config).is_err());
        config.target.connection_string = Some("DSN=ora".to_string());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_embedded_requires_path() {
        let mut config = valid_config();
        config.target.r#type = "sqlite".to_string();
        assert!(validate(&config).is_err());
        config.target.path = Some(":memory:".to_string());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_invalid_system_schema() {
        let mut config = valid_config();
        config.migration.system_schema = "1bad".to_string();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("system_schema"));
    }

    #[test]
    fn test_target_config_debug_redacts_password() {
        let mut config = valid_config();
        config.target.password = "super_secret_password_456".to_string();
        let debug_output = format!("{:?}", config.target);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_password_456"),
            "Debug output should not contain actual password value"
        );
    }

    #[test]
    fn test_from_yaml_defaults() {
        let yaml = r#"
target:
  type: embedded
  path: ":memory:"
schema:
  path: schema.yaml
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.migration.system_schema, "dbschema");
        assert!(!config.migration.force_initialize);
        assert_eq!(config.target.db_type().unwrap(), DbType::Embedded);
        assert_eq!(config.hash().len(), 64);
    }
}
