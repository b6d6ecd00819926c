//! Interactive configuration wizard for creating/editing config files.

use dbschema_sync::dialect::DbType;
use dbschema_sync::{health_check, Config, MigrationConfig, SchemaConfig, TargetConfig};
use dialoguer::{Confirm, Input, Password, Select};
use std::path::Path;

/// Result type for wizard operations.
pub type WizardResult<T> = Result<T, WizardError>;

/// Errors that can occur during wizard execution.
#[derive(Debug)]
pub enum WizardError {
    /// User cancelled the wizard.
    Cancelled,
    /// IO error (file read/write).
    Io(std::io::Error),
    /// Config serialization error.
    Config(String),
    /// Validation error.
    Validation(String),
}

impl std::fmt::Display for WizardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => write!(f, "Configuration cancelled"),
            Self::Io(e) => write!(f, "IO error: {}", e),
            Self::Config(msg) => write!(f, "Config error: {}", msg),
            Self::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for WizardError {}

impl From<std::io::Error> for WizardError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<dialoguer::Error> for WizardError {
    fn from(e: dialoguer::Error) -> Self {
        Self::Io(std::io::Error::other(e.to_string()))
    }
}

/// Action to take when config file already exists.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ExistingFileAction {
    Edit,
    Overwrite,
    Abort,
}

/// Run the configuration wizard.
pub async fn run_wizard(output: &Path, force: bool) -> WizardResult<()> {
    println!();
    println!("dbschema-sync - Configuration Wizard");
    println!("====================================");
    println!();

    let existing_config = if output.exists() && !force {
        match prompt_existing_file_action(output)? {
            ExistingFileAction::Edit => {
                println!("Loading existing configuration...");
                match Config::load(output) {
                    Ok(config) => Some(config),
                    Err(e) => {
                        println!("Warning: Could not parse existing file: {}", e);
                        println!("Starting with fresh configuration.\n");
                        None
                    }
                }
            }
            ExistingFileAction::Overwrite => {
                println!("Starting with fresh configuration.\n");
                None
            }
            ExistingFileAction::Abort => return Err(WizardError::Cancelled),
        }
    } else {
        None
    };

    let target = prompt_target_config(existing_config.as_ref().map(|c| &c.target))?;
    let schema = prompt_schema_config(existing_config.as_ref().map(|c| &c.schema))?;
    let migration = prompt_migration_config(existing_config.as_ref().map(|c| &c.migration))?;

    let config = Config {
        target,
        schema,
        migration,
    };

    if let Err(e) = config.validate() {
        return Err(WizardError::Validation(e.to_string()));
    }

    print_summary(&config);

    if prompt_connection_test()? {
        test_connection(&config).await;
    }

    if !prompt_save_confirm(output)? {
        return Err(WizardError::Cancelled);
    }

    write_config(&config, output)?;

    println!("\nConfiguration saved to {}", output.display());
    println!("Run 'dbschema-sync plan' to preview the changes.");

    Ok(())
}

fn prompt_existing_file_action(path: &Path) -> WizardResult<ExistingFileAction> {
    println!("File already exists: {}\n", path.display());

    let options = &["Edit existing configuration", "Overwrite with new", "Abort"];
    let selection = Select::new()
        .with_prompt("What would you like to do?")
        .items(options)
        .default(0)
        .interact()?;

    Ok(match selection {
        0 => ExistingFileAction::Edit,
        1 => ExistingFileAction::Overwrite,
        _ => ExistingFileAction::Abort,
    })
}

fn prompt_target_config(existing: Option<&TargetConfig>) -> WizardResult<TargetConfig> {
    println!("Target Database");
    println!("---------------");

    let kinds: Vec<&str> = DbType::ALL.iter().map(|t| t.as_str()).collect();
    let default_idx = existing
        .and_then(|c| kinds.iter().position(|k| k.eq_ignore_ascii_case(&c.r#type)))
        .unwrap_or(0);
    let kind_idx = Select::new()
        .with_prompt("  Database type")
        .items(&kinds)
        .default(default_idx)
        .interact()?;
    let db_type = DbType::ALL[kind_idx];

    let mut config = TargetConfig {
        r#type: db_type.as_str().to_string(),
        host: String::new(),
        port: None,
        database: String::new(),
        user: String::new(),
        password: String::new(),
        ssl_mode: existing
            .map(|c| c.ssl_mode.clone())
            .unwrap_or_else(|| "disable".to_string()),
        trust_server_cert: existing.map(|c| c.trust_server_cert).unwrap_or(false),
        encrypt: existing.map(|c| c.encrypt).unwrap_or(true),
        connection_string: None,
        path: None,
    };

    match db_type {
        DbType::Embedded => {
            let path: String = Input::new()
                .with_prompt("  Database file (or :memory:)")
                .default(
                    existing
                        .and_then(|c| c.path.clone())
                        .unwrap_or_else(|| "schema.db".to_string()),
                )
                .interact_text()?;
            config.path = Some(path);
        }
        DbType::Oracle | DbType::Firebird => {
            let conn_str: String = Input::new()
                .with_prompt("  ODBC connection string")
                .default(
                    existing
                        .and_then(|c| c.connection_string.clone())
                        .unwrap_or_default(),
                )
                .interact_text()?;
            config.connection_string = Some(conn_str);
        }
        DbType::Postgres | DbType::Mssql => {
            config.host = Input::new()
                .with_prompt("  Host")
                .default(
                    existing
                        .map(|c| c.host.clone())
                        .unwrap_or_else(|| "localhost".to_string()),
                )
                .interact_text()?;

            let default_port = if db_type == DbType::Mssql { 1433 } else { 5432 };
            let port: u16 = Input::new()
                .with_prompt("  Port")
                .default(existing.and_then(|c| c.port).unwrap_or(default_port))
                .interact_text()?;
            config.port = Some(port);

            config.database = Input::new()
                .with_prompt("  Database")
                .default(existing.map(|c| c.database.clone()).unwrap_or_default())
                .interact_text()?;

            config.user = Input::new()
                .with_prompt("  User")
                .default(existing.map(|c| c.user.clone()).unwrap_or_default())
                .interact_text()?;

            let password = prompt_password("  Password", existing.is_some())?;
            config.password = if password.is_empty() {
                existing.map(|e| e.password.clone()).unwrap_or(password)
            } else {
                password
            };

            if db_type == DbType::Postgres {
                let ssl_modes = &["disable", "require", "verify-ca", "verify-full"];
                let default_idx = ssl_modes
                    .iter()
                    .position(|&m| m == config.ssl_mode)
                    .unwrap_or(0);
                let ssl_mode_idx = Select::new()
                    .with_prompt("  SSL Mode")
                    .items(ssl_modes)
                    .default(default_idx)
                    .interact()?;
                config.ssl_mode = ssl_modes[ssl_mode_idx].to_string();
            } else {
                config.encrypt = Confirm::new()
                    .with_prompt("  Encrypt connection")
                    .default(config.encrypt)
                    .interact()?;
                config.trust_server_cert = Confirm::new()
                    .with_prompt("  Trust server certificate")
                    .default(config.trust_server_cert)
                    .interact()?;
            }
        }
    }

    println!();
    Ok(config)
}

fn prompt_schema_config(existing: Option<&SchemaConfig>) -> WizardResult<SchemaConfig> {
    let path: String = Input::new()
        .with_prompt("Schema document")
        .default(
            existing
                .map(|c| c.path.clone())
                .unwrap_or_else(|| "schema.yaml".to_string()),
        )
        .interact_text()?;
    Ok(SchemaConfig { path })
}

fn prompt_migration_config(existing: Option<&MigrationConfig>) -> WizardResult<MigrationConfig> {
    println!("Migration Settings");
    println!("------------------");

    let mut config = existing.cloned().unwrap_or_default();
    config.system_schema = Input::new()
        .with_prompt("  System schema")
        .default(config.system_schema.clone())
        .interact_text()?;
    config.force_initialize = Confirm::new()
        .with_prompt("  Initialize even if the database already holds tables")
        .default(config.force_initialize)
        .interact()?;

    println!();
    Ok(config)
}

fn prompt_password(prompt: &str, has_existing: bool) -> WizardResult<String> {
    if has_existing {
        let input: String = Password::new()
            .with_prompt(format!("{} (blank to keep existing)", prompt))
            .allow_empty_password(true)
            .interact()?;
        Ok(input)
    } else {
        let input: String = Password::new().with_prompt(prompt).interact()?;
        Ok(input)
    }
}

fn print_summary(config: &Config) {
    println!("Configuration Summary");
    println!("---------------------");
    println!("  Target: {}", config.target.describe());
    println!("  Schema: {}", config.schema.path);
    println!("  System schema: {}", config.migration.system_schema);
    if config.migration.force_initialize {
        println!("  Force initialize: yes");
    }
    println!();
}

fn prompt_connection_test() -> WizardResult<bool> {
    Ok(Confirm::new()
        .with_prompt("Test database connection?")
        .default(false)
        .interact()?)
}

async fn test_connection(config: &Config) {
    use std::time::Duration;
    use tokio::time::timeout;

    println!("\nTesting connection...");

    let check = health_check(&config.target, &config.migration.system_schema);
    match timeout(Duration::from_secs(30), check).await {
        Ok(health) => {
            println!(
                "  {}: {} ({}ms)",
                health.target,
                if health.connected { "OK" } else { "FAILED" },
                health.latency_ms
            );
            if let Some(ref err) = health.error {
                println!("    Error: {}", err);
            }
        }
        Err(_) => println!("  Connection timed out after 30 seconds"),
    }
    println!();
}

fn prompt_save_confirm(path: &Path) -> WizardResult<bool> {
    Ok(Confirm::new()
        .with_prompt(format!("Save to {}?", path.display()))
        .default(true)
        .interact()?)
}

fn write_config(config: &Config, path: &Path) -> WizardResult<()> {
    let header = r#"# dbschema-sync configuration
# Generated by dbschema-sync init

"#;

    let yaml = serde_yaml::to_string(config).map_err(|e| WizardError::Config(e.to_string()))?;

    std::fs::write(path, format!("{}{}", header, yaml))?;

    Ok(())
}
