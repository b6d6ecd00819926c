//! dbschema-sync CLI - declarative schema migration across relational databases.

mod wizard;

use clap::{Parser, Subcommand};
use dbschema_sync::{
    connect, health_check, Adapter, Config, DialectImpl, MigrateError, Migrator, Score,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "dbschema-sync")]
#[command(about = "Declarative schema migration across relational databases")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the target database in line with the schema document
    Migrate {
        /// Initialize the registry even if the database already holds tables
        #[arg(long)]
        force_initialize: bool,
    },

    /// Show what migrate would change without touching the database
    Plan,

    /// Parse and validate the schema document for the configured dialect
    ValidateSchema,

    /// Test the database connection
    HealthCheck,

    /// Create or edit a configuration file interactively
    Init {
        /// Output path for configuration file [default: config.yaml]
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Force overwrite existing file without confirmation
        #[arg(long, short)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    // Init doesn't need an existing config
    if let Commands::Init { output, force } = cli.command {
        // No logging setup for wizard - keeps terminal clean for interactive prompts
        let output_path = output.unwrap_or_else(|| PathBuf::from("config.yaml"));
        wizard::run_wizard(&output_path, force)
            .await
            .map_err(|e| MigrateError::Config(e.to_string()))?;
        return Ok(());
    }

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?} (hash {})", cli.config, &config.hash()[..12]);

    match cli.command {
        Commands::Init { .. } => unreachable!(), // Handled above

        Commands::HealthCheck => {
            let result = health_check(&config.target, &config.migration.system_schema).await;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  {}: {} ({}ms)",
                    result.target,
                    if result.connected { "OK" } else { "FAILED" },
                    result.latency_ms
                );
                if let Some(ref err) = result.error {
                    println!("    Error: {}", err);
                }
                if result.connected {
                    println!(
                        "  Registry: {}",
                        if result.registry_present { "initialized" } else { "absent" }
                    );
                }
            }
            if !result.connected {
                return Err(MigrateError::connection(
                    result.error.unwrap_or_default(),
                    "health check",
                ));
            }
        }

        Commands::ValidateSchema => {
            let migrator = build_migrator(&config)?;
            let score = migrator.score();
            let tables: usize = score.grains.iter().map(|g| g.tables.len()).sum();
            if cli.output_json {
                let summary = serde_json::json!({
                    "valid": true,
                    "dialect": migrator.adapter().db_type().as_str(),
                    "grains": score.grains.iter().map(|g| &g.name).collect::<Vec<_>>(),
                    "tables": tables,
                });
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "Schema is valid for {}: {} grain(s), {} table(s)",
                    migrator.adapter().db_type(),
                    score.grains.len(),
                    tables
                );
            }
        }

        Commands::Plan => {
            let migrator = build_migrator(&config)?;
            let mut conn = connect(&config.target).await?;
            let plan = migrator.plan(conn.as_mut()).await?;
            if cli.output_json {
                println!("{}", plan.to_json()?);
            } else if plan.is_noop() {
                println!("Database is up to date.");
            } else {
                print!("{}", plan);
                println!("\n{} change(s) pending", plan.changes().count());
            }
        }

        Commands::Migrate { force_initialize } => {
            if force_initialize {
                config.migration.force_initialize = true;
            }
            let migrator = build_migrator(&config)?;
            let mut conn = connect(&config.target).await?;
            let report = migrator.migrate(conn.as_mut()).await?;
            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                println!("\nMigration completed!");
                println!("  Run ID: {}", report.run_id);
                println!("  Duration: {:.2}s", report.duration_seconds);
                println!("  Grains upgraded: {}", report.grains_applied.len());
                println!("  Grains skipped: {}", report.grains_skipped.len());
                println!("  Changes applied: {}", report.plan.changes().count());
            }
        }
    }

    Ok(())
}

fn build_migrator(config: &Config) -> Result<Migrator, MigrateError> {
    let score = Score::load(&config.schema.path)?;
    let dialect = DialectImpl::from_config(&config.target, &config.migration.system_schema)?;
    Migrator::new(Adapter::new(dialect), score, config.migration.clone())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
