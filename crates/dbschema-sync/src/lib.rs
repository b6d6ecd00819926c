//! # dbschema-sync
//!
//! Declarative schema migration across relational databases.
//!
//! The desired state of a database is authored as a *score*: a set of named
//! *grains*, each holding tables, sequences, views, parameterized views and
//! materialized views. This library compares that state with what a live
//! database reports through its catalog and applies the difference, with:
//!
//! - **Five dialects**: embedded (SQLite), PostgreSQL, SQL Server, Oracle and Firebird
//! - **Idempotent runs** tracked by a grain registry in a system schema
//! - **Optimistic locking** via `recversion` columns maintained by triggers
//! - **Materialized views** kept current by generated triggers
//! - **Dry-run plans** that report every decision without writing
//!
//! ## Example
//!
//! ```rust,no_run
//! use dbschema_sync::{connect, Adapter, Config, DialectImpl, Migrator, Score};
//!
//! #[tokio::main]
//! async fn main() -> dbschema_sync::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let score = Score::load(&config.schema.path)?;
//!     let dialect = DialectImpl::from_config(&config.target, &config.migration.system_schema)?;
//!     let migrator = Migrator::new(Adapter::new(dialect), score, config.migration.clone())?;
//!
//!     let mut conn = connect(&config.target).await?;
//!     let report = migrator.migrate(conn.as_mut()).await?;
//!     println!("Upgraded {} grain(s)", report.grains_applied.len());
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod config;
pub mod core;
pub mod dialect;
pub mod drivers;
pub mod error;
pub mod migrate;

// Re-exports for convenient access
pub use adapter::Adapter;
pub use config::{Config, MigrationConfig, SchemaConfig, TargetConfig};
pub use core::{CatalogReader, Connection, Score};
pub use dialect::{DbType, Dialect};
pub use drivers::{connect, health_check, DialectImpl, HealthCheckResult};
pub use error::{MigrateError, Result};
pub use migrate::{Decision, MigrationReport, Migrator, Plan};
