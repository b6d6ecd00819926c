//! Embedded (SQLite) driver.
//!
//! - [`EmbeddedDialect`]: statement renderer and catalog reader
//! - [`EmbeddedConnection`]: `sqlx` session

mod connection;
mod dialect;
mod reader;

pub use connection::EmbeddedConnection;
pub use dialect::EmbeddedDialect;
