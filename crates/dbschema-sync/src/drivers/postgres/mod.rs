//! PostgreSQL driver: renderer, catalog reader and session.

mod connection;
mod dialect;
mod reader;

pub use connection::PostgresConnection;
pub use dialect::{PostgresDialect, VERSION_TRIGGER_NAME};
