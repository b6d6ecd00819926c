//! Utilities shared across database drivers.
//!
//! - [`tls`]: rustls setup for PostgreSQL sessions
//! - [`odbc`]: connection-per-statement ODBC session for Oracle and Firebird

pub mod odbc;
pub mod tls;

pub use odbc::OdbcConnection;
pub use tls::{SslMode, TlsBuilder};
