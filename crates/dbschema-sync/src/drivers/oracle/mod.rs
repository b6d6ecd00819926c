//! Oracle driver. Sessions go through the shared ODBC connection.

mod dialect;
mod reader;

pub use dialect::OracleDialect;
