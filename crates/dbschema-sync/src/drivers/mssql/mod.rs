//! SQL Server driver.

mod connection;
mod dialect;
mod reader;

pub use connection::MssqlConnection;
pub use dialect::{MssqlDialect, IDENTITY_DEFAULT};
