//! ODBC session shared by the Oracle and Firebird drivers.
//!
//! Each statement opens a connection from the shared environment and closes it
//! before returning, so no ODBC handle ever lives across an `.await`. Sessions
//! run in auto-commit mode: Oracle commits DDL implicitly anyway, and Firebird
//! DDL must be committed before dependent objects can see it.

use std::sync::Arc;

use async_trait::async_trait;
use odbc_api::{buffers::TextRowSet, ConnectionOptions, Cursor, Environment, ResultSetMetadata};
use tracing::debug;

use crate::core::identifier::quote_literal;
use crate::core::traits::Connection;
use crate::core::value::{Row, SqlValue};
use crate::dialect::DbType;
use crate::error::{MigrateError, Result};

/// Rows fetched per round trip.
const FETCH_BATCH_SIZE: usize = 500;

/// Longest text value fetched from a catalog column.
const MAX_TEXT_LENGTH: usize = 32_768;

/// A connection factory bound to one ODBC connection string.
pub struct OdbcConnection {
    env: Arc<Environment>,
    connection_string: String,
    db_type: DbType,
}

impl OdbcConnection {
    /// Create the ODBC environment and verify the target is reachable.
    pub fn open(db_type: DbType, connection_string: &str) -> Result<Self> {
        let env = Environment::new().map_err(|e| {
            MigrateError::connection(
                format!(
                    "Failed to create ODBC environment: {}. Install the {} ODBC driver and \
                     register it with the driver manager.",
                    e, db_type
                ),
                "ODBC environment",
            )
        })?;
        let session = Self {
            env: Arc::new(env),
            connection_string: connection_string.to_string(),
            db_type,
        };
        // Fail fast on a bad connection string.
        session.connect()?;
        Ok(session)
    }

    fn connect(&self) -> Result<odbc_api::Connection<'_>> {
        self.env
            .connect_with_connection_string(&self.connection_string, ConnectionOptions::default())
            .map_err(|e| {
                MigrateError::connection(
                    format!("ODBC connection failed: {}", e),
                    format!("connecting to {}", self.db_type),
                )
            })
    }

    fn run(&self, sql: &str) -> Result<Vec<Row>> {
        debug!("{}", sql);
        let conn = self.connect()?;
        let mut rows = Vec::new();

        if let Some(mut cursor) = conn.execute(sql, ())? {
            let num_cols = cursor.num_result_cols()? as usize;
            let mut buffers = TextRowSet::for_cursor(FETCH_BATCH_SIZE, &mut cursor, Some(MAX_TEXT_LENGTH))?;
            let mut row_cursor = cursor.bind_buffer(&mut buffers)?;

            while let Some(batch) = row_cursor.fetch()? {
                for row_idx in 0..batch.num_rows() {
                    let values = (0..num_cols)
                        .map(|col_idx| match batch.at(col_idx, row_idx) {
                            Some(bytes) => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
                            None => SqlValue::Null,
                        })
                        .collect();
                    rows.push(Row::new(values));
                }
            }
        }
        Ok(rows)
    }
}

/// Inline positional `?` parameters as literals, skipping quoted text.
///
/// Catalog queries only bind names and small integers, so literal
/// substitution keeps the ODBC path free of driver-specific binding quirks.
pub fn inline_params(sql: &str, params: &[SqlValue]) -> Result<String> {
    let mut out = String::with_capacity(sql.len());
    let mut values = params.iter();
    let mut in_quote = false;
    for ch in sql.chars() {
        match ch {
            '\'' => {
                in_quote = !in_quote;
                out.push(ch);
            }
            '?' if !in_quote => {
                let value = values.next().ok_or_else(|| {
                    MigrateError::InvalidArgument(format!("missing parameter for: {}", sql))
                })?;
                out.push_str(&match value {
                    SqlValue::Null => "NULL".to_string(),
                    SqlValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
                    SqlValue::I64(v) => v.to_string(),
                    SqlValue::F64(v) => v.to_string(),
                    SqlValue::Text(s) => quote_literal(s),
                    SqlValue::Bytes(b) => format!("X'{}'", hex::encode_upper(b)),
                });
            }
            _ => out.push(ch),
        }
    }
    if values.next().is_some() {
        return Err(MigrateError::InvalidArgument(format!(
            "too many parameters for: {}",
            sql
        )));
    }
    Ok(out)
}

#[async_trait]
impl Connection for OdbcConnection {
    fn db_type(&self) -> DbType {
        self.db_type
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        self.run(sql)?;
        Ok(0)
    }

    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let sql = inline_params(sql, params)?;
        self.run(&sql)
    }

    async fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        Ok(())
    }
}
