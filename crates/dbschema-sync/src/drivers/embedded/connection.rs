//! Embedded (SQLite) session over `sqlx`.
//!
//! Foreign-key enforcement is switched off for the session so tables can be
//! rebuilt while other tables still reference them, and `legacy_alter_table`
//! keeps a rename from re-validating triggers and views that point at a table
//! being replaced.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Connection as _, Executor as _, Row as _, TypeInfo, ValueRef};
use tracing::{debug, info};

use crate::core::traits::Connection;
use crate::core::value::{Row, SqlValue};
use crate::dialect::DbType;
use crate::error::{MigrateError, Result};

/// One SQLite connection; writes run inside a transaction opened lazily and
/// closed by [`Connection::commit`] or [`Connection::rollback`].
pub struct EmbeddedConnection {
    conn: SqliteConnection,
    in_transaction: bool,
}

impl EmbeddedConnection {
    /// Open (creating if needed) the database at `path`; `:memory:` opens a
    /// private in-memory database.
    pub async fn open(path: &str) -> Result<Self> {
        let options = if path == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new().filename(path).create_if_missing(true)
        }
        .foreign_keys(false);

        let mut conn = SqliteConnection::connect_with(&options).await.map_err(|e| {
            MigrateError::connection(e.to_string(), format!("opening embedded database {}", path))
        })?;
        conn.execute(sqlx::raw_sql("pragma legacy_alter_table = on"))
            .await?;
        info!("Opened embedded database: {}", path);
        Ok(Self {
            conn,
            in_transaction: false,
        })
    }

    async fn begin_if_needed(&mut self) -> Result<()> {
        if !self.in_transaction {
            self.conn.execute(sqlx::raw_sql("begin")).await?;
            self.in_transaction = true;
        }
        Ok(())
    }
}

fn convert_row(row: &SqliteRow) -> Result<Row> {
    let mut values = Vec::with_capacity(row.len());
    for idx in 0..row.len() {
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            values.push(SqlValue::Null);
            continue;
        }
        let type_name = raw.type_info().name().to_ascii_uppercase();
        let value = match type_name.as_str() {
            "INTEGER" | "INT" | "BIGINT" | "BOOLEAN" => SqlValue::I64(row.try_get::<i64, _>(idx)?),
            "REAL" | "FLOAT" | "DOUBLE" => SqlValue::F64(row.try_get::<f64, _>(idx)?),
            "BLOB" => SqlValue::Bytes(row.try_get::<Vec<u8>, _>(idx)?),
            _ => SqlValue::Text(row.try_get::<String, _>(idx)?),
        };
        values.push(value);
    }
    Ok(Row::new(values))
}

#[async_trait]
impl Connection for EmbeddedConnection {
    fn db_type(&self) -> DbType {
        DbType::Embedded
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        debug!("{}", sql);
        self.begin_if_needed().await?;
        let result = self.conn.execute(sqlx::raw_sql(sql)).await?;
        Ok(result.rows_affected())
    }

    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        debug!("{}", sql);
        let mut query = sqlx::query(sql);
        for param in params {
            query = match param {
                SqlValue::Null => query.bind(None::<String>),
                SqlValue::Bool(v) => query.bind(*v),
                SqlValue::I64(v) => query.bind(*v),
                SqlValue::F64(v) => query.bind(*v),
                SqlValue::Text(v) => query.bind(v.clone()),
                SqlValue::Bytes(v) => query.bind(v.clone()),
            };
        }
        let rows = query.fetch_all(&mut self.conn).await?;
        rows.iter().map(convert_row).collect()
    }

    async fn commit(&mut self) -> Result<()> {
        if self.in_transaction {
            self.conn.execute(sqlx::raw_sql("commit")).await?;
            self.in_transaction = false;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if self.in_transaction {
            self.conn.execute(sqlx::raw_sql("rollback")).await?;
            self.in_transaction = false;
        }
        Ok(())
    }
}
