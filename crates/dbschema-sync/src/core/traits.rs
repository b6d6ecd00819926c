//! Core traits at the database seam.
//!
//! - [`Connection`]: a caller-owned session able to run statements and queries
//! - [`CatalogReader`]: reads the live catalog into actual-state descriptors
//!
//! The statement renderers live behind [`Dialect`](crate::dialect::Dialect).
//! Together the three form one driver family per database kind, selected
//! through [`DialectImpl`](crate::drivers::DialectImpl).
//!
//! # Design Patterns
//!
//! - **Strategy**: each driver family supplies interchangeable catalog queries
//! - **Template Method**: default methods compose the per-dialect primitives

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use crate::core::meta::{DbColumnInfo, DbFkInfo, DbIndexInfo, DbPkInfo, DbSequenceInfo};
use crate::core::value::{Row, SqlValue};
use crate::dialect::DbType;
use crate::error::Result;

/// A session on the target database.
///
/// The engine never pools or shares connections: every adapter call borrows
/// the caller's connection mutably for its duration. Statements are executed
/// in emission order; `commit` ends the implicit transaction opened by the
/// first statement (drivers running in auto-commit mode treat it as a no-op).
#[async_trait]
pub trait Connection: Send {
    /// Database kind on the other end.
    fn db_type(&self) -> DbType;

    /// Execute one statement that returns no rows.
    async fn execute(&mut self, sql: &str) -> Result<u64>;

    /// Run a query with positional parameters.
    ///
    /// Placeholders follow [`Dialect::param_placeholder`](crate::dialect::Dialect::param_placeholder).
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>>;

    /// Commit the current transaction.
    async fn commit(&mut self) -> Result<()>;

    /// Roll back the current transaction.
    async fn rollback(&mut self) -> Result<()>;

    /// First column of the first row as an integer.
    async fn query_i64(&mut self, sql: &str, params: &[SqlValue]) -> Result<Option<i64>> {
        let rows = self.query(sql, params).await?;
        Ok(rows.first().and_then(|r| r.get_i64(0)))
    }

    /// Whether the query returns at least one row.
    async fn query_exists(&mut self, sql: &str, params: &[SqlValue]) -> Result<bool> {
        Ok(!self.query(sql, params).await?.is_empty())
    }
}

/// Catalog introspection for one dialect.
///
/// All methods treat an absent object as a normal answer (`false`, `None`,
/// empty collection); only a failing catalog query is an error.
#[async_trait]
pub trait CatalogReader: Send + Sync {
    /// Whether the grain's schema namespace exists.
    async fn schema_exists(&self, conn: &mut dyn Connection, schema: &str) -> Result<bool>;

    async fn table_exists(&self, conn: &mut dyn Connection, schema: &str, table: &str)
        -> Result<bool>;

    /// Whether any user table exists outside the system schema.
    async fn user_tables_exist(&self, conn: &mut dyn Connection, sys_schema: &str) -> Result<bool>;

    /// Tables stored in the grain's namespace.
    async fn table_list(&self, conn: &mut dyn Connection, schema: &str) -> Result<Vec<String>>;

    /// Column names of a table, in catalog order.
    async fn column_names(
        &self,
        conn: &mut dyn Connection,
        schema: &str,
        table: &str,
    ) -> Result<Vec<String>>;

    /// Column descriptor with its default normalized to canonical form.
    async fn column_info(
        &self,
        conn: &mut dyn Connection,
        schema: &str,
        table: &str,
        column: &str,
    ) -> Result<Option<DbColumnInfo>>;

    /// Primary key (empty when the table has none).
    async fn pk_info(&self, conn: &mut dyn Connection, schema: &str, table: &str)
        -> Result<DbPkInfo>;

    /// Foreign keys of every table in the grain, grouped by constraint name.
    async fn fk_info(&self, conn: &mut dyn Connection, schema: &str) -> Result<Vec<DbFkInfo>>;

    /// Indices of the grain keyed by name; foreign indices carry the sentinel marker.
    async fn indices(
        &self,
        conn: &mut dyn Connection,
        schema: &str,
    ) -> Result<BTreeMap<String, DbIndexInfo>>;

    /// Trigger names defined on a table.
    async fn trigger_names(
        &self,
        conn: &mut dyn Connection,
        schema: &str,
        table: &str,
    ) -> Result<BTreeSet<String>>;

    /// Source text of a trigger (or of its function body where the dialect splits them).
    async fn trigger_body(
        &self,
        conn: &mut dyn Connection,
        schema: &str,
        table: &str,
        trigger: &str,
    ) -> Result<Option<String>>;

    async fn sequence_exists(&self, conn: &mut dyn Connection, schema: &str, name: &str)
        -> Result<bool>;

    async fn sequence_info(
        &self,
        conn: &mut dyn Connection,
        schema: &str,
        name: &str,
    ) -> Result<Option<DbSequenceInfo>>;

    /// Advance a sequence and return the new value.
    async fn next_sequence_value(
        &self,
        conn: &mut dyn Connection,
        schema: &str,
        name: &str,
    ) -> Result<i64>;

    /// Plain views of the grain.
    async fn view_list(&self, conn: &mut dyn Connection, schema: &str) -> Result<Vec<String>>;

    /// Parameterized views (table-valued functions, procedures) of the grain.
    async fn parameterized_view_list(
        &self,
        conn: &mut dyn Connection,
        schema: &str,
    ) -> Result<Vec<String>>;

    /// Template method over [`CatalogReader::trigger_names`].
    async fn trigger_exists(
        &self,
        conn: &mut dyn Connection,
        schema: &str,
        table: &str,
        trigger: &str,
    ) -> Result<bool> {
        Ok(self.trigger_names(conn, schema, table).await?.contains(trigger))
    }
}
