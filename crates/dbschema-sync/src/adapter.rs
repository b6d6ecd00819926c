//! Adapter facade.
//!
//! [`Adapter`] is the single entry point used by the migration engine and by
//! record-access code. It owns the selected [`DialectImpl`] and runs every DDL
//! batch against a caller-supplied [`Connection`]:
//!
//! - statements of one batch run in emission order
//! - the batch is committed as soon as the last statement succeeds
//! - any failure rolls the batch back and surfaces as [`MigrateError::Ddl`]
//!   naming the object
//!
//! Query building is pure and never touches a connection.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::core::meta::{DbColumnInfo, DbFkInfo, DbIndexInfo, DbPkInfo, DbSequenceInfo};
use crate::core::schema::{
    Column, ForeignKey, Index, MaterializedView, ParameterizedView, Sequence, Table, View,
};
use crate::core::traits::{CatalogReader, Connection};
use crate::dialect::query::FromClause;
use crate::dialect::{DbType, Dialect};
use crate::drivers::DialectImpl;
use crate::error::{MigrateError, Result};

/// Dialect-dispatching facade over DDL, queries and introspection.
#[derive(Debug, Clone)]
pub struct Adapter {
    dialect: DialectImpl,
}

impl Adapter {
    pub fn new(dialect: DialectImpl) -> Self {
        Self { dialect }
    }

    /// Adapter for `db_type` with the registry in `sys_schema`.
    pub fn for_db_type(db_type: DbType, sys_schema: &str) -> Self {
        Self::new(DialectImpl::from_db_type(db_type, sys_schema))
    }

    pub fn db_type(&self) -> DbType {
        self.dialect.db_type()
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.dialect()
    }

    pub fn reader(&self) -> &dyn CatalogReader {
        self.dialect.reader()
    }

    /// Run `batch` for `object`, committing on success and rolling back on failure.
    pub async fn apply(
        &self,
        conn: &mut dyn Connection,
        object: &str,
        batch: &[String],
    ) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        debug!("{}: applying {} statement(s)", object, batch.len());
        for sql in batch {
            if let Err(e) = conn.execute(sql).await {
                rollback_quietly(conn).await;
                return Err(MigrateError::ddl(object, e));
            }
        }
        conn.commit().await.map_err(|e| MigrateError::ddl(object, e))
    }

    // =========================================================================
    // Tables and columns
    // =========================================================================

    /// Create a table together with its identity wiring and versioning trigger.
    pub async fn create_table(&self, conn: &mut dyn Connection, table: &Table) -> Result<()> {
        let batch = self.create_table_batch(conn, table).await?;
        info!("Creating table {}", table.qualified_name());
        self.apply(conn, &table.qualified_name(), &batch).await
    }

    /// Statements [`Adapter::create_table`] would run.
    pub async fn create_table_batch(
        &self,
        conn: &mut dyn Connection,
        table: &Table,
    ) -> Result<Vec<String>> {
        let d = self.dialect();
        let seq_exists = if table.columns.iter().any(|c| c.identity) {
            self.sequence_exists(conn, &table.schema, &table.identity_sequence_name())
                .await?
        } else {
            false
        };
        let mut batch = d.create_table(table);
        batch.extend(d.auto_increment(table, seq_exists));
        if table.versioned {
            batch.extend(d.create_versioning_trigger(table));
        }
        Ok(batch)
    }

    pub async fn drop_table(&self, conn: &mut dyn Connection, schema: &str, name: &str) -> Result<()> {
        let object = format!("{}.{}", schema, name);
        self.apply(conn, &object, &self.dialect().drop_table(schema, name))
            .await
    }

    /// Add `col`; `current` lists the stored columns.
    pub async fn create_column(
        &self,
        conn: &mut dyn Connection,
        table: &Table,
        col: &Column,
        current: &[String],
    ) -> Result<()> {
        let batch = self.dialect().create_column(table, col, current);
        self.apply(conn, &column_object(table, col), &batch).await
    }

    /// Turn the stored column described by `actual` into `col`.
    pub async fn update_column(
        &self,
        conn: &mut dyn Connection,
        table: &Table,
        col: &Column,
        actual: &DbColumnInfo,
        current: &[String],
    ) -> Result<()> {
        let object = column_object(table, col);
        let batch = self
            .dialect()
            .update_column(table, col, actual, current)
            .map_err(|e| MigrateError::ddl(&object, e))?;
        self.apply(conn, &object, &batch).await
    }

    // =========================================================================
    // Keys and indices
    // =========================================================================

    pub async fn create_primary_key(
        &self,
        conn: &mut dyn Connection,
        table: &Table,
        current: &[String],
    ) -> Result<()> {
        let object = format!("{}.{}", table.schema, self.dialect().pk_name(table));
        self.apply(conn, &object, &self.dialect().create_pk(table, current))
            .await
    }

    pub async fn drop_primary_key(
        &self,
        conn: &mut dyn Connection,
        table: &Table,
        pk_name: &str,
        current: &[String],
    ) -> Result<()> {
        let object = format!("{}.{}", table.schema, pk_name);
        self.apply(conn, &object, &self.dialect().drop_pk(table, pk_name, current))
            .await
    }

    /// Create `fk` on `table`; `ref_table` is the referenced table's definition.
    pub async fn create_foreign_key(
        &self,
        conn: &mut dyn Connection,
        table: &Table,
        fk: &ForeignKey,
        ref_table: &Table,
        current: &[String],
    ) -> Result<()> {
        let object = format!("{}.{}", table.schema, fk.name);
        let batch = self
            .dialect()
            .create_fk(table, fk, &ref_table.primary_key, current);
        self.apply(conn, &object, &batch).await
    }

    /// Drop a stored foreign key.
    ///
    /// `owner` is the desired child table when it survives; `ref_table` the
    /// referenced table when it is part of the authored schema, so that helper
    /// triggers kept on it can be removed as well.
    pub async fn drop_foreign_key(
        &self,
        conn: &mut dyn Connection,
        schema: &str,
        fk: &DbFkInfo,
        owner: Option<&Table>,
        ref_table: Option<&Table>,
    ) -> Result<()> {
        let object = format!("{}.{}", schema, fk.name);
        let batch = self
            .drop_foreign_key_batch(conn, schema, fk, owner, ref_table)
            .await?;
        self.apply(conn, &object, &batch).await
    }

    /// Statements [`Adapter::drop_foreign_key`] would run.
    pub async fn drop_foreign_key_batch(
        &self,
        conn: &mut dyn Connection,
        schema: &str,
        fk: &DbFkInfo,
        owner: Option<&Table>,
        ref_table: Option<&Table>,
    ) -> Result<Vec<String>> {
        let ref_triggers = match ref_table {
            Some(t) => self.trigger_names(conn, t).await?,
            None => BTreeSet::new(),
        };
        let current = match owner {
            Some(t) => self.column_names(conn, t).await?,
            None => Vec::new(),
        };
        Ok(self
            .dialect()
            .drop_fk(schema, fk, owner, &ref_triggers, &current))
    }

    pub async fn create_index(
        &self,
        conn: &mut dyn Connection,
        table: &Table,
        index: &Index,
    ) -> Result<()> {
        let object = format!("{}.{}", table.schema, index.name);
        self.apply(conn, &object, &self.dialect().create_index(table, index))
            .await
    }

    pub async fn drop_index(
        &self,
        conn: &mut dyn Connection,
        schema: &str,
        index: &DbIndexInfo,
    ) -> Result<()> {
        let object = format!("{}.{}", schema, index.raw_name());
        self.apply(conn, &object, &self.dialect().drop_index(schema, index))
            .await
    }

    // =========================================================================
    // Sequences
    // =========================================================================

    pub async fn create_sequence(&self, conn: &mut dyn Connection, seq: &Sequence) -> Result<()> {
        let object = format!("{}.{}", seq.schema, seq.name);
        self.apply(conn, &object, &self.dialect().create_sequence(seq))
            .await
    }

    pub async fn alter_sequence(&self, conn: &mut dyn Connection, seq: &Sequence) -> Result<()> {
        let object = format!("{}.{}", seq.schema, seq.name);
        self.apply(conn, &object, &self.dialect().alter_sequence(seq))
            .await
    }

    pub async fn drop_sequence(
        &self,
        conn: &mut dyn Connection,
        schema: &str,
        name: &str,
    ) -> Result<()> {
        let object = format!("{}.{}", schema, name);
        self.apply(conn, &object, &self.dialect().drop_sequence(schema, name))
            .await
    }

    /// Advance a sequence and return the value drawn.
    pub async fn next_sequence_value(
        &self,
        conn: &mut dyn Connection,
        seq: &Sequence,
    ) -> Result<i64> {
        let object = format!("{}.{}", seq.schema, seq.name);
        let value = self
            .reader()
            .next_sequence_value(conn, &seq.schema, &seq.name)
            .await
            .map_err(|e| MigrateError::introspection(&object, e))?;
        conn.commit().await?;
        Ok(value)
    }

    // =========================================================================
    // Views
    // =========================================================================

    pub async fn create_view(&self, conn: &mut dyn Connection, view: &View, base: &Table) -> Result<()> {
        let object = format!("{}.{}", view.schema, view.name);
        let batch = self
            .dialect()
            .create_view(view, base)
            .map_err(|e| MigrateError::ddl(&object, e))?;
        self.apply(conn, &object, &batch).await
    }

    pub async fn drop_view(&self, conn: &mut dyn Connection, schema: &str, name: &str) -> Result<()> {
        let object = format!("{}.{}", schema, name);
        self.apply(conn, &object, &self.dialect().drop_view(schema, name))
            .await
    }

    pub async fn create_parameterized_view(
        &self,
        conn: &mut dyn Connection,
        pv: &ParameterizedView,
        base: &Table,
    ) -> Result<()> {
        let object = format!("{}.{}", pv.schema, pv.name);
        let batch = self
            .dialect()
            .create_parameterized_view(pv, base)
            .map_err(|e| MigrateError::ddl(&object, e))?;
        self.apply(conn, &object, &batch).await
    }

    pub async fn drop_parameterized_view(
        &self,
        conn: &mut dyn Connection,
        schema: &str,
        name: &str,
    ) -> Result<()> {
        let object = format!("{}.{}", schema, name);
        let batch = self.dialect().drop_parameterized_view(schema, name);
        self.apply(conn, &object, &batch).await
    }

    // =========================================================================
    // Materialized-view triggers
    // =========================================================================

    /// Create the maintenance triggers of every view in `mvs` on `base`.
    pub async fn create_mv_triggers(
        &self,
        conn: &mut dyn Connection,
        base: &Table,
        mvs: &[&MaterializedView],
    ) -> Result<()> {
        if mvs.is_empty() {
            return Ok(());
        }
        let batch = self.dialect().create_mv_triggers(base, mvs)?;
        self.apply(conn, &base.qualified_name(), &batch).await
    }

    /// Drop every maintenance trigger currently defined on `base`.
    pub async fn drop_mv_triggers(&self, conn: &mut dyn Connection, base: &Table) -> Result<()> {
        let existing = self.trigger_names(conn, base).await?;
        let batch = self.dialect().drop_mv_triggers(base, &existing);
        self.apply(conn, &base.qualified_name(), &batch).await
    }

    // =========================================================================
    // Query building
    // =========================================================================

    /// Unlimited SELECT.
    pub fn build_select(&self, from: &FromClause, where_clause: &str, order_by: &str, fields: &str) -> String {
        self.dialect()
            .select_with_order_by(from, where_clause, order_by, fields)
    }

    /// SELECT of rows `[offset, offset + row_count)`; zero paging means unlimited.
    pub fn build_limited_select(
        &self,
        from: &FromClause,
        where_clause: &str,
        order_by: &str,
        offset: u64,
        row_count: u64,
        fields: &str,
    ) -> Result<String> {
        self.dialect()
            .record_set_select(from, where_clause, order_by, offset, row_count, fields)
    }

    /// Single-row SELECT at a navigational position.
    pub fn build_navigation_select(
        &self,
        from: &FromClause,
        order_by: &str,
        position_predicate: &str,
        offset: u64,
        fields: &str,
    ) -> Result<String> {
        self.dialect()
            .navigation_select(from, order_by, position_predicate, offset, fields)
    }

    pub fn build_count(&self, from: &FromClause, where_clause: &str) -> String {
        self.dialect().count_select(from, where_clause)
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub async fn introspect_column(
        &self,
        conn: &mut dyn Connection,
        table: &Table,
        column: &str,
    ) -> Result<Option<DbColumnInfo>> {
        self.reader()
            .column_info(conn, &table.schema, &table.name, column)
            .await
            .map_err(|e| MigrateError::introspection(format!("{}.{}", table.qualified_name(), column), e))
    }

    pub async fn introspect_primary_key(
        &self,
        conn: &mut dyn Connection,
        table: &Table,
    ) -> Result<DbPkInfo> {
        self.reader()
            .pk_info(conn, &table.schema, &table.name)
            .await
            .map_err(|e| MigrateError::introspection(table.qualified_name(), e))
    }

    /// Foreign keys of every table in the grain.
    pub async fn introspect_foreign_keys(
        &self,
        conn: &mut dyn Connection,
        schema: &str,
    ) -> Result<Vec<DbFkInfo>> {
        self.reader()
            .fk_info(conn, schema)
            .await
            .map_err(|e| MigrateError::introspection(schema, e))
    }

    /// Indices of the grain keyed by catalog name.
    pub async fn introspect_indices(
        &self,
        conn: &mut dyn Connection,
        schema: &str,
    ) -> Result<BTreeMap<String, DbIndexInfo>> {
        self.reader()
            .indices(conn, schema)
            .await
            .map_err(|e| MigrateError::introspection(schema, e))
    }

    pub async fn introspect_sequence(
        &self,
        conn: &mut dyn Connection,
        schema: &str,
        name: &str,
    ) -> Result<Option<DbSequenceInfo>> {
        self.reader()
            .sequence_info(conn, schema, name)
            .await
            .map_err(|e| MigrateError::introspection(format!("{}.{}", schema, name), e))
    }

    pub async fn column_names(&self, conn: &mut dyn Connection, table: &Table) -> Result<Vec<String>> {
        self.reader()
            .column_names(conn, &table.schema, &table.name)
            .await
            .map_err(|e| MigrateError::introspection(table.qualified_name(), e))
    }

    pub async fn trigger_names(
        &self,
        conn: &mut dyn Connection,
        table: &Table,
    ) -> Result<BTreeSet<String>> {
        self.reader()
            .trigger_names(conn, &table.schema, &table.name)
            .await
            .map_err(|e| MigrateError::introspection(table.qualified_name(), e))
    }

    // =========================================================================
    // Existence checks
    // =========================================================================

    pub async fn table_exists(&self, conn: &mut dyn Connection, schema: &str, name: &str) -> Result<bool> {
        self.reader()
            .table_exists(conn, schema, name)
            .await
            .map_err(|e| MigrateError::introspection(format!("{}.{}", schema, name), e))
    }

    pub async fn trigger_exists(
        &self,
        conn: &mut dyn Connection,
        table: &Table,
        trigger: &str,
    ) -> Result<bool> {
        self.reader()
            .trigger_exists(conn, &table.schema, &table.name, trigger)
            .await
            .map_err(|e| MigrateError::introspection(format!("{}.{}", table.schema, trigger), e))
    }

    pub async fn sequence_exists(
        &self,
        conn: &mut dyn Connection,
        schema: &str,
        name: &str,
    ) -> Result<bool> {
        self.reader()
            .sequence_exists(conn, schema, name)
            .await
            .map_err(|e| MigrateError::introspection(format!("{}.{}", schema, name), e))
    }
}

fn column_object(table: &Table, col: &Column) -> String {
    format!("{}.{}", table.qualified_name(), col.name)
}

/// Roll back after a failed statement; the statement's error is the one reported.
async fn rollback_quietly(conn: &mut dyn Connection) {
    if let Err(e) = conn.rollback().await {
        debug!("rollback failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::ColumnKind;
    use crate::core::value::{Row, SqlValue};
    use async_trait::async_trait;

    /// Records statements; fails any statement containing `fail_on`.
    struct Recorder {
        executed: Vec<String>,
        commits: usize,
        rollbacks: usize,
        fail_on: Option<&'static str>,
    }

    impl Recorder {
        fn new() -> Self {
            Self {
                executed: Vec::new(),
                commits: 0,
                rollbacks: 0,
                fail_on: None,
            }
        }
    }

    #[async_trait]
    impl Connection for Recorder {
        fn db_type(&self) -> DbType {
            DbType::Postgres
        }

        async fn execute(&mut self, sql: &str) -> Result<u64> {
            if let Some(marker) = self.fail_on {
                if sql.contains(marker) {
                    return Err(MigrateError::Migration(format!("rejected: {}", sql)));
                }
            }
            self.executed.push(sql.to_string());
            Ok(0)
        }

        async fn query(&mut self, _sql: &str, _params: &[SqlValue]) -> Result<Vec<Row>> {
            Ok(Vec::new())
        }

        async fn commit(&mut self) -> Result<()> {
            self.commits += 1;
            Ok(())
        }

        async fn rollback(&mut self) -> Result<()> {
            self.rollbacks += 1;
            Ok(())
        }
    }

    fn orders() -> Table {
        Table::new("shop", "orders")
            .with_column(Column::new("id", ColumnKind::Integer).not_null().identity())
            .with_column(Column::string("note", 40))
            .with_pk(&["id"])
            .versioned()
    }

    #[tokio::test]
    async fn test_apply_commits_batch() {
        let adapter = Adapter::for_db_type(DbType::Postgres, "dbschema");
        let mut conn = Recorder::new();
        adapter
            .apply(&mut conn, "shop.t", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(conn.executed, vec!["a", "b"]);
        assert_eq!(conn.commits, 1);
        assert_eq!(conn.rollbacks, 0);
    }

    #[tokio::test]
    async fn test_apply_rolls_back_and_names_object() {
        let adapter = Adapter::for_db_type(DbType::Postgres, "dbschema");
        let mut conn = Recorder::new();
        conn.fail_on = Some("bad");
        let err = adapter
            .apply(&mut conn, "shop.orders", &["ok".to_string(), "bad".to_string(), "never".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Ddl { ref object, .. } if object == "shop.orders"));
        assert_eq!(conn.executed, vec!["ok"]);
        assert_eq!(conn.rollbacks, 1);
        assert_eq!(conn.commits, 0);
    }

    #[tokio::test]
    async fn test_create_table_wires_identity_and_versioning() {
        let adapter = Adapter::for_db_type(DbType::Postgres, "dbschema");
        let mut conn = Recorder::new();
        adapter.create_table(&mut conn, &orders()).await.unwrap();
        assert!(conn.executed[0].starts_with("create table \"shop\".\"orders\""));
        assert!(conn.executed.iter().any(|s| s.contains("create sequence")));
        assert!(conn.executed.iter().any(|s| s.contains("nextval")));
        assert!(conn.executed.iter().any(|s| s.contains("versioncheck")));
        assert_eq!(conn.commits, 1);
    }

    #[test]
    fn test_query_builders_dispatch() {
        let adapter = Adapter::for_db_type(DbType::Embedded, "dbschema");
        let from = FromClause::table(adapter.dialect(), "shop", "orders");
        assert_eq!(
            adapter.build_count(&from, "\"id\" > 3"),
            "select count(*) from \"shop_orders\" where \"id\" > 3"
        );
        assert!(adapter
            .build_limited_select(&from, "", "\"id\"", 0, 0, "*")
            .unwrap()
            .ends_with("order by \"id\""));
        assert!(adapter
            .build_limited_select(&from, "", "\"id\"", 5, 10, "*")
            .unwrap()
            .contains("limit"));
    }
}
