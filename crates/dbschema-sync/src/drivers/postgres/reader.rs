//! PostgreSQL catalog introspection.
//!
//! Names and flags come from `information_schema`; constraint, index and
//! trigger details from `pg_catalog`. Every selected column is cast to
//! `text`, `int8` or `bool` so rows convert without type surprises.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use super::dialect::PostgresDialect;
use crate::core::identifier::validate_identifier;
use crate::core::meta::{
    DbColumnInfo, DbFkInfo, DbIndexInfo, DbPkInfo, DbSequenceInfo, FOREIGN_INDEX_MARKER,
};
use crate::core::schema::{ColumnKind, FkRule};
use crate::core::traits::{CatalogReader, Connection};
use crate::core::value::{Row, SqlValue};
use crate::dialect::Dialect;
use crate::error::{MigrateError, Result};

/// Column kind of a `udt_name`.
pub(super) fn kind_of_udt(udt: &str) -> Option<ColumnKind> {
    Some(match udt {
        "int2" | "int4" | "int8" => ColumnKind::Integer,
        "varchar" | "bpchar" | "text" => ColumnKind::String,
        "bool" => ColumnKind::Boolean,
        "float4" | "float8" => ColumnKind::Floating,
        "numeric" => ColumnKind::Decimal,
        "bytea" => ColumnKind::Binary,
        "timestamp" => ColumnKind::DateTime,
        "timestamptz" => ColumnKind::ZonedDateTime,
        _ => return None,
    })
}

fn names(rows: &[Row]) -> Vec<String> {
    rows.iter().filter_map(|r| r.get_string(0)).collect()
}

#[async_trait]
impl CatalogReader for PostgresDialect {
    async fn schema_exists(&self, conn: &mut dyn Connection, schema: &str) -> Result<bool> {
        conn.query_exists(
            "select 1 from information_schema.schemata where schema_name = $1",
            &[SqlValue::from(schema)],
        )
        .await
    }

    async fn table_exists(&self, conn: &mut dyn Connection, schema: &str, table: &str) -> Result<bool> {
        conn.query_exists(
            "select 1 from information_schema.tables \
             where table_schema = $1 and table_name = $2 and table_type = 'BASE TABLE'",
            &[SqlValue::from(schema), SqlValue::from(table)],
        )
        .await
    }

    async fn user_tables_exist(&self, conn: &mut dyn Connection, sys_schema: &str) -> Result<bool> {
        conn.query_exists(
            "select 1 from information_schema.tables where table_type = 'BASE TABLE' \
             and table_schema not in ('pg_catalog', 'information_schema', $1)",
            &[SqlValue::from(sys_schema)],
        )
        .await
    }

    async fn table_list(&self, conn: &mut dyn Connection, schema: &str) -> Result<Vec<String>> {
        let rows = conn
            .query(
                "select table_name::text from information_schema.tables \
                 where table_schema = $1 and table_type = 'BASE TABLE' order by table_name",
                &[SqlValue::from(schema)],
            )
            .await?;
        Ok(names(&rows))
    }

    async fn column_names(&self, conn: &mut dyn Connection, schema: &str, table: &str) -> Result<Vec<String>> {
        let rows = conn
            .query(
                "select column_name::text from information_schema.columns \
                 where table_schema = $1 and table_name = $2 order by ordinal_position",
                &[SqlValue::from(schema), SqlValue::from(table)],
            )
            .await?;
        Ok(names(&rows))
    }

    async fn column_info(
        &self,
        conn: &mut dyn Connection,
        schema: &str,
        table: &str,
        column: &str,
    ) -> Result<Option<DbColumnInfo>> {
        let rows = conn
            .query(
                "select udt_name::text, \
                        coalesce(character_maximum_length, 0)::int8, \
                        coalesce(numeric_precision, 0)::int8, \
                        coalesce(numeric_scale, 0)::int8, \
                        is_nullable = 'YES', \
                        column_default::text \
                 from information_schema.columns \
                 where table_schema = $1 and table_name = $2 and column_name = $3",
                &[SqlValue::from(schema), SqlValue::from(table), SqlValue::from(column)],
            )
            .await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };

        let udt = row.get_string(0).unwrap_or_default();
        let kind = kind_of_udt(&udt)
            .ok_or_else(|| MigrateError::Schema(format!("unsupported column type {:?}", udt)))?;
        let mut info = DbColumnInfo::new(column, kind);
        match (kind, udt.as_str()) {
            (ColumnKind::String, "text") => info.max = true,
            (ColumnKind::String, _) => info.length = row.get_i64(1).unwrap_or(0) as u32,
            (ColumnKind::Decimal, _) => {
                info.precision = row.get_i64(2).unwrap_or(0) as u32;
                info.scale = row.get_i64(3).unwrap_or(0) as u32;
            }
            _ => {}
        }
        info.nullable = row.get_bool(4);
        info.default = row
            .get_string(5)
            .and_then(|raw| self.normalize_stored_default(kind, &raw));
        Ok(Some(info))
    }

    async fn pk_info(&self, conn: &mut dyn Connection, schema: &str, table: &str) -> Result<DbPkInfo> {
        let rows = conn
            .query(
                "select c.conname::text, a.attname::text \
                 from pg_catalog.pg_constraint c \
                 join pg_catalog.pg_class t on t.oid = c.conrelid \
                 join pg_catalog.pg_namespace n on n.oid = t.relnamespace \
                 join pg_catalog.pg_attribute a on a.attrelid = t.oid and a.attnum = any(c.conkey) \
                 where n.nspname = $1 and t.relname = $2 and c.contype = 'p' \
                 order by array_position(c.conkey, a.attnum)",
                &[SqlValue::from(schema), SqlValue::from(table)],
            )
            .await?;
        let mut pk = DbPkInfo::default();
        for row in &rows {
            if pk.name.is_empty() {
                pk.name = row.get_string(0).unwrap_or_default();
            }
            if let Some(col) = row.get_string(1) {
                pk.columns.push(col);
            }
        }
        Ok(pk)
    }

    async fn fk_info(&self, conn: &mut dyn Connection, schema: &str) -> Result<Vec<DbFkInfo>> {
        let rows = conn
            .query(
                "select kcu1.constraint_name::text, kcu1.table_name::text, kcu1.column_name::text, \
                        kcu2.table_schema::text, kcu2.table_name::text, rc.update_rule::text, rc.delete_rule::text \
                 from information_schema.referential_constraints rc \
                 join information_schema.key_column_usage kcu1 \
                   on kcu1.constraint_catalog = rc.constraint_catalog \
                  and kcu1.constraint_schema = rc.constraint_schema \
                  and kcu1.constraint_name = rc.constraint_name \
                 join information_schema.key_column_usage kcu2 \
                   on kcu2.constraint_catalog = rc.unique_constraint_catalog \
                  and kcu2.constraint_schema = rc.unique_constraint_schema \
                  and kcu2.constraint_name = rc.unique_constraint_name \
                  and kcu2.ordinal_position = kcu1.ordinal_position \
                 where rc.constraint_schema = $1 \
                 order by kcu1.constraint_name, kcu1.ordinal_position",
                &[SqlValue::from(schema)],
            )
            .await?;

        let mut result: Vec<DbFkInfo> = Vec::new();
        for row in &rows {
            let name = row.get_string(0).unwrap_or_default();
            if result.last().map_or(true, |fk| fk.name != name) {
                result.push(DbFkInfo {
                    name,
                    table_name: row.get_string(1).unwrap_or_default(),
                    ref_grain: row.get_string(3).unwrap_or_default(),
                    ref_table: row.get_string(4).unwrap_or_default(),
                    columns: Vec::new(),
                    update_rule: FkRule::from_catalog(&row.get_string(5).unwrap_or_default()),
                    delete_rule: FkRule::from_catalog(&row.get_string(6).unwrap_or_default()),
                });
            }
            if let (Some(fk), Some(col)) = (result.last_mut(), row.get_string(2)) {
                fk.columns.push(col);
            }
        }
        Ok(result)
    }

    async fn indices(
        &self,
        conn: &mut dyn Connection,
        schema: &str,
    ) -> Result<BTreeMap<String, DbIndexInfo>> {
        let rows = conn
            .query(
                "select c.relname::text, i.relname::text, a.attname::text \
                 from pg_catalog.pg_index x \
                 join pg_catalog.pg_class c on c.oid = x.indrelid \
                 join pg_catalog.pg_class i on i.oid = x.indexrelid \
                 join pg_catalog.pg_namespace n on n.oid = c.relnamespace \
                 cross join lateral unnest(x.indkey::int2[]) with ordinality as k(attnum, ord) \
                 join pg_catalog.pg_attribute a on a.attrelid = c.oid and a.attnum = k.attnum \
                 where n.nspname = $1 and c.relkind = 'r' and not x.indisunique and not x.indisprimary \
                 order by c.relname, i.relname, k.ord",
                &[SqlValue::from(schema)],
            )
            .await?;

        let mut out: BTreeMap<String, DbIndexInfo> = BTreeMap::new();
        for row in &rows {
            let table_name = row.get_string(0).unwrap_or_default();
            let index_name = row.get_string(1).unwrap_or_default();
            let key = if validate_identifier(&index_name).is_ok() {
                index_name
            } else {
                format!("{}{}", FOREIGN_INDEX_MARKER, index_name)
            };
            let entry = out
                .entry(key.clone())
                .or_insert_with(|| DbIndexInfo::new(table_name, key));
            if let Some(col) = row.get_string(2) {
                entry.columns.push(col);
            }
        }
        Ok(out)
    }

    async fn trigger_names(
        &self,
        conn: &mut dyn Connection,
        schema: &str,
        table: &str,
    ) -> Result<BTreeSet<String>> {
        let rows = conn
            .query(
                "select t.tgname::text from pg_catalog.pg_trigger t \
                 join pg_catalog.pg_class c on c.oid = t.tgrelid \
                 join pg_catalog.pg_namespace n on n.oid = c.relnamespace \
                 where n.nspname = $1 and c.relname = $2 and not t.tgisinternal",
                &[SqlValue::from(schema), SqlValue::from(table)],
            )
            .await?;
        Ok(names(&rows).into_iter().collect())
    }

    async fn trigger_body(
        &self,
        conn: &mut dyn Connection,
        schema: &str,
        table: &str,
        trigger: &str,
    ) -> Result<Option<String>> {
        let rows = conn
            .query(
                "select p.prosrc::text from pg_catalog.pg_trigger t \
                 join pg_catalog.pg_proc p on p.oid = t.tgfoid \
                 join pg_catalog.pg_class c on c.oid = t.tgrelid \
                 join pg_catalog.pg_namespace n on n.oid = c.relnamespace \
                 where n.nspname = $1 and c.relname = $2 and t.tgname = $3",
                &[SqlValue::from(schema), SqlValue::from(table), SqlValue::from(trigger)],
            )
            .await?;
        Ok(rows.first().and_then(|r| r.get_string(0)))
    }

    async fn sequence_exists(&self, conn: &mut dyn Connection, schema: &str, name: &str) -> Result<bool> {
        conn.query_exists(
            "select 1 from information_schema.sequences where sequence_schema = $1 and sequence_name = $2",
            &[SqlValue::from(schema), SqlValue::from(name)],
        )
        .await
    }

    async fn sequence_info(
        &self,
        conn: &mut dyn Connection,
        schema: &str,
        name: &str,
    ) -> Result<Option<DbSequenceInfo>> {
        let rows = conn
            .query(
                "select increment_by::int8, min_value::int8, max_value::int8, cycle \
                 from pg_catalog.pg_sequences where schemaname = $1 and sequencename = $2",
                &[SqlValue::from(schema), SqlValue::from(name)],
            )
            .await?;
        Ok(rows.first().map(|r| DbSequenceInfo {
            increment_by: r.get_i64(0).unwrap_or(1),
            min_value: r.get_i64(1).unwrap_or(1),
            max_value: r.get_i64(2).unwrap_or(i64::MAX),
            cycle: r.get_bool(3),
        }))
    }

    async fn next_sequence_value(
        &self,
        conn: &mut dyn Connection,
        schema: &str,
        name: &str,
    ) -> Result<i64> {
        conn.query_i64(
            "select nextval($1::text::regclass)::int8",
            &[SqlValue::from(self.sequence_string(schema, name))],
        )
        .await?
        .ok_or_else(|| MigrateError::InvalidArgument(format!("sequence {}.{} returned no value", schema, name)))
    }

    async fn view_list(&self, conn: &mut dyn Connection, schema: &str) -> Result<Vec<String>> {
        let rows = conn
            .query(
                "select table_name::text from information_schema.views \
                 where table_schema = $1 order by table_name",
                &[SqlValue::from(schema)],
            )
            .await?;
        Ok(names(&rows))
    }

    async fn parameterized_view_list(
        &self,
        conn: &mut dyn Connection,
        schema: &str,
    ) -> Result<Vec<String>> {
        let rows = conn
            .query(
                "select p.proname::text from pg_catalog.pg_proc p \
                 join pg_catalog.pg_namespace n on n.oid = p.pronamespace \
                 where n.nspname = $1 and p.proretset order by p.proname",
                &[SqlValue::from(schema)],
            )
            .await?;
        Ok(names(&rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_of_udt() {
        assert_eq!(kind_of_udt("int4"), Some(ColumnKind::Integer));
        assert_eq!(kind_of_udt("text"), Some(ColumnKind::String));
        assert_eq!(kind_of_udt("timestamptz"), Some(ColumnKind::ZonedDateTime));
        assert_eq!(kind_of_udt("bytea"), Some(ColumnKind::Binary));
        assert_eq!(kind_of_udt("jsonb"), None);
    }
}
