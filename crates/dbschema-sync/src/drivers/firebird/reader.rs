//! Firebird catalog introspection over the `rdb$` system tables.
//!
//! System table names are `char` columns padded with blanks, so every name
//! read back goes through `get_trimmed`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use super::dialect::FirebirdDialect;
use crate::core::meta::{
    DbColumnInfo, DbFkInfo, DbIndexInfo, DbPkInfo, DbSequenceInfo, FOREIGN_INDEX_MARKER,
};
use crate::core::schema::{ColumnKind, FkRule};
use crate::core::traits::{CatalogReader, Connection};
use crate::core::value::{Row, SqlValue};
use crate::dialect::Dialect;
use crate::error::{MigrateError, Result};

static BOOLEAN_CHECK_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""([^"]+)"\s*(?i:in)\s*\(\s*0\s*,\s*1\s*\)"#).expect("valid regex")
});

static NEXT_VALUE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i:next\s+value\s+for)\s+"([^"]+)""#).expect("valid regex")
});

/// Column kind of an `rdb$fields` type code, before the boolean check.
pub(super) fn kind_of_type(field_type: i64, sub_type: i64, scale: i64) -> Option<ColumnKind> {
    Some(match field_type {
        // smallint, integer, bigint, int128
        7 | 8 | 16 | 26 if scale < 0 || sub_type == 1 || sub_type == 2 => ColumnKind::Decimal,
        7 | 8 | 16 | 26 => ColumnKind::Integer,
        10 | 27 => ColumnKind::Floating,
        14 | 37 => ColumnKind::String,
        261 if sub_type == 1 => ColumnKind::String,
        261 => ColumnKind::Binary,
        12 | 35 => ColumnKind::DateTime,
        29 => ColumnKind::ZonedDateTime,
        _ => return None,
    })
}

/// Columns named by `in (0, 1)` check sources.
pub(super) fn boolean_columns<'a>(sources: impl Iterator<Item = &'a str>) -> BTreeSet<String> {
    sources
        .flat_map(|c| BOOLEAN_CHECK_REGEX.captures_iter(c))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Sequence read by a BEFORE INSERT wiring trigger.
pub(super) fn wired_sequence(body: &str) -> Option<String> {
    NEXT_VALUE_REGEX
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn names(rows: &[Row]) -> Vec<String> {
    rows.iter().filter_map(|r| r.get_trimmed(0)).collect()
}

impl FirebirdDialect {
    fn prefix_pattern(&self, schema: &str) -> String {
        format!("{}@_%", schema.replace('@', "@@").replace('_', "@_").replace('%', "@%"))
    }

    async fn prefixed_names(
        &self,
        conn: &mut dyn Connection,
        sql: &str,
        schema: &str,
    ) -> Result<Vec<String>> {
        let rows = conn.query(sql, &[SqlValue::from(self.prefix_pattern(schema))]).await?;
        let prefix = format!("{}_", schema);
        Ok(names(&rows)
            .into_iter()
            .map(|n| n.strip_prefix(&prefix).map(str::to_string).unwrap_or(n))
            .collect())
    }

    async fn is_boolean(&self, conn: &mut dyn Connection, stored: &str, column: &str) -> Result<bool> {
        let rows = conn
            .query(
                "select t.rdb$trigger_source from rdb$relation_constraints rc \
                 join rdb$check_constraints cc on cc.rdb$constraint_name = rc.rdb$constraint_name \
                 join rdb$triggers t on t.rdb$trigger_name = cc.rdb$trigger_name \
                 where rc.rdb$relation_name = ? and rc.rdb$constraint_type = 'CHECK'",
                &[SqlValue::from(stored)],
            )
            .await?;
        let sources: Vec<String> = rows.iter().filter_map(|r| r.get_string(0)).collect();
        Ok(boolean_columns(sources.iter().map(String::as_str)).contains(column))
    }
}

#[async_trait]
impl CatalogReader for FirebirdDialect {
    async fn schema_exists(&self, _conn: &mut dyn Connection, _schema: &str) -> Result<bool> {
        Ok(true)
    }

    async fn table_exists(&self, conn: &mut dyn Connection, schema: &str, table: &str) -> Result<bool> {
        conn.query_exists(
            "select 1 from rdb$relations where rdb$relation_name = ? and rdb$view_blr is null",
            &[SqlValue::from(self.object_name(schema, table))],
        )
        .await
    }

    async fn user_tables_exist(&self, conn: &mut dyn Connection, sys_schema: &str) -> Result<bool> {
        conn.query_exists(
            "select 1 from rdb$relations where coalesce(rdb$system_flag, 0) = 0 \
             and rdb$view_blr is null and rdb$relation_name not like ? escape '@'",
            &[SqlValue::from(self.prefix_pattern(sys_schema))],
        )
        .await
    }

    async fn table_list(&self, conn: &mut dyn Connection, schema: &str) -> Result<Vec<String>> {
        self.prefixed_names(
            conn,
            "select rdb$relation_name from rdb$relations where rdb$view_blr is null \
             and coalesce(rdb$system_flag, 0) = 0 and rdb$relation_name like ? escape '@' \
             order by rdb$relation_name",
            schema,
        )
        .await
    }

    async fn column_names(&self, conn: &mut dyn Connection, schema: &str, table: &str) -> Result<Vec<String>> {
        let rows = conn
            .query(
                "select rdb$field_name from rdb$relation_fields where rdb$relation_name = ? \
                 order by rdb$field_position",
                &[SqlValue::from(self.object_name(schema, table))],
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
        let stored = self.object_name(schema, table);
        let rows = conn
            .query(
                "select f.rdb$field_type, f.rdb$field_sub_type, f.rdb$field_scale, \
                 f.rdb$field_precision, f.rdb$character_length, rf.rdb$null_flag, rf.rdb$default_source \
                 from rdb$relation_fields rf join rdb$fields f on f.rdb$field_name = rf.rdb$field_source \
                 where rf.rdb$relation_name = ? and rf.rdb$field_name = ?",
                &[SqlValue::from(stored.as_str()), SqlValue::from(column)],
            )
            .await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };

        let field_type = row.get_i64(0).unwrap_or_default();
        let sub_type = row.get_i64(1).unwrap_or_default();
        let scale = row.get_i64(2).unwrap_or_default();
        let mut kind = kind_of_type(field_type, sub_type, scale)
            .ok_or_else(|| MigrateError::Schema(format!("unsupported field type {}", field_type)))?;
        if field_type == 7 && kind == ColumnKind::Integer && self.is_boolean(conn, &stored, column).await? {
            kind = ColumnKind::Boolean;
        }

        let mut info = DbColumnInfo::new(column, kind);
        info.nullable = row.get_i64(5).unwrap_or(0) == 0;
        match kind {
            ColumnKind::String if field_type == 261 => info.max = true,
            ColumnKind::String => info.length = row.get_i64(4).unwrap_or(0) as u32,
            ColumnKind::Decimal => {
                info.precision = row.get_i64(3).unwrap_or(0) as u32;
                info.scale = (-scale) as u32;
            }
            _ => {}
        }
        info.default = row
            .get_string(6)
            .and_then(|raw| self.normalize_stored_default(kind, &raw));

        if kind == ColumnKind::Integer && info.default.is_none() {
            let trigger = self.sequence_trigger_name(schema, table, column);
            if let Some(body) = self.trigger_body(conn, schema, table, &trigger).await? {
                info.default = wired_sequence(&body).map(|seq| format!("NEXTVAL({})", seq));
            }
        }
        Ok(Some(info))
    }

    async fn pk_info(&self, conn: &mut dyn Connection, schema: &str, table: &str) -> Result<DbPkInfo> {
        let rows = conn
            .query(
                "select rc.rdb$constraint_name, s.rdb$field_name from rdb$relation_constraints rc \
                 join rdb$index_segments s on s.rdb$index_name = rc.rdb$index_name \
                 where rc.rdb$relation_name = ? and rc.rdb$constraint_type = 'PRIMARY KEY' \
                 order by s.rdb$field_position",
                &[SqlValue::from(self.object_name(schema, table))],
            )
            .await?;
        let mut pk = DbPkInfo::default();
        for row in &rows {
            if pk.name.is_empty() {
                pk.name = row.get_trimmed(0).unwrap_or_default();
            }
            if let Some(col) = row.get_trimmed(1) {
                pk.columns.push(col);
            }
        }
        Ok(pk)
    }

    async fn fk_info(&self, conn: &mut dyn Connection, schema: &str) -> Result<Vec<DbFkInfo>> {
        let rows = conn
            .query(
                "select rc.rdb$constraint_name, rc.rdb$relation_name, s.rdb$field_name, \
                 pk.rdb$relation_name, ref.rdb$update_rule, ref.rdb$delete_rule \
                 from rdb$relation_constraints rc \
                 join rdb$ref_constraints ref on ref.rdb$constraint_name = rc.rdb$constraint_name \
                 join rdb$relation_constraints pk on pk.rdb$constraint_name = ref.rdb$const_name_uq \
                 join rdb$index_segments s on s.rdb$index_name = rc.rdb$index_name \
                 where rc.rdb$constraint_type = 'FOREIGN KEY' and rc.rdb$relation_name like ? escape '@' \
                 order by rc.rdb$constraint_name, s.rdb$field_position",
                &[SqlValue::from(self.prefix_pattern(schema))],
            )
            .await?;

        let mut result: Vec<DbFkInfo> = Vec::new();
        for row in &rows {
            let name = row.get_trimmed(0).unwrap_or_default();
            if result.last().map_or(true, |fk| fk.name != name) {
                result.push(DbFkInfo {
                    name,
                    table_name: row.get_trimmed(1).unwrap_or_default(),
                    ref_grain: String::new(),
                    ref_table: row.get_trimmed(3).unwrap_or_default(),
                    columns: Vec::new(),
                    update_rule: FkRule::from_catalog(&row.get_trimmed(4).unwrap_or_default()),
                    delete_rule: FkRule::from_catalog(&row.get_trimmed(5).unwrap_or_default()),
                });
            }
            if let (Some(fk), Some(col)) = (result.last_mut(), row.get_trimmed(2)) {
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
        // Indices backing constraints are managed with the constraint.
        let rows = conn
            .query(
                "select i.rdb$relation_name, i.rdb$index_name, s.rdb$field_name from rdb$indices i \
                 join rdb$index_segments s on s.rdb$index_name = i.rdb$index_name \
                 left join rdb$relation_constraints rc on rc.rdb$index_name = i.rdb$index_name \
                 where rc.rdb$constraint_name is null and coalesce(i.rdb$system_flag, 0) = 0 \
                 and coalesce(i.rdb$unique_flag, 0) = 0 and i.rdb$relation_name like ? escape '@' \
                 order by i.rdb$relation_name, i.rdb$index_name, s.rdb$field_position",
                &[SqlValue::from(self.prefix_pattern(schema))],
            )
            .await?;

        let prefix = format!("{}_", schema);
        let mut out: BTreeMap<String, DbIndexInfo> = BTreeMap::new();
        for row in &rows {
            let table_name = row.get_trimmed(0).unwrap_or_default();
            let index_name = row.get_trimmed(1).unwrap_or_default();
            let key = if index_name.starts_with(&prefix) {
                index_name
            } else {
                format!("{}{}", FOREIGN_INDEX_MARKER, index_name)
            };
            let entry = out
                .entry(key.clone())
                .or_insert_with(|| DbIndexInfo::new(table_name, key));
            if let Some(col) = row.get_trimmed(2) {
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
                "select rdb$trigger_name from rdb$triggers \
                 where rdb$relation_name = ? and coalesce(rdb$system_flag, 0) = 0",
                &[SqlValue::from(self.object_name(schema, table))],
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
                "select rdb$trigger_source from rdb$triggers \
                 where rdb$relation_name = ? and rdb$trigger_name = ?",
                &[SqlValue::from(self.object_name(schema, table)), SqlValue::from(trigger)],
            )
            .await?;
        Ok(rows.first().and_then(|r| r.get_string(0)))
    }

    async fn sequence_exists(&self, conn: &mut dyn Connection, schema: &str, name: &str) -> Result<bool> {
        conn.query_exists(
            "select 1 from rdb$generators where rdb$generator_name = ?",
            &[SqlValue::from(self.object_name(schema, name))],
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
                "select rdb$generator_increment from rdb$generators where rdb$generator_name = ?",
                &[SqlValue::from(self.object_name(schema, name))],
            )
            .await?;
        // Only the increment is stored; bounds and cycling do not exist.
        Ok(rows.first().map(|r| DbSequenceInfo {
            increment_by: r.get_i64(0).unwrap_or(1),
            min_value: 1,
            max_value: i64::MAX,
            cycle: false,
        }))
    }

    async fn next_sequence_value(
        &self,
        conn: &mut dyn Connection,
        schema: &str,
        name: &str,
    ) -> Result<i64> {
        let sql = format!(
            "select next value for {} from rdb$database",
            self.sequence_string(schema, name)
        );
        conn.query_i64(&sql, &[])
            .await?
            .ok_or_else(|| MigrateError::InvalidArgument(format!("sequence {}.{} returned no value", schema, name)))
    }

    async fn view_list(&self, conn: &mut dyn Connection, schema: &str) -> Result<Vec<String>> {
        self.prefixed_names(
            conn,
            "select rdb$relation_name from rdb$relations where rdb$view_blr is not null \
             and rdb$relation_name like ? escape '@' order by rdb$relation_name",
            schema,
        )
        .await
    }

    async fn parameterized_view_list(
        &self,
        conn: &mut dyn Connection,
        schema: &str,
    ) -> Result<Vec<String>> {
        self.prefixed_names(
            conn,
            "select rdb$procedure_name from rdb$procedures \
             where rdb$procedure_name like ? escape '@' order by rdb$procedure_name",
            schema,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_of_type() {
        assert_eq!(kind_of_type(8, 0, 0), Some(ColumnKind::Integer));
        assert_eq!(kind_of_type(7, 0, 0), Some(ColumnKind::Integer));
        assert_eq!(kind_of_type(16, 2, -2), Some(ColumnKind::Decimal));
        assert_eq!(kind_of_type(37, 0, 0), Some(ColumnKind::String));
        assert_eq!(kind_of_type(261, 1, 0), Some(ColumnKind::String));
        assert_eq!(kind_of_type(261, 0, 0), Some(ColumnKind::Binary));
        assert_eq!(kind_of_type(35, 0, 0), Some(ColumnKind::DateTime));
        assert_eq!(kind_of_type(29, 0, 0), Some(ColumnKind::ZonedDateTime));
        assert_eq!(kind_of_type(23, 0, 0), None);
    }

    #[test]
    fn test_boolean_columns_from_check_source() {
        let sources = ["check (\"paid\" in (0, 1))", "check (\"qty\" > 0)"];
        let found = boolean_columns(sources.iter().copied());
        assert!(found.contains("paid"));
        assert!(!found.contains("qty"));
    }

    #[test]
    fn test_wired_sequence() {
        let body = "as\nbegin\n  if (new.\"id\" is null) then new.\"id\" = next value for \"shop_orders_seq\";\nend";
        assert_eq!(wired_sequence(body).as_deref(), Some("shop_orders_seq"));
        assert_eq!(wired_sequence("as begin end"), None);
    }

    #[test]
    fn test_prefix_pattern() {
        assert_eq!(FirebirdDialect::new().prefix_pattern("my_shop"), "my@_shop@_%");
    }
}
