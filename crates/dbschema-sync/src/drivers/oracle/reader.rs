//! Oracle catalog introspection over the `user_*` dictionary views.
//!
//! Every object of a grain lives in the connecting user's schema under a
//! `grain_` prefix, so listings filter with `like 'grain@_%' escape '@'` and
//! strip the prefix again. Names are stored exactly as quoted at creation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use super::dialect::{OracleDialect, CASCADE_TRIGGER_PREFIX, SET_NULL_TRIGGER_PREFIX};
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

static NEXTVAL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]+)"\s*\.\s*(?i:nextval)"#).expect("valid regex"));

/// Column kind of a `user_tab_columns.data_type`, before the boolean check.
pub(super) fn kind_of_type(data_type: &str, precision: Option<i64>) -> Option<ColumnKind> {
    let upper = data_type.to_ascii_uppercase();
    if upper.starts_with("TIMESTAMP") {
        return Some(if upper.contains("TIME ZONE") {
            ColumnKind::ZonedDateTime
        } else {
            ColumnKind::DateTime
        });
    }
    Some(match upper.as_str() {
        "DATE" => ColumnKind::DateTime,
        "FLOAT" | "BINARY_DOUBLE" | "BINARY_FLOAT" => ColumnKind::Floating,
        "NVARCHAR2" | "VARCHAR2" | "NCHAR" | "CHAR" | "NCLOB" | "CLOB" => ColumnKind::String,
        "BLOB" | "RAW" | "LONG RAW" => ColumnKind::Binary,
        "NUMBER" if precision.is_some() => ColumnKind::Decimal,
        "NUMBER" | "INTEGER" => ColumnKind::Integer,
        _ => return None,
    })
}

/// Columns named by `in (0, 1)` check conditions.
pub(super) fn boolean_columns<'a>(conditions: impl Iterator<Item = &'a str>) -> BTreeSet<String> {
    conditions
        .flat_map(|c| BOOLEAN_CHECK_REGEX.captures_iter(c))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Sequence read by a BEFORE INSERT wiring trigger.
pub(super) fn wired_sequence(body: &str) -> Option<String> {
    NEXTVAL_REGEX
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn names(rows: &[Row]) -> Vec<String> {
    rows.iter().filter_map(|r| r.get_string(0)).collect()
}

impl OracleDialect {
    /// `LIKE` pattern matching the grain's objects, with `@` as escape.
    fn prefix_pattern(&self, schema: &str) -> String {
        format!("{}@_%", schema.replace('@', "@@").replace('_', "@_").replace('%', "@%"))
    }

    fn strip_prefix<'a>(&self, schema: &str, name: &'a str) -> &'a str {
        name.strip_prefix(&format!("{}_", schema)).unwrap_or(name)
    }

    async fn prefixed_names(
        &self,
        conn: &mut dyn Connection,
        sql: &str,
        schema: &str,
    ) -> Result<Vec<String>> {
        let rows = conn.query(sql, &[SqlValue::from(self.prefix_pattern(schema))]).await?;
        Ok(names(&rows)
            .iter()
            .map(|n| self.strip_prefix(schema, n).to_string())
            .collect())
    }

    async fn is_boolean(&self, conn: &mut dyn Connection, stored: &str, column: &str) -> Result<bool> {
        let rows = conn
            .query(
                "select search_condition from user_constraints \
                 where table_name = ? and constraint_type = 'C'",
                &[SqlValue::from(stored)],
            )
            .await?;
        let conditions: Vec<String> = names(&rows);
        Ok(boolean_columns(conditions.iter().map(String::as_str)).contains(column))
    }

    /// Names of every FK update-rule trigger of the current user.
    async fn update_rule_triggers(&self, conn: &mut dyn Connection) -> Result<BTreeSet<String>> {
        let rows = conn
            .query(
                "select trigger_name from user_triggers \
                 where trigger_name like ? escape '@' or trigger_name like ? escape '@'",
                &[
                    SqlValue::from(format!("{}%", CASCADE_TRIGGER_PREFIX.replace('_', "@_"))),
                    SqlValue::from(format!("{}%", SET_NULL_TRIGGER_PREFIX.replace('_', "@_"))),
                ],
            )
            .await?;
        Ok(names(&rows).into_iter().collect())
    }
}

#[async_trait]
impl CatalogReader for OracleDialect {
    async fn schema_exists(&self, _conn: &mut dyn Connection, _schema: &str) -> Result<bool> {
        Ok(true)
    }

    async fn table_exists(&self, conn: &mut dyn Connection, schema: &str, table: &str) -> Result<bool> {
        conn.query_exists(
            "select 1 from user_tables where table_name = ?",
            &[SqlValue::from(self.object_name(schema, table))],
        )
        .await
    }

    async fn user_tables_exist(&self, conn: &mut dyn Connection, sys_schema: &str) -> Result<bool> {
        conn.query_exists(
            "select 1 from user_tables where table_name not like ? escape '@'",
            &[SqlValue::from(self.prefix_pattern(sys_schema))],
        )
        .await
    }

    async fn table_list(&self, conn: &mut dyn Connection, schema: &str) -> Result<Vec<String>> {
        self.prefixed_names(
            conn,
            "select table_name from user_tables where table_name like ? escape '@' order by table_name",
            schema,
        )
        .await
    }

    async fn column_names(&self, conn: &mut dyn Connection, schema: &str, table: &str) -> Result<Vec<String>> {
        let rows = conn
            .query(
                "select column_name from user_tab_columns where table_name = ? order by column_id",
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
                "select data_type, nullable, char_length, data_precision, data_scale, data_default \
                 from user_tab_columns where table_name = ? and column_name = ?",
                &[SqlValue::from(stored.as_str()), SqlValue::from(column)],
            )
            .await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };

        let data_type = row.get_string(0).unwrap_or_default();
        let precision = row.get_i64(3);
        let mut kind = kind_of_type(&data_type, precision)
            .ok_or_else(|| MigrateError::Schema(format!("unsupported column type {:?}", data_type)))?;
        if kind == ColumnKind::Integer && self.is_boolean(conn, &stored, column).await? {
            kind = ColumnKind::Boolean;
        }

        let mut info = DbColumnInfo::new(column, kind);
        info.nullable = row.get_bool(1);
        match kind {
            ColumnKind::String if data_type.to_ascii_uppercase().ends_with("CLOB") => info.max = true,
            ColumnKind::String => info.length = row.get_i64(2).unwrap_or(0) as u32,
            ColumnKind::Decimal => {
                info.precision = precision.unwrap_or(0) as u32;
                info.scale = row.get_i64(4).unwrap_or(0) as u32;
            }
            _ => {}
        }
        info.default = row
            .get_string(5)
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
                "select c.constraint_name, cc.column_name from user_constraints c \
                 join user_cons_columns cc on cc.constraint_name = c.constraint_name and cc.table_name = c.table_name \
                 where c.constraint_type = 'P' and c.table_name = ? order by cc.position",
                &[SqlValue::from(self.object_name(schema, table))],
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
                "select c.constraint_name, c.table_name, cc.column_name, r.table_name, c.delete_rule \
                 from user_constraints c \
                 join user_cons_columns cc on cc.constraint_name = c.constraint_name and cc.table_name = c.table_name \
                 join user_constraints r on r.constraint_name = c.r_constraint_name \
                 where c.constraint_type = 'R' and c.table_name like ? escape '@' \
                 order by c.constraint_name, cc.position",
                &[SqlValue::from(self.prefix_pattern(schema))],
            )
            .await?;
        let triggers = self.update_rule_triggers(conn).await?;

        let mut result: Vec<DbFkInfo> = Vec::new();
        for row in &rows {
            let name = row.get_string(0).unwrap_or_default();
            if result.last().map_or(true, |fk| fk.name != name) {
                // ON UPDATE exists only as an emulating trigger.
                let update_rule = [FkRule::Cascade, FkRule::SetNull]
                    .into_iter()
                    .find(|rule| {
                        self.update_rule_trigger_name(&name, *rule)
                            .is_some_and(|t| triggers.contains(&t))
                    })
                    .unwrap_or(FkRule::NoAction);
                result.push(DbFkInfo {
                    name,
                    table_name: row.get_string(1).unwrap_or_default(),
                    ref_grain: String::new(),
                    ref_table: row.get_string(3).unwrap_or_default(),
                    columns: Vec::new(),
                    update_rule,
                    delete_rule: FkRule::from_catalog(&row.get_string(4).unwrap_or_default()),
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
                "select i.table_name, i.index_name, ic.column_name from user_indexes i \
                 join user_ind_columns ic on ic.index_name = i.index_name \
                 where i.uniqueness = 'NONUNIQUE' and i.table_name like ? escape '@' \
                 order by i.table_name, i.index_name, ic.column_position",
                &[SqlValue::from(self.prefix_pattern(schema))],
            )
            .await?;

        let prefix = format!("{}_", schema);
        let mut out: BTreeMap<String, DbIndexInfo> = BTreeMap::new();
        for row in &rows {
            let table_name = row.get_string(0).unwrap_or_default();
            let index_name = row.get_string(1).unwrap_or_default();
            let key = if index_name.starts_with(&prefix) {
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
                "select trigger_name from user_triggers where table_name = ?",
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
                "select trigger_body from user_triggers where table_name = ? and trigger_name = ?",
                &[SqlValue::from(self.object_name(schema, table)), SqlValue::from(trigger)],
            )
            .await?;
        Ok(rows.first().and_then(|r| r.get_string(0)))
    }

    async fn sequence_exists(&self, conn: &mut dyn Connection, schema: &str, name: &str) -> Result<bool> {
        conn.query_exists(
            "select 1 from user_sequences where sequence_name = ?",
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
                "select increment_by, min_value, max_value, cycle_flag from user_sequences \
                 where sequence_name = ?",
                &[SqlValue::from(self.object_name(schema, name))],
            )
            .await?;
        Ok(rows.first().map(|r| DbSequenceInfo {
            increment_by: r.get_i64(0).unwrap_or(1),
            min_value: r.get_i64(1).unwrap_or(1),
            // Oracle's default maxvalue (28 nines) does not fit an i64.
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
        let sql = format!("select {}.nextval from dual", self.sequence_string(schema, name));
        conn.query_i64(&sql, &[])
            .await?
            .ok_or_else(|| MigrateError::InvalidArgument(format!("sequence {}.{} returned no value", schema, name)))
    }

    async fn view_list(&self, conn: &mut dyn Connection, schema: &str) -> Result<Vec<String>> {
        self.prefixed_names(
            conn,
            "select view_name from user_views where view_name like ? escape '@' order by view_name",
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
            "select object_name from user_objects where object_type = 'FUNCTION' \
             and object_name like ? escape '@' order by object_name",
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
        assert_eq!(kind_of_type("NUMBER", None), Some(ColumnKind::Integer));
        assert_eq!(kind_of_type("NUMBER", Some(10)), Some(ColumnKind::Decimal));
        assert_eq!(kind_of_type("NVARCHAR2", None), Some(ColumnKind::String));
        assert_eq!(kind_of_type("TIMESTAMP(6)", None), Some(ColumnKind::DateTime));
        assert_eq!(
            kind_of_type("TIMESTAMP(6) WITH TIME ZONE", None),
            Some(ColumnKind::ZonedDateTime)
        );
        assert_eq!(kind_of_type("FLOAT", Some(63)), Some(ColumnKind::Floating));
        assert_eq!(kind_of_type("XMLTYPE", None), None);
    }

    #[test]
    fn test_boolean_columns_from_checks() {
        let checks = ["\"paid\" in (0, 1)", "\"qty\" > 0", "\"open\"IN(0,1)"];
        let found = boolean_columns(checks.iter().copied());
        assert!(found.contains("paid"));
        assert!(found.contains("open"));
        assert!(!found.contains("qty"));
    }

    #[test]
    fn test_wired_sequence() {
        let body = "begin\n  select \"shop_orders_seq\".nextval into :new.\"id\" from dual;\nend;";
        assert_eq!(wired_sequence(body).as_deref(), Some("shop_orders_seq"));
        assert_eq!(wired_sequence("begin null; end;"), None);
    }

    #[test]
    fn test_prefix_pattern_escapes_underscores() {
        let d = OracleDialect::new();
        assert_eq!(d.prefix_pattern("my_shop"), "my@_shop@_%");
        assert_eq!(d.strip_prefix("shop", "shop_orders"), "orders");
    }
}
