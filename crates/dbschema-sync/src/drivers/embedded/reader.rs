//! Embedded (SQLite) catalog introspection.
//!
//! Everything comes from `sqlite_master` and the table-valued pragma
//! functions. SQLite keeps no constraint names of its own, so primary and
//! foreign key names are recovered from the stored CREATE TABLE text.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use super::dialect::{EmbeddedDialect, NOT_NULL_MARKER};
use crate::core::meta::{
    DbColumnInfo, DbFkInfo, DbIndexInfo, DbPkInfo, DbSequenceInfo, FOREIGN_INDEX_MARKER,
};
use crate::core::schema::{ColumnKind, FkRule};
use crate::core::traits::{CatalogReader, Connection};
use crate::core::value::SqlValue;
use crate::dialect::Dialect;
use crate::error::{MigrateError, Result};

static TYPE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([a-z ]+?)\s*(?:\(\s*(\d+)\s*(?:,\s*(\d+)\s*)?\))?\s*$").expect("valid regex")
});

static PK_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)constraint\s+"((?:[^"]|"")+)"\s+primary\s+key"#).expect("valid regex")
});

static FK_CLAUSE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)constraint\s+"((?:[^"]|"")+)"\s+foreign\s+key\s*\(([^)]*)\)\s*references\s+"((?:[^"]|"")+)""#)
        .expect("valid regex")
});

static SEQUENCE_REF_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""grainid" = '((?:[^']|'')*)' and "seqname" = '((?:[^']|'')*)'"#).expect("valid regex")
});

/// Map a declared column type to its kind, length, precision and scale.
pub(super) fn parse_declared_type(declared: &str) -> Option<DbColumnInfo> {
    let lower = declared.to_ascii_lowercase();
    let caps = TYPE_REGEX.captures(&lower)?;
    let base = caps.get(1)?.as_str();
    let first = caps.get(2).and_then(|m| m.as_str().parse::<u32>().ok());
    let second = caps.get(3).and_then(|m| m.as_str().parse::<u32>().ok());

    let mut info = DbColumnInfo::new("", ColumnKind::Integer);
    match base {
        "int" | "integer" | "bigint" => {}
        "varchar" | "nvarchar" | "char" => {
            info.kind = ColumnKind::String;
            info.length = first.unwrap_or(0);
        }
        "text" | "clob" => {
            info.kind = ColumnKind::String;
            info.max = true;
        }
        "boolean" => info.kind = ColumnKind::Boolean,
        "real" | "double" | "float" => info.kind = ColumnKind::Floating,
        "decimal" | "numeric" => {
            info.kind = ColumnKind::Decimal;
            info.precision = first.unwrap_or(0);
            info.scale = second.unwrap_or(0);
        }
        "blob" => info.kind = ColumnKind::Binary,
        "timestamp" | "datetime" => info.kind = ColumnKind::DateTime,
        "timestamp with time zone" => info.kind = ColumnKind::ZonedDateTime,
        _ => return None,
    }
    Some(info)
}

fn unquote_sql(text: &str, quote: char) -> String {
    let doubled: String = [quote, quote].iter().collect();
    text.replace(&doubled, &quote.to_string())
}

/// `(grain, sequence)` read by a sequence-wiring trigger.
pub(super) fn wired_sequence(body: &str) -> Option<(String, String)> {
    let caps = SEQUENCE_REF_REGEX.captures(body)?;
    Some((
        unquote_sql(caps.get(1)?.as_str(), '\''),
        unquote_sql(caps.get(2)?.as_str(), '\''),
    ))
}

/// `(name, columns, referenced table)` of every named FK clause in a CREATE TABLE.
fn fk_clauses(create_sql: &str) -> Vec<(String, Vec<String>, String)> {
    FK_CLAUSE_REGEX
        .captures_iter(create_sql)
        .map(|caps| {
            let columns = caps[2]
                .split(',')
                .map(|c| unquote_sql(c.trim().trim_matches('"'), '"'))
                .collect();
            (unquote_sql(&caps[1], '"'), columns, unquote_sql(&caps[3], '"'))
        })
        .collect()
}

impl EmbeddedDialect {
    /// `LIKE` pattern matching the grain's objects, with `\` as escape.
    fn prefix_pattern(&self, schema: &str) -> String {
        format!("{}\\_%", schema.replace('\\', "\\\\").replace('_', "\\_").replace('%', "\\%"))
    }

    fn strip_prefix<'a>(&self, schema: &str, name: &'a str) -> &'a str {
        name.strip_prefix(&format!("{}_", schema)).unwrap_or(name)
    }

    async fn master_names(
        &self,
        conn: &mut dyn Connection,
        kind: &str,
        schema: &str,
    ) -> Result<Vec<String>> {
        let rows = conn
            .query(
                "select name from sqlite_master where type = ? and name like ? escape '\\' order by name",
                &[SqlValue::from(kind), SqlValue::from(self.prefix_pattern(schema))],
            )
            .await?;
        Ok(rows
            .iter()
            .filter_map(|r| r.get_string(0))
            .filter(|n| !n.ends_with("__new"))
            .map(|n| self.strip_prefix(schema, &n).to_string())
            .collect())
    }

    async fn create_sql(&self, conn: &mut dyn Connection, stored: &str) -> Result<Option<String>> {
        let rows = conn
            .query(
                "select sql from sqlite_master where type = 'table' and name = ?",
                &[SqlValue::from(stored)],
            )
            .await?;
        Ok(rows.first().and_then(|r| r.get_string(0)))
    }
}

#[async_trait]
impl CatalogReader for EmbeddedDialect {
    async fn schema_exists(&self, _conn: &mut dyn Connection, _schema: &str) -> Result<bool> {
        Ok(true)
    }

    async fn table_exists(&self, conn: &mut dyn Connection, schema: &str, table: &str) -> Result<bool> {
        conn.query_exists(
            "select 1 from sqlite_master where type = 'table' and name = ?",
            &[SqlValue::from(self.object_name(schema, table))],
        )
        .await
    }

    async fn user_tables_exist(&self, conn: &mut dyn Connection, sys_schema: &str) -> Result<bool> {
        conn.query_exists(
            "select 1 from sqlite_master where type = 'table' and name not like 'sqlite\\_%' escape '\\' \
             and name not like ? escape '\\'",
            &[SqlValue::from(self.prefix_pattern(sys_schema))],
        )
        .await
    }

    async fn table_list(&self, conn: &mut dyn Connection, schema: &str) -> Result<Vec<String>> {
        self.master_names(conn, "table", schema).await
    }

    async fn column_names(&self, conn: &mut dyn Connection, schema: &str, table: &str) -> Result<Vec<String>> {
        let rows = conn
            .query(
                "select name from pragma_table_info(?) order by cid",
                &[SqlValue::from(self.object_name(schema, table))],
            )
            .await?;
        Ok(rows.iter().filter_map(|r| r.get_string(0)).collect())
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
                "select type, \"notnull\", dflt_value from pragma_table_info(?) where name = ?",
                &[SqlValue::from(self.object_name(schema, table)), SqlValue::from(column)],
            )
            .await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };

        let declared = row.get_string(0).unwrap_or_default();
        let mut info = parse_declared_type(&declared).ok_or_else(|| {
            MigrateError::Schema(format!("unsupported column type {:?}", declared))
        })?;
        info.name = column.to_string();
        info.nullable = !row.get_bool(1);
        info.default = row
            .get_string(2)
            .and_then(|raw| self.normalize_stored_default(info.kind, &raw));

        if info.kind == ColumnKind::Integer {
            let trigger = self.sequence_trigger_name(schema, table, column);
            if let Some(body) = self.trigger_body(conn, schema, table, &trigger).await? {
                if let Some((grain, seq)) = wired_sequence(&body) {
                    info.default = Some(format!("NEXTVAL({})", self.object_name(&grain, &seq)));
                    info.nullable = !body.contains(NOT_NULL_MARKER);
                }
            }
        }
        Ok(Some(info))
    }

    async fn pk_info(&self, conn: &mut dyn Connection, schema: &str, table: &str) -> Result<DbPkInfo> {
        let stored = self.object_name(schema, table);
        let rows = conn
            .query(
                "select name from pragma_table_info(?) where pk > 0 order by pk",
                &[SqlValue::from(stored.as_str())],
            )
            .await?;
        let columns: Vec<String> = rows.iter().filter_map(|r| r.get_string(0)).collect();
        if columns.is_empty() {
            return Ok(DbPkInfo::default());
        }
        let name = self
            .create_sql(conn, &stored)
            .await?
            .and_then(|sql| PK_NAME_REGEX.captures(&sql).map(|c| unquote_sql(&c[1], '"')))
            .unwrap_or_default();
        Ok(DbPkInfo { name, columns })
    }

    async fn fk_info(&self, conn: &mut dyn Connection, schema: &str) -> Result<Vec<DbFkInfo>> {
        let rows = conn
            .query(
                "select m.name, f.id, f.\"table\", f.\"from\", f.on_update, f.on_delete, m.sql \
                 from sqlite_master m join pragma_foreign_key_list(m.name) f \
                 where m.type = 'table' and m.name like ? escape '\\' \
                 order by m.name, f.id, f.seq",
                &[SqlValue::from(self.prefix_pattern(schema))],
            )
            .await?;

        let mut grouped: BTreeMap<(String, i64), (DbFkInfo, String)> = BTreeMap::new();
        for row in &rows {
            let table_name = row.get_string(0).unwrap_or_default();
            let id = row.get_i64(1).unwrap_or(0);
            let entry = grouped.entry((table_name.clone(), id)).or_insert_with(|| {
                (
                    DbFkInfo {
                        name: String::new(),
                        table_name,
                        ref_grain: String::new(),
                        ref_table: row.get_string(2).unwrap_or_default(),
                        columns: Vec::new(),
                        update_rule: FkRule::from_catalog(&row.get_string(4).unwrap_or_default()),
                        delete_rule: FkRule::from_catalog(&row.get_string(5).unwrap_or_default()),
                    },
                    row.get_string(6).unwrap_or_default(),
                )
            });
            if let Some(col) = row.get_string(3) {
                entry.0.columns.push(col);
            }
        }

        Ok(grouped
            .into_values()
            .map(|(mut fk, create_sql)| {
                fk.name = fk_clauses(&create_sql)
                    .into_iter()
                    .find(|(_, cols, target)| cols == &fk.columns && target == &fk.ref_table)
                    .map(|(name, _, _)| name)
                    .unwrap_or_default();
                fk
            })
            .collect())
    }

    async fn indices(
        &self,
        conn: &mut dyn Connection,
        schema: &str,
    ) -> Result<BTreeMap<String, DbIndexInfo>> {
        let rows = conn
            .query(
                "select m.name, il.name, ii.name \
                 from sqlite_master m join pragma_index_list(m.name) il join pragma_index_info(il.name) ii \
                 where m.type = 'table' and m.name like ? escape '\\' and il.origin = 'c' \
                 order by m.name, il.name, ii.seqno",
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
                "select name from sqlite_master where type = 'trigger' and tbl_name = ?",
                &[SqlValue::from(self.object_name(schema, table))],
            )
            .await?;
        Ok(rows.iter().filter_map(|r| r.get_string(0)).collect())
    }

    async fn trigger_body(
        &self,
        conn: &mut dyn Connection,
        _schema: &str,
        _table: &str,
        trigger: &str,
    ) -> Result<Option<String>> {
        let rows = conn
            .query(
                "select sql from sqlite_master where type = 'trigger' and name = ?",
                &[SqlValue::from(trigger)],
            )
            .await?;
        Ok(rows.first().and_then(|r| r.get_string(0)))
    }

    async fn sequence_exists(&self, conn: &mut dyn Connection, schema: &str, name: &str) -> Result<bool> {
        conn.query_exists(
            &format!(
                "select 1 from {} where \"grainid\" = ? and \"seqname\" = ?",
                self.sequences_table()
            ),
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
                &format!(
                    "select \"incrementby\", \"minvalue\", \"maxvalue\", \"cycle\" from {} \
                     where \"grainid\" = ? and \"seqname\" = ?",
                    self.sequences_table()
                ),
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
        conn.query_i64(&self.advance_sequence_sql(schema, name, true), &[])
            .await?
            .ok_or_else(|| {
                MigrateError::InvalidArgument(format!("sequence {}.{} does not exist", schema, name))
            })
    }

    async fn view_list(&self, conn: &mut dyn Connection, schema: &str) -> Result<Vec<String>> {
        self.master_names(conn, "view", schema).await
    }

    async fn parameterized_view_list(
        &self,
        _conn: &mut dyn Connection,
        _schema: &str,
    ) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_declared_type() {
        let s = parse_declared_type("varchar(20)").unwrap();
        assert_eq!((s.kind, s.length), (ColumnKind::String, 20));
        let d = parse_declared_type("DECIMAL(10, 2)").unwrap();
        assert_eq!((d.kind, d.precision, d.scale), (ColumnKind::Decimal, 10, 2));
        assert!(parse_declared_type("text").unwrap().max);
        assert_eq!(
            parse_declared_type("timestamp with time zone").unwrap().kind,
            ColumnKind::ZonedDateTime
        );
        assert_eq!(parse_declared_type("int").unwrap().kind, ColumnKind::Integer);
        assert!(parse_declared_type("geometry").is_none());
    }

    #[test]
    fn test_wired_sequence_from_trigger_body() {
        let d = EmbeddedDialect::new("dbschema");
        let table = crate::core::schema::Table::new("shop", "orders")
            .with_column(crate::core::schema::Column::new("id", ColumnKind::Integer).identity())
            .with_pk(&["id"]);
        let body = d.auto_increment(&table, false).pop().unwrap();
        assert_eq!(
            wired_sequence(&body),
            Some(("shop".to_string(), "orders_seq".to_string()))
        );
    }

    #[test]
    fn test_fk_clauses_from_create_sql() {
        let sql = "create table \"shop_orders\" (\n  \"c\" int null,\n  constraint \"pk_orders\" primary key (\"id\"),\n  \
                   constraint \"fk_orders_c\" foreign key (\"c\", \"d\") references \"crm_customer\" on update cascade on delete no action\n)";
        assert_eq!(
            fk_clauses(sql),
            vec![(
                "fk_orders_c".to_string(),
                vec!["c".to_string(), "d".to_string()],
                "crm_customer".to_string()
            )]
        );
        assert_eq!(&PK_NAME_REGEX.captures(sql).unwrap()[1], "pk_orders");
    }

    #[test]
    fn test_prefix_pattern_escapes_wildcards() {
        let d = EmbeddedDialect::new("dbschema");
        assert_eq!(d.prefix_pattern("my_grain"), "my\\_grain\\_%");
        assert_eq!(d.strip_prefix("shop", "shop_orders"), "orders");
    }
}
