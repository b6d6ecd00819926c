//! SQL Server catalog introspection over `sys.*` views.
//!
//! Numbers are cast to `bigint` and names to `nvarchar` in every query, so
//! rows convert through the narrow value set the session produces.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use super::dialect::{MssqlDialect, IDENTITY_DEFAULT};
use crate::core::identifier::validate_identifier;
use crate::core::meta::{
    DbColumnInfo, DbFkInfo, DbIndexInfo, DbPkInfo, DbSequenceInfo, FOREIGN_INDEX_MARKER,
};
use crate::core::schema::{ColumnKind, FkRule};
use crate::core::traits::{CatalogReader, Connection};
use crate::core::value::{Row, SqlValue};
use crate::dialect::Dialect;
use crate::error::{MigrateError, Result};

/// Column kind of a `sys.types` name.
pub(super) fn kind_of_type(type_name: &str) -> Option<ColumnKind> {
    Some(match type_name {
        "int" | "bigint" | "smallint" | "tinyint" => ColumnKind::Integer,
        "nvarchar" | "varchar" | "nchar" | "char" | "ntext" | "text" => ColumnKind::String,
        "bit" => ColumnKind::Boolean,
        "float" | "real" => ColumnKind::Floating,
        "decimal" | "numeric" | "money" => ColumnKind::Decimal,
        "varbinary" | "binary" | "image" => ColumnKind::Binary,
        "datetime" | "datetime2" | "smalldatetime" | "date" => ColumnKind::DateTime,
        "datetimeoffset" => ColumnKind::ZonedDateTime,
        _ => return None,
    })
}

/// A default drawing from the table's own `<table>_seq` sequence stands for
/// an identity that was added to a column already holding rows.
fn identity_from_sequence(table: &str, default: Option<String>) -> Option<String> {
    match default {
        Some(d) if d == format!("NEXTVAL({}_seq)", table) => Some(IDENTITY_DEFAULT.to_string()),
        other => other,
    }
}

fn names(rows: &[Row]) -> Vec<String> {
    rows.iter().filter_map(|r| r.get_string(0)).collect()
}

#[async_trait]
impl CatalogReader for MssqlDialect {
    async fn schema_exists(&self, conn: &mut dyn Connection, schema: &str) -> Result<bool> {
        conn.query_exists(
            "select 1 from sys.schemas where name = @P1",
            &[SqlValue::from(schema)],
        )
        .await
    }

    async fn table_exists(&self, conn: &mut dyn Connection, schema: &str, table: &str) -> Result<bool> {
        conn.query_exists(
            "select 1 from sys.tables t join sys.schemas s on s.schema_id = t.schema_id \
             where s.name = @P1 and t.name = @P2",
            &[SqlValue::from(schema), SqlValue::from(table)],
        )
        .await
    }

    async fn user_tables_exist(&self, conn: &mut dyn Connection, sys_schema: &str) -> Result<bool> {
        conn.query_exists(
            "select 1 from sys.tables t join sys.schemas s on s.schema_id = t.schema_id \
             where t.is_ms_shipped = 0 and s.name not in ('sys', @P1)",
            &[SqlValue::from(sys_schema)],
        )
        .await
    }

    async fn table_list(&self, conn: &mut dyn Connection, schema: &str) -> Result<Vec<String>> {
        let rows = conn
            .query(
                "select cast(t.name as nvarchar(128)) from sys.tables t \
                 join sys.schemas s on s.schema_id = t.schema_id \
                 where s.name = @P1 order by t.name",
                &[SqlValue::from(schema)],
            )
            .await?;
        Ok(names(&rows))
    }

    async fn column_names(&self, conn: &mut dyn Connection, schema: &str, table: &str) -> Result<Vec<String>> {
        let rows = conn
            .query(
                "select cast(c.name as nvarchar(128)) from sys.columns c \
                 where c.object_id = object_id(quotename(@P1) + '.' + quotename(@P2)) \
                 order by c.column_id",
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
                "select cast(ty.name as nvarchar(128)), \
                        cast(c.max_length as bigint), \
                        cast(c.precision as bigint), \
                        cast(c.scale as bigint), \
                        cast(c.is_nullable as bigint), \
                        cast(c.is_identity as bigint), \
                        cast(d.definition as nvarchar(max)) \
                 from sys.columns c \
                 join sys.types ty on ty.user_type_id = c.user_type_id \
                 left join sys.default_constraints d on d.object_id = c.default_object_id \
                 where c.object_id = object_id(quotename(@P1) + '.' + quotename(@P2)) and c.name = @P3",
                &[SqlValue::from(schema), SqlValue::from(table), SqlValue::from(column)],
            )
            .await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };

        let type_name = row.get_string(0).unwrap_or_default();
        let kind = kind_of_type(&type_name)
            .ok_or_else(|| MigrateError::Schema(format!("unsupported column type {:?}", type_name)))?;
        let mut info = DbColumnInfo::new(column, kind);
        match kind {
            ColumnKind::String => {
                let bytes = row.get_i64(1).unwrap_or(0);
                if bytes == -1 || matches!(type_name.as_str(), "ntext" | "text") {
                    info.max = true;
                } else if type_name.starts_with('n') {
                    // max_length counts bytes; national types store two per char.
                    info.length = (bytes / 2) as u32;
                } else {
                    info.length = bytes as u32;
                }
            }
            ColumnKind::Decimal => {
                info.precision = row.get_i64(2).unwrap_or(0) as u32;
                info.scale = row.get_i64(3).unwrap_or(0) as u32;
            }
            _ => {}
        }
        info.nullable = row.get_bool(4);
        info.default = if row.get_bool(5) {
            Some(IDENTITY_DEFAULT.to_string())
        } else {
            identity_from_sequence(
                table,
                row.get_string(6)
                    .and_then(|raw| self.normalize_stored_default(kind, &raw)),
            )
        };
        Ok(Some(info))
    }

    async fn pk_info(&self, conn: &mut dyn Connection, schema: &str, table: &str) -> Result<DbPkInfo> {
        let rows = conn
            .query(
                "select cast(k.name as nvarchar(128)), cast(c.name as nvarchar(128)) \
                 from sys.key_constraints k \
                 join sys.index_columns ic on ic.object_id = k.parent_object_id and ic.index_id = k.unique_index_id \
                 join sys.columns c on c.object_id = ic.object_id and c.column_id = ic.column_id \
                 where k.type = 'PK' and k.parent_object_id = object_id(quotename(@P1) + '.' + quotename(@P2)) \
                 order by ic.key_ordinal",
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
                "select cast(f.name as nvarchar(128)), cast(t.name as nvarchar(128)), cast(c.name as nvarchar(128)), \
                        cast(rs.name as nvarchar(128)), cast(rt.name as nvarchar(128)), \
                        cast(f.update_referential_action_desc as nvarchar(60)), \
                        cast(f.delete_referential_action_desc as nvarchar(60)) \
                 from sys.foreign_keys f \
                 join sys.foreign_key_columns fc on fc.constraint_object_id = f.object_id \
                 join sys.tables t on t.object_id = f.parent_object_id \
                 join sys.schemas s on s.schema_id = t.schema_id \
                 join sys.columns c on c.object_id = fc.parent_object_id and c.column_id = fc.parent_column_id \
                 join sys.tables rt on rt.object_id = f.referenced_object_id \
                 join sys.schemas rs on rs.schema_id = rt.schema_id \
                 where s.name = @P1 \
                 order by f.name, fc.constraint_column_id",
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
                "select cast(t.name as nvarchar(128)), cast(i.name as nvarchar(128)), \
                        cast(c.name as nvarchar(128)), cast(i.is_unique as bigint) \
                 from sys.indexes i \
                 join sys.tables t on t.object_id = i.object_id \
                 join sys.schemas s on s.schema_id = t.schema_id \
                 join sys.index_columns ic on ic.object_id = i.object_id and ic.index_id = i.index_id \
                 join sys.columns c on c.object_id = ic.object_id and c.column_id = ic.column_id \
                 where s.name = @P1 and i.type > 0 and i.is_primary_key = 0 \
                   and i.is_unique_constraint = 0 and ic.is_included_column = 0 \
                 order by t.name, i.name, ic.key_ordinal",
                &[SqlValue::from(schema)],
            )
            .await?;

        let mut out: BTreeMap<String, DbIndexInfo> = BTreeMap::new();
        for row in &rows {
            let table_name = row.get_string(0).unwrap_or_default();
            let index_name = row.get_string(1).unwrap_or_default();
            // Unique indices are never generated here.
            let key = if validate_identifier(&index_name).is_ok() && !row.get_bool(3) {
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
                "select cast(tr.name as nvarchar(128)) from sys.triggers tr \
                 where tr.parent_id = object_id(quotename(@P1) + '.' + quotename(@P2))",
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
                "select cast(object_definition(tr.object_id) as nvarchar(max)) from sys.triggers tr \
                 where tr.parent_id = object_id(quotename(@P1) + '.' + quotename(@P2)) and tr.name = @P3",
                &[SqlValue::from(schema), SqlValue::from(table), SqlValue::from(trigger)],
            )
            .await?;
        Ok(rows.first().and_then(|r| r.get_string(0)))
    }

    async fn sequence_exists(&self, conn: &mut dyn Connection, schema: &str, name: &str) -> Result<bool> {
        conn.query_exists(
            "select 1 from sys.sequences q join sys.schemas s on s.schema_id = q.schema_id \
             where s.name = @P1 and q.name = @P2",
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
                "select cast(q.increment as bigint), cast(q.minimum_value as bigint), \
                        cast(q.maximum_value as bigint), cast(q.is_cycling as bigint) \
                 from sys.sequences q join sys.schemas s on s.schema_id = q.schema_id \
                 where s.name = @P1 and q.name = @P2",
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
        let sql = format!(
            "select cast(next value for {} as bigint)",
            self.sequence_string(schema, name)
        );
        conn.query_i64(&sql, &[])
            .await?
            .ok_or_else(|| MigrateError::InvalidArgument(format!("sequence {}.{} returned no value", schema, name)))
    }

    async fn view_list(&self, conn: &mut dyn Connection, schema: &str) -> Result<Vec<String>> {
        let rows = conn
            .query(
                "select cast(v.name as nvarchar(128)) from sys.views v \
                 join sys.schemas s on s.schema_id = v.schema_id \
                 where s.name = @P1 order by v.name",
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
                "select cast(o.name as nvarchar(128)) from sys.objects o \
                 join sys.schemas s on s.schema_id = o.schema_id \
                 where s.name = @P1 and o.type in ('IF', 'TF') order by o.name",
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
    fn test_kind_of_type() {
        assert_eq!(kind_of_type("int"), Some(ColumnKind::Integer));
        assert_eq!(kind_of_type("nvarchar"), Some(ColumnKind::String));
        assert_eq!(kind_of_type("bit"), Some(ColumnKind::Boolean));
        assert_eq!(kind_of_type("datetimeoffset"), Some(ColumnKind::ZonedDateTime));
        assert_eq!(kind_of_type("xml"), None);
    }

    #[test]
    fn test_own_sequence_default_reads_as_identity() {
        assert_eq!(
            identity_from_sequence("orders", Some("NEXTVAL(orders_seq)".into())).as_deref(),
            Some(IDENTITY_DEFAULT)
        );
        assert_eq!(
            identity_from_sequence("orders", Some("NEXTVAL(invoice_seq)".into())).as_deref(),
            Some("NEXTVAL(invoice_seq)")
        );
        assert_eq!(identity_from_sequence("orders", None), None);
    }
}
