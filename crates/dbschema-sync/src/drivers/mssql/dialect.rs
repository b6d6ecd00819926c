//! SQL Server statement renderer.
//!
//! Grains are native schemas. Identity columns use `IDENTITY(1,1)`; every
//! other default is a named `def_<table>_<column>` constraint so it can be
//! dropped before the column is altered. Identity switched on for an existing
//! column draws from `<table>_seq` through that default instead, since
//! `IDENTITY` cannot be added in place. Triggers are statement-level, so
//! materialized views are maintained set-wise from `inserted`/`deleted` with
//! `MERGE` under an exclusive table lock.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::identifier::{quote_literal, RECVERSION};
use crate::core::meta::{DbColumnInfo, DbIndexInfo};
use crate::core::schema::{
    AggregateFn, Column, ColumnKind, DefaultValue, MaterializedView, ParameterizedView, Table,
    SURROGATE_COUNT,
};
use crate::dialect::{
    canonical_binary, canonical_bool, canonical_date, check_navigation, check_paging, mview,
    order_part, strip_parens, view, where_part, DbType, Dialect, FromClause, TriggerEvent,
};
use crate::error::Result;

/// Canonical default reported for `IDENTITY` columns.
pub const IDENTITY_DEFAULT: &str = "IDENTITY";

static NEXT_VALUE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^next\s+value\s+for\s+(?:[\["]?[^\]".]+[\]"]?\.)?[\["]?([^\]"]+)[\]"]?$"#)
        .expect("valid regex")
});

/// SQL Server dialect.
#[derive(Debug, Clone, Default)]
pub struct MssqlDialect;

impl MssqlDialect {
    pub fn new() -> Self {
        Self
    }

    /// Name of the default constraint of a column.
    pub fn default_constraint_name(&self, table: &str, column: &str) -> String {
        self.limit_name(&format!("def_{}_{}", table, column))
    }

    /// Replace a native `IDENTITY` column by a plain copy of itself: add a
    /// scratch column, copy, drop the original and rename the copy. Keys and
    /// indices over the column are dropped by the caller beforehand.
    fn strip_identity(&self, table: &Table, col: &Column) -> String {
        let target = self.table_string(&table.schema, &table.name);
        let scratch = self.limit_name(&format!("{}_tmp", col.name));
        let escaped = |sql: String| sql.replace('\'', "''");
        format!(
            "if columnproperty(object_id({}), {}, 'IsIdentity') = 1\n\
             begin\n  \
             exec('{}');\n  \
             exec('{}');\n  \
             exec('{}');\n  \
             exec sp_rename {}, {}, 'COLUMN';\n\
             end",
            quote_literal(&target),
            quote_literal(&col.name),
            escaped(format!("alter table {} add {} {} null", target, self.quote(&scratch), self.column_type(col))),
            escaped(format!("update {} set {} = {}", target, self.quote(&scratch), self.quote(&col.name))),
            escaped(format!("alter table {} drop column {}", target, self.quote(&col.name))),
            quote_literal(&format!("{}.{}.{}", table.schema, table.name, scratch)),
            quote_literal(&col.name)
        )
    }

    /// Identity for a column that already holds rows: values come from the
    /// `<table>_seq` sequence through a default constraint, since existing
    /// rows cannot be copied into a native `IDENTITY` column. With `create`
    /// the sequence is created when missing and restarted past the column's
    /// largest value.
    fn sequence_identity(&self, table: &Table, col: &Column, create: bool) -> Vec<String> {
        let target = self.table_string(&table.schema, &table.name);
        let seq = self.sequence_string(&table.schema, &table.identity_sequence_name());
        let column = self.quote(&col.name);
        let mut sql = Vec::new();
        if create {
            sql.push(format!(
                "if object_id({}, 'SO') is null exec('create sequence {} as bigint start with 1')",
                quote_literal(&seq),
                seq.replace('\'', "''")
            ));
            sql.push(format!(
                "declare @next bigint; \
                 select @next = coalesce(max({}), 0) + 1 from {}; \
                 exec('alter sequence {} restart with ' + cast(@next as nvarchar(20)))",
                column,
                target,
                seq.replace('\'', "''")
            ));
        }
        sql.push(format!(
            "if columnproperty(object_id({}), {}, 'IsIdentity') = 0 \
             alter table {} add constraint {} default next value for {} for {}",
            quote_literal(&target),
            quote_literal(&col.name),
            target,
            self.quote(&self.default_constraint_name(&table.name, &col.name)),
            seq,
            column
        ));
        sql
    }

    /// Default expression without the `default` keyword.
    fn default_expression(&self, table: &Table, col: &Column) -> Option<String> {
        if col.identity {
            return None;
        }
        if let Some(seq) = &col.sequence {
            return Some(format!("next value for {}", self.sequence_string(&table.schema, seq)));
        }
        col.default.as_ref().map(|d| self.literal(d))
    }

    /// Declared type of a parameterized-view argument.
    fn param_type(&self, kind: ColumnKind) -> &'static str {
        match kind {
            ColumnKind::String => "nvarchar(max)",
            ColumnKind::Decimal => "decimal(38, 10)",
            other => self.type_name(other),
        }
    }

    /// `left."k1" = right."k1" and ...` over the primary key.
    fn pk_join(&self, table: &Table, left: &str, right: &str) -> String {
        table
            .primary_key
            .iter()
            .map(|k| format!("{}.{} = {}.{}", left, self.quote(k), right, self.quote(k)))
            .collect::<Vec<_>>()
            .join(" and ")
    }

    /// Version check and increment run inside `<table>_upd`.
    fn versioning_block(&self, table: &Table) -> String {
        let target = self.table_string(&table.schema, &table.name);
        let version = self.quote(RECVERSION);
        format!(
            "  if exists (select * from inserted join deleted on {} where inserted.{v} <> deleted.{v})\n    \
             throw 51000, 'record version check failure', 1;\n  \
             update {t} set {v} = {v} + 1 where exists (select * from inserted where {});\n",
            self.pk_join(table, "inserted", "deleted"),
            self.pk_join(table, "inserted", &target),
            t = target,
            v = version
        )
    }

    /// Header of the shared update trigger.
    fn update_trigger_head(&self, table: &Table) -> String {
        format!(
            "create trigger {} on {} for update as begin\n  set nocount on;\n",
            self.trigger_string(&table.schema, &self.versioning_trigger_name(table)),
            self.table_string(&table.schema, &table.name)
        )
    }

    fn trigger_string(&self, schema: &str, name: &str) -> String {
        format!("{}.{}", self.quote(schema), self.quote(name))
    }

    /// `merge` folding the grouped rows of `source` (`inserted` or `deleted`)
    /// into the view, adding or subtracting their contribution.
    fn merge_block(&self, mv: &MaterializedView, base: &Table, source: &str, adding: bool) -> String {
        let target = self.table_string(&mv.schema, &mv.name);
        let groups: Vec<String> = mv
            .group_by
            .iter()
            .map(|g| mview::group_value(self, base, g, ""))
            .collect();

        let mut select: Vec<String> = groups
            .iter()
            .zip(&mv.group_by)
            .map(|(expr, g)| format!("{} as {}", expr, self.quote(g)))
            .collect();
        for agg in &mv.aggregates {
            let expr = match (agg.function, &agg.column) {
                (AggregateFn::Sum, Some(c)) => format!("coalesce(sum({}), 0)", self.quote(c)),
                _ => "count(*)".to_string(),
            };
            select.push(format!("{} as {}", expr, self.quote(&agg.alias)));
        }
        select.push(format!("count(*) as {}", self.quote(SURROGATE_COUNT)));

        let on: Vec<String> = mv
            .group_by
            .iter()
            .map(|g| format!("mv.{c} = aggregate.{c}", c = self.quote(g)))
            .collect();
        let op = if adding { "+" } else { "-" };
        let sets: Vec<String> = mv
            .aggregates
            .iter()
            .map(|a| a.alias.as_str())
            .chain(std::iter::once(SURROGATE_COUNT))
            .map(|alias| format!("mv.{c} = mv.{c} {} aggregate.{c}", op, c = self.quote(alias)))
            .collect();

        let mut sql = format!(
            "  merge into {} with (holdlock) as mv\n  using (select {} from {} group by {}) as aggregate\n  on {}\n  \
             when matched then update set {}",
            target,
            select.join(", "),
            source,
            groups.join(", "),
            on.join(" and "),
            sets.join(", ")
        );
        if adding {
            let columns = mview::column_list(self, mv);
            let values: Vec<String> = columns.iter().map(|c| format!("aggregate.{}", c)).collect();
            sql.push_str(&format!(
                "\n  when not matched then insert ({}) values ({});\n",
                columns.join(", "),
                values.join(", ")
            ));
        } else {
            sql.push_str(&format!(
                ";\n  delete from {} where {} = 0;\n",
                target,
                self.quote(SURROGATE_COUNT)
            ));
        }
        sql
    }

    fn lock_statement(&self, mv: &MaterializedView) -> String {
        format!(
            "  select @lock = count(*) from {} with (tablockx, holdlock);\n",
            self.table_string(&mv.schema, &mv.name)
        )
    }
}

impl Dialect for MssqlDialect {
    fn db_type(&self) -> DbType {
        DbType::Mssql
    }

    fn max_identifier_length(&self) -> usize {
        128
    }

    fn param_placeholder(&self, index: usize) -> String {
        format!("@P{}", index)
    }

    fn type_name(&self, kind: ColumnKind) -> &'static str {
        match kind {
            ColumnKind::Integer => "int",
            ColumnKind::String => "nvarchar",
            ColumnKind::Boolean => "bit",
            ColumnKind::Floating => "float",
            ColumnKind::Decimal => "decimal",
            ColumnKind::Binary => "varbinary",
            ColumnKind::DateTime => "datetime",
            ColumnKind::ZonedDateTime => "datetimeoffset",
        }
    }

    fn column_type(&self, col: &Column) -> String {
        match col.kind {
            ColumnKind::String if col.max => "nvarchar(max)".to_string(),
            ColumnKind::String => format!("nvarchar({})", col.length),
            ColumnKind::Decimal => format!("decimal({}, {})", col.precision, col.scale),
            ColumnKind::Binary => "varbinary(max)".to_string(),
            kind => self.type_name(kind).to_string(),
        }
    }

    fn literal(&self, value: &DefaultValue) -> String {
        match value {
            DefaultValue::Boolean(true) => "1".to_string(),
            DefaultValue::Boolean(false) => "0".to_string(),
            DefaultValue::Binary(v) => format!("0x{}", hex::encode_upper(v)),
            DefaultValue::Date(d) => format!("'{}'", d.format("%Y%m%d")),
            DefaultValue::Now => "getdate()".to_string(),
            DefaultValue::Text(v) => format!("N{}", quote_literal(v)),
            DefaultValue::Integer(v) => v.to_string(),
            DefaultValue::Floating(v) => v.to_string(),
            DefaultValue::Decimal(v) => v.to_string(),
        }
    }

    fn sequence_default(&self, schema: &str, sequence: &str) -> Option<String> {
        Some(format!("default next value for {}", self.sequence_string(schema, sequence)))
    }

    fn native_identity(&self) -> bool {
        true
    }

    fn column_definition(&self, table: &Table, col: &Column) -> String {
        let mut def = format!("{} {}", self.quote(&col.name), self.column_type(col));
        if col.identity {
            def.push_str(" identity(1,1)");
        } else if let Some(clause) = self.default_clause(table, col) {
            def.push_str(&format!(
                " constraint {} {}",
                self.quote(&self.default_constraint_name(&table.name, &col.name)),
                clause
            ));
        }
        def.push_str(self.nullability(col.nullable));
        def
    }

    fn normalize_stored_default(&self, kind: ColumnKind, raw: &str) -> Option<String> {
        let text = strip_parens(raw);
        if text.eq_ignore_ascii_case(IDENTITY_DEFAULT) {
            return Some(IDENTITY_DEFAULT.to_string());
        }
        if let Some(caps) = NEXT_VALUE_REGEX.captures(text) {
            return Some(format!("NEXTVAL({})", &caps[1]));
        }
        if text.is_empty() || text.eq_ignore_ascii_case("null") {
            return None;
        }
        let value = match text.strip_prefix('N').or_else(|| text.strip_prefix('n')) {
            Some(rest) if rest.starts_with('\'') => rest,
            _ => text,
        };
        match kind {
            ColumnKind::Boolean => canonical_bool(value),
            ColumnKind::Binary => canonical_binary(value),
            ColumnKind::DateTime | ColumnKind::ZonedDateTime => {
                let lower = value.to_ascii_lowercase();
                if lower == "getdate()" || lower == "current_timestamp" || lower == "sysdatetimeoffset()" {
                    Some("GETDATE()".to_string())
                } else {
                    canonical_date(value)
                }
            }
            ColumnKind::Integer | ColumnKind::Floating => Some(value.trim_matches('\'').to_string()),
            ColumnKind::Decimal => value
                .trim_matches('\'')
                .parse::<rust_decimal::Decimal>()
                .ok()
                .map(|d| d.normalize().to_string()),
            ColumnKind::String => Some(value.to_string()),
        }
    }

    fn limited_select(
        &self,
        from: &FromClause,
        where_clause: &str,
        order_by: &str,
        offset: u64,
        row_count: u64,
        fields: &str,
    ) -> Result<String> {
        check_paging(offset, row_count)?;
        if offset == 0 {
            return Ok(format!(
                "select top {} {} from {}{}{}",
                row_count,
                fields,
                from.expression,
                where_part(where_clause),
                order_part(order_by)
            ));
        }
        // OFFSET requires an ORDER BY.
        let order = if order_by.is_empty() { "(select null)" } else { order_by };
        let mut sql = format!(
            "select {} from {}{} order by {} offset {} rows",
            fields,
            from.expression,
            where_part(where_clause),
            order,
            offset
        );
        if row_count > 0 {
            sql.push_str(&format!(" fetch next {} rows only", row_count));
        }
        Ok(sql)
    }

    fn navigation_select(
        &self,
        from: &FromClause,
        order_by: &str,
        position_predicate: &str,
        offset: u64,
        fields: &str,
    ) -> Result<String> {
        check_navigation(position_predicate)?;
        if offset <= 1 {
            return Ok(format!(
                "select top 1 {} from {}{}{}",
                fields,
                from.expression,
                where_part(position_predicate),
                order_part(order_by)
            ));
        }
        let order = if order_by.is_empty() { "(select null)" } else { order_by };
        Ok(format!(
            "select {} from {}{} order by {} offset {} rows fetch next 1 rows only",
            fields,
            from.expression,
            where_part(position_predicate),
            order,
            offset - 1
        ))
    }

    fn trunc_date(&self, expr: &str) -> String {
        format!("cast(floor(cast({} as float)) as datetime)", expr)
    }

    fn update_column(
        &self,
        table: &Table,
        col: &Column,
        actual: &DbColumnInfo,
        _current: &[String],
    ) -> Result<Vec<String>> {
        let stored_identity = actual.default.as_deref() == Some(IDENTITY_DEFAULT);
        let target = self.table_string(&table.schema, &table.name);
        let mut sql = Vec::new();
        if actual.default.is_some() {
            // Whatever its name, the stored default constraint blocks the alter.
            sql.push(format!(
                "declare @def sysname; \
                 select @def = d.name from sys.default_constraints d \
                 join sys.columns c on c.object_id = d.parent_object_id and c.column_id = d.parent_column_id \
                 where d.parent_object_id = object_id({}) and c.name = {}; \
                 if @def is not null exec('alter table {} drop constraint ' + quotename(@def))",
                quote_literal(&target),
                quote_literal(&col.name),
                target.replace('\'', "''")
            ));
        }
        if stored_identity && !col.identity {
            sql.push(self.strip_identity(table, col));
        }
        sql.push(format!(
            "alter table {} alter column {} {}{}",
            target,
            self.quote(&col.name),
            self.column_type(col),
            self.nullability(col.nullable)
        ));
        if col.identity {
            sql.extend(self.sequence_identity(table, col, !stored_identity));
        } else if let Some(expr) = self.default_expression(table, col) {
            sql.push(format!(
                "alter table {} add constraint {} default {} for {}",
                target,
                self.quote(&self.default_constraint_name(&table.name, &col.name)),
                expr,
                self.quote(&col.name)
            ));
        }
        Ok(sql)
    }

    fn drop_auto_increment(
        &self,
        table: &Table,
        _existing: &BTreeSet<String>,
        identity_seq_exists: bool,
    ) -> Vec<String> {
        if identity_seq_exists && !table.columns.iter().any(|c| c.identity) {
            self.drop_sequence(&table.schema, &table.identity_sequence_name())
        } else {
            Vec::new()
        }
    }

    fn drop_index(&self, schema: &str, index: &DbIndexInfo) -> Vec<String> {
        vec![format!(
            "drop index {} on {}",
            self.quote(index.raw_name()),
            self.stored_table_string(schema, &index.table_name)
        )]
    }

    fn create_sequence(&self, seq: &crate::core::schema::Sequence) -> Vec<String> {
        vec![format!(
            "create sequence {} as bigint start with {}{}",
            self.sequence_string(&seq.schema, &seq.name),
            seq.start_with,
            crate::dialect::sequence_options(seq)
        )]
    }

    fn create_parameterized_view(&self, pv: &ParameterizedView, base: &Table) -> Result<Vec<String>> {
        let params: Vec<String> = pv
            .params
            .iter()
            .map(|p| format!("@{} {}", p.name, self.param_type(p.kind)))
            .collect();
        let select = view::select_sql(self, base, &pv.columns, &pv.filter, &|p| format!("@{}", p))?;
        Ok(vec![format!(
            "create function {}({})\n  returns table\n  as\n  return {}",
            self.table_string(&pv.schema, &pv.name),
            params.join(", "),
            select
        )])
    }

    fn drop_parameterized_view(&self, schema: &str, name: &str) -> Vec<String> {
        vec![format!("drop function {}", self.table_string(schema, name))]
    }

    fn versioning_trigger_name(&self, table: &Table) -> String {
        self.limit_name(&format!("{}_upd", table.name))
    }

    fn create_versioning_trigger(&self, table: &Table) -> Vec<String> {
        vec![format!(
            "{}{}end",
            self.update_trigger_head(table),
            self.versioning_block(table)
        )]
    }

    fn drop_trigger(&self, table: &Table, name: &str) -> Vec<String> {
        vec![format!("drop trigger {}", self.trigger_string(&table.schema, name))]
    }

    fn create_mv_triggers(&self, base: &Table, mvs: &[&MaterializedView]) -> Result<Vec<String>> {
        let table = self.table_string(&base.schema, &base.name);
        let mut sql = Vec::new();
        for mv in mvs {
            mview::check_aggregates(mv, base)?;
            let marker = mview::checksum_marker(mv)?;
            let lock = self.lock_statement(mv);
            let insert = self.merge_block(mv, base, "inserted", true);
            let delete = self.merge_block(mv, base, "deleted", false);
            let trigger = |event: TriggerEvent, head: &str, body: String| {
                format!(
                    "create trigger {} on {} after {} as begin\n{}  set nocount on;\n  declare @lock int;\n{}{}end",
                    self.trigger_string(&base.schema, &self.mv_trigger_name(mv, event)),
                    table,
                    event.sql(),
                    head,
                    lock,
                    body
                )
            };

            sql.push(trigger(TriggerEvent::Insert, &format!("  {}\n", marker), insert.clone()));
            // Update runs as delete of the old image then insert of the new one.
            sql.push(trigger(TriggerEvent::Update, "", format!("{}{}", delete, insert)));
            sql.push(trigger(TriggerEvent::Delete, "", delete));
        }
        Ok(sql)
    }
}
