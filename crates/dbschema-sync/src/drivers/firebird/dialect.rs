//! Firebird statement renderer.
//!
//! Like Oracle, Firebird has a single namespace per database: grains become
//! name prefixes and identifiers are capped at 31 characters. Booleans are
//! `smallint` columns with a named `in (0, 1)` check, and identity/sequence
//! columns are filled by `create or alter` BEFORE INSERT triggers.
//!
//! PSQL bodies (`as begin ... end`) are sent whole; no `SET TERM` is needed
//! when statements go through the client API.

use std::collections::BTreeSet;

use crate::core::identifier::{quote_literal, RECVERSION};
use crate::core::meta::DbColumnInfo;
use crate::core::schema::{
    Column, ColumnKind, CompareOp, DefaultValue, MaterializedView, ParameterizedView, Score,
    Sequence, Table, SURROGATE_COUNT,
};
use crate::dialect::{
    canonical_binary, canonical_bool, canonical_date, check_navigation, check_paging, mview,
    order_part, strip_parens, view, where_part, DbType, Dialect, FromClause, TriggerEvent,
};
use crate::error::{MigrateError, Result};

/// Exception raised by versioning triggers on a stale update.
pub const VERSION_CHECK_ERROR: &str = "VERSION_CHECK_ERROR";

/// Prefix of the triggers feeding columns from sequences.
pub const SEQUENCE_TRIGGER_PREFIX: &str = "inc_";

/// Firebird dialect.
#[derive(Debug, Clone, Default)]
pub struct FirebirdDialect;

impl FirebirdDialect {
    pub fn new() -> Self {
        Self
    }

    pub fn boolean_check_name(&self, table: &Table, column: &str) -> String {
        self.limit_name(&format!("chk_{}_{}_{}", table.schema, table.name, column))
    }

    /// Name of the BEFORE INSERT trigger feeding `column` from its sequence.
    pub fn sequence_trigger_name(&self, schema: &str, table: &str, column: &str) -> String {
        self.limit_name(&format!("{}{}_{}_{}", SEQUENCE_TRIGGER_PREFIX, schema, table, column))
    }

    fn boolean_check(&self, table: &Table, column: &str) -> String {
        format!(
            "constraint {} check ({} in (0, 1))",
            self.quote(&self.boolean_check_name(table, column)),
            self.quote(column)
        )
    }

    fn column_sequence(&self, table: &Table, col: &Column) -> Option<String> {
        if col.identity {
            Some(table.identity_sequence_name())
        } else {
            col.sequence.clone()
        }
    }

    fn sequence_trigger(&self, table: &Table, col: &Column) -> Option<String> {
        let seq = self.column_sequence(table, col)?;
        let column = self.quote(&col.name);
        Some(format!(
            "create or alter trigger {} for {} before insert as\n\
             begin\n  if (new.{c} is null) then new.{c} = next value for {};\nend",
            self.quote(&self.sequence_trigger_name(&table.schema, &table.name, &col.name)),
            self.table_string(&table.schema, &table.name),
            self.sequence_string(&table.schema, &seq),
            c = column
        ))
    }

    /// Whether changing `actual` into `col` needs a copy through a temporary
    /// column; `alter column ... type` only widens compatible types.
    fn needs_column_swap(&self, col: &Column, actual: &DbColumnInfo) -> bool {
        match (actual.kind, col.kind) {
            (ColumnKind::String, ColumnKind::Integer) => true,
            (from, ColumnKind::Boolean) => from != ColumnKind::Boolean,
            (ColumnKind::String, ColumnKind::String) => actual.max != col.max,
            (ColumnKind::Decimal, ColumnKind::Decimal) => {
                actual.precision != col.precision || actual.scale != col.scale
            }
            _ => false,
        }
    }

    /// Rename to `"<col>_temp"`, add the new column, copy and drop the old one.
    fn swap_column(&self, table: &Table, col: &Column) -> Vec<String> {
        let target = self.table_string(&table.schema, &table.name);
        let temp = format!("{}_temp", col.name);
        let mut fresh = col.clone();
        // The copy runs before NOT NULL can hold.
        fresh.nullable = true;
        vec![
            format!(
                "alter table {} alter column {} to {}",
                target,
                self.quote(&col.name),
                self.quote(&temp)
            ),
            format!("alter table {} add {}", target, self.column_definition(table, &fresh)),
            format!(
                "update {} set {} = {}",
                target,
                self.quote(&col.name),
                self.quote(&temp)
            ),
            format!("alter table {} drop {}", target, self.quote(&temp)),
        ]
    }

    /// Declared type of a parameter of a selectable procedure.
    fn param_type(&self, pv: &ParameterizedView, base: &Table, param: &str, kind: ColumnKind) -> String {
        if kind != ColumnKind::String {
            return self.type_name(kind).to_string();
        }
        // Long enough for every column the parameter is compared with.
        let compared: Vec<&Column> = pv
            .filter
            .iter()
            .filter(|p| p.param.as_deref() == Some(param))
            .filter_map(|p| base.column(&p.column))
            .collect();
        if compared.is_empty() || compared.iter().any(|c| c.max) {
            return "blob sub_type text".to_string();
        }
        let length = compared.iter().map(|c| c.length).max().unwrap_or(1);
        format!("varchar({})", length)
    }

    fn mv_insert_part(&self, mv: &MaterializedView, base: &Table) -> String {
        let target = self.table_string(&mv.schema, &mv.name);
        let mut select = Vec::new();
        for g in &mv.group_by {
            select.push(format!(
                "{} as {}",
                mview::group_value(self, base, g, "new."),
                self.quote(g)
            ));
        }
        let deltas = mview::row_deltas(self, mv, "new.");
        for (alias, delta) in &deltas {
            select.push(format!("{} as {}", delta, self.quote(alias)));
        }
        let on: Vec<String> = mv
            .group_by
            .iter()
            .map(|g| format!("mv.{c} = \"inserted\".{c}", c = self.quote(g)))
            .collect();
        let sets: Vec<String> = deltas
            .iter()
            .map(|(alias, _)| format!("{c} = mv.{c} + \"inserted\".{c}", c = self.quote(alias)))
            .collect();
        let columns = mview::column_list(self, mv);
        let values: Vec<String> = columns.iter().map(|c| format!("\"inserted\".{}", c)).collect();
        format!(
            "  merge into {} mv using (select {} from rdb$database) \"inserted\" on ({})\n  \
             when matched then update set {}\n  \
             when not matched then insert ({}) values ({});\n",
            target,
            select.join(", "),
            on.join(" and "),
            sets.join(", "),
            columns.join(", "),
            values.join(", ")
        )
    }

    fn mv_delete_part(&self, mv: &MaterializedView, base: &Table) -> String {
        let target = self.table_string(&mv.schema, &mv.name);
        let sets: Vec<String> = mview::row_deltas(self, mv, "old.")
            .into_iter()
            .map(|(alias, delta)| format!("{c} = {c} - {}", delta, c = self.quote(&alias)))
            .collect();
        format!(
            "  update {t} mv set {} where {};\n  delete from {t} where {} = 0;\n",
            sets.join(", "),
            mview::group_match(self, mv, base, "mv", "old."),
            self.quote(SURROGATE_COUNT),
            t = target
        )
    }
}

impl Dialect for FirebirdDialect {
    fn db_type(&self) -> DbType {
        DbType::Firebird
    }

    fn max_identifier_length(&self) -> usize {
        31
    }

    fn uses_schemas(&self) -> bool {
        false
    }

    fn pk_name(&self, table: &Table) -> String {
        self.limit_name(&format!("{}_{}", table.pk_constraint_name(), table.schema))
    }

    fn type_name(&self, kind: ColumnKind) -> &'static str {
        match kind {
            ColumnKind::Integer => "integer",
            ColumnKind::Boolean => "smallint",
            ColumnKind::String => "varchar",
            ColumnKind::Floating => "double precision",
            ColumnKind::Decimal => "decimal",
            ColumnKind::Binary => "blob",
            ColumnKind::DateTime => "timestamp",
            ColumnKind::ZonedDateTime => "timestamp with time zone",
        }
    }

    fn column_type(&self, col: &Column) -> String {
        match col.kind {
            ColumnKind::String if col.max => "blob sub_type text".to_string(),
            ColumnKind::String => format!("varchar({})", col.length),
            ColumnKind::Decimal => format!("decimal({},{})", col.precision, col.scale),
            kind => self.type_name(kind).to_string(),
        }
    }

    fn literal(&self, value: &DefaultValue) -> String {
        match value {
            DefaultValue::Boolean(true) => "1".to_string(),
            DefaultValue::Boolean(false) => "0".to_string(),
            DefaultValue::Binary(v) => format!("x'{}'", hex::encode_upper(v)),
            DefaultValue::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
            DefaultValue::Now => "current_timestamp".to_string(),
            DefaultValue::Text(v) => quote_literal(v),
            DefaultValue::Integer(v) => v.to_string(),
            DefaultValue::Floating(v) => v.to_string(),
            DefaultValue::Decimal(v) => v.to_string(),
        }
    }

    fn nullability(&self, nullable: bool) -> &'static str {
        // Columns are nullable unless declared otherwise; `null` is not a keyword here.
        if nullable {
            ""
        } else {
            " not null"
        }
    }

    fn column_definition(&self, table: &Table, col: &Column) -> String {
        let mut def = format!("{} {}", self.quote(&col.name), self.column_type(col));
        if let Some(clause) = self.default_clause(table, col) {
            def.push(' ');
            def.push_str(&clause);
        }
        def.push_str(self.nullability(col.nullable));
        if col.kind == ColumnKind::Boolean {
            def.push(' ');
            def.push_str(&self.boolean_check(table, &col.name));
        }
        def
    }

    fn normalize_stored_default(&self, kind: ColumnKind, raw: &str) -> Option<String> {
        // rdb$default_source keeps the keyword: `DEFAULT 0`.
        let trimmed = raw.trim();
        let body = trimmed
            .get(..7)
            .filter(|p| p.eq_ignore_ascii_case("default"))
            .map(|_| &trimmed[7..])
            .unwrap_or(trimmed);
        let text = strip_parens(body);
        if text.is_empty() || text.eq_ignore_ascii_case("null") {
            return None;
        }
        if text.to_ascii_uppercase().starts_with("NEXTVAL(") {
            return Some(text.to_string());
        }
        match kind {
            ColumnKind::Boolean => canonical_bool(text),
            ColumnKind::Binary => canonical_binary(text),
            ColumnKind::DateTime | ColumnKind::ZonedDateTime => {
                let lower = text.to_ascii_lowercase();
                if lower == "current_timestamp" || lower == "'now'" || lower == "localtimestamp" {
                    Some("GETDATE()".to_string())
                } else {
                    canonical_date(text)
                }
            }
            ColumnKind::Integer | ColumnKind::Floating => Some(text.trim_matches('\'').to_string()),
            ColumnKind::Decimal => text
                .trim_matches('\'')
                .parse::<rust_decimal::Decimal>()
                .ok()
                .map(|d| d.normalize().to_string()),
            ColumnKind::String => Some(text.to_string()),
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
        let mut window = String::new();
        if row_count > 0 {
            window.push_str(&format!("first {} ", row_count));
        }
        if offset > 0 {
            window.push_str(&format!("skip {} ", offset));
        }
        Ok(format!(
            "select {}{} from {}{}{}",
            window,
            fields,
            from.expression,
            where_part(where_clause),
            order_part(order_by)
        ))
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
        self.limited_select(
            from,
            position_predicate,
            order_by,
            offset.saturating_sub(1),
            1,
            fields,
        )
    }

    fn trunc_date(&self, expr: &str) -> String {
        format!("cast(cast({} as date) as timestamp)", expr)
    }

    fn update_column(
        &self,
        table: &Table,
        col: &Column,
        actual: &DbColumnInfo,
        _current: &[String],
    ) -> Result<Vec<String>> {
        let target = self.table_string(&table.schema, &table.name);
        let column = self.quote(&col.name);
        let mut sql = Vec::new();

        if actual.kind == ColumnKind::Boolean && col.kind != ColumnKind::Boolean {
            sql.push(format!(
                "alter table {} drop constraint {}",
                target,
                self.quote(&self.boolean_check_name(table, &col.name))
            ));
        }
        let stored_plain_default = actual
            .default
            .as_deref()
            .is_some_and(|d| !d.to_ascii_uppercase().starts_with("NEXTVAL("));
        if stored_plain_default {
            sql.push(format!("alter table {} alter column {} drop default", target, column));
        }

        let mut nullable_now = actual.nullable;
        if self.needs_column_swap(col, actual) {
            sql.extend(self.swap_column(table, col));
            nullable_now = true;
        } else if actual.kind != col.kind
            || actual.length != col.length
            || actual.max != col.max
        {
            sql.push(format!(
                "alter table {} alter column {} type {}",
                target,
                column,
                self.column_type(col)
            ));
        }

        if col.nullable != nullable_now {
            sql.push(format!(
                "alter table {} alter column {} {}",
                target,
                column,
                if col.nullable { "drop not null" } else { "set not null" }
            ));
        }
        if let Some(default) = col.default.as_ref().filter(|_| !col.is_auto_assigned()) {
            sql.push(format!(
                "alter table {} alter column {} set default {}",
                target,
                column,
                self.literal(default)
            ));
        }
        Ok(sql)
    }

    fn create_sequence(&self, seq: &Sequence) -> Vec<String> {
        let name = self.sequence_string(&seq.schema, &seq.name);
        // A restarted sequence hands out the restart value plus one increment.
        vec![
            format!("create sequence {} increment by {}", name, seq.increment_by),
            format!("alter sequence {} restart with {}", name, seq.start_with - seq.increment_by),
        ]
    }

    fn alter_sequence(&self, seq: &Sequence) -> Vec<String> {
        vec![format!(
            "alter sequence {} increment by {}",
            self.sequence_string(&seq.schema, &seq.name),
            seq.increment_by
        )]
    }

    fn create_parameterized_view(&self, pv: &ParameterizedView, base: &Table) -> Result<Vec<String>> {
        let projected = view::projected_columns(base, &pv.columns)?;
        let params: Vec<String> = pv
            .params
            .iter()
            .map(|p| format!("{} {}", p.name, self.param_type(pv, base, &p.name, p.kind)))
            .collect();
        let returns: Vec<String> = projected
            .iter()
            .map(|(name, col)| format!("{} {}", self.quote(name), self.column_type(col)))
            .collect();
        let into: Vec<String> = projected
            .iter()
            .map(|(name, _)| format!(":{}", self.quote(name)))
            .collect();
        let select = view::select_sql(self, base, &pv.columns, &pv.filter, &|p| format!(":{}", p))?;
        Ok(vec![format!(
            "create or alter procedure {}({}) returns ({}) as\n\
             begin\n  for {} into {} do\n  begin\n    suspend;\n  end\nend",
            self.table_string(&pv.schema, &pv.name),
            params.join(", "),
            returns.join(", "),
            select,
            into.join(", ")
        )])
    }

    fn drop_parameterized_view(&self, schema: &str, name: &str) -> Vec<String> {
        vec![format!("drop procedure {}", self.table_string(schema, name))]
    }

    fn auto_increment(&self, table: &Table, identity_seq_exists: bool) -> Vec<String> {
        let mut sql = Vec::new();
        if table.columns.iter().any(|c| c.identity) && !identity_seq_exists {
            sql.extend(self.create_sequence(&Sequence::new(&table.schema, table.identity_sequence_name())));
        }
        sql.extend(
            table
                .columns
                .iter()
                .filter_map(|c| self.sequence_trigger(table, c)),
        );
        sql
    }

    fn drop_auto_increment(
        &self,
        table: &Table,
        existing: &BTreeSet<String>,
        identity_seq_exists: bool,
    ) -> Vec<String> {
        let wired: BTreeSet<String> = table
            .columns
            .iter()
            .filter(|c| c.is_auto_assigned())
            .map(|c| self.sequence_trigger_name(&table.schema, &table.name, &c.name))
            .collect();
        let mut sql: Vec<String> = existing
            .iter()
            .filter(|name| name.starts_with(SEQUENCE_TRIGGER_PREFIX) && !wired.contains(*name))
            .flat_map(|name| self.drop_trigger(table, name))
            .collect();
        if identity_seq_exists && !table.columns.iter().any(|c| c.identity) {
            sql.extend(self.drop_sequence(&table.schema, &table.identity_sequence_name()));
        }
        sql
    }

    fn create_sys_objects(&self) -> Vec<String> {
        vec![format!(
            "create or alter exception {} 'record version check failure'",
            VERSION_CHECK_ERROR
        )]
    }

    fn versioning_trigger_name(&self, table: &Table) -> String {
        self.limit_name(&self.object_name(&table.schema, &format!("{}_version_check", table.name)))
    }

    fn create_versioning_trigger(&self, table: &Table) -> Vec<String> {
        vec![format!(
            "create or alter trigger {} for {} before update as\n\
             begin\n  if (old.{v} = new.{v}) then\n    new.{v} = new.{v} + 1;\n  \
             else\n    exception {};\nend",
            self.quote(&self.versioning_trigger_name(table)),
            self.table_string(&table.schema, &table.name),
            VERSION_CHECK_ERROR,
            v = self.quote(RECVERSION)
        )]
    }

    fn create_mv_triggers(&self, base: &Table, mvs: &[&MaterializedView]) -> Result<Vec<String>> {
        let table = self.table_string(&base.schema, &base.name);
        let mut sql = Vec::new();
        for mv in mvs {
            mview::check_aggregates(mv, base)?;
            let marker = mview::checksum_marker(mv)?;
            let insert = self.mv_insert_part(mv, base);
            let delete = self.mv_delete_part(mv, base);
            // Row-level MERGE; concurrent writers collide as update conflicts.
            for event in TriggerEvent::ALL {
                let body = match event {
                    TriggerEvent::Insert => format!("  {}\n{}", marker, insert),
                    TriggerEvent::Update => format!("{}{}", delete, insert),
                    TriggerEvent::Delete => delete.clone(),
                };
                sql.push(format!(
                    "create or alter trigger {} for {} after {} as\nbegin\n{}end",
                    self.quote(&self.mv_trigger_name(mv, event)),
                    table,
                    event.sql(),
                    body
                ));
            }
        }
        Ok(sql)
    }

    fn truncate_table(&self, schema: &str, name: &str) -> String {
        format!("delete from {}", self.table_string(schema, name))
    }

    fn check_score(&self, score: &Score) -> Result<()> {
        for grain in &score.grains {
            for seq in &grain.sequences {
                let defaults = Sequence::new(&seq.schema, &seq.name);
                if seq.cycle || seq.min_value != defaults.min_value || seq.max_value != defaults.max_value {
                    return Err(MigrateError::Schema(format!(
                        "sequence {}.{}: Firebird sequences have no bounds or cycling",
                        grain.name, seq.name
                    )));
                }
            }
            for pv in &grain.parameterized_views {
                let like_on_blob = pv.filter.iter().any(|p| {
                    p.param.is_some()
                        && p.op == CompareOp::Like
                        && grain.table(&pv.from).and_then(|t| t.column(&p.column)).is_some_and(|c| c.max)
                });
                if like_on_blob {
                    return Err(MigrateError::Schema(format!(
                        "parameterized view {}.{}: like on a text blob parameter",
                        grain.name, pv.name
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{Aggregate, AggregateFn, Grain, Parameter, Predicate, ViewColumn};

    fn orders() -> Table {
        Table::new("shop", "orders")
            .with_column(Column::new("id", ColumnKind::Integer).identity())
            .with_column(Column::string("title", 10).with_default(DefaultValue::Text(String::new())))
            .with_column(Column::new("paid", ColumnKind::Boolean).not_null().with_default(DefaultValue::Boolean(false)))
            .with_column(Column::new("placed", ColumnKind::DateTime))
            .with_column(Column::decimal("amount", 10, 2))
            .with_pk(&["id"])
    }

    #[test]
    fn test_create_table() {
        let d = FirebirdDialect::new();
        let sql = d.create_table(&orders()).join("\n");
        assert!(sql.starts_with("create table \"shop_orders\" ("));
        assert!(sql.contains("\"id\" integer not null"));
        assert!(sql.contains("\"title\" varchar(10) default ''"));
        assert!(sql.contains(
            "\"paid\" smallint default 0 not null constraint \"chk_shop_orders_paid\" check (\"paid\" in (0, 1))"
        ));
        assert!(sql.contains("\"amount\" decimal(10,2)"));
        assert!(sql.contains("constraint \"pk_orders_shop\" primary key (\"id\")"));
    }

    #[test]
    fn test_normalize_stored_default() {
        let d = FirebirdDialect::new();
        assert_eq!(d.normalize_stored_default(ColumnKind::Integer, "DEFAULT 5"), Some("5".into()));
        assert_eq!(d.normalize_stored_default(ColumnKind::Boolean, "default 0"), Some("'FALSE'".into()));
        assert_eq!(
            d.normalize_stored_default(ColumnKind::DateTime, "DEFAULT CURRENT_TIMESTAMP"),
            Some("GETDATE()".into())
        );
        assert_eq!(
            d.normalize_stored_default(ColumnKind::DateTime, "DEFAULT '2021-03-04'"),
            Some("'20210304'".into())
        );
        assert_eq!(d.normalize_stored_default(ColumnKind::Binary, "DEFAULT X'0a0B'"), Some("0x0A0B".into()));
        assert_eq!(d.normalize_stored_default(ColumnKind::String, "DEFAULT 'abc'"), Some("'abc'".into()));
        assert_eq!(d.normalize_stored_default(ColumnKind::String, "DEFAULT NULL"), None);
    }

    #[test]
    fn test_first_skip_paging() {
        let d = FirebirdDialect::new();
        let from = FromClause::table(&d, "shop", "orders");
        assert_eq!(
            d.limited_select(&from, "", "\"id\"", 0, 5, "\"id\"").unwrap(),
            "select first 5 \"id\" from \"shop_orders\" order by \"id\""
        );
        assert_eq!(
            d.limited_select(&from, "\"paid\" = 1", "\"id\"", 10, 5, "*").unwrap(),
            "select first 5 skip 10 * from \"shop_orders\" where \"paid\" = 1 order by \"id\""
        );
        assert_eq!(
            d.limited_select(&from, "", "", 3, 0, "*").unwrap(),
            "select skip 3 * from \"shop_orders\""
        );
        assert_eq!(
            d.navigation_select(&from, "\"id\"", "\"id\" > ?", 3, "*").unwrap(),
            "select first 1 skip 2 * from \"shop_orders\" where \"id\" > ? order by \"id\""
        );
        assert!(d.navigation_select(&from, "\"id\"", "", 0, "*").is_err());
    }

    #[test]
    fn test_update_column_alters_type_and_nullability() {
        let d = FirebirdDialect::new();
        let col = Column::string("title", 20).not_null().with_default(DefaultValue::Text("x".into()));
        let mut actual = DbColumnInfo::new("title", ColumnKind::String);
        actual.length = 10;
        actual.default = Some("''".into());
        let sql = d.update_column(&orders(), &col, &actual, &[]).unwrap();
        assert_eq!(
            sql,
            vec![
                "alter table \"shop_orders\" alter column \"title\" drop default".to_string(),
                "alter table \"shop_orders\" alter column \"title\" type varchar(20)".to_string(),
                "alter table \"shop_orders\" alter column \"title\" set not null".to_string(),
                "alter table \"shop_orders\" alter column \"title\" set default 'x'".to_string(),
            ]
        );
    }

    #[test]
    fn test_update_column_to_boolean_goes_through_temp_column() {
        let d = FirebirdDialect::new();
        let col = Column::new("paid", ColumnKind::Boolean).not_null();
        let mut actual = DbColumnInfo::new("paid", ColumnKind::Integer);
        actual.nullable = false;
        let sql = d.update_column(&orders(), &col, &actual, &[]).unwrap();
        assert_eq!(sql[0], "alter table \"shop_orders\" alter column \"paid\" to \"paid_temp\"");
        assert_eq!(
            sql[1],
            "alter table \"shop_orders\" add \"paid\" smallint constraint \"chk_shop_orders_paid\" check (\"paid\" in (0, 1))"
        );
        assert_eq!(sql[2], "update \"shop_orders\" set \"paid\" = \"paid_temp\"");
        assert_eq!(sql[3], "alter table \"shop_orders\" drop \"paid_temp\"");
        assert_eq!(sql[4], "alter table \"shop_orders\" alter column \"paid\" set not null");
    }

    #[test]
    fn test_sequences() {
        let d = FirebirdDialect::new();
        let mut seq = Sequence::new("shop", "ticket");
        seq.start_with = 100;
        seq.increment_by = 5;
        assert_eq!(
            d.create_sequence(&seq),
            vec![
                "create sequence \"shop_ticket\" increment by 5".to_string(),
                "alter sequence \"shop_ticket\" restart with 95".to_string(),
            ]
        );
        assert_eq!(d.alter_sequence(&seq), vec!["alter sequence \"shop_ticket\" increment by 5".to_string()]);
    }

    #[test]
    fn test_auto_increment_trigger() {
        let d = FirebirdDialect::new();
        let sql = d.auto_increment(&orders(), false);
        assert_eq!(sql[0], "create sequence \"shop_orders_seq\" increment by 1");
        assert_eq!(sql[1], "alter sequence \"shop_orders_seq\" restart with 0");
        assert!(sql[2].starts_with(
            "create or alter trigger \"inc_shop_orders_id\" for \"shop_orders\" before insert as"
        ));
        assert!(sql[2].contains("if (new.\"id\" is null) then new.\"id\" = next value for \"shop_orders_seq\";"));

        let plain = Table::new("shop", "orders").with_column(Column::new("id", ColumnKind::Integer));
        let existing: BTreeSet<String> = ["inc_shop_orders_id".to_string()].into_iter().collect();
        assert_eq!(
            d.drop_auto_increment(&plain, &existing, true),
            vec![
                "drop trigger \"inc_shop_orders_id\"".to_string(),
                "drop sequence \"shop_orders_seq\"".to_string(),
            ]
        );
    }

    #[test]
    fn test_versioning_trigger_raises_exception() {
        let d = FirebirdDialect::new();
        assert_eq!(
            d.create_sys_objects(),
            vec!["create or alter exception VERSION_CHECK_ERROR 'record version check failure'".to_string()]
        );
        let sql = d.create_versioning_trigger(&orders().versioned());
        assert!(sql[0].starts_with(
            "create or alter trigger \"shop_orders_version_check\" for \"shop_orders\" before update as"
        ));
        assert!(sql[0].contains("if (old.\"recversion\" = new.\"recversion\") then"));
        assert!(sql[0].contains("exception VERSION_CHECK_ERROR;"));
    }

    #[test]
    fn test_mv_triggers_merge_per_row() {
        let d = FirebirdDialect::new();
        let mv = MaterializedView {
            name: "daily".into(),
            schema: "shop".into(),
            from: "orders".into(),
            group_by: vec!["placed".into()],
            aggregates: vec![Aggregate {
                alias: "total".into(),
                function: AggregateFn::Sum,
                column: Some("amount".into()),
            }],
        };
        let sql = d.create_mv_triggers(&orders(), &[&mv]).unwrap();
        assert_eq!(sql.len(), 3);
        assert!(sql[0].starts_with(
            "create or alter trigger \"mvins_shop_orders_daily\" for \"shop_orders\" after insert as"
        ));
        assert!(mview::extract_checksum(&sql[0]).is_some());
        assert!(!sql[0].contains("lock table"));
        assert!(sql[0].contains("from rdb$database) \"inserted\""));
        assert!(sql[0].contains("\"total\" = mv.\"total\" + \"inserted\".\"total\""));
        assert!(sql[1].find("update \"shop_daily\" mv").unwrap() < sql[1].find("merge into").unwrap());
        assert!(sql[2].contains("delete from \"shop_daily\" where \"surrogate_count\" = 0;"));
        assert_eq!(d.truncate_table("shop", "daily"), "delete from \"shop_daily\"");
    }

    #[test]
    fn test_parameterized_view_is_selectable_procedure() {
        let d = FirebirdDialect::new();
        let pv = ParameterizedView {
            name: "orders_for".into(),
            schema: "shop".into(),
            from: "orders".into(),
            params: vec![Parameter {
                name: "t".into(),
                kind: ColumnKind::String,
            }],
            columns: vec![ViewColumn {
                name: "id".into(),
                alias: None,
            }],
            filter: vec![Predicate::param("title", CompareOp::Eq, "t")],
        };
        let sql = d.create_parameterized_view(&pv, &orders()).unwrap();
        assert!(sql[0].starts_with(
            "create or alter procedure \"shop_orders_for\"(t varchar(10)) returns (\"id\" integer) as"
        ));
        assert!(sql[0].contains("for select \"id\" from \"shop_orders\" where \"title\" = :t into :\"id\" do"));
        assert!(sql[0].contains("suspend;"));
        assert_eq!(d.function_call("shop", "orders_for", 1), "\"shop_orders_for\"(?)");
        assert_eq!(d.drop_parameterized_view("shop", "orders_for"), vec!["drop procedure \"shop_orders_for\"".to_string()]);
    }

    #[test]
    fn test_check_score_rejects_bounded_sequences() {
        let d = FirebirdDialect::new();
        let mut seq = Sequence::new("shop", "ticket");
        seq.cycle = true;
        let grain = Grain {
            sequences: vec![seq],
            ..Grain::new("shop", "1.0")
        };
        let score = Score { grains: vec![grain] };
        assert!(matches!(d.check_score(&score), Err(MigrateError::Schema(_))));
        assert!(d.check_score(&Score::default()).is_ok());
    }
}
