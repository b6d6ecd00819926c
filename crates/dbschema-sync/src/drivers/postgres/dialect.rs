//! PostgreSQL statement renderer.
//!
//! Grains are native schemas. Identity columns draw from a `<table>_seq`
//! sequence through a `nextval` default; versioning and materialized-view
//! maintenance run as plpgsql trigger functions.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::identifier::quote_literal;
use crate::core::meta::{DbColumnInfo, DbIndexInfo};
use crate::core::schema::{
    Column, ColumnKind, DefaultValue, MaterializedView, ParameterizedView, Table,
};
use crate::dialect::{
    canonical_binary, canonical_bool, canonical_date, check_navigation, check_paging, mview,
    order_part, strip_parens, view, where_part, DbType, Dialect, FromClause, TriggerEvent,
};
use crate::error::Result;

/// Name of the per-table trigger calling `recversion_check()`.
pub const VERSION_TRIGGER_NAME: &str = "versioncheck";

static NEXTVAL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^nextval\('(?:"?[^"'.]+"?\.)?"?([^"']+)"?'(?:::regclass)?\)$"#).expect("valid regex")
});

/// Drop a top-level `::type` cast: `'a'::character varying` becomes `'a'`.
fn strip_casts(text: &str) -> &str {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_quote = false;
    for i in 0..bytes.len() {
        match bytes[i] {
            b'\'' => in_quote = !in_quote,
            b'(' if !in_quote => depth += 1,
            b')' if !in_quote => depth = depth.saturating_sub(1),
            b':' if !in_quote && depth == 0 && bytes.get(i + 1) == Some(&b':') => {
                return text[..i].trim();
            }
            _ => {}
        }
    }
    text.trim()
}

/// PostgreSQL dialect.
#[derive(Debug, Clone)]
pub struct PostgresDialect {
    sys_schema: String,
}

impl PostgresDialect {
    pub fn new(sys_schema: impl Into<String>) -> Self {
        Self {
            sys_schema: sys_schema.into(),
        }
    }

    /// `nextval('"grain"."seq"')`.
    fn nextval(&self, schema: &str, sequence: &str) -> String {
        format!("nextval('{}')", self.sequence_string(schema, sequence))
    }

    /// Default expression without the `default` keyword.
    fn default_expression(&self, table: &Table, col: &Column) -> Option<String> {
        if col.identity {
            return Some(self.nextval(&table.schema, &table.identity_sequence_name()));
        }
        if let Some(seq) = &col.sequence {
            return Some(self.nextval(&table.schema, seq));
        }
        col.default.as_ref().map(|d| self.literal(d))
    }

    fn create_identity_sequence(&self, table: &Table) -> String {
        format!(
            "create sequence if not exists {}",
            self.sequence_string(&table.schema, &table.identity_sequence_name())
        )
    }

    /// Quoted, schema-qualified trigger function name.
    fn trigger_function(&self, schema: &str, trigger: &str) -> String {
        format!("{}.{}", self.quote(schema), self.quote(trigger))
    }

    fn mv_insert_block(&self, mv: &MaterializedView, base: &Table) -> String {
        let target = self.table_string(&mv.schema, &mv.name);
        let deltas = mview::row_deltas(self, mv, "NEW.");
        let sets: Vec<String> = deltas
            .iter()
            .map(|(alias, delta)| {
                let column = self.quote(alias);
                format!("{} = {} + {}", column, column, delta)
            })
            .collect();
        let mut values: Vec<String> = mv
            .group_by
            .iter()
            .map(|g| mview::group_value(self, base, g, "NEW."))
            .collect();
        values.extend(deltas.into_iter().map(|(_, delta)| delta));
        format!(
            "update {t} set {} where {};\n  get diagnostics updated_count = row_count;\n  \
             if updated_count = 0 then\n    insert into {t} ({}) values ({});\n  end if;",
            sets.join(", "),
            mview::group_match(self, mv, base, &target, "NEW."),
            mview::column_list(self, mv).join(", "),
            values.join(", "),
            t = target
        )
    }

    fn mv_delete_block(&self, mv: &MaterializedView, base: &Table) -> String {
        let target = self.table_string(&mv.schema, &mv.name);
        let matching = mview::group_match(self, mv, base, &target, "OLD.");
        let sets: Vec<String> = mview::row_deltas(self, mv, "OLD.")
            .into_iter()
            .map(|(alias, delta)| {
                let column = self.quote(&alias);
                format!("{} = {} - {}", column, column, delta)
            })
            .collect();
        format!(
            "update {t} set {} where {m};\n  delete from {t} where {m} and \"surrogate_count\" = 0;",
            sets.join(", "),
            t = target,
            m = matching
        )
    }
}

impl Dialect for PostgresDialect {
    fn db_type(&self) -> DbType {
        DbType::Postgres
    }

    fn max_identifier_length(&self) -> usize {
        63
    }

    fn param_placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn type_name(&self, kind: ColumnKind) -> &'static str {
        match kind {
            ColumnKind::Integer => "int4",
            ColumnKind::String => "varchar",
            ColumnKind::Boolean => "bool",
            ColumnKind::Floating => "float8",
            ColumnKind::Decimal => "numeric",
            ColumnKind::Binary => "bytea",
            ColumnKind::DateTime => "timestamp",
            ColumnKind::ZonedDateTime => "timestamptz",
        }
    }

    fn column_type(&self, col: &Column) -> String {
        match col.kind {
            ColumnKind::String if col.max => "text".to_string(),
            ColumnKind::String => format!("varchar({})", col.length),
            ColumnKind::Decimal => format!("numeric({}, {})", col.precision, col.scale),
            kind => self.type_name(kind).to_string(),
        }
    }

    fn literal(&self, value: &DefaultValue) -> String {
        match value {
            DefaultValue::Binary(v) => format!("'\\x{}'::bytea", hex::encode_upper(v)),
            DefaultValue::Date(d) => format!("'{}'::timestamp", d.format("%Y-%m-%d")),
            DefaultValue::Now => "CURRENT_TIMESTAMP".to_string(),
            DefaultValue::Boolean(true) => "true".to_string(),
            DefaultValue::Boolean(false) => "false".to_string(),
            DefaultValue::Integer(v) => v.to_string(),
            DefaultValue::Floating(v) => v.to_string(),
            DefaultValue::Decimal(v) => v.to_string(),
            DefaultValue::Text(v) => quote_literal(v),
        }
    }

    fn sequence_default(&self, schema: &str, sequence: &str) -> Option<String> {
        Some(format!("default {}", self.nextval(schema, sequence)))
    }

    fn normalize_stored_default(&self, kind: ColumnKind, raw: &str) -> Option<String> {
        let text = strip_parens(raw);
        if let Some(caps) = NEXTVAL_REGEX.captures(text) {
            return Some(format!("NEXTVAL({})", &caps[1]));
        }
        let value = strip_parens(strip_casts(text));
        if value.is_empty() || value.eq_ignore_ascii_case("null") {
            return None;
        }
        match kind {
            ColumnKind::Boolean => canonical_bool(value),
            ColumnKind::Binary => canonical_binary(value),
            ColumnKind::DateTime | ColumnKind::ZonedDateTime => {
                let lower = value.to_ascii_lowercase();
                if lower == "now()" || lower == "current_timestamp" {
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
        let mut sql = self.select_with_order_by(from, where_clause, order_by, fields);
        if row_count > 0 {
            sql.push_str(&format!(" limit {}", row_count));
        }
        if offset > 0 {
            sql.push_str(&format!(" offset {}", offset));
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
        Ok(format!(
            "select {} from {}{}{} limit 1 offset {}",
            fields,
            from.expression,
            where_part(position_predicate),
            order_part(order_by),
            offset.saturating_sub(1)
        ))
    }

    fn trunc_date(&self, expr: &str) -> String {
        format!("date_trunc('DAY', {})", expr)
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
        let mut sql = vec![format!("alter table {} alter column {} drop default", target, column)];

        let type_changed = actual.kind != col.kind
            || (col.kind == ColumnKind::String
                && (actual.max != col.max || (!col.max && actual.length != col.length)))
            || (col.kind == ColumnKind::Decimal
                && (actual.precision != col.precision || actual.scale != col.scale));
        if type_changed {
            let native = self.column_type(col);
            if actual.kind != col.kind {
                sql.push(format!(
                    "alter table {} alter column {} type {} using ({}::{})",
                    target, column, native, column, native
                ));
            } else {
                sql.push(format!(
                    "alter table {} alter column {} type {}",
                    target, column, native
                ));
            }
        }

        if actual.nullable != col.nullable {
            sql.push(format!(
                "alter table {} alter column {} {}",
                target,
                column,
                if col.nullable { "drop not null" } else { "set not null" }
            ));
        }

        if let Some(expr) = self.default_expression(table, col) {
            if col.identity {
                sql.push(self.create_identity_sequence(table));
            }
            sql.push(format!(
                "alter table {} alter column {} set default {}",
                target, column, expr
            ));
        }
        Ok(sql)
    }

    fn drop_pk(&self, table: &Table, pk_name: &str, _current: &[String]) -> Vec<String> {
        vec![format!(
            "alter table {} drop constraint {} cascade",
            self.table_string(&table.schema, &table.name),
            self.quote(pk_name)
        )]
    }

    fn drop_index(&self, schema: &str, index: &DbIndexInfo) -> Vec<String> {
        vec![format!(
            "drop index if exists {}.{}",
            self.quote(schema),
            self.quote(index.raw_name())
        )]
    }

    fn create_parameterized_view(&self, pv: &ParameterizedView, base: &Table) -> Result<Vec<String>> {
        let params: Vec<String> = pv
            .params
            .iter()
            .map(|p| format!("{} {}", self.quote(&p.name), self.type_name(p.kind)))
            .collect();
        let returns: Vec<String> = view::projected_columns(base, &pv.columns)?
            .iter()
            .map(|(name, col)| format!("{} {}", self.quote(name), self.column_type(col)))
            .collect();
        // Output columns shadow argument names inside SQL functions, so the
        // body refers to arguments by position.
        let position = |name: &str| {
            pv.params
                .iter()
                .position(|p| p.name == name)
                .map(|i| format!("${}", i + 1))
                .unwrap_or_else(|| name.to_string())
        };
        let select = view::select_sql(self, base, &pv.columns, &pv.filter, &position)?;
        Ok(vec![format!(
            "create or replace function {}({}) returns table({}) as $$\n  {}\n$$ language sql stable",
            self.table_string(&pv.schema, &pv.name),
            params.join(", "),
            returns.join(", "),
            select
        )])
    }

    fn drop_parameterized_view(&self, schema: &str, name: &str) -> Vec<String> {
        vec![format!("drop function if exists {}", self.table_string(schema, name))]
    }

    fn auto_increment(&self, table: &Table, identity_seq_exists: bool) -> Vec<String> {
        let Some(col) = table.columns.iter().find(|c| c.identity) else {
            return Vec::new();
        };
        let mut sql = Vec::new();
        if !identity_seq_exists {
            sql.push(self.create_identity_sequence(table));
        }
        sql.push(format!(
            "alter table {} alter column {} set default {}",
            self.table_string(&table.schema, &table.name),
            self.quote(&col.name),
            self.nextval(&table.schema, &table.identity_sequence_name())
        ));
        sql
    }

    fn drop_auto_increment(
        &self,
        table: &Table,
        _existing: &BTreeSet<String>,
        identity_seq_exists: bool,
    ) -> Vec<String> {
        if !identity_seq_exists || table.columns.iter().any(|c| c.identity) {
            return Vec::new();
        }
        // Cascade removes column defaults still drawing from the sequence.
        vec![format!(
            "drop sequence if exists {} cascade",
            self.sequence_string(&table.schema, &table.identity_sequence_name())
        )]
    }

    fn create_sys_objects(&self) -> Vec<String> {
        vec![format!(
            "create or replace function {}.\"recversion_check\"() returns trigger as $BODY$\n\
             begin\n  if (OLD.\"recversion\" = NEW.\"recversion\") then\n    \
             NEW.\"recversion\" = NEW.\"recversion\" + 1;\n  else\n    \
             raise exception 'record version check failure';\n  end if;\n  return NEW;\n\
             end;\n$BODY$ language plpgsql volatile",
            self.quote(&self.sys_schema)
        )]
    }

    fn versioning_trigger_name(&self, _table: &Table) -> String {
        VERSION_TRIGGER_NAME.to_string()
    }

    fn create_versioning_trigger(&self, table: &Table) -> Vec<String> {
        vec![format!(
            "create trigger {} before update on {} for each row execute procedure {}.\"recversion_check\"()",
            self.quote(VERSION_TRIGGER_NAME),
            self.table_string(&table.schema, &table.name),
            self.quote(&self.sys_schema)
        )]
    }

    fn drop_trigger(&self, table: &Table, name: &str) -> Vec<String> {
        vec![format!(
            "drop trigger if exists {} on {}",
            self.quote(name),
            self.table_string(&table.schema, &table.name)
        )]
    }

    fn create_mv_triggers(&self, base: &Table, mvs: &[&MaterializedView]) -> Result<Vec<String>> {
        let table = self.table_string(&base.schema, &base.name);
        let mut sql = Vec::new();
        for mv in mvs {
            mview::check_aggregates(mv, base)?;
            let marker = mview::checksum_marker(mv)?;
            let lock = format!(
                "lock table only {} in exclusive mode;",
                self.table_string(&mv.schema, &mv.name)
            );
            let insert = self.mv_insert_block(mv, base);
            let delete = self.mv_delete_block(mv, base);

            for event in TriggerEvent::ALL {
                let name = self.mv_trigger_name(mv, event);
                let function = self.trigger_function(&base.schema, &name);
                let body = match event {
                    TriggerEvent::Insert => format!("{}\n  {}\n  {}\n  return NEW;", marker, lock, insert),
                    TriggerEvent::Delete => format!("{}\n  {}\n  return OLD;", lock, delete),
                    TriggerEvent::Update => {
                        format!("{}\n  {}\n  {}\n  {}\n  return NEW;", marker, lock, delete, insert)
                    }
                };
                sql.push(format!(
                    "create or replace function {}() returns trigger as $BODY$\n\
                     declare updated_count int;\nbegin\n  {}\nend;\n$BODY$ language plpgsql volatile",
                    function, body
                ));
                sql.push(format!(
                    "create trigger {} after {} on {} for each row execute procedure {}()",
                    self.quote(&name),
                    event.sql(),
                    table,
                    function
                ));
            }
        }
        Ok(sql)
    }

    fn drop_mv_triggers(&self, base: &Table, existing: &BTreeSet<String>) -> Vec<String> {
        existing
            .iter()
            .filter(|name| self.is_mv_trigger(base, name))
            .flat_map(|name| {
                let mut sql = self.drop_trigger(base, name);
                sql.push(format!(
                    "drop function if exists {}()",
                    self.trigger_function(&base.schema, name)
                ));
                sql
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{Aggregate, AggregateFn, CompareOp, Parameter, Predicate, ViewColumn};

    fn dialect() -> PostgresDialect {
        PostgresDialect::new("dbschema")
    }

    fn orders() -> Table {
        Table::new("shop", "orders")
            .with_column(Column::new("id", ColumnKind::Integer).identity())
            .with_column(Column::string("title", 10))
            .with_column(Column::new("placed", ColumnKind::DateTime))
            .with_column(Column::decimal("amount", 10, 2))
            .with_pk(&["id"])
    }

    #[test]
    fn test_strip_casts() {
        assert_eq!(strip_casts("'a'::character varying"), "'a'");
        assert_eq!(strip_casts("'a::b'::text"), "'a::b'");
        assert_eq!(strip_casts("nextval('s'::regclass)"), "nextval('s'::regclass)");
        assert_eq!(strip_casts("0"), "0");
    }

    #[test]
    fn test_normalize_stored_default() {
        let d = dialect();
        assert_eq!(
            d.normalize_stored_default(ColumnKind::Integer, "nextval('\"shop\".\"orders_seq\"'::regclass)")
                .as_deref(),
            Some("NEXTVAL(orders_seq)")
        );
        assert_eq!(
            d.normalize_stored_default(ColumnKind::Integer, "nextval('shop.orders_seq'::regclass)").as_deref(),
            Some("NEXTVAL(orders_seq)")
        );
        assert_eq!(d.normalize_stored_default(ColumnKind::Integer, "'-1'::integer").as_deref(), Some("-1"));
        assert_eq!(d.normalize_stored_default(ColumnKind::Integer, "(-1)").as_deref(), Some("-1"));
        assert_eq!(
            d.normalize_stored_default(ColumnKind::String, "'it''s'::character varying").as_deref(),
            Some("'it''s'")
        );
        assert_eq!(d.normalize_stored_default(ColumnKind::String, "NULL::character varying"), None);
        assert_eq!(d.normalize_stored_default(ColumnKind::Boolean, "true").as_deref(), Some("'TRUE'"));
        assert_eq!(
            d.normalize_stored_default(ColumnKind::Binary, "'\\x0a0b'::bytea").as_deref(),
            Some("0x0A0B")
        );
        assert_eq!(
            d.normalize_stored_default(ColumnKind::DateTime, "now()").as_deref(),
            Some("GETDATE()")
        );
        assert_eq!(
            d.normalize_stored_default(ColumnKind::DateTime, "CURRENT_TIMESTAMP").as_deref(),
            Some("GETDATE()")
        );
        assert_eq!(
            d.normalize_stored_default(ColumnKind::DateTime, "'2021-03-04 00:00:00'::timestamp without time zone")
                .as_deref(),
            Some("'20210304'")
        );
        assert_eq!(d.normalize_stored_default(ColumnKind::Decimal, "1.50").as_deref(), Some("1.5"));
    }

    #[test]
    fn test_literals_round_trip_through_normalize() {
        let d = dialect();
        for (kind, value) in [
            (ColumnKind::Binary, DefaultValue::Binary(vec![0xCA, 0xFE])),
            (ColumnKind::Boolean, DefaultValue::Boolean(false)),
            (
                ColumnKind::DateTime,
                DefaultValue::Date(chrono::NaiveDate::from_ymd_opt(2020, 1, 31).unwrap()),
            ),
            (ColumnKind::DateTime, DefaultValue::Now),
        ] {
            let stored = d.literal(&value);
            assert_eq!(d.normalize_stored_default(kind, &stored), Some(value.canonical()));
        }
    }

    #[test]
    fn test_paging_and_placeholders() {
        let d = dialect();
        let from = FromClause::table(&d, "shop", "orders");
        assert_eq!(
            d.limited_select(&from, "\"id\" > $1", "\"id\"", 10, 5, "\"id\"").unwrap(),
            "select \"id\" from \"shop\".\"orders\" where \"id\" > $1 order by \"id\" limit 5 offset 10"
        );
        assert_eq!(
            d.limited_select(&from, "", "", 10, 0, "*").unwrap(),
            "select * from \"shop\".\"orders\" offset 10"
        );
        assert!(d
            .navigation_select(&from, "\"id\"", "\"id\" > $1", 1, "*")
            .unwrap()
            .ends_with("limit 1 offset 0"));
        assert_eq!(d.param_placeholder(3), "$3");
    }

    #[test]
    fn test_identity_wiring() {
        let d = dialect();
        let table = orders();
        let create = d.create_table(&table).join("\n");
        assert!(create.contains("\"id\" int4 not null"));
        assert_eq!(
            d.auto_increment(&table, false),
            vec![
                "create sequence if not exists \"shop\".\"orders_seq\"".to_string(),
                "alter table \"shop\".\"orders\" alter column \"id\" set default nextval('\"shop\".\"orders_seq\"')"
                    .to_string(),
            ]
        );
        assert_eq!(d.auto_increment(&table, true).len(), 1);
        assert!(d.drop_auto_increment(&table, &BTreeSet::new(), true).is_empty());
        let plain = Table::new("shop", "orders").with_column(Column::new("id", ColumnKind::Integer));
        assert_eq!(
            d.drop_auto_increment(&plain, &BTreeSet::new(), true),
            vec!["drop sequence if exists \"shop\".\"orders_seq\" cascade".to_string()]
        );
        assert!(d.drop_auto_increment(&plain, &BTreeSet::new(), false).is_empty());
    }

    #[test]
    fn test_update_column_changes_type_with_using() {
        let d = dialect();
        let table = orders();
        let col = Column::new("title", ColumnKind::Integer)
            .not_null()
            .with_default(DefaultValue::Integer(0));
        let mut actual = DbColumnInfo::new("title", ColumnKind::String);
        actual.length = 10;
        let sql = d.update_column(&table, &col, &actual, &[]).unwrap();
        assert_eq!(
            sql,
            vec![
                "alter table \"shop\".\"orders\" alter column \"title\" drop default".to_string(),
                "alter table \"shop\".\"orders\" alter column \"title\" type int4 using (\"title\"::int4)".to_string(),
                "alter table \"shop\".\"orders\" alter column \"title\" set not null".to_string(),
                "alter table \"shop\".\"orders\" alter column \"title\" set default 0".to_string(),
            ]
        );

        let widened = Column::string("title", 20);
        let mut actual = DbColumnInfo::new("title", ColumnKind::String);
        actual.length = 10;
        let sql = d.update_column(&table, &widened, &actual, &[]).unwrap();
        assert_eq!(sql[1], "alter table \"shop\".\"orders\" alter column \"title\" type varchar(20)");
        assert_eq!(sql.len(), 2);
    }

    #[test]
    fn test_constraint_and_index_drops() {
        let d = dialect();
        assert_eq!(
            d.drop_pk(&orders(), "pk_orders", &[]),
            vec!["alter table \"shop\".\"orders\" drop constraint \"pk_orders\" cascade".to_string()]
        );
        let idx = DbIndexInfo::new("orders", "##orders_title_key");
        assert_eq!(
            d.drop_index("shop", &idx),
            vec!["drop index if exists \"shop\".\"orders_title_key\"".to_string()]
        );
    }

    #[test]
    fn test_versioning_uses_shared_function() {
        let d = dialect();
        assert!(d.create_sys_objects()[0].contains("\"dbschema\".\"recversion_check\"()"));
        let table = orders().versioned();
        assert_eq!(
            d.create_versioning_trigger(&table),
            vec![
                "create trigger \"versioncheck\" before update on \"shop\".\"orders\" for each row execute procedure \"dbschema\".\"recversion_check\"()"
                    .to_string()
            ]
        );
        let existing: BTreeSet<String> = [VERSION_TRIGGER_NAME.to_string()].into_iter().collect();
        assert_eq!(
            d.drop_versioning_trigger(&table, &existing),
            vec!["drop trigger if exists \"versioncheck\" on \"shop\".\"orders\"".to_string()]
        );
    }

    #[test]
    fn test_mv_trigger_functions() {
        let d = dialect();
        let base = orders();
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
        let sql = d.create_mv_triggers(&base, &[&mv]).unwrap();
        assert_eq!(sql.len(), 6);
        assert!(sql[0].starts_with("create or replace function \"shop\".\"mvins_orders_daily\"() returns trigger"));
        assert!(sql[0].contains("lock table only \"shop\".\"daily\" in exclusive mode;"));
        assert!(sql[0].contains("\"shop\".\"daily\".\"placed\" = date_trunc('DAY', NEW.\"placed\")"));
        assert!(sql[0].contains("\"total\" = \"total\" + coalesce(NEW.\"amount\", 0)"));
        assert!(sql[0].contains("if updated_count = 0 then"));
        assert!(mview::extract_checksum(&sql[0]).is_some());
        assert_eq!(
            sql[1],
            "create trigger \"mvins_orders_daily\" after insert on \"shop\".\"orders\" for each row execute procedure \"shop\".\"mvins_orders_daily\"()"
        );
        assert!(sql[4].contains("return OLD;"));

        let existing: BTreeSet<String> = ["mvdel_orders_daily", "versioncheck"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            d.drop_mv_triggers(&base, &existing),
            vec![
                "drop trigger if exists \"mvdel_orders_daily\" on \"shop\".\"orders\"".to_string(),
                "drop function if exists \"shop\".\"mvdel_orders_daily\"()".to_string(),
            ]
        );
    }

    #[test]
    fn test_parameterized_view_function() {
        let d = dialect();
        let pv = ParameterizedView {
            name: "orders_since".into(),
            schema: "shop".into(),
            from: "orders".into(),
            params: vec![Parameter {
                name: "since".into(),
                kind: ColumnKind::DateTime,
            }],
            columns: vec![
                ViewColumn {
                    name: "id".into(),
                    alias: None,
                },
                ViewColumn {
                    name: "title".into(),
                    alias: Some("label".into()),
                },
            ],
            filter: vec![Predicate::param("placed", CompareOp::Ge, "since")],
        };
        let sql = d.create_parameterized_view(&pv, &orders()).unwrap();
        assert_eq!(
            sql[0],
            "create or replace function \"shop\".\"orders_since\"(\"since\" timestamp) returns table(\"id\" int4, \"label\" varchar(10)) as $$\n  \
             select \"id\", \"title\" as \"label\" from \"shop\".\"orders\" where \"placed\" >= $1\n$$ language sql stable"
        );
        assert_eq!(d.function_call("shop", "orders_since", 1), "\"shop\".\"orders_since\"($1)");
        assert_eq!(
            d.drop_parameterized_view("shop", "orders_since"),
            vec!["drop function if exists \"shop\".\"orders_since\"".to_string()]
        );
    }
}
