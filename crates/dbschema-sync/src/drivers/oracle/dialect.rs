//! Oracle statement renderer.
//!
//! Grains are name prefixes (`"grain_object"`, 30 characters at most).
//! Oracle lacks a boolean type, identity columns before 12c and `ON UPDATE`
//! referential actions, so:
//!
//! - booleans are `number` columns guarded by a named `in (0, 1)` check;
//! - identity and sequence columns are filled by a BEFORE INSERT trigger;
//! - `ON UPDATE CASCADE | SET NULL` become `csc_`/`snl_` triggers on the
//!   referenced table.
//!
//! Trigger and function bodies are PL/SQL blocks and keep their final `;`;
//! plain DDL statements must not carry one.

use std::collections::BTreeSet;

use crate::core::identifier::{quote_literal, RECVERSION};
use crate::core::meta::{DbColumnInfo, DbFkInfo};
use crate::core::schema::{
    Column, ColumnKind, DefaultValue, FkRule, ForeignKey, MaterializedView, ParameterizedView,
    Sequence, Table, SURROGATE_COUNT,
};
use crate::dialect::{
    canonical_bool, canonical_date, check_navigation, check_paging, mview, order_part,
    quoted_list, strip_parens, view, where_part, DbType, Dialect, FromClause, TriggerEvent,
};
use crate::error::Result;

/// Prefix of triggers emulating `ON UPDATE CASCADE`.
pub const CASCADE_TRIGGER_PREFIX: &str = "csc_";

/// Prefix of triggers emulating `ON UPDATE SET NULL`.
pub const SET_NULL_TRIGGER_PREFIX: &str = "snl_";

/// Prefix of triggers feeding columns from sequences.
pub const SEQUENCE_TRIGGER_PREFIX: &str = "inc_";

/// Oracle dialect.
#[derive(Debug, Clone, Default)]
pub struct OracleDialect;

impl OracleDialect {
    pub fn new() -> Self {
        Self
    }

    /// Name of the check constraint restricting a boolean column to 0/1.
    pub fn boolean_check_name(&self, table: &Table, column: &str) -> String {
        self.limit_name(&format!("chk_{}_{}_{}", table.schema, table.name, column))
    }

    /// Name of the BEFORE INSERT trigger feeding `column` from its sequence.
    pub fn sequence_trigger_name(&self, schema: &str, table: &str, column: &str) -> String {
        self.limit_name(&format!("{}{}_{}_{}", SEQUENCE_TRIGGER_PREFIX, schema, table, column))
    }

    /// Name of the trigger emulating the update rule of a foreign key.
    pub fn update_rule_trigger_name(&self, fk_name: &str, rule: FkRule) -> Option<String> {
        let prefix = match rule {
            FkRule::Cascade => CASCADE_TRIGGER_PREFIX,
            FkRule::SetNull => SET_NULL_TRIGGER_PREFIX,
            FkRule::NoAction => return None,
        };
        Some(self.limit_name(&format!("{}{}", prefix, fk_name)))
    }

    /// Object type describing one row of a parameterized view.
    pub fn row_type_name(&self, schema: &str, name: &str) -> String {
        self.limit_name(&self.object_name(schema, &format!("{}_o", name)))
    }

    /// Collection type returned by a parameterized view.
    pub fn table_type_name(&self, schema: &str, name: &str) -> String {
        self.limit_name(&self.object_name(schema, &format!("{}_t", name)))
    }

    fn boolean_check(&self, table: &Table, column: &str) -> String {
        format!(
            "constraint {} check ({} in (0, 1))",
            self.quote(&self.boolean_check_name(table, column)),
            self.quote(column)
        )
    }

    /// Sequence feeding an auto-assigned column.
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
            "create or replace trigger {} before insert on {} for each row when (new.{} is null)\n\
             begin\n  select {}.nextval into :new.{} from dual;\nend;",
            self.quote(&self.sequence_trigger_name(&table.schema, &table.name, &col.name)),
            self.table_string(&table.schema, &table.name),
            column,
            self.sequence_string(&table.schema, &seq),
            column
        ))
    }

    /// Options shared by CREATE and ALTER SEQUENCE.
    fn sequence_options(&self, seq: &Sequence) -> String {
        format!(
            " increment by {} minvalue {} maxvalue {} {}",
            seq.increment_by,
            seq.min_value,
            seq.max_value,
            // Cycling sequences must not cache past maxvalue.
            if seq.cycle { "cycle nocache" } else { "nocycle" }
        )
    }

    /// Whether changing `actual` into `col` needs a copy through a new column.
    fn needs_column_swap(&self, col: &Column, actual: &DbColumnInfo) -> bool {
        match (actual.kind, col.kind) {
            (ColumnKind::String, ColumnKind::String) => actual.max != col.max,
            (ColumnKind::Decimal, ColumnKind::Decimal) => {
                col.precision < actual.precision || col.scale < actual.scale
            }
            _ => false,
        }
    }

    /// Add `"<col>2"`, copy the data over, drop the old column and rename.
    fn swap_column(&self, table: &Table, col: &Column) -> Vec<String> {
        let target = self.table_string(&table.schema, &table.name);
        let mut temp = col.clone();
        temp.name = format!("{}2", col.name);
        // The copy runs before NOT NULL can hold.
        temp.nullable = true;
        let mut sql = vec![
            format!("alter table {} add {}", target, self.column_definition(table, &temp)),
            format!(
                "update {} set {} = {}",
                target,
                self.quote(&temp.name),
                self.quote(&col.name)
            ),
            format!("alter table {} drop column {}", target, self.quote(&col.name)),
            format!(
                "alter table {} rename column {} to {}",
                target,
                self.quote(&temp.name),
                self.quote(&col.name)
            ),
        ];
        if !col.nullable {
            sql.push(format!(
                "alter table {} modify ({} not null)",
                target,
                self.quote(&col.name)
            ));
        }
        sql
    }

    fn mv_insert_part(&self, mv: &MaterializedView, base: &Table) -> String {
        let target = self.table_string(&mv.schema, &mv.name);
        let mut select = Vec::new();
        for g in &mv.group_by {
            select.push(format!(
                "{} as {}",
                mview::group_value(self, base, g, ":new."),
                self.quote(g)
            ));
        }
        let deltas = mview::row_deltas(self, mv, ":new.");
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
            .map(|(alias, _)| format!("mv.{c} = mv.{c} + \"inserted\".{c}", c = self.quote(alias)))
            .collect();
        let columns = mview::column_list(self, mv);
        let values: Vec<String> = columns.iter().map(|c| format!("\"inserted\".{}", c)).collect();
        format!(
            "  merge into {} mv using (select {} from dual) \"inserted\" on ({})\n  \
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
        let sets: Vec<String> = mview::row_deltas(self, mv, ":old.")
            .into_iter()
            .map(|(alias, delta)| format!("mv.{c} = mv.{c} - {}", delta, c = self.quote(&alias)))
            .collect();
        format!(
            "  update {t} mv set {} where {};\n  delete from {t} mv where mv.{} = 0;\n",
            sets.join(", "),
            mview::group_match(self, mv, base, "mv", ":old."),
            self.quote(SURROGATE_COUNT),
            t = target
        )
    }
}

impl Dialect for OracleDialect {
    fn db_type(&self) -> DbType {
        DbType::Oracle
    }

    fn max_identifier_length(&self) -> usize {
        30
    }

    fn uses_schemas(&self) -> bool {
        false
    }

    fn pk_name(&self, table: &Table) -> String {
        // Constraint names share one namespace across grains.
        self.limit_name(&format!("{}_{}", table.pk_constraint_name(), table.schema))
    }

    fn type_name(&self, kind: ColumnKind) -> &'static str {
        match kind {
            ColumnKind::Integer | ColumnKind::Boolean => "number",
            ColumnKind::String => "nvarchar2",
            ColumnKind::Floating => "real",
            ColumnKind::Decimal => "number",
            ColumnKind::Binary => "blob",
            ColumnKind::DateTime => "timestamp",
            ColumnKind::ZonedDateTime => "timestamp with time zone",
        }
    }

    fn column_type(&self, col: &Column) -> String {
        match col.kind {
            ColumnKind::String if col.max => "nclob".to_string(),
            ColumnKind::String => format!("nvarchar2({})", col.length),
            ColumnKind::Decimal => format!("number({},{})", col.precision, col.scale),
            kind => self.type_name(kind).to_string(),
        }
    }

    fn literal(&self, value: &DefaultValue) -> String {
        match value {
            DefaultValue::Boolean(true) => "1".to_string(),
            DefaultValue::Boolean(false) => "0".to_string(),
            DefaultValue::Binary(v) => format!("'{}'", hex::encode_upper(v)),
            DefaultValue::Date(d) => format!("date '{}'", d.format("%Y-%m-%d")),
            DefaultValue::Now => "sysdate".to_string(),
            DefaultValue::Text(v) => quote_literal(v),
            DefaultValue::Integer(v) => v.to_string(),
            DefaultValue::Floating(v) => v.to_string(),
            DefaultValue::Decimal(v) => v.to_string(),
        }
    }

    fn column_definition(&self, table: &Table, col: &Column) -> String {
        let mut def = format!("{} {}", self.quote(&col.name), self.column_type(col));
        if let Some(clause) = self.default_clause(table, col) {
            def.push(' ');
            def.push_str(&clause);
        }
        // An empty string is NULL in Oracle.
        let empty_default = matches!(&col.default, Some(DefaultValue::Text(t)) if t.is_empty());
        def.push_str(self.nullability(col.nullable || empty_default));
        if col.kind == ColumnKind::Boolean {
            def.push(' ');
            def.push_str(&self.boolean_check(table, &col.name));
        }
        def
    }

    fn normalize_stored_default(&self, kind: ColumnKind, raw: &str) -> Option<String> {
        let text = strip_parens(raw);
        if text.is_empty() || text.eq_ignore_ascii_case("null") {
            return None;
        }
        if text.to_ascii_uppercase().starts_with("NEXTVAL(") {
            return Some(text.to_string());
        }
        match kind {
            ColumnKind::Boolean => canonical_bool(text),
            ColumnKind::Binary => {
                let digits = text.trim_matches('\'');
                if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_hexdigit()) {
                    Some(format!("0x{}", digits.to_ascii_uppercase()))
                } else {
                    None
                }
            }
            ColumnKind::DateTime | ColumnKind::ZonedDateTime => {
                let lower = text.to_ascii_lowercase();
                if lower == "sysdate" || lower == "systimestamp" || lower == "current_timestamp" {
                    Some("GETDATE()".to_string())
                } else {
                    let literal = text
                        .get(..4)
                        .filter(|p| p.eq_ignore_ascii_case("date"))
                        .map(|_| text[4..].trim())
                        .unwrap_or(text);
                    canonical_date(literal)
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
        let inner = self.select_with_order_by(from, where_clause, order_by, fields);
        Ok(if offset == 0 {
            format!(
                "with a as ({}) select a.* from a where rownum <= {}",
                inner, row_count
            )
        } else if row_count == 0 {
            format!(
                "with a as ({}) select * from (select a.*, rownum rnum from a) where rnum >= {} order by rnum",
                inner,
                offset.saturating_add(1)
            )
        } else {
            format!(
                "with a as ({}) select * from (select a.*, rownum rnum from a where rownum <= {}) \
                 where rnum >= {} order by rnum",
                inner,
                offset.saturating_add(row_count),
                offset.saturating_add(1)
            )
        })
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
                "select {f} from (select {f} from {}{}{}) where rownum = 1",
                from.expression,
                where_part(position_predicate),
                order_part(order_by),
                f = fields
            ));
        }
        self.limited_select(from, position_predicate, order_by, offset - 1, 1, fields)
    }

    fn function_call(&self, schema: &str, name: &str, arg_count: usize) -> String {
        let args: Vec<String> = (1..=arg_count).map(|i| self.param_placeholder(i)).collect();
        format!("table({}({}))", self.table_string(schema, name), args.join(", "))
    }

    fn trunc_date(&self, expr: &str) -> String {
        format!("trunc({}, 'DD')", expr)
    }

    fn update_column(
        &self,
        table: &Table,
        col: &Column,
        actual: &DbColumnInfo,
        _current: &[String],
    ) -> Result<Vec<String>> {
        let target = self.table_string(&table.schema, &table.name);
        let mut sql = Vec::new();

        if actual.kind == ColumnKind::Boolean && col.kind != ColumnKind::Boolean {
            sql.push(format!(
                "alter table {} drop constraint {}",
                target,
                self.quote(&self.boolean_check_name(table, &col.name))
            ));
        }

        if self.needs_column_swap(col, actual) {
            sql.extend(self.swap_column(table, col));
            return Ok(sql);
        }

        let mut def = self.quote(&col.name);
        // LOB types cannot be re-declared.
        if !(col.kind == ColumnKind::Binary && actual.kind == ColumnKind::Binary) {
            def.push(' ');
            def.push_str(&self.column_type(col));
        }
        match self.default_clause(table, col) {
            Some(clause) => {
                def.push(' ');
                def.push_str(&clause);
            }
            // A default cannot be dropped, only reset to NULL.
            None if actual.default.is_some() && !col.is_auto_assigned() => {
                def.push_str(" default null");
            }
            None => {}
        }
        let empty_default = matches!(&col.default, Some(DefaultValue::Text(t)) if t.is_empty());
        let nullable = col.nullable || empty_default;
        if nullable != actual.nullable {
            def.push_str(self.nullability(nullable));
        }
        sql.push(format!("alter table {} modify ({})", target, def));

        if col.kind == ColumnKind::Boolean && actual.kind != ColumnKind::Boolean {
            sql.push(format!(
                "alter table {} add {}",
                target,
                self.boolean_check(table, &col.name)
            ));
        }
        Ok(sql)
    }

    fn fk_references(&self, fk: &ForeignKey, ref_pk: &[String]) -> String {
        let mut sql = format!(
            "references {} ({})",
            self.table_string(&fk.references.grain, &fk.references.table),
            quoted_list(self, ref_pk)
        );
        if fk.on_delete != FkRule::NoAction {
            sql.push_str(&format!(" on delete {}", fk.on_delete.sql()));
        }
        sql
    }

    fn create_fk(
        &self,
        table: &Table,
        fk: &ForeignKey,
        ref_pk: &[String],
        _current: &[String],
    ) -> Vec<String> {
        let mut sql = vec![format!(
            "alter table {} add constraint {} foreign key ({}) {}",
            self.table_string(&table.schema, &table.name),
            self.quote(&self.fk_name(fk)),
            quoted_list(self, &fk.columns),
            self.fk_references(fk, ref_pk)
        )];
        let Some(trigger) = self.update_rule_trigger_name(&self.fk_name(fk), fk.on_update) else {
            return sql;
        };
        let sets: Vec<String> = fk
            .columns
            .iter()
            .zip(ref_pk)
            .map(|(c, k)| match fk.on_update {
                FkRule::SetNull => format!("{} = null", self.quote(c)),
                _ => format!("{} = :new.{}", self.quote(c), self.quote(k)),
            })
            .collect();
        let matching: Vec<String> = fk
            .columns
            .iter()
            .zip(ref_pk)
            .map(|(c, k)| format!("{} = :old.{}", self.quote(c), self.quote(k)))
            .collect();
        sql.push(format!(
            "create or replace trigger {} after update of {} on {} for each row\n\
             begin\n  update {} set {} where {};\nend;",
            self.quote(&trigger),
            quoted_list(self, ref_pk),
            self.table_string(&fk.references.grain, &fk.references.table),
            self.table_string(&table.schema, &table.name),
            sets.join(", "),
            matching.join(" and ")
        ));
        sql
    }

    fn drop_fk(
        &self,
        schema: &str,
        fk: &DbFkInfo,
        _owner: Option<&Table>,
        ref_triggers: &BTreeSet<String>,
        _current: &[String],
    ) -> Vec<String> {
        let mut sql = vec![format!(
            "alter table {} drop constraint {}",
            self.stored_table_string(schema, &fk.table_name),
            self.quote(&fk.name)
        )];
        for rule in [FkRule::Cascade, FkRule::SetNull] {
            if let Some(name) = self.update_rule_trigger_name(&fk.name, rule) {
                if ref_triggers.contains(&name) {
                    sql.push(format!("drop trigger {}", self.quote(&name)));
                }
            }
        }
        sql
    }

    fn create_sequence(&self, seq: &Sequence) -> Vec<String> {
        vec![format!(
            "create sequence {} start with {}{}",
            self.sequence_string(&seq.schema, &seq.name),
            seq.start_with,
            self.sequence_options(seq)
        )]
    }

    fn alter_sequence(&self, seq: &Sequence) -> Vec<String> {
        vec![format!(
            "alter sequence {}{}",
            self.sequence_string(&seq.schema, &seq.name),
            self.sequence_options(seq)
        )]
    }

    fn create_parameterized_view(&self, pv: &ParameterizedView, base: &Table) -> Result<Vec<String>> {
        let row_type = self.quote(&self.row_type_name(&pv.schema, &pv.name));
        let table_type = self.quote(&self.table_type_name(&pv.schema, &pv.name));

        let projected = view::projected_columns(base, &pv.columns)?;
        let attributes: Vec<String> = projected
            .iter()
            .map(|(name, col)| format!("{} {}", self.quote(name), self.column_type(col)))
            .collect();
        let params: Vec<String> = pv
            .params
            .iter()
            .map(|p| format!("{} in {}", p.name, self.type_name(p.kind)))
            .collect();
        let select = view::select_sql(self, base, &pv.columns, &pv.filter, &|p| p.to_string())?;
        let row_values: Vec<String> = projected
            .iter()
            .map(|(name, _)| format!("curr.{}", self.quote(name)))
            .collect();

        Ok(vec![
            format!("create or replace type {} as object ({})", row_type, attributes.join(", ")),
            format!("create or replace type {} as table of {}", table_type, row_type),
            format!(
                "create or replace function {}({}) return {} pipelined is\n\
                 begin\n  for curr in ({}) loop\n    pipe row ({}({}));\n  end loop;\n  return;\nend;",
                self.table_string(&pv.schema, &pv.name),
                params.join(", "),
                table_type,
                select,
                row_type,
                row_values.join(", ")
            ),
        ])
    }

    fn drop_parameterized_view(&self, schema: &str, name: &str) -> Vec<String> {
        vec![
            format!("drop function {}", self.table_string(schema, name)),
            format!("drop type {}", self.quote(&self.table_type_name(schema, name))),
            format!("drop type {}", self.quote(&self.row_type_name(schema, name))),
        ]
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

    fn versioning_trigger_name(&self, table: &Table) -> String {
        self.limit_name(&self.object_name(&table.schema, &format!("{}_upd", table.name)))
    }

    fn create_versioning_trigger(&self, table: &Table) -> Vec<String> {
        let version = self.quote(RECVERSION);
        vec![format!(
            "create or replace trigger {} before update on {} for each row\n\
             begin\n  if :new.{v} <> :old.{v} then\n    \
             raise_application_error(-20001, 'record version check failure');\n  end if;\n  \
             :new.{v} := :new.{v} + 1;\nend;",
            self.quote(&self.versioning_trigger_name(table)),
            self.table_string(&table.schema, &table.name),
            v = version
        )]
    }

    fn create_mv_triggers(&self, base: &Table, mvs: &[&MaterializedView]) -> Result<Vec<String>> {
        let table = self.table_string(&base.schema, &base.name);
        let mut sql = Vec::new();
        for mv in mvs {
            mview::check_aggregates(mv, base)?;
            let marker = mview::checksum_marker(mv)?;
            let lock = format!(
                "  lock table {} in exclusive mode;\n",
                self.table_string(&mv.schema, &mv.name)
            );
            let insert = self.mv_insert_part(mv, base);
            let delete = self.mv_delete_part(mv, base);
            for event in TriggerEvent::ALL {
                let body = match event {
                    TriggerEvent::Insert => format!("  {}\n{}{}", marker, lock, insert),
                    TriggerEvent::Update => format!("{}{}{}", lock, delete, insert),
                    TriggerEvent::Delete => format!("{}{}", lock, delete),
                };
                sql.push(format!(
                    "create or replace trigger {} after {} on {} for each row\nbegin\n{}end;",
                    self.quote(&self.mv_trigger_name(mv, event)),
                    event.sql(),
                    table,
                    body
                ));
            }
        }
        Ok(sql)
    }
}
