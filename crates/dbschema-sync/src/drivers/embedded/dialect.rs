//! Embedded (SQLite) statement renderer.
//!
//! SQLite has no schemas, no sequences and almost no ALTER TABLE, so this
//! renderer leans on three emulations:
//!
//! - objects are named `grain_object` in the single database namespace;
//! - sequences are rows of the `<sys>_sequences` counter table, advanced by
//!   an `UPDATE ... RETURNING` (directly or from an AFTER INSERT trigger);
//! - column, primary-key and foreign-key changes rebuild the table.

use std::collections::BTreeSet;

use crate::core::identifier::quote_literal;
use crate::core::meta::{DbColumnInfo, DbFkInfo};
use crate::core::schema::{
    Column, ColumnKind, DefaultValue, ForeignKey, MaterializedView, ParameterizedView, Score,
    Sequence, Table,
};
use crate::dialect::mview;
use crate::dialect::{
    canonical_binary, canonical_bool, canonical_date, check_navigation, check_paging, order_part,
    quoted_list, strip_parens, where_part, DbType, Dialect, FromClause, TriggerEvent,
};
use crate::error::{MigrateError, Result};

/// Marker placed in a sequence-wiring trigger of a NOT NULL column.
pub(super) const NOT_NULL_MARKER: &str = "/* not null */";

/// Error text raised by the version check trigger.
const VERSION_CHECK_MESSAGE: &str = "record version check failure";

/// Prefix of the triggers feeding columns from sequences.
pub const SEQUENCE_TRIGGER_PREFIX: &str = "autoinc_";

/// SQLite dialect.
#[derive(Debug, Clone)]
pub struct EmbeddedDialect {
    pub(super) sys_schema: String,
}

impl EmbeddedDialect {
    pub fn new(sys_schema: impl Into<String>) -> Self {
        Self {
            sys_schema: sys_schema.into(),
        }
    }

    /// Quoted name of the counter table holding every sequence.
    pub fn sequences_table(&self) -> String {
        self.table_string(&self.sys_schema, "sequences")
    }

    fn sequence_key(&self, schema: &str, name: &str) -> String {
        format!(
            "\"grainid\" = {} and \"seqname\" = {}",
            quote_literal(schema),
            quote_literal(name)
        )
    }

    /// `UPDATE ... RETURNING` advancing one counter row.
    ///
    /// An exhausted non-cycling sequence stores NULL into the NOT NULL
    /// `seqvalue` column, so the statement fails instead of repeating a value.
    pub fn advance_sequence_sql(&self, schema: &str, name: &str, returning: bool) -> String {
        let mut sql = format!(
            "update {} set \"seqvalue\" = case \
             when (\"incrementby\" > 0 and \"seqvalue\" + \"incrementby\" > \"maxvalue\") \
             or (\"incrementby\" < 0 and \"seqvalue\" + \"incrementby\" < \"minvalue\") \
             then (case when \"cycle\" then (case when \"incrementby\" > 0 then \"minvalue\" else \"maxvalue\" end) else null end) \
             else \"seqvalue\" + \"incrementby\" end where {}",
            self.sequences_table(),
            self.sequence_key(schema, name)
        );
        if returning {
            sql.push_str(" returning \"seqvalue\"");
        }
        sql
    }

    /// Counter row `(grain, sequence)` feeding an auto-assigned column.
    pub(super) fn column_sequence(&self, table: &Table, col: &Column) -> Option<(String, String)> {
        if col.identity {
            Some((table.schema.clone(), table.identity_sequence_name()))
        } else {
            col.sequence
                .as_ref()
                .map(|s| (table.schema.clone(), s.clone()))
        }
    }

    /// Name of the AFTER INSERT trigger assigning `column` from its sequence.
    pub fn sequence_trigger_name(&self, schema: &str, table: &str, column: &str) -> String {
        self.limit_name(&format!("{}{}_{}_{}", SEQUENCE_TRIGGER_PREFIX, schema, table, column))
    }

    fn sequence_trigger(&self, table: &Table, col: &Column) -> Vec<String> {
        let Some((grain, seq)) = self.column_sequence(table, col) else {
            return Vec::new();
        };
        let name = self.sequence_trigger_name(&table.schema, &table.name, &col.name);
        let target = self.table_string(&table.schema, &table.name);
        let column = self.quote(&col.name);
        let marker = if col.nullable { "" } else { NOT_NULL_MARKER };
        vec![
            format!("drop trigger if exists {}", self.quote(&name)),
            format!(
                "create trigger {} after insert on {} for each row when NEW.{} is null\nbegin\n  {}\n  {};\n  update {} set {} = (select \"seqvalue\" from {} where {}) where rowid = NEW.rowid;\nend",
                self.quote(&name),
                target,
                column,
                marker,
                self.advance_sequence_sql(&grain, &seq, false),
                target,
                column,
                self.sequences_table(),
                self.sequence_key(&grain, &seq)
            ),
        ]
    }

    fn sequence_row(&self, seq: &Sequence) -> String {
        format!(
            "insert into {} (\"grainid\", \"seqname\", \"seqvalue\", \"incrementby\", \"minvalue\", \"maxvalue\", \"cycle\") \
             select {}, {}, {}, {}, {}, {}, {} where not exists (select 1 from {} where {})",
            self.sequences_table(),
            quote_literal(&seq.schema),
            quote_literal(&seq.name),
            seq.start_with.saturating_sub(seq.increment_by),
            seq.increment_by,
            seq.min_value,
            seq.max_value,
            i32::from(seq.cycle),
            self.sequences_table(),
            self.sequence_key(&seq.schema, &seq.name)
        )
    }

    /// Column definitions, PK and inline foreign keys of a table body.
    fn table_body(&self, table: &Table) -> String {
        let mut defs: Vec<String> = table
            .all_columns()
            .iter()
            .map(|c| self.column_definition(table, c))
            .collect();
        defs.push(self.pk_clause(table));
        for fk in &table.foreign_keys {
            defs.push(format!(
                "constraint {} foreign key ({}) references {} on update {} on delete {}",
                self.quote(&self.fk_name(fk)),
                quoted_list(self, &fk.columns),
                self.table_string(&fk.references.grain, &fk.references.table),
                fk.on_update.sql(),
                fk.on_delete.sql()
            ));
        }
        defs.join(",\n  ")
    }

    /// Indices, sequence wiring and versioning triggers of a freshly created table.
    fn table_extras(&self, table: &Table) -> Vec<String> {
        let mut sql = Vec::new();
        for index in &table.indices {
            sql.extend(self.create_index(table, index));
        }
        sql.extend(self.auto_increment(table, true));
        if table.versioned {
            sql.extend(self.create_versioning_trigger(table));
        }
        sql
    }

    /// Replace the stored table by the desired definition, keeping the data
    /// of every column present in both.
    pub fn rebuild(&self, table: &Table, current: &[String]) -> Vec<String> {
        let target = self.table_string(&table.schema, &table.name);
        let temp_name = self.object_name(&table.schema, &format!("{}__new", table.name));
        let temp = self.quote(&temp_name);

        let common: Vec<String> = table
            .all_columns()
            .into_iter()
            .map(|c| c.name)
            .filter(|name| current.contains(name))
            .collect();

        let mut sql = vec![format!("create table {} (\n  {}\n)", temp, self.table_body(table))];
        if !common.is_empty() {
            let cols = quoted_list(self, &common);
            sql.push(format!(
                "insert into {} ({}) select {} from {}",
                temp, cols, cols, target
            ));
        }
        sql.push(format!("drop table {}", target));
        sql.push(format!("alter table {} rename to {}", temp, target));
        sql.extend(self.table_extras(table));
        sql
    }

    /// Trigger names of the two versioning triggers.
    pub fn versioning_trigger_names(&self, table: &Table) -> [String; 2] {
        [
            self.object_name(&table.schema, &format!("{}_vchk", table.name)),
            self.object_name(&table.schema, &format!("{}_vinc", table.name)),
        ]
    }

    fn mv_insert_part(&self, mv: &MaterializedView, base: &Table) -> String {
        let mut cols = Vec::new();
        let mut values = Vec::new();
        for g in &mv.group_by {
            cols.push(self.quote(g));
            values.push(mview::group_value(self, base, g, "NEW."));
        }
        let mut sets = Vec::new();
        for (alias, delta) in mview::row_deltas(self, mv, "NEW.") {
            let column = self.quote(&alias);
            sets.push(format!("{c} = {c} + excluded.{c}", c = column));
            cols.push(column);
            values.push(delta);
        }
        format!(
            "insert into {} ({}) values ({}) on conflict ({}) do update set {};",
            self.table_string(&mv.schema, &mv.name),
            cols.join(", "),
            values.join(", "),
            quoted_list(self, &mv.group_by),
            sets.join(", ")
        )
    }

    fn mv_delete_part(&self, mv: &MaterializedView, base: &Table) -> String {
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

impl Dialect for EmbeddedDialect {
    fn db_type(&self) -> DbType {
        DbType::Embedded
    }

    fn max_identifier_length(&self) -> usize {
        30
    }

    fn uses_schemas(&self) -> bool {
        false
    }

    fn type_name(&self, kind: ColumnKind) -> &'static str {
        match kind {
            ColumnKind::Integer => "int",
            ColumnKind::String => "varchar",
            ColumnKind::Boolean => "boolean",
            ColumnKind::Floating => "real",
            ColumnKind::Decimal => "decimal",
            ColumnKind::Binary => "blob",
            ColumnKind::DateTime => "timestamp",
            ColumnKind::ZonedDateTime => "timestamp with time zone",
        }
    }

    fn column_type(&self, col: &Column) -> String {
        match col.kind {
            ColumnKind::String if col.max => "text".to_string(),
            ColumnKind::String => format!("varchar({})", col.length),
            ColumnKind::Decimal => format!("decimal({}, {})", col.precision, col.scale),
            kind => self.type_name(kind).to_string(),
        }
    }

    fn column_definition(&self, table: &Table, col: &Column) -> String {
        // Sequence-fed columns receive their value after the row exists.
        if col.is_auto_assigned() {
            return format!("{} {} null", self.quote(&col.name), self.column_type(col));
        }
        let mut def = format!("{} {}", self.quote(&col.name), self.column_type(col));
        if let Some(clause) = self.default_clause(table, col) {
            def.push(' ');
            def.push_str(&clause);
        }
        def.push_str(self.nullability(col.nullable));
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
            ColumnKind::Binary => canonical_binary(text),
            ColumnKind::DateTime | ColumnKind::ZonedDateTime => {
                if text.eq_ignore_ascii_case("current_timestamp") {
                    Some("GETDATE()".to_string())
                } else {
                    canonical_date(text)
                }
            }
            ColumnKind::Decimal => text
                .trim_matches('\'')
                .parse::<rust_decimal::Decimal>()
                .ok()
                .map(|d| d.normalize().to_string()),
            _ => Some(text.to_string()),
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
        if offset == 0 {
            sql.push_str(&format!(" limit {}", row_count));
        } else if row_count == 0 {
            sql.push_str(&format!(" limit -1 offset {}", offset));
        } else {
            sql.push_str(&format!(" limit {} offset {}", row_count, offset));
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
        format!("date({})", expr)
    }

    fn create_table(&self, table: &Table) -> Vec<String> {
        vec![format!(
            "create table {} (\n  {}\n)",
            self.table_string(&table.schema, &table.name),
            self.table_body(table)
        )]
    }

    fn create_column(&self, table: &Table, col: &Column, current: &[String]) -> Vec<String> {
        let needs_rebuild = table.primary_key.contains(&col.name)
            || matches!(col.default, Some(DefaultValue::Now))
            || (!col.nullable && col.default.is_none() && !col.is_auto_assigned());
        if needs_rebuild {
            return self.rebuild(table, current);
        }
        vec![format!(
            "alter table {} add column {}",
            self.table_string(&table.schema, &table.name),
            self.column_definition(table, col)
        )]
    }

    fn update_column(
        &self,
        table: &Table,
        _col: &Column,
        _actual: &DbColumnInfo,
        current: &[String],
    ) -> Result<Vec<String>> {
        Ok(self.rebuild(table, current))
    }

    fn create_pk(&self, table: &Table, current: &[String]) -> Vec<String> {
        self.rebuild(table, current)
    }

    fn drop_pk(&self, _table: &Table, _pk_name: &str, _current: &[String]) -> Vec<String> {
        // The following create_pk rebuild replaces the key.
        Vec::new()
    }

    fn create_fk(
        &self,
        table: &Table,
        _fk: &ForeignKey,
        _ref_pk: &[String],
        current: &[String],
    ) -> Vec<String> {
        self.rebuild(table, current)
    }

    fn drop_fk(
        &self,
        _schema: &str,
        _fk: &DbFkInfo,
        owner: Option<&Table>,
        _ref_triggers: &BTreeSet<String>,
        current: &[String],
    ) -> Vec<String> {
        owner.map(|t| self.rebuild(t, current)).unwrap_or_default()
    }

    fn create_sequence(&self, seq: &Sequence) -> Vec<String> {
        vec![self.sequence_row(seq)]
    }

    fn alter_sequence(&self, seq: &Sequence) -> Vec<String> {
        vec![format!(
            "update {} set \"incrementby\" = {}, \"minvalue\" = {}, \"maxvalue\" = {}, \"cycle\" = {} where {}",
            self.sequences_table(),
            seq.increment_by,
            seq.min_value,
            seq.max_value,
            i32::from(seq.cycle),
            self.sequence_key(&seq.schema, &seq.name)
        )]
    }

    fn drop_sequence(&self, schema: &str, name: &str) -> Vec<String> {
        vec![format!(
            "delete from {} where {}",
            self.sequences_table(),
            self.sequence_key(schema, name)
        )]
    }

    fn create_parameterized_view(&self, pv: &ParameterizedView, _base: &Table) -> Result<Vec<String>> {
        Err(MigrateError::Schema(format!(
            "parameterized view {}.{} is not supported by the embedded dialect",
            pv.schema, pv.name
        )))
    }

    fn drop_parameterized_view(&self, _schema: &str, _name: &str) -> Vec<String> {
        Vec::new()
    }

    fn auto_increment(&self, table: &Table, _identity_seq_exists: bool) -> Vec<String> {
        let mut sql = Vec::new();
        if table.columns.iter().any(|c| c.identity) {
            sql.push(self.sequence_row(&Sequence::new(&table.schema, table.identity_sequence_name())));
        }
        for col in table.columns.iter().filter(|c| c.is_auto_assigned()) {
            sql.extend(self.sequence_trigger(table, col));
        }
        sql
    }

    fn drop_auto_increment(
        &self,
        table: &Table,
        existing: &BTreeSet<String>,
        _identity_seq_exists: bool,
    ) -> Vec<String> {
        let wired: BTreeSet<String> = table
            .columns
            .iter()
            .filter(|c| c.is_auto_assigned())
            .map(|c| self.sequence_trigger_name(&table.schema, &table.name, &c.name))
            .collect();
        existing
            .iter()
            .filter(|name| name.starts_with(SEQUENCE_TRIGGER_PREFIX) && !wired.contains(*name))
            .flat_map(|name| self.drop_trigger(table, name))
            .collect()
    }

    fn create_sys_objects(&self) -> Vec<String> {
        vec![format!(
            "create table if not exists {} (\n  \"grainid\" varchar(30) not null,\n  \"seqname\" varchar(30) not null,\n  \"seqvalue\" int not null,\n  \"incrementby\" int not null,\n  \"minvalue\" int not null,\n  \"maxvalue\" int not null,\n  \"cycle\" boolean not null,\n  constraint {} primary key (\"grainid\", \"seqname\")\n)",
            self.sequences_table(),
            self.quote(&self.object_name(&self.sys_schema, "pk_sequences"))
        )]
    }

    fn versioning_trigger_name(&self, table: &Table) -> String {
        let [check, _] = self.versioning_trigger_names(table);
        check
    }

    fn create_versioning_trigger(&self, table: &Table) -> Vec<String> {
        let [check, increment] = self.versioning_trigger_names(table);
        let target = self.table_string(&table.schema, &table.name);
        // Updates issued by the sequence wiring leave the version alone.
        let wiring: String = table
            .columns
            .iter()
            .filter(|c| c.is_auto_assigned())
            .map(|c| format!(" and OLD.{} is not null", self.quote(&c.name)))
            .collect();
        // The only version change allowed is the bare +1 issued by the
        // incrementer below; any update touching data must carry the stored
        // version.
        let mut bump_only = vec!["NEW.\"recversion\" = OLD.\"recversion\" + 1".to_string()];
        bump_only.extend(
            table
                .columns
                .iter()
                .map(|c| format!("NEW.{0} is OLD.{0}", self.quote(&c.name))),
        );
        vec![
            format!(
                "create trigger {} before update on {} for each row \
                 when NEW.\"recversion\" <> OLD.\"recversion\" and not ({})\n\
                 begin\n  select raise(abort, '{}');\nend",
                self.quote(&check),
                target,
                bump_only.join(" and "),
                VERSION_CHECK_MESSAGE
            ),
            format!(
                "create trigger {} after update on {} for each row \
                 when NEW.\"recversion\" = OLD.\"recversion\"{}\n\
                 begin\n  update {} set \"recversion\" = OLD.\"recversion\" + 1 where rowid = NEW.rowid;\nend",
                self.quote(&increment),
                target,
                wiring,
                target
            ),
        ]
    }

    fn drop_versioning_trigger(&self, table: &Table, existing: &BTreeSet<String>) -> Vec<String> {
        self.versioning_trigger_names(table)
            .iter()
            .filter(|name| existing.contains(*name))
            .flat_map(|name| self.drop_trigger(table, name))
            .collect()
    }

    fn create_mv_triggers(&self, base: &Table, mvs: &[&MaterializedView]) -> Result<Vec<String>> {
        let target = self.table_string(&base.schema, &base.name);
        let mut sql = Vec::new();
        for mv in mvs {
            mview::check_aggregates(mv, base)?;
            let marker = mview::checksum_marker(mv)?;
            let insert = self.mv_insert_part(mv, base);
            let delete = self.mv_delete_part(mv, base);
            for event in TriggerEvent::ALL {
                let body = match event {
                    TriggerEvent::Insert => format!("{}\n  {}", marker, insert),
                    TriggerEvent::Delete => delete.clone(),
                    TriggerEvent::Update => format!("{}\n  {}\n  {}", marker, delete, insert),
                };
                sql.push(format!(
                    "create trigger {} after {} on {} for each row\nbegin\n  {}\nend",
                    self.quote(&self.mv_trigger_name(mv, event)),
                    event.sql(),
                    target,
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
            if let Some(pv) = grain.parameterized_views.first() {
                return Err(MigrateError::Schema(format!(
                    "parameterized view {}.{} is not supported by the embedded dialect",
                    grain.name, pv.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{Aggregate, AggregateFn, FkRule, Index, TableRef};

    fn dialect() -> EmbeddedDialect {
        EmbeddedDialect::new("dbschema")
    }

    fn orders() -> Table {
        Table::new("shop", "orders")
            .with_column(Column::new("id", ColumnKind::Integer).identity())
            .with_column(Column::string("title", 10))
            .with_pk(&["id"])
    }

    #[test]
    fn test_names_are_joined_and_limited() {
        let d = dialect();
        assert_eq!(d.table_string("shop", "orders"), "\"shop_orders\"");
        let long = d.object_name("shop", "a_table_with_a_rather_long_name");
        assert_eq!(long.len(), 30);
        assert_eq!(
            d.reference_key("shop", "orders"),
            (String::new(), "shop_orders".to_string())
        );
    }

    #[test]
    fn test_integer_is_not_a_rowid_alias() {
        let d = dialect();
        let sql = d.create_table(&orders()).join("\n");
        assert!(sql.contains("\"id\" int null"));
        assert!(!sql.contains("integer"));
        assert!(sql.contains("constraint \"pk_orders\" primary key (\"id\")"));
    }

    #[test]
    fn test_normalize_stored_default() {
        let d = dialect();
        assert_eq!(d.normalize_stored_default(ColumnKind::Integer, "NULL"), None);
        assert_eq!(d.normalize_stored_default(ColumnKind::Integer, "(0)").as_deref(), Some("0"));
        assert_eq!(d.normalize_stored_default(ColumnKind::Boolean, "true").as_deref(), Some("'TRUE'"));
        assert_eq!(
            d.normalize_stored_default(ColumnKind::DateTime, "CURRENT_TIMESTAMP").as_deref(),
            Some("GETDATE()")
        );
        assert_eq!(
            d.normalize_stored_default(ColumnKind::DateTime, "'2021-03-04'").as_deref(),
            Some("'20210304'")
        );
        assert_eq!(d.normalize_stored_default(ColumnKind::Binary, "X'0A0B'").as_deref(), Some("0x0A0B"));
        assert_eq!(d.normalize_stored_default(ColumnKind::Decimal, "1.50").as_deref(), Some("1.5"));
        assert_eq!(d.normalize_stored_default(ColumnKind::String, "'it''s'").as_deref(), Some("'it''s'"));
        assert_eq!(
            d.normalize_stored_default(ColumnKind::Integer, "NEXTVAL(shop_orders_seq)").as_deref(),
            Some("NEXTVAL(shop_orders_seq)")
        );
    }

    #[test]
    fn test_limited_select_paging() {
        let d = dialect();
        let from = FromClause::table(&d, "shop", "orders");
        assert_eq!(
            d.limited_select(&from, "", "\"id\"", 0, 5, "\"id\"").unwrap(),
            "select \"id\" from \"shop_orders\" order by \"id\" limit 5"
        );
        assert_eq!(
            d.limited_select(&from, "", "", 3, 0, "\"id\"").unwrap(),
            "select \"id\" from \"shop_orders\" limit -1 offset 3"
        );
        assert_eq!(
            d.limited_select(&from, "\"id\" > ?", "", 3, 2, "\"id\"").unwrap(),
            "select \"id\" from \"shop_orders\" where \"id\" > ? limit 2 offset 3"
        );
        assert!(d.limited_select(&from, "", "", 0, 0, "\"id\"").is_err());
        assert_eq!(
            d.record_set_select(&from, "", "", 0, 0, "\"id\"").unwrap(),
            "select \"id\" from \"shop_orders\""
        );
    }

    #[test]
    fn test_navigation_select_offsets() {
        let d = dialect();
        let from = FromClause::table(&d, "shop", "orders");
        let first = d.navigation_select(&from, "\"id\"", "\"id\" > ?", 0, "*").unwrap();
        assert_eq!(
            first,
            "select * from \"shop_orders\" where \"id\" > ? order by \"id\" limit 1 offset 0"
        );
        let third = d.navigation_select(&from, "\"id\"", "\"id\" > ?", 3, "*").unwrap();
        assert!(third.ends_with("limit 1 offset 2"));
        assert!(d.navigation_select(&from, "\"id\"", "", 1, "*").is_err());
    }

    #[test]
    fn test_create_column_chooses_alter_or_rebuild() {
        let d = dialect();
        let table = orders().with_column(Column::string("note", 5));
        let current = vec!["id".to_string(), "title".to_string()];
        let col = table.column("note").unwrap();
        assert_eq!(
            d.create_column(&table, col, &current),
            vec!["alter table \"shop_orders\" add column \"note\" varchar(5) null".to_string()]
        );

        let table = orders().with_column(Column::string("code", 5).not_null());
        let col = table.column("code").unwrap();
        let batch = d.create_column(&table, col, &current);
        assert!(batch[0].starts_with("create table \"shop_orders__new\""));
        assert_eq!(
            batch[1],
            "insert into \"shop_orders__new\" (\"id\", \"title\") select \"id\", \"title\" from \"shop_orders\""
        );
        assert_eq!(batch[2], "drop table \"shop_orders\"");
        assert_eq!(batch[3], "alter table \"shop_orders__new\" rename to \"shop_orders\"");
    }

    #[test]
    fn test_rebuild_restores_indices_and_triggers() {
        let d = dialect();
        let mut table = orders().versioned();
        table.indices.push(Index {
            name: "idx_orders_title".into(),
            columns: vec!["title".into()],
        });
        table.foreign_keys.push(ForeignKey {
            name: "fk_orders_customer".into(),
            columns: vec!["title".into()],
            references: TableRef {
                grain: "crm".into(),
                table: "customer".into(),
            },
            on_update: FkRule::Cascade,
            on_delete: FkRule::NoAction,
        });
        let batch = d.rebuild(&table, &["id".to_string()]);
        assert!(batch[0].contains(
            "constraint \"fk_orders_customer\" foreign key (\"title\") references \"crm_customer\" on update cascade on delete no action"
        ));
        assert!(batch.iter().any(|s| s.starts_with("create index \"shop_idx_orders_title\"")));
        assert!(batch.iter().any(|s| s.contains("\"autoinc_shop_orders_id\" after insert")));
        assert!(batch.iter().any(|s| s.contains("\"shop_orders_vchk\" before update")));
    }

    #[test]
    fn test_sequence_trigger_records_nullability() {
        let d = dialect();
        let batch = d.auto_increment(&orders(), false);
        assert!(batch[0].starts_with("insert into \"dbschema_sequences\""));
        assert!(batch[0].contains("'shop', 'orders_seq', 0, 1, 1,"));
        assert_eq!(batch[1], "drop trigger if exists \"autoinc_shop_orders_id\"");
        assert!(batch[2].contains(NOT_NULL_MARKER));
        assert!(batch[2].contains("\"seqname\" = 'orders_seq'"));
    }

    #[test]
    fn test_sequence_rows() {
        let d = dialect();
        let mut seq = Sequence::new("shop", "invoice_no");
        seq.start_with = 10;
        seq.increment_by = 5;
        let create = d.create_sequence(&seq).join("");
        assert!(create.contains("'shop', 'invoice_no', 5, 5, 1, 9223372036854775807, 0"));
        assert_eq!(
            d.drop_sequence("shop", "invoice_no"),
            vec!["delete from \"dbschema_sequences\" where \"grainid\" = 'shop' and \"seqname\" = 'invoice_no'".to_string()]
        );
        assert!(d.advance_sequence_sql("shop", "invoice_no", true).ends_with("returning \"seqvalue\""));
    }

    #[test]
    fn test_versioning_triggers() {
        let d = dialect();
        let table = orders().versioned();
        let sql = d.create_versioning_trigger(&table);
        assert_eq!(sql.len(), 2);
        assert!(sql[0].contains("raise(abort, 'record version check failure')"));
        assert!(sql[0].contains(
            "when NEW.\"recversion\" <> OLD.\"recversion\" and not (NEW.\"recversion\" = OLD.\"recversion\" + 1 and NEW.\"id\" is OLD.\"id\""
        ));
        assert!(sql[1].contains("OLD.\"id\" is not null"));
        let existing: BTreeSet<String> = ["shop_orders_vchk", "shop_orders_vinc", "other"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            d.drop_versioning_trigger(&table, &existing),
            vec![
                "drop trigger \"shop_orders_vchk\"".to_string(),
                "drop trigger \"shop_orders_vinc\"".to_string()
            ]
        );
    }

    #[test]
    fn test_mv_triggers_upsert_and_subtract() {
        let d = dialect();
        let base = orders();
        let mv = MaterializedView {
            name: "by_title".into(),
            schema: "shop".into(),
            from: "orders".into(),
            group_by: vec!["title".into()],
            aggregates: vec![Aggregate {
                alias: "total".into(),
                function: AggregateFn::Count,
                column: None,
            }],
        };
        let sql = d.create_mv_triggers(&base, &[&mv]).unwrap();
        assert_eq!(sql.len(), 3);
        assert!(sql[0].contains("on conflict (\"title\") do update set \"total\" = \"total\" + excluded.\"total\""));
        assert!(mview::extract_checksum(&sql[0]).is_some());
        assert!(sql[2].contains("\"surrogate_count\" = 0"));
        assert!(d.is_mv_trigger(&base, &d.mv_trigger_name(&mv, TriggerEvent::Delete)));
        assert_eq!(d.truncate_table("shop", "by_title"), "delete from \"shop_by_title\"");
    }

    #[test]
    fn test_parameterized_views_rejected() {
        let d = dialect();
        let pv = ParameterizedView {
            name: "orders_for".into(),
            schema: "shop".into(),
            from: "orders".into(),
            params: vec![],
            columns: vec![],
            filter: vec![],
        };
        assert!(matches!(
            d.create_parameterized_view(&pv, &orders()),
            Err(MigrateError::Schema(_))
        ));
    }
}
