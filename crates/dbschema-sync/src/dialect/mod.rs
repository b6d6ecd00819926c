//! Statement rendering shared by every dialect.
//!
//! [`Dialect`] is the per-database renderer: type mapping, identifier rules,
//! query building, DDL and trigger generation. Its default methods hold the
//! ANSI-flavoured behaviour most engines share; each driver overrides what its
//! engine spells differently. Renderers are pure (no I/O), so every statement
//! the engine can emit is unit-testable without a database.
//!
//! Facts a renderer cannot know by itself (which triggers already exist, what
//! the stored column looks like) are looked up by the caller and passed in.

pub mod mview;
pub mod query;
pub mod view;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::core::identifier::{self, quote_ident, quote_literal, RECVERSION};
use crate::core::meta::{DbColumnInfo, DbFkInfo, DbIndexInfo};
use crate::core::schema::{
    Column, ColumnKind, DefaultValue, ForeignKey, Index, MaterializedView, ParameterizedView,
    Score, Sequence, Table, View,
};
use crate::error::{MigrateError, Result};

pub use query::FromClause;

/// Supported target database kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbType {
    Embedded,
    Postgres,
    Mssql,
    Oracle,
    Firebird,
}

impl DbType {
    pub const ALL: [DbType; 5] = [
        DbType::Embedded,
        DbType::Postgres,
        DbType::Mssql,
        DbType::Oracle,
        DbType::Firebird,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DbType::Embedded => "embedded",
            DbType::Postgres => "postgres",
            DbType::Mssql => "mssql",
            DbType::Oracle => "oracle",
            DbType::Firebird => "firebird",
        }
    }
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DbType {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "embedded" | "sqlite" | "h2" => Ok(DbType::Embedded),
            "postgres" | "postgresql" | "pg" => Ok(DbType::Postgres),
            "mssql" | "sqlserver" | "sql_server" => Ok(DbType::Mssql),
            "oracle" | "ora" => Ok(DbType::Oracle),
            "firebird" | "fb" => Ok(DbType::Firebird),
            other => Err(MigrateError::Config(format!(
                "Unknown database type: '{}'. Supported types: embedded, postgres, mssql, oracle, firebird",
                other
            ))),
        }
    }
}

/// Data-change event a trigger reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEvent {
    Insert,
    Update,
    Delete,
}

impl TriggerEvent {
    pub const ALL: [TriggerEvent; 3] = [TriggerEvent::Insert, TriggerEvent::Update, TriggerEvent::Delete];

    pub fn tag(&self) -> &'static str {
        match self {
            TriggerEvent::Insert => "ins",
            TriggerEvent::Update => "upd",
            TriggerEvent::Delete => "del",
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            TriggerEvent::Insert => "insert",
            TriggerEvent::Update => "update",
            TriggerEvent::Delete => "delete",
        }
    }
}

/// Per-dialect statement renderer.
///
/// Identifier conventions differ per engine:
/// - Postgres, SQL Server: `"schema"."table"`
/// - Oracle, Firebird, embedded: `"schema_table"` (no schema namespaces used)
pub trait Dialect: Send + Sync {
    fn db_type(&self) -> DbType;

    // =========================================================================
    // Identifiers
    // =========================================================================

    /// Longest identifier the engine accepts.
    fn max_identifier_length(&self) -> usize;

    /// Deterministically collapse a name to the engine's limit.
    fn limit_name(&self, name: &str) -> String {
        identifier::limit_name(name, self.max_identifier_length())
    }

    fn quote(&self, name: &str) -> String {
        quote_ident(name)
    }

    /// Whether grains map to native schema namespaces.
    fn uses_schemas(&self) -> bool {
        true
    }

    /// Unquoted catalog name of a schema-level object.
    fn object_name(&self, schema: &str, name: &str) -> String {
        if self.uses_schemas() {
            name.to_string()
        } else {
            self.limit_name(&format!("{}_{}", schema, name))
        }
    }

    /// Fully qualified, quoted table (or view) reference.
    fn table_string(&self, schema: &str, name: &str) -> String {
        if self.uses_schemas() {
            format!("{}.{}", self.quote(schema), self.quote(name))
        } else {
            self.quote(&self.object_name(schema, name))
        }
    }

    fn sequence_string(&self, schema: &str, name: &str) -> String {
        self.table_string(schema, name)
    }

    /// Quoted reference to a table by the name its catalog reports.
    fn stored_table_string(&self, schema: &str, stored: &str) -> String {
        if self.uses_schemas() {
            format!("{}.{}", self.quote(schema), self.quote(stored))
        } else {
            self.quote(stored)
        }
    }

    fn pk_name(&self, table: &Table) -> String {
        self.limit_name(&table.pk_constraint_name())
    }

    fn fk_name(&self, fk: &ForeignKey) -> String {
        self.limit_name(&fk.name)
    }

    /// Catalog name of an index.
    fn index_name(&self, schema: &str, index: &Index) -> String {
        self.object_name(schema, &index.name)
    }

    /// `(grain, table)` pair a catalog reports for a foreign-key target.
    ///
    /// Dialects without schema namespaces only know the joined object name.
    fn reference_key(&self, grain: &str, table: &str) -> (String, String) {
        if self.uses_schemas() {
            (grain.to_string(), table.to_string())
        } else {
            (String::new(), self.object_name(grain, table))
        }
    }

    /// Positional parameter placeholder (1-based).
    fn param_placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    // =========================================================================
    // Type mapping
    // =========================================================================

    /// Base native type name for a column kind.
    fn type_name(&self, kind: ColumnKind) -> &'static str;

    /// Native type including length, precision and scale.
    fn column_type(&self, col: &Column) -> String {
        match col.kind {
            ColumnKind::String if !col.max => format!("{}({})", self.type_name(col.kind), col.length),
            ColumnKind::Decimal => format!("{}({}, {})", self.type_name(col.kind), col.precision, col.scale),
            _ => self.type_name(col.kind).to_string(),
        }
    }

    /// Literal syntax for a typed value.
    fn literal(&self, value: &DefaultValue) -> String {
        match value {
            DefaultValue::Integer(v) => v.to_string(),
            DefaultValue::Floating(v) => v.to_string(),
            DefaultValue::Decimal(v) => v.to_string(),
            DefaultValue::Boolean(true) => "true".to_string(),
            DefaultValue::Boolean(false) => "false".to_string(),
            DefaultValue::Text(v) => quote_literal(v),
            DefaultValue::Binary(v) => format!("X'{}'", hex::encode_upper(v)),
            DefaultValue::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
            DefaultValue::Now => "CURRENT_TIMESTAMP".to_string(),
        }
    }

    /// `default ...` clause for a sequence-backed column, where the engine
    /// can express it declaratively.
    fn sequence_default(&self, _schema: &str, _sequence: &str) -> Option<String> {
        None
    }

    /// `default ...` clause of a column, if any.
    fn default_clause(&self, table: &Table, col: &Column) -> Option<String> {
        if col.identity {
            return None;
        }
        if let Some(seq) = &col.sequence {
            return self.sequence_default(&table.schema, seq);
        }
        col.default
            .as_ref()
            .map(|d| format!("default {}", self.literal(d)))
    }

    /// Nullability suffix.
    fn nullability(&self, nullable: bool) -> &'static str {
        if nullable {
            " null"
        } else {
            " not null"
        }
    }

    /// Full column definition for CREATE TABLE / ADD COLUMN.
    fn column_definition(&self, table: &Table, col: &Column) -> String {
        let mut def = format!("{} {}", self.quote(&col.name), self.column_type(col));
        if let Some(clause) = self.default_clause(table, col) {
            def.push(' ');
            def.push_str(&clause);
        }
        def.push_str(self.nullability(col.nullable));
        def
    }

    /// Whether identity columns use the engine's native auto-increment.
    fn native_identity(&self) -> bool {
        false
    }

    /// Canonical default the catalog is expected to report for `col`.
    fn canonical_default(&self, table: &Table, col: &Column) -> Option<String> {
        if col.identity {
            return Some(if self.native_identity() {
                "IDENTITY".to_string()
            } else {
                format!(
                    "NEXTVAL({})",
                    self.object_name(&table.schema, &table.identity_sequence_name())
                )
            });
        }
        if let Some(seq) = &col.sequence {
            return Some(format!("NEXTVAL({})", self.object_name(&table.schema, seq)));
        }
        col.default.as_ref().map(DefaultValue::canonical)
    }

    /// Map a stored default expression to canonical form.
    ///
    /// Returns `None` when the stored text denotes "no default".
    fn normalize_stored_default(&self, kind: ColumnKind, raw: &str) -> Option<String>;

    // =========================================================================
    // Query building
    // =========================================================================

    /// Quoted field list; large objects are skipped unless requested.
    fn field_list(&self, table: &Table, requested: &[&str], exclude_blobs: bool) -> String {
        let mut fields: Vec<String> = if requested.is_empty() {
            table
                .columns
                .iter()
                .filter(|c| !(exclude_blobs && is_large_object(c)))
                .map(|c| self.quote(&c.name))
                .collect()
        } else {
            table
                .columns
                .iter()
                .filter(|c| requested.contains(&c.name.as_str()))
                .map(|c| self.quote(&c.name))
                .collect()
        };
        if table.versioned {
            fields.push(self.quote(RECVERSION));
        }
        fields.join(", ")
    }

    /// Unlimited select.
    fn select_with_order_by(
        &self,
        from: &FromClause,
        where_clause: &str,
        order_by: &str,
        fields: &str,
    ) -> String {
        let mut sql = format!("select {} from {}", fields, from.expression);
        if !where_clause.is_empty() {
            sql.push_str(&format!(" where {}", where_clause));
        }
        if !order_by.is_empty() {
            sql.push_str(&format!(" order by {}", order_by));
        }
        sql
    }

    /// Rows `[offset, offset + row_count)`; `row_count == 0` means "to the end".
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when both `offset` and `row_count` are zero; that case
    /// belongs to [`Dialect::record_set_select`].
    fn limited_select(
        &self,
        from: &FromClause,
        where_clause: &str,
        order_by: &str,
        offset: u64,
        row_count: u64,
        fields: &str,
    ) -> Result<String>;

    /// Unlimited or limited select depending on the paging arguments.
    fn record_set_select(
        &self,
        from: &FromClause,
        where_clause: &str,
        order_by: &str,
        offset: u64,
        row_count: u64,
        fields: &str,
    ) -> Result<String> {
        if offset == 0 && row_count == 0 {
            Ok(self.select_with_order_by(from, where_clause, order_by, fields))
        } else {
            self.limited_select(from, where_clause, order_by, offset, row_count, fields)
        }
    }

    /// Single row at a navigational position after `position_predicate`.
    ///
    /// `offset` 0 and 1 both address the first matching row; `offset` k
    /// addresses the k-th.
    fn navigation_select(
        &self,
        from: &FromClause,
        order_by: &str,
        position_predicate: &str,
        offset: u64,
        fields: &str,
    ) -> Result<String>;

    fn count_select(&self, from: &FromClause, where_clause: &str) -> String {
        let mut sql = format!("select count(*) from {}", from.expression);
        if !where_clause.is_empty() {
            sql.push_str(&format!(" where {}", where_clause));
        }
        sql
    }

    /// Parameterized UPDATE by primary key; `recversion` leads the SET list of
    /// versioned tables.
    fn update_statement(&self, table: &Table, fields: &[&str]) -> String {
        let mut param = 0;
        let mut next = || {
            param += 1;
            self.param_placeholder(param)
        };
        let mut sets = Vec::new();
        if table.versioned {
            sets.push(format!("{} = {}", self.quote(RECVERSION), next()));
        }
        for f in fields.iter().filter(|f| **f != RECVERSION) {
            sets.push(format!("{} = {}", self.quote(f), next()));
        }
        let keys: Vec<String> = table
            .primary_key
            .iter()
            .map(|k| format!("{} = {}", self.quote(k), next()))
            .collect();
        format!(
            "update {} set {} where {}",
            self.table_string(&table.schema, &table.name),
            sets.join(", "),
            keys.join(" and ")
        )
    }

    /// Call syntax for selecting from a parameterized view.
    fn function_call(&self, schema: &str, name: &str, arg_count: usize) -> String {
        let args: Vec<String> = (1..=arg_count).map(|i| self.param_placeholder(i)).collect();
        format!("{}({})", self.table_string(schema, name), args.join(", "))
    }

    /// Truncate a timestamp expression to its day.
    fn trunc_date(&self, expr: &str) -> String;

    // =========================================================================
    // DDL
    // =========================================================================

    fn create_schema(&self, schema: &str) -> Vec<String> {
        if self.uses_schemas() {
            vec![format!("create schema {}", self.quote(schema))]
        } else {
            Vec::new()
        }
    }

    /// Inline primary key clause of CREATE TABLE.
    fn pk_clause(&self, table: &Table) -> String {
        format!(
            "constraint {} primary key ({})",
            self.quote(&self.pk_name(table)),
            quoted_list(self, &table.primary_key)
        )
    }

    fn create_table(&self, table: &Table) -> Vec<String> {
        let mut defs: Vec<String> = table
            .all_columns()
            .iter()
            .map(|c| self.column_definition(table, c))
            .collect();
        defs.extend(self.column_checks(table));
        defs.push(self.pk_clause(table));
        vec![format!(
            "create table {} (\n  {}\n)",
            self.table_string(&table.schema, &table.name),
            defs.join(",\n  ")
        )]
    }

    /// Table-level CHECK constraints emulating missing native types.
    fn column_checks(&self, _table: &Table) -> Vec<String> {
        Vec::new()
    }

    fn drop_table(&self, schema: &str, name: &str) -> Vec<String> {
        vec![format!("drop table {}", self.table_string(schema, name))]
    }

    /// Add a column; `current` lists the columns stored right now.
    fn create_column(&self, table: &Table, col: &Column, _current: &[String]) -> Vec<String> {
        vec![format!(
            "alter table {} add {}",
            self.table_string(&table.schema, &table.name),
            self.column_definition(table, col)
        )]
    }

    /// Ordered batch turning the stored column into the desired one.
    fn update_column(
        &self,
        table: &Table,
        col: &Column,
        actual: &DbColumnInfo,
        current: &[String],
    ) -> Result<Vec<String>>;

    fn create_pk(&self, table: &Table, _current: &[String]) -> Vec<String> {
        vec![format!(
            "alter table {} add {}",
            self.table_string(&table.schema, &table.name),
            self.pk_clause(table)
        )]
    }

    fn drop_pk(&self, table: &Table, pk_name: &str, _current: &[String]) -> Vec<String> {
        vec![format!(
            "alter table {} drop constraint {}",
            self.table_string(&table.schema, &table.name),
            self.quote(pk_name)
        )]
    }

    /// `references ... on update ... on delete ...` tail of a foreign key.
    fn fk_references(&self, fk: &ForeignKey, ref_pk: &[String]) -> String {
        format!(
            "references {} ({}) on update {} on delete {}",
            self.table_string(&fk.references.grain, &fk.references.table),
            quoted_list(self, ref_pk),
            fk.on_update.sql(),
            fk.on_delete.sql()
        )
    }

    fn create_fk(
        &self,
        table: &Table,
        fk: &ForeignKey,
        ref_pk: &[String],
        _current: &[String],
    ) -> Vec<String> {
        vec![format!(
            "alter table {} add constraint {} foreign key ({}) {}",
            self.table_string(&table.schema, &table.name),
            self.quote(&self.fk_name(fk)),
            quoted_list(self, &fk.columns),
            self.fk_references(fk, ref_pk)
        )]
    }

    /// Drop a foreign key.
    ///
    /// `owner` is the desired definition of the child table (absent when the
    /// table itself is being dropped), `ref_triggers` the triggers currently
    /// defined on the referenced table.
    fn drop_fk(
        &self,
        schema: &str,
        fk: &DbFkInfo,
        _owner: Option<&Table>,
        _ref_triggers: &BTreeSet<String>,
        _current: &[String],
    ) -> Vec<String> {
        vec![format!(
            "alter table {} drop constraint {}",
            self.stored_table_string(schema, &fk.table_name),
            self.quote(&fk.name)
        )]
    }

    fn create_index(&self, table: &Table, index: &Index) -> Vec<String> {
        vec![format!(
            "create index {} on {} ({})",
            self.quote(&self.index_name(&table.schema, index)),
            self.table_string(&table.schema, &table.name),
            quoted_list(self, &index.columns)
        )]
    }

    fn drop_index(&self, _schema: &str, index: &DbIndexInfo) -> Vec<String> {
        vec![format!("drop index {}", self.quote(index.raw_name()))]
    }

    fn create_sequence(&self, seq: &Sequence) -> Vec<String> {
        vec![format!(
            "create sequence {} start with {}{}",
            self.sequence_string(&seq.schema, &seq.name),
            seq.start_with,
            sequence_options(seq)
        )]
    }

    fn alter_sequence(&self, seq: &Sequence) -> Vec<String> {
        vec![format!(
            "alter sequence {}{}",
            self.sequence_string(&seq.schema, &seq.name),
            sequence_options(seq)
        )]
    }

    fn drop_sequence(&self, schema: &str, name: &str) -> Vec<String> {
        vec![format!("drop sequence {}", self.sequence_string(schema, name))]
    }

    fn create_view(&self, view: &View, base: &Table) -> Result<Vec<String>> {
        let select = view::select_sql(self, base, &view.columns, &view.filter, &|p| p.to_string())?;
        Ok(vec![format!(
            "create view {} as {}",
            self.table_string(&view.schema, &view.name),
            select
        )])
    }

    fn drop_view(&self, schema: &str, name: &str) -> Vec<String> {
        vec![format!("drop view {}", self.table_string(schema, name))]
    }

    fn create_parameterized_view(&self, pv: &ParameterizedView, base: &Table) -> Result<Vec<String>>;

    fn drop_parameterized_view(&self, schema: &str, name: &str) -> Vec<String>;

    /// Identity/sequence wiring run after the table exists.
    ///
    /// `identity_seq_exists` tells whether the implicit `<table>_seq` sequence
    /// is already stored.
    fn auto_increment(&self, _table: &Table, _identity_seq_exists: bool) -> Vec<String> {
        Vec::new()
    }

    /// Remove identity/sequence wiring no longer declared by `table`.
    ///
    /// `existing` are the table's triggers; `identity_seq_exists` tells
    /// whether the implicit `<table>_seq` sequence is stored.
    fn drop_auto_increment(
        &self,
        _table: &Table,
        _existing: &BTreeSet<String>,
        _identity_seq_exists: bool,
    ) -> Vec<String> {
        Vec::new()
    }

    // =========================================================================
    // Triggers
    // =========================================================================

    /// Engine-wide helper objects (functions, exceptions) created once.
    fn create_sys_objects(&self) -> Vec<String> {
        Vec::new()
    }

    fn versioning_trigger_name(&self, table: &Table) -> String;

    fn create_versioning_trigger(&self, table: &Table) -> Vec<String>;

    fn drop_trigger(&self, _table: &Table, name: &str) -> Vec<String> {
        vec![format!("drop trigger {}", self.quote(name))]
    }

    /// Drop the versioning trigger(s) among `existing`.
    fn drop_versioning_trigger(&self, table: &Table, existing: &BTreeSet<String>) -> Vec<String> {
        let name = self.versioning_trigger_name(table);
        if existing.contains(&name) {
            self.drop_trigger(table, &name)
        } else {
            Vec::new()
        }
    }

    /// Whether a stored trigger on `table` belongs to materialized-view
    /// maintenance. The `mv<event>_` marker leads every such name and
    /// `limit_name` only ever replaces the tail.
    fn is_mv_trigger(&self, table: &Table, name: &str) -> bool {
        name != self.versioning_trigger_name(table)
            && TriggerEvent::ALL
                .iter()
                .any(|e| name.starts_with(&format!("mv{}_", e.tag())))
    }

    /// Name of a materialized-view maintenance trigger.
    fn mv_trigger_name(&self, mv: &MaterializedView, event: TriggerEvent) -> String {
        let target = if self.uses_schemas() {
            format!("{}_{}", mv.from, mv.name)
        } else {
            format!("{}_{}_{}", mv.schema, mv.from, mv.name)
        };
        self.limit_name(&format!("mv{}_{}", event.tag(), target))
    }

    /// The three maintenance triggers for every view fed by `base`.
    fn create_mv_triggers(&self, base: &Table, mvs: &[&MaterializedView]) -> Result<Vec<String>>;

    /// Drop every maintenance trigger among the base table's `existing` triggers.
    fn drop_mv_triggers(&self, base: &Table, existing: &BTreeSet<String>) -> Vec<String> {
        existing
            .iter()
            .filter(|name| self.is_mv_trigger(base, name))
            .flat_map(|name| self.drop_trigger(base, name))
            .collect()
    }

    fn truncate_table(&self, schema: &str, name: &str) -> String {
        format!("truncate table {}", self.table_string(schema, name))
    }

    /// Re-populate a materialized view from its base table.
    fn init_mv_data(&self, mv: &MaterializedView, base: &Table) -> Result<Vec<String>> {
        Ok(vec![
            self.truncate_table(&mv.schema, &mv.name),
            mview::populate_sql(self, mv, base)?,
        ])
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Reject score features the engine cannot express, before any DDL.
    fn check_score(&self, _score: &Score) -> Result<()> {
        Ok(())
    }
}

/// Binary and unbounded string columns.
pub fn is_large_object(col: &Column) -> bool {
    col.kind == ColumnKind::Binary || (col.kind == ColumnKind::String && col.max)
}

/// Comma-separated quoted identifiers.
pub fn quoted_list<D: Dialect + ?Sized>(dialect: &D, names: &[String]) -> String {
    names
        .iter()
        .map(|n| dialect.quote(n))
        .collect::<Vec<_>>()
        .join(", ")
}

/// ANSI `increment by ... minvalue ... maxvalue ... [no] cycle` options.
pub fn sequence_options(seq: &Sequence) -> String {
    format!(
        " increment by {} minvalue {} maxvalue {} {}",
        seq.increment_by,
        seq.min_value,
        seq.max_value,
        if seq.cycle { "cycle" } else { "no cycle" }
    )
}

/// Guard shared by every `limited_select`.
pub fn check_paging(offset: u64, row_count: u64) -> Result<()> {
    if offset == 0 && row_count == 0 {
        return Err(MigrateError::InvalidArgument(
            "limited select requires a non-zero offset or row count".into(),
        ));
    }
    Ok(())
}

/// Guard shared by every `navigation_select`.
pub fn check_navigation(position_predicate: &str) -> Result<()> {
    if position_predicate.trim().is_empty() {
        return Err(MigrateError::InvalidArgument(
            "navigation select requires a position predicate".into(),
        ));
    }
    Ok(())
}

/// `where ` prefix when a clause is present.
pub fn where_part(where_clause: &str) -> String {
    if where_clause.is_empty() {
        String::new()
    } else {
        format!(" where {}", where_clause)
    }
}

/// ` order by ` suffix when an ordering is present.
pub fn order_part(order_by: &str) -> String {
    if order_by.is_empty() {
        String::new()
    } else {
        format!(" order by {}", order_by)
    }
}

/// Strip redundant outer parentheses: `((0))` becomes `0`.
pub fn strip_parens(raw: &str) -> &str {
    let mut text = raw.trim();
    while text.starts_with('(') && text.ends_with(')') && closes_at_end(text) {
        text = text[1..text.len() - 1].trim();
    }
    text
}

fn closes_at_end(text: &str) -> bool {
    let mut depth = 0usize;
    let mut in_quote = false;
    for (i, ch) in text.char_indices() {
        match ch {
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return i == text.len() - 1;
                }
            }
            _ => {}
        }
    }
    false
}

/// Canonical `'YYYYMMDD'` form of a stored date literal.
pub fn canonical_date(raw: &str) -> Option<String> {
    let inner = raw.trim().strip_prefix('\'')?.strip_suffix('\'')?;
    let day = inner.get(..10).unwrap_or(inner);
    chrono::NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .or_else(|_| chrono::NaiveDate::parse_from_str(inner.get(..8).unwrap_or(inner), "%Y%m%d"))
        .ok()
        .map(|d| format!("'{}'", d.format("%Y%m%d")))
}

/// Canonical boolean literal from the usual stored spellings.
pub fn canonical_bool(raw: &str) -> Option<String> {
    let text = raw.trim().trim_matches('\'');
    match text.to_ascii_lowercase().as_str() {
        "true" | "1" | "t" | "y" => Some("'TRUE'".to_string()),
        "false" | "0" | "f" | "n" => Some("'FALSE'".to_string()),
        _ => None,
    }
}

/// `0xCAFE` form of a stored hex literal (`X'CAFE'`, `'\\xcafe'`, `0xCAFE`).
pub fn canonical_binary(raw: &str) -> Option<String> {
    let text = raw.trim();
    let digits = if let Some(rest) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        rest
    } else if let Some(rest) = text.strip_prefix("X'").or_else(|| text.strip_prefix("x'")) {
        rest.strip_suffix('\'')?
    } else if let Some(rest) = text.strip_prefix("'\\x") {
        rest.split('\'').next()?
    } else {
        return None;
    };
    if digits.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(format!("0x{}", digits.to_ascii_uppercase()))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_type_aliases() {
        assert_eq!("sqlite".parse::<DbType>().unwrap(), DbType::Embedded);
        assert_eq!("H2".parse::<DbType>().unwrap(), DbType::Embedded);
        assert_eq!("postgresql".parse::<DbType>().unwrap(), DbType::Postgres);
        assert_eq!("sqlserver".parse::<DbType>().unwrap(), DbType::Mssql);
        assert_eq!("oracle".parse::<DbType>().unwrap(), DbType::Oracle);
        assert_eq!("fb".parse::<DbType>().unwrap(), DbType::Firebird);
        let err = "mysql".parse::<DbType>().unwrap_err();
        assert!(err.to_string().contains("Unknown database type"));
    }

    #[test]
    fn test_check_paging() {
        assert!(matches!(check_paging(0, 0), Err(MigrateError::InvalidArgument(_))));
        assert!(check_paging(0, 1).is_ok());
        assert!(check_paging(5, 0).is_ok());
    }

    #[test]
    fn test_sequence_options() {
        let mut seq = Sequence::new("g", "s");
        seq.max_value = 100;
        seq.cycle = true;
        assert_eq!(
            sequence_options(&seq),
            " increment by 1 minvalue 1 maxvalue 100 cycle"
        );
    }

    #[test]
    fn test_strip_parens() {
        assert_eq!(strip_parens("((0))"), "0");
        assert_eq!(strip_parens("(1) + (2)"), "(1) + (2)");
        assert_eq!(strip_parens("('a)')"), "'a)'");
    }

    #[test]
    fn test_canonical_literals() {
        assert_eq!(canonical_date("'2021-03-04'").as_deref(), Some("'20210304'"));
        assert_eq!(canonical_date("'2021-03-04 00:00:00'").as_deref(), Some("'20210304'"));
        assert_eq!(canonical_date("'20210304'").as_deref(), Some("'20210304'"));
        assert_eq!(canonical_bool("1").as_deref(), Some("'TRUE'"));
        assert_eq!(canonical_bool("'false'").as_deref(), Some("'FALSE'"));
        assert_eq!(canonical_binary("X'cafe'").as_deref(), Some("0xCAFE"));
        assert_eq!(canonical_binary("'\\xcafe'::bytea").as_deref(), Some("0xCAFE"));
        assert_eq!(canonical_binary("0x0A").as_deref(), Some("0x0A"));
    }
}
