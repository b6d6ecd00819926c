//! Desired-state schema model.
//!
//! A [`Score`] is the authored, dialect-independent description of every
//! grain (schema namespace) the engine manages. It is loaded once per process
//! from YAML, resolved (owning schema names filled in, default constraint names
//! generated), validated, and then treated as immutable for the whole run.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::identifier::{quote_literal, validate_identifier, RECVERSION};
use crate::error::{MigrateError, Result};

/// Name of the hidden row-count column of materialized views.
pub const SURROGATE_COUNT: &str = "surrogate_count";

/// Abstract column kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    #[serde(alias = "int")]
    Integer,
    #[serde(alias = "varchar", alias = "text")]
    String,
    #[serde(alias = "bit", alias = "bool")]
    Boolean,
    #[serde(alias = "real", alias = "float")]
    Floating,
    #[serde(alias = "numeric")]
    Decimal,
    #[serde(alias = "blob")]
    Binary,
    #[serde(rename = "datetime", alias = "timestamp")]
    DateTime,
    #[serde(rename = "zoned_datetime", alias = "timestamptz")]
    ZonedDateTime,
}

impl ColumnKind {
    /// Kinds that may be summed by materialized views.
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnKind::Integer | ColumnKind::Floating | ColumnKind::Decimal)
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnKind::Integer => "integer",
            ColumnKind::String => "string",
            ColumnKind::Boolean => "boolean",
            ColumnKind::Floating => "floating",
            ColumnKind::Decimal => "decimal",
            ColumnKind::Binary => "binary",
            ColumnKind::DateTime => "datetime",
            ColumnKind::ZonedDateTime => "zoned_datetime",
        };
        f.write_str(name)
    }
}

/// A typed default value.
///
/// Every dialect renders these through its own literal syntax, and stored
/// defaults read back from a catalog are normalized to [`DefaultValue::canonical`]
/// form before comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    Integer(i64),
    Floating(f64),
    Decimal(Decimal),
    Boolean(bool),
    Text(String),
    Binary(Vec<u8>),
    Date(NaiveDate),
    /// Current timestamp at insert time.
    Now,
}

impl DefaultValue {
    /// Parse an authored literal for a column of `kind`.
    pub fn parse(kind: ColumnKind, literal: &str) -> Result<Self> {
        let text = literal.trim();
        let bad = |why: &str| {
            MigrateError::Schema(format!(
                "Malformed {} default {:?}: {}",
                kind, literal, why
            ))
        };

        match kind {
            ColumnKind::Integer => text
                .parse::<i64>()
                .map(DefaultValue::Integer)
                .map_err(|_| bad("expected an integer")),
            ColumnKind::Floating => text
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(DefaultValue::Floating)
                .ok_or_else(|| bad("expected a number")),
            ColumnKind::Decimal => text
                .parse::<Decimal>()
                .map(DefaultValue::Decimal)
                .map_err(|_| bad("expected a decimal")),
            ColumnKind::Boolean => match unquote(text).unwrap_or(text).to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(DefaultValue::Boolean(true)),
                "false" | "0" => Ok(DefaultValue::Boolean(false)),
                _ => Err(bad("expected true or false")),
            },
            ColumnKind::String => unquote(text)
                .map(|s| DefaultValue::Text(s.replace("''", "'")))
                .ok_or_else(|| bad("expected a quoted string")),
            ColumnKind::Binary => {
                let digits = text
                    .strip_prefix("0x")
                    .or_else(|| text.strip_prefix("0X"))
                    .ok_or_else(|| bad("expected 0x-prefixed hex"))?;
                hex::decode(digits)
                    .map(DefaultValue::Binary)
                    .map_err(|_| bad("invalid hex digits"))
            }
            ColumnKind::DateTime | ColumnKind::ZonedDateTime => {
                if text.eq_ignore_ascii_case("GETDATE()") {
                    return Ok(DefaultValue::Now);
                }
                if kind == ColumnKind::ZonedDateTime {
                    return Err(bad("only GETDATE() is supported"));
                }
                let inner = unquote(text).ok_or_else(|| bad("expected GETDATE() or a quoted date"))?;
                NaiveDate::parse_from_str(inner, "%Y%m%d")
                    .or_else(|_| NaiveDate::parse_from_str(inner, "%Y-%m-%d"))
                    .map(DefaultValue::Date)
                    .map_err(|_| bad("expected 'YYYYMMDD' or 'YYYY-MM-DD'"))
            }
        }
    }

    /// Dialect-independent canonical literal.
    pub fn canonical(&self) -> String {
        match self {
            DefaultValue::Integer(v) => v.to_string(),
            DefaultValue::Floating(v) => v.to_string(),
            DefaultValue::Decimal(v) => v.normalize().to_string(),
            DefaultValue::Boolean(true) => "'TRUE'".to_string(),
            DefaultValue::Boolean(false) => "'FALSE'".to_string(),
            DefaultValue::Text(v) => quote_literal(v),
            DefaultValue::Binary(v) => format!("0x{}", hex::encode_upper(v)),
            DefaultValue::Date(d) => format!("'{}'", d.format("%Y%m%d")),
            DefaultValue::Now => "GETDATE()".to_string(),
        }
    }
}

fn unquote(text: &str) -> Option<&str> {
    text.strip_prefix('\'').and_then(|s| s.strip_suffix('\''))
}

/// A scalar literal as written in YAML (`0`, `true`, `'x'`, `GETDATE()`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Literal {
    fn into_text(self) -> String {
        match self {
            Literal::Bool(v) => v.to_string(),
            Literal::Int(v) => v.to_string(),
            Literal::Float(v) => v.to_string(),
            Literal::Text(v) => v,
        }
    }
}

fn default_true() -> bool {
    true
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// Serialized shape of a column.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawColumn {
    name: String,
    kind: ColumnKind,
    #[serde(default = "default_true")]
    nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    length: Option<u32>,
    #[serde(default, skip_serializing_if = "is_false")]
    max: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    precision: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scale: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default: Option<Literal>,
    #[serde(default, skip_serializing_if = "is_false")]
    identity: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sequence: Option<String>,
}

/// A table column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawColumn", into = "RawColumn")]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
    pub nullable: bool,
    /// Declared length of a bounded string.
    pub length: u32,
    /// Unbounded string (clob family).
    pub max: bool,
    pub precision: u32,
    pub scale: u32,
    pub default: Option<DefaultValue>,
    /// Value assigned automatically on insert.
    pub identity: bool,
    /// Explicit grain sequence feeding this column.
    pub sequence: Option<String>,
}

impl TryFrom<RawColumn> for Column {
    type Error = MigrateError;

    fn try_from(raw: RawColumn) -> Result<Self> {
        let (length, max) = match raw.kind {
            ColumnKind::String => match (raw.length, raw.max) {
                (_, true) => (0, true),
                (Some(len), false) if len > 0 => (len, false),
                _ => {
                    return Err(MigrateError::Schema(format!(
                        "String column {} requires a positive length or max: true",
                        raw.name
                    )))
                }
            },
            _ => (0, false),
        };
        let (precision, scale) = match raw.kind {
            ColumnKind::Decimal => {
                let precision = raw.precision.ok_or_else(|| {
                    MigrateError::Schema(format!("Decimal column {} requires precision", raw.name))
                })?;
                let scale = raw.scale.unwrap_or(0);
                if precision == 0 || scale > precision {
                    return Err(MigrateError::Schema(format!(
                        "Decimal column {} has invalid precision/scale {}/{}",
                        raw.name, precision, scale
                    )));
                }
                (precision, scale)
            }
            _ => (0, 0),
        };
        let default = raw
            .default
            .map(|lit| DefaultValue::parse(raw.kind, &lit.into_text()))
            .transpose()?;

        Ok(Column {
            name: raw.name,
            kind: raw.kind,
            nullable: raw.nullable,
            length,
            max,
            precision,
            scale,
            default,
            identity: raw.identity,
            sequence: raw.sequence,
        })
    }
}

impl From<Column> for RawColumn {
    fn from(col: Column) -> Self {
        RawColumn {
            name: col.name,
            kind: col.kind,
            nullable: col.nullable,
            length: (col.length > 0).then_some(col.length),
            max: col.max,
            precision: (col.precision > 0).then_some(col.precision),
            scale: (col.precision > 0).then_some(col.scale),
            default: col.default.map(|d| Literal::Text(d.canonical())),
            identity: col.identity,
            sequence: col.sequence,
        }
    }
}

impl Column {
    /// A nullable column of `kind` with no default.
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: true,
            length: 0,
            max: false,
            precision: 0,
            scale: 0,
            default: None,
            identity: false,
            sequence: None,
        }
    }

    pub fn string(name: impl Into<String>, length: u32) -> Self {
        Self {
            length,
            ..Self::new(name, ColumnKind::String)
        }
    }

    pub fn decimal(name: impl Into<String>, precision: u32, scale: u32) -> Self {
        Self {
            precision,
            scale,
            ..Self::new(name, ColumnKind::Decimal)
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    pub fn identity(mut self) -> Self {
        self.identity = true;
        self.nullable = false;
        self
    }

    /// The hidden version counter of versioned tables.
    pub fn recversion() -> Self {
        Column::new(RECVERSION, ColumnKind::Integer)
            .not_null()
            .with_default(DefaultValue::Integer(1))
    }

    /// Whether the column is populated from a sequence (explicit or identity).
    pub fn is_auto_assigned(&self) -> bool {
        self.identity || self.sequence.is_some()
    }
}

/// Referential action for foreign keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FkRule {
    #[default]
    NoAction,
    SetNull,
    Cascade,
}

impl FkRule {
    /// SQL spelling of the action.
    pub fn sql(&self) -> &'static str {
        match self {
            FkRule::NoAction => "no action",
            FkRule::SetNull => "set null",
            FkRule::Cascade => "cascade",
        }
    }

    /// Parse a catalog rule text (`NO ACTION`, `SET_NULL`, `RESTRICT`...).
    pub fn from_catalog(text: &str) -> FkRule {
        let normalized = text.trim().to_ascii_uppercase().replace('_', " ");
        match normalized.as_str() {
            "CASCADE" => FkRule::Cascade,
            "SET NULL" => FkRule::SetNull,
            _ => FkRule::NoAction,
        }
    }
}

/// Reference to a table, optionally in another grain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub grain: String,
    pub table: String,
}

/// A foreign key declared on its child table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    #[serde(default)]
    pub name: String,
    pub columns: Vec<String>,
    pub references: TableRef,
    #[serde(default)]
    pub on_update: FkRule,
    #[serde(default)]
    pub on_delete: FkRule,
}

/// A secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
}

/// A table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    /// Owning grain, filled in on resolve.
    #[serde(skip)]
    pub schema: String,
    pub columns: Vec<Column>,
    pub primary_key: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pk_name: Option<String>,
    #[serde(default)]
    pub versioned: bool,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
    #[serde(default)]
    pub indices: Vec<Index>,
}

impl Table {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: schema.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            pk_name: None,
            versioned: false,
            foreign_keys: Vec::new(),
            indices: Vec::new(),
        }
    }

    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_pk(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn versioned(mut self) -> Self {
        self.versioned = true;
        self
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Authored columns followed by `recversion` for versioned tables.
    pub fn all_columns(&self) -> Vec<Column> {
        let mut cols = self.columns.clone();
        if self.versioned {
            cols.push(Column::recversion());
        }
        cols
    }

    pub fn pk_columns(&self) -> impl Iterator<Item = &Column> {
        self.primary_key.iter().filter_map(move |n| self.column(n))
    }

    /// Primary key constraint name before dialect length limiting.
    pub fn pk_constraint_name(&self) -> String {
        self.pk_name
            .clone()
            .unwrap_or_else(|| format!("pk_{}", self.name))
    }

    /// Sequence implicitly backing identity columns.
    pub fn identity_sequence_name(&self) -> String {
        format!("{}_seq", self.name)
    }

    pub fn has_auto_assigned(&self) -> bool {
        self.columns.iter().any(Column::is_auto_assigned)
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// A sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    pub name: String,
    #[serde(skip)]
    pub schema: String,
    #[serde(default = "one")]
    pub start_with: i64,
    #[serde(default = "one")]
    pub increment_by: i64,
    #[serde(default = "one")]
    pub min_value: i64,
    #[serde(default = "max_i64")]
    pub max_value: i64,
    #[serde(default)]
    pub cycle: bool,
}

fn one() -> i64 {
    1
}

fn max_i64() -> i64 {
    i64::MAX
}

impl Sequence {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: schema.into(),
            start_with: 1,
            increment_by: 1,
            min_value: 1,
            max_value: i64::MAX,
            cycle: false,
        }
    }
}

/// Comparison operator in view filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    IsNull,
    IsNotNull,
}

impl CompareOp {
    pub fn sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Like => "like",
            CompareOp::IsNull => "is null",
            CompareOp::IsNotNull => "is not null",
        }
    }

    pub fn is_unary(&self) -> bool {
        matches!(self, CompareOp::IsNull | CompareOp::IsNotNull)
    }
}

/// One conjunct of a view filter: `column op (literal | :param)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub column: String,
    pub op: CompareOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<Literal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
}

impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        self.clone().into_text() == other.clone().into_text()
    }
}

impl Predicate {
    pub fn literal(column: impl Into<String>, op: CompareOp, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            op,
            value: Some(Literal::Text(value.into())),
            param: None,
        }
    }

    pub fn param(column: impl Into<String>, op: CompareOp, param: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            op,
            value: None,
            param: Some(param.into()),
        }
    }

    /// Literal operand typed by the filtered column.
    pub fn value(&self, kind: ColumnKind) -> Result<Option<DefaultValue>> {
        self.value
            .clone()
            .map(|lit| DefaultValue::parse(kind, &lit.into_text()))
            .transpose()
    }
}

/// A projected column of a view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewColumn {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl ViewColumn {
    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// A plain view over one table of the same grain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct View {
    pub name: String,
    #[serde(skip)]
    pub schema: String,
    pub from: String,
    pub columns: Vec<ViewColumn>,
    #[serde(default, rename = "where")]
    pub filter: Vec<Predicate>,
}

/// A typed parameter of a parameterized view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub kind: ColumnKind,
}

/// A view taking parameters (table-valued function).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterizedView {
    pub name: String,
    #[serde(skip)]
    pub schema: String,
    pub from: String,
    pub params: Vec<Parameter>,
    pub columns: Vec<ViewColumn>,
    #[serde(default, rename = "where")]
    pub filter: Vec<Predicate>,
}

impl ParameterizedView {
    pub fn param(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.name == name)
    }
}

/// Aggregate function of a materialized view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFn {
    Count,
    Sum,
}

/// An aggregate column of a materialized view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    pub alias: String,
    pub function: AggregateFn,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
}

/// An incrementally maintained aggregate table over one base table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializedView {
    pub name: String,
    #[serde(skip)]
    pub schema: String,
    pub from: String,
    pub group_by: Vec<String>,
    pub aggregates: Vec<Aggregate>,
}

impl MaterializedView {
    /// Checksum of the definition, embedded in the insert trigger.
    pub fn checksum(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        Ok(checksum_hex(canonical.as_bytes()))
    }

    /// The aggregate table backing this view.
    pub fn as_table(&self, base: &Table) -> Result<Table> {
        let mut table = Table::new(&self.schema, &self.name);
        for name in &self.group_by {
            let col = base.column(name).ok_or_else(|| {
                MigrateError::Schema(format!(
                    "Materialized view {}.{} groups by unknown column {}",
                    self.schema, self.name, name
                ))
            })?;
            let mut col = col.clone();
            col.nullable = false;
            col.default = None;
            col.identity = false;
            col.sequence = None;
            table.columns.push(col);
        }
        for agg in &self.aggregates {
            let col = match (agg.function, &agg.column) {
                (AggregateFn::Count, _) => Column::new(&agg.alias, ColumnKind::Integer),
                (AggregateFn::Sum, Some(source)) => {
                    let src = base.column(source).ok_or_else(|| {
                        MigrateError::Schema(format!(
                            "Materialized view {}.{} sums unknown column {}",
                            self.schema, self.name, source
                        ))
                    })?;
                    Column {
                        name: agg.alias.clone(),
                        default: None,
                        identity: false,
                        sequence: None,
                        nullable: true,
                        ..src.clone()
                    }
                }
                (AggregateFn::Sum, None) => {
                    return Err(MigrateError::trigger(
                        format!("{}.{}", self.schema, self.name),
                        format!("sum aggregate {} has no column", agg.alias),
                    ))
                }
            };
            table.columns.push(col);
        }
        table
            .columns
            .push(Column::new(SURROGATE_COUNT, ColumnKind::Integer).not_null());
        table.primary_key = self.group_by.clone();
        Ok(table)
    }
}

/// A grain: one schema namespace with its objects and version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grain {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub tables: Vec<Table>,
    #[serde(default)]
    pub sequences: Vec<Sequence>,
    #[serde(default)]
    pub views: Vec<View>,
    #[serde(default)]
    pub materialized_views: Vec<MaterializedView>,
    #[serde(default)]
    pub parameterized_views: Vec<ParameterizedView>,
}

/// Content fingerprint of a grain definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrainChecksum {
    pub length: i64,
    pub checksum: String,
}

impl Grain {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            tables: Vec::new(),
            sequences: Vec::new(),
            views: Vec::new(),
            materialized_views: Vec::new(),
            parameterized_views: Vec::new(),
        }
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn sequence(&self, name: &str) -> Option<&Sequence> {
        self.sequences.iter().find(|s| s.name == name)
    }

    pub fn materialized_view(&self, name: &str) -> Option<&MaterializedView> {
        self.materialized_views.iter().find(|m| m.name == name)
    }

    /// Materialized views fed by `table`.
    pub fn materialized_views_of(&self, table: &str) -> Vec<&MaterializedView> {
        self.materialized_views
            .iter()
            .filter(|m| m.from == table)
            .collect()
    }

    /// Canonical length and checksum of the definition.
    pub fn checksum(&self) -> Result<GrainChecksum> {
        let canonical = serde_json::to_string(self)?;
        Ok(GrainChecksum {
            length: canonical.len() as i64,
            checksum: checksum_hex(canonical.as_bytes()),
        })
    }

    /// Fill owning schema names and generated constraint names.
    fn resolve(&mut self) {
        let grain = self.name.clone();
        for table in &mut self.tables {
            table.schema = grain.clone();
            for fk in &mut table.foreign_keys {
                if fk.references.grain.is_empty() {
                    fk.references.grain = grain.clone();
                }
                if fk.name.is_empty() {
                    fk.name = format!("fk_{}_{}", table.name, fk.columns.join("_"));
                }
            }
        }
        for seq in &mut self.sequences {
            seq.schema = grain.clone();
        }
        for view in &mut self.views {
            view.schema = grain.clone();
        }
        for mv in &mut self.materialized_views {
            mv.schema = grain.clone();
        }
        for pv in &mut self.parameterized_views {
            pv.schema = grain.clone();
        }
    }
}

/// First 32 bits of SHA-256, rendered `%08X`.
pub fn checksum_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode_upper(&digest[..4])
}

/// The complete authored schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Score {
    #[serde(default)]
    pub grains: Vec<Grain>,
}

impl Score {
    /// Load and validate a schema file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse, resolve and validate a YAML schema document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let score: Score =
            serde_yaml::from_str(yaml).map_err(|e| MigrateError::Schema(e.to_string()))?;
        Self::from_grains(score.grains)
    }

    /// Build a score from programmatically constructed grains.
    pub fn from_grains(grains: Vec<Grain>) -> Result<Self> {
        let mut score = Score { grains };
        for grain in &mut score.grains {
            grain.resolve();
        }
        score.validate()?;
        Ok(score)
    }

    pub fn grain(&self, name: &str) -> Option<&Grain> {
        self.grains.iter().find(|g| g.name == name)
    }

    /// Look up a table anywhere in the score.
    pub fn table(&self, grain: &str, name: &str) -> Option<&Table> {
        self.grain(grain).and_then(|g| g.table(name))
    }

    /// Grains that `grain` depends on through foreign keys.
    pub fn grain_dependencies(&self, grain: &Grain) -> Vec<String> {
        let mut deps: Vec<String> = grain
            .tables
            .iter()
            .flat_map(|t| t.foreign_keys.iter())
            .map(|fk| fk.references.grain.clone())
            .filter(|g| g != &grain.name)
            .collect();
        deps.sort();
        deps.dedup();
        deps
    }

    /// Check every cross-reference of the score.
    pub fn validate(&self) -> Result<()> {
        let mut grain_names = HashSet::new();
        for grain in &self.grains {
            validate_identifier(&grain.name)?;
            if !grain_names.insert(grain.name.as_str()) {
                return Err(MigrateError::Schema(format!("Duplicate grain {}", grain.name)));
            }
            if grain.version.trim().is_empty() {
                return Err(MigrateError::Schema(format!(
                    "Grain {} has no version",
                    grain.name
                )));
            }
            self.validate_grain(grain)?;
        }
        Ok(())
    }

    fn validate_grain(&self, grain: &Grain) -> Result<()> {
        let mut names: BTreeMap<String, &'static str> = BTreeMap::new();
        let mut claim = |name: &str, what: &'static str| -> Result<()> {
            validate_identifier(name)?;
            if let Some(prev) = names.insert(name.to_string(), what) {
                return Err(MigrateError::Schema(format!(
                    "Name {}.{} is used by both a {} and a {}",
                    grain.name, name, prev, what
                )));
            }
            Ok(())
        };

        for seq in &grain.sequences {
            claim(&seq.name, "sequence")?;
            if seq.increment_by == 0 || seq.min_value > seq.max_value {
                return Err(MigrateError::Schema(format!(
                    "Sequence {}.{} has invalid bounds",
                    grain.name, seq.name
                )));
            }
        }
        for table in &grain.tables {
            claim(&table.name, "table")?;
            self.validate_table(grain, table)?;
        }
        for mv in &grain.materialized_views {
            claim(&mv.name, "materialized view")?;
            validate_materialized_view(grain, mv)?;
        }
        for view in &grain.views {
            claim(&view.name, "view")?;
            let base = source_table(grain, &view.name, &view.from)?;
            validate_projection(grain, &view.name, base, &view.columns, &view.filter, &[])?;
        }
        for pv in &grain.parameterized_views {
            claim(&pv.name, "parameterized view")?;
            let base = source_table(grain, &pv.name, &pv.from)?;
            for p in &pv.params {
                validate_identifier(&p.name)?;
            }
            validate_projection(grain, &pv.name, base, &pv.columns, &pv.filter, &pv.params)?;
        }
        Ok(())
    }

    fn validate_table(&self, grain: &Grain, table: &Table) -> Result<()> {
        let object = format!("{}.{}", grain.name, table.name);
        let mut seen = HashSet::new();
        for col in &table.columns {
            validate_identifier(&col.name)?;
            if col.name == RECVERSION {
                return Err(MigrateError::Schema(format!(
                    "{}: column name {} is reserved",
                    object, RECVERSION
                )));
            }
            if !seen.insert(col.name.as_str()) {
                return Err(MigrateError::Schema(format!(
                    "{}: duplicate column {}",
                    object, col.name
                )));
            }
            if col.is_auto_assigned() && col.kind != ColumnKind::Integer {
                return Err(MigrateError::Schema(format!(
                    "{}: auto-assigned column {} must be an integer",
                    object, col.name
                )));
            }
            if let Some(seq) = &col.sequence {
                if col.identity {
                    return Err(MigrateError::Schema(format!(
                        "{}: column {} cannot be both identity and sequence-backed",
                        object, col.name
                    )));
                }
                if grain.sequence(seq).is_none() {
                    return Err(MigrateError::Schema(format!(
                        "{}: column {} references unknown sequence {}",
                        object, col.name, seq
                    )));
                }
            }
        }
        if table.columns.iter().filter(|c| c.identity).count() > 1 {
            return Err(MigrateError::Schema(format!(
                "{}: at most one identity column is allowed",
                object
            )));
        }

        if table.primary_key.is_empty() {
            return Err(MigrateError::Schema(format!("{}: primary key is required", object)));
        }
        for name in &table.primary_key {
            let col = table.column(name).ok_or_else(|| {
                MigrateError::Schema(format!("{}: primary key column {} not found", object, name))
            })?;
            if col.nullable {
                return Err(MigrateError::Schema(format!(
                    "{}: primary key column {} must be NOT NULL",
                    object, name
                )));
            }
        }
        if let Some(pk) = &table.pk_name {
            validate_identifier(pk)?;
        }

        for index in &table.indices {
            validate_identifier(&index.name)?;
            if index.columns.is_empty() {
                return Err(MigrateError::Schema(format!(
                    "{}: index {} has no columns",
                    object, index.name
                )));
            }
            for c in &index.columns {
                if table.column(c).is_none() {
                    return Err(MigrateError::Schema(format!(
                        "{}: index {} references unknown column {}",
                        object, index.name, c
                    )));
                }
            }
        }

        for fk in &table.foreign_keys {
            validate_identifier(&fk.name)?;
            let referenced = self
                .table(&fk.references.grain, &fk.references.table)
                .ok_or_else(|| {
                    MigrateError::Schema(format!(
                        "{}: foreign key {} references unknown table {}.{}",
                        object, fk.name, fk.references.grain, fk.references.table
                    ))
                })?;
            if fk.columns.len() != referenced.primary_key.len() {
                return Err(MigrateError::Schema(format!(
                    "{}: foreign key {} has {} columns but {} has a {}-column primary key",
                    object,
                    fk.name,
                    fk.columns.len(),
                    referenced.qualified_name(),
                    referenced.primary_key.len()
                )));
            }
            for (c, pk_col) in fk.columns.iter().zip(referenced.pk_columns()) {
                let col = table.column(c).ok_or_else(|| {
                    MigrateError::Schema(format!(
                        "{}: foreign key {} references unknown column {}",
                        object, fk.name, c
                    ))
                })?;
                if col.kind != pk_col.kind {
                    return Err(MigrateError::Schema(format!(
                        "{}: foreign key {} column {} is {} but {}.{} is {}",
                        object,
                        fk.name,
                        c,
                        col.kind,
                        referenced.name,
                        pk_col.name,
                        pk_col.kind
                    )));
                }
                let set_null = fk.on_update == FkRule::SetNull || fk.on_delete == FkRule::SetNull;
                if set_null && !col.nullable {
                    return Err(MigrateError::Schema(format!(
                        "{}: foreign key {} uses SET NULL on NOT NULL column {}",
                        object, fk.name, c
                    )));
                }
            }
        }
        Ok(())
    }
}

fn source_table<'g>(grain: &'g Grain, object: &str, from: &str) -> Result<&'g Table> {
    grain.table(from).ok_or_else(|| {
        MigrateError::Schema(format!(
            "{}.{} selects from unknown table {}",
            grain.name, object, from
        ))
    })
}

fn validate_projection(
    grain: &Grain,
    object: &str,
    base: &Table,
    columns: &[ViewColumn],
    filter: &[Predicate],
    params: &[Parameter],
) -> Result<()> {
    if columns.is_empty() {
        return Err(MigrateError::Schema(format!(
            "{}.{} projects no columns",
            grain.name, object
        )));
    }
    for col in columns {
        if base.column(&col.name).is_none() && col.name != RECVERSION {
            return Err(MigrateError::Schema(format!(
                "{}.{} projects unknown column {}",
                grain.name, object, col.name
            )));
        }
        if let Some(alias) = &col.alias {
            validate_identifier(alias)?;
        }
    }
    for pred in filter {
        let col = base.column(&pred.column).ok_or_else(|| {
            MigrateError::Schema(format!(
                "{}.{} filters on unknown column {}",
                grain.name, object, pred.column
            ))
        })?;
        match (&pred.param, pred.value(col.kind)?) {
            (Some(p), None) => {
                if !params.iter().any(|x| &x.name == p) {
                    return Err(MigrateError::Schema(format!(
                        "{}.{} uses undeclared parameter {}",
                        grain.name, object, p
                    )));
                }
            }
            (None, Some(_)) if !pred.op.is_unary() => {}
            (None, None) if pred.op.is_unary() => {}
            _ => {
                return Err(MigrateError::Schema(format!(
                    "{}.{} has a malformed condition on {}",
                    grain.name, object, pred.column
                )))
            }
        }
    }
    Ok(())
}

fn validate_materialized_view(grain: &Grain, mv: &MaterializedView) -> Result<()> {
    let object = format!("{}.{}", grain.name, mv.name);
    let base = source_table(grain, &mv.name, &mv.from)?;
    if mv.group_by.is_empty() {
        return Err(MigrateError::Schema(format!("{}: group_by is required", object)));
    }
    if mv.aggregates.is_empty() {
        return Err(MigrateError::Schema(format!(
            "{}: at least one aggregate is required",
            object
        )));
    }
    for name in &mv.group_by {
        let col = base.column(name).ok_or_else(|| {
            MigrateError::Schema(format!("{}: unknown group_by column {}", object, name))
        })?;
        if col.nullable {
            return Err(MigrateError::Schema(format!(
                "{}: group_by column {} must be NOT NULL",
                object, name
            )));
        }
        if matches!(col.kind, ColumnKind::Binary) || (col.kind == ColumnKind::String && col.max) {
            return Err(MigrateError::Schema(format!(
                "{}: cannot group by large object column {}",
                object, name
            )));
        }
    }
    for agg in &mv.aggregates {
        validate_identifier(&agg.alias)?;
        if agg.function == AggregateFn::Sum {
            let source = agg.column.as_deref().ok_or_else(|| {
                MigrateError::trigger(&object, format!("sum aggregate {} has no column", agg.alias))
            })?;
            let col = base.column(source).ok_or_else(|| {
                MigrateError::Schema(format!("{}: unknown sum column {}", object, source))
            })?;
            if !col.kind.is_numeric() {
                return Err(MigrateError::trigger(
                    &object,
                    format!("cannot sum non-numeric column {}", source),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOP: &str = r#"
grains:
  - name: shop
    version: "1.0"
    sequences:
      - { name: invoice_no, start_with: 100 }
    tables:
      - name: customer
        columns:
          - { name: id, kind: integer, nullable: false, identity: true }
          - { name: name, kind: string, length: 40, nullable: false, default: "''" }
        primary_key: [id]
      - name: orders
        versioned: true
        columns:
          - { name: id, kind: integer, nullable: false }
          - { name: customer, kind: integer }
          - { name: title, kind: string, length: 50, nullable: false, default: "'none'" }
          - { name: amount, kind: decimal, precision: 12, scale: 2, default: 0 }
          - { name: paid, kind: boolean, default: false }
          - { name: placed, kind: datetime, default: "GETDATE()" }
          - { name: invoice, kind: integer, sequence: invoice_no }
        primary_key: [id]
        foreign_keys:
          - { columns: [customer], references: { table: customer }, on_delete: set_null }
        indices:
          - { name: idx_orders_title, columns: [title] }
    materialized_views:
      - name: orders_by_title
        from: orders
        group_by: [title]
        aggregates:
          - { alias: cnt, function: count }
          - { alias: total, function: sum, column: amount }
    views:
      - name: open_orders
        from: orders
        columns: [{ name: id }, { name: title, alias: caption }]
        where: [{ column: paid, op: eq, value: false }]
"#;

    #[test]
    fn test_load_resolves_schema_and_names() {
        let score = Score::from_yaml(SHOP).unwrap();
        let grain = score.grain("shop").unwrap();
        let orders = grain.table("orders").unwrap();
        assert_eq!(orders.schema, "shop");
        assert_eq!(orders.foreign_keys[0].name, "fk_orders_customer");
        assert_eq!(orders.foreign_keys[0].references.grain, "shop");
        assert_eq!(
            orders.column("amount").unwrap().default,
            Some(DefaultValue::Decimal(Decimal::ZERO))
        );
        assert_eq!(orders.column("placed").unwrap().default, Some(DefaultValue::Now));
        assert_eq!(grain.sequence("invoice_no").unwrap().start_with, 100);
        assert_eq!(grain.views[0].schema, "shop");
    }

    #[test]
    fn test_all_columns_appends_recversion() {
        let score = Score::from_yaml(SHOP).unwrap();
        let orders = score.table("shop", "orders").unwrap();
        let cols = orders.all_columns();
        assert_eq!(cols.last().unwrap().name, RECVERSION);
        assert_eq!(cols.len(), orders.columns.len() + 1);
    }

    #[test]
    fn test_unknown_kind_is_schema_error() {
        let yaml = r#"
grains:
  - name: g
    version: "1"
    tables:
      - name: t
        columns: [{ name: id, kind: uuid, nullable: false }]
        primary_key: [id]
"#;
        let err = Score::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, MigrateError::Schema(_)));
        assert!(err.to_string().contains("uuid"));
    }

    #[test]
    fn test_malformed_default_is_schema_error() {
        let yaml = r#"
grains:
  - name: g
    version: "1"
    tables:
      - name: t
        columns: [{ name: id, kind: integer, nullable: false, default: "abc" }]
        primary_key: [id]
"#;
        let err = Score::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("Malformed integer default"));
    }

    #[test]
    fn test_missing_primary_key_rejected() {
        let yaml = r#"
grains:
  - name: g
    version: "1"
    tables:
      - name: t
        columns: [{ name: id, kind: integer }]
        primary_key: []
"#;
        let err = Score::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("primary key is required"));
    }

    #[test]
    fn test_set_null_requires_nullable_column() {
        let grain = Grain {
            tables: vec![
                Table::new("g", "parent")
                    .with_column(Column::new("id", ColumnKind::Integer).not_null())
                    .with_pk(&["id"]),
                Table {
                    foreign_keys: vec![ForeignKey {
                        name: String::new(),
                        columns: vec!["parent".into()],
                        references: TableRef {
                            grain: String::new(),
                            table: "parent".into(),
                        },
                        on_update: FkRule::NoAction,
                        on_delete: FkRule::SetNull,
                    }],
                    ..Table::new("g", "child")
                        .with_column(Column::new("id", ColumnKind::Integer).not_null())
                        .with_column(Column::new("parent", ColumnKind::Integer).not_null())
                        .with_pk(&["id"])
                },
            ],
            ..Grain::new("g", "1")
        };
        let err = Score::from_grains(vec![grain]).unwrap_err();
        assert!(err.to_string().contains("SET NULL"));
    }

    #[test]
    fn test_sum_over_string_is_trigger_generation_error() {
        let grain = Grain {
            tables: vec![Table::new("g", "t")
                .with_column(Column::new("id", ColumnKind::Integer).not_null())
                .with_column(Column::string("name", 10).not_null())
                .with_pk(&["id"])],
            materialized_views: vec![MaterializedView {
                name: "mv".into(),
                schema: String::new(),
                from: "t".into(),
                group_by: vec!["id".into()],
                aggregates: vec![Aggregate {
                    alias: "s".into(),
                    function: AggregateFn::Sum,
                    column: Some("name".into()),
                }],
            }],
            ..Grain::new("g", "1")
        };
        let err = Score::from_grains(vec![grain]).unwrap_err();
        assert!(matches!(err, MigrateError::TriggerGeneration { .. }));
    }

    #[test]
    fn test_default_literals() {
        assert_eq!(
            DefaultValue::parse(ColumnKind::String, "'O''Brien'").unwrap(),
            DefaultValue::Text("O'Brien".into())
        );
        assert_eq!(
            DefaultValue::parse(ColumnKind::Binary, "0xCAFE").unwrap(),
            DefaultValue::Binary(vec![0xCA, 0xFE])
        );
        assert_eq!(
            DefaultValue::parse(ColumnKind::DateTime, "'2021-03-04'").unwrap().canonical(),
            "'20210304'"
        );
        assert_eq!(
            DefaultValue::parse(ColumnKind::Boolean, "TRUE").unwrap().canonical(),
            "'TRUE'"
        );
        assert!(DefaultValue::parse(ColumnKind::String, "unquoted").is_err());
        assert!(DefaultValue::parse(ColumnKind::ZonedDateTime, "'20200101'").is_err());
    }

    #[test]
    fn test_materialized_view_table_shape() {
        let score = Score::from_yaml(SHOP).unwrap();
        let grain = score.grain("shop").unwrap();
        let mv = grain.materialized_view("orders_by_title").unwrap();
        let base = grain.table("orders").unwrap();
        let table = mv.as_table(base).unwrap();
        let names: Vec<_> = table.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["title", "cnt", "total", SURROGATE_COUNT]);
        assert_eq!(table.primary_key, vec!["title".to_string()]);
        assert_eq!(table.column("total").unwrap().kind, ColumnKind::Decimal);
        assert!(!table.column("title").unwrap().nullable);
    }

    #[test]
    fn test_checksums_are_stable_and_sensitive() {
        let score = Score::from_yaml(SHOP).unwrap();
        let grain = score.grain("shop").unwrap();
        let first = grain.checksum().unwrap();
        assert_eq!(first, grain.checksum().unwrap());
        assert_eq!(first.checksum.len(), 8);

        let mut changed = grain.clone();
        changed.tables[0].columns[1].length = 41;
        assert_ne!(first.checksum, changed.checksum().unwrap().checksum);

        let mv = grain.materialized_view("orders_by_title").unwrap();
        let mut mv2 = mv.clone();
        mv2.group_by.push("paid".into());
        assert_ne!(mv.checksum().unwrap(), mv2.checksum().unwrap());
    }

    #[test]
    fn test_column_serialization_round_trips_through_raw() {
        let col = Column::string("title", 20)
            .not_null()
            .with_default(DefaultValue::Text("x".into()));
        let json = serde_json::to_string(&col).unwrap();
        let back: Column = serde_json::from_str(&json).unwrap();
        assert_eq!(back, col);
    }
}
