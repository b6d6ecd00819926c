//! Dialect-independent core of the schema adapter.
//!
//! - [`schema`]: desired-state model loaded from the authored schema
//! - [`meta`]: actual-state descriptors produced by introspection
//! - [`identifier`]: identifier validation, quoting and length limiting
//! - [`value`]: values and rows exchanged with a connection
//! - [`traits`]: the connection and catalog-reader seams
//!
//! # Architecture
//!
//! The core never names a specific database. Driver modules
//! (`drivers/postgres`, `drivers/oracle`, ...) implement the traits declared
//! here, so the differ and the adapter facade can be exercised against any
//! dialect, or against none at all for pure statement rendering.

pub mod identifier;
pub mod meta;
pub mod schema;
pub mod traits;
pub mod value;

pub use meta::{DbColumnInfo, DbFkInfo, DbIndexInfo, DbPkInfo, DbSequenceInfo};
pub use schema::{
    Aggregate, AggregateFn, Column, ColumnKind, CompareOp, DefaultValue, FkRule, ForeignKey,
    Grain, Index, MaterializedView, Parameter, ParameterizedView, Predicate, Score, Sequence,
    Table, TableRef, View, ViewColumn,
};
pub use traits::{CatalogReader, Connection};
pub use value::{Row, SqlValue};
