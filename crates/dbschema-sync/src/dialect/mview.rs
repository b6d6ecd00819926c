//! Materialized-view maintenance helpers shared by the trigger generators.
//!
//! Every dialect maintains a materialized view with three triggers on the
//! base table. The pieces that do not depend on procedural syntax live here:
//! group-key expressions, per-row aggregate deltas, the checksum marker placed
//! in the insert trigger, and the bulk re-population query.
//!
//! NULL summands contribute zero, both in the triggers and in the initial
//! population, so incremental maintenance never drifts from a full recompute.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::schema::{
    AggregateFn, ColumnKind, MaterializedView, Table, SURROGATE_COUNT,
};
use crate::dialect::Dialect;
use crate::error::{MigrateError, Result};

static CHECKSUM_MARKER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/\*\s*mv-checksum:([0-9A-Fa-f]{8})\s*\*/").expect("valid regex"));

/// Comment embedded in the insert trigger body.
pub fn checksum_marker(mv: &MaterializedView) -> Result<String> {
    Ok(format!("/* mv-checksum:{} */", mv.checksum()?))
}

/// Checksum recorded in a stored trigger body, if any.
pub fn extract_checksum(body: &str) -> Option<String> {
    CHECKSUM_MARKER_REGEX
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_ascii_uppercase())
}

/// Reject aggregates the generators cannot express.
pub fn check_aggregates(mv: &MaterializedView, base: &Table) -> Result<()> {
    let object = format!("{}.{}", mv.schema, mv.name);
    for agg in &mv.aggregates {
        if agg.function != AggregateFn::Sum {
            continue;
        }
        let source = agg
            .column
            .as_deref()
            .ok_or_else(|| MigrateError::trigger(&object, format!("sum {} has no column", agg.alias)))?;
        let col = base.column(source).ok_or_else(|| {
            MigrateError::trigger(&object, format!("sum over unknown column {}", source))
        })?;
        if !col.kind.is_numeric() {
            return Err(MigrateError::trigger(
                &object,
                format!("cannot sum {} column {}", col.kind, source),
            ));
        }
    }
    Ok(())
}

/// Group-key value taken from a row image (`row` is e.g. `NEW.` or `:old.`).
///
/// Timestamps are grouped by day.
pub fn group_value<D: Dialect + ?Sized>(dialect: &D, base: &Table, column: &str, row: &str) -> String {
    let expr = format!("{}{}", row, dialect.quote(column));
    match base.column(column).map(|c| c.kind) {
        Some(ColumnKind::DateTime) | Some(ColumnKind::ZonedDateTime) => dialect.trunc_date(&expr),
        _ => expr,
    }
}

/// `(alias, per-row delta)` pairs for every aggregate plus the surrogate count.
pub fn row_deltas<D: Dialect + ?Sized>(dialect: &D, mv: &MaterializedView, row: &str) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = mv
        .aggregates
        .iter()
        .map(|agg| {
            let delta = match (agg.function, &agg.column) {
                (AggregateFn::Sum, Some(c)) => format!("coalesce({}{}, 0)", row, dialect.quote(c)),
                _ => "1".to_string(),
            };
            (agg.alias.clone(), delta)
        })
        .collect();
    out.push((SURROGATE_COUNT.to_string(), "1".to_string()));
    out
}

/// `"mv"."g1" = <row g1> and ...` matching the view row of a base row image.
pub fn group_match<D: Dialect + ?Sized>(
    dialect: &D,
    mv: &MaterializedView,
    base: &Table,
    target: &str,
    row: &str,
) -> String {
    mv.group_by
        .iter()
        .map(|g| {
            format!(
                "{}.{} = {}",
                target,
                dialect.quote(g),
                group_value(dialect, base, g, row)
            )
        })
        .collect::<Vec<_>>()
        .join(" and ")
}

/// Quoted column list of the view table: group keys, aggregates, surrogate count.
pub fn column_list<D: Dialect + ?Sized>(dialect: &D, mv: &MaterializedView) -> Vec<String> {
    mv.group_by
        .iter()
        .map(String::as_str)
        .chain(mv.aggregates.iter().map(|a| a.alias.as_str()))
        .chain(std::iter::once(SURROGATE_COUNT))
        .map(|c| dialect.quote(c))
        .collect()
}

/// `insert into <mv> (...) select ... from <base> group by ...`.
pub fn populate_sql<D: Dialect + ?Sized>(dialect: &D, mv: &MaterializedView, base: &Table) -> Result<String> {
    check_aggregates(mv, base)?;
    let groups: Vec<String> = mv
        .group_by
        .iter()
        .map(|g| group_value(dialect, base, g, ""))
        .collect();
    let mut select = groups.clone();
    for agg in &mv.aggregates {
        select.push(match (agg.function, &agg.column) {
            (AggregateFn::Sum, Some(c)) => format!("coalesce(sum({}), 0)", dialect.quote(c)),
            _ => "count(*)".to_string(),
        });
    }
    select.push("count(*)".to_string());

    Ok(format!(
        "insert into {} ({}) select {} from {} group by {}",
        dialect.table_string(&mv.schema, &mv.name),
        column_list(dialect, mv).join(", "),
        select.join(", "),
        dialect.table_string(&base.schema, &base.name),
        groups.join(", ")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_marker_round_trip() {
        let body = "begin /* mv-checksum:0A1B2C3D */ insert ...";
        assert_eq!(extract_checksum(body).as_deref(), Some("0A1B2C3D"));
        assert_eq!(extract_checksum("begin end"), None);
    }
}
