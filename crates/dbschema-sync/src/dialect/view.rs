//! SELECT rendering for views and parameterized views.

use crate::core::schema::{Column, Predicate, Table, ViewColumn};
use crate::dialect::Dialect;
use crate::error::{MigrateError, Result};

/// Output columns of a projection with their base-column definitions.
pub fn projected_columns(base: &Table, columns: &[ViewColumn]) -> Result<Vec<(String, Column)>> {
    let all = base.all_columns();
    columns
        .iter()
        .map(|vc| {
            all.iter()
                .find(|c| c.name == vc.name)
                .map(|c| (vc.output_name().to_string(), c.clone()))
                .ok_or_else(|| {
                    MigrateError::Schema(format!(
                        "{} has no column {} to project",
                        base.qualified_name(),
                        vc.name
                    ))
                })
        })
        .collect()
}

/// `select ... from <base> [where ...]`.
///
/// `param_ref` maps a parameter name to the dialect's in-body reference
/// (`$1`, `@name`, `:name`, ...).
pub fn select_sql<D: Dialect + ?Sized>(
    dialect: &D,
    base: &Table,
    columns: &[ViewColumn],
    filter: &[Predicate],
    param_ref: &dyn Fn(&str) -> String,
) -> Result<String> {
    let fields: Vec<String> = columns
        .iter()
        .map(|c| match &c.alias {
            Some(alias) => format!("{} as {}", dialect.quote(&c.name), dialect.quote(alias)),
            None => dialect.quote(&c.name),
        })
        .collect();

    let mut sql = format!(
        "select {} from {}",
        fields.join(", "),
        dialect.table_string(&base.schema, &base.name)
    );

    let mut conditions = Vec::with_capacity(filter.len());
    for pred in filter {
        let col = base.column(&pred.column).ok_or_else(|| {
            MigrateError::Schema(format!(
                "{} has no column {} to filter on",
                base.qualified_name(),
                pred.column
            ))
        })?;
        let column = dialect.quote(&pred.column);
        let condition = if pred.op.is_unary() {
            format!("{} {}", column, pred.op.sql())
        } else if let Some(param) = &pred.param {
            format!("{} {} {}", column, pred.op.sql(), param_ref(param))
        } else {
            let value = pred.value(col.kind)?.ok_or_else(|| {
                MigrateError::Schema(format!(
                    "condition on {} has no operand",
                    pred.column
                ))
            })?;
            format!("{} {} {}", column, pred.op.sql(), dialect.literal(&value))
        };
        conditions.push(condition);
    }
    if !conditions.is_empty() {
        sql.push_str(" where ");
        sql.push_str(&conditions.join(" and "));
    }
    Ok(sql)
}
