//! Inputs of the query builder.
//!
//! A [`FromClause`] is the already-rendered source of a SELECT (a table, a
//! view or a parameterized-view call) together with the values bound to its
//! placeholders. [`FilterTerm`]s render the WHERE conjunctions used by the
//! cursor layer.

use crate::core::schema::{CompareOp, ParameterizedView};
use crate::core::value::SqlValue;
use crate::dialect::Dialect;
use crate::error::{MigrateError, Result};

/// Source expression of a SELECT.
#[derive(Debug, Clone, PartialEq)]
pub struct FromClause {
    /// Rendered relation, e.g. `"shop"."orders"` or `"shop"."orders_for"($1)`.
    pub expression: String,
    /// Values bound to the placeholders inside `expression`.
    pub parameters: Vec<SqlValue>,
}

impl FromClause {
    /// A table or plain view.
    pub fn table<D: Dialect + ?Sized>(dialect: &D, schema: &str, name: &str) -> Self {
        Self {
            expression: dialect.table_string(schema, name),
            parameters: Vec::new(),
        }
    }

    /// A parameterized view called with `args` in declaration order.
    pub fn parameterized<D: Dialect + ?Sized>(
        dialect: &D,
        pv: &ParameterizedView,
        args: Vec<SqlValue>,
    ) -> Result<Self> {
        if args.len() != pv.params.len() {
            return Err(MigrateError::InvalidArgument(format!(
                "{}.{} expects {} arguments, got {}",
                pv.schema,
                pv.name,
                pv.params.len(),
                args.len()
            )));
        }
        Ok(Self {
            expression: dialect.function_call(&pv.schema, &pv.name, args.len()),
            parameters: args,
        })
    }

    /// Placeholders already consumed by the source expression.
    pub fn placeholder_count(&self) -> usize {
        self.parameters.len()
    }
}

/// One conjunct of a cursor filter, bound positionally.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterTerm {
    pub column: String,
    pub op: CompareOp,
}

impl FilterTerm {
    pub fn new(column: impl Into<String>, op: CompareOp) -> Self {
        Self {
            column: column.into(),
            op,
        }
    }
}

/// Render `terms` as an AND-conjunction.
///
/// Placeholders are numbered after the `first_param - 1` already used by the
/// FROM clause; unary operators take no placeholder.
pub fn filter_clause<D: Dialect + ?Sized>(dialect: &D, terms: &[FilterTerm], first_param: usize) -> String {
    let mut next = first_param;
    terms
        .iter()
        .map(|t| {
            let column = dialect.quote(&t.column);
            if t.op.is_unary() {
                format!("{} {}", column, t.op.sql())
            } else {
                let p = dialect.param_placeholder(next);
                next += 1;
                format!("{} {} {}", column, t.op.sql(), p)
            }
        })
        .collect::<Vec<_>>()
        .join(" and ")
}

/// Quoted ORDER BY list; `descending` flags pair with `columns`.
pub fn order_by_clause<D: Dialect + ?Sized>(dialect: &D, columns: &[(&str, bool)]) -> String {
    columns
        .iter()
        .map(|(c, desc)| {
            if *desc {
                format!("{} desc", dialect.quote(c))
            } else {
                dialect.quote(c)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}
