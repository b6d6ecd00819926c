//! Processing order and the dry-run plan model.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::core::schema::{Grain, Score, Table};
use crate::error::{MigrateError, Result};

/// Grains ordered so that every grain follows the grains it references.
///
/// Ties keep the authored order. A reference cycle between grains is a
/// schema error.
pub fn grain_order(score: &Score) -> Result<Vec<&Grain>> {
    let mut deps: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for grain in &score.grains {
        deps.insert(grain.name.as_str(), score.grain_dependencies(grain));
    }

    let mut ordered: Vec<&Grain> = Vec::with_capacity(score.grains.len());
    let mut done: BTreeSet<&str> = BTreeSet::new();
    while ordered.len() < score.grains.len() {
        let next = score.grains.iter().find(|g| {
            !done.contains(g.name.as_str())
                && deps[g.name.as_str()]
                    .iter()
                    .all(|d| done.contains(d.as_str()) || score.grain(d).is_none())
        });
        match next {
            Some(grain) => {
                done.insert(grain.name.as_str());
                ordered.push(grain);
            }
            None => {
                let stuck: Vec<&str> = score
                    .grains
                    .iter()
                    .map(|g| g.name.as_str())
                    .filter(|n| !done.contains(n))
                    .collect();
                return Err(MigrateError::Schema(format!(
                    "Cyclic references between grains: {}",
                    stuck.join(", ")
                )));
            }
        }
    }
    Ok(ordered)
}

/// Tables of a grain ordered so that referenced tables come first.
///
/// Foreign keys are created after every table exists, so cycles and
/// self-references are legal; tables caught in a cycle keep authored order.
pub fn table_order(grain: &Grain) -> Vec<&Table> {
    let mut ordered: Vec<&Table> = Vec::with_capacity(grain.tables.len());
    let mut done: BTreeSet<&str> = BTreeSet::new();
    while ordered.len() < grain.tables.len() {
        let ready = grain.tables.iter().find(|t| {
            !done.contains(t.name.as_str())
                && t.foreign_keys.iter().all(|fk| {
                    fk.references.grain != grain.name
                        || fk.references.table == t.name
                        || done.contains(fk.references.table.as_str())
                })
        });
        let next = ready.or_else(|| {
            grain
                .tables
                .iter()
                .find(|t| !done.contains(t.name.as_str()))
        });
        if let Some(table) = next {
            done.insert(table.name.as_str());
            ordered.push(table);
        }
    }
    ordered
}

/// Kind of schema object a plan entry talks about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Grain,
    Schema,
    Table,
    Column,
    PrimaryKey,
    ForeignKey,
    Index,
    Sequence,
    View,
    ParameterizedView,
    MaterializedView,
    Trigger,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObjectKind::Grain => "grain",
            ObjectKind::Schema => "schema",
            ObjectKind::Table => "table",
            ObjectKind::Column => "column",
            ObjectKind::PrimaryKey => "primary key",
            ObjectKind::ForeignKey => "foreign key",
            ObjectKind::Index => "index",
            ObjectKind::Sequence => "sequence",
            ObjectKind::View => "view",
            ObjectKind::ParameterizedView => "parameterized view",
            ObjectKind::MaterializedView => "materialized view",
            ObjectKind::Trigger => "trigger",
        };
        f.write_str(s)
    }
}

/// What the engine does (or would do) with one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "fields", rename_all = "UPPERCASE")]
pub enum Decision {
    Create,
    /// Altered in place; lists the changed parts.
    Alter(Vec<String>),
    Drop,
    Noop,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Create => f.write_str("CREATE"),
            Decision::Alter(fields) => write!(f, "ALTER({})", fields.join(", ")),
            Decision::Drop => f.write_str("DROP"),
            Decision::Noop => f.write_str("NOOP"),
        }
    }
}

/// One planned step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedObject {
    pub grain: String,
    pub kind: ObjectKind,
    pub name: String,
    pub decision: Decision,
}

impl fmt::Display for PlannedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let decision = self.decision.to_string();
        write!(f, "{:<8} {} {}.{}", decision, self.kind, self.grain, self.name)
    }
}

/// Ordered decisions of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub objects: Vec<PlannedObject>,
}

impl Plan {
    pub fn record(
        &mut self,
        grain: &str,
        kind: ObjectKind,
        name: impl Into<String>,
        decision: Decision,
    ) {
        self.objects.push(PlannedObject {
            grain: grain.to_string(),
            kind,
            name: name.into(),
            decision,
        });
    }

    /// Entries that change something.
    pub fn changes(&self) -> impl Iterator<Item = &PlannedObject> {
        self.objects.iter().filter(|o| o.decision != Decision::Noop)
    }

    pub fn is_noop(&self) -> bool {
        self.changes().next().is_none()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for object in &self.objects {
            writeln!(f, "{}", object)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"
grains:
  - name: sales
    version: "1.0"
    tables:
      - name: lines
        columns:
          - { name: id, kind: integer, nullable: false }
          - { name: order_id, kind: integer }
          - { name: customer_id, kind: integer }
        primary_key: [id]
        foreign_keys:
          - columns: [order_id]
            references: { table: orders }
          - columns: [customer_id]
            references: { grain: crm, table: customers }
      - name: orders
        columns:
          - { name: id, kind: integer, nullable: false }
          - { name: parent, kind: integer }
        primary_key: [id]
        foreign_keys:
          - columns: [parent]
            references: { table: orders }
  - name: crm
    version: "1.0"
    tables:
      - name: customers
        columns:
          - { name: id, kind: integer, nullable: false }
        primary_key: [id]
"#;

    #[test]
    fn test_grain_order_follows_references() {
        let score = Score::from_yaml(SCHEMA).unwrap();
        let names: Vec<&str> = grain_order(&score)
            .unwrap()
            .iter()
            .map(|g| g.name.as_str())
            .collect();
        assert_eq!(names, vec!["crm", "sales"]);
    }

    #[test]
    fn test_table_order_allows_self_reference() {
        let score = Score::from_yaml(SCHEMA).unwrap();
        let sales = score.grain("sales").unwrap();
        let names: Vec<&str> = table_order(sales).iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["orders", "lines"]);
    }

    #[test]
    fn test_grain_cycle_is_rejected() {
        let yaml = r#"
grains:
  - name: a
    version: "1.0"
    tables:
      - name: t
        columns: [{ name: id, kind: integer, nullable: false }, { name: b_id, kind: integer }]
        primary_key: [id]
        foreign_keys: [{ columns: [b_id], references: { grain: b, table: t } }]
  - name: b
    version: "1.0"
    tables:
      - name: t
        columns: [{ name: id, kind: integer, nullable: false }, { name: a_id, kind: integer }]
        primary_key: [id]
        foreign_keys: [{ columns: [a_id], references: { grain: a, table: t } }]
"#;
        let score = Score::from_yaml(yaml).unwrap();
        assert!(matches!(grain_order(&score), Err(MigrateError::Schema(_))));
    }

    #[test]
    fn test_plan_rendering() {
        let mut plan = Plan::default();
        plan.record("shop", ObjectKind::Table, "orders", Decision::Create);
        plan.record(
            "shop",
            ObjectKind::Column,
            "orders.note",
            Decision::Alter(vec!["type".into(), "nullable".into()]),
        );
        plan.record("shop", ObjectKind::Index, "ix_old", Decision::Noop);
        assert_eq!(plan.changes().count(), 2);
        assert!(!plan.is_noop());
        let text = plan.to_string();
        assert!(text.contains("CREATE   table shop.orders"));
        assert!(text.contains("ALTER(type, nullable) column shop.orders.note"));
        let json = plan.to_json().unwrap();
        assert!(json.contains("\"action\": \"ALTER\""));
    }
}
