//! Actual-state descriptors produced by catalog introspection.
//!
//! Each descriptor carries only what a catalog reports and knows how to decide
//! whether it `reflects` the desired element. Descriptors are built fresh per
//! introspection call and dropped once the diff decision is made.

use rust_decimal::Decimal;

use crate::core::schema::{Column, ColumnKind, FkRule, ForeignKey, Index, Sequence, Table};

/// Prefix marking indices that do not follow this engine's naming convention.
///
/// Such indices are reported under `##<raw name>` so the differ always
/// schedules them for removal.
pub const FOREIGN_INDEX_MARKER: &str = "##";

/// A column as the catalog describes it.
#[derive(Debug, Clone, PartialEq)]
pub struct DbColumnInfo {
    pub name: String,
    pub kind: ColumnKind,
    pub nullable: bool,
    pub length: u32,
    pub max: bool,
    pub precision: u32,
    pub scale: u32,
    /// Stored default after `normalize_stored_default`.
    pub default: Option<String>,
}

impl DbColumnInfo {
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
        }
    }

    /// Whether the stored column matches `col`, given the canonical default the
    /// dialect expects for it.
    pub fn reflects(&self, col: &Column, expected_default: Option<&str>) -> bool {
        if self.kind != col.kind {
            return false;
        }

        // Empty strings read back as NULL in some engines, so a string column
        // defaulting to '' is allowed to differ in nullability.
        let empty_string_default = col.kind == ColumnKind::String && expected_default == Some("''");
        if self.nullable != col.nullable && !empty_string_default {
            return false;
        }

        match col.kind {
            ColumnKind::String => {
                if col.max != self.max || (!col.max && col.length != self.length) {
                    return false;
                }
            }
            ColumnKind::Decimal => {
                if col.precision != self.precision || col.scale != self.scale {
                    return false;
                }
            }
            _ => {}
        }

        defaults_match(col.kind, self.default.as_deref(), expected_default)
    }
}

/// Compare two canonical defaults the way values of `kind` compare.
pub fn defaults_match(kind: ColumnKind, actual: Option<&str>, expected: Option<&str>) -> bool {
    let (actual, expected) = match (actual, expected) {
        (None, None) => return true,
        (Some(a), Some(e)) => (a.trim(), e.trim()),
        _ => return false,
    };

    match kind {
        ColumnKind::Integer => match (actual.parse::<i64>(), expected.parse::<i64>()) {
            (Ok(a), Ok(e)) => a == e,
            _ => actual.eq_ignore_ascii_case(expected),
        },
        ColumnKind::Floating => match (actual.parse::<f64>(), expected.parse::<f64>()) {
            (Ok(a), Ok(e)) => a == e,
            _ => false,
        },
        ColumnKind::Decimal => match (actual.parse::<Decimal>(), expected.parse::<Decimal>()) {
            (Ok(a), Ok(e)) => a == e,
            _ => false,
        },
        ColumnKind::Boolean | ColumnKind::Binary => actual.eq_ignore_ascii_case(expected),
        _ => actual == expected,
    }
}

/// Primary key as stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DbPkInfo {
    pub name: String,
    pub columns: Vec<String>,
}

impl DbPkInfo {
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Same constraint name (after limiting) and same ordered columns.
    pub fn reflects(&self, table: &Table, expected_name: &str) -> bool {
        self.name == expected_name && self.columns == table.primary_key
    }
}

/// Foreign key as stored.
///
/// Table names are catalog names. Dialects without schema namespaces leave
/// `ref_grain` empty and report the joined name in `ref_table`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbFkInfo {
    pub name: String,
    pub table_name: String,
    pub ref_grain: String,
    pub ref_table: String,
    pub columns: Vec<String>,
    pub update_rule: FkRule,
    pub delete_rule: FkRule,
}

impl DbFkInfo {
    /// Compare against `fk` declared on the table stored as `table_name`,
    /// whose target the dialect reports as `ref_key`.
    pub fn reflects(&self, table_name: &str, ref_key: &(String, String), fk: &ForeignKey) -> bool {
        self.table_name == table_name
            && self.ref_grain == ref_key.0
            && self.ref_table == ref_key.1
            && self.columns == fk.columns
            && self.update_rule == fk.on_update
            && self.delete_rule == fk.on_delete
    }
}

/// Index as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbIndexInfo {
    pub table_name: String,
    pub index_name: String,
    pub columns: Vec<String>,
}

impl DbIndexInfo {
    pub fn new(table_name: impl Into<String>, index_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            index_name: index_name.into(),
            columns: Vec::new(),
        }
    }

    /// Whether this index was tagged as not created by this engine.
    pub fn is_foreign(&self) -> bool {
        self.index_name.starts_with(FOREIGN_INDEX_MARKER)
    }

    /// Name as known to the database.
    pub fn raw_name(&self) -> &str {
        self.index_name
            .strip_prefix(FOREIGN_INDEX_MARKER)
            .unwrap_or(&self.index_name)
    }

    /// Compare against `index` on the table stored as `table_name`.
    pub fn reflects(&self, table_name: &str, index: &Index) -> bool {
        !self.is_foreign() && self.table_name == table_name && self.columns == index.columns
    }
}

/// Sequence parameters as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbSequenceInfo {
    pub increment_by: i64,
    pub min_value: i64,
    pub max_value: i64,
    pub cycle: bool,
}

impl DbSequenceInfo {
    pub fn reflects(&self, seq: &Sequence) -> bool {
        self.increment_by == seq.increment_by
            && self.min_value == seq.min_value
            && self.max_value == seq.max_value
            && self.cycle == seq.cycle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::DefaultValue;

    fn info(kind: ColumnKind) -> DbColumnInfo {
        DbColumnInfo::new("c", kind)
    }

    #[test]
    fn test_reflects_kind_and_nullability() {
        let col = Column::new("c", ColumnKind::Integer).not_null();
        let mut actual = info(ColumnKind::Integer);
        assert!(!actual.reflects(&col, None));
        actual.nullable = false;
        assert!(actual.reflects(&col, None));
        actual.kind = ColumnKind::Floating;
        assert!(!actual.reflects(&col, None));
    }

    #[test]
    fn test_reflects_string_length_and_max() {
        let col = Column::string("c", 20);
        let mut actual = info(ColumnKind::String);
        actual.length = 20;
        assert!(actual.reflects(&col, None));
        actual.length = 21;
        assert!(!actual.reflects(&col, None));

        let mut clob = Column::string("c", 1);
        clob.max = true;
        clob.length = 0;
        actual.max = true;
        assert!(actual.reflects(&clob, None));
    }

    #[test]
    fn test_reflects_decimal_precision() {
        let col = Column::decimal("c", 10, 2);
        let mut actual = info(ColumnKind::Decimal);
        actual.precision = 10;
        actual.scale = 2;
        assert!(actual.reflects(&col, None));
        actual.scale = 3;
        assert!(!actual.reflects(&col, None));
    }

    #[test]
    fn test_empty_string_default_tolerates_nullability() {
        let col = Column::string("c", 5)
            .not_null()
            .with_default(DefaultValue::Text(String::new()));
        let mut actual = info(ColumnKind::String);
        actual.length = 5;
        actual.default = Some("''".into());
        assert!(actual.reflects(&col, Some("''")));
    }

    #[test]
    fn test_defaults_compare_by_kind() {
        assert!(defaults_match(ColumnKind::Decimal, Some("1.50"), Some("1.5")));
        assert!(defaults_match(ColumnKind::Floating, Some("2.0"), Some("2")));
        assert!(defaults_match(ColumnKind::Integer, Some("NEXTVAL(s)"), Some("nextval(s)")));
        assert!(defaults_match(ColumnKind::Boolean, Some("'true'"), Some("'TRUE'")));
        assert!(!defaults_match(ColumnKind::String, Some("'a'"), Some("'A'")));
        assert!(!defaults_match(ColumnKind::Integer, None, Some("0")));
        assert!(defaults_match(ColumnKind::DateTime, None, None));
    }

    #[test]
    fn test_foreign_index_marker() {
        let idx = DbIndexInfo::new("t", format!("{}SYS_C001", FOREIGN_INDEX_MARKER));
        assert!(idx.is_foreign());
        assert_eq!(idx.raw_name(), "SYS_C001");
        let index = Index {
            name: "SYS_C001".into(),
            columns: vec![],
        };
        assert!(!idx.reflects("t", &index));
    }

    #[test]
    fn test_fk_reflects_compares_rules_and_target() {
        let fk = ForeignKey {
            name: "fk_t_p".into(),
            columns: vec!["p".into()],
            references: crate::core::schema::TableRef {
                grain: "g".into(),
                table: "parent".into(),
            },
            on_update: FkRule::NoAction,
            on_delete: FkRule::Cascade,
        };
        let stored = DbFkInfo {
            name: "fk_t_p".into(),
            table_name: "g_t".into(),
            ref_grain: String::new(),
            ref_table: "g_parent".into(),
            columns: vec!["p".into()],
            update_rule: FkRule::NoAction,
            delete_rule: FkRule::Cascade,
        };
        let key = (String::new(), "g_parent".to_string());
        assert!(stored.reflects("g_t", &key, &fk));
        let changed = DbFkInfo {
            delete_rule: FkRule::NoAction,
            ..stored
        };
        assert!(!changed.reflects("g_t", &key, &fk));
    }

    #[test]
    fn test_sequence_reflects() {
        let seq = Sequence::new("g", "s");
        let info = DbSequenceInfo {
            increment_by: 1,
            min_value: 1,
            max_value: i64::MAX,
            cycle: false,
        };
        assert!(info.reflects(&seq));
        assert!(!DbSequenceInfo { cycle: true, ..info }.reflects(&seq));
    }
}
