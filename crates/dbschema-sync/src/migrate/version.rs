//! Grain version strings.
//!
//! A version is a comma-separated list of tagged components such as
//! `1.2,dev3.1` where each component is an optional letter tag followed by a
//! numeric part. Two versions are compared tag by tag; a tag present on only
//! one side makes that side newer.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::{MigrateError, Result};

static COMPONENT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_]*)([0-9]+(?:\.[0-9]+)*)$").expect("valid regex"));

/// Outcome of comparing a desired version with a stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VersionOrdering {
    Greater,
    Equals,
    Lower,
    /// Some tags moved forward while others moved back.
    Inconsistent,
}

impl fmt::Display for VersionOrdering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VersionOrdering::Greater => "GREATER",
            VersionOrdering::Equals => "EQUALS",
            VersionOrdering::Lower => "LOWER",
            VersionOrdering::Inconsistent => "INCONSISTENT",
        };
        f.write_str(s)
    }
}

/// A parsed version string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionString {
    raw: String,
    components: BTreeMap<String, Vec<u64>>,
}

impl VersionString {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut components = BTreeMap::new();
        for part in raw.split(',') {
            let part = part.trim();
            let caps = COMPONENT_REGEX.captures(part).ok_or_else(|| {
                MigrateError::Schema(format!("Invalid version component '{}' in '{}'", part, raw))
            })?;
            let tag = caps[1].to_ascii_uppercase();
            let number = caps[2]
                .split('.')
                .map(|n| {
                    n.parse::<u64>().map_err(|_| {
                        MigrateError::Schema(format!("Version number '{}' is out of range", n))
                    })
                })
                .collect::<Result<Vec<u64>>>()?;
            if components.insert(tag.clone(), number).is_some() {
                return Err(MigrateError::Schema(format!(
                    "Duplicate version tag '{}' in '{}'",
                    tag, raw
                )));
            }
        }
        Ok(Self {
            raw: raw.to_string(),
            components,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Compare `self` (desired) against `stored`.
    pub fn compare(&self, stored: &VersionString) -> VersionOrdering {
        let mut result = VersionOrdering::Equals;
        let tags = self.components.keys().chain(stored.components.keys());
        for tag in tags {
            let step = match (self.components.get(tag), stored.components.get(tag)) {
                (Some(a), Some(b)) => compare_numbers(a, b),
                (Some(_), None) => Ordering::Greater,
                (None, Some(_)) => Ordering::Less,
                (None, None) => Ordering::Equal,
            };
            result = match (result, step) {
                (r, Ordering::Equal) => r,
                (VersionOrdering::Equals, Ordering::Greater) => VersionOrdering::Greater,
                (VersionOrdering::Equals, Ordering::Less) => VersionOrdering::Lower,
                (VersionOrdering::Greater, Ordering::Greater) => VersionOrdering::Greater,
                (VersionOrdering::Lower, Ordering::Less) => VersionOrdering::Lower,
                _ => return VersionOrdering::Inconsistent,
            };
        }
        result
    }
}

impl fmt::Display for VersionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Numeric parts compare left to right; a missing part counts as zero.
fn compare_numbers(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmp(a: &str, b: &str) -> VersionOrdering {
        VersionString::parse(a)
            .unwrap()
            .compare(&VersionString::parse(b).unwrap())
    }

    #[test]
    fn test_single_component() {
        assert_eq!(cmp("1.2", "1.2"), VersionOrdering::Equals);
        assert_eq!(cmp("1.10", "1.9"), VersionOrdering::Greater);
        assert_eq!(cmp("1.0", "2.0"), VersionOrdering::Lower);
        assert_eq!(cmp("2", "2.0"), VersionOrdering::Equals);
    }

    #[test]
    fn test_tagged_components() {
        assert_eq!(cmp("1.2,dev3", "1.2,dev2"), VersionOrdering::Greater);
        assert_eq!(cmp("1.2,DEV3", "1.2,dev3"), VersionOrdering::Equals);
        assert_eq!(cmp("1.2,dev1", "1.2"), VersionOrdering::Greater);
        assert_eq!(cmp("1.2", "1.2,dev1"), VersionOrdering::Lower);
    }

    #[test]
    fn test_contradicting_tags_are_inconsistent() {
        assert_eq!(cmp("1.3,dev1", "1.2,dev2"), VersionOrdering::Inconsistent);
        assert_eq!(cmp("1.3", "1.2,dev2"), VersionOrdering::Inconsistent);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(VersionString::parse("").is_err());
        assert!(VersionString::parse("1.x").is_err());
        assert!(VersionString::parse("1.0,1.1").is_err());
        assert_eq!(VersionString::parse("1.0, dev2").unwrap().as_str(), "1.0, dev2");
    }
}
