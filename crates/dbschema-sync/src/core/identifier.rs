//! Identifier validation, quoting and length limiting.
//!
//! Identifiers cannot be bound as statement parameters, so every object name
//! that reaches generated SQL passes through this module:
//!
//! 1. Authored names are validated against a conservative grammar
//!    (`[A-Za-z_][A-Za-z0-9_]*`) when the schema is loaded.
//! 2. Names are wrapped in double quotes with embedded quotes doubled. All five
//!    dialects accept ANSI double-quoted identifiers (SQL Server sessions are
//!    opened with `QUOTED_IDENTIFIER ON`).
//! 3. Names longer than a dialect's limit are collapsed deterministically by
//!    [`limit_name`], so regenerating the same object always yields the same
//!    name.

use crate::error::{MigrateError, Result};

/// Column name reserved for the row version counter of versioned tables.
pub const RECVERSION: &str = "recversion";

/// Length of the hash suffix appended by [`limit_name`].
const HASH_SUFFIX_LENGTH: usize = 8;

/// Validate an authored identifier.
///
/// # Errors
///
/// Returns `MigrateError::Schema` when the name is empty, starts with a digit,
/// or contains anything but ASCII letters, digits and underscores.
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let first = chars
        .next()
        .ok_or_else(|| MigrateError::Schema("Identifier cannot be empty".to_string()))?;

    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(MigrateError::Schema(format!(
            "Invalid identifier {:?}: must start with a letter or underscore",
            name
        )));
    }
    if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
        return Err(MigrateError::Schema(format!(
            "Invalid identifier {:?}: unexpected character {:?}",
            name, bad
        )));
    }
    Ok(())
}

/// Quote an identifier with ANSI double quotes.
///
/// ```ignore
/// assert_eq!(quote_ident("users"), "\"users\"");
/// assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
/// ```
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal, doubling embedded single quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Hash compatible with `java.lang.String#hashCode` over UTF-16 code units.
///
/// Stored object names produced by earlier deployments of this engine were
/// collapsed with this hash, so it must stay bit-for-bit stable.
pub fn string_hash(value: &str) -> i32 {
    value
        .encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

/// Collapse `name` to at most `max_len` characters.
///
/// Names within the limit are returned unchanged. Longer names keep their
/// first `max_len - 8` characters followed by the upper-case hex hash of the
/// whole name.
pub fn limit_name(name: &str, max_len: usize) -> String {
    if name.chars().count() <= max_len || max_len <= HASH_SUFFIX_LENGTH {
        return name.to_string();
    }
    let prefix: String = name.chars().take(max_len - HASH_SUFFIX_LENGTH).collect();
    format!("{}{:08X}", prefix, string_hash(name) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Validation tests
    // =========================================================================

    #[test]
    fn test_validate_identifier_accepts_plain_names() {
        assert!(validate_identifier("orders").is_ok());
        assert!(validate_identifier("_tmp").is_ok());
        assert!(validate_identifier("Table123").is_ok());
    }

    #[test]
    fn test_validate_identifier_rejects_empty() {
        let result = validate_identifier("");
        assert!(result.unwrap_err().to_string().contains("cannot be empty"));
    }

    #[test]
    fn test_validate_identifier_rejects_leading_digit() {
        assert!(validate_identifier("1abc").is_err());
    }

    #[test]
    fn test_validate_identifier_rejects_injection() {
        assert!(validate_identifier("a\"; DROP TABLE x; --").is_err());
        assert!(validate_identifier("table\0name").is_err());
        assert!(validate_identifier("with space").is_err());
    }

    // =========================================================================
    // Quoting tests
    // =========================================================================

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("abc"), "'abc'");
        assert_eq!(quote_literal("O'Brien"), "'O''Brien'");
    }

    // =========================================================================
    // Name limiting tests
    // =========================================================================

    #[test]
    fn test_string_hash_matches_java() {
        // Reference values from java.lang.String#hashCode
        assert_eq!(string_hash(""), 0);
        assert_eq!(string_hash("a"), 97);
        assert_eq!(string_hash("abc"), 96354);
        assert_eq!(string_hash("hello world"), 1794106052);
        assert_eq!(string_hash("polygenelubricants"), i32::MIN);
    }

    #[test]
    fn test_limit_name_short_names_unchanged() {
        assert_eq!(limit_name("pk_orders", 30), "pk_orders");
        let exact = "a".repeat(30);
        assert_eq!(limit_name(&exact, 30), exact);
    }

    #[test]
    fn test_limit_name_collapses_long_names() {
        let name = "shop_order_lines_customer_reference_fk";
        let limited = limit_name(name, 30);
        assert_eq!(limited.len(), 30);
        assert!(limited.starts_with("shop_order_lines_cust"));
        assert_eq!(
            &limited[22..],
            format!("{:08X}", string_hash(name) as u32)
        );
    }

    #[test]
    fn test_limit_name_is_deterministic() {
        let name = "a_really_long_trigger_name_for_materialized_view";
        assert_eq!(limit_name(name, 31), limit_name(name, 31));
        assert_ne!(limit_name(name, 31), limit_name(&format!("{}x", name), 31));
    }
}
