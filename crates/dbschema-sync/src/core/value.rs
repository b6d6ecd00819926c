//! SQL values exchanged across the [`Connection`](super::traits::Connection) seam.
//!
//! Catalog queries return small result sets of names, numbers and text, so the
//! representation is owned and deliberately narrow. Drivers that only deliver
//! text (ODBC) hand back `Text` and rely on the lenient accessors below.

/// A single bound parameter or fetched cell.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,

    /// Boolean value.
    Bool(bool),

    /// Any integer column, widened to 64 bits.
    I64(i64),

    /// Any approximate numeric column.
    F64(f64),

    /// Text, including decimals and timestamps rendered by the driver.
    Text(String),

    /// Binary data.
    Bytes(Vec<u8>),
}

impl SqlValue {
    /// Check if this value is NULL.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Render as text, if the value has a textual form.
    pub fn as_text(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Bool(v) => Some(v.to_string()),
            SqlValue::I64(v) => Some(v.to_string()),
            SqlValue::F64(v) => Some(v.to_string()),
            SqlValue::Text(v) => Some(v.clone()),
            SqlValue::Bytes(v) => Some(hex::encode_upper(v)),
        }
    }

    /// Interpret as an integer, parsing text when needed.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::I64(v) => Some(*v),
            SqlValue::Bool(v) => Some(i64::from(*v)),
            SqlValue::F64(v) if v.fract() == 0.0 => Some(*v as i64),
            SqlValue::Text(v) => {
                let t = v.trim();
                t.parse::<i64>()
                    .ok()
                    .or_else(|| t.parse::<f64>().ok().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            }
            _ => None,
        }
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::I64(i64::from(v))
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

/// One fetched row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: Vec<SqlValue>,
}

impl Row {
    pub fn new(values: Vec<SqlValue>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&SqlValue> {
        self.values.get(idx)
    }

    /// Text of column `idx`; `None` for NULL or a missing column.
    pub fn get_string(&self, idx: usize) -> Option<String> {
        self.values.get(idx).and_then(SqlValue::as_text)
    }

    /// Text of column `idx` with trailing blanks removed (CHAR-padded catalogs).
    pub fn get_trimmed(&self, idx: usize) -> Option<String> {
        self.get_string(idx).map(|s| s.trim_end().to_string())
    }

    pub fn get_i64(&self, idx: usize) -> Option<i64> {
        self.values.get(idx).and_then(SqlValue::as_i64)
    }

    /// Truthiness of column `idx`: booleans, non-zero numbers, `Y`/`YES`/`TRUE`.
    pub fn get_bool(&self, idx: usize) -> bool {
        match self.values.get(idx) {
            Some(SqlValue::Bool(v)) => *v,
            Some(SqlValue::I64(v)) => *v != 0,
            Some(SqlValue::Text(v)) => matches!(
                v.trim().to_ascii_uppercase().as_str(),
                "Y" | "YES" | "TRUE" | "T" | "1"
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_accessors_accept_text_numbers() {
        let row = Row::new(vec![
            SqlValue::Text(" 42 ".into()),
            SqlValue::Text("YES".into()),
            SqlValue::Null,
            SqlValue::Text("RDB$NAME   ".into()),
        ]);
        assert_eq!(row.get_i64(0), Some(42));
        assert!(row.get_bool(1));
        assert_eq!(row.get_string(2), None);
        assert_eq!(row.get_trimmed(3).as_deref(), Some("RDB$NAME"));
        assert_eq!(row.get_string(9), None);
    }

    #[test]
    fn test_as_i64_from_float_text() {
        assert_eq!(SqlValue::Text("10.0".into()).as_i64(), Some(10));
        assert_eq!(SqlValue::Text("10.5".into()).as_i64(), None);
        assert_eq!(SqlValue::F64(3.0).as_i64(), Some(3));
    }
}
