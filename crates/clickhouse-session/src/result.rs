//! Minimal query result model consumed by cursors.
//!
//! This is the decoded shape a session hands back after `execute`; the
//! binary block format it was decoded from is the session's concern.

use std::fmt;

/// A result column: name plus the server-side type name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// ClickHouse type name, e.g. `UInt64` or `String`.
    pub type_name: String,
}

impl Column {
    /// Create a column descriptor.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// A single decoded value.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Value {
    /// NULL.
    Null,
    /// Signed integer types up to `Int64`.
    Int64(i64),
    /// Unsigned integer types up to `UInt64`.
    UInt64(u64),
    /// `Float32`/`Float64`.
    Float64(f64),
    /// `String`/`FixedString`.
    String(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::UInt64(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v}"),
        }
    }
}

/// The full materialized result of one query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Result columns, in select order.
    pub columns: Vec<Column>,
    /// Result rows; each row has one value per column.
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    /// An empty result (DDL, INSERT acknowledgements).
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the result has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::Int64(-42).to_string(), "-42");
        assert_eq!(Value::String("ch".into()).to_string(), "ch");
    }

    #[test]
    fn test_empty_result() {
        let r = QueryResult::empty();
        assert!(r.is_empty());
        assert_eq!(r.len(), 0);
    }
}
