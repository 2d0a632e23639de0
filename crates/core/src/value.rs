//! Scalar values and column data types.
//!
//! `Value` is the tagged union flowing through predicates, row payloads,
//! and kernel outputs. Comparison semantics follow SQL three-valued logic:
//! comparing across tags (or against `Null`) yields no ordering, which
//! predicate evaluation treats as `Null` and filters out.
//!
//! `total_cmp` provides the total order used by the sort kernel and index
//! key encoding, where `Null` sorts smallest and floats use IEEE total
//! ordering.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Scalar value in the engine's data model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absent value
    Null,
    /// Boolean
    Boolean(bool),
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit float
    Float(f64),
    /// Byte string; ordering is byte-lexicographic
    Text(Vec<u8>),
}

impl Value {
    /// Convenience constructor for UTF-8 text values.
    pub fn text(s: impl AsRef<str>) -> Self {
        Value::Text(s.as_ref().as_bytes().to_vec())
    }

    /// True if this value is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// SQL comparison: `None` when either side is `Null` or the tags
    /// differ, otherwise the per-tag ordering.
    pub fn sql_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// SQL equality under three-valued logic.
    ///
    /// `None` means "unknown" (a `Null` was involved or tags differ) and
    /// is treated as false by filters.
    pub fn sql_eq(&self, other: &Value) -> Option<bool> {
        self.sql_cmp(other).map(|o| o == Ordering::Equal)
    }

    /// Total order over all values: `Null` smallest, then booleans,
    /// integers, floats, text. Used by the sort kernel and index
    /// encoding; never exposed as SQL comparison semantics.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Boolean(_) => 1,
                Value::Integer(_) => 2,
                Value::Float(_) => 3,
                Value::Text(_) => 4,
            }
        }
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            _ => rank(self).cmp(&rank(other)),
        }
    }

    /// Numeric view for aggregation (SUM/AVG). Integers widen to f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }
}

/// Column data types with their physical widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Bool,
    /// Variable-width UTF-8; offset-encoded in column buffers
    Utf8,
    /// Days since the Unix epoch, 32-bit
    Date32,
    /// Microseconds since the Unix epoch, 64-bit
    TimestampMicros,
}

impl DataType {
    /// Element size in bytes for fixed-width types; `None` for `Utf8`.
    pub fn element_size(&self) -> Option<usize> {
        match self {
            DataType::Int8 | DataType::UInt8 | DataType::Bool => Some(1),
            DataType::Int16 | DataType::UInt16 => Some(2),
            DataType::Int32 | DataType::UInt32 | DataType::Float32 | DataType::Date32 => Some(4),
            DataType::Int64
            | DataType::UInt64
            | DataType::Float64
            | DataType::TimestampMicros => Some(8),
            DataType::Utf8 => None,
        }
    }

    /// True for the integer family (signed or unsigned).
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            DataType::Int8
                | DataType::Int16
                | DataType::Int32
                | DataType::Int64
                | DataType::UInt8
                | DataType::UInt16
                | DataType::UInt32
                | DataType::UInt64
        )
    }

    /// The `Value` tag this type's elements decode to.
    pub fn value_kind(&self) -> &'static str {
        match self {
            DataType::Bool => "boolean",
            DataType::Float32 | DataType::Float64 => "float",
            DataType::Utf8 => "text",
            _ => "integer",
        }
    }
}
