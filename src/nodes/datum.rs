//! Runtime values.
//!
//! A [`Datum`] is the universal exchange value of the evaluator. SQL null is
//! the `Null` variant, so a `(value, isnull)` pair collapses into one value.
//! Comparison and hashing are not intrinsic; they go through the functions
//! the catalog names for each type (see `utils::adt::cmp`).

use std::fmt;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use crate::catalog::oid::Oid;

/// Physical tuple identifier (`ctid`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemPointer {
    pub block: u32,
    pub offset: u16,
}

/// Heap pages hold this many line pointers in the in-memory heap.
pub const TUPLES_PER_PAGE: usize = 256;

impl ItemPointer {
    pub fn from_index(index: usize) -> Self {
        Self {
            block: (index / TUPLES_PER_PAGE) as u32,
            offset: (index % TUPLES_PER_PAGE) as u16 + 1,
        }
    }

    pub fn index(self) -> Option<usize> {
        if self.offset == 0 {
            return None;
        }
        Some(self.block as usize * TUPLES_PER_PAGE + (self.offset as usize - 1))
    }
}

impl fmt::Display for ItemPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.block, self.offset)
    }
}

/// A possibly multi-dimensional array. Elements are stored in row-major order;
/// an empty array has no dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayValue {
    pub elemtype: Oid,
    pub dims: Vec<usize>,
    pub lbounds: Vec<i32>,
    pub elements: Vec<Datum>,
}

impl ArrayValue {
    pub fn empty(elemtype: Oid) -> Self {
        Self {
            elemtype,
            dims: Vec::new(),
            lbounds: Vec::new(),
            elements: Vec::new(),
        }
    }

    pub fn from_vec(elemtype: Oid, elements: Vec<Datum>) -> Self {
        if elements.is_empty() {
            return Self::empty(elemtype);
        }
        Self {
            elemtype,
            dims: vec![elements.len()],
            lbounds: vec![1],
            elements,
        }
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    pub fn nitems(&self) -> usize {
        self.dims.iter().product::<usize>() * usize::from(!self.dims.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    pub fn has_nulls(&self) -> bool {
        self.elements.iter().any(Datum::is_null)
    }

    /// Upper bound of dimension `dim` (0-based).
    pub fn ubound(&self, dim: usize) -> i32 {
        self.lbounds[dim] + self.dims[dim] as i32 - 1
    }
}

/// A composite value. `typid` is the row type, or `RECORDOID` for an
/// anonymous row.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordValue {
    pub typid: Oid,
    pub values: Vec<Datum>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum Datum {
    #[default]
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Numeric(Decimal),
    /// text, varchar, bpchar, name, unknown and cstring.
    Text(String),
    Bytea(Vec<u8>),
    Oid(Oid),
    Tid(ItemPointer),
    /// Days since 2000-01-01.
    Date(i32),
    /// Microseconds since 2000-01-01 00:00:00.
    Timestamp(i64),
    /// Microseconds since 2000-01-01 00:00:00 UTC.
    TimestampTz(i64),
    /// Unparsed `json` text; preserved verbatim.
    Json(String),
    Jsonb(JsonValue),
    /// Canonical `jsonpath` text.
    JsonPath(String),
    Array(Arc<ArrayValue>),
    Record(Arc<RecordValue>),
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn array(value: ArrayValue) -> Self {
        Self::Array(Arc::new(value))
    }

    pub fn record(typid: Oid, values: Vec<Datum>) -> Self {
        Self::Record(Arc::new(RecordValue { typid, values }))
    }

    /// Three-valued boolean view: `None` is SQL null.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int2(v) => Some(i64::from(*v)),
            Self::Int4(v) => Some(i64::from(*v)),
            Self::Int8(v) => Some(*v),
            Self::Oid(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) | Self::Json(v) | Self::JsonPath(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayValue> {
        match self {
            Self::Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&RecordValue> {
        match self {
            Self::Record(v) => Some(v),
            _ => None,
        }
    }

    /// Canonical, hashable form used for grouping and duplicate elimination.
    pub fn group_key(&self) -> KeyDatum {
        match self {
            Self::Null => KeyDatum::Null,
            Self::Bool(v) => KeyDatum::Bool(*v),
            Self::Int2(v) => KeyDatum::Int(i64::from(*v)),
            Self::Int4(v) => KeyDatum::Int(i64::from(*v)),
            Self::Int8(v) => KeyDatum::Int(*v),
            Self::Oid(v) => KeyDatum::Int(i64::from(*v)),
            Self::Date(v) => KeyDatum::Int(i64::from(*v)),
            Self::Timestamp(v) | Self::TimestampTz(v) => KeyDatum::Int(*v),
            Self::Float4(v) => KeyDatum::Float(float_key(f64::from(*v))),
            Self::Float8(v) => KeyDatum::Float(float_key(*v)),
            Self::Numeric(v) => KeyDatum::Text(v.normalize().to_string()),
            Self::Text(v) | Self::Json(v) | Self::JsonPath(v) => KeyDatum::Text(v.clone()),
            Self::Bytea(v) => KeyDatum::Bytes(v.clone()),
            Self::Tid(v) => KeyDatum::Int(i64::from(v.block) << 16 | i64::from(v.offset)),
            Self::Jsonb(v) => KeyDatum::Text(v.to_string()),
            Self::Array(v) => KeyDatum::Composite(
                std::iter::once(KeyDatum::Int(v.dims.len() as i64))
                    .chain(v.dims.iter().map(|d| KeyDatum::Int(*d as i64)))
                    .chain(v.lbounds.iter().map(|l| KeyDatum::Int(i64::from(*l))))
                    .chain(v.elements.iter().map(Datum::group_key))
                    .collect(),
            ),
            Self::Record(v) => KeyDatum::Composite(v.values.iter().map(Datum::group_key).collect()),
        }
    }
}

fn float_key(v: f64) -> u64 {
    if v.is_nan() {
        return u64::MAX;
    }
    if v == 0.0 {
        return 0;
    }
    v.to_bits()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyDatum {
    Null,
    Bool(bool),
    Int(i64),
    Float(u64),
    Text(String),
    Bytes(Vec<u8>),
    Composite(Vec<KeyDatum>),
}

/// Hashable key over several columns.
pub fn row_group_key(values: &[Datum]) -> Vec<KeyDatum> {
    values.iter().map(Datum::group_key).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_pointer_round_trips_index() {
        for index in [0usize, 1, 255, 256, 1000] {
            let tid = ItemPointer::from_index(index);
            assert!(tid.offset >= 1);
            assert_eq!(tid.index(), Some(index));
        }
        assert_eq!(ItemPointer::from_index(256).to_string(), "(1,1)");
    }

    #[test]
    fn float_keys_merge_signed_zero() {
        assert_eq!(Datum::Float8(0.0).group_key(), Datum::Float8(-0.0).group_key());
        assert_eq!(
            Datum::Float8(f64::NAN).group_key(),
            Datum::Float8(f64::NAN).group_key()
        );
    }

    #[test]
    fn numeric_keys_ignore_scale() {
        let a = Datum::Numeric(Decimal::new(150, 2));
        let b = Datum::Numeric(Decimal::new(15, 1));
        assert_eq!(a.group_key(), b.group_key());
    }
}
