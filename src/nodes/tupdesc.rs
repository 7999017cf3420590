//! Tuple descriptors. Attribute numbers are 1-based; dropped columns keep
//! their slot so numbering never shifts.

use crate::catalog::oid::{INVALID_OID, Oid};
use crate::catalog::pg_type::RECORDOID;

/// System attribute numbers.
pub const SELF_ITEM_POINTER_ATTRIBUTE_NUMBER: i16 = -1;
pub const TABLE_OID_ATTRIBUTE_NUMBER: i16 = -6;
pub const INVALID_ATTR_NUMBER: i16 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub typid: Oid,
    pub typmod: i32,
    pub collation: Oid,
    pub dropped: bool,
    pub not_null: bool,
    pub has_default: bool,
}

impl Attribute {
    pub fn new(name: impl Into<String>, typid: Oid, typmod: i32, collation: Oid) -> Self {
        Self {
            name: name.into(),
            typid,
            typmod,
            collation,
            dropped: false,
            not_null: false,
            has_default: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleDesc {
    pub attrs: Vec<Attribute>,
    /// Composite type this descriptor describes, or `RECORDOID`.
    pub typid: Oid,
}

impl Default for TupleDesc {
    fn default() -> Self {
        Self {
            attrs: Vec::new(),
            typid: RECORDOID,
        }
    }
}

impl TupleDesc {
    pub fn new(attrs: Vec<Attribute>) -> Self {
        Self {
            attrs,
            typid: RECORDOID,
        }
    }

    pub fn with_type(mut self, typid: Oid) -> Self {
        self.typid = typid;
        self
    }

    pub fn natts(&self) -> usize {
        self.attrs.len()
    }

    /// Attribute by 1-based number.
    pub fn attr(&self, attno: i16) -> Option<&Attribute> {
        if attno <= 0 {
            return None;
        }
        self.attrs.get(attno as usize - 1)
    }

    pub fn attr_mut(&mut self, attno: i16) -> Option<&mut Attribute> {
        if attno <= 0 {
            return None;
        }
        self.attrs.get_mut(attno as usize - 1)
    }

    /// Look up a live column by name; returns its 1-based number.
    pub fn attnum_by_name(&self, name: &str) -> Option<i16> {
        self.attrs
            .iter()
            .position(|attr| !attr.dropped && attr.name == name)
            .map(|idx| idx as i16 + 1)
    }

    pub fn live_attrs(&self) -> impl Iterator<Item = (i16, &Attribute)> {
        self.attrs
            .iter()
            .enumerate()
            .filter(|(_, attr)| !attr.dropped)
            .map(|(idx, attr)| (idx as i16 + 1, attr))
    }

    pub fn column_names(&self) -> Vec<String> {
        self.attrs.iter().map(|attr| attr.name.clone()).collect()
    }

    pub fn is_anonymous(&self) -> bool {
        self.typid == RECORDOID || self.typid == INVALID_OID
    }
}
