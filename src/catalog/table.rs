//! `pg_class` / `pg_index` rows: relations and their indexes.

use std::collections::HashMap;

use super::oid::Oid;
use crate::nodes::parsenodes::Query;
use crate::nodes::primnodes::Expr;
use crate::nodes::tupdesc::TupleDesc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelKind {
    Table,
    MatView,
    View,
    /// Standalone composite type (`CREATE TYPE ... AS (...)`); never scanned.
    CompositeType,
}

impl RelKind {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::MatView => "materialized view",
            Self::View => "view",
            Self::CompositeType => "composite type",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    Permanent,
    Temp,
}

/// A btree index used for uniqueness enforcement.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    pub oid: Oid,
    pub name: String,
    /// Key columns; `0` marks an expression column.
    pub keys: Vec<i16>,
    pub exprs: Vec<Expr>,
    pub predicate: Option<Expr>,
    pub unique: bool,
    pub primary: bool,
    /// Equality operator of each key column's default btree opclass.
    pub eq_ops: Vec<Oid>,
}

impl IndexInfo {
    /// Plain-column, non-partial unique index.
    pub fn is_usable_for_refresh(&self) -> bool {
        self.unique
            && self.predicate.is_none()
            && self.exprs.is_empty()
            && self.keys.iter().all(|&key| key > 0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub oid: Oid,
    pub name: String,
    pub namespace: Oid,
    pub kind: RelKind,
    pub persistence: Persistence,
    pub desc: TupleDesc,
    /// Composite type describing a row of the relation.
    pub rowtype: Oid,
    /// Identity of the physical heap; swapped by a non-concurrent refresh.
    pub relfilenode: Oid,
    pub populated: bool,
    /// Analyzed column defaults by attribute number.
    pub defaults: HashMap<i16, Expr>,
    pub checks: Vec<(String, Expr)>,
    pub indexes: Vec<IndexInfo>,
    /// Stored query of a view or materialized view.
    pub view_query: Option<Box<Query>>,
    /// Row count recorded by the last ANALYZE.
    pub reltuples: Option<u64>,
}

impl Relation {
    pub fn is_matview(&self) -> bool {
        self.kind == RelKind::MatView
    }

    pub fn is_scannable(&self) -> bool {
        matches!(self.kind, RelKind::Table | RelKind::MatView)
    }

    pub fn unique_indexes(&self) -> impl Iterator<Item = &IndexInfo> {
        self.indexes.iter().filter(|index| index.unique)
    }

    pub fn default_for(&self, attno: i16) -> Option<&Expr> {
        self.defaults.get(&attno)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_usable_index_requires_plain_unique_keys() {
        let mut index = IndexInfo {
            oid: 1,
            name: "m_a_idx".to_string(),
            keys: vec![1],
            exprs: Vec::new(),
            predicate: None,
            unique: true,
            primary: false,
            eq_ops: vec![96],
        };
        assert!(index.is_usable_for_refresh());
        index.keys = vec![1, 0];
        assert!(!index.is_usable_for_refresh());
        index.keys = vec![1];
        index.unique = false;
        assert!(!index.is_usable_for_refresh());
    }
}
