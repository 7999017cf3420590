//! `pg_operator`, `pg_cast` and btree operator-family membership.

use super::oid::Oid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OprKind {
    Binary,
    Prefix,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgOperator {
    pub oid: Oid,
    pub name: String,
    pub namespace: Oid,
    pub kind: OprKind,
    /// `INVALID_OID` for prefix operators.
    pub left: Oid,
    pub right: Oid,
    pub result: Oid,
    /// Implementing function.
    pub code: Oid,
    pub commutator: Oid,
    pub negator: Oid,
}

/// `castcontext`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CoercionContext {
    Implicit,
    Assignment,
    Explicit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastMethod {
    Function(Oid),
    Binary,
    InOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgCast {
    pub source: Oid,
    pub target: Oid,
    pub context: CoercionContext,
    pub method: CastMethod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMethod {
    Btree,
    Hash,
}

/// btree strategy numbers.
pub const BT_LESS_STRATEGY: i16 = 1;
pub const BT_LESS_EQUAL_STRATEGY: i16 = 2;
pub const BT_EQUAL_STRATEGY: i16 = 3;
pub const BT_GREATER_EQUAL_STRATEGY: i16 = 4;
pub const BT_GREATER_STRATEGY: i16 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgOpfamily {
    pub oid: Oid,
    pub name: String,
    pub method: AccessMethod,
}

/// One `pg_amop` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgAmop {
    pub family: Oid,
    pub lefttype: Oid,
    pub righttype: Oid,
    pub strategy: i16,
    pub operator: Oid,
}

/// Default operator class of a type for an access method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgOpclass {
    pub family: Oid,
    pub input_type: Oid,
    pub method: AccessMethod,
}

/// How an operator participates in one btree family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpfamilyMember {
    pub family: Oid,
    pub strategy: i16,
    pub lefttype: Oid,
    pub righttype: Oid,
}
