//! `pg_type` rows and the well-known type OIDs.

use super::oid::{INVALID_OID, Oid};
use crate::nodes::primnodes::Expr;

pub const BOOLOID: Oid = 16;
pub const BYTEAOID: Oid = 17;
pub const NAMEOID: Oid = 19;
pub const INT8OID: Oid = 20;
pub const INT2OID: Oid = 21;
pub const INT4OID: Oid = 23;
pub const TEXTOID: Oid = 25;
pub const OIDOID: Oid = 26;
pub const TIDOID: Oid = 27;
pub const JSONOID: Oid = 114;
pub const FLOAT4OID: Oid = 700;
pub const FLOAT8OID: Oid = 701;
pub const UNKNOWNOID: Oid = 705;
pub const BPCHAROID: Oid = 1042;
pub const VARCHAROID: Oid = 1043;
pub const DATEOID: Oid = 1082;
pub const TIMESTAMPOID: Oid = 1114;
pub const TIMESTAMPTZOID: Oid = 1184;
pub const NUMERICOID: Oid = 1700;
pub const RECORDOID: Oid = 2249;
pub const CSTRINGOID: Oid = 2275;
pub const ANYOID: Oid = 2276;
pub const ANYARRAYOID: Oid = 2277;
pub const VOIDOID: Oid = 2278;
pub const INTERNALOID: Oid = 2281;
pub const ANYELEMENTOID: Oid = 2283;
pub const ANYNONARRAYOID: Oid = 2776;
pub const JSONBOID: Oid = 3802;
pub const JSONPATHOID: Oid = 4072;
pub const ANYCOMPATIBLEOID: Oid = 5077;
pub const ANYCOMPATIBLEARRAYOID: Oid = 5078;
pub const ANYCOMPATIBLENONARRAYOID: Oid = 5079;

pub const BOOLARRAYOID: Oid = 1000;
pub const BYTEAARRAYOID: Oid = 1001;
pub const NAMEARRAYOID: Oid = 1003;
pub const INT2ARRAYOID: Oid = 1005;
pub const INT4ARRAYOID: Oid = 1007;
pub const TEXTARRAYOID: Oid = 1009;
pub const TIDARRAYOID: Oid = 1010;
pub const BPCHARARRAYOID: Oid = 1014;
pub const VARCHARARRAYOID: Oid = 1015;
pub const INT8ARRAYOID: Oid = 1016;
pub const FLOAT4ARRAYOID: Oid = 1021;
pub const FLOAT8ARRAYOID: Oid = 1022;
pub const OIDARRAYOID: Oid = 1028;
pub const TIMESTAMPARRAYOID: Oid = 1115;
pub const DATEARRAYOID: Oid = 1182;
pub const TIMESTAMPTZARRAYOID: Oid = 1185;
pub const NUMERICARRAYOID: Oid = 1231;
pub const JSONARRAYOID: Oid = 199;
pub const RECORDARRAYOID: Oid = 2287;
pub const JSONBARRAYOID: Oid = 3807;
pub const JSONPATHARRAYOID: Oid = 4073;

pub const DEFAULT_COLLATION_OID: Oid = 100;
pub const C_COLLATION_OID: Oid = 950;
pub const POSIX_COLLATION_OID: Oid = 951;

/// Upper bound on the attributes of one row type.
pub const MAX_TUPLE_ATTRIBUTE_NUMBER: usize = 1664;

/// Upper bound on the arguments of one function call.
pub const FUNC_MAX_ARGS: usize = 100;

/// `typcategory`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCategory {
    Array,
    Boolean,
    Composite,
    DateTime,
    Enum,
    Geometric,
    Network,
    Numeric,
    Pseudo,
    Range,
    String,
    Timespan,
    User,
    BitString,
    Unknown,
    Internal,
    /// Placeholder returned when a lookup fails.
    Invalid,
}

impl TypeCategory {
    pub fn code(self) -> char {
        match self {
            Self::Array => 'A',
            Self::Boolean => 'B',
            Self::Composite => 'C',
            Self::DateTime => 'D',
            Self::Enum => 'E',
            Self::Geometric => 'G',
            Self::Network => 'I',
            Self::Numeric => 'N',
            Self::Pseudo => 'P',
            Self::Range => 'R',
            Self::String => 'S',
            Self::Timespan => 'T',
            Self::User => 'U',
            Self::BitString => 'V',
            Self::Unknown => 'X',
            Self::Internal => 'Z',
            Self::Invalid => '\0',
        }
    }
}

/// `typtype`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypType {
    Base,
    Composite,
    Domain,
    Pseudo,
}

/// Storage alignment class (`typalign`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypAlign {
    Char,
    Short,
    Int,
    Double,
}

impl TypAlign {
    pub fn bytes(self) -> usize {
        match self {
            Self::Char => 1,
            Self::Short => 2,
            Self::Int => 4,
            Self::Double => 8,
        }
    }
}

/// A CHECK or NOT NULL constraint attached to a domain.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainConstraint {
    pub name: String,
    /// Analyzed check expression over a `CoerceToDomainValue`; `None` for NOT NULL.
    pub check: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PgType {
    pub oid: Oid,
    pub name: String,
    pub namespace: Oid,
    /// `-1` for variable length, `-2` for C strings.
    pub len: i16,
    pub byval: bool,
    pub align: TypAlign,
    pub typtype: TypType,
    pub category: TypeCategory,
    pub preferred: bool,
    /// Element type when this is an array type.
    pub elem: Oid,
    /// The array type whose element is this type.
    pub array: Oid,
    /// Owning relation for composite types.
    pub relid: Oid,
    pub input: Oid,
    pub output: Oid,
    pub collation: Oid,
    /// Base type of a domain.
    pub basetype: Oid,
    pub typmod: i32,
    pub notnull: bool,
    pub constraints: Vec<DomainConstraint>,
    pub delim: char,
}

impl PgType {
    pub fn is_array(&self) -> bool {
        self.elem != INVALID_OID && self.len == -1
    }

    pub fn is_collatable(&self) -> bool {
        self.collation != INVALID_OID
    }

    pub fn is_domain(&self) -> bool {
        self.typtype == TypType::Domain
    }
}

/// True for the polymorphic pseudo-types.
pub fn is_polymorphic_type(typid: Oid) -> bool {
    matches!(
        typid,
        ANYELEMENTOID
            | ANYARRAYOID
            | ANYNONARRAYOID
            | ANYCOMPATIBLEOID
            | ANYCOMPATIBLEARRAYOID
            | ANYCOMPATIBLENONARRAYOID
    )
}

pub fn is_anycompatible_family(typid: Oid) -> bool {
    matches!(
        typid,
        ANYCOMPATIBLEOID | ANYCOMPATIBLEARRAYOID | ANYCOMPATIBLENONARRAYOID
    )
}

/// Pseudo-types whose values may be passed without any coercion.
pub fn is_binary_any(typid: Oid) -> bool {
    typid == ANYOID
}
