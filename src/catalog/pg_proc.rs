//! `pg_proc` and `pg_aggregate` rows.

use super::oid::{INVALID_OID, Oid};
use crate::nodes::parsenodes::Query;
use crate::nodes::primnodes::Expr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProLang {
    /// Compiled into the server; `prosrc` names the builtin.
    Internal,
    Sql,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProKind {
    Function,
    Aggregate,
    Window,
    Procedure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Volatility {
    Immutable,
    Stable,
    Volatile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggKind {
    Normal,
    OrderedSet,
    Hypothetical,
}

/// Aggregate support data for `prokind = Aggregate` rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgAggregate {
    pub kind: AggKind,
    /// Number of direct (non-aggregated) arguments of an ordered-set aggregate.
    pub num_direct_args: usize,
    /// Name of the builtin transition implementation.
    pub implementation: String,
    pub transtype: Oid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PgProc {
    pub oid: Oid,
    pub name: String,
    pub namespace: Oid,
    pub kind: ProKind,
    pub lang: ProLang,
    /// Declared input argument types. For a variadic function the last entry
    /// is the array type.
    pub argtypes: Vec<Oid>,
    /// Input argument names; empty strings for unnamed arguments.
    pub argnames: Vec<String>,
    /// Element type of the variadic parameter, `ANYOID` for `VARIADIC "any"`,
    /// or `INVALID_OID` when the function is not variadic.
    pub variadic: Oid,
    pub rettype: Oid,
    pub retset: bool,
    pub strict: bool,
    pub volatility: Volatility,
    /// Defaults for the trailing arguments, already analyzed.
    pub defaults: Vec<Expr>,
    /// Builtin symbol for internal functions, or the body text for SQL functions.
    pub prosrc: String,
    /// Pre-analyzed SQL body (`BEGIN ATOMIC` style); raw text bodies leave this empty.
    pub sqlbody: Option<Vec<Query>>,
    pub aggregate: Option<PgAggregate>,
}

impl PgProc {
    pub fn nargs(&self) -> usize {
        self.argtypes.len()
    }

    pub fn is_variadic(&self) -> bool {
        self.variadic != INVALID_OID
    }

    pub fn has_named_args(&self) -> bool {
        self.argnames.iter().any(|name| !name.is_empty())
    }

    pub fn agg_kind(&self) -> Option<AggKind> {
        self.aggregate.as_ref().map(|agg| agg.kind)
    }

    pub fn is_ordered_set_agg(&self) -> bool {
        matches!(
            self.agg_kind(),
            Some(AggKind::OrderedSet | AggKind::Hypothetical)
        )
    }

    pub fn signature(&self) -> String {
        format!("{}({})", self.name, self.argtypes.len())
    }
}
