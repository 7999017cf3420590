//! Parse-analysis state.
//!
//! A single [`ParseState`] drives the analysis of a statement and all of its
//! sub-queries. Query levels live on a stack: the innermost query being
//! analyzed is on top, and a reference `n` levels up resolves against the
//! entry `n` below the top. Analyzing a sub-select pushes a level, runs the
//! statement transform, and pops the level back off to build its `Query`.

use std::rc::Rc;

use tracing::trace;

use crate::catalog::Catalog;
use crate::catalog::oid::{INVALID_OID, Oid};
use crate::catalog::pg_type::{BOOLOID, FLOAT8OID, INT4OID, INT8OID, NUMERICOID, UNKNOWNOID};
use crate::nodes::datum::Datum;
use crate::nodes::parsenodes::{
    AConstValue, ColumnRefField, CommonTableExpr, RangeTblEntry, WindowDef,
};
use crate::nodes::primnodes::{Const, Expr, Index, Location, TargetEntry};
use crate::utils::adt::float::float8in;
use crate::utils::adt::io::numeric_in;
use crate::utils::elog::{PgError, PgResult, SqlState};
use crate::utils::interrupt::{StackDepthGuard, check_for_interrupts};

/// Where in a statement the expression being transformed appears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseExprKind {
    None,
    Other,
    JoinOn,
    JoinUsing,
    FromSubselect,
    FromFunction,
    Where,
    Policy,
    Having,
    Filter,
    WindowPartition,
    WindowOrder,
    WindowFrameRange,
    WindowFrameRows,
    WindowFrameGroups,
    SelectTarget,
    InsertTarget,
    UpdateSource,
    UpdateTarget,
    MergeWhen,
    GroupBy,
    OrderBy,
    DistinctOn,
    Limit,
    Offset,
    Returning,
    Values,
    ValuesSingle,
    CheckConstraint,
    DomainCheck,
    ColumnDefault,
    FunctionDefault,
    IndexExpression,
    IndexPredicate,
    StatsExpression,
    AlterColTransform,
    ExecuteParameter,
    TriggerWhen,
    PartitionBound,
    PartitionExpression,
    CallArgument,
    CopyWhere,
    GeneratedColumn,
    CycleMark,
}

impl ParseExprKind {
    /// Phrase used in "not allowed in ..." errors.
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "invalid expression context",
            Self::Other => "extension expression",
            Self::JoinOn => "JOIN/ON",
            Self::JoinUsing => "JOIN/USING",
            Self::FromSubselect => "sub-SELECT in FROM",
            Self::FromFunction => "function in FROM",
            Self::Where => "WHERE",
            Self::Policy => "POLICY",
            Self::Having => "HAVING",
            Self::Filter => "FILTER",
            Self::WindowPartition => "window PARTITION BY",
            Self::WindowOrder => "window ORDER BY",
            Self::WindowFrameRange => "window RANGE",
            Self::WindowFrameRows => "window ROWS",
            Self::WindowFrameGroups => "window GROUPS",
            Self::SelectTarget => "SELECT",
            Self::InsertTarget => "INSERT",
            Self::UpdateSource | Self::UpdateTarget => "UPDATE",
            Self::MergeWhen => "MERGE WHEN",
            Self::GroupBy => "GROUP BY",
            Self::OrderBy => "ORDER BY",
            Self::DistinctOn => "DISTINCT ON",
            Self::Limit => "LIMIT",
            Self::Offset => "OFFSET",
            Self::Returning => "RETURNING",
            Self::Values | Self::ValuesSingle => "VALUES",
            Self::CheckConstraint | Self::DomainCheck => "CHECK",
            Self::ColumnDefault | Self::FunctionDefault => "DEFAULT",
            Self::IndexExpression => "index expression",
            Self::IndexPredicate => "index predicate",
            Self::StatsExpression => "statistics expression",
            Self::AlterColTransform => "USING",
            Self::ExecuteParameter => "EXECUTE",
            Self::TriggerWhen => "trigger WHEN condition",
            Self::PartitionBound => "partition bound",
            Self::PartitionExpression => "PARTITION BY",
            Self::CallArgument => "CALL",
            Self::CopyWhere => "WHERE",
            Self::GeneratedColumn => "GENERATED AS",
            Self::CycleMark => "CYCLE",
        }
    }

    /// Contexts whose expressions are evaluated without any table rows, where
    /// sub-selects and column references are rejected.
    pub fn is_utility_context(self) -> bool {
        matches!(
            self,
            Self::CheckConstraint
                | Self::DomainCheck
                | Self::ColumnDefault
                | Self::FunctionDefault
                | Self::IndexExpression
                | Self::IndexPredicate
                | Self::StatsExpression
                | Self::ExecuteParameter
                | Self::TriggerWhen
                | Self::PartitionBound
                | Self::PartitionExpression
                | Self::GeneratedColumn
                | Self::CycleMark
        )
    }
}

/// A FROM-clause item as seen by name lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceItem {
    pub rtindex: Index,
    /// Name the item is qualified by.
    pub refname: String,
    /// Visible columns; column `i` is attribute `i + 1` of the RTE. A join
    /// USING alias exposes only the merged columns.
    pub colnames: Vec<String>,
    /// Usable as a qualifier (`t.col`).
    pub rel_visible: bool,
    /// Columns usable unqualified.
    pub cols_visible: bool,
    /// Only reachable from a LATERAL item.
    pub lateral_only: bool,
    pub lateral_ok: bool,
}

/// One query level of the analysis stack.
#[derive(Debug, Default)]
pub struct QueryLevel {
    pub rtable: Vec<RangeTblEntry>,
    pub namespace: Vec<NamespaceItem>,
    /// Set while a LATERAL FROM item is being transformed.
    pub lateral_active: bool,
    pub expr_kind: Option<ParseExprKind>,
    /// CTEs declared by this level's WITH clause.
    pub ctenamespace: Vec<CommonTableExpr>,
    /// Names of CTEs declared later in the same WITH list; referencing them
    /// is an error rather than a table lookup.
    pub future_ctes: Vec<String>,
    /// Named and inline window specifications, in `winref` order.
    pub windowdefs: Vec<WindowDef>,
    pub has_aggs: bool,
    pub has_window_funcs: bool,
    pub has_target_srfs: bool,
    pub has_sub_links: bool,
    /// Number of set-returning calls built so far at this level.
    pub srf_count: usize,
    /// Source rows of `(a, b) = (SELECT ...)` assignments.
    pub multiassign_exprs: Vec<TargetEntry>,
    pub target_relation: Option<Index>,
    pub is_insert: bool,
}

impl QueryLevel {
    pub fn expr_kind(&self) -> ParseExprKind {
        self.expr_kind.unwrap_or(ParseExprKind::None)
    }

    pub fn rte(&self, rtindex: Index) -> PgResult<&RangeTblEntry> {
        (rtindex as usize)
            .checked_sub(1)
            .and_then(|idx| self.rtable.get(idx))
            .ok_or_else(|| PgError::new(SqlState::InternalError, format!("invalid range table index {rtindex}")))
    }

    pub fn rte_mut(&mut self, rtindex: Index) -> PgResult<&mut RangeTblEntry> {
        (rtindex as usize)
            .checked_sub(1)
            .and_then(|idx| self.rtable.get_mut(idx))
            .ok_or_else(|| PgError::new(SqlState::InternalError, format!("invalid range table index {rtindex}")))
    }
}

/// What a column-reference hook sees.
#[derive(Debug)]
pub struct ColumnRefInfo<'a> {
    pub fields: &'a [ColumnRefField],
    pub location: Option<usize>,
    /// Ordinary resolution result (post hook only).
    pub resolved: Option<&'a Expr>,
}

pub type ColumnRefHook = Rc<dyn Fn(&ColumnRefInfo<'_>) -> PgResult<Option<Expr>>>;
pub type ParamRefHook = Rc<dyn Fn(i32, Option<usize>) -> PgResult<Option<Expr>>>;

/// Caller-supplied name-resolution extensions, used by SQL function bodies
/// to resolve `$n` and parameter names.
#[derive(Clone, Default)]
pub struct ParseHooks {
    pub pre_columnref: Option<ColumnRefHook>,
    pub post_columnref: Option<ColumnRefHook>,
    pub paramref: Option<ParamRefHook>,
}

impl std::fmt::Debug for ParseHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParseHooks")
            .field("pre_columnref", &self.pre_columnref.is_some())
            .field("post_columnref", &self.post_columnref.is_some())
            .field("paramref", &self.paramref.is_some())
            .finish()
    }
}

pub struct ParseState<'a> {
    pub catalog: &'a Catalog,
    pub source_text: &'a str,
    /// Declared types of `$1..$n`.
    pub param_types: Vec<Oid>,
    pub hooks: ParseHooks,
    levels: Vec<QueryLevel>,
    depth_guards: Vec<StackDepthGuard>,
}

impl<'a> ParseState<'a> {
    pub fn new(catalog: &'a Catalog, source_text: &'a str) -> Self {
        Self {
            catalog,
            source_text,
            param_types: Vec::new(),
            hooks: ParseHooks::default(),
            levels: vec![QueryLevel::default()],
            depth_guards: Vec::new(),
        }
    }

    pub fn with_params(mut self, param_types: &[Oid]) -> Self {
        self.param_types = param_types.to_vec();
        self
    }

    pub fn with_hooks(mut self, hooks: ParseHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn level(&self) -> &QueryLevel {
        // The stack is never empty: `new` seeds one level and `pop_level`
        // refuses to remove the last.
        &self.levels[self.levels.len() - 1]
    }

    pub fn level_mut(&mut self) -> &mut QueryLevel {
        let top = self.levels.len() - 1;
        &mut self.levels[top]
    }

    /// The level `levels_up` above the current one.
    pub fn level_at(&self, levels_up: u32) -> Option<&QueryLevel> {
        let idx = (self.levels.len() - 1).checked_sub(levels_up as usize)?;
        self.levels.get(idx)
    }

    pub fn level_at_mut(&mut self, levels_up: u32) -> Option<&mut QueryLevel> {
        let idx = (self.levels.len() - 1).checked_sub(levels_up as usize)?;
        self.levels.get_mut(idx)
    }

    /// Number of enclosing query levels.
    pub fn depth(&self) -> u32 {
        (self.levels.len() - 1) as u32
    }

    /// Start analyzing a sub-query.
    pub fn push_level(&mut self) -> PgResult<()> {
        check_for_interrupts()?;
        self.depth_guards.push(StackDepthGuard::enter()?);
        trace!(depth = self.levels.len(), "entering sub-query level");
        self.levels.push(QueryLevel::default());
        Ok(())
    }

    pub fn pop_level(&mut self) -> PgResult<QueryLevel> {
        if self.levels.len() < 2 {
            return Err(PgError::new(SqlState::InternalError, "query level stack underflow"));
        }
        self.depth_guards.pop();
        self.levels
            .pop()
            .ok_or_else(|| PgError::new(SqlState::InternalError, "query level stack underflow"))
    }

    /// Replace the current level's expression kind, returning the old one.
    pub fn set_expr_kind(&mut self, kind: ParseExprKind) -> Option<ParseExprKind> {
        self.level_mut().expr_kind.replace(kind)
    }

    pub fn restore_expr_kind(&mut self, kind: Option<ParseExprKind>) {
        self.level_mut().expr_kind = kind;
    }

    pub fn expr_kind(&self) -> ParseExprKind {
        self.level().expr_kind()
    }

    pub fn rte(&self, levels_up: u32, rtindex: Index) -> PgResult<&RangeTblEntry> {
        self.level_at(levels_up)
            .ok_or_else(|| PgError::new(SqlState::InternalError, "bad query level"))?
            .rte(rtindex)
    }

    /// Append an RTE to the current level, returning its index.
    pub fn add_rte(&mut self, rte: RangeTblEntry) -> Index {
        let level = self.level_mut();
        level.rtable.push(rte);
        level.rtable.len() as Index
    }

    /// Record that an SRF call was built at the current level.
    pub fn note_srf(&mut self) {
        self.level_mut().srf_count += 1;
    }

    pub fn srf_count(&self) -> usize {
        self.level().srf_count
    }
}

/// Build the Const for a literal. Integers become int4 when they fit and
/// int8 otherwise; decimal literals are numeric, or float8 when numeric
/// cannot hold them exactly; quoted strings stay `unknown` until context
/// decides their type.
pub fn make_const(value: &AConstValue, location: Option<usize>) -> PgResult<Expr> {
    let (consttype, constvalue) = match value {
        AConstValue::Integer(v) => match i32::try_from(*v) {
            Ok(small) => (INT4OID, Datum::Int4(small)),
            Err(_) => (INT8OID, Datum::Int8(*v)),
        },
        AConstValue::Float(text) => match numeric_in(text) {
            Ok(parsed) => (NUMERICOID, Datum::Numeric(parsed)),
            Err(err) if err.sqlstate == SqlState::NumericValueOutOfRange => {
                let value = float8in(text).map_err(|_| err.at(location))?;
                (FLOAT8OID, Datum::Float8(value))
            }
            Err(err) => return Err(err.at(location)),
        },
        AConstValue::String(text) => (UNKNOWNOID, Datum::Text(text.clone())),
        AConstValue::Bool(b) => (BOOLOID, Datum::Bool(*b)),
        AConstValue::Null => (UNKNOWNOID, Datum::Null),
    };
    Ok(Expr::Const(Const {
        consttype,
        consttypmod: -1,
        constcollid: INVALID_OID,
        constvalue,
        location: Location(location),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_literals_widen_only_when_needed() {
        let small = make_const(&AConstValue::Integer(7), None).unwrap();
        let big = make_const(&AConstValue::Integer(1 << 40), None).unwrap();
        assert!(matches!(small, Expr::Const(Const { consttype: INT4OID, .. })));
        assert!(matches!(big, Expr::Const(Const { consttype: INT8OID, .. })));
    }

    #[test]
    fn decimal_literals_beyond_numeric_become_float8() {
        let exact = make_const(&AConstValue::Float("1.25".to_string()), None).unwrap();
        assert!(matches!(exact, Expr::Const(Const { consttype: NUMERICOID, .. })));
        let Expr::Const(huge) = make_const(&AConstValue::Float("1e30".to_string()), None).unwrap() else {
            panic!("expected a Const");
        };
        assert_eq!(huge.consttype, FLOAT8OID);
        assert_eq!(huge.constvalue, Datum::Float8(1e30));
        let err = make_const(&AConstValue::Float("1e400".to_string()), Some(7)).unwrap_err();
        assert_eq!(err.code(), "22003");
        assert_eq!(err.position, Some(7));
    }

    #[test]
    fn levels_stack_and_unwind() {
        let catalog = Catalog::default();
        let mut pstate = ParseState::new(&catalog, "");
        pstate.set_expr_kind(ParseExprKind::Where);
        pstate.push_level().unwrap();
        assert_eq!(pstate.depth(), 1);
        assert_eq!(pstate.level_at(1).unwrap().expr_kind(), ParseExprKind::Where);
        assert_eq!(pstate.expr_kind(), ParseExprKind::None);
        pstate.pop_level().unwrap();
        assert!(pstate.pop_level().is_err());
    }
}
