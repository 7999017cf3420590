//! Plan trees.
//!
//! Expressions inside a plan reference their inputs through `Var.varno`:
//! `OUTER_VAR` is the left child's output, `INNER_VAR` the right child's, and
//! any other value the node's own scan tuple.

use crate::catalog::oid::Oid;
use crate::nodes::parsenodes::{CmdType, FrameOptions, JoinType, RawStmt, SetOperation, TableFunc};
use crate::nodes::primnodes::{Aggref, Expr, SubPlan, TargetEntry, WindowFunc};

pub type AttrNumber = i16;

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    /// 1-based column of the input row.
    pub col: AttrNumber,
    pub sortop: Oid,
    pub collation: Oid,
    pub descending: bool,
    pub nulls_first: bool,
}

/// Ordering key evaluated as an expression over the input row.
#[derive(Debug, Clone, PartialEq)]
pub struct SortExpr {
    pub expr: Expr,
    pub sortop: Oid,
    pub collation: Oid,
    pub descending: bool,
    pub nulls_first: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggStrategy {
    /// No GROUP BY: exactly one output row.
    Plain,
    /// Groups collected in a hash table keyed by the group values.
    Hashed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowPlanClause {
    pub winref: u32,
    pub partition: Vec<Expr>,
    pub order: Vec<SortExpr>,
    pub frame: FrameOptions,
    pub start_offset: Option<Expr>,
    pub end_offset: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanKind {
    /// One row (or one row per input row when it has a child), optionally
    /// gated by a constant qual.
    Result {
        resconstantqual: Option<Expr>,
    },
    /// Expands set-returning functions. `srfs[i]` feeds PARAM_EXEC
    /// `srf_params[i]`, which the target list reads.
    ProjectSet {
        srfs: Vec<Expr>,
        srf_params: Vec<i32>,
    },
    SeqScan {
        relid: Oid,
    },
    SubqueryScan,
    FunctionScan {
        function: Expr,
        ordinality: bool,
        returns_composite: bool,
        ncols: usize,
    },
    TableFuncScan {
        tablefunc: Box<TableFunc>,
    },
    ValuesScan {
        values_lists: Vec<Vec<Expr>>,
    },
    /// Reads the materialized output of `subplans[plan_id]`.
    CteScan {
        plan_id: usize,
    },
    NestLoop {
        jointype: JoinType,
        joinqual: Vec<Expr>,
        /// PARAM_EXEC ids set from the outer row before rescanning the inner side.
        nest_params: Vec<(i32, Expr)>,
    },
    Agg {
        strategy: AggStrategy,
        group_exprs: Vec<Expr>,
        /// `ressortgroupref` of each grouping expression, for GROUPING().
        group_refs: Vec<u32>,
        aggs: Vec<Aggref>,
    },
    WindowAgg {
        clauses: Vec<WindowPlanClause>,
        wfuncs: Vec<WindowFunc>,
    },
    Sort {
        keys: Vec<SortKey>,
    },
    /// Keeps the first row of each distinct key, preserving input order.
    Unique {
        cols: Vec<AttrNumber>,
    },
    Limit {
        offset: Option<Expr>,
        count: Option<Expr>,
    },
    SetOp {
        op: SetOperation,
        all: bool,
    },
    ModifyTable {
        operation: CmdType,
        relid: Oid,
        /// Target attribute numbers, parallel to the non-junk source columns.
        target_cols: Vec<AttrNumber>,
        /// Source column holding the row's ctid (UPDATE/DELETE).
        ctid_col: Option<AttrNumber>,
        returning: Vec<TargetEntry>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub kind: PlanKind,
    pub targetlist: Vec<TargetEntry>,
    pub qual: Vec<Expr>,
    pub lefttree: Option<Box<Plan>>,
    pub righttree: Option<Box<Plan>>,
    /// InitPlans attached to this node; run lazily when their params are read.
    pub init_plan: Vec<SubPlan>,
    /// PARAM_EXEC ids from outside this subtree that its output depends on.
    pub ext_param: Vec<i32>,
}

impl Plan {
    pub fn new(kind: PlanKind, targetlist: Vec<TargetEntry>) -> Self {
        Self {
            kind,
            targetlist,
            qual: Vec::new(),
            lefttree: None,
            righttree: None,
            init_plan: Vec::new(),
            ext_param: Vec::new(),
        }
    }

    pub fn with_left(mut self, child: Plan) -> Self {
        self.lefttree = Some(Box::new(child));
        self
    }

    pub fn with_right(mut self, child: Plan) -> Self {
        self.righttree = Some(Box::new(child));
        self
    }

    pub fn node_name(&self) -> &'static str {
        match &self.kind {
            PlanKind::Result { .. } => "Result",
            PlanKind::ProjectSet { .. } => "ProjectSet",
            PlanKind::SeqScan { .. } => "Seq Scan",
            PlanKind::SubqueryScan => "Subquery Scan",
            PlanKind::FunctionScan { .. } => "Function Scan",
            PlanKind::TableFuncScan { .. } => "Table Function Scan",
            PlanKind::ValuesScan { .. } => "Values Scan",
            PlanKind::CteScan { .. } => "CTE Scan",
            PlanKind::NestLoop { .. } => "Nested Loop",
            PlanKind::Agg { .. } => "Aggregate",
            PlanKind::WindowAgg { .. } => "WindowAgg",
            PlanKind::Sort { .. } => "Sort",
            PlanKind::Unique { .. } => "Unique",
            PlanKind::Limit { .. } => "Limit",
            PlanKind::SetOp { .. } => "SetOp",
            PlanKind::ModifyTable { .. } => "ModifyTable",
        }
    }

    /// Nodes that pass their child's rows through without projecting.
    pub fn passes_through(&self) -> bool {
        matches!(
            self.kind,
            PlanKind::Sort { .. } | PlanKind::Unique { .. } | PlanKind::Limit { .. }
        )
    }
}

/// Type of one PARAM_EXEC slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamExecType {
    pub typid: Oid,
    pub typmod: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStmt {
    pub command_type: CmdType,
    pub can_set_tag: bool,
    pub plan_tree: Option<Plan>,
    /// Plans of every SubPlan, InitPlan and CTE, indexed by `plan_id`.
    pub subplans: Vec<Plan>,
    pub param_exec_types: Vec<ParamExecType>,
    pub utility_stmt: Option<Box<RawStmt>>,
}

impl PlannedStmt {
    pub fn utility(stmt: RawStmt) -> Self {
        Self {
            command_type: CmdType::Utility,
            can_set_tag: true,
            plan_tree: None,
            subplans: Vec::new(),
            param_exec_types: Vec::new(),
            utility_stmt: Some(Box::new(stmt)),
        }
    }

    /// Names and types of the visible output columns.
    pub fn result_columns(&self) -> Vec<(String, Oid)> {
        let Some(plan) = &self.plan_tree else {
            return Vec::new();
        };
        let tlist = match &plan.kind {
            PlanKind::ModifyTable { returning, .. } => returning,
            _ => &plan.targetlist,
        };
        tlist
            .iter()
            .filter(|tle| !tle.resjunk)
            .map(|tle| {
                (
                    tle.resname.clone().unwrap_or_else(|| "?column?".to_string()),
                    crate::nodes::node_funcs::expr_type(&tle.expr),
                )
            })
            .collect()
    }
}
