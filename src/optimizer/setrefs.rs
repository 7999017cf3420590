//! Rewriting expressions to read their inputs by position.
//!
//! While planning, each node's output is described by the list of
//! expressions it computes, written in terms of range-table Vars. A parent
//! node's expressions are rewritten against that list: any subexpression
//! equal to an output column becomes `Var(OUTER_VAR | INNER_VAR, column)`.

use crate::nodes::makefuncs::make_var;
use crate::nodes::node_funcs::{expr_collation, expr_type, expr_typmod, expression_tree_mutator};
use crate::nodes::primnodes::{Expr, INNER_VAR, Index, OUTER_VAR, TargetEntry};
use crate::utils::elog::{PgError, PgResult, SqlState};

/// Which nodes a parent evaluates itself rather than reading from a child.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixOptions {
    /// Aggref and GroupingFunc read the Agg node's own value array.
    pub keep_aggs: bool,
    /// WindowFunc reads the WindowAgg node's own value array.
    pub keep_window_funcs: bool,
    /// Vars of this range-table entry are read from the node's scan tuple.
    pub scan_varno: Option<Index>,
}

struct FixContext<'a> {
    outer: &'a [Expr],
    inner: &'a [Expr],
    options: FixOptions,
}

/// A reference to column `idx` (0-based) of a child's output.
pub fn child_var(varno: Index, idx: usize, expr: &Expr) -> Expr {
    make_var(
        varno,
        (idx + 1) as i16,
        expr_type(expr),
        expr_typmod(expr),
        expr_collation(expr),
        0,
    )
}

/// Rewrite `expr` for a node with a single child producing `outer`.
pub fn fix_upper_expr(expr: Expr, outer: &[Expr], options: FixOptions) -> PgResult<Expr> {
    fix_expr(expr, &FixContext { outer, inner: &[], options })
}

/// Rewrite `expr` for a join node reading `outer` and `inner` children.
pub fn fix_join_expr(expr: Expr, outer: &[Expr], inner: &[Expr]) -> PgResult<Expr> {
    fix_expr(
        expr,
        &FixContext {
            outer,
            inner,
            options: FixOptions::default(),
        },
    )
}

fn fix_expr(expr: Expr, ctx: &FixContext<'_>) -> PgResult<Expr> {
    if let Expr::Var(var) = &expr
        && var.varlevelsup == 0
        && ctx.options.scan_varno == Some(var.varno)
    {
        return Ok(expr);
    }
    if !matches!(expr, Expr::Const(_)) {
        if let Some(idx) = ctx.outer.iter().position(|e| e == &expr) {
            return Ok(child_var(OUTER_VAR, idx, &expr));
        }
        if let Some(idx) = ctx.inner.iter().position(|e| e == &expr) {
            return Ok(child_var(INNER_VAR, idx, &expr));
        }
    }
    match expr {
        Expr::Var(var) if var.varlevelsup == 0 => Err(PgError::new(
            SqlState::InternalError,
            format!("variable {}.{} not found in subplan target list", var.varno, var.varattno),
        )),
        Expr::Aggref(mut agg) if ctx.options.keep_aggs && agg.agglevelsup == 0 => {
            let inner_ctx = FixContext {
                options: FixOptions {
                    keep_aggs: false,
                    ..ctx.options
                },
                ..*ctx
            };
            agg.aggdirectargs = std::mem::take(&mut agg.aggdirectargs)
                .into_iter()
                .map(|arg| fix_expr(arg, &inner_ctx))
                .collect::<PgResult<_>>()?;
            for tle in &mut agg.args {
                let arg = std::mem::replace(&mut tle.expr, crate::nodes::makefuncs::make_bool_const(None));
                tle.expr = fix_expr(arg, &inner_ctx)?;
            }
            agg.aggfilter = agg.aggfilter.take().map(|f| fix_expr(f, &inner_ctx)).transpose()?;
            Ok(Expr::Aggref(agg))
        }
        Expr::GroupingFunc(g) if ctx.options.keep_aggs && g.agglevelsup == 0 => Ok(Expr::GroupingFunc(g)),
        Expr::WindowFunc(mut wfunc) if ctx.options.keep_window_funcs => {
            wfunc.args = std::mem::take(&mut wfunc.args)
                .into_iter()
                .map(|arg| fix_expr(arg, ctx))
                .collect::<PgResult<_>>()?;
            wfunc.aggfilter = wfunc.aggfilter.take().map(|f| fix_expr(f, ctx)).transpose()?;
            Ok(Expr::WindowFunc(wfunc))
        }
        other => expression_tree_mutator(other, &mut |child| fix_expr(child, ctx)),
    }
}

/// Target list of a node that passes its child's rows through unchanged.
pub fn passthrough_tlist(child: &[TargetEntry]) -> Vec<TargetEntry> {
    child
        .iter()
        .enumerate()
        .map(|(idx, tle)| TargetEntry {
            expr: child_var(OUTER_VAR, idx, &tle.expr),
            resno: (idx + 1) as i16,
            ..tle.clone()
        })
        .collect()
}

/// Plain target list `Var(varno, 1..n)` over `exprs`, used by nodes that
/// only forward their input columns.
pub fn forwarding_tlist(varno: Index, exprs: &[Expr]) -> Vec<TargetEntry> {
    exprs
        .iter()
        .enumerate()
        .map(|(idx, expr)| TargetEntry::new(child_var(varno, idx, expr), (idx + 1) as i16, None, false))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::pg_type::{INT4OID, INT8OID};
    use crate::nodes::makefuncs::{make_const, make_var};
    use crate::nodes::datum::Datum;

    fn var(varno: Index, attno: i16) -> Expr {
        make_var(varno, attno, INT4OID, -1, 0, 0)
    }

    #[test]
    fn join_vars_become_positional() {
        let outer = vec![var(1, 1), var(1, 2)];
        let inner = vec![var(2, 1)];
        let fixed = fix_join_expr(var(2, 1), &outer, &inner).unwrap();
        let Expr::Var(v) = fixed else { panic!("expected a Var") };
        assert_eq!((v.varno, v.varattno), (INNER_VAR, 1));
        let fixed = fix_join_expr(var(1, 2), &outer, &inner).unwrap();
        let Expr::Var(v) = fixed else { panic!("expected a Var") };
        assert_eq!((v.varno, v.varattno), (OUTER_VAR, 2));
    }

    #[test]
    fn missing_var_is_an_internal_error() {
        let err = fix_upper_expr(var(3, 1), &[var(1, 1)], FixOptions::default()).unwrap_err();
        assert_eq!(err.sqlstate, SqlState::InternalError);
    }

    #[test]
    fn scan_vars_and_constants_stay() {
        let options = FixOptions {
            scan_varno: Some(4),
            ..FixOptions::default()
        };
        assert_eq!(fix_upper_expr(var(4, 2), &[], options).unwrap(), var(4, 2));
        let c = make_const(INT8OID, Datum::Int8(7));
        assert_eq!(fix_upper_expr(c.clone(), &[c.clone()], options).unwrap(), c);
    }
}
