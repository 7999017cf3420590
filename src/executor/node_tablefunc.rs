//! JSON_TABLE scan: one row per item the row path yields.

use tracing::trace;

use crate::nodes::datum::Datum;
use crate::nodes::parsenodes::{JsonTableColumnKind, TableFunc};
use crate::nodes::plannodes::Plan;
use crate::utils::adt::jsonpath::execute_jsonpath;
use crate::utils::elog::{PgResult, elog};
use crate::utils::interrupt::check_for_interrupts;

use super::exec_expr::exec_eval_expr;
use super::exec_json::{context_item, is_soft_error, passing_vars, path_of};
use super::exec_utils::{EState, ExprContext, exec_project, exec_qual};
use super::tuptable::TupleTableSlot;

pub fn exec_table_func_scan(plan: &Plan, tablefunc: &TableFunc, estate: &mut EState) -> PgResult<Vec<TupleTableSlot>> {
    let ctx = ExprContext::default();
    let context = exec_eval_expr(&tablefunc.context_item, &ctx, estate)?;
    let row_path = exec_eval_expr(&tablefunc.row_path, &ctx, estate)?;
    if context.is_null() || row_path.is_null() {
        return Ok(Vec::new());
    }
    let vars = passing_vars(&tablefunc.passing_names, &tablefunc.passing_values, &ctx, estate)?;
    let items = context_item(&context)
        .and_then(|target| path_of(&row_path).map(|path| (target, path)))
        .and_then(|(target, path)| execute_jsonpath(&path, &target, &vars, !tablefunc.error_on_error));
    let items = match items {
        Ok(Some(items)) => items,
        Ok(None) => Vec::new(),
        Err(err) if !tablefunc.error_on_error && is_soft_error(&err) => {
            trace!(sqlstate = err.code(), "JSON_TABLE row pattern error yields no rows");
            Vec::new()
        }
        Err(err) => return Err(err),
    };

    let mut out = Vec::new();
    for (idx, item) in items.into_iter().enumerate() {
        check_for_interrupts()?;
        let item = Datum::Jsonb(item);
        let item_ctx = ExprContext::default().with_case_value(&item);
        let mut values = Vec::with_capacity(tablefunc.columns.len());
        for column in &tablefunc.columns {
            let value = match (&column.kind, &column.expr) {
                (JsonTableColumnKind::Ordinality, _) => Datum::Int4(idx as i32 + 1),
                (_, Some(expr)) => exec_eval_expr(expr, &item_ctx, estate)?,
                (kind, None) => return Err(elog(format!("JSON_TABLE {kind:?} column has no expression"))),
            };
            values.push(value);
        }
        let row = TupleTableSlot::new(values);
        let scan_ctx = ExprContext::default().with_scan(&row);
        if exec_qual(&plan.qual, &scan_ctx, estate, false)? {
            out.push(exec_project(&plan.targetlist, &scan_ctx, estate)?);
        }
    }
    Ok(out)
}
