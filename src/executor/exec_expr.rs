//! Expression evaluation.
//!
//! Expressions are evaluated by a recursive walk over the analyzed tree.
//! Function descriptors are resolved on first use and cached on the calling
//! node through its [`FnCache`], so repeated evaluation of the same plan only
//! pays for the lookup once.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::trace;

use crate::access::xact::{statement_timestamp, transaction_timestamp};
use crate::catalog::oid::{INVALID_OID, Oid};
use crate::catalog::pg_proc::Volatility;
use crate::catalog::pg_type::{BOOLOID, INT4OID};
use crate::catalog::{Catalog, CatalogOracle};
use crate::nodes::datum::{ArrayValue, Datum};
use crate::nodes::node_funcs::expr_type;
use crate::nodes::params::ParamEntryKind;
use crate::nodes::primnodes::{
    ArrayExpr, BoolExpr, BoolExprType, BoolTestType, BooleanTest, CaseExpr, CoerceToDomain, Expr,
    FieldSelect, FieldStore, FnCache, INNER_VAR, MinMaxExpr, MinMaxOp, NullTest, NullTestType,
    OUTER_VAR, OpExpr, Param, ParamKind, RowCompareExpr, RowCompareType, ScalarArrayOpExpr,
    SqlValueFunction, SqlValueFunctionOp, SubscriptingRef, Var,
};
use crate::utils::adt::arrayfuncs::{
    array_get_element, array_get_slice, array_set_element, array_set_slice, construct_from_subarrays,
};
use crate::utils::adt::cmp;
use crate::utils::adt::datetime::timestamp_to_date;
use crate::utils::adt::io::{datum_in, datum_out};
use crate::utils::elog::{PgError, PgResult, SqlState, elog};
use crate::utils::fmgr::{Builtin, FmgrInfo, FmgrKind, FunctionCallInfo, fmgr_info};
use crate::utils::guc;
use crate::utils::interrupt::StackDepthGuard;

use super::exec_json;
use super::exec_utils::{EState, ExprContext, exec_qual};
use super::functions;
use super::node_subplan;
use super::tuptable::TupleTableSlot;

/// Evaluate `expr` against the rows visible in `ctx`.
pub fn exec_eval_expr(expr: &Expr, ctx: &ExprContext<'_>, estate: &mut EState) -> PgResult<Datum> {
    let _depth = StackDepthGuard::enter()?;
    match expr {
        Expr::Const(c) => Ok(c.constvalue.clone()),
        Expr::Var(var) => eval_var(var, ctx, estate),
        Expr::Param(param) => eval_param(param, estate),
        Expr::FuncExpr(f) => {
            let info = resolve_function(
                &f.cache,
                &estate.catalog,
                f.funcid,
                &f.args,
                f.funcresulttype,
                f.funcvariadic,
            )?;
            let args = eval_args(&f.args, ctx, estate)?;
            invoke(info, args, f.inputcollid, estate)
        }
        Expr::OpExpr(op) => eval_op(op, ctx, estate),
        Expr::DistinctExpr(op) => {
            let left = exec_eval_expr(&op.args[0], ctx, estate)?;
            let right = exec_eval_expr(&op.args[1], ctx, estate)?;
            match (left.is_null(), right.is_null()) {
                (true, true) => Ok(Datum::Bool(false)),
                (true, false) | (false, true) => Ok(Datum::Bool(true)),
                (false, false) => {
                    let info = resolve_operator(op, &estate.catalog)?;
                    let eq = invoke(info, vec![left, right], op.inputcollid, estate)?;
                    Ok(eq.as_bool().map_or(Datum::Null, |b| Datum::Bool(!b)))
                }
            }
        }
        Expr::NullIfExpr(op) => {
            let left = exec_eval_expr(&op.args[0], ctx, estate)?;
            let right = exec_eval_expr(&op.args[1], ctx, estate)?;
            if !left.is_null() && !right.is_null() {
                let info = resolve_operator(op, &estate.catalog)?;
                if invoke(info, vec![left.clone(), right], op.inputcollid, estate)? == Datum::Bool(true) {
                    return Ok(Datum::Null);
                }
            }
            Ok(left)
        }
        Expr::ScalarArrayOpExpr(saop) => eval_scalar_array_op(saop, ctx, estate),
        Expr::BoolExpr(b) => eval_bool_expr(b, ctx, estate),
        Expr::NullTest(nt) => eval_null_test(nt, ctx, estate),
        Expr::BooleanTest(bt) => eval_boolean_test(bt, ctx, estate),
        Expr::CaseExpr(case) => eval_case(case, ctx, estate),
        Expr::CaseTestExpr(_) => ctx
            .case_value
            .cloned()
            .ok_or_else(|| elog("CaseTestExpr evaluated outside of a CASE context")),
        Expr::CoerceToDomainValue(_) => ctx
            .domain_value
            .cloned()
            .ok_or_else(|| elog("VALUE evaluated outside of a domain check")),
        Expr::RowExpr(row) => {
            let values = eval_args(&row.args, ctx, estate)?;
            Ok(Datum::record(row.row_typeid, values))
        }
        Expr::RowCompareExpr(rc) => eval_row_compare(rc, ctx, estate),
        Expr::CoalesceExpr(c) => {
            for arg in &c.args {
                let value = exec_eval_expr(arg, ctx, estate)?;
                if !value.is_null() {
                    return Ok(value);
                }
            }
            Ok(Datum::Null)
        }
        Expr::MinMaxExpr(mm) => eval_min_max(mm, ctx, estate),
        Expr::ArrayExpr(arr) => eval_array_expr(arr, ctx, estate),
        Expr::SubscriptingRef(sbs) => eval_subscripting_ref(sbs, ctx, estate),
        Expr::FieldSelect(fs) => eval_field_select(fs, ctx, estate),
        Expr::FieldStore(fs) => eval_field_store(fs, ctx, estate),
        Expr::RelabelType(r) => exec_eval_expr(&r.arg, ctx, estate),
        Expr::CollateExpr(c) => exec_eval_expr(&c.arg, ctx, estate),
        Expr::CoerceViaIO(c) => {
            let value = exec_eval_expr(&c.arg, ctx, estate)?;
            if value.is_null() {
                return Ok(Datum::Null);
            }
            let text = datum_out(&value);
            datum_in(&estate.catalog, c.resulttype, -1, &text)
        }
        Expr::ArrayCoerceExpr(ac) => {
            let value = exec_eval_expr(&ac.arg, ctx, estate)?;
            let Some(array) = value.as_array() else {
                return Ok(Datum::Null);
            };
            let elemtype = estate.catalog.element_type_of(ac.resulttype).unwrap_or(INVALID_OID);
            let mut elements = Vec::with_capacity(array.elements.len());
            for elem in &array.elements {
                elements.push(exec_eval_expr(&ac.elemexpr, &ctx.with_case_value(elem), estate)?);
            }
            Ok(Datum::array(ArrayValue {
                elemtype,
                dims: array.dims.clone(),
                lbounds: array.lbounds.clone(),
                elements,
            }))
        }
        Expr::CoerceToDomain(cd) => eval_coerce_to_domain(cd, ctx, estate),
        Expr::SqlValueFunction(svf) => eval_sql_value_function(svf, &estate.catalog),
        Expr::Aggref(agg) => slot_value(ctx.agg_values, agg.aggno, "aggregate"),
        Expr::GroupingFunc(_) => Ok(Datum::Int4(0)),
        Expr::WindowFunc(wf) => slot_value(ctx.window_values, wf.wfuncno, "window function"),
        Expr::SubPlan(sp) => node_subplan::exec_sub_plan(sp, ctx, estate),
        Expr::SubLink(_) => Err(elog("unplanned SubLink reached the executor")),
        Expr::SetToDefault(_) => Err(elog("unexpected DEFAULT in expression")),
        Expr::JsonConstructorExpr(jc) => exec_json::eval_json_constructor(jc, ctx, estate),
        Expr::JsonIsPredicate(pred) => exec_json::eval_json_is_predicate(pred, ctx, estate),
        Expr::JsonExpr(je) => exec_json::eval_json_expr(je, ctx, estate),
    }
}

/// Evaluate a possibly set-returning expression into all of its rows. A
/// non-set expression yields exactly one row.
pub fn exec_eval_set_function(expr: &Expr, ctx: &ExprContext<'_>, estate: &mut EState) -> PgResult<Vec<Datum>> {
    let (cache, funcid, fargs, rettype, inputcollid, variadic) = match expr {
        Expr::FuncExpr(f) if f.funcretset => (
            &f.cache,
            f.funcid,
            &f.args,
            f.funcresulttype,
            f.inputcollid,
            f.funcvariadic,
        ),
        Expr::OpExpr(op) if op.opretset => {
            let funcid = operator_function(&estate.catalog, op.opno, op.opfuncid)?;
            (&op.cache, funcid, &op.args, op.opresulttype, op.inputcollid, false)
        }
        _ => return Ok(vec![exec_eval_expr(expr, ctx, estate)?]),
    };
    let info = resolve_function(cache, &estate.catalog, funcid, fargs, rettype, variadic)?;
    let args = eval_args(fargs, ctx, estate)?;
    if info.fn_strict && args.iter().any(Datum::is_null) {
        return Ok(Vec::new());
    }
    trace!(function = %info.fn_name, "evaluating set-returning function");
    match &info.kind {
        FmgrKind::Builtin(Builtin::Set(func)) => {
            let catalog = Arc::clone(&estate.catalog);
            let fcinfo = FunctionCallInfo {
                args,
                argtypes: &info.argtypes,
                rettype: info.rettype,
                collation: inputcollid,
                funcvariadic: info.fn_expr_variadic,
                catalog: &catalog,
            };
            func(&fcinfo)
        }
        FmgrKind::Builtin(Builtin::Scalar(_)) => Ok(vec![invoke(info, args, inputcollid, estate)?]),
        FmgrKind::Sql(fcache) => functions::exec_sql_function_set(info, fcache, args, estate),
    }
}

pub(crate) fn eval_args(args: &[Expr], ctx: &ExprContext<'_>, estate: &mut EState) -> PgResult<Vec<Datum>> {
    args.iter().map(|arg| exec_eval_expr(arg, ctx, estate)).collect()
}

fn resolve_function<'c>(
    cache: &'c FnCache,
    catalog: &Catalog,
    funcid: Oid,
    args: &[Expr],
    rettype: Oid,
    variadic: bool,
) -> PgResult<&'c Arc<FmgrInfo>> {
    cache.get_or_try_init(|| {
        let argtypes = args.iter().map(expr_type).collect();
        let mut info = fmgr_info(catalog, funcid, argtypes, rettype)?;
        info.fn_expr_variadic = variadic;
        Ok(Arc::new(info))
    })
}

fn operator_function(catalog: &Catalog, opno: Oid, opfuncid: Oid) -> PgResult<Oid> {
    if opfuncid != INVALID_OID {
        return Ok(opfuncid);
    }
    catalog
        .operator_by_id(opno)
        .map(|op| op.code)
        .ok_or_else(|| elog(format!("cache lookup failed for operator {opno}")))
}

fn resolve_operator<'c>(op: &'c OpExpr, catalog: &Catalog) -> PgResult<&'c Arc<FmgrInfo>> {
    let funcid = operator_function(catalog, op.opno, op.opfuncid)?;
    resolve_function(&op.cache, catalog, funcid, &op.args, op.opresulttype, false)
}

/// Call a resolved function, honoring strictness.
pub(crate) fn invoke(info: &FmgrInfo, args: Vec<Datum>, collation: Oid, estate: &mut EState) -> PgResult<Datum> {
    if info.fn_strict && args.iter().any(Datum::is_null) {
        return Ok(Datum::Null);
    }
    match &info.kind {
        FmgrKind::Sql(fcache) => functions::exec_sql_function(info, fcache, args, estate),
        FmgrKind::Builtin(_) => {
            let catalog = Arc::clone(&estate.catalog);
            let fcinfo = FunctionCallInfo {
                args,
                argtypes: &info.argtypes,
                rettype: info.rettype,
                collation,
                funcvariadic: info.fn_expr_variadic,
                catalog: &catalog,
            };
            info.call(&fcinfo)
        }
    }
}

fn eval_op(op: &OpExpr, ctx: &ExprContext<'_>, estate: &mut EState) -> PgResult<Datum> {
    let info = resolve_operator(op, &estate.catalog)?;
    let args = eval_args(&op.args, ctx, estate)?;
    invoke(info, args, op.inputcollid, estate)
}

fn eval_var(var: &Var, ctx: &ExprContext<'_>, estate: &EState) -> PgResult<Datum> {
    if var.varlevelsup > 0 {
        return Err(elog("outer-level Var reached the executor"));
    }
    let slot = match var.varno {
        OUTER_VAR => ctx.outer,
        INNER_VAR => ctx.inner,
        _ => ctx.scan,
    }
    .ok_or_else(|| elog(format!("no tuple available for Var {}.{}", var.varno, var.varattno)))?;
    if var.varattno == 0 {
        return Ok(whole_row(slot, var.vartype, &estate.catalog));
    }
    slot.get_attr(var.varattno)
}

fn whole_row(slot: &TupleTableSlot, rowtype: Oid, catalog: &Catalog) -> Datum {
    let natts = catalog.composite_desc(rowtype).map_or(slot.natts(), |desc| desc.natts());
    let values = slot.values.iter().take(natts).cloned().collect();
    Datum::record(rowtype, values)
}

fn eval_param(param: &Param, estate: &mut EState) -> PgResult<Datum> {
    match param.paramkind {
        ParamKind::Extern => estate
            .params
            .find(ParamEntryKind::Num, param.paramid, None)
            .map(|entry| entry.value.clone())
            .ok_or_else(|| {
                PgError::new(
                    SqlState::UndefinedParameter,
                    format!("there is no parameter ${}", param.paramid),
                )
            }),
        ParamKind::Exec => {
            let pending = estate.param_slot(param.paramid)?.pending.take();
            if let Some(initplan) = pending {
                node_subplan::exec_set_param_plan(&initplan, estate)?;
            }
            Ok(estate.param_slot(param.paramid)?.value.clone())
        }
        ParamKind::Sublink | ParamKind::Multiexpr => {
            Err(elog(format!("unplanned sub-select parameter {}", param.paramid)))
        }
    }
}

fn eval_bool_expr(b: &BoolExpr, ctx: &ExprContext<'_>, estate: &mut EState) -> PgResult<Datum> {
    match b.boolop {
        BoolExprType::Not => {
            let value = exec_eval_expr(&b.args[0], ctx, estate)?;
            Ok(value.as_bool().map_or(Datum::Null, |v| Datum::Bool(!v)))
        }
        BoolExprType::And | BoolExprType::Or => {
            // A decisive value ends evaluation; a null keeps looking for one.
            let decisive = b.boolop == BoolExprType::Or;
            let mut any_null = false;
            for arg in &b.args {
                match exec_eval_expr(arg, ctx, estate)? {
                    Datum::Bool(v) if v == decisive => return Ok(Datum::Bool(decisive)),
                    Datum::Bool(_) => {}
                    Datum::Null => any_null = true,
                    other => return Err(elog(format!("boolean operand expected, got {other:?}"))),
                }
            }
            Ok(if any_null { Datum::Null } else { Datum::Bool(!decisive) })
        }
    }
}

fn eval_scalar_array_op(saop: &ScalarArrayOpExpr, ctx: &ExprContext<'_>, estate: &mut EState) -> PgResult<Datum> {
    let scalar = exec_eval_expr(&saop.args[0], ctx, estate)?;
    let array_value = exec_eval_expr(&saop.args[1], ctx, estate)?;
    let Some(array) = array_value.as_array() else {
        return Ok(Datum::Null);
    };
    if array.nitems() == 0 {
        return Ok(Datum::Bool(!saop.use_or));
    }
    let funcid = operator_function(&estate.catalog, saop.opno, saop.opfuncid)?;
    let info = saop.cache.get_or_try_init(|| {
        let argtypes = vec![expr_type(&saop.args[0]), array.elemtype];
        fmgr_info(&estate.catalog, funcid, argtypes, BOOLOID).map(Arc::new)
    })?;
    if scalar.is_null() && info.fn_strict {
        return Ok(Datum::Null);
    }
    let mut saw_null = false;
    for elem in &array.elements {
        match invoke(info, vec![scalar.clone(), elem.clone()], saop.inputcollid, estate)? {
            Datum::Bool(v) if v == saop.use_or => return Ok(Datum::Bool(v)),
            Datum::Null => saw_null = true,
            _ => {}
        }
    }
    Ok(if saw_null { Datum::Null } else { Datum::Bool(!saop.use_or) })
}

fn eval_null_test(nt: &NullTest, ctx: &ExprContext<'_>, estate: &mut EState) -> PgResult<Datum> {
    let value = exec_eval_expr(&nt.arg, ctx, estate)?;
    let is_null = match (&value, nt.argisrow) {
        (Datum::Null, _) => true,
        (Datum::Record(rec), true) => match nt.nulltesttype {
            // A row IS NULL when every field is, IS NOT NULL when none is.
            NullTestType::IsNull => rec.values.iter().all(Datum::is_null),
            NullTestType::IsNotNull => return Ok(Datum::Bool(!rec.values.iter().any(Datum::is_null))),
        },
        _ => false,
    };
    Ok(Datum::Bool(match nt.nulltesttype {
        NullTestType::IsNull => is_null,
        NullTestType::IsNotNull => !is_null,
    }))
}

fn eval_boolean_test(bt: &BooleanTest, ctx: &ExprContext<'_>, estate: &mut EState) -> PgResult<Datum> {
    let value = exec_eval_expr(&bt.arg, ctx, estate)?.as_bool();
    Ok(Datum::Bool(match bt.booltesttype {
        BoolTestType::IsTrue => value == Some(true),
        BoolTestType::IsNotTrue => value != Some(true),
        BoolTestType::IsFalse => value == Some(false),
        BoolTestType::IsNotFalse => value != Some(false),
        BoolTestType::IsUnknown => value.is_none(),
        BoolTestType::IsNotUnknown => value.is_some(),
    }))
}

fn eval_case(case: &CaseExpr, ctx: &ExprContext<'_>, estate: &mut EState) -> PgResult<Datum> {
    let test_value = match &case.arg {
        Some(arg) => Some(exec_eval_expr(arg, ctx, estate)?),
        None => None,
    };
    let when_ctx = match &test_value {
        Some(value) => ctx.with_case_value(value),
        None => *ctx,
    };
    for when in &case.args {
        if exec_eval_expr(&when.expr, &when_ctx, estate)? == Datum::Bool(true) {
            return exec_eval_expr(&when.result, ctx, estate);
        }
    }
    exec_eval_expr(&case.defresult, ctx, estate)
}

/// Ordering support for one column of a row comparison or a GREATEST/LEAST.
fn comparison_support<'c>(cache: &'c FnCache, catalog: &Catalog, opno: Oid, argtype: Oid) -> PgResult<&'c Arc<FmgrInfo>> {
    cache.get_or_try_init(|| {
        let image = opno != INVALID_OID
            && catalog
                .operator_by_id(opno)
                .and_then(|op| catalog.proc_by_id(op.code))
                .is_some_and(|proc| proc.prosrc.starts_with("record_image_"));
        let (name, func) = if image {
            ("btrecordimagecmp", cmp::record_image_cmp as fn(&FunctionCallInfo<'_>) -> PgResult<Datum>)
        } else {
            ("btcmp", cmp::datum_cmp as fn(&FunctionCallInfo<'_>) -> PgResult<Datum>)
        };
        Ok::<_, PgError>(Arc::new(FmgrInfo {
            fn_oid: INVALID_OID,
            fn_name: name.to_string(),
            fn_strict: true,
            fn_retset: false,
            fn_nargs: 2,
            volatility: Volatility::Immutable,
            rettype: INT4OID,
            argtypes: vec![argtype, argtype],
            fn_expr_variadic: false,
            kind: FmgrKind::Builtin(Builtin::Scalar(func)),
        }))
    })
}

fn compare_with(info: &FmgrInfo, left: Datum, right: Datum, collation: Oid, estate: &mut EState) -> PgResult<Ordering> {
    match invoke(info, vec![left, right], collation, estate)? {
        Datum::Int4(c) => Ok(c.cmp(&0)),
        other => Err(elog(format!("comparison support returned {other:?}"))),
    }
}

fn eval_row_compare(rc: &RowCompareExpr, ctx: &ExprContext<'_>, estate: &mut EState) -> PgResult<Datum> {
    for (i, (larg, rarg)) in rc.largs.iter().zip(&rc.rargs).enumerate() {
        let left = exec_eval_expr(larg, ctx, estate)?;
        let right = exec_eval_expr(rarg, ctx, estate)?;
        if left.is_null() || right.is_null() {
            return Ok(Datum::Null);
        }
        let cache = rc.caches.get(i).ok_or_else(|| elog("row comparison is missing a support cache"))?;
        let opno = rc.opnos.get(i).copied().unwrap_or(INVALID_OID);
        let info = comparison_support(cache, &estate.catalog, opno, expr_type(larg))?;
        let collation = rc.inputcollids.get(i).copied().unwrap_or(INVALID_OID);
        let ord = compare_with(info, left, right, collation, estate)?;
        if ord != Ordering::Equal {
            return Ok(Datum::Bool(match rc.rctype {
                RowCompareType::Lt | RowCompareType::Le => ord == Ordering::Less,
                RowCompareType::Gt | RowCompareType::Ge => ord == Ordering::Greater,
                RowCompareType::Eq => false,
                RowCompareType::Ne => true,
            }));
        }
    }
    Ok(Datum::Bool(matches!(
        rc.rctype,
        RowCompareType::Le | RowCompareType::Eq | RowCompareType::Ge
    )))
}

fn eval_min_max(mm: &MinMaxExpr, ctx: &ExprContext<'_>, estate: &mut EState) -> PgResult<Datum> {
    let info = comparison_support(&mm.cache, &estate.catalog, INVALID_OID, mm.minmaxtype)?;
    let mut best = Datum::Null;
    for arg in &mm.args {
        let value = exec_eval_expr(arg, ctx, estate)?;
        if value.is_null() {
            continue;
        }
        if best.is_null() {
            best = value;
            continue;
        }
        let ord = compare_with(info, value.clone(), best.clone(), mm.inputcollid, estate)?;
        let replace = match mm.op {
            MinMaxOp::Greatest => ord == Ordering::Greater,
            MinMaxOp::Least => ord == Ordering::Less,
        };
        if replace {
            best = value;
        }
    }
    Ok(best)
}

fn eval_array_expr(arr: &ArrayExpr, ctx: &ExprContext<'_>, estate: &mut EState) -> PgResult<Datum> {
    let elements = eval_args(&arr.elements, ctx, estate)?;
    if arr.multidims {
        return construct_from_subarrays(arr.element_typeid, &elements).map(Datum::array);
    }
    Ok(Datum::array(ArrayValue::from_vec(arr.element_typeid, elements)))
}

fn eval_subscripts(
    exprs: &[Option<Expr>],
    ctx: &ExprContext<'_>,
    estate: &mut EState,
) -> PgResult<Option<Vec<Option<i32>>>> {
    let mut out = Vec::with_capacity(exprs.len());
    for expr in exprs {
        match expr {
            None => out.push(None),
            Some(expr) => match exec_eval_expr(expr, ctx, estate)? {
                Datum::Null => return Ok(None),
                value => {
                    let n = value
                        .as_i64()
                        .and_then(|n| i32::try_from(n).ok())
                        .ok_or_else(|| elog(format!("array subscript must be an integer, got {value:?}")))?;
                    out.push(Some(n));
                }
            },
        }
    }
    Ok(Some(out))
}

fn eval_subscripting_ref(sbs: &SubscriptingRef, ctx: &ExprContext<'_>, estate: &mut EState) -> PgResult<Datum> {
    let container = exec_eval_expr(&sbs.refexpr, ctx, estate)?;
    let upper = eval_subscripts(&sbs.refupperindexpr, ctx, estate)?;
    let lower = if sbs.is_slice() {
        eval_subscripts(&sbs.reflowerindexpr, ctx, estate)?
    } else {
        Some(Vec::new())
    };
    let Some(assign) = &sbs.refassgnexpr else {
        let (Some(upper), Some(lower)) = (upper, lower) else {
            return Ok(Datum::Null);
        };
        let Some(array) = container.as_array() else {
            return Ok(Datum::Null);
        };
        if sbs.is_slice() {
            return array_get_slice(array, &lower, &upper);
        }
        let subscripts: Vec<i32> = upper.into_iter().flatten().collect();
        return Ok(array_get_element(array, &subscripts));
    };

    let (Some(upper), Some(lower)) = (upper, lower) else {
        return Err(PgError::new(
            SqlState::NullValueNotAllowed,
            "array subscript in assignment must not be null",
        ));
    };
    let array = match container.as_array() {
        Some(array) => array.clone(),
        None => ArrayValue::empty(sbs.refelemtype),
    };
    if sbs.is_slice() {
        let old = if array.is_empty() { Datum::Null } else { array_get_slice(&array, &lower, &upper)? };
        let source = exec_eval_expr(assign, &ctx.with_case_value(&old), estate)?;
        let Some(source) = source.as_array() else {
            return Ok(container);
        };
        return array_set_slice(&array, &lower, &upper, source).map(Datum::array);
    }
    let subscripts: Vec<i32> = upper.into_iter().flatten().collect();
    let old = array_get_element(&array, &subscripts);
    let value = exec_eval_expr(assign, &ctx.with_case_value(&old), estate)?;
    array_set_element(&array, &subscripts, value).map(Datum::array)
}

fn record_fields(value: &Datum, rowtype: Oid, catalog: &Catalog) -> Vec<Datum> {
    match value.as_record() {
        Some(rec) => rec.values.clone(),
        None => vec![Datum::Null; catalog.composite_desc(rowtype).map_or(0, |desc| desc.natts())],
    }
}

fn eval_field_select(fs: &FieldSelect, ctx: &ExprContext<'_>, estate: &mut EState) -> PgResult<Datum> {
    let value = exec_eval_expr(&fs.arg, ctx, estate)?;
    let Some(rec) = value.as_record() else {
        return Ok(Datum::Null);
    };
    usize::try_from(fs.fieldnum - 1)
        .ok()
        .and_then(|idx| rec.values.get(idx))
        .cloned()
        .ok_or_else(|| elog(format!("attribute number {} exceeds number of columns {}", fs.fieldnum, rec.values.len())))
}

fn eval_field_store(fs: &FieldStore, ctx: &ExprContext<'_>, estate: &mut EState) -> PgResult<Datum> {
    let value = exec_eval_expr(&fs.arg, ctx, estate)?;
    let mut fields = record_fields(&value, fs.resulttype, &estate.catalog);
    for (newval, &fieldnum) in fs.newvals.iter().zip(&fs.fieldnums) {
        let idx = usize::try_from(fieldnum - 1)
            .ok()
            .filter(|&idx| idx < fields.len())
            .ok_or_else(|| elog(format!("invalid field number {fieldnum}")))?;
        let old = fields[idx].clone();
        fields[idx] = exec_eval_expr(newval, &ctx.with_case_value(&old), estate)?;
    }
    Ok(Datum::record(fs.resulttype, fields))
}

fn eval_coerce_to_domain(cd: &CoerceToDomain, ctx: &ExprContext<'_>, estate: &mut EState) -> PgResult<Datum> {
    let value = exec_eval_expr(&cd.arg, ctx, estate)?;
    let catalog = Arc::clone(&estate.catalog);
    let mut typid = cd.resulttype;
    while let Some(domain) = catalog.type_by_id(typid).filter(|ty| ty.is_domain()) {
        if domain.notnull && value.is_null() {
            return Err(PgError::new(
                SqlState::NotNullViolation,
                format!("domain {} does not allow null values", domain.name),
            ));
        }
        for constraint in &domain.constraints {
            let Some(check) = &constraint.check else { continue };
            let check_ctx = ctx.with_domain_value(&value);
            if !exec_qual(std::slice::from_ref(check), &check_ctx, estate, true)? {
                return Err(PgError::new(
                    SqlState::CheckViolation,
                    format!(
                        "value for domain {} violates check constraint \"{}\"",
                        domain.name, constraint.name
                    ),
                ));
            }
        }
        typid = domain.basetype;
    }
    Ok(value)
}

fn eval_sql_value_function(svf: &SqlValueFunction, catalog: &Catalog) -> PgResult<Datum> {
    Ok(match svf.op {
        SqlValueFunctionOp::CurrentDate => Datum::Date(timestamp_to_date(transaction_timestamp())?),
        SqlValueFunctionOp::CurrentTimestamp => Datum::TimestampTz(transaction_timestamp()),
        SqlValueFunctionOp::LocalTimestamp => Datum::Timestamp(statement_timestamp()),
        SqlValueFunctionOp::CurrentRole
        | SqlValueFunctionOp::CurrentUser
        | SqlValueFunctionOp::User
        | SqlValueFunctionOp::SessionUser => Datum::Text(guc::session_user()),
        SqlValueFunctionOp::CurrentCatalog => Datum::text(catalog.current_database_name()),
        SqlValueFunctionOp::CurrentSchema => guc::search_path()
            .into_iter()
            .find(|name| catalog.namespace_by_name(name).is_some())
            .map_or(Datum::Null, Datum::Text),
    })
}

fn slot_value(values: &[Datum], idx: i32, what: &str) -> PgResult<Datum> {
    usize::try_from(idx)
        .ok()
        .and_then(|i| values.get(i))
        .cloned()
        .ok_or_else(|| elog(format!("{what} value {idx} is not available here")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::pg_type::{INT4ARRAYOID, TEXTOID};
    use crate::nodes::datum::RecordValue;
    use crate::nodes::makefuncs::{make_bool_const, make_bool_expr, make_const, make_null_const};
    use crate::nodes::parsenodes::CmdType;
    use crate::nodes::params::ParamListInfo;
    use crate::nodes::plannodes::PlannedStmt;
    use crate::nodes::primnodes::{CaseTestExpr, CaseWhen, Location, RowExpr};
    use crate::nodes::tupdesc::SELF_ITEM_POINTER_ATTRIBUTE_NUMBER;

    fn estate() -> EState {
        let stmt = PlannedStmt {
            command_type: CmdType::Select,
            can_set_tag: true,
            plan_tree: None,
            subplans: Vec::new(),
            param_exec_types: Vec::new(),
            utility_stmt: None,
        };
        EState::new(Arc::new(Catalog::default()), &stmt, ParamListInfo::default())
    }

    fn eval(expr: &Expr) -> Datum {
        exec_eval_expr(expr, &ExprContext::default(), &mut estate()).unwrap()
    }

    fn int4(v: i32) -> Expr {
        make_const(INT4OID, Datum::Int4(v))
    }

    #[test]
    fn three_valued_and_or() {
        let null = make_bool_const(None);
        let t = make_bool_const(Some(true));
        let f = make_bool_const(Some(false));
        assert_eq!(eval(&make_bool_expr(BoolExprType::Or, vec![null.clone(), t.clone()], None)), Datum::Bool(true));
        assert_eq!(eval(&make_bool_expr(BoolExprType::And, vec![null.clone(), f], None)), Datum::Bool(false));
        assert_eq!(eval(&make_bool_expr(BoolExprType::And, vec![null.clone(), t], None)), Datum::Null);
        assert_eq!(eval(&make_bool_expr(BoolExprType::Not, vec![null], None)), Datum::Null);
    }

    #[test]
    fn row_null_test_looks_at_every_field() {
        let row = Expr::RowExpr(Box::new(RowExpr {
            args: vec![int4(1), make_null_const(INT4OID, -1, INVALID_OID)],
            row_typeid: crate::catalog::pg_type::RECORDOID,
            row_format: crate::nodes::primnodes::CoercionForm::ImplicitCast,
            colnames: Vec::new(),
            location: Location(None),
        }));
        let test = |nulltesttype| {
            Expr::NullTest(Box::new(NullTest {
                arg: row.clone(),
                nulltesttype,
                argisrow: true,
                location: Location(None),
            }))
        };
        assert_eq!(eval(&test(NullTestType::IsNull)), Datum::Bool(false));
        assert_eq!(eval(&test(NullTestType::IsNotNull)), Datum::Bool(false));
    }

    #[test]
    fn simple_case_compares_through_the_test_value() {
        let case = Expr::CaseExpr(Box::new(CaseExpr {
            casetype: TEXTOID,
            casecollid: INVALID_OID,
            arg: Some(int4(2)),
            args: vec![CaseWhen {
                expr: Expr::CaseTestExpr(CaseTestExpr {
                    type_id: BOOLOID,
                    type_mod: -1,
                    collation: INVALID_OID,
                }),
                result: make_const(TEXTOID, Datum::text("hit")),
                location: Location(None),
            }],
            defresult: make_const(TEXTOID, Datum::text("miss")),
            location: Location(None),
        }));
        // The WHEN clause sees the test value itself, which is not a boolean true.
        assert_eq!(eval(&case), Datum::text("miss"));
    }

    #[test]
    fn whole_row_var_builds_a_record() {
        let slot = TupleTableSlot::new(vec![Datum::Int4(1), Datum::text("x")]);
        let var = Var {
            varno: 1,
            varattno: 0,
            vartype: crate::catalog::pg_type::RECORDOID,
            vartypmod: -1,
            varcollid: INVALID_OID,
            varlevelsup: 0,
            location: Location(None),
        };
        let value = exec_eval_expr(&Expr::Var(var.clone()), &ExprContext::default().with_scan(&slot), &mut estate()).unwrap();
        assert_eq!(
            value,
            Datum::Record(Arc::new(RecordValue {
                typid: crate::catalog::pg_type::RECORDOID,
                values: vec![Datum::Int4(1), Datum::text("x")],
            }))
        );
        let ctid = Var { varattno: SELF_ITEM_POINTER_ATTRIBUTE_NUMBER, ..var };
        let value = exec_eval_expr(&Expr::Var(ctid), &ExprContext::default().with_scan(&slot), &mut estate()).unwrap();
        assert_eq!(value, Datum::Null);
    }

    #[test]
    fn array_fetch_with_null_subscript_is_null() {
        let array = make_const(INT4ARRAYOID, Datum::array(ArrayValue::from_vec(INT4OID, vec![Datum::Int4(7)])));
        let fetch = |subscript: Expr| {
            Expr::SubscriptingRef(Box::new(SubscriptingRef {
                refcontainertype: INT4ARRAYOID,
                refelemtype: INT4OID,
                refrestype: INT4OID,
                reftypmod: -1,
                refcollid: INVALID_OID,
                refupperindexpr: vec![Some(subscript)],
                reflowerindexpr: Vec::new(),
                refexpr: array.clone(),
                refassgnexpr: None,
            }))
        };
        assert_eq!(eval(&fetch(int4(1))), Datum::Int4(7));
        assert_eq!(eval(&fetch(int4(5))), Datum::Null);
        assert_eq!(eval(&fetch(make_null_const(INT4OID, -1, INVALID_OID))), Datum::Null);
    }

    #[test]
    fn missing_aggregate_slot_is_an_error() {
        assert!(slot_value(&[Datum::Int4(1)], 3, "aggregate").is_err());
        assert_eq!(slot_value(&[Datum::Int4(1)], 0, "aggregate").unwrap(), Datum::Int4(1));
    }
}
