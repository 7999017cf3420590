//! Generic queries over expression trees: result type/typmod/collation,
//! locations, and walkers/mutators.

use crate::catalog::oid::{INVALID_OID, Oid};
use crate::catalog::pg_type::{BOOLOID, RECORDOID};
use crate::nodes::parsenodes::{JoinTreeNode, Query, RteKind};
use crate::nodes::primnodes::{Expr, Location, SubLinkType};
use crate::utils::elog::PgResult;

/// Result type of an analyzed expression.
pub fn expr_type(expr: &Expr) -> Oid {
    match expr {
        Expr::Var(var) => var.vartype,
        Expr::Const(c) => c.consttype,
        Expr::Param(p) => p.paramtype,
        Expr::Aggref(agg) => agg.aggtype,
        Expr::GroupingFunc(_) => crate::catalog::pg_type::INT4OID,
        Expr::WindowFunc(w) => w.wintype,
        Expr::SubscriptingRef(sref) => sref.refrestype,
        Expr::FuncExpr(f) => f.funcresulttype,
        Expr::OpExpr(op) | Expr::NullIfExpr(op) => op.opresulttype,
        Expr::DistinctExpr(_) => BOOLOID,
        Expr::ScalarArrayOpExpr(_) => BOOLOID,
        Expr::BoolExpr(_) => BOOLOID,
        Expr::SubLink(sublink) => sublink.result_type,
        Expr::SubPlan(subplan) => subplan.result_type,
        Expr::FieldSelect(fs) => fs.resulttype,
        Expr::FieldStore(fs) => fs.resulttype,
        Expr::RelabelType(r) => r.resulttype,
        Expr::CoerceViaIO(c) => c.resulttype,
        Expr::ArrayCoerceExpr(c) => c.resulttype,
        Expr::CollateExpr(c) => expr_type(&c.arg),
        Expr::CaseExpr(c) => c.casetype,
        Expr::CaseTestExpr(c) => c.type_id,
        Expr::ArrayExpr(a) => a.array_typeid,
        Expr::RowExpr(r) => r.row_typeid,
        Expr::RowCompareExpr(_) => BOOLOID,
        Expr::CoalesceExpr(c) => c.coalescetype,
        Expr::MinMaxExpr(m) => m.minmaxtype,
        Expr::SqlValueFunction(s) => s.type_id,
        Expr::NullTest(_) | Expr::BooleanTest(_) => BOOLOID,
        Expr::CoerceToDomain(c) => c.resulttype,
        Expr::CoerceToDomainValue(c) => c.type_id,
        Expr::SetToDefault(s) => s.type_id,
        Expr::JsonConstructorExpr(j) => j.returning.typid,
        Expr::JsonIsPredicate(_) => BOOLOID,
        Expr::JsonExpr(j) => j.returning.typid,
    }
}

/// Type modifier of an expression's result, or -1 when unknown.
pub fn expr_typmod(expr: &Expr) -> i32 {
    match expr {
        Expr::Var(var) => var.vartypmod,
        Expr::Const(c) => c.consttypmod,
        Expr::Param(p) => p.paramtypmod,
        Expr::SubscriptingRef(sref) => sref.reftypmod,
        Expr::SubLink(sublink) if sublink.sub_link_type == SubLinkType::Expr => sublink
            .subselect
            .visible_targets()
            .next()
            .map_or(-1, |tle| expr_typmod(&tle.expr)),
        Expr::SubPlan(subplan) if subplan.sub_link_type == SubLinkType::Expr => {
            subplan.first_col_typmod
        }
        Expr::FieldSelect(fs) => fs.resulttypmod,
        Expr::RelabelType(r) => r.resulttypmod,
        Expr::ArrayCoerceExpr(c) => c.resulttypmod,
        Expr::CollateExpr(c) => expr_typmod(&c.arg),
        Expr::CaseTestExpr(c) => c.type_mod,
        Expr::CaseExpr(c) => {
            let typmod = expr_typmod(&c.defresult);
            if typmod < 0 || c.args.iter().any(|w| expr_typmod(&w.result) != typmod) {
                return -1;
            }
            typmod
        }
        Expr::CoalesceExpr(c) => common_typmod(&c.args),
        Expr::MinMaxExpr(m) => common_typmod(&m.args),
        Expr::CoerceToDomain(c) => c.resulttypmod,
        Expr::CoerceToDomainValue(c) => c.type_mod,
        Expr::SetToDefault(s) => s.type_mod,
        Expr::JsonExpr(j) => j.returning.typmod,
        Expr::JsonConstructorExpr(j) => j.returning.typmod,
        _ => -1,
    }
}

fn common_typmod(args: &[Expr]) -> i32 {
    let Some(first) = args.first() else {
        return -1;
    };
    let typmod = expr_typmod(first);
    if typmod < 0 || args.iter().any(|arg| expr_typmod(arg) != typmod) {
        return -1;
    }
    typmod
}

/// Result collation, `INVALID_OID` for non-collatable results.
pub fn expr_collation(expr: &Expr) -> Oid {
    match expr {
        Expr::Var(var) => var.varcollid,
        Expr::Const(c) => c.constcollid,
        Expr::Param(p) => p.paramcollid,
        Expr::Aggref(agg) => agg.aggcollid,
        Expr::WindowFunc(w) => w.wincollid,
        Expr::SubscriptingRef(sref) => sref.refcollid,
        Expr::FuncExpr(f) => f.funccollid,
        Expr::OpExpr(op) | Expr::NullIfExpr(op) => op.opcollid,
        Expr::SubLink(sublink) => match sublink.sub_link_type {
            SubLinkType::Expr | SubLinkType::Array => sublink
                .subselect
                .visible_targets()
                .next()
                .map_or(INVALID_OID, |tle| expr_collation(&tle.expr)),
            _ => INVALID_OID,
        },
        Expr::SubPlan(subplan) => match subplan.sub_link_type {
            SubLinkType::Expr | SubLinkType::Array => subplan.first_col_collation,
            _ => INVALID_OID,
        },
        Expr::FieldSelect(fs) => fs.resultcollid,
        Expr::RelabelType(r) => r.resultcollid,
        Expr::CoerceViaIO(c) => c.resultcollid,
        Expr::ArrayCoerceExpr(c) => c.resultcollid,
        Expr::CollateExpr(c) => c.coll_oid,
        Expr::CaseExpr(c) => c.casecollid,
        Expr::CaseTestExpr(c) => c.collation,
        Expr::ArrayExpr(a) => a.array_collid,
        Expr::CoalesceExpr(c) => c.coalescecollid,
        Expr::MinMaxExpr(m) => m.minmaxcollid,
        Expr::CoerceToDomain(c) => c.resultcollid,
        Expr::CoerceToDomainValue(c) => c.collation,
        Expr::SetToDefault(s) => s.collation,
        Expr::JsonExpr(j) => j.collation,
        _ => INVALID_OID,
    }
}

/// Source offset of the leftmost token of an expression, if known.
pub fn expr_location(expr: &Expr) -> Option<usize> {
    let loc: Location = match expr {
        Expr::Var(var) => var.location,
        Expr::Const(c) => c.location,
        Expr::Param(p) => p.location,
        Expr::Aggref(agg) => agg.location,
        Expr::GroupingFunc(g) => g.location,
        Expr::WindowFunc(w) => w.location,
        Expr::SubscriptingRef(sref) => return expr_location(&sref.refexpr),
        Expr::FuncExpr(f) => {
            return leftmost(f.location, f.args.first());
        }
        Expr::OpExpr(op) | Expr::DistinctExpr(op) | Expr::NullIfExpr(op) => {
            return leftmost(op.location, op.args.first());
        }
        Expr::ScalarArrayOpExpr(op) => return leftmost(op.location, op.args.first()),
        Expr::BoolExpr(b) => return leftmost(b.location, b.args.first()),
        Expr::SubLink(s) => {
            return leftmost(s.location, s.testexpr.as_ref());
        }
        Expr::SubPlan(s) => return s.testexpr.as_ref().and_then(expr_location),
        Expr::FieldSelect(fs) => return expr_location(&fs.arg),
        Expr::FieldStore(fs) => return expr_location(&fs.arg),
        Expr::RelabelType(r) => return leftmost(r.location, Some(&r.arg)),
        Expr::CoerceViaIO(c) => return leftmost(c.location, Some(&c.arg)),
        Expr::ArrayCoerceExpr(c) => return leftmost(c.location, Some(&c.arg)),
        Expr::CollateExpr(c) => return leftmost(c.location, Some(&c.arg)),
        Expr::CaseExpr(c) => c.location,
        Expr::CaseTestExpr(_) => Location(None),
        Expr::ArrayExpr(a) => a.location,
        Expr::RowExpr(r) => r.location,
        Expr::RowCompareExpr(r) => return r.largs.first().and_then(expr_location),
        Expr::CoalesceExpr(c) => c.location,
        Expr::MinMaxExpr(m) => m.location,
        Expr::SqlValueFunction(s) => s.location,
        Expr::NullTest(n) => return leftmost(n.location, Some(&n.arg)),
        Expr::BooleanTest(b) => return leftmost(b.location, Some(&b.arg)),
        Expr::CoerceToDomain(c) => return leftmost(c.location, Some(&c.arg)),
        Expr::CoerceToDomainValue(c) => c.location,
        Expr::SetToDefault(s) => s.location,
        Expr::JsonConstructorExpr(j) => j.location,
        Expr::JsonIsPredicate(j) => j.location,
        Expr::JsonExpr(j) => j.location,
    };
    loc.get()
}

fn leftmost(own: Location, first_child: Option<&Expr>) -> Option<usize> {
    let child = first_child.and_then(expr_location);
    match (own.get(), child) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Call `f` on each direct child expression. Stops and returns true as soon
/// as `f` does. Sub-select queries are not entered.
pub fn expression_tree_walker(expr: &Expr, f: &mut dyn FnMut(&Expr) -> bool) -> bool {
    fn all(exprs: &[Expr], f: &mut dyn FnMut(&Expr) -> bool) -> bool {
        exprs.iter().any(|e| f(e))
    }
    fn opt(expr: &Option<Expr>, f: &mut dyn FnMut(&Expr) -> bool) -> bool {
        expr.as_ref().is_some_and(|e| f(e))
    }

    match expr {
        Expr::Var(_)
        | Expr::Const(_)
        | Expr::Param(_)
        | Expr::CaseTestExpr(_)
        | Expr::SqlValueFunction(_)
        | Expr::CoerceToDomainValue(_)
        | Expr::SetToDefault(_) => false,
        Expr::Aggref(agg) => {
            all(&agg.aggdirectargs, f)
                || agg.args.iter().any(|tle| f(&tle.expr))
                || opt(&agg.aggfilter, f)
        }
        Expr::GroupingFunc(g) => all(&g.args, f),
        Expr::WindowFunc(w) => all(&w.args, f) || opt(&w.aggfilter, f),
        Expr::SubscriptingRef(sref) => {
            sref.refupperindexpr.iter().any(|e| opt(e, f))
                || sref.reflowerindexpr.iter().any(|e| opt(e, f))
                || f(&sref.refexpr)
                || opt(&sref.refassgnexpr, f)
        }
        Expr::FuncExpr(func) => all(&func.args, f),
        Expr::OpExpr(op) | Expr::DistinctExpr(op) | Expr::NullIfExpr(op) => all(&op.args, f),
        Expr::ScalarArrayOpExpr(op) => all(&op.args, f),
        Expr::BoolExpr(b) => all(&b.args, f),
        Expr::SubLink(s) => opt(&s.testexpr, f),
        Expr::SubPlan(s) => opt(&s.testexpr, f) || all(&s.args, f),
        Expr::FieldSelect(fs) => f(&fs.arg),
        Expr::FieldStore(fs) => f(&fs.arg) || all(&fs.newvals, f),
        Expr::RelabelType(r) => f(&r.arg),
        Expr::CoerceViaIO(c) => f(&c.arg),
        Expr::ArrayCoerceExpr(c) => f(&c.arg) || f(&c.elemexpr),
        Expr::CollateExpr(c) => f(&c.arg),
        Expr::CaseExpr(c) => {
            opt(&c.arg, f)
                || c.args.iter().any(|w| f(&w.expr) || f(&w.result))
                || f(&c.defresult)
        }
        Expr::ArrayExpr(a) => all(&a.elements, f),
        Expr::RowExpr(r) => all(&r.args, f),
        Expr::RowCompareExpr(r) => all(&r.largs, f) || all(&r.rargs, f),
        Expr::CoalesceExpr(c) => all(&c.args, f),
        Expr::MinMaxExpr(m) => all(&m.args, f),
        Expr::NullTest(n) => f(&n.arg),
        Expr::BooleanTest(b) => f(&b.arg),
        Expr::CoerceToDomain(c) => f(&c.arg),
        Expr::JsonConstructorExpr(j) => all(&j.args, f) || opt(&j.coercion, f),
        Expr::JsonIsPredicate(j) => f(&j.expr),
        Expr::JsonExpr(j) => {
            f(&j.formatted_expr)
                || f(&j.path_spec)
                || all(&j.passing_values, f)
                || j.on_empty.as_ref().is_some_and(|b| opt(&b.expr, f))
                || opt(&j.on_error.expr, f)
        }
    }
}

/// Rebuild an expression by passing every direct child through `f`.
pub fn expression_tree_mutator(
    expr: Expr,
    f: &mut dyn FnMut(Expr) -> PgResult<Expr>,
) -> PgResult<Expr> {
    fn all(exprs: Vec<Expr>, f: &mut dyn FnMut(Expr) -> PgResult<Expr>) -> PgResult<Vec<Expr>> {
        exprs.into_iter().map(|e| f(e)).collect()
    }
    fn opt(
        expr: Option<Expr>,
        f: &mut dyn FnMut(Expr) -> PgResult<Expr>,
    ) -> PgResult<Option<Expr>> {
        expr.map(|e| f(e)).transpose()
    }

    Ok(match expr {
        Expr::Var(_)
        | Expr::Const(_)
        | Expr::Param(_)
        | Expr::CaseTestExpr(_)
        | Expr::SqlValueFunction(_)
        | Expr::CoerceToDomainValue(_)
        | Expr::SetToDefault(_) => expr,
        Expr::Aggref(mut agg) => {
            agg.aggdirectargs = all(std::mem::take(&mut agg.aggdirectargs), f)?;
            for tle in &mut agg.args {
                let inner = std::mem::replace(&mut tle.expr, placeholder());
                tle.expr = f(inner)?;
            }
            agg.aggfilter = opt(agg.aggfilter.take(), f)?;
            Expr::Aggref(agg)
        }
        Expr::GroupingFunc(mut g) => {
            g.args = all(std::mem::take(&mut g.args), f)?;
            Expr::GroupingFunc(g)
        }
        Expr::WindowFunc(mut w) => {
            w.args = all(std::mem::take(&mut w.args), f)?;
            w.aggfilter = opt(w.aggfilter.take(), f)?;
            Expr::WindowFunc(w)
        }
        Expr::SubscriptingRef(mut sref) => {
            sref.refupperindexpr = std::mem::take(&mut sref.refupperindexpr)
                .into_iter()
                .map(|e| opt(e, f))
                .collect::<PgResult<_>>()?;
            sref.reflowerindexpr = std::mem::take(&mut sref.reflowerindexpr)
                .into_iter()
                .map(|e| opt(e, f))
                .collect::<PgResult<_>>()?;
            sref.refexpr = f(std::mem::replace(&mut sref.refexpr, placeholder()))?;
            sref.refassgnexpr = opt(sref.refassgnexpr.take(), f)?;
            Expr::SubscriptingRef(sref)
        }
        Expr::FuncExpr(mut func) => {
            func.args = all(std::mem::take(&mut func.args), f)?;
            Expr::FuncExpr(func)
        }
        Expr::OpExpr(mut op) => {
            op.args = all(std::mem::take(&mut op.args), f)?;
            Expr::OpExpr(op)
        }
        Expr::DistinctExpr(mut op) => {
            op.args = all(std::mem::take(&mut op.args), f)?;
            Expr::DistinctExpr(op)
        }
        Expr::NullIfExpr(mut op) => {
            op.args = all(std::mem::take(&mut op.args), f)?;
            Expr::NullIfExpr(op)
        }
        Expr::ScalarArrayOpExpr(mut op) => {
            op.args = all(std::mem::take(&mut op.args), f)?;
            Expr::ScalarArrayOpExpr(op)
        }
        Expr::BoolExpr(mut b) => {
            b.args = all(std::mem::take(&mut b.args), f)?;
            Expr::BoolExpr(b)
        }
        Expr::SubLink(mut s) => {
            s.testexpr = opt(s.testexpr.take(), f)?;
            Expr::SubLink(s)
        }
        Expr::SubPlan(mut s) => {
            s.testexpr = opt(s.testexpr.take(), f)?;
            s.args = all(std::mem::take(&mut s.args), f)?;
            Expr::SubPlan(s)
        }
        Expr::FieldSelect(mut fs) => {
            fs.arg = f(std::mem::replace(&mut fs.arg, placeholder()))?;
            Expr::FieldSelect(fs)
        }
        Expr::FieldStore(mut fs) => {
            fs.arg = f(std::mem::replace(&mut fs.arg, placeholder()))?;
            fs.newvals = all(std::mem::take(&mut fs.newvals), f)?;
            Expr::FieldStore(fs)
        }
        Expr::RelabelType(mut r) => {
            r.arg = f(std::mem::replace(&mut r.arg, placeholder()))?;
            Expr::RelabelType(r)
        }
        Expr::CoerceViaIO(mut c) => {
            c.arg = f(std::mem::replace(&mut c.arg, placeholder()))?;
            Expr::CoerceViaIO(c)
        }
        Expr::ArrayCoerceExpr(mut c) => {
            c.arg = f(std::mem::replace(&mut c.arg, placeholder()))?;
            c.elemexpr = f(std::mem::replace(&mut c.elemexpr, placeholder()))?;
            Expr::ArrayCoerceExpr(c)
        }
        Expr::CollateExpr(mut c) => {
            c.arg = f(std::mem::replace(&mut c.arg, placeholder()))?;
            Expr::CollateExpr(c)
        }
        Expr::CaseExpr(mut c) => {
            c.arg = opt(c.arg.take(), f)?;
            for when in &mut c.args {
                when.expr = f(std::mem::replace(&mut when.expr, placeholder()))?;
                when.result = f(std::mem::replace(&mut when.result, placeholder()))?;
            }
            c.defresult = f(std::mem::replace(&mut c.defresult, placeholder()))?;
            Expr::CaseExpr(c)
        }
        Expr::ArrayExpr(mut a) => {
            a.elements = all(std::mem::take(&mut a.elements), f)?;
            Expr::ArrayExpr(a)
        }
        Expr::RowExpr(mut r) => {
            r.args = all(std::mem::take(&mut r.args), f)?;
            Expr::RowExpr(r)
        }
        Expr::RowCompareExpr(mut r) => {
            r.largs = all(std::mem::take(&mut r.largs), f)?;
            r.rargs = all(std::mem::take(&mut r.rargs), f)?;
            Expr::RowCompareExpr(r)
        }
        Expr::CoalesceExpr(mut c) => {
            c.args = all(std::mem::take(&mut c.args), f)?;
            Expr::CoalesceExpr(c)
        }
        Expr::MinMaxExpr(mut m) => {
            m.args = all(std::mem::take(&mut m.args), f)?;
            Expr::MinMaxExpr(m)
        }
        Expr::NullTest(mut n) => {
            n.arg = f(std::mem::replace(&mut n.arg, placeholder()))?;
            Expr::NullTest(n)
        }
        Expr::BooleanTest(mut b) => {
            b.arg = f(std::mem::replace(&mut b.arg, placeholder()))?;
            Expr::BooleanTest(b)
        }
        Expr::CoerceToDomain(mut c) => {
            c.arg = f(std::mem::replace(&mut c.arg, placeholder()))?;
            Expr::CoerceToDomain(c)
        }
        Expr::JsonConstructorExpr(mut j) => {
            j.args = all(std::mem::take(&mut j.args), f)?;
            j.coercion = opt(j.coercion.take(), f)?;
            Expr::JsonConstructorExpr(j)
        }
        Expr::JsonIsPredicate(mut j) => {
            j.expr = f(std::mem::replace(&mut j.expr, placeholder()))?;
            Expr::JsonIsPredicate(j)
        }
        Expr::JsonExpr(mut j) => {
            j.formatted_expr = f(std::mem::replace(&mut j.formatted_expr, placeholder()))?;
            j.path_spec = f(std::mem::replace(&mut j.path_spec, placeholder()))?;
            j.passing_values = all(std::mem::take(&mut j.passing_values), f)?;
            if let Some(on_empty) = j.on_empty.as_mut() {
                on_empty.expr = opt(on_empty.expr.take(), f)?;
            }
            j.on_error.expr = opt(j.on_error.expr.take(), f)?;
            Expr::JsonExpr(j)
        }
    })
}

fn placeholder() -> Expr {
    crate::nodes::makefuncs::make_null_const(crate::catalog::pg_type::UNKNOWNOID, -1, INVALID_OID)
}

/// Pre-order search over an expression and everything below it (sub-selects
/// excluded). True if `pred` holds anywhere.
pub fn expr_contains(expr: &Expr, pred: &mut dyn FnMut(&Expr) -> bool) -> bool {
    if pred(expr) {
        return true;
    }
    expression_tree_walker(expr, &mut |child| expr_contains(child, pred))
}

/// Visit every node of an expression, descending into sub-select queries.
/// `level` counts how many query levels below the starting point a node is.
pub fn walk_expr_with_sublinks(
    expr: &Expr,
    level: u32,
    f: &mut dyn FnMut(&Expr, u32) -> bool,
) -> bool {
    if f(expr, level) {
        return true;
    }
    if let Expr::SubLink(sublink) = expr {
        if walk_query(&sublink.subselect, level + 1, f) {
            return true;
        }
    }
    expression_tree_walker(expr, &mut |child| walk_expr_with_sublinks(child, level, f))
}

/// Top-level expression slots of a query, and the sub-queries (subquery
/// RTEs and CTEs) that sit one level below it.
pub fn query_exprs(query: &Query) -> (Vec<&Expr>, Vec<&Query>) {
    let mut exprs: Vec<&Expr> = Vec::new();
    for tle in query.target_list.iter().chain(&query.returning_list) {
        exprs.push(&tle.expr);
    }
    exprs.extend(query.jointree.quals.as_ref());
    for node in &query.jointree.fromlist {
        collect_join_quals(node, &mut exprs);
    }
    exprs.extend(
        [&query.having_qual, &query.limit_offset, &query.limit_count]
            .into_iter()
            .flatten(),
    );
    for wc in &query.window_clause {
        exprs.extend([&wc.start_offset, &wc.end_offset].into_iter().flatten());
    }
    let mut subqueries: Vec<&Query> = Vec::new();
    for rte in &query.rtable {
        match &rte.kind {
            RteKind::Function { function, .. } => exprs.push(function),
            RteKind::Values { values_lists, .. } => exprs.extend(values_lists.iter().flatten()),
            RteKind::TableFunc { tablefunc, .. } => {
                exprs.push(&tablefunc.context_item);
                exprs.push(&tablefunc.row_path);
                exprs.extend(&tablefunc.passing_values);
                exprs.extend(tablefunc.columns.iter().filter_map(|c| c.expr.as_ref()));
            }
            RteKind::Join { joinaliasvars, .. } => exprs.extend(joinaliasvars),
            RteKind::Subquery { subquery } => subqueries.push(subquery),
            _ => {}
        }
    }
    subqueries.extend(query.cte_list.iter().map(|cte| cte.query.as_ref()));
    (exprs, subqueries)
}

/// Visit every expression of a query (and of its sub-queries, one level deeper).
pub fn walk_query(query: &Query, level: u32, f: &mut dyn FnMut(&Expr, u32) -> bool) -> bool {
    let (exprs, subqueries) = query_exprs(query);
    exprs
        .into_iter()
        .any(|expr| walk_expr_with_sublinks(expr, level, f))
        || subqueries
            .into_iter()
            .any(|sub| walk_query(sub, level + 1, f))
}

fn collect_join_quals<'a>(node: &'a JoinTreeNode, out: &mut Vec<&'a Expr>) {
    if let JoinTreeNode::Join(join) = node {
        out.extend(join.quals.as_ref());
        collect_join_quals(&join.larg, out);
        collect_join_quals(&join.rarg, out);
    }
}

/// Apply `f` to every top-level expression slot of a query (not entering
/// sub-queries; `f` decides whether to recurse into SubLinks itself).
pub fn mutate_query_exprs(
    query: &mut Query,
    f: &mut dyn FnMut(Expr) -> PgResult<Expr>,
) -> PgResult<()> {
    fn slot(e: &mut Expr, f: &mut dyn FnMut(Expr) -> PgResult<Expr>) -> PgResult<()> {
        let taken = std::mem::replace(e, placeholder());
        *e = f(taken)?;
        Ok(())
    }
    fn opt_slot(e: &mut Option<Expr>, f: &mut dyn FnMut(Expr) -> PgResult<Expr>) -> PgResult<()> {
        if let Some(inner) = e.as_mut() {
            slot(inner, f)?;
        }
        Ok(())
    }
    fn join_slots(
        node: &mut JoinTreeNode,
        f: &mut dyn FnMut(Expr) -> PgResult<Expr>,
    ) -> PgResult<()> {
        if let JoinTreeNode::Join(join) = node {
            opt_slot(&mut join.quals, f)?;
            join_slots(&mut join.larg, f)?;
            join_slots(&mut join.rarg, f)?;
        }
        Ok(())
    }

    for tle in query.target_list.iter_mut().chain(query.returning_list.iter_mut()) {
        slot(&mut tle.expr, f)?;
    }
    opt_slot(&mut query.jointree.quals, f)?;
    for node in &mut query.jointree.fromlist {
        join_slots(node, f)?;
    }
    opt_slot(&mut query.having_qual, f)?;
    opt_slot(&mut query.limit_offset, f)?;
    opt_slot(&mut query.limit_count, f)?;
    for wc in &mut query.window_clause {
        opt_slot(&mut wc.start_offset, f)?;
        opt_slot(&mut wc.end_offset, f)?;
    }
    for rte in &mut query.rtable {
        match &mut rte.kind {
            RteKind::Function { function, .. } => slot(function, f)?,
            RteKind::Values { values_lists, .. } => {
                for expr in values_lists.iter_mut().flatten() {
                    slot(expr, f)?;
                }
            }
            RteKind::TableFunc { tablefunc, .. } => {
                slot(&mut tablefunc.context_item, f)?;
                slot(&mut tablefunc.row_path, f)?;
                for expr in &mut tablefunc.passing_values {
                    slot(expr, f)?;
                }
                for col in &mut tablefunc.columns {
                    opt_slot(&mut col.expr, f)?;
                }
            }
            RteKind::Join { joinaliasvars, .. } => {
                for expr in joinaliasvars {
                    slot(expr, f)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// True if the expression can return more than one row at its top level.
pub fn expression_returns_set(expr: &Expr) -> bool {
    match expr {
        Expr::FuncExpr(f) if f.funcretset => true,
        Expr::OpExpr(op) if op.opretset => true,
        Expr::Aggref(_) | Expr::WindowFunc(_) | Expr::SubLink(_) | Expr::SubPlan(_) => false,
        _ => expression_tree_walker(expr, &mut expression_returns_set),
    }
}

/// True if the expression references a Var of the given query level.
pub fn contain_vars_of_level(expr: &Expr, levels_up: u32) -> bool {
    walk_expr_with_sublinks(expr, 0, &mut |node, depth| match node {
        Expr::Var(var) => var.varlevelsup == levels_up + depth,
        _ => false,
    })
}

/// Location of the first Var of the given level, for error reporting.
pub fn locate_var_of_level(expr: &Expr, levels_up: u32) -> Option<usize> {
    let mut found = None;
    walk_expr_with_sublinks(expr, 0, &mut |node, depth| match node {
        Expr::Var(var) if var.varlevelsup == levels_up + depth => {
            found = var.location.get();
            true
        }
        _ => false,
    });
    found
}

pub fn contain_aggs_of_level(expr: &Expr, levels_up: u32) -> bool {
    walk_expr_with_sublinks(expr, 0, &mut |node, depth| match node {
        Expr::Aggref(agg) => agg.agglevelsup == levels_up + depth,
        Expr::GroupingFunc(g) => g.agglevelsup == levels_up + depth,
        _ => false,
    })
}

pub fn contain_window_function(expr: &Expr) -> bool {
    expr_contains(expr, &mut |node| matches!(node, Expr::WindowFunc(_)))
}

pub fn contain_subplans(expr: &Expr) -> bool {
    expr_contains(expr, &mut |node| {
        matches!(node, Expr::SubPlan(_) | Expr::SubLink(_))
    })
}

/// Collect level-0 Vars (not entering sub-selects), in first-seen order.
pub fn pull_vars(expr: &Expr, out: &mut Vec<crate::nodes::primnodes::Var>) {
    expr_contains(expr, &mut |node| {
        if let Expr::Var(var) = node {
            if var.varlevelsup == 0 && !out.contains(var) {
                out.push(var.clone());
            }
        }
        false
    });
}

/// Add `delta` to `varlevelsup` (and `agglevelsup`) of every reference that
/// points at or above `min_sublevels_up`, descending into sub-selects.
pub fn increment_var_sublevels_up(expr: Expr, delta: u32, min_sublevels_up: u32) -> PgResult<Expr> {
    match expr {
        Expr::Var(mut var) => {
            if var.varlevelsup >= min_sublevels_up {
                var.varlevelsup += delta;
            }
            Ok(Expr::Var(var))
        }
        Expr::Aggref(mut agg) if agg.agglevelsup >= min_sublevels_up => {
            agg.agglevelsup += delta;
            expression_tree_mutator(Expr::Aggref(agg), &mut |e| {
                increment_var_sublevels_up(e, delta, min_sublevels_up)
            })
        }
        Expr::SubLink(mut sublink) => {
            let mut sub = std::mem::replace(&mut *sublink.subselect, Query::new(crate::nodes::parsenodes::CmdType::Select));
            increment_query_sublevels_up(&mut sub, delta, min_sublevels_up + 1)?;
            *sublink.subselect = sub;
            expression_tree_mutator(Expr::SubLink(sublink), &mut |e| {
                increment_var_sublevels_up(e, delta, min_sublevels_up)
            })
        }
        other => expression_tree_mutator(other, &mut |e| {
            increment_var_sublevels_up(e, delta, min_sublevels_up)
        }),
    }
}

pub fn increment_query_sublevels_up(
    query: &mut Query,
    delta: u32,
    min_sublevels_up: u32,
) -> PgResult<()> {
    mutate_query_exprs(query, &mut |e| {
        increment_var_sublevels_up(e, delta, min_sublevels_up)
    })?;
    for rte in &mut query.rtable {
        match &mut rte.kind {
            RteKind::Subquery { subquery } => {
                increment_query_sublevels_up(subquery, delta, min_sublevels_up + 1)?;
            }
            RteKind::Cte { ctelevelsup, .. } if *ctelevelsup >= min_sublevels_up => {
                *ctelevelsup += delta;
            }
            _ => {}
        }
    }
    for cte in &mut query.cte_list {
        increment_query_sublevels_up(&mut cte.query, delta, min_sublevels_up + 1)?;
    }
    Ok(())
}

/// Type of a whole-row reference to a composite, falling back to `record`.
pub fn row_type_or_record(typid: Oid) -> Oid {
    if typid == INVALID_OID {
        RECORDOID
    } else {
        typid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::pg_type::{INT4OID, TEXTOID};
    use crate::nodes::makefuncs::{make_bool_expr, make_const, make_var};
    use crate::nodes::datum::Datum;
    use crate::nodes::primnodes::BoolExprType;

    #[test]
    fn locations_do_not_affect_equality() {
        let mut a = make_var(1, 1, INT4OID, -1, INVALID_OID, 0);
        let b = a.clone();
        if let Expr::Var(var) = &mut a {
            var.location = Location(Some(42));
        }
        assert_eq!(a, b);
    }

    #[test]
    fn walker_finds_nested_vars() {
        let expr = make_bool_expr(
            BoolExprType::And,
            vec![
                make_const(TEXTOID, Datum::text("x")),
                make_var(2, 3, INT4OID, -1, INVALID_OID, 1),
            ],
            None,
        );
        assert!(contain_vars_of_level(&expr, 1));
        assert!(!contain_vars_of_level(&expr, 0));
        assert_eq!(expr_type(&expr), BOOLOID);
    }

    #[test]
    fn increment_levels_shifts_outer_refs_only() {
        let expr = make_bool_expr(
            BoolExprType::Or,
            vec![
                make_var(1, 1, BOOLOID, -1, INVALID_OID, 0),
                make_var(1, 2, BOOLOID, -1, INVALID_OID, 1),
            ],
            None,
        );
        let shifted = increment_var_sublevels_up(expr, 1, 1).expect("mutation succeeds");
        assert!(contain_vars_of_level(&shifted, 0));
        assert!(contain_vars_of_level(&shifted, 2));
        assert!(!contain_vars_of_level(&shifted, 1));
    }
}
