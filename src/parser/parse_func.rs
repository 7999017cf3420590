//! Function-call analysis and overload resolution.

use tracing::{debug, trace};

use crate::catalog::namespace::{FuncCandidate, typename_get_type};
use crate::catalog::oid::{INVALID_OID, Oid};
use crate::catalog::pg_operator::CoercionContext;
use crate::catalog::pg_proc::{AggKind, PgProc, ProKind};
use crate::catalog::pg_type::{ANYOID, RECORDOID, TypeCategory, UNKNOWNOID};
use crate::catalog::{Catalog, CatalogOracle};
use crate::nodes::node_funcs::{expr_location, expr_type};
use crate::nodes::parsenodes::FuncCall;
use crate::nodes::primnodes::{
    Aggref, ArrayExpr, CoercionForm, Expr, FieldSelect, FnCache, FuncExpr, Var, WindowFunc,
};
use crate::parser::parse_agg::{transform_aggregate_call, transform_window_func_call};
use crate::parser::parse_clause::transform_where_clause;
use crate::parser::parse_coerce::{
    CoercionPathType, can_coerce_type, coerce_type, enforce_generic_type_consistency,
    find_coercion_pathway, select_common_type,
};
use crate::parser::parse_expr::transform_expr;
use crate::parser::parse_node::{ParseExprKind, ParseState};
use crate::parser::parse_target::expand_record_desc;
use crate::utils::elog::{PgError, PgResult, SqlState, elog};

/// Upper bound on the number of arguments of a call.
pub const FUNC_MAX_ARGS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuncDetailCode {
    NotFound,
    Multiple,
    Normal,
    Aggregate,
    Window,
    /// `typename(arg)` read as a cast.
    Coercion,
}

/// Outcome of looking a call up in `pg_proc`.
#[derive(Debug, Clone)]
pub struct FuncDetail {
    pub code: FuncDetailCode,
    pub funcid: Oid,
    pub rettype: Oid,
    pub retset: bool,
    pub nvargs: usize,
    /// Element type of the variadic parameter, when expanded.
    pub vatype: Oid,
    /// Declared types in call order, defaults included.
    pub true_typeids: Vec<Oid>,
    pub argdefaults: Vec<Expr>,
    pub argnumbers: Option<Vec<usize>>,
}

impl FuncDetail {
    fn not_found(code: FuncDetailCode) -> Self {
        Self {
            code,
            funcid: INVALID_OID,
            rettype: INVALID_OID,
            retset: false,
            nvargs: 0,
            vatype: INVALID_OID,
            true_typeids: Vec::new(),
            argdefaults: Vec::new(),
            argnumbers: None,
        }
    }
}

/// `name(type, ...)` for messages; named arguments show as `name => type`.
pub fn func_signature_string(catalog: &Catalog, funcname: &[String], argtypes: &[Oid], argnames: &[String]) -> String {
    let numposargs = argtypes.len() - argnames.len();
    let args: Vec<String> = argtypes
        .iter()
        .enumerate()
        .map(|(i, &typid)| match i.checked_sub(numposargs) {
            Some(named) => format!("{} => {}", argnames[named], catalog.format_type(typid)),
            None => catalog.format_type(typid),
        })
        .collect();
    format!("{}({})", funcname.join("."), args.join(", "))
}

/// Candidates whose declared types accept the actual types by implicit coercion.
pub fn func_match_argtypes(catalog: &Catalog, actual: &[Oid], candidates: Vec<FuncCandidate>) -> Vec<FuncCandidate> {
    candidates
        .into_iter()
        .filter(|cand| can_coerce_type(catalog, actual, &cand.args, CoercionContext::Implicit))
        .collect()
}

/// Pick the best of several coercible candidates, or `None` when the choice
/// is ambiguous.
pub fn func_select_candidate(catalog: &Catalog, actual: &[Oid], candidates: Vec<FuncCandidate>) -> Option<FuncCandidate> {
    let nargs = actual.len();
    if candidates.len() <= 1 {
        return candidates.into_iter().next();
    }
    let input_base: Vec<Oid> = actual.iter().map(|&t| catalog.base_type(t)).collect();
    let nunknowns = input_base.iter().filter(|&&t| t == UNKNOWNOID).count();

    // Most exact matches on the known inputs.
    let exact = |cand: &FuncCandidate| {
        (0..nargs)
            .filter(|&i| input_base[i] != UNKNOWNOID && cand.args[i] == input_base[i])
            .count()
    };
    let candidates = keep_best(candidates, exact);
    if candidates.len() == 1 {
        return candidates.into_iter().next();
    }

    // Most positions where a coercion lands on a preferred type.
    let preferred = |cand: &FuncCandidate| {
        (0..nargs)
            .filter(|&i| {
                input_base[i] != UNKNOWNOID
                    && (cand.args[i] == input_base[i] || catalog.is_preferred_type(cand.args[i]))
            })
            .count()
    };
    let mut candidates = keep_best(candidates, preferred);
    if candidates.len() == 1 {
        return candidates.into_iter().next();
    }
    if nunknowns == 0 {
        return None;
    }

    // Resolve unknown inputs by category: string wins, otherwise every
    // candidate must agree.
    for i in 0..nargs {
        if input_base[i] != UNKNOWNOID {
            continue;
        }
        let mut category: Option<TypeCategory> = None;
        let mut has_preferred = false;
        let mut conflict = false;
        for cand in &candidates {
            let typ = cand.args[i];
            let cat = catalog.type_category(typ);
            let pref = catalog.is_preferred_type(typ);
            match category {
                None => {
                    category = Some(cat);
                    has_preferred = pref;
                }
                Some(current) if current == cat => has_preferred |= pref,
                Some(TypeCategory::String) => {}
                Some(_) if cat == TypeCategory::String => {
                    category = Some(cat);
                    has_preferred = pref;
                    conflict = false;
                }
                Some(_) => conflict = true,
            }
        }
        if conflict {
            return None;
        }
        let Some(category) = category else { continue };
        candidates.retain(|cand| {
            let typ = cand.args[i];
            catalog.type_category(typ) == category && (!has_preferred || catalog.is_preferred_type(typ))
        });
    }
    if candidates.len() == 1 {
        return candidates.into_iter().next();
    }

    // Last gasp: if every known input has the same type, assume the
    // unknowns do too.
    if nunknowns < nargs {
        let mut known = None;
        for &typ in input_base.iter().filter(|&&t| t != UNKNOWNOID) {
            match known {
                None => known = Some(typ),
                Some(prev) if prev != typ => return None,
                Some(_) => {}
            }
        }
        let known = known?;
        let guessed: Vec<Oid> = input_base
            .iter()
            .map(|&t| if t == UNKNOWNOID { known } else { t })
            .collect();
        let mut matching = candidates
            .into_iter()
            .filter(|cand| can_coerce_type(catalog, &guessed, &cand.args, CoercionContext::Implicit));
        let first = matching.next()?;
        if matching.next().is_none() {
            return Some(first);
        }
    }
    None
}

fn keep_best(candidates: Vec<FuncCandidate>, score: impl Fn(&FuncCandidate) -> usize) -> Vec<FuncCandidate> {
    let best = candidates.iter().map(&score).max().unwrap_or(0);
    candidates.into_iter().filter(|cand| score(cand) == best).collect()
}

/// Is `typename(arg)` better read as a cast of `arg` to `typename`?
fn coercion_interpretation(catalog: &Catalog, funcname: &[String], arg: &Expr) -> PgResult<Option<Oid>> {
    let Some(target) = typename_get_type(catalog, funcname)? else {
        return Ok(None);
    };
    let target = target.oid;
    let source = expr_type(arg);
    if source == UNKNOWNOID && matches!(arg, Expr::Const(_)) {
        return Ok(Some(target));
    }
    let is_coercion = match find_coercion_pathway(catalog, target, source, CoercionContext::Explicit) {
        CoercionPathType::RelabelType | CoercionPathType::ArrayCoerce => true,
        CoercionPathType::CoerceViaIo => {
            !((source == RECORDOID || catalog.is_composite_type(source))
                && catalog.type_category(target) == TypeCategory::String)
        }
        CoercionPathType::Func(_) | CoercionPathType::None => false,
    };
    Ok(is_coercion.then_some(target))
}

/// Find the function a call refers to.
pub fn func_get_detail(
    catalog: &Catalog,
    funcname: &[String],
    fargs: &[Expr],
    argnames: &[String],
    expand_variadic: bool,
    expand_defaults: bool,
) -> PgResult<FuncDetail> {
    let actual: Vec<Oid> = fargs.iter().map(expr_type).collect();
    let candidates = catalog.function_candidates(funcname, fargs.len(), argnames, expand_variadic, expand_defaults)?;

    let mut best = candidates.iter().find(|cand| cand.args[..actual.len()] == actual[..]).cloned();

    if best.is_none() {
        if fargs.len() == 1
            && argnames.is_empty()
            && let Some(target) = coercion_interpretation(catalog, funcname, &fargs[0])?
        {
            return Ok(FuncDetail {
                code: FuncDetailCode::Coercion,
                funcid: INVALID_OID,
                rettype: target,
                true_typeids: vec![target],
                ..FuncDetail::not_found(FuncDetailCode::Coercion)
            });
        }
        let matching = func_match_argtypes(catalog, &actual, candidates);
        match matching.len() {
            0 => return Ok(FuncDetail::not_found(FuncDetailCode::NotFound)),
            1 => best = matching.into_iter().next(),
            _ => match func_select_candidate(catalog, &actual, matching) {
                Some(cand) => best = Some(cand),
                None => return Ok(FuncDetail::not_found(FuncDetailCode::Multiple)),
            },
        }
    }
    let Some(best) = best else {
        return Ok(FuncDetail::not_found(FuncDetailCode::NotFound));
    };
    if best.oid == INVALID_OID {
        return Ok(FuncDetail::not_found(FuncDetailCode::Multiple));
    }
    let proc = catalog
        .proc_by_id(best.oid)
        .ok_or_else(|| elog(format!("cache lookup failed for function {}", best.oid)))?;
    let argdefaults = default_arguments(proc, &best)?;
    let code = match proc.kind {
        ProKind::Aggregate => FuncDetailCode::Aggregate,
        ProKind::Window => FuncDetailCode::Window,
        ProKind::Function | ProKind::Procedure => FuncDetailCode::Normal,
    };
    trace!(funcid = proc.oid, ?code, "resolved function");
    Ok(FuncDetail {
        code,
        funcid: proc.oid,
        rettype: proc.rettype,
        retset: proc.retset,
        nvargs: best.nvargs,
        vatype: if best.nvargs > 0 { proc.variadic } else { INVALID_OID },
        true_typeids: best.args,
        argdefaults,
        argnumbers: best.argnumbers,
    })
}

fn default_arguments(proc: &PgProc, cand: &FuncCandidate) -> PgResult<Vec<Expr>> {
    if cand.ndargs == 0 {
        return Ok(Vec::new());
    }
    let first_default = proc.nargs() - proc.defaults.len();
    match &cand.argnumbers {
        Some(argnumbers) => argnumbers[cand.nargs..]
            .iter()
            .map(|&pos| {
                proc.defaults
                    .get(pos - first_default)
                    .cloned()
                    .ok_or_else(|| elog("not enough default arguments"))
            })
            .collect(),
        None => Ok(proc.defaults[proc.defaults.len() - cand.ndargs..].to_vec()),
    }
}

/// Coerce call arguments to the resolved declared types.
pub fn make_fn_arguments(catalog: &Catalog, fargs: Vec<Expr>, actual: &[Oid], declared: &[Oid]) -> PgResult<Vec<Expr>> {
    fargs
        .into_iter()
        .enumerate()
        .map(|(i, arg)| {
            if actual[i] == declared[i] {
                return Ok(arg);
            }
            let location = expr_location(&arg);
            coerce_type(
                catalog,
                arg,
                actual[i],
                declared[i],
                -1,
                CoercionContext::Implicit,
                CoercionForm::ImplicitCast,
                location,
            )
        })
        .collect()
}

/// Reject a set-returning call where the current clause can't take one.
pub fn check_srf_call_placement(pstate: &mut ParseState<'_>, location: Option<usize>) -> PgResult<()> {
    let kind = pstate.expr_kind();
    let allowed = matches!(
        kind,
        ParseExprKind::SelectTarget
            | ParseExprKind::FromFunction
            | ParseExprKind::OrderBy
            | ParseExprKind::GroupBy
            | ParseExprKind::DistinctOn
            | ParseExprKind::Returning
            | ParseExprKind::ValuesSingle
            | ParseExprKind::UpdateSource
            | ParseExprKind::InsertTarget
            | ParseExprKind::Other
    );
    if !allowed {
        return Err(PgError::new(
            SqlState::FeatureNotSupported,
            format!("set-returning functions are not allowed in {}", kind.name()),
        )
        .at(location));
    }
    if kind != ParseExprKind::FromFunction {
        pstate.level_mut().has_target_srfs = true;
    }
    pstate.note_srf();
    Ok(())
}

/// `col(rowvalue)`: functional notation for selecting a field.
fn parse_complex_projection(pstate: &ParseState<'_>, funcname: &str, first_arg: &Expr) -> PgResult<Option<Expr>> {
    // A whole-row Var of a table selects the column directly.
    if let Expr::Var(var) = first_arg
        && var.varattno == 0
        && let Some(level) = pstate.level_at(var.varlevelsup)
        && let Ok(rte) = level.rte(var.varno)
        && let Some(rel) = pstate.catalog.relation(rte.relid())
        && let Some(attno) = rel.desc.attnum_by_name(funcname)
        && let Some(attr) = rel.desc.attr(attno)
    {
        return Ok(Some(Expr::Var(Var {
            varno: var.varno,
            varattno: attno,
            vartype: attr.typid,
            vartypmod: attr.typmod,
            varcollid: attr.collation,
            varlevelsup: var.varlevelsup,
            location: var.location,
        })));
    }
    let Some(desc) = expand_record_desc(pstate, first_arg)? else {
        return Ok(None);
    };
    let Some(attno) = desc.attnum_by_name(funcname) else {
        return Ok(None);
    };
    let Some(attr) = desc.attr(attno) else {
        return Ok(None);
    };
    Ok(Some(Expr::FieldSelect(Box::new(FieldSelect {
        arg: first_arg.clone(),
        fieldnum: attno,
        resulttype: attr.typid,
        resulttypmod: attr.typmod,
        resultcollid: attr.collation,
    }))))
}

fn not_aggregate(message: String, location: Option<usize>) -> PgError {
    PgError::new(SqlState::WrongObjectType, message).at(location)
}

/// Analyze a function call (or functional-notation column reference) whose
/// arguments are already transformed. `argnames` names the trailing
/// named-notation arguments.
pub fn parse_func_or_column(
    pstate: &mut ParseState<'_>,
    funcname: &[String],
    mut fargs: Vec<Expr>,
    argnames: Vec<String>,
    call: &FuncCall,
    location: Option<usize>,
) -> PgResult<Expr> {
    let catalog = pstate.catalog;
    let is_column = call.agg_order.is_empty()
        && !call.agg_star
        && !call.agg_distinct
        && call.over.is_none()
        && call.agg_filter.is_none()
        && !call.func_variadic
        && argnames.is_empty()
        && funcname.len() == 1
        && fargs.len() == 1;

    // WITHIN GROUP arguments take part in resolution after the direct ones.
    let mut num_direct_args = fargs.len();
    if call.agg_within_group {
        for sortby in &call.agg_order {
            let kind = pstate.expr_kind();
            fargs.push(transform_expr(pstate, &sortby.node, kind)?);
        }
    }
    if fargs.len() > FUNC_MAX_ARGS {
        return Err(PgError::new(
            SqlState::TooManyArguments,
            format!("cannot pass more than {FUNC_MAX_ARGS} arguments to a function"),
        )
        .at(location));
    }

    let could_be_projection = is_column && {
        let argtype = expr_type(&fargs[0]);
        argtype == RECORDOID || catalog.is_composite_type(argtype)
    };
    if could_be_projection
        && expr_type(&fargs[0]) != RECORDOID
        && let Some(projection) = parse_complex_projection(pstate, &funcname[0], &fargs[0])?
    {
        return Ok(projection);
    }

    let actual: Vec<Oid> = fargs.iter().map(expr_type).collect();
    let detail = func_get_detail(catalog, funcname, &fargs, &argnames, !call.func_variadic, true)?;
    let signature = || func_signature_string(catalog, funcname, &actual, &argnames);

    match detail.code {
        FuncDetailCode::Normal | FuncDetailCode::Coercion => {
            if call.agg_star {
                return Err(not_aggregate(
                    format!("{0}(*) specified, but {0} is not an aggregate function", funcname.join(".")),
                    location,
                ));
            }
            if call.agg_distinct {
                return Err(not_aggregate(
                    format!("DISTINCT specified, but {} is not an aggregate function", funcname.join(".")),
                    location,
                ));
            }
            if call.agg_within_group {
                return Err(not_aggregate(
                    format!("WITHIN GROUP specified, but {} is not an aggregate function", funcname.join(".")),
                    location,
                ));
            }
            if !call.agg_order.is_empty() {
                return Err(not_aggregate(
                    format!("ORDER BY specified, but {} is not an aggregate function", funcname.join(".")),
                    location,
                ));
            }
            if call.agg_filter.is_some() {
                return Err(not_aggregate(
                    format!("FILTER specified, but {} is not an aggregate function", funcname.join(".")),
                    location,
                ));
            }
            if call.over.is_some() {
                return Err(not_aggregate(
                    format!(
                        "OVER specified, but {} is not a window function nor an aggregate function",
                        funcname.join(".")
                    ),
                    location,
                ));
            }
        }
        FuncDetailCode::Aggregate | FuncDetailCode::Window => {}
        FuncDetailCode::NotFound => {
            if could_be_projection
                && let Some(projection) = parse_complex_projection(pstate, &funcname[0], &fargs[0])?
            {
                return Ok(projection);
            }
            if is_column && let Some(desc_arg) = fargs.first() && catalog.is_composite_type(expr_type(desc_arg)) {
                return Err(PgError::new(
                    SqlState::UndefinedColumn,
                    format!(
                        "column \"{}\" not found in data type {}",
                        funcname[0],
                        catalog.format_type(expr_type(desc_arg))
                    ),
                )
                .at(location));
            }
            debug!(function = %signature(), "no matching function");
            return Err(PgError::new(
                SqlState::UndefinedFunction,
                format!("function {} does not exist", signature()),
            )
            .with_hint(
                "No function matches the given name and argument types. You might need to add explicit type casts.",
            )
            .at(location));
        }
        FuncDetailCode::Multiple => {
            return Err(PgError::new(
                SqlState::AmbiguousFunction,
                format!("function {} is not unique", signature()),
            )
            .with_hint(
                "Could not choose a best candidate function. You might need to add explicit type casts.",
            )
            .at(location));
        }
    }

    if detail.code == FuncDetailCode::Coercion {
        let arg = fargs.remove(0);
        return coerce_type(
            catalog,
            arg,
            actual[0],
            detail.rettype,
            -1,
            CoercionContext::Explicit,
            CoercionForm::ExplicitCall,
            location,
        );
    }

    let proc = catalog
        .proc_by_id(detail.funcid)
        .ok_or_else(|| elog(format!("cache lookup failed for function {}", detail.funcid)))?;
    let aggkind = proc.agg_kind();

    if detail.code == FuncDetailCode::Aggregate {
        let ordered = matches!(aggkind, Some(AggKind::OrderedSet | AggKind::Hypothetical));
        if ordered && !call.agg_within_group {
            return Err(not_aggregate(
                format!("WITHIN GROUP is required for ordered-set aggregate {}", funcname.join(".")),
                location,
            ));
        }
        if !ordered && call.agg_within_group {
            return Err(not_aggregate(
                format!(
                    "{} is not an ordered-set aggregate, so it cannot have WITHIN GROUP",
                    funcname.join(".")
                ),
                location,
            ));
        }
        if ordered && call.over.is_some() {
            return Err(PgError::new(
                SqlState::FeatureNotSupported,
                format!("OVER is not supported for ordered-set aggregate {}", funcname.join(".")),
            )
            .at(location));
        }
        if call.agg_within_group {
            let num_ordered = call.agg_order.len();
            num_direct_args = fargs.len() - num_ordered;
            if aggkind == Some(AggKind::Hypothetical) {
                if num_direct_args != num_ordered {
                    return Err(PgError::new(
                        SqlState::UndefinedFunction,
                        format!("function {} does not exist", signature()),
                    )
                    .with_hint(format!(
                        "To use the hypothetical-set aggregate {}, the number of hypothetical direct arguments (here {num_direct_args}) must match the number of ordering columns (here {num_ordered}).",
                        funcname.join(".")
                    ))
                    .at(location));
                }
            } else if let Some(agg) = &proc.aggregate
                && agg.num_direct_args != num_direct_args
            {
                return Err(PgError::new(
                    SqlState::UndefinedFunction,
                    format!("function {} does not exist", signature()),
                )
                .with_hint(format!(
                    "There is an ordered-set aggregate {}, but it requires {} direct arguments, not {num_direct_args}.",
                    funcname.join("."),
                    agg.num_direct_args
                ))
                .at(location));
            }
        }
    } else if detail.code == FuncDetailCode::Window {
        if call.over.is_none() {
            return Err(not_aggregate(
                format!("window function {} requires an OVER clause", funcname.join(".")),
                location,
            ));
        }
        if call.agg_within_group {
            return Err(not_aggregate(
                format!(
                    "{} is not an ordered-set aggregate, so it cannot have WITHIN GROUP",
                    funcname.join(".")
                ),
                location,
            ));
        }
    }

    // Defaults join the argument list before type resolution.
    let mut actual = actual;
    for default in &detail.argdefaults {
        actual.push(expr_type(default));
        fargs.push(default.clone());
    }
    let mut declared = detail.true_typeids.clone();
    let rettype = enforce_generic_type_consistency(catalog, &actual, &mut declared, detail.rettype, false)
        .map_err(|err| err.at(location))?;

    if aggkind == Some(AggKind::Hypothetical) && call.agg_within_group {
        unify_hypothetical_args(catalog, &mut fargs, &mut actual, &mut declared, num_direct_args)?;
    }

    let mut fargs = make_fn_arguments(catalog, fargs, &actual, &declared)?;

    // Pack expanded variadic arguments into an array.
    if detail.nvargs > 0 && detail.vatype != ANYOID {
        let start = fargs.len() - detail.argdefaults.len() - detail.nvargs;
        let elem = declared[start];
        let array_typeid = catalog.array_type_of(elem).ok_or_else(|| {
            PgError::new(
                SqlState::UndefinedObject,
                format!("could not find array type for data type {}", catalog.format_type(elem)),
            )
            .at(location)
        })?;
        let tail = fargs.split_off(start + detail.nvargs);
        let elements = fargs.split_off(start);
        fargs.push(Expr::ArrayExpr(Box::new(ArrayExpr {
            array_typeid,
            array_collid: INVALID_OID,
            element_typeid: elem,
            elements,
            multidims: false,
            location: location.into(),
        })));
        fargs.extend(tail);
    }
    if call.func_variadic && proc.variadic == ANYOID {
        let last = fargs.last().map(expr_type).unwrap_or(INVALID_OID);
        if catalog.element_type_of(last).is_none() {
            return Err(PgError::new(SqlState::DatatypeMismatch, "VARIADIC argument must be an array")
                .at(fargs.last().and_then(expr_location)));
        }
    }

    // Named notation: lay the arguments out in declared order.
    if let Some(argnumbers) = &detail.argnumbers {
        let mut ordered: Vec<Option<Expr>> = vec![None; argnumbers.len()];
        for (arg, &pos) in fargs.into_iter().zip(argnumbers) {
            ordered[pos] = Some(arg);
        }
        fargs = ordered
            .into_iter()
            .map(|arg| arg.ok_or_else(|| elog("named argument layout has a gap")))
            .collect::<PgResult<_>>()?;
    }

    let funcvariadic = call.func_variadic;
    match detail.code {
        FuncDetailCode::Normal => {
            if detail.retset {
                check_srf_call_placement(pstate, location)?;
            }
            Ok(Expr::FuncExpr(Box::new(FuncExpr {
                funcid: detail.funcid,
                funcresulttype: rettype,
                funcretset: detail.retset,
                funcvariadic,
                funcformat: CoercionForm::ExplicitCall,
                funccollid: INVALID_OID,
                inputcollid: INVALID_OID,
                args: fargs,
                location: location.into(),
                cache: FnCache::default(),
            })))
        }
        FuncDetailCode::Aggregate if call.over.is_none() => {
            let agg_filter = match &call.agg_filter {
                Some(filter) => Some(transform_where_clause(pstate, filter, ParseExprKind::Filter, "FILTER")?),
                None => None,
            };
            if detail.retset {
                return Err(PgError::new(
                    SqlState::WrongObjectType,
                    "aggregates cannot return sets",
                )
                .at(location));
            }
            let mut aggref = Aggref {
                aggfnoid: detail.funcid,
                aggtype: rettype,
                aggcollid: INVALID_OID,
                inputcollid: INVALID_OID,
                aggargtypes: declared.clone(),
                aggdirectargs: Vec::new(),
                args: Vec::new(),
                aggorder: Vec::new(),
                aggdistinct: Vec::new(),
                aggfilter: agg_filter,
                aggstar: call.agg_star,
                aggvariadic: funcvariadic,
                aggkind: aggkind.unwrap_or(AggKind::Normal),
                agglevelsup: 0,
                aggno: -1,
                location: location.into(),
            };
            if call.agg_star && !fargs.is_empty() {
                return Err(not_aggregate(
                    format!("{}(*) must be used to call a parameterless aggregate function", funcname.join(".")),
                    location,
                ));
            }
            let aggregated = if call.agg_within_group {
                let rest = fargs.split_off(num_direct_args);
                aggref.aggdirectargs = fargs;
                rest
            } else {
                fargs
            };
            transform_aggregate_call(pstate, &mut aggref, aggregated, &call.agg_order, call.agg_distinct)?;
            Ok(Expr::Aggref(Box::new(aggref)))
        }
        FuncDetailCode::Aggregate | FuncDetailCode::Window => {
            let winagg = detail.code == FuncDetailCode::Aggregate;
            if call.agg_distinct {
                return Err(PgError::new(
                    SqlState::FeatureNotSupported,
                    "DISTINCT is not implemented for window functions",
                )
                .at(location));
            }
            if !call.agg_order.is_empty() {
                return Err(PgError::new(
                    SqlState::FeatureNotSupported,
                    "aggregate ORDER BY is not implemented for window functions",
                )
                .at(location));
            }
            if !winagg && call.agg_filter.is_some() {
                return Err(PgError::new(
                    SqlState::FeatureNotSupported,
                    "FILTER is not implemented for non-aggregate window functions",
                )
                .at(location));
            }
            if detail.retset {
                return Err(PgError::new(SqlState::WrongObjectType, "window functions cannot return sets")
                    .at(location));
            }
            let aggfilter = match &call.agg_filter {
                Some(filter) => Some(transform_where_clause(pstate, filter, ParseExprKind::Filter, "FILTER")?),
                None => None,
            };
            let mut wfunc = WindowFunc {
                winfnoid: detail.funcid,
                wintype: rettype,
                wincollid: INVALID_OID,
                inputcollid: INVALID_OID,
                args: fargs,
                aggfilter,
                winref: 0,
                winstar: call.agg_star,
                winagg,
                wfuncno: -1,
                location: location.into(),
            };
            let over = call
                .over
                .as_deref()
                .ok_or_else(|| elog("window function call without OVER"))?;
            transform_window_func_call(pstate, &mut wfunc, over)?;
            Ok(Expr::WindowFunc(Box::new(wfunc)))
        }
        FuncDetailCode::Coercion | FuncDetailCode::NotFound | FuncDetailCode::Multiple => {
            Err(elog("unexpected function lookup result"))
        }
    }
}

/// Hypothetical-set aggregates compare each direct argument with the
/// matching ordering column, so each pair gets a common type.
fn unify_hypothetical_args(
    catalog: &Catalog,
    fargs: &mut [Expr],
    actual: &mut [Oid],
    declared: &mut [Oid],
    num_direct_args: usize,
) -> PgResult<()> {
    for i in 0..num_direct_args {
        let j = i + num_direct_args;
        let common = select_common_type(
            catalog,
            &[(actual[i], expr_location(&fargs[i])), (actual[j], expr_location(&fargs[j]))],
            "WITHIN GROUP",
        )?;
        declared[i] = common;
        declared[j] = common;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::pg_type::{FLOAT8OID, INT4OID, INT8OID, NUMERICOID, TEXTOID, VARCHAROID};
    use crate::nodes::datum::Datum;
    use crate::nodes::makefuncs::make_const;
    use crate::nodes::primnodes::{Const, Location};

    fn names(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| (*p).to_string()).collect()
    }

    fn unknown(text: &str) -> Expr {
        Expr::Const(Const {
            consttype: UNKNOWNOID,
            consttypmod: -1,
            constcollid: INVALID_OID,
            constvalue: Datum::text(text),
            location: Location(None),
        })
    }

    #[test]
    fn exact_match_wins() {
        let catalog = Catalog::default();
        let detail = func_get_detail(&catalog, &names(&["abs"]), &[make_const(INT8OID, Datum::Int8(-3))], &[], true, true)
            .unwrap();
        assert_eq!(detail.code, FuncDetailCode::Normal);
        assert_eq!(detail.true_typeids, vec![INT8OID]);
    }

    #[test]
    fn unknown_literal_prefers_string_candidates() {
        let catalog = Catalog::default();
        let detail = func_get_detail(&catalog, &names(&["length"]), &[unknown("abc")], &[], true, true).unwrap();
        assert_eq!(detail.code, FuncDetailCode::Normal);
        assert_eq!(detail.true_typeids, vec![TEXTOID]);
    }

    #[test]
    fn type_named_call_is_a_coercion() {
        let catalog = Catalog::default();
        // int8(int4) is a registered cast function
        let detail = func_get_detail(&catalog, &names(&["int8"]), &[make_const(INT4OID, Datum::Int4(1))], &[], true, true)
            .unwrap();
        assert_eq!(detail.code, FuncDetailCode::Normal);
        assert_eq!(detail.rettype, INT8OID);

        let detail = func_get_detail(&catalog, &names(&["varchar"]), &[make_const(TEXTOID, Datum::text("a"))], &[], true, true)
            .unwrap();
        assert_eq!(detail.code, FuncDetailCode::Coercion);
        assert_eq!(detail.rettype, VARCHAROID);
    }

    #[test]
    fn preferred_type_breaks_ties() {
        let catalog = Catalog::default();
        let cands = catalog.function_candidates(&names(&["round"]), 1, &[], true, true).unwrap();
        let chosen = func_select_candidate(&catalog, &[INT4OID], func_match_argtypes(&catalog, &[INT4OID], cands));
        let chosen = chosen.expect("round(int4) resolves");
        assert!(chosen.args[0] == FLOAT8OID || chosen.args[0] == NUMERICOID);
    }

    #[test]
    fn missing_function_reports_signature() {
        let catalog = Catalog::default();
        let detail = func_get_detail(&catalog, &names(&["no_such_fn"]), &[], &[], true, true).unwrap();
        assert_eq!(detail.code, FuncDetailCode::NotFound);
        assert_eq!(
            func_signature_string(&catalog, &names(&["f"]), &[INT4OID, TEXTOID], &names(&["b"])),
            "f(integer, b => text)"
        );
    }
}
