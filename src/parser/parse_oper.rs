//! Operator lookup and operator-expression construction.

use tracing::trace;

use crate::catalog::namespace::FuncCandidate;
use crate::catalog::oid::{INVALID_OID, Oid};
use crate::catalog::pg_operator::{OprKind, PgOperator};
use crate::catalog::pg_type::{BOOLOID, UNKNOWNOID};
use crate::catalog::{Catalog, CatalogOracle};
use crate::nodes::node_funcs::expr_type;
use crate::nodes::primnodes::{Expr, FnCache, OpExpr, ScalarArrayOpExpr};
use crate::parser::parse_coerce::enforce_generic_type_consistency;
use crate::parser::parse_func::{check_srf_call_placement, func_match_argtypes, func_select_candidate, make_fn_arguments};
use crate::parser::parse_node::ParseState;
use crate::utils::elog::{PgError, PgResult, SqlState, elog};

/// Equality and ordering operators of a type, for sorting and grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortGroupOperators {
    pub lt: Oid,
    pub eq: Oid,
    pub gt: Oid,
    pub hashable: bool,
}

fn operator_name(names: &[String]) -> &str {
    names.last().map_or("", String::as_str)
}

/// `integer + text` or `- text`.
pub fn op_signature_string(catalog: &Catalog, names: &[String], left: Oid, right: Oid) -> String {
    let name = names.join(".");
    if left == INVALID_OID {
        format!("{name} {}", catalog.format_type(right))
    } else {
        format!("{} {name} {}", catalog.format_type(left), catalog.format_type(right))
    }
}

/// Exact match, treating an unknown operand as the other operand's type.
fn binary_oper_exact<'c>(catalog: &'c Catalog, name: &str, left: Oid, right: Oid) -> Option<&'c PgOperator> {
    let (left, right) = match (left, right) {
        (UNKNOWNOID, r) if r != UNKNOWNOID => (r, r),
        (l, UNKNOWNOID) if l != UNKNOWNOID => (l, l),
        pair => pair,
    };
    if let Some(op) = catalog.operator_by_name_types(name, left, right) {
        return Some(op);
    }
    // Two values of the same domain use the base type's operator.
    let lbase = catalog.base_type(left);
    let rbase = catalog.base_type(right);
    if lbase == rbase && (lbase != left || rbase != right) {
        return catalog.operator_by_name_types(name, lbase, rbase);
    }
    None
}

fn oper_select_candidate<'c>(
    catalog: &'c Catalog,
    candidates: Vec<&'c PgOperator>,
    args: &[Oid],
) -> Result<&'c PgOperator, bool> {
    let as_funcs: Vec<FuncCandidate> = candidates
        .iter()
        .map(|op| {
            let declared = if op.kind == OprKind::Prefix {
                vec![op.right]
            } else {
                vec![op.left, op.right]
            };
            FuncCandidate::for_operator(op.oid, declared)
        })
        .collect();
    let matching = func_match_argtypes(catalog, args, as_funcs);
    let chosen = match matching.len() {
        0 => return Err(false),
        1 => matching.into_iter().next(),
        _ => func_select_candidate(catalog, args, matching),
    };
    let chosen = chosen.ok_or(true)?;
    candidates.into_iter().find(|op| op.oid == chosen.oid).ok_or(false)
}

/// Resolve an operator by name and operand types; `left` is `INVALID_OID`
/// for a prefix operator.
pub fn oper<'c>(
    catalog: &'c Catalog,
    names: &[String],
    left: Oid,
    right: Oid,
    location: Option<usize>,
) -> PgResult<&'c PgOperator> {
    match lookup_oper(catalog, names, left, right)? {
        Ok(op) => Ok(op),
        Err(ambiguous) => Err(op_error(catalog, names, left, right, ambiguous, location)),
    }
}

/// Like [`oper`], but `Err(ambiguous)` instead of raising.
pub fn lookup_oper<'c>(
    catalog: &'c Catalog,
    names: &[String],
    left: Oid,
    right: Oid,
) -> PgResult<Result<&'c PgOperator, bool>> {
    let name = operator_name(names);
    if left == INVALID_OID {
        if let Some(op) = catalog
            .operator_candidates(name, OprKind::Prefix)
            .into_iter()
            .find(|op| op.right == right)
        {
            return Ok(Ok(op));
        }
        let candidates = catalog.operator_candidates(name, OprKind::Prefix);
        return Ok(oper_select_candidate(catalog, candidates, &[right]));
    }
    if let Some(op) = binary_oper_exact(catalog, name, left, right) {
        return Ok(Ok(op));
    }
    let candidates = catalog.operator_candidates(name, OprKind::Binary);
    Ok(oper_select_candidate(catalog, candidates, &[left, right]))
}

fn op_error(catalog: &Catalog, names: &[String], left: Oid, right: Oid, ambiguous: bool, location: Option<usize>) -> PgError {
    let signature = op_signature_string(catalog, names, left, right);
    if ambiguous {
        PgError::new(SqlState::AmbiguousFunction, format!("operator is not unique: {signature}"))
            .with_hint("Could not choose a best candidate operator. You might need to add explicit type casts.")
            .at(location)
    } else {
        PgError::new(SqlState::UndefinedFunction, format!("operator does not exist: {signature}"))
            .with_hint("No operator matches the given name and argument types. You might need to add explicit type casts.")
            .at(location)
    }
}

/// Build an operator expression; `ltree` is `None` for a prefix operator.
pub fn make_op(
    pstate: &mut ParseState<'_>,
    names: &[String],
    ltree: Option<Expr>,
    rtree: Expr,
    location: Option<usize>,
) -> PgResult<Expr> {
    let catalog = pstate.catalog;
    let rtype = expr_type(&rtree);
    let ltype = ltree.as_ref().map_or(INVALID_OID, expr_type);
    let op = oper(catalog, names, ltype, rtype, location)?;
    let proc = catalog
        .proc_by_id(op.code)
        .ok_or_else(|| elog(format!("cache lookup failed for function {}", op.code)))?;

    let (args, actual, mut declared) = match ltree {
        Some(ltree) => (vec![ltree, rtree], vec![ltype, rtype], vec![op.left, op.right]),
        None => (vec![rtree], vec![rtype], vec![op.right]),
    };
    let rettype = enforce_generic_type_consistency(catalog, &actual, &mut declared, op.result, false)
        .map_err(|err| err.at(location))?;
    let args = make_fn_arguments(catalog, args, &actual, &declared)?;
    trace!(opno = op.oid, "resolved operator");
    if proc.retset {
        check_srf_call_placement(pstate, location)?;
    }
    Ok(Expr::OpExpr(Box::new(OpExpr {
        opno: op.oid,
        opfuncid: op.code,
        opresulttype: rettype,
        opretset: proc.retset,
        opcollid: INVALID_OID,
        inputcollid: INVALID_OID,
        args,
        location: location.into(),
        cache: FnCache::default(),
    })))
}

/// `scalar op ANY/ALL (array)`.
pub fn make_scalar_array_op(
    pstate: &mut ParseState<'_>,
    names: &[String],
    use_or: bool,
    ltree: Expr,
    rtree: Expr,
    location: Option<usize>,
) -> PgResult<Expr> {
    let catalog = pstate.catalog;
    let ltype = expr_type(&ltree);
    let atype = expr_type(&rtree);
    let rtype = if atype == UNKNOWNOID {
        UNKNOWNOID
    } else {
        catalog.element_type_of(atype).ok_or_else(|| {
            PgError::new(SqlState::WrongObjectType, "op ANY/ALL (array) requires array on right side")
                .at(location)
        })?
    };
    let op = oper(catalog, names, ltype, rtype, location)?;
    let mut declared = vec![op.left, op.right];
    let rettype = enforce_generic_type_consistency(catalog, &[ltype, rtype], &mut declared, op.result, false)
        .map_err(|err| err.at(location))?;
    if rettype != BOOLOID {
        return Err(
            PgError::new(SqlState::WrongObjectType, "op ANY/ALL (array) requires operator to yield boolean")
                .at(location),
        );
    }
    if catalog.proc_by_id(op.code).is_some_and(|proc| proc.retset) {
        return Err(PgError::new(
            SqlState::WrongObjectType,
            "op ANY/ALL (array) requires operator not to return a set",
        )
        .at(location));
    }
    let declared_array = catalog.array_type_of(declared[1]).ok_or_else(|| {
        PgError::new(
            SqlState::UndefinedObject,
            format!("could not find array type for data type {}", catalog.format_type(declared[1])),
        )
        .at(location)
    })?;
    let args = make_fn_arguments(catalog, vec![ltree, rtree], &[ltype, atype], &[declared[0], declared_array])?;
    Ok(Expr::ScalarArrayOpExpr(Box::new(ScalarArrayOpExpr {
        opno: op.oid,
        opfuncid: op.code,
        use_or,
        inputcollid: INVALID_OID,
        args,
        location: location.into(),
        cache: FnCache::default(),
    })))
}

/// Sorting and grouping operators of `argtype`, raising when a needed one
/// is missing.
pub fn get_sort_group_operators(
    catalog: &Catalog,
    argtype: Oid,
    need_lt: bool,
    need_eq: bool,
    location: Option<usize>,
) -> PgResult<SortGroupOperators> {
    let ops = catalog.sort_group_operators(argtype);
    if need_lt && ops.is_none() {
        return Err(PgError::new(
            SqlState::UndefinedFunction,
            format!("could not identify an ordering operator for type {}", catalog.format_type(argtype)),
        )
        .with_hint("Use an explicit ordering operator or modify the query.")
        .at(location));
    }
    if need_eq && ops.is_none() {
        return Err(PgError::new(
            SqlState::UndefinedFunction,
            format!("could not identify an equality operator for type {}", catalog.format_type(argtype)),
        )
        .at(location));
    }
    Ok(ops.map_or(
        SortGroupOperators {
            lt: INVALID_OID,
            eq: INVALID_OID,
            gt: INVALID_OID,
            hashable: false,
        },
        |ops| SortGroupOperators {
            lt: ops.lt,
            eq: ops.eq,
            gt: ops.gt,
            hashable: ops.hashable,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::pg_type::{INT4OID, INT8OID, TEXTOID};

    fn name(op: &str) -> Vec<String> {
        vec![op.to_string()]
    }

    #[test]
    fn cross_type_comparison_resolves_exactly() {
        let catalog = Catalog::default();
        let op = oper(&catalog, &name("<"), INT4OID, INT8OID, None).unwrap();
        assert_eq!((op.left, op.right, op.result), (INT4OID, INT8OID, BOOLOID));
    }

    #[test]
    fn unknown_operand_takes_the_other_type() {
        let catalog = Catalog::default();
        let op = oper(&catalog, &name("="), TEXTOID, UNKNOWNOID, None).unwrap();
        assert_eq!((op.left, op.right), (TEXTOID, TEXTOID));
    }

    #[test]
    fn missing_operator_names_the_signature() {
        let catalog = Catalog::default();
        let err = oper(&catalog, &name("+"), INT4OID, TEXTOID, Some(3)).unwrap_err();
        assert_eq!(err.sqlstate, SqlState::UndefinedFunction);
        assert_eq!(err.message, "operator does not exist: integer + text");
        assert_eq!(err.position, Some(3));
    }

    #[test]
    fn prefix_minus_resolves() {
        let catalog = Catalog::default();
        let op = oper(&catalog, &name("-"), INVALID_OID, INT4OID, None).unwrap();
        assert_eq!(op.kind, OprKind::Prefix);
        assert_eq!(op.result, INT4OID);
    }
}
