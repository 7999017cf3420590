//! Type coercion: deciding whether a value of one type can become another,
//! and building the expression that does it.
//!
//! The pathway search consults `pg_cast` first. Without an entry, arrays
//! coerce element-wise and anything converts to or from a string category
//! through text I/O (to strings in assignment context, from strings only
//! when explicit).

use tracing::trace;

use crate::catalog::oid::{INVALID_OID, Oid};
use crate::catalog::pg_operator::{CastMethod, CoercionContext};
use crate::catalog::pg_type::{
    ANYARRAYOID, ANYCOMPATIBLEARRAYOID, ANYCOMPATIBLENONARRAYOID, ANYCOMPATIBLEOID, ANYELEMENTOID,
    ANYNONARRAYOID, ANYOID, BOOLOID, INT4OID, RECORDARRAYOID, RECORDOID, TEXTOID, TypeCategory,
    UNKNOWNOID, is_polymorphic_type,
};
use crate::catalog::{Catalog, CatalogOracle};
use crate::nodes::datum::Datum;
use crate::nodes::makefuncs::{make_const, make_null_const};
use crate::nodes::node_funcs::{expr_collation, expr_location, expr_type, expr_typmod, expression_returns_set};
use crate::nodes::primnodes::{
    ArrayCoerceExpr, CaseTestExpr, CoerceToDomain, CoerceViaIO, CoercionForm, Const, Expr, FnCache,
    FuncExpr, Location, RelabelType, RowExpr,
};
use crate::utils::adt::io::datum_in;
use crate::utils::elog::{PgError, PgResult, SqlState, elog};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoercionPathType {
    None,
    Func(Oid),
    RelabelType,
    ArrayCoerce,
    CoerceViaIo,
}

/// How a value of `source` can be turned into `target` in `ccontext`.
pub fn find_coercion_pathway(
    catalog: &Catalog,
    target: Oid,
    source: Oid,
    ccontext: CoercionContext,
) -> CoercionPathType {
    let source = catalog.base_type(source);
    let target = catalog.base_type(target);
    if source == target {
        return CoercionPathType::RelabelType;
    }
    if let Some(cast) = catalog.cast_between(source, target) {
        if ccontext < cast.context {
            return CoercionPathType::None;
        }
        return match cast.method {
            CastMethod::Function(funcid) => CoercionPathType::Func(funcid),
            CastMethod::Binary => CoercionPathType::RelabelType,
            CastMethod::InOut => CoercionPathType::CoerceViaIo,
        };
    }
    if let (Some(target_elem), Some(source_elem)) =
        (catalog.element_type_of(target), catalog.element_type_of(source))
        && find_coercion_pathway(catalog, target_elem, source_elem, ccontext) != CoercionPathType::None
    {
        return CoercionPathType::ArrayCoerce;
    }
    if ccontext >= CoercionContext::Assignment && catalog.type_category(target) == TypeCategory::String {
        return CoercionPathType::CoerceViaIo;
    }
    if ccontext >= CoercionContext::Explicit
        && matches!(catalog.type_category(source), TypeCategory::String | TypeCategory::Unknown)
    {
        return CoercionPathType::CoerceViaIo;
    }
    CoercionPathType::None
}

/// Length-coercion function of a type, if it has one. Arrays apply their
/// element type's function per element.
pub fn find_typmod_coercion_function(catalog: &Catalog, typid: Oid) -> CoercionPathType {
    let (lookup, array) = match catalog.element_type_of(typid) {
        Some(elem) => (elem, true),
        None => (typid, false),
    };
    match catalog.cast_between(lookup, lookup).map(|cast| cast.method) {
        Some(CastMethod::Function(_)) if array => CoercionPathType::ArrayCoerce,
        Some(CastMethod::Function(funcid)) => CoercionPathType::Func(funcid),
        _ => CoercionPathType::None,
    }
}

fn is_composite_array(catalog: &Catalog, typid: Oid) -> bool {
    catalog
        .element_type_of(typid)
        .is_some_and(|elem| catalog.is_composite_type(elem))
}

/// Can each input type be coerced to the corresponding target type?
pub fn can_coerce_type(catalog: &Catalog, inputs: &[Oid], targets: &[Oid], ccontext: CoercionContext) -> bool {
    let mut have_generics = false;
    for (&input, &target) in inputs.iter().zip(targets) {
        if input == target || target == ANYOID {
            continue;
        }
        if is_polymorphic_type(target) {
            have_generics = true;
            continue;
        }
        if input == UNKNOWNOID {
            continue;
        }
        if input == RECORDOID && catalog.is_composite_type(target) {
            continue;
        }
        if target == RECORDOID && catalog.is_composite_type(input) {
            continue;
        }
        if target == RECORDARRAYOID && is_composite_array(catalog, input) {
            continue;
        }
        if find_coercion_pathway(catalog, target, input, ccontext) != CoercionPathType::None {
            continue;
        }
        return false;
    }
    if have_generics {
        let mut declared = targets.to_vec();
        return resolve_generic_types(catalog, inputs, &mut declared, INVALID_OID, false, true).is_ok();
    }
    true
}

/// Binary compatibility: a value of `source` can be used as `target`
/// without any conversion.
pub fn is_binary_coercible(catalog: &Catalog, source: Oid, target: Oid) -> bool {
    let source = catalog.base_type(source);
    if source == target || target == ANYOID || target == ANYELEMENTOID {
        return true;
    }
    if matches!(target, ANYARRAYOID | ANYCOMPATIBLEARRAYOID) && catalog.element_type_of(source).is_some() {
        return true;
    }
    if matches!(target, ANYNONARRAYOID | ANYCOMPATIBLENONARRAYOID) && catalog.element_type_of(source).is_none() {
        return true;
    }
    if target == RECORDOID && catalog.is_composite_type(source) {
        return true;
    }
    if target == RECORDARRAYOID && is_composite_array(catalog, source) {
        return true;
    }
    catalog.cast_between(source, target).is_some_and(|cast| {
        cast.method == CastMethod::Binary && cast.context == CoercionContext::Implicit
    })
}

/// Coerce `expr` to `target`/`targettypmod`, or `None` if no coercion is
/// allowed in `ccontext`.
#[allow(clippy::too_many_arguments)]
pub fn coerce_to_target_type(
    catalog: &Catalog,
    expr: Expr,
    exprtype: Oid,
    target: Oid,
    targettypmod: i32,
    ccontext: CoercionContext,
    cformat: CoercionForm,
    location: Option<usize>,
) -> PgResult<Option<Expr>> {
    if !can_coerce_type(catalog, &[exprtype], &[target], ccontext) {
        return Ok(None);
    }
    let result = coerce_type(catalog, expr, exprtype, target, targettypmod, ccontext, cformat, location)?;
    let result = coerce_type_typmod(catalog, result, target, targettypmod, ccontext, cformat, location)?;
    Ok(Some(result))
}

/// Coerce without checking; the caller has established the coercion is
/// legal with [`can_coerce_type`].
#[allow(clippy::too_many_arguments)]
pub fn coerce_type(
    catalog: &Catalog,
    node: Expr,
    inputtype: Oid,
    target: Oid,
    targettypmod: i32,
    ccontext: CoercionContext,
    cformat: CoercionForm,
    location: Option<usize>,
) -> PgResult<Expr> {
    if target == inputtype || target == ANYOID || is_polymorphic_type(target) {
        return Ok(node);
    }
    if inputtype == UNKNOWNOID
        && let Expr::Const(con) = node
    {
        return coerce_unknown_const(catalog, con, target, targettypmod, ccontext, cformat, location);
    }
    if inputtype == UNKNOWNOID {
        // A non-constant of unknown type: its value is text.
        let result = Expr::CoerceViaIO(Box::new(CoerceViaIO {
            arg: node,
            resulttype: catalog.base_type(target),
            resultcollid: catalog.type_collation(target),
            coerceformat: cformat,
            location: location.into(),
        }));
        return coerce_to_domain(catalog, result, INVALID_OID, -1, target, ccontext, cformat, location);
    }
    if inputtype == RECORDOID && catalog.is_composite_type(target) && target != RECORDOID {
        return coerce_record_to_complex(catalog, node, target, ccontext, cformat, location);
    }
    if target == RECORDOID && catalog.is_composite_type(inputtype) {
        return Ok(node);
    }
    if target == RECORDARRAYOID && is_composite_array(catalog, inputtype) {
        return Ok(node);
    }
    let pathway = find_coercion_pathway(catalog, target, inputtype, ccontext);
    trace!(?pathway, source = inputtype, target, "coercion pathway");
    let (base, base_typmod) = catalog.base_type_and_typmod(target, targettypmod);
    match pathway {
        CoercionPathType::None => Err(elog(format!(
            "failed to find conversion function from {} to {}",
            catalog.format_type(inputtype),
            catalog.format_type(target)
        ))),
        CoercionPathType::RelabelType => {
            if base != target {
                return coerce_to_domain(catalog, node, base, base_typmod, target, ccontext, cformat, location);
            }
            Ok(apply_relabel_type(node, target, -1, catalog.type_collation(target), cformat, location))
        }
        pathway => {
            let result = build_coercion_expression(
                catalog, node, pathway, base, base_typmod, ccontext, cformat, location,
            )?;
            if base != target {
                return coerce_to_domain(catalog, result, base, base_typmod, target, ccontext, cformat, location);
            }
            Ok(result)
        }
    }
}

fn coerce_unknown_const(
    catalog: &Catalog,
    con: Const,
    target: Oid,
    targettypmod: i32,
    ccontext: CoercionContext,
    cformat: CoercionForm,
    location: Option<usize>,
) -> PgResult<Expr> {
    let (base, base_typmod) = catalog.base_type_and_typmod(target, targettypmod);
    let const_location = con.location.get().or(location);
    let value = match &con.constvalue {
        Datum::Null => Datum::Null,
        Datum::Text(text) => datum_in(catalog, base, -1, text).map_err(|err| err.at(const_location))?,
        other => other.clone(),
    };
    let result = Expr::Const(Const {
        consttype: base,
        consttypmod: -1,
        constcollid: catalog.type_collation(base),
        constvalue: value,
        location: Location(const_location),
    });
    if base != target {
        return coerce_to_domain(catalog, result, base, base_typmod, target, ccontext, cformat, location);
    }
    Ok(result)
}

/// Wrap a value of the domain's base type in a domain check. A no-op when
/// `domain` is not a domain.
#[allow(clippy::too_many_arguments)]
pub fn coerce_to_domain(
    catalog: &Catalog,
    arg: Expr,
    base: Oid,
    base_typmod: i32,
    domain: Oid,
    ccontext: CoercionContext,
    cformat: CoercionForm,
    location: Option<usize>,
) -> PgResult<Expr> {
    let (base, base_typmod) = if base == INVALID_OID {
        catalog.base_type_and_typmod(domain, -1)
    } else {
        (base, base_typmod)
    };
    if base == domain {
        return Ok(arg);
    }
    let arg = coerce_type_typmod(catalog, arg, base, base_typmod, ccontext, CoercionForm::ImplicitCast, location)?;
    Ok(Expr::CoerceToDomain(Box::new(CoerceToDomain {
        arg,
        resulttype: domain,
        resulttypmod: -1,
        resultcollid: catalog.type_collation(base),
        coercionformat: cformat,
        location: location.into(),
    })))
}

/// Apply a length coercion when the target typmod differs from the value's.
pub fn coerce_type_typmod(
    catalog: &Catalog,
    node: Expr,
    target: Oid,
    targettypmod: i32,
    ccontext: CoercionContext,
    cformat: CoercionForm,
    location: Option<usize>,
) -> PgResult<Expr> {
    if targettypmod < 0 || targettypmod == expr_typmod(&node) {
        return Ok(node);
    }
    match find_typmod_coercion_function(catalog, target) {
        CoercionPathType::None => {
            let collation = expr_collation(&node);
            Ok(apply_relabel_type(node, target, targettypmod, collation, cformat, location))
        }
        pathway => build_coercion_expression(catalog, node, pathway, target, targettypmod, ccontext, cformat, location),
    }
}

/// Relabel without a runtime step; merges with an existing relabel.
pub fn apply_relabel_type(
    arg: Expr,
    rtype: Oid,
    rtypmod: i32,
    rcollid: Oid,
    rformat: CoercionForm,
    location: Option<usize>,
) -> Expr {
    let mut arg = arg;
    while let Expr::RelabelType(relabel) = arg {
        arg = relabel.arg;
    }
    if let Expr::Const(mut con) = arg {
        con.consttype = rtype;
        con.consttypmod = rtypmod;
        con.constcollid = rcollid;
        return Expr::Const(con);
    }
    if expr_type(&arg) == rtype && expr_typmod(&arg) == rtypmod && expr_collation(&arg) == rcollid {
        return arg;
    }
    Expr::RelabelType(Box::new(RelabelType {
        arg,
        resulttype: rtype,
        resulttypmod: rtypmod,
        resultcollid: rcollid,
        relabelformat: rformat,
        location: location.into(),
    }))
}

#[allow(clippy::too_many_arguments)]
fn build_coercion_expression(
    catalog: &Catalog,
    node: Expr,
    pathway: CoercionPathType,
    target: Oid,
    targettypmod: i32,
    ccontext: CoercionContext,
    cformat: CoercionForm,
    location: Option<usize>,
) -> PgResult<Expr> {
    match pathway {
        CoercionPathType::Func(funcid) => {
            let proc = catalog
                .proc_by_id(funcid)
                .ok_or_else(|| elog(format!("cache lookup failed for function {funcid}")))?;
            let mut args = vec![node];
            if proc.nargs() >= 2 {
                args.push(make_const(INT4OID, Datum::Int4(targettypmod)));
            }
            if proc.nargs() == 3 {
                args.push(make_const(BOOLOID, Datum::Bool(ccontext == CoercionContext::Explicit)));
            }
            Ok(Expr::FuncExpr(Box::new(FuncExpr {
                funcid,
                funcresulttype: target,
                funcretset: false,
                funcvariadic: false,
                funcformat: cformat,
                funccollid: catalog.type_collation(target),
                inputcollid: INVALID_OID,
                args,
                location: location.into(),
                cache: FnCache::default(),
            })))
        }
        CoercionPathType::ArrayCoerce => {
            let source = catalog.base_type(expr_type(&node));
            let source_elem = catalog
                .element_type_of(source)
                .ok_or_else(|| elog("array coercion source is not an array"))?;
            let target_elem = catalog
                .element_type_of(target)
                .ok_or_else(|| elog("array coercion target is not an array"))?;
            let ctest = Expr::CaseTestExpr(CaseTestExpr {
                type_id: source_elem,
                type_mod: expr_typmod(&node),
                collation: INVALID_OID,
            });
            let elemexpr = coerce_to_target_type(
                catalog,
                ctest,
                source_elem,
                target_elem,
                targettypmod,
                ccontext,
                cformat,
                location,
            )?
            .ok_or_else(|| elog("failed to coerce array element type as expected"))?;
            Ok(Expr::ArrayCoerceExpr(Box::new(ArrayCoerceExpr {
                arg: node,
                elemexpr,
                resulttype: target,
                resulttypmod: targettypmod,
                resultcollid: catalog.type_collation(target),
                coerceformat: cformat,
                location: location.into(),
            })))
        }
        CoercionPathType::CoerceViaIo => Ok(Expr::CoerceViaIO(Box::new(CoerceViaIO {
            arg: node,
            resulttype: target,
            resultcollid: catalog.type_collation(target),
            coerceformat: cformat,
            location: location.into(),
        }))),
        CoercionPathType::RelabelType | CoercionPathType::None => {
            Err(elog("unsupported pathway in build_coercion_expression"))
        }
    }
}

fn cannot_cast(catalog: &Catalog, input: Oid, target: Oid, location: Option<usize>) -> PgError {
    PgError::new(
        SqlState::CannotCoerce,
        format!(
            "cannot cast type {} to {}",
            catalog.format_type(input),
            catalog.format_type(target)
        ),
    )
    .at(location)
}

/// `ROW(...)::composite`: coerce each field to the column type.
fn coerce_record_to_complex(
    catalog: &Catalog,
    node: Expr,
    target: Oid,
    ccontext: CoercionContext,
    cformat: CoercionForm,
    location: Option<usize>,
) -> PgResult<Expr> {
    let Expr::RowExpr(row) = node else {
        return Err(cannot_cast(catalog, RECORDOID, target, location));
    };
    let desc = catalog
        .composite_desc(target)
        .ok_or_else(|| cannot_cast(catalog, RECORDOID, target, location))?
        .clone();
    let RowExpr { args, .. } = *row;
    let mut inputs = args.into_iter();
    let mut new_args = Vec::with_capacity(desc.natts());
    let mut colnames = Vec::with_capacity(desc.natts());
    let mut ucolno = 0;
    for attr in &desc.attrs {
        if attr.dropped {
            new_args.push(make_null_const(INT4OID, -1, INVALID_OID));
            colnames.push(String::new());
            continue;
        }
        ucolno += 1;
        let Some(arg) = inputs.next() else {
            return Err(cannot_cast(catalog, RECORDOID, target, location).with_detail("Input has too few columns."));
        };
        let arg_type = expr_type(&arg);
        let coerced = coerce_to_target_type(
            catalog,
            arg,
            arg_type,
            attr.typid,
            attr.typmod,
            ccontext,
            CoercionForm::ImplicitCast,
            location,
        )?
        .ok_or_else(|| {
            cannot_cast(catalog, RECORDOID, target, location).with_detail(format!(
                "Cannot cast type {} to {} in column {ucolno}.",
                catalog.format_type(arg_type),
                catalog.format_type(attr.typid)
            ))
        })?;
        new_args.push(coerced);
        colnames.push(attr.name.clone());
    }
    if inputs.next().is_some() {
        return Err(cannot_cast(catalog, RECORDOID, target, location).with_detail("Input has too many columns."));
    }
    Ok(Expr::RowExpr(Box::new(RowExpr {
        args: new_args,
        row_typeid: target,
        row_format: cformat,
        colnames,
        location: location.into(),
    })))
}

/// Coerce a condition to boolean.
pub fn coerce_to_boolean(catalog: &Catalog, node: Expr, construct: &str) -> PgResult<Expr> {
    let input = expr_type(&node);
    let location = expr_location(&node);
    let node = if input == BOOLOID {
        node
    } else {
        coerce_to_target_type(
            catalog,
            node,
            input,
            BOOLOID,
            -1,
            CoercionContext::Assignment,
            CoercionForm::ImplicitCast,
            location,
        )?
        .ok_or_else(|| {
            PgError::new(
                SqlState::DatatypeMismatch,
                format!(
                    "argument of {construct} must be type boolean, not type {}",
                    catalog.format_type(input)
                ),
            )
            .at(location)
        })?
    };
    if expression_returns_set(&node) {
        return Err(PgError::new(
            SqlState::DatatypeMismatch,
            format!("argument of {construct} must not return a set"),
        )
        .at(location));
    }
    Ok(node)
}

/// Coerce a clause argument (LIMIT, OFFSET, ...) to a specific type.
pub fn coerce_to_specific_type(catalog: &Catalog, node: Expr, target: Oid, construct: &str) -> PgResult<Expr> {
    let input = expr_type(&node);
    let location = expr_location(&node);
    let node = if input == target {
        node
    } else {
        coerce_to_target_type(
            catalog,
            node,
            input,
            target,
            -1,
            CoercionContext::Assignment,
            CoercionForm::ImplicitCast,
            location,
        )?
        .ok_or_else(|| {
            PgError::new(
                SqlState::DatatypeMismatch,
                format!(
                    "argument of {construct} must be type {}, not type {}",
                    catalog.format_type(target),
                    catalog.format_type(input)
                ),
            )
            .at(location)
        })?
    };
    if expression_returns_set(&node) {
        return Err(PgError::new(
            SqlState::DatatypeMismatch,
            format!("argument of {construct} must not return a set"),
        )
        .at(location));
    }
    Ok(node)
}

/// Choose the common type of a UNION/CASE/VALUES/... column. Unknown
/// inputs defer to any known type and resolve to text if all are unknown.
pub fn select_common_type(catalog: &Catalog, inputs: &[(Oid, Option<usize>)], context: &str) -> PgResult<Oid> {
    let Some(&(first, _)) = inputs.first() else {
        return Ok(TEXTOID);
    };
    if first != UNKNOWNOID && inputs.iter().all(|&(typid, _)| typid == first) {
        return Ok(first);
    }
    let mut ptype = catalog.base_type(first);
    let mut pcategory = catalog.type_category(ptype);
    let mut preferred = catalog.is_preferred_type(ptype);
    for &(typid, location) in &inputs[1..] {
        let ntype = catalog.base_type(typid);
        if ntype == UNKNOWNOID || ntype == ptype {
            continue;
        }
        let ncategory = catalog.type_category(ntype);
        if ptype == UNKNOWNOID {
            ptype = ntype;
            pcategory = ncategory;
            preferred = catalog.is_preferred_type(ntype);
        } else if ncategory != pcategory {
            return Err(PgError::new(
                SqlState::DatatypeMismatch,
                format!(
                    "{context} types {} and {} cannot be matched",
                    catalog.format_type(ptype),
                    catalog.format_type(ntype)
                ),
            )
            .at(location));
        } else if !preferred
            && can_coerce_type(catalog, &[ptype], &[ntype], CoercionContext::Implicit)
            && !can_coerce_type(catalog, &[ntype], &[ptype], CoercionContext::Implicit)
        {
            ptype = ntype;
            pcategory = ncategory;
            preferred = catalog.is_preferred_type(ntype);
        }
    }
    Ok(if ptype == UNKNOWNOID { TEXTOID } else { ptype })
}

/// Common typmod of the inputs, or -1 when they differ.
pub fn select_common_typmod(exprs: &[&Expr], common_type: Oid) -> i32 {
    let mut result = None;
    for expr in exprs {
        if expr_type(expr) != common_type {
            return -1;
        }
        let typmod = expr_typmod(expr);
        match result {
            None => result = Some(typmod),
            Some(prev) if prev != typmod => return -1,
            Some(_) => {}
        }
    }
    result.unwrap_or(-1)
}

pub fn coerce_to_common_type(catalog: &Catalog, node: Expr, target: Oid, context: &str) -> PgResult<Expr> {
    let input = expr_type(&node);
    if input == target {
        return Ok(node);
    }
    let location = expr_location(&node);
    if !can_coerce_type(catalog, &[input], &[target], CoercionContext::Implicit) {
        return Err(PgError::new(
            SqlState::CannotCoerce,
            format!(
                "{context} could not convert type {} to {}",
                catalog.format_type(input),
                catalog.format_type(target)
            ),
        )
        .at(location));
    }
    coerce_type(
        catalog,
        node,
        input,
        target,
        -1,
        CoercionContext::Implicit,
        CoercionForm::ImplicitCast,
        location,
    )
}

/// Resolve the polymorphic parameters of a call from its actual argument
/// types, rewriting `declared` in place and returning the actual result type.
pub fn enforce_generic_type_consistency(
    catalog: &Catalog,
    actual: &[Oid],
    declared: &mut [Oid],
    rettype: Oid,
    allow_poly: bool,
) -> PgResult<Oid> {
    resolve_generic_types(catalog, actual, declared, rettype, allow_poly, false)
}

fn poly_mismatch(message: &str, catalog: &Catalog, a: Oid, b: Oid) -> PgError {
    PgError::new(SqlState::DatatypeMismatch, message.to_string()).with_detail(format!(
        "{} versus {}",
        catalog.format_type(a),
        catalog.format_type(b)
    ))
}

fn resolve_generic_types(
    catalog: &Catalog,
    actual: &[Oid],
    declared: &mut [Oid],
    rettype: Oid,
    allow_poly: bool,
    lenient: bool,
) -> PgResult<Oid> {
    let mut have_family1 = matches!(rettype, ANYELEMENTOID | ANYNONARRAYOID | ANYARRAYOID);
    let mut have_anynonarray = rettype == ANYNONARRAYOID;
    let mut have_family2 = matches!(
        rettype,
        ANYCOMPATIBLEOID | ANYCOMPATIBLEARRAYOID | ANYCOMPATIBLENONARRAYOID
    );
    let mut have_anycompatible_nonarray = rettype == ANYCOMPATIBLENONARRAYOID;
    let mut elem_typeid = INVALID_OID;
    let mut array_typeid = INVALID_OID;
    let mut anycompatible_types: Vec<(Oid, Option<usize>)> = Vec::new();

    for (&decl, &actual_type) in declared.iter().zip(actual) {
        match decl {
            ANYELEMENTOID | ANYNONARRAYOID => {
                have_family1 = true;
                have_anynonarray |= decl == ANYNONARRAYOID;
                if actual_type == UNKNOWNOID || (allow_poly && actual_type == decl) {
                    continue;
                }
                if elem_typeid != INVALID_OID && elem_typeid != actual_type {
                    return Err(poly_mismatch(
                        &format!("arguments declared \"{}\" are not all alike", catalog.type_name(decl)),
                        catalog,
                        elem_typeid,
                        actual_type,
                    ));
                }
                elem_typeid = actual_type;
            }
            ANYARRAYOID => {
                have_family1 = true;
                if actual_type == UNKNOWNOID || (allow_poly && actual_type == decl) {
                    continue;
                }
                let actual_type = catalog.base_type(actual_type);
                if array_typeid != INVALID_OID && array_typeid != actual_type {
                    return Err(poly_mismatch(
                        "arguments declared \"anyarray\" are not all alike",
                        catalog,
                        array_typeid,
                        actual_type,
                    ));
                }
                array_typeid = actual_type;
            }
            ANYCOMPATIBLEOID | ANYCOMPATIBLENONARRAYOID => {
                have_family2 = true;
                have_anycompatible_nonarray |= decl == ANYCOMPATIBLENONARRAYOID;
                if actual_type == UNKNOWNOID || (allow_poly && actual_type == decl) {
                    continue;
                }
                anycompatible_types.push((actual_type, None));
            }
            ANYCOMPATIBLEARRAYOID => {
                have_family2 = true;
                if actual_type == UNKNOWNOID || (allow_poly && actual_type == decl) {
                    continue;
                }
                let elem = catalog.element_type_of(actual_type).ok_or_else(|| {
                    PgError::new(
                        SqlState::DatatypeMismatch,
                        format!(
                            "argument declared anycompatiblearray is not an array but type {}",
                            catalog.format_type(actual_type)
                        ),
                    )
                })?;
                anycompatible_types.push((elem, None));
            }
            _ => {}
        }
    }

    if !have_family1 && !have_family2 {
        return Ok(rettype);
    }

    if have_family1 {
        if array_typeid != INVALID_OID {
            if array_typeid == ANYARRAYOID {
                elem_typeid = ANYELEMENTOID;
            } else {
                let array_elem = catalog.element_type_of(array_typeid).ok_or_else(|| {
                    PgError::new(
                        SqlState::DatatypeMismatch,
                        format!(
                            "argument declared anyarray is not an array but type {}",
                            catalog.format_type(array_typeid)
                        ),
                    )
                })?;
                if elem_typeid != INVALID_OID && elem_typeid != array_elem {
                    return Err(poly_mismatch(
                        "argument declared anyarray is not consistent with argument declared anyelement",
                        catalog,
                        array_typeid,
                        elem_typeid,
                    ));
                }
                elem_typeid = array_elem;
            }
        }
        if elem_typeid == INVALID_OID {
            if allow_poly || lenient {
                elem_typeid = ANYELEMENTOID;
                array_typeid = ANYARRAYOID;
            } else {
                return Err(PgError::new(
                    SqlState::DatatypeMismatch,
                    "could not determine polymorphic type because input has type unknown",
                ));
            }
        }
        if have_anynonarray && elem_typeid != ANYELEMENTOID && catalog.element_type_of(elem_typeid).is_some() {
            return Err(PgError::new(
                SqlState::DatatypeMismatch,
                format!(
                    "type matched to anynonarray is an array type: {}",
                    catalog.format_type(elem_typeid)
                ),
            ));
        }
    }

    let mut anycompatible_typeid = INVALID_OID;
    let mut anycompatible_array_typeid = INVALID_OID;
    if have_family2 {
        if anycompatible_types.is_empty() {
            if allow_poly || lenient {
                anycompatible_typeid = ANYCOMPATIBLEOID;
                anycompatible_array_typeid = ANYCOMPATIBLEARRAYOID;
            } else {
                return Err(PgError::new(
                    SqlState::DatatypeMismatch,
                    "could not determine polymorphic type anycompatible because input has type unknown",
                ));
            }
        } else {
            anycompatible_typeid = select_common_type(catalog, &anycompatible_types, "anycompatible")
                .map_err(|_| {
                    PgError::new(
                        SqlState::DatatypeMismatch,
                        "arguments of anycompatible family cannot be cast to a common type",
                    )
                })?;
            // Every input must actually convert to the chosen type.
            for &(typid, _) in &anycompatible_types {
                if !can_coerce_type(catalog, &[typid], &[anycompatible_typeid], CoercionContext::Implicit) {
                    return Err(PgError::new(
                        SqlState::DatatypeMismatch,
                        "arguments of anycompatible family cannot be cast to a common type",
                    ));
                }
            }
            anycompatible_array_typeid = catalog.array_type_of(anycompatible_typeid).unwrap_or(INVALID_OID);
            if have_anycompatible_nonarray && catalog.element_type_of(anycompatible_typeid).is_some() {
                return Err(PgError::new(
                    SqlState::DatatypeMismatch,
                    format!(
                        "type matched to anycompatiblenonarray is an array type: {}",
                        catalog.format_type(anycompatible_typeid)
                    ),
                ));
            }
        }
    }

    let array_of = |elem: Oid, poly_array: Oid| -> PgResult<Oid> {
        if elem == ANYELEMENTOID || elem == ANYCOMPATIBLEOID {
            return Ok(poly_array);
        }
        catalog.array_type_of(elem).ok_or_else(|| {
            PgError::new(
                SqlState::UndefinedObject,
                format!("could not find array type for data type {}", catalog.format_type(elem)),
            )
        })
    };
    if have_family1 && array_typeid == INVALID_OID && (declared.contains(&ANYARRAYOID) || rettype == ANYARRAYOID) {
        array_typeid = array_of(elem_typeid, ANYARRAYOID)?;
    }
    if have_family2
        && anycompatible_array_typeid == INVALID_OID
        && (declared.contains(&ANYCOMPATIBLEARRAYOID) || rettype == ANYCOMPATIBLEARRAYOID)
    {
        anycompatible_array_typeid = array_of(anycompatible_typeid, ANYCOMPATIBLEARRAYOID)?;
    }

    for decl in declared.iter_mut() {
        *decl = match *decl {
            ANYELEMENTOID | ANYNONARRAYOID => elem_typeid,
            ANYARRAYOID => array_typeid,
            ANYCOMPATIBLEOID | ANYCOMPATIBLENONARRAYOID => anycompatible_typeid,
            ANYCOMPATIBLEARRAYOID => anycompatible_array_typeid,
            other => other,
        };
    }
    Ok(match rettype {
        ANYELEMENTOID | ANYNONARRAYOID => elem_typeid,
        ANYARRAYOID => array_typeid,
        ANYCOMPATIBLEOID | ANYCOMPATIBLENONARRAYOID => anycompatible_typeid,
        ANYCOMPATIBLEARRAYOID => anycompatible_array_typeid,
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::pg_type::{
        FLOAT8OID, INT4ARRAYOID, INT8OID, NUMERICOID, TEXTARRAYOID, VARCHAROID,
    };

    fn unknown_literal(text: &str) -> Expr {
        Expr::Const(Const {
            consttype: UNKNOWNOID,
            consttypmod: -1,
            constcollid: INVALID_OID,
            constvalue: Datum::text(text),
            location: Location(Some(7)),
        })
    }

    #[test]
    fn implicit_widening_but_not_narrowing() {
        let catalog = Catalog::default();
        assert!(can_coerce_type(&catalog, &[INT4OID], &[INT8OID], CoercionContext::Implicit));
        assert!(!can_coerce_type(&catalog, &[INT8OID], &[INT4OID], CoercionContext::Implicit));
        assert!(can_coerce_type(&catalog, &[INT8OID], &[INT4OID], CoercionContext::Assignment));
    }

    #[test]
    fn io_conversion_fallback_follows_context() {
        let catalog = Catalog::default();
        assert_eq!(
            find_coercion_pathway(&catalog, TEXTOID, INT4OID, CoercionContext::Assignment),
            CoercionPathType::CoerceViaIo
        );
        assert_eq!(
            find_coercion_pathway(&catalog, TEXTOID, INT4OID, CoercionContext::Implicit),
            CoercionPathType::None
        );
        assert_eq!(
            find_coercion_pathway(&catalog, INT4OID, TEXTOID, CoercionContext::Explicit),
            CoercionPathType::CoerceViaIo
        );
    }

    #[test]
    fn arrays_coerce_elementwise() {
        let catalog = Catalog::default();
        assert_eq!(
            find_coercion_pathway(&catalog, TEXTARRAYOID, INT4ARRAYOID, CoercionContext::Explicit),
            CoercionPathType::ArrayCoerce
        );
    }

    #[test]
    fn unknown_literal_becomes_typed_constant() {
        let catalog = Catalog::default();
        let expr = coerce_type(
            &catalog,
            unknown_literal("42"),
            UNKNOWNOID,
            INT4OID,
            -1,
            CoercionContext::Implicit,
            CoercionForm::ImplicitCast,
            None,
        )
        .unwrap();
        let Expr::Const(con) = expr else { panic!("expected a constant") };
        assert_eq!(con.consttype, INT4OID);
        assert_eq!(con.constvalue, Datum::Int4(42));

        let err = coerce_type(
            &catalog,
            unknown_literal("x"),
            UNKNOWNOID,
            INT4OID,
            -1,
            CoercionContext::Implicit,
            CoercionForm::ImplicitCast,
            None,
        )
        .unwrap_err();
        assert_eq!(err.sqlstate, SqlState::InvalidTextRepresentation);
        assert_eq!(err.position, Some(7));
    }

    #[test]
    fn common_type_prefers_the_preferred_type() {
        let catalog = Catalog::default();
        let common = select_common_type(&catalog, &[(INT4OID, None), (NUMERICOID, None)], "CASE").unwrap();
        assert_eq!(common, NUMERICOID);
        let common = select_common_type(&catalog, &[(INT4OID, None), (FLOAT8OID, None)], "CASE").unwrap();
        assert_eq!(common, FLOAT8OID);
        let common = select_common_type(&catalog, &[(UNKNOWNOID, None), (UNKNOWNOID, None)], "CASE").unwrap();
        assert_eq!(common, TEXTOID);
        let err = select_common_type(&catalog, &[(INT4OID, None), (TEXTOID, Some(3))], "CASE").unwrap_err();
        assert_eq!(err.message, "CASE types integer and text cannot be matched");
    }

    #[test]
    fn polymorphic_result_follows_arguments() {
        let catalog = Catalog::default();
        let mut declared = vec![ANYARRAYOID];
        let ret = enforce_generic_type_consistency(&catalog, &[INT4ARRAYOID], &mut declared, ANYELEMENTOID, false)
            .unwrap();
        assert_eq!(ret, INT4OID);

        let mut declared = vec![ANYELEMENTOID, ANYELEMENTOID];
        let err = enforce_generic_type_consistency(&catalog, &[INT4OID, TEXTOID], &mut declared, ANYELEMENTOID, false)
            .unwrap_err();
        assert_eq!(err.sqlstate, SqlState::DatatypeMismatch);

        let mut declared = vec![ANYCOMPATIBLEOID, INT4OID, ANYCOMPATIBLEOID];
        let ret = enforce_generic_type_consistency(
            &catalog,
            &[INT4OID, INT4OID, NUMERICOID],
            &mut declared,
            ANYCOMPATIBLEOID,
            false,
        )
        .unwrap();
        assert_eq!(ret, NUMERICOID);
        assert_eq!(declared, vec![NUMERICOID, INT4OID, NUMERICOID]);
    }

    #[test]
    fn varchar_length_coercion_wraps_a_function() {
        let catalog = Catalog::default();
        let node = make_const(TEXTOID, Datum::text("abc"));
        let result = coerce_to_target_type(
            &catalog,
            node,
            TEXTOID,
            VARCHAROID,
            6,
            CoercionContext::Assignment,
            CoercionForm::ImplicitCast,
            None,
        )
        .unwrap()
        .unwrap();
        assert!(matches!(result, Expr::FuncExpr(_)));
        assert_eq!(expr_type(&result), VARCHAROID);
    }
}
