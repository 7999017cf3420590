//! SQL/JSON constructors, the IS JSON predicate and the JSON_EXISTS /
//! JSON_VALUE / JSON_QUERY family.

use tracing::trace;

use crate::catalog::Catalog;
use crate::catalog::oid::{INVALID_OID, Oid};
use crate::catalog::pg_operator::CoercionContext;
use crate::catalog::pg_type::{BOOLOID, BYTEAOID, JSONBOID, JSONOID, JSONPATHOID, TEXTOID, TypeCategory, UNKNOWNOID};
use crate::nodes::node_funcs::{
    contain_window_function, expr_contains, expr_location, expr_type, expr_typmod, expression_returns_set,
};
use crate::nodes::parsenodes::{JsonArgument, JsonOutput, JsonQuotes, JsonValueExpr, RawExpr, RawJsonBehavior};
use crate::nodes::primnodes::{
    CaseTestExpr, CoercionForm, Expr, JsonBehavior, JsonBehaviorType, JsonConstructorExpr, JsonConstructorType,
    JsonEncoding, JsonExpr, JsonExprOp, JsonFormat, JsonFormatType, JsonIsPredicate, JsonReturning, JsonWrapper,
    Location, SubLinkType,
};
use crate::parser::parse_coerce::coerce_to_target_type;
use crate::parser::parse_expr::{resolve_unknown_to_text, transform_expr};
use crate::parser::parse_node::ParseState;
use crate::parser::parse_type::typename_type_id_and_mod;
use crate::utils::elog::{PgError, PgResult, SqlState, elog};

/// Dispatch for the raw SQL/JSON expression nodes.
pub fn transform_json_expr(pstate: &mut ParseState<'_>, raw: &RawExpr) -> PgResult<Expr> {
    match raw {
        RawExpr::JsonObjectConstructor {
            exprs,
            output,
            absent_on_null,
            unique,
            location,
        } => {
            let mut args = Vec::with_capacity(exprs.len() * 2);
            for kv in exprs {
                let kind = pstate.expr_kind();
                let key = transform_expr(pstate, &kv.key, kind)?;
                args.push(resolve_unknown_to_text(pstate, key)?);
                args.push(transform_json_value_expr(pstate, &kv.value, JSONOID)?);
            }
            make_json_constructor(
                pstate,
                JsonConstructorType::Object,
                args,
                output.as_ref(),
                *absent_on_null,
                *unique,
                *location,
            )
        }
        RawExpr::JsonArrayConstructor {
            exprs,
            output,
            absent_on_null,
            location,
        } => {
            let args = exprs
                .iter()
                .map(|value| transform_json_value_expr(pstate, value, JSONOID))
                .collect::<PgResult<Vec<_>>>()?;
            make_json_constructor(
                pstate,
                JsonConstructorType::Array,
                args,
                output.as_ref(),
                *absent_on_null,
                false,
                *location,
            )
        }
        RawExpr::JsonArrayQueryConstructor {
            query,
            output,
            format,
            absent_on_null,
            location,
        } => {
            if format.as_ref().is_some_and(|f| f.encoding != JsonEncoding::Default) {
                return Err(PgError::new(
                    SqlState::DatatypeMismatch,
                    "JSON ENCODING clause is only allowed for bytea input type",
                )
                .at(*location));
            }
            let sublink = RawExpr::SubLink {
                sub_link_type: SubLinkType::Array,
                testexpr: None,
                oper_name: Vec::new(),
                subselect: query.clone(),
                location: *location,
            };
            let kind = pstate.expr_kind();
            let array = transform_expr(pstate, &sublink, kind)?;
            make_json_constructor(
                pstate,
                JsonConstructorType::ArrayQuery,
                vec![array],
                output.as_ref(),
                *absent_on_null,
                false,
                *location,
            )
        }
        RawExpr::JsonParseExpr {
            expr,
            output,
            unique_keys,
            location,
        } => {
            let arg = transform_json_value_expr(pstate, expr, JSONOID)?;
            let argtype = expr_type(&arg);
            let catalog = pstate.catalog;
            if !is_string_like(catalog, argtype) && !matches!(argtype, JSONOID | JSONBOID | BYTEAOID) {
                return Err(PgError::new(
                    SqlState::DatatypeMismatch,
                    format!("cannot use type {} as the argument of JSON()", catalog.format_type(argtype)),
                )
                .at(expr_location(&arg)));
            }
            make_json_constructor(
                pstate,
                JsonConstructorType::Parse,
                vec![arg],
                output.as_ref(),
                false,
                *unique_keys,
                *location,
            )
        }
        RawExpr::JsonScalarExpr { expr, output, location } => {
            let kind = pstate.expr_kind();
            let arg = transform_expr(pstate, expr, kind)?;
            let arg = resolve_unknown_to_text(pstate, arg)?;
            make_json_constructor(
                pstate,
                JsonConstructorType::Scalar,
                vec![arg],
                output.as_ref(),
                false,
                false,
                *location,
            )
        }
        RawExpr::JsonSerializeExpr { expr, output, location } => {
            let arg = transform_json_value_expr(pstate, expr, JSONOID)?;
            let catalog = pstate.catalog;
            let argtype = expr_type(&arg);
            let arg = if is_string_like(catalog, argtype) {
                coerce_or_cast_error(catalog, arg, JSONOID, -1)?
            } else if matches!(argtype, JSONOID | JSONBOID) {
                arg
            } else {
                return Err(PgError::new(
                    SqlState::DatatypeMismatch,
                    format!("cannot use type {} in JSON_SERIALIZE()", catalog.format_type(argtype)),
                )
                .at(expr_location(&arg)));
            };
            if let Some(output) = output {
                let (typid, _) = typename_type_id_and_mod(catalog, &output.type_name)?;
                if typid != BYTEAOID && !is_string_like(catalog, typid) {
                    return Err(PgError::new(
                        SqlState::DatatypeMismatch,
                        format!("cannot use RETURNING type {} in JSON_SERIALIZE()", catalog.format_type(typid)),
                    )
                    .with_hint("Try returning a string type or bytea.")
                    .at(*location));
                }
            }
            make_json_constructor(
                pstate,
                JsonConstructorType::Serialize,
                vec![arg],
                output.as_ref(),
                false,
                false,
                *location,
            )
        }
        RawExpr::JsonIsPredicate {
            expr,
            format,
            item_type,
            unique_keys,
            location,
        } => {
            let kind = pstate.expr_kind();
            let arg = transform_expr(pstate, expr, kind)?;
            let arg = resolve_unknown_to_text(pstate, arg)?;
            let argtype = expr_type(&arg);
            let catalog = pstate.catalog;
            if !is_string_like(catalog, argtype) && !matches!(argtype, JSONOID | JSONBOID | BYTEAOID) {
                return Err(PgError::new(
                    SqlState::DatatypeMismatch,
                    format!("cannot use type {} in IS JSON predicate", catalog.format_type(argtype)),
                )
                .at(expr_location(&arg)));
            }
            Ok(Expr::JsonIsPredicate(Box::new(JsonIsPredicate {
                expr: arg,
                format: format.clone(),
                item_type: *item_type,
                unique_keys: *unique_keys,
                location: (*location).into(),
            })))
        }
        RawExpr::JsonFuncExpr(func) => {
            let func_name = json_func_name(func.op);
            if func.op == JsonExprOp::Value && matches!(func.wrapper, JsonWrapper::Conditional | JsonWrapper::Unconditional)
            {
                return Err(PgError::new(SqlState::SyntaxError, "cannot use WITH WRAPPER clause with JSON_VALUE()")
                    .at(func.location));
            }
            if matches!(func.wrapper, JsonWrapper::Conditional | JsonWrapper::Unconditional)
                && func.quotes != JsonQuotes::Unspec
            {
                return Err(PgError::new(
                    SqlState::SyntaxError,
                    "SQL/JSON QUOTES behavior must not be specified when WITH WRAPPER is used",
                )
                .at(func.location));
            }
            let formatted_expr = transform_json_context_item(pstate, &func.context_item, func_name)?;
            let path_spec = transform_json_path(pstate, &func.pathspec)?;
            let (passing_names, passing_values) = transform_json_passing(pstate, &func.passing)?;
            let returning = transform_json_func_returning(pstate, func.op, func.output.as_ref(), func.location)?;
            let on_empty = match func.op {
                JsonExprOp::Exists => None,
                _ => Some(transform_json_behavior(
                    pstate,
                    func.on_empty.as_ref(),
                    JsonBehaviorType::Null,
                    func.op,
                    BehaviorClause::OnEmpty,
                    func_name,
                    &returning,
                )?),
            };
            let on_error = transform_json_behavior(
                pstate,
                func.on_error.as_ref(),
                default_on_error(func.op),
                func.op,
                BehaviorClause::OnError,
                func_name,
                &returning,
            )?;
            Ok(make_json_expr(JsonExprParts {
                op: func.op,
                column_name: func.column_name.clone(),
                formatted_expr,
                path_spec,
                returning,
                passing_names,
                passing_values,
                on_empty,
                on_error,
                wrapper: func.wrapper,
                quotes: func.quotes,
                location: func.location,
            }))
        }
        other => Err(elog(format!("unexpected SQL/JSON node {other:?}"))),
    }
}

fn json_func_name(op: JsonExprOp) -> &'static str {
    match op {
        JsonExprOp::Exists => "JSON_EXISTS",
        JsonExprOp::Query => "JSON_QUERY",
        JsonExprOp::Value => "JSON_VALUE",
        JsonExprOp::Table => "JSON_TABLE",
    }
}

pub fn default_on_error(op: JsonExprOp) -> JsonBehaviorType {
    match op {
        JsonExprOp::Exists => JsonBehaviorType::False,
        JsonExprOp::Table => JsonBehaviorType::Empty,
        JsonExprOp::Query | JsonExprOp::Value => JsonBehaviorType::Null,
    }
}

fn is_string_like(catalog: &Catalog, typid: Oid) -> bool {
    typid == UNKNOWNOID || catalog.type_category(catalog.base_type(typid)) == TypeCategory::String
}

fn coerce_or_cast_error(catalog: &Catalog, expr: Expr, target: Oid, typmod: i32) -> PgResult<Expr> {
    let source = expr_type(&expr);
    let location = expr_location(&expr);
    coerce_to_target_type(
        catalog,
        expr,
        source,
        target,
        typmod,
        CoercionContext::Explicit,
        CoercionForm::ImplicitCast,
        location,
    )?
    .ok_or_else(|| {
        PgError::new(
            SqlState::CannotCoerce,
            format!("cannot cast type {} to {}", catalog.format_type(source), catalog.format_type(target)),
        )
        .at(location)
    })
}

/// A value argument with an optional FORMAT clause. String input marked
/// `FORMAT JSON` is parsed as `json_target` (json or jsonb); anything else
/// is passed through as a plain SQL value.
pub fn transform_json_value_expr(
    pstate: &mut ParseState<'_>,
    value: &JsonValueExpr,
    json_target: Oid,
) -> PgResult<Expr> {
    let kind = pstate.expr_kind();
    let expr = transform_expr(pstate, &value.raw_expr, kind)?;
    let expr = resolve_unknown_to_text(pstate, expr)?;
    let Some(format) = &value.format else {
        return Ok(expr);
    };
    let catalog = pstate.catalog;
    let typid = expr_type(&expr);
    let location = format.location.get().or_else(|| expr_location(&expr));
    if format.encoding != JsonEncoding::Default && typid != BYTEAOID {
        return Err(PgError::new(
            SqlState::DatatypeMismatch,
            "JSON ENCODING clause is only allowed for bytea input type",
        )
        .at(location));
    }
    if matches!(typid, JSONOID | JSONBOID) {
        return Ok(expr);
    }
    if typid == BYTEAOID {
        return Err(PgError::new(
            SqlState::FeatureNotSupported,
            "FORMAT JSON is not supported for bytea input",
        )
        .at(location));
    }
    if !is_string_like(catalog, typid) {
        return Err(PgError::new(
            SqlState::DatatypeMismatch,
            "cannot use non-string types with explicit FORMAT JSON clause",
        )
        .at(location));
    }
    let target = if format.format_type == JsonFormatType::Jsonb { JSONBOID } else { json_target };
    coerce_or_cast_error(catalog, expr, target, -1)
}

/// RETURNING clause of a constructor; json unless stated otherwise.
fn transform_json_output(
    catalog: &Catalog,
    output: Option<&JsonOutput>,
    default_type: Oid,
    location: Option<usize>,
) -> PgResult<JsonReturning> {
    let Some(output) = output else {
        return Ok(JsonReturning {
            format: format_for_type(default_type, None),
            typid: default_type,
            typmod: -1,
        });
    };
    let (typid, typmod) = typename_type_id_and_mod(catalog, &output.type_name)?;
    if let Some(format) = &output.format {
        let location = format.location.get().or(location);
        if format.encoding != JsonEncoding::Default && typid != BYTEAOID {
            return Err(PgError::new(
                SqlState::DatatypeMismatch,
                "cannot set JSON encoding for non-bytea output types",
            )
            .at(location));
        }
        if !matches!(format.encoding, JsonEncoding::Default | JsonEncoding::Utf8) {
            return Err(PgError::new(SqlState::FeatureNotSupported, "unsupported JSON encoding")
                .with_hint("Only UTF8 JSON encoding is supported.")
                .at(location));
        }
        if !matches!(typid, JSONOID | JSONBOID | BYTEAOID) && !is_string_like(catalog, typid) {
            return Err(PgError::new(
                SqlState::DatatypeMismatch,
                "cannot use JSON format with non-string output types",
            )
            .at(location));
        }
    }
    Ok(JsonReturning {
        format: format_for_type(typid, output.format.as_ref()),
        typid,
        typmod,
    })
}

fn format_for_type(typid: Oid, explicit: Option<&JsonFormat>) -> JsonFormat {
    let format_type = match (typid, explicit) {
        (JSONBOID, _) => JsonFormatType::Jsonb,
        (JSONOID, _) => JsonFormatType::Json,
        (_, Some(format)) => format.format_type,
        (_, None) => JsonFormatType::Default,
    };
    JsonFormat {
        format_type,
        encoding: explicit.map_or(JsonEncoding::Default, |f| f.encoding),
        location: explicit.map_or(Location(None), |f| f.location),
    }
}

fn make_json_constructor(
    pstate: &mut ParseState<'_>,
    ctor_type: JsonConstructorType,
    args: Vec<Expr>,
    output: Option<&JsonOutput>,
    absent_on_null: bool,
    unique: bool,
    location: Option<usize>,
) -> PgResult<Expr> {
    let catalog = pstate.catalog;
    let default_type = if ctor_type == JsonConstructorType::Serialize { TEXTOID } else { JSONOID };
    let returning = transform_json_output(catalog, output, default_type, location)?;
    let mut ctor = JsonConstructorExpr {
        ctor_type,
        args,
        coercion: None,
        returning,
        absent_on_null,
        unique,
        location: location.into(),
    };
    let produced = ctor.produced_type();
    let target = ctor.returning.typid;
    let needs_coercion = target != BYTEAOID && (target != produced || ctor.returning.typmod >= 0);
    if needs_coercion {
        let placeholder = Expr::CaseTestExpr(CaseTestExpr {
            type_id: produced,
            type_mod: -1,
            collation: INVALID_OID,
        });
        ctor.coercion = Some(coerce_or_cast_error(catalog, placeholder, target, ctor.returning.typmod)?);
    }
    trace!(?ctor_type, returning = target, "json constructor");
    Ok(Expr::JsonConstructorExpr(Box::new(ctor)))
}

/// Context item of a query function: jsonb, or a string parsed as jsonb.
pub fn transform_json_context_item(
    pstate: &mut ParseState<'_>,
    value: &JsonValueExpr,
    func_name: &str,
) -> PgResult<Expr> {
    let expr = transform_json_value_expr(pstate, value, JSONBOID)?;
    let catalog = pstate.catalog;
    match catalog.base_type(expr_type(&expr)) {
        JSONBOID => Ok(expr),
        JSONOID => Err(PgError::new(
            SqlState::FeatureNotSupported,
            format!("{func_name}() is not yet implemented for the json type"),
        )
        .with_hint("Try casting the argument to jsonb")
        .at(expr_location(&expr))),
        _ => coerce_or_cast_error(catalog, expr, JSONBOID, -1),
    }
}

pub fn transform_json_path(pstate: &mut ParseState<'_>, raw: &RawExpr) -> PgResult<Expr> {
    let kind = pstate.expr_kind();
    let expr = transform_expr(pstate, raw, kind)?;
    let source = expr_type(&expr);
    let location = expr_location(&expr);
    let catalog = pstate.catalog;
    coerce_to_target_type(
        catalog,
        expr,
        source,
        JSONPATHOID,
        -1,
        CoercionContext::Implicit,
        CoercionForm::ImplicitCast,
        location,
    )?
    .ok_or_else(|| {
        PgError::new(
            SqlState::DatatypeMismatch,
            format!(
                "JSON path expression must be of type jsonpath, not of type {}",
                catalog.format_type(source)
            ),
        )
        .at(location)
    })
}

pub fn transform_json_passing(
    pstate: &mut ParseState<'_>,
    passing: &[JsonArgument],
) -> PgResult<(Vec<String>, Vec<Expr>)> {
    let mut names = Vec::with_capacity(passing.len());
    let mut values = Vec::with_capacity(passing.len());
    for arg in passing {
        names.push(arg.name.clone());
        values.push(transform_json_value_expr(pstate, &arg.value, JSONBOID)?);
    }
    Ok((names, values))
}

/// RETURNING of a query function: boolean for EXISTS, text for VALUE and
/// jsonb for QUERY unless stated otherwise.
pub fn transform_json_func_returning(
    pstate: &ParseState<'_>,
    op: JsonExprOp,
    output: Option<&JsonOutput>,
    location: Option<usize>,
) -> PgResult<JsonReturning> {
    let default_type = match op {
        JsonExprOp::Exists => BOOLOID,
        JsonExprOp::Value => TEXTOID,
        JsonExprOp::Query | JsonExprOp::Table => JSONBOID,
    };
    let mut returning = transform_json_output(pstate.catalog, output, default_type, location)?;
    if op == JsonExprOp::Query && returning.format.format_type == JsonFormatType::Default {
        returning.format.format_type = JsonFormatType::Json;
    }
    Ok(returning)
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum BehaviorClause {
    OnEmpty,
    OnError,
}

impl BehaviorClause {
    fn name(self) -> &'static str {
        match self {
            Self::OnEmpty => "ON EMPTY",
            Self::OnError => "ON ERROR",
        }
    }
}

fn allowed_behaviors(op: JsonExprOp) -> (&'static [JsonBehaviorType], &'static str) {
    use JsonBehaviorType as B;
    match op {
        JsonExprOp::Exists => (&[B::Error, B::True, B::False, B::Unknown], "ERROR, TRUE, FALSE, or UNKNOWN"),
        JsonExprOp::Query => (
            &[B::Error, B::Null, B::Empty, B::EmptyArray, B::EmptyObject, B::Default],
            "ERROR, NULL, EMPTY ARRAY, EMPTY OBJECT, or DEFAULT expression",
        ),
        JsonExprOp::Value => (&[B::Error, B::Null, B::Default], "ERROR, NULL, or DEFAULT expression"),
        JsonExprOp::Table => (&[B::Error, B::Empty, B::EmptyArray], "EMPTY [ ARRAY ] or ERROR"),
    }
}

/// Validate an ON EMPTY / ON ERROR clause for `op` and transform a DEFAULT
/// expression to the RETURNING type. `context` names the construct in the
/// error detail.
pub fn transform_json_behavior(
    pstate: &mut ParseState<'_>,
    behavior: Option<&RawJsonBehavior>,
    default: JsonBehaviorType,
    op: JsonExprOp,
    clause: BehaviorClause,
    context: &str,
    returning: &JsonReturning,
) -> PgResult<JsonBehavior> {
    let Some(behavior) = behavior else {
        return Ok(JsonBehavior {
            btype: default,
            expr: None,
            location: Location(None),
        });
    };
    let (allowed, listing) = allowed_behaviors(op);
    if !allowed.contains(&behavior.btype) {
        let detail = if op == JsonExprOp::Table {
            format!("Only {listing} is allowed in the top-level ON ERROR clause.")
        } else if context == "JSON_TABLE" {
            format!("Only {listing} is allowed in {} for JSON_TABLE columns.", clause.name())
        } else {
            format!("Only {listing} is allowed in {} for {context}().", clause.name())
        };
        return Err(PgError::new(SqlState::SyntaxError, format!("invalid {} behavior", clause.name()))
            .with_detail(detail)
            .at(behavior.location));
    }
    let btype = match behavior.btype {
        JsonBehaviorType::Empty if op == JsonExprOp::Query => JsonBehaviorType::EmptyArray,
        other => other,
    };
    let expr = match (&behavior.expr, btype) {
        (Some(raw), JsonBehaviorType::Default) => Some(transform_behavior_default(pstate, raw, returning)?),
        _ => None,
    };
    Ok(JsonBehavior {
        btype,
        expr,
        location: behavior.location.into(),
    })
}

fn transform_behavior_default(
    pstate: &mut ParseState<'_>,
    raw: &RawExpr,
    returning: &JsonReturning,
) -> PgResult<Expr> {
    let kind = pstate.expr_kind();
    let expr = transform_expr(pstate, raw, kind)?;
    let location = expr_location(&expr);
    let disallowed = expr_contains(&expr, &mut |node| {
        matches!(
            node,
            Expr::Var(_) | Expr::Aggref(_) | Expr::GroupingFunc(_) | Expr::SubLink(_)
        )
    }) || contain_window_function(&expr);
    if disallowed {
        return Err(PgError::new(
            SqlState::DatatypeMismatch,
            "can only specify a constant, non-aggregate function, or operator expression for DEFAULT",
        )
        .at(location));
    }
    if expression_returns_set(&expr) {
        return Err(PgError::new(SqlState::DatatypeMismatch, "DEFAULT expression must not return a set")
            .at(location));
    }
    let catalog = pstate.catalog;
    let source = expr_type(&expr);
    if source == returning.typid && expr_typmod(&expr) == returning.typmod {
        return Ok(expr);
    }
    coerce_to_target_type(
        catalog,
        expr,
        source,
        returning.typid,
        returning.typmod,
        CoercionContext::Explicit,
        CoercionForm::ImplicitCast,
        location,
    )?
    .ok_or_else(|| {
        PgError::new(
            SqlState::CannotCoerce,
            format!(
                "cannot cast behavior expression of type {} to {}",
                catalog.format_type(source),
                catalog.format_type(returning.typid)
            ),
        )
        .at(location)
    })
}

/// Pieces of a JSON_EXISTS / JSON_VALUE / JSON_QUERY call (or JSON_TABLE
/// column) after transformation.
pub struct JsonExprParts {
    pub op: JsonExprOp,
    pub column_name: Option<String>,
    pub formatted_expr: Expr,
    pub path_spec: Expr,
    pub returning: JsonReturning,
    pub passing_names: Vec<String>,
    pub passing_values: Vec<Expr>,
    pub on_empty: Option<JsonBehavior>,
    pub on_error: JsonBehavior,
    pub wrapper: JsonWrapper,
    pub quotes: JsonQuotes,
    pub location: Option<usize>,
}

/// Assemble a JsonExpr, choosing how its result reaches the RETURNING type.
pub fn make_json_expr(parts: JsonExprParts) -> Expr {
    let typid = parts.returning.typid;
    let use_json_coercion = matches!(typid, JSONOID | JSONBOID);
    let use_io_coercion = !use_json_coercion
        && match parts.op {
            JsonExprOp::Exists => typid != BOOLOID,
            JsonExprOp::Value => typid != TEXTOID || parts.returning.typmod >= 0,
            JsonExprOp::Query | JsonExprOp::Table => true,
        };
    let omit_quotes = match parts.op {
        JsonExprOp::Value => true,
        _ => parts.quotes == JsonQuotes::Omit,
    };
    let format = parts.returning.format.clone();
    Expr::JsonExpr(Box::new(JsonExpr {
        op: parts.op,
        column_name: parts.column_name,
        formatted_expr: parts.formatted_expr,
        format,
        path_spec: parts.path_spec,
        returning: parts.returning,
        passing_names: parts.passing_names,
        passing_values: parts.passing_values,
        on_empty: parts.on_empty,
        on_error: parts.on_error,
        use_io_coercion,
        use_json_coercion,
        wrapper: parts.wrapper,
        omit_quotes,
        collation: INVALID_OID,
        location: parts.location.into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::gram::parse_expression;
    use crate::parser::parse_node::ParseExprKind;

    fn analyze(text: &str) -> PgResult<Expr> {
        let catalog = Catalog::default();
        let mut pstate = ParseState::new(&catalog, text);
        let raw = parse_expression(text)?;
        transform_expr(&mut pstate, &raw, ParseExprKind::SelectTarget)
    }

    #[test]
    fn constructor_returning_text_gets_coercion() {
        let Expr::JsonConstructorExpr(ctor) = analyze("JSON_OBJECT('a' : 1 RETURNING text)").unwrap() else {
            panic!("expected a constructor");
        };
        assert_eq!(ctor.returning.typid, TEXTOID);
        assert_eq!(ctor.produced_type(), JSONOID);
        assert!(ctor.coercion.is_some());
        assert_eq!(ctor.args.len(), 2);

        let Expr::JsonConstructorExpr(ctor) = analyze("JSON_ARRAY(1, 2 RETURNING jsonb)").unwrap() else {
            panic!("expected a constructor");
        };
        assert_eq!(ctor.produced_type(), JSONBOID);
        assert!(ctor.coercion.is_none());
    }

    #[test]
    fn query_functions_default_returning_types() {
        for (text, typid) in [
            ("JSON_EXISTS(jsonb '{\"a\":1}', '$.a')", BOOLOID),
            ("JSON_VALUE(jsonb '{\"a\":1}', '$.a')", TEXTOID),
            ("JSON_QUERY(jsonb '{\"a\":1}', '$.a')", JSONBOID),
        ] {
            assert_eq!(expr_type(&analyze(text).unwrap()), typid, "{text}");
        }
    }

    #[test]
    fn behaviors_are_checked_per_function() {
        let err = analyze("JSON_VALUE(jsonb '1', '$' EMPTY ARRAY ON ERROR)").unwrap_err();
        assert_eq!(err.message, "invalid ON ERROR behavior");
        assert_eq!(
            err.detail.as_deref(),
            Some("Only ERROR, NULL, or DEFAULT expression is allowed in ON ERROR for JSON_VALUE().")
        );
        let Expr::JsonExpr(je) = analyze("JSON_VALUE(jsonb '1', '$' RETURNING int DEFAULT '7' ON EMPTY)").unwrap()
        else {
            panic!("expected JsonExpr");
        };
        let on_empty = je.on_empty.unwrap();
        assert_eq!(on_empty.btype, JsonBehaviorType::Default);
        assert_eq!(on_empty.expr.as_ref().map(expr_type), Some(crate::catalog::pg_type::INT4OID));
        assert!(je.use_io_coercion);
    }

    #[test]
    fn json_context_item_must_be_jsonb() {
        let err = analyze("JSON_QUERY(json '[1]', '$')").unwrap_err();
        assert_eq!(err.message, "JSON_QUERY() is not yet implemented for the json type");
        assert!(analyze("JSON_QUERY('[1]', '$')").is_ok());
    }

    #[test]
    fn is_json_rejects_non_string_input() {
        let err = analyze("1 IS JSON").unwrap_err();
        assert_eq!(err.message, "cannot use type integer in IS JSON predicate");
        assert!(analyze("'{}' IS JSON OBJECT").is_ok());
    }
}
