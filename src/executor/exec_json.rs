//! SQL/JSON constructors, the IS JSON predicate and the JSON_EXISTS,
//! JSON_VALUE and JSON_QUERY query functions.

use serde_json::{Map, Value};
use tracing::trace;

use crate::catalog::pg_type::{BOOLOID, BYTEAOID, JSONBOID, JSONOID, TEXTOID};
use crate::nodes::datum::Datum;
use crate::nodes::primnodes::{
    Expr, JsonBehavior, JsonBehaviorType, JsonConstructorExpr, JsonConstructorType, JsonExpr, JsonExprOp,
    JsonIsPredicate, JsonValueType, JsonWrapper,
};
use crate::utils::adt::io::datum_in;
use crate::utils::adt::json::{
    JsonItemKind, build_json_array, build_json_object, datum_to_json_text, datum_to_jsonb, json_has_unique_keys,
    json_parse, jsonb_normalize, jsonb_to_text, text_is_json, value_is_kind,
};
use crate::utils::adt::jsonpath::{JsonPath, execute_jsonpath, parse_jsonpath};
use crate::utils::elog::{PgError, PgResult, SqlState, elog};

use super::exec_expr::{eval_args, exec_eval_expr};
use super::exec_utils::{EState, ExprContext};

pub fn eval_json_constructor(
    jc: &JsonConstructorExpr,
    ctx: &ExprContext<'_>,
    estate: &mut EState,
) -> PgResult<Datum> {
    let args = eval_args(&jc.args, ctx, estate)?;
    let jsonb = jc.produced_type() == JSONBOID;
    let catalog = estate.catalog.clone();
    let value = match jc.ctor_type {
        JsonConstructorType::Object => {
            let pairs: Vec<(Datum, Datum)> = args
                .chunks(2)
                .map(|pair| (pair[0].clone(), pair.get(1).cloned().unwrap_or(Datum::Null)))
                .collect();
            build_json_object(&catalog, &pairs, jc.absent_on_null, jc.unique, jsonb)?
        }
        JsonConstructorType::Array => build_json_array(&catalog, &args, jc.absent_on_null, jsonb)?,
        JsonConstructorType::ArrayQuery => {
            let elements = args
                .first()
                .and_then(Datum::as_array)
                .map(|array| array.elements.clone())
                .unwrap_or_default();
            build_json_array(&catalog, &elements, jc.absent_on_null, jsonb)?
        }
        JsonConstructorType::Parse => match args.first() {
            None | Some(Datum::Null) => Datum::Null,
            Some(arg) => parse_json_input(arg, jc.unique, jsonb)?,
        },
        JsonConstructorType::Scalar => match args.first() {
            None | Some(Datum::Null) => Datum::Null,
            Some(arg) if jsonb => Datum::Jsonb(datum_to_jsonb(&catalog, arg)?),
            Some(arg) => Datum::Json(datum_to_json_text(&catalog, arg)?),
        },
        JsonConstructorType::Serialize => match args.first() {
            None | Some(Datum::Null) => Datum::Null,
            Some(arg) => {
                let text = json_text_of(arg)?;
                if jc.returning.typid == BYTEAOID {
                    Datum::Bytea(text.into_bytes())
                } else {
                    Datum::Text(text)
                }
            }
        },
    };
    match &jc.coercion {
        Some(coercion) if !value.is_null() => exec_eval_expr(coercion, &ctx.with_case_value(&value), estate),
        _ => Ok(value),
    }
}

fn json_text_of(value: &Datum) -> PgResult<String> {
    match value {
        Datum::Json(text) | Datum::Text(text) => Ok(text.clone()),
        Datum::Jsonb(v) => Ok(jsonb_to_text(v)),
        Datum::Bytea(bytes) => String::from_utf8(bytes.clone())
            .map_err(|_| PgError::new(SqlState::CharacterNotInRepertoire, "invalid byte sequence for encoding \"UTF8\"")),
        other => Err(elog(format!("expected a json or string value, found {other:?}"))),
    }
}

fn parse_json_input(arg: &Datum, unique: bool, jsonb: bool) -> PgResult<Datum> {
    let text = json_text_of(arg)?;
    let value = json_parse(&text)?;
    if unique && !json_has_unique_keys(&text) {
        return Err(PgError::new(
            SqlState::DuplicateJsonObjectKeyValue,
            "duplicate JSON object key value",
        ));
    }
    Ok(if jsonb { Datum::Jsonb(jsonb_normalize(value)) } else { Datum::Json(text) })
}

pub fn eval_json_is_predicate(
    pred: &JsonIsPredicate,
    ctx: &ExprContext<'_>,
    estate: &mut EState,
) -> PgResult<Datum> {
    let kind = match pred.item_type {
        JsonValueType::Any => JsonItemKind::Any,
        JsonValueType::Object => JsonItemKind::Object,
        JsonValueType::Array => JsonItemKind::Array,
        JsonValueType::Scalar => JsonItemKind::Scalar,
    };
    let result = match exec_eval_expr(&pred.expr, ctx, estate)? {
        Datum::Null => return Ok(Datum::Null),
        // jsonb cannot hold duplicate keys.
        Datum::Jsonb(v) => value_is_kind(&v, kind),
        Datum::Json(text) | Datum::Text(text) => text_is_json(&text, kind, pred.unique_keys),
        Datum::Bytea(bytes) => {
            std::str::from_utf8(&bytes).is_ok_and(|text| text_is_json(text, kind, pred.unique_keys))
        }
        other => return Err(elog(format!("IS JSON applied to non-string value {other:?}"))),
    };
    Ok(Datum::Bool(result))
}

/// Parsed path of a query function or JSON_TABLE row pattern.
pub(crate) fn path_of(value: &Datum) -> PgResult<JsonPath> {
    match value {
        Datum::JsonPath(text) | Datum::Text(text) => parse_jsonpath(text),
        other => Err(elog(format!("expected a jsonpath value, found {other:?}"))),
    }
}

/// The PASSING clause as jsonpath variables.
pub(crate) fn passing_vars(
    names: &[String],
    values: &[Expr],
    ctx: &ExprContext<'_>,
    estate: &mut EState,
) -> PgResult<Map<String, Value>> {
    let mut vars = Map::new();
    for (name, expr) in names.iter().zip(values) {
        let value = exec_eval_expr(expr, ctx, estate)?;
        vars.insert(name.clone(), datum_to_jsonb(&estate.catalog, &value)?);
    }
    Ok(vars)
}

/// A context item as a jsonb value.
pub(crate) fn context_item(value: &Datum) -> PgResult<Value> {
    match value {
        Datum::Jsonb(v) => Ok(v.clone()),
        Datum::Json(text) | Datum::Text(text) => json_parse(text).map(jsonb_normalize),
        other => Err(elog(format!("expected a jsonb context item, found {other:?}"))),
    }
}

/// Errors an ON ERROR clause may absorb; cancellation always propagates.
pub(crate) fn is_soft_error(err: &PgError) -> bool {
    !matches!(err.sqlstate, SqlState::QueryCanceled | SqlState::StatementTooComplex)
}

enum PathOutcome {
    Value(Datum),
    Empty,
}

pub fn eval_json_expr(je: &JsonExpr, ctx: &ExprContext<'_>, estate: &mut EState) -> PgResult<Datum> {
    let context = exec_eval_expr(&je.formatted_expr, ctx, estate)?;
    let path = exec_eval_expr(&je.path_spec, ctx, estate)?;
    if context.is_null() || path.is_null() {
        return Ok(Datum::Null);
    }
    let vars = passing_vars(&je.passing_names, &je.passing_values, ctx, estate)?;
    let outcome = context_item(&context)
        .and_then(|target| path_of(&path).map(|path| (target, path)))
        .and_then(|(target, path)| eval_path_function(je, &target, &path, &vars, estate));
    match outcome {
        Ok(PathOutcome::Value(value)) => Ok(value),
        Ok(PathOutcome::Empty) => {
            let on_empty = je.on_empty.as_ref();
            match on_empty.map(|b| b.btype) {
                Some(JsonBehaviorType::Error) => Err(no_item_error(je)),
                _ => match on_empty {
                    Some(behavior) => behavior_value(je, behavior, ctx, estate),
                    None => Ok(Datum::Null),
                },
            }
        }
        Err(err) if je.on_error.btype != JsonBehaviorType::Error && is_soft_error(&err) => {
            trace!(sqlstate = err.code(), "SQL/JSON error absorbed by ON ERROR");
            behavior_value(je, &je.on_error, ctx, estate)
        }
        Err(err) => Err(err),
    }
}

fn column_suffix(je: &JsonExpr) -> String {
    je.column_name
        .as_ref()
        .map(|name| format!(" of column \"{name}\""))
        .unwrap_or_default()
}

fn no_item_error(je: &JsonExpr) -> PgError {
    PgError::new(
        SqlState::NoSqlJsonItem,
        format!("no SQL/JSON item found for specified path{}", column_suffix(je)),
    )
}

fn eval_path_function(
    je: &JsonExpr,
    target: &Value,
    path: &JsonPath,
    vars: &Map<String, Value>,
    estate: &EState,
) -> PgResult<PathOutcome> {
    let items = execute_jsonpath(path, target, vars, false)?.unwrap_or_default();
    match je.op {
        JsonExprOp::Exists => {
            let exists = !items.is_empty();
            if je.returning.typid == BOOLOID || !je.use_io_coercion {
                return Ok(PathOutcome::Value(Datum::Bool(exists)));
            }
            let text = if exists { "true" } else { "false" };
            datum_in(&estate.catalog, je.returning.typid, je.returning.typmod, text).map(PathOutcome::Value)
        }
        JsonExprOp::Value => {
            if items.len() > 1 {
                return Err(PgError::new(
                    SqlState::MoreThanOneSqlJsonItem,
                    format!("JSON path expression{} in JSON_VALUE should return single scalar item", column_suffix_in(je)),
                ));
            }
            let Some(item) = items.into_iter().next() else {
                return Ok(PathOutcome::Empty);
            };
            match item {
                Value::Null => Ok(PathOutcome::Value(Datum::Null)),
                Value::Array(_) | Value::Object(_) => Err(PgError::new(
                    SqlState::SqlJsonScalarRequired,
                    format!("JSON path expression{} in JSON_VALUE should return single scalar item", column_suffix_in(je)),
                )),
                scalar => coerce_scalar(je, scalar, estate).map(PathOutcome::Value),
            }
        }
        JsonExprOp::Query | JsonExprOp::Table => {
            let wrap = match je.wrapper {
                JsonWrapper::Unconditional => true,
                JsonWrapper::Conditional => {
                    items.len() > 1 || items.first().is_some_and(|v| !v.is_array() && !v.is_object())
                }
                JsonWrapper::None | JsonWrapper::Unspec => false,
            };
            if wrap {
                return coerce_query_result(je, Value::Array(items), estate).map(PathOutcome::Value);
            }
            let mut items = items.into_iter();
            match (items.next(), items.next()) {
                (None, _) => Ok(PathOutcome::Empty),
                (Some(item), None) => coerce_query_result(je, item, estate).map(PathOutcome::Value),
                (Some(_), Some(_)) => Err(PgError::new(
                    SqlState::MoreThanOneSqlJsonItem,
                    format!(
                        "JSON path expression{} in JSON_QUERY should return single item without wrapper",
                        column_suffix_in(je)
                    ),
                )
                .with_hint("Use the WITH WRAPPER clause to wrap SQL/JSON items into an array.")),
            }
        }
    }
}

fn column_suffix_in(je: &JsonExpr) -> String {
    je.column_name
        .as_ref()
        .map(|name| format!(" for column \"{name}\""))
        .unwrap_or_default()
}

/// Convert a JSON_VALUE scalar to the RETURNING type.
fn coerce_scalar(je: &JsonExpr, item: Value, estate: &EState) -> PgResult<Datum> {
    let typid = je.returning.typid;
    if je.use_json_coercion {
        return Ok(match typid {
            JSONBOID => Datum::Jsonb(item),
            _ => Datum::Json(jsonb_to_text(&item)),
        });
    }
    let text = match item {
        Value::String(s) => s,
        other => jsonb_to_text(&other),
    };
    if typid == TEXTOID && !je.use_io_coercion {
        return Ok(Datum::Text(text));
    }
    datum_in(&estate.catalog, typid, je.returning.typmod, &text)
}

/// Convert a JSON_QUERY item to the RETURNING type.
fn coerce_query_result(je: &JsonExpr, item: Value, estate: &EState) -> PgResult<Datum> {
    let typid = je.returning.typid;
    let unquoted = match (&item, je.omit_quotes) {
        (Value::String(s), true) => Some(s.clone()),
        _ => None,
    };
    if je.use_json_coercion {
        let item = match unquoted {
            Some(text) => json_parse(&text)?,
            None => item,
        };
        return Ok(match typid {
            JSONBOID => Datum::Jsonb(jsonb_normalize(item)),
            _ => Datum::Json(jsonb_to_text(&item)),
        });
    }
    let text = unquoted.unwrap_or_else(|| jsonb_to_text(&item));
    datum_in(&estate.catalog, typid, je.returning.typmod, &text)
}

fn behavior_value(
    je: &JsonExpr,
    behavior: &JsonBehavior,
    ctx: &ExprContext<'_>,
    estate: &mut EState,
) -> PgResult<Datum> {
    let typid = je.returning.typid;
    let literal = |text: &str, estate: &EState| -> PgResult<Datum> {
        match typid {
            JSONBOID => json_parse(text).map(Datum::Jsonb),
            JSONOID => Ok(Datum::Json(text.to_string())),
            _ => datum_in(&estate.catalog, typid, je.returning.typmod, text),
        }
    };
    match behavior.btype {
        JsonBehaviorType::Null | JsonBehaviorType::Unknown => Ok(Datum::Null),
        JsonBehaviorType::Error => Err(elog("ERROR behavior has no value")),
        JsonBehaviorType::Empty | JsonBehaviorType::EmptyArray => literal("[]", estate),
        JsonBehaviorType::EmptyObject => literal("{}", estate),
        JsonBehaviorType::True | JsonBehaviorType::False => {
            let value = behavior.btype == JsonBehaviorType::True;
            if typid == BOOLOID || je.op == JsonExprOp::Exists && !je.use_io_coercion {
                Ok(Datum::Bool(value))
            } else {
                literal(if value { "true" } else { "false" }, estate)
            }
        }
        JsonBehaviorType::Default => match &behavior.expr {
            Some(expr) => exec_eval_expr(expr, ctx, estate),
            None => Ok(Datum::Null),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::catalog::Catalog;
    use crate::catalog::pg_type::{INT4OID, JSONPATHOID};
    use crate::nodes::makefuncs::make_const;
    use crate::nodes::parsenodes::CmdType;
    use crate::nodes::params::ParamListInfo;
    use crate::nodes::plannodes::PlannedStmt;
    use crate::nodes::primnodes::{JsonFormat, JsonReturning, Location};

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

    fn behavior(btype: JsonBehaviorType) -> JsonBehavior {
        JsonBehavior {
            btype,
            expr: None,
            location: Location(None),
        }
    }

    fn json_value(doc: &str, path: &str, typid: u32, on_error: JsonBehaviorType) -> PgResult<Datum> {
        let je = JsonExpr {
            op: JsonExprOp::Value,
            column_name: None,
            formatted_expr: make_const(JSONBOID, Datum::Jsonb(json_parse(doc).unwrap())),
            format: JsonFormat::default_format(),
            path_spec: make_const(JSONPATHOID, Datum::JsonPath(path.to_string())),
            returning: JsonReturning {
                format: JsonFormat::default_format(),
                typid,
                typmod: -1,
            },
            passing_names: Vec::new(),
            passing_values: Vec::new(),
            on_empty: Some(behavior(JsonBehaviorType::Null)),
            on_error: behavior(on_error),
            use_io_coercion: typid != TEXTOID,
            use_json_coercion: false,
            wrapper: JsonWrapper::Unspec,
            omit_quotes: true,
            collation: 0,
            location: Location(None),
        };
        eval_json_expr(&je, &ExprContext::default(), &mut estate())
    }

    #[test]
    fn json_value_returns_scalars_through_the_returning_type() {
        assert_eq!(json_value(r#"{"a": "x"}"#, "$.a", TEXTOID, JsonBehaviorType::Null).unwrap(), Datum::text("x"));
        assert_eq!(json_value(r#"{"a": 7}"#, "$.a", INT4OID, JsonBehaviorType::Null).unwrap(), Datum::Int4(7));
        assert_eq!(json_value(r#"{"a": 7}"#, "$.b", INT4OID, JsonBehaviorType::Null).unwrap(), Datum::Null);
    }

    #[test]
    fn json_value_rejects_non_scalars_unless_absorbed() {
        assert_eq!(json_value(r#"{"a": [1]}"#, "$.a", TEXTOID, JsonBehaviorType::Null).unwrap(), Datum::Null);
        let err = json_value(r#"{"a": [1]}"#, "$.a", TEXTOID, JsonBehaviorType::Error).unwrap_err();
        assert_eq!(err.code(), "2203F");
        let err = json_value("[1, 2]", "$[*]", TEXTOID, JsonBehaviorType::Error).unwrap_err();
        assert_eq!(err.code(), "22034");
    }

    #[test]
    fn is_json_checks_kind_and_unique_keys() {
        let pred = |text: &str, item_type, unique_keys| JsonIsPredicate {
            expr: make_const(TEXTOID, Datum::text(text)),
            format: JsonFormat::default_format(),
            item_type,
            unique_keys,
            location: Location(None),
        };
        let eval = |p: JsonIsPredicate| eval_json_is_predicate(&p, &ExprContext::default(), &mut estate()).unwrap();
        assert_eq!(eval(pred("[1]", JsonValueType::Array, false)), Datum::Bool(true));
        assert_eq!(eval(pred("[1]", JsonValueType::Object, false)), Datum::Bool(false));
        assert_eq!(eval(pred(r#"{"a":1,"a":2}"#, JsonValueType::Any, true)), Datum::Bool(false));
        assert_eq!(eval(pred("{oops", JsonValueType::Any, false)), Datum::Bool(false));
    }
}
