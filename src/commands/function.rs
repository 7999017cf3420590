//! CREATE [OR REPLACE] FUNCTION for SQL-language functions.

use tracing::debug;

use crate::catalog::namespace::creation_namespace;
use crate::catalog::oid::{INVALID_OID, Oid};
use crate::catalog::pg_operator::CoercionContext;
use crate::catalog::pg_proc::{PgProc, ProKind, ProLang, Volatility};
use crate::catalog::pg_type::{ANYOID, is_polymorphic_type};
use crate::catalog::{Catalog, catalog_snapshot, with_catalog_write};
use crate::executor::functions::sql_function_parse_hooks;
use crate::nodes::node_funcs::expr_type;
use crate::nodes::parsenodes::{
    CreateFunctionStmt, FunctionBody, FunctionParameter, FunctionParameterMode, Query, RawExpr, RawStmt,
};
use crate::nodes::primnodes::{CoercionForm, Expr};
use crate::parser::parse_coerce::coerce_to_target_type;
use crate::parser::parse_collate::assign_expr_collations;
use crate::parser::parse_expr::transform_expr;
use crate::parser::parse_node::{ParseExprKind, ParseState};
use crate::parser::parse_type::typename_type_id_and_mod;
use crate::parser::{parse_analyze_with_hooks, raw_parser};
use crate::tcop::engine::QueryResult;
use crate::utils::elog::{PgError, PgResult, SqlState};

fn invalid_definition(message: impl Into<String>) -> PgError {
    PgError::new(SqlState::InvalidFunctionDefinition, message)
}

fn analyze_default(catalog: &Catalog, raw: &RawExpr, argtype: Oid, source_text: &str) -> PgResult<Expr> {
    let mut pstate = ParseState::new(catalog, source_text);
    let expr = transform_expr(&mut pstate, raw, ParseExprKind::FunctionDefault)?;
    let exprtype = expr_type(&expr);
    let mut coerced = coerce_to_target_type(
        catalog,
        expr,
        exprtype,
        argtype,
        -1,
        CoercionContext::Assignment,
        CoercionForm::ImplicitCast,
        raw.location(),
    )?
    .ok_or_else(|| {
        PgError::new(
            SqlState::DatatypeMismatch,
            format!(
                "argument of type {} cannot be assigned a default of type {}",
                catalog.format_type(argtype),
                catalog.format_type(exprtype)
            ),
        )
        .at(raw.location())
    })?;
    assign_expr_collations(catalog, &mut coerced)?;
    Ok(coerced)
}

struct Signature {
    argtypes: Vec<Oid>,
    argnames: Vec<String>,
    variadic: Oid,
    defaults: Vec<Expr>,
}

fn interpret_parameters(catalog: &Catalog, params: &[FunctionParameter], source_text: &str) -> PgResult<Signature> {
    let mut sig = Signature {
        argtypes: Vec::with_capacity(params.len()),
        argnames: Vec::with_capacity(params.len()),
        variadic: INVALID_OID,
        defaults: Vec::new(),
    };
    for (idx, param) in params.iter().enumerate() {
        let (typid, _) = typename_type_id_and_mod(catalog, &param.arg_type)?;
        if param.mode == FunctionParameterMode::Variadic {
            if idx + 1 != params.len() {
                return Err(invalid_definition("VARIADIC parameter must be the last input parameter"));
            }
            sig.variadic = if typid == ANYOID {
                ANYOID
            } else {
                catalog
                    .element_type_of(typid)
                    .ok_or_else(|| invalid_definition("VARIADIC parameter must be an array"))?
            };
        }
        let name = param.name.clone().unwrap_or_default();
        if !name.is_empty() && sig.argnames.contains(&name) {
            return Err(invalid_definition(format!("parameter name \"{name}\" used more than once")));
        }
        match &param.defexpr {
            Some(raw) => sig.defaults.push(analyze_default(catalog, raw, typid, source_text)?),
            None if !sig.defaults.is_empty() => {
                return Err(invalid_definition(
                    "input parameters after one with a default value must also have defaults",
                ));
            }
            None => {}
        }
        sig.argtypes.push(typid);
        sig.argnames.push(name);
    }
    Ok(sig)
}

fn analyze_atomic_body(catalog: &Catalog, proc: &PgProc, body: &[RawStmt], source_text: &str) -> PgResult<Vec<Query>> {
    if let Some(&poly) = proc.argtypes.iter().find(|&&typid| is_polymorphic_type(typid)) {
        return Err(invalid_definition(format!(
            "SQL function with unquoted function body cannot have polymorphic arguments (found {})",
            catalog.format_type(poly)
        )));
    }
    body.iter()
        .map(|raw| {
            let hooks = sql_function_parse_hooks(catalog, proc, &proc.argtypes);
            parse_analyze_with_hooks(catalog, raw, source_text, &proc.argtypes, hooks)
        })
        .collect()
}

pub fn execute_create_function(stmt: &CreateFunctionStmt, source_text: &str) -> PgResult<QueryResult> {
    let catalog = catalog_snapshot();
    if !stmt.language.eq_ignore_ascii_case("sql") {
        return Err(PgError::new(
            SqlState::UndefinedObject,
            format!("language \"{}\" does not exist", stmt.language),
        ));
    }
    let (schema, name) = match stmt.funcname.as_slice() {
        [name] => (None, name.clone()),
        [schema, name] => (Some(schema.as_str()), name.clone()),
        _ => {
            return Err(PgError::new(
                SqlState::SyntaxError,
                format!("improper qualified name (too many dotted names): {}", stmt.funcname.join(".")),
            ));
        }
    };
    let namespace = creation_namespace(&catalog, schema, false)?;
    let sig = interpret_parameters(&catalog, &stmt.parameters, source_text)?;
    let (rettype, _) = typename_type_id_and_mod(&catalog, &stmt.return_type)?;
    if is_polymorphic_type(rettype) && !sig.argtypes.iter().any(|&typid| is_polymorphic_type(typid)) {
        return Err(invalid_definition("cannot determine result data type")
            .with_detail("A result of type anyelement requires at least one input of type anyelement, anyarray, anynonarray, anycompatible, anycompatiblearray or anycompatiblenonarray."));
    }

    let existing = catalog
        .procs_named(&name)
        .find(|proc| proc.namespace == namespace && proc.argtypes == sig.argtypes)
        .cloned();
    let signature = format!(
        "{name}({})",
        sig.argtypes.iter().map(|&typid| catalog.format_type(typid)).collect::<Vec<_>>().join(", ")
    );
    if let Some(old) = &existing {
        if !stmt.replace {
            return Err(PgError::new(
                SqlState::DuplicateFunction,
                format!("function {signature} already exists with same argument types"),
            ));
        }
        if old.rettype != rettype || old.retset != stmt.returns_set {
            return Err(invalid_definition("cannot change return type of existing function")
                .with_hint(format!("Use DROP FUNCTION {signature} first.")));
        }
    }

    let mut proc = PgProc {
        oid: existing.as_ref().map_or(INVALID_OID, |old| old.oid),
        name: name.clone(),
        namespace,
        kind: ProKind::Function,
        lang: ProLang::Sql,
        argtypes: sig.argtypes,
        argnames: sig.argnames,
        variadic: sig.variadic,
        rettype,
        retset: stmt.returns_set,
        strict: stmt.strict,
        volatility: stmt.volatility.unwrap_or(Volatility::Volatile),
        defaults: sig.defaults,
        prosrc: String::new(),
        sqlbody: None,
        aggregate: None,
    };
    match &stmt.body {
        FunctionBody::Text(text) => {
            // Syntax only; names in the body resolve when it first runs.
            raw_parser(text)?;
            proc.prosrc = text.clone();
        }
        FunctionBody::Atomic(body) => {
            proc.sqlbody = Some(analyze_atomic_body(&catalog, &proc, body, source_text)?);
            proc.prosrc = source_text.to_string();
        }
    }

    let oid = with_catalog_write(|c| {
        if proc.oid == INVALID_OID {
            proc.oid = c.next_oid();
        } else {
            c.remove_proc(proc.oid);
        }
        let oid = proc.oid;
        c.add_proc(proc);
        oid
    });
    debug!(function = %signature, oid, replaced = existing.is_some(), "created function");
    Ok(QueryResult::command("CREATE FUNCTION"))
}

#[cfg(test)]
mod tests {
    use crate::nodes::datum::Datum;
    use crate::tcop::engine::{reset_global_state_for_tests, run_statement, with_global_state_lock};

    fn scalar(sql: &str) -> Datum {
        run_statement(sql).unwrap().pop().unwrap().rows.remove(0).remove(0)
    }

    #[test]
    fn defaults_named_args_and_replace() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement("CREATE FUNCTION add3(a int, b int DEFAULT 10) RETURNS int LANGUAGE sql AS 'SELECT a + b'")
                .unwrap();
            assert_eq!(scalar("SELECT add3(1)"), Datum::Int4(11));
            assert_eq!(scalar("SELECT add3(b => 2, a => 1)"), Datum::Int4(3));

            let err = run_statement("CREATE FUNCTION add3(a int, b int) RETURNS int LANGUAGE sql AS 'SELECT 0'")
                .unwrap_err();
            assert_eq!(err.code(), "42723");
            let err = run_statement("CREATE OR REPLACE FUNCTION add3(a int, b int) RETURNS text LANGUAGE sql AS 'SELECT 0'")
                .unwrap_err();
            assert_eq!(err.code(), "42P13");
            run_statement("CREATE OR REPLACE FUNCTION add3(a int, b int DEFAULT 10) RETURNS int LANGUAGE sql AS 'SELECT a * b'")
                .unwrap();
            assert_eq!(scalar("SELECT add3(2)"), Datum::Int4(20));
        });
    }

    #[test]
    fn parameter_rules() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            let err = run_statement("CREATE FUNCTION bad(a int DEFAULT 1, b int) RETURNS int LANGUAGE sql AS 'SELECT 1'")
                .unwrap_err();
            assert_eq!(err.code(), "42P13");
            let err = run_statement("CREATE FUNCTION bad2(a int) RETURNS int LANGUAGE plpgsql AS 'begin end'")
                .unwrap_err();
            assert_eq!(err.code(), "42704");
            let err = run_statement("CREATE FUNCTION bad3(a int) RETURNS int LANGUAGE sql AS 'SELEC 1'").unwrap_err();
            assert_eq!(err.code(), "42601");
        });
    }

    #[test]
    fn atomic_bodies_are_analyzed_at_creation() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            let err = run_statement("CREATE FUNCTION nope(x int) RETURNS int LANGUAGE sql RETURN x + missing_col")
                .unwrap_err();
            assert_eq!(err.code(), "42703");
            run_statement("CREATE FUNCTION twice(x int) RETURNS int LANGUAGE sql RETURN x * 2").unwrap();
            assert_eq!(scalar("SELECT twice(21)"), Datum::Int4(42));
        });
    }
}
