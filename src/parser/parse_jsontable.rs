//! JSON_TABLE in FROM.
//!
//! The row path produces one row per matched item. Each column is a
//! JSON_VALUE / JSON_QUERY / JSON_EXISTS expression over a placeholder that
//! stands for the current row item; ordinality columns number the rows.

use tracing::debug;

use crate::catalog::CatalogOracle;
use crate::catalog::oid::INVALID_OID;
use crate::catalog::pg_type::{INT4OID, JSONBOID, JSONOID, JSONPATHOID};
use crate::nodes::datum::Datum;
use crate::nodes::makefuncs::make_const;
use crate::nodes::node_funcs::{expr_collation, expr_type, expr_typmod};
use crate::nodes::parsenodes::{
    ColumnTypes, JsonOutput, JsonQuotes, JsonTableColumn, JsonTableColumnKind, JsonTableColumnSpec, RangeJsonTable, TableFunc,
};
use crate::nodes::primnodes::{CaseTestExpr, Expr, Index, JsonBehaviorType, JsonExprOp, JsonWrapper};
use crate::parser::parse_collate::assign_expr_collations;
use crate::parser::parse_jsonexpr::{
    BehaviorClause, JsonExprParts, default_on_error, make_json_expr, transform_json_behavior,
    transform_json_context_item, transform_json_func_returning, transform_json_passing, transform_json_path,
};
use crate::parser::parse_node::{ParseExprKind, ParseState};
use crate::parser::parse_relation::add_rte_for_tablefunc;
use crate::parser::parse_type::typename_type_id_and_mod;
use crate::utils::adt::jsonpath::parse_jsonpath;
use crate::utils::elog::{PgError, PgResult, SqlState};

/// Transform a JSON_TABLE item and add its range table entry. JSON_TABLE
/// is implicitly LATERAL.
pub fn transform_json_table(pstate: &mut ParseState<'_>, jt: &RangeJsonTable) -> PgResult<Index> {
    let saved_lateral = std::mem::replace(&mut pstate.level_mut().lateral_active, true);
    let saved_kind = pstate.set_expr_kind(ParseExprKind::FromFunction);
    let result = build_table_func(pstate, jt);
    pstate.restore_expr_kind(saved_kind);
    pstate.level_mut().lateral_active = saved_lateral;
    let (tablefunc, columns, colnames) = result?;
    debug!(columns = colnames.len(), "json_table");
    add_rte_for_tablefunc(pstate, tablefunc, columns, colnames, jt.alias.clone(), true, jt.location)
}

fn build_table_func(
    pstate: &mut ParseState<'_>,
    jt: &RangeJsonTable,
) -> PgResult<(TableFunc, ColumnTypes, Vec<String>)> {
    let context_item = transform_json_context_item(pstate, &jt.context_item, "JSON_TABLE")?;
    let row_path = transform_json_path(pstate, &jt.pathspec)?;
    let (passing_names, passing_values) = transform_json_passing(pstate, &jt.passing)?;

    let table_returning = transform_json_func_returning(
        pstate,
        JsonExprOp::Table,
        None,
        jt.location,
    )?;
    let on_error = transform_json_behavior(
        pstate,
        jt.on_error.as_ref(),
        default_on_error(JsonExprOp::Table),
        JsonExprOp::Table,
        BehaviorClause::OnError,
        "JSON_TABLE",
        &table_returning,
    )?;
    let error_on_error = on_error.btype == JsonBehaviorType::Error;

    let mut colnames: Vec<String> = Vec::with_capacity(jt.columns.len());
    let mut columns = ColumnTypes::default();
    let mut specs = Vec::with_capacity(jt.columns.len());
    for column in &jt.columns {
        if colnames.contains(&column.name) {
            return Err(PgError::new(
                SqlState::DuplicateAlias,
                format!("duplicate JSON_TABLE column or path name: {}", column.name),
            )
            .at(column.location));
        }
        let spec = transform_column(pstate, column, &passing_names, &passing_values, error_on_error)?;
        match &spec.expr {
            Some(expr) => columns.push(expr_type(expr), expr_typmod(expr), expr_collation(expr)),
            None => columns.push(INT4OID, -1, INVALID_OID),
        }
        colnames.push(column.name.clone());
        specs.push(spec);
    }

    let mut tablefunc = TableFunc {
        context_item,
        row_path,
        passing_names,
        passing_values,
        columns: specs,
        error_on_error,
    };
    let catalog = pstate.catalog;
    assign_expr_collations(catalog, &mut tablefunc.context_item)?;
    assign_expr_collations(catalog, &mut tablefunc.row_path)?;
    for value in &mut tablefunc.passing_values {
        assign_expr_collations(catalog, value)?;
    }
    for spec in &mut tablefunc.columns {
        if let Some(expr) = &mut spec.expr {
            assign_expr_collations(catalog, expr)?;
        }
    }
    // Column collations are final only after assignment.
    let mut columns_final = ColumnTypes::default();
    for (idx, spec) in tablefunc.columns.iter().enumerate() {
        let collation = spec.expr.as_ref().map_or(INVALID_OID, expr_collation);
        columns_final.push(columns.coltypes[idx], columns.coltypmods[idx], collation);
    }
    Ok((tablefunc, columns_final, colnames))
}

/// `$."name"`, the path used by a column without an explicit PATH.
fn default_column_path(name: &str) -> String {
    let mut path = String::from("$.\"");
    for ch in name.chars() {
        if matches!(ch, '"' | '\\') {
            path.push('\\');
        }
        path.push(ch);
    }
    path.push('"');
    path
}

fn transform_column(
    pstate: &mut ParseState<'_>,
    column: &JsonTableColumn,
    passing_names: &[String],
    passing_values: &[Expr],
    error_on_error: bool,
) -> PgResult<JsonTableColumnSpec> {
    if column.kind == JsonTableColumnKind::Ordinality {
        return Ok(JsonTableColumnSpec {
            kind: JsonTableColumnKind::Ordinality,
            expr: None,
        });
    }
    let catalog = pstate.catalog;
    let type_name = column.type_name.as_ref().ok_or_else(|| {
        PgError::new(SqlState::SyntaxError, format!("column \"{}\" requires a type", column.name)).at(column.location)
    })?;
    let (typid, _) = typename_type_id_and_mod(catalog, type_name)?;
    let structured = matches!(catalog.base_type(typid), JSONOID | JSONBOID)
        || catalog.is_array_type(typid)
        || catalog.type_by_id(typid).is_some_and(|ty| ty.relid != INVALID_OID);
    let op = match column.kind {
        JsonTableColumnKind::Exists => JsonExprOp::Exists,
        JsonTableColumnKind::Formatted => JsonExprOp::Query,
        _ if structured || column.wrapper != JsonWrapper::Unspec || column.quotes != JsonQuotes::Unspec => {
            JsonExprOp::Query
        }
        _ => JsonExprOp::Value,
    };

    let path_text = column
        .pathspec
        .clone()
        .unwrap_or_else(|| default_column_path(&column.name));
    let path = parse_jsonpath(&path_text).map_err(|err| err.at(column.location))?;
    let path_spec = make_const(JSONPATHOID, Datum::JsonPath(path.to_string()));

    let output = JsonOutput {
        type_name: type_name.clone(),
        format: column.format.clone(),
    };
    let returning =
        transform_json_func_returning(pstate, op, Some(&output), column.location)?;
    let on_empty = match op {
        JsonExprOp::Exists => None,
        _ => Some(transform_json_behavior(
            pstate,
            column.on_empty.as_ref(),
            JsonBehaviorType::Null,
            op,
            BehaviorClause::OnEmpty,
            "JSON_TABLE",
            &returning,
        )?),
    };
    let column_default = if error_on_error { JsonBehaviorType::Error } else { default_on_error(op) };
    let on_error = transform_json_behavior(
        pstate,
        column.on_error.as_ref(),
        column_default,
        op,
        BehaviorClause::OnError,
        "JSON_TABLE",
        &returning,
    )?;
    let expr = make_json_expr(JsonExprParts {
        op,
        column_name: Some(column.name.clone()),
        formatted_expr: Expr::CaseTestExpr(CaseTestExpr {
            type_id: JSONBOID,
            type_mod: -1,
            collation: INVALID_OID,
        }),
        path_spec,
        returning,
        passing_names: passing_names.to_vec(),
        passing_values: passing_values.to_vec(),
        on_empty,
        on_error,
        wrapper: column.wrapper,
        quotes: column.quotes,
        location: column.location,
    });
    Ok(JsonTableColumnSpec {
        kind: column.kind.clone(),
        expr: Some(expr),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::catalog::pg_type::TEXTOID;
    use crate::nodes::parsenodes::{FromItem, RawStmt, RteKind};
    use crate::parser::gram::raw_parser;

    fn json_table_item(sql: &str) -> RangeJsonTable {
        let stmts = raw_parser(sql).unwrap();
        let RawStmt::Select(select) = &stmts[0] else {
            panic!("expected SELECT");
        };
        match &select.from_clause[0] {
            FromItem::JsonTable(jt) => (**jt).clone(),
            other => panic!("expected JSON_TABLE, got {other:?}"),
        }
    }

    #[test]
    fn columns_pick_function_kind_by_type() {
        let catalog = Catalog::default();
        let sql = "SELECT * FROM JSON_TABLE(jsonb '[{\"a\":1}]', '$[*]' COLUMNS (\
                   n FOR ORDINALITY, a int, doc jsonb PATH '$', has_a bool EXISTS PATH '$.a', t text))";
        let jt = json_table_item(sql);
        let mut pstate = ParseState::new(&catalog, sql);
        let rtindex = transform_json_table(&mut pstate, &jt).unwrap();
        let rte = pstate.rte(0, rtindex).unwrap();
        assert_eq!(rte.eref.colnames, vec!["n", "a", "doc", "has_a", "t"]);
        let RteKind::TableFunc { tablefunc, columns } = &rte.kind else {
            panic!("expected a table function RTE");
        };
        assert_eq!(columns.coltypes[0], INT4OID);
        assert_eq!(columns.coltypes[4], TEXTOID);
        let ops: Vec<Option<JsonExprOp>> = tablefunc
            .columns
            .iter()
            .map(|c| match &c.expr {
                Some(Expr::JsonExpr(je)) => Some(je.op),
                _ => None,
            })
            .collect();
        assert_eq!(
            ops,
            vec![
                None,
                Some(JsonExprOp::Value),
                Some(JsonExprOp::Query),
                Some(JsonExprOp::Exists),
                Some(JsonExprOp::Value)
            ]
        );
        assert!(!tablefunc.error_on_error);
    }

    #[test]
    fn duplicate_column_names_rejected() {
        let catalog = Catalog::default();
        let sql = "SELECT * FROM JSON_TABLE(jsonb '[]', '$[*]' COLUMNS (a int, a text))";
        let jt = json_table_item(sql);
        let mut pstate = ParseState::new(&catalog, sql);
        let err = transform_json_table(&mut pstate, &jt).unwrap_err();
        assert_eq!(err.message, "duplicate JSON_TABLE column or path name: a");
    }

    #[test]
    fn default_path_quotes_the_name() {
        assert_eq!(default_column_path("a\"b"), "$.\"a\\\"b\"");
    }
}
