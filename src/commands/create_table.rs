//! CREATE TABLE and CREATE TABLE AS.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::catalog::namespace::creation_namespace;
use crate::catalog::oid::{INVALID_OID, Oid};
use crate::catalog::pg_operator::CoercionContext;
use crate::catalog::pg_type::TypType;
use crate::catalog::table::{Persistence, RelKind, Relation};
use crate::catalog::{Catalog, CatalogOracle, catalog_snapshot, with_catalog_write};
use crate::nodes::node_funcs::{expr_collation, expr_type, expr_typmod};
use crate::nodes::parsenodes::{
    ColumnDef, CreateStmt, CreateTableAsStmt, IndexElem, ObjectType, Query, RangeTblEntry, RawExpr, RawStmt,
    RteKind, TableConstraint,
};
use crate::nodes::primnodes::{CoercionForm, Expr};
use crate::nodes::tupdesc::{Attribute, TupleDesc};
use crate::parser::parse_clause::transform_where_clause;
use crate::parser::parse_coerce::coerce_to_target_type;
use crate::parser::parse_collate::assign_expr_collations;
use crate::parser::parse_expr::transform_expr;
use crate::parser::parse_node::{ParseExprKind, ParseState};
use crate::parser::parse_relation::{add_rte_for_relation, build_nsitem};
use crate::parser::parse_type::typename_type_id_and_mod;
use crate::parser::parse_analyze;
use crate::storage::heap::heap_create;
use crate::tcop::engine::QueryResult;
use crate::utils::elog::{PgError, PgResult, SqlState};
use crate::utils::miscinit::prevent_in_restricted_operation;

use super::index::{IndexDefinition, define_index};
use super::matview;

/// Analyze `raw` as an expression over the columns of `rel`, which becomes
/// range-table entry 1 of a fresh parse state.
pub(crate) fn transform_relation_expr(
    catalog: &Catalog,
    rel: &Relation,
    raw: &RawExpr,
    kind: ParseExprKind,
    source_text: &str,
) -> PgResult<Expr> {
    let mut pstate = ParseState::new(catalog, source_text);
    let rtindex = add_rte_for_relation(&mut pstate, rel, None, false, true, None)?;
    let nsitem = build_nsitem(rtindex, pstate.rte(0, rtindex)?);
    pstate.level_mut().namespace.push(nsitem);
    let mut expr = match kind {
        ParseExprKind::CheckConstraint => transform_where_clause(&mut pstate, raw, kind, "CHECK")?,
        ParseExprKind::IndexPredicate => transform_where_clause(&mut pstate, raw, kind, "WHERE")?,
        _ => transform_expr(&mut pstate, raw, kind)?,
    };
    assign_expr_collations(catalog, &mut expr)?;
    Ok(expr)
}

/// Analyze a column default and coerce it to the column's type.
pub(crate) fn transform_column_default(
    catalog: &Catalog,
    attr: &Attribute,
    raw: &RawExpr,
    source_text: &str,
) -> PgResult<Expr> {
    let mut pstate = ParseState::new(catalog, source_text);
    let expr = transform_expr(&mut pstate, raw, ParseExprKind::ColumnDefault)?;
    let exprtype = expr_type(&expr);
    let location = raw.location();
    let mut coerced = coerce_to_target_type(
        catalog,
        expr,
        exprtype,
        attr.typid,
        attr.typmod,
        CoercionContext::Assignment,
        CoercionForm::ImplicitCast,
        location,
    )?
    .ok_or_else(|| {
        PgError::new(
            SqlState::DatatypeMismatch,
            format!(
                "column \"{}\" is of type {} but default expression is of type {}",
                attr.name,
                catalog.format_type(attr.typid),
                catalog.format_type(exprtype)
            ),
        )
        .with_hint("You will need to rewrite or cast the expression.")
        .at(location)
    })?;
    assign_expr_collations(catalog, &mut coerced)?;
    Ok(coerced)
}

pub(crate) fn column_attribute(catalog: &Catalog, column: &ColumnDef) -> PgResult<Attribute> {
    let (typid, typmod) = typename_type_id_and_mod(catalog, &column.type_name)?;
    let ty = catalog
        .type_by_id(typid)
        .ok_or_else(|| PgError::new(SqlState::UndefinedObject, format!("type {typid} does not exist")))?;
    if ty.typtype == TypType::Pseudo {
        return Err(PgError::new(
            SqlState::InvalidTableDefinition,
            format!("column \"{}\" has pseudo-type {}", column.colname, catalog.format_type(typid)),
        )
        .at(column.location));
    }
    let collation = match &column.collation {
        None => catalog.type_collation(typid),
        Some(names) => {
            let name = names.last().map_or("", String::as_str);
            if catalog.type_collation(typid) == INVALID_OID {
                return Err(PgError::new(
                    SqlState::DatatypeMismatch,
                    format!("collations are not supported by type {}", catalog.format_type(typid)),
                )
                .at(column.location));
            }
            catalog.collation_by_name(name).ok_or_else(|| {
                PgError::new(
                    SqlState::UndefinedObject,
                    format!("collation \"{name}\" for encoding \"UTF8\" does not exist"),
                )
                .at(column.location)
            })?
        }
    };
    let mut attr = Attribute::new(column.colname.clone(), typid, typmod, collation);
    attr.not_null = column.not_null || column.primary_key;
    attr.has_default = column.raw_default.is_some();
    Ok(attr)
}

pub(crate) fn check_duplicate_columns<'a>(names: impl Iterator<Item = &'a str>) -> PgResult<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(PgError::new(
                SqlState::DuplicateColumn,
                format!("column \"{name}\" specified more than once"),
            ));
        }
    }
    Ok(())
}

/// Pick `base`, or `base1`, `base2` ... when a relation, index or
/// constraint of the namespace already uses it.
pub(crate) fn choose_name(catalog: &Catalog, namespace: Oid, base: &str, extra_taken: &[String]) -> String {
    let taken = |name: &str| {
        catalog.relation_in_namespace(namespace, name).is_some()
            || extra_taken.iter().any(|other| other == name)
            || catalog
                .relations()
                .filter(|rel| rel.namespace == namespace)
                .any(|rel| {
                    rel.indexes.iter().any(|index| index.name == name)
                        || rel.checks.iter().any(|(check, _)| check == name)
                })
    };
    if !taken(base) {
        return base.to_string();
    }
    (1..)
        .map(|n| format!("{base}{n}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}

fn create_namespace(catalog: &Catalog, schemaname: Option<&str>, temp: bool) -> PgResult<(Oid, bool)> {
    let temp = temp || schemaname == Some("pg_temp");
    if temp {
        prevent_in_restricted_operation("create temporary table")?;
    }
    Ok((creation_namespace(catalog, schemaname, temp)?, temp))
}

pub fn execute_create_table(stmt: &CreateStmt, source_text: &str) -> PgResult<QueryResult> {
    let catalog = catalog_snapshot();
    let (namespace, temp) = create_namespace(&catalog, stmt.relation.schemaname.as_deref(), stmt.temp)?;
    let name = stmt.relation.relname.clone();
    if stmt.if_not_exists && catalog.relation_in_namespace(namespace, &name).is_some() {
        info!(relation = %name, "relation already exists, skipping");
        return Ok(QueryResult::command("CREATE TABLE"));
    }

    check_duplicate_columns(stmt.table_elts.iter().map(|column| column.colname.as_str()))?;
    let attrs = stmt
        .table_elts
        .iter()
        .map(|column| column_attribute(&catalog, column))
        .collect::<PgResult<Vec<_>>>()?;
    let persistence = if temp { Persistence::Temp } else { Persistence::Permanent };
    let relid = with_catalog_write(|c| {
        c.create_relation(&name, namespace, RelKind::Table, persistence, TupleDesc::new(attrs))
    })?;
    heap_create(relid);

    // Defaults and CHECK constraints need the relation in the catalog.
    let catalog = catalog_snapshot();
    let rel = catalog
        .relation(relid)
        .ok_or_else(|| PgError::new(SqlState::InternalError, "new relation vanished"))?;
    let mut defaults = Vec::new();
    for (idx, column) in stmt.table_elts.iter().enumerate() {
        if let (Some(raw), Some(attr)) = (&column.raw_default, rel.desc.attrs.get(idx)) {
            defaults.push((idx as i16 + 1, transform_column_default(&catalog, attr, raw, source_text)?));
        }
    }
    let mut checks: Vec<(String, Expr)> = Vec::new();
    for constraint in &stmt.constraints {
        if let TableConstraint::Check { name: cname, expr } = constraint {
            let check = transform_relation_expr(&catalog, rel, expr, ParseExprKind::CheckConstraint, source_text)?;
            let taken: Vec<String> = checks.iter().map(|(n, _)| n.clone()).collect();
            let cname = match cname {
                Some(cname) => cname.clone(),
                None => choose_name(&catalog, namespace, &format!("{name}_check"), &taken),
            };
            checks.push((cname, check));
        }
    }
    with_catalog_write(|c| {
        if let Some(rel) = c.relation_mut(relid) {
            rel.defaults.extend(defaults);
            rel.checks.extend(checks);
        }
    });

    // Column-level keys first, then table constraints, as they were written.
    let mut keys: Vec<(Option<String>, Vec<String>, bool)> = Vec::new();
    for column in &stmt.table_elts {
        if column.primary_key {
            keys.push((None, vec![column.colname.clone()], true));
        } else if column.unique {
            keys.push((None, vec![column.colname.clone()], false));
        }
    }
    for constraint in &stmt.constraints {
        match constraint {
            TableConstraint::PrimaryKey { name, columns } => keys.push((name.clone(), columns.clone(), true)),
            TableConstraint::Unique { name, columns } => keys.push((name.clone(), columns.clone(), false)),
            TableConstraint::Check { .. } => {}
        }
    }
    for (idxname, columns, primary) in keys {
        let params: Vec<IndexElem> = columns
            .iter()
            .map(|col| IndexElem {
                name: Some(col.clone()),
                expr: None,
            })
            .collect();
        define_index(
            relid,
            &IndexDefinition {
                name: idxname.as_deref(),
                params: &params,
                predicate: None,
                unique: true,
                primary,
                is_constraint: true,
            },
            source_text,
        )?;
    }
    debug!(relation = %name, relid, temp, "created table");
    Ok(QueryResult::command("CREATE TABLE"))
}

/// Reject stored queries that read temporary relations.
fn check_no_temp_relations(catalog: &Catalog, rtable: &[RangeTblEntry]) -> PgResult<()> {
    for rte in rtable {
        match &rte.kind {
            RteKind::Relation { relid, .. } => {
                if catalog
                    .relation(*relid)
                    .is_some_and(|rel| rel.persistence == Persistence::Temp)
                {
                    return Err(PgError::new(
                        SqlState::FeatureNotSupported,
                        "materialized views must not use temporary tables or views",
                    ));
                }
            }
            RteKind::Subquery { subquery } => check_no_temp_relations(catalog, &subquery.rtable)?,
            _ => {}
        }
    }
    Ok(())
}

/// Output columns of an analyzed query, renamed by an optional column list.
pub(crate) fn query_output_desc(catalog: &Catalog, query: &Query, col_names: &[String]) -> PgResult<TupleDesc> {
    let visible: Vec<_> = query.target_list.iter().filter(|tle| !tle.resjunk).collect();
    if col_names.len() > visible.len() {
        return Err(PgError::new(SqlState::SyntaxError, "too many column names were specified"));
    }
    let attrs: Vec<Attribute> = visible
        .iter()
        .enumerate()
        .map(|(idx, tle)| {
            let name = col_names
                .get(idx)
                .cloned()
                .or_else(|| tle.resname.clone())
                .unwrap_or_else(|| "?column?".to_string());
            let typid = expr_type(&tle.expr);
            let collation = match expr_collation(&tle.expr) {
                INVALID_OID => catalog.type_collation(typid),
                collation => collation,
            };
            Attribute::new(name, typid, expr_typmod(&tle.expr), collation)
        })
        .collect();
    check_duplicate_columns(attrs.iter().map(|attr| attr.name.as_str()))?;
    Ok(TupleDesc::new(attrs))
}

/// CREATE TABLE AS and CREATE MATERIALIZED VIEW. Both report `SELECT n`
/// when they load data.
pub fn execute_create_table_as(stmt: &CreateTableAsStmt, source_text: &str) -> PgResult<QueryResult> {
    let is_matview = stmt.objtype == ObjectType::MatView;
    let create_tag = if is_matview { "CREATE MATERIALIZED VIEW" } else { "CREATE TABLE AS" };
    let catalog = catalog_snapshot();
    let into = &stmt.into;
    let (namespace, temp) = create_namespace(&catalog, into.rel.schemaname.as_deref(), into.temp)?;
    if is_matview && temp {
        return Err(PgError::new(
            SqlState::FeatureNotSupported,
            "materialized views must not use temporary tables or views",
        ));
    }
    if let Some(existing) = catalog.relation_in_namespace(namespace, &into.rel.relname) {
        if stmt.if_not_exists {
            info!(relation = %existing.name, "relation already exists, skipping");
            return Ok(QueryResult::command(create_tag));
        }
        return Err(PgError::new(
            SqlState::DuplicateTable,
            format!("relation \"{}\" already exists", existing.name),
        ));
    }

    let query_source = if stmt.query_text.is_empty() { source_text } else { stmt.query_text.as_str() };
    let query = parse_analyze(&catalog, &RawStmt::Select((*stmt.query).clone()), query_source, &[])?;
    if is_matview {
        check_no_temp_relations(&catalog, &query.rtable)?;
    }
    let desc = query_output_desc(&catalog, &query, &into.col_names)?;
    let (kind, persistence) = match (is_matview, temp) {
        (true, _) => (RelKind::MatView, Persistence::Permanent),
        (false, true) => (RelKind::Table, Persistence::Temp),
        (false, false) => (RelKind::Table, Persistence::Permanent),
    };
    let relid = with_catalog_write(|c| {
        let relid = c.create_relation(&into.rel.relname, namespace, kind, persistence, desc)?;
        if is_matview && let Some(rel) = c.relation_mut(relid) {
            rel.view_query = Some(Box::new(query.clone()));
        }
        Ok::<_, PgError>(relid)
    })?;
    heap_create(relid);
    debug!(relation = %into.rel.relname, relid, is_matview, "created relation from query");

    if into.skip_data {
        return Ok(QueryResult::command(create_tag));
    }
    let processed = if is_matview {
        matview::populate_new_matview(relid)?
    } else {
        matview::fill_relation(relid, &query)?
    };
    let mut result = QueryResult::command(format!("SELECT {processed}"));
    result.rows_affected = processed;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use crate::catalog::catalog_snapshot;
    use crate::nodes::datum::Datum;
    use crate::tcop::engine::{reset_global_state_for_tests, run_statement, with_global_state_lock};

    #[test]
    fn defaults_and_generated_constraint_names() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement("CREATE TABLE d (id int UNIQUE, n int DEFAULT 7, CHECK (n < 100), CHECK (id > 0))")
                .unwrap();
            run_statement("INSERT INTO d (id) VALUES (1)").unwrap();
            let rows = run_statement("SELECT n FROM d").unwrap().pop().unwrap().rows;
            assert_eq!(rows, vec![vec![Datum::Int4(7)]]);
            let catalog = catalog_snapshot();
            let rel = catalog.relations().find(|rel| rel.name == "d").unwrap();
            let names: Vec<&str> = rel.checks.iter().map(|(name, _)| name.as_str()).collect();
            assert_eq!(names, vec!["d_check", "d_check1"]);
            assert_eq!(rel.indexes[0].name, "d_id_key");
        });
    }

    #[test]
    fn duplicate_columns_are_rejected() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            let err = run_statement("CREATE TABLE dup (a int, a text)").unwrap_err();
            assert_eq!(err.code(), "42701");
        });
    }

    #[test]
    fn create_table_as_reports_rows() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            let result = run_statement("CREATE TABLE c2 AS SELECT x FROM (VALUES (1), (2)) v(x)")
                .unwrap()
                .pop()
                .unwrap();
            assert_eq!(result.command_tag, "SELECT 2");
            let empty = run_statement("CREATE TABLE c3 AS SELECT 1 AS one WITH NO DATA")
                .unwrap()
                .pop()
                .unwrap();
            assert_eq!(empty.command_tag, "CREATE TABLE AS");
        });
    }
}
