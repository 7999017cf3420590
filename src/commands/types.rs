//! CREATE DOMAIN and CREATE TYPE ... AS (composite types).

use std::rc::Rc;

use tracing::debug;

use crate::catalog::namespace::creation_namespace;
use crate::catalog::oid::{INVALID_OID, Oid};
use crate::catalog::pg_type::{DomainConstraint, PgType, TypType};
use crate::catalog::table::{Persistence, RelKind};
use crate::catalog::{Catalog, catalog_snapshot, with_catalog_write};
use crate::nodes::parsenodes::{ColumnRefField, CompositeTypeStmt, CreateDomainStmt};
use crate::nodes::primnodes::{CoerceToDomainValue, Expr};
use crate::nodes::tupdesc::TupleDesc;
use crate::parser::parse_clause::transform_where_clause;
use crate::parser::parse_collate::assign_expr_collations;
use crate::parser::parse_node::{ColumnRefHook, ColumnRefInfo, ParseExprKind, ParseHooks, ParseState};
use crate::parser::parse_type::typename_type;
use crate::tcop::engine::QueryResult;
use crate::utils::elog::{PgError, PgResult, SqlState};

use super::create_table::{check_duplicate_columns, column_attribute};

/// Resolves `VALUE` inside a domain CHECK to the value being checked.
fn domain_value_hook(basetype: Oid, typmod: i32, collation: Oid) -> ParseHooks {
    let hook: ColumnRefHook = Rc::new(move |info: &ColumnRefInfo<'_>| {
        Ok(match info.fields {
            [ColumnRefField::Name(name)] if name == "value" => {
                Some(Expr::CoerceToDomainValue(CoerceToDomainValue {
                    type_id: basetype,
                    type_mod: typmod,
                    collation,
                    location: info.location.into(),
                }))
            }
            _ => None,
        })
    });
    ParseHooks {
        pre_columnref: Some(hook),
        ..ParseHooks::default()
    }
}

fn split_type_name(names: &[String]) -> PgResult<(Option<&str>, &str)> {
    match names {
        [name] => Ok((None, name.as_str())),
        [schema, name] => Ok((Some(schema.as_str()), name.as_str())),
        _ => Err(PgError::new(
            SqlState::SyntaxError,
            format!("improper qualified name (too many dotted names): {}", names.join(".")),
        )),
    }
}

fn check_type_name_free(catalog: &Catalog, namespace: Oid, name: &str) -> PgResult<()> {
    if catalog.type_by_name(namespace, name).is_some() || catalog.relation_in_namespace(namespace, name).is_some() {
        return Err(PgError::new(
            SqlState::DuplicateObject,
            format!("type \"{name}\" already exists"),
        ));
    }
    Ok(())
}

pub fn execute_create_domain(stmt: &CreateDomainStmt, source_text: &str) -> PgResult<QueryResult> {
    let catalog = catalog_snapshot();
    let (schema, name) = split_type_name(&stmt.domainname)?;
    let namespace = creation_namespace(&catalog, schema, false)?;
    check_type_name_free(&catalog, namespace, name)?;

    let (base, typmod) = typename_type(&catalog, &stmt.type_name)?;
    if !matches!(base.typtype, TypType::Base | TypType::Domain) {
        return Err(PgError::new(
            SqlState::DatatypeMismatch,
            format!("\"{}\" is not a valid base type for a domain", base.name),
        )
        .at(stmt.type_name.location));
    }
    let base = base.clone();

    let mut constraints = Vec::with_capacity(stmt.constraints.len());
    for (idx, (cname, raw)) in stmt.constraints.iter().enumerate() {
        let hooks = domain_value_hook(base.oid, typmod, base.collation);
        let mut pstate = ParseState::new(&catalog, source_text).with_hooks(hooks);
        let mut check = transform_where_clause(&mut pstate, raw, ParseExprKind::DomainCheck, "CHECK")?;
        assign_expr_collations(&catalog, &mut check)?;
        let cname = cname.clone().unwrap_or_else(|| match idx {
            0 => format!("{name}_check"),
            n => format!("{name}_check{n}"),
        });
        constraints.push(DomainConstraint {
            name: cname,
            check: Some(check),
        });
    }

    let typid = with_catalog_write(|c| {
        let typid = c.next_oid();
        c.add_type(PgType {
            oid: typid,
            name: name.to_string(),
            namespace,
            typtype: TypType::Domain,
            preferred: false,
            elem: INVALID_OID,
            array: INVALID_OID,
            relid: INVALID_OID,
            basetype: base.oid,
            typmod,
            notnull: stmt.not_null,
            constraints,
            ..base
        });
        typid
    });
    debug!(domain = %name, typid, "created domain");
    Ok(QueryResult::command("CREATE DOMAIN"))
}

pub fn execute_create_composite_type(stmt: &CompositeTypeStmt) -> PgResult<QueryResult> {
    let catalog = catalog_snapshot();
    let namespace = creation_namespace(&catalog, stmt.typevar.schemaname.as_deref(), false)?;
    let name = &stmt.typevar.relname;
    check_type_name_free(&catalog, namespace, name)?;
    check_duplicate_columns(stmt.coldeflist.iter().map(|column| column.colname.as_str()))?;
    let attrs = stmt
        .coldeflist
        .iter()
        .map(|column| column_attribute(&catalog, column))
        .collect::<PgResult<Vec<_>>>()?;
    let relid = with_catalog_write(|c| {
        c.create_relation(name, namespace, RelKind::CompositeType, Persistence::Permanent, TupleDesc::new(attrs))
    })?;
    debug!(typename = %name, relid, "created composite type");
    Ok(QueryResult::command("CREATE TYPE"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::datum::Datum;
    use crate::tcop::engine::{reset_global_state_for_tests, run_statement, with_global_state_lock};

    #[test]
    fn domain_checks_run_on_cast_and_insert() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement("CREATE DOMAIN posint AS int NOT NULL CHECK (VALUE > 0)").unwrap();
            let ok = run_statement("SELECT 5::posint").unwrap().pop().unwrap();
            assert_eq!(ok.rows, vec![vec![Datum::Int4(5)]]);
            let err = run_statement("SELECT (-1)::posint").unwrap_err();
            assert_eq!(err.code(), "23514");
            assert!(err.message.contains("posint_check"));
            run_statement("CREATE TABLE dom_t (n posint)").unwrap();
            assert_eq!(run_statement("INSERT INTO dom_t VALUES (NULL)").unwrap_err().code(), "23502");
            let catalog = catalog_snapshot();
            let ty = catalog.type_by_name(crate::catalog::PG_PUBLIC_NAMESPACE, "posint").unwrap();
            assert!(ty.notnull && ty.constraints.len() == 1);
        });
    }

    #[test]
    fn composite_types_describe_rows() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement("CREATE TYPE pair AS (a int, b text)").unwrap();
            let row = run_statement("SELECT (ROW(1, 'x')::pair).b").unwrap().pop().unwrap();
            assert_eq!(row.rows, vec![vec![Datum::text("x")]]);
            assert_eq!(run_statement("CREATE TYPE pair AS (c int)").unwrap_err().code(), "42710");
            run_statement("DROP TYPE pair").unwrap();
        });
    }
}
