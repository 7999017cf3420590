//! DROP TABLE / VIEW / MATERIALIZED VIEW / INDEX / FUNCTION / TYPE / DOMAIN.

use tracing::{debug, info};

use crate::catalog::namespace::{relname_get_relation, typename_get_type};
use crate::catalog::oid::INVALID_OID;
use crate::catalog::pg_proc::PgProc;
use crate::catalog::table::RelKind;
use crate::catalog::{Catalog, PG_CATALOG_NAMESPACE, catalog_snapshot, with_catalog_write};
use crate::nodes::parsenodes::{DropStmt, ObjectType};
use crate::storage::heap::heap_drop;
use crate::tcop::engine::QueryResult;
use crate::utils::elog::{PgError, PgResult, SqlState};

use super::matview::refresh_in_progress;

pub(crate) fn command_tag(kind: ObjectType) -> &'static str {
    match kind {
        ObjectType::Table => "DROP TABLE",
        ObjectType::MatView => "DROP MATERIALIZED VIEW",
        ObjectType::View => "DROP VIEW",
        ObjectType::Index => "DROP INDEX",
        ObjectType::Function => "DROP FUNCTION",
        ObjectType::Type => "DROP TYPE",
        ObjectType::Domain => "DROP DOMAIN",
    }
}

fn object_noun(kind: ObjectType) -> &'static str {
    match kind {
        ObjectType::Table => "table",
        ObjectType::MatView => "materialized view",
        ObjectType::View => "view",
        ObjectType::Index => "index",
        ObjectType::Function => "function",
        ObjectType::Type => "type",
        ObjectType::Domain => "type",
    }
}

fn split_name(names: &[String]) -> PgResult<(Option<&str>, &str)> {
    match names {
        [name] => Ok((None, name.as_str())),
        [schema, name] => Ok((Some(schema.as_str()), name.as_str())),
        _ => Err(PgError::new(
            SqlState::SyntaxError,
            format!("improper qualified name (too many dotted names): {}", names.join(".")),
        )),
    }
}

fn missing(kind: ObjectType, name: &str) -> PgError {
    let state = match kind {
        ObjectType::Table | ObjectType::MatView | ObjectType::View => SqlState::UndefinedTable,
        ObjectType::Function => SqlState::UndefinedFunction,
        ObjectType::Index | ObjectType::Type | ObjectType::Domain => SqlState::UndefinedObject,
    };
    let message = match kind {
        ObjectType::Function => format!("function {name}() does not exist"),
        other => format!("{} \"{name}\" does not exist", object_noun(other)),
    };
    PgError::new(state, message)
}

fn drop_relation(catalog: &Catalog, kind: ObjectType, names: &[String]) -> PgResult<bool> {
    let (schema, name) = split_name(names)?;
    let Some(rel) = relname_get_relation(catalog, schema, name)? else {
        return Ok(false);
    };
    let expected = match kind {
        ObjectType::MatView => RelKind::MatView,
        ObjectType::View => RelKind::View,
        _ => RelKind::Table,
    };
    if rel.kind != expected {
        let hint = match rel.kind {
            RelKind::Table => "Use DROP TABLE to remove a table.",
            RelKind::MatView => "Use DROP MATERIALIZED VIEW to remove a materialized view.",
            RelKind::View => "Use DROP VIEW to remove a view.",
            RelKind::CompositeType => "Use DROP TYPE to remove a type.",
        };
        return Err(PgError::new(
            SqlState::WrongObjectType,
            format!("\"{}\" is not a {}", rel.name, object_noun(kind)),
        )
        .with_hint(hint));
    }
    if refresh_in_progress(rel.oid) {
        return Err(PgError::new(
            SqlState::ObjectInUse,
            format!(
                "cannot DROP {} \"{}\" because it is being used by active queries in this session",
                object_noun(kind).to_uppercase(),
                rel.name
            ),
        ));
    }
    let (relid, relfilenode) = (rel.oid, rel.relfilenode);
    with_catalog_write(|c| c.remove_relation(relid));
    if matches!(expected, RelKind::Table | RelKind::MatView) {
        heap_drop(relfilenode);
    }
    debug!(relation = %name, relid, "dropped relation");
    Ok(true)
}

fn drop_index(catalog: &Catalog, names: &[String]) -> PgResult<bool> {
    let (schema, name) = split_name(names)?;
    let namespace = match schema {
        Some(schema) => Some(crate::catalog::namespace::lookup_namespace(catalog, schema)?),
        None => None,
    };
    let owner = catalog
        .relations()
        .filter(|rel| namespace.is_none_or(|ns| rel.namespace == ns))
        .find(|rel| rel.indexes.iter().any(|index| index.name == name))
        .map(|rel| rel.oid);
    let Some(relid) = owner else {
        return Ok(false);
    };
    with_catalog_write(|c| {
        if let Some(rel) = c.relation_mut(relid) {
            rel.indexes.retain(|index| index.name != name);
        }
    });
    debug!(index = %name, "dropped index");
    Ok(true)
}

fn user_functions<'c>(catalog: &'c Catalog, name: &str) -> Vec<&'c PgProc> {
    catalog
        .procs_named(name)
        .filter(|proc| proc.namespace != PG_CATALOG_NAMESPACE)
        .collect()
}

fn drop_function(catalog: &Catalog, names: &[String]) -> PgResult<bool> {
    let (_, name) = split_name(names)?;
    let candidates = user_functions(catalog, name);
    let oid = match candidates.as_slice() {
        [] => return Ok(false),
        [proc] => proc.oid,
        _ => {
            return Err(PgError::new(
                SqlState::AmbiguousFunction,
                format!("function name \"{name}\" is not unique"),
            )
            .with_hint("Specify the argument list to select the function unambiguously."));
        }
    };
    with_catalog_write(|c| c.remove_proc(oid));
    debug!(function = %name, oid, "dropped function");
    Ok(true)
}

fn drop_type(catalog: &Catalog, kind: ObjectType, names: &[String]) -> PgResult<bool> {
    let Some(ty) = typename_get_type(catalog, names)? else {
        return Ok(false);
    };
    if ty.namespace == PG_CATALOG_NAMESPACE {
        return Err(PgError::new(
            SqlState::DependentObjectsStillExist,
            format!("cannot drop type {} because it is required by the database system", ty.name),
        ));
    }
    if kind == ObjectType::Domain && !ty.is_domain() {
        return Err(PgError::new(
            SqlState::WrongObjectType,
            format!("\"{}\" is not a domain", ty.name),
        ));
    }
    let (typid, relid) = (ty.oid, ty.relid);
    if relid != INVALID_OID {
        let is_standalone = catalog
            .relation(relid)
            .is_some_and(|rel| rel.kind == RelKind::CompositeType);
        if !is_standalone {
            return Err(PgError::new(
                SqlState::DependentObjectsStillExist,
                format!("cannot drop type {} because table {} requires it", ty.name, ty.name),
            )
            .with_hint(format!("You can drop table {} instead.", ty.name)));
        }
    }
    with_catalog_write(|c| {
        if relid != INVALID_OID {
            c.remove_relation(relid);
        }
        c.remove_type(typid);
    });
    debug!(typid, "dropped type");
    Ok(true)
}

pub fn execute_drop(stmt: &DropStmt) -> PgResult<QueryResult> {
    for names in &stmt.objects {
        // Earlier objects of the list may have changed the catalog.
        let catalog = catalog_snapshot();
        let dropped = match stmt.remove_type {
            ObjectType::Table | ObjectType::MatView | ObjectType::View => {
                drop_relation(&catalog, stmt.remove_type, names)?
            }
            ObjectType::Index => drop_index(&catalog, names)?,
            ObjectType::Function => drop_function(&catalog, names)?,
            ObjectType::Type | ObjectType::Domain => drop_type(&catalog, stmt.remove_type, names)?,
        };
        if !dropped {
            let name = names.join(".");
            if !stmt.missing_ok {
                return Err(missing(stmt.remove_type, &name));
            }
            info!("{} \"{name}\" does not exist, skipping", object_noun(stmt.remove_type));
        }
    }
    Ok(QueryResult::command(command_tag(stmt.remove_type)))
}

#[cfg(test)]
mod tests {
    use crate::tcop::engine::{reset_global_state_for_tests, run_statement, with_global_state_lock};

    #[test]
    fn drop_checks_object_kind_and_existence() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement("CREATE TABLE dt (a int)").unwrap();
            run_statement("CREATE MATERIALIZED VIEW dmv AS SELECT a FROM dt").unwrap();
            let err = run_statement("DROP TABLE dmv").unwrap_err();
            assert_eq!(err.code(), "42809");
            assert_eq!(run_statement("DROP TABLE nope").unwrap_err().code(), "42P01");
            let ok = run_statement("DROP TABLE IF EXISTS nope").unwrap().pop().unwrap();
            assert_eq!(ok.command_tag, "DROP TABLE");
            run_statement("DROP MATERIALIZED VIEW dmv").unwrap();
            run_statement("DROP TABLE dt").unwrap();
            assert_eq!(run_statement("SELECT * FROM dt").unwrap_err().code(), "42P01");
        });
    }

    #[test]
    fn drop_index_and_function() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement("CREATE TABLE di (a int)").unwrap();
            run_statement("CREATE UNIQUE INDEX di_a ON di (a)").unwrap();
            run_statement("DROP INDEX di_a").unwrap();
            run_statement("INSERT INTO di VALUES (1), (1)").unwrap();
            assert_eq!(run_statement("DROP INDEX di_a").unwrap_err().code(), "42704");

            run_statement("CREATE FUNCTION f1(int) RETURNS int LANGUAGE sql AS 'SELECT $1'").unwrap();
            run_statement("CREATE FUNCTION f1(text) RETURNS text LANGUAGE sql AS 'SELECT $1'").unwrap();
            assert_eq!(run_statement("DROP FUNCTION f1").unwrap_err().code(), "42725");
        });
    }
}
