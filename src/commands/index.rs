//! CREATE INDEX and the indexes behind UNIQUE / PRIMARY KEY constraints.
//!
//! Indexes are catalog entries only: uniqueness is enforced by scanning the
//! heap when rows are written, so an index needs its key columns, optional
//! key expressions and predicate, and the equality operator of each key
//! column's default btree operator class.

use std::sync::Arc;

use tracing::{debug, info};

use crate::catalog::oid::Oid;
use crate::catalog::table::{IndexInfo, RelKind, Relation};
use crate::catalog::{Catalog, catalog_snapshot, with_catalog_write};
use crate::executor::exec_indexing::validate_unique_index;
use crate::executor::exec_utils::EState;
use crate::nodes::node_funcs::expr_type;
use crate::nodes::parsenodes::{IndexElem, IndexStmt, RawExpr};
use crate::nodes::primnodes::Expr;
use crate::parser::parse_node::ParseExprKind;
use crate::storage::heap::heap_live_tuples;
use crate::tcop::engine::QueryResult;
use crate::utils::elog::{PgError, PgResult, SqlState};

use super::create_table::{choose_name, transform_relation_expr};
use super::open_relation;

/// Everything needed to build one index on an existing relation.
#[derive(Debug, Clone, Copy)]
pub struct IndexDefinition<'a> {
    pub name: Option<&'a str>,
    pub params: &'a [IndexElem],
    pub predicate: Option<&'a RawExpr>,
    pub unique: bool,
    pub primary: bool,
    /// Backs a UNIQUE or PRIMARY KEY constraint, which names it `_key`/`_pkey`.
    pub is_constraint: bool,
}

fn default_index_name(rel: &Relation, def: &IndexDefinition<'_>, colnames: &[String]) -> String {
    if def.primary {
        return format!("{}_pkey", rel.name);
    }
    let suffix = if def.is_constraint { "key" } else { "idx" };
    format!("{}_{}_{suffix}", rel.name, colnames.join("_"))
}

/// Resolve key columns and expressions. Returns the key attribute numbers,
/// the analyzed expressions and a display name for each key.
fn index_keys(
    catalog: &Catalog,
    rel: &Relation,
    params: &[IndexElem],
    source_text: &str,
) -> PgResult<(Vec<i16>, Vec<Expr>, Vec<String>)> {
    let mut keys = Vec::with_capacity(params.len());
    let mut exprs = Vec::new();
    let mut names = Vec::with_capacity(params.len());
    for param in params {
        match (&param.name, &param.expr) {
            (Some(colname), _) => {
                let attno = rel.desc.attnum_by_name(colname).ok_or_else(|| {
                    PgError::new(
                        SqlState::UndefinedColumn,
                        format!("column \"{colname}\" does not exist"),
                    )
                })?;
                keys.push(attno);
                names.push(colname.clone());
            }
            (None, Some(raw)) => {
                let expr = transform_relation_expr(catalog, rel, raw, ParseExprKind::IndexExpression, source_text)?;
                keys.push(0);
                exprs.push(expr);
                names.push("expr".to_string());
            }
            (None, None) => {
                return Err(PgError::new(SqlState::SyntaxError, "index element has neither column nor expression"));
            }
        }
    }
    Ok((keys, exprs, names))
}

fn key_type(rel: &Relation, attno: i16, exprs: &mut std::slice::Iter<'_, Expr>) -> Option<Oid> {
    if attno > 0 {
        rel.desc.attr(attno).map(|attr| attr.typid)
    } else {
        exprs.next().map(expr_type)
    }
}

/// Primary-key columns become NOT NULL; existing nulls are an error.
fn mark_primary_key_columns(rel: &Relation, keys: &[i16]) -> PgResult<()> {
    let live = heap_live_tuples(rel.relfilenode)?;
    for &attno in keys {
        let idx = usize::try_from(attno - 1).unwrap_or(usize::MAX);
        if live.iter().any(|(_, values)| values.get(idx).is_some_and(|value| value.is_null())) {
            let name = rel.desc.attr(attno).map_or("?", |attr| attr.name.as_str());
            return Err(PgError::new(
                SqlState::NotNullViolation,
                format!("column \"{name}\" of relation \"{}\" contains null values", rel.name),
            ));
        }
    }
    Ok(())
}

/// Add an index to `relid`, checking existing rows when it is unique.
/// Returns the index name.
pub fn define_index(relid: Oid, def: &IndexDefinition<'_>, source_text: &str) -> PgResult<String> {
    let catalog = catalog_snapshot();
    let rel = catalog
        .relation(relid)
        .ok_or_else(|| PgError::new(SqlState::UndefinedTable, format!("relation {relid} does not exist")))?;
    if !matches!(rel.kind, RelKind::Table | RelKind::MatView) {
        return Err(PgError::new(
            SqlState::WrongObjectType,
            format!("cannot create index on relation \"{}\"", rel.name),
        )
        .with_detail(format!("This operation is not supported for {}s.", rel.kind.describe())));
    }
    if def.primary && rel.indexes.iter().any(|index| index.primary) {
        return Err(PgError::new(
            SqlState::InvalidTableDefinition,
            format!("multiple primary keys for table \"{}\" are not allowed", rel.name),
        ));
    }

    let (keys, exprs, colnames) = index_keys(&catalog, rel, def.params, source_text)?;
    let mut expr_iter = exprs.iter();
    let mut eq_ops = Vec::with_capacity(keys.len());
    for &attno in &keys {
        let typid = key_type(rel, attno, &mut expr_iter).unwrap_or_default();
        let ops = catalog.sort_group_operators(typid).ok_or_else(|| {
            PgError::new(
                SqlState::UndefinedObject,
                format!(
                    "data type {} has no default operator class for access method \"btree\"",
                    catalog.format_type(typid)
                ),
            )
            .with_hint("You must specify an operator class for the index or define a default operator class for the data type.")
        })?;
        eq_ops.push(ops.eq);
    }
    let predicate = def
        .predicate
        .map(|raw| transform_relation_expr(&catalog, rel, raw, ParseExprKind::IndexPredicate, source_text))
        .transpose()?;

    let name = match def.name {
        Some(name) => {
            let taken = catalog.relation_in_namespace(rel.namespace, name).is_some()
                || catalog
                    .relations()
                    .filter(|other| other.namespace == rel.namespace)
                    .any(|other| other.indexes.iter().any(|index| index.name == name));
            if taken {
                return Err(PgError::new(
                    SqlState::DuplicateTable,
                    format!("relation \"{name}\" already exists"),
                ));
            }
            name.to_string()
        }
        None => choose_name(&catalog, rel.namespace, &default_index_name(rel, def, &colnames), &[]),
    };

    if def.primary {
        mark_primary_key_columns(rel, &keys)?;
    }
    let mut index = IndexInfo {
        oid: 0,
        name: name.clone(),
        keys,
        exprs,
        predicate,
        unique: def.unique,
        primary: def.primary,
        eq_ops,
    };
    if index.unique {
        let mut estate = EState::standalone(Arc::clone(&catalog));
        validate_unique_index(rel, &index, &mut estate)?;
    }

    let primary_keys = if def.primary { index.keys.clone() } else { Vec::new() };
    with_catalog_write(|c| {
        index.oid = c.next_oid();
        if let Some(rel) = c.relation_mut(relid) {
            for attno in primary_keys {
                if let Some(attr) = rel.desc.attr_mut(attno) {
                    attr.not_null = true;
                }
            }
            rel.indexes.push(index);
        }
    });
    debug!(index = %name, relation = %rel.name, unique = def.unique, "defined index");
    Ok(name)
}

pub fn execute_create_index(stmt: &IndexStmt, source_text: &str) -> PgResult<QueryResult> {
    let catalog = catalog_snapshot();
    let rel = open_relation(&catalog, &stmt.relation)?;
    if stmt.if_not_exists
        && let Some(name) = &stmt.idxname
        && rel.indexes.iter().any(|index| &index.name == name)
    {
        info!(index = %name, "relation already exists, skipping");
        return Ok(QueryResult::command("CREATE INDEX"));
    }
    define_index(
        rel.oid,
        &IndexDefinition {
            name: stmt.idxname.as_deref(),
            params: &stmt.params,
            predicate: stmt.where_clause.as_ref(),
            unique: stmt.unique,
            primary: false,
            is_constraint: false,
        },
        source_text,
    )?;
    Ok(QueryResult::command("CREATE INDEX"))
}

#[cfg(test)]
mod tests {
    use crate::catalog::catalog_snapshot;
    use crate::tcop::engine::{reset_global_state_for_tests, run_statement, with_global_state_lock};

    #[test]
    fn unique_index_over_duplicates_fails() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement("CREATE TABLE ix (a int, b int)").unwrap();
            run_statement("INSERT INTO ix VALUES (1, 1), (1, 2), (NULL, 3), (NULL, 4)").unwrap();
            let err = run_statement("CREATE UNIQUE INDEX ON ix (a)").unwrap_err();
            assert_eq!(err.code(), "23505");
            run_statement("CREATE UNIQUE INDEX ON ix (b)").unwrap();
            let catalog = catalog_snapshot();
            let rel = catalog.relations().find(|rel| rel.name == "ix").unwrap();
            assert_eq!(rel.indexes[0].name, "ix_b_idx");
            assert!(rel.indexes[0].is_usable_for_refresh());
        });
    }

    #[test]
    fn partial_and_expression_indexes_are_not_usable_for_refresh() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement("CREATE TABLE px (a int, b text)").unwrap();
            run_statement("CREATE UNIQUE INDEX px_part ON px (a) WHERE a > 0").unwrap();
            run_statement("CREATE UNIQUE INDEX px_expr ON px (lower(b))").unwrap();
            let catalog = catalog_snapshot();
            let rel = catalog.relations().find(|rel| rel.name == "px").unwrap();
            assert!(rel.indexes.iter().all(|index| !index.is_usable_for_refresh()));
            let err = run_statement("CREATE INDEX px_part ON px (b)").unwrap_err();
            assert_eq!(err.code(), "42P07");
        });
    }

    #[test]
    fn second_primary_key_is_rejected() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            let err = run_statement("CREATE TABLE pk2 (a int PRIMARY KEY, b int, PRIMARY KEY (b))").unwrap_err();
            assert_eq!(err.code(), "42P16");
        });
    }
}
