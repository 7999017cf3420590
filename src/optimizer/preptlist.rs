//! Target-list expansion for INSERT, UPDATE and DELETE.
//!
//! ModifyTable wants one source column per table attribute, in attribute
//! order, followed by junk columns: the row's ctid for UPDATE and DELETE,
//! the MULTIEXPR sub-selects of an UPDATE, and any Vars of other relations
//! that RETURNING reads.

use tracing::trace;

use crate::catalog::Catalog;
use crate::catalog::oid::{INVALID_OID, Oid};
use crate::catalog::pg_type::TIDOID;
use crate::catalog::table::Relation;
use crate::nodes::makefuncs::{make_null_const, make_var};
use crate::nodes::node_funcs::pull_vars;
use crate::nodes::parsenodes::{CmdType, Query, RteKind};
use crate::nodes::primnodes::{Expr, TargetEntry};
use crate::nodes::tupdesc::SELF_ITEM_POINTER_ATTRIBUTE_NUMBER;
use crate::utils::elog::{PgError, PgResult, SqlState, elog};

/// The relation a data-modifying query targets.
pub fn result_relation_oid(query: &Query) -> PgResult<Oid> {
    match query.rte(query.result_relation).map(|rte| &rte.kind) {
        Some(RteKind::Relation { relid, .. }) => Ok(*relid),
        _ => Err(elog("result relation is not a plain relation")),
    }
}

pub fn preprocess_targetlist(catalog: &Catalog, query: &mut Query) -> PgResult<()> {
    let rtindex = query.result_relation;
    let relid = result_relation_oid(query)?;
    let rel = catalog
        .relation(relid)
        .ok_or_else(|| elog(format!("relation {relid} does not exist")))?;
    let command = query.command_type;
    let (assigned, junk): (Vec<TargetEntry>, Vec<TargetEntry>) =
        std::mem::take(&mut query.target_list).into_iter().partition(|tle| !tle.resjunk);

    let mut tlist: Vec<TargetEntry> = Vec::new();
    match command {
        CmdType::Insert | CmdType::Update => {
            let merged = merge_assignments(rel, assigned)?;
            for (idx, attr) in rel.desc.attrs.iter().enumerate() {
                let attno = (idx + 1) as i16;
                let expr = match merged.get(idx).cloned().flatten() {
                    _ if attr.dropped => make_null_const(attr.typid, attr.typmod, attr.collation),
                    Some(Expr::SetToDefault(_)) | None if command == CmdType::Insert => {
                        column_default(rel, attno)
                    }
                    Some(Expr::SetToDefault(_)) => column_default(rel, attno),
                    Some(expr) => expr,
                    None => make_var(rtindex, attno, attr.typid, attr.typmod, attr.collation, 0),
                };
                tlist.push(TargetEntry::new(expr, attno, Some(attr.name.clone()), false));
            }
        }
        _ => {}
    }
    if matches!(command, CmdType::Update | CmdType::Delete) {
        let ctid = make_var(rtindex, SELF_ITEM_POINTER_ATTRIBUTE_NUMBER, TIDOID, -1, INVALID_OID, 0);
        tlist.push(TargetEntry::new(ctid, 0, Some("ctid".to_string()), true));
        tlist.extend(junk);
        let mut vars = Vec::new();
        for tle in &query.returning_list {
            pull_vars(&tle.expr, &mut vars);
        }
        for var in vars.into_iter().filter(|var| var.varno != rtindex) {
            tlist.push(TargetEntry::new(Expr::Var(var), 0, None, true));
        }
    }
    for (idx, tle) in tlist.iter_mut().enumerate() {
        tle.resno = (idx + 1) as i16;
    }
    trace!(relation = %rel.name, columns = tlist.len(), "expanded modify target list");
    query.target_list = tlist;
    Ok(())
}

fn column_default(rel: &Relation, attno: i16) -> Expr {
    match rel.default_for(attno) {
        Some(default) => default.clone(),
        None => {
            let (typid, typmod, collation) = rel
                .desc
                .attr(attno)
                .map_or((INVALID_OID, -1, INVALID_OID), |a| (a.typid, a.typmod, a.collation));
            make_null_const(typid, typmod, collation)
        }
    }
}

/// Collapse several assignments to one column (`a[1] = x, a[2] = y`) into
/// a single nested expression, indexed by attribute position.
fn merge_assignments(rel: &Relation, assigned: Vec<TargetEntry>) -> PgResult<Vec<Option<Expr>>> {
    let mut merged: Vec<Option<Expr>> = vec![None; rel.desc.natts()];
    for tle in assigned {
        let slot = usize::try_from(tle.resno)
            .ok()
            .and_then(|resno| resno.checked_sub(1))
            .and_then(|idx| merged.get_mut(idx))
            .ok_or_else(|| elog(format!("target entry {} is outside relation \"{}\"", tle.resno, rel.name)))?;
        *slot = Some(match slot.take() {
            None => tle.expr,
            Some(prior) => merge_into(prior, tle.expr).map_err(|_| {
                PgError::new(
                    SqlState::SyntaxError,
                    format!(
                        "multiple assignments to same column \"{}\"",
                        tle.resname.as_deref().unwrap_or_default()
                    ),
                )
            })?,
        });
    }
    Ok(merged)
}

/// Make `later` apply on top of `prior` instead of the column's old value.
fn merge_into(prior: Expr, later: Expr) -> PgResult<Expr> {
    match later {
        Expr::SubscriptingRef(mut sref) if sref.refassgnexpr.is_some() => {
            sref.refexpr = prior;
            Ok(Expr::SubscriptingRef(sref))
        }
        Expr::FieldStore(mut later_store) => match prior {
            Expr::FieldStore(mut prior_store) if prior_store.arg == later_store.arg => {
                prior_store.fieldnums.append(&mut later_store.fieldnums);
                prior_store.newvals.append(&mut later_store.newvals);
                Ok(Expr::FieldStore(prior_store))
            }
            prior => {
                later_store.arg = prior;
                Ok(Expr::FieldStore(later_store))
            }
        },
        _ => Err(elog("conflicting assignments")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_analyze, raw_parser};
    use crate::tcop::engine::{reset_global_state_for_tests, run_statement, with_global_state_lock};

    fn prepared(sql: &str) -> Query {
        let catalog = crate::catalog::catalog_snapshot();
        let stmts = raw_parser(sql).unwrap();
        let mut query = parse_analyze(&catalog, &stmts[0], sql, &[]).unwrap();
        preprocess_targetlist(&catalog, &mut query).unwrap();
        query
    }

    #[test]
    fn insert_fills_defaults_and_nulls() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement("CREATE TABLE p (a int, b int DEFAULT 7, c text)").unwrap();
            let query = prepared("INSERT INTO p (c) VALUES ('x')");
            assert_eq!(query.target_list.len(), 3);
            assert!(matches!(&query.target_list[0].expr, Expr::Const(c) if c.constvalue.is_null()));
            assert!(matches!(&query.target_list[1].expr, Expr::Const(c) if c.constvalue.as_i64() == Some(7)));
        });
    }

    #[test]
    fn update_keeps_unassigned_columns_and_adds_ctid() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement("CREATE TABLE p (a int, b int)").unwrap();
            let query = prepared("UPDATE p SET b = a + 1");
            assert_eq!(query.target_list.len(), 3);
            assert!(matches!(&query.target_list[0].expr, Expr::Var(v) if v.varattno == 1));
            let ctid = &query.target_list[2];
            assert!(ctid.resjunk);
            assert!(matches!(&ctid.expr, Expr::Var(v) if v.varattno == SELF_ITEM_POINTER_ATTRIBUTE_NUMBER));
        });
    }

    #[test]
    fn array_element_assignments_merge() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement("CREATE TABLE p (a int[])").unwrap();
            let query = prepared("UPDATE p SET a[1] = 1, a[2] = 2");
            let Expr::SubscriptingRef(outer) = &query.target_list[0].expr else {
                panic!("expected an assignment");
            };
            assert!(matches!(&outer.refexpr, Expr::SubscriptingRef(_)));
        });
    }
}
