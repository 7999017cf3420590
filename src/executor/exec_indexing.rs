//! Constraint enforcement for rows about to be stored: NOT NULL, CHECK and
//! unique indexes.

use std::collections::HashSet;

use tracing::trace;

use crate::catalog::table::{IndexInfo, Relation};
use crate::nodes::datum::{Datum, KeyDatum, row_group_key};
use crate::storage::heap::heap_live_tuples;
use crate::utils::adt::io::datum_out;
use crate::utils::elog::{PgError, PgResult, SqlState};

use super::exec_expr::exec_eval_expr;
use super::exec_utils::{EState, ExprContext, exec_qual};
use super::tuptable::TupleTableSlot;

fn render_values<'a>(values: impl Iterator<Item = &'a Datum>) -> String {
    values
        .map(|value| match value {
            Datum::Null => "null".to_string(),
            other => datum_out(other),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn failing_row(rel: &Relation, values: &[Datum]) -> String {
    let live = rel
        .desc
        .attrs
        .iter()
        .zip(values)
        .filter(|(attr, _)| !attr.dropped)
        .map(|(_, value)| value);
    format!("Failing row contains ({}).", render_values(live))
}

/// NOT NULL and CHECK constraints of `rel` against a candidate row.
pub fn exec_constraints(rel: &Relation, slot: &TupleTableSlot, estate: &mut EState) -> PgResult<()> {
    for (attr, value) in rel.desc.attrs.iter().zip(&slot.values) {
        if attr.not_null && !attr.dropped && value.is_null() {
            return Err(PgError::new(
                SqlState::NotNullViolation,
                format!(
                    "null value in column \"{}\" of relation \"{}\" violates not-null constraint",
                    attr.name, rel.name
                ),
            )
            .with_detail(failing_row(rel, &slot.values)));
        }
    }

    let ctx = ExprContext::default().with_scan(slot);
    for (name, check) in &rel.checks {
        if !exec_qual(std::slice::from_ref(check), &ctx, estate, true)? {
            return Err(PgError::new(
                SqlState::CheckViolation,
                format!("new row for relation \"{}\" violates check constraint \"{name}\"", rel.name),
            )
            .with_detail(failing_row(rel, &slot.values)));
        }
    }
    Ok(())
}

/// Key of `slot` in `index`, or `None` when the row is outside a partial
/// index or a key column is null.
fn index_key(index: &IndexInfo, slot: &TupleTableSlot, estate: &mut EState) -> PgResult<Option<Vec<Datum>>> {
    let ctx = ExprContext::default().with_scan(slot);
    if let Some(predicate) = &index.predicate
        && !exec_qual(std::slice::from_ref(predicate), &ctx, estate, false)?
    {
        return Ok(None);
    }
    let mut exprs = index.exprs.iter();
    let mut key = Vec::with_capacity(index.keys.len());
    for &attno in &index.keys {
        let value = if attno > 0 {
            slot.get_attr(attno)?
        } else {
            match exprs.next() {
                Some(expr) => exec_eval_expr(expr, &ctx, estate)?,
                None => Datum::Null,
            }
        };
        if value.is_null() {
            return Ok(None);
        }
        key.push(value);
    }
    Ok(Some(key))
}

fn key_columns(rel: &Relation, index: &IndexInfo) -> String {
    index
        .keys
        .iter()
        .map(|&attno| {
            rel.desc
                .attr(attno)
                .map_or_else(|| "expr".to_string(), |attr| attr.name.clone())
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Unique indexes of `rel` against every live tuple of its heap. Nulls
/// never conflict.
pub fn check_unique_constraints(rel: &Relation, slot: &TupleTableSlot, estate: &mut EState) -> PgResult<()> {
    let unique: Vec<&IndexInfo> = rel.unique_indexes().collect();
    if unique.is_empty() {
        return Ok(());
    }
    let existing = heap_live_tuples(rel.relfilenode)?;
    for index in unique {
        let Some(key) = index_key(index, slot, estate)? else {
            continue;
        };
        let wanted = row_group_key(&key);
        for (tid, values) in &existing {
            if slot.tid == Some(*tid) {
                continue;
            }
            let other = TupleTableSlot::from_heap(values.clone(), *tid, rel.oid);
            if index_key(index, &other, estate)?.is_some_and(|other| row_group_key(&other) == wanted) {
                trace!(index = %index.name, "unique conflict");
                return Err(PgError::new(
                    SqlState::UniqueViolation,
                    format!("duplicate key value violates unique constraint \"{}\"", index.name),
                )
                .with_detail(format!(
                    "Key ({})=({}) already exists.",
                    key_columns(rel, index),
                    render_values(key.iter())
                )));
            }
        }
    }
    Ok(())
}

/// Verify that existing rows satisfy a new unique index.
pub fn validate_unique_index(rel: &Relation, index: &IndexInfo, estate: &mut EState) -> PgResult<()> {
    let mut seen: HashSet<Vec<KeyDatum>> = HashSet::new();
    for (tid, values) in heap_live_tuples(rel.relfilenode)? {
        let slot = TupleTableSlot::from_heap(values, tid, rel.oid);
        let Some(key) = index_key(index, &slot, estate)? else {
            continue;
        };
        if !seen.insert(row_group_key(&key)) {
            return Err(PgError::new(
                SqlState::UniqueViolation,
                format!("could not create unique index \"{}\"", index.name),
            )
            .with_detail(format!(
                "Key ({})=({}) is duplicated.",
                key_columns(rel, index),
                render_values(key.iter())
            )));
        }
    }
    Ok(())
}
