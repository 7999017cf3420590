//! Sort and Unique, plus the ordering helpers shared with aggregation and
//! window evaluation.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::nodes::datum::{Datum, row_group_key};
use crate::nodes::plannodes::{AttrNumber, Plan, SortKey};
use crate::utils::adt::cmp::compare_datums;
use crate::utils::elog::{PgError, PgResult, elog};

use super::exec_proc_node::exec_outer_plan;
use super::exec_utils::EState;
use super::tuptable::TupleTableSlot;

/// Direction of one ordering column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct SortDirection {
    pub descending: bool,
    pub nulls_first: bool,
}

impl SortDirection {
    pub fn new(descending: bool, nulls_first: bool) -> Self {
        Self {
            descending,
            nulls_first,
        }
    }
}

pub(crate) fn compare_column(a: &Datum, b: &Datum, dir: SortDirection) -> PgResult<Ordering> {
    Ok(match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) if dir.nulls_first => Ordering::Less,
        (true, false) => Ordering::Greater,
        (false, true) if dir.nulls_first => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => {
            let ord = compare_datums(a, b)?;
            if dir.descending { ord.reverse() } else { ord }
        }
    })
}

/// Lexicographic comparison of parallel key vectors.
pub(crate) fn compare_keys(a: &[Datum], b: &[Datum], dirs: &[SortDirection]) -> PgResult<Ordering> {
    for ((x, y), dir) in a.iter().zip(b).zip(dirs) {
        let ord = compare_column(x, y, *dir)?;
        if ord != Ordering::Equal {
            return Ok(ord);
        }
    }
    Ok(Ordering::Equal)
}

/// Stable sort with a fallible comparator; the first comparison error wins.
pub(crate) fn try_sort_by<T>(items: &mut [T], mut cmp: impl FnMut(&T, &T) -> PgResult<Ordering>) -> PgResult<()> {
    let mut failure: Option<PgError> = None;
    items.sort_by(|a, b| match cmp(a, b) {
        Ok(ord) => ord,
        Err(err) => {
            failure.get_or_insert(err);
            Ordering::Equal
        }
    });
    failure.map_or(Ok(()), Err)
}

fn key_values(slot: &TupleTableSlot, cols: impl Iterator<Item = AttrNumber>) -> PgResult<Vec<Datum>> {
    cols.map(|col| {
        slot.values
            .get((col as usize).wrapping_sub(1))
            .cloned()
            .ok_or_else(|| elog(format!("sort column {col} out of range")))
    })
    .collect()
}

pub fn exec_sort(plan: &Plan, keys: &[SortKey], estate: &mut EState) -> PgResult<Vec<TupleTableSlot>> {
    let rows = exec_outer_plan(plan, estate)?;
    let dirs: Vec<SortDirection> = keys
        .iter()
        .map(|key| SortDirection::new(key.descending, key.nulls_first))
        .collect();
    let mut keyed = rows
        .into_iter()
        .map(|row| Ok((key_values(&row, keys.iter().map(|key| key.col))?, row)))
        .collect::<PgResult<Vec<_>>>()?;
    try_sort_by(&mut keyed, |a, b| compare_keys(&a.0, &b.0, &dirs))?;
    Ok(keyed.into_iter().map(|(_, row)| row).collect())
}

pub fn exec_unique(plan: &Plan, cols: &[AttrNumber], estate: &mut EState) -> PgResult<Vec<TupleTableSlot>> {
    let rows = exec_outer_plan(plan, estate)?;
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let key = row_group_key(&key_values(&row, cols.iter().copied())?);
        if seen.insert(key) {
            out.push(row);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nulls_follow_the_requested_placement() {
        let asc = SortDirection::new(false, false);
        let desc_nulls_first = SortDirection::new(true, true);
        assert_eq!(compare_column(&Datum::Null, &Datum::Int4(1), asc).unwrap(), Ordering::Greater);
        assert_eq!(
            compare_column(&Datum::Null, &Datum::Int4(1), desc_nulls_first).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            compare_column(&Datum::Int4(2), &Datum::Int4(1), desc_nulls_first).unwrap(),
            Ordering::Less
        );
    }

    #[test]
    fn sort_is_stable_and_reports_errors() {
        let mut items = vec![(1, 'a'), (0, 'b'), (1, 'c')];
        try_sort_by(&mut items, |a, b| Ok(a.0.cmp(&b.0))).unwrap();
        assert_eq!(items, vec![(0, 'b'), (1, 'a'), (1, 'c')]);

        let mut values = vec![Datum::Int4(1), Datum::text("x")];
        assert!(try_sort_by(&mut values, |a, b| compare_datums(a, b)).is_err());
    }
}
