//! Window evaluation.
//!
//! The node sorts its input once per window clause (partition keys, then
//! ordering keys), splits it into partitions and computes every window
//! function of that clause for each row. Rows leave in the order of the last
//! clause processed.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::ops::Range;

use rust_decimal::Decimal;
use tracing::debug;

use crate::catalog::CatalogOracle;
use crate::nodes::datum::Datum;
use crate::nodes::parsenodes::{FrameBoundKind, FrameMode};
use crate::nodes::plannodes::{Plan, WindowPlanClause};
use crate::nodes::primnodes::{Expr, WindowFunc};
use crate::utils::adt::int_arithmetic::int_arg;
use crate::utils::adt::math_functions::numeric_arg;
use crate::utils::elog::{PgError, PgResult, SqlState, elog};
use crate::utils::interrupt::check_for_interrupts;

use super::exec_expr::exec_eval_expr;
use super::exec_proc_node::exec_outer_plan;
use super::exec_utils::{EState, ExprContext, exec_project, exec_qual};
use super::node_agg::{AggCall, build_input_row, finalize_aggregate};
use super::node_sort::{SortDirection, compare_keys, try_sort_by};
use super::tuptable::TupleTableSlot;

struct WindowRow {
    slot: TupleTableSlot,
    values: Vec<Datum>,
    partition: Vec<Datum>,
    order: Vec<Datum>,
}

/// Offset of a frame bound, evaluated once per clause.
#[derive(Debug, Clone)]
enum FrameOffset {
    None,
    Rows(usize),
    Range(Decimal),
}

struct Partition<'a> {
    rows: &'a [WindowRow],
    /// Peer group of each row.
    group_of: Vec<usize>,
    /// Row range of each peer group.
    groups: Vec<Range<usize>>,
}

impl<'a> Partition<'a> {
    fn new(rows: &'a [WindowRow], dirs: &[SortDirection]) -> PgResult<Self> {
        let mut group_of = Vec::with_capacity(rows.len());
        let mut groups: Vec<Range<usize>> = Vec::new();
        for (idx, row) in rows.iter().enumerate() {
            let same = match groups.last() {
                Some(group) => compare_keys(&rows[group.start].order, &row.order, dirs)? == Ordering::Equal,
                None => false,
            };
            match groups.last_mut() {
                Some(group) if same => group.end = idx + 1,
                _ => groups.push(idx..idx + 1),
            }
            group_of.push(groups.len() - 1);
        }
        Ok(Self { rows, group_of, groups })
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn peers(&self, idx: usize) -> Range<usize> {
        self.groups[self.group_of[idx]].clone()
    }
}

pub fn exec_window_agg(
    plan: &Plan,
    clauses: &[WindowPlanClause],
    wfuncs: &[WindowFunc],
    estate: &mut EState,
) -> PgResult<Vec<TupleTableSlot>> {
    let input = exec_outer_plan(plan, estate)?;
    let nslots = wfuncs.iter().map(|wf| wf.wfuncno.max(0) as usize + 1).max().unwrap_or(0);
    let mut rows: Vec<WindowRow> = input
        .into_iter()
        .map(|slot| WindowRow {
            slot,
            values: vec![Datum::Null; nslots],
            partition: Vec::new(),
            order: Vec::new(),
        })
        .collect();

    for clause in clauses {
        let funcs: Vec<&WindowFunc> = wfuncs.iter().filter(|wf| wf.winref == clause.winref).collect();
        if funcs.is_empty() {
            continue;
        }
        let dirs: Vec<SortDirection> = clause
            .order
            .iter()
            .map(|key| SortDirection::new(key.descending, key.nulls_first))
            .collect();
        for row in &mut rows {
            let ctx = ExprContext::default().with_outer(&row.slot);
            row.partition = clause
                .partition
                .iter()
                .map(|expr| exec_eval_expr(expr, &ctx, estate))
                .collect::<PgResult<Vec<_>>>()?;
            row.order = clause
                .order
                .iter()
                .map(|key| exec_eval_expr(&key.expr, &ctx, estate))
                .collect::<PgResult<Vec<_>>>()?;
        }
        let partition_dirs = vec![SortDirection::default(); clause.partition.len()];
        try_sort_by(&mut rows, |a, b| {
            Ok(compare_keys(&a.partition, &b.partition, &partition_dirs)?
                .then(compare_keys(&a.order, &b.order, &dirs)?))
        })?;

        let start_offset = frame_offset(clause, clause.frame.start, clause.start_offset.as_ref(), "starting", estate)?;
        let end_offset = frame_offset(clause, clause.frame.end, clause.end_offset.as_ref(), "ending", estate)?;
        let frame = FrameSpec {
            clause,
            dirs: &dirs,
            start: &start_offset,
            end: &end_offset,
        };

        let mut start = 0;
        let mut npartitions = 0;
        while start < rows.len() {
            check_for_interrupts()?;
            let mut end = start + 1;
            while end < rows.len()
                && compare_keys(&rows[start].partition, &rows[end].partition, &partition_dirs)? == Ordering::Equal
            {
                end += 1;
            }
            let results = {
                let partition = Partition::new(&rows[start..end], &dirs)?;
                funcs
                    .iter()
                    .map(|wf| eval_window_function(wf, &partition, &frame, estate))
                    .collect::<PgResult<Vec<_>>>()?
            };
            for (wf, values) in funcs.iter().zip(results) {
                let slot = wf.wfuncno.max(0) as usize;
                for (row, value) in rows[start..end].iter_mut().zip(values) {
                    row.values[slot] = value;
                }
            }
            npartitions += 1;
            start = end;
        }
        debug!(winref = clause.winref, partitions = npartitions, functions = funcs.len(), "window clause evaluated");
    }

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        let ctx = ExprContext::default().with_outer(&row.slot).with_window(&row.values);
        if exec_qual(&plan.qual, &ctx, estate, false)? {
            out.push(exec_project(&plan.targetlist, &ctx, estate)?);
        }
    }
    Ok(out)
}

struct FrameSpec<'a> {
    clause: &'a WindowPlanClause,
    dirs: &'a [SortDirection],
    start: &'a FrameOffset,
    end: &'a FrameOffset,
}

fn frame_offset(
    clause: &WindowPlanClause,
    bound: FrameBoundKind,
    expr: Option<&Expr>,
    which: &str,
    estate: &mut EState,
) -> PgResult<FrameOffset> {
    if !matches!(bound, FrameBoundKind::OffsetPreceding | FrameBoundKind::OffsetFollowing) {
        return Ok(FrameOffset::None);
    }
    let expr = expr.ok_or_else(|| elog(format!("frame {which} offset is missing")))?;
    let value = exec_eval_expr(expr, &ExprContext::default(), estate)?;
    if value.is_null() {
        return Err(PgError::new(
            SqlState::NullValueNotAllowed,
            format!("frame {which} offset must not be null"),
        ));
    }
    match clause.frame.mode {
        FrameMode::Rows | FrameMode::Groups => {
            let offset = int_arg(&value)?;
            if offset < 0 {
                return Err(PgError::new(
                    SqlState::InvalidPrecedingOrFollowingSize,
                    format!("frame {which} offset must not be negative"),
                ));
            }
            Ok(FrameOffset::Rows(offset as usize))
        }
        FrameMode::Range => {
            let offset = numeric_arg(&value)?;
            if offset.is_sign_negative() && !offset.is_zero() {
                return Err(PgError::new(
                    SqlState::InvalidPrecedingOrFollowingSize,
                    "invalid preceding or following size in window function",
                ));
            }
            Ok(FrameOffset::Range(offset))
        }
    }
}

impl FrameSpec<'_> {
    /// Rows of the frame of row `idx`; may be empty.
    fn bounds(&self, partition: &Partition<'_>, idx: usize) -> PgResult<Range<usize>> {
        let n = partition.len();
        let start = self.bound(partition, idx, self.clause.frame.start, self.start, true)?;
        let end = self.bound(partition, idx, self.clause.frame.end, self.end, false)?;
        Ok(start.min(n)..end.min(n).max(start.min(n)))
    }

    /// First row of the frame (`is_start`) or one past its last row.
    fn bound(
        &self,
        partition: &Partition<'_>,
        idx: usize,
        kind: FrameBoundKind,
        offset: &FrameOffset,
        is_start: bool,
    ) -> PgResult<usize> {
        let n = partition.len();
        let peers = partition.peers(idx);
        let mode = self.clause.frame.mode;
        Ok(match kind {
            FrameBoundKind::UnboundedPreceding => 0,
            FrameBoundKind::UnboundedFollowing => n,
            FrameBoundKind::CurrentRow => match (mode, is_start) {
                (FrameMode::Rows, true) => idx,
                (FrameMode::Rows, false) => idx + 1,
                (_, true) => peers.start,
                (_, false) => peers.end,
            },
            FrameBoundKind::OffsetPreceding | FrameBoundKind::OffsetFollowing => {
                let following = kind == FrameBoundKind::OffsetFollowing;
                match (mode, offset) {
                    (FrameMode::Rows, FrameOffset::Rows(k)) => {
                        let target = if following {
                            idx.checked_add(*k)
                        } else {
                            idx.checked_sub(*k)
                        };
                        match (target, is_start) {
                            (Some(t), true) => t,
                            (Some(t), false) => t.saturating_add(1),
                            (None, _) if following => n,
                            (None, _) => 0,
                        }
                    }
                    (FrameMode::Groups, FrameOffset::Rows(k)) => {
                        let group = partition.group_of[idx];
                        let target = if following {
                            group.checked_add(*k)
                        } else {
                            group.checked_sub(*k)
                        };
                        match target.and_then(|g| partition.groups.get(g)) {
                            Some(range) if is_start => range.start,
                            Some(range) => range.end,
                            None if following => n,
                            None => 0,
                        }
                    }
                    (FrameMode::Range, FrameOffset::Range(k)) => {
                        self.range_bound(partition, idx, *k, following, is_start)?
                    }
                    _ => return Err(elog("frame offset does not match the frame mode")),
                }
            }
        })
    }

    /// RANGE offset bound: rows whose ordering key lies within `offset` of
    /// the current row's key in the sort direction.
    fn range_bound(
        &self,
        partition: &Partition<'_>,
        idx: usize,
        offset: Decimal,
        following: bool,
        is_start: bool,
    ) -> PgResult<usize> {
        if self.dirs.len() != 1 {
            return Err(PgError::new(
                SqlState::WindowingError,
                "RANGE with offset PRECEDING/FOLLOWING requires exactly one ORDER BY column",
            ));
        }
        let descending = self.dirs[0].descending;
        let current = &partition.rows[idx].order[0];
        if current.is_null() {
            let peers = partition.peers(idx);
            return Ok(if is_start { peers.start } else { peers.end });
        }
        let current = numeric_arg(current)?;
        let limit = if following { offset } else { -offset };
        let distance = |row: &WindowRow| -> PgResult<Option<Decimal>> {
            let key = &row.order[0];
            if key.is_null() {
                return Ok(None);
            }
            let key = numeric_arg(key)?;
            Ok(Some(if descending { current - key } else { key - current }))
        };
        if is_start {
            for (pos, row) in partition.rows.iter().enumerate() {
                if let Some(d) = distance(row)?
                    && d >= limit
                {
                    return Ok(pos);
                }
            }
            Ok(partition.len())
        } else {
            let mut end = 0;
            for (pos, row) in partition.rows.iter().enumerate() {
                if let Some(d) = distance(row)?
                    && d <= limit
                {
                    end = pos + 1;
                }
            }
            Ok(end)
        }
    }
}

fn eval_arg(wf: &WindowFunc, n: usize, row: &WindowRow, estate: &mut EState) -> PgResult<Datum> {
    match wf.args.get(n) {
        Some(expr) => exec_eval_expr(expr, &ExprContext::default().with_outer(&row.slot), estate),
        None => Ok(Datum::Null),
    }
}

fn eval_window_function(
    wf: &WindowFunc,
    partition: &Partition<'_>,
    frame: &FrameSpec<'_>,
    estate: &mut EState,
) -> PgResult<Vec<Datum>> {
    let n = partition.len();
    if wf.winagg {
        return eval_window_aggregate(wf, partition, frame, estate);
    }
    let name = estate
        .catalog
        .proc_by_id(wf.winfnoid)
        .map(|proc| proc.prosrc.clone())
        .ok_or_else(|| elog(format!("cache lookup failed for window function {}", wf.winfnoid)))?;

    let mut out = Vec::with_capacity(n);
    match name.as_str() {
        "row_number" => out.extend((1..=n as i64).map(Datum::Int8)),
        "rank" => out.extend((0..n).map(|idx| Datum::Int8(partition.peers(idx).start as i64 + 1))),
        "dense_rank" => out.extend((0..n).map(|idx| Datum::Int8(partition.group_of[idx] as i64 + 1))),
        "percent_rank" => out.extend((0..n).map(|idx| {
            Datum::Float8(if n > 1 {
                partition.peers(idx).start as f64 / (n - 1) as f64
            } else {
                0.0
            })
        })),
        "cume_dist" => out.extend((0..n).map(|idx| Datum::Float8(partition.peers(idx).end as f64 / n as f64))),
        "ntile" => {
            for idx in 0..n {
                let buckets = eval_arg(wf, 0, &partition.rows[idx], estate)?;
                if buckets.is_null() {
                    out.push(Datum::Null);
                    continue;
                }
                let buckets = int_arg(&buckets)?;
                if buckets <= 0 {
                    return Err(PgError::new(
                        SqlState::InvalidArgumentForNtile,
                        "argument of ntile must be greater than zero",
                    ));
                }
                out.push(Datum::Int4(ntile_bucket(idx, n, buckets as usize) as i32));
            }
        }
        "lag" | "lead" => {
            let values = (0..n)
                .map(|idx| eval_arg(wf, 0, &partition.rows[idx], estate))
                .collect::<PgResult<Vec<_>>>()?;
            for idx in 0..n {
                let row = &partition.rows[idx];
                let offset = if wf.args.len() > 1 {
                    eval_arg(wf, 1, row, estate)?
                } else {
                    Datum::Int8(1)
                };
                if offset.is_null() {
                    out.push(Datum::Null);
                    continue;
                }
                let mut offset = int_arg(&offset)?;
                if name == "lag" {
                    offset = -offset;
                }
                let target = idx as i64 + offset;
                let value = if (0..n as i64).contains(&target) {
                    values[target as usize].clone()
                } else {
                    eval_arg(wf, 2, row, estate)?
                };
                out.push(value);
            }
        }
        "first_value" | "last_value" | "nth_value" => {
            let values = (0..n)
                .map(|idx| eval_arg(wf, 0, &partition.rows[idx], estate))
                .collect::<PgResult<Vec<_>>>()?;
            for idx in 0..n {
                let bounds = frame.bounds(partition, idx)?;
                let position = match name.as_str() {
                    "first_value" => Some(bounds.start),
                    "last_value" => bounds.end.checked_sub(1),
                    _ => {
                        let nth = eval_arg(wf, 1, &partition.rows[idx], estate)?;
                        if nth.is_null() {
                            out.push(Datum::Null);
                            continue;
                        }
                        let nth = int_arg(&nth)?;
                        if nth <= 0 {
                            return Err(PgError::new(
                                SqlState::InvalidArgumentForNthValue,
                                "argument of nth_value must be greater than zero",
                            ));
                        }
                        bounds.start.checked_add(nth as usize - 1)
                    }
                };
                let value = position
                    .filter(|pos| bounds.contains(pos))
                    .map_or(Datum::Null, |pos| values[pos].clone());
                out.push(value);
            }
        }
        other => return Err(elog(format!("unsupported window function \"{other}\""))),
    }
    Ok(out)
}

/// 1-based bucket of row `idx` when `n` rows are spread over `buckets`
/// buckets whose sizes differ by at most one, larger buckets first.
fn ntile_bucket(idx: usize, n: usize, buckets: usize) -> usize {
    let per = n / buckets;
    let extra = n % buckets;
    let big = extra * (per + 1);
    if idx < big {
        idx / (per + 1) + 1
    } else if per == 0 {
        extra + 1
    } else {
        extra + (idx - big) / per + 1
    }
}

fn eval_window_aggregate(
    wf: &WindowFunc,
    partition: &Partition<'_>,
    frame: &FrameSpec<'_>,
    estate: &mut EState,
) -> PgResult<Vec<Datum>> {
    let call = AggCall::for_window(estate, wf.winfnoid, wf.wintype, &wf.args, wf.aggfilter.as_ref())?;
    let inputs = partition
        .rows
        .iter()
        .map(|row| build_input_row(&call, &row.slot, estate))
        .collect::<PgResult<Vec<_>>>()?;
    let mut cache: HashMap<(usize, usize), Datum> = HashMap::new();
    let mut out = Vec::with_capacity(partition.len());
    for idx in 0..partition.len() {
        let bounds = frame.bounds(partition, idx)?;
        let key = (bounds.start, bounds.end);
        if let Some(value) = cache.get(&key) {
            out.push(value.clone());
            continue;
        }
        let rows = inputs[bounds].iter().flatten().cloned().collect();
        let value = finalize_aggregate(&call, rows, &[], estate)?;
        cache.insert(key, value.clone());
        out.push(value);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcop::engine::{reset_global_state_for_tests, run_statement, with_global_state_lock};

    fn rows(sql: &str) -> Vec<Vec<Datum>> {
        run_statement(sql).unwrap().pop().unwrap().rows
    }

    #[test]
    fn ntile_spreads_remainder_over_first_buckets() {
        let buckets: Vec<usize> = (0..5).map(|idx| ntile_bucket(idx, 5, 3)).collect();
        assert_eq!(buckets, vec![1, 1, 2, 2, 3]);
        let buckets: Vec<usize> = (0..2).map(|idx| ntile_bucket(idx, 2, 4)).collect();
        assert_eq!(buckets, vec![1, 2]);
    }

    #[test]
    fn ranking_functions_follow_peer_groups() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            let out = rows(
                "SELECT x, row_number() OVER w, rank() OVER w, dense_rank() OVER w \
                 FROM (VALUES (10), (20), (20), (30)) v(x) WINDOW w AS (ORDER BY x)",
            );
            let ranks: Vec<Vec<Datum>> = out.into_iter().map(|row| row[1..].to_vec()).collect();
            assert_eq!(
                ranks,
                vec![
                    vec![Datum::Int8(1), Datum::Int8(1), Datum::Int8(1)],
                    vec![Datum::Int8(2), Datum::Int8(2), Datum::Int8(2)],
                    vec![Datum::Int8(3), Datum::Int8(2), Datum::Int8(2)],
                    vec![Datum::Int8(4), Datum::Int8(4), Datum::Int8(3)],
                ]
            );
        });
    }

    #[test]
    fn running_sum_uses_the_default_range_frame() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            let out = rows("SELECT sum(x) OVER (ORDER BY x) FROM (VALUES (1), (2), (2), (3)) v(x)");
            assert_eq!(
                out,
                vec![
                    vec![Datum::Int8(1)],
                    vec![Datum::Int8(5)],
                    vec![Datum::Int8(5)],
                    vec![Datum::Int8(8)],
                ]
            );
        });
    }

    #[test]
    fn rows_frame_and_lag_defaults() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            let out = rows(
                "SELECT sum(x) OVER (ORDER BY x ROWS BETWEEN 1 PRECEDING AND CURRENT ROW), \
                        lag(x, 1, 0) OVER (ORDER BY x) \
                 FROM (VALUES (1), (2), (3)) v(x)",
            );
            assert_eq!(
                out,
                vec![
                    vec![Datum::Int8(1), Datum::Int4(0)],
                    vec![Datum::Int8(3), Datum::Int4(1)],
                    vec![Datum::Int8(5), Datum::Int4(2)],
                ]
            );
        });
    }

    #[test]
    fn invalid_ntile_argument() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            let err = run_statement("SELECT ntile(0) OVER () FROM (VALUES (1)) v(x)").unwrap_err();
            assert_eq!(err.code(), "22014");
        });
    }
}
