//! Aggregation: plain and grouped aggregates, with DISTINCT, ORDER BY and
//! FILTER, ordered-set aggregates and hypothetical-set aggregates.
//!
//! Input rows of a group are kept whole. Every aggregate call first builds
//! its input rows (argument values plus ordering keys, FILTER applied), then
//! removes duplicates for DISTINCT, sorts for ORDER BY / WITHIN GROUP, and
//! finally folds the rows according to the aggregate's implementation.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use rust_decimal::Decimal;
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::catalog::CatalogOracle;
use crate::catalog::oid::Oid;
use crate::catalog::pg_proc::{AggKind, PgAggregate};
use crate::nodes::datum::{ArrayValue, Datum, KeyDatum, row_group_key};
use crate::nodes::plannodes::{AggStrategy, Plan};
use crate::nodes::primnodes::{Aggref, Expr};
use crate::utils::adt::arrayfuncs::construct_from_subarrays;
use crate::utils::adt::cmp::compare_datums;
use crate::utils::adt::float::{float_arg, float_datum};
use crate::utils::adt::int_arithmetic::int_arg;
use crate::utils::adt::io::datum_out;
use crate::utils::adt::json::{datum_to_json_text, datum_to_jsonb};
use crate::utils::adt::math_functions::{numeric_arg, numeric_quotient};
use crate::utils::elog::{PgError, PgResult, SqlState, elog};
use crate::utils::interrupt::check_for_interrupts;

use super::exec_expr::exec_eval_expr;
use super::exec_proc_node::exec_outer_plan;
use super::exec_utils::{EState, ExprContext, exec_project, exec_qual};
use super::node_sort::{SortDirection, compare_keys, try_sort_by};
use super::tuptable::TupleTableSlot;

/// A resolved aggregate call, from an Aggref or from a window aggregate.
#[derive(Debug, Clone)]
pub(crate) struct AggCall<'a> {
    pub name: String,
    pub implementation: String,
    pub kind: AggKind,
    pub aggtype: Oid,
    pub args: Vec<&'a Expr>,
    pub direct_args: &'a [Expr],
    pub order: Vec<(&'a Expr, SortDirection)>,
    pub distinct: bool,
    pub filter: Option<&'a Expr>,
}

impl<'a> AggCall<'a> {
    pub fn from_aggref(estate: &EState, agg: &'a Aggref) -> PgResult<Self> {
        let (name, support) = aggregate_support(estate, agg.aggfnoid)?;
        let mut order = Vec::with_capacity(agg.aggorder.len());
        for sgc in &agg.aggorder {
            let tle = agg
                .args
                .iter()
                .find(|tle| tle.ressortgroupref == sgc.tle_sort_group_ref)
                .ok_or_else(|| elog(format!("aggregate ORDER BY item {} not found", sgc.tle_sort_group_ref)))?;
            order.push((&tle.expr, SortDirection::new(sgc.descending, sgc.nulls_first)));
        }
        Ok(Self {
            name,
            implementation: support.implementation,
            kind: support.kind,
            aggtype: agg.aggtype,
            args: agg.args.iter().filter(|tle| !tle.resjunk).map(|tle| &tle.expr).collect(),
            direct_args: &agg.aggdirectargs,
            order,
            distinct: !agg.aggdistinct.is_empty(),
            filter: agg.aggfilter.as_ref(),
        })
    }

    /// A plain aggregate invoked through OVER.
    pub fn for_window(
        estate: &EState,
        aggfnoid: Oid,
        aggtype: Oid,
        args: &'a [Expr],
        filter: Option<&'a Expr>,
    ) -> PgResult<Self> {
        let (name, support) = aggregate_support(estate, aggfnoid)?;
        Ok(Self {
            name,
            implementation: support.implementation,
            kind: support.kind,
            aggtype,
            args: args.iter().collect(),
            direct_args: &[],
            order: Vec::new(),
            distinct: false,
            filter,
        })
    }

    fn directions(&self) -> Vec<SortDirection> {
        self.order.iter().map(|(_, dir)| *dir).collect()
    }
}

fn aggregate_support(estate: &EState, aggfnoid: Oid) -> PgResult<(String, PgAggregate)> {
    let proc = estate
        .catalog
        .proc_by_id(aggfnoid)
        .ok_or_else(|| elog(format!("cache lookup failed for aggregate {aggfnoid}")))?;
    let support = proc
        .aggregate
        .clone()
        .ok_or_else(|| elog(format!("function {} is not an aggregate", proc.name)))?;
    Ok((proc.name.clone(), support))
}

#[derive(Debug, Clone)]
pub(crate) struct AggregateInputRow {
    args: Vec<Datum>,
    order_keys: Vec<Datum>,
}

/// Arguments and ordering keys of one input row, or `None` when FILTER
/// rejects it.
pub(crate) fn build_input_row(
    call: &AggCall<'_>,
    row: &TupleTableSlot,
    estate: &mut EState,
) -> PgResult<Option<AggregateInputRow>> {
    let ctx = ExprContext::default().with_outer(row);
    if let Some(filter) = call.filter
        && !exec_qual(std::slice::from_ref(filter), &ctx, estate, false)?
    {
        return Ok(None);
    }
    let args = call
        .args
        .iter()
        .map(|arg| exec_eval_expr(arg, &ctx, estate))
        .collect::<PgResult<Vec<_>>>()?;
    let order_keys = call
        .order
        .iter()
        .map(|(expr, _)| exec_eval_expr(expr, &ctx, estate))
        .collect::<PgResult<Vec<_>>>()?;
    Ok(Some(AggregateInputRow { args, order_keys }))
}

fn apply_aggregate_distinct(rows: &mut Vec<AggregateInputRow>) {
    let mut seen = HashSet::new();
    rows.retain(|row| seen.insert(row_group_key(&row.args)));
}

fn sort_aggregate_rows(rows: &mut [AggregateInputRow], dirs: &[SortDirection]) -> PgResult<()> {
    if dirs.is_empty() {
        return Ok(());
    }
    try_sort_by(rows, |a, b| compare_keys(&a.order_keys, &b.order_keys, dirs))
}

/// Aggregate a whole group of input rows. `direct_ctx` evaluates the direct
/// arguments of ordered-set and hypothetical aggregates.
pub(crate) fn aggregate_rows(
    call: &AggCall<'_>,
    group: &[TupleTableSlot],
    direct_ctx: &ExprContext<'_>,
    estate: &mut EState,
) -> PgResult<Datum> {
    let mut rows = Vec::with_capacity(group.len());
    for row in group {
        if let Some(input) = build_input_row(call, row, estate)? {
            rows.push(input);
        }
    }
    let direct = call
        .direct_args
        .iter()
        .map(|expr| exec_eval_expr(expr, direct_ctx, estate))
        .collect::<PgResult<Vec<_>>>()?;
    finalize_aggregate(call, rows, &direct, estate)
}

/// Fold already-built input rows into the aggregate's result.
pub(crate) fn finalize_aggregate(
    call: &AggCall<'_>,
    mut rows: Vec<AggregateInputRow>,
    direct: &[Datum],
    estate: &EState,
) -> PgResult<Datum> {
    if call.distinct {
        apply_aggregate_distinct(&mut rows);
    }
    let dirs = call.directions();
    sort_aggregate_rows(&mut rows, &dirs)?;
    trace!(aggregate = %call.name, rows = rows.len(), "finalizing aggregate");

    match call.kind {
        AggKind::OrderedSet => return ordered_set_aggregate(call, &rows, direct),
        AggKind::Hypothetical => return hypothetical_aggregate(call, &rows, direct, &dirs),
        AggKind::Normal => {}
    }

    let first_args = || rows.iter().filter_map(|row| row.args.first()).filter(|v| !v.is_null());
    match call.implementation.as_str() {
        "count_star" => Ok(Datum::Int8(rows.len() as i64)),
        "count_any" => Ok(Datum::Int8(first_args().count() as i64)),
        "sum_int" => {
            let mut total: Option<i64> = None;
            for value in first_args() {
                let next = total.unwrap_or(0).checked_add(int_arg(value)?).ok_or_else(|| {
                    PgError::new(SqlState::NumericValueOutOfRange, "bigint out of range")
                })?;
                total = Some(next);
            }
            Ok(total.map_or(Datum::Null, Datum::Int8))
        }
        "sum_numeric" => {
            let mut total: Option<Decimal> = None;
            for value in first_args() {
                let next = total
                    .unwrap_or_default()
                    .checked_add(numeric_arg(value)?)
                    .ok_or_else(|| PgError::new(SqlState::NumericValueOutOfRange, "value overflows numeric format"))?;
                total = Some(next);
            }
            Ok(total.map_or(Datum::Null, Datum::Numeric))
        }
        "sum_float" => {
            let mut total: Option<f64> = None;
            for value in first_args() {
                total = Some(total.unwrap_or(0.0) + float_arg(value)?);
            }
            total.map_or(Ok(Datum::Null), |total| float_datum(total, call.aggtype))
        }
        "avg_numeric" => {
            let mut total = Decimal::ZERO;
            let mut count = 0i64;
            for value in first_args() {
                total = total
                    .checked_add(numeric_arg(value)?)
                    .ok_or_else(|| PgError::new(SqlState::NumericValueOutOfRange, "value overflows numeric format"))?;
                count += 1;
            }
            if count == 0 {
                return Ok(Datum::Null);
            }
            numeric_quotient(total, Decimal::from(count)).map(Datum::Numeric)
        }
        "avg_float" => {
            let mut total = 0.0f64;
            let mut count = 0u64;
            for value in first_args() {
                total += float_arg(value)?;
                count += 1;
            }
            Ok(if count == 0 {
                Datum::Null
            } else {
                Datum::Float8(total / count as f64)
            })
        }
        "min" | "max" => {
            let want = if call.implementation == "min" {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            let mut current: Option<&Datum> = None;
            for value in first_args() {
                match current {
                    Some(existing) if compare_datums(value, existing)? != want => {}
                    _ => current = Some(value),
                }
            }
            Ok(current.cloned().unwrap_or(Datum::Null))
        }
        "bool_and" | "bool_or" => {
            let mut result: Option<bool> = None;
            for value in first_args() {
                let b = value
                    .as_bool()
                    .ok_or_else(|| elog(format!("{} expects boolean input", call.name)))?;
                result = Some(match result {
                    None => b,
                    Some(acc) if call.implementation == "bool_and" => acc && b,
                    Some(acc) => acc || b,
                });
            }
            Ok(result.map_or(Datum::Null, Datum::Bool))
        }
        "array_agg" => {
            if rows.is_empty() {
                return Ok(Datum::Null);
            }
            let elemtype = result_element_type(call, estate)?;
            let elements = rows.into_iter().map(|mut row| row.args.swap_remove(0)).collect();
            Ok(Datum::array(ArrayValue::from_vec(elemtype, elements)))
        }
        "array_agg_array" => {
            if rows.is_empty() {
                return Ok(Datum::Null);
            }
            let elemtype = result_element_type(call, estate)?;
            let mut subarrays = Vec::with_capacity(rows.len());
            for mut row in rows {
                let value = row.args.swap_remove(0);
                match &value {
                    Datum::Null => {
                        return Err(PgError::new(SqlState::NullValueNotAllowed, "cannot accumulate null arrays"));
                    }
                    Datum::Array(array) if array.is_empty() => {
                        return Err(PgError::new(SqlState::ArraySubscriptError, "cannot accumulate empty arrays"));
                    }
                    _ => subarrays.push(value),
                }
            }
            construct_from_subarrays(elemtype, &subarrays).map(Datum::array)
        }
        "string_agg" => {
            let mut out: Option<String> = None;
            for row in &rows {
                let (Some(value), delimiter) = (row.args.first(), row.args.get(1)) else {
                    continue;
                };
                if value.is_null() {
                    continue;
                }
                let text = datum_out(value);
                match out.as_mut() {
                    None => out = Some(text),
                    Some(acc) => {
                        if let Some(delimiter) = delimiter.filter(|d| !d.is_null()) {
                            acc.push_str(&datum_out(delimiter));
                        }
                        acc.push_str(&text);
                    }
                }
            }
            Ok(out.map_or(Datum::Null, Datum::Text))
        }
        "json_agg" => {
            if rows.is_empty() {
                return Ok(Datum::Null);
            }
            let parts = rows
                .iter()
                .map(|row| datum_to_json_text(&estate.catalog, row.args.first().unwrap_or(&Datum::Null)))
                .collect::<PgResult<Vec<_>>>()?;
            Ok(Datum::Json(format!("[{}]", parts.join(", "))))
        }
        "jsonb_agg" => {
            if rows.is_empty() {
                return Ok(Datum::Null);
            }
            let items = rows
                .iter()
                .map(|row| datum_to_jsonb(&estate.catalog, row.args.first().unwrap_or(&Datum::Null)))
                .collect::<PgResult<Vec<_>>>()?;
            Ok(Datum::Jsonb(Value::Array(items)))
        }
        "jsonb_object_agg" => {
            if rows.is_empty() {
                return Ok(Datum::Null);
            }
            let mut object = Map::new();
            for row in &rows {
                let key = match row.args.first() {
                    None | Some(Datum::Null) => {
                        return Err(PgError::new(SqlState::NullValueNotAllowed, "field name must not be null"));
                    }
                    Some(key) => datum_out(key),
                };
                let value = datum_to_jsonb(&estate.catalog, row.args.get(1).unwrap_or(&Datum::Null))?;
                object.insert(key, value);
            }
            Ok(Datum::Jsonb(Value::Object(object)))
        }
        other => Err(elog(format!("unsupported aggregate implementation \"{other}\""))),
    }
}

fn result_element_type(call: &AggCall<'_>, estate: &EState) -> PgResult<Oid> {
    estate
        .catalog
        .element_type_of(call.aggtype)
        .ok_or_else(|| elog(format!("aggregate {} does not return an array", call.name)))
}

fn percentile_fraction(value: &Datum) -> PgResult<Option<f64>> {
    if value.is_null() {
        return Ok(None);
    }
    let fraction = float_arg(value)?;
    if !(0.0..=1.0).contains(&fraction) {
        return Err(PgError::new(
            SqlState::NumericValueOutOfRange,
            format!("percentile value {fraction} is not between 0 and 1"),
        ));
    }
    Ok(Some(fraction))
}

fn ordered_set_aggregate(call: &AggCall<'_>, rows: &[AggregateInputRow], direct: &[Datum]) -> PgResult<Datum> {
    let values: Vec<&Datum> = rows
        .iter()
        .filter_map(|row| row.order_keys.first())
        .filter(|v| !v.is_null())
        .collect();
    match call.implementation.as_str() {
        "percentile_disc" => {
            let Some(fraction) = percentile_fraction(direct.first().unwrap_or(&Datum::Null))? else {
                return Ok(Datum::Null);
            };
            if values.is_empty() {
                return Ok(Datum::Null);
            }
            let n = values.len();
            let position = ((fraction * n as f64).ceil() as usize).clamp(1, n);
            Ok(values[position - 1].clone())
        }
        "percentile_cont" => {
            let Some(fraction) = percentile_fraction(direct.first().unwrap_or(&Datum::Null))? else {
                return Ok(Datum::Null);
            };
            if values.is_empty() {
                return Ok(Datum::Null);
            }
            let position = fraction * (values.len() - 1) as f64;
            let lower = position.floor();
            let lo = float_arg(values[lower as usize])?;
            let hi = float_arg(values[position.ceil() as usize])?;
            Ok(Datum::Float8(lo + (hi - lo) * (position - lower)))
        }
        "mode" => {
            let mut best: Option<(&Datum, usize)> = None;
            let mut run: Option<(&Datum, usize)> = None;
            for value in values {
                run = match run {
                    Some((current, count)) if compare_datums(current, value)? == Ordering::Equal => {
                        Some((current, count + 1))
                    }
                    _ => Some((value, 1)),
                };
                if let Some((current, count)) = run
                    && best.is_none_or(|(_, best_count)| count > best_count)
                {
                    best = Some((current, count));
                }
            }
            Ok(best.map_or(Datum::Null, |(value, _)| value.clone()))
        }
        other => Err(elog(format!("unsupported ordered-set aggregate \"{other}\""))),
    }
}

/// rank(), dense_rank(), percent_rank() and cume_dist() of a hypothetical
/// row among the group's sorted rows.
fn hypothetical_aggregate(
    call: &AggCall<'_>,
    rows: &[AggregateInputRow],
    direct: &[Datum],
    dirs: &[SortDirection],
) -> PgResult<Datum> {
    if direct.len() != dirs.len() {
        return Err(PgError::new(
            SqlState::DatatypeMismatch,
            "function has the wrong number of hypothetical arguments",
        ));
    }
    let total = rows.len();
    let mut before = 0usize;
    let mut not_after = 0usize;
    let mut distinct_before: HashSet<Vec<KeyDatum>> = HashSet::new();
    for row in rows {
        match compare_keys(&row.order_keys, direct, dirs)? {
            Ordering::Less => {
                before += 1;
                not_after += 1;
                distinct_before.insert(row_group_key(&row.order_keys));
            }
            Ordering::Equal => not_after += 1,
            Ordering::Greater => {}
        }
    }
    Ok(match call.implementation.as_str() {
        "hypothetical_rank" => Datum::Int8(before as i64 + 1),
        "hypothetical_dense_rank" => Datum::Int8(distinct_before.len() as i64 + 1),
        "hypothetical_percent_rank" => Datum::Float8(if total == 0 {
            0.0
        } else {
            before as f64 / total as f64
        }),
        "hypothetical_cume_dist" => Datum::Float8((not_after + 1) as f64 / (total + 1) as f64),
        other => return Err(elog(format!("unsupported hypothetical aggregate \"{other}\""))),
    })
}

pub fn exec_agg(
    plan: &Plan,
    strategy: AggStrategy,
    group_exprs: &[Expr],
    aggs: &[Aggref],
    estate: &mut EState,
) -> PgResult<Vec<TupleTableSlot>> {
    let input = exec_outer_plan(plan, estate)?;
    let input_width = plan.lefttree.as_ref().map_or(0, |child| child.targetlist.len());

    let groups: Vec<Vec<TupleTableSlot>> = match strategy {
        AggStrategy::Plain => vec![input],
        AggStrategy::Hashed => {
            let mut index: HashMap<Vec<KeyDatum>, usize> = HashMap::new();
            let mut groups: Vec<Vec<TupleTableSlot>> = Vec::new();
            for (n, row) in input.into_iter().enumerate() {
                if n % 1024 == 0 {
                    check_for_interrupts()?;
                }
                let ctx = ExprContext::default().with_outer(&row);
                let key = group_exprs
                    .iter()
                    .map(|expr| exec_eval_expr(expr, &ctx, estate))
                    .collect::<PgResult<Vec<_>>>()?;
                let key = row_group_key(&key);
                match index.get(&key) {
                    Some(&idx) => groups[idx].push(row),
                    None => {
                        index.insert(key, groups.len());
                        groups.push(vec![row]);
                    }
                }
            }
            groups
        }
    };
    debug!(?strategy, groups = groups.len(), aggregates = aggs.len(), "aggregating");

    let calls = aggs
        .iter()
        .map(|agg| AggCall::from_aggref(estate, agg))
        .collect::<PgResult<Vec<_>>>()?;
    let nslots = aggs.iter().map(|agg| agg.aggno.max(0) as usize + 1).max().unwrap_or(0);
    let empty_row = TupleTableSlot::all_nulls(input_width);

    let mut out = Vec::with_capacity(groups.len());
    for group in &groups {
        check_for_interrupts()?;
        let representative = group.first().unwrap_or(&empty_row);
        let mut values = vec![Datum::Null; nslots];
        for (agg, call) in aggs.iter().zip(&calls) {
            let direct_ctx = ExprContext::default().with_outer(representative);
            values[agg.aggno.max(0) as usize] = aggregate_rows(call, group, &direct_ctx, estate)?;
        }
        let ctx = ExprContext::default().with_outer(representative).with_aggs(&values);
        if exec_qual(&plan.qual, &ctx, estate, false)? {
            out.push(exec_project(&plan.targetlist, &ctx, estate)?);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use crate::nodes::datum::Datum;
    use crate::tcop::engine::{reset_global_state_for_tests, run_statement, with_global_state_lock};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn rows(sql: &str) -> Vec<Vec<Datum>> {
        run_statement(sql).unwrap().pop().unwrap().rows
    }

    #[test]
    fn plain_aggregate_over_no_rows_yields_one_row() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            let out = rows("SELECT count(*), sum(x), max(x) FROM (VALUES (1)) v(x) WHERE x > 5");
            assert_eq!(out, vec![vec![Datum::Int8(0), Datum::Null, Datum::Null]]);
        });
    }

    #[test]
    fn grouped_aggregates_keep_first_seen_order_and_having() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            let out = rows(
                "SELECT g, count(*) FROM (VALUES ('b', 1), ('a', 2), ('b', 3)) v(g, x) GROUP BY g HAVING count(*) > 1",
            );
            assert_eq!(out, vec![vec![Datum::text("b"), Datum::Int8(2)]]);
        });
    }

    #[test]
    fn avg_of_integers_is_numeric() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            let out = rows("SELECT avg(x) FROM (VALUES (1), (2)) v(x)");
            assert_eq!(
                out,
                vec![vec![Datum::Numeric(Decimal::from_str("1.5000000000000000").unwrap())]]
            );
        });
    }

    #[test]
    fn distinct_order_by_and_filter() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            let out = rows(
                "SELECT string_agg(DISTINCT s, ',' ORDER BY s DESC), count(*) FILTER (WHERE s <> 'a') \
                 FROM (VALUES ('a'), ('c'), ('b'), ('c')) v(s)",
            );
            assert_eq!(out, vec![vec![Datum::text("c,b,a"), Datum::Int8(3)]]);
        });
    }

    #[test]
    fn ordered_set_and_hypothetical_aggregates() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            let out = rows(
                "SELECT percentile_disc(0.5) WITHIN GROUP (ORDER BY x), \
                        percentile_cont(0.5) WITHIN GROUP (ORDER BY x), \
                        mode() WITHIN GROUP (ORDER BY x), \
                        rank(3) WITHIN GROUP (ORDER BY x) \
                 FROM (VALUES (1), (2), (2), (4)) v(x)",
            );
            assert_eq!(
                out,
                vec![vec![Datum::Int4(2), Datum::Float8(2.0), Datum::Int4(2), Datum::Int8(4)]]
            );
        });
    }

    #[test]
    fn percentile_outside_unit_interval_is_rejected() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            let err = run_statement("SELECT percentile_disc(1.5) WITHIN GROUP (ORDER BY x) FROM (VALUES (1)) v(x)")
                .unwrap_err();
            assert_eq!(err.code(), "22003");
        });
    }
}
