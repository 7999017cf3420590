//! Array support: subscripting, construction and the array builtins.
//!
//! Arrays are stored row-major with explicit dimensions and lower bounds.
//! An empty array has zero dimensions.

use std::cmp::Ordering;

use rust_decimal::Decimal;

use super::cmp::compare_datums;
use super::io::datum_out;
use super::math_functions::numeric_arg;
use crate::catalog::oid::Oid;
use crate::catalog::pg_type::{INT4OID, INT8OID, TEXTOID};
use crate::nodes::datum::{ArrayValue, Datum};
use crate::utils::elog::{PgError, PgResult, SqlState};
use crate::utils::fmgr::FunctionCallInfo;
use crate::utils::interrupt::check_for_interrupts;

/// Most dimensions an array may have.
pub const MAXDIM: usize = 6;

fn subscript_error(message: &str) -> PgError {
    PgError::new(SqlState::ArraySubscriptError, message.to_string())
}

fn check_ndim(ndim: usize) -> PgResult<()> {
    if ndim > MAXDIM {
        return Err(PgError::new(
            SqlState::ProgramLimitExceeded,
            format!("number of array dimensions ({ndim}) exceeds the maximum allowed ({MAXDIM})"),
        ));
    }
    Ok(())
}

/// Row-major offset of a subscript vector, or `None` when out of range.
fn element_offset(array: &ArrayValue, subscripts: &[i32]) -> Option<usize> {
    if subscripts.len() != array.ndim() {
        return None;
    }
    let mut offset = 0usize;
    for (dim, &sub) in subscripts.iter().enumerate() {
        let lower = array.lbounds[dim];
        if sub < lower || sub > array.ubound(dim) {
            return None;
        }
        offset = offset * array.dims[dim] + (sub - lower) as usize;
    }
    Some(offset)
}

/// `array[i][j]`: null when the subscripts do not address an element.
pub fn array_get_element(array: &ArrayValue, subscripts: &[i32]) -> Datum {
    element_offset(array, subscripts).map_or(Datum::Null, |offset| array.elements[offset].clone())
}

/// Iterate every subscript vector inside `[lower, upper]` in row-major order.
fn for_each_position(lower: &[i32], upper: &[i32], mut f: impl FnMut(&[i32]) -> PgResult<()>) -> PgResult<()> {
    if lower.iter().zip(upper).any(|(l, u)| l > u) {
        return Ok(());
    }
    let mut position = lower.to_vec();
    loop {
        f(&position)?;
        let mut dim = position.len();
        loop {
            if dim == 0 {
                return Ok(());
            }
            dim -= 1;
            if position[dim] < upper[dim] {
                position[dim] += 1;
                position[dim + 1..].copy_from_slice(&lower[dim + 1..]);
                break;
            }
        }
    }
}

/// `array[l:u]` fetch. Missing bounds default to the array's own.
pub fn array_get_slice(array: &ArrayValue, lower: &[Option<i32>], upper: &[Option<i32>]) -> PgResult<Datum> {
    let nsubs = upper.len();
    if array.is_empty() || nsubs > array.ndim() {
        return Ok(Datum::array(ArrayValue::empty(array.elemtype)));
    }
    let mut lo = Vec::with_capacity(array.ndim());
    let mut hi = Vec::with_capacity(array.ndim());
    for dim in 0..array.ndim() {
        let (l, u) = if dim < nsubs {
            (
                lower.get(dim).copied().flatten().unwrap_or(array.lbounds[dim]),
                upper[dim].unwrap_or_else(|| array.ubound(dim)),
            )
        } else {
            (array.lbounds[dim], array.ubound(dim))
        };
        let l = l.max(array.lbounds[dim]);
        let u = u.min(array.ubound(dim));
        if l > u {
            return Ok(Datum::array(ArrayValue::empty(array.elemtype)));
        }
        lo.push(l);
        hi.push(u);
    }
    let mut elements = Vec::new();
    for_each_position(&lo, &hi, |pos| {
        elements.push(array_get_element(array, pos));
        Ok(())
    })?;
    Ok(Datum::array(ArrayValue {
        elemtype: array.elemtype,
        dims: lo.iter().zip(&hi).map(|(l, u)| (u - l + 1) as usize).collect(),
        lbounds: vec![1; lo.len()],
        elements,
    }))
}

/// `array[i] := value`. A one-dimensional array grows to cover the
/// subscript, padding with nulls; other arrays must already contain it.
pub fn array_set_element(array: &ArrayValue, subscripts: &[i32], value: Datum) -> PgResult<ArrayValue> {
    check_ndim(subscripts.len())?;
    if array.is_empty() {
        return Ok(ArrayValue {
            elemtype: array.elemtype,
            dims: vec![1; subscripts.len()],
            lbounds: subscripts.to_vec(),
            elements: vec![value],
        });
    }
    if subscripts.len() != array.ndim() {
        return Err(subscript_error("wrong number of array subscripts"));
    }
    if let Some(offset) = element_offset(array, subscripts) {
        let mut result = array.clone();
        result.elements[offset] = value;
        return Ok(result);
    }
    if array.ndim() != 1 {
        return Err(subscript_error("array subscript out of range"));
    }
    let sub = subscripts[0];
    let (lower, upper) = (array.lbounds[0], array.ubound(0));
    let new_lower = lower.min(sub);
    let new_upper = upper.max(sub);
    let mut elements = vec![Datum::Null; (new_upper - new_lower + 1) as usize];
    let shift = (lower - new_lower) as usize;
    for (idx, element) in array.elements.iter().enumerate() {
        elements[shift + idx] = element.clone();
    }
    elements[(sub - new_lower) as usize] = value;
    Ok(ArrayValue {
        elemtype: array.elemtype,
        dims: vec![elements.len()],
        lbounds: vec![new_lower],
        elements,
    })
}

/// `array[l:u] := source`. Elements are taken from `source` in storage order.
pub fn array_set_slice(
    array: &ArrayValue,
    lower: &[Option<i32>],
    upper: &[Option<i32>],
    source: &ArrayValue,
) -> PgResult<ArrayValue> {
    let nsubs = upper.len();
    check_ndim(nsubs)?;
    let too_small = || subscript_error("source array too small");
    if array.is_empty() {
        let mut lo = Vec::with_capacity(nsubs);
        let mut hi = Vec::with_capacity(nsubs);
        for dim in 0..nsubs {
            match (lower.get(dim).copied().flatten(), upper[dim]) {
                (Some(l), Some(u)) => {
                    if u < l {
                        return Err(subscript_error("upper bound cannot be less than lower bound"));
                    }
                    lo.push(l);
                    hi.push(u);
                }
                _ => {
                    return Err(subscript_error(
                        "array slice subscript must provide both boundaries",
                    ));
                }
            }
        }
        let dims: Vec<usize> = lo.iter().zip(&hi).map(|(l, u)| (u - l + 1) as usize).collect();
        let count: usize = dims.iter().product();
        if source.elements.len() < count {
            return Err(too_small());
        }
        return Ok(ArrayValue {
            elemtype: array.elemtype,
            dims,
            lbounds: lo,
            elements: source.elements[..count].to_vec(),
        });
    }
    if nsubs > array.ndim() {
        return Err(subscript_error("wrong number of array subscripts"));
    }
    let mut lo = Vec::with_capacity(array.ndim());
    let mut hi = Vec::with_capacity(array.ndim());
    for dim in 0..array.ndim() {
        let (l, u) = if dim < nsubs {
            (
                lower.get(dim).copied().flatten().unwrap_or(array.lbounds[dim]),
                upper[dim].unwrap_or_else(|| array.ubound(dim)),
            )
        } else {
            (array.lbounds[dim], array.ubound(dim))
        };
        if u < l {
            return Err(subscript_error("upper bound cannot be less than lower bound"));
        }
        lo.push(l);
        hi.push(u);
    }

    let mut result = array.clone();
    if array.ndim() == 1 {
        // One-dimensional slices may extend the array, null-padding any gap.
        let new_lower = array.lbounds[0].min(lo[0]);
        let new_upper = array.ubound(0).max(hi[0]);
        if new_lower != array.lbounds[0] || new_upper != array.ubound(0) {
            let mut elements = vec![Datum::Null; (new_upper - new_lower + 1) as usize];
            let shift = (array.lbounds[0] - new_lower) as usize;
            for (idx, element) in array.elements.iter().enumerate() {
                elements[shift + idx] = element.clone();
            }
            result = ArrayValue {
                elemtype: array.elemtype,
                dims: vec![elements.len()],
                lbounds: vec![new_lower],
                elements,
            };
        }
    } else if lo
        .iter()
        .zip(&hi)
        .enumerate()
        .any(|(dim, (l, u))| *l < array.lbounds[dim] || *u > array.ubound(dim))
    {
        return Err(subscript_error("array subscript out of range"));
    }

    let mut replacements = source.elements.iter();
    let mut positions = Vec::new();
    for_each_position(&lo, &hi, |pos| {
        positions.push(pos.to_vec());
        Ok(())
    })?;
    for pos in positions {
        let value = replacements.next().ok_or_else(too_small)?;
        if let Some(offset) = element_offset(&result, &pos) {
            result.elements[offset] = value.clone();
        }
    }
    Ok(result)
}

/// Build an N+1-dimensional array from N-dimensional sub-arrays, as the
/// nested `ARRAY[ARRAY[..], ARRAY[..]]` constructor does. Null sub-arrays are
/// ignored.
pub fn construct_from_subarrays(elemtype: Oid, subarrays: &[Datum]) -> PgResult<ArrayValue> {
    let mismatch = || {
        PgError::new(
            SqlState::ArraySubscriptError,
            "multidimensional arrays must have array expressions with matching dimensions",
        )
    };
    let mut shape: Option<(&[usize], &[i32])> = None;
    let mut have_empty = false;
    let mut count = 0usize;
    let mut elements = Vec::new();
    for sub in subarrays {
        check_for_interrupts()?;
        let Datum::Array(sub) = sub else {
            continue;
        };
        if sub.is_empty() {
            have_empty = true;
            continue;
        }
        match shape {
            None => shape = Some((&sub.dims, &sub.lbounds)),
            Some((dims, lbounds)) => {
                if dims != sub.dims.as_slice() || lbounds != sub.lbounds.as_slice() {
                    return Err(mismatch());
                }
            }
        }
        elements.extend(sub.elements.iter().cloned());
        count += 1;
    }
    let Some((dims, lbounds)) = shape else {
        return Ok(ArrayValue::empty(elemtype));
    };
    if have_empty {
        return Err(mismatch());
    }
    check_ndim(dims.len() + 1)?;
    let mut all_dims = vec![count];
    all_dims.extend_from_slice(dims);
    let mut all_lbounds = vec![1];
    all_lbounds.extend_from_slice(lbounds);
    Ok(ArrayValue {
        elemtype,
        dims: all_dims,
        lbounds: all_lbounds,
        elements,
    })
}

fn array_arg<'a>(fcinfo: &'a FunctionCallInfo<'_>, n: usize) -> Option<&'a ArrayValue> {
    fcinfo.arg(n).as_array()
}

fn dimension_arg<'a>(fcinfo: &'a FunctionCallInfo<'_>) -> Option<(&'a ArrayValue, usize)> {
    let array = array_arg(fcinfo, 0)?;
    let dim = fcinfo.arg(1).as_i64()?;
    if dim < 1 || dim as usize > array.ndim() {
        return None;
    }
    Some((array, dim as usize - 1))
}

pub fn array_length(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(dimension_arg(fcinfo).map_or(Datum::Null, |(a, d)| Datum::Int4(a.dims[d] as i32)))
}

pub fn array_lower(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(dimension_arg(fcinfo).map_or(Datum::Null, |(a, d)| Datum::Int4(a.lbounds[d])))
}

pub fn array_upper(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(dimension_arg(fcinfo).map_or(Datum::Null, |(a, d)| Datum::Int4(a.ubound(d))))
}

pub fn array_ndims(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(match array_arg(fcinfo, 0) {
        Some(a) if !a.is_empty() => Datum::Int4(a.ndim() as i32),
        _ => Datum::Null,
    })
}

pub fn array_cardinality(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(array_arg(fcinfo, 0).map_or(Datum::Null, |a| Datum::Int4(a.nitems() as i32)))
}

fn element_type_of_call(fcinfo: &FunctionCallInfo<'_>) -> Oid {
    fcinfo
        .catalog
        .element_type_of(fcinfo.rettype)
        .unwrap_or(TEXTOID)
}

fn one_dimensional<'a>(array: Option<&'a ArrayValue>) -> PgResult<Option<&'a ArrayValue>> {
    match array {
        Some(a) if a.ndim() > 1 => Err(PgError::new(
            SqlState::DataException,
            "argument must be empty or one-dimensional array",
        )),
        Some(a) if a.is_empty() => Ok(None),
        other => Ok(other),
    }
}

pub fn array_append(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let elemtype = element_type_of_call(fcinfo);
    let value = fcinfo.arg(1).clone();
    Ok(Datum::array(match one_dimensional(array_arg(fcinfo, 0))? {
        None => ArrayValue::from_vec(elemtype, vec![value]),
        Some(array) => {
            let mut result = array.clone();
            result.elements.push(value);
            result.dims[0] += 1;
            result
        }
    }))
}

pub fn array_prepend(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let elemtype = element_type_of_call(fcinfo);
    let value = fcinfo.arg(0).clone();
    Ok(Datum::array(match one_dimensional(array_arg(fcinfo, 1))? {
        None => ArrayValue::from_vec(elemtype, vec![value]),
        Some(array) => {
            let mut result = array.clone();
            result.elements.insert(0, value);
            result.dims[0] += 1;
            result
        }
    }))
}

pub fn array_cat(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let (left, right) = match (fcinfo.arg(0), fcinfo.arg(1)) {
        (Datum::Null, Datum::Null) => return Ok(Datum::Null),
        (Datum::Null, other) | (other, Datum::Null) => return Ok(other.clone()),
        (Datum::Array(l), Datum::Array(r)) => (l, r),
        _ => return Ok(Datum::Null),
    };
    if left.is_empty() {
        return Ok(Datum::Array(right.clone()));
    }
    if right.is_empty() {
        return Ok(Datum::Array(left.clone()));
    }
    let incompatible = |detail: String| {
        PgError::new(SqlState::ArraySubscriptError, "cannot concatenate incompatible arrays").with_detail(detail)
    };
    let (ndim1, ndim2) = (left.ndim(), right.ndim());
    let mut result = (**left).clone();
    if ndim1 == ndim2 {
        if left.dims[1..] != right.dims[1..] {
            return Err(incompatible(
                "Arrays with differing element dimensions are not compatible for concatenation.".to_string(),
            ));
        }
        result.dims[0] += right.dims[0];
        result.elements.extend(right.elements.iter().cloned());
    } else if ndim1 == ndim2 + 1 {
        if left.dims[1..] != right.dims[..] {
            return Err(incompatible(
                "Arrays with differing dimensions are not compatible for concatenation.".to_string(),
            ));
        }
        result.dims[0] += 1;
        result.elements.extend(right.elements.iter().cloned());
    } else if ndim1 + 1 == ndim2 {
        if left.dims[..] != right.dims[1..] {
            return Err(incompatible(
                "Arrays with differing dimensions are not compatible for concatenation.".to_string(),
            ));
        }
        result = (**right).clone();
        result.dims[0] += 1;
        let mut elements = left.elements.clone();
        elements.extend(right.elements.iter().cloned());
        result.elements = elements;
    } else {
        return Err(incompatible(format!(
            "Arrays of {ndim1} and {ndim2} dimensions are not compatible for concatenation."
        )));
    }
    Ok(Datum::array(result))
}

pub fn array_to_string(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let (Some(array), Some(delimiter)) = (array_arg(fcinfo, 0), fcinfo.arg(1).as_str()) else {
        return Ok(Datum::Null);
    };
    let null_string = fcinfo.arg(2).as_str();
    let parts: Vec<String> = array
        .elements
        .iter()
        .filter_map(|element| match element {
            Datum::Null => null_string.map(str::to_string),
            value => Some(datum_out(value)),
        })
        .collect();
    Ok(Datum::Text(parts.join(delimiter)))
}

pub fn string_to_array(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let Some(input) = fcinfo.arg(0).as_str() else {
        return Ok(Datum::Null);
    };
    if input.is_empty() {
        return Ok(Datum::array(ArrayValue::empty(TEXTOID)));
    }
    let elements: Vec<Datum> = match fcinfo.arg(1).as_str() {
        None => input.chars().map(|c| Datum::Text(c.to_string())).collect(),
        Some("") => vec![Datum::text(input)],
        Some(delimiter) => input.split(delimiter).map(Datum::text).collect(),
    };
    Ok(Datum::array(ArrayValue::from_vec(TEXTOID, elements)))
}

fn elements_equal(a: &Datum, b: &Datum) -> PgResult<bool> {
    if a.is_null() || b.is_null() {
        return Ok(false);
    }
    Ok(compare_datums(a, b)? == Ordering::Equal)
}

/// Every non-null element of `inner` appears in `outer`.
fn array_contains_all(outer: &ArrayValue, inner: &ArrayValue) -> PgResult<bool> {
    for needle in &inner.elements {
        let mut found = false;
        for candidate in &outer.elements {
            if elements_equal(candidate, needle)? {
                found = true;
                break;
            }
        }
        if !found {
            return Ok(false);
        }
    }
    Ok(true)
}

pub fn array_contains(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let (Some(a), Some(b)) = (array_arg(fcinfo, 0), array_arg(fcinfo, 1)) else {
        return Ok(Datum::Null);
    };
    array_contains_all(a, b).map(Datum::Bool)
}

pub fn array_contained(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let (Some(a), Some(b)) = (array_arg(fcinfo, 0), array_arg(fcinfo, 1)) else {
        return Ok(Datum::Null);
    };
    array_contains_all(b, a).map(Datum::Bool)
}

pub fn array_overlap(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let (Some(a), Some(b)) = (array_arg(fcinfo, 0), array_arg(fcinfo, 1)) else {
        return Ok(Datum::Null);
    };
    for x in &a.elements {
        for y in &b.elements {
            if elements_equal(x, y)? {
                return Ok(Datum::Bool(true));
            }
        }
    }
    Ok(Datum::Bool(false))
}

pub fn array_unnest(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Vec<Datum>> {
    Ok(array_arg(fcinfo, 0).map_or_else(Vec::new, |a| a.elements.clone()))
}

pub fn generate_series(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Vec<Datum>> {
    let zero_step = || PgError::new(SqlState::InvalidParameterValue, "step size cannot equal zero");
    match fcinfo.argtype(0) {
        INT4OID | INT8OID => {
            let start = fcinfo.arg(0).as_i64().unwrap_or_default();
            let stop = fcinfo.arg(1).as_i64().unwrap_or_default();
            let step = if fcinfo.nargs() > 2 { fcinfo.arg(2).as_i64().unwrap_or(1) } else { 1 };
            if step == 0 {
                return Err(zero_step());
            }
            let wrap: fn(i64) -> Datum = if fcinfo.argtype(0) == INT4OID {
                |v| Datum::Int4(v as i32)
            } else {
                Datum::Int8
            };
            let mut out = Vec::new();
            let mut current = start;
            while (step > 0 && current <= stop) || (step < 0 && current >= stop) {
                if out.len() % 4096 == 0 {
                    check_for_interrupts()?;
                }
                out.push(wrap(current));
                match current.checked_add(step) {
                    Some(next) => current = next,
                    None => break,
                }
            }
            Ok(out)
        }
        _ => {
            let start = numeric_arg(fcinfo.arg(0))?;
            let stop = numeric_arg(fcinfo.arg(1))?;
            let step = if fcinfo.nargs() > 2 { numeric_arg(fcinfo.arg(2))? } else { Decimal::ONE };
            if step.is_zero() {
                return Err(zero_step());
            }
            let mut out = Vec::new();
            let mut current = start;
            while (step.is_sign_positive() && current <= stop) || (step.is_sign_negative() && current >= stop) {
                if out.len() % 4096 == 0 {
                    check_for_interrupts()?;
                }
                out.push(Datum::Numeric(current));
                match current.checked_add(step) {
                    Some(next) => current = next,
                    None => break,
                }
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::catalog::pg_type::{INT4ARRAYOID, NUMERICOID, TEXTARRAYOID};

    fn ints(values: &[i32]) -> ArrayValue {
        ArrayValue::from_vec(INT4OID, values.iter().map(|v| Datum::Int4(*v)).collect())
    }

    fn with_fcinfo<T>(args: Vec<Datum>, argtypes: &[Oid], rettype: Oid, f: impl FnOnce(&FunctionCallInfo<'_>) -> T) -> T {
        let catalog = Catalog::default();
        let fcinfo = FunctionCallInfo {
            args,
            argtypes,
            rettype,
            collation: 0,
            funcvariadic: false,
            catalog: &catalog,
        };
        f(&fcinfo)
    }

    #[test]
    fn element_fetch_out_of_range_is_null() {
        let array = ints(&[10, 20, 30]);
        assert_eq!(array_get_element(&array, &[2]), Datum::Int4(20));
        assert_eq!(array_get_element(&array, &[4]), Datum::Null);
        assert_eq!(array_get_element(&array, &[1, 1]), Datum::Null);
    }

    #[test]
    fn slices_clamp_and_rebase() {
        let array = ints(&[10, 20, 30, 40]);
        let slice = array_get_slice(&array, &[Some(0)], &[Some(2)]).unwrap();
        assert_eq!(datum_out(&slice), "{10,20}");
        let slice = array_get_slice(&array, &[Some(3)], &[None]).unwrap();
        assert_eq!(datum_out(&slice), "{30,40}");
        let slice = array_get_slice(&array, &[Some(5)], &[Some(9)]).unwrap();
        assert_eq!(datum_out(&slice), "{}");
    }

    #[test]
    fn one_dimensional_assignment_extends_with_nulls() {
        let array = ints(&[1, 2]);
        let result = array_set_element(&array, &[5], Datum::Int4(5)).unwrap();
        assert_eq!(datum_out(&Datum::array(result)), "{1,2,NULL,NULL,5}");
        let result = array_set_element(&array, &[-1], Datum::Int4(0)).unwrap();
        assert_eq!(datum_out(&Datum::array(result)), "[-1:2]={0,NULL,1,2}");
    }

    #[test]
    fn assignment_into_empty_array_uses_subscripts_as_bounds() {
        let empty = ArrayValue::empty(INT4OID);
        let result = array_set_element(&empty, &[3], Datum::Int4(7)).unwrap();
        assert_eq!(datum_out(&Datum::array(result)), "[3:3]={7}");
        let err = array_set_slice(&empty, &[None], &[Some(2)], &ints(&[1, 2])).unwrap_err();
        assert_eq!(err.message, "array slice subscript must provide both boundaries");
    }

    #[test]
    fn multidimensional_assignment_stays_in_bounds() {
        let array = construct_from_subarrays(
            INT4OID,
            &[Datum::array(ints(&[1, 2])), Datum::array(ints(&[3, 4]))],
        )
        .unwrap();
        assert_eq!(datum_out(&Datum::array(array.clone())), "{{1,2},{3,4}}");
        let updated = array_set_element(&array, &[2, 1], Datum::Int4(9)).unwrap();
        assert_eq!(datum_out(&Datum::array(updated)), "{{1,2},{9,4}}");
        let err = array_set_element(&array, &[3, 1], Datum::Int4(9)).unwrap_err();
        assert_eq!(err.code(), "2202E");
    }

    #[test]
    fn slice_assignment_requires_enough_source() {
        let array = ints(&[1, 2, 3]);
        let updated = array_set_slice(&array, &[Some(2)], &[Some(4)], &ints(&[7, 8, 9])).unwrap();
        assert_eq!(datum_out(&Datum::array(updated)), "{1,7,8,9}");
        let err = array_set_slice(&array, &[Some(1)], &[Some(3)], &ints(&[7])).unwrap_err();
        assert_eq!(err.message, "source array too small");
    }

    #[test]
    fn mismatched_subarrays_are_rejected() {
        let err = construct_from_subarrays(
            INT4OID,
            &[Datum::array(ints(&[1, 2])), Datum::array(ints(&[3]))],
        )
        .unwrap_err();
        assert_eq!(err.code(), "2202E");
    }

    #[test]
    fn concatenation_rules() {
        let args = vec![Datum::array(ints(&[1, 2])), Datum::array(ints(&[3]))];
        let out = with_fcinfo(args, &[INT4ARRAYOID, INT4ARRAYOID], INT4ARRAYOID, array_cat).unwrap();
        assert_eq!(datum_out(&out), "{1,2,3}");
        let args = vec![Datum::Int4(0), Datum::array(ints(&[1]))];
        let out = with_fcinfo(args, &[INT4OID, INT4ARRAYOID], INT4ARRAYOID, array_prepend).unwrap();
        assert_eq!(datum_out(&out), "{0,1}");
    }

    #[test]
    fn containment_ignores_nulls_as_matches() {
        let with_null = ArrayValue::from_vec(INT4OID, vec![Datum::Int4(1), Datum::Null]);
        let args = vec![Datum::array(with_null.clone()), Datum::array(with_null)];
        let out = with_fcinfo(args, &[INT4ARRAYOID, INT4ARRAYOID], INT4OID, array_contains).unwrap();
        assert_eq!(out, Datum::Bool(false));
    }

    #[test]
    fn string_conversions() {
        let array = ArrayValue::from_vec(TEXTOID, vec![Datum::text("a"), Datum::Null, Datum::text("c")]);
        let out = with_fcinfo(
            vec![Datum::array(array.clone()), Datum::text(",")],
            &[TEXTARRAYOID, TEXTOID],
            TEXTOID,
            array_to_string,
        )
        .unwrap();
        assert_eq!(out, Datum::text("a,c"));
        let out = with_fcinfo(
            vec![Datum::array(array), Datum::text(","), Datum::text("*")],
            &[TEXTARRAYOID, TEXTOID, TEXTOID],
            TEXTOID,
            array_to_string,
        )
        .unwrap();
        assert_eq!(out, Datum::text("a,*,c"));
        let out = with_fcinfo(
            vec![Datum::text("x|y"), Datum::text("|")],
            &[TEXTOID, TEXTOID],
            TEXTARRAYOID,
            string_to_array,
        )
        .unwrap();
        assert_eq!(datum_out(&out), "{x,y}");
    }

    #[test]
    fn series_generation() {
        let rows = with_fcinfo(
            vec![Datum::Int4(1), Datum::Int4(7), Datum::Int4(3)],
            &[INT4OID, INT4OID, INT4OID],
            INT4OID,
            generate_series,
        )
        .unwrap();
        assert_eq!(rows, vec![Datum::Int4(1), Datum::Int4(4), Datum::Int4(7)]);
        let rows = with_fcinfo(
            vec![Datum::Numeric(Decimal::new(10, 1)), Datum::Numeric(Decimal::new(20, 1)), Datum::Numeric(Decimal::new(5, 1))],
            &[NUMERICOID, NUMERICOID, NUMERICOID],
            NUMERICOID,
            generate_series,
        )
        .unwrap();
        assert_eq!(rows.len(), 3);
        let err = with_fcinfo(
            vec![Datum::Int4(1), Datum::Int4(2), Datum::Int4(0)],
            &[INT4OID, INT4OID, INT4OID],
            INT4OID,
            generate_series,
        )
        .unwrap_err();
        assert_eq!(err.code(), "22023");
    }
}
