//! Btree comparison support.
//!
//! Every comparison operator in the bootstrap catalog calls one of the
//! `datum_*` builtins here. Values of different members of one operator
//! family (int2/int4/int8, float4/float8, numeric and the integers) compare by
//! value. Text compares by bytes for every collation.

use std::cmp::Ordering;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use super::float::float8_cmp;
use super::math_functions::numeric_to_f64;
use crate::catalog::pg_type::BPCHAROID;
use crate::nodes::datum::{ArrayValue, Datum, RecordValue};
use crate::utils::elog::{PgError, PgResult, SqlState, elog};
use crate::utils::fmgr::FunctionCallInfo;

fn not_comparable(a: &Datum, b: &Datum) -> PgError {
    elog(format!("could not compare values {a:?} and {b:?}"))
}

/// Order two non-null values.
pub fn compare_datums(a: &Datum, b: &Datum) -> PgResult<Ordering> {
    use Datum::*;
    Ok(match (a, b) {
        (Bool(x), Bool(y)) => x.cmp(y),
        (Int2(_) | Int4(_) | Int8(_) | Oid(_), Int2(_) | Int4(_) | Int8(_) | Oid(_)) => {
            let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) else {
                return Err(not_comparable(a, b));
            };
            x.cmp(&y)
        }
        (Float4(_) | Float8(_), Float4(_) | Float8(_) | Int2(_) | Int4(_) | Int8(_))
        | (Int2(_) | Int4(_) | Int8(_), Float4(_) | Float8(_)) => float8_cmp(as_f64(a)?, as_f64(b)?),
        (Numeric(x), Numeric(y)) => x.cmp(y),
        (Numeric(x), Int2(_) | Int4(_) | Int8(_)) => x.cmp(&Decimal::from(b.as_i64().unwrap_or(0))),
        (Int2(_) | Int4(_) | Int8(_), Numeric(y)) => Decimal::from(a.as_i64().unwrap_or(0)).cmp(y),
        (Numeric(x), Float4(_) | Float8(_)) => float8_cmp(numeric_to_f64(*x), as_f64(b)?),
        (Float4(_) | Float8(_), Numeric(y)) => float8_cmp(as_f64(a)?, numeric_to_f64(*y)),
        (Text(x), Text(y)) => x.as_bytes().cmp(y.as_bytes()),
        (Bytea(x), Bytea(y)) => x.cmp(y),
        (Tid(x), Tid(y)) => x.cmp(y),
        (Date(x), Date(y)) => x.cmp(y),
        (Timestamp(x) | TimestampTz(x), Timestamp(y) | TimestampTz(y)) => x.cmp(y),
        (Date(x), Timestamp(y) | TimestampTz(y)) => (i64::from(*x) * super::datetime::USECS_PER_DAY).cmp(y),
        (Timestamp(x) | TimestampTz(x), Date(y)) => x.cmp(&(i64::from(*y) * super::datetime::USECS_PER_DAY)),
        (Jsonb(x), Jsonb(y)) => compare_jsonb(x, y),
        (JsonPath(x), JsonPath(y)) => x.cmp(y),
        (Array(x), Array(y)) => compare_arrays(x, y)?,
        (Record(x), Record(y)) => compare_records(x, y)?,
        _ => return Err(not_comparable(a, b)),
    })
}

fn as_f64(value: &Datum) -> PgResult<f64> {
    super::float::float_arg(value)
}

/// Null-aware ordering used inside arrays and records: two nulls are equal
/// and a null sorts after any non-null.
pub fn compare_nullable(a: &Datum, b: &Datum) -> PgResult<Ordering> {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ok(Ordering::Equal),
        (true, false) => Ok(Ordering::Greater),
        (false, true) => Ok(Ordering::Less),
        (false, false) => compare_datums(a, b),
    }
}

fn compare_arrays(a: &ArrayValue, b: &ArrayValue) -> PgResult<Ordering> {
    for (x, y) in a.elements.iter().zip(&b.elements) {
        let ord = compare_nullable(x, y)?;
        if ord != Ordering::Equal {
            return Ok(ord);
        }
    }
    Ok(a.elements
        .len()
        .cmp(&b.elements.len())
        .then_with(|| a.ndim().cmp(&b.ndim()))
        .then_with(|| a.dims.cmp(&b.dims))
        .then_with(|| a.lbounds.cmp(&b.lbounds)))
}

fn compare_records(a: &RecordValue, b: &RecordValue) -> PgResult<Ordering> {
    for (x, y) in a.values.iter().zip(&b.values) {
        let ord = compare_nullable(x, y)?;
        if ord != Ordering::Equal {
            return Ok(ord);
        }
    }
    if a.values.len() != b.values.len() {
        return Err(PgError::new(
            SqlState::DatatypeMismatch,
            "cannot compare record types with different numbers of columns",
        ));
    }
    Ok(Ordering::Equal)
}

fn jsonb_rank(value: &JsonValue) -> u8 {
    match value {
        JsonValue::Null => 0,
        JsonValue::String(_) => 1,
        JsonValue::Number(_) => 2,
        JsonValue::Bool(_) => 3,
        JsonValue::Array(_) => 4,
        JsonValue::Object(_) => 5,
    }
}

/// Parse a JSON number exactly when possible.
pub fn json_number_to_decimal(number: &serde_json::Number) -> Option<Decimal> {
    let text = number.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

fn compare_json_numbers(a: &serde_json::Number, b: &serde_json::Number) -> Ordering {
    match (json_number_to_decimal(a), json_number_to_decimal(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => float8_cmp(
            a.as_f64().unwrap_or(f64::NAN),
            b.as_f64().unwrap_or(f64::NAN),
        ),
    }
}

/// Object keys in jsonb storage order: shorter first, then bytewise.
pub fn jsonb_key_order(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.as_bytes().cmp(b.as_bytes()))
}

/// jsonb btree order: object > array > boolean > number > string > null;
/// containers compare by size first.
pub fn compare_jsonb(a: &JsonValue, b: &JsonValue) -> Ordering {
    let rank = jsonb_rank(a).cmp(&jsonb_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (JsonValue::String(x), JsonValue::String(y)) => x.as_bytes().cmp(y.as_bytes()),
        (JsonValue::Number(x), JsonValue::Number(y)) => compare_json_numbers(x, y),
        (JsonValue::Bool(x), JsonValue::Bool(y)) => x.cmp(y),
        (JsonValue::Array(x), JsonValue::Array(y)) => x.len().cmp(&y.len()).then_with(|| {
            x.iter()
                .zip(y)
                .map(|(l, r)| compare_jsonb(l, r))
                .find(|ord| *ord != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        }),
        (JsonValue::Object(x), JsonValue::Object(y)) => x.len().cmp(&y.len()).then_with(|| {
            let mut xs: Vec<_> = x.iter().collect();
            let mut ys: Vec<_> = y.iter().collect();
            xs.sort_by(|l, r| jsonb_key_order(l.0, r.0));
            ys.sort_by(|l, r| jsonb_key_order(l.0, r.0));
            xs.iter()
                .zip(&ys)
                .map(|((kx, vx), (ky, vy))| jsonb_key_order(kx, ky).then_with(|| compare_jsonb(vx, vy)))
                .find(|ord| *ord != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        }),
        _ => Ordering::Equal,
    }
}

fn strip_bpchar(value: &Datum) -> Datum {
    match value {
        Datum::Text(s) => Datum::Text(s.trim_end_matches(' ').to_string()),
        other => other.clone(),
    }
}

fn compare_args(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Ordering> {
    let (a, b) = (fcinfo.arg(0), fcinfo.arg(1));
    if fcinfo.argtype(0) == BPCHAROID || fcinfo.argtype(1) == BPCHAROID {
        return compare_datums(&strip_bpchar(a), &strip_bpchar(b));
    }
    compare_datums(a, b)
}

pub fn datum_eq(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(Datum::Bool(compare_args(fcinfo)? == Ordering::Equal))
}

pub fn datum_ne(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(Datum::Bool(compare_args(fcinfo)? != Ordering::Equal))
}

pub fn datum_lt(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(Datum::Bool(compare_args(fcinfo)? == Ordering::Less))
}

pub fn datum_le(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(Datum::Bool(compare_args(fcinfo)? != Ordering::Greater))
}

pub fn datum_gt(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(Datum::Bool(compare_args(fcinfo)? == Ordering::Greater))
}

pub fn datum_ge(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(Datum::Bool(compare_args(fcinfo)? != Ordering::Less))
}

fn ordering_datum(ord: Ordering) -> Datum {
    Datum::Int4(match ord {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    })
}

pub fn datum_cmp(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    compare_args(fcinfo).map(ordering_datum)
}

/// Binary-image comparison of rows: values that are equal under their type's
/// equality but differ in representation (`1.0` and `1.00`) are distinct.
pub fn compare_image(a: &Datum, b: &Datum) -> PgResult<Ordering> {
    match (a, b) {
        (Datum::Null, Datum::Null) => Ok(Ordering::Equal),
        (Datum::Null, _) => Ok(Ordering::Greater),
        (_, Datum::Null) => Ok(Ordering::Less),
        (Datum::Numeric(x), Datum::Numeric(y)) => Ok(x.cmp(y).then_with(|| x.scale().cmp(&y.scale()))),
        (Datum::Float4(x), Datum::Float4(y)) => Ok(x.to_bits().cmp(&y.to_bits())),
        (Datum::Float8(x), Datum::Float8(y)) => Ok(x.to_bits().cmp(&y.to_bits())),
        (Datum::Jsonb(x), Datum::Jsonb(y)) => Ok(x.to_string().cmp(&y.to_string())),
        (Datum::Record(x), Datum::Record(y)) => {
            for (l, r) in x.values.iter().zip(&y.values) {
                let ord = compare_image(l, r)?;
                if ord != Ordering::Equal {
                    return Ok(ord);
                }
            }
            Ok(x.values.len().cmp(&y.values.len()))
        }
        (Datum::Array(x), Datum::Array(y)) => {
            for (l, r) in x.elements.iter().zip(&y.elements) {
                let ord = compare_image(l, r)?;
                if ord != Ordering::Equal {
                    return Ok(ord);
                }
            }
            Ok(x.elements.len().cmp(&y.elements.len()).then_with(|| x.dims.cmp(&y.dims)))
        }
        _ => compare_datums(a, b),
    }
}

fn image_args(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Ordering> {
    compare_image(fcinfo.arg(0), fcinfo.arg(1))
}

pub fn record_image_eq(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(Datum::Bool(image_args(fcinfo)? == Ordering::Equal))
}

pub fn record_image_ne(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(Datum::Bool(image_args(fcinfo)? != Ordering::Equal))
}

pub fn record_image_lt(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(Datum::Bool(image_args(fcinfo)? == Ordering::Less))
}

pub fn record_image_le(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(Datum::Bool(image_args(fcinfo)? != Ordering::Greater))
}

pub fn record_image_gt(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(Datum::Bool(image_args(fcinfo)? == Ordering::Greater))
}

pub fn record_image_ge(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(Datum::Bool(image_args(fcinfo)? != Ordering::Less))
}

pub fn record_image_cmp(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    image_args(fcinfo).map(ordering_datum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cross_type_integers_and_floats() {
        assert_eq!(compare_datums(&Datum::Int2(3), &Datum::Int8(3)).unwrap(), Ordering::Equal);
        assert_eq!(compare_datums(&Datum::Int4(1), &Datum::Float8(1.5)).unwrap(), Ordering::Less);
        assert_eq!(
            compare_datums(&Datum::Float8(f64::NAN), &Datum::Float8(1e300)).unwrap(),
            Ordering::Greater
        );
        assert_eq!(
            compare_datums(&Datum::Numeric(Decimal::new(10, 1)), &Datum::Int4(1)).unwrap(),
            Ordering::Equal
        );
    }

    #[test]
    fn records_put_nulls_last() {
        let a = Datum::record(2249, vec![Datum::Int4(1), Datum::Null]);
        let b = Datum::record(2249, vec![Datum::Int4(1), Datum::Int4(5)]);
        assert_eq!(compare_datums(&a, &b).unwrap(), Ordering::Greater);
        assert_eq!(compare_datums(&a, &a).unwrap(), Ordering::Equal);
    }

    #[test]
    fn image_comparison_sees_numeric_scale() {
        let a = Datum::record(2249, vec![Datum::Numeric(Decimal::new(10, 1))]);
        let b = Datum::record(2249, vec![Datum::Numeric(Decimal::new(100, 2))]);
        assert_eq!(compare_datums(&a, &b).unwrap(), Ordering::Equal);
        assert_ne!(compare_image(&a, &b).unwrap(), Ordering::Equal);
    }

    #[test]
    fn jsonb_type_order() {
        assert_eq!(compare_jsonb(&json!({}), &json!([1, 2, 3])), Ordering::Greater);
        assert_eq!(compare_jsonb(&json!(true), &json!(100)), Ordering::Greater);
        assert_eq!(compare_jsonb(&json!("a"), &json!(null)), Ordering::Greater);
        assert_eq!(compare_jsonb(&json!(1.0), &json!(1)), Ordering::Equal);
        assert_eq!(compare_jsonb(&json!({"b": 1}), &json!({"a": 2})), Ordering::Greater);
    }
}
