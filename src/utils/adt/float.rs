//! float4/float8 input, output and arithmetic.
//!
//! Input follows float8in(): surrounding whitespace is ignored, NaN and the
//! infinities are accepted case-insensitively, and values that overflow or
//! underflow to zero are rejected. Output is the shortest representation that
//! round-trips, switching to exponent form the way the C library's `%g` does
//! for very large or very small magnitudes.

use std::cmp::Ordering;

use crate::catalog::oid::Oid;
use crate::catalog::pg_type::FLOAT4OID;
use crate::nodes::datum::Datum;
use crate::utils::elog::{PgError, PgResult, SqlState, elog};
use crate::utils::fmgr::FunctionCallInfo;

fn invalid_syntax(typname: &str, input: &str) -> PgError {
    PgError::new(
        SqlState::InvalidTextRepresentation,
        format!("invalid input syntax for type {typname}: \"{input}\""),
    )
}

fn input_out_of_range(typname: &str, input: &str) -> PgError {
    PgError::new(
        SqlState::NumericValueOutOfRange,
        format!("\"{input}\" is out of range for type {typname}"),
    )
}

fn special_value(trimmed: &str) -> Option<f64> {
    match trimmed.to_ascii_lowercase().as_str() {
        "nan" | "+nan" | "-nan" => Some(f64::NAN),
        "infinity" | "+infinity" | "inf" | "+inf" => Some(f64::INFINITY),
        "-infinity" | "-inf" => Some(f64::NEG_INFINITY),
        _ => None,
    }
}

/// Parse a double precision literal.
pub fn float8in(input: &str) -> PgResult<f64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(invalid_syntax("double precision", input));
    }
    if let Some(value) = special_value(trimmed) {
        return Ok(value);
    }
    let value: f64 = trimmed
        .parse()
        .map_err(|_| invalid_syntax("double precision", input))?;
    if value.is_infinite() || (value == 0.0 && !is_zero_input(trimmed)) {
        return Err(input_out_of_range("double precision", trimmed));
    }
    Ok(value)
}

/// Parse a real literal. The text is read as a double first and then
/// narrowed, so out-of-range values are caught before rounding.
pub fn float4in(input: &str) -> PgResult<f32> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(invalid_syntax("real", input));
    }
    if let Some(value) = special_value(trimmed) {
        return Ok(value as f32);
    }
    let value: f64 = trimmed.parse().map_err(|_| invalid_syntax("real", input))?;
    let narrowed = value as f32;
    if value.is_infinite() || narrowed.is_infinite() {
        return Err(input_out_of_range("real", trimmed));
    }
    if narrowed == 0.0 && !is_zero_input(trimmed) {
        return Err(input_out_of_range("real", trimmed));
    }
    Ok(narrowed)
}

/// True if the literal's mantissa is all zeros, i.e. a parsed zero is not an
/// underflow.
fn is_zero_input(s: &str) -> bool {
    s.trim_start_matches(['+', '-'])
        .chars()
        .take_while(|ch| !matches!(ch, 'e' | 'E'))
        .all(|ch| matches!(ch, '0' | '.'))
}

fn format_special(value: f64) -> Option<&'static str> {
    if value.is_nan() {
        Some("NaN")
    } else if value == f64::INFINITY {
        Some("Infinity")
    } else if value == f64::NEG_INFINITY {
        Some("-Infinity")
    } else {
        None
    }
}

/// Rewrite Rust's `1.5e-5` exponent form as `1.5e-05`.
fn pg_exponent_form(sci: &str) -> String {
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci, "0"));
    let (sign, digits) = match exp.strip_prefix('-') {
        Some(rest) => ('-', rest),
        None => ('+', exp),
    };
    format!("{mantissa}e{sign}{digits:0>2}")
}

fn decimal_exponent(sci: &str) -> i32 {
    sci.split_once('e')
        .and_then(|(_, exp)| exp.parse().ok())
        .unwrap_or(0)
}

/// Shortest round-trip text of a double.
pub fn float8out(value: f64) -> String {
    if let Some(special) = format_special(value) {
        return special.to_string();
    }
    let sci = format!("{value:e}");
    let exp = decimal_exponent(&sci);
    if value != 0.0 && !(-4..15).contains(&exp) {
        pg_exponent_form(&sci)
    } else {
        format!("{value}")
    }
}

pub fn float4out(value: f32) -> String {
    if let Some(special) = format_special(f64::from(value)) {
        return special.to_string();
    }
    let sci = format!("{value:e}");
    let exp = decimal_exponent(&sci);
    if value != 0.0 && !(-4..6).contains(&exp) {
        pg_exponent_form(&sci)
    } else {
        format!("{value}")
    }
}

/// Total order used by comparison operators: NaN equals NaN and sorts above
/// every other value; -0 equals 0.
pub fn float8_cmp(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

pub fn float_arg(value: &Datum) -> PgResult<f64> {
    match value {
        Datum::Float4(v) => Ok(f64::from(*v)),
        Datum::Float8(v) => Ok(*v),
        other => other
            .as_i64()
            .map(|v| v as f64)
            .ok_or_else(|| elog(format!("expected a floating-point argument, got {other:?}"))),
    }
}

fn overflow() -> PgError {
    PgError::new(SqlState::NumericValueOutOfRange, "value out of range: overflow")
}

fn underflow() -> PgError {
    PgError::new(SqlState::NumericValueOutOfRange, "value out of range: underflow")
}

/// Check a computed result the way float.c's check_float8_val() does:
/// infinity is only allowed when an input was infinite, zero only when an
/// input could produce it.
fn checked(value: f64, inf_ok: bool, zero_ok: bool) -> PgResult<f64> {
    if value.is_infinite() && !inf_ok {
        return Err(overflow());
    }
    if value == 0.0 && !zero_ok {
        return Err(underflow());
    }
    Ok(value)
}

/// Wrap a result as float4 or float8 according to `rettype`.
pub fn float_datum(value: f64, rettype: Oid) -> PgResult<Datum> {
    if rettype == FLOAT4OID {
        let narrowed = value as f32;
        if narrowed.is_infinite() && !value.is_infinite() {
            return Err(overflow());
        }
        if narrowed == 0.0 && value != 0.0 {
            return Err(underflow());
        }
        Ok(Datum::Float4(narrowed))
    } else {
        Ok(Datum::Float8(value))
    }
}

fn binary(fcinfo: &FunctionCallInfo<'_>) -> PgResult<(f64, f64)> {
    Ok((float_arg(fcinfo.arg(0))?, float_arg(fcinfo.arg(1))?))
}

fn unary(fcinfo: &FunctionCallInfo<'_>) -> PgResult<f64> {
    float_arg(fcinfo.arg(0))
}

pub fn float_pl(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let (a, b) = binary(fcinfo)?;
    let sum = checked(a + b, a.is_infinite() || b.is_infinite(), true)?;
    float_datum(sum, fcinfo.rettype)
}

pub fn float_mi(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let (a, b) = binary(fcinfo)?;
    let diff = checked(a - b, a.is_infinite() || b.is_infinite(), true)?;
    float_datum(diff, fcinfo.rettype)
}

pub fn float_mul(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let (a, b) = binary(fcinfo)?;
    let product = checked(a * b, a.is_infinite() || b.is_infinite(), a == 0.0 || b == 0.0)?;
    float_datum(product, fcinfo.rettype)
}

pub fn float_div(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let (a, b) = binary(fcinfo)?;
    if b == 0.0 && !a.is_nan() {
        return Err(PgError::new(SqlState::DivisionByZero, "division by zero"));
    }
    let quotient = checked(a / b, a.is_infinite(), a == 0.0 || b.is_infinite())?;
    float_datum(quotient, fcinfo.rettype)
}

pub fn float_um(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    float_datum(-unary(fcinfo)?, fcinfo.rettype)
}

pub fn float_abs(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    float_datum(unary(fcinfo)?.abs(), fcinfo.rettype)
}

/// `round(float8)` rounds half to even, like rint().
pub fn float_round(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    float_datum(unary(fcinfo)?.round_ties_even(), fcinfo.rettype)
}

pub fn float_trunc(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    float_datum(unary(fcinfo)?.trunc(), fcinfo.rettype)
}

pub fn float_floor(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    float_datum(unary(fcinfo)?.floor(), fcinfo.rettype)
}

pub fn float_ceil(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    float_datum(unary(fcinfo)?.ceil(), fcinfo.rettype)
}

pub fn float_power(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let (base, exponent) = binary(fcinfo)?;
    if base == 0.0 && exponent < 0.0 {
        return Err(PgError::new(
            SqlState::InvalidArgumentForPowerFunction,
            "zero raised to a negative power is undefined",
        ));
    }
    if base < 0.0 && exponent.fract() != 0.0 {
        return Err(PgError::new(
            SqlState::InvalidArgumentForPowerFunction,
            "a negative number raised to a non-integer power yields a complex result",
        ));
    }
    let result = base.powf(exponent);
    let result = checked(
        result,
        base.is_infinite() || exponent.is_infinite(),
        base == 0.0 || exponent.is_infinite(),
    )?;
    float_datum(result, fcinfo.rettype)
}

pub fn float_sqrt(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let value = unary(fcinfo)?;
    if value < 0.0 {
        return Err(PgError::new(
            SqlState::InvalidArgumentForPowerFunction,
            "cannot take square root of a negative number",
        ));
    }
    float_datum(value.sqrt(), fcinfo.rettype)
}

/// Round a double to an integer of the given range, half to even.
pub fn float_to_int(value: f64, min: f64, max: f64, typname: &str) -> PgResult<i64> {
    if value.is_nan() {
        return Err(PgError::new(
            SqlState::NumericValueOutOfRange,
            format!("cannot cast NaN to {typname}"),
        ));
    }
    let rounded = value.round_ties_even();
    if rounded < min || rounded >= max {
        return Err(PgError::new(
            SqlState::NumericValueOutOfRange,
            format!("{typname} out of range"),
        ));
    }
    Ok(rounded as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::catalog::pg_type::FLOAT8OID;

    #[test]
    fn input_accepts_specials_and_rejects_garbage() {
        assert!(float8in(" NaN ").unwrap().is_nan());
        assert_eq!(float8in("-Infinity").unwrap(), f64::NEG_INFINITY);
        assert_eq!(float8in("1.5").unwrap(), 1.5);
        let err = float8in("abc").unwrap_err();
        assert_eq!(err.sqlstate, SqlState::InvalidTextRepresentation);
        assert_eq!(err.message, "invalid input syntax for type double precision: \"abc\"");
        let err = float8in("1e400").unwrap_err();
        assert_eq!(err.sqlstate, SqlState::NumericValueOutOfRange);
        assert!(float8in("1e-400").is_err());
        assert_eq!(float8in("0.000").unwrap(), 0.0);
        assert!(float4in("1e39").is_err());
    }

    #[test]
    fn output_switches_to_exponent_form() {
        assert_eq!(float8out(1e20), "1e+20");
        assert_eq!(float8out(123456.789), "123456.789");
        assert_eq!(float8out(0.1), "0.1");
        assert_eq!(float8out(1.5e-5), "1.5e-05");
        assert_eq!(float8out(0.0001), "0.0001");
        assert_eq!(float8out(f64::NAN), "NaN");
        assert_eq!(float8out(-0.0), "-0");
        assert_eq!(float4out(1_234_567.0), "1.234567e+06");
        assert_eq!(float4out(3.5), "3.5");
    }

    #[test]
    fn nan_sorts_last() {
        assert_eq!(float8_cmp(f64::NAN, f64::NAN), Ordering::Equal);
        assert_eq!(float8_cmp(f64::NAN, f64::INFINITY), Ordering::Greater);
        assert_eq!(float8_cmp(-0.0, 0.0), Ordering::Equal);
    }

    #[test]
    fn arithmetic_reports_overflow_and_division_by_zero() {
        let catalog = Catalog::default();
        let argtypes = [FLOAT8OID, FLOAT8OID];
        let fcinfo = |args: Vec<Datum>| FunctionCallInfo {
            args,
            argtypes: &argtypes,
            rettype: FLOAT8OID,
            collation: 0,
            funcvariadic: false,
            catalog: &catalog,
        };
        let err = float_mul(&fcinfo(vec![Datum::Float8(1e300), Datum::Float8(1e300)])).unwrap_err();
        assert_eq!(err.message, "value out of range: overflow");
        let err = float_div(&fcinfo(vec![Datum::Float8(1.0), Datum::Float8(0.0)])).unwrap_err();
        assert_eq!(err.sqlstate, SqlState::DivisionByZero);
        assert_eq!(
            float_round(&fcinfo(vec![Datum::Float8(2.5)])).unwrap(),
            Datum::Float8(2.0)
        );
    }

    #[test]
    fn int_conversion_rounds_half_even() {
        assert_eq!(float_to_int(2.5, -2147483648.0, 2147483648.0, "integer").unwrap(), 2);
        assert_eq!(float_to_int(3.5, -2147483648.0, 2147483648.0, "integer").unwrap(), 4);
        let err = float_to_int(3e10, -2147483648.0, 2147483648.0, "integer").unwrap_err();
        assert_eq!(err.message, "integer out of range");
    }
}
