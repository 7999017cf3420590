//! Numeric arithmetic and the rounding family.
//!
//! `numeric` is carried as a `rust_decimal::Decimal`, whose scale plays the
//! role of the display scale. Division and square root choose their result
//! scale the way numeric.c does (at least 16 significant digits); the
//! remaining operators keep the scale the decimal arithmetic produces.

use std::str::FromStr;

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::nodes::datum::Datum;
use crate::utils::elog::{PgError, PgResult, SqlState, elog};
use crate::utils::fmgr::FunctionCallInfo;

/// Significant digits kept by division and square root.
const NUMERIC_MIN_SIG_DIGITS: i32 = 16;
/// Digits per base-10000 group in the reference representation.
const DEC_DIGITS: i32 = 4;
/// Largest scale a `Decimal` can carry.
const MAX_DECIMAL_SCALE: i32 = 28;

fn overflow() -> PgError {
    PgError::new(SqlState::NumericValueOutOfRange, "value overflows numeric format")
}

fn division_by_zero() -> PgError {
    PgError::new(SqlState::DivisionByZero, "division by zero")
}

/// Read a numeric argument; integers and floats are widened.
pub fn numeric_arg(value: &Datum) -> PgResult<Decimal> {
    match value {
        Datum::Numeric(v) => Ok(*v),
        Datum::Float4(v) => numeric_from_f64(f64::from(*v)),
        Datum::Float8(v) => numeric_from_f64(*v),
        other => other
            .as_i64()
            .map(Decimal::from)
            .ok_or_else(|| elog(format!("expected a numeric argument, got {other:?}"))),
    }
}

pub fn numeric_from_f64(value: f64) -> PgResult<Decimal> {
    if !value.is_finite() {
        return Err(PgError::new(
            SqlState::FeatureNotSupported,
            format!("cannot convert {} to numeric", super::float::float8out(value)),
        ));
    }
    Decimal::from_str(&format!("{value}"))
        .ok()
        .or_else(|| Decimal::from_f64(value))
        .ok_or_else(overflow)
}

pub fn numeric_to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(f64::NAN)
}

/// Decimal exponent of the leading digit, the base-10000 weight and the
/// leading base-10000 digit of a non-zero value.
fn nbase_weight(value: Decimal) -> (i32, i32) {
    let digits = value.mantissa().unsigned_abs().to_string();
    let exp10 = digits.len() as i32 - 1 - value.scale() as i32;
    let weight = exp10.div_euclid(DEC_DIGITS);
    let lead_len = (exp10 - weight * DEC_DIGITS + 1) as usize;
    let lead: String = digits
        .chars()
        .chain(std::iter::repeat('0'))
        .take(lead_len)
        .collect();
    (weight, lead.parse().unwrap_or(0))
}

/// Round half away from zero to `scale` places and pad to exactly that scale.
pub fn round_to_scale(value: Decimal, scale: i32) -> Decimal {
    let scale = scale.clamp(0, MAX_DECIMAL_SCALE) as u32;
    let mut rounded = value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(scale);
    rounded
}

/// Result scale of `a / b`.
fn select_div_scale(a: Decimal, b: Decimal) -> i32 {
    let (weight1, first1) = if a.is_zero() { (0, 0) } else { nbase_weight(a) };
    let (weight2, first2) = if b.is_zero() { (0, 0) } else { nbase_weight(b) };
    let mut qweight = weight1 - weight2;
    if first1 <= first2 {
        qweight -= 1;
    }
    let rscale = NUMERIC_MIN_SIG_DIGITS - qweight * DEC_DIGITS;
    rscale.max(a.scale() as i32).max(b.scale() as i32).max(0)
}

fn binary(fcinfo: &FunctionCallInfo<'_>) -> PgResult<(Decimal, Decimal)> {
    Ok((numeric_arg(fcinfo.arg(0))?, numeric_arg(fcinfo.arg(1))?))
}

pub fn numeric_add(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let (a, b) = binary(fcinfo)?;
    a.checked_add(b).map(Datum::Numeric).ok_or_else(overflow)
}

pub fn numeric_sub(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let (a, b) = binary(fcinfo)?;
    a.checked_sub(b).map(Datum::Numeric).ok_or_else(overflow)
}

pub fn numeric_mul(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let (a, b) = binary(fcinfo)?;
    a.checked_mul(b).map(Datum::Numeric).ok_or_else(overflow)
}

/// `a / b` rounded to the division result scale.
pub fn numeric_quotient(a: Decimal, b: Decimal) -> PgResult<Decimal> {
    if b.is_zero() {
        return Err(division_by_zero());
    }
    let quotient = a.checked_div(b).ok_or_else(overflow)?;
    Ok(round_to_scale(quotient, select_div_scale(a, b)))
}

pub fn numeric_div(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let (a, b) = binary(fcinfo)?;
    numeric_quotient(a, b).map(Datum::Numeric)
}

pub fn numeric_mod(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let (a, b) = binary(fcinfo)?;
    if b.is_zero() {
        return Err(division_by_zero());
    }
    a.checked_rem(b).map(Datum::Numeric).ok_or_else(overflow)
}

pub fn numeric_um(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(Datum::Numeric(-numeric_arg(fcinfo.arg(0))?))
}

pub fn numeric_abs(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(Datum::Numeric(numeric_arg(fcinfo.arg(0))?.abs()))
}

/// Optional second argument of round/trunc: digits after the point.
fn places(fcinfo: &FunctionCallInfo<'_>) -> PgResult<i32> {
    if fcinfo.nargs() < 2 {
        return Ok(0);
    }
    let places = fcinfo
        .arg(1)
        .as_i64()
        .ok_or_else(|| elog("round/trunc places must be an integer"))?;
    Ok(places.clamp(-1000, 1000) as i32)
}

fn shift(value: Decimal, places: i32) -> PgResult<Decimal> {
    let factor = Decimal::from_i128_with_scale(10_i128.pow(places.unsigned_abs().min(28)), 0);
    if places >= 0 {
        value.checked_mul(factor).ok_or_else(overflow)
    } else {
        value.checked_div(factor).ok_or_else(overflow)
    }
}

fn round_with(value: Decimal, places: i32, strategy: RoundingStrategy) -> PgResult<Decimal> {
    if places >= 0 {
        let scale = places.min(MAX_DECIMAL_SCALE) as u32;
        let mut rounded = value.round_dp_with_strategy(scale, strategy);
        rounded.rescale(scale);
        return Ok(rounded);
    }
    // Negative places round to the left of the point: 1234.5 -> 1200.
    let shifted = shift(value, places)?;
    let rounded = shifted.round_dp_with_strategy(0, strategy);
    let mut result = shift(rounded, -places)?;
    result.rescale(0);
    Ok(result)
}

pub fn numeric_round(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let value = numeric_arg(fcinfo.arg(0))?;
    round_with(value, places(fcinfo)?, RoundingStrategy::MidpointAwayFromZero).map(Datum::Numeric)
}

pub fn numeric_trunc(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let value = numeric_arg(fcinfo.arg(0))?;
    round_with(value, places(fcinfo)?, RoundingStrategy::ToZero).map(Datum::Numeric)
}

pub fn numeric_floor(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(Datum::Numeric(numeric_arg(fcinfo.arg(0))?.floor()))
}

pub fn numeric_ceil(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(Datum::Numeric(numeric_arg(fcinfo.arg(0))?.ceil()))
}

/// Exact power by repeated squaring for integral exponents.
fn power_int(base: Decimal, exponent: i64) -> PgResult<Decimal> {
    let mut result = Decimal::ONE;
    let mut square = base;
    let mut remaining = exponent.unsigned_abs();
    while remaining > 0 {
        if remaining & 1 == 1 {
            result = result.checked_mul(square).ok_or_else(overflow)?;
        }
        remaining >>= 1;
        if remaining > 0 {
            square = square.checked_mul(square).ok_or_else(overflow)?;
        }
    }
    if exponent < 0 {
        let quotient = Decimal::ONE.checked_div(result).ok_or_else(overflow)?;
        return Ok(round_to_scale(quotient, select_div_scale(Decimal::ONE, result)));
    }
    Ok(result.normalize())
}

pub fn numeric_power(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let (base, exponent) = binary(fcinfo)?;
    if base.is_zero() && exponent.is_sign_negative() && !exponent.is_zero() {
        return Err(PgError::new(
            SqlState::InvalidArgumentForPowerFunction,
            "zero raised to a negative power is undefined",
        ));
    }
    if exponent.fract().is_zero() {
        if let Some(exp) = exponent.to_i64() {
            return power_int(base, exp).map(Datum::Numeric);
        }
    }
    if base.is_sign_negative() && !base.is_zero() {
        return Err(PgError::new(
            SqlState::InvalidArgumentForPowerFunction,
            "a negative number raised to a non-integer power yields a complex result",
        ));
    }
    let result = numeric_to_f64(base).powf(numeric_to_f64(exponent));
    if !result.is_finite() {
        return Err(overflow());
    }
    let value = numeric_from_f64(result)?;
    let scale = if value.is_zero() {
        NUMERIC_MIN_SIG_DIGITS
    } else {
        NUMERIC_MIN_SIG_DIGITS - nbase_weight(value).0 * DEC_DIGITS
    };
    Ok(Datum::Numeric(round_to_scale(value, scale.max(0))))
}

/// Square root refined with Newton steps in decimal arithmetic.
pub fn numeric_sqrt(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let value = numeric_arg(fcinfo.arg(0))?;
    if value.is_sign_negative() && !value.is_zero() {
        return Err(PgError::new(
            SqlState::InvalidArgumentForPowerFunction,
            "cannot take square root of a negative number",
        ));
    }
    let weight = if value.is_zero() { 0 } else { nbase_weight(value).0 };
    let sweight = (weight + 1) * DEC_DIGITS / 2 - 1;
    let rscale = (NUMERIC_MIN_SIG_DIGITS - sweight)
        .max(value.scale() as i32)
        .max(0);
    if value.is_zero() {
        return Ok(Datum::Numeric(round_to_scale(Decimal::ZERO, rscale)));
    }
    let two = Decimal::TWO;
    let mut guess = numeric_from_f64(numeric_to_f64(value).sqrt())?;
    for _ in 0..4 {
        let Some(next) = value
            .checked_div(guess)
            .and_then(|q| q.checked_add(guess))
            .and_then(|s| s.checked_div(two))
        else {
            break;
        };
        if next == guess {
            break;
        }
        guess = next;
    }
    Ok(Datum::Numeric(round_to_scale(guess, rscale)))
}

pub fn random(_fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(Datum::Float8(rand::random::<f64>()))
}

/// Apply a `numeric(p, s)` type modifier: round to `s` places and check the
/// integral digits fit in `p - s`.
pub fn apply_numeric_typmod(value: Decimal, typmod: i32) -> PgResult<Decimal> {
    if typmod < 4 {
        return Ok(value);
    }
    let packed = typmod - 4;
    let precision = (packed >> 16) & 0xffff;
    let scale = packed & 0xffff;
    let rounded = round_to_scale(value, scale);
    let max_int_digits = precision - scale;
    let int_part = rounded.trunc().abs();
    let int_digits = if int_part.is_zero() {
        0
    } else {
        int_part.mantissa().to_string().len() as i32 - int_part.scale() as i32
    };
    if int_digits > max_int_digits {
        let bound = if max_int_digits > 0 {
            format!("10^{max_int_digits}")
        } else {
            "1".to_string()
        };
        return Err(PgError::new(SqlState::NumericValueOutOfRange, "numeric field overflow")
            .with_detail(format!(
                "A field with precision {precision}, scale {scale} must round to an absolute value less than {bound}."
            )));
    }
    Ok(rounded)
}

/// Encode `numeric(precision, scale)` as a type modifier.
pub fn make_numeric_typmod(precision: i32, scale: i32) -> i32 {
    ((precision << 16) | (scale & 0xffff)) + 4
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::catalog::pg_type::NUMERICOID;

    fn num(text: &str) -> Datum {
        Datum::Numeric(Decimal::from_str(text).unwrap())
    }

    fn call(func: fn(&FunctionCallInfo<'_>) -> PgResult<Datum>, args: Vec<Datum>) -> PgResult<Datum> {
        let catalog = Catalog::default();
        let argtypes = vec![NUMERICOID; args.len()];
        func(&FunctionCallInfo {
            args,
            argtypes: &argtypes,
            rettype: NUMERICOID,
            collation: 0,
            funcvariadic: false,
            catalog: &catalog,
        })
    }

    fn text_of(datum: Datum) -> String {
        match datum {
            Datum::Numeric(v) => v.to_string(),
            other => panic!("not numeric: {other:?}"),
        }
    }

    #[test]
    fn division_keeps_sixteen_significant_digits() {
        assert_eq!(text_of(call(numeric_div, vec![num("1"), num("3")]).unwrap()), "0.33333333333333333333");
        assert_eq!(text_of(call(numeric_div, vec![num("10"), num("4")]).unwrap()), "2.5000000000000000");
        let err = call(numeric_div, vec![num("1"), num("0")]).unwrap_err();
        assert_eq!(err.sqlstate, SqlState::DivisionByZero);
    }

    #[test]
    fn sqrt_scale_follows_weight() {
        assert_eq!(text_of(call(numeric_sqrt, vec![num("2")]).unwrap()), "1.414213562373095");
        assert!(call(numeric_sqrt, vec![num("-1")]).is_err());
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(text_of(call(numeric_round, vec![num("2.5")]).unwrap()), "3");
        assert_eq!(text_of(call(numeric_round, vec![num("-2.5")]).unwrap()), "-3");
        assert_eq!(text_of(call(numeric_round, vec![num("1234.567"), Datum::Int4(2)]).unwrap()), "1234.57");
        assert_eq!(text_of(call(numeric_round, vec![num("1250"), Datum::Int4(-2)]).unwrap()), "1300");
        assert_eq!(text_of(call(numeric_trunc, vec![num("1.99"), Datum::Int4(1)]).unwrap()), "1.9");
    }

    #[test]
    fn typmod_rounds_and_checks_precision() {
        let typmod = make_numeric_typmod(5, 2);
        let value = apply_numeric_typmod(Decimal::from_str("123.456").unwrap(), typmod).unwrap();
        assert_eq!(value.to_string(), "123.46");
        let err = apply_numeric_typmod(Decimal::from_str("1234.5").unwrap(), typmod).unwrap_err();
        assert_eq!(err.message, "numeric field overflow");
        assert_eq!(
            err.detail.as_deref(),
            Some("A field with precision 5, scale 2 must round to an absolute value less than 10^3.")
        );
    }

    #[test]
    fn integral_powers_are_exact() {
        assert_eq!(text_of(call(numeric_power, vec![num("2"), num("10")]).unwrap()), "1024");
        assert_eq!(text_of(call(numeric_power, vec![num("1.5"), num("2")]).unwrap()), "2.25");
    }
}
