// Integer arithmetic with PostgreSQL-compatible overflow detection.
//
// Operands arrive as int2/int4/int8 datums of the operator's declared types;
// the computation runs in i64 and the result is range-checked against the
// operator's result type, raising 22003 the way int.c and int8.c do.

use crate::catalog::oid::Oid;
use crate::catalog::pg_type::{INT2OID, INT4OID};
use crate::nodes::datum::Datum;
use crate::utils::elog::{PgError, PgResult, SqlState, elog};
use crate::utils::fmgr::FunctionCallInfo;

/// int2 (smallint) range
pub const INT2_MIN: i64 = i16::MIN as i64;
pub const INT2_MAX: i64 = i16::MAX as i64;

/// int4 (integer) range
pub const INT4_MIN: i64 = i32::MIN as i64;
pub const INT4_MAX: i64 = i32::MAX as i64;

fn out_of_range(typid: Oid) -> PgError {
    let name = match typid {
        INT2OID => "smallint",
        INT4OID => "integer",
        _ => "bigint",
    };
    PgError::new(SqlState::NumericValueOutOfRange, format!("{name} out of range"))
}

pub fn validate_int2(value: i64) -> PgResult<i16> {
    i16::try_from(value).map_err(|_| out_of_range(INT2OID))
}

pub fn validate_int4(value: i64) -> PgResult<i32> {
    i32::try_from(value).map_err(|_| out_of_range(INT4OID))
}

/// Wrap an i64 as a datum of `typid`, checking its range.
pub fn int_datum(value: i64, typid: Oid) -> PgResult<Datum> {
    Ok(match typid {
        INT2OID => Datum::Int2(validate_int2(value)?),
        INT4OID => Datum::Int4(validate_int4(value)?),
        _ => Datum::Int8(value),
    })
}

pub fn int_arg(value: &Datum) -> PgResult<i64> {
    value
        .as_i64()
        .ok_or_else(|| elog(format!("expected an integer argument, got {value:?}")))
}

fn binary(fcinfo: &FunctionCallInfo<'_>) -> PgResult<(i64, i64)> {
    Ok((int_arg(fcinfo.arg(0))?, int_arg(fcinfo.arg(1))?))
}

pub fn int_pl(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let (a, b) = binary(fcinfo)?;
    let sum = a.checked_add(b).ok_or_else(|| out_of_range(fcinfo.rettype))?;
    int_datum(sum, fcinfo.rettype)
}

pub fn int_mi(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let (a, b) = binary(fcinfo)?;
    let diff = a.checked_sub(b).ok_or_else(|| out_of_range(fcinfo.rettype))?;
    int_datum(diff, fcinfo.rettype)
}

pub fn int_mul(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let (a, b) = binary(fcinfo)?;
    let product = a.checked_mul(b).ok_or_else(|| out_of_range(fcinfo.rettype))?;
    int_datum(product, fcinfo.rettype)
}

pub fn int_div(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let (a, b) = binary(fcinfo)?;
    if b == 0 {
        return Err(PgError::new(SqlState::DivisionByZero, "division by zero"));
    }
    // MIN / -1 overflows; int.c special-cases it the same way.
    let quotient = a.checked_div(b).ok_or_else(|| out_of_range(fcinfo.rettype))?;
    int_datum(quotient, fcinfo.rettype)
}

pub fn int_mod(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let (a, b) = binary(fcinfo)?;
    if b == 0 {
        return Err(PgError::new(SqlState::DivisionByZero, "division by zero"));
    }
    if b == -1 {
        return int_datum(0, fcinfo.rettype);
    }
    int_datum(a % b, fcinfo.rettype)
}

pub fn int_um(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let a = int_arg(fcinfo.arg(0))?;
    let negated = a.checked_neg().ok_or_else(|| out_of_range(fcinfo.rettype))?;
    int_datum(negated, fcinfo.rettype)
}

pub fn int_abs(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let a = int_arg(fcinfo.arg(0))?;
    let abs = a.checked_abs().ok_or_else(|| out_of_range(fcinfo.rettype))?;
    int_datum(abs, fcinfo.rettype)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::catalog::pg_type::INT8OID;

    fn call(func: fn(&FunctionCallInfo<'_>) -> PgResult<Datum>, args: Vec<Datum>, rettype: Oid) -> PgResult<Datum> {
        let catalog = Catalog::default();
        let argtypes = vec![rettype; args.len()];
        func(&FunctionCallInfo {
            args,
            argtypes: &argtypes,
            rettype,
            collation: 0,
            funcvariadic: false,
            catalog: &catalog,
        })
    }

    #[test]
    fn int4_overflow_is_reported() {
        let err = call(int_pl, vec![Datum::Int4(i32::MAX), Datum::Int4(1)], INT4OID).unwrap_err();
        assert_eq!(err.sqlstate, SqlState::NumericValueOutOfRange);
        assert_eq!(err.message, "integer out of range");
        assert_eq!(
            call(int_pl, vec![Datum::Int4(1), Datum::Int4(2)], INT4OID).unwrap(),
            Datum::Int4(3)
        );
    }

    #[test]
    fn division_by_zero_and_min_over_minus_one() {
        let err = call(int_div, vec![Datum::Int8(1), Datum::Int8(0)], INT8OID).unwrap_err();
        assert_eq!(err.sqlstate, SqlState::DivisionByZero);
        let err = call(int_div, vec![Datum::Int2(i16::MIN), Datum::Int2(-1)], INT2OID).unwrap_err();
        assert_eq!(err.message, "smallint out of range");
        assert_eq!(
            call(int_mod, vec![Datum::Int8(i64::MIN), Datum::Int8(-1)], INT8OID).unwrap(),
            Datum::Int8(0)
        );
    }

    #[test]
    fn truncating_division_follows_c() {
        assert_eq!(
            call(int_div, vec![Datum::Int4(-7), Datum::Int4(2)], INT4OID).unwrap(),
            Datum::Int4(-3)
        );
        assert_eq!(
            call(int_mod, vec![Datum::Int4(-7), Datum::Int4(2)], INT4OID).unwrap(),
            Datum::Int4(-1)
        );
    }
}
