//! Miscellaneous builtins: type introspection, null counting and session
//! information.

use crate::catalog::CatalogOracle;
use crate::nodes::datum::Datum;
use crate::utils::elog::PgResult;
use crate::utils::fmgr::FunctionCallInfo;
use crate::utils::guc;

/// `pg_typeof(any)`: the resolved type of the argument expression.
pub fn pg_typeof(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(Datum::Text(fcinfo.catalog.format_type(fcinfo.argtype(0))))
}

fn count_nulls(fcinfo: &FunctionCallInfo<'_>) -> (usize, usize) {
    // A VARIADIC array argument counts its elements.
    if let [Datum::Array(array)] = fcinfo.args.as_slice() {
        if fcinfo.catalog.element_type_of(fcinfo.argtype(0)).is_some() && fcinfo.nargs() == 1 {
            let nulls = array.elements.iter().filter(|d| d.is_null()).count();
            return (nulls, array.elements.len() - nulls);
        }
    }
    let nulls = fcinfo.args.iter().filter(|d| d.is_null()).count();
    (nulls, fcinfo.nargs() - nulls)
}

pub fn num_nulls(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(Datum::Int4(count_nulls(fcinfo).0 as i32))
}

pub fn num_nonnulls(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(Datum::Int4(count_nulls(fcinfo).1 as i32))
}

pub fn current_setting(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let name = fcinfo.arg(0).as_str().unwrap_or_default();
    guc::show_config(name).map(Datum::Text)
}

pub fn current_database(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(Datum::text(fcinfo.catalog.current_database_name()))
}

pub fn version(_fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(Datum::Text(format!(
        "PostgreSQL 16.0 compatible ({} {})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::catalog::oid::Oid;
    use crate::catalog::pg_type::{INT4ARRAYOID, INT4OID, NUMERICOID, TEXTOID};
    use crate::nodes::datum::ArrayValue;

    fn call(f: fn(&FunctionCallInfo<'_>) -> PgResult<Datum>, args: Vec<Datum>, argtypes: &[Oid]) -> Datum {
        let catalog = Catalog::default();
        let fcinfo = FunctionCallInfo {
            args,
            argtypes,
            rettype: TEXTOID,
            collation: 0,
            funcvariadic: false,
            catalog: &catalog,
        };
        f(&fcinfo).unwrap()
    }

    #[test]
    fn typeof_uses_call_site_type() {
        assert_eq!(call(pg_typeof, vec![Datum::Null], &[NUMERICOID]), Datum::text("numeric"));
        assert_eq!(call(pg_typeof, vec![Datum::Int4(1)], &[INT4ARRAYOID]), Datum::text("integer[]"));
    }

    #[test]
    fn null_counting() {
        let args = vec![Datum::Null, Datum::Int4(1), Datum::Null];
        assert_eq!(call(num_nulls, args.clone(), &[INT4OID, INT4OID, INT4OID]), Datum::Int4(2));
        assert_eq!(call(num_nonnulls, args, &[INT4OID, INT4OID, INT4OID]), Datum::Int4(1));
        let array = Datum::array(ArrayValue::from_vec(INT4OID, vec![Datum::Null, Datum::Int4(3)]));
        assert_eq!(call(num_nulls, vec![array], &[INT4ARRAYOID]), Datum::Int4(1));
    }

    #[test]
    fn database_name() {
        assert_eq!(call(current_database, vec![], &[]), Datum::text("postgres"));
    }
}
