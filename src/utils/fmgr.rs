//! Function manager: resolves a `pg_proc` row into something callable.
//!
//! Internal functions are found by their `prosrc` symbol in a static table.
//! SQL-language functions get a [`SqlFunctionCache`] that the executor fills
//! in on first call.

use std::sync::Arc;

use tracing::trace;

use crate::catalog::oid::{INVALID_OID, Oid};
use crate::catalog::pg_proc::{PgProc, ProKind, ProLang, Volatility};
use crate::catalog::{Catalog, CatalogOracle};
use crate::executor::functions::SqlFunctionCache;
use crate::nodes::datum::Datum;
use crate::utils::adt::{
    arrayfuncs, cmp, datetime, float, int_arithmetic, io, json, jsonpath, math_functions, misc,
    string_functions,
};
use crate::utils::elog::{PgError, PgResult, SqlState};

/// Arguments and call-site context of one function invocation.
pub struct FunctionCallInfo<'a> {
    pub args: Vec<Datum>,
    /// Actual argument types at the call site (resolved, not declared).
    pub argtypes: &'a [Oid],
    pub rettype: Oid,
    pub collation: Oid,
    /// The trailing argument is an explicit `VARIADIC` array.
    pub funcvariadic: bool,
    pub catalog: &'a Catalog,
}

impl FunctionCallInfo<'_> {
    pub fn nargs(&self) -> usize {
        self.args.len()
    }

    pub fn arg(&self, n: usize) -> &Datum {
        self.args.get(n).unwrap_or(&Datum::Null)
    }

    pub fn argtype(&self, n: usize) -> Oid {
        self.argtypes.get(n).copied().unwrap_or(INVALID_OID)
    }
}

/// A builtin returning one value; `Datum::Null` is a null result.
pub type PgFunction = fn(&FunctionCallInfo<'_>) -> PgResult<Datum>;

/// A builtin set-returning function in materialize mode.
pub type SetReturningFunction = fn(&FunctionCallInfo<'_>) -> PgResult<Vec<Datum>>;

#[derive(Debug, Clone, Copy)]
pub enum Builtin {
    Scalar(PgFunction),
    Set(SetReturningFunction),
}

#[derive(Debug)]
pub enum FmgrKind {
    Builtin(Builtin),
    Sql(Arc<SqlFunctionCache>),
}

/// Resolved call descriptor, cached on the calling expression node.
#[derive(Debug)]
pub struct FmgrInfo {
    pub fn_oid: Oid,
    pub fn_name: String,
    pub fn_strict: bool,
    pub fn_retset: bool,
    pub fn_nargs: usize,
    pub volatility: Volatility,
    pub rettype: Oid,
    pub argtypes: Vec<Oid>,
    /// Set for call sites written with `VARIADIC`.
    pub fn_expr_variadic: bool,
    pub kind: FmgrKind,
}

impl FmgrInfo {
    /// Invoke a builtin scalar function.
    pub fn call(&self, fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
        match &self.kind {
            FmgrKind::Builtin(Builtin::Scalar(func)) => func(fcinfo),
            FmgrKind::Builtin(Builtin::Set(func)) => {
                let mut rows = func(fcinfo)?;
                if rows.len() > 1 {
                    return Err(PgError::new(
                        SqlState::FeatureNotSupported,
                        "set-valued function called in context that cannot accept a set",
                    ));
                }
                Ok(rows.pop().unwrap_or(Datum::Null))
            }
            FmgrKind::Sql(_) => Err(PgError::new(
                SqlState::InternalError,
                format!("SQL function {} must be called through the executor", self.fn_name),
            )),
        }
    }
}

/// Build the call descriptor for `funcid` as called with `argtypes`.
pub fn fmgr_info(catalog: &Catalog, funcid: Oid, argtypes: Vec<Oid>, rettype: Oid) -> PgResult<FmgrInfo> {
    let proc = catalog.proc_by_id(funcid).ok_or_else(|| {
        PgError::new(
            SqlState::UndefinedFunction,
            format!("cache lookup failed for function {funcid}"),
        )
    })?;
    let kind = fmgr_kind(proc)?;
    trace!(function = %proc.name, oid = funcid, "resolved function manager entry");
    Ok(FmgrInfo {
        fn_oid: funcid,
        fn_name: proc.name.clone(),
        fn_strict: proc.strict,
        fn_retset: proc.retset,
        fn_nargs: proc.nargs(),
        volatility: proc.volatility,
        rettype,
        argtypes,
        fn_expr_variadic: false,
        kind,
    })
}

fn fmgr_kind(proc: &PgProc) -> PgResult<FmgrKind> {
    match (proc.kind, proc.lang) {
        (ProKind::Aggregate, _) => Err(PgError::new(
            SqlState::WrongObjectType,
            format!("aggregate function {} called as normal function", proc.name),
        )),
        (ProKind::Window, _) => Err(PgError::new(
            SqlState::WrongObjectType,
            format!("window function {} called as normal function", proc.name),
        )),
        (_, ProLang::Internal) => lookup_builtin(&proc.prosrc)
            .map(FmgrKind::Builtin)
            .ok_or_else(|| {
                PgError::new(
                    SqlState::UndefinedFunction,
                    format!("internal function \"{}\" is not in internal lookup table", proc.prosrc),
                )
            }),
        (_, ProLang::Sql) => Ok(FmgrKind::Sql(Arc::new(SqlFunctionCache::new(proc.clone())))),
    }
}

/// Call a builtin function directly by OID, outside any expression.
pub fn direct_function_call(
    catalog: &Catalog,
    funcid: Oid,
    args: Vec<Datum>,
    argtypes: &[Oid],
    rettype: Oid,
) -> PgResult<Datum> {
    let info = fmgr_info(catalog, funcid, argtypes.to_vec(), rettype)?;
    if info.fn_strict && args.iter().any(Datum::is_null) {
        return Ok(Datum::Null);
    }
    let fcinfo = FunctionCallInfo {
        args,
        argtypes,
        rettype,
        collation: INVALID_OID,
        funcvariadic: false,
        catalog,
    };
    info.call(&fcinfo)
}

/// The internal-function table, keyed by `prosrc`.
pub fn lookup_builtin(name: &str) -> Option<Builtin> {
    use Builtin::{Scalar, Set};
    let builtin = match name {
        "type_in" => Scalar(io::type_in),
        "type_out" => Scalar(io::type_out),
        "scalar_cast" => Scalar(io::scalar_cast),
        "varchar_typmod" => Scalar(io::varchar_typmod),
        "bpchar_typmod" => Scalar(io::bpchar_typmod),
        "numeric_typmod" => Scalar(io::numeric_typmod),

        "datum_eq" => Scalar(cmp::datum_eq),
        "datum_ne" => Scalar(cmp::datum_ne),
        "datum_lt" => Scalar(cmp::datum_lt),
        "datum_le" => Scalar(cmp::datum_le),
        "datum_gt" => Scalar(cmp::datum_gt),
        "datum_ge" => Scalar(cmp::datum_ge),
        "datum_cmp" => Scalar(cmp::datum_cmp),
        "record_image_eq" => Scalar(cmp::record_image_eq),
        "record_image_ne" => Scalar(cmp::record_image_ne),
        "record_image_lt" => Scalar(cmp::record_image_lt),
        "record_image_le" => Scalar(cmp::record_image_le),
        "record_image_gt" => Scalar(cmp::record_image_gt),
        "record_image_ge" => Scalar(cmp::record_image_ge),
        "record_image_cmp" => Scalar(cmp::record_image_cmp),

        "int_pl" => Scalar(int_arithmetic::int_pl),
        "int_mi" => Scalar(int_arithmetic::int_mi),
        "int_mul" => Scalar(int_arithmetic::int_mul),
        "int_div" => Scalar(int_arithmetic::int_div),
        "int_mod" => Scalar(int_arithmetic::int_mod),
        "int_um" => Scalar(int_arithmetic::int_um),
        "int_abs" => Scalar(int_arithmetic::int_abs),

        "float_pl" => Scalar(float::float_pl),
        "float_mi" => Scalar(float::float_mi),
        "float_mul" => Scalar(float::float_mul),
        "float_div" => Scalar(float::float_div),
        "float_um" => Scalar(float::float_um),
        "float_abs" => Scalar(float::float_abs),
        "float_round" => Scalar(float::float_round),
        "float_trunc" => Scalar(float::float_trunc),
        "float_floor" => Scalar(float::float_floor),
        "float_ceil" => Scalar(float::float_ceil),
        "float_power" => Scalar(float::float_power),
        "float_sqrt" => Scalar(float::float_sqrt),

        "numeric_add" => Scalar(math_functions::numeric_add),
        "numeric_sub" => Scalar(math_functions::numeric_sub),
        "numeric_mul" => Scalar(math_functions::numeric_mul),
        "numeric_div" => Scalar(math_functions::numeric_div),
        "numeric_mod" => Scalar(math_functions::numeric_mod),
        "numeric_um" => Scalar(math_functions::numeric_um),
        "numeric_abs" => Scalar(math_functions::numeric_abs),
        "numeric_round" => Scalar(math_functions::numeric_round),
        "numeric_trunc" => Scalar(math_functions::numeric_trunc),
        "numeric_floor" => Scalar(math_functions::numeric_floor),
        "numeric_ceil" => Scalar(math_functions::numeric_ceil),
        "numeric_power" => Scalar(math_functions::numeric_power),
        "numeric_sqrt" => Scalar(math_functions::numeric_sqrt),
        "random" => Scalar(math_functions::random),

        "date_pli" => Scalar(datetime::date_pli),
        "integer_pl_date" => Scalar(datetime::integer_pl_date),
        "date_mii" => Scalar(datetime::date_mii),
        "date_mi" => Scalar(datetime::date_mi),
        "now" => Scalar(datetime::now),

        "textcat" => Scalar(string_functions::textcat),
        "textanycat" => Scalar(string_functions::textanycat),
        "anytextcat" => Scalar(string_functions::anytextcat),
        "byteacat" => Scalar(string_functions::byteacat),
        "text_like" => Scalar(string_functions::text_like),
        "text_not_like" => Scalar(string_functions::text_not_like),
        "text_ilike" => Scalar(string_functions::text_ilike),
        "text_not_ilike" => Scalar(string_functions::text_not_ilike),
        "text_regex_match" => Scalar(string_functions::text_regex_match),
        "text_regex_not_match" => Scalar(string_functions::text_regex_not_match),
        "text_regex_imatch" => Scalar(string_functions::text_regex_imatch),
        "text_regex_not_imatch" => Scalar(string_functions::text_regex_not_imatch),
        "text_regexp_like" => Scalar(string_functions::text_regexp_like),
        "text_regexp_match" => Scalar(string_functions::text_regexp_match),
        "text_regexp_replace" => Scalar(string_functions::text_regexp_replace),
        "text_length" => Scalar(string_functions::text_length),
        "bpchar_length" => Scalar(string_functions::bpchar_length),
        "bytea_length" => Scalar(string_functions::bytea_length),
        "text_octet_length" => Scalar(string_functions::text_octet_length),
        "text_lower" => Scalar(string_functions::text_lower),
        "text_upper" => Scalar(string_functions::text_upper),
        "text_initcap" => Scalar(string_functions::text_initcap),
        "text_reverse" => Scalar(string_functions::text_reverse),
        "text_md5" => Scalar(string_functions::text_md5),
        "bytea_md5" => Scalar(string_functions::bytea_md5),
        "bytea_sha256" => Scalar(string_functions::bytea_sha256),
        "binary_encode" => Scalar(string_functions::binary_encode),
        "binary_decode" => Scalar(string_functions::binary_decode),
        "text_substr" => Scalar(string_functions::text_substr),
        "text_btrim" => Scalar(string_functions::text_btrim),
        "text_ltrim" => Scalar(string_functions::text_ltrim),
        "text_rtrim" => Scalar(string_functions::text_rtrim),
        "text_replace" => Scalar(string_functions::text_replace),
        "text_strpos" => Scalar(string_functions::text_strpos),
        "text_left" => Scalar(string_functions::text_left),
        "text_right" => Scalar(string_functions::text_right),
        "text_repeat" => Scalar(string_functions::text_repeat),
        "text_split_part" => Scalar(string_functions::text_split_part),
        "text_starts_with" => Scalar(string_functions::text_starts_with),
        "text_lpad" => Scalar(string_functions::text_lpad),
        "text_rpad" => Scalar(string_functions::text_rpad),
        "text_concat" => Scalar(string_functions::text_concat),
        "text_concat_ws" => Scalar(string_functions::text_concat_ws),

        "array_length" => Scalar(arrayfuncs::array_length),
        "array_lower" => Scalar(arrayfuncs::array_lower),
        "array_upper" => Scalar(arrayfuncs::array_upper),
        "array_ndims" => Scalar(arrayfuncs::array_ndims),
        "array_cardinality" => Scalar(arrayfuncs::array_cardinality),
        "array_append" => Scalar(arrayfuncs::array_append),
        "array_prepend" => Scalar(arrayfuncs::array_prepend),
        "array_cat" => Scalar(arrayfuncs::array_cat),
        "array_to_string" => Scalar(arrayfuncs::array_to_string),
        "string_to_array" => Scalar(arrayfuncs::string_to_array),
        "array_contains" => Scalar(arrayfuncs::array_contains),
        "array_contained" => Scalar(arrayfuncs::array_contained),
        "array_overlap" => Scalar(arrayfuncs::array_overlap),
        "array_unnest" => Set(arrayfuncs::array_unnest),
        "generate_series" => Set(arrayfuncs::generate_series),

        "to_json" => Scalar(json::to_json),
        "to_jsonb" => Scalar(json::to_jsonb),
        "json_build_object" => Scalar(json::json_build_object),
        "jsonb_build_object" => Scalar(json::jsonb_build_object),
        "json_build_array" => Scalar(json::json_build_array),
        "jsonb_build_array" => Scalar(json::jsonb_build_array),
        "json_typeof" => Scalar(json::json_typeof),
        "json_array_length" => Scalar(json::json_array_length),
        "json_strip_nulls" => Scalar(json::json_strip_nulls),
        "jsonb_pretty" => Scalar(json::jsonb_pretty),
        "json_object_field" => Scalar(json::json_object_field),
        "json_object_field_text" => Scalar(json::json_object_field_text),
        "json_array_element" => Scalar(json::json_array_element),
        "json_array_element_text" => Scalar(json::json_array_element_text),
        "jsonb_contains" => Scalar(json::jsonb_contains),
        "jsonb_contained" => Scalar(json::jsonb_contained),
        "jsonb_exists" => Scalar(json::jsonb_exists),
        "jsonb_cast_scalar" => Scalar(json::jsonb_cast_scalar),
        "json_array_elements" => Set(json::json_array_elements),
        "json_array_elements_text" => Set(json::json_array_elements_text),
        "json_object_keys" => Set(json::json_object_keys),

        "jsonb_path_exists" => Scalar(jsonpath::jsonb_path_exists),
        "jsonb_path_match" => Scalar(jsonpath::jsonb_path_match),
        "jsonb_path_query" => Set(jsonpath::jsonb_path_query),
        "jsonb_path_query_array" => Scalar(jsonpath::jsonb_path_query_array),
        "jsonb_path_query_first" => Scalar(jsonpath::jsonb_path_query_first),

        "pg_typeof" => Scalar(misc::pg_typeof),
        "num_nulls" => Scalar(misc::num_nulls),
        "num_nonnulls" => Scalar(misc::num_nonnulls),
        "current_setting" => Scalar(misc::current_setting),
        "current_database" => Scalar(misc::current_database),
        "version" => Scalar(misc::version),
        _ => return None,
    };
    Some(builtin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::pg_type::{INT4OID, TEXTOID};

    #[test]
    fn builtin_lookup_by_symbol() {
        assert!(matches!(lookup_builtin("int_pl"), Some(Builtin::Scalar(_))));
        assert!(matches!(lookup_builtin("generate_series"), Some(Builtin::Set(_))));
        assert!(lookup_builtin("no_such_symbol").is_none());
    }

    #[test]
    fn direct_call_honors_strictness() {
        let catalog = Catalog::default();
        let upper = catalog
            .proc_by_signature("upper", &[TEXTOID])
            .expect("upper(text)")
            .oid;
        let out = direct_function_call(&catalog, upper, vec![Datum::text("abc")], &[TEXTOID], TEXTOID)
            .unwrap();
        assert_eq!(out, Datum::text("ABC"));
        let out = direct_function_call(&catalog, upper, vec![Datum::Null], &[TEXTOID], TEXTOID).unwrap();
        assert_eq!(out, Datum::Null);
    }

    #[test]
    fn aggregates_are_not_directly_callable() {
        let catalog = Catalog::default();
        let sum = catalog.proc_by_signature("sum", &[INT4OID]).expect("sum(int4)").oid;
        let err = fmgr_info(&catalog, sum, vec![INT4OID], INT4OID).unwrap_err();
        assert_eq!(err.sqlstate, SqlState::WrongObjectType);
    }
}
