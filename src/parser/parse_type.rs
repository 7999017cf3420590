//! Type-name resolution.

use crate::catalog::pg_type::{BPCHAROID, NUMERICOID, PgType, TIMESTAMPOID, TIMESTAMPTZOID, VARCHAROID};
use crate::catalog::namespace::typename_get_type;
use crate::catalog::oid::Oid;
use crate::catalog::{Catalog, CatalogOracle};
use crate::nodes::parsenodes::TypeName;
use crate::utils::adt::math_functions::make_numeric_typmod;
use crate::utils::elog::{PgError, PgResult, SqlState};

/// Longest declared length of varchar/bpchar.
pub const MAX_VARCHAR_LENGTH: i32 = 10 * 1024 * 1024;
/// Largest precision of a timestamp.
pub const MAX_TIMESTAMP_PRECISION: i32 = 6;
const NUMERIC_MAX_PRECISION: i32 = 1000;

pub fn type_name_to_string(type_name: &TypeName) -> String {
    let mut out = match type_name.names.as_slice() {
        [ns, name] if ns == "pg_catalog" => name.clone(),
        names => names.join("."),
    };
    for _ in &type_name.array_bounds {
        out.push_str("[]");
    }
    out
}

/// Look up a type name, returning `None` if it does not exist.
pub fn lookup_type_name<'c>(catalog: &'c Catalog, type_name: &TypeName) -> PgResult<Option<(&'c PgType, i32)>> {
    let Some(mut ty) = typename_get_type(catalog, &type_name.names)? else {
        return Ok(None);
    };
    let typmod = typename_type_mod(catalog, type_name, ty)?;
    for _ in &type_name.array_bounds {
        let array = catalog.array_type_of(ty.oid).ok_or_else(|| {
            PgError::new(
                SqlState::UndefinedObject,
                format!("could not find array type for data type {}", catalog.format_type(ty.oid)),
            )
            .at(type_name.location)
        })?;
        ty = catalog
            .type_by_id(array)
            .ok_or_else(|| PgError::new(SqlState::InternalError, format!("cache lookup failed for type {array}")))?;
    }
    Ok(Some((ty, typmod)))
}

pub fn typename_type<'c>(catalog: &'c Catalog, type_name: &TypeName) -> PgResult<(&'c PgType, i32)> {
    lookup_type_name(catalog, type_name)?.ok_or_else(|| {
        PgError::new(
            SqlState::UndefinedObject,
            format!("type \"{}\" does not exist", type_name_to_string(type_name)),
        )
        .at(type_name.location)
    })
}

pub fn typename_type_id_and_mod(catalog: &Catalog, type_name: &TypeName) -> PgResult<(Oid, i32)> {
    let (ty, typmod) = typename_type(catalog, type_name)?;
    Ok((ty.oid, typmod))
}

pub fn typename_type_id(catalog: &Catalog, type_name: &TypeName) -> PgResult<Oid> {
    Ok(typename_type(catalog, type_name)?.0.oid)
}

/// Encode the raw modifiers written after a type name.
fn typename_type_mod(catalog: &Catalog, type_name: &TypeName, ty: &PgType) -> PgResult<i32> {
    let mods = &type_name.typmods;
    if mods.is_empty() {
        return Ok(-1);
    }
    let location = type_name.location;
    let invalid = |message: String| PgError::new(SqlState::InvalidParameterValue, message).at(location);
    let typname = catalog.format_type(ty.oid);
    match ty.oid {
        VARCHAROID | BPCHAROID => {
            let [len] = mods.as_slice() else {
                return Err(invalid("invalid type modifier".to_string()));
            };
            if *len < 1 {
                return Err(invalid(format!("length for type {typname} must be at least 1")));
            }
            if *len > MAX_VARCHAR_LENGTH {
                return Err(invalid(format!(
                    "length for type {typname} cannot exceed {MAX_VARCHAR_LENGTH}"
                )));
            }
            Ok(len + 4)
        }
        NUMERICOID => {
            let (precision, scale) = match mods.as_slice() {
                [p] => (*p, 0),
                [p, s] => (*p, *s),
                _ => return Err(invalid("invalid NUMERIC type modifier".to_string())),
            };
            if !(1..=NUMERIC_MAX_PRECISION).contains(&precision) {
                return Err(invalid(format!(
                    "NUMERIC precision {precision} must be between 1 and {NUMERIC_MAX_PRECISION}"
                )));
            }
            if !(-NUMERIC_MAX_PRECISION..=NUMERIC_MAX_PRECISION).contains(&scale) {
                return Err(invalid(format!(
                    "NUMERIC scale {scale} must be between -{NUMERIC_MAX_PRECISION} and {NUMERIC_MAX_PRECISION}"
                )));
            }
            Ok(make_numeric_typmod(precision, scale))
        }
        TIMESTAMPOID | TIMESTAMPTZOID => {
            let [precision] = mods.as_slice() else {
                return Err(invalid("invalid type modifier".to_string()));
            };
            if *precision < 0 {
                return Err(invalid(format!(
                    "TIMESTAMP({precision}) precision must not be negative"
                )));
            }
            Ok((*precision).min(MAX_TIMESTAMP_PRECISION))
        }
        _ => Err(PgError::new(
            SqlState::SyntaxError,
            format!("type modifier is not allowed for type \"{}\"", ty.name),
        )
        .at(location)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::pg_type::{INT4ARRAYOID, INT4OID};

    fn sql_type(name: &str, typmods: &[i32]) -> TypeName {
        TypeName {
            names: vec!["pg_catalog".to_string(), name.to_string()],
            typmods: typmods.to_vec(),
            ..TypeName::simple(name)
        }
    }

    #[test]
    fn varchar_length_is_offset_by_header() {
        let catalog = Catalog::default();
        let (typid, typmod) = typename_type_id_and_mod(&catalog, &sql_type("varchar", &[10])).unwrap();
        assert_eq!(typid, VARCHAROID);
        assert_eq!(typmod, 14);
        let err = typename_type_id_and_mod(&catalog, &sql_type("varchar", &[0])).unwrap_err();
        assert_eq!(err.sqlstate, SqlState::InvalidParameterValue);
    }

    #[test]
    fn array_bounds_select_the_array_type() {
        let catalog = Catalog::default();
        let mut tn = TypeName::simple("int4");
        tn.array_bounds = vec![-1];
        assert_eq!(typename_type_id(&catalog, &tn).unwrap(), INT4ARRAYOID);
        assert_eq!(typename_type_id(&catalog, &TypeName::simple("int4")).unwrap(), INT4OID);
    }

    #[test]
    fn unknown_type_is_reported() {
        let catalog = Catalog::default();
        let err = typename_type_id(&catalog, &TypeName::simple("nosuchtype")).unwrap_err();
        assert_eq!(err.sqlstate, SqlState::UndefinedObject);
        assert_eq!(err.message, "type \"nosuchtype\" does not exist");
    }
}
