//! Name lookup along the search path.

use super::oid::{INVALID_OID, Oid};
use super::pg_proc::PgProc;
use super::table::Relation;
use super::{Catalog, CatalogOracle, PG_CATALOG_NAMESPACE, PG_TEMP_NAMESPACE};
use crate::catalog::pg_type::PgType;
use crate::utils::elog::{PgError, PgResult, SqlState};
use crate::utils::guc;

/// A function that could match a call, with its argument types laid out in
/// call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncCandidate {
    /// `INVALID_OID` marks an ambiguous duplicate.
    pub oid: Oid,
    pub nargs: usize,
    /// Number of call arguments absorbed by the variadic parameter (0 if not expanded).
    pub nvargs: usize,
    /// Number of trailing defaults used.
    pub ndargs: usize,
    /// For named-notation calls: declared position of each call argument,
    /// followed by the positions filled from defaults.
    pub argnumbers: Option<Vec<usize>>,
    pub args: Vec<Oid>,
    /// Position of the candidate's namespace in the search path.
    pathpos: usize,
}

impl FuncCandidate {
    /// An operator seen as a function of its operand types, for overload
    /// resolution.
    pub fn for_operator(oid: Oid, args: Vec<Oid>) -> Self {
        Self {
            oid,
            nargs: args.len(),
            nvargs: 0,
            ndargs: 0,
            argnumbers: None,
            args,
            pathpos: 0,
        }
    }
}

/// Namespaces searched for unqualified names, in order. `pg_catalog` is
/// searched first unless the path mentions it explicitly.
pub fn active_search_path(catalog: &Catalog, include_temp: bool) -> Vec<Oid> {
    let configured: Vec<Oid> = guc::search_path()
        .iter()
        .filter_map(|name| catalog.namespace_by_name(name))
        .collect();
    let mut path = Vec::with_capacity(configured.len() + 2);
    if include_temp {
        path.push(PG_TEMP_NAMESPACE);
    }
    if !configured.contains(&PG_CATALOG_NAMESPACE) {
        path.push(PG_CATALOG_NAMESPACE);
    }
    path.extend(configured);
    path
}

/// First schema of the path that objects are created in.
pub fn creation_namespace(catalog: &Catalog, schemaname: Option<&str>, temp: bool) -> PgResult<Oid> {
    if temp {
        return Ok(PG_TEMP_NAMESPACE);
    }
    if let Some(schema) = schemaname {
        return lookup_namespace(catalog, schema);
    }
    guc::search_path()
        .iter()
        .filter(|name| name.as_str() != "pg_catalog")
        .find_map(|name| catalog.namespace_by_name(name))
        .ok_or_else(|| {
            PgError::new(
                SqlState::UndefinedObject,
                "no schema has been selected to create in",
            )
        })
}

pub fn lookup_namespace(catalog: &Catalog, name: &str) -> PgResult<Oid> {
    catalog.namespace_by_name(name).ok_or_else(|| {
        PgError::new(
            SqlState::UndefinedObject,
            format!("schema \"{name}\" does not exist"),
        )
    })
}

/// Resolve a possibly qualified relation name.
pub fn relname_get_relation<'a>(
    catalog: &'a Catalog,
    schemaname: Option<&str>,
    relname: &str,
) -> PgResult<Option<&'a Relation>> {
    if let Some(schema) = schemaname {
        let ns = lookup_namespace(catalog, schema)?;
        return Ok(catalog.relation_in_namespace(ns, relname));
    }
    Ok(active_search_path(catalog, true)
        .into_iter()
        .find_map(|ns| catalog.relation_in_namespace(ns, relname)))
}

/// Resolve a possibly qualified type name.
pub fn typename_get_type<'a>(catalog: &'a Catalog, names: &[String]) -> PgResult<Option<&'a PgType>> {
    match names {
        [name] => Ok(active_search_path(catalog, true)
            .into_iter()
            .find_map(|ns| catalog.type_by_name(ns, name))),
        [schema, name] => {
            let ns = lookup_namespace(catalog, schema)?;
            Ok(catalog.type_by_name(ns, name))
        }
        [db, schema, name] => {
            if db != catalog.current_database_name() {
                return Err(PgError::new(
                    SqlState::FeatureNotSupported,
                    format!(
                        "cross-database references are not implemented: {}",
                        names.join(".")
                    ),
                ));
            }
            let ns = lookup_namespace(catalog, schema)?;
            Ok(catalog.type_by_name(ns, name))
        }
        _ => Err(PgError::new(
            SqlState::SyntaxError,
            format!("improper qualified name (too many dotted names): {}", names.join(".")),
        )),
    }
}

/// Split a function name into (namespace restriction, object name).
fn deconstruct_qualified_name(catalog: &Catalog, names: &[String]) -> PgResult<(Option<Oid>, String)> {
    match names {
        [name] => Ok((None, name.clone())),
        [schema, name] => Ok((Some(lookup_namespace(catalog, schema)?), name.clone())),
        [db, schema, name] => {
            if db != catalog.current_database_name() {
                return Err(PgError::new(
                    SqlState::FeatureNotSupported,
                    format!(
                        "cross-database references are not implemented: {}",
                        names.join(".")
                    ),
                ));
            }
            Ok((Some(lookup_namespace(catalog, schema)?), name.clone()))
        }
        _ => Err(PgError::new(
            SqlState::SyntaxError,
            format!("improper qualified name (too many dotted names): {}", names.join(".")),
        )),
    }
}

/// Map named/positional call arguments onto a function's declared
/// parameters. Returns the declared position of each call argument followed
/// by the positions to fill from defaults, or `None` if the call can't match.
fn match_named_call(
    proc: &PgProc,
    nargs: usize,
    argnames: &[String],
    include_defaults: bool,
) -> Option<(Vec<usize>, usize)> {
    let pronargs = proc.nargs();
    let numposargs = nargs - argnames.len();
    if pronargs < nargs || !proc.has_named_args() {
        return None;
    }
    let mut argnumbers = Vec::with_capacity(pronargs);
    let mut filled = vec![false; pronargs];
    for (pos, slot) in filled.iter_mut().enumerate().take(numposargs) {
        *slot = true;
        argnumbers.push(pos);
    }
    for name in argnames {
        let pos = proc.argnames.iter().position(|declared| declared == name)?;
        if filled[pos] {
            return None;
        }
        filled[pos] = true;
        argnumbers.push(pos);
    }
    let missing = filled.iter().filter(|f| !**f).count();
    if missing == 0 {
        return Some((argnumbers, 0));
    }
    if !include_defaults || missing > proc.defaults.len() {
        return None;
    }
    // Defaults cover only the trailing parameters.
    let first_default = pronargs - proc.defaults.len();
    for (pos, slot) in filled.iter().enumerate() {
        if !*slot {
            if pos < first_default {
                return None;
            }
            argnumbers.push(pos);
        }
    }
    Some((argnumbers, missing))
}

pub(crate) fn func_candidates(
    catalog: &Catalog,
    names: &[String],
    nargs: usize,
    argnames: &[String],
    expand_variadic: bool,
    expand_defaults: bool,
) -> PgResult<Vec<FuncCandidate>> {
    let (namespace, funcname) = deconstruct_qualified_name(catalog, names)?;
    let path = active_search_path(catalog, false);
    let mut results: Vec<FuncCandidate> = Vec::new();

    for proc in catalog.procs_named(&funcname) {
        let pathpos = match namespace {
            Some(ns) if proc.namespace != ns => continue,
            Some(_) => 0,
            None => match path.iter().position(|&ns| ns == proc.namespace) {
                Some(pos) => pos,
                None => continue,
            },
        };
        let pronargs = proc.nargs();

        let candidate = if !argnames.is_empty() {
            // Named notation never expands a variadic parameter.
            let Some((argnumbers, ndargs)) =
                match_named_call(proc, nargs, argnames, expand_defaults)
            else {
                continue;
            };
            let args = argnumbers.iter().map(|&pos| proc.argtypes[pos]).collect();
            FuncCandidate {
                oid: proc.oid,
                nargs,
                nvargs: 0,
                ndargs,
                argnumbers: Some(argnumbers),
                args,
                pathpos,
            }
        } else {
            let variadic = pronargs <= nargs && expand_variadic && proc.is_variadic();
            let use_defaults = pronargs > nargs && expand_defaults;
            if use_defaults && nargs + proc.defaults.len() < pronargs {
                continue;
            }
            if pronargs != nargs && !variadic && !use_defaults {
                continue;
            }
            let effective_nargs = pronargs.max(nargs);
            let mut args = proc.argtypes.clone();
            let mut nvargs = 0;
            if variadic {
                args.truncate(pronargs - 1);
                args.resize(effective_nargs, proc.variadic);
                nvargs = effective_nargs - pronargs + 1;
            }
            FuncCandidate {
                oid: proc.oid,
                nargs: effective_nargs,
                nvargs,
                ndargs: if use_defaults { pronargs - nargs } else { 0 },
                argnumbers: None,
                args,
                pathpos,
            }
        };

        // A signature visible twice: the earlier path entry wins; within a
        // namespace prefer fewer defaults, then the non-variadic form.
        let call_args = &candidate.args[..nargs.min(candidate.args.len())];
        if let Some(prev) = results
            .iter_mut()
            .find(|prev| &prev.args[..nargs.min(prev.args.len())] == call_args)
        {
            if candidate.pathpos < prev.pathpos {
                *prev = candidate;
            } else if candidate.pathpos == prev.pathpos {
                let key = |c: &FuncCandidate| (c.ndargs, c.nvargs > 0);
                match key(&candidate).cmp(&key(prev)) {
                    std::cmp::Ordering::Less => *prev = candidate,
                    std::cmp::Ordering::Equal => prev.oid = INVALID_OID,
                    std::cmp::Ordering::Greater => {}
                }
            }
            continue;
        }
        results.push(candidate);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::pg_type::{INT4OID, TEXTOID};

    fn names(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| (*p).to_string()).collect()
    }

    #[test]
    fn variadic_candidates_expand_trailing_args() {
        let catalog = Catalog::default();
        let cands = catalog
            .function_candidates(&names(&["concat_ws"]), 4, &[], true, true)
            .unwrap();
        let cand = cands.first().expect("concat_ws is variadic");
        assert_eq!(cand.nvargs, 3);
        assert_eq!(cand.args.len(), 4);
        assert_eq!(cand.args[0], TEXTOID);
    }

    #[test]
    fn wrong_arity_is_filtered() {
        let catalog = Catalog::default();
        let cands = catalog
            .function_candidates(&names(&["abs"]), 2, &[], true, true)
            .unwrap();
        assert!(cands.is_empty());
        let cands = catalog
            .function_candidates(&names(&["pg_catalog", "abs"]), 1, &[], true, true)
            .unwrap();
        assert!(cands.iter().any(|c| c.args == vec![INT4OID]));
    }

    #[test]
    fn too_many_dotted_names_is_a_syntax_error() {
        let catalog = Catalog::default();
        let err = catalog
            .function_candidates(&names(&["a", "b", "c", "d"]), 0, &[], true, true)
            .unwrap_err();
        assert_eq!(err.sqlstate, SqlState::SyntaxError);
    }
}
