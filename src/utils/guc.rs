//! Run-time configuration (GUC) registry.
//!
//! Settings live in one process-wide map, read through typed accessors. Names
//! are matched case-insensitively.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use crate::utils::elog::{PgError, PgResult, SqlState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GucKind {
    Bool,
    Int { min: i64, max: i64 },
    String,
}

struct GucDefinition {
    name: &'static str,
    kind: GucKind,
    boot_value: &'static str,
}

const GUC_DEFINITIONS: &[GucDefinition] = &[
    GucDefinition {
        name: "transform_null_equals",
        kind: GucKind::Bool,
        boot_value: "off",
    },
    GucDefinition {
        name: "max_expr_depth",
        kind: GucKind::Int { min: 8, max: 100_000 },
        boot_value: "200",
    },
    GucDefinition {
        name: "max_stack_depth",
        kind: GucKind::Int { min: 100, max: 65_536 },
        boot_value: "1536",
    },
    GucDefinition {
        name: "statement_timeout",
        kind: GucKind::Int { min: 0, max: i32::MAX as i64 },
        boot_value: "0",
    },
    GucDefinition {
        name: "work_mem",
        kind: GucKind::Int { min: 64, max: i32::MAX as i64 },
        boot_value: "4096",
    },
    GucDefinition {
        name: "search_path",
        kind: GucKind::String,
        boot_value: "pg_catalog, public",
    },
    GucDefinition {
        name: "session_authorization",
        kind: GucKind::String,
        boot_value: "postgres",
    },
    GucDefinition {
        name: "default_transaction_isolation",
        kind: GucKind::String,
        boot_value: "read committed",
    },
];

static GLOBAL_GUC: OnceLock<RwLock<HashMap<String, String>>> = OnceLock::new();

fn boot_values() -> HashMap<String, String> {
    GUC_DEFINITIONS
        .iter()
        .map(|def| (def.name.to_string(), def.boot_value.to_string()))
        .collect()
}

fn global_guc() -> &'static RwLock<HashMap<String, String>> {
    GLOBAL_GUC.get_or_init(|| RwLock::new(boot_values()))
}

fn with_guc_read<T>(f: impl FnOnce(&HashMap<String, String>) -> T) -> T {
    let guc = global_guc()
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    f(&guc)
}

fn find_definition(name: &str) -> PgResult<&'static GucDefinition> {
    GUC_DEFINITIONS
        .iter()
        .find(|def| def.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| {
            PgError::new(
                SqlState::UndefinedObject,
                format!("unrecognized configuration parameter \"{name}\""),
            )
        })
}

pub(crate) fn parse_bool_setting(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" | "t" | "y" => Some(true),
        "off" | "false" | "no" | "0" | "f" | "n" => Some(false),
        _ => None,
    }
}

/// `SET name = value`.
pub fn set_config(name: &str, value: &str) -> PgResult<()> {
    let def = find_definition(name)?;
    let normalized = match def.kind {
        GucKind::Bool => match parse_bool_setting(value) {
            Some(true) => "on".to_string(),
            Some(false) => "off".to_string(),
            None => {
                return Err(PgError::new(
                    SqlState::InvalidParameterValue,
                    format!("parameter \"{}\" requires a Boolean value", def.name),
                ));
            }
        },
        GucKind::Int { min, max } => {
            let parsed = value.trim().parse::<i64>().map_err(|_| {
                PgError::new(
                    SqlState::InvalidParameterValue,
                    format!(
                        "invalid value for parameter \"{}\": \"{}\"",
                        def.name, value
                    ),
                )
            })?;
            if parsed < min || parsed > max {
                return Err(PgError::new(
                    SqlState::InvalidParameterValue,
                    format!(
                        "{} is outside the valid range for parameter \"{}\" ({} .. {})",
                        parsed, def.name, min, max
                    ),
                ));
            }
            parsed.to_string()
        }
        GucKind::String => value.to_string(),
    };
    let mut guc = global_guc()
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    guc.insert(def.name.to_string(), normalized);
    Ok(())
}

/// `SHOW name`.
pub fn show_config(name: &str) -> PgResult<String> {
    let def = find_definition(name)?;
    Ok(with_guc_read(|guc| {
        guc.get(def.name)
            .cloned()
            .unwrap_or_else(|| def.boot_value.to_string())
    }))
}

/// `RESET name` and `SET name TO DEFAULT`.
pub fn reset_config(name: &str) -> PgResult<()> {
    let def = find_definition(name)?;
    let mut guc = global_guc()
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    guc.insert(def.name.to_string(), def.boot_value.to_string());
    Ok(())
}

/// Restore every setting to its boot value.
pub fn reset_all_config() {
    let mut guc = global_guc()
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    *guc = boot_values();
}

fn int_setting(name: &str, fallback: i64) -> i64 {
    with_guc_read(|guc| guc.get(name).and_then(|v| v.parse::<i64>().ok()))
        .unwrap_or(fallback)
}

pub fn transform_null_equals() -> bool {
    with_guc_read(|guc| {
        guc.get("transform_null_equals")
            .and_then(|v| parse_bool_setting(v))
    })
    .unwrap_or(false)
}

pub fn max_expr_depth() -> usize {
    int_setting("max_expr_depth", 200).max(8) as usize
}

/// Stack budget in kilobytes for recursive parsing, analysis and evaluation.
pub fn max_stack_depth_kb() -> usize {
    int_setting("max_stack_depth", 1536).max(100) as usize
}

/// Statement timeout in milliseconds; zero disables it.
pub fn statement_timeout_ms() -> u64 {
    int_setting("statement_timeout", 0).max(0) as u64
}

pub fn work_mem_kb() -> i64 {
    int_setting("work_mem", 4096)
}

pub fn search_path() -> Vec<String> {
    with_guc_read(|guc| guc.get("search_path").cloned())
        .unwrap_or_default()
        .split(',')
        .map(|part| part.trim().trim_matches('"').to_ascii_lowercase())
        .filter(|part| !part.is_empty())
        .collect()
}

pub fn session_user() -> String {
    with_guc_read(|guc| guc.get("session_authorization").cloned())
        .unwrap_or_else(|| "postgres".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcop::engine::with_global_state_lock;

    #[test]
    fn bool_settings_are_normalized() {
        with_global_state_lock(|| {
            reset_all_config();
            set_config("TRANSFORM_NULL_EQUALS", "true").unwrap();
            assert_eq!(show_config("transform_null_equals").unwrap(), "on");
            assert!(transform_null_equals());
            reset_all_config();
            assert!(!transform_null_equals());
        });
    }

    #[test]
    fn int_settings_are_range_checked() {
        with_global_state_lock(|| {
            reset_all_config();
            let err = set_config("max_expr_depth", "2").unwrap_err();
            assert_eq!(err.sqlstate, SqlState::InvalidParameterValue);
            let err = set_config("work_mem", "lots").unwrap_err();
            assert_eq!(err.sqlstate, SqlState::InvalidParameterValue);
            set_config("max_expr_depth", "64").unwrap();
            assert_eq!(max_expr_depth(), 64);
            assert!(set_config("max_stack_depth", "50").is_err());
            set_config("max_stack_depth", "4096").unwrap();
            assert_eq!(max_stack_depth_kb(), 4096);
            reset_all_config();
            assert_eq!(max_stack_depth_kb(), 1536);
        });
    }

    #[test]
    fn unknown_settings_are_rejected() {
        let err = show_config("no_such_setting").unwrap_err();
        assert_eq!(err.sqlstate, SqlState::UndefinedObject);
    }

    #[test]
    fn search_path_is_split() {
        with_global_state_lock(|| {
            reset_all_config();
            assert_eq!(search_path(), vec!["pg_catalog", "public"]);
        });
    }
}
