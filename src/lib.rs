#![allow(
    clippy::too_many_arguments,
    clippy::too_many_lines,
    clippy::large_enum_variant,
    clippy::module_name_repetitions,
    clippy::struct_excessive_bools,
    clippy::fn_params_excessive_bools,
    clippy::similar_names,
    clippy::match_same_arms,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_lossless,
    clippy::float_cmp,
    clippy::comparison_chain,
    clippy::needless_pass_by_value,
    clippy::items_after_statements,
    clippy::if_not_else,
    clippy::collapsible_else_if,
    clippy::manual_let_else,
    clippy::type_complexity,
    clippy::result_large_err
)]

//! Expression analysis, evaluation and materialized-view refresh for a
//! PostgreSQL-compatible engine.
//!
//! The pipeline is the classic one: a raw parse tree ([`nodes::parsenodes`])
//! is turned into a typed [`nodes::parsenodes::Query`] by [`parser`], lowered
//! to a plan tree by [`optimizer`], and run by [`executor`]. [`tcop`] glues the
//! stages together and owns the global engine state.

pub mod access;
pub mod catalog;
pub mod commands;
pub mod executor;
pub mod nodes;
pub mod optimizer;
pub mod parser;
pub mod storage;
pub mod tcop;
pub mod utils;

pub use tcop::engine::{QueryResult, run_statement};
pub use utils::elog::{PgError, PgResult, SqlState};
