//! SQL text to analyzed `Query` trees.
//!
//! [`gram::raw_parser`] turns text into raw statements; [`analyze`] resolves
//! names, types, operators and functions against the catalog.

pub mod analyze;
pub mod gram;
pub mod parse_agg;
pub mod parse_clause;
pub mod parse_coerce;
pub mod parse_collate;
pub mod parse_cte;
pub mod parse_expr;
pub mod parse_func;
pub mod parse_jsonexpr;
pub mod parse_jsontable;
pub mod parse_node;
pub mod parse_oper;
pub mod parse_relation;
pub mod parse_target;
pub mod parse_type;
pub mod scan;
pub mod scansup;

pub use analyze::{parse_analyze, parse_analyze_with_hooks, parse_sub_analyze};
pub use gram::{parse_expression, raw_parser};
