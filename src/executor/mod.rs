//! Plan execution.
//!
//! A [`PlannedStmt`](crate::nodes::plannodes::PlannedStmt) is run by
//! [`exec_proc_node::exec_proc_node_each`], which streams each node's rows
//! into its parent and stops as soon as the consumer has seen enough.
//! Expressions are evaluated by [`exec_expr`]; sub-selects run through
//! [`node_subplan`]; SQL-language functions through [`functions`]. Results
//! are delivered to a [`dest::DestReceiver`].

pub mod dest;
pub mod exec_expr;
pub mod exec_indexing;
pub mod exec_json;
pub mod exec_main;
pub mod exec_proc_node;
pub mod exec_utils;
pub mod functions;
pub mod node_agg;
pub mod node_limit;
pub mod node_modify_table;
pub mod node_nestloop;
pub mod node_project_set;
pub mod node_scan;
pub mod node_setop;
pub mod node_sort;
pub mod node_subplan;
pub mod node_tablefunc;
pub mod node_window_agg;
pub mod spi;
pub mod tuptable;

pub use exec_main::{executor_run, run_planned_query};
pub use exec_utils::{EState, ExprContext};
pub use tuptable::TupleTableSlot;
