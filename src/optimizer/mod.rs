//! Turns analyzed [`Query`](crate::nodes::parsenodes::Query) trees into
//! executable [`PlannedStmt`](crate::nodes::plannodes::PlannedStmt)s.
//!
//! There is no cost model: joins become nested loops in FROM-list order and
//! every upper clause gets its own node. The interesting work is in
//! [`subselect`], which turns SubLinks into SubPlans and outer references
//! into PARAM_EXEC parameters, and [`setrefs`], which rewrites expressions to
//! read their inputs by position.

pub mod planner;
pub mod preptlist;
pub mod setrefs;
pub mod subselect;

pub use planner::planner;
