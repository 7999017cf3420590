//! Utility commands: DDL, ANALYZE, SET/SHOW and materialized views.
//!
//! Every command takes its raw statement plus the source text (for error
//! positions) and returns the [`QueryResult`](crate::tcop::engine::QueryResult)
//! the client sees.

pub mod alter;
pub mod analyze;
pub mod create_table;
pub mod drop;
pub mod function;
pub mod index;
pub mod matview;
pub mod types;
pub mod variable;
pub mod view;

use crate::catalog::namespace::relname_get_relation;
use crate::catalog::table::Relation;
use crate::catalog::Catalog;
use crate::nodes::parsenodes::RangeVar;
use crate::utils::elog::{PgError, PgResult, SqlState};

/// Look up a relation by (possibly qualified) name; missing is 42P01.
pub(crate) fn open_relation<'c>(catalog: &'c Catalog, rv: &RangeVar) -> PgResult<&'c Relation> {
    relname_get_relation(catalog, rv.schemaname.as_deref(), &rv.relname)?.ok_or_else(|| {
        PgError::new(
            SqlState::UndefinedTable,
            format!("relation \"{}\" does not exist", rv.relname),
        )
        .at(rv.location)
    })
}
