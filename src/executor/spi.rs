//! Server programming interface: run SQL from inside the engine.
//!
//! SQL functions and the concurrent materialized-view refresh use this to
//! execute statements without going through the client-facing dispatcher.
//! Statements run here do not end the surrounding transaction and are not
//! wrapped in their own abort handling; errors propagate to the caller.

use std::sync::Arc;

use tracing::debug;

use crate::access::xact::command_counter_increment;
use crate::catalog::{Catalog, catalog_snapshot};
use crate::nodes::datum::Datum;
use crate::nodes::params::ParamListInfo;
use crate::nodes::parsenodes::{CmdType, Query};
use crate::nodes::tupdesc::{Attribute, TupleDesc};
use crate::optimizer::planner;
use crate::parser::{parse_analyze, raw_parser};
use crate::storage::heap::Snapshot;
use crate::tcop::utility::process_utility;
use crate::utils::elog::{PgResult, elog};
use crate::utils::interrupt::check_for_interrupts;

use super::dest::{CollectingReceiver, CommandDest};
use super::exec_main::{QueryDesc, executor_run};

/// Outcome of one statement.
#[derive(Debug, Clone, PartialEq)]
pub struct SpiResult {
    pub command: CmdType,
    pub desc: TupleDesc,
    pub rows: Vec<Vec<Datum>>,
    pub processed: u64,
}

/// How an analyzed query is run.
#[derive(Debug, Clone, Default)]
pub struct SpiOptions {
    pub params: ParamListInfo,
    /// Visibility horizon; `None` sees everything before the running command.
    pub snapshot: Option<Snapshot>,
    /// Keep at most this many result rows.
    pub tcount: Option<usize>,
}

/// Plan and run an analyzed query. Utility queries are handed to the
/// utility processor; `source_text` is the text they were parsed from.
pub fn spi_execute_query(
    catalog: Arc<Catalog>,
    query: &Query,
    source_text: &str,
    options: SpiOptions,
) -> PgResult<SpiResult> {
    check_for_interrupts()?;
    if query.command_type == CmdType::Utility {
        let stmt = query
            .utility_stmt
            .as_deref()
            .ok_or_else(|| elog("utility query without a statement"))?;
        let result = process_utility(stmt, source_text)?;
        let desc = TupleDesc::new(
            result
                .columns
                .iter()
                .zip(&result.column_types)
                .map(|(name, &typid)| Attribute::new(name.clone(), typid, -1, 0))
                .collect(),
        );
        return Ok(SpiResult {
            command: CmdType::Utility,
            desc,
            rows: result.rows,
            processed: result.rows_affected,
        });
    }

    let plannedstmt = planner(&catalog, query)?;
    let mut dest = CollectingReceiver::new(CommandDest::Spi);
    if let Some(limit) = options.tcount {
        dest = dest.with_limit(limit);
    }
    let mut desc = QueryDesc::new(&plannedstmt, catalog, options.params);
    if let Some(snapshot) = options.snapshot {
        desc = desc.with_snapshot(snapshot);
    }
    let processed = executor_run(desc, &mut dest)?;
    debug!(command = ?query.command_type, processed, "SPI statement finished");
    Ok(SpiResult {
        command: query.command_type,
        desc: std::mem::take(&mut dest.desc),
        rows: std::mem::take(&mut dest.rows),
        processed,
    })
}

/// Parse, analyze and run every statement of `sql`, advancing the command
/// counter after each so later statements see earlier ones' effects.
pub fn spi_exec(sql: &str) -> PgResult<Vec<SpiResult>> {
    let mut results = Vec::new();
    for raw in raw_parser(sql)? {
        let catalog = catalog_snapshot();
        let query = parse_analyze(&catalog, &raw, sql, &[])?;
        results.push(spi_execute_query(catalog, &query, sql, SpiOptions::default())?);
        command_counter_increment()?;
    }
    Ok(results)
}

/// Run `sql`, which must be a single statement, and return its outcome.
pub fn spi_exec_one(sql: &str) -> PgResult<SpiResult> {
    spi_exec(sql)?
        .pop()
        .ok_or_else(|| elog(format!("SPI query produced no result: {sql}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcop::engine::{reset_global_state_for_tests, with_global_state_lock};

    #[test]
    fn statements_see_earlier_statements() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            let results = spi_exec(
                "CREATE TABLE spi_t (a int); INSERT INTO spi_t VALUES (1), (2); SELECT count(*) FROM spi_t",
            )
            .unwrap();
            assert_eq!(results.len(), 3);
            assert_eq!(results[1].command, CmdType::Insert);
            assert_eq!(results[1].processed, 2);
            assert_eq!(results[2].rows, vec![vec![Datum::Int8(2)]]);
        });
    }

    #[test]
    fn tcount_limits_collected_rows() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            let catalog = catalog_snapshot();
            let raw = raw_parser("SELECT * FROM (VALUES (1), (2), (3)) v(x)").unwrap();
            let query = parse_analyze(&catalog, &raw[0], "", &[]).unwrap();
            let options = SpiOptions {
                tcount: Some(1),
                ..SpiOptions::default()
            };
            let result = spi_execute_query(catalog, &query, "", options).unwrap();
            assert_eq!(result.rows, vec![vec![Datum::Int4(1)]]);
        });
    }
}
