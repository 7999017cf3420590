//! Running analyzed queries to completion for a client.

use std::sync::Arc;

use tracing::debug;

use crate::catalog::Catalog;
use crate::executor::dest::{CollectingReceiver, CommandDest};
use crate::executor::exec_main::{QueryDesc, executor_run};
use crate::nodes::params::ParamListInfo;
use crate::nodes::parsenodes::{CmdType, Query};
use crate::optimizer::planner;
use crate::utils::elog::{PgResult, elog};
use crate::utils::interrupt::check_for_interrupts;

use super::engine::QueryResult;
use super::utility::process_utility;

/// Completion tag for a plannable command that processed `processed` rows.
pub fn completion_tag(command: CmdType, processed: u64) -> String {
    match command {
        CmdType::Select => format!("SELECT {processed}"),
        CmdType::Insert => format!("INSERT 0 {processed}"),
        CmdType::Update => format!("UPDATE {processed}"),
        CmdType::Delete => format!("DELETE {processed}"),
        CmdType::Utility => String::new(),
    }
}

/// Plan and execute `query`, keeping its rows in memory. Utility queries go
/// to [`process_utility`].
pub fn run_query(catalog: Arc<Catalog>, query: &Query, source_text: &str, params: ParamListInfo) -> PgResult<QueryResult> {
    check_for_interrupts()?;
    if query.command_type == CmdType::Utility {
        let stmt = query
            .utility_stmt
            .as_deref()
            .ok_or_else(|| elog("utility query without a statement"))?;
        return process_utility(stmt, source_text);
    }

    let plannedstmt = planner(&catalog, query)?;
    let mut dest = CollectingReceiver::new(CommandDest::Remote);
    let processed = executor_run(QueryDesc::new(&plannedstmt, catalog, params), &mut dest)?;
    let (columns, column_types) = dest
        .desc
        .live_attrs()
        .map(|(_, attr)| (attr.name.clone(), attr.typid))
        .unzip();
    let tag = completion_tag(query.command_type, processed);
    debug!(%tag, "portal finished");
    Ok(QueryResult {
        columns,
        column_types,
        rows: std::mem::take(&mut dest.rows),
        command_tag: tag,
        rows_affected: processed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::pg_type::{INT4OID, TEXTOID};
    use crate::nodes::datum::Datum;
    use crate::tcop::engine::{reset_global_state_for_tests, run_statement, with_global_state_lock};

    #[test]
    fn tags_count_processed_rows() {
        assert_eq!(completion_tag(CmdType::Insert, 3), "INSERT 0 3");
        assert_eq!(completion_tag(CmdType::Delete, 0), "DELETE 0");
    }

    #[test]
    fn results_describe_their_columns() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement("CREATE TABLE pq (a int, b text)").unwrap();
            let results = run_statement("INSERT INTO pq VALUES (1, 'x') RETURNING b, a").unwrap();
            let result = &results[0];
            assert_eq!(result.command_tag, "INSERT 0 1");
            assert_eq!(result.columns, vec!["b".to_string(), "a".to_string()]);
            assert_eq!(result.column_types, vec![TEXTOID, INT4OID]);
            let update = run_statement("UPDATE pq SET a = a + 1").unwrap().pop().unwrap();
            assert_eq!(update.command_tag, "UPDATE 1");
        });
    }

    #[test]
    fn regex_operators_filter_rows() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement("CREATE TABLE rx (s text)").unwrap();
            run_statement("INSERT INTO rx VALUES ('abc1'), ('ABC2'), ('xyz')").unwrap();
            let result = run_statement("SELECT s FROM rx WHERE s ~* '^abc' AND NOT s ~ '2$' ORDER BY s")
                .unwrap()
                .pop()
                .unwrap();
            assert_eq!(result.rows, vec![vec![Datum::text("abc1")]]);
            let replaced = run_statement("SELECT regexp_replace('a1b2', '[0-9]', '#', 'g')")
                .unwrap()
                .pop()
                .unwrap();
            assert_eq!(replaced.rows, vec![vec![Datum::text("a#b#")]]);
        });
    }
}
