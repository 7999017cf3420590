//! Global engine state and the statement loop.
//!
//! The catalog and heap storage are process-wide; a single session drives
//! them. [`run_statement`] parses a query string and runs each statement in
//! its own implicit transaction unless a `BEGIN` block is open. A failed
//! statement rolls back everything its transaction did.

use std::sync::{Mutex, OnceLock, PoisonError};

use tracing::{debug, warn};

use crate::access::xact::{TransactionContext, command_counter_increment, set_statement_start};
use crate::catalog::oid::Oid;
use crate::catalog::{catalog_snapshot, reset_global_catalog_for_tests};
use crate::commands::matview::reset_refresh_registry;
use crate::nodes::datum::Datum;
use crate::nodes::params::ParamListInfo;
use crate::nodes::parsenodes::{RawStmt, TransactionStmtKind};
use crate::parser::{parse_analyze, raw_parser};
use crate::storage::heap::reset_global_storage_for_tests;
use crate::utils::elog::PgResult;
use crate::utils::guc::reset_all_config;
use crate::utils::interrupt::{StatementTimer, adjust_cancel_error, clear_pending_interrupts};
use crate::utils::miscinit::set_security_context;

use super::pquery::run_query;

/// What a client sees for one statement.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub column_types: Vec<Oid>,
    pub rows: Vec<Vec<Datum>>,
    pub command_tag: String,
    pub rows_affected: u64,
}

impl QueryResult {
    /// A result carrying only a completion tag.
    pub fn command(tag: impl Into<String>) -> Self {
        Self {
            columns: Vec::new(),
            column_types: Vec::new(),
            rows: Vec::new(),
            command_tag: tag.into(),
            rows_affected: 0,
        }
    }
}

fn session() -> &'static Mutex<TransactionContext> {
    static SESSION: OnceLock<Mutex<TransactionContext>> = OnceLock::new();
    SESSION.get_or_init(|| Mutex::new(TransactionContext::default()))
}

/// Serializes access to the global engine state. Tests and embedders that
/// run statements from several threads wrap each unit of work in this.
pub fn with_global_state_lock<T>(f: impl FnOnce() -> T) -> T {
    static STATE_MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
    let mutex = STATE_MUTEX.get_or_init(|| Mutex::new(()));
    let _guard = mutex.lock().unwrap_or_else(PoisonError::into_inner);
    f()
}

/// Back to a freshly bootstrapped engine: catalog, heaps, settings, the
/// session's transaction and every piece of refresh state.
pub fn reset_global_state_for_tests() {
    reset_global_catalog_for_tests();
    reset_global_storage_for_tests();
    reset_all_config();
    reset_refresh_registry();
    set_security_context(0);
    clear_pending_interrupts();
    let mut xact = session().lock().unwrap_or_else(PoisonError::into_inner);
    *xact = TransactionContext::default();
}

fn transaction_command(xact: &mut TransactionContext, kind: TransactionStmtKind) -> QueryResult {
    match kind {
        TransactionStmtKind::Begin => {
            xact.begin(true);
            QueryResult::command("BEGIN")
        }
        TransactionStmtKind::Commit => {
            if !xact.in_explicit_block() {
                warn!("there is no transaction in progress");
            }
            if xact.commit() {
                QueryResult::command("COMMIT")
            } else {
                QueryResult::command("ROLLBACK")
            }
        }
        TransactionStmtKind::Rollback => {
            if !xact.in_explicit_block() {
                warn!("there is no transaction in progress");
            }
            xact.rollback();
            QueryResult::command("ROLLBACK")
        }
    }
}

fn execute_one(raw: &RawStmt, source_text: &str, params: &ParamListInfo, param_types: &[Oid]) -> PgResult<QueryResult> {
    let catalog = catalog_snapshot();
    let query = parse_analyze(&catalog, raw, source_text, param_types)?;
    run_query(catalog, &query, source_text, params.clone())
}

/// Run every statement of `sql` and collect one result per statement.
/// Execution stops at the first error.
pub fn run_statement(sql: &str) -> PgResult<Vec<QueryResult>> {
    run_statement_with_params(sql, &[])
}

/// As [`run_statement`], binding `$1..$n` to `params`.
pub fn run_statement_with_params(sql: &str, params: &[(Oid, Datum)]) -> PgResult<Vec<QueryResult>> {
    let stmts = raw_parser(sql)?;
    let param_types: Vec<Oid> = params.iter().map(|(typid, _)| *typid).collect();
    let param_list = ParamListInfo::positional(params.to_vec());
    let mut xact = session().lock().unwrap_or_else(PoisonError::into_inner);
    let mut results = Vec::with_capacity(stmts.len());

    for raw in &stmts {
        set_statement_start();
        if let RawStmt::Transaction(kind) = raw {
            if *kind == TransactionStmtKind::Begin {
                xact.check_not_aborted()?;
            }
            results.push(transaction_command(&mut xact, *kind));
            continue;
        }
        xact.check_not_aborted()?;
        xact.begin(false);

        let timer = StatementTimer::arm();
        let outcome = execute_one(raw, sql, &param_list, &param_types).and_then(|result| {
            command_counter_increment()?;
            Ok(result)
        });
        match outcome {
            Ok(result) => {
                debug!(tag = %result.command_tag, rows = result.rows_affected, "statement finished");
                if !xact.in_explicit_block() {
                    xact.commit();
                }
                results.push(result);
            }
            Err(err) => {
                let err = adjust_cancel_error(err, &timer);
                debug!(sqlstate = err.code(), message = %err.message, "statement failed");
                if xact.in_explicit_block() {
                    xact.mark_failed();
                } else {
                    xact.rollback();
                }
                return Err(err);
            }
        }
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::pg_type::INT4OID;

    fn scalar(sql: &str) -> Datum {
        run_statement(sql).unwrap().pop().unwrap().rows.remove(0).remove(0)
    }

    #[test]
    fn statements_run_in_order() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            let results = run_statement("CREATE TABLE e1 (a int); INSERT INTO e1 VALUES (1), (2); SELECT count(*) FROM e1").unwrap();
            let tags: Vec<&str> = results.iter().map(|r| r.command_tag.as_str()).collect();
            assert_eq!(tags, vec!["CREATE TABLE", "INSERT 0 2", "SELECT 1"]);
            assert_eq!(results[2].rows, vec![vec![Datum::Int8(2)]]);
        });
    }

    #[test]
    fn failed_statement_rolls_back_its_work() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement("CREATE TABLE e2 (a int UNIQUE)").unwrap();
            assert_eq!(run_statement("INSERT INTO e2 VALUES (1), (1)").unwrap_err().code(), "23505");
            assert_eq!(scalar("SELECT count(*) FROM e2"), Datum::Int8(0));
        });
    }

    #[test]
    fn explicit_blocks_commit_and_abort() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement("CREATE TABLE e3 (a int)").unwrap();
            run_statement("BEGIN; INSERT INTO e3 VALUES (1)").unwrap();
            run_statement("COMMIT").unwrap();

            run_statement("BEGIN; INSERT INTO e3 VALUES (2)").unwrap();
            assert!(run_statement("SELECT 1/0").is_err());
            assert_eq!(run_statement("SELECT 1").unwrap_err().code(), "25P02");
            let end = run_statement("COMMIT").unwrap().pop().unwrap();
            assert_eq!(end.command_tag, "ROLLBACK");
            assert_eq!(scalar("SELECT count(*) FROM e3"), Datum::Int8(1));
        });
    }

    #[test]
    fn parameters_bind_by_position() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            let result = run_statement_with_params("SELECT $1 + 1", &[(INT4OID, Datum::Int4(41))]).unwrap();
            assert_eq!(result[0].rows, vec![vec![Datum::Int4(42)]]);
        });
    }
}
