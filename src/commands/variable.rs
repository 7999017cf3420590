//! SET, RESET and SHOW.

use tracing::debug;

use crate::catalog::pg_type::TEXTOID;
use crate::nodes::datum::Datum;
use crate::nodes::parsenodes::VariableSetStmt;
use crate::tcop::engine::QueryResult;
use crate::utils::elog::PgResult;
use crate::utils::guc::{reset_config, set_config, show_config};

pub fn execute_set(stmt: &VariableSetStmt) -> PgResult<QueryResult> {
    match &stmt.value {
        Some(value) => set_config(&stmt.name, value)?,
        None => reset_config(&stmt.name)?,
    }
    debug!(name = %stmt.name, value = ?stmt.value, "set configuration parameter");
    Ok(QueryResult::command("SET"))
}

pub fn execute_show(name: &str) -> PgResult<QueryResult> {
    let value = show_config(name)?;
    Ok(QueryResult {
        columns: vec![name.to_ascii_lowercase()],
        column_types: vec![TEXTOID],
        rows: vec![vec![Datum::text(value)]],
        command_tag: "SHOW".to_string(),
        rows_affected: 0,
    })
}

#[cfg(test)]
mod tests {
    use crate::nodes::datum::Datum;
    use crate::tcop::engine::{reset_global_state_for_tests, run_statement, with_global_state_lock};

    #[test]
    fn set_show_reset() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement("SET work_mem = 8192").unwrap();
            let shown = run_statement("SHOW work_mem").unwrap().pop().unwrap();
            assert_eq!(shown.columns, vec!["work_mem".to_string()]);
            assert_eq!(shown.rows, vec![vec![Datum::text("8192")]]);
            run_statement("RESET work_mem").unwrap();
            let shown = run_statement("SHOW work_mem").unwrap().pop().unwrap();
            assert_eq!(shown.rows, vec![vec![Datum::text("4096")]]);
            assert_eq!(run_statement("SET no_such_thing = 1").unwrap_err().code(), "42704");
            assert_eq!(run_statement("SET work_mem = 'lots'").unwrap_err().code(), "22023");
        });
    }
}
