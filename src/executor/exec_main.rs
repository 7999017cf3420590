//! Executor entry points: run a planned statement and feed its rows to a
//! destination receiver.

use std::sync::Arc;

use tracing::debug;

use crate::catalog::Catalog;
use crate::nodes::datum::Datum;
use crate::nodes::params::ParamListInfo;
use crate::nodes::plannodes::{PlanKind, PlannedStmt};
use crate::nodes::tupdesc::TupleDesc;
use crate::storage::heap::Snapshot;
use crate::utils::elog::{PgResult, elog};
use crate::utils::interrupt::check_for_interrupts;

use super::dest::{CollectingReceiver, CommandDest, DestReceiver};
use super::exec_proc_node::exec_proc_node_each;
use super::exec_utils::{EState, visible_values};
use super::tuptable::{TupleTableSlot, exec_type_from_tl};

/// Everything needed to run one planned statement.
#[derive(Debug)]
pub struct QueryDesc<'a> {
    pub plannedstmt: &'a PlannedStmt,
    pub catalog: Arc<Catalog>,
    pub params: ParamListInfo,
    pub snapshot: Snapshot,
}

impl<'a> QueryDesc<'a> {
    pub fn new(plannedstmt: &'a PlannedStmt, catalog: Arc<Catalog>, params: ParamListInfo) -> Self {
        Self {
            plannedstmt,
            catalog,
            params,
            snapshot: Snapshot::current(),
        }
    }

    pub fn with_snapshot(mut self, snapshot: Snapshot) -> Self {
        self.snapshot = snapshot;
        self
    }
}

/// Run the statement to completion. Returns the processed-row count: rows
/// affected for INSERT/UPDATE/DELETE, rows delivered otherwise.
pub fn executor_run(desc: QueryDesc<'_>, dest: &mut dyn DestReceiver) -> PgResult<u64> {
    let stmt = desc.plannedstmt;
    let plan = stmt
        .plan_tree
        .as_ref()
        .ok_or_else(|| elog("utility statement passed to the executor"))?;
    let mut estate = EState::new(desc.catalog, stmt, desc.params);
    estate.snapshot = desc.snapshot;

    let modifies = matches!(plan.kind, PlanKind::ModifyTable { .. });
    let output_tlist = match &plan.kind {
        PlanKind::ModifyTable { returning, .. } => returning.as_slice(),
        _ => plan.targetlist.as_slice(),
    };
    let tupdesc = exec_type_from_tl(output_tlist);
    dest.startup(stmt.command_type, &tupdesc)?;

    let mut sent = 0u64;
    exec_proc_node_each(plan, &mut estate, &mut |row, _| {
        check_for_interrupts()?;
        let slot = if modifies {
            row
        } else {
            TupleTableSlot::new(visible_values(&plan.targetlist, &row))
        };
        sent += 1;
        dest.receive(&slot)
    })?;
    dest.shutdown()?;

    let processed = if modifies { estate.processed } else { sent };
    debug!(
        command = ?stmt.command_type,
        dest = ?dest.dest(),
        processed,
        "executor finished"
    );
    Ok(processed)
}

/// Rows and row count of a statement run into memory.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedQuery {
    pub desc: TupleDesc,
    pub rows: Vec<Vec<Datum>>,
    pub processed: u64,
}

pub fn run_planned_query(desc: QueryDesc<'_>) -> PgResult<ExecutedQuery> {
    let mut dest = CollectingReceiver::new(CommandDest::LocalPortal);
    let processed = executor_run(desc, &mut dest)?;
    Ok(ExecutedQuery {
        desc: std::mem::take(&mut dest.desc),
        rows: std::mem::take(&mut dest.rows),
        processed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::pg_type::INT4OID;
    use crate::nodes::makefuncs::make_const;
    use crate::nodes::parsenodes::CmdType;
    use crate::nodes::plannodes::Plan;
    use crate::nodes::primnodes::TargetEntry;

    fn constant_stmt() -> PlannedStmt {
        let tlist = vec![
            TargetEntry::new(make_const(INT4OID, Datum::Int4(7)), 1, Some("x".to_string()), false),
            TargetEntry::new(make_const(INT4OID, Datum::Int4(8)), 2, Some("hidden".to_string()), true),
        ];
        PlannedStmt {
            command_type: CmdType::Select,
            can_set_tag: true,
            plan_tree: Some(Plan::new(PlanKind::Result { resconstantqual: None }, tlist)),
            subplans: Vec::new(),
            param_exec_types: Vec::new(),
            utility_stmt: None,
        }
    }

    #[test]
    fn junk_columns_are_not_delivered() {
        let stmt = constant_stmt();
        let out = run_planned_query(QueryDesc::new(
            &stmt,
            Arc::new(Catalog::default()),
            ParamListInfo::default(),
        ))
        .unwrap();
        assert_eq!(out.rows, vec![vec![Datum::Int4(7)]]);
        assert_eq!(out.desc.column_names(), vec!["x".to_string()]);
        assert_eq!(out.processed, 1);
    }

    #[test]
    fn utility_statements_are_rejected() {
        let stmt = PlannedStmt {
            plan_tree: None,
            ..constant_stmt()
        };
        let mut dest = CollectingReceiver::new(CommandDest::Spi);
        let desc = QueryDesc::new(&stmt, Arc::new(Catalog::default()), ParamListInfo::default());
        assert!(executor_run(desc, &mut dest).is_err());
    }
}
