//! Materialized views: population, REFRESH and REFRESH CONCURRENTLY.
//!
//! A plain refresh runs the stored query into a fresh heap and swaps it in
//! by changing the view's `relfilenode`. A concurrent refresh loads the new
//! data into a temporary table, computes the difference against the current
//! contents with a FULL JOIN on the view's unique keys, and applies it with
//! ordinary DELETE and INSERT statements so readers never see an empty view.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use tracing::{debug, info};

use crate::access::xact::command_counter_increment;
use crate::catalog::oid::Oid;
use crate::catalog::table::{Persistence, RelKind, Relation};
use crate::catalog::{Catalog, PG_TEMP_NAMESPACE, catalog_snapshot, with_catalog_write};
use crate::executor::dest::{CommandDest, DestReceiver};
use crate::executor::exec_indexing::validate_unique_index;
use crate::executor::exec_main::{QueryDesc, executor_run};
use crate::executor::exec_utils::EState;
use crate::executor::spi::{spi_exec, spi_exec_one};
use crate::executor::tuptable::TupleTableSlot;
use crate::nodes::datum::Datum;
use crate::nodes::params::ParamListInfo;
use crate::nodes::parsenodes::{CmdType, Query, RefreshMatViewStmt};
use crate::nodes::tupdesc::TupleDesc;
use crate::optimizer::planner;
use crate::parser::scansup::quote_identifier;
use crate::storage::heap::{Snapshot, heap_create, heap_drop, heap_insert_frozen};
use crate::tcop::engine::QueryResult;
use crate::utils::adt::io::datum_out;
use crate::utils::elog::{PgError, PgResult, SqlState, elog};
use crate::utils::miscinit::{
    SECURITY_LOCAL_USERID_CHANGE, SECURITY_RESTRICTED_OPERATION, SecurityContextGuard, get_security_context,
};

use super::open_relation;

// -- refresh registry -------------------------------------------------------

#[derive(Debug, Default)]
struct RefreshScheduler {
    active_relation_oids: HashSet<Oid>,
}

static GLOBAL_REFRESH_SCHEDULER: OnceLock<RwLock<RefreshScheduler>> = OnceLock::new();

fn global_refresh_scheduler() -> &'static RwLock<RefreshScheduler> {
    GLOBAL_REFRESH_SCHEDULER.get_or_init(|| RwLock::new(RefreshScheduler::default()))
}

fn with_refresh_scheduler_write<T>(f: impl FnOnce(&mut RefreshScheduler) -> T) -> T {
    let mut scheduler = global_refresh_scheduler()
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    f(&mut scheduler)
}

/// Whether a refresh of `relid` is running.
pub fn refresh_in_progress(relid: Oid) -> bool {
    global_refresh_scheduler()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .active_relation_oids
        .contains(&relid)
}

pub fn reset_refresh_registry() {
    with_refresh_scheduler_write(|scheduler| scheduler.active_relation_oids.clear());
    MATVIEW_MAINTENANCE_DEPTH.store(0, Ordering::SeqCst);
}

#[derive(Debug)]
struct RefreshExecutionGuard {
    relation_oid: Oid,
}

impl Drop for RefreshExecutionGuard {
    fn drop(&mut self) {
        with_refresh_scheduler_write(|scheduler| {
            scheduler.active_relation_oids.remove(&self.relation_oid);
        });
    }
}

fn acquire_refresh_execution_guard(relation_oid: Oid, name: &str) -> PgResult<RefreshExecutionGuard> {
    let inserted = with_refresh_scheduler_write(|scheduler| scheduler.active_relation_oids.insert(relation_oid));
    if !inserted {
        return Err(PgError::new(
            SqlState::ObjectInUse,
            format!("cannot refresh materialized view \"{name}\" because it is already being refreshed"),
        ));
    }
    Ok(RefreshExecutionGuard { relation_oid })
}

// -- maintenance mode -------------------------------------------------------

static MATVIEW_MAINTENANCE_DEPTH: AtomicU32 = AtomicU32::new(0);

/// DML against materialized views is allowed while this is true.
pub fn matview_maintenance_active() -> bool {
    MATVIEW_MAINTENANCE_DEPTH.load(Ordering::SeqCst) > 0
}

struct MatViewMaintenanceGuard;

impl MatViewMaintenanceGuard {
    fn open() -> Self {
        MATVIEW_MAINTENANCE_DEPTH.fetch_add(1, Ordering::SeqCst);
        Self
    }
}

impl Drop for MatViewMaintenanceGuard {
    fn drop(&mut self) {
        let _ = MATVIEW_MAINTENANCE_DEPTH.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |depth| {
            depth.checked_sub(1)
        });
    }
}

// -- transient relation receiver --------------------------------------------

/// Buffers every row and bulk-loads them, frozen, into a heap at shutdown.
#[derive(Debug)]
pub struct TransientRelReceiver {
    relfilenode: Oid,
    natts: usize,
    rows: Vec<Vec<Datum>>,
}

impl TransientRelReceiver {
    pub fn new(relfilenode: Oid, natts: usize) -> Self {
        Self {
            relfilenode,
            natts,
            rows: Vec::new(),
        }
    }
}

impl DestReceiver for TransientRelReceiver {
    fn startup(&mut self, _operation: CmdType, desc: &TupleDesc) -> PgResult<()> {
        if desc.natts() != self.natts {
            return Err(elog(format!(
                "query returns {} columns but the relation has {}",
                desc.natts(),
                self.natts
            )));
        }
        self.rows.clear();
        Ok(())
    }

    fn receive(&mut self, slot: &TupleTableSlot) -> PgResult<bool> {
        self.rows.push(slot.values.clone());
        Ok(true)
    }

    fn shutdown(&mut self) -> PgResult<()> {
        heap_insert_frozen(self.relfilenode, std::mem::take(&mut self.rows))
    }

    fn destroy(&mut self) {
        self.rows.clear();
    }

    fn dest(&self) -> CommandDest {
        CommandDest::TransientRel
    }
}

/// Run `query` into the heap `relfilenode`. Returns the number of rows.
fn refresh_matview_datafill(relfilenode: Oid, natts: usize, query: &Query) -> PgResult<u64> {
    // The query must see everything done so far in this transaction.
    command_counter_increment()?;
    let catalog = catalog_snapshot();
    let plannedstmt = planner(&catalog, query)?;
    let mut dest = TransientRelReceiver::new(relfilenode, natts);
    let desc = QueryDesc::new(&plannedstmt, catalog, ParamListInfo::default()).with_snapshot(Snapshot::current());
    let processed = executor_run(desc, &mut dest)?;
    dest.destroy();
    Ok(processed)
}

/// Load the result of `query` into the (empty) table `relid`; CREATE TABLE AS.
pub fn fill_relation(relid: Oid, query: &Query) -> PgResult<u64> {
    let catalog = catalog_snapshot();
    let rel = catalog
        .relation(relid)
        .ok_or_else(|| elog(format!("relation {relid} does not exist")))?;
    refresh_matview_datafill(rel.relfilenode, rel.desc.natts(), query)
}

fn stored_query(rel: &Relation) -> PgResult<&Query> {
    rel.view_query
        .as_deref()
        .ok_or_else(|| elog(format!("materialized view \"{}\" has no stored query", rel.name)))
}

/// Check that the rows now in `relfilenode` satisfy the unique indexes of `rel`.
fn validate_indexes_on(catalog: &Arc<Catalog>, rel: &Relation, relfilenode: Oid) -> PgResult<()> {
    if rel.unique_indexes().next().is_none() {
        return Ok(());
    }
    let mut staged = rel.clone();
    staged.relfilenode = relfilenode;
    let mut estate = EState::standalone(Arc::clone(catalog));
    for index in staged.unique_indexes() {
        validate_unique_index(&staged, index, &mut estate)?;
    }
    Ok(())
}

/// Build a new heap, optionally fill it, and swap it in.
fn refresh_by_heap_swap(rel: &Relation, skip_data: bool) -> PgResult<u64> {
    let catalog = catalog_snapshot();
    let new_node = with_catalog_write(Catalog::next_oid);
    heap_create(new_node);
    let processed = if skip_data {
        0
    } else {
        refresh_matview_datafill(new_node, rel.desc.natts(), stored_query(rel)?)?
    };
    if let Err(err) = validate_indexes_on(&catalog, rel, new_node) {
        heap_drop(new_node);
        return Err(err);
    }

    let old_node = rel.relfilenode;
    with_catalog_write(|c| {
        if let Some(rel) = c.relation_mut(rel.oid) {
            rel.relfilenode = new_node;
            rel.populated = !skip_data;
        }
    });
    heap_drop(old_node);
    command_counter_increment()?;
    debug!(matview = %rel.name, old_node, new_node, processed, "swapped heap");
    Ok(processed)
}

/// Populate a materialized view that CREATE MATERIALIZED VIEW just made.
pub fn populate_new_matview(relid: Oid) -> PgResult<u64> {
    let catalog = catalog_snapshot();
    let rel = catalog
        .relation(relid)
        .ok_or_else(|| elog(format!("relation {relid} does not exist")))?;
    let _guard = acquire_refresh_execution_guard(rel.oid, &rel.name)?;
    let _security = SecurityContextGuard::enter(SECURITY_RESTRICTED_OPERATION);
    refresh_by_heap_swap(rel, false)
}

// -- concurrent refresh -----------------------------------------------------

fn qualified_name(catalog: &Catalog, rel: &Relation) -> String {
    format!(
        "{}.{}",
        quote_identifier(catalog.namespace_name(rel.namespace).unwrap_or("public")),
        quote_identifier(&rel.name)
    )
}

/// Key columns of every index usable for a concurrent refresh, without
/// repeats.
fn usable_key_columns(rel: &Relation) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut columns = Vec::new();
    for index in rel.indexes.iter().filter(|index| index.is_usable_for_refresh()) {
        for &attno in &index.keys {
            if seen.insert(attno)
                && let Some(attr) = rel.desc.attr(attno)
            {
                columns.push(quote_identifier(&attr.name));
            }
        }
    }
    columns
}

fn check_for_duplicate_rows(rel: &Relation, tempname: &str) -> PgResult<()> {
    let sql = format!(
        "SELECT newdata.*::{tempname} FROM {tempname} newdata \
         WHERE newdata.* IS NOT NULL AND EXISTS \
         (SELECT 1 FROM {tempname} newdata2 WHERE newdata2.* IS NOT NULL \
         AND newdata2.* *= newdata.* AND newdata2.ctid <> newdata.ctid)"
    );
    let result = spi_exec_one(&sql)?;
    if let Some(row) = result.rows.first() {
        let rendered = row.first().map_or_else(|| "()".to_string(), datum_out);
        return Err(PgError::new(
            SqlState::CardinalityViolation,
            format!(
                "new data for materialized view \"{}\" contains duplicate rows without any null columns",
                rel.name
            ),
        )
        .with_detail(format!("Row: {rendered}")));
    }
    Ok(())
}

/// Apply the difference between `tempname` (the new contents) and the view.
fn refresh_by_match_merge(catalog: &Catalog, rel: &Relation, tempname: &str, diffname: &str) -> PgResult<u64> {
    let matviewname = qualified_name(catalog, rel);

    spi_exec(&format!("ANALYZE {tempname}"))?;
    check_for_duplicate_rows(rel, tempname)?;

    {
        // CREATE TEMP TABLE is not allowed in a restricted context.
        let saved = get_security_context();
        let _switched = SecurityContextGuard::switch_to(
            (saved & !SECURITY_RESTRICTED_OPERATION) | SECURITY_LOCAL_USERID_CHANGE,
        );
        spi_exec(&format!("CREATE TEMP TABLE {diffname} (tid pg_catalog.tid)"))?;
    }
    spi_exec(&format!("ALTER TABLE {diffname} ADD COLUMN newdata {tempname}"))?;

    let keys = usable_key_columns(rel);
    if keys.is_empty() {
        return Err(PgError::new(
            SqlState::ObjectNotInPrerequisiteState,
            format!("could not find suitable unique index on materialized view \"{}\"", rel.name),
        ));
    }
    let join_quals: Vec<String> = keys
        .iter()
        .map(|column| format!("newdata.{column} = mv.{column}"))
        .collect();
    spi_exec(&format!(
        "INSERT INTO {diffname} SELECT mv.ctid AS tid, newdata.*::{tempname} AS newdata \
         FROM {matviewname} mv FULL JOIN {tempname} newdata ON ({} AND newdata.* *= mv.*) \
         WHERE newdata.* IS NULL OR mv.* IS NULL ORDER BY tid",
        join_quals.join(" AND ")
    ))?;

    let deleted = spi_exec_one(&format!(
        "DELETE FROM {matviewname} mv WHERE ctid = ANY \
         (SELECT diff.tid FROM {diffname} diff WHERE diff.tid IS NOT NULL AND diff.newdata IS NULL)"
    ))?
    .processed;
    let inserted = spi_exec_one(&format!(
        "INSERT INTO {matviewname} SELECT (diff.newdata).* FROM {diffname} diff WHERE tid IS NULL"
    ))?
    .processed;
    info!(matview = %rel.name, deleted, inserted, "applied differences");

    spi_exec(&format!("DROP TABLE {diffname}, {tempname}"))?;
    Ok(deleted + inserted)
}

fn refresh_concurrently(rel: &Relation) -> PgResult<u64> {
    let catalog = catalog_snapshot();
    let temp_relname = format!("pg_temp_{}", rel.oid);
    let temp_relid = with_catalog_write(|c| {
        c.create_relation(
            &temp_relname,
            PG_TEMP_NAMESPACE,
            RelKind::Table,
            Persistence::Temp,
            TupleDesc::new(rel.desc.attrs.clone()),
        )
    })?;
    heap_create(temp_relid);
    let loaded = refresh_matview_datafill(temp_relid, rel.desc.natts(), stored_query(rel)?)?;
    info!(matview = %rel.name, rows = loaded, "loaded new data");

    let tempname = format!("pg_temp.{}", quote_identifier(&temp_relname));
    let diffname = format!("pg_temp.{}", quote_identifier(&format!("pg_temp_{}_2", rel.oid)));
    let _maintenance = MatViewMaintenanceGuard::open();
    refresh_by_match_merge(&catalog, rel, &tempname, &diffname)?;
    Ok(loaded)
}

pub fn execute_refresh_matview(stmt: &RefreshMatViewStmt) -> PgResult<QueryResult> {
    let catalog = catalog_snapshot();
    let rel = open_relation(&catalog, &stmt.relation)?;
    if rel.kind != RelKind::MatView {
        return Err(PgError::new(
            SqlState::WrongObjectType,
            format!("\"{}\" is not a materialized view", rel.name),
        )
        .at(stmt.relation.location));
    }
    if stmt.concurrent && stmt.skip_data {
        return Err(PgError::new(
            SqlState::SyntaxError,
            "CONCURRENTLY and WITH NO DATA options cannot be used together",
        ));
    }
    if stmt.concurrent && !rel.populated {
        return Err(PgError::new(
            SqlState::ObjectNotInPrerequisiteState,
            "CONCURRENTLY cannot be used when the materialized view is not populated",
        ));
    }
    if stmt.concurrent && !rel.indexes.iter().any(|index| index.is_usable_for_refresh()) {
        return Err(PgError::new(
            SqlState::ObjectNotInPrerequisiteState,
            format!("cannot refresh materialized view \"{}\" concurrently", qualified_name(&catalog, rel)),
        )
        .with_hint("Create a unique index with no WHERE clause on one or more columns of the materialized view."));
    }

    let _guard = acquire_refresh_execution_guard(rel.oid, &rel.name)?;
    let _security = SecurityContextGuard::enter(SECURITY_RESTRICTED_OPERATION);
    info!(matview = %rel.name, concurrent = stmt.concurrent, skip_data = stmt.skip_data, "refreshing");
    let processed = if stmt.concurrent {
        refresh_concurrently(rel)?
    } else {
        refresh_by_heap_swap(rel, stmt.skip_data)?
    };
    info!(matview = %rel.name, processed, "refresh finished");
    let mut result = QueryResult::command("REFRESH MATERIALIZED VIEW");
    result.rows_affected = processed;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcop::engine::{reset_global_state_for_tests, run_statement, with_global_state_lock};

    fn values(sql: &str) -> Vec<Vec<Datum>> {
        run_statement(sql).unwrap().pop().unwrap().rows
    }

    #[test]
    fn create_reports_select_and_refresh_swaps_heap() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement("CREATE TABLE base (a int)").unwrap();
            run_statement("INSERT INTO base VALUES (1), (2)").unwrap();
            let created = run_statement("CREATE MATERIALIZED VIEW mv1 AS SELECT a FROM base")
                .unwrap()
                .pop()
                .unwrap();
            assert_eq!(created.command_tag, "SELECT 2");
            let before = catalog_snapshot().relations().find(|r| r.name == "mv1").unwrap().relfilenode;

            run_statement("INSERT INTO base VALUES (3)").unwrap();
            let refreshed = run_statement("REFRESH MATERIALIZED VIEW mv1").unwrap().pop().unwrap();
            assert_eq!(refreshed.command_tag, "REFRESH MATERIALIZED VIEW");
            let after = catalog_snapshot().relations().find(|r| r.name == "mv1").unwrap().relfilenode;
            assert_ne!(before, after);
            assert_eq!(values("SELECT a FROM mv1 ORDER BY a").len(), 3);
        });
    }

    #[test]
    fn with_no_data_leaves_view_unscannable() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            let created = run_statement("CREATE MATERIALIZED VIEW nd AS SELECT 1 AS x WITH NO DATA")
                .unwrap()
                .pop()
                .unwrap();
            assert_eq!(created.command_tag, "CREATE MATERIALIZED VIEW");
            assert_eq!(run_statement("SELECT * FROM nd").unwrap_err().code(), "55000");
            let err = run_statement("REFRESH MATERIALIZED VIEW CONCURRENTLY nd").unwrap_err();
            assert_eq!(err.code(), "55000");
            run_statement("REFRESH MATERIALIZED VIEW nd").unwrap();
            assert_eq!(values("SELECT * FROM nd"), vec![vec![Datum::Int4(1)]]);
        });
    }

    #[test]
    fn concurrent_refresh_argument_checks() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement("CREATE TABLE t0 (a int)").unwrap();
            run_statement("CREATE MATERIALIZED VIEW m0 AS SELECT a FROM t0").unwrap();
            let err = run_statement("REFRESH MATERIALIZED VIEW CONCURRENTLY m0 WITH NO DATA").unwrap_err();
            assert_eq!(err.code(), "42601");
            let err = run_statement("REFRESH MATERIALIZED VIEW CONCURRENTLY m0").unwrap_err();
            assert_eq!(err.code(), "55000");
            assert!(err.hint.as_deref().unwrap_or_default().contains("unique index"));
            let err = run_statement("REFRESH MATERIALIZED VIEW t0").unwrap_err();
            assert_eq!(err.code(), "42809");
        });
    }

    #[test]
    fn concurrent_refresh_rejects_duplicate_rows() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement("CREATE TABLE dsrc (a int, b int)").unwrap();
            run_statement("INSERT INTO dsrc VALUES (1, 1)").unwrap();
            run_statement("CREATE MATERIALIZED VIEW dm AS SELECT a, b FROM dsrc").unwrap();
            run_statement("CREATE UNIQUE INDEX ON dm (a)").unwrap();
            run_statement("INSERT INTO dsrc VALUES (1, 1)").unwrap();
            let err = run_statement("REFRESH MATERIALIZED VIEW CONCURRENTLY dm").unwrap_err();
            assert_eq!(err.code(), "21000");
            assert_eq!(err.detail.as_deref(), Some("Row: (1,1)"));
            // the failed refresh leaves neither temp tables nor a registry entry
            assert!(catalog_snapshot().relations().all(|r| !r.name.starts_with("pg_temp_")));
            assert!(!refresh_in_progress(catalog_snapshot().relations().find(|r| r.name == "dm").unwrap().oid));
        });
    }

    #[test]
    fn second_refresh_of_same_view_is_rejected() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            let _held = acquire_refresh_execution_guard(42, "busy").unwrap();
            assert!(refresh_in_progress(42));
            let err = acquire_refresh_execution_guard(42, "busy").unwrap_err();
            assert_eq!(err.code(), "55006");
            drop(_held);
            assert!(!refresh_in_progress(42));
        });
    }

    #[test]
    fn maintenance_guard_nests() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            assert!(!matview_maintenance_active());
            let outer = MatViewMaintenanceGuard::open();
            let inner = MatViewMaintenanceGuard::open();
            drop(inner);
            assert!(matview_maintenance_active());
            drop(outer);
            assert!(!matview_maintenance_active());
        });
    }
}
