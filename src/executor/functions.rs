//! Execution of SQL-language functions.
//!
//! A text body (`AS $$ ... $$`) is parsed on first call and each of its
//! statements is analyzed right before it first runs, so DDL early in the
//! body is visible to later statements. `BEGIN ATOMIC` bodies were analyzed
//! at CREATE FUNCTION time and are only planned here. Analyzed and planned
//! statements are kept for later calls until the catalog changes. The result is the first
//! row of the last statement, or all of its rows for a set-returning
//! function.
//!
//! Volatile functions advance the command counter before every statement
//! and scan with a fresh snapshot; stable and immutable functions reuse the
//! caller's snapshot and may not modify data.

use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tracing::{debug, trace};

use crate::access::xact::command_counter_increment;
use crate::catalog::oid::Oid;
use crate::catalog::pg_operator::CoercionContext;
use crate::catalog::pg_proc::{PgProc, Volatility};
use crate::catalog::pg_type::{RECORDOID, VOIDOID};
use crate::catalog::{Catalog, catalog_snapshot};
use crate::nodes::datum::Datum;
use crate::nodes::makefuncs::make_param;
use crate::nodes::node_funcs::{expr_location, expr_type};
use crate::nodes::params::ParamListInfo;
use crate::nodes::parsenodes::{CmdType, ColumnRefField, Query, RawStmt};
use crate::nodes::plannodes::PlannedStmt;
use crate::nodes::primnodes::{CoercionForm, ParamKind, TargetEntry};
use crate::optimizer::planner;
use crate::parser::parse_coerce::coerce_to_target_type;
use crate::parser::parse_node::{ColumnRefHook, ColumnRefInfo, ParseHooks};
use crate::parser::{parse_analyze_with_hooks, raw_parser};
use crate::storage::heap::Snapshot;
use crate::tcop::utility::{command_tag, process_utility};
use crate::utils::elog::{PgError, PgResult, SqlState};
use crate::utils::fmgr::FmgrInfo;
use crate::utils::guc;
use crate::utils::interrupt::check_for_interrupts;

use super::dest::{CollectingReceiver, CommandDest, NoneReceiver};
use super::exec_main::{QueryDesc, executor_run};
use super::exec_utils::EState;

/// One body statement as analyzed and planned, with the catalog version
/// and `search_path` it was built under.
#[derive(Debug)]
struct PreparedStmt {
    catalog_version: u64,
    search_path: Vec<String>,
    query: Query,
    /// `None` for utility statements.
    plan: Option<PlannedStmt>,
}

impl PreparedStmt {
    fn is_current(&self, catalog: &Catalog, search_path: &[String]) -> bool {
        self.catalog_version == catalog.version() && self.search_path == search_path
    }
}

/// Per-function state kept on the calling expression's function-manager
/// entry: the catalog row, the parsed body and the prepared statements.
///
/// A prepared statement is reused by later calls until the catalog or
/// `search_path` it was analyzed under changes.
#[derive(Debug)]
pub struct SqlFunctionCache {
    proc: PgProc,
    parsed: OnceLock<Vec<RawStmt>>,
    prepared: Mutex<Vec<Option<Arc<PreparedStmt>>>>,
    plans_built: AtomicUsize,
}

impl SqlFunctionCache {
    pub fn new(proc: PgProc) -> Self {
        Self {
            proc,
            parsed: OnceLock::new(),
            prepared: Mutex::new(Vec::new()),
            plans_built: AtomicUsize::new(0),
        }
    }

    pub fn proc(&self) -> &PgProc {
        &self.proc
    }

    /// How many times a body statement has been analyzed and planned.
    pub fn plans_built(&self) -> usize {
        self.plans_built.load(Ordering::Relaxed)
    }

    fn raw_body(&self) -> PgResult<&[RawStmt]> {
        if let Some(stmts) = self.parsed.get() {
            return Ok(stmts);
        }
        let stmts = raw_parser(&self.proc.prosrc)?;
        debug!(function = %self.proc.name, statements = stmts.len(), "parsed SQL function body");
        Ok(self.parsed.get_or_init(|| stmts))
    }

    fn cached(&self, idx: usize, catalog: &Catalog, search_path: &[String]) -> Option<Arc<PreparedStmt>> {
        let prepared = self.prepared.lock().unwrap_or_else(PoisonError::into_inner);
        prepared
            .get(idx)
            .and_then(Option::as_ref)
            .filter(|stmt| stmt.is_current(catalog, search_path))
            .cloned()
    }

    fn store(&self, idx: usize, stmt: PreparedStmt) -> Arc<PreparedStmt> {
        let stmt = Arc::new(stmt);
        self.plans_built.fetch_add(1, Ordering::Relaxed);
        let mut prepared = self.prepared.lock().unwrap_or_else(PoisonError::into_inner);
        if prepared.len() <= idx {
            prepared.resize(idx + 1, None);
        }
        prepared[idx] = Some(Arc::clone(&stmt));
        stmt
    }
}

/// Name-resolution hooks that make a SQL function's parameter names usable
/// in its body, either bare (`x`) or qualified by the function name
/// (`addone.x`). Table columns take precedence over parameter names.
pub fn sql_function_parse_hooks(catalog: &Catalog, proc: &PgProc, argtypes: &[Oid]) -> ParseHooks {
    let funcname = proc.name.clone();
    let params: Vec<(String, Oid, Oid)> = proc
        .argnames
        .iter()
        .zip(argtypes)
        .map(|(name, &typid)| (name.clone(), typid, catalog.type_collation(typid)))
        .collect();
    let hook: ColumnRefHook = Rc::new(move |info: &ColumnRefInfo<'_>| {
        if info.resolved.is_some() {
            return Ok(None);
        }
        let mut names = Vec::with_capacity(info.fields.len());
        for field in info.fields {
            match field {
                ColumnRefField::Name(name) => names.push(name.as_str()),
                ColumnRefField::Star => return Ok(None),
            }
        }
        let target = match names.as_slice() {
            [name] => *name,
            [qualifier, name] if *qualifier == funcname => *name,
            _ => return Ok(None),
        };
        Ok(params
            .iter()
            .position(|(name, _, _)| !name.is_empty() && name == target)
            .map(|idx| {
                let (_, typid, collation) = &params[idx];
                make_param(ParamKind::Extern, idx as i32 + 1, *typid, -1, *collation)
            }))
    });
    ParseHooks {
        post_columnref: Some(hook),
        ..ParseHooks::default()
    }
}

/// Call a SQL function returning a single value.
pub fn exec_sql_function(
    info: &FmgrInfo,
    fcache: &SqlFunctionCache,
    args: Vec<Datum>,
    estate: &mut EState,
) -> PgResult<Datum> {
    let rows = run_function_body(info, fcache, args, estate, false)?;
    let Some(row) = rows.into_iter().next() else {
        return Ok(Datum::Null);
    };
    result_datum(info, &estate.catalog, row)
}

/// Call a set-returning SQL function; every row of the last statement
/// becomes one result.
pub fn exec_sql_function_set(
    info: &FmgrInfo,
    fcache: &SqlFunctionCache,
    args: Vec<Datum>,
    estate: &mut EState,
) -> PgResult<Vec<Datum>> {
    let rows = run_function_body(info, fcache, args, estate, true)?;
    rows.into_iter()
        .map(|row| result_datum(info, &estate.catalog, row))
        .collect()
}

fn result_datum(info: &FmgrInfo, catalog: &Catalog, mut row: Vec<Datum>) -> PgResult<Datum> {
    if info.rettype == VOIDOID {
        return Ok(Datum::Null);
    }
    if returns_row(catalog, info.rettype) {
        if row.len() == 1 && matches!(row[0], Datum::Record(_) | Datum::Null) {
            return Ok(row.remove(0));
        }
        return Ok(Datum::record(info.rettype, row));
    }
    Ok(row.into_iter().next().unwrap_or(Datum::Null))
}

fn returns_row(catalog: &Catalog, rettype: Oid) -> bool {
    rettype == RECORDOID || catalog.is_composite_type(rettype)
}

enum BodyStmt<'a> {
    Raw(&'a RawStmt),
    Analyzed(&'a Query),
}

fn return_type_mismatch(catalog: &Catalog, rettype: Oid) -> PgError {
    PgError::new(
        SqlState::InvalidFunctionDefinition,
        format!(
            "return type mismatch in function declared to return {}",
            catalog.format_type(rettype)
        ),
    )
}

/// Make the last statement's output match the declared return type.
fn check_sql_fn_retval(catalog: &Catalog, query: &mut Query, rettype: Oid) -> PgResult<()> {
    if rettype == VOIDOID {
        return Ok(());
    }
    let returns_rows = match query.command_type {
        CmdType::Select => true,
        CmdType::Insert | CmdType::Update | CmdType::Delete => !query.returning_list.is_empty(),
        CmdType::Utility => false,
    };
    if !returns_rows {
        return Err(return_type_mismatch(catalog, rettype)
            .with_detail("Function's final statement must be SELECT or INSERT/UPDATE/DELETE RETURNING."));
    }
    if returns_row(catalog, rettype) {
        return Ok(());
    }
    let tlist: &mut Vec<TargetEntry> = if query.command_type == CmdType::Select {
        &mut query.target_list
    } else {
        &mut query.returning_list
    };
    let mut visible = tlist.iter_mut().filter(|tle| !tle.resjunk);
    let (Some(tle), None) = (visible.next(), visible.next()) else {
        return Err(return_type_mismatch(catalog, rettype).with_detail("Final statement must return exactly one column."));
    };
    let actual = expr_type(&tle.expr);
    if actual == rettype {
        return Ok(());
    }
    let location = expr_location(&tle.expr);
    let coerced = coerce_to_target_type(
        catalog,
        tle.expr.clone(),
        actual,
        rettype,
        -1,
        CoercionContext::Assignment,
        CoercionForm::ImplicitCast,
        location,
    )?;
    match coerced {
        Some(expr) => {
            tle.expr = expr;
            Ok(())
        }
        None => Err(return_type_mismatch(catalog, rettype)
            .with_detail(format!("Actual return type is {}.", catalog.format_type(actual)))),
    }
}

fn check_statement_allowed(proc: &PgProc, stmt: &BodyStmt<'_>, command: CmdType) -> PgResult<()> {
    if let BodyStmt::Raw(raw @ RawStmt::Transaction(_)) = stmt {
        return Err(PgError::new(
            SqlState::FeatureNotSupported,
            format!("{} is not allowed in an SQL function", command_tag(raw)),
        ));
    }
    if proc.volatility != Volatility::Volatile && command != CmdType::Select {
        let tag = match stmt {
            BodyStmt::Raw(raw) => command_tag(raw),
            BodyStmt::Analyzed(query) => match query.utility_stmt.as_deref() {
                Some(raw) => command_tag(raw),
                None => format!("{:?}", query.command_type).to_uppercase(),
            },
        };
        return Err(PgError::new(
            SqlState::FeatureNotSupported,
            format!("{tag} is not allowed in a non-volatile function"),
        ));
    }
    Ok(())
}

/// Run every statement of the body and return the rows of the last one
/// (at most one unless `all_rows`).
fn run_function_body(
    info: &FmgrInfo,
    fcache: &SqlFunctionCache,
    args: Vec<Datum>,
    estate: &mut EState,
    all_rows: bool,
) -> PgResult<Vec<Vec<Datum>>> {
    let proc = fcache.proc();
    let context = |n: usize| format!("SQL function \"{}\" statement {n}", proc.name);
    let stmts: Vec<BodyStmt<'_>> = match &proc.sqlbody {
        Some(queries) => queries.iter().map(BodyStmt::Analyzed).collect(),
        None => fcache
            .raw_body()
            .map_err(|err| err.with_context(format!("SQL function \"{}\"", proc.name)))?
            .iter()
            .map(BodyStmt::Raw)
            .collect(),
    };
    if stmts.is_empty() {
        if info.rettype == VOIDOID {
            return Ok(Vec::new());
        }
        return Err(return_type_mismatch(&estate.catalog, info.rettype)
            .with_detail("Function's final statement must be SELECT or INSERT/UPDATE/DELETE RETURNING."));
    }

    let params = ParamListInfo::positional(info.argtypes.iter().copied().zip(args).collect());
    let volatile = proc.volatility == Volatility::Volatile;
    let mut catalog = Arc::clone(&estate.catalog);
    let last = stmts.len() - 1;
    let mut result = Vec::new();
    trace!(function = %proc.name, statements = stmts.len(), volatile, "executing SQL function");

    for (idx, stmt) in stmts.iter().enumerate() {
        check_for_interrupts()?;
        let run = || -> PgResult<(Vec<Vec<Datum>>, bool)> {
            let snapshot = if volatile {
                command_counter_increment()?;
                Snapshot::current()
            } else {
                estate.snapshot
            };
            let search_path = guc::search_path();
            let prepared = match fcache.cached(idx, &catalog, &search_path) {
                Some(prepared) => prepared,
                None => fcache.store(idx, prepare_statement(info, proc, stmt, &catalog, search_path, idx == last)?),
            };
            let Some(plannedstmt) = &prepared.plan else {
                let raw = prepared.query.utility_stmt.as_deref().ok_or_else(|| {
                    PgError::new(SqlState::InternalError, "utility query without a statement")
                })?;
                process_utility(raw, &proc.prosrc)?;
                return Ok((Vec::new(), true));
            };
            let desc = QueryDesc::new(plannedstmt, Arc::clone(&catalog), params.clone()).with_snapshot(snapshot);
            if idx == last {
                let mut dest = CollectingReceiver::new(CommandDest::Spi);
                if !all_rows {
                    dest = dest.with_limit(1);
                }
                executor_run(desc, &mut dest)?;
                Ok((std::mem::take(&mut dest.rows), false))
            } else {
                executor_run(desc, &mut NoneReceiver)?;
                Ok((Vec::new(), false))
            }
        };
        let (rows, changed_catalog) = run().map_err(|err| err.with_context(context(idx + 1)))?;
        if changed_catalog {
            catalog = catalog_snapshot();
        }
        result = rows;
    }
    Ok(result)
}

/// Analyze and plan one body statement against `catalog`.
fn prepare_statement(
    info: &FmgrInfo,
    proc: &PgProc,
    stmt: &BodyStmt<'_>,
    catalog: &Catalog,
    search_path: Vec<String>,
    is_last: bool,
) -> PgResult<PreparedStmt> {
    let mut query = match stmt {
        BodyStmt::Analyzed(query) => (*query).clone(),
        BodyStmt::Raw(raw) => parse_analyze_with_hooks(
            catalog,
            raw,
            &proc.prosrc,
            &info.argtypes,
            sql_function_parse_hooks(catalog, proc, &info.argtypes),
        )?,
    };
    check_statement_allowed(proc, stmt, query.command_type)?;
    if is_last {
        check_sql_fn_retval(catalog, &mut query, info.rettype)?;
    }
    let plan = match query.command_type {
        CmdType::Utility => None,
        _ => Some(planner(catalog, &query)?),
    };
    trace!(function = %proc.name, catalog_version = catalog.version(), "prepared SQL function statement");
    Ok(PreparedStmt {
        catalog_version: catalog.version(),
        search_path,
        query,
        plan,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::pg_type::{INT4OID, INT8OID};
    use crate::tcop::engine::{reset_global_state_for_tests, run_statement, with_global_state_lock};

    fn scalar(sql: &str) -> Datum {
        let mut results = run_statement(sql).unwrap();
        let last = results.pop().unwrap();
        last.rows[0][0].clone()
    }

    #[test]
    fn positional_and_named_parameters() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement("CREATE FUNCTION addone(int) RETURNS int AS $$ SELECT $1 + 1 $$ LANGUAGE SQL").unwrap();
            assert_eq!(scalar("SELECT addone(41)"), Datum::Int4(42));
            run_statement("CREATE FUNCTION twice(n int) RETURNS int AS $$ SELECT twice.n + n $$ LANGUAGE SQL")
                .unwrap();
            assert_eq!(scalar("SELECT twice(21)"), Datum::Int4(42));
        });
    }

    #[test]
    fn last_statement_must_return_rows() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement("CREATE TABLE fn_t (a int)").unwrap();
            run_statement("CREATE FUNCTION ins(int) RETURNS int AS $$ INSERT INTO fn_t VALUES ($1) $$ LANGUAGE SQL")
                .unwrap();
            let err = run_statement("SELECT ins(1)").unwrap_err();
            assert_eq!(err.code(), "42P13");
            assert!(err.context.as_deref().unwrap_or("").contains("statement 1"));
        });
    }

    #[test]
    fn volatile_bodies_see_their_own_writes() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement("CREATE TABLE fn_w (a int)").unwrap();
            run_statement(
                "CREATE FUNCTION bump(int) RETURNS bigint AS $$ \
                 INSERT INTO fn_w VALUES ($1); SELECT count(*) FROM fn_w $$ LANGUAGE SQL",
            )
            .unwrap();
            assert_eq!(scalar("SELECT bump(5)"), Datum::Int8(1));
            assert_eq!(scalar("SELECT bump(6)"), Datum::Int8(2));
        });
    }

    #[test]
    fn stable_functions_cannot_modify_data() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement("CREATE TABLE fn_s (a int)").unwrap();
            run_statement(
                "CREATE FUNCTION bad() RETURNS int STABLE AS $$ DELETE FROM fn_s; SELECT 1 $$ LANGUAGE SQL",
            )
            .unwrap();
            let err = run_statement("SELECT bad()").unwrap_err();
            assert_eq!(err.code(), "0A000");
        });
    }

    #[test]
    fn set_returning_function_yields_every_row() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement(
                "CREATE FUNCTION upto(int) RETURNS SETOF int AS $$ \
                 SELECT x FROM (VALUES (1), (2), (3), (4)) v(x) WHERE x <= $1 $$ LANGUAGE SQL",
            )
            .unwrap();
            let result = run_statement("SELECT * FROM upto(3)").unwrap().pop().unwrap();
            assert_eq!(
                result.rows,
                vec![vec![Datum::Int4(1)], vec![Datum::Int4(2)], vec![Datum::Int4(3)]]
            );
        });
    }

    fn estate_for(catalog: &Arc<Catalog>) -> EState {
        let raw = raw_parser("SELECT 1").unwrap().remove(0);
        let query = crate::parser::parse_analyze(catalog, &raw, "SELECT 1", &[]).unwrap();
        let stmt = planner(catalog, &query).unwrap();
        EState::new(Arc::clone(catalog), &stmt, ParamListInfo::default())
    }

    #[test]
    fn prepared_statements_survive_until_the_catalog_changes() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement("CREATE TABLE fn_p (a int)").unwrap();
            run_statement("INSERT INTO fn_p VALUES (1), (2)").unwrap();
            run_statement(
                "CREATE FUNCTION above(int) RETURNS bigint STABLE AS $$ \
                 SELECT count(*) FROM fn_p WHERE a > $1 $$ LANGUAGE SQL",
            )
            .unwrap();

            let catalog = catalog_snapshot();
            let funcid = catalog.proc_by_signature("above", &[INT4OID]).expect("above(int)").oid;
            let info = crate::utils::fmgr::fmgr_info(&catalog, funcid, vec![INT4OID], INT8OID).unwrap();
            let crate::utils::fmgr::FmgrKind::Sql(fcache) = &info.kind else {
                panic!("expected a SQL function");
            };
            let mut estate = estate_for(&catalog);
            for (arg, expected) in [(0, 2), (1, 1), (2, 0)] {
                let value = exec_sql_function(&info, fcache, vec![Datum::Int4(arg)], &mut estate).unwrap();
                assert_eq!(value, Datum::Int8(expected));
            }
            assert_eq!(fcache.plans_built(), 1);

            run_statement("CREATE TABLE fn_unrelated (b int)").unwrap();
            let mut estate = estate_for(&catalog_snapshot());
            let value = exec_sql_function(&info, fcache, vec![Datum::Int4(0)], &mut estate).unwrap();
            assert_eq!(value, Datum::Int8(2));
            assert_eq!(fcache.plans_built(), 2);
        });
    }

    #[test]
    fn hooks_leave_columns_alone() {
        let catalog = Catalog::default();
        let mut proc = catalog
            .proc_by_signature("abs", &[INT4OID])
            .cloned()
            .expect("abs(int4)");
        proc.argnames = vec!["x".to_string()];
        let hooks = sql_function_parse_hooks(&catalog, &proc, &[INT4OID]);
        let hook = hooks.post_columnref.expect("post hook");
        let fields = vec![ColumnRefField::Name("x".to_string())];
        let info = ColumnRefInfo {
            fields: &fields,
            location: None,
            resolved: None,
        };
        assert!(matches!(hook(&info).unwrap(), Some(crate::nodes::primnodes::Expr::Param(_))));
        let column = make_param(ParamKind::Extern, 9, INT4OID, -1, 0);
        let info = ColumnRefInfo {
            fields: &fields,
            location: None,
            resolved: Some(&column),
        };
        assert!(hook(&info).unwrap().is_none());
    }
}
