//! Query cancellation, statement timeouts and the recursion guard.
//!
//! Cancellation is cooperative: a process-wide flag is raised (by a caller or
//! by the statement timer) and long-running code polls it through
//! [`check_for_interrupts`].

use std::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, warn};

use crate::utils::elog::{PgError, PgResult, SqlState};
use crate::utils::guc;

static INTERRUPT_PENDING: AtomicBool = AtomicBool::new(false);

/// Request cancellation of whatever statement is running.
pub fn request_cancel() {
    INTERRUPT_PENDING.store(true, Ordering::SeqCst);
}

pub fn clear_pending_interrupts() {
    INTERRUPT_PENDING.store(false, Ordering::SeqCst);
}

pub fn interrupt_pending() -> bool {
    INTERRUPT_PENDING.load(Ordering::SeqCst)
}

/// Fail with 57014 if a cancel is pending. The flag is consumed.
pub fn check_for_interrupts() -> PgResult<()> {
    if INTERRUPT_PENDING.swap(false, Ordering::SeqCst) {
        return Err(PgError::new(
            SqlState::QueryCanceled,
            "canceling statement due to user request",
        ));
    }
    Ok(())
}

/// Arms `statement_timeout` for the lifetime of the value.
#[derive(Debug)]
pub struct StatementTimer {
    cancel: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    fired: Arc<AtomicBool>,
}

impl StatementTimer {
    pub fn arm() -> Self {
        Self::arm_for(guc::statement_timeout_ms())
    }

    pub fn arm_for(timeout_ms: u64) -> Self {
        let fired = Arc::new(AtomicBool::new(false));
        if timeout_ms == 0 {
            return Self {
                cancel: None,
                handle: None,
                fired,
            };
        }
        let (tx, rx) = mpsc::channel::<()>();
        let flag = Arc::clone(&fired);
        let spawned = std::thread::Builder::new()
            .name("statement-timeout".to_string())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) =
                    rx.recv_timeout(Duration::from_millis(timeout_ms))
                {
                    flag.store(true, Ordering::SeqCst);
                    request_cancel();
                }
            });
        match spawned {
            Ok(handle) => {
                debug!(timeout_ms, "statement timeout armed");
                Self {
                    cancel: Some(tx),
                    handle: Some(handle),
                    fired,
                }
            }
            Err(err) => {
                warn!(%err, "could not start statement timer; timeout disabled");
                Self {
                    cancel: None,
                    handle: None,
                    fired,
                }
            }
        }
    }

    pub fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

impl Drop for StatementTimer {
    fn drop(&mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        if self.fired() {
            // A timeout that lands after the statement finished must not
            // cancel the next one.
            clear_pending_interrupts();
        }
    }
}

/// Map a cancellation raised while a timer fired to the timeout message.
pub fn adjust_cancel_error(err: PgError, timer: &StatementTimer) -> PgError {
    if err.sqlstate == SqlState::QueryCanceled && timer.fired() {
        PgError::new(
            SqlState::QueryCanceled,
            "canceling statement due to statement timeout",
        )
    } else {
        err
    }
}

thread_local! {
    static STACK_DEPTH: Cell<usize> = const { Cell::new(0) };
    static STACK_BASE: Cell<usize> = const { Cell::new(0) };
}

/// Approximate address of the caller's stack frame.
#[inline(never)]
fn stack_pointer() -> usize {
    let marker = 0u8;
    std::hint::black_box(std::ptr::addr_of!(marker)) as usize
}

/// Bytes of stack used since the outermost live [`StackDepthGuard`] was taken.
pub fn stack_bytes_used() -> usize {
    let base = STACK_BASE.with(Cell::get);
    if base == 0 {
        return 0;
    }
    base.abs_diff(stack_pointer())
}

fn stack_limit_error(hint: String) -> PgError {
    PgError::new(SqlState::StatementTooComplex, "stack depth limit exceeded").with_hint(hint)
}

/// Fail with 54001 once the stack in use passes `max_stack_depth`.
pub fn check_stack_depth() -> PgResult<()> {
    let limit_kb = guc::max_stack_depth_kb();
    if stack_bytes_used() > limit_kb * 1024 {
        return Err(stack_limit_error(format!(
            "Increase the configuration parameter \"max_stack_depth\" (currently {limit_kb}kB), \
             after ensuring the platform's stack depth limit is adequate."
        )));
    }
    Ok(())
}

/// RAII recursion guard shared by the parser, analyzer, planner and
/// evaluator.
///
/// Two limits apply: the number of nested guards (`max_expr_depth`) and the
/// bytes of stack consumed below the outermost guard (`max_stack_depth`).
/// The outermost guard on a thread records the stack base.
#[derive(Debug)]
pub struct StackDepthGuard {
    _private: (),
}

impl StackDepthGuard {
    pub fn enter() -> PgResult<Self> {
        let limit = guc::max_expr_depth();
        let depth = STACK_DEPTH.with(|d| {
            let next = d.get() + 1;
            d.set(next);
            next
        });
        if depth == 1 {
            STACK_BASE.with(|b| b.set(stack_pointer()));
        }
        // constructed before the checks so an error unwinds the counter
        let guard = Self { _private: () };
        if depth > limit {
            return Err(stack_limit_error(format!(
                "Increase the configuration parameter \"max_expr_depth\" (currently {limit})."
            )));
        }
        check_stack_depth()?;
        Ok(guard)
    }
}

impl Drop for StackDepthGuard {
    fn drop(&mut self) {
        let remaining = STACK_DEPTH.with(|d| {
            let next = d.get().saturating_sub(1);
            d.set(next);
            next
        });
        if remaining == 0 {
            STACK_BASE.with(|b| b.set(0));
        }
    }
}

pub fn current_stack_depth() -> usize {
    STACK_DEPTH.with(Cell::get)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcop::engine::with_global_state_lock;

    #[test]
    fn pending_interrupt_is_consumed() {
        with_global_state_lock(|| {
            request_cancel();
            let err = check_for_interrupts().unwrap_err();
            assert_eq!(err.code(), "57014");
            assert!(check_for_interrupts().is_ok());
        });
    }

    #[test]
    fn depth_guard_unwinds() {
        with_global_state_lock(|| {
            guc::reset_all_config();
            let before = current_stack_depth();
            {
                let _a = StackDepthGuard::enter().unwrap();
                let _b = StackDepthGuard::enter().unwrap();
                assert_eq!(current_stack_depth(), before + 2);
            }
            assert_eq!(current_stack_depth(), before);
        });
    }

    #[test]
    fn depth_guard_trips_at_limit() {
        with_global_state_lock(|| {
            guc::set_config("max_expr_depth", "8").unwrap();
            let mut guards = Vec::new();
            let mut failure = None;
            for _ in 0..64 {
                match StackDepthGuard::enter() {
                    Ok(g) => guards.push(g),
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }
            let err = failure.expect("limit should trip");
            assert_eq!(err.sqlstate, SqlState::StatementTooComplex);
            drop(guards);
            guc::reset_all_config();
        });
    }

    #[inline(never)]
    fn recurse_until_refused(level: usize) -> PgResult<usize> {
        let _guard = StackDepthGuard::enter()?;
        let padding = std::hint::black_box([level as u8; 512]);
        let deeper = recurse_until_refused(level + 1)?;
        Ok(deeper.max(usize::from(padding[0])))
    }

    #[test]
    fn stack_budget_trips_before_the_counter() {
        with_global_state_lock(|| {
            guc::set_config("max_expr_depth", "100000").unwrap();
            guc::set_config("max_stack_depth", "256").unwrap();
            let outcome = std::thread::Builder::new()
                .stack_size(8 * 1024 * 1024)
                .spawn(|| recurse_until_refused(0).map_err(|err| (err.code().to_string(), err.hint.clone())))
                .unwrap()
                .join()
                .unwrap();
            let (code, hint) = outcome.unwrap_err();
            assert_eq!(code, "54001");
            assert!(hint.unwrap().contains("max_stack_depth"));
            guc::reset_all_config();
        });
    }

    #[test]
    fn stack_base_is_released_with_the_outermost_guard() {
        {
            let _outer = StackDepthGuard::enter().unwrap();
            assert!(stack_bytes_used() < 64 * 1024);
        }
        assert_eq!(stack_bytes_used(), 0);
    }

    #[test]
    fn disarmed_timer_never_fires() {
        let timer = StatementTimer::arm_for(0);
        assert!(!timer.fired());
    }
}
