//! Session security context.
//!
//! While a materialized view is refreshed the session runs as the view's
//! owner with `SECURITY_RESTRICTED_OPERATION` set, which forbids operations
//! whose effects could outlive the refresh.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::utils::elog::{PgError, PgResult, SqlState};

pub const SECURITY_LOCAL_USERID_CHANGE: u32 = 0x0001;
pub const SECURITY_RESTRICTED_OPERATION: u32 = 0x0002;

static SECURITY_CONTEXT: AtomicU32 = AtomicU32::new(0);

pub fn get_security_context() -> u32 {
    SECURITY_CONTEXT.load(Ordering::SeqCst)
}

pub fn set_security_context(context: u32) {
    SECURITY_CONTEXT.store(context, Ordering::SeqCst);
}

pub fn in_security_restricted_operation() -> bool {
    get_security_context() & SECURITY_RESTRICTED_OPERATION != 0
}

/// Fail when called inside a security-restricted operation.
pub fn prevent_in_restricted_operation(what: &str) -> PgResult<()> {
    if in_security_restricted_operation() {
        return Err(PgError::new(
            SqlState::InsufficientPrivilege,
            format!("cannot {what} within security-restricted operation"),
        ));
    }
    Ok(())
}

/// Sets the security context for its lifetime and restores the previous one
/// on drop, including when an error unwinds the caller.
#[derive(Debug)]
pub struct SecurityContextGuard {
    saved: u32,
}

impl SecurityContextGuard {
    pub fn enter(extra: u32) -> Self {
        let saved = get_security_context();
        set_security_context(saved | extra);
        Self { saved }
    }

    /// Run with exactly `context` until dropped.
    pub fn switch_to(context: u32) -> Self {
        let saved = get_security_context();
        set_security_context(context);
        Self { saved }
    }
}

impl Drop for SecurityContextGuard {
    fn drop(&mut self) {
        set_security_context(self.saved);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcop::engine::with_global_state_lock;

    #[test]
    fn guard_restores_context() {
        with_global_state_lock(|| {
            set_security_context(0);
            {
                let _guard = SecurityContextGuard::enter(SECURITY_RESTRICTED_OPERATION);
                assert!(in_security_restricted_operation());
                let err = prevent_in_restricted_operation("create temporary table").unwrap_err();
                assert_eq!(err.code(), "42501");
            }
            assert!(!in_security_restricted_operation());
        });
    }
}
