use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use tracing::debug;

use crate::catalog::{Catalog, catalog_snapshot, restore_catalog};
use crate::storage::heap::{StorageSnapshot, restore_storage, storage_snapshot};
use crate::utils::adt::datetime::current_timestamp_usecs;
use crate::utils::elog::{PgError, PgResult, SqlState};

/// Identifies one command. A tuple inserted by command `c` becomes visible to
/// scans running with a command id greater than `c`. The counter never goes
/// back, so ids also order commands across transactions.
pub type CommandId = u32;

/// Tuples written with this id are visible to every snapshot.
pub const FROZEN_COMMAND_ID: CommandId = 0;
pub const FIRST_COMMAND_ID: CommandId = 1;

static CURRENT_COMMAND_ID: AtomicU32 = AtomicU32::new(FIRST_COMMAND_ID);
static XACT_START_TIMESTAMP: AtomicI64 = AtomicI64::new(0);
static STMT_START_TIMESTAMP: AtomicI64 = AtomicI64::new(0);

pub fn current_command_id() -> CommandId {
    CURRENT_COMMAND_ID.load(Ordering::SeqCst)
}

/// Make the effects of the current command visible to the next one.
pub fn command_counter_increment() -> PgResult<CommandId> {
    let previous = CURRENT_COMMAND_ID.fetch_add(1, Ordering::SeqCst);
    if previous == CommandId::MAX {
        CURRENT_COMMAND_ID.store(previous, Ordering::SeqCst);
        return Err(PgError::new(
            SqlState::ProgramLimitExceeded,
            "cannot have more than 2^32-2 commands in a transaction",
        ));
    }
    Ok(previous + 1)
}

/// Timestamp of the start of the current transaction, in microseconds since
/// 2000-01-01.
pub fn transaction_timestamp() -> i64 {
    let ts = XACT_START_TIMESTAMP.load(Ordering::SeqCst);
    if ts == 0 { current_timestamp_usecs() } else { ts }
}

pub fn statement_timestamp() -> i64 {
    let ts = STMT_START_TIMESTAMP.load(Ordering::SeqCst);
    if ts == 0 { current_timestamp_usecs() } else { ts }
}

pub(crate) fn set_statement_start() {
    STMT_START_TIMESTAMP.store(current_timestamp_usecs(), Ordering::SeqCst);
}

fn set_transaction_start() {
    XACT_START_TIMESTAMP.store(current_timestamp_usecs(), Ordering::SeqCst);
}

/// Catalog and storage as they were at some point; restoring it undoes
/// everything done since.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    catalog: Arc<Catalog>,
    storage: StorageSnapshot,
}

impl StateSnapshot {
    pub fn capture() -> Self {
        Self {
            catalog: catalog_snapshot(),
            storage: storage_snapshot(),
        }
    }

    pub fn restore(self) {
        restore_catalog(self.catalog);
        restore_storage(self.storage);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    InProgress,
    Failed,
}

/// Transaction block state of the session.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    state: TransactionState,
    base: Option<StateSnapshot>,
    explicit: bool,
}

impl Default for TransactionContext {
    fn default() -> Self {
        Self {
            state: TransactionState::Idle,
            base: None,
            explicit: false,
        }
    }
}

impl TransactionContext {
    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn in_explicit_block(&self) -> bool {
        self.explicit
    }

    pub fn is_aborted(&self) -> bool {
        self.state == TransactionState::Failed
    }

    /// Start a transaction unless one is already running. `explicit` marks a
    /// `BEGIN` block, which survives across statements.
    pub fn begin(&mut self, explicit: bool) {
        if self.state != TransactionState::Idle {
            if explicit && self.explicit {
                tracing::warn!("there is already a transaction in progress");
            }
            self.explicit |= explicit;
            return;
        }
        self.state = TransactionState::InProgress;
        self.explicit = explicit;
        self.base = Some(StateSnapshot::capture());
        set_transaction_start();
        debug!(explicit, "transaction started");
    }

    /// Commit, or roll back when the block has failed. Returns true when the
    /// work was kept.
    pub fn commit(&mut self) -> bool {
        match self.state {
            TransactionState::Idle => true,
            TransactionState::InProgress => {
                self.clear();
                debug!("transaction committed");
                true
            }
            TransactionState::Failed => {
                self.rollback();
                false
            }
        }
    }

    pub fn rollback(&mut self) {
        if let Some(base) = self.base.take() {
            base.restore();
        }
        self.clear();
        debug!("transaction rolled back");
    }

    /// An error inside an explicit block: discard its work now and ignore
    /// further commands until the block ends.
    pub fn mark_failed(&mut self) {
        if let Some(base) = self.base.take() {
            base.restore();
        }
        self.state = TransactionState::Failed;
    }

    /// Reject commands other than COMMIT/ROLLBACK inside a failed block.
    pub fn check_not_aborted(&self) -> PgResult<()> {
        if self.is_aborted() {
            return Err(PgError::new(
                SqlState::InFailedSqlTransaction,
                "current transaction is aborted, commands ignored until end of transaction block",
            ));
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.state = TransactionState::Idle;
        self.base = None;
        self.explicit = false;
        XACT_START_TIMESTAMP.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::with_catalog_write;
    use crate::tcop::engine::with_global_state_lock;

    #[test]
    fn command_counter_advances() {
        with_global_state_lock(|| {
            let mut xact = TransactionContext::default();
            xact.begin(false);
            let start = current_command_id();
            assert_eq!(command_counter_increment().unwrap(), start + 1);
            assert_eq!(current_command_id(), start + 1);
            assert!(xact.commit());
        });
    }

    #[test]
    fn rollback_restores_catalog() {
        with_global_state_lock(|| {
            crate::tcop::engine::reset_global_state_for_tests();
            let mut xact = TransactionContext::default();
            xact.begin(true);
            let before = with_catalog_write(|c| c.next_oid());
            xact.rollback();
            let after = with_catalog_write(|c| c.next_oid());
            assert_eq!(before, after);
            assert_eq!(xact.state(), TransactionState::Idle);
        });
    }

    #[test]
    fn failed_block_rejects_commands() {
        with_global_state_lock(|| {
            let mut xact = TransactionContext::default();
            xact.begin(true);
            xact.mark_failed();
            let err = xact.check_not_aborted().unwrap_err();
            assert_eq!(err.sqlstate, SqlState::InFailedSqlTransaction);
            assert!(!xact.commit());
            assert!(xact.check_not_aborted().is_ok());
        });
    }
}
