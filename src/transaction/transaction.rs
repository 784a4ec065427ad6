use std::collections::{HashMap, HashSet};

use parking_lot::{Mutex, MutexGuard};

use crate::common::types::{Rid, TableOid, TxnId};
use crate::transaction::lock_manager::LockMode;

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Transaction states under two-phase locking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Everything mutable about a transaction, guarded by the per-txn latch:
/// the 2PL state and the held-lock bookkeeping, one set per table lock
/// mode and one map per row lock mode.
pub(crate) struct TransactionInner {
    pub state: TransactionState,
    pub shared_table_locks: HashSet<TableOid>,
    pub exclusive_table_locks: HashSet<TableOid>,
    pub intention_shared_table_locks: HashSet<TableOid>,
    pub intention_exclusive_table_locks: HashSet<TableOid>,
    pub shared_intention_exclusive_table_locks: HashSet<TableOid>,
    pub shared_row_locks: HashMap<TableOid, HashSet<Rid>>,
    pub exclusive_row_locks: HashMap<TableOid, HashSet<Rid>>,
}

impl TransactionInner {
    fn new() -> Self {
        Self {
            state: TransactionState::Growing,
            shared_table_locks: HashSet::new(),
            exclusive_table_locks: HashSet::new(),
            intention_shared_table_locks: HashSet::new(),
            intention_exclusive_table_locks: HashSet::new(),
            shared_intention_exclusive_table_locks: HashSet::new(),
            shared_row_locks: HashMap::new(),
            exclusive_row_locks: HashMap::new(),
        }
    }

    pub fn table_lock_set(&mut self, mode: LockMode) -> &mut HashSet<TableOid> {
        match mode {
            LockMode::Shared => &mut self.shared_table_locks,
            LockMode::Exclusive => &mut self.exclusive_table_locks,
            LockMode::IntentionShared => &mut self.intention_shared_table_locks,
            LockMode::IntentionExclusive => &mut self.intention_exclusive_table_locks,
            LockMode::SharedIntentionExclusive => &mut self.shared_intention_exclusive_table_locks,
        }
    }

    pub fn table_lock_mode(&self, oid: TableOid) -> Option<LockMode> {
        if self.exclusive_table_locks.contains(&oid) {
            Some(LockMode::Exclusive)
        } else if self.intention_shared_table_locks.contains(&oid) {
            Some(LockMode::IntentionShared)
        } else if self.shared_table_locks.contains(&oid) {
            Some(LockMode::Shared)
        } else if self.intention_exclusive_table_locks.contains(&oid) {
            Some(LockMode::IntentionExclusive)
        } else if self.shared_intention_exclusive_table_locks.contains(&oid) {
            Some(LockMode::SharedIntentionExclusive)
        } else {
            None
        }
    }

    pub fn row_lock_mode(&self, oid: TableOid, rid: Rid) -> Option<LockMode> {
        if self
            .exclusive_row_locks
            .get(&oid)
            .is_some_and(|rows| rows.contains(&rid))
        {
            Some(LockMode::Exclusive)
        } else if self
            .shared_row_locks
            .get(&oid)
            .is_some_and(|rows| rows.contains(&rid))
        {
            Some(LockMode::Shared)
        } else {
            None
        }
    }

    pub fn holds_row_locks_in(&self, oid: TableOid) -> bool {
        self.shared_row_locks
            .get(&oid)
            .is_some_and(|rows| !rows.is_empty())
            || self
                .exclusive_row_locks
                .get(&oid)
                .is_some_and(|rows| !rows.is_empty())
    }

    pub fn clear_lock_sets(&mut self) {
        self.shared_table_locks.clear();
        self.exclusive_table_locks.clear();
        self.intention_shared_table_locks.clear();
        self.intention_exclusive_table_locks.clear();
        self.shared_intention_exclusive_table_locks.clear();
        self.shared_row_locks.clear();
        self.exclusive_row_locks.clear();
    }
}

/// Transaction handle consumed by the lock manager. Created externally by
/// a transaction manager; the core only reads the id and isolation level
/// and maintains the state plus the held-lock sets.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    inner: Mutex<TransactionInner>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            inner: Mutex::new(TransactionInner::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        self.inner.lock().state
    }

    pub fn set_state(&self, state: TransactionState) {
        self.inner.lock().state = state;
    }

    /// The lock mode this transaction holds on a table, if any
    pub fn held_table_lock(&self, oid: TableOid) -> Option<LockMode> {
        self.inner.lock().table_lock_mode(oid)
    }

    /// The lock mode this transaction holds on a row, if any
    pub fn held_row_lock(&self, oid: TableOid, rid: Rid) -> Option<LockMode> {
        self.inner.lock().row_lock_mode(oid, rid)
    }

    pub(crate) fn inner(&self) -> MutexGuard<'_, TransactionInner> {
        self.inner.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_transaction_is_growing() {
        let txn = Transaction::new(1, IsolationLevel::RepeatableRead);
        assert_eq!(txn.id(), 1);
        assert_eq!(txn.state(), TransactionState::Growing);
        assert_eq!(txn.isolation_level(), IsolationLevel::RepeatableRead);
        assert_eq!(txn.held_table_lock(1), None);
    }

    #[test]
    fn test_lock_set_bookkeeping() {
        let txn = Transaction::new(2, IsolationLevel::ReadCommitted);
        {
            let mut inner = txn.inner();
            inner.table_lock_set(LockMode::IntentionExclusive).insert(7);
            inner
                .exclusive_row_locks
                .entry(7)
                .or_default()
                .insert(Rid::new(1, 4));
        }
        assert_eq!(txn.held_table_lock(7), Some(LockMode::IntentionExclusive));
        assert_eq!(
            txn.held_row_lock(7, Rid::new(1, 4)),
            Some(LockMode::Exclusive)
        );
        assert!(txn.inner().holds_row_locks_in(7));

        txn.inner().clear_lock_sets();
        assert_eq!(txn.held_table_lock(7), None);
        assert!(!txn.inner().holds_row_locks_in(7));
    }
}
