use std::fmt;

use thiserror::Error;

use crate::common::types::TxnId;

/// Why a transaction was aborted by the lock manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    LockOnShrinking,
    LockSharedOnReadUncommitted,
    AttemptedUnlockButNoLockHeld,
    AttemptedIntentionLockOnRow,
    TableLockNotPresent,
    TableUnlockedBeforeUnlockingRows,
    UpgradeConflict,
    IncompatibleUpgrade,
    Deadlock,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            AbortReason::LockOnShrinking => "LOCK_ON_SHRINKING",
            AbortReason::LockSharedOnReadUncommitted => "LOCK_SHARED_ON_READ_UNCOMMITTED",
            AbortReason::AttemptedUnlockButNoLockHeld => "ATTEMPTED_UNLOCK_BUT_NO_LOCK_HELD",
            AbortReason::AttemptedIntentionLockOnRow => "ATTEMPTED_INTENTION_LOCK_ON_ROW",
            AbortReason::TableLockNotPresent => "TABLE_LOCK_NOT_PRESENT",
            AbortReason::TableUnlockedBeforeUnlockingRows => {
                "TABLE_UNLOCKED_BEFORE_UNLOCKING_ROWS"
            }
            AbortReason::UpgradeConflict => "UPGRADE_CONFLICT",
            AbortReason::IncompatibleUpgrade => "INCOMPATIBLE_UPGRADE",
            AbortReason::Deadlock => "DEADLOCK",
        };
        f.write_str(code)
    }
}

/// Raised when a lock manager call aborts the calling transaction
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("transaction {txn_id} aborted: {reason}")]
pub struct TransactionAbort {
    pub txn_id: TxnId,
    pub reason: AbortReason,
}

impl TransactionAbort {
    pub fn new(txn_id: TxnId, reason: AbortReason) -> Self {
        Self { txn_id, reason }
    }
}
