mod deadlock;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::common::types::{Rid, TableOid, TxnId};
use crate::transaction::error::{AbortReason, TransactionAbort};
use crate::transaction::transaction::{
    IsolationLevel, Transaction, TransactionInner, TransactionState,
};
use deadlock::WaitsForGraph;

/// How often the background detector looks for waits-for cycles
pub const CYCLE_DETECTION_INTERVAL: Duration = Duration::from_millis(50);

/// Hierarchical lock modes. Tables take all five; rows take only S and X.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

impl LockMode {
    /// The multi-granularity compatibility matrix
    pub fn is_compatible(self, other: LockMode) -> bool {
        use LockMode::*;
        match (self, other) {
            (IntentionShared, Exclusive) | (Exclusive, IntentionShared) => false,
            (IntentionShared, _) | (_, IntentionShared) => true,
            (IntentionExclusive, IntentionExclusive) => true,
            (Shared, Shared) => true,
            _ => false,
        }
    }

    /// Strict upgrades only: IS < {S, IX, SIX, X}, S < {X, SIX},
    /// IX < {X, SIX}, SIX < X
    pub fn can_upgrade_to(self, requested: LockMode) -> bool {
        use LockMode::*;
        match self {
            IntentionShared => matches!(
                requested,
                Shared | IntentionExclusive | SharedIntentionExclusive | Exclusive
            ),
            Shared | IntentionExclusive => {
                matches!(requested, SharedIntentionExclusive | Exclusive)
            }
            SharedIntentionExclusive => matches!(requested, Exclusive),
            Exclusive => false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    oid: TableOid,
    rid: Option<Rid>,
    granted: bool,
}

#[derive(Default)]
struct QueueState {
    requests: VecDeque<LockRequest>,
    upgrading: Option<TxnId>,
}

#[derive(Default)]
struct LockRequestQueue {
    state: Mutex<QueueState>,
    cv: Condvar,
}

/// A request is grantable iff every request ahead of it in the queue is
/// either compatible or itself grantable, so a whole compatible prefix is
/// granted in one wake-up.
fn grantable(requests: &VecDeque<LockRequest>, index: usize) -> bool {
    let request = &requests[index];
    if request.granted {
        return true;
    }
    for ahead in 0..index {
        let other = &requests[ahead];
        if !request.mode.is_compatible(other.mode) {
            if other.txn_id == request.txn_id && other.mode == request.mode {
                continue;
            }
            return false;
        }
        if !grantable(requests, ahead) {
            return false;
        }
    }
    true
}

/// Lock manager offering hierarchical S/X/IS/IX/SIX locks on tables and
/// S/X locks on rows under strict two-phase locking, with queue-based
/// waiting and background deadlock detection.
///
/// Latch order is map latch, then queue latch, then transaction latch;
/// never the reverse.
pub struct LockManager {
    table_lock_map: Mutex<HashMap<TableOid, Arc<LockRequestQueue>>>,
    row_lock_map: Mutex<HashMap<Rid, Arc<LockRequestQueue>>>,
    waits_for: Mutex<WaitsForGraph>,
    txns: Mutex<HashMap<TxnId, Arc<Transaction>>>,
    detector_enabled: AtomicBool,
    detector_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            table_lock_map: Mutex::new(HashMap::new()),
            row_lock_map: Mutex::new(HashMap::new()),
            waits_for: Mutex::new(WaitsForGraph::default()),
            txns: Mutex::new(HashMap::new()),
            detector_enabled: AtomicBool::new(false),
            detector_handle: Mutex::new(None),
        }
    }

    /// Acquire (or upgrade to) `mode` on a table. `Ok(false)` means the
    /// waiter observed its own abort, typically as a deadlock victim.
    pub fn lock_table(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
    ) -> Result<bool, TransactionAbort> {
        self.register_txn(txn);
        let txn_id = txn.id();
        log::debug!("txn {txn_id} requests {mode:?} on table {oid}");

        {
            let mut inner = txn.inner();
            if matches!(
                inner.state,
                TransactionState::Committed | TransactionState::Aborted
            ) {
                return Ok(false);
            }
            check_lock_policy(txn_id, &mut inner, txn.isolation_level(), mode)?;

            if let Some(held) = inner.table_lock_mode(oid) {
                if held == mode {
                    return Ok(true);
                }
                if !held.can_upgrade_to(mode) {
                    inner.state = TransactionState::Aborted;
                    return Err(TransactionAbort::new(
                        txn_id,
                        AbortReason::IncompatibleUpgrade,
                    ));
                }
            }
        }

        let queue = self.table_queue(oid);
        let mut queue_state = queue.state.lock();
        {
            let mut inner = txn.inner();
            self.enqueue_request(
                &mut queue_state,
                &queue.cv,
                &mut inner,
                LockRequest {
                    txn_id,
                    mode,
                    oid,
                    rid: None,
                    granted: false,
                },
            )?;
        }
        self.wait_for_grant(txn, &queue, queue_state, mode, oid, None)
    }

    /// Release the table lock, applying the isolation level's 2PL state
    /// transition. Row locks in the table must be released first.
    pub fn unlock_table(
        &self,
        txn: &Arc<Transaction>,
        oid: TableOid,
    ) -> Result<bool, TransactionAbort> {
        let txn_id = txn.id();
        log::debug!("txn {txn_id} unlocks table {oid}");
        {
            let mut inner = txn.inner();
            if inner.holds_row_locks_in(oid) {
                inner.state = TransactionState::Aborted;
                return Err(TransactionAbort::new(
                    txn_id,
                    AbortReason::TableUnlockedBeforeUnlockingRows,
                ));
            }
            if inner.table_lock_mode(oid).is_none() {
                inner.state = TransactionState::Aborted;
                return Err(TransactionAbort::new(
                    txn_id,
                    AbortReason::AttemptedUnlockButNoLockHeld,
                ));
            }
        }

        let queue = self.table_lock_map.lock().get(&oid).cloned();
        let Some(queue) = queue else {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionAbort::new(
                txn_id,
                AbortReason::AttemptedUnlockButNoLockHeld,
            ));
        };
        let mut queue_state = queue.state.lock();

        let mut removed = Vec::new();
        queue_state.requests.retain(|request| {
            if request.txn_id == txn_id && request.granted {
                removed.push(*request);
                false
            } else {
                true
            }
        });

        let mut inner = txn.inner();
        if removed.is_empty() {
            inner.state = TransactionState::Aborted;
            return Err(TransactionAbort::new(
                txn_id,
                AbortReason::AttemptedUnlockButNoLockHeld,
            ));
        }
        for request in &removed {
            apply_unlock_policy(txn_id, &mut inner, txn.isolation_level(), request.mode)?;
            inner.table_lock_set(request.mode).remove(&oid);
        }
        drop(inner);
        queue.cv.notify_all();
        Ok(true)
    }

    /// Acquire (or upgrade to) an S or X lock on a row. The enclosing
    /// table lock must already be held in a covering mode.
    pub fn lock_row(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
        rid: Rid,
    ) -> Result<bool, TransactionAbort> {
        self.register_txn(txn);
        let txn_id = txn.id();
        log::debug!("txn {txn_id} requests {mode:?} on row {rid} of table {oid}");

        {
            let mut inner = txn.inner();
            if matches!(
                inner.state,
                TransactionState::Committed | TransactionState::Aborted
            ) {
                return Ok(false);
            }

            if let Some(held) = inner.row_lock_mode(oid, rid) {
                if held == mode {
                    return Ok(true);
                }
                if !held.can_upgrade_to(mode) {
                    inner.state = TransactionState::Aborted;
                    return Err(TransactionAbort::new(
                        txn_id,
                        AbortReason::IncompatibleUpgrade,
                    ));
                }
            }

            if !matches!(mode, LockMode::Shared | LockMode::Exclusive) {
                inner.state = TransactionState::Aborted;
                return Err(TransactionAbort::new(
                    txn_id,
                    AbortReason::AttemptedIntentionLockOnRow,
                ));
            }
            check_lock_policy(txn_id, &mut inner, txn.isolation_level(), mode)?;

            let table_mode = inner.table_lock_mode(oid);
            let covered = match mode {
                LockMode::Exclusive => matches!(
                    table_mode,
                    Some(
                        LockMode::Exclusive
                            | LockMode::IntentionExclusive
                            | LockMode::SharedIntentionExclusive
                    )
                ),
                _ => table_mode.is_some(),
            };
            if !covered {
                inner.state = TransactionState::Aborted;
                return Err(TransactionAbort::new(
                    txn_id,
                    AbortReason::TableLockNotPresent,
                ));
            }
        }

        let queue = self.row_queue(rid);
        let mut queue_state = queue.state.lock();
        {
            let mut inner = txn.inner();
            self.enqueue_request(
                &mut queue_state,
                &queue.cv,
                &mut inner,
                LockRequest {
                    txn_id,
                    mode,
                    oid,
                    rid: Some(rid),
                    granted: false,
                },
            )?;
        }
        self.wait_for_grant(txn, &queue, queue_state, mode, oid, Some(rid))
    }

    /// Release a row lock, applying the isolation level's 2PL state
    /// transition.
    pub fn unlock_row(
        &self,
        txn: &Arc<Transaction>,
        oid: TableOid,
        rid: Rid,
    ) -> Result<bool, TransactionAbort> {
        let txn_id = txn.id();
        log::debug!("txn {txn_id} unlocks row {rid} of table {oid}");
        {
            let mut inner = txn.inner();
            if inner.row_lock_mode(oid, rid).is_none() {
                inner.state = TransactionState::Aborted;
                return Err(TransactionAbort::new(
                    txn_id,
                    AbortReason::AttemptedUnlockButNoLockHeld,
                ));
            }
        }

        let queue = self.row_lock_map.lock().get(&rid).cloned();
        let Some(queue) = queue else {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionAbort::new(
                txn_id,
                AbortReason::AttemptedUnlockButNoLockHeld,
            ));
        };
        let mut queue_state = queue.state.lock();

        let mut removed = Vec::new();
        queue_state.requests.retain(|request| {
            if request.txn_id == txn_id && request.granted {
                removed.push(*request);
                false
            } else {
                true
            }
        });

        let mut inner = txn.inner();
        if removed.is_empty() {
            inner.state = TransactionState::Aborted;
            return Err(TransactionAbort::new(
                txn_id,
                AbortReason::AttemptedUnlockButNoLockHeld,
            ));
        }
        for request in &removed {
            apply_unlock_policy(txn_id, &mut inner, txn.isolation_level(), request.mode)?;
            remove_row_lock(&mut inner, request.mode, oid, rid);
        }
        drop(inner);
        queue.cv.notify_all();
        Ok(true)
    }

    /// Purge every granted request of a finished transaction and clear its
    /// bookkeeping. Called by the transaction manager on commit or abort.
    pub fn release_all_locks(&self, txn: &Arc<Transaction>) {
        let txn_id = txn.id();
        for queue in self.all_queues() {
            let mut queue_state = queue.state.lock();
            let before = queue_state.requests.len();
            queue_state
                .requests
                .retain(|request| !(request.txn_id == txn_id && request.granted));
            if queue_state.requests.len() != before {
                queue.cv.notify_all();
            }
        }
        txn.inner().clear_lock_sets();
    }

    // ---- queue plumbing ----

    fn table_queue(&self, oid: TableOid) -> Arc<LockRequestQueue> {
        self.table_lock_map
            .lock()
            .entry(oid)
            .or_default()
            .clone()
    }

    fn row_queue(&self, rid: Rid) -> Arc<LockRequestQueue> {
        self.row_lock_map.lock().entry(rid).or_default().clone()
    }

    /// Position the new request in the queue. An upgrade drops the old
    /// granted entry and slots the new request ahead of the waiters; only
    /// one transaction may be upgrading per queue.
    fn enqueue_request(
        &self,
        queue_state: &mut QueueState,
        cv: &Condvar,
        inner: &mut TransactionInner,
        request: LockRequest,
    ) -> Result<(), TransactionAbort> {
        let txn_id = request.txn_id;
        let holds_granted = queue_state
            .requests
            .iter()
            .any(|r| r.txn_id == txn_id && r.granted);
        if !holds_granted {
            queue_state.requests.push_back(request);
            return Ok(());
        }

        if queue_state.upgrading.is_some() {
            inner.state = TransactionState::Aborted;
            return Err(TransactionAbort::new(txn_id, AbortReason::UpgradeConflict));
        }

        let mut removed = Vec::new();
        queue_state.requests.retain(|r| {
            if r.txn_id == txn_id && r.granted {
                removed.push(*r);
                false
            } else {
                true
            }
        });
        for old in removed {
            match old.rid {
                None => {
                    inner.table_lock_set(old.mode).remove(&old.oid);
                }
                Some(rid) => remove_row_lock(inner, old.mode, old.oid, rid),
            }
        }
        cv.notify_all();

        queue_state.upgrading = Some(txn_id);
        let first_waiter = queue_state
            .requests
            .iter()
            .position(|r| !r.granted)
            .unwrap_or(queue_state.requests.len());
        queue_state.requests.insert(first_waiter, request);
        Ok(())
    }

    /// Block on the queue's condition variable until the request is
    /// grantable or the transaction is aborted out from under us.
    fn wait_for_grant(
        &self,
        txn: &Arc<Transaction>,
        queue: &LockRequestQueue,
        mut queue_state: parking_lot::MutexGuard<'_, QueueState>,
        mode: LockMode,
        oid: TableOid,
        rid: Option<Rid>,
    ) -> Result<bool, TransactionAbort> {
        let txn_id = txn.id();
        loop {
            if txn.state() == TransactionState::Aborted {
                if queue_state.upgrading == Some(txn_id) {
                    queue_state.upgrading = None;
                }
                if let Some(pos) = queue_state
                    .requests
                    .iter()
                    .position(|r| r.txn_id == txn_id && !r.granted)
                {
                    queue_state.requests.remove(pos);
                }
                queue.cv.notify_all();
                log::debug!("txn {txn_id} aborted while waiting for {mode:?}");
                return Ok(false);
            }

            let position = queue_state
                .requests
                .iter()
                .position(|r| r.txn_id == txn_id && !r.granted);
            let Some(position) = position else {
                // The request vanished from the queue; treat it like an
                // abort observed by the waiter.
                return Ok(false);
            };

            if grantable(&queue_state.requests, position) {
                if queue_state.upgrading == Some(txn_id) {
                    queue_state.upgrading = None;
                }
                queue_state.requests[position].granted = true;
                let mut inner = txn.inner();
                match rid {
                    None => {
                        inner.table_lock_set(mode).insert(oid);
                    }
                    Some(rid) => add_row_lock(&mut inner, mode, oid, rid),
                }
                log::debug!("txn {txn_id} granted {mode:?}");
                return Ok(true);
            }

            queue.cv.wait(&mut queue_state);
        }
    }

    fn all_queues(&self) -> Vec<Arc<LockRequestQueue>> {
        let mut queues: Vec<_> = self.table_lock_map.lock().values().cloned().collect();
        queues.extend(self.row_lock_map.lock().values().cloned());
        queues
    }

    fn register_txn(&self, txn: &Arc<Transaction>) {
        self.txns
            .lock()
            .entry(txn.id())
            .or_insert_with(|| txn.clone());
    }

    // ---- deadlock detection ----

    /// One detection pass: rebuild the waits-for graph from every queue,
    /// then abort the youngest transaction on each cycle until none
    /// remain. Returns the victims, in abort order.
    pub fn detect_deadlocks(&self) -> Vec<TxnId> {
        let mut graph = self.waits_for.lock();
        let table_map = self.table_lock_map.lock();
        let row_map = self.row_lock_map.lock();

        graph.clear();
        for queue in table_map.values().chain(row_map.values()) {
            let queue_state = queue.state.lock();
            for (i, a) in queue_state.requests.iter().enumerate() {
                for b in queue_state.requests.iter().skip(i + 1) {
                    if a.txn_id == b.txn_id || a.mode.is_compatible(b.mode) {
                        continue;
                    }
                    if !a.granted && b.granted {
                        graph.add_edge(a.txn_id, b.txn_id);
                    }
                    if !b.granted && a.granted {
                        graph.add_edge(b.txn_id, a.txn_id);
                    }
                }
            }
        }

        let mut victims = Vec::new();
        while let Some(victim) = graph.find_cycle_victim() {
            log::debug!("deadlock detected; aborting txn {victim}");
            if let Some(txn) = self.txns.lock().get(&victim).cloned() {
                let mut inner = txn.inner();
                inner.state = TransactionState::Aborted;
                inner.clear_lock_sets();
            }
            graph.remove_txn(victim);
            for queue in table_map.values().chain(row_map.values()) {
                let mut queue_state = queue.state.lock();
                queue_state
                    .requests
                    .retain(|r| !(r.txn_id == victim && r.granted));
                queue.cv.notify_all();
            }
            victims.push(victim);
        }
        victims
    }

    /// Start the background detection task
    pub fn spawn_deadlock_detector(self: &Arc<Self>, interval: Duration) {
        if self.detector_enabled.swap(true, Ordering::SeqCst) {
            return;
        }
        let manager = Arc::clone(self);
        let handle = thread::spawn(move || {
            while manager.detector_enabled.load(Ordering::SeqCst) {
                thread::sleep(interval);
                if !manager.detector_enabled.load(Ordering::SeqCst) {
                    break;
                }
                manager.detect_deadlocks();
            }
        });
        *self.detector_handle.lock() = Some(handle);
    }

    pub fn stop_deadlock_detector(&self) {
        self.detector_enabled.store(false, Ordering::SeqCst);
        if let Some(handle) = self.detector_handle.lock().take() {
            let _ = handle.join();
        }
    }

    // ---- waits-for graph observers ----

    pub fn add_edge(&self, waiter: TxnId, holder: TxnId) {
        self.waits_for.lock().add_edge(waiter, holder);
    }

    pub fn remove_edge(&self, waiter: TxnId, holder: TxnId) {
        self.waits_for.lock().remove_edge(waiter, holder);
    }

    pub fn edge_list(&self) -> Vec<(TxnId, TxnId)> {
        self.waits_for.lock().edge_list()
    }

    pub fn find_cycle_victim(&self) -> Option<TxnId> {
        self.waits_for.lock().find_cycle_victim()
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.detector_enabled.store(false, Ordering::SeqCst);
        if let Some(handle) = self.detector_handle.lock().take() {
            let _ = handle.join();
        }
    }
}

/// Isolation-level policy on every lock acquisition
fn check_lock_policy(
    txn_id: TxnId,
    inner: &mut TransactionInner,
    isolation_level: IsolationLevel,
    mode: LockMode,
) -> Result<(), TransactionAbort> {
    match isolation_level {
        IsolationLevel::RepeatableRead => {
            if inner.state == TransactionState::Shrinking {
                inner.state = TransactionState::Aborted;
                return Err(TransactionAbort::new(txn_id, AbortReason::LockOnShrinking));
            }
        }
        IsolationLevel::ReadCommitted => {
            if inner.state == TransactionState::Shrinking
                && !matches!(mode, LockMode::Shared | LockMode::IntentionShared)
            {
                inner.state = TransactionState::Aborted;
                return Err(TransactionAbort::new(txn_id, AbortReason::LockOnShrinking));
            }
        }
        IsolationLevel::ReadUncommitted => {
            if !matches!(mode, LockMode::IntentionExclusive | LockMode::Exclusive) {
                inner.state = TransactionState::Aborted;
                return Err(TransactionAbort::new(
                    txn_id,
                    AbortReason::LockSharedOnReadUncommitted,
                ));
            }
            if inner.state == TransactionState::Shrinking {
                inner.state = TransactionState::Aborted;
                return Err(TransactionAbort::new(txn_id, AbortReason::LockOnShrinking));
            }
        }
    }
    Ok(())
}

/// Isolation-level 2PL transition on every lock release
fn apply_unlock_policy(
    txn_id: TxnId,
    inner: &mut TransactionInner,
    isolation_level: IsolationLevel,
    mode: LockMode,
) -> Result<(), TransactionAbort> {
    match isolation_level {
        IsolationLevel::RepeatableRead => {
            if matches!(mode, LockMode::Shared | LockMode::Exclusive)
                && inner.state == TransactionState::Growing
            {
                inner.state = TransactionState::Shrinking;
            }
        }
        IsolationLevel::ReadCommitted => {
            if mode == LockMode::Exclusive && inner.state == TransactionState::Growing {
                inner.state = TransactionState::Shrinking;
            }
        }
        IsolationLevel::ReadUncommitted => {
            if mode == LockMode::Exclusive && inner.state == TransactionState::Growing {
                inner.state = TransactionState::Shrinking;
            }
            if mode == LockMode::Shared {
                inner.state = TransactionState::Aborted;
                return Err(TransactionAbort::new(
                    txn_id,
                    AbortReason::LockSharedOnReadUncommitted,
                ));
            }
        }
    }
    Ok(())
}

fn add_row_lock(inner: &mut TransactionInner, mode: LockMode, oid: TableOid, rid: Rid) {
    match mode {
        LockMode::Shared => {
            inner.shared_row_locks.entry(oid).or_default().insert(rid);
        }
        LockMode::Exclusive => {
            inner.exclusive_row_locks.entry(oid).or_default().insert(rid);
        }
        _ => {}
    }
}

fn remove_row_lock(inner: &mut TransactionInner, mode: LockMode, oid: TableOid, rid: Rid) {
    match mode {
        LockMode::Shared => {
            if let Some(rows) = inner.shared_row_locks.get_mut(&oid) {
                rows.remove(&rid);
            }
        }
        LockMode::Exclusive => {
            if let Some(rows) = inner.exclusive_row_locks.get_mut(&oid) {
                rows.remove(&rid);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compatibility_matrix() {
        use LockMode::*;
        let modes = [
            IntentionShared,
            IntentionExclusive,
            Shared,
            SharedIntentionExclusive,
            Exclusive,
        ];
        // Row-major truth table in the order above
        let expected = [
            [true, true, true, true, false],
            [true, true, false, false, false],
            [true, false, true, false, false],
            [true, false, false, false, false],
            [false, false, false, false, false],
        ];
        for (i, &a) in modes.iter().enumerate() {
            for (j, &b) in modes.iter().enumerate() {
                assert_eq!(
                    a.is_compatible(b),
                    expected[i][j],
                    "compatibility of {a:?} with {b:?}"
                );
                assert_eq!(a.is_compatible(b), b.is_compatible(a));
            }
        }
    }

    #[test]
    fn test_upgrade_lattice_is_strict() {
        use LockMode::*;
        assert!(IntentionShared.can_upgrade_to(Shared));
        assert!(IntentionShared.can_upgrade_to(IntentionExclusive));
        assert!(IntentionShared.can_upgrade_to(SharedIntentionExclusive));
        assert!(IntentionShared.can_upgrade_to(Exclusive));
        assert!(Shared.can_upgrade_to(Exclusive));
        assert!(Shared.can_upgrade_to(SharedIntentionExclusive));
        assert!(IntentionExclusive.can_upgrade_to(Exclusive));
        assert!(IntentionExclusive.can_upgrade_to(SharedIntentionExclusive));
        assert!(SharedIntentionExclusive.can_upgrade_to(Exclusive));

        assert!(!Shared.can_upgrade_to(IntentionExclusive));
        assert!(!Shared.can_upgrade_to(IntentionShared));
        assert!(!IntentionExclusive.can_upgrade_to(Shared));
        assert!(!SharedIntentionExclusive.can_upgrade_to(Shared));
        assert!(!Exclusive.can_upgrade_to(Shared));
        for mode in [
            IntentionShared,
            IntentionExclusive,
            Shared,
            SharedIntentionExclusive,
            Exclusive,
        ] {
            assert!(!mode.can_upgrade_to(mode));
        }
    }

    #[test]
    fn test_whole_prefix_grants_together() {
        // S granted, X waiting, then S: the trailing S is not grantable
        // past the incompatible X even though it is compatible with the
        // granted S.
        let mut requests = VecDeque::new();
        requests.push_back(LockRequest {
            txn_id: 1,
            mode: LockMode::Shared,
            oid: 1,
            rid: None,
            granted: true,
        });
        requests.push_back(LockRequest {
            txn_id: 2,
            mode: LockMode::Exclusive,
            oid: 1,
            rid: None,
            granted: false,
        });
        requests.push_back(LockRequest {
            txn_id: 3,
            mode: LockMode::Shared,
            oid: 1,
            rid: None,
            granted: false,
        });
        assert!(!grantable(&requests, 1));
        assert!(!grantable(&requests, 2));

        // Once the granted S leaves, the X and everything compatible
        // behind it resolves in one pass.
        requests.pop_front();
        assert!(grantable(&requests, 0));
        assert!(!grantable(&requests, 1));
    }
}
