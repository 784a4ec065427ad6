use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;

use talusdb::common::types::Rid;
use talusdb::transaction::{
    AbortReason, IsolationLevel, LockManager, LockMode, Transaction, TransactionState,
};

const TABLE_A: u32 = 1;
const TABLE_B: u32 = 2;

fn repeatable_read(id: u32) -> Arc<Transaction> {
    let _ = env_logger::builder().is_test(true).try_init();
    Arc::new(Transaction::new(id, IsolationLevel::RepeatableRead))
}

#[test]
fn test_table_lock_unlock_roundtrip() -> Result<()> {
    let lm = LockManager::new();
    let t1 = repeatable_read(1);

    assert!(lm.lock_table(&t1, LockMode::Shared, TABLE_A)?);
    assert_eq!(t1.held_table_lock(TABLE_A), Some(LockMode::Shared));
    // Re-requesting the held mode succeeds immediately
    assert!(lm.lock_table(&t1, LockMode::Shared, TABLE_A)?);

    assert!(lm.unlock_table(&t1, TABLE_A)?);
    assert_eq!(t1.held_table_lock(TABLE_A), None);
    // Unlocking S under REPEATABLE_READ begins the shrinking phase
    assert_eq!(t1.state(), TransactionState::Shrinking);
    Ok(())
}

#[test]
fn test_compatible_modes_granted_concurrently() -> Result<()> {
    let lm = LockManager::new();
    let t1 = repeatable_read(1);
    let t2 = repeatable_read(2);

    assert!(lm.lock_table(&t1, LockMode::IntentionExclusive, TABLE_A)?);
    assert!(lm.lock_table(&t2, LockMode::IntentionExclusive, TABLE_A)?);
    assert_eq!(
        t1.held_table_lock(TABLE_A),
        Some(LockMode::IntentionExclusive)
    );
    assert_eq!(
        t2.held_table_lock(TABLE_A),
        Some(LockMode::IntentionExclusive)
    );
    Ok(())
}

#[test]
fn test_row_lock_requires_table_lock() -> Result<()> {
    let lm = LockManager::new();
    let t1 = repeatable_read(1);
    let rid = Rid::new(3, 7);

    let err = lm.lock_row(&t1, LockMode::Exclusive, TABLE_A, rid).unwrap_err();
    assert_eq!(err.reason, AbortReason::TableLockNotPresent);
    assert_eq!(t1.state(), TransactionState::Aborted);

    // An IS table lock does not cover a row X lock either
    let t2 = repeatable_read(2);
    let lm2 = LockManager::new();
    assert!(lm2.lock_table(&t2, LockMode::IntentionShared, TABLE_A)?);
    let err = lm2
        .lock_row(&t2, LockMode::Exclusive, TABLE_A, rid)
        .unwrap_err();
    assert_eq!(err.reason, AbortReason::TableLockNotPresent);

    // But it does cover a row S lock
    let t3 = repeatable_read(3);
    let lm3 = LockManager::new();
    assert!(lm3.lock_table(&t3, LockMode::IntentionShared, TABLE_A)?);
    assert!(lm3.lock_row(&t3, LockMode::Shared, TABLE_A, rid)?);
    Ok(())
}

#[test]
fn test_intention_lock_on_row_aborts() -> Result<()> {
    let lm = LockManager::new();
    let t1 = repeatable_read(1);
    lm.lock_table(&t1, LockMode::IntentionExclusive, TABLE_A)?;

    let err = lm
        .lock_row(&t1, LockMode::IntentionExclusive, TABLE_A, Rid::new(1, 1))
        .unwrap_err();
    assert_eq!(err.reason, AbortReason::AttemptedIntentionLockOnRow);
    assert_eq!(t1.state(), TransactionState::Aborted);
    Ok(())
}

#[test]
fn test_unlock_without_lock_aborts() -> Result<()> {
    let lm = LockManager::new();
    let t1 = repeatable_read(1);

    let err = lm.unlock_table(&t1, TABLE_A).unwrap_err();
    assert_eq!(err.reason, AbortReason::AttemptedUnlockButNoLockHeld);
    Ok(())
}

#[test]
fn test_unlock_table_before_rows_aborts() -> Result<()> {
    let lm = LockManager::new();
    let t1 = repeatable_read(1);
    let rid = Rid::new(2, 5);

    lm.lock_table(&t1, LockMode::IntentionExclusive, TABLE_A)?;
    lm.lock_row(&t1, LockMode::Exclusive, TABLE_A, rid)?;

    let err = lm.unlock_table(&t1, TABLE_A).unwrap_err();
    assert_eq!(err.reason, AbortReason::TableUnlockedBeforeUnlockingRows);
    Ok(())
}

#[test]
fn test_lock_on_shrinking_aborts() -> Result<()> {
    let lm = LockManager::new();
    let t1 = repeatable_read(1);

    lm.lock_table(&t1, LockMode::Shared, TABLE_A)?;
    lm.unlock_table(&t1, TABLE_A)?;
    assert_eq!(t1.state(), TransactionState::Shrinking);

    let err = lm.lock_table(&t1, LockMode::Shared, TABLE_B).unwrap_err();
    assert_eq!(err.reason, AbortReason::LockOnShrinking);
    assert_eq!(t1.state(), TransactionState::Aborted);
    Ok(())
}

#[test]
fn test_read_committed_allows_shared_while_shrinking() -> Result<()> {
    let lm = LockManager::new();
    let t1 = Arc::new(Transaction::new(1, IsolationLevel::ReadCommitted));

    lm.lock_table(&t1, LockMode::Exclusive, TABLE_A)?;
    lm.unlock_table(&t1, TABLE_A)?;
    assert_eq!(t1.state(), TransactionState::Shrinking);

    // S and IS stay legal in the shrinking phase under READ_COMMITTED
    assert!(lm.lock_table(&t1, LockMode::Shared, TABLE_B)?);
    assert!(lm.lock_table(&t1, LockMode::IntentionShared, TABLE_A)?);

    // Anything stronger aborts
    let err = lm
        .lock_table(&t1, LockMode::IntentionExclusive, TABLE_B)
        .unwrap_err();
    assert_eq!(err.reason, AbortReason::LockOnShrinking);
    Ok(())
}

#[test]
fn test_read_uncommitted_rejects_shared() -> Result<()> {
    let lm = LockManager::new();
    let t1 = Arc::new(Transaction::new(1, IsolationLevel::ReadUncommitted));

    let err = lm.lock_table(&t1, LockMode::Shared, TABLE_A).unwrap_err();
    assert_eq!(err.reason, AbortReason::LockSharedOnReadUncommitted);

    let t2 = Arc::new(Transaction::new(2, IsolationLevel::ReadUncommitted));
    assert!(lm.lock_table(&t2, LockMode::IntentionExclusive, TABLE_A)?);
    assert!(lm.lock_row(&t2, LockMode::Exclusive, TABLE_A, Rid::new(1, 1))?);
    Ok(())
}

#[test]
fn test_upgrade_held_lock() -> Result<()> {
    let lm = LockManager::new();
    let t1 = repeatable_read(1);

    lm.lock_table(&t1, LockMode::IntentionShared, TABLE_A)?;
    assert!(lm.lock_table(&t1, LockMode::Exclusive, TABLE_A)?);
    assert_eq!(t1.held_table_lock(TABLE_A), Some(LockMode::Exclusive));
    Ok(())
}

#[test]
fn test_incompatible_upgrade_aborts() -> Result<()> {
    let lm = LockManager::new();
    let t1 = repeatable_read(1);

    lm.lock_table(&t1, LockMode::Exclusive, TABLE_A)?;
    let err = lm.lock_table(&t1, LockMode::Shared, TABLE_A).unwrap_err();
    assert_eq!(err.reason, AbortReason::IncompatibleUpgrade);
    assert_eq!(t1.state(), TransactionState::Aborted);
    Ok(())
}

#[test]
fn test_upgrade_conflict_aborts_second_upgrader() -> Result<()> {
    let lm = Arc::new(LockManager::new());
    let t1 = repeatable_read(1);
    let t2 = repeatable_read(2);

    assert!(lm.lock_table(&t1, LockMode::Shared, TABLE_A)?);
    assert!(lm.lock_table(&t2, LockMode::Shared, TABLE_A)?);

    // T1's upgrade to X blocks behind T2's granted S
    let upgrader = {
        let lm = Arc::clone(&lm);
        let t1 = Arc::clone(&t1);
        thread::spawn(move || lm.lock_table(&t1, LockMode::Exclusive, TABLE_A))
    };
    // Give the upgrade time to take the upgrading slot
    thread::sleep(Duration::from_millis(100));

    let err = lm.lock_table(&t2, LockMode::Exclusive, TABLE_A).unwrap_err();
    assert_eq!(err.reason, AbortReason::UpgradeConflict);
    assert_eq!(t2.state(), TransactionState::Aborted);

    // T2's death releases its S lock and unblocks the upgrade
    lm.release_all_locks(&t2);
    let granted = upgrader.join().expect("upgrader thread panicked")?;
    assert!(granted);
    assert_eq!(t1.held_table_lock(TABLE_A), Some(LockMode::Exclusive));
    Ok(())
}

#[test]
fn test_row_writers_block_without_cycle() -> Result<()> {
    // Two IX holders race for the same row X lock: the second waits, the
    // detector finds no cycle, and the unlock hands the row over.
    let lm = Arc::new(LockManager::new());
    let t1 = repeatable_read(1);
    let t2 = repeatable_read(2);
    let rid = Rid::new(4, 2);

    assert!(lm.lock_table(&t1, LockMode::IntentionExclusive, TABLE_A)?);
    assert!(lm.lock_table(&t2, LockMode::IntentionExclusive, TABLE_A)?);
    assert!(lm.lock_row(&t1, LockMode::Exclusive, TABLE_A, rid)?);

    let waiter = {
        let lm = Arc::clone(&lm);
        let t2 = Arc::clone(&t2);
        thread::spawn(move || lm.lock_row(&t2, LockMode::Exclusive, TABLE_A, rid))
    };
    thread::sleep(Duration::from_millis(100));

    // No cycle: nobody is aborted
    assert!(lm.detect_deadlocks().is_empty());
    assert_eq!(t1.state(), TransactionState::Growing);
    assert_eq!(t2.state(), TransactionState::Growing);

    assert!(lm.unlock_row(&t1, TABLE_A, rid)?);
    let granted = waiter.join().expect("waiter thread panicked")?;
    assert!(granted);
    assert_eq!(t2.held_row_lock(TABLE_A, rid), Some(LockMode::Exclusive));
    Ok(())
}

#[test]
fn test_deadlock_detector_aborts_youngest() -> Result<()> {
    // T1 holds r1 and wants r2; T2 holds r2 and wants r1. The detector
    // must abort T2, the youngest on the cycle, and leave T1 to finish.
    let lm = Arc::new(LockManager::new());
    let t1 = repeatable_read(1);
    let t2 = repeatable_read(2);
    let r1 = Rid::new(10, 0);
    let r2 = Rid::new(10, 1);

    assert!(lm.lock_table(&t1, LockMode::IntentionExclusive, TABLE_A)?);
    assert!(lm.lock_table(&t2, LockMode::IntentionExclusive, TABLE_A)?);
    assert!(lm.lock_row(&t1, LockMode::Exclusive, TABLE_A, r1)?);
    assert!(lm.lock_row(&t2, LockMode::Exclusive, TABLE_A, r2)?);

    let first_waiter = {
        let lm = Arc::clone(&lm);
        let t1 = Arc::clone(&t1);
        thread::spawn(move || lm.lock_row(&t1, LockMode::Exclusive, TABLE_A, r2))
    };
    let second_waiter = {
        let lm = Arc::clone(&lm);
        let t2 = Arc::clone(&t2);
        thread::spawn(move || lm.lock_row(&t2, LockMode::Exclusive, TABLE_A, r1))
    };

    // Let both waiters block, then run detection until the cycle breaks
    let mut victims = Vec::new();
    for _ in 0..50 {
        thread::sleep(Duration::from_millis(50));
        victims = lm.detect_deadlocks();
        if !victims.is_empty() {
            break;
        }
    }
    assert_eq!(victims, vec![2]);

    // The victim's waiter observes the abort; the survivor is granted
    let t2_granted = second_waiter.join().expect("t2 waiter panicked")?;
    assert!(!t2_granted);
    assert_eq!(t2.state(), TransactionState::Aborted);

    let t1_granted = first_waiter.join().expect("t1 waiter panicked")?;
    assert!(t1_granted);
    assert_eq!(t1.held_row_lock(TABLE_A, r2), Some(LockMode::Exclusive));
    Ok(())
}

#[test]
fn test_background_detector_resolves_deadlock() -> Result<()> {
    let lm = Arc::new(LockManager::new());
    lm.spawn_deadlock_detector(Duration::from_millis(25));

    let t1 = repeatable_read(1);
    let t2 = repeatable_read(2);
    let r1 = Rid::new(20, 0);
    let r2 = Rid::new(20, 1);

    assert!(lm.lock_table(&t1, LockMode::IntentionExclusive, TABLE_A)?);
    assert!(lm.lock_table(&t2, LockMode::IntentionExclusive, TABLE_A)?);
    assert!(lm.lock_row(&t1, LockMode::Exclusive, TABLE_A, r1)?);
    assert!(lm.lock_row(&t2, LockMode::Exclusive, TABLE_A, r2)?);

    let first = {
        let lm = Arc::clone(&lm);
        let t1 = Arc::clone(&t1);
        thread::spawn(move || lm.lock_row(&t1, LockMode::Exclusive, TABLE_A, r2))
    };
    let second = {
        let lm = Arc::clone(&lm);
        let t2 = Arc::clone(&t2);
        thread::spawn(move || lm.lock_row(&t2, LockMode::Exclusive, TABLE_A, r1))
    };

    assert!(first.join().expect("t1 waiter panicked")?);
    assert!(!second.join().expect("t2 waiter panicked")?);
    assert_eq!(t2.state(), TransactionState::Aborted);

    lm.stop_deadlock_detector();
    Ok(())
}

#[test]
fn test_waits_for_graph_observers() {
    let lm = LockManager::new();
    lm.add_edge(1, 2);
    lm.add_edge(2, 3);
    lm.add_edge(3, 1);
    lm.add_edge(3, 1);
    assert_eq!(lm.edge_list(), vec![(1, 2), (2, 3), (3, 1)]);
    assert_eq!(lm.find_cycle_victim(), Some(3));

    lm.remove_edge(3, 1);
    assert_eq!(lm.find_cycle_victim(), None);
    assert_eq!(lm.edge_list(), vec![(1, 2), (2, 3)]);
}

#[test]
fn test_release_all_locks_unblocks_waiters() -> Result<()> {
    let lm = Arc::new(LockManager::new());
    let t1 = repeatable_read(1);
    let t2 = repeatable_read(2);

    assert!(lm.lock_table(&t1, LockMode::Exclusive, TABLE_A)?);
    let waiter = {
        let lm = Arc::clone(&lm);
        let t2 = Arc::clone(&t2);
        thread::spawn(move || lm.lock_table(&t2, LockMode::Exclusive, TABLE_A))
    };
    thread::sleep(Duration::from_millis(100));

    t1.set_state(TransactionState::Committed);
    lm.release_all_locks(&t1);

    assert!(waiter.join().expect("waiter panicked")?);
    assert_eq!(t2.held_table_lock(TABLE_A), Some(LockMode::Exclusive));
    Ok(())
}
