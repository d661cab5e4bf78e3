//! Monitor mutual exclusion tests.
//!
//! Concurrent entries into one monitor are serialized: no update is lost, no
//! two threads observe the state at once, and every exit path releases the
//! monitor.

#[macro_use]
mod common;

use common::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use threadtools::{Branch, ErrorKind, Monitor, Result};

#[derive(Debug, Default)]
struct Account {
    balance: i64,
    transfers: u64,
}

impl Account {
    fn deposit(&mut self, amount: i64) {
        self.balance += amount;
        self.transfers += 1;
    }

    fn withdraw(&mut self, amount: i64) -> bool {
        if self.balance < amount {
            return false;
        }
        self.balance -= amount;
        self.transfers += 1;
        true
    }

    fn balance(&self) -> i64 {
        self.balance
    }
}

threadtools::monitor_methods! {
    trait AccountMethods for Account {
        fn deposit(&mut self, amount: i64);
        fn withdraw(&mut self, amount: i64) -> bool;
        fn balance(&self) -> i64;
    }
}

#[test]
fn concurrent_deposits_are_not_lost() {
    init_test("concurrent_deposits_are_not_lost");
    let account = Monitor::new(Account::default());
    let branch: Branch = Branch::new();
    branch
        .run(|scope| {
            for _ in 0..8 {
                scope.add(|_| -> Result<()> {
                    for _ in 0..500 {
                        account.deposit(1)?;
                    }
                    Ok(())
                })?;
            }
            Ok(())
        })
        .expect("branch failed");

    let balance = account.balance().unwrap();
    assert_with_log!(balance == 4000, "every deposit counted", 4000, balance);
    assert_eq!(account.into_inner().transfers, 4000);
    test_complete!("concurrent_deposits_are_not_lost");
}

#[test]
fn guard_is_exclusive() {
    init_test("guard_is_exclusive");
    let state = Monitor::new(0u32);
    let inside = AtomicUsize::new(0);
    let overlap = AtomicBool::new(false);

    std::thread::scope(|s| {
        for _ in 0..6 {
            s.spawn(|| {
                for _ in 0..200 {
                    state
                        .enter(|guard| {
                            if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                                overlap.store(true, Ordering::SeqCst);
                            }
                            **guard += 1;
                            inside.fetch_sub(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .expect("enter failed");
                }
            });
        }
    });

    assert!(!overlap.load(Ordering::SeqCst), "two threads held the monitor");
    assert_eq!(state.into_inner(), 1200);
    test_complete!("guard_is_exclusive");
}

#[test]
fn failed_operation_keeps_partial_state_and_releases() {
    init_test("failed_operation_keeps_partial_state_and_releases");
    let account = Monitor::new(Account::default());
    account.deposit(10).unwrap();

    let err = account
        .enter(|guard| {
            guard.deposit(5);
            if !guard.withdraw(100) {
                return Err(app_error("insufficient funds"));
            }
            Ok(())
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::User);
    assert_eq!(err.source_as::<AppError>(), Some(&AppError("insufficient funds")));
    assert!(!account.is_locked());
    assert_eq!(account.balance().unwrap(), 15);
    test_complete!("failed_operation_keeps_partial_state_and_releases");
}

#[test]
fn blocked_entrant_proceeds_after_release() {
    init_test("blocked_entrant_proceeds_after_release");
    let account = Arc::new(Monitor::new(Account::default()));
    let guard = account.lock().unwrap();

    let entrant = {
        let account = Arc::clone(&account);
        std::thread::spawn(move || account.deposit(3))
    };
    assert!(wait_until(Duration::from_secs(5), || account.space().contended() == 1));
    drop(guard);

    entrant.join().expect("entrant panicked").unwrap();
    assert_eq!(account.balance().unwrap(), 3);
    assert_eq!(account.space().contended(), 0);
    test_complete!("blocked_entrant_proceeds_after_release");
}

#[test]
fn contention_longer_than_deadlock_delay_is_not_a_deadlock() {
    init_test("contention_longer_than_deadlock_delay_is_not_a_deadlock");
    let account = Arc::new(Monitor::new(Account::default()));
    let guard = account.lock().unwrap();

    let entrant = {
        let account = Arc::clone(&account);
        std::thread::spawn(move || account.deposit(1))
    };
    // Long enough for the entrant to register in the wait-for graph.
    std::thread::sleep(TEST_DEADLOCK_DELAY * 4);
    drop(guard);

    entrant.join().expect("entrant panicked").unwrap();
    assert_eq!(account.balance().unwrap(), 1);
    test_complete!("contention_longer_than_deadlock_delay_is_not_a_deadlock");
}

#[test]
fn monitors_in_one_space_move_state_atomically() {
    init_test("monitors_in_one_space_move_state_atomically");
    let checking = Monitor::new(Account {
        balance: 100,
        transfers: 0,
    });
    let savings = Monitor::new_in(checking.space(), Account::default());
    assert_eq!(checking.id(), savings.id());

    let torn = AtomicBool::new(false);
    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..25 {
                    checking
                        .enter(|from| {
                            savings.enter(|to| {
                                assert!(to.is_nested());
                                from.withdraw(1);
                                to.deposit(1);
                                Ok(())
                            })
                        })
                        .unwrap();
                }
            });
        }
        s.spawn(|| {
            for _ in 0..50 {
                // Entering in the other order never deadlocks: one space.
                let total = savings
                    .enter(|to| checking.enter(|from| Ok(from.balance + to.balance)))
                    .unwrap();
                if total != 100 {
                    torn.store(true, Ordering::SeqCst);
                }
            }
        });
    });

    assert!(!torn.load(Ordering::SeqCst), "observed a half-finished transfer");
    assert_eq!(checking.balance().unwrap(), 0);
    assert_eq!(savings.balance().unwrap(), 100);
    test_complete!("monitors_in_one_space_move_state_atomically");
}

#[test]
fn holding_one_monitor_of_a_space_blocks_its_sibling() {
    init_test("holding_one_monitor_of_a_space_blocks_its_sibling");
    let first = Arc::new(Monitor::new(Account::default()));
    let second = Arc::new(first.lock().unwrap().new_monitor(Account::default()));
    let guard = first.lock().unwrap();

    let entrant = {
        let second = Arc::clone(&second);
        std::thread::spawn(move || second.deposit(5))
    };
    assert!(wait_until(Duration::from_secs(5), || first.space().contended() == 1));
    drop(guard);

    entrant.join().expect("entrant panicked").unwrap();
    assert_eq!(second.balance().unwrap(), 5);
    test_complete!("holding_one_monitor_of_a_space_blocks_its_sibling");
}
