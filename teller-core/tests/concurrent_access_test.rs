//! Concurrent access tests
//!
//! Two commits that read the same balance must not both debit it. These
//! tests race transfers from several threads against one ledger and check
//! that no money is created or lost and no balance goes negative.
//!
//! Run with: cargo test --test concurrent_access_test -- --nocapture

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use rust_decimal::Decimal;
use tempfile::TempDir;

use teller_core::adapters::duckdb::DuckDbRepository;
use teller_core::adapters::{MemoryNotifier, OutboxNotifier, SystemClock};
use teller_core::config::{Config, SETTINGS_FILE};
use teller_core::domain::{Identity, TransferCompletion, TransferRequest};
use teller_core::services::EntryPoint;
use teller_core::{Error, TellerContext};

const NO_OTP: &str = r#"{
    "otp": { "enabled": false, "hashMemoryKib": 64, "hashIterations": 1 },
    "auth": { "hashMemoryKib": 64, "hashIterations": 1 }
}"#;

/// Number of concurrent threads for stress tests
const THREAD_COUNT: usize = 6;

/// Number of transfers per thread
const ITERATIONS_PER_THREAD: usize = 5;

struct Setup {
    ctx: Arc<TellerContext>,
    ann: Identity,
    ann_account: String,
    bob_account: String,
}

fn setup(opening_balance: &str) -> Setup {
    let repository = Arc::new(DuckDbRepository::open_in_memory().unwrap());
    repository.ensure_schema().unwrap();
    let config = Config::from_json(NO_OTP, |_| None).unwrap();
    let ctx = TellerContext::with_parts(
        repository,
        config,
        Arc::new(MemoryNotifier::new()),
        Arc::new(SystemClock),
        None,
    );

    let admin = ctx
        .user_service
        .register_admin("ops@bank.test", "Ops", "admin-password")
        .unwrap()
        .identity();
    let ann = ctx
        .user_service
        .register("ann@example.com", "Ann", "long-enough-password", None)
        .unwrap();
    let bob = ctx
        .user_service
        .register("bob@example.com", "Bob", "long-enough-password", None)
        .unwrap();
    let ann_account = ann.accounts[0].account_number.clone();
    ctx.transfer_service
        .deposit(&admin, &ann_account, opening_balance, None)
        .unwrap();

    Setup {
        ctx: Arc::new(ctx),
        ann: ann.identity(),
        ann_account,
        bob_account: bob.accounts[0].account_number.clone(),
    }
}

fn balance(ctx: &TellerContext, account: &str) -> Decimal {
    ctx.repository
        .read(|s| s.find_account(account))
        .unwrap()
        .unwrap()
        .balance
}

fn transfer(to: &str, amount: &str) -> TransferCompletion {
    TransferCompletion {
        otp: None,
        request: TransferRequest {
            to_account: to.to_string(),
            amount: amount.to_string(),
            transfer_type: "internal".to_string(),
            ..Default::default()
        },
    }
}

/// Test: two transfers of 60 race against a balance of 100.
///
/// Both pass initiation; exactly one may commit.
#[test]
fn test_double_spend_is_prevented() {
    let s = setup("100");
    let barrier = Arc::new(Barrier::new(2));
    let successes = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let ctx = Arc::clone(&s.ctx);
            let barrier = Arc::clone(&barrier);
            let successes = Arc::clone(&successes);
            let ann = s.ann.clone();
            let completion = transfer(&s.bob_account, "60");
            thread::spawn(move || {
                ctx.transfer_service
                    .initiate(&ann, &completion.request)
                    .unwrap();
                barrier.wait();
                match ctx.transfer_service.complete(&ann, &completion) {
                    Ok(_) => {
                        successes.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(Error::InsufficientFunds { .. }) | Err(Error::Conflict(_)) => {}
                    Err(other) => panic!("unexpected error: {}", other),
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(successes.load(Ordering::SeqCst), 1);
    assert_eq!(balance(&s.ctx, &s.ann_account), Decimal::new(40, 0));
    assert_eq!(balance(&s.ctx, &s.bob_account), Decimal::new(60, 0));
    assert!(s.ctx.doctor_service.run_checks().unwrap().is_healthy());
}

/// Test: the source account changes between the commit's read and its
/// balance write.
///
/// A second connection holds an uncommitted version bump on the account
/// while the transfer commits. The commit must fail as a conflict and
/// leave no transaction or receipt behind.
#[test]
fn test_commit_fails_when_account_version_moves() {
    let s = setup("100");
    let before = s.ctx.repository.read(|store| store.counts()).unwrap();
    let other = s.ctx.repository.try_clone().unwrap();

    other
        .in_transaction(|store| {
            let account = store.find_account(&s.ann_account)?.unwrap();
            store.update_balance(&s.ann_account, account.balance, account.version)?;

            let result = s
                .ctx
                .transfer_service
                .complete(&s.ann, &transfer(&s.bob_account, "30"));
            assert!(matches!(result, Err(Error::Conflict(_))), "{:?}", result);
            Ok(())
        })
        .unwrap();

    let after = s.ctx.repository.read(|store| store.counts()).unwrap();
    assert_eq!(after.transactions, before.transactions);
    assert_eq!(after.receipts, before.receipts);
    assert_eq!(balance(&s.ctx, &s.ann_account), Decimal::new(100, 0));
    assert_eq!(balance(&s.ctx, &s.bob_account), Decimal::ZERO);

    // The losing caller can simply retry
    s.ctx
        .transfer_service
        .complete(&s.ann, &transfer(&s.bob_account, "30"))
        .unwrap();
    assert_eq!(balance(&s.ctx, &s.ann_account), Decimal::new(70, 0));
    assert!(s.ctx.doctor_service.run_checks().unwrap().is_healthy());
}

/// Test: only one of several simultaneous bootstrap registrations
/// creates an administrator
#[test]
fn test_single_admin_under_concurrent_registration() {
    let repository = Arc::new(DuckDbRepository::open_in_memory().unwrap());
    repository.ensure_schema().unwrap();
    let config = Config::from_json(NO_OTP, |_| None).unwrap();
    let ctx = Arc::new(TellerContext::with_parts(
        repository,
        config,
        Arc::new(MemoryNotifier::new()),
        Arc::new(SystemClock),
        None,
    ));
    let barrier = Arc::new(Barrier::new(THREAD_COUNT));

    let handles: Vec<_> = (0..THREAD_COUNT)
        .map(|thread_id| {
            let ctx = Arc::clone(&ctx);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let email = format!("ops{}@bank.test", thread_id);
                match ctx.user_service.register_admin(&email, "Ops", "admin-password") {
                    Ok(_) => true,
                    Err(Error::Forbidden(_)) => false,
                    Err(other) => panic!("thread {}: {}", thread_id, other),
                }
            })
        })
        .collect();
    let created = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .filter(|created| *created)
        .count();

    assert_eq!(created, 1);
    assert_eq!(ctx.repository.read(|store| store.count_admins()).unwrap(), 1);
}

/// Test: many threads drain one account in small transfers.
///
/// Money is conserved and the number of successful commits is exactly
/// what the opening balance allows.
#[test]
fn test_concurrent_transfers_conserve_money() {
    let s = setup("100");
    let barrier = Arc::new(Barrier::new(THREAD_COUNT));
    let successes = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..THREAD_COUNT)
        .map(|thread_id| {
            let ctx = Arc::clone(&s.ctx);
            let barrier = Arc::clone(&barrier);
            let successes = Arc::clone(&successes);
            let ann = s.ann.clone();
            let completion = transfer(&s.bob_account, "10");
            thread::spawn(move || {
                barrier.wait();
                for i in 0..ITERATIONS_PER_THREAD {
                    match ctx.transfer_service.complete(&ann, &completion) {
                        Ok(outcome) => {
                            assert!(outcome.new_balance >= Decimal::ZERO);
                            successes.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(Error::InsufficientFunds { .. }) | Err(Error::Conflict(_)) => {}
                        Err(other) => panic!("thread {} iteration {}: {}", thread_id, i, other),
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(successes.load(Ordering::SeqCst), 10);
    assert_eq!(balance(&s.ctx, &s.ann_account), Decimal::ZERO);
    assert_eq!(balance(&s.ctx, &s.bob_account), Decimal::new(100, 0));

    let doctor = s.ctx.doctor_service.run_checks().unwrap();
    assert!(doctor.is_healthy(), "{:?}", doctor.checks);
}

/// Test: the ledger survives closing and reopening the database file,
/// and a reopened file does not re-run its migrations
#[test]
fn test_reopen_keeps_ledger() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(temp_dir.path().join(SETTINGS_FILE), NO_OTP).unwrap();

    let (account, reference) = {
        let ctx = TellerContext::new(temp_dir.path(), EntryPoint::Library).unwrap();
        let admin = ctx
            .user_service
            .register_admin("ops@bank.test", "Ops", "admin-password")
            .unwrap()
            .identity();
        let user = ctx
            .user_service
            .register("ann@example.com", "Ann", "long-enough-password", None)
            .unwrap();
        let account = user.accounts[0].account_number.clone();
        let outcome = ctx
            .transfer_service
            .deposit(&admin, &account, "250.75", None)
            .unwrap();
        (account, outcome.reference)
    };

    for _ in 0..3 {
        let ctx = TellerContext::new(temp_dir.path(), EntryPoint::Library).unwrap();
        assert!(ctx.repository.run_migrations().unwrap().applied.is_empty());
        assert_eq!(balance(&ctx, &account), Decimal::new(25075, 2));
        assert!(ctx.repository.get_db_size().unwrap() > 0);

        let events = ctx.logging_service.as_ref().unwrap();
        let trail = events.get_for_reference(&reference).unwrap();
        assert!(trail.iter().any(|e| e.event == "deposit_completed"));
    }

    let outbox = OutboxNotifier::new(temp_dir.path().join("outbox"));
    let messages = outbox.list().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].to, "ann@example.com");
    assert!(messages[0].body.contains("250.75"));
}
