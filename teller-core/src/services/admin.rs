//! Administrative ledger tools
//!
//! Backdating, audited deletion with archival, restore, and reconciliation
//! of cached balances against the transaction log. Every operation requires
//! the admin role and runs as one unit of work.

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::adapters::duckdb::{DuckDbRepository, LedgerStore};
use crate::domain::result::{Error, Result};
use crate::domain::{DeletedTransaction, Identity, Receipt, Transaction};
use crate::ports::Clock;
use crate::services::logging::{LogEvent, LoggingService};
use crate::services::summary::SummaryService;

/// What a reconciliation found and fixed for one account
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub account_number: String,
    pub recorded_balance: Decimal,
    pub ledger_total: Decimal,
    pub previous_summary_balance: Option<Decimal>,
    pub balance_repaired: bool,
    pub summary_repaired: bool,
    /// The ledger sums below zero; the balance was left alone
    pub negative_ledger: bool,
}

impl ReconcileReport {
    pub fn was_consistent(&self) -> bool {
        !self.balance_repaired && !self.summary_repaired && !self.negative_ledger
    }
}

pub struct AdminService {
    repository: Arc<DuckDbRepository>,
    clock: Arc<dyn Clock>,
    events: Option<Arc<LoggingService>>,
}

impl AdminService {
    pub fn new(repository: Arc<DuckDbRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repository,
            clock,
            events: None,
        }
    }

    pub fn with_event_log(mut self, events: Arc<LoggingService>) -> Self {
        self.events = Some(events);
        self
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(6)
    }

    fn audit(&self, event: LogEvent) {
        if let Some(events) = &self.events {
            events.record(event);
        }
    }

    fn load(store: &LedgerStore<'_>, transaction_id: Uuid) -> Result<Transaction> {
        store
            .find_transaction(transaction_id)?
            .ok_or_else(|| Error::not_found(format!("transaction {}", transaction_id)))
    }

    /// Look up any live transaction by its reference
    pub fn find_by_reference(&self, identity: &Identity, reference: &str) -> Result<Transaction> {
        identity.require_admin()?;
        self.repository
            .read(|store| store.find_transaction_by_reference(reference.trim()))?
            .ok_or_else(|| Error::not_found(format!("reference {}", reference)))
    }

    /// Move a transaction's date into the past.
    ///
    /// The receipt follows the transaction; the summary's last activity is
    /// stamped with the time of the change.
    pub fn backdate(
        &self,
        identity: &Identity,
        transaction_id: Uuid,
        new_date: DateTime<Utc>,
    ) -> Result<Transaction> {
        identity.require_admin()?;
        let now = self.now();
        let new_date = new_date.trunc_subsecs(6);

        let tx = self.repository.in_transaction(|store| {
            let mut tx = Self::load(store, transaction_id)?;
            tx.backdate(new_date, identity.user_id, now)?;
            store.update_transaction_dates(&tx)?;
            store.update_receipt_date(tx.id, tx.created_at)?;
            store.touch_summary_last_transaction(&tx.account_number, now)?;
            Ok(tx)
        })?;

        log::info!(
            "Transaction {} backdated to {} by {}",
            tx.reference,
            tx.created_at,
            identity.user_id
        );
        self.audit(
            LogEvent::new("transaction_backdated")
                .with_user(identity.user_id)
                .with_account(&tx.account_number)
                .with_reference(&tx.reference),
        );
        Ok(tx)
    }

    /// Remove a transaction and its receipt, keeping an archival copy.
    ///
    /// The account balance is not touched; `reconcile` realigns it.
    pub fn delete(
        &self,
        identity: &Identity,
        transaction_id: Uuid,
        reason: &str,
    ) -> Result<DeletedTransaction> {
        identity.require_admin()?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(Error::validation("a reason is required to delete a transaction"));
        }
        let now = self.now();

        let archived = self.repository.in_transaction(|store| {
            let tx = Self::load(store, transaction_id)?;
            let archived = DeletedTransaction::archive(tx, identity.user_id, reason, now);
            store.insert_deleted(&archived)?;
            store.delete_receipts_for_transaction(transaction_id)?;
            if store.delete_transaction(transaction_id)? != 1 {
                return Err(Error::Conflict(format!(
                    "transaction {} changed while being deleted",
                    transaction_id
                )));
            }
            Ok(archived)
        })?;

        log::warn!(
            "Transaction {} deleted by {}: {}",
            archived.transaction.reference,
            identity.user_id,
            reason
        );
        self.audit(
            LogEvent::new("transaction_deleted")
                .with_user(identity.user_id)
                .with_account(&archived.transaction.account_number)
                .with_reference(&archived.transaction.reference)
                .with_error_details(reason),
        );
        Ok(archived)
    }

    /// Put the most recent archival copy of a transaction back in the
    /// ledger with a fresh receipt
    pub fn restore(&self, identity: &Identity, transaction_id: Uuid) -> Result<Transaction> {
        identity.require_admin()?;
        let now = self.now();

        let tx = self.repository.in_transaction(|store| {
            let entry = store
                .deleted_for_transaction(transaction_id)?
                .into_iter()
                .filter(|d| !d.is_restored())
                .max_by_key(|d| d.deleted_at)
                .ok_or_else(|| {
                    Error::not_found(format!("no archived copy of transaction {}", transaction_id))
                })?;

            if store.find_transaction(transaction_id)?.is_some() {
                return Err(Error::Conflict(format!(
                    "transaction {} is already in the ledger",
                    transaction_id
                )));
            }
            let tx = entry.transaction;
            if store.reference_exists(&tx.reference)? {
                return Err(Error::DuplicateReference(tx.reference));
            }

            store.insert_transaction(&tx)?;
            store.insert_receipt(&Receipt::from_transaction(&tx))?;
            store.mark_restored(entry.id, identity.user_id, now)?;
            Ok(tx)
        })?;

        log::info!("Transaction {} restored by {}", tx.reference, identity.user_id);
        self.audit(
            LogEvent::new("transaction_restored")
                .with_user(identity.user_id)
                .with_account(&tx.account_number)
                .with_reference(&tx.reference),
        );
        Ok(tx)
    }

    /// Archived transactions, newest deletion first
    pub fn list_deleted(
        &self,
        identity: &Identity,
        include_restored: bool,
    ) -> Result<Vec<DeletedTransaction>> {
        identity.require_admin()?;
        self.repository
            .read(|store| store.list_deleted(include_restored))
    }

    /// Recompute an account's balance and summary from its transactions.
    ///
    /// The balance is only rewritten when the ledger total is non-negative.
    pub fn reconcile(&self, identity: &Identity, account_number: &str) -> Result<ReconcileReport> {
        identity.require_admin()?;
        let now = self.now();
        let report = self
            .repository
            .in_transaction(|store| Self::reconcile_account(store, account_number, now))?;

        if report.negative_ledger {
            log::error!(
                "Ledger for {} sums to {}; balance left at {}",
                report.account_number,
                report.ledger_total,
                report.recorded_balance
            );
        } else if !report.was_consistent() {
            log::warn!(
                "Reconciled {}: balance {} -> {}",
                report.account_number,
                report.recorded_balance,
                report.ledger_total
            );
        }
        if !report.was_consistent() {
            self.audit(
                LogEvent::new("account_reconciled")
                    .with_user(identity.user_id)
                    .with_account(&report.account_number),
            );
        }
        Ok(report)
    }

    fn reconcile_account(
        store: &LedgerStore<'_>,
        account_number: &str,
        now: DateTime<Utc>,
    ) -> Result<ReconcileReport> {
        let account = store
            .find_account(account_number)?
            .ok_or_else(|| Error::not_found(format!("account {}", account_number)))?;
        let ledger_total = store.ledger_total(account_number)?;
        let negative_ledger = ledger_total.is_sign_negative() && !ledger_total.is_zero();

        let mut balance_repaired = false;
        if account.balance != ledger_total && !negative_ledger {
            store.update_balance(account_number, ledger_total, account.version)?;
            balance_repaired = true;
        }

        let rebuild = SummaryService::rebuild(store, account_number, now)?;
        Ok(ReconcileReport {
            account_number: account.account_number,
            recorded_balance: account.balance,
            ledger_total,
            previous_summary_balance: rebuild.previous_balance,
            balance_repaired,
            summary_repaired: rebuild.drifted(),
            negative_ledger,
        })
    }

    /// Reconcile every account, one unit of work each
    pub fn reconcile_all(&self, identity: &Identity) -> Result<Vec<ReconcileReport>> {
        identity.require_admin()?;
        let numbers: Vec<String> = self
            .repository
            .read(|store| store.list_accounts())?
            .into_iter()
            .map(|a| a.account_number)
            .collect();
        numbers
            .iter()
            .map(|number| self.reconcile(identity, number))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ManualClock;
    use crate::domain::{Account, Role, TransactionType, User};
    use crate::services::recorder::{NewTransaction, TransactionRecorder};
    use chrono::{Duration, TimeZone};

    struct Fixture {
        service: AdminService,
        repository: Arc<DuckDbRepository>,
        admin: Identity,
        account: Account,
    }

    fn fixture() -> Fixture {
        let repository = Arc::new(DuckDbRepository::open_in_memory().unwrap());
        repository.ensure_schema().unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap(),
        ));
        let user = User::new("ann@example.com", "Ann", "x", Role::Customer);
        let account = Account::open(user.id, "1000000001", "Main", "USD").unwrap();
        repository
            .in_transaction(|store| {
                store.insert_user(&user)?;
                store.insert_account(&account)
            })
            .unwrap();
        Fixture {
            service: AdminService::new(Arc::clone(&repository), clock),
            repository,
            admin: Identity::admin(Uuid::new_v4()),
            account,
        }
    }

    fn post(f: &Fixture, amount: i64, reference: &str) -> Transaction {
        let at = Utc.with_ymd_and_hms(2025, 6, 10, 9, 0, 0).unwrap();
        f.repository
            .in_transaction(|store| {
                let (tx, _) = TransactionRecorder::record(
                    store,
                    NewTransaction {
                        user_id: f.account.user_id,
                        account_number: f.account.account_number.clone(),
                        amount: Decimal::new(amount, 0),
                        transaction_type: TransactionType::Deposit,
                        transfer_type: None,
                        description: "Cash deposit".into(),
                        balance_after: Decimal::new(amount, 0),
                        reference: reference.into(),
                        currency: "USD".into(),
                        recipient: None,
                        created_at: at,
                    },
                )?;
                Ok(tx)
            })
            .unwrap()
    }

    #[test]
    fn test_customers_are_refused() {
        let f = fixture();
        let customer = Identity::customer(f.account.user_id);
        let tx = post(&f, 10, "DEP-1");
        assert!(matches!(
            f.service.delete(&customer, tx.id, "typo"),
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            f.service.reconcile(&customer, &f.account.account_number),
            Err(Error::Forbidden(_))
        ));
    }

    #[test]
    fn test_backdate_moves_receipt_too() {
        let f = fixture();
        let tx = post(&f, 10, "DEP-1");
        assert_eq!(f.service.find_by_reference(&f.admin, " DEP-1 ").unwrap().id, tx.id);
        let target = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();

        let updated = f.service.backdate(&f.admin, tx.id, target).unwrap();
        assert_eq!(updated.created_at, target);
        assert_eq!(updated.original_date, Some(tx.created_at));

        let receipt = f
            .repository
            .read(|s| s.find_receipt_by_reference("DEP-1"))
            .unwrap()
            .unwrap();
        assert_eq!(receipt.transaction_date, target);
    }

    #[test]
    fn test_backdate_into_future_is_rejected() {
        let f = fixture();
        let tx = post(&f, 10, "DEP-1");
        let future = Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap() + Duration::days(1);
        assert!(matches!(
            f.service.backdate(&f.admin, tx.id, future),
            Err(Error::InvalidDate(_))
        ));
    }

    #[test]
    fn test_delete_requires_reason() {
        let f = fixture();
        let tx = post(&f, 10, "DEP-1");
        assert!(matches!(
            f.service.delete(&f.admin, tx.id, "  "),
            Err(Error::Validation(_))
        ));
        assert!(f.repository.read(|s| s.find_transaction(tx.id)).unwrap().is_some());
    }

    #[test]
    fn test_delete_then_restore() {
        let f = fixture();
        let tx = post(&f, 10, "DEP-1");

        let archived = f.service.delete(&f.admin, tx.id, "entered twice").unwrap();
        assert_eq!(archived.transaction, tx);
        assert!(f.repository.read(|s| s.find_transaction(tx.id)).unwrap().is_none());
        assert!(f
            .repository
            .read(|s| s.receipts_for_transaction(tx.id))
            .unwrap()
            .is_empty());

        let restored = f.service.restore(&f.admin, tx.id).unwrap();
        assert_eq!(restored, tx);
        assert_eq!(
            f.repository
                .read(|s| s.receipts_for_transaction(tx.id))
                .unwrap()
                .len(),
            1
        );
        assert!(f.service.list_deleted(&f.admin, false).unwrap().is_empty());
        assert_eq!(f.service.list_deleted(&f.admin, true).unwrap().len(), 1);

        assert!(matches!(
            f.service.restore(&f.admin, tx.id),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_reconcile_repairs_balance_and_summary() {
        let f = fixture();
        post(&f, 40, "DEP-1");

        let report = f
            .service
            .reconcile(&f.admin, &f.account.account_number)
            .unwrap();
        assert_eq!(report.recorded_balance, Decimal::ZERO);
        assert_eq!(report.ledger_total, Decimal::new(40, 0));
        assert!(report.balance_repaired);
        assert!(report.summary_repaired);

        let account = f
            .repository
            .read(|s| s.find_account(&f.account.account_number))
            .unwrap()
            .unwrap();
        assert_eq!(account.balance, Decimal::new(40, 0));

        let again = f
            .service
            .reconcile(&f.admin, &f.account.account_number)
            .unwrap();
        assert!(again.was_consistent());
    }
}
