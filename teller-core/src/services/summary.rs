//! Account summary updater
//!
//! Keeps the per-account rollup current with one read and one write per
//! posted amount, and rebuilds it from the ledger on demand.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::adapters::duckdb::{DuckDbRepository, LedgerStore};
use crate::domain::result::{Error, Result};
use crate::domain::{AccountSummary, Identity, TransactionType};

/// Before/after of a summary rebuild
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRebuild {
    pub previous_balance: Option<Decimal>,
    pub summary: AccountSummary,
}

impl SummaryRebuild {
    pub fn drifted(&self) -> bool {
        self.previous_balance != Some(self.summary.current_balance)
    }
}

pub struct SummaryService {
    repository: Arc<DuckDbRepository>,
}

impl SummaryService {
    pub fn new(repository: Arc<DuckDbRepository>) -> Self {
        Self { repository }
    }

    /// Apply one posted amount, creating the summary on first use
    pub fn apply(
        store: &LedgerStore<'_>,
        user_id: Uuid,
        account_number: &str,
        signed_amount: Decimal,
        transaction_type: TransactionType,
        currency: &str,
        now: DateTime<Utc>,
    ) -> Result<AccountSummary> {
        let mut summary = match store.find_summary(user_id, account_number)? {
            Some(summary) => summary,
            None => AccountSummary::new(user_id, account_number, currency, now),
        };
        summary.apply(transaction_type, signed_amount, now);
        store.save_summary(&summary)?;
        Ok(summary)
    }

    /// Recompute the summary of one account from its full transaction log
    pub fn rebuild(
        store: &LedgerStore<'_>,
        account_number: &str,
        now: DateTime<Utc>,
    ) -> Result<SummaryRebuild> {
        let account = store
            .find_account(account_number)?
            .ok_or_else(|| Error::not_found(format!("account {}", account_number)))?;
        let previous = store.find_summary(account.user_id, account_number)?;
        let transactions = store.transactions_for_account(account_number, None)?;

        let summary = AccountSummary::rebuild(
            account.user_id,
            account_number,
            &account.currency,
            &transactions,
            now,
        );
        store.save_summary(&summary)?;
        Ok(SummaryRebuild {
            previous_balance: previous.map(|s| s.current_balance),
            summary,
        })
    }

    /// Summary of an account the caller may see
    pub fn get(&self, identity: &Identity, account_number: &str) -> Result<AccountSummary> {
        self.repository.read(|store| {
            let account = store
                .find_account(account_number)?
                .filter(|a| identity.can_access(a.user_id))
                .ok_or_else(|| Error::not_found(format!("account {}", account_number)))?;
            match store.find_summary(account.user_id, account_number)? {
                Some(summary) => Ok(summary),
                None => Ok(AccountSummary::new(
                    account.user_id,
                    account_number,
                    &account.currency,
                    account.opened_at,
                )),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Account;
    use chrono::TimeZone;

    #[test]
    fn test_apply_creates_then_increments() {
        let repo = DuckDbRepository::open_in_memory().unwrap();
        repo.ensure_schema().unwrap();
        let user = Uuid::new_v4();
        let now = Utc.with_ymd_and_hms(2025, 2, 3, 4, 5, 6).unwrap();

        repo.in_transaction(|store| {
            SummaryService::apply(
                store,
                user,
                "1234567890",
                Decimal::new(1000, 0),
                TransactionType::Deposit,
                "USD",
                now,
            )?;
            SummaryService::apply(
                store,
                user,
                "1234567890",
                Decimal::new(-250, 0),
                TransactionType::Withdrawal,
                "USD",
                now,
            )
        })
        .unwrap();

        let summary = repo
            .read(|s| s.find_summary(user, "1234567890"))
            .unwrap()
            .unwrap();
        assert_eq!(summary.current_balance, Decimal::new(750, 0));
        assert_eq!(summary.monthly_stats.total_deposits, Decimal::new(1000, 0));
        assert_eq!(summary.monthly_stats.total_withdrawals, Decimal::new(250, 0));
        assert_eq!(summary.last_transaction_date, Some(now));
    }

    #[test]
    fn test_get_hides_foreign_accounts() {
        let repo = Arc::new(DuckDbRepository::open_in_memory().unwrap());
        repo.ensure_schema().unwrap();
        let owner = Uuid::new_v4();
        let account = Account::open(owner, "1234567890", "Main", "USD").unwrap();
        repo.in_transaction(|s| s.insert_account(&account)).unwrap();

        let service = SummaryService::new(Arc::clone(&repo));
        let summary = service.get(&Identity::customer(owner), "1234567890").unwrap();
        assert_eq!(summary.current_balance, Decimal::ZERO);

        let stranger = Identity::customer(Uuid::new_v4());
        assert!(matches!(
            service.get(&stranger, "1234567890"),
            Err(Error::NotFound(_))
        ));
    }
}
