//! Account summary domain model

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::transaction::{Transaction, TransactionType};

/// Aggregate for the calendar month named by `month` (YYYY-MM)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyStats {
    pub month: String,
    pub total_deposits: Decimal,
    pub total_withdrawals: Decimal,
    pub net_change: Decimal,
}

impl MonthlyStats {
    pub fn empty(month: impl Into<String>) -> Self {
        Self {
            month: month.into(),
            total_deposits: Decimal::ZERO,
            total_withdrawals: Decimal::ZERO,
            net_change: Decimal::ZERO,
        }
    }

    /// Deposits count as deposits; withdrawals, payments and outgoing
    /// transfers count as withdrawals. Incoming transfers move the balance
    /// but neither total.
    pub fn add(&mut self, transaction_type: TransactionType, signed_amount: Decimal) {
        match transaction_type {
            TransactionType::Deposit => self.total_deposits += signed_amount,
            TransactionType::Withdrawal | TransactionType::Payment => {
                self.total_withdrawals += signed_amount.abs()
            }
            TransactionType::Transfer if signed_amount.is_sign_negative() => {
                self.total_withdrawals += signed_amount.abs()
            }
            TransactionType::Transfer => {}
        }
        self.net_change = self.total_deposits - self.total_withdrawals;
    }
}

/// Cached, query-optimized view of one account.
///
/// Maintained incrementally; the transaction log stays the source of truth
/// and `SummaryService::rebuild` recomputes it from that log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub user_id: Uuid,
    pub account_number: String,
    pub currency: String,
    pub current_balance: Decimal,
    pub available_balance: Decimal,
    pub monthly_stats: MonthlyStats,
    pub last_transaction_date: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

pub fn month_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

impl AccountSummary {
    pub fn new(
        user_id: Uuid,
        account_number: impl Into<String>,
        currency: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            account_number: account_number.into(),
            currency: currency.into(),
            current_balance: Decimal::ZERO,
            available_balance: Decimal::ZERO,
            monthly_stats: MonthlyStats::empty(month_key(now)),
            last_transaction_date: None,
            updated_at: now,
        }
    }

    /// Apply one posted amount.
    ///
    /// Monthly stats roll over when `now` falls in a later month than the
    /// one currently tracked.
    pub fn apply(
        &mut self,
        transaction_type: TransactionType,
        signed_amount: Decimal,
        now: DateTime<Utc>,
    ) {
        let month = month_key(now);
        if self.monthly_stats.month != month {
            self.monthly_stats = MonthlyStats::empty(month);
        }
        self.current_balance += signed_amount;
        self.available_balance += signed_amount;
        self.monthly_stats.add(transaction_type, signed_amount);
        self.last_transaction_date = Some(now);
        self.updated_at = now;
    }

    /// Rebuild a summary from the complete transaction history of an account
    pub fn rebuild(
        user_id: Uuid,
        account_number: &str,
        currency: &str,
        transactions: &[Transaction],
        now: DateTime<Utc>,
    ) -> Self {
        let mut summary = Self::new(user_id, account_number, currency, now);
        let month = month_key(now);
        for tx in transactions {
            summary.current_balance += tx.amount;
            if month_key(tx.created_at) == month {
                summary.monthly_stats.add(tx.transaction_type, tx.amount);
            }
        }
        summary.available_balance = summary.current_balance;
        summary.last_transaction_date = transactions.iter().map(|tx| tx.created_at).max();
        summary
    }
}
