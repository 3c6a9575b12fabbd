//! Receipt domain model

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::transaction::{Transaction, TransactionStatus, TransactionType, TransferType};

/// User-facing copy of a committed transaction.
///
/// Created together with its transaction; `transaction_date` is the only
/// field that changes afterwards (when the transaction is backdated).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub user_id: Uuid,
    pub reference: String,
    pub account_number: String,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub currency: String,
    pub transaction_type: TransactionType,
    pub transfer_type: Option<TransferType>,
    pub description: String,
    pub counterparty: Option<String>,
    pub status: TransactionStatus,
    /// Display date, kept in lockstep with the transaction date
    pub transaction_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Receipt {
    pub fn from_transaction(tx: &Transaction) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_id: tx.id,
            user_id: tx.user_id,
            reference: tx.reference.clone(),
            account_number: tx.account_number.clone(),
            amount: tx.amount,
            balance_after: tx.balance_after,
            currency: tx.currency.clone(),
            transaction_type: tx.transaction_type,
            transfer_type: tx.transfer_type,
            description: tx.description.clone(),
            counterparty: tx.recipient.as_ref().map(|r| r.label()),
            status: tx.status,
            transaction_date: tx.created_at,
            created_at: tx.created_at,
        }
    }

    /// Whether this receipt still mirrors `tx`
    pub fn matches(&self, tx: &Transaction) -> bool {
        self.transaction_id == tx.id
            && self.reference == tx.reference
            && self.amount == tx.amount
            && self.balance_after == tx.balance_after
            && self.currency == tx.currency
    }
}
