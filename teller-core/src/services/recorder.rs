//! Transaction recorder
//!
//! Writes one immutable ledger row and its receipt. Runs inside the
//! caller's unit of work and never touches balances.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::adapters::duckdb::LedgerStore;
use crate::domain::result::{Error, Result};
use crate::domain::{
    Receipt, RecipientDetails, Transaction, TransactionStatus, TransactionType, TransferType,
};

/// Everything needed to record a completed movement
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub user_id: Uuid,
    pub account_number: String,
    /// Signed, negative for outflows
    pub amount: Decimal,
    pub transaction_type: TransactionType,
    pub transfer_type: Option<TransferType>,
    pub description: String,
    pub balance_after: Decimal,
    pub reference: String,
    pub currency: String,
    pub recipient: Option<RecipientDetails>,
    pub created_at: DateTime<Utc>,
}

impl NewTransaction {
    fn validate(&self) -> Result<()> {
        if self.reference.trim().is_empty() {
            return Err(Error::validation("reference is required"));
        }
        if self.amount.is_zero() {
            return Err(Error::validation("amount cannot be zero"));
        }
        match (self.transaction_type, self.transfer_type) {
            (TransactionType::Transfer, None) => {
                Err(Error::validation("transfers need a transfer type"))
            }
            (TransactionType::Transfer, Some(_)) | (_, None) => Ok(()),
            (other, Some(_)) => Err(Error::validation(format!(
                "{} transactions cannot carry a transfer type",
                other.as_str()
            ))),
        }
    }

    fn into_transaction(self) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            account_number: self.account_number,
            amount: self.amount,
            transaction_type: self.transaction_type,
            transfer_type: self.transfer_type,
            description: self.description,
            balance_after: self.balance_after,
            recipient: self.recipient,
            reference: self.reference,
            status: TransactionStatus::Completed,
            currency: self.currency,
            created_at: self.created_at,
            original_date: None,
            modification_history: Vec::new(),
        }
    }
}

pub struct TransactionRecorder;

impl TransactionRecorder {
    /// Record `new` and its receipt.
    ///
    /// A reference already present in the ledger is a caller bug and fails
    /// with `DuplicateReference`; it is not retried.
    pub fn record(store: &LedgerStore<'_>, new: NewTransaction) -> Result<(Transaction, Receipt)> {
        new.validate()?;
        if store.reference_exists(&new.reference)? {
            return Err(Error::DuplicateReference(new.reference));
        }

        let transaction = new.into_transaction();
        let receipt = Receipt::from_transaction(&transaction);
        store.insert_transaction(&transaction)?;
        store.insert_receipt(&receipt)?;

        log::debug!(
            "Recorded {} {} on {} ({})",
            transaction.transaction_type.as_str(),
            transaction.amount,
            transaction.account_number,
            transaction.reference
        );
        Ok((transaction, receipt))
    }
}
