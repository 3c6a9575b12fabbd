//! Ledger transaction domain model

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::result::{Error, Result};

/// Kind of money movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Transfer,
    Payment,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Transfer => "transfer",
            TransactionType::Payment => "payment",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "deposit" => Ok(TransactionType::Deposit),
            "withdrawal" => Ok(TransactionType::Withdrawal),
            "transfer" => Ok(TransactionType::Transfer),
            "payment" => Ok(TransactionType::Payment),
            other => Err(Error::database(format!("unknown transaction type '{}'", other))),
        }
    }

    /// Prefix used in generated references
    pub fn reference_prefix(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "DEP",
            TransactionType::Withdrawal => "WDR",
            TransactionType::Transfer => "TRF",
            TransactionType::Payment => "PAY",
        }
    }
}

/// Subtype of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferType {
    Internal,
    Domestic,
    International,
}

impl TransferType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferType::Internal => "internal",
            TransferType::Domestic => "domestic",
            TransferType::International => "international",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "internal" => Ok(TransferType::Internal),
            "domestic" => Ok(TransferType::Domestic),
            "international" => Ok(TransferType::International),
            other => Err(Error::validation(format!("unknown transfer type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(Error::database(format!("unknown status '{}'", other))),
        }
    }
}

/// Counterparty of an outbound movement (or the sender, on a credit leg)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientDetails {
    pub account_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swift_iban: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl RecipientDetails {
    pub fn account(account_number: impl Into<String>) -> Self {
        Self {
            account_number: account_number.into(),
            ..Default::default()
        }
    }

    /// Short label for receipts
    pub fn label(&self) -> String {
        match (&self.account_name, &self.bank_name) {
            (Some(name), Some(bank)) => format!("{} ({}, {})", name, self.account_number, bank),
            (Some(name), None) => format!("{} ({})", name, self.account_number),
            _ => self.account_number.clone(),
        }
    }
}

/// One field delta inside a modification entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub field: String,
    pub from: String,
    pub to: String,
}

/// Append-only audit record of an administrative change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModificationEntry {
    pub timestamp: DateTime<Utc>,
    pub actor: Uuid,
    pub changes: Vec<FieldChange>,
}

/// An immutable ledger row.
///
/// The only permitted mutation is `backdate`, which is audited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub account_number: String,
    /// Signed amount, negative for outflows
    pub amount: Decimal,
    pub transaction_type: TransactionType,
    pub transfer_type: Option<TransferType>,
    pub description: String,
    pub balance_after: Decimal,
    pub recipient: Option<RecipientDetails>,
    pub reference: String,
    pub status: TransactionStatus,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    /// Date before the first backdate, if any
    pub original_date: Option<DateTime<Utc>>,
    pub modification_history: Vec<ModificationEntry>,
}

impl Transaction {
    pub fn is_outflow(&self) -> bool {
        self.amount.is_sign_negative() && !self.amount.is_zero()
    }

    /// Move the recorded date to `new_date`.
    ///
    /// `original_date` is captured on the first modification only, so a
    /// chain of backdates still reports the date the money actually moved.
    pub fn backdate(
        &mut self,
        new_date: DateTime<Utc>,
        actor: Uuid,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if new_date > now {
            return Err(Error::InvalidDate(format!(
                "{} is in the future",
                new_date.format("%Y-%m-%d %H:%M:%S")
            )));
        }

        if self.original_date.is_none() {
            self.original_date = Some(self.created_at);
        }

        self.modification_history.push(ModificationEntry {
            timestamp: now,
            actor,
            changes: vec![FieldChange {
                field: "createdAt".to_string(),
                from: self.created_at.to_rfc3339(),
                to: new_date.to_rfc3339(),
            }],
        });
        self.created_at = new_date;
        Ok(())
    }
}

/// Parse an operator-supplied date: RFC 3339, `YYYY-MM-DD HH:MM:SS`
/// or a bare `YYYY-MM-DD` (midnight UTC)
pub fn parse_date(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok(at.with_timezone(&Utc));
    }
    if let Ok(at) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(at.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|at| at.and_utc())
        .ok_or_else(|| Error::InvalidDate(format!("'{}' is not a date", value)))
}

/// Build a reference of the form `<PREFIX>-<timestamp>-<suffix>`
pub fn generate_reference(transaction_type: TransactionType, now: DateTime<Utc>) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..0x100_0000);
    format!(
        "{}-{}-{:06X}",
        transaction_type.reference_prefix(),
        now.format("%Y%m%d%H%M%S%3f"),
        suffix
    )
}

/// Archival copy of a transaction removed by an administrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedTransaction {
    pub id: Uuid,
    pub transaction: Transaction,
    pub deleted_by: Uuid,
    pub reason: String,
    pub deleted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored_by: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored_at: Option<DateTime<Utc>>,
}

impl DeletedTransaction {
    pub fn archive(
        transaction: Transaction,
        deleted_by: Uuid,
        reason: impl Into<String>,
        deleted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction,
            deleted_by,
            reason: reason.into(),
            deleted_at,
            restored_by: None,
            restored_at: None,
        }
    }

    pub fn is_restored(&self) -> bool {
        self.restored_at.is_some()
    }
}
