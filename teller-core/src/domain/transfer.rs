//! Transfer and bill payment requests, validation and responses

use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::money;
use super::result::{Error, Result};
use super::transaction::{RecipientDetails, Transaction, TransferType};

/// Stages a transfer moves through. `Rejected` and `Failed` are the exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TransferStage {
    Validating,
    AwaitingOtp,
    Verifying,
    Committing,
    Completed,
    Rejected,
    Failed,
}

impl TransferStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStage::Validating => "validating",
            TransferStage::AwaitingOtp => "awaiting_otp",
            TransferStage::Verifying => "verifying",
            TransferStage::Committing => "committing",
            TransferStage::Completed => "completed",
            TransferStage::Rejected => "rejected",
            TransferStage::Failed => "failed",
        }
    }
}

/// Transfer parameters as submitted by the client.
///
/// The same body is sent on initiation and again (with the OTP) on
/// completion; nothing is kept server-side in between.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    /// Source account; the user's primary account when omitted
    #[serde(default)]
    pub from_account: Option<String>,
    pub to_account: String,
    pub amount: String,
    pub transfer_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub account_name: Option<String>,
    #[serde(default)]
    pub bank_name: Option<String>,
    #[serde(default)]
    pub swift_iban: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Where the money goes, with the fields each kind requires
#[derive(Debug, Clone, PartialEq)]
pub enum Destination {
    Internal {
        account_number: String,
    },
    Domestic {
        account_number: String,
        account_name: Option<String>,
        bank_name: Option<String>,
    },
    International {
        account_number: String,
        account_name: String,
        bank_name: String,
        swift_iban: String,
    },
}

impl Destination {
    pub fn transfer_type(&self) -> TransferType {
        match self {
            Destination::Internal { .. } => TransferType::Internal,
            Destination::Domestic { .. } => TransferType::Domestic,
            Destination::International { .. } => TransferType::International,
        }
    }

    pub fn account_number(&self) -> &str {
        match self {
            Destination::Internal { account_number }
            | Destination::Domestic { account_number, .. }
            | Destination::International { account_number, .. } => account_number,
        }
    }
}

/// A request that passed boundary validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedTransfer {
    pub from_account: Option<String>,
    pub destination: Destination,
    pub amount: Decimal,
    pub description: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl ValidatedTransfer {
    pub fn recipient(&self) -> RecipientDetails {
        let mut details = RecipientDetails::account(self.destination.account_number());
        match &self.destination {
            Destination::Internal { .. } => {}
            Destination::Domestic {
                account_name,
                bank_name,
                ..
            } => {
                details.account_name = account_name.clone();
                details.bank_name = bank_name.clone();
            }
            Destination::International {
                account_name,
                bank_name,
                swift_iban,
                ..
            } => {
                details.account_name = Some(account_name.clone());
                details.bank_name = Some(bank_name.clone());
                details.swift_iban = Some(swift_iban.clone());
            }
        }
        details.email = self.email.clone();
        details.phone = self.phone.clone();
        details
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn require(value: &Option<String>, field: &str) -> Result<String> {
    non_blank(value).ok_or_else(|| {
        Error::validation(format!("{} is required for international transfers", field))
    })
}

/// SWIFT/BIC (8 or 11 characters) or an IBAN
pub fn is_swift_or_iban(value: &str) -> bool {
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    let compact = compact.to_uppercase();
    let swift = Regex::new(r"^[A-Z]{6}[A-Z0-9]{2}([A-Z0-9]{3})?$");
    let iban = Regex::new(r"^[A-Z]{2}[0-9]{2}[A-Z0-9]{11,30}$");
    match (swift, iban) {
        (Ok(swift), Ok(iban)) => swift.is_match(&compact) || iban.is_match(&compact),
        _ => false,
    }
}

impl TransferRequest {
    /// Boundary validation, dispatched once on the transfer type
    pub fn validate(&self) -> Result<ValidatedTransfer> {
        let to_account = self.to_account.trim().to_string();
        if to_account.is_empty() {
            return Err(Error::validation("destination account is required"));
        }
        let amount = money::parse_amount(&self.amount)?;

        let destination = match TransferType::parse(&self.transfer_type)? {
            TransferType::Internal => {
                if self.from_account.as_deref().map(str::trim) == Some(to_account.as_str()) {
                    return Err(Error::validation("cannot transfer to the same account"));
                }
                Destination::Internal {
                    account_number: to_account,
                }
            }
            TransferType::Domestic => Destination::Domestic {
                account_number: to_account,
                account_name: non_blank(&self.account_name),
                bank_name: non_blank(&self.bank_name),
            },
            TransferType::International => {
                let swift_iban = require(&self.swift_iban, "SWIFT/IBAN")?;
                if !is_swift_or_iban(&swift_iban) {
                    return Err(Error::validation(format!(
                        "'{}' is not a valid SWIFT code or IBAN",
                        swift_iban
                    )));
                }
                Destination::International {
                    account_number: to_account,
                    account_name: require(&self.account_name, "recipient name")?,
                    bank_name: require(&self.bank_name, "bank name")?,
                    swift_iban: swift_iban
                        .chars()
                        .filter(|c| !c.is_whitespace())
                        .collect::<String>()
                        .to_uppercase(),
                }
            }
        };

        let description = non_blank(&self.description).unwrap_or_else(|| {
            format!("{} transfer to {}", destination.transfer_type().as_str(), destination.account_number())
        });

        Ok(ValidatedTransfer {
            from_account: non_blank(&self.from_account),
            destination,
            amount,
            description,
            email: non_blank(&self.email),
            phone: non_blank(&self.phone),
        })
    }
}

/// Second step of a transfer: the original parameters plus the code
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferCompletion {
    #[serde(default)]
    pub otp: Option<String>,
    #[serde(flatten)]
    pub request: TransferRequest,
}

/// Payment to an external biller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillPaymentRequest {
    #[serde(default)]
    pub from_account: Option<String>,
    pub biller: String,
    pub customer_reference: String,
    pub amount: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// A bill payment that passed boundary validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPayment {
    pub from_account: Option<String>,
    pub biller: String,
    pub customer_reference: String,
    pub amount: Decimal,
    pub description: String,
}

impl ValidatedPayment {
    pub fn recipient(&self) -> RecipientDetails {
        RecipientDetails {
            account_number: self.customer_reference.clone(),
            account_name: Some(self.biller.clone()),
            ..Default::default()
        }
    }
}

impl BillPaymentRequest {
    pub fn validate(&self) -> Result<ValidatedPayment> {
        let biller = self.biller.trim();
        if biller.is_empty() {
            return Err(Error::validation("biller is required"));
        }
        let customer_reference = self.customer_reference.trim();
        if customer_reference.is_empty() {
            return Err(Error::validation("customer reference is required"));
        }
        let amount = money::parse_amount(&self.amount)?;
        let description = non_blank(&self.description)
            .unwrap_or_else(|| format!("Bill payment to {}", biller));
        Ok(ValidatedPayment {
            from_account: non_blank(&self.from_account),
            biller: biller.to_string(),
            customer_reference: customer_reference.to_string(),
            amount,
            description,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillPaymentCompletion {
    #[serde(default)]
    pub otp: Option<String>,
    #[serde(flatten)]
    pub request: BillPaymentRequest,
}

/// Reply to an initiation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_otp: Option<bool>,
}

impl InitiateResponse {
    pub fn otp_sent() -> Self {
        Self {
            success: true,
            message: "A verification code has been sent to your email".to_string(),
            requires_otp: Some(true),
        }
    }

    pub fn ready() -> Self {
        Self {
            success: true,
            message: "Transfer validated, submit it to complete".to_string(),
            requires_otp: Some(false),
        }
    }

    pub fn rejected(error: &Error) -> Self {
        Self {
            success: false,
            message: error.public_message(),
            requires_otp: None,
        }
    }
}

impl From<Result<InitiateResponse>> for InitiateResponse {
    fn from(result: Result<InitiateResponse>) -> Self {
        result.unwrap_or_else(|e| InitiateResponse::rejected(&e))
    }
}

/// What a committed movement hands back
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferOutcome {
    pub new_balance: Decimal,
    pub currency: String,
    pub reference: String,
    pub transaction: Transaction,
}

/// Reply to a completion: `{ success, newBalance, currency, reference }`
/// or `{ success: false, message }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_balance: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<Result<TransferOutcome>> for CompletionResponse {
    fn from(result: Result<TransferOutcome>) -> Self {
        match result {
            Ok(outcome) => Self {
                success: true,
                new_balance: Some(outcome.new_balance),
                currency: Some(outcome.currency),
                reference: Some(outcome.reference),
                message: None,
            },
            Err(e) => Self {
                success: false,
                new_balance: None,
                currency: None,
                reference: None,
                message: Some(e.public_message()),
            },
        }
    }
}
