//! Core domain entities
//!
//! Ledger records, requests and their validation. Pure data structures
//! with validation logic; persistence lives in the adapters.

mod account;
pub mod money;
pub mod otp;
mod receipt;
pub mod result;
pub mod secret;
mod summary;
pub mod transaction;
pub mod transfer;
mod user;

pub use account::{Account, ACCOUNT_NUMBER_LEN};
pub use otp::{OtpChallenge, OtpVerdict};
pub use receipt::Receipt;
pub use secret::{HashParams, SecretHasher};
pub use summary::{month_key, AccountSummary, MonthlyStats};
pub use transaction::{
    generate_reference, parse_date, DeletedTransaction, FieldChange, ModificationEntry,
    RecipientDetails, Transaction, TransactionStatus, TransactionType, TransferType,
};
pub use transfer::{
    BillPaymentCompletion, BillPaymentRequest, CompletionResponse, Destination, InitiateResponse,
    TransferCompletion, TransferOutcome, TransferRequest, TransferStage, ValidatedPayment,
    ValidatedTransfer,
};
pub use user::{Identity, Role, User};
