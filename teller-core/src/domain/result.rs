//! Result and error types for the core library

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why an OTP check did not pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OtpFailure {
    /// No challenge is pending for the user
    NoChallenge,
    /// The pending challenge is past its expiry (and has been cleared)
    Expired,
    /// The submitted code does not match; the challenge stays pending
    Mismatch,
    /// The operation needs an OTP but none was submitted
    Required,
}

impl std::fmt::Display for OtpFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            OtpFailure::NoChallenge => "no verification code is pending, request a new one",
            OtpFailure::Expired => "verification code has expired, request a new one",
            OtpFailure::Mismatch => "verification code is incorrect",
            OtpFailure::Required => "a verification code is required for this operation",
        };
        f.write_str(msg)
    }
}

/// Core library error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds { available: Decimal, requested: Decimal },

    #[error("Recipient not found: {0}")]
    RecipientNotFound(String),

    #[error("OTP rejected: {0}")]
    Otp(OtpFailure),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Duplicate reference: {0}")]
    DuplicateReference(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Coarse classification of an error, used to shape responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    /// Bad input or business rule rejection; nothing was written
    Client,
    /// Lost a race or hit a uniqueness constraint; re-initiate
    Conflict,
    /// Storage, notifier or configuration failure
    Dependency,
}

impl Error {
    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a forbidden error
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Validation(_)
            | Error::InsufficientFunds { .. }
            | Error::RecipientNotFound(_)
            | Error::Otp(_)
            | Error::Forbidden(_)
            | Error::NotFound(_)
            | Error::InvalidDate(_) => ErrorClass::Client,
            Error::DuplicateReference(_) | Error::Conflict(_) => ErrorClass::Conflict,
            Error::Notification(_)
            | Error::Database(_)
            | Error::Config(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::Other(_) => ErrorClass::Dependency,
        }
    }

    /// Message safe to hand back to a caller.
    ///
    /// Dependency errors are collapsed into a generic message; the detail
    /// stays in the logs.
    pub fn public_message(&self) -> String {
        match self.class() {
            ErrorClass::Client => match self {
                Error::Otp(failure) => failure.to_string(),
                Error::InsufficientFunds { .. } => "Insufficient funds".to_string(),
                other => other.to_string(),
            },
            ErrorClass::Conflict => {
                "The account changed while processing the request, please try again".to_string()
            }
            ErrorClass::Dependency => match self {
                Error::Notification(_) => {
                    "Could not deliver the verification code, please try again later".to_string()
                }
                _ => "The request could not be completed, please try again later".to_string(),
            },
        }
    }
}

impl From<duckdb::Error> for Error {
    fn from(e: duckdb::Error) -> Self {
        let msg = e.to_string();
        let lower = msg.to_lowercase();
        if lower.contains("conflict") && lower.contains("transaction") {
            Error::Conflict(msg)
        } else {
            Error::Database(msg)
        }
    }
}

/// Core library result type
pub type Result<T> = std::result::Result<T, Error>;

/// Operation result with optional context (for API serialization)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub context: Option<HashMap<String, serde_json::Value>>,
}

impl<T> OperationResult<T> {
    /// Create a successful result
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            context: None,
        }
    }

    /// Create a failed result
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            context: None,
        }
    }

    /// Create a failed result with context
    pub fn fail_with_context(
        error: impl Into<String>,
        context: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            context: Some(context),
        }
    }
}

impl<T> From<Result<T>> for OperationResult<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => {
                let mut context = HashMap::new();
                context.insert(
                    "class".to_string(),
                    serde_json::to_value(e.class()).unwrap_or_default(),
                );
                Self::fail_with_context(e.public_message(), context)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_result_ok() {
        let result: OperationResult<i32> = OperationResult::ok(42);
        assert!(result.success);
        assert_eq!(result.data, Some(42));
        assert!(result.error.is_none());
    }

    #[test]
    fn test_from_result_uses_public_message() {
        let err: Result<i32> = Err(Error::database("IO Error: disk full at /var/lib/x"));
        let result: OperationResult<i32> = err.into();
        assert!(!result.success);
        let msg = result.error.unwrap();
        assert!(!msg.contains("disk full"));
        assert_eq!(
            result.context.unwrap()["class"],
            serde_json::json!("dependency")
        );
    }

    #[test]
    fn test_error_classes() {
        assert_eq!(Error::Otp(OtpFailure::Expired).class(), ErrorClass::Client);
        assert_eq!(
            Error::InsufficientFunds {
                available: Decimal::new(100, 0),
                requested: Decimal::new(150, 0)
            }
            .class(),
            ErrorClass::Client
        );
        assert_eq!(Error::DuplicateReference("TRF-1".into()).class(), ErrorClass::Conflict);
        assert_eq!(Error::Notification("smtp down".into()).class(), ErrorClass::Dependency);
    }

    #[test]
    fn test_otp_public_message() {
        let err = Error::Otp(OtpFailure::Mismatch);
        assert_eq!(err.public_message(), "verification code is incorrect");
    }
}
