//! Bank account domain model

use chrono::{DateTime, Utc};
use rand::Rng;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::money;
use super::result::{Error, Result};

/// Length of generated account numbers
pub const ACCOUNT_NUMBER_LEN: usize = 10;

/// A deposit account owned by exactly one user.
///
/// `version` is the optimistic concurrency token: every balance write
/// compares it and bumps it, so two writers that read the same balance
/// cannot both commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: Uuid,
    pub user_id: Uuid,
    pub account_number: String,
    pub display_name: String,
    pub balance: Decimal,
    /// ISO 4217 currency code, normalized to uppercase
    pub currency: String,
    pub version: i64,
    pub opened_at: DateTime<Utc>,
}

impl Account {
    /// Open a new, empty account
    pub fn open(
        user_id: Uuid,
        account_number: impl Into<String>,
        display_name: impl Into<String>,
        currency: &str,
    ) -> Result<Self> {
        let account = Self {
            id: Uuid::new_v4(),
            user_id,
            account_number: account_number.into(),
            display_name: display_name.into().trim().to_string(),
            balance: Decimal::ZERO,
            currency: money::normalize_currency(currency)?,
            version: 0,
            opened_at: Utc::now(),
        };
        account.validate()?;
        Ok(account)
    }

    /// Random 10-digit account number, never starting with zero
    pub fn generate_number() -> String {
        let mut rng = rand::thread_rng();
        let first: u8 = rng.gen_range(1..=9);
        let rest: String = (1..ACCOUNT_NUMBER_LEN)
            .map(|_| char::from(b'0' + rng.gen_range(0..=9u8)))
            .collect();
        format!("{}{}", first, rest)
    }

    /// Whether `value` looks like an account number issued by this bank
    pub fn is_local_number(value: &str) -> bool {
        Regex::new(r"^[1-9][0-9]{9}$")
            .map(|re| re.is_match(value))
            .unwrap_or(false)
    }

    /// Check that `amount` can be debited without going negative
    pub fn ensure_can_debit(&self, amount: Decimal) -> Result<()> {
        if self.balance < amount {
            return Err(Error::InsufficientFunds {
                available: self.balance,
                requested: amount,
            });
        }
        Ok(())
    }

    /// Validate account data
    pub fn validate(&self) -> Result<()> {
        if self.display_name.is_empty() {
            return Err(Error::validation("account name cannot be empty"));
        }
        if !Self::is_local_number(&self.account_number) {
            return Err(Error::validation(format!(
                "'{}' is not a valid account number",
                self.account_number
            )));
        }
        if self.balance.is_sign_negative() && !self.balance.is_zero() {
            return Err(Error::validation("balance cannot be negative"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_numbers_are_local() {
        for _ in 0..50 {
            let number = Account::generate_number();
            assert_eq!(number.len(), ACCOUNT_NUMBER_LEN);
            assert!(Account::is_local_number(&number), "{}", number);
        }
    }

    #[test]
    fn test_account_validation() {
        let mut account = Account::open(Uuid::new_v4(), "1234567890", "Checking", "usd").unwrap();
        assert_eq!(account.currency, "USD");
        assert!(account.validate().is_ok());

        account.display_name = "".to_string();
        assert!(account.validate().is_err());

        assert!(Account::open(Uuid::new_v4(), "0123", "Checking", "USD").is_err());
    }

    #[test]
    fn test_ensure_can_debit() {
        let mut account = Account::open(Uuid::new_v4(), "1234567890", "Checking", "USD").unwrap();
        account.balance = Decimal::new(100, 0);
        assert!(account.ensure_can_debit(Decimal::new(100, 0)).is_ok());
        match account.ensure_can_debit(Decimal::new(150, 0)) {
            Err(Error::InsufficientFunds { available, requested }) => {
                assert_eq!(available, Decimal::new(100, 0));
                assert_eq!(requested, Decimal::new(150, 0));
            }
            other => panic!("expected InsufficientFunds, got {:?}", other),
        }
    }
}
