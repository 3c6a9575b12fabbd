//! Money parsing and formatting helpers

use std::str::FromStr;

use rust_decimal::Decimal;

use super::result::{Error, Result};

/// Amounts carry at most cents
pub const MONEY_SCALE: u32 = 2;

/// Largest amount or balance a DECIMAL(18,2) column holds
pub fn max_amount() -> Decimal {
    Decimal::new(999_999_999_999_999_999, MONEY_SCALE)
}

/// Parse an outbound amount submitted as a decimal string.
///
/// Rejects anything that is not a plain positive number with at most two
/// decimal places ("NaN", "inf", "-5", "0", "1.005", "1e3"), and anything
/// above `max_amount()`.
pub fn parse_amount(raw: &str) -> Result<Decimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("amount is required"));
    }
    let amount = Decimal::from_str(trimmed)
        .map_err(|_| Error::validation(format!("amount '{}' is not a valid number", trimmed)))?;
    if amount.is_sign_negative() || amount.is_zero() {
        return Err(Error::validation("amount must be greater than zero"));
    }
    if amount.normalize().scale() > MONEY_SCALE {
        return Err(Error::validation("amount cannot have more than two decimal places"));
    }
    if amount > max_amount() {
        return Err(Error::validation(format!(
            "amount cannot exceed {}",
            format_amount(max_amount())
        )));
    }
    Ok(amount.round_dp(MONEY_SCALE))
}

/// Balance after posting `signed_amount`, refused when it would leave the
/// storable range
pub fn apply_to_balance(balance: Decimal, signed_amount: Decimal) -> Result<Decimal> {
    balance
        .checked_add(signed_amount)
        .filter(|total| *total <= max_amount())
        .ok_or_else(|| {
            Error::validation(format!(
                "balance cannot exceed {}",
                format_amount(max_amount())
            ))
        })
}

/// Parse a stored decimal (as read back from a DECIMAL column cast to text)
pub fn parse_stored(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw.trim())
        .map_err(|e| Error::database(format!("corrupt decimal value '{}': {}", raw, e)))
}

/// Normalize a currency code to uppercase and check its shape
pub fn normalize_currency(currency: &str) -> Result<String> {
    let code = currency.trim().to_uppercase();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(Error::validation(format!(
            "currency '{}' is not an ISO 4217 code",
            currency
        )));
    }
    Ok(code)
}

/// Format an amount with two decimal places
pub fn format_amount(amount: Decimal) -> String {
    format!("{:.2}", amount.round_dp(MONEY_SCALE))
}
