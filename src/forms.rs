// src/forms.rs
//! Form bodies posted by the browser and the typed values parsed out of them.
//!
//! Every field defaults to an empty string so a missing field is reported by
//! the handler's own validation message instead of a generic body error.
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormError {
    #[error("not a positive whole number of shares")]
    InvalidShares,
    #[error("not a positive cash amount")]
    InvalidCash,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BuyForm {
    pub stock_symbol: String,
    pub shares: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SellForm {
    pub symbol: String,
    pub shares: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct QuoteForm {
    pub stock_symbol: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AddCashForm {
    pub cash: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RegisterForm {
    pub username: String,
    pub password: String,
    pub confirmation: String,
}

/// A strictly positive share count. Only plain ASCII digits are accepted, so
/// signs, whitespace and fractions are all rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareCount(u32);

impl ShareCount {
    pub fn parse(input: &str) -> Result<Self, FormError> {
        if input.is_empty() || !input.bytes().all(|b| b.is_ascii_digit()) {
            return Err(FormError::InvalidShares);
        }
        match input.parse::<u32>() {
            Ok(n) if n > 0 => Ok(ShareCount(n)),
            _ => Err(FormError::InvalidShares),
        }
    }

    pub fn get(self) -> i64 {
        i64::from(self.0)
    }
}

/// Largest single deposit accepted from the add-cash form.
pub const MAX_DEPOSIT: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);

/// A strictly positive amount of cash to deposit, at most [`MAX_DEPOSIT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CashAmount(Decimal);

impl CashAmount {
    pub fn parse(input: &str) -> Result<Self, FormError> {
        let amount = Decimal::from_str(input.trim()).map_err(|_| FormError::InvalidCash)?;
        if amount <= Decimal::ZERO || amount > MAX_DEPOSIT {
            return Err(FormError::InvalidCash);
        }
        Ok(CashAmount(amount))
    }

    pub fn get(self) -> Decimal {
        self.0
    }
}
