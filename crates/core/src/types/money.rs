//! Decimal money helpers.
//!
//! All amounts are `rust_decimal::Decimal` values kept at two decimal
//! places. The store runs in a single configured currency; the currency code
//! travels with totals so the gateway and the API agree on it.

use core::fmt;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Number of decimal places used for every stored amount.
pub const MONEY_SCALE: u32 = 2;

/// Errors produced by money conversions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    /// Amount does not fit in the gateway's integer minor units.
    #[error("amount {0} is out of range")]
    OutOfRange(Decimal),
    /// Negative amounts are never charged.
    #[error("amount {0} is negative")]
    Negative(Decimal),
    /// Unknown ISO 4217 code.
    #[error("unsupported currency: {0}")]
    UnsupportedCurrency(String),
}

/// ISO 4217 currency codes supported by the storefront.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CurrencyCode {
    #[default]
    Usd,
    Eur,
    Gbp,
    Cad,
    Aud,
}

impl CurrencyCode {
    /// Lowercase code, as payment gateways expect it.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Usd => "usd",
            Self::Eur => "eur",
            Self::Gbp => "gbp",
            Self::Cad => "cad",
            Self::Aud => "aud",
        }
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CurrencyCode {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "usd" => Ok(Self::Usd),
            "eur" => Ok(Self::Eur),
            "gbp" => Ok(Self::Gbp),
            "cad" => Ok(Self::Cad),
            "aud" => Ok(Self::Aud),
            other => Err(MoneyError::UnsupportedCurrency(other.to_owned())),
        }
    }
}

/// Round to two places, half away from zero.
#[must_use]
pub fn round_money(amount: Decimal) -> Decimal {
    let mut rounded = amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(MONEY_SCALE);
    rounded
}

/// `price × quantity`, rounded.
#[must_use]
pub fn line_total(price: Decimal, quantity: u32) -> Decimal {
    round_money(price * Decimal::from(quantity))
}

/// Convert a two-place amount into integer minor units.
///
/// # Errors
///
/// Returns `MoneyError::Negative` for negative input and
/// `MoneyError::OutOfRange` if the result does not fit in `i64`.
pub fn to_minor_units(amount: Decimal) -> Result<i64, MoneyError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(MoneyError::Negative(amount));
    }
    (round_money(amount) * Decimal::ONE_HUNDRED)
        .trunc()
        .to_i64()
        .ok_or(MoneyError::OutOfRange(amount))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap_or_default()
    }

    #[test]
    fn test_round_money_keeps_two_places() {
        assert_eq!(round_money(dec("10")).to_string(), "10.00");
        assert_eq!(round_money(dec("0.005")).to_string(), "0.01");
        assert_eq!(round_money(dec("2.344")).to_string(), "2.34");
    }

    #[test]
    fn test_line_total() {
        assert_eq!(line_total(dec("10.00"), 3), dec("30.00"));
        assert_eq!(line_total(dec("19.99"), 0), Decimal::ZERO);
    }

    #[test]
    fn test_minor_units() {
        assert_eq!(to_minor_units(dec("45.00")), Ok(4500));
        assert_eq!(to_minor_units(dec("0.01")), Ok(1));
        assert!(matches!(
            to_minor_units(dec("-1.00")),
            Err(MoneyError::Negative(_))
        ));
    }

    #[test]
    fn test_currency_parse_and_display() {
        assert_eq!("USD".parse::<CurrencyCode>(), Ok(CurrencyCode::Usd));
        assert!("xyz".parse::<CurrencyCode>().is_err());
        assert_eq!(CurrencyCode::Gbp.to_string(), "gbp");
    }
}
