//! Currency-tagged decimal amounts.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
}

impl Currency {
    pub const fn code(self) -> &'static str {
        match self {
            Self::Usd => "USD",
        }
    }

    /// Decimal places of the smallest unit (cents for USD).
    pub const fn minor_units(self) -> u32 {
        match self {
            Self::Usd => 2,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A decimal amount with its currency. Never a float.
///
/// Serializes as `{"amount": "100.00", "currency": "USD"}`, the shape the
/// provider uses on the wire. Amounts are kept in one canonical form, at
/// least the currency's minor units and no trailing zeros beyond them, so
/// equal amounts always encode to the same bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "WireMoney")]
pub struct Money {
    amount: Decimal,
    currency: Currency,
}

#[derive(Deserialize)]
struct WireMoney {
    amount: Decimal,
    currency: Currency,
}

impl From<WireMoney> for Money {
    fn from(wire: WireMoney) -> Self {
        Self::new(wire.amount, wire.currency)
    }
}

impl Money {
    pub fn new(amount: Decimal, currency: Currency) -> Self {
        let mut amount = amount.normalize();
        if amount.scale() < currency.minor_units() {
            amount.rescale(currency.minor_units());
        }
        Self { amount, currency }
    }

    pub fn usd(amount: Decimal) -> Self {
        Self::new(amount, Currency::Usd)
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn is_positive(&self) -> bool {
        self.amount > Decimal::ZERO
    }

    /// False when the amount is finer than the currency's smallest unit.
    pub fn fits_minor_units(&self) -> bool {
        self.amount.scale() <= self.currency.minor_units()
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape_uses_string_amounts() {
        let money = Money::usd(Decimal::new(10000, 2));
        let json = serde_json::to_value(money).unwrap();
        assert_eq!(json, serde_json::json!({"amount": "100.00", "currency": "USD"}));
        assert_eq!(money.to_string(), "100.00 USD");
    }

    #[test]
    fn parses_provider_amounts() {
        let money: Money =
            serde_json::from_str(r#"{"amount": "37.5", "currency": "USD"}"#).unwrap();
        assert_eq!(money.amount(), Decimal::new(375, 1));
        assert_eq!(money.to_string(), "37.50 USD");
        assert!(money.is_positive());
        assert!(!Money::usd(Decimal::ZERO).is_positive());
    }

    #[test]
    fn equal_amounts_encode_identically() {
        let whole = Money::usd(Decimal::new(100, 0));
        let cents = Money::usd(Decimal::new(10000, 2));
        let padded = Money::usd(Decimal::new(1_000_000, 4));
        assert_eq!(whole, cents);
        for money in [whole, cents, padded] {
            assert_eq!(
                serde_json::to_value(money).unwrap(),
                serde_json::json!({"amount": "100.00", "currency": "USD"})
            );
        }

        let parsed: Money =
            serde_json::from_str(r#"{"amount": "100", "currency": "USD"}"#).unwrap();
        assert_eq!(serde_json::to_vec(&parsed).unwrap(), serde_json::to_vec(&cents).unwrap());
    }

    #[test]
    fn sub_cent_amounts_are_kept_and_flagged() {
        let money = Money::usd(Decimal::new(12345, 3));
        assert_eq!(money.amount(), Decimal::new(12345, 3));
        assert!(!money.fits_minor_units());
        assert!(Money::usd(Decimal::new(12340, 3)).fits_minor_units());
    }
}
