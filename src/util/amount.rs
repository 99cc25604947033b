//! Wei-scale amount parsing and validation.
//!
//! Amounts travel over the wire as decimal strings (so large integers survive
//! JSON round-trips without floating-point loss) and are normalized to
//! [`rust_decimal::Decimal`] internally, matching the `NUMERIC(78,18)` column
//! precision used by the store.

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;

/// `^\d{1,60}(\.\d{0,18})?$`, non-negative — the wire-format shape of spec.md's Amount contract.
static AMOUNT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,60}(\.\d{0,18})?$").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Amount(pub Decimal);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AmountParseError {
    #[error("amount '{0}' does not match the required numeric shape")]
    InvalidFormat(String),
    #[error("amount '{0}' could not be parsed as a decimal")]
    NotADecimal(String),
}

impl Amount {
    pub fn zero() -> Self {
        Amount(Decimal::ZERO)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == Decimal::ZERO
    }

    pub fn checked_sub(&self, other: Amount) -> Option<Amount> {
        if other.0 > self.0 {
            None
        } else {
            Some(Amount(self.0 - other.0))
        }
    }

    pub fn checked_add(&self, other: Amount) -> Amount {
        Amount(self.0 + other.0)
    }
}

impl FromStr for Amount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !AMOUNT_PATTERN.is_match(s) {
            return Err(AmountParseError::InvalidFormat(s.to_string()));
        }
        let decimal =
            Decimal::from_str(s).map_err(|_| AmountParseError::NotADecimal(s.to_string()))?;
        Ok(Amount(decimal))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl serde::Serialize for Amount {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Amount::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_integers_and_decimals() {
        assert!(Amount::from_str("100").is_ok());
        assert!(Amount::from_str("0").is_ok());
        assert!(Amount::from_str("100.500000000000000000").is_ok());
    }

    #[test]
    fn rejects_negative_or_malformed() {
        assert!(Amount::from_str("-1").is_err());
        assert!(Amount::from_str("1.2.3").is_err());
        assert!(Amount::from_str("abc").is_err());
        assert!(Amount::from_str("").is_err());
    }

    #[test]
    fn checked_sub_rejects_underflow() {
        let a = Amount::from_str("100").unwrap();
        let b = Amount::from_str("150").unwrap();
        assert!(a.checked_sub(b).is_none());
        assert_eq!(b.checked_sub(a), Some(Amount::from_str("50").unwrap()));
    }
}
