//! Identifier types for currencies and exchange rates.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::FxRatesError;

/// Store-assigned identifier of a currency row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CurrencyId(i64);

impl CurrencyId {
    /// Wrap a raw store id.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw store id.
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for CurrencyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Store-assigned identifier of an exchange rate row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExchangeRateId(i64);

impl ExchangeRateId {
    /// Wrap a raw store id.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw store id.
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for ExchangeRateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Three-letter currency code.
///
/// Codes compare case-insensitively, so the value is always kept upper-case.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CurrencyCode(String);

impl CurrencyCode {
    /// Required code length.
    pub const LEN: usize = 3;

    /// Create a code without validating its shape, only normalizing case.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().trim().to_uppercase())
    }

    /// Parse and validate a code: exactly three ASCII letters.
    pub fn parse(code: &str) -> Result<Self, FxRatesError> {
        let code = Self::new(code);
        if code.is_valid() {
            Ok(code)
        } else {
            Err(FxRatesError::validation(
                "code",
                format!("'{}' is not a three-letter currency code", code),
            ))
        }
    }

    /// Check the code shape.
    pub fn is_valid(&self) -> bool {
        self.0.len() == Self::LEN && self.0.chars().all(|c| c.is_ascii_uppercase())
    }

    /// Get the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CurrencyCode {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl AsRef<str> for CurrencyCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// An ordered (base, target) pair of currency codes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    /// Currency converted from.
    pub base: CurrencyCode,
    /// Currency converted to.
    pub target: CurrencyCode,
}

impl CurrencyPair {
    /// Create a new currency pair.
    pub fn new(base: impl Into<CurrencyCode>, target: impl Into<CurrencyCode>) -> Self {
        Self {
            base: base.into(),
            target: target.into(),
        }
    }

    /// Get the reverse direction of this pair.
    pub fn inverse(&self) -> Self {
        Self {
            base: self.target.clone(),
            target: self.base.clone(),
        }
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_normalizes_case() {
        assert_eq!(CurrencyCode::new("usd"), CurrencyCode::new("USD"));
        assert_eq!(CurrencyCode::new(" eur ").as_str(), "EUR");
    }

    #[test]
    fn test_code_parse() {
        assert!(CurrencyCode::parse("rub").is_ok());
        assert!(CurrencyCode::parse("RU").is_err());
        assert!(CurrencyCode::parse("RUBL").is_err());
        assert!(CurrencyCode::parse("R1B").is_err());
    }

    #[test]
    fn test_pair_display_and_inverse() {
        let pair = CurrencyPair::new("usd", "eur");
        assert_eq!(pair.to_string(), "USD/EUR");
        assert_eq!(pair.inverse().to_string(), "EUR/USD");
    }
}
