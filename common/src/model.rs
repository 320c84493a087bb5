//! Currency and exchange rate records.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{FxRatesError, Result};
use crate::identifiers::{CurrencyCode, CurrencyId, CurrencyPair, ExchangeRateId};

/// A stored currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
    /// Store-assigned identity.
    pub id: CurrencyId,
    /// Unique, case-insensitive three-letter code.
    pub code: CurrencyCode,
    /// Display name, e.g. "United States dollar".
    pub full_name: String,
    /// Display sign, e.g. "$".
    pub sign: String,
}

/// A currency that has not been saved yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCurrency {
    pub code: CurrencyCode,
    pub full_name: String,
    pub sign: String,
}

impl NewCurrency {
    /// Validate and build a new currency.
    pub fn new(code: &str, full_name: impl Into<String>, sign: impl Into<String>) -> Result<Self> {
        let full_name = full_name.into();
        let sign = sign.into();
        if full_name.trim().is_empty() {
            return Err(FxRatesError::validation("full_name", "must not be blank"));
        }
        if sign.trim().is_empty() {
            return Err(FxRatesError::validation("sign", "must not be blank"));
        }
        Ok(Self {
            code: CurrencyCode::parse(code)?,
            full_name,
            sign,
        })
    }

    /// Attach the store-assigned id.
    pub fn with_id(self, id: CurrencyId) -> Currency {
        Currency {
            id,
            code: self.code,
            full_name: self.full_name,
            sign: self.sign,
        }
    }
}

/// A stored exchange rate: one unit of `base` buys `rate` units of `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRate {
    pub id: ExchangeRateId,
    pub base: Currency,
    pub target: Currency,
    pub rate: Decimal,
}

impl ExchangeRate {
    /// Get the (base, target) code pair.
    pub fn pair(&self) -> CurrencyPair {
        CurrencyPair::new(self.base.code.clone(), self.target.code.clone())
    }
}

/// An exchange rate that has not been saved yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewExchangeRate {
    pub base: Currency,
    pub target: Currency,
    pub rate: Decimal,
}

impl NewExchangeRate {
    /// Build a new rate, rejecting non-positive values.
    pub fn new(base: Currency, target: Currency, rate: Decimal) -> Result<Self> {
        ensure_positive_rate(rate)?;
        Ok(Self { base, target, rate })
    }

    /// Get the (base, target) code pair.
    pub fn pair(&self) -> CurrencyPair {
        CurrencyPair::new(self.base.code.clone(), self.target.code.clone())
    }

    /// Attach the store-assigned id.
    pub fn with_id(self, id: ExchangeRateId) -> ExchangeRate {
        ExchangeRate {
            id,
            base: self.base,
            target: self.target,
            rate: self.rate,
        }
    }
}

/// Reject rates that are zero or negative.
pub fn ensure_positive_rate(rate: Decimal) -> Result<()> {
    if rate <= Decimal::ZERO {
        return Err(FxRatesError::validation(
            "rate",
            format!("must be positive, got {}", rate),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn currency(id: i64, code: &str) -> Currency {
        NewCurrency::new(code, format!("{} name", code), "¤")
            .unwrap()
            .with_id(CurrencyId::new(id))
    }

    #[test]
    fn test_new_currency_validation() {
        assert!(NewCurrency::new("usd", "US Dollar", "$").is_ok());
        assert!(NewCurrency::new("usd", " ", "$").is_err());
        assert!(NewCurrency::new("usd", "US Dollar", "").is_err());
        assert!(NewCurrency::new("dollar", "US Dollar", "$").is_err());
    }

    #[test]
    fn test_rate_must_be_positive() {
        let usd = currency(1, "USD");
        let eur = currency(2, "EUR");

        assert!(NewExchangeRate::new(usd.clone(), eur.clone(), dec!(0.9)).is_ok());
        assert!(NewExchangeRate::new(usd.clone(), eur.clone(), Decimal::ZERO).is_err());
        assert!(NewExchangeRate::new(usd, eur, dec!(-1)).is_err());
    }

    #[test]
    fn test_rate_serializes_as_string() {
        let rate = NewExchangeRate::new(currency(1, "USD"), currency(2, "EUR"), dec!(0.90))
            .unwrap()
            .with_id(ExchangeRateId::new(7));

        let json = serde_json::to_value(&rate).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["base"]["code"], "USD");
        assert_eq!(json["rate"], "0.90");
        assert_eq!(rate.pair().to_string(), "USD/EUR");
    }
}
