//! Currency conversion results.

use chrono::{DateTime, Utc};
use fxrates_common::{normalize_amount, normalize_rate, Currency, CurrencyCode, CurrencyPair};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::resolver::{ResolvedRate, Strategy};

/// A completed conversion of an amount between two currencies.
#[derive(Debug, Clone, Serialize)]
pub struct Conversion {
    /// Unique conversion ID.
    pub id: Uuid,
    pub from_currency: Currency,
    pub to_currency: Currency,
    /// Rate used, six fractional digits.
    pub rate: Decimal,
    /// Input amount, two fractional digits.
    pub amount: Decimal,
    /// `rate * amount`, two fractional digits.
    pub converted_amount: Decimal,
    /// How the rate was found.
    pub strategy: Strategy,
    /// Intermediate currency of a cross rate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub via: Option<CurrencyCode>,
    /// When the conversion was executed.
    pub executed_at: DateTime<Utc>,
}

impl Conversion {
    /// Apply a resolved rate to `amount`.
    ///
    /// The converted amount is computed from the unrounded rate and amount,
    /// then rounded half-up.
    pub fn new(
        from_currency: Currency,
        to_currency: Currency,
        resolved: ResolvedRate,
        amount: Decimal,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            from_currency,
            to_currency,
            rate: normalize_rate(resolved.rate),
            amount: normalize_amount(amount),
            converted_amount: normalize_amount(resolved.rate * amount),
            strategy: resolved.strategy,
            via: resolved.via,
            executed_at: Utc::now(),
        }
    }

    /// Get the currency pair.
    pub fn pair(&self) -> CurrencyPair {
        CurrencyPair::new(self.from_currency.code.clone(), self.to_currency.code.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxrates_common::{CurrencyId, NewCurrency};
    use rust_decimal_macros::dec;

    fn currency(id: i64, code: &str) -> Currency {
        NewCurrency::new(code, format!("{} name", code), "¤")
            .unwrap()
            .with_id(CurrencyId::new(id))
    }

    fn resolved(rate: Decimal, strategy: Strategy) -> ResolvedRate {
        ResolvedRate {
            pair: CurrencyPair::new("USD", "EUR"),
            rate,
            strategy,
            via: None,
        }
    }

    #[test]
    fn test_scales_and_rounding() {
        let conversion = Conversion::new(
            currency(1, "USD"),
            currency(2, "EUR"),
            resolved(dec!(0.9), Strategy::Direct),
            dec!(100),
        );

        assert_eq!(conversion.rate.to_string(), "0.900000");
        assert_eq!(conversion.amount.to_string(), "100.00");
        assert_eq!(conversion.converted_amount.to_string(), "90.00");
        assert_eq!(conversion.pair().to_string(), "USD/EUR");
    }

    #[test]
    fn test_converted_amount_rounds_half_up() {
        let conversion = Conversion::new(
            currency(2, "EUR"),
            currency(1, "USD"),
            resolved(dec!(1.111111), Strategy::Inverse),
            dec!(50),
        );

        // 55.55555 -> 55.56
        assert_eq!(conversion.converted_amount, dec!(55.56));
        assert_eq!(conversion.amount.to_string(), "50.00");
    }

    #[test]
    fn test_serializes_decimals_as_strings() {
        let conversion = Conversion::new(
            currency(1, "USD"),
            currency(2, "EUR"),
            resolved(dec!(0.9), Strategy::Direct),
            dec!(10.5),
        );

        let json = serde_json::to_value(&conversion).unwrap();
        assert_eq!(json["rate"], "0.900000");
        assert_eq!(json["amount"], "10.50");
        assert_eq!(json["converted_amount"], "9.45");
        assert_eq!(json["strategy"], "direct");
        assert_eq!(json["from_currency"]["code"], "USD");
        assert!(json.get("via").is_none());
    }
}
