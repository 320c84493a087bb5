//! Persistence contracts for currencies and exchange rates.
//!
//! Both traits are implemented on a backend's connection type. Whoever holds
//! the connection (a pooled connection or a unit of work) decides whether the
//! calls run standalone or inside a transaction.

use async_trait::async_trait;
use fxrates_common::{
    Currency, CurrencyCode, CurrencyId, ExchangeRate, NewCurrency, NewExchangeRate, Result,
};

/// Maximum rows returned by the list operations.
pub const LIST_LIMIT: usize = 500;

/// Currency records.
#[async_trait]
pub trait CurrencyStore: Send {
    /// Find a currency by code, ignoring case.
    async fn find_currency_by_code(&mut self, code: &CurrencyCode) -> Result<Option<Currency>>;

    /// Find the lowest-id currency whose full name matches, ignoring case.
    async fn find_currency_by_name(&mut self, full_name: &str) -> Result<Option<Currency>>;

    /// Find a currency by id.
    async fn find_currency_by_id(&mut self, id: CurrencyId) -> Result<Option<Currency>>;

    /// List up to [`LIST_LIMIT`] currencies ordered by id.
    async fn list_currencies(&mut self) -> Result<Vec<Currency>>;

    /// Insert a currency. Fails with `CurrencyAlreadyExists` on a duplicate code.
    async fn save_currency(&mut self, currency: NewCurrency) -> Result<Currency>;

    /// Overwrite the currency with the same id.
    ///
    /// Fails with `CurrencyNotFound` if the id is unknown and with
    /// `CurrencyAlreadyExists` if the new code belongs to another currency.
    async fn update_currency(&mut self, currency: &Currency) -> Result<Currency>;
}

/// Exchange rate records.
#[async_trait]
pub trait RateStore: Send {
    /// Find the rate stored for exactly (base, target).
    async fn find_rate(
        &mut self,
        base: &CurrencyCode,
        target: &CurrencyCode,
    ) -> Result<Option<ExchangeRate>>;

    /// All rates whose base currency is `base`.
    async fn find_rates_by_base(&mut self, base: &CurrencyCode) -> Result<Vec<ExchangeRate>>;

    /// All rates whose target currency is `target`.
    async fn find_rates_by_target(&mut self, target: &CurrencyCode) -> Result<Vec<ExchangeRate>>;

    /// List up to [`LIST_LIMIT`] rates ordered by id.
    async fn list_rates(&mut self) -> Result<Vec<ExchangeRate>>;

    /// Insert a rate. Fails with `RateAlreadyExists` if the pair is stored.
    async fn save_rate(&mut self, rate: NewExchangeRate) -> Result<ExchangeRate>;

    /// Overwrite the rate with the same id. Fails with `RateNotFound` if the
    /// id is unknown.
    async fn update_rate(&mut self, rate: &ExchangeRate) -> Result<ExchangeRate>;
}
