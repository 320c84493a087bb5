//! Exchange service: the operations the outer layer calls.

use fxrates_common::{
    ensure_positive_rate, Currency, CurrencyCode, CurrencyPair, ExchangeRate, FxRatesError,
    NewCurrency, NewExchangeRate, Result,
};
use fxrates_pool::{ConnectionPool, ManageConnection, PoolStats, PooledConnection, UnitOfWork};
use fxrates_store::{CurrencyStore, RateStore};
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use crate::conversion::Conversion;
use crate::resolver::{RateResolver, ResolvedRate, ResolverStats};

/// Currency, rate and conversion operations over a connection pool.
///
/// Operations that read or write more than once run in a single unit of
/// work; single reads and inserts borrow a connection just for the call.
pub struct ExchangeService<M: ManageConnection> {
    pool: ConnectionPool<M>,
    resolver: RateResolver,
}

impl<M> ExchangeService<M>
where
    M: ManageConnection,
    M::Connection: CurrencyStore + RateStore,
{
    /// Create a service over an initialized pool.
    pub fn new(pool: ConnectionPool<M>) -> Self {
        Self {
            pool,
            resolver: RateResolver::new(),
        }
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &ConnectionPool<M> {
        &self.pool
    }

    /// Resolve a usable rate for (from, to).
    #[instrument(skip(self))]
    pub async fn resolve(&self, from: &str, to: &str) -> Result<ResolvedRate> {
        let pair = parse_pair(from, to)?;

        let mut uow = UnitOfWork::begin(&self.pool).await?;
        let result = self.resolver.resolve(&mut *uow, &pair).await;
        uow.finish(result).await
    }

    /// Resolve a usable rate for (from, to) and return just the rate.
    pub async fn resolve_rate(&self, from: &str, to: &str) -> Result<Decimal> {
        Ok(self.resolve(from, to).await?.rate)
    }

    /// Convert `amount` of `from` into `to`.
    #[instrument(skip(self), fields(amount = %amount))]
    pub async fn convert(&self, from: &str, to: &str, amount: Decimal) -> Result<Conversion> {
        let pair = parse_pair(from, to)?;
        if amount <= Decimal::ZERO {
            return Err(FxRatesError::validation(
                "amount",
                format!("must be positive, got {}", amount),
            ));
        }

        let mut uow = UnitOfWork::begin(&self.pool).await?;
        let result = self.convert_in(&mut uow, &pair, amount).await;
        let conversion = uow.finish(result).await?;

        info!(
            conversion_id = %conversion.id,
            rate = %conversion.rate,
            converted_amount = %conversion.converted_amount,
            strategy = %conversion.strategy,
            "Conversion completed"
        );

        Ok(conversion)
    }

    /// Store a rate for a new (base, target) pair.
    #[instrument(skip(self), fields(rate = %rate))]
    pub async fn save_rate(&self, base: &str, target: &str, rate: Decimal) -> Result<ExchangeRate> {
        let pair = parse_pair(base, target)?;
        ensure_positive_rate(rate)?;

        let mut uow = UnitOfWork::begin(&self.pool).await?;
        let result = save_rate_in(&mut *uow, &pair, rate).await;
        let saved = uow.finish(result).await?;

        info!(rate_id = %saved.id, "Exchange rate saved");
        Ok(saved)
    }

    /// Replace the rate of an existing (base, target) pair.
    #[instrument(skip(self), fields(rate = %rate))]
    pub async fn update_rate(
        &self,
        base: &str,
        target: &str,
        rate: Decimal,
    ) -> Result<ExchangeRate> {
        let pair = parse_pair(base, target)?;
        ensure_positive_rate(rate)?;

        let mut uow = UnitOfWork::begin(&self.pool).await?;
        let result = update_rate_in(&mut *uow, &pair, rate).await;
        let updated = uow.finish(result).await?;

        info!(rate_id = %updated.id, "Exchange rate updated");
        Ok(updated)
    }

    /// List stored rates.
    pub async fn rates(&self) -> Result<Vec<ExchangeRate>> {
        let mut conn = self.pool.borrow().await?;
        let result = conn.list_rates().await;
        standalone(conn, result).await
    }

    /// Get the stored rate for exactly (base, target).
    pub async fn rate(&self, base: &str, target: &str) -> Result<ExchangeRate> {
        let pair = parse_pair(base, target)?;

        let mut conn = self.pool.borrow().await?;
        let result = conn.find_rate(&pair.base, &pair.target).await;
        standalone(conn, result)
            .await?
            .ok_or(FxRatesError::RateNotFound(pair))
    }

    /// List stored currencies.
    pub async fn currencies(&self) -> Result<Vec<Currency>> {
        let mut conn = self.pool.borrow().await?;
        let result = conn.list_currencies().await;
        standalone(conn, result).await
    }

    /// Get a currency by code.
    pub async fn currency(&self, code: &str) -> Result<Currency> {
        let code = CurrencyCode::parse(code)?;

        let mut conn = self.pool.borrow().await?;
        let result = conn.find_currency_by_code(&code).await;
        standalone(conn, result)
            .await?
            .ok_or_else(|| FxRatesError::CurrencyNotFound(code.to_string()))
    }

    /// Get a currency by its full name, ignoring case.
    pub async fn currency_by_name(&self, full_name: &str) -> Result<Currency> {
        let full_name = full_name.trim();
        if full_name.is_empty() {
            return Err(FxRatesError::validation("full_name", "cannot be blank"));
        }

        let mut conn = self.pool.borrow().await?;
        let result = conn.find_currency_by_name(full_name).await;
        standalone(conn, result)
            .await?
            .ok_or_else(|| FxRatesError::CurrencyNotFound(full_name.to_string()))
    }

    /// Store a new currency.
    #[instrument(skip(self, full_name, sign))]
    pub async fn add_currency(&self, code: &str, full_name: &str, sign: &str) -> Result<Currency> {
        let currency = NewCurrency::new(code, full_name, sign)?;

        let mut conn = self.pool.borrow().await?;
        let result = conn.save_currency(currency).await;
        let saved = standalone(conn, result).await?;

        info!(currency_id = %saved.id, "Currency added");
        Ok(saved)
    }

    /// Change the display name and sign of an existing currency.
    #[instrument(skip(self, full_name, sign))]
    pub async fn update_currency(
        &self,
        code: &str,
        full_name: &str,
        sign: &str,
    ) -> Result<Currency> {
        let changes = NewCurrency::new(code, full_name, sign)?;

        let mut uow = UnitOfWork::begin(&self.pool).await?;
        let result = update_currency_in(&mut *uow, changes).await;
        uow.finish(result).await
    }

    /// Get pool and resolver statistics.
    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            pool: self.pool.stats(),
            resolver: self.resolver.stats(),
        }
    }

    /// Close the pool. Later calls fail with a storage error.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    async fn convert_in(
        &self,
        uow: &mut UnitOfWork<M>,
        pair: &CurrencyPair,
        amount: Decimal,
    ) -> Result<Conversion> {
        let from = require_currency(&mut **uow, &pair.base).await?;
        let to = require_currency(&mut **uow, &pair.target).await?;
        let resolved = self.resolver.resolve(&mut **uow, pair).await?;
        Ok(Conversion::new(from, to, resolved, amount))
    }
}

/// Pool and resolver statistics.
#[derive(Debug, Clone, Copy)]
pub struct ServiceStats {
    pub pool: PoolStats,
    pub resolver: ResolverStats,
}

fn parse_pair(base: &str, target: &str) -> Result<CurrencyPair> {
    Ok(CurrencyPair {
        base: CurrencyCode::parse(base)?,
        target: CurrencyCode::parse(target)?,
    })
}

/// Hand a standalone connection back and pass the call's result through.
async fn standalone<M, T>(conn: PooledConnection<M>, result: Result<T>) -> Result<T>
where
    M: ManageConnection,
{
    if let Err(e) = conn.release().await {
        warn!(error = %e, "Failed to reset connection after standalone call");
    }
    result
}

async fn require_currency<S>(store: &mut S, code: &CurrencyCode) -> Result<Currency>
where
    S: CurrencyStore + ?Sized,
{
    store
        .find_currency_by_code(code)
        .await?
        .ok_or_else(|| FxRatesError::CurrencyNotFound(code.to_string()))
}

async fn save_rate_in<S>(store: &mut S, pair: &CurrencyPair, rate: Decimal) -> Result<ExchangeRate>
where
    S: CurrencyStore + RateStore + ?Sized,
{
    let base = require_currency(store, &pair.base).await?;
    let target = require_currency(store, &pair.target).await?;
    store.save_rate(NewExchangeRate::new(base, target, rate)?).await
}

async fn update_rate_in<S>(
    store: &mut S,
    pair: &CurrencyPair,
    rate: Decimal,
) -> Result<ExchangeRate>
where
    S: CurrencyStore + RateStore + ?Sized,
{
    let base = require_currency(store, &pair.base).await?;
    let target = require_currency(store, &pair.target).await?;

    let mut existing = store
        .find_rate(&pair.base, &pair.target)
        .await?
        .ok_or_else(|| FxRatesError::RateNotFound(pair.clone()))?;
    existing.base = base;
    existing.target = target;
    existing.rate = rate;

    store.update_rate(&existing).await
}

async fn update_currency_in<S>(store: &mut S, changes: NewCurrency) -> Result<Currency>
where
    S: CurrencyStore + ?Sized,
{
    let mut currency = require_currency(store, &changes.code).await?;
    currency.full_name = changes.full_name;
    currency.sign = changes.sign;

    store.update_currency(&currency).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxrates_pool::PoolConfig;
    use fxrates_store::MemoryConnectionManager;
    use rust_decimal_macros::dec;

    async fn service() -> ExchangeService<MemoryConnectionManager> {
        let pool = ConnectionPool::initialize(MemoryConnectionManager::new(), PoolConfig::with_size(2))
            .await
            .unwrap();
        let service = ExchangeService::new(pool);
        for (code, name, sign) in [
            ("USD", "US Dollar", "$"),
            ("EUR", "Euro", "€"),
            ("RUB", "Russian Ruble", "₽"),
            ("JPY", "Yen", "¥"),
        ] {
            service.add_currency(code, name, sign).await.unwrap();
        }
        service
    }

    #[tokio::test]
    async fn test_convert_direct() {
        let service = service().await;
        service.save_rate("USD", "EUR", dec!(0.9)).await.unwrap();

        let conversion = service.convert("usd", "eur", dec!(100)).await.unwrap();

        assert_eq!(conversion.from_currency.code.as_str(), "USD");
        assert_eq!(conversion.to_currency.full_name, "Euro");
        assert_eq!(conversion.rate.to_string(), "0.900000");
        assert_eq!(conversion.amount.to_string(), "100.00");
        assert_eq!(conversion.converted_amount.to_string(), "90.00");
    }

    #[tokio::test]
    async fn test_convert_requires_both_currencies() {
        let service = service().await;

        let result = service.convert("USD", "GBP", dec!(1)).await;

        match result {
            Err(FxRatesError::CurrencyNotFound(code)) => assert_eq!(code, "GBP"),
            other => panic!("expected CurrencyNotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_convert_rejects_bad_input() {
        let service = service().await;

        let result = service.convert("USD", "EUR", dec!(0)).await;
        assert!(matches!(result, Err(FxRatesError::Validation { .. })));

        let result = service.convert("US", "EUR", dec!(1)).await;
        assert!(matches!(result, Err(FxRatesError::Validation { .. })));
        assert_eq!(service.stats().pool.borrows, 4);
    }

    #[tokio::test]
    async fn test_resolve_rate_scenarios() {
        let service = service().await;
        service.save_rate("USD", "RUB", dec!(90.0)).await.unwrap();
        service.save_rate("EUR", "RUB", dec!(100.0)).await.unwrap();

        assert_eq!(
            service.resolve_rate("USD", "EUR").await.unwrap().to_string(),
            "0.900000"
        );
        assert!(service.resolve_rate("USD", "JPY").await.unwrap_err().is_not_found());

        let stats = service.stats();
        assert_eq!(stats.resolver.cross_via_target, 1);
        assert_eq!(stats.resolver.not_found, 1);
        assert_eq!(stats.pool.in_use, 0);
    }

    #[tokio::test]
    async fn test_same_currency_pair_is_not_found() {
        let service = service().await;
        service.save_rate("USD", "EUR", dec!(0.9)).await.unwrap();

        let err = service.resolve("USD", "usd").await.unwrap_err();

        assert!(matches!(err, FxRatesError::RateNotFound(_)));
        assert_eq!(service.stats().resolver.not_found, 1);
        assert_eq!(service.stats().pool.in_use, 0);
    }

    #[tokio::test]
    async fn test_save_rate_errors() {
        let service = service().await;
        service.save_rate("USD", "EUR", dec!(0.9)).await.unwrap();

        assert!(matches!(
            service.save_rate("USD", "EUR", dec!(0.95)).await,
            Err(FxRatesError::RateAlreadyExists(_))
        ));
        assert!(matches!(
            service.save_rate("USD", "GBP", dec!(0.8)).await,
            Err(FxRatesError::CurrencyNotFound(_))
        ));
        assert!(matches!(
            service.save_rate("USD", "JPY", dec!(-1)).await,
            Err(FxRatesError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_rate() {
        let service = service().await;
        let saved = service.save_rate("USD", "EUR", dec!(0.9)).await.unwrap();

        let updated = service.update_rate("usd", "eur", dec!(0.92)).await.unwrap();

        assert_eq!(updated.id, saved.id);
        assert_eq!(updated.rate, dec!(0.92));
        assert_eq!(service.rate("USD", "EUR").await.unwrap().rate, dec!(0.92));
        assert!(matches!(
            service.update_rate("EUR", "USD", dec!(1.1)).await,
            Err(FxRatesError::RateNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_currency_operations() {
        let service = service().await;

        assert_eq!(service.currencies().await.unwrap().len(), 4);
        assert_eq!(service.currency("eur").await.unwrap().sign, "€");
        assert_eq!(
            service.currency_by_name(" us dollar ").await.unwrap().code.as_str(),
            "USD"
        );
        assert!(service.currency_by_name("Pound").await.unwrap_err().is_not_found());
        assert!(matches!(
            service.currency_by_name("  ").await,
            Err(FxRatesError::Validation { .. })
        ));
        assert!(service.currency("GBP").await.unwrap_err().is_not_found());
        assert!(matches!(
            service.add_currency("usd", "Dollar", "$").await,
            Err(FxRatesError::CurrencyAlreadyExists(_))
        ));

        let updated = service
            .update_currency("JPY", "Japanese Yen", "¥")
            .await
            .unwrap();
        assert_eq!(updated.full_name, "Japanese Yen");
        assert_eq!(service.currency("JPY").await.unwrap().full_name, "Japanese Yen");
    }

    #[tokio::test]
    async fn test_rates_listing() {
        let service = service().await;
        service.save_rate("USD", "EUR", dec!(0.9)).await.unwrap();
        service.save_rate("EUR", "RUB", dec!(100)).await.unwrap();

        let rates = service.rates().await.unwrap();

        assert_eq!(rates.len(), 2);
        assert_eq!(rates[0].pair().to_string(), "USD/EUR");
        assert!(service.rate("RUB", "EUR").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_failed_operations_return_connections() {
        let service = service().await;

        for _ in 0..5 {
            let _ = service.convert("USD", "EUR", dec!(1)).await;
            let _ = service.update_rate("USD", "EUR", dec!(1)).await;
        }

        let stats = service.stats().pool;
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.borrows, stats.releases);
        assert_eq!(stats.dirty_returns, 0);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_calls() {
        let service = service().await;
        service.shutdown().await;

        let result = service.currencies().await;
        assert_eq!(result.unwrap_err().error_code(), "POOL_CLOSED");
    }
}
