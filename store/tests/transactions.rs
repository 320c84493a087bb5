//! Store calls through the pool and units of work on the in-memory backend.

use fxrates_common::{CurrencyCode, FxRatesError, NewCurrency, NewExchangeRate};
use fxrates_pool::{ConnectionPool, PoolConfig, UnitOfWork};
use fxrates_store::{CurrencyStore, MemoryConnectionManager, RateStore};
use rust_decimal_macros::dec;

async fn pool(size: usize) -> (ConnectionPool<MemoryConnectionManager>, MemoryConnectionManager) {
    let manager = MemoryConnectionManager::new();
    let pool = ConnectionPool::initialize(manager.clone(), PoolConfig::with_size(size))
        .await
        .unwrap();
    (pool, manager)
}

fn usd() -> NewCurrency {
    NewCurrency::new("USD", "US Dollar", "$").unwrap()
}

fn eur() -> NewCurrency {
    NewCurrency::new("EUR", "Euro", "€").unwrap()
}

#[tokio::test]
async fn committed_writes_are_visible_to_other_connections() {
    let (pool, _) = pool(2).await;

    let mut uow = UnitOfWork::begin(&pool).await.unwrap();
    let base = uow.save_currency(usd()).await.unwrap();
    let target = uow.save_currency(eur()).await.unwrap();
    uow.save_rate(NewExchangeRate::new(base, target, dec!(0.9)).unwrap())
        .await
        .unwrap();
    uow.commit().await.unwrap();

    let mut conn = pool.borrow().await.unwrap();
    let rate = conn
        .find_rate(&CurrencyCode::new("usd"), &CurrencyCode::new("eur"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rate.rate, dec!(0.9));
    assert_eq!(rate.base.full_name, "US Dollar");
}

#[tokio::test]
async fn aborted_writes_are_discarded() {
    let (pool, manager) = pool(1).await;

    let mut uow = UnitOfWork::begin(&pool).await.unwrap();
    uow.save_currency(usd()).await.unwrap();
    uow.abort().await.unwrap();

    assert_eq!(manager.database().currency_count(), 0);
}

#[tokio::test]
async fn failed_operation_rolls_back_earlier_writes() {
    let (pool, manager) = pool(1).await;

    let mut uow = UnitOfWork::begin(&pool).await.unwrap();
    let result = async {
        uow.save_currency(usd()).await?;
        uow.save_currency(usd()).await
    }
    .await;
    let result = uow.finish(result).await;

    assert!(matches!(result, Err(FxRatesError::CurrencyAlreadyExists(_))));
    assert_eq!(manager.database().currency_count(), 0);
    assert_eq!(pool.stats().in_use, 0);
}

#[tokio::test]
async fn dropped_unit_of_work_leaves_no_trace() {
    let (pool, manager) = pool(1).await;

    {
        let mut uow = UnitOfWork::begin(&pool).await.unwrap();
        uow.save_currency(usd()).await.unwrap();
    }

    let mut conn = pool.borrow().await.unwrap();
    assert!(!conn.in_transaction());
    assert_eq!(conn.pending_writes(), 0);
    assert!(conn.list_currencies().await.unwrap().is_empty());
    assert_eq!(manager.database().currency_count(), 0);
}

#[tokio::test]
async fn shutdown_closes_memory_connections() {
    let (pool, manager) = pool(3).await;
    assert_eq!(manager.database().open_connections(), 3);

    pool.shutdown().await;

    assert_eq!(manager.database().open_connections(), 0);
}

#[tokio::test]
async fn concurrent_saves_of_one_pair_conflict_as_already_exists() {
    let (pool, manager) = pool(2).await;
    let mut conn = pool.borrow().await.unwrap();
    let base = conn.save_currency(usd()).await.unwrap();
    let target = conn.save_currency(eur()).await.unwrap();
    conn.release().await.unwrap();

    let mut first = UnitOfWork::begin(&pool).await.unwrap();
    let mut second = UnitOfWork::begin(&pool).await.unwrap();

    let saved = first
        .save_rate(NewExchangeRate::new(base.clone(), target.clone(), dec!(0.9)).unwrap())
        .await;
    let duplicate = second
        .save_rate(NewExchangeRate::new(base, target, dec!(0.95)).unwrap())
        .await;

    first.finish(saved).await.unwrap();
    let err = second.finish(duplicate).await.unwrap_err();

    assert!(matches!(err, FxRatesError::RateAlreadyExists(_)));
    assert_eq!(err.error_code(), "RATE_ALREADY_EXISTS");
    assert_eq!(err.http_status(), 409);
    assert_eq!(manager.database().rate_count(), 1);
    assert_eq!(pool.stats().in_use, 0);
}
