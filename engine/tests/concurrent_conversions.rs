//! End-to-end conversions through a small pool on the in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use fxrates_engine::{ExchangeService, Strategy};
use fxrates_pool::{ConnectionPool, PoolConfig};
use fxrates_store::MemoryConnectionManager;
use rust_decimal_macros::dec;

async fn service(size: usize) -> Arc<ExchangeService<MemoryConnectionManager>> {
    let pool = ConnectionPool::initialize(MemoryConnectionManager::new(), PoolConfig::with_size(size))
        .await
        .unwrap();
    let service = ExchangeService::new(pool);

    service.add_currency("USD", "US Dollar", "$").await.unwrap();
    service.add_currency("EUR", "Euro", "€").await.unwrap();
    service.add_currency("RUB", "Russian Ruble", "₽").await.unwrap();
    Arc::new(service)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn opposite_conversions_on_two_connections_do_not_deadlock() {
    let service = service(2).await;
    service.save_rate("USD", "EUR", dec!(0.90)).await.unwrap();

    let forward = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.convert("USD", "EUR", dec!(100)).await })
    };
    let backward = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.convert("EUR", "USD", dec!(50)).await })
    };

    let (forward, backward) = tokio::time::timeout(Duration::from_secs(5), async {
        (forward.await.unwrap(), backward.await.unwrap())
    })
    .await
    .expect("conversions finished");

    let forward = forward.unwrap();
    assert_eq!(forward.converted_amount, dec!(90.00));
    assert_eq!(forward.strategy, Strategy::Direct);

    let backward = backward.unwrap();
    assert_eq!(backward.rate.to_string(), "1.111111");
    assert_eq!(backward.converted_amount, dec!(55.56));
    assert_eq!(backward.strategy, Strategy::Inverse);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_conversions_share_a_small_pool() {
    let service = service(2).await;
    service.save_rate("USD", "RUB", dec!(90.0)).await.unwrap();
    service.save_rate("EUR", "RUB", dec!(100.0)).await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..24 {
        let service = Arc::clone(&service);
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                service.convert("USD", "EUR", dec!(10)).await
            } else {
                service.convert("EUR", "USD", dec!(10)).await
            }
        }));
    }

    for task in tasks {
        let conversion = task.await.unwrap().unwrap();
        assert_eq!(conversion.strategy, Strategy::CrossViaTarget);
        assert_eq!(conversion.via.as_ref().map(|c| c.as_str()), Some("RUB"));
    }

    let stats = service.stats();
    assert!(stats.pool.peak_in_use <= 2);
    assert_eq!(stats.pool.in_use, 0);
    assert_eq!(stats.pool.borrows, stats.pool.releases);
    assert_eq!(stats.resolver.cross_via_target, 24);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn writers_and_readers_interleave() {
    let service = service(3).await;
    service.save_rate("USD", "EUR", dec!(0.90)).await.unwrap();

    let writer = {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            for step in 1..=10 {
                let rate = dec!(0.90) + rust_decimal::Decimal::new(step, 3);
                service.update_rate("USD", "EUR", rate).await.unwrap();
            }
        })
    };

    let mut readers = Vec::new();
    for _ in 0..8 {
        let service = Arc::clone(&service);
        readers.push(tokio::spawn(async move {
            let rate = service.resolve_rate("USD", "EUR").await.unwrap();
            assert!(rate >= dec!(0.90) && rate <= dec!(0.91));
        }));
    }

    writer.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }

    assert_eq!(service.rate("USD", "EUR").await.unwrap().rate, dec!(0.910));
}
