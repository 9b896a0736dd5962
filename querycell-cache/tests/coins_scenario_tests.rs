//! End-to-end scenarios over the price document: several consumers sharing
//! one fetch, seeding, failure handling, and concurrent access from a
//! multi-threaded runtime.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use querycell_cache::{
    producer_fn, AsyncResult, QueryBinding, QueryCellError, QueryStatus, RegistryConfig,
    RegistryError, ResultRegistry,
};
use querycell_test_utils::{coins_fixture, init_test_tracing, Coins, MockProducer};

fn fetch_coins() -> MockProducer<Coins> {
    MockProducer::<Coins>::succeeding(coins_fixture()).gated()
}

#[tokio::test]
async fn test_three_consumers_share_one_fetch() {
    init_test_tracing();
    let registry = ResultRegistry::new();
    let producer = fetch_coins();
    let calls = producer.calls();
    let gate = producer.gate();

    let a = registry.get_or_create("coins", || producer).unwrap();
    let b = registry.get_or_create("coins", fetch_coins).unwrap();
    let c = registry.get_or_create("coins", fetch_coins).unwrap();
    assert!(AsyncResult::ptr_eq(&a, &b));
    assert!(AsyncResult::ptr_eq(&b, &c));

    let ops = [a.run(()), b.run(()), c.run(())];
    assert!(ops[0].same_as(&ops[1]) && ops[1].same_as(&ops[2]));
    assert_eq!(a.status(), QueryStatus::Loading);

    gate.open(1);
    let outcomes = futures_util::future::join_all(ops).await;
    assert_eq!(calls.get(), 1);

    let first = outcomes[0].clone().unwrap();
    for outcome in &outcomes {
        assert!(Arc::ptr_eq(&first, outcome.as_ref().unwrap()));
    }
    assert_eq!(first.bpi.usd.rate, "29,517.1230");
    assert_eq!(c.status(), QueryStatus::Succeeded);
    assert!(Arc::ptr_eq(&a.data().unwrap(), &c.data().unwrap()));
}

#[tokio::test]
async fn test_seed_overwrites_fetched_document() {
    let registry = ResultRegistry::new();
    let producer = MockProducer::<Coins>::succeeding(coins_fixture());
    let calls = producer.calls();

    let coins = registry.get_or_create("coins", || producer).unwrap();
    coins.run(()).await;
    assert_eq!(calls.get(), 1);

    let seeded: Coins =
        serde_json::from_str(r#"{"bpi":{"USD":{"rate":"1"},"EUR":{"rate":"2"}}}"#).unwrap();
    let after = registry
        .seed::<Coins, String, ()>("coins", seeded.clone())
        .unwrap();

    assert!(AsyncResult::ptr_eq(&coins, &after));
    assert_eq!(coins.status(), QueryStatus::Succeeded);
    assert_eq!(coins.data().as_deref(), Some(&seeded));
    assert_eq!(coins.data().unwrap().bpi.eur.rate, "2");
    assert_eq!(calls.get(), 1);
}

#[tokio::test]
async fn test_seed_during_fetch_wins() {
    let registry = ResultRegistry::new();
    let producer = fetch_coins();
    let gate = producer.gate();

    let coins = registry.get_or_create("coins", || producer).unwrap();
    let op = coins.run(());
    assert!(coins.is_loading());

    let seeded = Coins::from_rates("1", "2");
    registry
        .seed::<Coins, String, ()>("coins", seeded.clone())
        .unwrap();
    assert_eq!(coins.status(), QueryStatus::Succeeded);

    gate.open(1);
    let fetched = op.await.unwrap();
    // The superseded fetch still resolves for its awaiter.
    assert_eq!(fetched.bpi.usd.rate, "29,517.1230");
    assert_eq!(coins.data().as_deref(), Some(&seeded));
    assert_eq!(coins.status(), QueryStatus::Succeeded);
}

#[tokio::test]
async fn test_outage_keeps_last_prices() {
    let registry = ResultRegistry::new();
    let producer = MockProducer::<Coins>::scripted(vec![
        Ok(coins_fixture()),
        Err("503 service unavailable".to_string()),
        Ok(Coins::from_rates("30,000.0000", "28,000.0000")),
    ]);

    let coins = registry.get_or_create("coins", || producer).unwrap();
    coins.run(()).await;

    let outcome = coins.run(()).await;
    assert!(outcome.is_none());
    assert_eq!(coins.status(), QueryStatus::Failed);
    assert_eq!(coins.data().unwrap().bpi.usd.rate, "29,517.1230");
    assert_eq!(coins.error().as_deref().map(String::as_str), Some("503 service unavailable"));

    coins.run(()).await;
    assert_eq!(coins.status(), QueryStatus::Succeeded);
    assert!(coins.error().is_none());
    assert_eq!(coins.data().unwrap().bpi.usd.rate, "30,000.0000");
}

#[tokio::test]
async fn test_key_reused_with_other_type_is_rejected() {
    let registry = ResultRegistry::new();
    registry
        .get_or_create("coins", || MockProducer::<Coins>::succeeding(coins_fixture()))
        .unwrap();

    let err = registry
        .get_or_create("coins", || MockProducer::<u32>::succeeding(1))
        .unwrap_err();
    assert!(matches!(
        err,
        QueryCellError::Registry(RegistryError::TypeMismatch { ref key, .. }) if key == "coins"
    ));
    assert_eq!(registry.stats().type_mismatches, 1);
}

#[tokio::test]
async fn test_binding_renders_every_transition() {
    let registry = ResultRegistry::new();
    let renders = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&renders);

    let mut binding = QueryBinding::bind(
        &registry,
        "coins",
        || producer_fn(|(): ()| async { Ok::<_, String>(coins_fixture()) }),
        (),
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        },
    )
    .unwrap();

    let settled = binding.settled().await;
    assert_eq!(settled.status, QueryStatus::Succeeded);
    assert_eq!(renders.load(Ordering::SeqCst), 2);

    registry
        .seed::<Coins, String, ()>("coins", Coins::from_rates("1", "2"))
        .unwrap();
    assert_eq!(renders.load(Ordering::SeqCst), 3);

    binding.release();
    registry
        .seed::<Coins, String, ()>("coins", Coins::from_rates("3", "4"))
        .unwrap();
    assert_eq!(renders.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_fetches_across_threads() {
    init_test_tracing();
    let registry = ResultRegistry::with_config(RegistryConfig::new().with_name("prices")).unwrap();
    let producer = fetch_coins();
    let calls = producer.calls();
    let gate = producer.gate();
    registry.get_or_create("coins", || producer).unwrap();

    let joined = Arc::new(tokio::sync::Barrier::new(33));
    let mut tasks = Vec::new();
    for _ in 0..32 {
        let registry = registry.clone();
        let joined = Arc::clone(&joined);
        tasks.push(tokio::spawn(async move {
            let op = registry.fetch("coins", fetch_coins, ()).unwrap();
            joined.wait().await;
            op.await
        }));
    }

    // Every task holds the pending operation before it is released.
    joined.wait().await;
    gate.open(1);

    let mut outcomes = Vec::new();
    for task in tasks {
        outcomes.push(task.await.unwrap().unwrap());
    }
    assert_eq!(calls.get(), 1);
    for outcome in &outcomes {
        assert!(Arc::ptr_eq(&outcomes[0], outcome));
    }

    let stats = registry.stats();
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 32);
}
