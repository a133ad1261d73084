use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::time::{self, Instant};

use explorer_cache_test::{CountingProducer, setup};

use crate::config::CacheConfig;
use crate::{Backend, Cache, CacheError, CacheKey, CacheLookup, CacheSettings, CacheStatus};

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn test_cache(grace_period: Duration) -> Cache<usize> {
    Cache::new(CacheConfig {
        grace_period,
        ..CacheConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_coalesces_concurrent_misses() {
    setup();
    time::pause();

    let cache = test_cache(ms(1000));
    let producer = CountingProducer::new().with_delay(ms(100));

    for settings in [CacheSettings::Bounded, CacheSettings::ttl(ms(5000))] {
        let key = format!("coalesce/{}", settings.backend());
        let requests = (0..10).map(|_| {
            cache.get_or_compute_with_status(key.as_str(), producer.producer(), settings)
        });
        let results = join_all(requests).await;

        let expected = producer.calls() - 1;
        for result in results {
            assert_eq!(result.unwrap(), (expected, CacheStatus::Miss));
        }
    }

    // one computation per backend
    assert_eq!(producer.calls(), 2);
}

#[tokio::test]
async fn test_shares_identical_error() {
    setup();
    time::pause();

    let cache = test_cache(ms(1000));
    let producer = CountingProducer::new().with_delay(ms(100)).failing();

    let requests = (0..3).map(|_| {
        cache.get_or_compute("broken", producer.producer(), CacheSettings::ttl(ms(5000)))
    });
    let errors: Vec<_> = join_all(requests)
        .await
        .into_iter()
        .map(|result| result.unwrap_err())
        .collect();

    assert_eq!(producer.calls(), 1);
    let CacheError::Computation(first) = &errors[0] else {
        panic!("unexpected error: {:?}", errors[0]);
    };
    assert_eq!(first.to_string(), "computation 0 failed");
    for error in &errors[1..] {
        let CacheError::Computation(other) = error else {
            panic!("unexpected error: {error:?}");
        };
        assert!(Arc::ptr_eq(first, other));
    }

    // errors are never cached
    let key = CacheKey::from("broken");
    assert_eq!(cache.lookup(&key, Backend::TimeToLive), CacheLookup::Miss);
}

#[tokio::test]
async fn test_failure_is_not_sticky() {
    setup();
    time::pause();

    let cache = test_cache(ms(1000));
    let failing = CountingProducer::new().failing();

    let result = cache
        .get_or_compute("flaky", failing.producer(), CacheSettings::Bounded)
        .await;
    assert!(result.is_err());

    let working = CountingProducer::new();
    let value = cache
        .get_or_compute("flaky", working.producer(), CacheSettings::Bounded)
        .await
        .unwrap();
    assert_eq!(value, 0);
    assert_eq!(working.calls(), 1);
}

#[tokio::test]
async fn test_ttl_freshness() {
    setup();
    time::pause();

    let cache = test_cache(ms(1000));
    let producer = CountingProducer::new();
    let settings = CacheSettings::ttl(ms(1000));

    let first = cache
        .get_or_compute_with_status("fresh", producer.producer(), settings)
        .await
        .unwrap();
    assert_eq!(first, (0, CacheStatus::Miss));

    time::advance(ms(999)).await;
    let second = cache
        .get_or_compute_with_status("fresh", producer.producer(), settings)
        .await
        .unwrap();
    assert_eq!(second, (0, CacheStatus::Hit));
    assert_eq!(producer.calls(), 1);

    // an entry whose expiry equals the current instant is stale
    time::advance(ms(1)).await;
    let key = CacheKey::from("fresh");
    assert_eq!(cache.lookup(&key, Backend::TimeToLive), CacheLookup::Expired(0));
}

#[tokio::test]
async fn test_stale_while_revalidate() {
    setup();
    time::pause();

    let cache = test_cache(ms(1000));
    let start = Instant::now();
    let key = CacheKey::from("latest_blocks/shard:1");
    let settings = CacheSettings::ttl(ms(5000));

    let initial = CountingProducer::new();
    let value = cache
        .get_or_compute(key.clone(), initial.producer(), settings)
        .await
        .unwrap();
    assert_eq!(value, 0);
    assert_eq!(cache.expires_at(&key), Some(start + ms(5000)));

    // still fresh
    time::sleep_until(start + ms(4000)).await;
    let hit = cache
        .get_or_compute_with_status(key.clone(), initial.producer(), settings)
        .await
        .unwrap();
    assert_eq!(hit, (0, CacheStatus::Hit));
    assert_eq!(initial.calls(), 1);

    // stale: the old value comes back without waiting for the refresh
    time::sleep_until(start + ms(6000)).await;
    let refresh = initial.clone().with_delay(ms(100));
    let settled_at = Arc::new(Mutex::new(None));
    let recording_refresh = {
        let produce = refresh.producer();
        let settled_at = Arc::clone(&settled_at);
        move || async move {
            let value = produce().await;
            *settled_at.lock() = Some(Instant::now());
            value
        }
    };
    let stale = cache
        .get_or_compute_with_status(key.clone(), recording_refresh, settings)
        .now_or_never()
        .expect("stale value must be served without waiting")
        .unwrap();
    assert_eq!(stale, (0, CacheStatus::Expired));

    // the refresh is running, a second caller still sees the stale value
    time::sleep_until(start + ms(6050)).await;
    assert_eq!(initial.calls(), 2);
    let another = cache
        .get_or_compute_with_status(key.clone(), refresh.producer(), settings)
        .await
        .unwrap();
    assert_eq!(another, (0, CacheStatus::Expired));

    // the refresh settles shortly after 6100
    time::sleep_until(start + ms(6200)).await;
    assert_eq!(initial.calls(), 2);
    assert_eq!(cache.lookup(&key, Backend::TimeToLive), CacheLookup::Hit(1));

    let settled_at = settled_at.lock().expect("refresh has settled");
    assert!(settled_at >= start + ms(6100) && settled_at < start + ms(6110));
    assert_eq!(cache.expires_at(&key), Some(settled_at + ms(5000)));
}

#[tokio::test]
async fn test_failed_refresh_keeps_stale_value() {
    setup();
    time::pause();

    let cache = test_cache(ms(1000));
    let key = CacheKey::from("shard_stats");
    let settings = CacheSettings::ttl(ms(1000));

    cache.insert(key.clone(), 42, &settings);
    let expires_at = cache.expires_at(&key).unwrap();

    time::advance(ms(1500)).await;
    let failing = CountingProducer::new().with_delay(ms(100)).failing();
    let stale = cache
        .get_or_compute_with_status(key.clone(), failing.producer(), settings)
        .await
        .unwrap();
    assert_eq!(stale, (42, CacheStatus::Expired));

    time::sleep(ms(200)).await;
    assert_eq!(failing.calls(), 1);
    assert_eq!(cache.lookup(&key, Backend::TimeToLive), CacheLookup::Expired(42));
    assert_eq!(cache.expires_at(&key), Some(expires_at));

    // the next access attempts another refresh
    let stale = cache
        .get_or_compute_with_status(key.clone(), failing.producer(), settings)
        .await
        .unwrap();
    assert_eq!(stale, (42, CacheStatus::Expired));
    time::sleep(ms(200)).await;
    assert_eq!(failing.calls(), 2);
}

#[tokio::test]
async fn test_require_fresh_waits() {
    setup();
    time::pause();

    let cache = test_cache(ms(1000));
    let key = CacheKey::from("tx_rate");

    cache.insert(key.clone(), 7, &CacheSettings::ttl(ms(1000)));
    time::advance(ms(1500)).await;

    let producer = CountingProducer::new().with_delay(ms(100));
    let before = Instant::now();
    let settings = CacheSettings::fresh_ttl(ms(1000));
    let fresh = cache
        .get_or_compute_with_status(key.clone(), producer.producer(), settings)
        .await
        .unwrap();
    assert_eq!(fresh, (0, CacheStatus::Miss));
    assert!(Instant::now() >= before + ms(100));
    assert_eq!(cache.lookup(&key, Backend::TimeToLive), CacheLookup::Hit(0));

    // a failure is reported to the caller, and the stale value stays in place
    time::advance(ms(1500)).await;
    let failing = CountingProducer::new().failing();
    let result = cache
        .get_or_compute(key.clone(), failing.producer(), settings)
        .await;
    assert!(result.is_err());
    assert_eq!(cache.lookup(&key, Backend::TimeToLive), CacheLookup::Expired(0));
}

#[tokio::test]
async fn test_bounded_evicts_least_recently_used() {
    setup();
    time::pause();

    let cache: Cache<usize> = Cache::new(CacheConfig {
        bounded_capacity: 2,
        ..CacheConfig::default()
    })
    .unwrap();
    let producer = CountingProducer::new();

    for key in ["a", "b"] {
        cache
            .get_or_compute(key, producer.producer(), CacheSettings::Bounded)
            .await
            .unwrap();
    }

    // touching `a` makes `b` the least recently used entry
    let hit = cache
        .get_or_compute_with_status("a", producer.producer(), CacheSettings::Bounded)
        .await
        .unwrap();
    assert_eq!(hit, (0, CacheStatus::Hit));

    let miss = cache
        .get_or_compute_with_status("c", producer.producer(), CacheSettings::Bounded)
        .await
        .unwrap();
    assert_eq!(miss, (2, CacheStatus::Miss));

    assert_eq!(cache.get(&"a".into(), Backend::Bounded), Some(0));
    assert_eq!(cache.get(&"b".into(), Backend::Bounded), None);
    assert_eq!(cache.get(&"c".into(), Backend::Bounded), Some(2));

    // bounded values never turn stale
    time::advance(Duration::from_secs(3600)).await;
    assert_eq!(cache.lookup(&"a".into(), Backend::Bounded), CacheLookup::Hit(0));
}

#[tokio::test]
async fn test_backends_are_separate() {
    setup();
    time::pause();

    let cache = test_cache(ms(1000));
    let producer = CountingProducer::new().with_delay(ms(100));

    let (bounded, timed) = futures::join!(
        cache.get_or_compute("shared", producer.producer(), CacheSettings::Bounded),
        cache.get_or_compute("shared", producer.producer(), CacheSettings::ttl(ms(1000))),
    );
    assert_eq!(producer.calls(), 2);
    assert_ne!(bounded.unwrap(), timed.unwrap());

    let key = CacheKey::from("only_bounded");
    cache.insert(key.clone(), 1, &CacheSettings::Bounded);
    assert_eq!(cache.lookup(&key, Backend::TimeToLive), CacheLookup::Miss);
}

#[tokio::test]
async fn test_caller_going_away_does_not_cancel() {
    setup();
    time::pause();

    let cache = test_cache(ms(1000));
    let producer = CountingProducer::new().with_delay(ms(500));

    let timed_out = time::timeout(
        ms(100),
        cache.get_or_compute("slow", producer.producer(), CacheSettings::ttl(ms(1000))),
    )
    .await;
    assert!(timed_out.is_err());

    // joins the computation that is still running
    let late = CountingProducer::new();
    let value = cache
        .get_or_compute("slow", late.producer(), CacheSettings::ttl(ms(1000)))
        .await
        .unwrap();
    assert_eq!(value, 0);
    assert_eq!(producer.calls(), 1);
    assert_eq!(late.calls(), 0);
}

#[tokio::test]
async fn test_sweeper_spares_refreshing_entries() {
    setup();
    time::pause();

    let cache = test_cache(ms(1000));
    let start = Instant::now();
    let key = CacheKey::from("refreshing");
    let settings = CacheSettings::ttl(ms(1000));

    cache.insert(key.clone(), 5, &settings);

    // past expiry and grace period, but a refresh is pending
    time::sleep_until(start + ms(2500)).await;
    let refresh = CountingProducer::new().with_delay(ms(1000));
    let stale = cache
        .get_or_compute(key.clone(), refresh.producer(), settings)
        .await
        .unwrap();
    assert_eq!(stale, 5);
    assert_eq!(cache.sweeper().sweep_now(), 0);
    assert_eq!(cache.lookup(&key, Backend::TimeToLive), CacheLookup::Expired(5));

    // the refresh settled at 3500
    time::sleep_until(start + ms(3600)).await;
    assert_eq!(cache.sweeper().sweep_now(), 0);
    assert_eq!(cache.lookup(&key, Backend::TimeToLive), CacheLookup::Hit(0));

    time::sleep_until(start + ms(5600)).await;
    assert_eq!(cache.sweeper().sweep_now(), 1);
    assert_eq!(cache.lookup(&key, Backend::TimeToLive), CacheLookup::Miss);
}

#[tokio::test]
async fn test_background_sweeper() {
    setup();
    time::pause();

    let cache = Cache::new(CacheConfig {
        sweep_interval: ms(1000),
        grace_period: ms(500),
        ..CacheConfig::default()
    })
    .unwrap();
    let key = CacheKey::from("swept");
    cache.insert(key.clone(), 1, &CacheSettings::ttl(ms(1000)));

    cache.sweeper().start();
    assert!(cache.sweeper().is_running());

    // expires at 1000, evictable after 1500, swept by the tick at 2000
    time::sleep(ms(1900)).await;
    assert_eq!(cache.get(&key, Backend::TimeToLive), Some(1));
    time::sleep(ms(200)).await;
    assert_eq!(cache.get(&key, Backend::TimeToLive), None);

    cache.sweeper().stop();
    assert!(!cache.sweeper().is_running());
}

#[test]
fn test_invalid_config() {
    let result = Cache::<usize>::new(CacheConfig {
        bounded_capacity: 0,
        ..CacheConfig::default()
    });
    assert!(result.is_err());
}
