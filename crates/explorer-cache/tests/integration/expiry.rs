use std::time::Duration;

use explorer_cache::config::CacheConfig;
use explorer_cache::{Backend, Cache, CacheKey, CacheLookup, CacheSettings, CacheStatus};
use explorer_cache_test::{CountingProducer, setup};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_refresh_replaces_stale_value() {
    setup();

    let cache = Cache::new(CacheConfig::default()).unwrap();
    let producer = CountingProducer::new();
    let settings = CacheSettings::ttl(Duration::from_millis(50));
    let key = CacheKey::from("shard_stats");

    let (value, status) = cache
        .get_or_compute_with_status(key.clone(), producer.producer(), settings)
        .await
        .unwrap();
    assert_eq!((value, status), (0, CacheStatus::Miss));

    tokio::time::sleep(Duration::from_millis(100)).await;
    let (value, status) = cache
        .get_or_compute_with_status(key.clone(), producer.producer(), settings)
        .await
        .unwrap();
    assert_eq!((value, status), (0, CacheStatus::Expired));

    // wait for the background refresh to land
    for _ in 0..50 {
        if cache.lookup(&key, Backend::TimeToLive) == CacheLookup::Hit(1) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(cache.lookup(&key, Backend::TimeToLive), CacheLookup::Hit(1));
    assert_eq!(producer.calls(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sweeper_lifecycle() {
    setup();

    let cache = Cache::new(CacheConfig {
        sweep_interval: Duration::from_millis(20),
        grace_period: Duration::from_millis(10),
        ..CacheConfig::default()
    })
    .unwrap();
    let key = CacheKey::from("short_lived");
    cache.insert(key.clone(), 1, &CacheSettings::ttl(Duration::from_millis(10)));

    let sweeper = cache.sweeper();
    sweeper.start();
    // starting twice keeps a single loop
    sweeper.start();
    assert!(sweeper.is_running());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(cache.get(&key, Backend::TimeToLive), None);

    sweeper.stop();
    assert!(!sweeper.is_running());

    cache.insert(key.clone(), 2, &CacheSettings::ttl(Duration::from_millis(10)));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(cache.get(&key, Backend::TimeToLive), Some(2));
}
