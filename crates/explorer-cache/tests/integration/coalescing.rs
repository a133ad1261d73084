use std::time::Duration;

use explorer_cache::config::CacheConfig;
use explorer_cache::{Cache, CacheError, CacheSettings};
use explorer_cache_test::{CountingProducer, setup};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_coalesces_across_threads() {
    setup();

    let cache = Cache::new(CacheConfig::default()).unwrap();
    let producer = CountingProducer::new().with_delay(Duration::from_millis(50));

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let cache = cache.clone();
            let producer = producer.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute(
                        "latest_blocks",
                        producer.producer(),
                        CacheSettings::ttl(Duration::from_secs(60)),
                    )
                    .await
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), 0);
    }
    assert_eq!(producer.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_producer_is_cancelled() {
    setup();

    let cache: Cache<usize> = Cache::new(CacheConfig::default()).unwrap();

    let result = cache
        .get_or_compute(
            "explodes",
            || async {
                if true {
                    panic!("producer blew up");
                }
                Ok(0)
            },
            CacheSettings::Bounded,
        )
        .await;
    assert!(matches!(result, Err(CacheError::Cancelled)));

    // the key is usable again afterwards
    let producer = CountingProducer::new();
    let value = cache
        .get_or_compute("explodes", producer.producer(), CacheSettings::Bounded)
        .await
        .unwrap();
    assert_eq!(value, 0);
}

#[tokio::test(start_paused = true)]
async fn test_distinct_keys_run_concurrently() {
    setup();

    let cache = Cache::new(CacheConfig::default()).unwrap();
    let producer = CountingProducer::new().with_delay(Duration::from_millis(200));

    let start = tokio::time::Instant::now();
    let (a, b) = tokio::join!(
        cache.get_or_compute("shard:1", producer.producer(), CacheSettings::Bounded),
        cache.get_or_compute("shard:2", producer.producer(), CacheSettings::Bounded),
    );
    a.unwrap();
    b.unwrap();

    // both computations overlapped instead of running one after the other
    assert_eq!(producer.calls(), 2);
    assert!(start.elapsed() < Duration::from_millis(400));
}
