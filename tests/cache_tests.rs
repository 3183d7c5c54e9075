//! 查询缓存与解析服务的集成测试

mod common;

use std::sync::Arc;
use std::time::Duration;

use ipgeo::cache::QueryCache;
use ipgeo::config::CacheConfig;
use ipgeo::services::geoip::{DataMerger, DatabasePaths, FallbackChain, GeoIpReader, GeoIpService};
use ipgeo::system::event::{EventBus, GeoEvent};
use ipgeo::utils::ManualClock;
use tempfile::TempDir;

use common::{ASN_DB, CITY_DB, REGION_DB, write_all_databases};

struct Fixture {
    _dir: TempDir,
    service: GeoIpService,
    clock: Arc<ManualClock>,
}

async fn fixture(config: CacheConfig) -> Fixture {
    let dir = TempDir::new().unwrap();
    write_all_databases(dir.path());

    let reader = Arc::new(GeoIpReader::new(DatabasePaths {
        city: Some(dir.path().join(CITY_DB)),
        asn: Some(dir.path().join(ASN_DB)),
        region: Some(dir.path().join(REGION_DB)),
    }));
    let clock = ManualClock::new(1_700_000_000_000);
    let cache = Arc::new(QueryCache::with_clock(config, clock.clone()));

    let service = GeoIpService::new(
        reader,
        DataMerger::without_geocoding(),
        cache,
        FallbackChain::empty(),
    );
    service.initialize().await.unwrap();

    Fixture {
        _dir: dir,
        service,
        clock,
    }
}

#[tokio::test]
async fn test_high_quality_records_live_longer() {
    let f = fixture(CacheConfig::default()).await;

    f.service.resolve("1.2.3.4").await.unwrap();
    f.service.resolve("8.8.8.8").await.unwrap();

    let cache = f.service.cache();
    let regional = cache.entry_ttl("1.2.3.4").unwrap();
    let global = cache.entry_ttl("8.8.8.8").unwrap();
    assert!(regional > global, "{} should exceed {}", regional, global);
}

#[tokio::test]
async fn test_expired_entry_is_resolved_again() {
    let f = fixture(CacheConfig::default()).await;

    f.service.resolve("8.8.8.8").await.unwrap();
    f.service.resolve("1.2.3.4").await.unwrap();
    let short_ttl = f.service.cache().entry_ttl("8.8.8.8").unwrap();
    let long_ttl = f.service.cache().entry_ttl("1.2.3.4").unwrap();
    assert!(long_ttl > short_ttl);

    f.clock.advance(short_ttl as i64 + 1);

    assert!(!f.service.cache().contains("8.8.8.8"));
    assert!(f.service.cache().contains("1.2.3.4"));

    let before = f.service.cache_stats();
    f.service.resolve("8.8.8.8").await.unwrap();
    let after = f.service.cache_stats();
    assert_eq!(after.misses, before.misses + 1);
    assert_eq!(f.service.cache().entry_hits("8.8.8.8"), Some(0));
}

#[tokio::test]
async fn test_capacity_evicts_least_recently_used() {
    let f = fixture(CacheConfig {
        max_size: 2,
        ..Default::default()
    })
    .await;

    f.service.resolve("8.8.8.8").await.unwrap();
    f.service.resolve("1.2.3.4").await.unwrap();
    // 访问 8.8.8.8，使 1.2.3.4 成为最久未使用
    f.service.resolve("8.8.8.8").await.unwrap();
    f.service.resolve("1.2.4.5").await.unwrap();

    let cache = f.service.cache();
    assert_eq!(cache.len(), 2);
    assert!(cache.contains("8.8.8.8"));
    assert!(cache.contains("1.2.4.5"));
    assert!(!cache.contains("1.2.3.4"));
}

#[tokio::test]
async fn test_hot_ips_and_export_import() {
    let f = fixture(CacheConfig::default()).await;

    for _ in 0..3 {
        f.service.resolve("1.2.3.4").await.unwrap();
    }
    f.service.resolve("8.8.8.8").await.unwrap();

    let hot = f.service.hot_ips(1);
    assert_eq!(hot.len(), 1);
    assert_eq!(hot[0].key, "1.2.3.4");
    assert_eq!(hot[0].hits, 2);

    let snapshot = f.service.cache().export();
    assert_eq!(snapshot.len(), 2);

    let restored = QueryCache::with_clock(CacheConfig::default(), f.clock.clone());
    assert_eq!(restored.import(snapshot), 2);
    assert_eq!(restored.entry_hits("1.2.3.4"), Some(2));
    assert_eq!(
        restored.entry_ttl("1.2.3.4"),
        f.service.cache().entry_ttl("1.2.3.4")
    );
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_task_publishes_events() {
    let clock = ManualClock::new(0);
    let cache = Arc::new(QueryCache::with_clock(
        CacheConfig {
            cleanup_interval_secs: 60,
            ..Default::default()
        },
        clock.clone(),
    ));
    let ip: std::net::IpAddr = "8.8.8.8".parse().unwrap();
    cache.set("8.8.8.8", ipgeo::GeoRecord::empty(&ip, "MaxMind"));
    let ttl = cache.entry_ttl("8.8.8.8").unwrap();

    let events = Arc::new(EventBus::default());
    let mut rx = events.subscribe();
    let handle = cache.clone().spawn_cleanup_task(Some(events.clone()));

    clock.advance(ttl as i64 + 1);
    tokio::time::sleep(Duration::from_secs(61)).await;

    let event = rx.recv().await.unwrap();
    assert_eq!(event, GeoEvent::CacheCleanup { removed: 1 });
    assert!(cache.is_empty());

    handle.abort();
}
