//! 查询缓存与限流器性能基准测试

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use ipgeo::GeoRecord;
use ipgeo::cache::QueryCache;
use ipgeo::config::{CacheConfig, RateLimitConfig};
use ipgeo::rate_limit::RateLimiter;
use ipgeo::services::geoip::{
    Accuracy, DataMerger, DatabasePaths, FallbackChain, GeoIpReader, GeoIpService,
};
use std::hint::black_box;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

fn create_test_record(i: u32) -> GeoRecord {
    let ip = IpAddr::V4(Ipv4Addr::from(0x0808_0000 + i));
    let mut record = GeoRecord::empty(&ip, "MaxMind");
    record.country = "美国".to_string();
    record.country_code = "US".to_string();
    record.city = Some("山景城".to_string());
    record.accuracy = Accuracy::Medium;
    record
}

fn filled_cache(size: u32) -> QueryCache {
    let cache = QueryCache::new(CacheConfig {
        max_size: size as usize,
        ..Default::default()
    });
    for i in 0..size {
        let record = create_test_record(i);
        cache.set(&record.ip.clone(), record);
    }
    cache
}

// ============== QueryCache 基准测试 ==============

fn bench_cache_get_hit(c: &mut Criterion) {
    let cache = filled_cache(1000);
    let key = create_test_record(500).ip;

    c.bench_function("query_cache/get_hit", |b| {
        b.iter(|| {
            assert!(cache.get(black_box(&key)).is_some());
        });
    });
}

fn bench_cache_get_miss(c: &mut Criterion) {
    let cache = filled_cache(1000);

    c.bench_function("query_cache/get_miss", |b| {
        b.iter(|| {
            assert!(cache.get(black_box("203.0.113.9")).is_none());
        });
    });
}

fn bench_cache_set_with_eviction(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_cache/set_evicting");

    for size in [100u32, 1_000, 10_000] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let cache = filled_cache(size);
            let mut i = size;
            b.iter(|| {
                i = i.wrapping_add(1);
                let record = create_test_record(i);
                cache.set(&record.ip.clone(), record);
            });
        });
    }

    group.finish();
}

fn bench_compute_ttl(c: &mut Criterion) {
    let cache = QueryCache::new(CacheConfig::default());
    let record = create_test_record(1);

    c.bench_function("query_cache/compute_ttl", |b| {
        b.iter(|| cache.compute_ttl(black_box(&record)));
    });
}

// ============== 解析服务缓存路径 ==============

fn bench_service_resolve_cached(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let service = Arc::new(GeoIpService::new(
        Arc::new(GeoIpReader::new(DatabasePaths::default())),
        DataMerger::without_geocoding(),
        Arc::new(QueryCache::new(CacheConfig::default())),
        FallbackChain::empty(),
    ));

    // 私有地址无需本地库即可解析
    rt.block_on(async {
        service.resolve("192.168.1.10").await.unwrap();
    });

    c.bench_function("service/resolve_cached", |b| {
        b.to_async(&rt).iter(|| {
            let s = Arc::clone(&service);
            async move {
                s.resolve(black_box("192.168.1.10")).await.unwrap();
            }
        });
    });
}

// ============== 限流器 ==============

fn bench_rate_limiter_check(c: &mut Criterion) {
    let limiter = RateLimiter::new(RateLimitConfig {
        window_ms: 60_000,
        max_requests: u32::MAX,
    });
    let keys: Vec<String> = (0..1000).map(|i| format!("10.0.{}.{}", i / 256, i % 256)).collect();

    c.bench_function("rate_limiter/check", |b| {
        let mut i = 0usize;
        b.iter(|| {
            i = (i + 1) % keys.len();
            limiter.check(black_box(&keys[i]))
        });
    });
}

criterion_group!(
    benches,
    bench_cache_get_hit,
    bench_cache_get_miss,
    bench_cache_set_with_eviction,
    bench_compute_ttl,
    bench_service_resolve_cached,
    bench_rate_limiter_check,
);
criterion_main!(benches);
