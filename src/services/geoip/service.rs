//! IP 地理位置查询流水线
//!
//! 缓存 → 私有地址短路 → 本地数据库 → 合并 → 写缓存；
//! 本地流水线失败时转入 fallback 链，结果同样写入缓存。
//! 同一地址的并发未命中查询合并为一次解析。

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::fallback::FallbackChain;
use super::geocode::GeocodeService;
use super::merger::DataMerger;
use super::reader::GeoIpReader;
use super::types::GeoRecord;
use crate::cache::{CacheStats, HotKey, QueryCache};
use crate::config::StaticConfig;
use crate::errors::{GeoIpError, Result};
use crate::utils::ip::{is_private_or_local, parse_ip};

type InFlight = Arc<OnceCell<Result<GeoRecord>>>;

pub struct GeoIpService {
    reader: Arc<GeoIpReader>,
    merger: DataMerger,
    cache: Arc<QueryCache>,
    fallback: FallbackChain,
    in_flight: DashMap<IpAddr, InFlight>,
    destroyed: AtomicBool,
}

impl GeoIpService {
    pub fn new(
        reader: Arc<GeoIpReader>,
        merger: DataMerger,
        cache: Arc<QueryCache>,
        fallback: FallbackChain,
    ) -> Self {
        Self {
            reader,
            merger,
            cache,
            fallback,
            in_flight: DashMap::new(),
            destroyed: AtomicBool::new(false),
        }
    }

    /// 按静态配置组装完整流水线
    pub fn from_config(config: &StaticConfig) -> Self {
        let reader = Arc::new(GeoIpReader::from_config(&config.databases));
        let geocode = Arc::new(GeocodeService::new(config.geocode.clone()));
        let cache = Arc::new(QueryCache::new(config.cache.clone()));

        Self::new(
            reader,
            DataMerger::new(geocode),
            cache,
            FallbackChain::from_config(&config.fallback),
        )
    }

    /// 打开本地数据库，destroy 之后调用可重新启用服务
    pub async fn initialize(&self) -> Result<()> {
        self.reader.initialize().await?;
        self.destroyed.store(false, Ordering::Release);
        info!(
            "GeoIP service initialized with sources: {:?}, fallback providers: {:?}",
            self.reader.available_sources(),
            self.fallback.available_providers()
        );
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        !self.destroyed.load(Ordering::Acquire) && self.reader.is_ready()
    }

    pub fn reader(&self) -> &Arc<GeoIpReader> {
        &self.reader
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn fallback(&self) -> &FallbackChain {
        &self.fallback
    }

    /// 解析原始 IP 字符串
    ///
    /// 缓存键是规范化的地址，返回记录的 `ip` 保留调用方的写法（去除首尾空白）
    pub async fn resolve(&self, raw: &str) -> Result<GeoRecord> {
        let ip = parse_ip(raw)?;
        let mut record = self.resolve_ip(ip).await?;
        record.ip = raw.trim().to_string();
        Ok(record)
    }

    pub async fn resolve_ip(&self, ip: IpAddr) -> Result<GeoRecord> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(GeoIpError::service_unavailable(
                "GeoIP service has been destroyed",
            ));
        }

        let key = ip.to_string();
        if let Some(record) = self.cache.get(&key) {
            debug!("Cache hit for {}", key);
            return Ok(record);
        }

        let cell = self
            .in_flight
            .entry(ip)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = cell
            .get_or_init(|| self.resolve_uncached(ip, &key))
            .await
            .clone();

        self.in_flight
            .remove_if(&ip, |_, pending| Arc::ptr_eq(pending, &cell));

        result
    }

    async fn resolve_uncached(&self, ip: IpAddr, key: &str) -> Result<GeoRecord> {
        if is_private_or_local(&ip) {
            let record = GeoRecord::private_network(&ip);
            self.cache.set(key, record.clone());
            return Ok(record);
        }

        let record = match self.resolve_local(ip).await {
            Ok(record) => record,
            Err(e) if e.is_recoverable() => {
                warn!("Local lookup for {} failed: {}, trying fallback providers", ip, e);
                self.fallback.resolve(ip, e).await?
            }
            Err(e) => return Err(e),
        };

        self.cache.set(key, record.clone());
        Ok(record)
    }

    async fn resolve_local(&self, ip: IpAddr) -> Result<GeoRecord> {
        if !self.reader.is_ready() {
            self.reader.initialize().await?;
        }
        let results = self.reader.query(ip).await?;
        self.merger.merge(ip, &results).await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn cleanup_cache(&self) -> usize {
        self.cache.cleanup_expired()
    }

    /// 预热缓存，返回新写入的条目数
    pub async fn warmup_cache(&self, ips: &[String]) -> usize {
        self.cache
            .warmup(ips, |ip| async move { self.resolve(&ip).await })
            .await
    }

    pub fn hot_ips(&self, limit: usize) -> Vec<HotKey> {
        self.cache.hot_keys(limit)
    }

    /// 关闭数据库并清空查询缓存与坐标缓存，之后的查询返回 `ServiceUnavailable`
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
        self.reader.destroy();
        self.cache.clear();
        self.in_flight.clear();
        if let Some(geocode) = self.merger.geocode() {
            debug!(
                "Dropping ~{} cached geocode entries",
                geocode.cache_entry_count()
            );
            geocode.clear_cache();
        }
        info!("GeoIP service destroyed");
    }
}
