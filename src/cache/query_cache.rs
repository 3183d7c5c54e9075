//! IP 查询缓存
//!
//! LRU 淘汰 + 按记录质量计算的 TTL：
//! - TTL 在插入时计算一次，之后不再变化
//! - 每次 `get` 检查过期并刷新最近使用标记
//! - 达到容量上限时淘汰最近最少使用的条目
//! - 后台清理任务只用于控制内存，过期判定不依赖它

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::errors::Result;
use crate::services::geoip::constants::SOURCE_GEOCN;
use crate::services::geoip::{Accuracy, GeoRecord};
use crate::system::event::{EventBus, GeoEvent};
use crate::utils::clock::{Clock, SystemClock};

/// 缓存条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub record: GeoRecord,
    /// 插入时间（Unix 毫秒）
    pub created_at: i64,
    pub hits: u64,
    /// 插入时计算的 TTL（毫秒）
    pub ttl_ms: u64,
    /// 最近使用标记，数值越大越新
    #[serde(skip)]
    recency: u64,
}

impl CacheEntry {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms.saturating_sub(self.created_at) > self.ttl_ms as i64
    }

    pub fn expires_at(&self) -> i64 {
        self.created_at.saturating_add(self.ttl_ms as i64)
    }
}

/// 热点条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotKey {
    pub key: String,
    pub hits: u64,
    pub record: GeoRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    /// 当前条目的命中次数之和
    pub total_hits: u64,
    /// `get` 调用次数
    pub lookups: u64,
    pub hits: u64,
    pub misses: u64,
    /// hits / lookups，没有查询时为 0
    pub hit_rate: f64,
    pub hot_keys: Vec<HotKey>,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    /// recency → key，第一个元素即 LRU
    recency: BTreeMap<u64, String>,
    next_tick: u64,
}

impl CacheInner {
    fn tick(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.recency);
        Some(entry)
    }

    fn evict_lru(&mut self) -> Option<String> {
        let (_, key) = self.recency.pop_first()?;
        self.entries.remove(&key);
        Some(key)
    }

    /// 插入或替换，必要时先淘汰 LRU
    fn insert(&mut self, key: String, mut entry: CacheEntry, max_size: usize) {
        if self.remove(&key).is_none() {
            while self.entries.len() >= max_size {
                match self.evict_lru() {
                    Some(evicted) => debug!("Cache evicted LRU entry: {}", evicted),
                    None => break,
                }
            }
        }

        entry.recency = self.tick();
        self.recency.insert(entry.recency, key.clone());
        self.entries.insert(key, entry);
    }
}

pub struct QueryCache {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<CacheInner>,
    lookups: AtomicU64,
    hits: AtomicU64,
}

impl QueryCache {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        debug!(
            "QueryCache initialized with max size: {}, default TTL: {}ms",
            config.max_size, config.default_ttl_ms
        );
        Self {
            config,
            clock,
            inner: Mutex::new(CacheInner::default()),
            lookups: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled && self.config.max_size > 0
    }

    pub fn max_size(&self) -> usize {
        self.config.max_size
    }

    /// 读取未过期的记录，并刷新其最近使用标记
    pub fn get(&self, key: &str) -> Option<GeoRecord> {
        if !self.is_enabled() {
            return None;
        }

        self.lookups.fetch_add(1, Ordering::Relaxed);
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(key) {
            None => return None,
            Some(entry) => entry.is_expired(now),
        };

        if expired {
            inner.remove(key);
            debug!("Cache entry expired: {}", key);
            return None;
        }

        let tick = inner.tick();
        let entry = inner.entries.get_mut(key)?;
        let old_tick = std::mem::replace(&mut entry.recency, tick);
        entry.hits += 1;
        let record = entry.record.clone();

        inner.recency.remove(&old_tick);
        inner.recency.insert(tick, key.to_string());

        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(record)
    }

    /// 写入记录，TTL 按记录质量计算
    pub fn set(&self, key: &str, record: GeoRecord) {
        if !self.is_enabled() {
            return;
        }

        let ttl_ms = self.compute_ttl(&record);
        let entry = CacheEntry {
            record,
            created_at: self.clock.now_ms(),
            hits: 0,
            ttl_ms,
            recency: 0,
        };

        self.inner
            .lock()
            .insert(key.to_string(), entry, self.config.max_size);
    }

    /// TTL = 基础 TTL × 精度乘数 × 数据源乘数 × 区域乘数 × 地址族乘数，不低于最小值
    pub fn compute_ttl(&self, record: &GeoRecord) -> u64 {
        let m = &self.config.multipliers;
        let mut ttl = self.config.default_ttl_ms as f64;

        ttl *= match record.accuracy {
            Accuracy::High => m.high,
            Accuracy::Medium => m.medium,
            Accuracy::Low => m.low,
        };

        if record.source == SOURCE_GEOCN {
            ttl *= m.region_source;
        }

        if record.country_code == self.config.region_country_code {
            ttl *= m.region_country;
        }

        if record.is_ipv6() {
            ttl *= m.ipv6;
        }

        (ttl.round() as u64).max(self.config.min_ttl_ms)
    }

    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.recency.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 是否存在未过期条目（不计入命中、不刷新最近使用）
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now_ms();
        self.inner
            .lock()
            .entries
            .get(key)
            .is_some_and(|e| !e.is_expired(now))
    }

    /// 条目的命中次数
    pub fn entry_hits(&self, key: &str) -> Option<u64> {
        self.inner.lock().entries.get(key).map(|e| e.hits)
    }

    /// 条目的 TTL（毫秒）
    pub fn entry_ttl(&self, key: &str) -> Option<u64> {
        self.inner.lock().entries.get(key).map(|e| e.ttl_ms)
    }

    /// 删除所有过期条目，返回删除数量
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();

        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired {
            inner.remove(key);
        }

        if !expired.is_empty() {
            debug!("Cache cleanup removed {} expired entries", expired.len());
        }
        expired.len()
    }

    /// 按命中次数排序的热点条目
    pub fn hot_keys(&self, limit: usize) -> Vec<HotKey> {
        let inner = self.inner.lock();
        let mut hot: Vec<HotKey> = inner
            .entries
            .iter()
            .map(|(key, entry)| HotKey {
                key: key.clone(),
                hits: entry.hits,
                record: entry.record.clone(),
            })
            .collect();
        drop(inner);

        hot.sort_by(|a, b| b.hits.cmp(&a.hits).then_with(|| a.key.cmp(&b.key)));
        hot.truncate(limit);
        hot
    }

    pub fn stats(&self) -> CacheStats {
        let (size, total_hits) = {
            let inner = self.inner.lock();
            (
                inner.entries.len(),
                inner.entries.values().map(|e| e.hits).sum(),
            )
        };

        let lookups = self.lookups.load(Ordering::Relaxed);
        let hits = self.hits.load(Ordering::Relaxed);

        CacheStats {
            size,
            max_size: self.config.max_size,
            total_hits,
            lookups,
            hits,
            misses: lookups.saturating_sub(hits),
            hit_rate: if lookups > 0 {
                hits as f64 / lookups as f64
            } else {
                0.0
            },
            hot_keys: self.hot_keys(self.config.hot_keys_limit),
        }
    }

    /// 导出未过期条目，按最近使用从旧到新排列
    pub fn export(&self) -> Vec<(String, CacheEntry)> {
        let now = self.clock.now_ms();
        let inner = self.inner.lock();
        inner
            .recency
            .values()
            .filter_map(|key| {
                let entry = inner.entries.get(key)?;
                (!entry.is_expired(now)).then(|| (key.clone(), entry.clone()))
            })
            .collect()
    }

    /// 导入快照，保留原始时间戳与 TTL，跳过已过期条目
    pub fn import(&self, entries: Vec<(String, CacheEntry)>) -> usize {
        if !self.is_enabled() {
            return 0;
        }

        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        let mut imported = 0;

        for (key, entry) in entries {
            if entry.is_expired(now) {
                continue;
            }
            inner.insert(key, entry, self.config.max_size);
            imported += 1;
        }

        info!("Imported {} cache entries", imported);
        imported
    }

    /// 预热：并发解析尚未缓存的地址，失败只记录日志
    ///
    /// 返回新写入的条目数
    pub async fn warmup<F, Fut>(&self, keys: &[String], resolver: F) -> usize
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<GeoRecord>>,
    {
        let pending: Vec<&String> = keys.iter().filter(|k| !self.contains(k)).collect();

        let resolved = futures_util::future::join_all(pending.iter().map(|key| {
            let fut = resolver((*key).clone());
            async move { (*key, fut.await) }
        }))
        .await;

        let mut warmed = 0;
        for (key, result) in resolved {
            match result {
                Ok(record) => {
                    if !self.contains(key) {
                        self.set(key, record);
                    }
                    warmed += 1;
                }
                Err(e) => warn!("Cache warmup failed for {}: {}", key, e),
            }
        }

        info!("Cache warmup finished: {}/{} entries", warmed, keys.len());
        warmed
    }

    /// 启动周期性清理任务
    pub fn spawn_cleanup_task(
        self: Arc<Self>,
        events: Option<Arc<EventBus>>,
    ) -> JoinHandle<()> {
        let period = Duration::from_secs(self.config.cleanup_interval_secs.max(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let removed = self.cleanup_expired();
                if let Some(events) = &events {
                    events.publish(GeoEvent::CacheCleanup { removed });
                }
            }
        })
    }
}
