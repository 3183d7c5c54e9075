//! 固定窗口限流器
//!
//! 每个 key 一条记录：窗口内首个请求创建记录并设置 `reset_time`，
//! 之后的请求累加计数；`now >= reset_time` 时记录作废，下一次请求重新创建。

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::config::{RateLimitConfig, RateLimitSettings};
use crate::utils::clock::{Clock, system_clock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RateLimitRecord {
    count: u32,
    reset_time: i64,
}

/// 单次限流判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// 窗口重置时间（Unix 毫秒）
    pub reset_time: i64,
    pub total: u32,
    #[serde(skip)]
    checked_at: i64,
}

impl RateLimitDecision {
    /// `X-RateLimit-*` 响应头，Reset 为 Unix 秒
    pub fn headers(&self) -> [(&'static str, String); 3] {
        [
            ("X-RateLimit-Limit", self.total.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", (self.reset_time.div_euclid(1000)).to_string()),
        ]
    }

    /// 被拒绝时建议等待的秒数（向上取整，至少 1 秒）
    pub fn retry_after_secs(&self) -> Option<u64> {
        if self.allowed {
            return None;
        }
        let wait_ms = (self.reset_time - self.checked_at).max(0) as u64;
        Some(wait_ms.div_ceil(1000).max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimiterStats {
    pub total_records: usize,
    pub active_records: usize,
    pub config: RateLimitConfig,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    records: DashMap<String, RateLimitRecord>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            records: DashMap::new(),
            clock,
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// 记录一次请求并返回判定
    pub fn check(&self, key: &str) -> RateLimitDecision {
        let now = self.clock.now_ms();
        let max = self.config.max_requests;

        let mut record = self
            .records
            .entry(key.to_string())
            .or_insert(RateLimitRecord {
                count: 0,
                reset_time: now,
            });

        if now >= record.reset_time {
            *record = RateLimitRecord {
                count: 0,
                reset_time: now + self.config.window_ms as i64,
            };
        }
        record.count = record.count.saturating_add(1);

        let decision = RateLimitDecision {
            allowed: record.count <= max,
            remaining: max.saturating_sub(record.count),
            reset_time: record.reset_time,
            total: max,
            checked_at: now,
        };
        drop(record);

        if !decision.allowed {
            debug!("Rate limit exceeded for {}", key);
        }
        decision
    }

    pub fn reset(&self, key: &str) {
        self.records.remove(key);
    }

    /// 删除已过期的记录，返回删除数量
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.records.len();
        self.records.retain(|_, record| now < record.reset_time);
        let removed = before.saturating_sub(self.records.len());
        if removed > 0 {
            trace!("Removed {} expired rate limit records", removed);
        }
        removed
    }

    pub fn stats(&self) -> RateLimiterStats {
        let now = self.clock.now_ms();
        RateLimiterStats {
            total_records: self.records.len(),
            active_records: self
                .records
                .iter()
                .filter(|r| now < r.reset_time)
                .count(),
            config: self.config,
        }
    }
}

/// 按端点分组的限流器集合
pub struct RateLimiterRegistry {
    query: Arc<RateLimiter>,
    bgp: Arc<RateLimiter>,
    proxy_detection: Arc<RateLimiter>,
    default: Arc<RateLimiter>,
    cleanup_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub query: RateLimiterStats,
    pub bgp: RateLimiterStats,
    pub proxy_detection: RateLimiterStats,
    pub default: RateLimiterStats,
}

impl RateLimiterRegistry {
    pub fn new(settings: &RateLimitSettings) -> Self {
        Self::with_clock(settings, system_clock())
    }

    pub fn with_clock(settings: &RateLimitSettings, clock: Arc<dyn Clock>) -> Self {
        let limiter = |config| Arc::new(RateLimiter::with_clock(config, Arc::clone(&clock)));
        Self {
            query: limiter(settings.query),
            bgp: limiter(settings.bgp),
            proxy_detection: limiter(settings.proxy_detection),
            default: limiter(settings.default),
            cleanup_interval: Duration::from_secs(settings.cleanup_interval_secs.max(1)),
        }
    }

    /// 按请求路径前缀选择限流器
    pub fn limiter_for_path(&self, path: &str) -> &Arc<RateLimiter> {
        if path.starts_with("/api/query") {
            &self.query
        } else if path.starts_with("/api/bgp") {
            &self.bgp
        } else if path.starts_with("/api/proxy-detection") {
            &self.proxy_detection
        } else {
            &self.default
        }
    }

    fn all(&self) -> [&Arc<RateLimiter>; 4] {
        [&self.query, &self.bgp, &self.proxy_detection, &self.default]
    }

    pub fn cleanup_expired(&self) -> usize {
        self.all().iter().map(|l| l.cleanup_expired()).sum()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            query: self.query.stats(),
            bgp: self.bgp.stats(),
            proxy_detection: self.proxy_detection.stats(),
            default: self.default.stats(),
        }
    }

    /// 后台周期清理，不持有请求路径上的锁
    pub fn spawn_cleanup_task(self: Arc<Self>) -> JoinHandle<()> {
        let period = self.cleanup_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                self.cleanup_expired();
            }
        })
    }
}
