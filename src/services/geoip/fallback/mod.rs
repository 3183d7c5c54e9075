//! 外部 fallback provider 链
//!
//! 本地流水线整体失败时按优先级依次尝试：
//! - 不可用（缺少凭据）的 provider 直接跳过，不发请求
//! - 返回 None 或出错时尝试下一个
//! - 全部失败时返回本地流水线的原始错误

mod ipinfo;
mod maxmind_web;

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

pub use ipinfo::IpInfoProvider;
pub use maxmind_web::MaxMindWebProvider;

use super::types::{Accuracy, GeoRecord};
use crate::config::FallbackConfig;
use crate::errors::{GeoIpError, Result};

/// fallback 结果的最高精度
const MAX_FALLBACK_ACCURACY: Accuracy = Accuracy::Medium;

/// 外部 HTTP 地理位置 provider
#[async_trait]
pub trait FallbackProvider: Send + Sync {
    /// 来源标识，同时用作结果的 `source`
    fn name(&self) -> &'static str;

    /// 凭据/配置是否齐全
    fn is_available(&self) -> bool;

    /// 查询 IP，无数据返回 `Ok(None)`
    async fn query(&self, ip: IpAddr) -> Result<Option<GeoRecord>>;
}

pub struct FallbackChain {
    providers: Vec<Arc<dyn FallbackProvider>>,
}

impl FallbackChain {
    pub fn new(providers: Vec<Arc<dyn FallbackProvider>>) -> Self {
        Self { providers }
    }

    /// 不含任何 provider
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// 按配置构建：MaxMind Web Services → IPinfo Lite
    ///
    /// 凭据从环境变量读取，缺失时对应 provider 不可用
    pub fn from_config(config: &FallbackConfig) -> Self {
        if !config.enabled {
            info!("Fallback providers disabled by configuration");
            return Self::empty();
        }

        let providers: Vec<Arc<dyn FallbackProvider>> = vec![
            Arc::new(MaxMindWebProvider::from_env(&config.maxmind)),
            Arc::new(IpInfoProvider::from_env(&config.ipinfo)),
        ];

        for provider in &providers {
            if !provider.is_available() {
                warn!(
                    "Fallback provider {} has no credentials configured, disabled",
                    provider.name()
                );
            }
        }

        Self::new(providers)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// 当前可用的 provider 名称
    pub fn available_providers(&self) -> Vec<&'static str> {
        self.providers
            .iter()
            .filter(|p| p.is_available())
            .map(|p| p.name())
            .collect()
    }

    /// 依次尝试各 provider，全部失败时返回 `original_error`
    pub async fn resolve(&self, ip: IpAddr, original_error: GeoIpError) -> Result<GeoRecord> {
        for provider in &self.providers {
            if !provider.is_available() {
                debug!("Skipping unavailable fallback provider {}", provider.name());
                continue;
            }

            debug!("Trying fallback provider {} for {}", provider.name(), ip);
            match provider.query(ip).await {
                Ok(Some(mut record)) => {
                    record.ip = ip.to_string();
                    record.accuracy = record.accuracy.min(MAX_FALLBACK_ACCURACY);
                    if record.source.is_empty() {
                        record.source = provider.name().to_string();
                    }
                    info!("Fallback provider {} resolved {}", provider.name(), ip);
                    return Ok(record);
                }
                Ok(None) => {
                    debug!("Fallback provider {} has no data for {}", provider.name(), ip);
                }
                Err(e) => {
                    warn!("Fallback provider {} failed for {}: {}", provider.name(), ip, e);
                }
            }
        }

        Err(original_error)
    }
}

/// 非 2xx 状态映射：404 视为无数据
pub(crate) fn not_found_as_none<T>(
    result: std::result::Result<T, ureq::Error>,
) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ureq::Error::StatusCode(404)) => Ok(None),
        Err(ureq::Error::StatusCode(status)) => {
            Err(GeoIpError::provider_failed(format!("HTTP {}", status)))
        }
        Err(e) => Err(GeoIpError::provider_failed(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubProvider {
        name: &'static str,
        available: bool,
        outcome: fn(IpAddr) -> Result<Option<GeoRecord>>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl FallbackProvider for StubProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        fn is_available(&self) -> bool {
            self.available
        }

        async fn query(&self, ip: IpAddr) -> Result<Option<GeoRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)(ip)
        }
    }

    fn stub(
        name: &'static str,
        available: bool,
        outcome: fn(IpAddr) -> Result<Option<GeoRecord>>,
    ) -> Arc<StubProvider> {
        Arc::new(StubProvider {
            name,
            available,
            outcome,
            calls: AtomicU32::new(0),
        })
    }

    fn high_record(ip: IpAddr) -> Result<Option<GeoRecord>> {
        let mut record = GeoRecord::empty(&ip, "");
        record.accuracy = Accuracy::High;
        Ok(Some(record))
    }

    #[test]
    fn test_available_providers_skips_missing_credentials() {
        let chain = FallbackChain::new(vec![
            stub("first", true, high_record),
            stub("no_key", false, high_record),
            stub("last", true, high_record),
        ]);

        assert_eq!(chain.len(), 3);
        assert_eq!(chain.available_providers(), vec!["first", "last"]);
        assert!(FallbackChain::empty().available_providers().is_empty());
    }

    #[tokio::test]
    async fn test_skips_failures_until_success() {
        let failing = stub("failing", true, |_| Err(GeoIpError::provider_failed("boom")));
        let empty = stub("empty", true, |_| Ok(None));
        let good = stub("good", true, high_record);
        let chain = FallbackChain::new(vec![failing.clone(), empty.clone(), good.clone()]);

        let ip: IpAddr = "9.9.9.9".parse().unwrap();
        let record = chain
            .resolve(ip, GeoIpError::query_failed("local"))
            .await
            .unwrap();

        assert_eq!(record.source, "good");
        assert_eq!(record.ip, "9.9.9.9");
        assert_eq!(record.accuracy, Accuracy::Medium);
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(empty.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_failed_returns_original_error() {
        let a = stub("a", false, high_record);
        let b = stub("b", true, |_| Err(GeoIpError::provider_failed("timeout")));
        let chain = FallbackChain::new(vec![a.clone(), b]);

        let err = chain
            .resolve(
                "9.9.9.9".parse().unwrap(),
                GeoIpError::query_failed("no local data"),
            )
            .await
            .unwrap_err();

        assert_eq!(err, GeoIpError::query_failed("no local data"));
        assert_eq!(a.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_not_found_is_none() {
        assert_eq!(
            not_found_as_none::<()>(Err(ureq::Error::StatusCode(404))).unwrap(),
            None
        );
        assert!(matches!(
            not_found_as_none::<()>(Err(ureq::Error::StatusCode(500))),
            Err(GeoIpError::ProviderFailed(_))
        ));
    }

    #[test]
    fn test_disabled_config_builds_empty_chain() {
        let config = FallbackConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(FallbackChain::from_config(&config).is_empty());
    }
}
