//! 地理编码服务
//!
//! 将省/市/区名称转换为经纬度：
//! - 数据源自带坐标时直接返回，不发请求
//! - 查询串结果缓存在 Moka 中，未命中结果使用较短 TTL
//! - 所有调用方共享一个最小请求间隔
//! - 请求失败按指数退避重试

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use moka::policy::Expiry;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};
use ureq::Agent;

use super::types::Accuracy;
use crate::config::GeocodeConfig;
use crate::errors::{GeoIpError, Result};
use crate::utils::retry::{RetryPolicy, with_retry};

/// 经纬度点
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// 坐标来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinateSource {
    /// 数据源自带
    Native,
    /// 通过地理编码得到
    Geocoded,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Accuracy,
    pub source: CoordinateSource,
}

impl Coordinates {
    pub(crate) fn native(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: Accuracy::High,
            source: CoordinateSource::Native,
        }
    }

    fn geocoded(point: GeoPoint) -> Self {
        Self {
            latitude: point.latitude,
            longitude: point.longitude,
            accuracy: Accuracy::Medium,
            source: CoordinateSource::Geocoded,
        }
    }
}

/// 地理编码后端
#[async_trait]
pub trait GeocodeClient: Send + Sync {
    /// 查询地名，无匹配返回 `Ok(None)`
    async fn geocode(&self, query: &str) -> Result<Option<GeoPoint>>;

    /// 获取后端名称（用于日志）
    fn name(&self) -> &'static str;
}

/// Nominatim 兼容接口返回的单条结果
#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
    #[serde(default)]
    display_name: Option<String>,
}

/// Nominatim 兼容的 HTTP 地理编码后端
pub struct NominatimClient {
    agent: Agent,
    base_url: String,
    user_agent: String,
    accept_language: String,
}

impl NominatimClient {
    pub fn new(config: &GeocodeConfig) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(Duration::from_millis(config.timeout_ms)))
            .build()
            .into();

        Self {
            agent,
            base_url: config.base_url.clone(),
            user_agent: config.user_agent.clone(),
            accept_language: config.accept_language.clone(),
        }
    }

    /// 同步请求，在 spawn_blocking 中调用
    fn fetch_sync(
        agent: &Agent,
        base_url: &str,
        user_agent: &str,
        accept_language: &str,
        query: &str,
    ) -> Result<Option<GeoPoint>> {
        let response = agent
            .get(base_url)
            .query("format", "json")
            .query("q", query)
            .query("limit", "1")
            .query("accept-language", accept_language)
            .header("User-Agent", user_agent)
            .call()?;

        let places: Vec<NominatimPlace> = response
            .into_body()
            .read_json()
            .map_err(|e| GeoIpError::serialization(format!("invalid geocode response: {}", e)))?;

        let Some(place) = places.into_iter().next() else {
            return Ok(None);
        };

        let (Ok(latitude), Ok(longitude)) = (place.lat.parse::<f64>(), place.lon.parse::<f64>())
        else {
            return Err(GeoIpError::serialization(format!(
                "invalid coordinates in geocode response: ({}, {})",
                place.lat, place.lon
            )));
        };

        trace!(
            "Geocode result for \"{}\": {} ({}, {})",
            query,
            place.display_name.as_deref().unwrap_or("-"),
            latitude,
            longitude
        );

        Ok(Some(GeoPoint {
            latitude,
            longitude,
        }))
    }
}

#[async_trait]
impl GeocodeClient for NominatimClient {
    async fn geocode(&self, query: &str) -> Result<Option<GeoPoint>> {
        let agent = self.agent.clone();
        let base_url = self.base_url.clone();
        let user_agent = self.user_agent.clone();
        let accept_language = self.accept_language.clone();
        let query = query.to_string();

        tokio::task::spawn_blocking(move || {
            Self::fetch_sync(&agent, &base_url, &user_agent, &accept_language, &query)
        })
        .await?
    }

    fn name(&self) -> &'static str {
        "Nominatim"
    }
}

/// 命中结果与未命中结果使用不同 TTL
struct GeocodeExpiry {
    ttl: Duration,
    negative_ttl: Duration,
}

impl Expiry<String, Option<GeoPoint>> for GeocodeExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Option<GeoPoint>,
        _created_at: Instant,
    ) -> Option<Duration> {
        match value {
            Some(_) => Some(self.ttl),
            None => Some(self.negative_ttl),
        }
    }
}

pub struct GeocodeService {
    config: GeocodeConfig,
    client: Arc<dyn GeocodeClient>,
    cache: Cache<String, Option<GeoPoint>>,
    /// 上一次请求的时间，所有调用方共享
    last_request: Mutex<Option<tokio::time::Instant>>,
}

impl GeocodeService {
    /// 使用默认 HTTP 后端
    pub fn new(config: GeocodeConfig) -> Self {
        let client = Arc::new(NominatimClient::new(&config));
        Self::with_client(config, client)
    }

    pub fn with_client(config: GeocodeConfig, client: Arc<dyn GeocodeClient>) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.cache_capacity)
            .expire_after(GeocodeExpiry {
                ttl: Duration::from_secs(config.cache_ttl_secs),
                negative_ttl: Duration::from_secs(config.negative_cache_ttl_secs),
            })
            .build();

        debug!(
            "GeocodeService initialized with {} backend, cache TTL: {}s",
            client.name(),
            config.cache_ttl_secs
        );

        Self {
            config,
            client,
            cache,
            last_request: Mutex::new(None),
        }
    }

    /// 获取坐标
    ///
    /// 原生坐标非零时直接返回（精度 high）；否则按地名查询（精度 medium）。
    /// 无法解析时返回 None，调用方继续处理。
    pub async fn get_coordinates(
        &self,
        native_lat: Option<f64>,
        native_lng: Option<f64>,
        province: Option<&str>,
        city: Option<&str>,
        district: Option<&str>,
    ) -> Option<Coordinates> {
        if let (Some(lat), Some(lng)) = (native_lat, native_lng)
            && lat != 0.0
            && lng != 0.0
        {
            return Some(Coordinates::native(lat, lng));
        }

        if !self.config.enabled {
            return None;
        }

        let query = build_location_query(province, city, district, &self.config.country_suffix)?;

        let point = self
            .cache
            .get_with(query.clone(), async {
                match self.geocode_location(&query).await {
                    Ok(point) => {
                        if point.is_none() {
                            debug!("Geocode found no match for \"{}\"", query);
                        }
                        point
                    }
                    Err(e) => {
                        warn!("Geocoding \"{}\" failed: {}", query, e);
                        None
                    }
                }
            })
            .await?;

        Some(Coordinates::geocoded(point))
    }

    /// 带重试与全局限频的后端调用
    async fn geocode_location(&self, query: &str) -> Result<Option<GeoPoint>> {
        let policy = RetryPolicy::new(
            self.config.max_retries,
            self.config.retry_base_delay_ms,
            self.config.retry_max_delay_ms,
        );

        with_retry("geocode", policy, GeoIpError::is_transient, || async {
            self.enforce_rate_limit().await;
            self.client.geocode(query).await.map_err(|e| match e {
                GeoIpError::Http(msg) => GeoIpError::geocode_unavailable(msg),
                other => other,
            })
        })
        .await
    }

    /// 保证两次请求之间至少间隔 `rate_limit_delay_ms`
    async fn enforce_rate_limit(&self) {
        let min_interval = Duration::from_millis(self.config.rate_limit_delay_ms);
        let mut last = self.last_request.lock().await;

        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < min_interval {
                tokio::time::sleep(min_interval - elapsed).await;
            }
        }

        *last = Some(tokio::time::Instant::now());
    }

    /// 丢弃全部坐标缓存，包括缓存的失败结果
    pub fn clear_cache(&self) {
        self.cache.invalidate_all();
    }

    /// 当前缓存条目数（近似值）
    pub fn cache_entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

const PROVINCE_SUFFIXES: &[char] = &['省', '市'];
const CITY_SUFFIXES: &[char] = &['市', '县', '区'];
const DISTRICT_SUFFIXES: &[char] = &['区', '县'];

/// 去掉末尾一个行政区划后缀字符
fn strip_suffix<'a>(name: &'a str, suffixes: &[char]) -> &'a str {
    name.strip_suffix(suffixes).unwrap_or(name)
}

/// 构建地名查询串
///
/// 省 + 市（去"市/县/区"后缀，与省名相同则省略）+ 区（去"区/县"后缀，
/// 与市名相同则省略），再追加国家名
pub fn build_location_query(
    province: Option<&str>,
    city: Option<&str>,
    district: Option<&str>,
    country_suffix: &str,
) -> Option<String> {
    let province = province.map(str::trim).filter(|p| !p.is_empty());
    let city = city.map(str::trim).filter(|c| !c.is_empty());
    let district = district.map(str::trim).filter(|d| !d.is_empty());

    let mut parts: Vec<&str> = Vec::with_capacity(3);

    if let Some(province) = province {
        parts.push(province);
    }

    let clean_city = city.map(|c| strip_suffix(c, CITY_SUFFIXES));
    if let Some(clean_city) = clean_city
        && !clean_city.is_empty()
        && Some(clean_city) != province.map(|p| strip_suffix(p, PROVINCE_SUFFIXES))
    {
        parts.push(clean_city);
    }

    if let Some(district) = district {
        let clean_district = strip_suffix(district, DISTRICT_SUFFIXES);
        if !clean_district.is_empty() && Some(clean_district) != clean_city {
            parts.push(clean_district);
        }
    }

    if parts.is_empty() {
        return None;
    }

    let mut query = parts.join(" ");
    if !country_suffix.is_empty() {
        query.push(' ');
        query.push_str(country_suffix);
    }
    Some(query)
}
