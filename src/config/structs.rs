use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumIter};

/// 静态配置（从 TOML 加载，启动时使用）
///
/// 包含：
/// - logging: 日志配置
/// - databases: 本地 MMDB 数据库文件与下载源
/// - cache: 查询缓存配置
/// - geocode: 地理编码服务配置
/// - fallback: 外部 fallback provider 配置
/// - rate_limit: 各端点组的限流窗口
///
/// fallback provider 的凭据只从环境变量读取，不写入配置文件。
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StaticConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub databases: DatabasesConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub geocode: GeocodeConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
}

impl StaticConfig {
    /// 从 TOML 文件和环境变量加载配置
    ///
    /// 优先级：ENV > ipgeo.toml > 默认值
    /// ENV 前缀：IPGEO，分隔符：__
    /// 示例：IPGEO__CACHE__MAX_SIZE=500
    pub fn load(path: Option<&str>) -> Self {
        use config::{Config, Environment, File};

        let path = path.unwrap_or(DEFAULT_CONFIG_PATH);

        let builder = Config::builder()
            // 1. 从 TOML 文件加载（可选）
            .add_source(File::with_name(path).required(false))
            // 2. 从环境变量覆盖，前缀 IPGEO，分隔符 __
            .add_source(
                Environment::with_prefix("IPGEO")
                    .separator("__")
                    .try_parsing(true),
            );

        match builder.build() {
            Ok(settings) => match settings.try_deserialize::<StaticConfig>() {
                Ok(config) => {
                    if std::path::Path::new(path).exists() {
                        eprintln!("[INFO] Configuration loaded from: {}", path);
                    }
                    config
                }
                Err(e) => {
                    eprintln!("[ERROR] Failed to deserialize config: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("[ERROR] Failed to build config: {}", e);
                Self::default()
            }
        }
    }

    /// 生成示例 TOML 配置文件
    pub fn generate_sample_config() -> String {
        let sample_config = Self::default();
        toml::to_string_pretty(&sample_config)
            .unwrap_or_else(|e| format!("Error generating sample config: {}", e))
    }

    /// 保存配置到 TOML 文件
    pub fn save_to_file<P: AsRef<std::path::Path>>(
        &self,
        path: P,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }
}

pub const DEFAULT_CONFIG_PATH: &str = "ipgeo.toml";

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default = "default_max_backups")]
    pub max_backups: u32,
    #[serde(default = "default_enable_rotation")]
    pub enable_rotation: bool,
}

/// 数据库文件在流水线中的角色
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DatabaseKind {
    /// 通用城市库（基础数据源）
    City,
    /// ASN 库
    Asn,
    /// 区域专用库（如 GeoCN）
    Region,
}

/// 单个可下载数据库
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseEntry {
    pub name: String,
    pub url: String,
    /// 参考大小（字节），文件小于其 90% 视为无效
    pub expected_size: u64,
    pub kind: DatabaseKind,
}

/// 本地数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabasesConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_database_entries")]
    pub entries: Vec<DatabaseEntry>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
    #[serde(default = "default_download_retries")]
    pub download_retries: u32,
    #[serde(default = "default_download_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_download_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

impl DatabasesConfig {
    /// 按角色查找数据库配置
    pub fn entry_for(&self, kind: DatabaseKind) -> Option<&DatabaseEntry> {
        self.entries.iter().find(|e| e.kind == kind)
    }

    /// 按文件名查找数据库配置
    pub fn entry_named(&self, name: &str) -> Option<&DatabaseEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn path_of(&self, entry: &DatabaseEntry) -> std::path::PathBuf {
        std::path::Path::new(&self.data_dir).join(&entry.name)
    }
}

/// TTL 乘数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtlMultipliers {
    #[serde(default = "default_mult_high")]
    pub high: f64,
    #[serde(default = "default_mult_medium")]
    pub medium: f64,
    #[serde(default = "default_mult_low")]
    pub low: f64,
    /// 区域专用数据源的结果
    #[serde(default = "default_mult_region_source")]
    pub region_source: f64,
    /// 目标区域内的 IP
    #[serde(default = "default_mult_region_country")]
    pub region_country: f64,
    #[serde(default = "default_mult_ipv6")]
    pub ipv6: f64,
}

/// 查询缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,
    #[serde(default = "default_cache_ttl_ms")]
    pub default_ttl_ms: u64,
    #[serde(default = "default_cache_min_ttl_ms")]
    pub min_ttl_ms: u64,
    #[serde(default = "default_cache_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    #[serde(default = "default_hot_keys_limit")]
    pub hot_keys_limit: usize,
    #[serde(default = "default_region_country_code")]
    pub region_country_code: String,
    #[serde(default)]
    pub multipliers: TtlMultipliers,
}

/// 地理编码服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocodeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_geocode_base_url")]
    pub base_url: String,
    #[serde(default = "default_geocode_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_geocode_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_geocode_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_geocode_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// 全局最小请求间隔（所有调用方共享）
    #[serde(default = "default_geocode_rate_limit_delay_ms")]
    pub rate_limit_delay_ms: u64,
    #[serde(default = "default_geocode_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// 未命中结果的缓存时间
    #[serde(default = "default_geocode_negative_ttl_secs")]
    pub negative_cache_ttl_secs: u64,
    #[serde(default = "default_geocode_cache_capacity")]
    pub cache_capacity: u64,
    #[serde(default = "default_geocode_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_geocode_accept_language")]
    pub accept_language: String,
    /// 追加在查询串末尾的国家名，提高匹配率
    #[serde(default = "default_geocode_country_suffix")]
    pub country_suffix: String,
}

/// 单个 HTTP fallback provider 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    pub base_url: String,
    pub timeout_ms: u64,
}

/// fallback 链配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_maxmind_endpoint")]
    pub maxmind: ProviderEndpoint,
    #[serde(default = "default_ipinfo_endpoint")]
    pub ipinfo: ProviderEndpoint,
}

/// 单个端点组的固定窗口限流
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// 时间窗口（毫秒）
    pub window_ms: u64,
    /// 窗口内最大请求数
    pub max_requests: u32,
}

/// 限流配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_rl_query")]
    pub query: RateLimitConfig,
    #[serde(default = "default_rl_bgp")]
    pub bgp: RateLimitConfig,
    #[serde(default = "default_rl_proxy_detection")]
    pub proxy_detection: RateLimitConfig,
    #[serde(default = "default_rl_default")]
    pub default: RateLimitConfig,
    #[serde(default = "default_rl_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

// ============================================================
// Default value functions for static config
// ============================================================

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_max_backups() -> u32 {
    5
}

fn default_enable_rotation() -> bool {
    true
}

fn default_data_dir() -> String {
    "data".to_string()
}

const MIB: u64 = 1024 * 1024;

fn default_database_entries() -> Vec<DatabaseEntry> {
    vec![
        DatabaseEntry {
            name: "GeoLite2-City.mmdb".to_string(),
            url: "https://gh-proxy.com/github.com/P3TERX/GeoLite.mmdb/releases/download/2025.07.07/GeoLite2-City.mmdb".to_string(),
            expected_size: 58 * MIB,
            kind: DatabaseKind::City,
        },
        DatabaseEntry {
            name: "GeoLite2-ASN.mmdb".to_string(),
            url: "https://gh-proxy.com/github.com/P3TERX/GeoLite.mmdb/releases/download/2025.07.07/GeoLite2-ASN.mmdb".to_string(),
            expected_size: 10 * MIB,
            kind: DatabaseKind::Asn,
        },
        DatabaseEntry {
            name: "GeoCN.mmdb".to_string(),
            url: "https://gh-proxy.com/github.com/ljxi/GeoCN/releases/download/Latest/GeoCN.mmdb"
                .to_string(),
            expected_size: 15 * MIB / 2,
            kind: DatabaseKind::Region,
        },
    ]
}

fn default_connect_timeout_secs() -> u64 {
    15
}

fn default_download_timeout_secs() -> u64 {
    600
}

fn default_download_retries() -> u32 {
    2
}

fn default_download_retry_base_delay_ms() -> u64 {
    1000
}

fn default_download_retry_max_delay_ms() -> u64 {
    8000
}

fn default_mult_high() -> f64 {
    2.0
}

fn default_mult_medium() -> f64 {
    1.5
}

fn default_mult_low() -> f64 {
    0.5
}

fn default_mult_region_source() -> f64 {
    1.5
}

fn default_mult_region_country() -> f64 {
    1.2
}

fn default_mult_ipv6() -> f64 {
    0.8
}

fn default_cache_max_size() -> usize {
    10_000
}

fn default_cache_ttl_ms() -> u64 {
    60 * 60 * 1000
}

fn default_cache_min_ttl_ms() -> u64 {
    5 * 60 * 1000
}

fn default_cache_cleanup_interval_secs() -> u64 {
    600
}

fn default_hot_keys_limit() -> usize {
    10
}

fn default_region_country_code() -> String {
    "CN".to_string()
}

fn default_geocode_base_url() -> String {
    "https://map.447654.xyz/search".to_string()
}

fn default_geocode_timeout_ms() -> u64 {
    15_000
}

fn default_geocode_max_retries() -> u32 {
    2
}

fn default_geocode_retry_base_delay_ms() -> u64 {
    1000
}

fn default_geocode_retry_max_delay_ms() -> u64 {
    4000
}

fn default_geocode_rate_limit_delay_ms() -> u64 {
    1000
}

fn default_geocode_cache_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_geocode_negative_ttl_secs() -> u64 {
    60 * 60
}

fn default_geocode_cache_capacity() -> u64 {
    10_000
}

fn default_geocode_user_agent() -> String {
    format!("ipgeo-geocoder/{}", env!("CARGO_PKG_VERSION"))
}

fn default_geocode_accept_language() -> String {
    "zh-CN".to_string()
}

fn default_geocode_country_suffix() -> String {
    "中国".to_string()
}

fn default_maxmind_endpoint() -> ProviderEndpoint {
    ProviderEndpoint {
        base_url: "https://geoip.maxmind.com/geoip/v2.1".to_string(),
        timeout_ms: 10_000,
    }
}

fn default_ipinfo_endpoint() -> ProviderEndpoint {
    ProviderEndpoint {
        base_url: "https://api.ipinfo.io/lite".to_string(),
        timeout_ms: 5_000,
    }
}

const MINUTE_MS: u64 = 60 * 1000;

fn default_rl_query() -> RateLimitConfig {
    RateLimitConfig {
        window_ms: MINUTE_MS,
        max_requests: 60,
    }
}

fn default_rl_bgp() -> RateLimitConfig {
    RateLimitConfig {
        window_ms: MINUTE_MS,
        max_requests: 20,
    }
}

fn default_rl_proxy_detection() -> RateLimitConfig {
    RateLimitConfig {
        window_ms: MINUTE_MS,
        max_requests: 10,
    }
}

fn default_rl_default() -> RateLimitConfig {
    RateLimitConfig {
        window_ms: MINUTE_MS,
        max_requests: 100,
    }
}

fn default_rl_cleanup_interval_secs() -> u64 {
    60
}

// ============================================================
// Default implementations
// ============================================================

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
            max_backups: default_max_backups(),
            enable_rotation: default_enable_rotation(),
        }
    }
}

impl Default for DatabasesConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            entries: default_database_entries(),
            connect_timeout_secs: default_connect_timeout_secs(),
            download_timeout_secs: default_download_timeout_secs(),
            download_retries: default_download_retries(),
            retry_base_delay_ms: default_download_retry_base_delay_ms(),
            retry_max_delay_ms: default_download_retry_max_delay_ms(),
        }
    }
}

impl Default for TtlMultipliers {
    fn default() -> Self {
        Self {
            high: default_mult_high(),
            medium: default_mult_medium(),
            low: default_mult_low(),
            region_source: default_mult_region_source(),
            region_country: default_mult_region_country(),
            ipv6: default_mult_ipv6(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: default_cache_max_size(),
            default_ttl_ms: default_cache_ttl_ms(),
            min_ttl_ms: default_cache_min_ttl_ms(),
            cleanup_interval_secs: default_cache_cleanup_interval_secs(),
            hot_keys_limit: default_hot_keys_limit(),
            region_country_code: default_region_country_code(),
            multipliers: TtlMultipliers::default(),
        }
    }
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_geocode_base_url(),
            timeout_ms: default_geocode_timeout_ms(),
            max_retries: default_geocode_max_retries(),
            retry_base_delay_ms: default_geocode_retry_base_delay_ms(),
            retry_max_delay_ms: default_geocode_retry_max_delay_ms(),
            rate_limit_delay_ms: default_geocode_rate_limit_delay_ms(),
            cache_ttl_secs: default_geocode_cache_ttl_secs(),
            negative_cache_ttl_secs: default_geocode_negative_ttl_secs(),
            cache_capacity: default_geocode_cache_capacity(),
            user_agent: default_geocode_user_agent(),
            accept_language: default_geocode_accept_language(),
            country_suffix: default_geocode_country_suffix(),
        }
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            maxmind: default_maxmind_endpoint(),
            ipinfo: default_ipinfo_endpoint(),
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            query: default_rl_query(),
            bgp: default_rl_bgp(),
            proxy_detection: default_rl_proxy_detection(),
            default: default_rl_default(),
            cleanup_interval_secs: default_rl_cleanup_interval_secs(),
        }
    }
}
