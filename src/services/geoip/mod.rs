//! IP 地理位置解析引擎
//!
//! - `reader`: 本地 MMDB 数据库读取（通用城市库 + ASN 库 + 区域专用库）
//! - `downloader`: 数据库文件下载与校验
//! - `geocode`: 地名 → 坐标补全
//! - `merger`: 多数据源合并
//! - `fallback`: 外部 HTTP provider 链
//! - `service`: 完整查询流水线
//! - `startup`: 启动检查与组装

pub mod constants;
pub mod downloader;
pub mod fallback;
pub mod geocode;
pub mod merger;
pub mod reader;
pub mod service;
pub mod startup;
pub mod types;

pub use downloader::{DatabaseDownloader, DatabaseStatus};
pub use fallback::{FallbackChain, FallbackProvider, IpInfoProvider, MaxMindWebProvider};
pub use geocode::{
    CoordinateSource, Coordinates, GeoPoint, GeocodeClient, GeocodeService, NominatimClient,
};
pub use merger::DataMerger;
pub use reader::{DatabasePaths, GeoIpReader};
pub use service::GeoIpService;
pub use startup::{GeoIpEngine, StartupCheck, StartupStatus};
pub use types::{
    Accuracy, AsInfo, DataSource, DataSourceInfo, GeoRecord, Location, RawSourceResult,
    RegisteredCountry, SourceRecord,
};
