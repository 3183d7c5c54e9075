//! MMDB 数据库读取器
//!
//! 同时打开通用城市库、ASN 库与区域专用库：
//! - 部分文件缺失时仍可工作，城市库与区域库都不可用时初始化失败
//! - 查询并发访问所有已打开的库，单个库失败只记录日志
//! - `destroy()` 后的查询返回 `ServiceUnavailable`

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use maxminddb::Reader;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use tracing::{debug, info, trace, warn};

use super::types::{
    AsnRecord, CityRecord, DataSource, DataSourceInfo, RawSourceResult, RegionRecord,
    SourceRecord,
};
use crate::config::{DatabaseKind, DatabasesConfig};
use crate::errors::{GeoIpError, Result};

type MmdbReader = Reader<Vec<u8>>;

/// 各角色数据库的文件路径
#[derive(Debug, Clone, Default)]
pub struct DatabasePaths {
    pub city: Option<PathBuf>,
    pub asn: Option<PathBuf>,
    pub region: Option<PathBuf>,
}

impl DatabasePaths {
    pub fn from_config(config: &DatabasesConfig) -> Self {
        let path_for = |kind| config.entry_for(kind).map(|e| config.path_of(e));
        Self {
            city: path_for(DatabaseKind::City),
            asn: path_for(DatabaseKind::Asn),
            region: path_for(DatabaseKind::Region),
        }
    }

    fn entries(&self) -> [(DatabaseKind, Option<&Path>); 3] {
        [
            (DatabaseKind::City, self.city.as_deref()),
            (DatabaseKind::Asn, self.asn.as_deref()),
            (DatabaseKind::Region, self.region.as_deref()),
        ]
    }
}

/// 已打开的数据库句柄
#[derive(Default)]
struct OpenDatabases {
    city: Option<MmdbReader>,
    asn: Option<MmdbReader>,
    region: Option<MmdbReader>,
}

enum ReaderState {
    Uninitialized,
    Ready(Arc<OpenDatabases>),
    Destroyed,
}

pub struct GeoIpReader {
    paths: DatabasePaths,
    state: RwLock<ReaderState>,
}

impl GeoIpReader {
    pub fn new(paths: DatabasePaths) -> Self {
        Self {
            paths,
            state: RwLock::new(ReaderState::Uninitialized),
        }
    }

    pub fn from_config(config: &DatabasesConfig) -> Self {
        Self::new(DatabasePaths::from_config(config))
    }

    /// 打开所有可用的数据库文件
    ///
    /// 已初始化时直接返回；destroy 后可以重新初始化
    pub async fn initialize(&self) -> Result<()> {
        if self.is_ready() {
            return Ok(());
        }

        self.validate_database_files()?;

        let paths = self.paths.clone();
        let databases = tokio::task::spawn_blocking(move || {
            let open = |kind: DatabaseKind, path: Option<&Path>| -> Option<MmdbReader> {
                let path = path?;
                if !path.exists() {
                    return None;
                }
                match Reader::open_readfile(path) {
                    Ok(reader) => {
                        debug!(
                            "Opened {} database: {} ({})",
                            kind.as_ref(),
                            path.display(),
                            reader.metadata.database_type
                        );
                        Some(reader)
                    }
                    Err(e) => {
                        warn!(
                            "Failed to open {} database at {}: {}",
                            kind.as_ref(),
                            path.display(),
                            e
                        );
                        None
                    }
                }
            };

            OpenDatabases {
                city: open(DatabaseKind::City, paths.city.as_deref()),
                asn: open(DatabaseKind::Asn, paths.asn.as_deref()),
                region: open(DatabaseKind::Region, paths.region.as_deref()),
            }
        })
        .await?;

        if databases.city.is_none() && databases.region.is_none() {
            return Err(GeoIpError::database_not_found(
                "no usable city or region database could be opened",
            ));
        }

        info!(
            "GeoIP reader initialized (city: {}, asn: {}, region: {})",
            databases.city.is_some(),
            databases.asn.is_some(),
            databases.region.is_some()
        );

        *self.state.write() = ReaderState::Ready(Arc::new(databases));
        Ok(())
    }

    /// 检查哪些文件存在，全部缺失时报错
    fn validate_database_files(&self) -> Result<()> {
        let configured: Vec<_> = self
            .paths
            .entries()
            .into_iter()
            .filter_map(|(kind, path)| path.map(|p| (kind, p)))
            .collect();

        let missing: Vec<&str> = configured
            .iter()
            .filter(|(_, path)| !path.exists())
            .map(|(kind, _)| kind.as_ref())
            .collect();

        if missing.len() == configured.len() {
            return Err(GeoIpError::database_not_found(
                "no MMDB database file found",
            ));
        }

        if !missing.is_empty() {
            warn!("Missing database files: {}", missing.join(", "));
        }

        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.state.read(), ReaderState::Ready(_))
    }

    /// 当前已打开的数据源
    pub fn available_sources(&self) -> Vec<DataSource> {
        let state = self.state.read();
        let ReaderState::Ready(ref databases) = *state else {
            return Vec::new();
        };

        let mut sources = Vec::with_capacity(2);
        if databases.city.is_some() {
            sources.push(DataSource::MaxMind);
        }
        if databases.region.is_some() {
            sources.push(DataSource::GeoCn);
        }
        sources
    }

    fn databases(&self) -> Result<Arc<OpenDatabases>> {
        match &*self.state.read() {
            ReaderState::Ready(databases) => Ok(Arc::clone(databases)),
            ReaderState::Uninitialized => Err(GeoIpError::service_unavailable(
                "GeoIP reader has not been initialized",
            )),
            ReaderState::Destroyed => Err(GeoIpError::service_unavailable(
                "GeoIP reader has been destroyed",
            )),
        }
    }

    /// 并发查询所有已打开的数据库
    ///
    /// 返回成功的结果列表；全部无结果时返回 `QueryFailed`
    pub async fn query(&self, ip: IpAddr) -> Result<Vec<RawSourceResult>> {
        let databases = self.databases()?;

        let base_dbs = Arc::clone(&databases);
        let base = tokio::task::spawn_blocking(move || query_base(&base_dbs, ip));
        let region = tokio::task::spawn_blocking(move || query_region(&databases, ip));

        let (base, region) = tokio::join!(base, region);

        let results: Vec<RawSourceResult> = [(DataSource::MaxMind, base), (DataSource::GeoCn, region)]
            .into_iter()
            .filter_map(|(source, outcome)| match outcome {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    warn!("{} lookup for {} failed: {}", source.as_str(), ip, e);
                    None
                }
                Err(e) => {
                    warn!("{} lookup task for {} failed: {}", source.as_str(), ip, e);
                    None
                }
            })
            .collect();

        if results.is_empty() {
            return Err(GeoIpError::query_failed(format!(
                "no geolocation data found for {}",
                ip
            )));
        }

        trace!("Local lookup for {} produced {} results", ip, results.len());
        Ok(results)
    }

    /// 释放所有数据库句柄
    pub fn destroy(&self) {
        *self.state.write() = ReaderState::Destroyed;
        info!("GeoIP reader destroyed");
    }
}

fn lookup<T: DeserializeOwned>(reader: &MmdbReader, ip: IpAddr) -> Result<Option<T>> {
    let result = reader.lookup(ip)?;
    Ok(result.decode::<T>()?)
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// 城市库 + ASN 库
fn query_base(databases: &OpenDatabases, ip: IpAddr) -> Result<Option<RawSourceResult>> {
    let Some(city_reader) = databases.city.as_ref() else {
        return Ok(None);
    };

    let Some(city) = lookup::<CityRecord>(city_reader, ip)? else {
        return Ok(None);
    };

    let asn = databases
        .asn
        .as_ref()
        .and_then(|reader| match lookup::<AsnRecord>(reader, ip) {
            Ok(asn) => asn,
            Err(e) => {
                warn!("ASN lookup for {} failed: {}", ip, e);
                None
            }
        });

    Ok(Some(RawSourceResult {
        info: DataSourceInfo {
            source: DataSource::MaxMind,
            accuracy: base_accuracy_score(&city),
            completeness: base_completeness_score(&city, asn.as_ref()),
            timestamp: now_ms(),
        },
        record: SourceRecord::Base { city, asn },
    }))
}

/// 区域专用库
fn query_region(databases: &OpenDatabases, ip: IpAddr) -> Result<Option<RawSourceResult>> {
    let Some(reader) = databases.region.as_ref() else {
        return Ok(None);
    };

    let Some(region) = lookup::<RegionRecord>(reader, ip)? else {
        return Ok(None);
    };

    Ok(Some(RawSourceResult {
        info: DataSourceInfo {
            source: DataSource::GeoCn,
            accuracy: region_accuracy_score(&region),
            completeness: region_completeness_score(&region),
            timestamp: now_ms(),
        },
        record: SourceRecord::Region(region),
    }))
}

/// 城市库精度评分（0-1）
pub fn base_accuracy_score(city: &CityRecord) -> f64 {
    let mut score: f64 = 0.5;

    if city.coordinates().is_some() {
        score += 0.3;
        match city.accuracy_radius() {
            Some(r) if r <= 10 => score += 0.2,
            Some(r) if r <= 50 => score += 0.1,
            _ => {}
        }
    }

    if city.has_city_names() {
        score += 0.1;
    }

    score.min(1.0)
}

/// 城市库完整度：国家、省、市、坐标、邮编、AS 组织 6 项
pub fn base_completeness_score(city: &CityRecord, asn: Option<&AsnRecord>) -> f64 {
    let fields = [
        city.country.as_ref().is_some_and(|c| c.has_names()),
        city.has_subdivision_names(),
        city.has_city_names(),
        city.coordinates().is_some(),
        city.postal_code().is_some(),
        asn.is_some_and(|a| a.autonomous_system_organization.is_some()),
    ];
    fields.iter().filter(|f| **f).count() as f64 / fields.len() as f64
}

/// 区域库精度评分（0-1）
pub fn region_accuracy_score(region: &RegionRecord) -> f64 {
    let mut score: f64 = 0.7;
    if region.coordinates().is_some() {
        score += 0.2;
    }
    if region.district.is_some() {
        score += 0.1;
    }
    score.min(1.0)
}

/// 区域库完整度：国家、省、市、区、ISP、坐标 6 项
pub fn region_completeness_score(region: &RegionRecord) -> f64 {
    let fields = [
        region.country.is_some(),
        region.province.is_some(),
        region.city.is_some(),
        region.district.is_some(),
        region.isp.is_some(),
        region.coordinates().is_some(),
    ];
    fields.iter().filter(|f| **f).count() as f64 / fields.len() as f64
}
