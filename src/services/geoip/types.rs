//! GeoIP 数据模型
//!
//! - `GeoRecord`：对外输出的统一记录
//! - `RawSourceResult`：单个本地数据库的原始解码结果 + 评分
//! - `CityRecord` / `AsnRecord` / `RegionRecord`：MMDB 解码结构

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Deserializer, Serialize};

use super::constants::{PRIVATE_NETWORK_LABEL, SOURCE_PRIVATE};
use crate::utils::IpVersion;

/// 精度等级
///
/// 排序：`Low < Medium < High`
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Accuracy {
    Low,
    Medium,
    High,
}

impl Accuracy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Accuracy::Low => "low",
            Accuracy::Medium => "medium",
            Accuracy::High => "high",
        }
    }
}

impl fmt::Display for Accuracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 经纬度 + 精度半径（公里）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_radius: Option<u32>,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64, accuracy_radius: Option<u32>) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_radius,
        }
    }

    /// 0/0 视为无坐标
    pub fn is_known(&self) -> bool {
        self.latitude != 0.0 && self.longitude != 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredCountry {
    pub code: String,
    pub name: String,
}

/// 自治系统信息
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// 运营商的本地化名称
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
}

impl AsInfo {
    pub fn is_empty(&self) -> bool {
        self.number.is_none() && self.name.is_none() && self.info.is_none()
    }
}

/// 统一的 IP 地理位置记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoRecord {
    pub ip: String,
    pub ip_version: IpVersion,
    pub country: String,
    pub country_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_country: Option<RegisteredCountry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub province: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub province_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regions_short: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isp: Option<String>,
    #[serde(rename = "as", default, skip_serializing_if = "Option::is_none")]
    pub as_info: Option<AsInfo>,
    /// 网络类型（如"数据中心"、"宽带"）
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub network_type: Option<String>,
    pub accuracy: Accuracy,
    pub source: String,
}

impl GeoRecord {
    /// 仅包含 IP 与来源的空记录
    pub fn empty(ip: &IpAddr, source: impl Into<String>) -> Self {
        Self {
            ip: ip.to_string(),
            ip_version: IpVersion::of(ip),
            country: String::new(),
            country_code: String::new(),
            registered_country: None,
            province: None,
            province_code: None,
            city: None,
            city_code: None,
            district: None,
            postal_code: None,
            regions: Vec::new(),
            regions_short: Vec::new(),
            location: None,
            timezone: None,
            isp: None,
            as_info: None,
            network_type: None,
            accuracy: Accuracy::Low,
            source: source.into(),
        }
    }

    /// 私有 / 本地地址的合成记录
    pub fn private_network(ip: &IpAddr) -> Self {
        Self {
            country: PRIVATE_NETWORK_LABEL.to_string(),
            country_code: "PRIVATE".to_string(),
            city: Some("本地网络".to_string()),
            isp: Some(PRIVATE_NETWORK_LABEL.to_string()),
            timezone: Some("UTC".to_string()),
            accuracy: Accuracy::High,
            ..Self::empty(ip, SOURCE_PRIVATE)
        }
    }

    pub fn asn(&self) -> Option<u32> {
        self.as_info.as_ref().and_then(|a| a.number)
    }

    pub fn is_ipv6(&self) -> bool {
        self.ip_version == IpVersion::V6
    }
}

// ============================================================
// Raw source results
// ============================================================

/// 本地数据源标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    /// 通用城市库 + ASN 库
    MaxMind,
    /// 区域专用库
    GeoCn,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::MaxMind => "maxmind",
            DataSource::GeoCn => "geocn",
        }
    }
}

/// 数据源头信息，读取时计算
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceInfo {
    pub source: DataSource,
    /// 0-1
    pub accuracy: f64,
    /// 0-1，已填充字段占比
    pub completeness: f64,
    /// Unix 毫秒
    pub timestamp: i64,
}

/// 按数据源区分的原始记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SourceRecord {
    Base {
        city: CityRecord,
        asn: Option<AsnRecord>,
    },
    Region(RegionRecord),
}

/// 单个数据库的查询结果，创建后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSourceResult {
    pub info: DataSourceInfo,
    pub record: SourceRecord,
}

impl RawSourceResult {
    pub fn source(&self) -> DataSource {
        self.info.source
    }
}

// ============================================================
// MMDB decode structures
// ============================================================

/// 语言代码 → 名称
pub type LocalizedNames = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedPlace {
    #[serde(default)]
    pub geoname_id: Option<u32>,
    #[serde(default)]
    pub iso_code: Option<String>,
    #[serde(default)]
    pub names: LocalizedNames,
}

impl NamedPlace {
    pub fn has_names(&self) -> bool {
        !self.names.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CityLocation {
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub accuracy_radius: Option<u32>,
    #[serde(default)]
    pub time_zone: Option<String>,
}

impl CityLocation {
    /// 经纬度均存在且非零
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) if lat != 0.0 && lng != 0.0 => Some((lat, lng)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostalRecord {
    #[serde(default)]
    pub code: Option<String>,
}

/// 城市库记录（GeoLite2-City 布局）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CityRecord {
    #[serde(default)]
    pub country: Option<NamedPlace>,
    #[serde(default)]
    pub registered_country: Option<NamedPlace>,
    #[serde(default)]
    pub subdivisions: Vec<NamedPlace>,
    #[serde(default)]
    pub city: Option<NamedPlace>,
    #[serde(default)]
    pub location: Option<CityLocation>,
    #[serde(default)]
    pub postal: Option<PostalRecord>,
}

impl CityRecord {
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.location.as_ref().and_then(CityLocation::coordinates)
    }

    pub fn accuracy_radius(&self) -> Option<u32> {
        self.location.as_ref().and_then(|l| l.accuracy_radius)
    }

    pub fn has_city_names(&self) -> bool {
        self.city.as_ref().is_some_and(NamedPlace::has_names)
    }

    pub fn has_subdivision_names(&self) -> bool {
        self.subdivisions.first().is_some_and(NamedPlace::has_names)
    }

    pub fn postal_code(&self) -> Option<&str> {
        self.postal.as_ref().and_then(|p| p.code.as_deref())
    }
}

/// ASN 库记录
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AsnRecord {
    #[serde(default)]
    pub autonomous_system_number: Option<u32>,
    #[serde(default)]
    pub autonomous_system_organization: Option<String>,
}

/// 区域专用库记录（GeoCN 布局）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionRecord {
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub province: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub district: Option<String>,
    #[serde(default)]
    pub isp: Option<String>,
    #[serde(rename = "type", default)]
    pub network_type: Option<String>,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub lat: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub lng: Option<f64>,
}

impl RegionRecord {
    /// 经纬度均存在且非零
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) if lat != 0.0 && lng != 0.0 => Some((lat, lng)),
            _ => None,
        }
    }
}

/// 坐标字段在部分库中以字符串存储
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f64),
        Text(String),
    }

    Ok(
        match Option::<NumberOrString>::deserialize(deserializer)? {
            Some(NumberOrString::Number(n)) => Some(n),
            Some(NumberOrString::Text(s)) => s.trim().parse().ok(),
            None => None,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accuracy_ordering() {
        assert!(Accuracy::High > Accuracy::Medium);
        assert!(Accuracy::Medium > Accuracy::Low);
        assert_eq!(Accuracy::High.min(Accuracy::Medium), Accuracy::Medium);
    }

    #[test]
    fn test_region_record_accepts_string_coordinates() {
        let record: RegionRecord = serde_json::from_str(
            r#"{"province":"广东省","lat":"23.13","lng":113.26,"type":"宽带"}"#,
        )
        .unwrap();

        assert_eq!(record.lat, Some(23.13));
        assert_eq!(record.lng, Some(113.26));
        assert_eq!(record.network_type.as_deref(), Some("宽带"));
        assert_eq!(record.coordinates(), Some((23.13, 113.26)));
    }

    #[test]
    fn test_zero_coordinates_are_unknown() {
        let record = RegionRecord {
            lat: Some(0.0),
            lng: Some(113.0),
            ..Default::default()
        };
        assert_eq!(record.coordinates(), None);
        assert!(!Location::new(0.0, 0.0, None).is_known());
    }

    #[test]
    fn test_private_network_record() {
        let ip: IpAddr = "192.168.1.1".parse().unwrap();
        let record = GeoRecord::private_network(&ip);

        assert_eq!(record.ip, "192.168.1.1");
        assert_eq!(record.country_code, "PRIVATE");
        assert_eq!(record.accuracy, Accuracy::High);
        assert_eq!(record.timezone.as_deref(), Some("UTC"));
        assert_eq!(record.ip_version, IpVersion::V4);
    }

    #[test]
    fn test_geo_record_json_shape() {
        let ip: IpAddr = "1.1.1.1".parse().unwrap();
        let mut record = GeoRecord::empty(&ip, "MaxMind");
        record.as_info = Some(AsInfo {
            number: Some(13335),
            name: Some("CLOUDFLARENET".to_string()),
            info: None,
        });
        record.network_type = Some("数据中心".to_string());

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["as"]["number"], 13335);
        assert_eq!(json["type"], "数据中心");
        assert_eq!(json["ip_version"], "IPv4");
        assert_eq!(json["accuracy"], "low");
        assert!(json.get("regions").is_none());
    }
}
