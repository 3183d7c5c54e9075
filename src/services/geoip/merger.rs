//! 多数据源合并
//!
//! 以通用城市库结果为基础，目标区域内的 IP 再用区域专用库覆盖省/市/区、
//! ISP、网络类型与坐标。区域库缺少坐标时调用地理编码服务补全。

use std::net::IpAddr;
use std::sync::Arc;

use tracing::{debug, trace};

use super::constants::{
    LANGUAGE_PRIORITY, REGION_COUNTRY_CODE, SOURCE_GEOCN, SOURCE_MAXMIND, isp_name_for_asn,
    province_short_name, remap_special_region,
};
use super::geocode::{CoordinateSource, Coordinates, GeocodeService};
use super::types::{
    Accuracy, AsInfo, AsnRecord, CityRecord, GeoRecord, LocalizedNames, Location, NamedPlace,
    RawSourceResult, RegionRecord, RegisteredCountry, SourceRecord,
};
use crate::errors::{GeoIpError, Result};

/// 原生坐标的精度半径（公里）
const NATIVE_RADIUS_KM: u32 = 1;
/// 地理编码坐标的精度半径（公里）
const GEOCODED_RADIUS_KM: u32 = 10;

pub struct DataMerger {
    geocode: Option<Arc<GeocodeService>>,
}

impl DataMerger {
    pub fn new(geocode: Arc<GeocodeService>) -> Self {
        Self {
            geocode: Some(geocode),
        }
    }

    /// 不做地理编码补全，只使用数据源自带的坐标
    pub fn without_geocoding() -> Self {
        Self { geocode: None }
    }

    pub fn geocode(&self) -> Option<&Arc<GeocodeService>> {
        self.geocode.as_ref()
    }

    /// 合并同一 IP 的多个数据源结果
    pub async fn merge(&self, ip: IpAddr, results: &[RawSourceResult]) -> Result<GeoRecord> {
        if results.is_empty() {
            return Err(GeoIpError::merge_failed(format!(
                "no source results to merge for {}",
                ip
            )));
        }

        let base = results.iter().find_map(|r| match &r.record {
            SourceRecord::Base { city, asn } => Some((city, asn.as_ref())),
            SourceRecord::Region(_) => None,
        });
        let region = results.iter().find_map(|r| match &r.record {
            SourceRecord::Region(region) => Some(region),
            SourceRecord::Base { .. } => None,
        });

        let mut record = match base {
            Some((city, asn)) => base_record(ip, city, asn),
            None => region_only_record(ip, region),
        };

        if let Some(region) = region
            && applies_to_region(&record)
        {
            self.supplement_with_region(&mut record, region).await;
        }

        trace!(
            "Merged {} results for {}: source={}, accuracy={}",
            results.len(),
            ip,
            record.source,
            record.accuracy
        );
        Ok(record)
    }

    /// 用区域专用库覆盖区域字段
    async fn supplement_with_region(&self, record: &mut GeoRecord, region: &RegionRecord) {
        let regions = dedup_regions([
            region.province.as_deref(),
            region.city.as_deref(),
            region.district.as_deref(),
        ]);

        if !regions.is_empty() {
            record.regions = regions;
            record.regions_short = dedup_regions([
                region.province.as_deref().and_then(province_short_name),
                region.city.as_deref().map(|c| c.strip_suffix('市').unwrap_or(c)),
                region.district.as_deref(),
            ]);
        }

        let coordinates = match &self.geocode {
            Some(geocode) => {
                geocode
                    .get_coordinates(
                        region.lat,
                        region.lng,
                        region.province.as_deref(),
                        region.city.as_deref(),
                        region.district.as_deref(),
                    )
                    .await
            }
            None => region
                .coordinates()
                .map(|(lat, lng)| Coordinates::native(lat, lng)),
        };

        record.accuracy = match coordinates {
            Some(coords) => {
                let (radius, accuracy) = match coords.source {
                    CoordinateSource::Native => (NATIVE_RADIUS_KM, Accuracy::High),
                    CoordinateSource::Geocoded => (GEOCODED_RADIUS_KM, Accuracy::Medium),
                };
                record.location = Some(Location::new(
                    coords.latitude,
                    coords.longitude,
                    Some(radius),
                ));
                accuracy
            }
            None => {
                debug!(
                    "No coordinates for {} after region merge, keeping base location",
                    record.ip
                );
                record.accuracy.min(Accuracy::Medium)
            }
        };

        if region.province.is_some() {
            record.province = region.province.clone();
            record.province_code = None;
        }
        if region.city.is_some() {
            record.city = region.city.clone();
            record.city_code = None;
        }
        if region.district.is_some() {
            record.district = region.district.clone();
        }

        if let Some(isp) = &region.isp {
            record.isp = Some(isp.clone());
            record.as_info.get_or_insert_with(AsInfo::default).info = Some(isp.clone());
        }

        if region.network_type.is_some() {
            record.network_type = region.network_type.clone();
        }

        record.source = SOURCE_GEOCN.to_string();
    }
}

/// 只有目标区域内、且注册国缺失或同为目标区域的 IP 才用区域库覆盖
fn applies_to_region(record: &GeoRecord) -> bool {
    record.country_code == REGION_COUNTRY_CODE
        && record
            .registered_country
            .as_ref()
            .is_none_or(|rc| rc.code == REGION_COUNTRY_CODE)
}

/// 从城市库 + ASN 库构建基础记录
fn base_record(ip: IpAddr, city: &CityRecord, asn: Option<&AsnRecord>) -> GeoRecord {
    let mut record = GeoRecord::empty(&ip, SOURCE_MAXMIND);

    if let Some(asn) = asn {
        let number = asn.autonomous_system_number;
        let info = number.and_then(isp_name_for_asn).map(str::to_string);
        record.isp = info
            .clone()
            .or_else(|| asn.autonomous_system_organization.clone());
        record.as_info = Some(AsInfo {
            number,
            name: asn.autonomous_system_organization.clone(),
            info,
        });
    }

    if let Some(location) = &city.location {
        if let Some((lat, lng)) = location.coordinates() {
            record.location = Some(Location::new(lat, lng, location.accuracy_radius));
        }
        record.timezone = location.time_zone.clone();
    }

    if let Some(country) = &city.country {
        record.country = country_name(country);
        record.country_code = country.iso_code.clone().unwrap_or_default();
    }

    if let Some(registered) = &city.registered_country {
        record.registered_country = Some(RegisteredCountry {
            code: registered.iso_code.clone().unwrap_or_default(),
            name: country_name(registered),
        });
    }

    if let Some(subdivision) = city.subdivisions.first() {
        record.province = localized_name(&subdivision.names);
        record.province_code = subdivision.iso_code.clone();
    }

    if let Some(city_place) = &city.city {
        record.city = localized_name(&city_place.names);
        record.city_code = city_place.geoname_id.map(|id| id.to_string());
    }

    record.postal_code = city.postal_code().map(str::to_string);
    record.regions = extract_regions(city);
    record.accuracy = base_accuracy(city);
    record
}

/// 没有城市库结果时，仅由区域库构建记录
fn region_only_record(ip: IpAddr, region: Option<&RegionRecord>) -> GeoRecord {
    let mut record = GeoRecord::empty(&ip, SOURCE_GEOCN);
    record.country = region
        .and_then(|r| r.country.clone())
        .unwrap_or_else(|| "中国".to_string());
    record.country_code = REGION_COUNTRY_CODE.to_string();
    record
}

/// 按语言优先级取名称，都没有时取任意可用语言
pub fn localized_name(names: &LocalizedNames) -> Option<String> {
    LANGUAGE_PRIORITY
        .iter()
        .find_map(|lang| names.get(*lang))
        .or_else(|| names.values().next())
        .filter(|name| !name.is_empty())
        .cloned()
}

/// 国家名称，特别地区重映射
fn country_name(place: &NamedPlace) -> String {
    let name = localized_name(&place.names).unwrap_or_default();
    match remap_special_region(&name) {
        Some(remapped) => remapped.to_string(),
        None => name,
    }
}

/// 过滤空值并去重，保持首次出现的顺序
pub fn dedup_regions<'a, I>(regions: I) -> Vec<String>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let mut result: Vec<String> = Vec::new();
    for region in regions.into_iter().flatten() {
        if !region.is_empty() && !result.iter().any(|r| r == region) {
            result.push(region.to_string());
        }
    }
    result
}

/// 省级行政区 + 城市
///
/// 城市名已包含在最后一个区域或国家名中时不重复添加
fn extract_regions(city: &CityRecord) -> Vec<String> {
    let mut regions: Vec<String> = city
        .subdivisions
        .iter()
        .filter_map(|s| localized_name(&s.names))
        .collect();

    if let Some(city_name) = city.city.as_ref().and_then(|c| localized_name(&c.names)) {
        let country_name = city
            .country
            .as_ref()
            .and_then(|c| localized_name(&c.names))
            .unwrap_or_default();

        let in_last_region = regions.last().is_some_and(|r| r.contains(&city_name));
        if !in_last_region && !country_name.contains(&city_name) {
            regions.push(city_name);
        }
    }

    dedup_regions(regions.iter().map(|r| Some(r.as_str())))
}

/// 城市库结果的精度等级
///
/// 坐标 +2，精度半径 <=10km +2 / <=50km +1，城市 +1，省级 +1；
/// >=6 为 high，>=3 为 medium
pub fn base_accuracy(city: &CityRecord) -> Accuracy {
    let mut score = 0;

    if city.coordinates().is_some() {
        score += 2;
        match city.accuracy_radius() {
            Some(r) if r <= 10 => score += 2,
            Some(r) if r <= 50 => score += 1,
            _ => {}
        }
    }

    if city.has_city_names() {
        score += 1;
    }

    if city.has_subdivision_names() {
        score += 1;
    }

    match score {
        s if s >= 6 => Accuracy::High,
        s if s >= 3 => Accuracy::Medium,
        _ => Accuracy::Low,
    }
}
