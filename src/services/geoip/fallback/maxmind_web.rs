//! MaxMind GeoIP2 Web Services provider
//!
//! 凭据：`MAXMIND_ACCOUNT_ID` + `MAXMIND_LICENSE_KEY`，HTTP Basic 认证。
//! `/city/{ip}` 与 `/asn/{ip}` 并发请求，city 缺失时视为无数据。

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use tracing::{debug, warn};
use ureq::Agent;

use super::{FallbackProvider, not_found_as_none};
use crate::config::ProviderEndpoint;
use crate::errors::Result;
use crate::services::geoip::constants::{SOURCE_MAXMIND_WEB, remap_special_region};
use crate::services::geoip::merger::localized_name;
use crate::services::geoip::types::{
    Accuracy, AsInfo, AsnRecord, CityRecord, GeoRecord, Location, RegisteredCountry,
};

const ACCOUNT_ID_ENV: &str = "MAXMIND_ACCOUNT_ID";
const LICENSE_KEY_ENV: &str = "MAXMIND_LICENSE_KEY";

/// 国家代码缺失时的占位
const UNKNOWN_COUNTRY_CODE: &str = "UNKNOWN";

/// Web Services 的 ASN 响应，字段可能位于顶层或 `traits` 下
#[derive(Debug, Default, Deserialize)]
struct WebAsnResponse {
    #[serde(flatten)]
    top_level: AsnRecord,
    #[serde(default)]
    traits: Option<WebTraits>,
}

#[derive(Debug, Default, Deserialize)]
struct WebTraits {
    #[serde(flatten)]
    asn: AsnRecord,
    #[serde(default)]
    network: Option<String>,
}

/// 合并后的 ASN 信息
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct WebAsn {
    pub number: Option<u32>,
    pub organization: Option<String>,
    pub network: Option<String>,
}

impl From<WebAsnResponse> for WebAsn {
    fn from(response: WebAsnResponse) -> Self {
        let traits = response.traits.unwrap_or_default();
        Self {
            number: response
                .top_level
                .autonomous_system_number
                .or(traits.asn.autonomous_system_number),
            organization: response
                .top_level
                .autonomous_system_organization
                .or(traits.asn.autonomous_system_organization),
            network: traits.network,
        }
    }
}

pub struct MaxMindWebProvider {
    agent: Agent,
    base_url: String,
    /// 预先编码的 Basic 认证头
    authorization: Option<String>,
}

impl MaxMindWebProvider {
    pub fn new(
        endpoint: &ProviderEndpoint,
        account_id: Option<String>,
        license_key: Option<String>,
    ) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(Duration::from_millis(endpoint.timeout_ms)))
            .build()
            .into();

        let authorization = match (account_id, license_key) {
            (Some(id), Some(key)) if !id.is_empty() && !key.is_empty() => Some(format!(
                "Basic {}",
                BASE64.encode(format!("{}:{}", id, key))
            )),
            _ => None,
        };

        Self {
            agent,
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            authorization,
        }
    }

    /// 从环境变量读取凭据
    pub fn from_env(endpoint: &ProviderEndpoint) -> Self {
        Self::new(
            endpoint,
            std::env::var(ACCOUNT_ID_ENV).ok(),
            std::env::var(LICENSE_KEY_ENV).ok(),
        )
    }

    fn fetch_city(agent: &Agent, url: &str, auth: &str) -> Result<Option<CityRecord>> {
        let response = not_found_as_none(
            agent
                .get(url)
                .header("Authorization", auth)
                .header("Accept", "application/json")
                .call(),
        )?;
        match response {
            Some(response) => Ok(Some(response.into_body().read_json::<CityRecord>()?)),
            None => Ok(None),
        }
    }

    fn fetch_asn(agent: &Agent, url: &str, auth: &str) -> Result<Option<WebAsn>> {
        let response = not_found_as_none(
            agent
                .get(url)
                .header("Authorization", auth)
                .header("Accept", "application/json")
                .call(),
        )?;
        match response {
            Some(response) => Ok(Some(
                response.into_body().read_json::<WebAsnResponse>()?.into(),
            )),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl FallbackProvider for MaxMindWebProvider {
    fn name(&self) -> &'static str {
        SOURCE_MAXMIND_WEB
    }

    fn is_available(&self) -> bool {
        self.authorization.is_some()
    }

    async fn query(&self, ip: IpAddr) -> Result<Option<GeoRecord>> {
        let Some(auth) = self.authorization.clone() else {
            return Ok(None);
        };

        let city_url = format!("{}/city/{}", self.base_url, ip);
        let asn_url = format!("{}/asn/{}", self.base_url, ip);

        let city_task = {
            let agent = self.agent.clone();
            let auth = auth.clone();
            tokio::task::spawn_blocking(move || Self::fetch_city(&agent, &city_url, &auth))
        };
        let asn_task = {
            let agent = self.agent.clone();
            tokio::task::spawn_blocking(move || Self::fetch_asn(&agent, &asn_url, &auth))
        };

        let (city, asn) = tokio::join!(city_task, asn_task);
        let city = city??;

        // ASN 失败不影响城市结果
        let asn = match asn? {
            Ok(asn) => asn,
            Err(e) => {
                warn!("MaxMind web ASN lookup failed for {}: {}", ip, e);
                None
            }
        };

        match city {
            Some(city) => Ok(Some(transform(&ip, &city, asn.as_ref()))),
            None => {
                debug!("MaxMind web has no city data for {}", ip);
                Ok(None)
            }
        }
    }
}

/// 将 Web Services 响应转换为统一记录
pub(crate) fn transform(ip: &IpAddr, city: &CityRecord, asn: Option<&WebAsn>) -> GeoRecord {
    let mut record = GeoRecord::empty(ip, SOURCE_MAXMIND_WEB);

    let country_name = city
        .country
        .as_ref()
        .and_then(|c| localized_name(&c.names))
        .unwrap_or_default();
    record.country = match remap_special_region(&country_name) {
        Some(remapped) => remapped.to_string(),
        None => country_name,
    };
    record.country_code = city
        .country
        .as_ref()
        .and_then(|c| c.iso_code.clone())
        .unwrap_or_else(|| UNKNOWN_COUNTRY_CODE.to_string());

    record.registered_country = city.registered_country.as_ref().and_then(|rc| {
        Some(RegisteredCountry {
            code: rc.iso_code.clone()?,
            name: localized_name(&rc.names).unwrap_or_default(),
        })
    });

    if let Some(subdivision) = city.subdivisions.first() {
        record.province = localized_name(&subdivision.names);
        record.province_code = subdivision.iso_code.clone();
    }
    record.city = city.city.as_ref().and_then(|c| localized_name(&c.names));
    record.postal_code = city.postal_code().map(str::to_string);

    record.regions = record
        .province
        .iter()
        .chain(record.city.iter())
        .cloned()
        .collect();
    record.regions.dedup();

    if let Some((latitude, longitude)) = city.coordinates() {
        record.location = Some(Location::new(latitude, longitude, city.accuracy_radius()));
    }
    record.timezone = Some(
        city.location
            .as_ref()
            .and_then(|l| l.time_zone.clone())
            .unwrap_or_else(|| "UTC".to_string()),
    );

    if let Some(asn) = asn {
        record.isp = asn.organization.clone();
        let info = AsInfo {
            number: asn.number,
            name: asn.organization.clone(),
            info: asn.network.clone(),
        };
        if !info.is_empty() {
            record.as_info = Some(info);
        }
    }

    record.accuracy = Accuracy::Medium;
    record
}
