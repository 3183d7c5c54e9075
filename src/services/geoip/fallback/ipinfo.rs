//! IPinfo Lite provider，凭据 `IPINFO_TOKEN`
//!
//! Lite 接口只有国家与 ASN 级别的数据，结果精度固定为 low。

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use ureq::Agent;

use super::{FallbackProvider, not_found_as_none};
use crate::config::ProviderEndpoint;
use crate::errors::Result;
use crate::services::geoip::constants::SOURCE_IPINFO;
use crate::services::geoip::types::{Accuracy, AsInfo, GeoRecord, RegisteredCountry};

const TOKEN_ENV: &str = "IPINFO_TOKEN";
const UNKNOWN_COUNTRY: &str = "未知";
const UNKNOWN_COUNTRY_CODE: &str = "UNKNOWN";

#[derive(Debug, Default, Deserialize)]
pub(crate) struct IpInfoLiteResponse {
    /// 形如 "AS15169"
    #[serde(default)]
    pub asn: Option<String>,
    #[serde(default)]
    pub as_name: Option<String>,
    #[serde(default)]
    pub as_domain: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

pub struct IpInfoProvider {
    agent: Agent,
    base_url: String,
    token: Option<String>,
}

impl IpInfoProvider {
    pub fn new(endpoint: &ProviderEndpoint, token: Option<String>) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(Duration::from_millis(endpoint.timeout_ms)))
            .build()
            .into();

        Self {
            agent,
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    pub fn from_env(endpoint: &ProviderEndpoint) -> Self {
        Self::new(endpoint, std::env::var(TOKEN_ENV).ok())
    }

    fn fetch_sync(agent: &Agent, url: &str, token: &str) -> Result<Option<IpInfoLiteResponse>> {
        let response = not_found_as_none(
            agent
                .get(url)
                .query("token", token)
                .header("Accept", "application/json")
                .call(),
        )?;
        match response {
            Some(response) => Ok(Some(response.into_body().read_json()?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl FallbackProvider for IpInfoProvider {
    fn name(&self) -> &'static str {
        SOURCE_IPINFO
    }

    fn is_available(&self) -> bool {
        self.token.is_some()
    }

    async fn query(&self, ip: IpAddr) -> Result<Option<GeoRecord>> {
        let Some(token) = self.token.clone() else {
            return Ok(None);
        };

        let agent = self.agent.clone();
        let url = format!("{}/{}", self.base_url, ip);
        let response =
            tokio::task::spawn_blocking(move || Self::fetch_sync(&agent, &url, &token)).await??;

        Ok(response.map(|r| transform(&ip, &r)))
    }
}

/// "AS15169" → 15169
fn parse_asn(raw: &str) -> Option<u32> {
    raw.trim()
        .trim_start_matches("AS")
        .trim_start_matches("as")
        .parse()
        .ok()
}

pub(crate) fn transform(ip: &IpAddr, response: &IpInfoLiteResponse) -> GeoRecord {
    let mut record = GeoRecord::empty(ip, SOURCE_IPINFO);

    record.country = response
        .country
        .clone()
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| UNKNOWN_COUNTRY.to_string());
    record.country_code = response
        .country_code
        .clone()
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| UNKNOWN_COUNTRY_CODE.to_string());
    record.registered_country = Some(RegisteredCountry {
        code: record.country_code.clone(),
        name: record.country.clone(),
    });

    record.isp = response.as_name.clone();
    if let Some(number) = response.asn.as_deref().and_then(parse_asn) {
        record.as_info = Some(AsInfo {
            number: Some(number),
            name: response.as_name.clone(),
            info: response.as_domain.clone(),
        });
    }

    record.timezone = Some("UTC".to_string());
    record.accuracy = Accuracy::Low;
    record
}
