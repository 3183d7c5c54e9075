//! ipgeo - IP geolocation resolution engine
//!
//! Turns a raw IP address into a normalized location/network record:
//! local MMDB databases are queried concurrently, merged with per-source
//! trust rules, enriched with geocoded coordinates, cached with
//! accuracy-adaptive TTLs and backed by external HTTP fallback providers.
//!
//! # Architecture
//! - `services::geoip`: reader, downloader, geocoder, merger, fallback chain and the query pipeline
//! - `cache`: LRU + TTL query cache
//! - `rate_limit`: fixed-window request quotas per endpoint group
//! - `config`: static configuration (TOML + `IPGEO__*` environment)
//! - `system`: logging and the event bus
//! - `utils`: IP classification, retry policy, clocks

pub mod cache;
pub mod cli;
pub mod config;
pub mod errors;
pub mod rate_limit;
pub mod services;
pub mod system;
pub mod utils;

pub use errors::{GeoIpError, Result};
pub use services::geoip::{GeoIpEngine, GeoIpService, GeoRecord};
