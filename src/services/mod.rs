//! Service layer

pub mod geoip;
