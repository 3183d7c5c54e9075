use ipgeo::errors::{GeoIpError, Result};
use std::error::Error;

#[cfg(test)]
mod error_creation_tests {
    use super::*;

    #[test]
    fn test_database_not_found_error() {
        let error = GeoIpError::database_not_found("GeoLite2-City.mmdb");

        assert!(matches!(error, GeoIpError::DatabaseNotFound(_)));
        assert!(error.to_string().contains("Database Not Found"));
        assert!(error.to_string().contains("GeoLite2-City.mmdb"));
    }

    #[test]
    fn test_invalid_input_error() {
        let error = GeoIpError::invalid_input("999.1.1.1");

        assert!(matches!(error, GeoIpError::InvalidInput(_)));
        assert_eq!(error.message(), "999.1.1.1");
    }

    #[test]
    fn test_provider_errors() {
        let unavailable = GeoIpError::provider_unavailable("no credentials");
        let failed = GeoIpError::provider_failed("HTTP 500");

        assert!(matches!(unavailable, GeoIpError::ProviderUnavailable(_)));
        assert!(matches!(failed, GeoIpError::ProviderFailed(_)));
        assert_ne!(unavailable, failed);
    }

    #[test]
    fn test_error_is_std_error() {
        let error = GeoIpError::query_failed("no record");
        let boxed: Box<dyn Error> = Box::new(error);
        assert!(boxed.to_string().contains("Query Failed"));
    }
}

#[cfg(test)]
mod error_code_tests {
    use super::*;

    #[test]
    fn test_codes_are_unique() {
        let errors = [
            GeoIpError::database_not_found(""),
            GeoIpError::invalid_input(""),
            GeoIpError::query_failed(""),
            GeoIpError::merge_failed(""),
            GeoIpError::download_failed(""),
            GeoIpError::geocode_unavailable(""),
            GeoIpError::provider_unavailable(""),
            GeoIpError::provider_failed(""),
            GeoIpError::service_unavailable(""),
            GeoIpError::file_operation(""),
            GeoIpError::serialization(""),
            GeoIpError::http(""),
        ];

        let mut codes: Vec<&str> = errors.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert_eq!(GeoIpError::database_not_found("").code(), "E001");
        assert_eq!(GeoIpError::http("").code(), "E012");
    }

    #[test]
    fn test_format_simple() {
        let error = GeoIpError::download_failed("HTTP 404");
        assert_eq!(error.format_simple(), "Download Failed: HTTP 404");
    }

    #[test]
    fn test_format_colored_contains_code() {
        let error = GeoIpError::service_unavailable("destroyed");
        let output = error.format_colored();
        assert!(output.contains("E009"));
        assert!(output.contains("destroyed"));
    }
}

#[cfg(test)]
mod classification_tests {
    use super::*;

    #[test]
    fn test_user_reason_distinguishes_failure_kinds() {
        assert_eq!(
            GeoIpError::invalid_input("x").user_reason(),
            "invalid IP address"
        );
        assert_eq!(
            GeoIpError::query_failed("x").user_reason(),
            "no geolocation data for this address"
        );
        assert_eq!(
            GeoIpError::merge_failed("x").user_reason(),
            "no geolocation data for this address"
        );
        assert_eq!(
            GeoIpError::database_not_found("x").user_reason(),
            "all geolocation services are temporarily unavailable"
        );
        assert_eq!(
            GeoIpError::provider_failed("x").user_reason(),
            "all geolocation services are temporarily unavailable"
        );
    }

    #[test]
    fn test_only_invalid_input_skips_fallback() {
        assert!(!GeoIpError::invalid_input("x").is_recoverable());
        assert!(GeoIpError::query_failed("x").is_recoverable());
        assert!(GeoIpError::database_not_found("x").is_recoverable());
        assert!(GeoIpError::service_unavailable("x").is_recoverable());
    }

    #[test]
    fn test_transient_errors() {
        assert!(GeoIpError::http("timeout").is_transient());
        assert!(GeoIpError::geocode_unavailable("503").is_transient());
        assert!(GeoIpError::provider_failed("500").is_transient());
        assert!(!GeoIpError::download_failed("HTTP 404").is_transient());
        assert!(!GeoIpError::invalid_input("x").is_transient());
    }
}

#[cfg(test)]
mod conversion_tests {
    use super::*;

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.mmdb");
        let error: GeoIpError = io.into();
        assert!(matches!(error, GeoIpError::FileOperation(_)));
        assert!(error.message().contains("missing.mmdb"));
    }

    #[test]
    fn test_from_serde_json_error() {
        let result: Result<serde_json::Value> =
            serde_json::from_str::<serde_json::Value>("{not json").map_err(GeoIpError::from);
        assert!(matches!(result, Err(GeoIpError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_from_join_error() {
        let handle = tokio::spawn(async { panic!("boom") });
        let error: GeoIpError = handle.await.unwrap_err().into();
        assert!(matches!(error, GeoIpError::ServiceUnavailable(_)));
    }
}
