use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeoIpError {
    DatabaseNotFound(String),
    InvalidInput(String),
    QueryFailed(String),
    MergeFailed(String),
    DownloadFailed(String),
    GeocodeUnavailable(String),
    ProviderUnavailable(String),
    ProviderFailed(String),
    ServiceUnavailable(String),
    FileOperation(String),
    Serialization(String),
    Http(String),
}

impl GeoIpError {
    /// 获取错误代码
    pub fn code(&self) -> &'static str {
        match self {
            GeoIpError::DatabaseNotFound(_) => "E001",
            GeoIpError::InvalidInput(_) => "E002",
            GeoIpError::QueryFailed(_) => "E003",
            GeoIpError::MergeFailed(_) => "E004",
            GeoIpError::DownloadFailed(_) => "E005",
            GeoIpError::GeocodeUnavailable(_) => "E006",
            GeoIpError::ProviderUnavailable(_) => "E007",
            GeoIpError::ProviderFailed(_) => "E008",
            GeoIpError::ServiceUnavailable(_) => "E009",
            GeoIpError::FileOperation(_) => "E010",
            GeoIpError::Serialization(_) => "E011",
            GeoIpError::Http(_) => "E012",
        }
    }

    /// 获取错误类型名称
    pub fn error_type(&self) -> &'static str {
        match self {
            GeoIpError::DatabaseNotFound(_) => "Database Not Found",
            GeoIpError::InvalidInput(_) => "Invalid Input",
            GeoIpError::QueryFailed(_) => "Query Failed",
            GeoIpError::MergeFailed(_) => "Merge Failed",
            GeoIpError::DownloadFailed(_) => "Download Failed",
            GeoIpError::GeocodeUnavailable(_) => "Geocode Unavailable",
            GeoIpError::ProviderUnavailable(_) => "Provider Unavailable",
            GeoIpError::ProviderFailed(_) => "Provider Failed",
            GeoIpError::ServiceUnavailable(_) => "Service Unavailable",
            GeoIpError::FileOperation(_) => "File Operation Error",
            GeoIpError::Serialization(_) => "Serialization Error",
            GeoIpError::Http(_) => "HTTP Error",
        }
    }

    /// 获取错误详情
    pub fn message(&self) -> &str {
        match self {
            GeoIpError::DatabaseNotFound(msg) => msg,
            GeoIpError::InvalidInput(msg) => msg,
            GeoIpError::QueryFailed(msg) => msg,
            GeoIpError::MergeFailed(msg) => msg,
            GeoIpError::DownloadFailed(msg) => msg,
            GeoIpError::GeocodeUnavailable(msg) => msg,
            GeoIpError::ProviderUnavailable(msg) => msg,
            GeoIpError::ProviderFailed(msg) => msg,
            GeoIpError::ServiceUnavailable(msg) => msg,
            GeoIpError::FileOperation(msg) => msg,
            GeoIpError::Serialization(msg) => msg,
            GeoIpError::Http(msg) => msg,
        }
    }

    /// 面向调用方的失败原因
    ///
    /// 区分"该地址没有数据"与"所有服务暂时不可用"两类失败
    pub fn user_reason(&self) -> &'static str {
        match self {
            GeoIpError::InvalidInput(_) => "invalid IP address",
            GeoIpError::QueryFailed(_) | GeoIpError::MergeFailed(_) => {
                "no geolocation data for this address"
            }
            _ => "all geolocation services are temporarily unavailable",
        }
    }

    /// 本地查询失败后是否值得交给 fallback 链
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, GeoIpError::InvalidInput(_))
    }

    /// 网络类的瞬时错误，重试可能成功
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GeoIpError::Http(_) | GeoIpError::GeocodeUnavailable(_) | GeoIpError::ProviderFailed(_)
        )
    }

    /// 格式化为彩色输出（用于 CLI 模式）
    pub fn format_colored(&self) -> String {
        use colored::Colorize;
        format!(
            "{} {} {}\n  {}",
            "[ERROR]".red().bold(),
            self.code().yellow(),
            self.error_type().red(),
            self.message().white()
        )
    }

    /// 格式化为简洁输出
    pub fn format_simple(&self) -> String {
        format!("{}: {}", self.error_type(), self.message())
    }
}

impl fmt::Display for GeoIpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_simple())
    }
}

impl std::error::Error for GeoIpError {}

// 便捷的构造函数
impl GeoIpError {
    pub fn database_not_found<T: Into<String>>(msg: T) -> Self {
        GeoIpError::DatabaseNotFound(msg.into())
    }

    pub fn invalid_input<T: Into<String>>(msg: T) -> Self {
        GeoIpError::InvalidInput(msg.into())
    }

    pub fn query_failed<T: Into<String>>(msg: T) -> Self {
        GeoIpError::QueryFailed(msg.into())
    }

    pub fn merge_failed<T: Into<String>>(msg: T) -> Self {
        GeoIpError::MergeFailed(msg.into())
    }

    pub fn download_failed<T: Into<String>>(msg: T) -> Self {
        GeoIpError::DownloadFailed(msg.into())
    }

    pub fn geocode_unavailable<T: Into<String>>(msg: T) -> Self {
        GeoIpError::GeocodeUnavailable(msg.into())
    }

    pub fn provider_unavailable<T: Into<String>>(msg: T) -> Self {
        GeoIpError::ProviderUnavailable(msg.into())
    }

    pub fn provider_failed<T: Into<String>>(msg: T) -> Self {
        GeoIpError::ProviderFailed(msg.into())
    }

    pub fn service_unavailable<T: Into<String>>(msg: T) -> Self {
        GeoIpError::ServiceUnavailable(msg.into())
    }

    pub fn file_operation<T: Into<String>>(msg: T) -> Self {
        GeoIpError::FileOperation(msg.into())
    }

    pub fn serialization<T: Into<String>>(msg: T) -> Self {
        GeoIpError::Serialization(msg.into())
    }

    pub fn http<T: Into<String>>(msg: T) -> Self {
        GeoIpError::Http(msg.into())
    }
}

// 为常见的错误类型实现 From trait
impl From<std::io::Error> for GeoIpError {
    fn from(err: std::io::Error) -> Self {
        GeoIpError::FileOperation(err.to_string())
    }
}

impl From<serde_json::Error> for GeoIpError {
    fn from(err: serde_json::Error) -> Self {
        GeoIpError::Serialization(err.to_string())
    }
}

impl From<maxminddb::MaxMindDbError> for GeoIpError {
    fn from(err: maxminddb::MaxMindDbError) -> Self {
        GeoIpError::QueryFailed(err.to_string())
    }
}

impl From<ureq::Error> for GeoIpError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::StatusCode(status) => GeoIpError::Http(format!("HTTP {}", status)),
            other => GeoIpError::Http(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for GeoIpError {
    fn from(err: tokio::task::JoinError) -> Self {
        GeoIpError::ServiceUnavailable(format!("background task failed: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, GeoIpError>;
