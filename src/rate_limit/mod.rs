//! 请求限流

pub mod limiter;

pub use limiter::{
    RateLimitDecision, RateLimiter, RateLimiterRegistry, RateLimiterStats, RegistryStats,
};
