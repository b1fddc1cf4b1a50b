//! Shared, dependency-light primitives used by every fmproxy crate:
//! rate-limit configuration and the log/error sanitization layer.

pub mod config;
pub mod sanitize;

pub use config::RateLimitConfig;
pub use sanitize::redact_secrets;
