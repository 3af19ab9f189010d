//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (sizes > 0, ports valid)
//! - Check addresses parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::ProxyConfig;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Check every field with a semantic constraint.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut fail = |field: &'static str, message: String| {
        errors.push(ValidationError { field, message });
    };

    if config.listener.bind_address.trim().is_empty() {
        fail("listener.bind_address", "must not be empty".into());
    }
    if config.listener.backlog == 0 {
        fail("listener.backlog", "must be at least 1".into());
    }
    if config.listener.max_connections == 0 {
        fail("listener.max_connections", "must be at least 1".into());
    }

    if config.cache.enabled && config.cache.directory.as_os_str().is_empty() {
        fail("cache.directory", "must not be empty when the cache is enabled".into());
    }

    if config.limits.read_chunk_bytes == 0 {
        fail("limits.read_chunk_bytes", "must be at least 1".into());
    }
    if config.limits.max_header_bytes < 16 {
        fail(
            "limits.max_header_bytes",
            format!("{} is too small to hold a request line", config.limits.max_header_bytes),
        );
    }

    if config.origin.default_port == 0 {
        fail("origin.default_port", "must be a valid port".into());
    }
    if config.tunnel.default_port == 0 {
        fail("tunnel.default_port", "must be a valid port".into());
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error") {
        fail(
            "observability.log_level",
            format!("unknown level {:?}", config.observability.log_level),
        );
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        fail(
            "observability.metrics_address",
            format!("{:?} is not a socket address", config.observability.metrics_address),
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
