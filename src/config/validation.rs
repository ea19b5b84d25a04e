//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (windows > 0, limits > 0)
//! - Check origins and path prefixes are well formed
//! - Refuse development fallbacks in production
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;

use crate::config::schema::{GatewayConfig, DEV_SESSION_SECRET};
use crate::security::cors::normalize_origin;

/// Minimum accepted secret length in production.
const MIN_SECRET_LEN: usize = 32;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid origin `{0}`: expected scheme://host[:port]")]
    InvalidOrigin(String),

    #[error("{field} must start with '/', got `{value}`")]
    InvalidPrefix { field: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("session secret is empty")]
    EmptySecret,

    #[error("session secret must not use the development fallback in production")]
    DevSecretInProduction,

    #[error("session secret must be at least {MIN_SECRET_LEN} bytes in production")]
    ShortSecret,

    #[error("session cookie name `{0}` contains invalid characters")]
    InvalidCookieName(String),

    #[error("unsupported store url `{0}`")]
    UnsupportedStore(String),
}

/// Validate a loaded configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if normalize_origin(&config.cors.frontend_url).is_none() {
        errors.push(ValidationError::InvalidOrigin(config.cors.frontend_url.clone()));
    }
    for origin in &config.cors.allowed_origins {
        if normalize_origin(origin).is_none() {
            errors.push(ValidationError::InvalidOrigin(origin.clone()));
        }
    }

    check_prefix(&mut errors, "rate_limit.path_prefix", &config.rate_limit.path_prefix);
    check_prefix(&mut errors, "uploads.url_prefix", &config.uploads.url_prefix);

    if config.rate_limit.window_secs == 0 {
        errors.push(ValidationError::Zero("rate_limit.window_secs"));
    }
    if config.rate_limit.max_requests == 0 {
        errors.push(ValidationError::Zero("rate_limit.max_requests"));
    }
    if config.session.ttl_secs == 0 {
        errors.push(ValidationError::Zero("session.ttl_secs"));
    }
    if config.body.json_limit_bytes == 0 {
        errors.push(ValidationError::Zero("body.json_limit_bytes"));
    }
    if config.body.upload_limit_bytes == 0 {
        errors.push(ValidationError::Zero("body.upload_limit_bytes"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::Zero("timeouts.request_secs"));
    }
    if config.store.sweep_interval_secs == 0 {
        errors.push(ValidationError::Zero("store.sweep_interval_secs"));
    }

    let secret = &config.session.secret;
    if secret.is_empty() {
        errors.push(ValidationError::EmptySecret);
    } else if config.environment.is_production() {
        if secret == DEV_SESSION_SECRET {
            errors.push(ValidationError::DevSecretInProduction);
        } else if secret.len() < MIN_SECRET_LEN {
            errors.push(ValidationError::ShortSecret);
        }
    }

    let name = &config.session.cookie_name;
    if name.is_empty()
        || !name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.')
    {
        errors.push(ValidationError::InvalidCookieName(name.clone()));
    }

    let store = config.store.url.as_str();
    let supported = store.starts_with("memory://")
        || (cfg!(feature = "redis") && (store.starts_with("redis://") || store.starts_with("rediss://")));
    if !supported {
        errors.push(ValidationError::UnsupportedStore(store.to_string()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_prefix(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if !value.starts_with('/') {
        errors.push(ValidationError::InvalidPrefix {
            field,
            value: value.to_string(),
        });
    }
}
