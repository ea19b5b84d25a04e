//! Configuration loading from disk and the process environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::{Environment, GatewayConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {var}: `{value}`")]
    Env { var: &'static str, value: String },

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration: optional TOML file, then environment overrides, then
/// validation.
///
/// A `.env` file in the working directory is loaded first when present.
pub fn load_config(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    dotenvy::dotenv().ok();

    let mut config = match path {
        Some(path) => parse_file(path)?,
        None => GatewayConfig::default(),
    };
    apply_env(&mut config, |var| std::env::var(var).ok())?;

    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

fn parse_file(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Overlay recognized environment variables onto `config`.
///
/// | Variable          | Field                     |
/// |-------------------|---------------------------|
/// | `FRONTEND_URL`    | `cors.frontend_url`       |
/// | `ALLOWED_ORIGINS` | `cors.allowed_origins`    |
/// | `SESSION_SECRET`  | `session.secret`          |
/// | `DATABASE_URL`    | `store.url`               |
/// | `PORT`            | `listener.port`           |
/// | `APP_ENV`         | `environment`             |
pub fn apply_env<F>(config: &mut GatewayConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

    if let Some(url) = get("FRONTEND_URL") {
        config.cors.frontend_url = url.trim().to_string();
    }
    if let Some(list) = get("ALLOWED_ORIGINS") {
        config.cors.allowed_origins = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
    }
    if let Some(secret) = get("SESSION_SECRET") {
        config.session.secret = secret;
    }
    if let Some(url) = get("DATABASE_URL") {
        config.store.url = url.trim().to_string();
    }
    if let Some(port) = get("PORT") {
        config.listener.port = port.trim().parse().map_err(|_| ConfigError::Env {
            var: "PORT",
            value: port.clone(),
        })?;
    }
    if let Some(env) = get("APP_ENV") {
        config.environment = Environment::parse(&env).ok_or(ConfigError::Env {
            var: "APP_ENV",
            value: env.clone(),
        })?;
    }
    Ok(())
}
