//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Fallback session secret used for local development.
pub const DEV_SESSION_SECRET: &str = "your-secret-key";

/// Root configuration for the admission gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Deployment mode (affects secure-cookie enforcement).
    pub environment: Environment,

    /// Listener configuration (host, port).
    pub listener: ListenerConfig,

    /// Forwarding header trust.
    pub proxy: ProxyConfig,

    /// Body parsing limits and upload staging.
    pub body: BodyConfig,

    /// Static serving of uploaded files.
    pub uploads: UploadsConfig,

    /// Origin policy.
    pub cors: CorsConfig,

    /// Security response headers.
    pub security: SecurityConfig,

    /// Input sanitization.
    pub sanitize: SanitizeConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Session cookie and lifetime.
    pub session: SessionConfig,

    /// Shared store backing sessions and rate-limit counters.
    pub store: StoreConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Deployment mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Environment::Production
    }

    /// Parse an environment name, accepting the common short forms.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Some(Environment::Production),
            "development" | "dev" | "test" => Some(Environment::Development),
            _ => None,
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Interface to bind (e.g., "0.0.0.0").
    pub host: String,

    /// Process port.
    pub port: u16,
}

impl ListenerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

/// Reverse proxy trust.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Derive the client address from `X-Forwarded-For`.
    ///
    /// Only safe when a reverse proxy that overwrites the header is actually
    /// in front of the gateway; otherwise clients can pick their own address.
    pub trust_proxy: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self { trust_proxy: true }
    }
}

/// Body parsing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BodyConfig {
    /// Maximum JSON body size in bytes.
    pub json_limit_bytes: usize,

    /// Maximum multipart body size in bytes.
    pub upload_limit_bytes: usize,

    /// Maximum number of files in one multipart request.
    pub max_files: usize,

    /// Directory for transient upload files (system temp dir if unset).
    pub temp_dir: Option<String>,
}

impl Default for BodyConfig {
    fn default() -> Self {
        Self {
            json_limit_bytes: 100 * 1024,
            upload_limit_bytes: 10 * 1024 * 1024,
            max_files: 10,
            temp_dir: None,
        }
    }
}

/// Static upload serving.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UploadsConfig {
    pub enabled: bool,

    /// URL prefix the directory is mounted under.
    pub url_prefix: String,

    /// Directory on disk.
    pub directory: String,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url_prefix: "/uploads".to_string(),
            directory: "uploads".to_string(),
        }
    }
}

/// Origin policy configuration.
///
/// With an empty `allowed_origins` the policy runs in single-origin mode and
/// only `frontend_url` is accepted.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Default frontend origin.
    pub frontend_url: String,

    /// Additional allowed origins.
    pub allowed_origins: Vec<String>,

    /// Emit `Access-Control-Allow-Credentials: true`.
    pub allow_credentials: bool,

    /// Methods advertised on preflight.
    pub allowed_methods: Vec<String>,

    /// Headers advertised on preflight.
    pub allowed_headers: Vec<String>,

    /// Preflight cache lifetime in seconds.
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            frontend_url: "http://localhost:5173".to_string(),
            allowed_origins: Vec::new(),
            allow_credentials: true,
            allowed_methods: ["GET", "HEAD", "PUT", "PATCH", "POST", "DELETE"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            allowed_headers: ["Content-Type", "Authorization", "X-Requested-With"]
                .iter()
                .map(|h| h.to_string())
                .collect(),
            max_age_secs: 600,
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Enable security headers.
    pub enable_headers: bool,

    /// `Cross-Origin-Resource-Policy` value. Uploaded assets are embedded by
    /// the frontend, hence `cross-origin`.
    pub cross_origin_resource_policy: String,

    /// `Content-Security-Policy` value.
    pub content_security_policy: String,

    /// `Strict-Transport-Security` max-age; 0 disables the header.
    pub hsts_max_age_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_headers: true,
            cross_origin_resource_policy: "cross-origin".to_string(),
            content_security_policy: "default-src 'self';base-uri 'self';font-src 'self' https: data:;\
form-action 'self';frame-ancestors 'self';img-src 'self' data:;object-src 'none';\
script-src 'self';script-src-attr 'none';style-src 'self' https: 'unsafe-inline';\
upgrade-insecure-requests"
                .to_string(),
            hsts_max_age_secs: 15_552_000,
        }
    }
}

/// Input sanitization.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SanitizeConfig {
    pub enabled: bool,
}

impl Default for SanitizeConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Only paths under this prefix are counted.
    pub path_prefix: String,

    /// Fixed window length in seconds.
    pub window_secs: u64,

    /// Maximum requests per window per client.
    pub max_requests: u64,

    /// Message returned once the ceiling is hit.
    pub message: String,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path_prefix: "/api/".to_string(),
            window_secs: 15 * 60,
            max_requests: 100,
            message: "Too many requests, please try again later.".to_string(),
        }
    }
}

/// Session configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Cookie signing secret.
    pub secret: String,

    /// Cookie name.
    pub cookie_name: String,

    /// Session lifetime in seconds.
    pub ttl_secs: u64,

    /// Extend the expiry on every request instead of fixing it at issuance.
    pub rolling: bool,
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret: DEV_SESSION_SECRET.to_string(),
            cookie_name: "sid".to_string(),
            ttl_secs: 24 * 60 * 60,
            rolling: false,
        }
    }
}

/// Shared store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// `memory://` for in-process stores, `redis://...` for a shared store.
    pub url: String,

    /// Interval for purging expired in-process entries.
    pub sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "memory://".to_string(),
            sweep_interval_secs: 60,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "admission_gateway=debug,tower_http=info,info".to_string(),
            log_format: LogFormat::Text,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
