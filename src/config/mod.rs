//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → loader.rs (environment overrides, .env)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → passed by reference into every stage constructor
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; no stage reads the environment
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    BodyConfig, CorsConfig, Environment, GatewayConfig, ListenerConfig, RateLimitConfig,
    SecurityConfig, SessionConfig, StoreConfig, UploadsConfig,
};
pub use validation::ValidationError;
