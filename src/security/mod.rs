//! Security stages.
//!
//! # Data Flow
//! ```text
//! proxy.rs      → ClientAddr (rate-limit key, forwarded scheme)
//! cors.rs       → 403 or CORS response headers
//! headers.rs    → defensive response headers
//! sanitize.rs   → script-free query, path and body
//! rate_limit.rs → 429 under the API prefix
//! ```
//!
//! # Design Decisions
//! - Fail closed: a rejection never reaches route dispatch
//! - No trust in client input: forwarded headers only count when configured

pub mod cors;
pub mod headers;
pub mod proxy;
pub mod rate_limit;
pub mod sanitize;
