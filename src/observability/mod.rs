//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! pipeline stages, store sweeper, server lifecycle
//!     → logging.rs (tracing subscriber: text or JSON)
//!     → metrics.rs (counters and histograms, Prometheus scrape endpoint)
//! ```
//!
//! # Design Decisions
//! - Request ids (`x-request-id`) are attached by the server and appear on
//!   the request span
//! - Metric calls are no-ops until a recorder is installed

pub mod logging;
pub mod metrics;
