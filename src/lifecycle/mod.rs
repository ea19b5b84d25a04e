//! Process lifecycle.
//!
//! # Data Flow
//! ```text
//! startup.rs:  config → tracing/metrics → stores → listener
//! signals.rs:  Ctrl-C / SIGTERM
//! shutdown.rs: broadcast to the server and store sweeper → drain → exit
//! ```

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{StartupError, Started};
