//! HTTP subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (request id, trace span, timeout, panic guard)
//!     → pipeline (body.rs and static_files.rs run as stages)
//!     → routes.rs (liveness, session, uploads, 404)
//! ```

pub mod body;
pub mod routes;
pub mod server;
pub mod static_files;

pub use server::{HttpServer, X_REQUEST_ID};
