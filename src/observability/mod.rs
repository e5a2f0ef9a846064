//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! host + gateway produce:
//!     → tracing events (structured fields: connection_id, request_id, status)
//!     → logging.rs installs the subscriber that formats them
//! ```
//!
//! # Design Decisions
//! - Structured logging via `tracing`, never `println!`
//! - `RUST_LOG` overrides the configured level

pub mod logging;

pub use logging::init_logging;
