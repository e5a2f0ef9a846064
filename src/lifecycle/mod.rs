//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     HostServer::start → bind listener → spawn accept loop → ServerHandle
//!
//! Shutdown:
//!     ServerHandle::shutdown → Shutdown::trigger → stop accepting
//!         → drain connections (bounded by grace period) → accept loop exits
//! ```
//!
//! # Design Decisions
//! - No process-wide server singleton: the handle returned by start is the
//!   only way to stop a server
//! - Shutdown has a grace period: lingering connections are abandoned after it

pub mod shutdown;

pub use shutdown::Shutdown;
