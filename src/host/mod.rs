//! Minimal HTTP/1.1 host server.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → request.rs (read head + body, httparse)
//!     → server.rs (mount table lookup → servlet.service on blocking pool)
//!     → response.rs (setup_header via HeaderFinalizer → status line,
//!                    headers, cookies, body framing)
//!     → keep-alive loop or close
//! ```
//!
//! # Design Decisions
//! - Servlets fill a mutable response; only the host writes to the socket
//! - Header finalization is pluggable per server, not patched globally
//! - One tokio task per connection; servlets may block

pub mod error;
pub mod request;
pub mod response;
pub mod server;
pub mod servlet;

pub use error::HostError;
pub use request::{read_request, HostRequest};
pub use response::{
    HeaderFinalizer, HostResponse, NativeHeaders, NativeSetup, ResponseBody, ResponseContext,
};
pub use server::{HostServer, ServerError, ServerHandle};
pub use servlet::{ServiceError, Servlet};
