//! Gateway adapter: runs applications written against the environment /
//! `(status, headers, body)` convention on the host server.
//!
//! # Data Flow
//! ```text
//! HostRequest
//!     → env.rs (build_environment: meta vars, gateway.* entries, path info)
//!     → Application::call(Environment) → AppResponse
//!     → writer.rs (status, header folding, cookies, body: hijack | file | chunks)
//!     → HostResponse
//!     → reconcile.rs (ChunkedPassthrough, run at header finalization)
//!     → host sends
//! ```
//!
//! # Design Decisions
//! - Body shapes are an enum, matched explicitly
//! - Only partial hijack exists; full hijack fails with `Unsupported`
//! - The chunked override lives on the response, scoped to one
//!   finalization call

pub mod env;
pub mod error;
pub mod handler;
pub mod hijack;
pub mod reconcile;
pub mod response;
pub mod writer;

pub use env::{build_environment, EnvValue, Environment};
pub use error::GatewayError;
pub use handler::{run, run_with_config, server_for, valid_options, AppError, Application, Gateway, HandlerOptions};
pub use hijack::{HijackActivation, HijackIo};
pub use reconcile::ChunkedPassthrough;
pub use response::{AppResponse, Body, BodyKind, HeaderField, ResponseHeaders};
pub use writer::write_response;
