//! Adapter error type.

use std::path::PathBuf;

use thiserror::Error;

use crate::gateway::handler::AppError;
use crate::host::HostError;

/// Errors raised while bridging a request to an application and back.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The application asked for something only the host could do.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("application failed: {0}")]
    Application(#[source] AppError),

    /// The host rejected a status or header value.
    #[error(transparent)]
    Host(#[from] HostError),

    #[error("body iteration failed: {0}")]
    Body(#[source] std::io::Error),

    #[error("failed to open body file {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
