//! Partial hijack: the application takes over the response body stream
//! once the host has sent the headers.
//!
//! The pipe is an in-memory bounded buffer. Writes wait while it is full,
//! reads wait while it is empty, and dropping (or shutting down) the write
//! end is the end-of-body signal.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};

use crate::gateway::error::GatewayError;

/// Bytes buffered between the application and the connection.
pub const PIPE_CAPACITY: usize = 64 * 1024;

/// One-shot callback handed the write end of the body pipe.
pub type HijackCallback = Box<dyn FnOnce(HijackIo) + Send>;

/// Create a unidirectional body pipe.
pub fn pipe() -> (PipeReader, HijackIo) {
    let (reader, writer) = tokio::io::duplex(PIPE_CAPACITY);
    (PipeReader(reader), HijackIo(writer))
}

/// Write end of the body pipe, owned by the application.
pub struct HijackIo(DuplexStream);

impl fmt::Debug for HijackIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HijackIo")
    }
}

impl AsyncWrite for HijackIo {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_shutdown(cx)
    }
}

/// Read end of the body pipe, installed as the response body.
pub struct PipeReader(DuplexStream);

impl AsyncRead for PipeReader {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

/// The environment's hijack activation entry.
///
/// Only partial hijack is available, so activating a full hijack always
/// fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct HijackActivation;

impl HijackActivation {
    pub fn call(&self) -> Result<HijackIo, GatewayError> {
        Err(full_hijack_unsupported())
    }
}

pub(crate) fn full_hijack_unsupported() -> GatewayError {
    GatewayError::Unsupported("full hijack; return the hijack header for a partial hijack instead")
}
