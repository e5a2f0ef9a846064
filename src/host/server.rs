//! Host server: mount table, accept loop and per-connection request loop.
//!
//! # Responsibilities
//! - Bind the listener (optionally TLS) and accept connections
//! - Read requests, resolve the mounted servlet, dispatch, send the response
//! - Keep connections alive between requests, bounded by the idle timeout
//! - Stop accepting and drain on shutdown
//!
//! # Design Decisions
//! - `start` returns a [`ServerHandle`]; there is no global server instance
//! - Servlets run on the blocking pool so they may block freely
//! - Request-level failures answer with an error page and close the connection

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::{Method, StatusCode, Version};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::host::error::HostError;
use crate::host::request::{read_request, HostRequest};
use crate::host::response::{HeaderFinalizer, HostResponse, NativeHeaders, ResponseContext};
use crate::host::servlet::Servlet;
use crate::lifecycle::shutdown::{Shutdown, ShutdownSignal};
use crate::net::{load_tls_acceptor, ConnectionTracker, Listener, ListenerError, TlsError};

/// Errors raised while starting a server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Servlets keyed by mount path, longest path first.
#[derive(Default)]
struct MountTable {
    entries: Vec<(String, Arc<dyn Servlet>)>,
}

impl MountTable {
    fn insert(&mut self, path: &str, servlet: Arc<dyn Servlet>) {
        let prefix = normalize_mount(path);
        self.entries.retain(|(existing, _)| *existing != prefix);
        self.entries.push((prefix, servlet));
        self.entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    }

    /// Find the servlet for a decoded request path, with its script name.
    fn resolve(&self, path: &str) -> Option<(&str, Arc<dyn Servlet>)> {
        self.entries
            .iter()
            .find(|(prefix, _)| {
                prefix.is_empty()
                    || path == prefix
                    || path
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .map(|(prefix, servlet)| (prefix.as_str(), Arc::clone(servlet)))
    }
}

/// `/` → ``, `/app/` → `/app`, `app` → `/app`.
fn normalize_mount(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// An HTTP/1.1 server that dispatches to mounted servlets.
pub struct HostServer {
    config: ServerConfig,
    mounts: MountTable,
    finalizer: Arc<dyn HeaderFinalizer>,
}

impl HostServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            mounts: MountTable::default(),
            finalizer: Arc::new(NativeHeaders),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Mount `servlet` at `path`, replacing any servlet already there.
    pub fn mount(&mut self, path: &str, servlet: Arc<dyn Servlet>) {
        tracing::debug!(path, "Servlet mounted");
        self.mounts.insert(path, servlet);
    }

    /// Install the strategy used to finalize every response's headers.
    pub fn set_header_finalizer(&mut self, finalizer: Arc<dyn HeaderFinalizer>) {
        self.finalizer = finalizer;
    }

    /// Bind and start accepting connections in the background.
    pub async fn start(self) -> Result<ServerHandle, ServerError> {
        let tls = match &self.config.listener.tls {
            Some(tls) => Some(load_tls_acceptor(
                Path::new(&tls.cert_path),
                Path::new(&tls.key_path),
            )?),
            None => None,
        };

        let listener = Listener::bind(
            self.config.bind_host(),
            self.config.listener.port,
            self.config.listener.max_connections,
        )
        .await?;
        let local_addr = listener.local_addr()?;

        let grace = Duration::from_secs(self.config.timeouts.shutdown_grace_secs);
        let shutdown = Shutdown::new();
        let tracker = ConnectionTracker::new();
        let shared = Arc::new(Shared {
            config: self.config,
            mounts: self.mounts,
            finalizer: self.finalizer,
        });

        let task = tokio::spawn(accept_loop(
            listener,
            tls,
            shared,
            shutdown.clone(),
            tracker.clone(),
        ));

        tracing::info!(address = %local_addr, "Host server started");

        Ok(ServerHandle {
            local_addr,
            shutdown,
            tracker,
            task,
            grace,
        })
    }
}

struct Shared {
    config: ServerConfig,
    mounts: MountTable,
    finalizer: Arc<dyn HeaderFinalizer>,
}

/// Handle to a running server. Dropping it leaves the server running.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: Shutdown,
    tracker: ConnectionTracker,
    task: JoinHandle<()>,
    grace: Duration,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Stop accepting, then wait for open connections up to the grace period.
    pub async fn shutdown(self) {
        self.shutdown.trigger();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Accept loop ended abnormally");
        }
        if !self.tracker.drain(self.grace).await {
            tracing::warn!(
                active = self.tracker.active_count(),
                "Connections still open after grace period"
            );
        }
        tracing::info!(address = %self.local_addr, "Host server stopped");
    }
}

async fn accept_loop(
    listener: Listener,
    tls: Option<TlsAcceptor>,
    shared: Arc<Shared>,
    shutdown: Shutdown,
    tracker: ConnectionTracker,
) {
    let mut signal = shutdown.subscribe();

    loop {
        let accepted = tokio::select! {
            _ = signal.recv() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer, permit) = match accepted {
            Ok(connection) => connection,
            Err(ListenerError::Closed) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Accept failed");
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
        };

        let guard = tracker.track();
        let tls = tls.clone();
        let shared = Arc::clone(&shared);
        let signal = shutdown.subscribe();
        let span = tracing::debug_span!("connection", connection_id = %guard.id(), %peer);

        tokio::spawn(
            async move {
                let _permit = permit;
                let _guard = guard;
                if let Err(e) = handle_connection(stream, peer, tls, &shared, signal).await {
                    tracing::debug!(error = %e, "Connection ended with error");
                }
            }
            .instrument(span),
        );
    }

    tracing::info!("Accept loop stopped");
}

#[derive(Debug, Clone, Copy)]
struct ConnInfo {
    peer: SocketAddr,
    local: Option<SocketAddr>,
    https: bool,
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    tls: Option<TlsAcceptor>,
    shared: &Shared,
    signal: ShutdownSignal,
) -> Result<(), HostError> {
    let local = stream.local_addr().ok();
    if let Err(e) = stream.set_nodelay(true) {
        tracing::trace!(error = %e, "Could not disable Nagle");
    }

    match tls {
        Some(acceptor) => {
            let stream = acceptor.accept(stream).await?;
            let conn = ConnInfo { peer, local, https: true };
            serve_connection(stream, conn, shared, signal).await
        }
        None => {
            let conn = ConnInfo { peer, local, https: false };
            serve_connection(stream, conn, shared, signal).await
        }
    }
}

async fn serve_connection<S>(
    stream: S,
    conn: ConnInfo,
    shared: &Shared,
    mut signal: ShutdownSignal,
) -> Result<(), HostError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);
    let mut writer = BufWriter::new(write_half);

    let idle = Duration::from_secs(shared.config.timeouts.keep_alive_secs);
    let request_timeout = Duration::from_secs(shared.config.timeouts.request_secs);

    loop {
        let readable = tokio::select! {
            _ = signal.recv() => false,
            ready = tokio::time::timeout(idle, reader.fill_buf()) => match ready {
                Ok(Ok(buf)) => !buf.is_empty(),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    tracing::debug!("Idle timeout");
                    false
                }
            },
        };
        if !readable {
            break;
        }

        let read = tokio::time::timeout(request_timeout, read_request(&mut reader, &shared.config.limits)).await;
        let request = match read {
            Ok(Ok(Some(request))) => request,
            Ok(Ok(None)) => break,
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Rejecting request");
                if let Some(status) = e.status() {
                    send_error(&mut writer, status, shared).await?;
                }
                break;
            }
            Err(_) => {
                send_error(&mut writer, StatusCode::REQUEST_TIMEOUT, shared).await?;
                break;
            }
        };

        let request = request
            .with_addrs(Some(conn.peer), conn.local)
            .with_https(conn.https)
            .with_server_software(shared.config.listener.server_software.clone());

        let span = tracing::info_span!(
            "request",
            request_id = %Uuid::new_v4(),
            method = %request.method(),
            path = %request.path(),
        );
        if !dispatch(shared, request, &mut writer).instrument(span).await? {
            break;
        }
    }

    if let Err(e) = writer.shutdown().await {
        tracing::trace!(error = %e, "Shutdown of write half failed");
    }
    Ok(())
}

/// Run one request through its servlet and send the response.
///
/// Returns whether the connection may be reused.
async fn dispatch<W>(shared: &Shared, mut request: HostRequest, writer: &mut W) -> Result<bool, HostError>
where
    W: AsyncWrite + Unpin,
{
    let started = Instant::now();
    let context = ResponseContext::for_request(&request);
    let finalizer = Arc::clone(&shared.finalizer);

    let mut response = match shared.mounts.resolve(&request.request_path()) {
        None => HostResponse::error_page(StatusCode::NOT_FOUND, context, finalizer),
        Some((script_name, servlet)) => {
            request.mount(script_name);
            let response = HostResponse::new(context.clone(), Arc::clone(&finalizer));

            let outcome = tokio::task::spawn_blocking(move || {
                let mut response = response;
                let result = servlet.service(&request, &mut response);
                (response, result)
            })
            .await;

            match outcome {
                Ok((response, Ok(()))) => response,
                Ok((_, Err(e))) => {
                    tracing::error!(error = %e, "Servlet failed");
                    HostResponse::error_page(StatusCode::INTERNAL_SERVER_ERROR, context, finalizer)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Servlet panicked");
                    HostResponse::error_page(StatusCode::INTERNAL_SERVER_ERROR, context, finalizer)
                }
            }
        }
    };

    response.send_response(writer).await?;

    tracing::info!(
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Request completed"
    );

    Ok(response.keep_alive())
}

async fn send_error<W>(writer: &mut W, status: StatusCode, shared: &Shared) -> Result<(), HostError>
where
    W: AsyncWrite + Unpin,
{
    let context = ResponseContext {
        method: Method::GET,
        version: Version::HTTP_11,
        keep_alive: false,
        server_software: shared.config.listener.server_software.clone(),
    };
    HostResponse::error_page(status, context, Arc::new(NativeHeaders))
        .send_response(writer)
        .await
}
