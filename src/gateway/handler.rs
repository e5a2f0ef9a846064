//! Gateway servlet and handler registration.
//!
//! # Responsibilities
//! - Define the [`Application`] calling convention
//! - Bridge one host request to one application call ([`Gateway`])
//! - Build, configure and start a host server for an application
//!
//! # Design Decisions
//! - Starting returns a [`ServerHandle`]; nothing is kept in globals
//! - The chunked-passthrough finalizer is installed per server, so other
//!   servers in the same process keep native behavior

use std::sync::Arc;

use crate::config::schema::{default_host_for, DEFAULT_PORT};
use crate::config::{ServerConfig, TlsConfig};
use crate::gateway::env::{build_environment, Environment};
use crate::gateway::error::GatewayError;
use crate::gateway::reconcile::ChunkedPassthrough;
use crate::gateway::response::AppResponse;
use crate::gateway::writer::write_response;
use crate::host::{HostRequest, HostResponse, HostServer, ServerError, ServerHandle, ServiceError, Servlet};

/// Error type applications return.
pub type AppError = Box<dyn std::error::Error + Send + Sync>;

/// An application: one environment in, one response out.
///
/// Called on the host's blocking pool; it may block.
pub trait Application: Send + Sync + 'static {
    fn call(&self, env: Environment) -> Result<AppResponse, AppError>;
}

impl<F> Application for F
where
    F: Fn(Environment) -> Result<AppResponse, AppError> + Send + Sync + 'static,
{
    fn call(&self, env: Environment) -> Result<AppResponse, AppError> {
        self(env)
    }
}

/// Servlet that runs an [`Application`] for every request it receives.
pub struct Gateway<A> {
    app: A,
}

impl<A: Application> Gateway<A> {
    pub fn new(app: A) -> Self {
        Self { app }
    }
}

impl<A: Application> Servlet for Gateway<A> {
    fn service(&self, req: &HostRequest, res: &mut HostResponse) -> Result<(), ServiceError> {
        res.set_application_driven(true);

        let env = build_environment(req);
        let response = self.app.call(env).map_err(GatewayError::Application)?;
        write_response(res, response)?;
        Ok(())
    }
}

/// Registration options, layered over the server configuration.
#[derive(Debug, Clone, Default)]
pub struct HandlerOptions {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls: Option<TlsConfig>,
    /// Deployment environment; selects the default host.
    pub environment: Option<String>,
}

impl HandlerOptions {
    fn apply(self, config: &mut ServerConfig) {
        if let Some(environment) = self.environment {
            config.environment = environment;
        }
        if let Some(host) = self.host {
            config.listener.host = Some(host);
        }
        if let Some(port) = self.port {
            config.listener.port = port;
        }
        if let Some(tls) = self.tls {
            config.listener.tls = Some(tls);
        }
    }
}

/// Build (without starting) a server that mounts `app` at `/`.
pub fn server_for<A: Application>(app: A, options: HandlerOptions, mut config: ServerConfig) -> HostServer {
    options.apply(&mut config);

    let mut server = HostServer::new(config);
    server.set_header_finalizer(Arc::new(ChunkedPassthrough));
    server.mount("/", Arc::new(Gateway::new(app)));
    server
}

/// Serve `app` with default configuration.
pub async fn run<A: Application>(app: A, options: HandlerOptions) -> Result<ServerHandle, ServerError> {
    run_with_config(app, options, ServerConfig::default()).await
}

/// Serve `app`, with `options` overriding `config`.
pub async fn run_with_config<A: Application>(
    app: A,
    options: HandlerOptions,
    config: ServerConfig,
) -> Result<ServerHandle, ServerError> {
    let server = server_for(app, options, config);
    tracing::info!(
        environment = %server.config().environment,
        host = %server.config().bind_host(),
        port = server.config().listener.port,
        "Starting gateway"
    );
    server.start().await
}

/// Option help entries, as `(option, description)` pairs.
pub fn valid_options(environment: &str) -> Vec<(&'static str, String)> {
    vec![
        (
            "Host=HOST",
            format!("Hostname to listen on (default: {})", default_host_for(environment)),
        ),
        ("Port=PORT", format!("Port to listen on (default: {DEFAULT_PORT})")),
    ]
}
