//! h1-gateway
//!
//! Serves a demo application through the gateway adapter.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ net (listener, TLS, connection limits)
//!                  │
//!                  ▼
//!              host (read request ─▶ mount table ─▶ servlet on blocking pool)
//!                  │                                   │
//!                  │                                   ▼
//!                  │                      gateway (environment ─▶ app ─▶ writer)
//!                  ▼
//!              host (setup_header via ChunkedPassthrough ─▶ send) ──▶ Client
//! ```
//!
//! # Demo routes
//! - `/chunked` answers with a body the application frames itself
//! - `/stream` hands the body stream to a background task (partial hijack)
//! - anything else echoes the request environment as text

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use tokio::io::AsyncWriteExt;

use h1_gateway::config::{load_config, ServerConfig, TlsConfig};
use h1_gateway::gateway::env::{PATH_INFO, URL_SCHEME};
use h1_gateway::gateway::{self, AppError, AppResponse, Body, Environment, HandlerOptions, ResponseHeaders};
use h1_gateway::observability::init_logging;

#[derive(Parser)]
#[command(name = "h1-gateway")]
#[command(about = "Serve a demo application through the HTTP/1.1 gateway", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Hostname to listen on
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// PEM certificate chain; enables TLS together with --tls-key
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<String>,

    /// PEM private key
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };

    init_logging(&config.observability)?;

    tracing::info!("h1-gateway v{} starting", env!("CARGO_PKG_VERSION"));
    for (option, description) in gateway::valid_options(&config.environment) {
        tracing::debug!(option, %description, "Handler option");
    }

    let tls = match (cli.tls_cert, cli.tls_key) {
        (Some(cert_path), Some(key_path)) => Some(TlsConfig { cert_path, key_path }),
        _ => None,
    };
    let options = HandlerOptions {
        host: cli.host,
        port: cli.port,
        tls,
        environment: None,
    };

    let handle = gateway::run_with_config(demo_app, options, config).await?;
    tracing::info!(address = %handle.local_addr(), "Listening for connections");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received SIGINT, initiating graceful shutdown");
    handle.shutdown().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn demo_app(env: Environment) -> Result<AppResponse, AppError> {
    match env.get_str(PATH_INFO).unwrap_or("/") {
        "/chunked" => Ok(self_framed()),
        "/stream" => Ok(streamed()),
        _ => Ok(echo(&env)),
    }
}

fn echo(env: &Environment) -> AppResponse {
    let mut text = format!("scheme: {}\n", env.get_str(URL_SCHEME).unwrap_or("http"));
    for (key, value) in env.iter() {
        text.push_str(&format!("{key} = {value:?}\n"));
    }
    AppResponse::new(
        200,
        ResponseHeaders::new().with("content-type", "text/plain; charset=utf-8"),
        text,
    )
}

fn self_framed() -> AppResponse {
    let chunks = ["hello ", "from ", "the application"]
        .into_iter()
        .map(|part| Ok(Bytes::from(format!("{:x}\r\n{part}\r\n", part.len()))))
        .chain(std::iter::once(Ok(Bytes::from_static(b"0\r\n\r\n"))));

    AppResponse::new(
        200,
        ResponseHeaders::new()
            .with("content-type", "text/plain")
            .with("transfer-encoding", "chunked"),
        Body::from_chunks(chunks),
    )
}

fn streamed() -> AppResponse {
    let headers = ResponseHeaders::new()
        .with("content-type", "text/plain")
        .with_hijack(|mut io| {
            tokio::spawn(async move {
                for tick in 1..=5 {
                    if io.write_all(format!("tick {tick}\n").as_bytes()).await.is_err() {
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
                if let Err(e) = io.shutdown().await {
                    tracing::debug!(error = %e, "Stream ended early");
                }
            });
        });

    AppResponse::new(200, headers, Body::empty())
}
