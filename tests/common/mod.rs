//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use h1_gateway::gateway::{run_with_config, Application, HandlerOptions};
use h1_gateway::{ServerConfig, ServerHandle};

/// Loopback config on an ephemeral port with short timeouts.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listener.host = Some("127.0.0.1".into());
    config.listener.port = 0;
    config.timeouts.keep_alive_secs = 2;
    config.timeouts.shutdown_grace_secs = 1;
    config
}

/// Serve `app` through the gateway on an ephemeral port.
pub async fn start_gateway<A: Application>(app: A) -> ServerHandle {
    run_with_config(app, HandlerOptions::default(), test_config())
        .await
        .unwrap()
}

pub fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://{addr}{path}")
}

/// Send raw request bytes and read until the server closes.
#[allow(dead_code)]
pub async fn raw_exchange(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();

    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .expect("server did not close the connection")
        .unwrap();
    response
}

/// Split a raw response into head and body at the first blank line.
#[allow(dead_code)]
pub fn split_response(raw: &[u8]) -> (String, Vec<u8>) {
    let end = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response has no header terminator");
    (
        String::from_utf8_lossy(&raw[..end]).into_owned(),
        raw[end + 4..].to_vec(),
    )
}
