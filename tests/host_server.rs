//! Host server behavior independent of the gateway adapter.

use std::sync::Arc;
use std::time::Duration;

use h1_gateway::host::{HostRequest, HostResponse, HostServer, ServiceError, Servlet};

mod common;

struct Describe;

impl Servlet for Describe {
    fn service(&self, req: &HostRequest, res: &mut HostResponse) -> Result<(), ServiceError> {
        res.set_header("content-type", "text/plain")?;
        res.append_body(format!("{}|{}", req.script_name(), req.path_info()).as_bytes());
        Ok(())
    }
}

async fn start_host() -> h1_gateway::ServerHandle {
    let mut server = HostServer::new(common::test_config());
    server.mount("/app", Arc::new(Describe));
    server.mount("/app/admin/", Arc::new(Describe));
    server.start().await.unwrap()
}

#[tokio::test]
async fn test_mount_table_routing() {
    let handle = start_host().await;
    let client = reqwest::Client::new();

    let body = client
        .get(common::url(handle.local_addr(), "/app/admin/users"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "/app/admin|/users");

    let body = client
        .get(common::url(handle.local_addr(), "/app/foo%20bar"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "/app|/foo bar");

    let res = client
        .get(common::url(handle.local_addr(), "/elsewhere"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 404);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_keep_alive_serves_sequential_requests() {
    let handle = start_host().await;

    let raw = common::raw_exchange(
        handle.local_addr(),
        b"GET /app/one HTTP/1.1\r\nHost: t\r\n\r\nGET /app/two HTTP/1.1\r\nHost: t\r\nConnection: close\r\n\r\n",
    )
    .await;
    let text = String::from_utf8(raw).unwrap();

    assert_eq!(text.matches("HTTP/1.1 200 OK").count(), 2);
    assert!(text.contains("Connection: keep-alive\r\n"));
    assert!(text.contains("/app|/one"));
    assert!(text.ends_with("/app|/two"));

    handle.shutdown().await;
}

#[tokio::test]
async fn test_malformed_request_gets_400() {
    let handle = start_host().await;

    let raw = common::raw_exchange(handle.local_addr(), b"NOT A REQUEST\r\n\r\n").await;
    let (head, _) = common::split_response(&raw);

    assert!(head.starts_with("HTTP/1.1 400 Bad Request"));
    assert!(head.contains("Connection: close"));

    handle.shutdown().await;
}

#[tokio::test]
async fn test_oversized_body_gets_413() {
    let mut config = common::test_config();
    config.limits.max_body_bytes = 4;
    let mut server = HostServer::new(config);
    server.mount("/", Arc::new(Describe));
    let handle = server.start().await.unwrap();

    let raw = common::raw_exchange(
        handle.local_addr(),
        b"POST / HTTP/1.1\r\nHost: t\r\nContent-Length: 10\r\n\r\n0123456789",
    )
    .await;
    let (head, _) = common::split_response(&raw);

    assert!(head.starts_with("HTTP/1.1 413 Payload Too Large"));

    handle.shutdown().await;
}

#[tokio::test]
async fn test_http10_response_closes() {
    let handle = start_host().await;

    let raw = common::raw_exchange(handle.local_addr(), b"GET /app/x HTTP/1.0\r\n\r\n").await;
    let (head, body) = common::split_response(&raw);

    assert!(head.contains("Content-Length: 7"));
    assert!(head.contains("Connection: close"));
    assert_eq!(body, b"/app|/x");

    handle.shutdown().await;
}

async fn wait_for_connections(handle: &h1_gateway::ServerHandle, expected: u64) {
    for _ in 0..100 {
        if handle.active_connections() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("expected {expected} active connections, saw {}", handle.active_connections());
}

#[tokio::test]
async fn test_active_connections_tracks_open_sockets() {
    let handle = start_host().await;

    let idle = tokio::net::TcpStream::connect(handle.local_addr()).await.unwrap();
    wait_for_connections(&handle, 1).await;

    drop(idle);
    wait_for_connections(&handle, 0).await;

    handle.shutdown().await;
}
