//! Inbound request model and HTTP/1.x request reading.
//!
//! # Responsibilities
//! - Read one request head + body from a buffered stream (httparse does the
//!   parsing; this module only frames bytes)
//! - Decode chunked request bodies
//! - Expose CGI/1.1 meta variables for the mounted servlet
//!
//! # Design Decisions
//! - Bodies are read fully before dispatch and bounded by `max_body_bytes`
//! - Meta variables report absence as `None`; consumers decide what to drop

use std::collections::BTreeMap;
use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Version};
use percent_encoding::percent_decode_str;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::config::LimitsConfig;
use crate::host::error::HostError;

/// Longest accepted chunk-size or trailer line.
const MAX_LINE_BYTES: u64 = 8 * 1024;

/// A parsed inbound request, as handed to servlets.
#[derive(Debug, Clone)]
pub struct HostRequest {
    method: Method,
    target: String,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
    script_name: String,
    path_info: String,
    peer_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
    https: bool,
    server_software: String,
}

impl HostRequest {
    /// Create a request for `target` (origin-form, e.g. `/app/foo?x=1`).
    ///
    /// The request starts unmounted: empty script name, path info equal to
    /// the decoded path.
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        let target = target.into();
        let mut request = Self {
            method,
            target,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            script_name: String::new(),
            path_info: String::new(),
            peer_addr: None,
            local_addr: None,
            https: false,
            server_software: String::new(),
        };
        request.path_info = request.request_path();
        request
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Append a header. Invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_https(mut self, https: bool) -> Self {
        self.https = https;
        self
    }

    pub fn with_addrs(mut self, peer: Option<SocketAddr>, local: Option<SocketAddr>) -> Self {
        self.peer_addr = peer;
        self.local_addr = local;
        self
    }

    pub fn with_server_software(mut self, software: impl Into<String>) -> Self {
        self.server_software = software.into();
        self
    }

    /// Record the mount point that matched this request.
    ///
    /// Path info becomes the rest of the decoded path after `script_name`.
    pub fn mount(&mut self, script_name: &str) {
        let path = self.request_path();
        self.path_info = path.get(script_name.len()..).unwrap_or("").to_string();
        self.script_name = script_name.to_string();
    }

    pub fn set_path_info(&mut self, path_info: impl Into<String>) {
        self.path_info = path_info.into();
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Raw request target as received.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Raw (still percent-encoded) path component of the target.
    pub fn path(&self) -> &str {
        self.target.split_once('?').map_or(&self.target, |(path, _)| path)
    }

    pub fn query(&self) -> Option<&str> {
        self.target.split_once('?').map(|(_, query)| query)
    }

    /// Full decoded request path.
    pub fn request_path(&self) -> String {
        percent_decode_str(self.path()).decode_utf8_lossy().into_owned()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a header, if present and textual.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn script_name(&self) -> &str {
        &self.script_name
    }

    pub fn path_info(&self) -> &str {
        &self.path_info
    }

    pub fn is_https(&self) -> bool {
        self.https
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn server_software(&self) -> &str {
        &self.server_software
    }

    /// Whether the client asked to keep the connection open.
    pub fn keep_alive(&self) -> bool {
        let has_token = |token: &str| {
            self.headers.get_all(CONNECTION).iter().any(|value| {
                value
                    .to_str()
                    .unwrap_or("")
                    .split(',')
                    .any(|t| t.trim().eq_ignore_ascii_case(token))
            })
        };
        if self.version >= Version::HTTP_11 {
            !has_token("close")
        } else {
            has_token("keep-alive")
        }
    }

    /// CGI/1.1 meta variables for this request.
    pub fn meta_vars(&self) -> BTreeMap<String, Option<String>> {
        let mut meta = BTreeMap::new();
        let mut set = |key: &str, value: Option<String>| {
            meta.insert(key.to_string(), value);
        };

        let (server_name, server_port) = self.server_name_and_port();
        let content_length = self.header(CONTENT_LENGTH.as_str()).map(str::to_string).or_else(|| {
            (!self.body.is_empty()).then(|| self.body.len().to_string())
        });

        set("AUTH_TYPE", None);
        set("CONTENT_LENGTH", content_length);
        set("CONTENT_TYPE", self.header(CONTENT_TYPE.as_str()).map(str::to_string));
        set("GATEWAY_INTERFACE", Some("CGI/1.1".to_string()));
        set("PATH_INFO", Some(self.path_info.clone()));
        set("QUERY_STRING", self.query().map(str::to_string));
        set("REMOTE_ADDR", self.peer_addr.map(|a| a.ip().to_string()));
        set("REMOTE_HOST", self.peer_addr.map(|a| a.ip().to_string()));
        set("REMOTE_USER", None);
        set("REQUEST_METHOD", Some(self.method.to_string()));
        set("REQUEST_URI", Some(self.request_uri(&server_name, &server_port)));
        set("SCRIPT_NAME", Some(self.script_name.clone()));
        set("SERVER_NAME", Some(server_name));
        set("SERVER_PORT", Some(server_port));
        set("SERVER_PROTOCOL", Some(protocol_name(self.version).to_string()));
        set(
            "SERVER_SOFTWARE",
            (!self.server_software.is_empty()).then(|| self.server_software.clone()),
        );
        set("HTTPS", self.https.then(|| "on".to_string()));

        for name in self.headers.keys() {
            if *name == CONTENT_TYPE || *name == CONTENT_LENGTH {
                continue;
            }
            let joined = self
                .headers
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect::<Vec<_>>()
                .join(", ");
            let key = format!("HTTP_{}", name.as_str().to_ascii_uppercase().replace('-', "_"));
            meta.insert(key, Some(joined));
        }

        meta
    }

    fn scheme(&self) -> &'static str {
        if self.https {
            "https"
        } else {
            "http"
        }
    }

    fn server_name_and_port(&self) -> (String, String) {
        let default_port = if self.https { "443" } else { "80" };
        if let Some(authority) = self.header(HOST.as_str()) {
            let (name, port) = split_authority(authority);
            let port = port
                .map(str::to_string)
                .or_else(|| self.local_addr.map(|a| a.port().to_string()))
                .unwrap_or_else(|| default_port.to_string());
            return (name.to_string(), port);
        }
        match self.local_addr {
            Some(addr) => (addr.ip().to_string(), addr.port().to_string()),
            None => ("localhost".to_string(), default_port.to_string()),
        }
    }

    fn request_uri(&self, server_name: &str, server_port: &str) -> String {
        if self.target.starts_with("http://") || self.target.starts_with("https://") {
            return self.target.clone();
        }
        let default_port = if self.https { "443" } else { "80" };
        let host = if server_port == default_port {
            server_name.to_string()
        } else {
            format!("{server_name}:{server_port}")
        };
        format!("{}://{}{}", self.scheme(), host, self.target)
    }
}

fn protocol_name(version: Version) -> &'static str {
    if version == Version::HTTP_10 {
        "HTTP/1.0"
    } else {
        "HTTP/1.1"
    }
}

/// Split `host[:port]`, keeping IPv6 literals in brackets intact.
fn split_authority(authority: &str) -> (&str, Option<&str>) {
    if let Some(end) = authority.rfind(']') {
        let (host, rest) = authority.split_at(end + 1);
        return (host, rest.strip_prefix(':'));
    }
    match authority.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (authority, None),
    }
}

/// Read one request from `reader`.
///
/// Returns `Ok(None)` if the peer closed the connection before sending
/// anything.
pub async fn read_request<R>(reader: &mut R, limits: &LimitsConfig) -> Result<Option<HostRequest>, HostError>
where
    R: AsyncBufRead + Unpin,
{
    let Some(head) = read_head(reader, limits.max_header_bytes).await? else {
        return Ok(None);
    };

    let mut slots = vec![httparse::EMPTY_HEADER; limits.max_headers];
    let mut parsed = httparse::Request::new(&mut slots);
    match parsed.parse(&head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(HostError::Malformed("incomplete request head".into()));
        }
        Err(httparse::Error::TooManyHeaders) => return Err(HostError::TooManyHeaders),
        Err(e) => return Err(HostError::Malformed(e.to_string())),
    }

    let method = Method::from_bytes(parsed.method.unwrap_or("").as_bytes())
        .map_err(|e| HostError::Malformed(e.to_string()))?;
    let target = parsed.path.unwrap_or("/").to_string();
    let version = match parsed.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };

    let mut headers = HeaderMap::with_capacity(parsed.headers.len());
    for header in parsed.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|e| HostError::Malformed(e.to_string()))?;
        let value =
            HeaderValue::from_bytes(header.value).map_err(|e| HostError::Malformed(e.to_string()))?;
        headers.append(name, value);
    }

    let body = if is_chunked(&headers) {
        read_chunked_body(reader, limits.max_body_bytes).await?
    } else if let Some(length) = content_length(&headers)? {
        if length > limits.max_body_bytes {
            return Err(HostError::BodyTooLarge(limits.max_body_bytes));
        }
        let mut body = vec![0; length];
        reader.read_exact(&mut body).await?;
        Bytes::from(body)
    } else {
        Bytes::new()
    };

    let mut request = HostRequest::new(method, target).with_version(version);
    request.headers = headers;
    request.body = body;

    tracing::trace!(
        method = %request.method,
        target = %request.target,
        body_len = request.body.len(),
        "Request read"
    );

    Ok(Some(request))
}

async fn read_head<R>(reader: &mut R, max_bytes: usize) -> Result<Option<Vec<u8>>, HostError>
where
    R: AsyncBufRead + Unpin,
{
    let mut head = Vec::with_capacity(1024);

    // Leading empty lines before the request line are ignored and do not
    // count against the head limit.
    loop {
        let n = (&mut *reader).take(max_bytes as u64).read_until(b'\n', &mut head).await?;
        if n == 0 {
            return Ok(None);
        }
        if head != b"\r\n" && head != b"\n" {
            break;
        }
        head.clear();
    }

    let mut limited = (&mut *reader).take(max_bytes.saturating_sub(head.len()) as u64);
    loop {
        if head.ends_with(b"\r\n\r\n") || head.ends_with(b"\n\n") {
            return Ok(Some(head));
        }
        let n = limited.read_until(b'\n', &mut head).await?;
        if n == 0 {
            if head.len() >= max_bytes {
                return Err(HostError::HeadTooLarge(max_bytes));
            }
            return Err(HostError::Malformed("connection closed mid-request".into()));
        }
    }
}

async fn read_line<R>(reader: &mut R, line: &mut Vec<u8>) -> Result<(), HostError>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let n = (&mut *reader).take(MAX_LINE_BYTES).read_until(b'\n', line).await?;
    if n == 0 || !line.ends_with(b"\n") {
        return Err(HostError::Malformed("truncated chunked body".into()));
    }
    Ok(())
}

async fn read_chunked_body<R>(reader: &mut R, max_bytes: usize) -> Result<Bytes, HostError>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = BytesMut::new();
    let mut line = Vec::new();

    loop {
        read_line(reader, &mut line).await?;
        let size = match httparse::parse_chunk_size(&line) {
            Ok(httparse::Status::Complete((_, size))) => size,
            _ => return Err(HostError::Malformed("invalid chunk size".into())),
        };
        if size == 0 {
            break;
        }
        let size = usize::try_from(size).map_err(|_| HostError::BodyTooLarge(max_bytes))?;
        if body.len().saturating_add(size) > max_bytes {
            return Err(HostError::BodyTooLarge(max_bytes));
        }

        let start = body.len();
        body.resize(start + size, 0);
        reader.read_exact(&mut body[start..]).await?;

        read_line(reader, &mut line).await?;
        if line != b"\r\n" && line != b"\n" {
            return Err(HostError::Malformed("missing chunk terminator".into()));
        }
    }

    // Trailer section; trailers are discarded.
    loop {
        read_line(reader, &mut line).await?;
        if line == b"\r\n" || line == b"\n" {
            break;
        }
    }

    Ok(body.freeze())
}

fn is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .last()
        .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
}

/// The declared body length. Repeated headers and comma-separated lists
/// are accepted only when every value agrees.
fn content_length(headers: &HeaderMap) -> Result<Option<usize>, HostError> {
    let mut length = None;
    for value in headers.get_all(CONTENT_LENGTH) {
        let text = value
            .to_str()
            .map_err(|_| HostError::Malformed("invalid content-length".into()))?;
        for part in text.split(',') {
            let parsed: usize = part
                .trim()
                .parse()
                .map_err(|_| HostError::Malformed("invalid content-length".into()))?;
            match length {
                Some(existing) if existing != parsed => {
                    return Err(HostError::Malformed("conflicting content-length".into()));
                }
                _ => length = Some(parsed),
            }
        }
    }
    Ok(length)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn parse(raw: &[u8]) -> Result<Option<HostRequest>, HostError> {
        let mut reader = raw;
        read_request(&mut reader, &LimitsConfig::default()).await
    }

    #[tokio::test]
    async fn reads_request_with_content_length() {
        let request = parse(b"POST /app/form?x=1 HTTP/1.1\r\nHost: example.com\r\nContent-Length: 5\r\n\r\nhello")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.path(), "/app/form");
        assert_eq!(request.query(), Some("x=1"));
        assert_eq!(request.body().as_ref(), b"hello");
        assert!(request.keep_alive());
    }

    #[tokio::test]
    async fn decodes_chunked_body() {
        let request = parse(
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6;ext=1\r\n world\r\n0\r\nX-Trailer: 1\r\n\r\n",
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(request.body().as_ref(), b"hello world");
    }

    #[tokio::test]
    async fn clean_close_yields_none() {
        assert!(parse(b"").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn leading_blank_lines_are_skipped() {
        let request = parse(b"\r\nGET / HTTP/1.0\r\n\r\n").await.unwrap().unwrap();
        assert_eq!(request.version(), Version::HTTP_10);
        assert!(!request.keep_alive());
    }

    #[tokio::test]
    async fn oversized_body_rejected() {
        let limits = LimitsConfig {
            max_body_bytes: 4,
            ..LimitsConfig::default()
        };
        let mut reader: &[u8] = b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let err = read_request(&mut reader, &limits).await.unwrap_err();
        assert!(matches!(err, HostError::BodyTooLarge(4)));
        assert_eq!(err.status(), Some(http::StatusCode::PAYLOAD_TOO_LARGE));
    }

    #[tokio::test]
    async fn oversized_head_rejected() {
        let limits = LimitsConfig {
            max_header_bytes: 16,
            ..LimitsConfig::default()
        };
        let mut reader: &[u8] = b"GET /a-very-long-path HTTP/1.1\r\n\r\n";
        let err = read_request(&mut reader, &limits).await.unwrap_err();
        assert!(matches!(err, HostError::HeadTooLarge(16)));
    }

    #[tokio::test]
    async fn leading_blank_lines_do_not_count_against_head_limit() {
        let limits = LimitsConfig {
            max_header_bytes: 24,
            ..LimitsConfig::default()
        };
        let mut raw = b"\r\n".repeat(20);
        raw.extend_from_slice(b"GET /a HTTP/1.1\r\n\r\n");
        let mut reader: &[u8] = &raw;

        let request = read_request(&mut reader, &limits).await.unwrap().unwrap();
        assert_eq!(request.path(), "/a");
    }

    #[tokio::test]
    async fn conflicting_content_lengths_rejected() {
        let err = parse(b"POST / HTTP/1.1\r\nContent-Length: 5\r\nContent-Length: 6\r\n\r\nhello!")
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::Malformed(_)));

        let err = parse(b"POST / HTTP/1.1\r\nContent-Length: 5, 6\r\n\r\nhello!")
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::Malformed(_)));
    }

    #[tokio::test]
    async fn repeated_equal_content_lengths_accepted() {
        let request = parse(b"POST / HTTP/1.1\r\nContent-Length: 5\r\nContent-Length: 5\r\n\r\nhello")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.body().as_ref(), b"hello");
    }

    #[tokio::test]
    async fn garbage_is_malformed() {
        let err = parse(b"\x01\x02 nonsense\r\n\r\n").await.unwrap_err();
        assert_eq!(err.status(), Some(http::StatusCode::BAD_REQUEST));
    }

    #[test]
    fn mount_slices_decoded_path() {
        let mut request = HostRequest::new(Method::GET, "/app/caf%C3%A9");
        request.mount("/app");
        assert_eq!(request.script_name(), "/app");
        assert_eq!(request.path_info(), "/café");
    }

    #[test]
    fn meta_vars_cover_cgi_and_http_headers() {
        let request = HostRequest::new(Method::GET, "/search?q=rust")
            .with_header("Host", "example.com:8080")
            .with_header("Accept", "text/html")
            .with_header("Accept", "text/plain")
            .with_header("Content-Type", "text/plain")
            .with_addrs(Some("10.0.0.7:51000".parse().unwrap()), None)
            .with_https(true);

        let meta = request.meta_vars();
        assert_eq!(meta["REQUEST_METHOD"].as_deref(), Some("GET"));
        assert_eq!(meta["QUERY_STRING"].as_deref(), Some("q=rust"));
        assert_eq!(meta["SERVER_NAME"].as_deref(), Some("example.com"));
        assert_eq!(meta["SERVER_PORT"].as_deref(), Some("8080"));
        assert_eq!(meta["REMOTE_ADDR"].as_deref(), Some("10.0.0.7"));
        assert_eq!(meta["HTTP_ACCEPT"].as_deref(), Some("text/html, text/plain"));
        assert_eq!(meta["CONTENT_TYPE"].as_deref(), Some("text/plain"));
        assert!(!meta.contains_key("HTTP_CONTENT_TYPE"));
        assert_eq!(meta["HTTPS"].as_deref(), Some("on"));
        assert_eq!(
            meta["REQUEST_URI"].as_deref(),
            Some("https://example.com:8080/search?q=rust")
        );
        assert_eq!(meta["AUTH_TYPE"], None);
    }

    #[test]
    fn ipv6_authority_keeps_brackets() {
        assert_eq!(split_authority("[::1]:8080"), ("[::1]", Some("8080")));
        assert_eq!(split_authority("[::1]"), ("[::1]", None));
        assert_eq!(split_authority("example.com"), ("example.com", None));
    }
}
