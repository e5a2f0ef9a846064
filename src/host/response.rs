//! Outbound response model and HTTP/1.x response writing.
//!
//! # Responsibilities
//! - Hold status, headers, cookies and one of three body sources
//! - Finalize headers (framing, keep-alive, defaults) right before sending
//! - Frame the body on the wire: raw, or chunked when the chunked flag is set
//!
//! # Design Decisions
//! - Header finalization goes through a [`HeaderFinalizer`] installed on the
//!   server; it is the only extension point into framing decisions
//! - Every per-response flag lives on the response, never in shared state
//! - Cookies are kept apart from headers so each becomes its own line

use std::fmt;
use std::sync::Arc;

use bytes::BytesMut;
use http::header::{CONNECTION, CONTENT_LENGTH, DATE, SERVER, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Version};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::host::error::HostError;
use crate::host::request::HostRequest;

/// Read size used when streaming file and pipe bodies.
const STREAM_CHUNK_BYTES: usize = 16 * 1024;

/// Native header finalization, as handed to a [`HeaderFinalizer`].
pub type NativeSetup = fn(&mut HostResponse);

/// Strategy run at header finalization time.
///
/// Implementations must call `native` exactly once; they may adjust the
/// response before and after it.
pub trait HeaderFinalizer: Send + Sync {
    fn finalize(&self, res: &mut HostResponse, native: NativeSetup);
}

/// The default finalizer: native behavior only.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeHeaders;

impl HeaderFinalizer for NativeHeaders {
    fn finalize(&self, res: &mut HostResponse, native: NativeSetup) {
        native(res);
    }
}

/// Where the response body comes from.
pub enum ResponseBody {
    /// In-memory bytes, appended to by servlets.
    Buffer(BytesMut),
    /// An open file, streamed to the peer.
    File(std::fs::File),
    /// Any byte source, streamed until EOF.
    Stream(Box<dyn AsyncRead + Send + Unpin>),
}

impl ResponseBody {
    pub fn empty() -> Self {
        ResponseBody::Buffer(BytesMut::new())
    }

    /// Length if known without consuming the body.
    pub fn known_length(&self) -> Option<u64> {
        match self {
            ResponseBody::Buffer(buf) => Some(buf.len() as u64),
            ResponseBody::File(file) => file
                .metadata()
                .ok()
                .filter(|meta| meta.is_file())
                .map(|meta| meta.len()),
            ResponseBody::Stream(_) => None,
        }
    }
}

impl Default for ResponseBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Buffer(buf) => f.debug_tuple("Buffer").field(&buf.len()).finish(),
            ResponseBody::File(file) => f.debug_tuple("File").field(file).finish(),
            ResponseBody::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Request facts the response needs to frame itself.
#[derive(Debug, Clone)]
pub struct ResponseContext {
    pub method: Method,
    pub version: Version,
    pub keep_alive: bool,
    pub server_software: String,
}

impl ResponseContext {
    pub fn for_request(req: &HostRequest) -> Self {
        Self {
            method: req.method().clone(),
            version: req.version(),
            keep_alive: req.keep_alive(),
            server_software: req.server_software().to_string(),
        }
    }
}

/// A mutable response, filled in by a servlet and sent by the host.
pub struct HostResponse {
    status: StatusCode,
    headers: HeaderMap,
    cookies: Vec<HeaderValue>,
    body: ResponseBody,
    chunked: bool,
    keep_alive: bool,
    application_driven: bool,
    context: ResponseContext,
    finalizer: Arc<dyn HeaderFinalizer>,
}

impl HostResponse {
    pub fn new(context: ResponseContext, finalizer: Arc<dyn HeaderFinalizer>) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            cookies: Vec::new(),
            body: ResponseBody::empty(),
            chunked: false,
            keep_alive: context.keep_alive,
            application_driven: false,
            context,
            finalizer,
        }
    }

    /// A response for `req` using native header finalization.
    pub fn for_request(req: &HostRequest) -> Self {
        Self::new(ResponseContext::for_request(req), Arc::new(NativeHeaders))
    }

    /// A short HTML error page that closes the connection.
    pub fn error_page(
        status: StatusCode,
        context: ResponseContext,
        finalizer: Arc<dyn HeaderFinalizer>,
    ) -> Self {
        let mut res = Self::new(context, finalizer);
        let reason = status.canonical_reason().unwrap_or("Error");
        res.status = status;
        res.keep_alive = false;
        res.headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        );
        res.append_body(
            format!(
                "<html><head><title>{reason}</title></head><body><h1>{} {reason}</h1></body></html>",
                status.as_u16()
            )
            .as_bytes(),
        );
        res
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, code: u16) -> Result<(), HostError> {
        self.status = StatusCode::from_u16(code).map_err(|_| HostError::InvalidStatus(code))?;
        Ok(())
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Set a header, replacing earlier values. Names are case-insensitive.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), HostError> {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| HostError::invalid_header(name, e))?;
        let header_value = HeaderValue::from_str(value).map_err(|e| HostError::invalid_header(name, e))?;
        self.headers.insert(header_name, header_value);
        Ok(())
    }

    pub fn cookies(&self) -> &[HeaderValue] {
        &self.cookies
    }

    /// Append one cookie; each becomes its own `Set-Cookie` line.
    pub fn add_cookie(&mut self, cookie: &str) -> Result<(), HostError> {
        let value = HeaderValue::from_str(cookie).map_err(|e| HostError::invalid_header("set-cookie", e))?;
        self.cookies.push(value);
        Ok(())
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    pub fn set_body(&mut self, body: ResponseBody) {
        self.body = body;
    }

    /// Append bytes to the in-memory body, replacing any other body source.
    pub fn append_body(&mut self, bytes: &[u8]) {
        match &mut self.body {
            ResponseBody::Buffer(buf) => buf.extend_from_slice(bytes),
            other => *other = ResponseBody::Buffer(BytesMut::from(bytes)),
        }
    }

    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    /// Whether the host frames the body with chunked transfer coding.
    pub fn set_chunked(&mut self, chunked: bool) {
        self.chunked = chunked;
    }

    pub fn is_application_driven(&self) -> bool {
        self.application_driven
    }

    /// Mark this response as produced by a gateway application.
    pub fn set_application_driven(&mut self, driven: bool) {
        self.application_driven = driven;
    }

    /// Whether the connection stays open after this response.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Finalize headers through the installed finalizer.
    pub fn setup_header(&mut self) {
        let finalizer = Arc::clone(&self.finalizer);
        finalizer.finalize(self, Self::native_setup_header);
    }

    /// The host's own header finalization.
    pub fn native_setup_header(res: &mut HostResponse) {
        if !res.headers.contains_key(SERVER) {
            if let Ok(value) = HeaderValue::from_str(&res.context.server_software) {
                if !value.is_empty() {
                    res.headers.insert(SERVER, value);
                }
            }
        }
        if !res.headers.contains_key(DATE) {
            let now = chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
            if let Ok(value) = HeaderValue::from_str(&now) {
                res.headers.insert(DATE, value);
            }
        }

        if res.context.version < Version::HTTP_11 && res.chunked {
            res.chunked = false;
            tracing::warn!(
                version = ?res.context.version,
                "chunked is set for an HTTP/1.0 request (ignored)"
            );
        }

        let bodyless = res.status.is_informational()
            || res.status == StatusCode::NO_CONTENT
            || res.status == StatusCode::NOT_MODIFIED;

        if bodyless {
            res.headers.remove(CONTENT_LENGTH);
            res.headers.remove(TRANSFER_ENCODING);
            res.body = ResponseBody::empty();
            res.chunked = false;
        } else if res.chunked {
            res.headers
                .insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
            res.headers.remove(CONTENT_LENGTH);
        } else {
            // A transfer coding the host does not apply is never announced.
            res.headers.remove(TRANSFER_ENCODING);
            if !res.headers.contains_key(CONTENT_LENGTH) {
                match res.body.known_length() {
                    Some(len) => {
                        res.headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
                    }
                    None => {
                        res.headers.insert(CONNECTION, HeaderValue::from_static("close"));
                    }
                }
            }
        }

        let close_requested = res
            .headers
            .get(CONNECTION)
            .is_some_and(|v| v.as_bytes().eq_ignore_ascii_case(b"close"));

        if close_requested {
            res.keep_alive = false;
        } else if res.keep_alive {
            if res.chunked || res.headers.contains_key(CONTENT_LENGTH) || bodyless {
                res.headers
                    .insert(CONNECTION, HeaderValue::from_static("keep-alive"));
            } else {
                tracing::warn!(
                    "could not determine content-length of response body; closing connection"
                );
                res.headers.insert(CONNECTION, HeaderValue::from_static("close"));
                res.keep_alive = false;
            }
        } else {
            res.headers.insert(CONNECTION, HeaderValue::from_static("close"));
        }
    }

    /// Finalize headers and write the whole response to `out`.
    pub async fn send_response<W>(&mut self, out: &mut W) -> Result<(), HostError>
    where
        W: AsyncWrite + Unpin,
    {
        self.setup_header();
        out.write_all(&self.render_head()).await?;
        if self.context.method != Method::HEAD {
            self.send_body(out).await?;
        }
        out.flush().await?;
        Ok(())
    }

    fn render_head(&self) -> Vec<u8> {
        let mut head = Vec::with_capacity(256);
        let reason = self.status.canonical_reason().unwrap_or("Unknown");
        head.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", self.status.as_u16(), reason).as_bytes());

        for (name, value) in &self.headers {
            head.extend_from_slice(capitalize(name.as_str()).as_bytes());
            head.extend_from_slice(b": ");
            head.extend_from_slice(value.as_bytes());
            head.extend_from_slice(b"\r\n");
        }
        for cookie in &self.cookies {
            head.extend_from_slice(b"Set-Cookie: ");
            head.extend_from_slice(cookie.as_bytes());
            head.extend_from_slice(b"\r\n");
        }
        head.extend_from_slice(b"\r\n");
        head
    }

    async fn send_body<W>(&mut self, out: &mut W) -> Result<(), HostError>
    where
        W: AsyncWrite + Unpin,
    {
        match std::mem::take(&mut self.body) {
            ResponseBody::Buffer(buf) => {
                if self.chunked {
                    if !buf.is_empty() {
                        write_chunk(out, &buf).await?;
                    }
                    out.write_all(b"0\r\n\r\n").await?;
                } else {
                    out.write_all(&buf).await?;
                }
            }
            ResponseBody::File(file) => {
                send_stream(out, tokio::fs::File::from_std(file), self.chunked).await?;
            }
            ResponseBody::Stream(reader) => {
                send_stream(out, reader, self.chunked).await?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for HostResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("cookies", &self.cookies)
            .field("body", &self.body)
            .field("chunked", &self.chunked)
            .field("keep_alive", &self.keep_alive)
            .field("application_driven", &self.application_driven)
            .finish()
    }
}

/// Copy `reader` to `out` until EOF, chunk-framed when `chunked` is set.
///
/// Takes the flag by value: a `&HostResponse` held across an await would
/// make the connection future `!Send`, as stream bodies are not `Sync`.
async fn send_stream<W, R>(out: &mut W, mut reader: R, chunked: bool) -> Result<(), HostError>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    if !chunked {
        tokio::io::copy(&mut reader, out).await?;
        return Ok(());
    }

    let mut buf = vec![0; STREAM_CHUNK_BYTES];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        write_chunk(out, &buf[..n]).await?;
        // Streamed chunks go out as they arrive.
        out.flush().await?;
    }
    out.write_all(b"0\r\n\r\n").await?;
    Ok(())
}

async fn write_chunk<W>(out: &mut W, data: &[u8]) -> Result<(), HostError>
where
    W: AsyncWrite + Unpin,
{
    out.write_all(format!("{:x}\r\n", data.len()).as_bytes()).await?;
    out.write_all(data).await?;
    out.write_all(b"\r\n").await?;
    Ok(())
}

/// `content-type` → `Content-Type`.
fn capitalize(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, Write};

    fn response_for(method: Method, version: Version) -> HostResponse {
        let request = HostRequest::new(method, "/").with_version(version);
        HostResponse::for_request(&request)
    }

    async fn wire(res: &mut HostResponse) -> String {
        let mut out = Vec::new();
        res.send_response(&mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn buffer_gets_content_length_and_keep_alive() {
        let mut res = response_for(Method::GET, Version::HTTP_11);
        res.set_header("Content-Type", "text/plain").unwrap();
        res.append_body(b"hello");

        let text = wire(&mut res).await;
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Type: text/plain\r\n"));
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.contains("Connection: keep-alive\r\n"));
        assert!(text.ends_with("\r\n\r\nhello"));
        assert!(res.keep_alive());
    }

    #[tokio::test]
    async fn chunked_buffer_is_framed() {
        let mut res = response_for(Method::GET, Version::HTTP_11);
        res.set_chunked(true);
        res.append_body(b"hello");

        let text = wire(&mut res).await;
        assert!(text.contains("Transfer-Encoding: chunked\r\n"));
        assert!(!text.contains("Content-Length"));
        assert!(text.ends_with("\r\n\r\n5\r\nhello\r\n0\r\n\r\n"));
    }

    #[tokio::test]
    async fn chunked_ignored_for_http10() {
        let mut res = response_for(Method::GET, Version::HTTP_10);
        res.set_chunked(true);
        res.append_body(b"hi");

        let text = wire(&mut res).await;
        assert!(!res.is_chunked());
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with("\r\n\r\nhi"));
    }

    #[tokio::test]
    async fn no_content_strips_body() {
        let mut res = response_for(Method::GET, Version::HTTP_11);
        res.set_status(204).unwrap();
        res.set_header("content-length", "3").unwrap();
        res.append_body(b"abc");

        let text = wire(&mut res).await;
        assert!(text.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert!(!text.contains("Content-Length"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn unknown_length_stream_closes_connection() {
        let mut res = response_for(Method::GET, Version::HTTP_11);
        res.set_body(ResponseBody::Stream(Box::new(&b"streamed"[..])));

        let text = wire(&mut res).await;
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with("\r\n\r\nstreamed"));
        assert!(!res.keep_alive());
    }

    #[tokio::test]
    async fn chunked_stream_is_framed_until_eof() {
        let mut res = response_for(Method::GET, Version::HTTP_11);
        res.set_body(ResponseBody::Stream(Box::new(&b"abc"[..])));
        res.set_chunked(true);

        let text = wire(&mut res).await;
        assert!(text.ends_with("\r\n\r\n3\r\nabc\r\n0\r\n\r\n"));
        assert!(res.keep_alive());
    }

    #[tokio::test]
    async fn file_body_uses_file_size() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"file contents").unwrap();
        file.rewind().unwrap();

        let mut res = response_for(Method::GET, Version::HTTP_11);
        res.set_body(ResponseBody::File(file));

        let text = wire(&mut res).await;
        assert!(text.contains("Content-Length: 13\r\n"));
        assert!(text.ends_with("\r\n\r\nfile contents"));
    }

    #[test]
    fn send_response_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}

        let mut res = response_for(Method::GET, Version::HTTP_11);
        res.set_body(ResponseBody::Stream(Box::new(&b"abc"[..])));
        let mut out = Vec::new();
        let sending = res.send_response(&mut out);
        assert_send(&sending);
    }

    #[tokio::test]
    async fn chunked_file_is_framed_without_length() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"filedata").unwrap();
        file.rewind().unwrap();

        let mut res = response_for(Method::GET, Version::HTTP_11);
        res.set_body(ResponseBody::File(file));
        res.set_chunked(true);

        let text = wire(&mut res).await;
        assert!(text.contains("Transfer-Encoding: chunked\r\n"));
        assert!(!text.contains("Content-Length"));
        assert!(text.ends_with("\r\n\r\n8\r\nfiledata\r\n0\r\n\r\n"));
        assert!(res.keep_alive());
    }

    #[tokio::test]
    async fn unapplied_transfer_coding_is_dropped() {
        let mut res = response_for(Method::GET, Version::HTTP_11);
        res.set_header("transfer-encoding", "chunked").unwrap();
        res.append_body(b"plain");

        let text = wire(&mut res).await;
        assert!(!text.contains("Transfer-Encoding"));
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.ends_with("\r\n\r\nplain"));
    }

    #[tokio::test]
    async fn head_sends_no_body() {
        let mut res = response_for(Method::HEAD, Version::HTTP_11);
        res.append_body(b"hello");

        let text = wire(&mut res).await;
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn cookies_are_separate_lines() {
        let mut res = response_for(Method::GET, Version::HTTP_11);
        res.add_cookie("a=1").unwrap();
        res.add_cookie("b=2; Path=/").unwrap();

        let text = wire(&mut res).await;
        assert!(text.contains("Set-Cookie: a=1\r\n"));
        assert!(text.contains("Set-Cookie: b=2; Path=/\r\n"));
    }

    #[test]
    fn header_values_are_validated() {
        let mut res = response_for(Method::GET, Version::HTTP_11);
        assert!(res.set_header("x-bad", "a\r\nb").is_err());
        assert!(res.add_cookie("a=1\r\nInjected: yes").is_err());
        assert!(matches!(res.set_status(42), Err(HostError::InvalidStatus(42))));
    }

    #[test]
    fn capitalizes_header_names() {
        assert_eq!(capitalize("content-type"), "Content-Type");
        assert_eq!(capitalize("x-request-id"), "X-Request-Id");
        assert_eq!(capitalize("etag"), "Etag");
    }
}
