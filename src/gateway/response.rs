//! The application's result: status, ordered headers and a body.

use std::fmt;
use std::io;
use std::path::PathBuf;

use bytes::Bytes;

use crate::gateway::env::HIJACK;
use crate::gateway::hijack::{HijackCallback, HijackIo};

/// What an application returns for one request.
#[derive(Debug)]
pub struct AppResponse {
    pub status: u16,
    pub headers: ResponseHeaders,
    pub body: Body,
}

impl AppResponse {
    pub fn new(status: u16, headers: ResponseHeaders, body: impl Into<Body>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }
}

/// One header entry's value.
pub enum HeaderField {
    One(String),
    Many(Vec<String>),
    /// Partial hijack callback; only meaningful under the hijack key.
    Hijack(HijackCallback),
}

impl HeaderField {
    /// The textual values, in order. Empty for a hijack callback.
    pub fn values(&self) -> &[String] {
        match self {
            HeaderField::One(value) => std::slice::from_ref(value),
            HeaderField::Many(values) => values,
            HeaderField::Hijack(_) => &[],
        }
    }
}

impl fmt::Debug for HeaderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderField::One(value) => fmt::Debug::fmt(value, f),
            HeaderField::Many(values) => fmt::Debug::fmt(values, f),
            HeaderField::Hijack(_) => f.write_str("<hijack>"),
        }
    }
}

impl From<&str> for HeaderField {
    fn from(value: &str) -> Self {
        HeaderField::One(value.to_string())
    }
}

impl From<String> for HeaderField {
    fn from(value: String) -> Self {
        HeaderField::One(value)
    }
}

impl From<Vec<String>> for HeaderField {
    fn from(values: Vec<String>) -> Self {
        HeaderField::Many(values)
    }
}

/// Response headers in application order.
///
/// Names compare ASCII case-insensitively; pushing a name that is already
/// present appends to that entry instead of adding a second one.
#[derive(Debug, Default)]
pub struct ResponseHeaders {
    entries: Vec<(String, HeaderField)>,
}

impl ResponseHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.push(name, value);
        self
    }

    pub fn with_many<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values = values.into_iter().map(Into::into).collect::<Vec<_>>();
        self.push(name, HeaderField::Many(values));
        self
    }

    /// Request a partial hijack: `callback` receives the body stream once
    /// the headers are on their way.
    pub fn with_hijack<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(HijackIo) + Send + 'static,
    {
        self.push(HIJACK, HeaderField::Hijack(Box::new(callback)));
        self
    }

    pub fn push(&mut self, name: &str, field: impl Into<HeaderField>) {
        let field = field.into();
        let existing = self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name));

        match existing {
            None => self.entries.push((name.to_string(), field)),
            Some((_, slot)) => {
                if matches!(slot, HeaderField::Hijack(_)) || matches!(field, HeaderField::Hijack(_)) {
                    *slot = field;
                } else {
                    let mut merged = slot.values().to_vec();
                    merged.extend_from_slice(field.values());
                    *slot = HeaderField::Many(merged);
                }
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&HeaderField> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, field)| field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderField)> {
        self.entries.iter().map(|(name, field)| (name.as_str(), field))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for ResponseHeaders {
    type Item = (String, HeaderField);
    type IntoIter = std::vec::IntoIter<(String, HeaderField)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for ResponseHeaders {
    fn from_iter<T: IntoIterator<Item = (&'a str, &'a str)>>(iter: T) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.push(name, value);
        }
        headers
    }
}

/// Chunk source for a streamed body.
pub type Chunks = Box<dyn Iterator<Item = io::Result<Bytes>> + Send>;

/// The three shapes a body can take.
pub enum BodyKind {
    Empty,
    /// Byte chunks, appended in order.
    Chunks(Chunks),
    /// A file sent as-is; never iterated.
    Path(PathBuf),
}

impl fmt::Debug for BodyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyKind::Empty => f.write_str("Empty"),
            BodyKind::Chunks(_) => f.write_str("Chunks"),
            BodyKind::Path(path) => f.debug_tuple("Path").field(path).finish(),
        }
    }
}

/// A response body with an optional close hook.
///
/// The hook runs at most once, through [`Body::close`].
pub struct Body {
    kind: BodyKind,
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl Body {
    pub fn empty() -> Self {
        Self::from_kind(BodyKind::Empty)
    }

    pub fn from_kind(kind: BodyKind) -> Self {
        Self { kind, on_close: None }
    }

    pub fn from_chunks<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = io::Result<Bytes>>,
        I::IntoIter: Send + 'static,
    {
        Self::from_kind(BodyKind::Chunks(Box::new(chunks.into_iter())))
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self::from_chunks(std::iter::once(Ok(bytes.into())))
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::from_kind(BodyKind::Path(path.into()))
    }

    /// Run `hook` when the body is closed.
    pub fn on_close<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_close = Some(Box::new(hook));
        self
    }

    pub fn kind(&self) -> &BodyKind {
        &self.kind
    }

    /// Take the body source, leaving `Empty` behind.
    pub fn take_kind(&mut self) -> BodyKind {
        std::mem::replace(&mut self.kind, BodyKind::Empty)
    }

    /// Release the body. Idempotent.
    pub fn close(&mut self) {
        self.kind = BodyKind::Empty;
        if let Some(hook) = self.on_close.take() {
            hook();
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body")
            .field("kind", &self.kind)
            .field("on_close", &self.on_close.is_some())
            .finish()
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Self::from_bytes(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Self::from_bytes(s)
    }
}

impl From<Vec<u8>> for Body {
    fn from(v: Vec<u8>) -> Self {
        Self::from_bytes(v)
    }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Self {
        Self::from_bytes(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn repeated_names_merge_in_order() {
        let mut headers = ResponseHeaders::new();
        headers.push("Vary", "accept");
        headers.push("content-type", "text/plain");
        headers.push("vary", "origin");

        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("VARY").unwrap().values(), ["accept", "origin"]);
        assert_eq!(headers.iter().next().unwrap().0, "Vary");
    }

    #[test]
    fn hijack_entry_uses_reserved_key() {
        let headers = ResponseHeaders::new().with_hijack(|_io| {});
        assert!(matches!(headers.get(HIJACK), Some(HeaderField::Hijack(_))));
        assert!(headers.get(HIJACK).unwrap().values().is_empty());
    }

    #[test]
    fn close_runs_hook_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closes);
        let mut body = Body::from("x").on_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        body.close();
        body.close();

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(matches!(body.kind(), BodyKind::Empty));
    }
}
