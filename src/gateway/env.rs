//! Environment construction: host request → protocol-agnostic mapping.
//!
//! # Responsibilities
//! - Copy the host's meta variables, dropping the absent ones
//! - Add the reserved `gateway.*` entries (input, errors, scheme, hijack)
//! - Fill in the derived CGI keys the host may leave empty
//!
//! # Design Decisions
//! - Pure data transformation: nothing here fails
//! - Path info is recomputed as an offset slice of the decoded path, never
//!   by string replacement

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, BufRead, Cursor, Read, Seek, SeekFrom, Write};

use bytes::Bytes;

use crate::gateway::hijack::{HijackActivation, HijackIo};
use crate::host::HostRequest;

pub const VERSION: &str = "gateway.version";
pub const INPUT: &str = "gateway.input";
pub const ERRORS: &str = "gateway.errors";
pub const URL_SCHEME: &str = "gateway.url_scheme";
pub const IS_HIJACK: &str = "gateway.hijack?";
pub const HIJACK: &str = "gateway.hijack";
pub const HIJACK_IO: &str = "gateway.hijack_io";

pub const QUERY_STRING: &str = "QUERY_STRING";
pub const PATH_INFO: &str = "PATH_INFO";
pub const SCRIPT_NAME: &str = "SCRIPT_NAME";
pub const REQUEST_PATH: &str = "REQUEST_PATH";
pub const HTTPS: &str = "HTTPS";

/// Calling-convention version implemented by this adapter.
pub const PROTOCOL_VERSION: [u32; 2] = [1, 3];

/// `HTTPS` values that select the `https` scheme. Matched case-sensitively.
const HTTPS_ON: [&str; 3] = ["yes", "on", "1"];

/// A value in the environment.
pub enum EnvValue {
    Str(String),
    Bool(bool),
    Version([u32; 2]),
    Input(Input),
    Errors(ErrorStream),
    Hijack(HijackActivation),
    /// Filled only once a hijack has been activated.
    HijackIo(Option<HijackIo>),
}

impl EnvValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            EnvValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            EnvValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Debug for EnvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvValue::Str(s) => fmt::Debug::fmt(s, f),
            EnvValue::Bool(b) => fmt::Debug::fmt(b, f),
            EnvValue::Version(v) => fmt::Debug::fmt(v, f),
            EnvValue::Input(input) => f.debug_tuple("Input").field(&input.len()).finish(),
            EnvValue::Errors(_) => f.write_str("Errors"),
            EnvValue::Hijack(_) => f.write_str("Hijack"),
            EnvValue::HijackIo(io) => f.debug_tuple("HijackIo").field(io).finish(),
        }
    }
}

impl From<&str> for EnvValue {
    fn from(s: &str) -> Self {
        EnvValue::Str(s.to_string())
    }
}

impl From<String> for EnvValue {
    fn from(s: String) -> Self {
        EnvValue::Str(s)
    }
}

impl From<bool> for EnvValue {
    fn from(b: bool) -> Self {
        EnvValue::Bool(b)
    }
}

/// The per-request environment handed to an application.
#[derive(Debug, Default)]
pub struct Environment {
    vars: BTreeMap<String, EnvValue>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&EnvValue> {
        self.vars.get(key)
    }

    /// The value under `key` if it is a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.vars.get(key).and_then(EnvValue::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<EnvValue>) -> Option<EnvValue> {
        self.vars.insert(key.into(), value.into())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EnvValue)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The request body reader.
    pub fn input(&mut self) -> Option<&mut Input> {
        match self.vars.get_mut(INPUT) {
            Some(EnvValue::Input(input)) => Some(input),
            _ => None,
        }
    }

    /// The error stream.
    pub fn errors(&mut self) -> Option<&mut ErrorStream> {
        match self.vars.get_mut(ERRORS) {
            Some(EnvValue::Errors(errors)) => Some(errors),
            _ => None,
        }
    }

    pub fn url_scheme(&self) -> &str {
        self.get_str(URL_SCHEME).unwrap_or("http")
    }

    pub fn hijack(&self) -> Option<&HijackActivation> {
        match self.vars.get(HIJACK) {
            Some(EnvValue::Hijack(activation)) => Some(activation),
            _ => None,
        }
    }
}

impl From<Input> for EnvValue {
    fn from(input: Input) -> Self {
        EnvValue::Input(input)
    }
}

impl From<ErrorStream> for EnvValue {
    fn from(errors: ErrorStream) -> Self {
        EnvValue::Errors(errors)
    }
}

/// Binary-safe, rewindable reader over the request body.
pub struct Input {
    cursor: Cursor<Bytes>,
}

impl Input {
    pub fn new(body: Bytes) -> Self {
        Self {
            cursor: Cursor::new(body),
        }
    }

    /// Total body length.
    pub fn len(&self) -> usize {
        self.cursor.get_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursor.get_ref().is_empty()
    }

    /// Move back to the start of the body.
    pub fn rewind(&mut self) {
        self.cursor.set_position(0);
    }
}

impl Read for Input {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl BufRead for Input {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.cursor.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.cursor.consume(amt)
    }
}

impl Seek for Input {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.cursor.seek(pos)
    }
}

/// The process's standard error, as an environment entry.
#[derive(Debug)]
pub struct ErrorStream(io::Stderr);

impl ErrorStream {
    pub fn stderr() -> Self {
        Self(io::stderr())
    }
}

impl Write for ErrorStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

/// Build the environment for a mounted host request.
pub fn build_environment(req: &HostRequest) -> Environment {
    build_from_parts(req.meta_vars(), &req.request_path(), req.body().clone())
}

/// Build an environment from meta variables, the decoded request path and
/// the body.
pub fn build_from_parts(
    meta: BTreeMap<String, Option<String>>,
    full_path: &str,
    body: Bytes,
) -> Environment {
    let mut env = Environment::new();

    for (key, value) in meta {
        if let Some(value) = value {
            env.insert(key, value);
        }
    }

    env.insert(VERSION, EnvValue::Version(PROTOCOL_VERSION));
    env.insert(INPUT, Input::new(body));
    env.insert(ERRORS, ErrorStream::stderr());

    let scheme = match env.get_str(HTTPS) {
        Some(value) if HTTPS_ON.contains(&value) => "https",
        _ => "http",
    };
    env.insert(URL_SCHEME, scheme);

    env.insert(IS_HIJACK, true);
    env.insert(HIJACK, EnvValue::Hijack(HijackActivation));
    env.insert(HIJACK_IO, EnvValue::HijackIo(None));

    if !env.contains_key(QUERY_STRING) {
        env.insert(QUERY_STRING, "");
    }

    if env.get_str(PATH_INFO).map_or(true, str::is_empty) {
        let offset = env.get_str(SCRIPT_NAME).map_or(0, str::len);
        let path_info = full_path.get(offset..).unwrap_or("").to_string();
        env.insert(PATH_INFO, path_info);
    }

    if !env.contains_key(REQUEST_PATH) {
        let request_path = format!(
            "{}{}",
            env.get_str(SCRIPT_NAME).unwrap_or(""),
            env.get_str(PATH_INFO).unwrap_or("")
        );
        env.insert(REQUEST_PATH, request_path);
    }

    env
}
