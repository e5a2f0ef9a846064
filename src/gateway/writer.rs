//! Materialize an application's result onto a host response.
//!
//! # Responsibilities
//! - Status, then headers in application order: the hijack entry is
//!   captured, each `set-cookie` value becomes its own cookie, any other
//!   repeated values are joined with `", "`
//! - Body emission: hijack pipe, file, or chunk iteration, in that priority
//! - Close the body on every exit path
//!
//! # Design Decisions
//! - The body is held by a guard whose `Drop` closes it, so errors and
//!   panics mid-iteration still release it exactly once
//! - After handing out the hijack pipe the writer returns without waiting

use std::fs::File;

use crate::gateway::env::HIJACK;
use crate::gateway::error::GatewayError;
use crate::gateway::hijack::{pipe, HijackCallback};
use crate::gateway::response::{AppResponse, Body, BodyKind, HeaderField};
use crate::host::{HostResponse, ResponseBody};

const SET_COOKIE: &str = "set-cookie";

/// Closes the body when dropped.
struct BodyGuard(Body);

impl Drop for BodyGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Apply `response` to `res`.
pub fn write_response(res: &mut HostResponse, response: AppResponse) -> Result<(), GatewayError> {
    let AppResponse { status, headers, body } = response;
    let mut body = BodyGuard(body);

    res.set_status(status)?;

    let mut hijack: Option<HijackCallback> = None;
    for (name, field) in headers {
        if name.eq_ignore_ascii_case(HIJACK) {
            match field {
                HeaderField::Hijack(callback) => hijack = Some(callback),
                other => tracing::debug!(value = ?other, "Ignoring non-callable hijack entry"),
            }
        } else if name.eq_ignore_ascii_case(SET_COOKIE) {
            for cookie in field.values() {
                res.add_cookie(cookie)?;
            }
        } else if let HeaderField::Hijack(_) = field {
            tracing::debug!(header = %name, "Ignoring hijack callback under a regular header");
        } else {
            res.set_header(&name, &field.values().join(", "))?;
        }
    }

    if let Some(callback) = hijack {
        let (reader, writer) = pipe();
        res.set_body(ResponseBody::Stream(Box::new(reader)));
        res.set_chunked(true);
        tracing::debug!("Body handed over to hijack callback");
        callback(writer);
        return Ok(());
    }

    match body.0.take_kind() {
        BodyKind::Path(path) => {
            let file = File::open(&path).map_err(|source| GatewayError::File { path, source })?;
            res.set_body(ResponseBody::File(file));
        }
        BodyKind::Chunks(chunks) => {
            for chunk in chunks {
                res.append_body(&chunk.map_err(GatewayError::Body)?);
            }
        }
        BodyKind::Empty => {}
    }

    Ok(())
}
