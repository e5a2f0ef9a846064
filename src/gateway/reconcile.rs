//! Transfer-encoding reconciliation at header finalization.
//!
//! An application that declares `transfer-encoding: chunked` on a chunk
//! sequence body frames that body itself. The host must still emit chunked-style headers for it but must
//! not frame the bytes a second time.

use http::header::TRANSFER_ENCODING;

use crate::host::{HeaderFinalizer, HostResponse, NativeSetup, ResponseBody};

/// Header finalizer installed on servers that host the gateway.
///
/// For application-driven responses declaring `transfer-encoding: chunked`
/// with an in-memory body (the chunk sequence path) the chunked flag is
/// raised for the native step and dropped right after, so headers come out
/// chunked and the body passes through untouched. File and streamed bodies
/// are raw bytes, so for those the host keeps the flag and frames them.
/// Every other response gets native finalization unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkedPassthrough;

impl HeaderFinalizer for ChunkedPassthrough {
    fn finalize(&self, res: &mut HostResponse, native: NativeSetup) {
        let declared = res.is_application_driven()
            && res
                .header(TRANSFER_ENCODING.as_str())
                .is_some_and(|value| value.trim().eq_ignore_ascii_case("chunked"));

        if !declared {
            native(res);
            return;
        }

        match res.body() {
            ResponseBody::Buffer(_) => {
                res.set_chunked(true);
                native(res);
                res.set_chunked(false);
            }
            ResponseBody::File(_) | ResponseBody::Stream(_) => {
                res.set_chunked(true);
                native(res);
            }
        }
    }
}
