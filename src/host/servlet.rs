//! The per-request handler interface the host dispatches to.

use crate::host::request::HostRequest;
use crate::host::response::HostResponse;

/// Error returned by a servlet; the host answers `500` and closes.
pub type ServiceError = Box<dyn std::error::Error + Send + Sync>;

/// A handler mounted on the host server.
///
/// `service` is called once per request on the blocking pool, with a fresh
/// response. The host sends the response after `service` returns.
pub trait Servlet: Send + Sync + 'static {
    fn service(&self, req: &HostRequest, res: &mut HostResponse) -> Result<(), ServiceError>;
}
