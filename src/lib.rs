//! HTTP/1.1 gateway: serve environment-based applications on a minimal
//! host server.

pub mod config;
pub mod gateway;
pub mod host;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::schema::ServerConfig;
pub use gateway::{run, run_with_config, AppResponse, Application, Body, Environment, HandlerOptions, ResponseHeaders};
pub use host::{HostServer, ServerHandle};
pub use lifecycle::Shutdown;
