//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway
//! host. All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Environment variable naming the deployment environment.
pub const ENVIRONMENT_VAR: &str = "GATEWAY_ENV";

/// Deployment environment assumed when nothing else is configured.
pub const DEFAULT_ENVIRONMENT: &str = "development";

/// Port used when neither the config nor the handler options name one.
pub const DEFAULT_PORT: u16 = 8080;

/// Root configuration for the gateway host.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Deployment environment ("development", "production", ...).
    pub environment: String,

    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Request size limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            environment: std::env::var(ENVIRONMENT_VAR)
                .unwrap_or_else(|_| DEFAULT_ENVIRONMENT.to_string()),
            listener: ListenerConfig::default(),
            timeouts: TimeoutConfig::default(),
            limits: LimitsConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Whether the development defaults apply.
    pub fn is_development(&self) -> bool {
        self.environment == DEFAULT_ENVIRONMENT
    }

    /// Host to bind when none is configured.
    ///
    /// Development binds loopback only; everything else binds all interfaces.
    pub fn default_host(&self) -> &'static str {
        default_host_for(&self.environment)
    }

    /// Host the listener binds to.
    pub fn bind_host(&self) -> &str {
        self.listener
            .host
            .as_deref()
            .unwrap_or_else(|| self.default_host())
    }
}

/// Default bind host for a deployment environment.
pub fn default_host_for(environment: &str) -> &'static str {
    if environment == DEFAULT_ENVIRONMENT {
        "localhost"
    } else {
        "0.0.0.0"
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Host name or address to bind. Defaults by environment.
    pub host: Option<String>,

    /// Port to bind.
    pub port: u16,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Value of the `server` response header.
    pub server_software: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            tls: None,
            max_connections: 1_024,
            server_software: concat!("h1-gateway/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate chain file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Time allowed to receive a complete request once it has started.
    pub request_secs: u64,

    /// Idle time allowed between requests on a kept-alive connection.
    pub keep_alive_secs: u64,

    /// Time allowed for in-flight connections to finish on shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            keep_alive_secs: 15,
            shutdown_grace_secs: 10,
        }
    }
}

/// Request size limits enforced by the host before dispatch.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum size of the request line plus headers.
    pub max_header_bytes: usize,

    /// Maximum number of request headers.
    pub max_headers: usize,

    /// Maximum request body size.
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_header_bytes: 32 * 1024,
            max_headers: 64,
            max_body_bytes: 8 * 1024 * 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn development_binds_loopback_by_default() {
        let mut config = ServerConfig::default();
        config.environment = "development".into();
        assert_eq!(config.bind_host(), "localhost");
    }

    #[test]
    fn other_environments_bind_all_interfaces() {
        let mut config = ServerConfig::default();
        config.environment = "production".into();
        assert_eq!(config.bind_host(), "0.0.0.0");
        assert!(!config.is_development());
    }

    #[test]
    fn explicit_host_wins() {
        let mut config = ServerConfig::default();
        config.environment = "production".into();
        config.listener.host = Some("127.0.0.1".into());
        assert_eq!(config.bind_host(), "127.0.0.1");
    }
}
