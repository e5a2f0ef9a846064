//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0, connection cap > 0)
//! - Check TLS file references exist
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure apart from TLS path existence checks
//! - Port 0 is accepted (ephemeral port, used by tests)

use std::path::Path;

use thiserror::Error;

use crate::config::schema::ServerConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.max_connections must be greater than zero")]
    NoConnections,

    #[error("listener.host must not be empty")]
    EmptyHost,

    #[error("TLS {field} not found: {path}")]
    MissingTlsFile { field: &'static str, path: String },

    #[error("limits.{0} must be greater than zero")]
    ZeroLimit(&'static str),

    #[error("timeouts.{0} must be greater than zero")]
    ZeroTimeout(&'static str),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.max_connections == 0 {
        errors.push(ValidationError::NoConnections);
    }
    if matches!(config.listener.host.as_deref(), Some(h) if h.trim().is_empty()) {
        errors.push(ValidationError::EmptyHost);
    }

    if let Some(tls) = &config.listener.tls {
        for (field, path) in [("certificate", &tls.cert_path), ("private key", &tls.key_path)] {
            if !Path::new(path).exists() {
                errors.push(ValidationError::MissingTlsFile {
                    field,
                    path: path.clone(),
                });
            }
        }
    }

    let limits = &config.limits;
    for (name, value) in [
        ("max_header_bytes", limits.max_header_bytes),
        ("max_headers", limits.max_headers),
        ("max_body_bytes", limits.max_body_bytes),
    ] {
        if value == 0 {
            errors.push(ValidationError::ZeroLimit(name));
        }
    }

    if config.timeouts.keep_alive_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("keep_alive_secs"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("request_secs"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::TlsConfig;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(validate_config(&ServerConfig::default()), Ok(()));
    }

    #[test]
    fn missing_tls_files_reported_individually() {
        let mut config = ServerConfig::default();
        config.listener.tls = Some(TlsConfig {
            cert_path: "/nonexistent/cert.pem".into(),
            key_path: "/nonexistent/key.pem".into(),
        });

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(matches!(
            errors[0],
            ValidationError::MissingTlsFile { field: "certificate", .. }
        ));
    }

    #[test]
    fn blank_host_rejected() {
        let mut config = ServerConfig::default();
        config.listener.host = Some("  ".into());
        assert_eq!(
            validate_config(&config),
            Err(vec![ValidationError::EmptyHost])
        );
    }

    #[test]
    fn zero_limits_and_timeouts_rejected() {
        let mut config = ServerConfig::default();
        config.limits.max_body_bytes = 0;
        config.timeouts.keep_alive_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::ZeroLimit("max_body_bytes"),
                ValidationError::ZeroTimeout("keep_alive_secs"),
            ]
        );
    }
}
