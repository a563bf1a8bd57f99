//! Tier 4 of the error handling design: fatal, process-exit errors.
//!
//! `GatewayError` is hand-rolled `Display`/`Error`/`From` rather than
//! `thiserror`-derived, following the teacher's
//! `lockframe-server/src/server_error.rs` (manual, outer server crate).
//! Public-side dispatch failures (tier 3) don't need a dedicated error type
//! here: `core::DispatchResult` already carries the not-found/at-capacity
//! outcomes the public HTTP path renders.

use std::fmt;

use crate::bootstrap::BootstrapError;

/// Fatal, process-exit errors: overlay bootstrap failure, listener bind
/// failure, CLI validation failure.
#[derive(Debug)]
pub enum GatewayError {
    /// Binding a configured listener address failed.
    BindFailed {
        /// The address that failed to bind.
        address: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The embedded overlay daemon failed to bootstrap.
    Bootstrap(BootstrapError),
    /// `--cert` was given without `--key`, or vice versa.
    IncompleteTlsConfig,
    /// Loading the configured TLS certificate or key failed.
    TlsConfig(String),
    /// An I/O error occurred outside of a more specific context.
    Io(std::io::Error),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BindFailed { address, source } => {
                write!(f, "failed to bind {address}: {source}")
            },
            Self::Bootstrap(err) => write!(f, "overlay bootstrap failed: {err}"),
            Self::IncompleteTlsConfig => {
                write!(f, "--cert and --key must both be given, or neither")
            },
            Self::TlsConfig(msg) => write!(f, "invalid TLS configuration: {msg}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for GatewayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::BindFailed { source, .. } => Some(source),
            Self::Bootstrap(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::IncompleteTlsConfig | Self::TlsConfig(_) => None,
        }
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<BootstrapError> for GatewayError {
    fn from(err: BootstrapError) -> Self {
        Self::Bootstrap(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_error_display() {
        let err = GatewayError::IncompleteTlsConfig;
        assert_eq!(err.to_string(), "--cert and --key must both be given, or neither");
    }
}
