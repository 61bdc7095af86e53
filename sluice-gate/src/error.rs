//! Typed errors for delivery through the gate.
//!
//! Transport failures are classified as temporary (4xx replies, network
//! trouble) or permanent (5xx replies). The gate itself never retries; the
//! classification is for callers and logs.

use std::time::Duration;

use sluice_spool::SpoolError;
use thiserror::Error;

/// Top-level error returned by [`crate::DeliveryGate`].
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The transport failed to deliver the message.
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The spool failed to store, read or remove a message.
    #[error("Spool failure: {0}")]
    Spool(#[from] SpoolError),
}

/// Failures talking to the downstream mail server.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not open a connection.
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The server did not answer in time.
    #[error("Timed out after {0:?} waiting for the server")]
    Timeout(Duration),

    /// The server answered with a reply outside the expected class.
    #[error("Server rejected {stage}: {code} {message}")]
    Rejected {
        stage: &'static str,
        code: u16,
        message: String,
    },

    /// The server's reply could not be understood.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The session could not be encrypted.
    #[error("TLS error: {0}")]
    Tls(String),

    /// I/O error on an established connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Returns `true` if the failure may succeed when tried again later.
    ///
    /// 4xx replies and connection-level failures are temporary; 5xx replies
    /// and protocol violations are permanent.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        match self {
            Self::Connect { .. } | Self::Timeout(_) | Self::Io(_) => true,
            Self::Rejected { code, .. } => *code >= 400 && *code < 500,
            Self::Protocol(_) | Self::Tls(_) => false,
        }
    }

    /// The SMTP reply code, if the server sent one.
    #[must_use]
    pub const fn code(&self) -> Option<u16> {
        match self {
            Self::Rejected { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl DeliveryError {
    /// Returns `true` if this is a transport failure that may succeed later.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_temporary(),
            Self::Spool(_) => false,
        }
    }
}
