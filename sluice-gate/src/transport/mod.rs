//! Downstream transports the gate hands messages to.

mod smtp;

use std::fmt;

use async_trait::async_trait;
use sluice_common::Message;

pub use smtp::{SmtpConfig, SmtpTransport, TlsMode};

use crate::TransportError;

/// Something that can hand a message on to its next hop.
///
/// Implementations attempt delivery exactly once; the gate never retries.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Deliver `message`.
    ///
    /// # Errors
    /// Any failure to hand the message over, classified by
    /// [`TransportError::is_temporary`]
    async fn deliver(&self, message: &Message) -> Result<TransportReceipt, TransportError>;
}

/// Acknowledgement from the next hop that it accepted a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportReceipt {
    /// Reply code of the final acceptance
    pub code: u16,
    /// Reply text, typically including the server's queue id
    pub message: String,
}

impl TransportReceipt {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.message)
    }
}
