//! Error types for the sluice-common crate.
//!
//! Configuration problems are fatal at startup and never recovered from;
//! message construction problems are reported to whoever is assembling the
//! message.

use std::io;

use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A delivery window string could not be parsed.
    #[error("Invalid delivery window '{window}': {reason}")]
    InvalidWindow { window: String, reason: String },

    /// A required configuration field is missing or empty.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// A configuration value is present but unusable.
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// The configuration file could not be read.
    #[error("Failed to read configuration from {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Errors raised while assembling a [`crate::Message`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    /// The address could not be parsed as a single mailbox.
    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// An address list was given but contained no addresses.
    #[error("Address list for {0} is empty")]
    EmptyAddressList(&'static str),

    /// No sender was supplied.
    #[error("Message has no sender")]
    MissingSender,

    /// No recipient was supplied.
    #[error("Message has no recipient")]
    MissingRecipient,

    /// The subject contains a line break, which would corrupt the headers.
    #[error("Subject must not contain line breaks")]
    InvalidSubject,
}
