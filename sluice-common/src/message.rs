use std::{fmt::Write, time::SystemTime};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::{
    address::{Address, Addresses},
    error::MessageError,
    header,
};

/// An outgoing message.
///
/// Built once through [`MessageBuilder`] and never mutated afterwards; every
/// component that handles it either borrows it or takes ownership outright.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    id: Ulid,
    created_at: SystemTime,
    from: Addresses,
    to: Addresses,
    subject: String,
    body: String,
}

impl Message {
    #[must_use]
    pub fn builder() -> MessageBuilder {
        MessageBuilder::default()
    }

    #[must_use]
    pub const fn id(&self) -> Ulid {
        self.id
    }

    #[must_use]
    pub const fn created_at(&self) -> SystemTime {
        self.created_at
    }

    #[must_use]
    pub const fn sender(&self) -> &Addresses {
        &self.from
    }

    #[must_use]
    pub const fn recipients(&self) -> &Addresses {
        &self.to
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Envelope sender: the first `From` mailbox.
    #[must_use]
    pub fn envelope_sender(&self) -> Option<&Address> {
        self.from.first()
    }

    /// Render the message as RFC 5322 text with CRLF line endings.
    ///
    /// The body is not dot-stuffed; that is the transport's concern.
    #[must_use]
    pub fn render(&self) -> String {
        let date = DateTime::<Local>::from(self.created_at);
        let mut out = String::with_capacity(self.body.len() + 512);

        // Writing into a String cannot fail
        let _ = write!(out, "From: {}\r\n", self.from.to_header());
        let _ = write!(out, "To: {}\r\n", self.to.to_header());
        let _ = write!(
            out,
            "Subject: {}\r\n",
            header::encode_words(&self.subject, "\r\n ")
        );
        let _ = write!(out, "Date: {}\r\n", date.to_rfc2822());
        let _ = write!(
            out,
            "Message-ID: <{}@{}>\r\n",
            self.id,
            self.envelope_sender().map_or("localhost", Address::domain)
        );
        out.push_str("MIME-Version: 1.0\r\n");
        out.push_str("Content-Type: text/plain; charset=utf-8\r\n");
        out.push_str("Content-Transfer-Encoding: 8bit\r\n");
        out.push_str("\r\n");

        for line in self.body.lines() {
            out.push_str(line);
            out.push_str("\r\n");
        }

        out
    }
}

#[derive(Debug, Clone)]
enum RawAddresses {
    One(String),
    Many(Vec<String>),
}

impl RawAddresses {
    fn resolve(self, role: &'static str) -> Result<Addresses, MessageError> {
        match self {
            Self::One(input) => Addresses::single(&input),
            Self::Many(inputs) => Addresses::multiple(role, inputs),
        }
    }
}

/// Assembles a [`Message`] from sender, recipient, subject and body.
///
/// # Examples
///
/// ```
/// use sluice_common::Message;
///
/// let message = Message::builder()
///     .from("foo@example.com")
///     .to("receiver@sample.com")
///     .subject("Message test normal")
///     .body("Message text")
///     .build()
///     .expect("valid message");
///
/// assert_eq!(message.subject(), "Message test normal");
/// ```
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<RawAddresses>,
    to: Option<RawAddresses>,
    subject: String,
    body: String,
}

impl MessageBuilder {
    /// Set a single sender.
    #[must_use]
    pub fn from(mut self, address: impl Into<String>) -> Self {
        self.from = Some(RawAddresses::One(address.into()));
        self
    }

    /// Set a list of senders.
    #[must_use]
    pub fn from_list<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.from = Some(RawAddresses::Many(
            addresses.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Set a single recipient.
    #[must_use]
    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.to = Some(RawAddresses::One(address.into()));
        self
    }

    /// Set a list of recipients.
    #[must_use]
    pub fn to_list<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.to = Some(RawAddresses::Many(
            addresses.into_iter().map(Into::into).collect(),
        ));
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Validate the addresses and produce the message.
    ///
    /// # Errors
    /// If the sender or recipient is missing or invalid, or the subject
    /// contains a line break
    pub fn build(self) -> Result<Message, MessageError> {
        let from = self
            .from
            .ok_or(MessageError::MissingSender)?
            .resolve("from")?;
        let to = self
            .to
            .ok_or(MessageError::MissingRecipient)?
            .resolve("to")?;

        if self.subject.contains(['\r', '\n']) {
            return Err(MessageError::InvalidSubject);
        }

        Ok(Message {
            id: Ulid::new(),
            created_at: SystemTime::now(),
            from,
            to,
            subject: self.subject,
            body: self.body,
        })
    }
}
