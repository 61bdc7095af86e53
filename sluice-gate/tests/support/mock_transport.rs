//! Transport double that records what it was asked to deliver.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use sluice_common::Message;
use sluice_gate::{Transport, TransportError, TransportReceipt};
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct MockTransport {
    calls: AtomicUsize,
    delivered: Mutex<Vec<Message>>,
    failing: Mutex<HashSet<String>>,
    delays: Mutex<HashMap<String, Duration>>,
    started: Notify,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every message with this subject with a 550.
    pub fn fail_subject(&self, subject: &str) {
        self.failing
            .lock()
            .expect("lock")
            .insert(subject.to_string());
    }

    /// Accept messages with this subject again.
    pub fn heal_subject(&self, subject: &str) {
        self.failing.lock().expect("lock").remove(subject);
    }

    /// Sleep this long before answering for messages with this subject.
    pub fn delay_subject(&self, subject: &str, delay: Duration) {
        self.delays
            .lock()
            .expect("lock")
            .insert(subject.to_string(), delay);
    }

    /// Number of times `deliver` was called, successful or not.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn delivered_subjects(&self) -> Vec<String> {
        self.delivered
            .lock()
            .expect("lock")
            .iter()
            .map(|message| message.subject().to_string())
            .collect()
    }

    pub fn delivered(&self) -> Vec<Message> {
        self.delivered.lock().expect("lock").clone()
    }

    /// Resolves once a delivery has started.
    pub async fn started(&self) {
        self.started.notified().await;
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn deliver(&self, message: &Message) -> Result<TransportReceipt, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();

        let delay = self
            .delays
            .lock()
            .expect("lock")
            .get(message.subject())
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.lock().expect("lock").contains(message.subject()) {
            return Err(TransportError::Rejected {
                stage: "RCPT TO",
                code: 550,
                message: "mailbox unavailable".to_string(),
            });
        }

        self.delivered.lock().expect("lock").push(message.clone());
        Ok(TransportReceipt::new(250, format!("OK queued as {}", message.id())))
    }
}
