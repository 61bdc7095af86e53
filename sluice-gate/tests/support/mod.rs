#![allow(dead_code)]

pub mod mock_smtp_server;
pub mod mock_transport;

use std::sync::Arc;

use chrono::NaiveTime;
use sluice_common::{DeliveryWindows, FixedClock, Message};
use sluice_gate::{DeliveryGate, FlushConfig, Transport};
use sluice_spool::{DeliverySpool, TestBackingStore};

pub fn time(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).expect("valid time")
}

pub fn message(subject: &str) -> Message {
    Message::builder()
        .from("foo@example.com")
        .to("receiver@sample.com")
        .subject(subject)
        .body("Message text")
        .build()
        .expect("valid message")
}

/// A gate over a test store and the given transport, with a clock the test
/// controls.
pub struct Harness {
    pub gate: DeliveryGate,
    pub store: TestBackingStore,
    pub clock: FixedClock,
}

impl Harness {
    pub async fn new<T: Transport + 'static>(
        transport: Arc<T>,
        windows: &[&str],
        now: NaiveTime,
        flush: FlushConfig,
    ) -> Self {
        let store = TestBackingStore::new();
        let spool = DeliverySpool::open(Arc::new(store.clone()))
            .await
            .expect("open spool");
        let clock = FixedClock::new(now);

        let gate = DeliveryGate::new(
            transport,
            Arc::new(spool),
            DeliveryWindows::parse(windows).expect("valid windows"),
        )
        .with_clock(Arc::new(clock.clone()))
        .with_flush_config(flush);

        Self { gate, store, clock }
    }

    pub fn at(&self, hour: u32, minute: u32) {
        self.clock.set(time(hour, minute));
    }
}
