use std::{fmt, sync::Arc, time::Duration};

use serde::Deserialize;
use sluice_common::{Clock, ConfigError, DeliveryWindows, LocalClock, Message, Signal, internal};
use sluice_spool::{DeliverySpool, Drained, SpoolError, SpoolHandle};
use tokio::{
    sync::broadcast::{self, error::TryRecvError},
    time::{MissedTickBehavior, timeout},
};

use crate::{DeliveryError, Transport, TransportError, TransportReceipt};

const fn default_flush_interval() -> u64 {
    60
}

/// How the gate treats a message passed to [`DeliveryGate::send`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum DeliveryMode {
    /// Deliver now, whatever the time.
    #[default]
    Direct,
    /// Deliver now if a window is open, otherwise spool until one is.
    Deferrable,
}

/// Outcome of a successful [`DeliveryGate::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryReceipt {
    Delivered(TransportReceipt),
    Queued(SpoolHandle),
}

/// What a flush does when delivering an entry fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum FlushPolicy {
    /// Keep the failed entry queued and carry on with the rest.
    #[default]
    SkipAndContinue,
    /// Keep the failed entry and everything after it queued, and stop.
    StopOnFailure,
}

/// Settings for flushing the spool.
///
/// ```ron
/// flush: (
///     interval_secs: 300,
///     policy: StopOnFailure,
///     entry_timeout_secs: Some(60),
/// ),
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct FlushConfig {
    /// How often [`DeliveryGate::serve`] flushes (in seconds)
    #[serde(default = "default_flush_interval")]
    pub interval_secs: u64,

    #[serde(default)]
    pub policy: FlushPolicy,

    /// Limit on delivering a single spooled entry (in seconds)
    #[serde(default)]
    pub entry_timeout_secs: Option<u64>,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_flush_interval(),
            policy: FlushPolicy::default(),
            entry_timeout_secs: None,
        }
    }
}

impl FlushConfig {
    /// # Errors
    /// [`ConfigError::InvalidValue`] for a zero interval or entry timeout
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "flush.interval_secs".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.entry_timeout_secs == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "flush.entry_timeout_secs".to_string(),
                reason: "must be greater than zero when set".to_string(),
            });
        }

        Ok(())
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    #[must_use]
    pub fn entry_timeout(&self) -> Option<Duration> {
        self.entry_timeout_secs.map(Duration::from_secs)
    }
}

/// Tally of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Delivered and removed from the spool
    pub delivered: usize,
    /// Attempted, failed, and left in the spool
    pub failed: usize,
    /// Unreadable records moved out of the spool
    pub corrupted: usize,
    /// Entries from the snapshot that were not finished because the flush
    /// stopped or was cancelled; they are still queued
    pub remaining: usize,
    /// The flush ended early because of a shutdown signal
    pub cancelled: bool,
}

impl FlushReport {
    /// Nothing was looked at.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.delivered == 0 && self.failed == 0 && self.corrupted == 0 && self.remaining == 0
    }
}

impl fmt::Display for FlushReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "delivered={} failed={} corrupted={} remaining={}",
            self.delivered, self.failed, self.corrupted, self.remaining
        )?;

        if self.cancelled {
            f.write_str(" (cancelled)")?;
        }

        Ok(())
    }
}

/// Front door for outbound mail.
///
/// Direct messages go straight to the transport. Deferrable messages do too
/// while a delivery window is open; otherwise they are spooled and sent by a
/// later [`flush`](Self::flush). Cloning is cheap and clones share the same
/// spool and transport.
#[derive(Debug, Clone)]
pub struct DeliveryGate {
    transport: Arc<dyn Transport>,
    spool: Arc<DeliverySpool>,
    windows: Arc<DeliveryWindows>,
    clock: Arc<dyn Clock>,
    flush: Arc<FlushConfig>,
}

impl DeliveryGate {
    /// A gate using the local wall clock and default flush settings.
    pub fn new(
        transport: Arc<dyn Transport>,
        spool: Arc<DeliverySpool>,
        windows: DeliveryWindows,
    ) -> Self {
        Self {
            transport,
            spool,
            windows: Arc::new(windows),
            clock: Arc::new(LocalClock),
            flush: Arc::default(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_flush_config(mut self, flush: FlushConfig) -> Self {
        self.flush = Arc::new(flush);
        self
    }

    pub fn spool(&self) -> &Arc<DeliverySpool> {
        &self.spool
    }

    pub fn windows(&self) -> &DeliveryWindows {
        &self.windows
    }

    pub fn flush_config(&self) -> &FlushConfig {
        &self.flush
    }

    /// Whether a delivery window is open right now.
    pub fn is_open(&self) -> bool {
        self.windows.is_open(self.clock.now())
    }

    /// Deliver or spool `message` according to `mode`.
    ///
    /// The message is only borrowed, so a caller can retry after an error.
    ///
    /// # Errors
    /// - [`DeliveryError::Transport`] if delivery was attempted and failed
    /// - [`DeliveryError::Spool`] if the message had to be spooled and could
    ///   not be
    #[tracing::instrument(level = "debug", skip_all, fields(message = %message.id(), mode = ?mode))]
    pub async fn send(
        &self,
        message: &Message,
        mode: DeliveryMode,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        if mode == DeliveryMode::Deferrable && !self.is_open() {
            let handle = self.spool.enqueue(message).await?;

            internal!(
                level = INFO,
                "Outside delivery windows {}, queued message {} as {handle}",
                self.windows,
                message.id()
            );

            return Ok(DeliveryReceipt::Queued(handle));
        }

        let receipt = self.transport.deliver(message).await?;
        internal!(level = DEBUG, "Message {} delivered: {receipt}", message.id());

        Ok(DeliveryReceipt::Delivered(receipt))
    }

    /// Deliver everything in the spool, oldest first, if a window is open.
    ///
    /// # Errors
    /// [`DeliveryError::Spool`] if the spool cannot be read, a delivered
    /// entry cannot be removed, or another process is already flushing it.
    /// Transport failures are counted in the report instead.
    pub async fn flush(&self) -> Result<FlushReport, DeliveryError> {
        self.run_flush(None).await
    }

    /// As [`flush`](Self::flush), but stops as soon as a signal arrives on
    /// `cancel`.
    ///
    /// The entry being delivered when the signal arrives, and every entry
    /// after it, stays in the spool.
    ///
    /// # Errors
    /// As for [`flush`](Self::flush)
    pub async fn flush_until(
        &self,
        cancel: &mut broadcast::Receiver<Signal>,
    ) -> Result<FlushReport, DeliveryError> {
        self.run_flush(Some(cancel)).await
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn run_flush(
        &self,
        mut cancel: Option<&mut broadcast::Receiver<Signal>>,
    ) -> Result<FlushReport, DeliveryError> {
        if !self.is_open() {
            internal!(
                level = DEBUG,
                "Outside delivery windows {}, leaving the spool alone",
                self.windows
            );
            return Ok(FlushReport::default());
        }

        let mut drain = self.spool.drain().await?;
        let mut report = FlushReport::default();

        loop {
            if cancel_requested(cancel.as_deref_mut()) {
                report.cancelled = true;
                break;
            }

            let Some(drained) = drain.next_entry().await? else {
                break;
            };

            let entry = match drained {
                Drained::Entry(entry) => entry,
                Drained::Corrupted { handle, reason } => {
                    internal!(level = WARN, "Skipped corrupted spool entry {handle}: {reason}");
                    report.corrupted += 1;
                    continue;
                }
            };

            let outcome = tokio::select! {
                biased;
                () = cancelled(cancel.as_deref_mut()) => None,
                result = self.deliver_entry(&entry.message) => Some(result),
            };

            match outcome {
                None => {
                    internal!(
                        level = INFO,
                        "Flush cancelled while delivering {}, leaving it queued",
                        entry.handle
                    );
                    report.cancelled = true;
                    report.remaining += 1;
                    break;
                }
                Some(Ok(receipt)) => {
                    drain.acknowledge(&entry.handle).await?;
                    internal!(
                        level = DEBUG,
                        "Delivered spooled message {} ({}): {receipt}",
                        entry.message.id(),
                        entry.handle
                    );
                    report.delivered += 1;
                }
                Some(Err(e)) => {
                    internal!(
                        level = WARN,
                        "Failed to deliver spooled message {} ({}), leaving it queued: {e}",
                        entry.message.id(),
                        entry.handle
                    );
                    report.failed += 1;

                    if self.flush.policy == FlushPolicy::StopOnFailure {
                        break;
                    }
                }
            }
        }

        report.remaining += drain.remaining();

        internal!(level = INFO, "Flush finished: {report}");

        Ok(report)
    }

    async fn deliver_entry(&self, message: &Message) -> Result<TransportReceipt, TransportError> {
        match self.flush.entry_timeout() {
            Some(limit) => timeout(limit, self.transport.deliver(message))
                .await
                .map_err(|_| TransportError::Timeout(limit))?,
            None => self.transport.deliver(message).await,
        }
    }

    /// Flush the spool every `flush.interval_secs` until shutdown.
    ///
    /// The first flush runs immediately. A shutdown signal arriving during a
    /// flush cancels it, leaving unsent entries queued.
    ///
    /// # Errors
    /// Currently always returns `Ok`; flush errors are logged and the next
    /// tick tries again.
    #[tracing::instrument(level = "trace", skip_all)]
    pub async fn serve(
        &self,
        mut shutdown: broadcast::Receiver<Signal>,
    ) -> Result<(), DeliveryError> {
        internal!(
            level = INFO,
            "Delivery gate flusher starting, windows {}, every {}s",
            self.windows,
            self.flush.interval_secs
        );

        let mut timer = tokio::time::interval(self.flush.interval().max(Duration::from_secs(1)));
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    match self.flush_until(&mut shutdown).await {
                        Ok(report) if report.cancelled => {
                            internal!(level = INFO, "Flush interrupted by shutdown: {report}");
                            break;
                        }
                        Ok(report) if report.is_empty() => {
                            internal!(level = DEBUG, "Flush found nothing to deliver");
                        }
                        Ok(report) => {
                            internal!(level = INFO, "Flushed spool: {report}");
                        }
                        Err(DeliveryError::Spool(SpoolError::Busy(_))) => {
                            internal!(
                                level = INFO,
                                "Another process is flushing the spool, skipping this tick"
                            );
                        }
                        Err(e) => {
                            internal!(level = ERROR, "Error flushing spool: {e}");
                        }
                    }
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!(level = INFO, "Delivery gate flusher received shutdown signal");
                            break;
                        }
                        Err(e) => {
                            internal!(level = ERROR, "Delivery gate shutdown channel error: {e}");
                            break;
                        }
                    }
                }
            }
        }

        internal!(level = INFO, "Delivery gate flusher shutdown complete");

        Ok(())
    }
}

/// A signal is already waiting (or was missed through lag).
fn cancel_requested(cancel: Option<&mut broadcast::Receiver<Signal>>) -> bool {
    cancel.is_some_and(|rx| match rx.try_recv() {
        Ok(_) | Err(TryRecvError::Lagged(_)) => true,
        Err(TryRecvError::Empty | TryRecvError::Closed) => false,
    })
}

/// Resolves once a signal arrives; never, if there is no receiver or every
/// sender is gone.
async fn cancelled(cancel: Option<&mut broadcast::Receiver<Signal>>) {
    if let Some(rx) = cancel {
        match rx.recv().await {
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => return,
            Err(broadcast::error::RecvError::Closed) => {}
        }
    }

    std::future::pending::<()>().await;
}
