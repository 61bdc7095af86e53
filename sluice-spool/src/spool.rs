use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
    time::SystemTime,
};

use sluice_common::{Message, internal};
use tokio::sync::{Mutex, MutexGuard};
use ulid::Ulid;

use crate::{
    SerializationError, SpoolError, SpoolHandle, SpooledEntry, record,
    r#trait::{BackingStore, DrainLock},
};

/// Durable FIFO queue of deferred messages.
///
/// Ordering is by a monotonically increasing ordinal assigned at enqueue
/// time. The counter lock is held across the durable write, so a drain
/// snapshot always sees a gap-free prefix of the queue.
#[derive(Debug)]
pub struct DeliverySpool {
    store: Arc<dyn BackingStore>,
    next_ordinal: Mutex<u64>,
    drain_lock: Mutex<()>,
}

/// One step of a [`Drain`].
#[derive(Debug)]
pub enum Drained {
    Entry(SpooledEntry),
    /// The record could not be read back and has been moved out of the queue.
    Corrupted { handle: SpoolHandle, reason: String },
}

/// An ordered pass over the entries that were queued when it started.
///
/// Entries are only removed by [`Drain::acknowledge`]; anything yielded but
/// not acknowledged is still there for the next drain.
#[derive(Debug)]
pub struct Drain<'a> {
    spool: &'a DeliverySpool,
    pending: VecDeque<SpoolHandle>,
    yielded: HashSet<SpoolHandle>,
    _store_lock: Option<DrainLock>,
    _guard: MutexGuard<'a, ()>,
}

impl DeliverySpool {
    /// Open a spool over `store`, resuming after the highest ordinal present.
    ///
    /// # Errors
    /// If the store cannot be listed
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn open(store: Arc<dyn BackingStore>) -> crate::Result<Self> {
        let handles = store.list().await?;
        let last = handles.iter().map(SpoolHandle::ordinal).max().unwrap_or(0);

        internal!(
            level = INFO,
            "Spool opened with {} queued entries",
            handles.len()
        );

        Ok(Self {
            store,
            next_ordinal: Mutex::new(last + 1),
            drain_lock: Mutex::new(()),
        })
    }

    /// Durably append `message` to the back of the queue.
    ///
    /// # Errors
    /// If the message cannot be encoded or the store rejects the write. The
    /// ordinal is not consumed on failure.
    #[tracing::instrument(level = "debug", skip_all, fields(message = %message.id()))]
    pub async fn enqueue(&self, message: &Message) -> crate::Result<SpoolHandle> {
        let mut next = self.next_ordinal.lock().await;
        let handle = SpoolHandle::new(*next, Ulid::new());
        let bytes = record::encode(&handle, &SystemTime::now(), message)?;

        self.store.write(&handle, &bytes).await?;
        *next += 1;

        internal!(level = DEBUG, "Spooled message {} as {handle}", message.id());
        Ok(handle)
    }

    /// Start a drain over everything queued right now.
    ///
    /// Waits for any other drain over this spool to finish first. Messages
    /// enqueued while the drain is running are left for the next one.
    ///
    /// # Errors
    /// [`SpoolError::Busy`] if another process is draining the same store,
    /// otherwise if the store cannot be listed
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn drain(&self) -> crate::Result<Drain<'_>> {
        let guard = self.drain_lock.lock().await;
        let store_lock = self.store.lock_drain().await?;
        let pending = {
            let _ordinal = self.next_ordinal.lock().await;
            self.store.list().await?
        };

        internal!(level = DEBUG, "Draining {} spooled entries", pending.len());

        Ok(Drain {
            spool: self,
            pending: pending.into(),
            yielded: HashSet::new(),
            _store_lock: store_lock,
            _guard: guard,
        })
    }

    /// Number of queued entries.
    ///
    /// # Errors
    /// If the store cannot be listed
    pub async fn len(&self) -> crate::Result<usize> {
        Ok(self.store.list().await?.len())
    }

    /// # Errors
    /// If the store cannot be listed
    pub async fn is_empty(&self) -> crate::Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Every queued handle, oldest first.
    ///
    /// # Errors
    /// If the store cannot be listed
    pub async fn handles(&self) -> crate::Result<Vec<SpoolHandle>> {
        self.store.list().await
    }

    /// Read one entry without removing it.
    ///
    /// # Errors
    /// If the entry does not exist or cannot be decoded
    pub async fn read(&self, handle: &SpoolHandle) -> crate::Result<SpooledEntry> {
        let bytes = self.store.read(handle).await?;
        let entry = record::decode(&bytes)?;

        if entry.handle != *handle {
            return Err(SerializationError::Corrupted(format!(
                "record header names {} but is stored as {handle}",
                entry.handle
            ))
            .into());
        }

        Ok(entry)
    }

    /// Remove an entry outside of a drain.
    ///
    /// # Errors
    /// If the entry does not exist or cannot be deleted
    #[tracing::instrument(level = "debug", skip_all, fields(handle = %handle))]
    pub async fn remove(&self, handle: &SpoolHandle) -> crate::Result<()> {
        self.store.delete(handle).await?;
        internal!(level = INFO, "Removed {handle} from the spool");
        Ok(())
    }
}

impl Drain<'_> {
    /// The next entry in ordinal order, or `None` once the snapshot is used up.
    ///
    /// Records that fail verification are quarantined and reported as
    /// [`Drained::Corrupted`] rather than ending the drain. Records that
    /// disappeared since the snapshot are skipped.
    ///
    /// # Errors
    /// If the store fails to read a record. That record stays queued and the
    /// drain moves past it.
    pub async fn next_entry(&mut self) -> crate::Result<Option<Drained>> {
        while let Some(handle) = self.pending.pop_front() {
            match self.spool.read(&handle).await {
                Ok(entry) => {
                    self.yielded.insert(handle);
                    return Ok(Some(Drained::Entry(entry)));
                }
                Err(SpoolError::NotFound(_)) => {
                    internal!(level = DEBUG, "{handle} vanished before it was drained");
                }
                Err(e) if e.is_corruption() => {
                    let reason = e.to_string();
                    internal!(level = WARN, "Quarantining corrupted record {handle}: {reason}");

                    if let Err(quarantine) = self.spool.store.quarantine(&handle).await {
                        internal!(
                            level = ERROR,
                            "Failed to quarantine corrupted record {handle}: {quarantine}"
                        );
                    }

                    return Ok(Some(Drained::Corrupted { handle, reason }));
                }
                Err(e) => return Err(e),
            }
        }

        Ok(None)
    }

    /// Permanently remove an entry this drain has yielded.
    ///
    /// # Errors
    /// If `handle` was not yielded by this drain, or the store fails to
    /// delete it
    #[tracing::instrument(level = "debug", skip_all, fields(handle = %handle))]
    pub async fn acknowledge(&mut self, handle: &SpoolHandle) -> crate::Result<()> {
        if !self.yielded.contains(handle) {
            return Err(SpoolError::Internal(format!(
                "{handle} was not yielded by this drain"
            )));
        }

        self.spool.store.delete(handle).await?;
        self.yielded.remove(handle);
        Ok(())
    }

    /// Entries in the snapshot that have not been reached yet.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}
