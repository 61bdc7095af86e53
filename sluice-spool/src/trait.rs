use async_trait::async_trait;

use crate::SpoolHandle;

/// Storage for framed spool records.
///
/// Stores deal in opaque bytes; encoding and verification live in
/// [`crate::record`]. Implementations must make `write` durable before
/// returning `Ok`, and `list` must return handles in ascending order.
#[async_trait]
pub trait BackingStore: Send + Sync + std::fmt::Debug {
    /// Durably store a record under `handle`.
    async fn write(&self, handle: &SpoolHandle, record: &[u8]) -> crate::Result<()>;

    /// All committed records, oldest first.
    async fn list(&self) -> crate::Result<Vec<SpoolHandle>>;

    /// The raw bytes of one record.
    ///
    /// Returns [`crate::SpoolError::NotFound`] if it does not exist.
    async fn read(&self, handle: &SpoolHandle) -> crate::Result<Vec<u8>>;

    /// Permanently remove a record.
    async fn delete(&self, handle: &SpoolHandle) -> crate::Result<()>;

    /// Move an unreadable record out of the queue without destroying it.
    async fn quarantine(&self, handle: &SpoolHandle) -> crate::Result<()>;

    /// Claim the right to drain against other processes sharing this store.
    ///
    /// Stores only one process can see return `Ok(None)`. The claim is held
    /// until the returned lock is dropped, and fails with
    /// [`crate::SpoolError::Busy`] while another process holds it.
    async fn lock_drain(&self) -> crate::Result<Option<DrainLock>> {
        Ok(None)
    }
}

/// Cross-process claim on draining a store, released on drop.
#[derive(Debug)]
pub struct DrainLock {
    _file: std::fs::File,
}

impl DrainLock {
    /// Wrap a file the caller has already locked.
    #[must_use]
    pub const fn new(file: std::fs::File) -> Self {
        Self { _file: file }
    }
}
