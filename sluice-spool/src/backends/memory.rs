use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;

use crate::{SpoolError, SpoolHandle, r#trait::BackingStore};

type Records = Arc<RwLock<BTreeMap<SpoolHandle, Vec<u8>>>>;

/// In-memory backing store implementation
///
/// Records are kept in a `BTreeMap` keyed by handle, so iteration order is
/// drain order. Nothing survives a restart; intended for tests and for
/// deployments that accept losing deferred mail on restart.
///
/// # Capacity Management
/// The store can be configured with a maximum number of records. When the
/// limit is reached, writes fail with [`SpoolError::CapacityExceeded`].
#[derive(Debug, Clone)]
pub struct MemoryBackingStore {
    pub(crate) records: Records,
    pub(crate) quarantined: Records,
    /// Maximum number of records to store (None = unlimited)
    capacity: Option<usize>,
}

impl MemoryBackingStore {
    /// Create a new empty memory-backed store with unlimited capacity
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Arc::default(),
            quarantined: Arc::default(),
            capacity: None,
        }
    }

    /// Create a new memory-backed store with a capacity limit
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::new()
        }
    }

    /// Get the current number of records in the store
    ///
    /// Recovers gracefully if the lock is poisoned by accessing the underlying data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of records that were set aside as unreadable
    #[must_use]
    pub fn quarantined_len(&self) -> usize {
        self.quarantined
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Get the configured capacity (None = unlimited)
    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

impl Default for MemoryBackingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackingStore for MemoryBackingStore {
    async fn write(&self, handle: &SpoolHandle, record: &[u8]) -> crate::Result<()> {
        let mut records = self.records.write()?;

        if records.contains_key(handle) {
            return Err(SpoolError::AlreadyExists(*handle));
        }

        if let Some(capacity) = self.capacity
            && records.len() >= capacity
        {
            return Err(SpoolError::CapacityExceeded { capacity });
        }

        records.insert(*handle, record.to_vec());
        Ok(())
    }

    async fn list(&self) -> crate::Result<Vec<SpoolHandle>> {
        Ok(self.records.read()?.keys().copied().collect())
    }

    async fn read(&self, handle: &SpoolHandle) -> crate::Result<Vec<u8>> {
        self.records
            .read()?
            .get(handle)
            .cloned()
            .ok_or(SpoolError::NotFound(*handle))
    }

    async fn delete(&self, handle: &SpoolHandle) -> crate::Result<()> {
        self.records
            .write()?
            .remove(handle)
            .map(drop)
            .ok_or(SpoolError::NotFound(*handle))
    }

    async fn quarantine(&self, handle: &SpoolHandle) -> crate::Result<()> {
        let record = self
            .records
            .write()?
            .remove(handle)
            .ok_or(SpoolError::NotFound(*handle))?;

        self.quarantined.write()?.insert(*handle, record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ulid::Ulid;

    use super::*;

    fn handle(ordinal: u64) -> SpoolHandle {
        SpoolHandle::new(ordinal, Ulid::new())
    }

    #[tokio::test]
    async fn test_memory_store_basic_operations() {
        let store = MemoryBackingStore::new();
        let id = handle(1);

        store.write(&id, b"record").await.expect("Failed to write");

        let ids = store.list().await.expect("Failed to list");
        assert_eq!(ids, [id]);

        assert_eq!(store.read(&id).await.expect("Failed to read"), b"record");

        store.delete(&id).await.expect("Failed to delete");
        assert!(store.list().await.expect("Failed to list").is_empty());
        assert!(matches!(
            store.read(&id).await,
            Err(SpoolError::NotFound(missing)) if missing == id
        ));
    }

    #[tokio::test]
    async fn test_memory_store_capacity_limit() {
        let store = MemoryBackingStore::with_capacity(2);

        store.write(&handle(1), b"one").await.expect("First write should succeed");
        store.write(&handle(2), b"two").await.expect("Second write should succeed");

        let result = store.write(&handle(3), b"three").await;
        assert!(matches!(result, Err(SpoolError::CapacityExceeded { capacity: 2 })));

        let ids = store.list().await.expect("Failed to list");
        store.delete(&ids[0]).await.expect("Failed to delete");

        assert!(store.write(&handle(3), b"three").await.is_ok());
    }

    #[tokio::test]
    async fn test_list_is_ordered_by_ordinal() {
        let store = MemoryBackingStore::new();

        for ordinal in [3, 1, 2] {
            store.write(&handle(ordinal), b"x").await.expect("Failed to write");
        }

        let ordinals: Vec<u64> = store
            .list()
            .await
            .expect("Failed to list")
            .iter()
            .map(SpoolHandle::ordinal)
            .collect();
        assert_eq!(ordinals, [1, 2, 3]);
    }

    #[tokio::test]
    async fn test_quarantine_moves_record_aside() {
        let store = MemoryBackingStore::new();
        let id = handle(1);
        store.write(&id, b"garbage").await.expect("Failed to write");

        store.quarantine(&id).await.expect("Failed to quarantine");

        assert!(store.is_empty());
        assert_eq!(store.quarantined_len(), 1);
    }

    #[test]
    fn test_capacity_methods() {
        assert_eq!(MemoryBackingStore::new().capacity(), None);
        assert_eq!(MemoryBackingStore::with_capacity(100).capacity(), Some(100));
    }
}
