//! Durable FIFO spool for messages deferred until a delivery window opens.
//!
//! Records are appended by [`DeliverySpool::enqueue`] and consumed through a
//! [`Drain`], which removes an entry only once the caller acknowledges it.

pub mod backends;
pub mod config;
pub mod error;
pub mod record;
pub mod spool;
pub mod r#trait;
pub mod types;

pub use backends::{FileBackingStore, FileBackingStoreBuilder, MemoryBackingStore, TestBackingStore};
pub use config::{MemoryConfig, SpoolConfig};
pub use error::{Result, SerializationError, SpoolError, ValidationError};
pub use spool::{DeliverySpool, Drain, Drained};
pub use r#trait::{BackingStore, DrainLock};
pub use types::{SpoolHandle, SpooledEntry};
