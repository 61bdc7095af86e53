//! Backend storage implementations for the spool
//!
//! - `file`: File-based storage for production use
//! - `memory`: In-memory storage for tests and transient use
//! - `test`: Memory storage with fault injection and synchronization hooks

pub mod file;
pub mod memory;

pub use file::{FileBackingStore, FileBackingStoreBuilder};
pub use memory::MemoryBackingStore;
pub use test::TestBackingStore;
