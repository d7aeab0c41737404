//! Checkpoint Store: durable State Record persistence keyed by thread id.
//!
//! Every backend stores the same JSON [`Checkpoint`] envelope, so a record
//! written by one backend reads back identically through another. Integrity
//! is checked on every load; a corrupted envelope fails the load rather than
//! handing a broken record to the engine.

pub mod envelope;
pub mod file;
pub mod memory;
#[cfg(feature = "heavy-state")]
pub mod rocks;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::workflow::state::{StateRecord, ThreadId};

pub use envelope::{Checkpoint, IntegrityStatus};
pub use file::FileCheckpointStore;
pub use memory::MemoryCheckpointStore;
#[cfg(feature = "heavy-state")]
pub use rocks::RocksCheckpointStore;

/// Error type for checkpoint store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "heavy-state")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Checkpoint version mismatch: expected <= {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Checkpoint for thread '{thread_id}' failed integrity check: {reason}")]
    Integrity { thread_id: String, reason: String },

    #[error("Invalid thread id: {0:?}")]
    InvalidThreadId(String),

    #[error("Lock poisoned")]
    LockPoisoned,
}

/// Result type for checkpoint store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Key-value persistence of State Records.
///
/// `put` replaces the whole record for a thread; there is no partial update.
/// Implementations must keep distinct thread ids isolated from each other.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the latest record for a thread, or `None` if never written.
    async fn get(&self, thread_id: &str) -> StoreResult<Option<StateRecord>>;

    /// Durably write the record for a thread.
    async fn put(&self, thread_id: &str, state: &StateRecord) -> StoreResult<()>;

    /// All thread ids with a stored record, sorted.
    async fn list_threads(&self) -> StoreResult<Vec<ThreadId>>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}

/// Shared reference to a checkpoint store
pub type SharedCheckpointStore = Arc<dyn CheckpointStore>;

fn check_thread_id(thread_id: &str) -> StoreResult<()> {
    if thread_id.is_empty() || thread_id.chars().any(char::is_control) {
        return Err(StoreError::InvalidThreadId(thread_id.to_string()));
    }
    Ok(())
}
