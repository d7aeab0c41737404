//! In-memory checkpoint store for tests and ephemeral sessions.
//!
//! Records are kept as serialized envelopes so reads never alias a caller's
//! value and go through the same validation as the durable backends.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::envelope::Checkpoint;
use super::{check_thread_id, CheckpointStore, StoreError, StoreResult};
use crate::workflow::state::{StateRecord, ThreadId};

#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    entries: RwLock<BTreeMap<ThreadId, String>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self, thread_id: &str) -> StoreResult<Option<StateRecord>> {
        let entries = self.entries.read().map_err(|_| StoreError::LockPoisoned)?;
        entries
            .get(thread_id)
            .map(|json| Checkpoint::restore(json))
            .transpose()
    }

    async fn put(&self, thread_id: &str, state: &StateRecord) -> StoreResult<()> {
        check_thread_id(thread_id)?;
        let json = Checkpoint::new(state).to_json()?;
        let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        entries.insert(thread_id.to_string(), json);
        Ok(())
    }

    async fn list_threads(&self) -> StoreResult<Vec<ThreadId>> {
        let entries = self.entries.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(entries.keys().cloned().collect())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
