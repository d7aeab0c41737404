//! RocksDB-backed checkpoint store.
//!
//! One column family, keyed by thread id; values are JSON envelopes.

use std::path::PathBuf;
use std::sync::RwLock;

use async_trait::async_trait;
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, DB};

use super::envelope::Checkpoint;
use super::{check_thread_id, CheckpointStore, StoreError, StoreResult};
use crate::workflow::state::{StateRecord, ThreadId};

/// Column family holding one checkpoint per thread.
pub const CF_CHECKPOINTS: &str = "checkpoints";

pub struct RocksCheckpointStore {
    db: RwLock<DB>,
    path: PathBuf,
}

impl RocksCheckpointStore {
    /// Open or create a store at the given path
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf = ColumnFamilyDescriptor::new(CF_CHECKPOINTS, Options::default());
        let db = DB::open_cf_descriptors(&opts, &path, vec![cf])?;

        Ok(Self {
            db: RwLock::new(db),
            path,
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl CheckpointStore for RocksCheckpointStore {
    async fn get(&self, thread_id: &str) -> StoreResult<Option<StateRecord>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db.cf_handle(CF_CHECKPOINTS).ok_or_else(|| {
            StoreError::Deserialization(format!("column family {} missing", CF_CHECKPOINTS))
        })?;

        match db.get_cf(&cf, thread_id.as_bytes())? {
            Some(bytes) => {
                let json = std::str::from_utf8(&bytes)
                    .map_err(|e| StoreError::Deserialization(e.to_string()))?;
                Checkpoint::restore(json).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, thread_id: &str, state: &StateRecord) -> StoreResult<()> {
        check_thread_id(thread_id)?;
        let json = Checkpoint::new(state).to_json()?;
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db.cf_handle(CF_CHECKPOINTS).ok_or_else(|| {
            StoreError::Serialization(format!("column family {} missing", CF_CHECKPOINTS))
        })?;
        db.put_cf(&cf, thread_id.as_bytes(), json.as_bytes())?;
        Ok(())
    }

    async fn list_threads(&self) -> StoreResult<Vec<ThreadId>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db.cf_handle(CF_CHECKPOINTS).ok_or_else(|| {
            StoreError::Deserialization(format!("column family {} missing", CF_CHECKPOINTS))
        })?;

        let mut threads = Vec::new();
        for item in db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, _) = item?;
            if let Ok(key) = String::from_utf8(key.to_vec()) {
                threads.push(key);
            }
        }
        Ok(threads)
    }

    fn backend(&self) -> &'static str {
        "rocksdb"
    }
}
