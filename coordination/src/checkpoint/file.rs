//! JSON-file-per-thread checkpoint store.
//!
//! Layout: `<dir>/<encoded-thread-id>.json`. Writes go to a unique temp file
//! in the same directory and are renamed into place, so a crash mid-write
//! leaves the previous checkpoint intact.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::envelope::Checkpoint;
use super::{check_thread_id, CheckpointStore, StoreError, StoreResult};
use crate::workflow::state::{StateRecord, ThreadId};

const EXTENSION: &str = "json";

#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Use `dir` as the checkpoint directory, creating it if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, thread_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", encode_thread_id(thread_id), EXTENSION))
    }
}

/// Keep `[A-Za-z0-9_-]` as is; percent-encode every other byte.
fn encode_thread_id(thread_id: &str) -> String {
    let mut out = String::with_capacity(thread_id.len());
    for byte in thread_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

fn decode_thread_id(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = stem.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn get(&self, thread_id: &str) -> StoreResult<Option<StateRecord>> {
        check_thread_id(thread_id)?;
        let path = self.path_for(thread_id);
        let json = match tokio::fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        Checkpoint::restore(&json).map(Some)
    }

    async fn put(&self, thread_id: &str, state: &StateRecord) -> StoreResult<()> {
        check_thread_id(thread_id)?;
        let json = Checkpoint::new(state).to_json()?;
        let path = self.path_for(thread_id);
        let tmp = self.dir.join(format!(
            ".{}.{}.tmp",
            encode_thread_id(thread_id),
            uuid::Uuid::new_v4()
        ));

        if let Err(source) = tokio::fs::write(&tmp, json).await {
            return Err(StoreError::Io { path: tmp, source });
        }
        if let Err(source) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StoreError::Io { path, source });
        }

        debug!(thread_id, step = state.step, path = %path.display(), "Checkpoint written");
        Ok(())
    }

    async fn list_threads(&self) -> StoreResult<Vec<ThreadId>> {
        let io_err = |source| StoreError::Io {
            path: self.dir.clone(),
            source,
        };
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(io_err)?;
        let mut threads = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if stem.starts_with('.') {
                continue;
            }
            if let Some(thread_id) = decode_thread_id(stem) {
                threads.push(thread_id);
            }
        }
        threads.sort();
        Ok(threads)
    }

    fn backend(&self) -> &'static str {
        "file"
    }
}
