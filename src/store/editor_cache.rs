use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::models::SyncError;

/// The most recent unpersisted code for one (room, file), last-write-wins.
///
/// `version` increases on every write and is the token for
/// delete-if-unchanged: a flush only removes an entry whose version still
/// matches its read snapshot, so edits racing the flush stay pending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingEdit {
    pub code: String,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

/// Shared buffer of unpersisted edits, keyed per (room, file).
///
/// An absent entry means the file was never edited or has already been
/// flushed to durable storage.
#[async_trait]
pub trait EditorStateCache: Send + Sync {
    /// Unconditional overwrite. No merge, no conflict detection.
    async fn put(&self, room_id: i64, file_name: &str, code: &str) -> Result<(), SyncError>;

    /// Latest unpersisted code for the file, or `None` if nothing is pending.
    async fn get(&self, room_id: i64, file_name: &str) -> Result<Option<PendingEdit>, SyncError>;

    /// Remove the entry only if its version still equals `version`.
    /// Returns whether the entry was removed.
    async fn remove_if_version(
        &self,
        room_id: i64,
        file_name: &str,
        version: u64,
    ) -> Result<bool, SyncError>;
}

fn pending_key(room_id: i64, file_name: &str) -> String {
    format!("editor:{}:{}:pending", room_id, file_name)
}

/// Process-shared editor cache backend. One value is constructed at
/// startup and injected into every gateway instance and the flush worker.
#[derive(Default)]
pub struct LocalEditorCache {
    entries: DashMap<String, PendingEdit>,
    next_version: AtomicU64,
}

impl LocalEditorCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EditorStateCache for LocalEditorCache {
    async fn put(&self, room_id: i64, file_name: &str, code: &str) -> Result<(), SyncError> {
        let entry = PendingEdit {
            code: code.to_string(),
            updated_at: Utc::now(),
            version: self.next_version.fetch_add(1, Ordering::Relaxed) + 1,
        };
        self.entries.insert(pending_key(room_id, file_name), entry);
        Ok(())
    }

    async fn get(&self, room_id: i64, file_name: &str) -> Result<Option<PendingEdit>, SyncError> {
        Ok(self
            .entries
            .get(&pending_key(room_id, file_name))
            .map(|e| e.clone()))
    }

    async fn remove_if_version(
        &self,
        room_id: i64,
        file_name: &str,
        version: u64,
    ) -> Result<bool, SyncError> {
        let removed = self
            .entries
            .remove_if(&pending_key(room_id, file_name), |_, e| e.version == version);
        Ok(removed.is_some())
    }
}
