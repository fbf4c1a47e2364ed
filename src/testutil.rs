//! Shared fixtures for the in-file test modules: in-memory repository
//! stands-ins, a recording flush queue, and a harness wiring N gateway
//! instances to one shared store and bus.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use jsonwebtoken::{encode, EncodingKey, Header};
use uuid::Uuid;

use crate::bus::LocalEventBus;
use crate::gateway::{ConnCtx, Gateway};
use crate::jobs::FlushQueue;
use crate::models::{
    FileUpdate, Shard, ShardFile, ShardMode, ShardWithFiles, SyncError, User,
};
use crate::repositories::{ShardRepository, UserRepository};
use crate::store::{LocalEditorCache, LocalPresenceStore};

pub const SECRET: &str = "test-secret";

/// Mint a signed token the way the frontend's auth service would.
pub fn make_token(uid: &str, secret: &str) -> String {
    let claims = serde_json::json!({
        "sub": uid,
        // Far enough out that no test ever sees an expired token.
        "exp": 4_102_444_800u64,
    });
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("token encoding failed")
}

pub fn shard_with_files(id: i64, files: &[(&str, &str)]) -> ShardWithFiles {
    ShardWithFiles {
        shard: Shard {
            id,
            mode: ShardMode::Collaboration,
            last_sync_timestamp: None,
        },
        files: files
            .iter()
            .map(|(name, code)| ShardFile {
                name: name.to_string(),
                code: code.to_string(),
            })
            .collect(),
    }
}

/// In-memory shard repository recording every durable write.
#[derive(Default)]
pub struct MemoryShardRepository {
    shards: DashMap<i64, ShardWithFiles>,
    pub bulk_updates: Mutex<Vec<(i64, Vec<FileUpdate>)>>,
    pub sync_touches: Mutex<Vec<i64>>,
    fail_bulk: AtomicBool,
}

impl MemoryShardRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, shard: ShardWithFiles) {
        self.shards.insert(shard.shard.id, shard);
    }

    /// Make every subsequent bulk update fail, simulating a database
    /// outage during the durable write.
    pub fn fail_bulk_updates(&self) {
        self.fail_bulk.store(true, Ordering::Relaxed);
    }
}

#[async_trait]
impl ShardRepository for MemoryShardRepository {
    async fn find_by_id(&self, room_id: i64) -> Result<Option<ShardWithFiles>, SyncError> {
        Ok(self.shards.get(&room_id).map(|s| s.clone()))
    }

    async fn update_files_bulk(
        &self,
        room_id: i64,
        files: &[FileUpdate],
    ) -> Result<(), SyncError> {
        if self.fail_bulk.load(Ordering::Relaxed) {
            return Err(SyncError::Internal("simulated bulk update failure".to_string()));
        }
        if let Some(mut shard) = self.shards.get_mut(&room_id) {
            for update in files {
                if let Some(file) = shard.files.iter_mut().find(|f| f.name == update.name) {
                    file.code = update.code.clone();
                }
            }
        }
        self.bulk_updates
            .lock()
            .unwrap()
            .push((room_id, files.to_vec()));
        Ok(())
    }

    async fn update_last_sync_timestamp(&self, room_id: i64) -> Result<(), SyncError> {
        if let Some(mut shard) = self.shards.get_mut(&room_id) {
            shard.shard.last_sync_timestamp = Some(Utc::now());
        }
        self.sync_touches.lock().unwrap().push(room_id);
        Ok(())
    }
}

/// In-memory user repository.
#[derive(Default)]
pub struct MemoryUserRepository {
    users: DashMap<String, User>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: User) {
        self.users.insert(user.id.clone(), user);
    }

    pub fn remove(&self, user_id: &str) {
        self.users.remove(user_id);
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn find_by_id(&self, user_id: &str) -> Result<Option<User>, SyncError> {
        Ok(self.users.get(user_id).map(|u| u.clone()))
    }
}

/// Flush queue that only records what was requested.
#[derive(Default)]
pub struct RecordingFlushQueue {
    requests: Mutex<Vec<i64>>,
}

impl RecordingFlushQueue {
    pub fn requests(&self) -> Vec<i64> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl FlushQueue for RecordingFlushQueue {
    async fn enqueue_flush(&self, room_id: i64) -> Result<(), SyncError> {
        self.requests.lock().unwrap().push(room_id);
        Ok(())
    }
}

/// One shared store/bus/repository set, against which any number of
/// gateway instances can be constructed: the multi-instance deployment
/// in miniature.
pub struct TestHarness {
    pub presence: Arc<LocalPresenceStore>,
    pub cache: Arc<LocalEditorCache>,
    pub bus: Arc<LocalEventBus>,
    pub shards: Arc<MemoryShardRepository>,
    pub users: Arc<MemoryUserRepository>,
    pub flush_queue: Arc<RecordingFlushQueue>,
}

impl TestHarness {
    /// Seeds room 1 (files main.py, util.py) and users A and B.
    pub fn new() -> Self {
        let shards = Arc::new(MemoryShardRepository::new());
        shards.insert(shard_with_files(1, &[("main.py", ""), ("util.py", "")]));

        let users = Arc::new(MemoryUserRepository::new());
        for id in ["A", "B"] {
            users.insert(User {
                id: id.to_string(),
                username: format!("user-{}", id.to_lowercase()),
                email: format!("{}@example.com", id.to_lowercase()),
            });
        }

        Self {
            presence: Arc::new(LocalPresenceStore::new()),
            cache: Arc::new(LocalEditorCache::new()),
            bus: Arc::new(LocalEventBus::new()),
            shards,
            users,
            flush_queue: Arc::new(RecordingFlushQueue::default()),
        }
    }

    /// A fresh gateway instance sharing this harness's store and bus.
    pub fn gateway(&self) -> Arc<Gateway> {
        self.gateway_with_queue(self.flush_queue.clone())
    }

    pub fn gateway_with_queue(&self, queue: Arc<dyn FlushQueue>) -> Arc<Gateway> {
        Gateway::new(
            self.presence.clone(),
            self.cache.clone(),
            self.bus.clone(),
            self.shards.clone(),
            self.users.clone(),
            queue,
            Some(SECRET.to_string()),
        )
    }

    /// A connection context as it exists right after a successful accept.
    pub fn connect(&self, user_id: &str) -> ConnCtx {
        ConnCtx::new(Uuid::new_v4().to_string(), user_id.to_string())
    }
}
