pub mod connctx;

pub use connctx::ConnCtx;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use moka::sync::Cache;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::auth::auth;
use crate::bus::{BusEvent, EventBus, CHANNEL_EDITS, CHANNEL_VISIBLE_FILES};
use crate::jobs::FlushQueue;
use crate::models::{
    EditPayload, RoomBroadcast, ServerEvent, SyncError, User, VisibleFilesPayload,
};
use crate::repositories::{ShardRepository, UserRepository};
use crate::store::{EditorStateCache, PresenceStore};

/// Capacity of each room's local broadcast group.
const ROOM_CHANNEL_CAPACITY: usize = 1024;

/// Per-instance component owning live client connections.
///
/// Authenticates connections, joins rooms, applies and forwards edits,
/// and drives depopulation cleanup. All authoritative state (presence,
/// pending edits) lives in the injected shared store; the gateway keeps
/// only socket-scoped state: the per-room broadcast groups feeding its
/// locally-connected clients.
pub struct Gateway {
    presence: Arc<dyn PresenceStore>,
    cache: Arc<dyn EditorStateCache>,
    bus: Arc<dyn EventBus>,
    shards: Arc<dyn ShardRepository>,
    users: Arc<dyn UserRepository>,
    flush_queue: Arc<dyn FlushQueue>,
    jwt_secret: Option<String>,
    /// Resolved users, keyed by uid.
    user_cache: Cache<String, User>,
    /// Local broadcast group per room: everything a bus event needs to
    /// reach this instance's members of that room.
    rooms: DashMap<i64, broadcast::Sender<RoomBroadcast>>,
    connected: AtomicU32,
}

impl Gateway {
    pub fn new(
        presence: Arc<dyn PresenceStore>,
        cache: Arc<dyn EditorStateCache>,
        bus: Arc<dyn EventBus>,
        shards: Arc<dyn ShardRepository>,
        users: Arc<dyn UserRepository>,
        flush_queue: Arc<dyn FlushQueue>,
        jwt_secret: Option<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            presence,
            cache,
            bus,
            shards,
            users,
            flush_queue,
            jwt_secret,
            user_cache: Cache::builder()
                .max_capacity(100_000)
                .time_to_idle(Duration::from_secs(5 * 60))
                .build(),
            rooms: DashMap::new(),
            connected: AtomicU32::new(0),
        })
    }

    /// Resolve a connection's auth token to a user.
    ///
    /// Must succeed before any room-affecting operation; failures carry
    /// `TOKEN_NOT_FOUND` or `USER_NOT_FOUND` to the client.
    pub async fn accept(&self, token: Option<&str>) -> Result<User, SyncError> {
        let token = token.ok_or(SyncError::TokenNotFound)?;
        let secret = self
            .jwt_secret
            .as_deref()
            .ok_or_else(|| SyncError::Internal("auth JWT secret not configured".to_string()))?;

        let uid = auth::decode_user_id(token, secret)?;

        if let Some(user) = self.user_cache.get(&uid) {
            return Ok(user);
        }

        info!("User cache miss for uid {}. Loading from repository.", uid);
        let user = self
            .users
            .find_by_id(&uid)
            .await?
            .ok_or(SyncError::UserNotFound)?;
        self.user_cache.insert(uid, user.clone());
        Ok(user)
    }

    /// Join a connection to a room.
    ///
    /// An unknown room surfaces `ROOM_ID_NOT_FOUND` with no state
    /// mutated. Otherwise the user is appended to the room's shared
    /// presence list, the connection-to-room mapping is recorded, and the
    /// connection is attached to this instance's broadcast group for the
    /// room via the returned receiver.
    pub async fn join(
        &self,
        ctx: &mut ConnCtx,
        room_id: i64,
    ) -> Result<broadcast::Receiver<RoomBroadcast>, SyncError> {
        if ctx.room_id.is_some() {
            return Err(SyncError::Internal(format!(
                "connection {} already joined a room",
                ctx.conn_id
            )));
        }

        if self.shards.find_by_id(room_id).await?.is_none() {
            warn!("Join rejected: room {} not found", room_id);
            return Err(SyncError::RoomIdNotFound);
        }

        let members = self.presence.push(room_id, &ctx.user_id).await?;
        self.presence
            .set_connection_room(&ctx.conn_id, room_id)
            .await?;
        let rx = self.subscribe_room(room_id);
        ctx.room_id = Some(room_id);

        info!(
            "User {} joined room {} ({} member(s))",
            ctx.user_id, room_id, members
        );
        Ok(rx)
    }

    /// Buffer an edit and fan it out to every instance.
    ///
    /// The cache write is an unconditional overwrite: last write wins,
    /// decided by the store's write order.
    pub async fn on_edit(&self, ctx: &ConnCtx, payload: &EditPayload) -> Result<(), SyncError> {
        self.ensure_joined(ctx, payload.room_id).await?;

        self.cache
            .put(payload.room_id, &payload.active_file, &payload.data)
            .await?;

        let event = BusEvent::Edit {
            room_id: payload.room_id,
            origin: ctx.conn_id.clone(),
            active_file: payload.active_file.clone(),
            data: payload.data.clone(),
        };
        self.bus.publish(CHANNEL_EDITS, &event).await
    }

    /// Fan out which files a user currently has open. Never cached,
    /// never persisted.
    pub async fn on_visible_files(
        &self,
        ctx: &ConnCtx,
        payload: &VisibleFilesPayload,
    ) -> Result<(), SyncError> {
        self.ensure_joined(ctx, payload.room_id).await?;

        let event = BusEvent::VisibleFiles {
            room_id: payload.room_id,
            origin: ctx.conn_id.clone(),
            visible_files: payload.visible_files.clone(),
        };
        self.bus.publish(CHANNEL_VISIBLE_FILES, &event).await
    }

    /// Tear down a connection's presence.
    ///
    /// Removes one occurrence of the user from the room's member list.
    /// When the room empties, exactly one flush is requested and the
    /// presence key is dropped; pending-edit keys are cleared by the
    /// flush itself once their content is durable.
    pub async fn on_disconnect(&self, ctx: &ConnCtx) -> Result<(), SyncError> {
        let Some(room_id) = self.presence.connection_room(&ctx.conn_id).await? else {
            return Ok(());
        };
        self.presence.clear_connection_room(&ctx.conn_id).await?;

        let remaining = self.presence.remove_one(room_id, &ctx.user_id).await?;
        info!(
            "User {} left room {} ({} member(s) remain)",
            ctx.user_id, room_id, remaining
        );

        if remaining == 0 {
            info!("Room {} depopulated, requesting flush", room_id);
            self.flush_queue.enqueue_flush(room_id).await?;
            self.presence.delete(room_id).await?;
        }

        self.prune_room(room_id);
        Ok(())
    }

    /// Spawn one forwarder per bus channel. Each delivers the channel's
    /// events to this instance's local members of the tagged room. A
    /// frame that fails to decode is dropped without stopping delivery.
    pub fn spawn_bus_forwarders(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        [CHANNEL_EDITS, CHANNEL_VISIBLE_FILES]
            .into_iter()
            .map(|channel| {
                let gateway = Arc::clone(self);
                let mut rx = gateway.bus.subscribe(channel);
                tokio::spawn(async move {
                    loop {
                        match rx.recv().await {
                            Ok(frame) => gateway.dispatch_frame(&frame),
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!(
                                    "Bus subscriber on {} lagged, skipped {} frame(s)",
                                    channel, n
                                )
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                })
            })
            .collect()
    }

    fn dispatch_frame(&self, frame: &str) {
        let event: BusEvent = match serde_json::from_str(frame) {
            Ok(event) => event,
            Err(e) => {
                error!("Dropping undecodable bus frame: {}", e);
                return;
            }
        };

        let (room_id, origin, server_event) = match event {
            BusEvent::Edit {
                room_id,
                origin,
                active_file,
                data,
            } => (room_id, origin, ServerEvent::Message { active_file, data }),
            BusEvent::VisibleFiles {
                room_id,
                origin,
                visible_files,
            } => (
                room_id,
                origin,
                ServerEvent::SyncVisibleFiles { visible_files },
            ),
        };

        if let Some(tx) = self.rooms.get(&room_id) {
            // No local members is fine; other instances handle theirs.
            let _ = tx.send(RoomBroadcast {
                origin,
                event: server_event,
            });
        }
    }

    async fn ensure_joined(&self, ctx: &ConnCtx, room_id: i64) -> Result<(), SyncError> {
        match self.presence.connection_room(&ctx.conn_id).await? {
            Some(joined) if joined == room_id => Ok(()),
            _ => Err(SyncError::Internal(format!(
                "connection {} is not joined to room {}",
                ctx.conn_id, room_id
            ))),
        }
    }

    fn subscribe_room(&self, room_id: i64) -> broadcast::Receiver<RoomBroadcast> {
        self.rooms
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(ROOM_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    fn prune_room(&self, room_id: i64) {
        self.rooms
            .remove_if(&room_id, |_, tx| tx.receiver_count() == 0);
    }

    // Diagnostics counters, local to this instance.

    pub fn connection_opened(&self) {
        self.connected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connected.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connection_count(&self) -> u32 {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn local_room_count(&self) -> u32 {
        self.rooms.len() as u32
    }

    pub fn user_cache_entries(&self) -> u32 {
        self.user_cache.entry_count() as u32
    }
}
