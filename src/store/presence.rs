use async_trait::async_trait;
use dashmap::DashMap;

use crate::models::SyncError;

/// Shared record of which users are joined to which room.
///
/// This is the single source of truth for room membership: gateway
/// instances never keep their own membership tables. Every mutation is
/// atomic per room key, so concurrent joins and leaves from different
/// instances cannot lose updates. The store also holds the reverse
/// connection-to-room mapping used to resolve, on disconnect, which room
/// a connection belonged to.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Append a user to the room's member list. Returns the new length.
    ///
    /// A user holding several connections appears once per connection;
    /// join order is preserved.
    async fn push(&self, room_id: i64, user_id: &str) -> Result<u64, SyncError>;

    /// Remove exactly one occurrence of the user from the room's member
    /// list and return the post-removal length in the same atomic step.
    /// The 1-to-0 transition is therefore observed by exactly one caller.
    async fn remove_one(&self, room_id: i64, user_id: &str) -> Result<u64, SyncError>;

    /// Current member count for the room.
    async fn len(&self, room_id: i64) -> Result<u64, SyncError>;

    /// Current member list for the room, in join order.
    async fn members(&self, room_id: i64) -> Result<Vec<String>, SyncError>;

    /// Drop the presence key for the room.
    async fn delete(&self, room_id: i64) -> Result<(), SyncError>;

    /// Record which room a connection is joined to.
    async fn set_connection_room(&self, conn_id: &str, room_id: i64) -> Result<(), SyncError>;

    /// Resolve the room a connection is joined to, if any.
    async fn connection_room(&self, conn_id: &str) -> Result<Option<i64>, SyncError>;

    /// Drop the connection-to-room record.
    async fn clear_connection_room(&self, conn_id: &str) -> Result<(), SyncError>;
}

/// Process-shared presence backend.
///
/// One value is constructed at startup and the same handle is injected
/// into every gateway instance, making it the shared coordination medium.
/// Per-key atomicity comes from the map's entry guards.
#[derive(Default)]
pub struct LocalPresenceStore {
    rooms: DashMap<i64, Vec<String>>,
    connections: DashMap<String, i64>,
}

impl LocalPresenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceStore for LocalPresenceStore {
    async fn push(&self, room_id: i64, user_id: &str) -> Result<u64, SyncError> {
        let mut members = self.rooms.entry(room_id).or_default();
        members.push(user_id.to_string());
        Ok(members.len() as u64)
    }

    async fn remove_one(&self, room_id: i64, user_id: &str) -> Result<u64, SyncError> {
        match self.rooms.get_mut(&room_id) {
            Some(mut members) => {
                if let Some(pos) = members.iter().position(|m| m == user_id) {
                    members.remove(pos);
                }
                Ok(members.len() as u64)
            }
            None => Ok(0),
        }
    }

    async fn len(&self, room_id: i64) -> Result<u64, SyncError> {
        Ok(self.rooms.get(&room_id).map_or(0, |m| m.len() as u64))
    }

    async fn members(&self, room_id: i64) -> Result<Vec<String>, SyncError> {
        Ok(self.rooms.get(&room_id).map(|m| m.clone()).unwrap_or_default())
    }

    async fn delete(&self, room_id: i64) -> Result<(), SyncError> {
        self.rooms.remove(&room_id);
        Ok(())
    }

    async fn set_connection_room(&self, conn_id: &str, room_id: i64) -> Result<(), SyncError> {
        self.connections.insert(conn_id.to_string(), room_id);
        Ok(())
    }

    async fn connection_room(&self, conn_id: &str) -> Result<Option<i64>, SyncError> {
        Ok(self.connections.get(conn_id).map(|r| *r))
    }

    async fn clear_connection_room(&self, conn_id: &str) -> Result<(), SyncError> {
        self.connections.remove(conn_id);
        Ok(())
    }
}
