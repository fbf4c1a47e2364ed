/// Per-connection context, owned by the connection's socket task.
///
/// Ephemeral: created after the auth token resolves, destroyed on
/// disconnect, never persisted. `room_id` mirrors the store's
/// connection-to-room mapping for the happy path; the store stays
/// authoritative for cleanup.
#[derive(Clone, Debug)]
pub struct ConnCtx {
    pub conn_id: String,
    pub user_id: String,
    pub room_id: Option<i64>,
}

impl ConnCtx {
    pub fn new(conn_id: String, user_id: String) -> Self {
        Self {
            conn_id,
            user_id,
            room_id: None,
        }
    }
}
