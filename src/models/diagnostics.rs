use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Runtime diagnostics for one gateway instance
#[derive(Serialize, Deserialize, ToSchema)]
pub struct DiagnosticsResponse {
    /// Live client connections on this instance
    pub n_conn: u32,
    /// Rooms with at least one local subscriber
    pub n_rooms: u32,
    /// Entries in the resolved-user cache
    pub n_user_ctx: u32,
    pub cpu_usage: f32,
    pub memory_alloc: u64,
    pub memory_total: u64,
    pub memory_free: u64,
}
