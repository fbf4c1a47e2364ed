use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Errors raised while handling a connection event or a bus message.
///
/// The first three variants are protocol errors with a fixed client-facing
/// message. Everything else is reported to the client as
/// "Unexpected Error Occurred" and logged with full detail server-side.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Room ID Not Found")]
    RoomIdNotFound,

    #[error("Token Not Found")]
    TokenNotFound,

    #[error("User Not Found")]
    UserNotFound,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Internal(String),
}

impl SyncError {
    /// The message surfaced to the client for this error.
    ///
    /// Internal failure detail never crosses the wire.
    pub fn client_message(&self) -> &'static str {
        match self {
            SyncError::RoomIdNotFound => "Room ID Not Found",
            SyncError::TokenNotFound => "Token Not Found",
            SyncError::UserNotFound => "User Not Found",
            SyncError::Database(_) | SyncError::Serialization(_) | SyncError::Internal(_) => {
                "Unexpected Error Occurred"
            }
        }
    }
}

/// Response for an error
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub code: u16,
    pub status: String,
    pub error: String,
}
