use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Editing mode of a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardMode {
    Solo,
    Collaboration,
}

impl ShardMode {
    /// Parse the mode column value. Anything unrecognized is treated as solo.
    pub fn from_db(value: &str) -> Self {
        match value {
            "collaboration" => ShardMode::Collaboration,
            _ => ShardMode::Solo,
        }
    }
}

/// A shard: one collaboration room with a set of files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shard {
    pub id: i64,
    pub mode: ShardMode,
    pub last_sync_timestamp: Option<DateTime<Utc>>,
}

/// A single file belonging to a shard.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardFile {
    pub name: String,
    pub code: String,
}

/// Shard together with its files, as loaded for a room join or a flush.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardWithFiles {
    pub shard: Shard,
    pub files: Vec<ShardFile>,
}

/// One file's new content inside a bulk durable update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUpdate {
    pub name: String,
    pub code: String,
}
