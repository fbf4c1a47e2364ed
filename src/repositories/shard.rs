use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::{Postgres, QueryBuilder};
use tracing::info;

use crate::models::{FileUpdate, Shard, ShardFile, ShardMode, ShardWithFiles, SyncError};

/// Durable store of shards and their files.
#[async_trait]
pub trait ShardRepository: Send + Sync {
    /// Load a shard with its files, or `None` if the id is unknown.
    async fn find_by_id(&self, room_id: i64) -> Result<Option<ShardWithFiles>, SyncError>;

    /// Persist new code for several files of one shard in a single
    /// conditional update.
    async fn update_files_bulk(
        &self,
        room_id: i64,
        files: &[FileUpdate],
    ) -> Result<(), SyncError>;

    /// Stamp the shard with the time of its latest durable sync.
    async fn update_last_sync_timestamp(&self, room_id: i64) -> Result<(), SyncError>;
}

#[derive(sqlx::FromRow)]
struct ShardRow {
    id: i64,
    mode: String,
    last_sync_timestamp: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct FileRow {
    name: String,
    code: String,
}

/// Postgres-backed shard repository.
pub struct PgShardRepository {
    pool: PgPool,
}

impl PgShardRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ShardRepository for PgShardRepository {
    async fn find_by_id(&self, room_id: i64) -> Result<Option<ShardWithFiles>, SyncError> {
        let row: Option<ShardRow> = sqlx::query_as(
            "select id, mode, last_sync_timestamp from shards where id = $1",
        )
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let files: Vec<FileRow> =
            sqlx::query_as("select name, code from files where shard_id = $1 order by name")
                .bind(room_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(Some(ShardWithFiles {
            shard: Shard {
                id: row.id,
                mode: ShardMode::from_db(&row.mode),
                last_sync_timestamp: row.last_sync_timestamp,
            },
            files: files
                .into_iter()
                .map(|f| ShardFile {
                    name: f.name,
                    code: f.code,
                })
                .collect(),
        }))
    }

    async fn update_files_bulk(
        &self,
        room_id: i64,
        files: &[FileUpdate],
    ) -> Result<(), SyncError> {
        if files.is_empty() {
            return Ok(());
        }

        // One statement updating every file: case/when on the file name.
        let mut qb = QueryBuilder::<Postgres>::new("update files set code = case name ");
        for file in files {
            qb.push("when ");
            qb.push_bind(&file.name);
            qb.push(" then ");
            qb.push_bind(&file.code);
            qb.push(" ");
        }
        qb.push("end, updated_at = now() where shard_id = ");
        qb.push_bind(room_id);
        qb.push(" and name in (");
        let mut names = qb.separated(", ");
        for file in files {
            names.push_bind(&file.name);
        }
        qb.push(")");

        let result = qb.build().execute(&self.pool).await?;
        info!(
            "Bulk updated {} file(s) for shard {}",
            result.rows_affected(),
            room_id
        );
        Ok(())
    }

    async fn update_last_sync_timestamp(&self, room_id: i64) -> Result<(), SyncError> {
        let result = sqlx::query(
            "update shards set last_sync_timestamp = now(), updated_at = now() where id = $1",
        )
        .bind(room_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SyncError::Internal(format!(
                "shard {} not found for sync timestamp update",
                room_id
            )));
        }
        Ok(())
    }
}
