use tracing::info;

use crate::models::{FileUpdate, SyncError};
use crate::repositories::ShardRepository;
use crate::store::EditorStateCache;

/// What a completed flush actually wrote.
#[derive(Debug, Clone)]
pub struct FlushReport {
    pub files_flushed: usize,
}

/// Flush a room's pending edits into durable storage.
///
/// Reads the pending entry for each of the shard's known files, performs
/// one bulk update plus a sync-timestamp touch through the repository,
/// then deletes exactly the entries it persisted. Deletion is guarded by
/// the entry version, so an edit that lands between the read snapshot and
/// the delete stays pending for the next flush trigger. An empty cache is
/// a no-op that leaves the repository untouched.
pub async fn flush_room(
    room_id: i64,
    cache: &dyn EditorStateCache,
    shards: &dyn ShardRepository,
) -> Result<FlushReport, SyncError> {
    let Some(shard) = shards.find_by_id(room_id).await? else {
        return Err(SyncError::RoomIdNotFound);
    };

    // Snapshot pending entries together with their versions.
    let mut updates = Vec::new();
    let mut snapshots = Vec::new();
    for file in &shard.files {
        if let Some(entry) = cache.get(room_id, &file.name).await? {
            updates.push(FileUpdate {
                name: file.name.clone(),
                code: entry.code,
            });
            snapshots.push((file.name.clone(), entry.version));
        }
    }

    if updates.is_empty() {
        info!("No pending edits for room {}, flush is a no-op", room_id);
        return Ok(FlushReport { files_flushed: 0 });
    }

    shards.update_files_bulk(room_id, &updates).await?;
    shards.update_last_sync_timestamp(room_id).await?;

    // Delete only what this flush persisted; newer edits survive.
    for (name, version) in &snapshots {
        cache.remove_if_version(room_id, name, *version).await?;
    }

    info!("Flushed {} file(s) for room {}", updates.len(), room_id);
    Ok(FlushReport {
        files_flushed: updates.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalEditorCache;
    use crate::testutil::{shard_with_files, MemoryShardRepository};

    #[tokio::test]
    async fn empty_cache_leaves_the_repository_untouched() {
        let cache = LocalEditorCache::new();
        let shards = MemoryShardRepository::new();
        shards.insert(shard_with_files(1, &[("main.py", "")]));

        let report = flush_room(1, &cache, &shards).await.unwrap();

        assert_eq!(report.files_flushed, 0);
        assert!(shards.bulk_updates.lock().unwrap().is_empty());
        assert!(shards.sync_touches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn pending_edits_are_persisted_and_cleared() {
        let cache = LocalEditorCache::new();
        let shards = MemoryShardRepository::new();
        shards.insert(shard_with_files(1, &[("main.py", ""), ("util.py", "")]));

        cache.put(1, "main.py", "x=1").await.unwrap();
        cache.put(1, "util.py", "y=2").await.unwrap();

        let report = flush_room(1, &cache, &shards).await.unwrap();

        assert_eq!(report.files_flushed, 2);
        assert!(cache.get(1, "main.py").await.unwrap().is_none());
        assert!(cache.get(1, "util.py").await.unwrap().is_none());
        assert_eq!(shards.sync_touches.lock().unwrap().as_slice(), &[1]);

        let updates = shards.bulk_updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        let (room, files) = &updates[0];
        assert_eq!(*room, 1);
        assert_eq!(files.len(), 2);
    }

    #[tokio::test]
    async fn files_never_edited_are_not_part_of_the_bulk_update() {
        let cache = LocalEditorCache::new();
        let shards = MemoryShardRepository::new();
        shards.insert(shard_with_files(1, &[("main.py", ""), ("untouched.py", "")]));

        cache.put(1, "main.py", "x=1").await.unwrap();

        flush_room(1, &cache, &shards).await.unwrap();

        let updates = shards.bulk_updates.lock().unwrap();
        let (_, files) = &updates[0];
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "main.py");
    }

    #[tokio::test]
    async fn repository_failure_keeps_edits_pending() {
        let cache = LocalEditorCache::new();
        let shards = MemoryShardRepository::new();
        shards.insert(shard_with_files(1, &[("main.py", "")]));
        shards.fail_bulk_updates();

        cache.put(1, "main.py", "x=1").await.unwrap();

        assert!(flush_room(1, &cache, &shards).await.is_err());
        // Retry happens at the next flush trigger, from the intact cache.
        assert_eq!(cache.get(1, "main.py").await.unwrap().unwrap().code, "x=1");
    }

    #[tokio::test]
    async fn unknown_room_is_an_error() {
        let cache = LocalEditorCache::new();
        let shards = MemoryShardRepository::new();

        let err = flush_room(99, &cache, &shards).await.unwrap_err();
        assert_eq!(err.client_message(), "Room ID Not Found");
    }
}
