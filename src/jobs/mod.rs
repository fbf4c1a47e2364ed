use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};

use crate::models::SyncError;
use crate::repositories::ShardRepository;
use crate::services::flush_room;
use crate::store::EditorStateCache;

/// Job name for flushing a room's pending edits.
pub const JOB_FLUSH: &str = "job:flush";

#[derive(Debug, Clone)]
pub struct FlushJob {
    pub room_id: i64,
}

/// Outcome of one processed job. Observability only: the gateway logs
/// these, and nothing in the sync core depends on receiving them.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Completed { room_id: i64, files_flushed: usize },
    Failed { room_id: i64, reason: String },
}

/// Fire-and-forget trigger for the durable write of a room's pending
/// edits. No acknowledgement contract; the consumer runs asynchronously.
#[async_trait]
pub trait FlushQueue: Send + Sync {
    async fn enqueue_flush(&self, room_id: i64) -> Result<(), SyncError>;
}

/// Queue handle feeding the in-process flush worker.
pub struct LocalFlushQueue {
    tx: mpsc::UnboundedSender<FlushJob>,
}

#[async_trait]
impl FlushQueue for LocalFlushQueue {
    async fn enqueue_flush(&self, room_id: i64) -> Result<(), SyncError> {
        info!("Enqueueing {} for room {}", JOB_FLUSH, room_id);
        self.tx
            .send(FlushJob { room_id })
            .map_err(|_| SyncError::Internal("flush worker is not running".to_string()))
    }
}

/// Spawn the flush worker and return the queue handle plus an outcome
/// subscription. A failed job never stops the worker; the room's edits
/// stay cached and the next trigger retries them.
pub fn spawn_flush_worker(
    cache: Arc<dyn EditorStateCache>,
    shards: Arc<dyn ShardRepository>,
) -> (Arc<LocalFlushQueue>, broadcast::Receiver<JobOutcome>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<FlushJob>();
    let (outcome_tx, outcome_rx) = broadcast::channel(256);

    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            info!("Processing {} for room {}", JOB_FLUSH, job.room_id);
            let outcome = match flush_room(job.room_id, cache.as_ref(), shards.as_ref()).await {
                Ok(report) => JobOutcome::Completed {
                    room_id: job.room_id,
                    files_flushed: report.files_flushed,
                },
                Err(e) => JobOutcome::Failed {
                    room_id: job.room_id,
                    reason: e.to_string(),
                },
            };
            // Nobody listening is fine.
            let _ = outcome_tx.send(outcome);
        }
    });

    (Arc::new(LocalFlushQueue { tx }), outcome_rx)
}

/// Log job outcomes as they arrive. Spawned once at startup.
pub async fn log_outcomes(mut outcomes: broadcast::Receiver<JobOutcome>) {
    loop {
        match outcomes.recv().await {
            Ok(JobOutcome::Completed {
                room_id,
                files_flushed,
            }) => info!(
                "{} completed for room {} ({} file(s))",
                JOB_FLUSH, room_id, files_flushed
            ),
            Ok(JobOutcome::Failed { room_id, reason }) => {
                error!("{} failed for room {}: {}", JOB_FLUSH, room_id, reason)
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                error!("Job outcome logger lagged, skipped {} outcome(s)", n)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalEditorCache;
    use crate::testutil::{shard_with_files, MemoryShardRepository};
    use std::time::Duration;
    use tokio::time::timeout;

    async fn next_outcome(rx: &mut broadcast::Receiver<JobOutcome>) -> JobOutcome {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("no job outcome arrived")
            .unwrap()
    }

    #[tokio::test]
    async fn worker_flushes_enqueued_rooms() {
        let cache = Arc::new(LocalEditorCache::new());
        let shards = Arc::new(MemoryShardRepository::new());
        shards.insert(shard_with_files(1, &[("main.py", "")]));
        cache.put(1, "main.py", "x=1").await.unwrap();

        let (queue, mut outcomes) = spawn_flush_worker(cache.clone(), shards.clone());
        queue.enqueue_flush(1).await.unwrap();

        match next_outcome(&mut outcomes).await {
            JobOutcome::Completed {
                room_id,
                files_flushed,
            } => {
                assert_eq!(room_id, 1);
                assert_eq!(files_flushed, 1);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(cache.get(1, "main.py").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn a_failed_job_does_not_stop_the_worker() {
        let cache = Arc::new(LocalEditorCache::new());
        let shards = Arc::new(MemoryShardRepository::new());
        shards.insert(shard_with_files(1, &[("main.py", "")]));
        cache.put(1, "main.py", "x=1").await.unwrap();

        let (queue, mut outcomes) = spawn_flush_worker(cache.clone(), shards.clone());

        // Unknown room fails, then a valid room still gets flushed.
        queue.enqueue_flush(99).await.unwrap();
        queue.enqueue_flush(1).await.unwrap();

        match next_outcome(&mut outcomes).await {
            JobOutcome::Failed { room_id, .. } => assert_eq!(room_id, 99),
            other => panic!("unexpected outcome: {other:?}"),
        }
        match next_outcome(&mut outcomes).await {
            JobOutcome::Completed { room_id, .. } => assert_eq!(room_id, 1),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
