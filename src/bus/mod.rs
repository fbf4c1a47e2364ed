use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::SyncError;

/// Channel carrying edit events.
pub const CHANNEL_EDITS: &str = "event:message";
/// Channel carrying visible-files presence hints.
pub const CHANNEL_VISIBLE_FILES: &str = "event:visible-files";

/// Capacity of each channel. Subscribers that fall behind skip frames
/// (`RecvError::Lagged`); delivery is at-least-once, not guaranteed.
const CHANNEL_CAPACITY: usize = 4096;

/// An event published across gateway instances.
///
/// Each event is self-contained: the room id plus everything needed to
/// reconstruct the client-facing broadcast, so a receiving instance only
/// has to resolve which of its local connections are in the room.
/// `origin` is the publishing connection, letting the owning instance
/// suppress the echo.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BusEvent {
    #[serde(rename = "edit", rename_all = "camelCase")]
    Edit {
        room_id: i64,
        origin: String,
        active_file: String,
        data: String,
    },
    #[serde(rename = "visible-files", rename_all = "camelCase")]
    VisibleFiles {
        room_id: i64,
        origin: String,
        visible_files: Vec<String>,
    },
}

impl BusEvent {
    pub fn room_id(&self) -> i64 {
        match self {
            BusEvent::Edit { room_id, .. } => *room_id,
            BusEvent::VisibleFiles { room_id, .. } => *room_id,
        }
    }
}

/// Publish/subscribe channel fanning events out to every gateway
/// instance. Self-delivery is required: the publishing instance holds no
/// other path to its own local clients.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Serialize the event and deliver it to every current subscriber of
    /// the channel. Publish order per channel and publisher is preserved.
    async fn publish(&self, channel: &str, event: &BusEvent) -> Result<(), SyncError>;

    /// Subscribe to a channel's serialized frames. A frame that fails to
    /// decode must be skipped by the consumer, never ending the stream.
    fn subscribe(&self, channel: &str) -> broadcast::Receiver<String>;
}

/// Process-shared bus backend: one broadcast channel per named channel.
/// One value is constructed at startup and the same handle is injected
/// into every gateway instance.
#[derive(Default)]
pub struct LocalEventBus {
    channels: DashMap<String, broadcast::Sender<String>>,
}

impl LocalEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl EventBus for LocalEventBus {
    async fn publish(&self, channel: &str, event: &BusEvent) -> Result<(), SyncError> {
        let frame = serde_json::to_string(event)?;
        // send() errs only when no subscriber exists; that's fine.
        let _ = self.sender(channel).send(frame);
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        self.sender(channel).subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_receives_including_the_publisher_side() {
        let bus = LocalEventBus::new();
        let mut rx_a = bus.subscribe(CHANNEL_EDITS);
        let mut rx_b = bus.subscribe(CHANNEL_EDITS);

        let event = BusEvent::Edit {
            room_id: 1,
            origin: "c1".to_string(),
            active_file: "main.py".to_string(),
            data: "x=1".to_string(),
        };
        bus.publish(CHANNEL_EDITS, &event).await.unwrap();

        for rx in [&mut rx_a, &mut rx_b] {
            let frame = rx.recv().await.unwrap();
            let decoded: BusEvent = serde_json::from_str(&frame).unwrap();
            assert_eq!(decoded.room_id(), 1);
        }
    }

    #[tokio::test]
    async fn publish_order_is_preserved_per_channel() {
        let bus = LocalEventBus::new();
        let mut rx = bus.subscribe(CHANNEL_EDITS);

        for i in 0..10 {
            let event = BusEvent::Edit {
                room_id: 1,
                origin: "c1".to_string(),
                active_file: "main.py".to_string(),
                data: format!("x={i}"),
            };
            bus.publish(CHANNEL_EDITS, &event).await.unwrap();
        }

        for i in 0..10 {
            let frame = rx.recv().await.unwrap();
            let decoded: BusEvent = serde_json::from_str(&frame).unwrap();
            match decoded {
                BusEvent::Edit { data, .. } => assert_eq!(data, format!("x={i}")),
                other => panic!("wrong kind: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let bus = LocalEventBus::new();
        let mut edits = bus.subscribe(CHANNEL_EDITS);
        let mut hints = bus.subscribe(CHANNEL_VISIBLE_FILES);

        let event = BusEvent::VisibleFiles {
            room_id: 1,
            origin: "c1".to_string(),
            visible_files: vec!["main.py".to_string()],
        };
        bus.publish(CHANNEL_VISIBLE_FILES, &event).await.unwrap();

        assert!(hints.try_recv().is_ok());
        assert!(edits.try_recv().is_err());
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_not_an_error() {
        let bus = LocalEventBus::new();
        let event = BusEvent::Edit {
            room_id: 1,
            origin: "c1".to_string(),
            active_file: "main.py".to_string(),
            data: "x=1".to_string(),
        };
        assert!(bus.publish(CHANNEL_EDITS, &event).await.is_ok());
    }
}
