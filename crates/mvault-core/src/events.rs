//! Event Bus: in-process pub/sub fanned out to WebSocket clients.
//!
//! Best-effort: publishers never block or retry, and a disconnected or
//! lagged subscriber is simply dropped by `broadcast`'s own semantics — a
//! `RecvError::Lagged` subscriber either catches up or is treated as gone.
//! Events are advisory; the Store is the source of truth, so subscribers
//! are expected to reconcile by re-reading on connect.

use serde::Serialize;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

/// Known topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    TaskStarted,
    QueueProgress,
    TaskComplete,
    VerifyProgress,
    AiLookupUpdate,
}

impl Topic {
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::TaskStarted => "task_started",
            Topic::QueueProgress => "queue_progress",
            Topic::TaskComplete => "task_complete",
            Topic::VerifyProgress => "verify_progress",
            Topic::AiLookupUpdate => "ai_lookup_update",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub topic: &'static str,
    pub data: serde_json::Value,
}

/// In-process broadcast bus. Cheaply cloned; every clone shares the same
/// underlying channel.
#[derive(Clone)]
pub struct Bus {
    sender: broadcast::Sender<Event>,
}

impl Default for Bus {
    fn default() -> Self {
        let (sender, _receiver) = broadcast::channel(CHANNEL_CAPACITY);
        Bus { sender }
    }
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an event. No-op if there are currently no subscribers.
    pub fn publish(&self, topic: Topic, data: serde_json::Value) {
        let event = Event {
            topic: topic.as_str(),
            data,
        };
        // `send` only fails when there are no receivers; that's fine here.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = Bus::new();
        bus.publish(Topic::TaskStarted, serde_json::json!({"task_id": 1}));
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = Bus::new();
        let mut rx = bus.subscribe();
        bus.publish(Topic::TaskComplete, serde_json::json!({"task_id": 7, "status": "completed"}));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, "task_complete");
        assert_eq!(event.data["task_id"], 7);
    }

    #[tokio::test]
    async fn dropped_subscriber_does_not_affect_others() {
        let bus = Bus::new();
        let rx1 = bus.subscribe();
        drop(rx1);
        let mut rx2 = bus.subscribe();
        bus.publish(Topic::QueueProgress, serde_json::json!({}));
        assert!(rx2.recv().await.is_ok());
    }
}
