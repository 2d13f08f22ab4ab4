//! Fire-and-forget engine events
//!
//! Every event is mirrored to `tracing`; sending succeeds whether or not
//! anybody subscribed.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::training::fit::EpochProgress;

/// Capacity of the broadcast channel; slow subscribers lose the oldest events
pub const EVENT_CAPACITY: usize = 256;

/// Named status transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Initializing,
    Training,
    Storage,
    Comparison,
    Adding,
    Done,
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StatusKind::Initializing => "initializing",
            StatusKind::Training => "training",
            StatusKind::Storage => "storage",
            StatusKind::Comparison => "comparison",
            StatusKind::Adding => "adding",
            StatusKind::Done => "done",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    Status { kind: StatusKind, message: String },
    Epoch(EpochProgress),
}

/// Sending half shared by the engine
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn status(&self, kind: StatusKind, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(status = %kind, "{}", message);
        // No receivers is fine
        let _ = self.sender.send(EngineEvent::Status { kind, message });
    }

    pub fn epoch(&self, progress: &EpochProgress) {
        tracing::debug!(
            "epoch {}/{} loss={:.4} acc={:.4}",
            progress.epoch,
            progress.total_epochs,
            progress.loss,
            progress.accuracy
        );
        let _ = self.sender.send(EngineEvent::Epoch(progress.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_without_subscribers() {
        let bus = EventBus::new();
        bus.status(StatusKind::Storage, "nobody listens");
    }

    #[test]
    fn test_subscriber_receives_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.status(StatusKind::Adding, "first");
        bus.status(StatusKind::Done, "second");

        assert_eq!(
            rx.try_recv().unwrap(),
            EngineEvent::Status { kind: StatusKind::Adding, message: "first".into() }
        );
        assert!(matches!(rx.try_recv().unwrap(), EngineEvent::Status { kind: StatusKind::Done, .. }));
    }

    #[test]
    fn test_event_json_shape() {
        let event = EngineEvent::Status { kind: StatusKind::Comparison, message: "ok".into() };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["kind"], "comparison");
    }
}
