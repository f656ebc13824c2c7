//! Domain event system — decoupled communication between bounded contexts.
//!
//! Events are published when something interesting happens in the system.
//! Other components can subscribe to react without tight coupling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// A participant joined a room
    MemberJoined {
        room_id: String,
        display_name: String,
        member_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A participant left a room
    MemberLeft {
        room_id: String,
        display_name: String,
        member_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A join was rejected because the room was at capacity
    RoomFull {
        room_id: String,
        timestamp: DateTime<Utc>,
    },

    /// The oldest non-system message was evicted from a context window
    ContextEvicted {
        room_id: String,
        reason: String,
        tokens_dropped: usize,
        remaining_messages: usize,
        timestamp: DateTime<Utc>,
    },

    /// A backend call was started for a room
    GenerationStarted {
        room_id: String,
        context_messages: usize,
        timestamp: DateTime<Utc>,
    },

    /// A backend call completed and its reply was appended
    GenerationCompleted {
        room_id: String,
        reply_chars: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A backend call failed; nothing was appended
    GenerationFailed {
        room_id: String,
        kind: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MemberJoined { .. } => "member_joined",
            Self::MemberLeft { .. } => "member_left",
            Self::RoomFull { .. } => "room_full",
            Self::ContextEvicted { .. } => "context_evicted",
            Self::GenerationStarted { .. } => "generation_started",
            Self::GenerationCompleted { .. } => "generation_completed",
            Self::GenerationFailed { .. } => "generation_failed",
        }
    }
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// Components can subscribe to receive all events and filter for what they care about.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::ContextEvicted {
            room_id: "r1".into(),
            reason: "max_messages".into(),
            tokens_dropped: 3,
            remaining_messages: 20,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::ContextEvicted {
                room_id, reason, ..
            } => {
                assert_eq!(room_id, "r1");
                assert_eq!(reason, "max_messages");
            }
            _ => panic!("Expected ContextEvicted event"),
        }
        assert_eq!(event.event_type(), "context_evicted");
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::RoomFull {
            room_id: "r1".into(),
            timestamp: Utc::now(),
        });
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = DomainEvent::GenerationStarted {
            room_id: "r1".into(),
            context_messages: 2,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"generation_started""#));
    }
}
