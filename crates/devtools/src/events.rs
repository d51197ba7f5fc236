//! Lifecycle Bus - session open/close notifications
//!
//! Not protocol events (those go through the registry). This is for the
//! embedder: "the session you were holding just went away, and why".

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Why a session closed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// `close()` was called
    Local,
    /// Remote end closed the connection
    RemoteClosed,
    /// Transport failed underneath us
    TransportFailed(String),
}

/// Session lifecycle events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    Opened { session_id: String },
    Closed { session_id: String, reason: CloseReason },
}

/// Broadcast bus for [`SessionEvent`]s
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    /// Publish an event
    pub fn publish(&self, event: SessionEvent) {
        let _ = self.tx.send(event); // Ignore error if no subscribers
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_sees_close_reason() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(SessionEvent::Closed {
            session_id: "s1".to_string(),
            reason: CloseReason::RemoteClosed,
        });

        match rx.recv().await {
            Ok(SessionEvent::Closed { session_id, reason }) => {
                assert_eq!(session_id, "s1");
                assert_eq!(reason, CloseReason::RemoteClosed);
            }
            other => panic!("Expected Closed event, got {:?}", other),
        }
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = EventBus::default();
        bus.publish(SessionEvent::Opened {
            session_id: "s1".to_string(),
        });
    }
}
