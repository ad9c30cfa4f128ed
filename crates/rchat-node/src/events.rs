//! Typed event stream consumed by the UI process.
//!
//! Events are fire-and-forget: the bus never blocks a producer, and a
//! subscriber that falls behind loses the oldest events. Ordering is
//! preserved per event type but not across types.

use serde::Serialize;
use tokio::sync::broadcast;

use rchat_store::ChatMessage;

/// Everything the core pushes to the UI, serialized by tag.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Event {
    AuthStatus {
        is_setup: bool,
        is_unlocked: bool,
        is_online: bool,
    },
    LocalPeerDiscovered {
        peer_id: String,
        addrs: Vec<String>,
    },
    LocalPeerExpired {
        peer_id: String,
    },
    PeerConnected {
        peer_id: String,
    },
    PeerDisconnected {
        peer_id: String,
    },
    MessageReceived {
        message: ChatMessage,
    },
    MessageStatusUpdated {
        msg_id: String,
        chat_id: String,
        status: String,
    },
    FileTransferProgress {
        file_hash: String,
        bytes_done: u64,
        total: u64,
    },
    FileTransferComplete {
        file_hash: String,
    },
    FileTransferFailed {
        file_hash: String,
        reason: String,
    },
}

const EVENT_BUFFER: usize = 1024;

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER);
        Self { tx }
    }

    /// Emit an event. Never blocks; a send with no subscribers is fine.
    pub fn emit(&self, event: Event) {
        tracing::trace!(event = ?event, "emit");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
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
    async fn events_reach_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(Event::PeerConnected {
            peer_id: "12D3KooWtest".into(),
        });

        match rx.recv().await.unwrap() {
            Event::PeerConnected { peer_id } => assert_eq!(peer_id, "12D3KooWtest"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.emit(Event::LocalPeerExpired {
            peer_id: "gone".into(),
        });
    }

    #[test]
    fn events_serialize_with_kebab_case_tags() {
        let json = serde_json::to_string(&Event::AuthStatus {
            is_setup: true,
            is_unlocked: false,
            is_online: false,
        })
        .unwrap();
        assert!(json.contains("\"type\":\"auth-status\""));

        let json = serde_json::to_string(&Event::MessageStatusUpdated {
            msg_id: "m".into(),
            chat_id: "c".into(),
            status: "delivered".into(),
        })
        .unwrap();
        assert!(json.contains("\"type\":\"message-status-updated\""));
    }
}
