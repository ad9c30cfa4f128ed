use std::collections::HashMap;

use rchat_shared::protocol::{new_msg_id, FrameBody};
use rchat_shared::types::{now_unix, ContentType, Direction, MessageStatus, SELF_CHAT};
use rchat_store::ChatMessage;

use crate::error::NodeError;
use crate::events::Event;
use crate::node::Node;
use crate::session::OutboundFrame;

impl Node {
    /// Send a text message to a trusted peer. The message id is returned
    /// immediately; delivery progresses through the status events.
    pub async fn send_message(&self, peer_id: &str, message: &str) -> Result<String, NodeError> {
        if peer_id == SELF_CHAT {
            return self.insert_self_message(ContentType::Text, Some(message), None, None).await;
        }

        let me = self.local_peer_str().await?;
        if !self.store()?.is_peer(peer_id) {
            return Err(NodeError::UnknownPeer(peer_id.to_string()));
        }

        let msg_id = new_msg_id();
        let row = ChatMessage {
            id: msg_id.clone(),
            chat_id: peer_id.to_string(),
            direction: Direction::Out,
            sender_peer_id: me,
            content_type: ContentType::Text,
            text: Some(message.to_string()),
            file_hash: None,
            file_name: None,
            created_at: now_unix(),
            status: MessageStatus::Pending,
        };
        self.store()?.insert_message(&row)?;
        self.inner.events.emit(Event::MessageStatusUpdated {
            msg_id: msg_id.clone(),
            chat_id: peer_id.to_string(),
            status: MessageStatus::Pending.as_str().to_string(),
        });

        let frame = OutboundFrame {
            msg_id: msg_id.clone(),
            chat_id: peer_id.to_string(),
            body: FrameBody::Text {
                text: message.to_string(),
            },
            track_status: true,
        };
        if let Err(e) = self.inner.sessions.enqueue(peer_id, frame) {
            // The queue refused the frame; roll the insert back so the
            // caller sees a clean failure.
            let _ = self.store()?.delete_message(&msg_id);
            return Err(e);
        }

        Ok(msg_id)
    }

    /// Note-to-self: stored locally, never leaves the node, always read.
    pub async fn send_message_to_self(&self, message: &str) -> Result<(), NodeError> {
        self.insert_self_message(ContentType::Text, Some(message), None, None)
            .await?;
        Ok(())
    }

    pub(crate) async fn insert_self_message(
        &self,
        content_type: ContentType,
        text: Option<&str>,
        file_hash: Option<String>,
        file_name: Option<String>,
    ) -> Result<String, NodeError> {
        let me = self.local_peer_str().await?;
        let msg_id = new_msg_id();
        let row = ChatMessage {
            id: msg_id.clone(),
            chat_id: SELF_CHAT.to_string(),
            direction: Direction::Out,
            sender_peer_id: me,
            content_type,
            text: text.map(str::to_string),
            file_hash,
            file_name,
            created_at: now_unix(),
            status: MessageStatus::Read,
        };
        self.store()?.insert_message(&row)?;
        Ok(msg_id)
    }

    /// Full history of a chat, ordered by message id (send order).
    pub async fn get_chat_history(&self, chat_id: &str) -> Result<Vec<ChatMessage>, NodeError> {
        Ok(self.store()?.get_chat_history(chat_id)?)
    }

    pub async fn get_chat_latest_times(&self) -> Result<HashMap<String, i64>, NodeError> {
        Ok(self.store()?.get_chat_latest_times()?)
    }

    pub async fn get_unread_counts(&self) -> Result<HashMap<String, i64>, NodeError> {
        Ok(self.store()?.get_unread_counts()?)
    }

    /// The chat view is focused: mark inbound messages read and owe the
    /// peer a read receipt for each.
    pub async fn mark_messages_read(&self, chat_id: &str) -> Result<(), NodeError> {
        let marked = self.store()?.mark_chat_read(chat_id)?;
        if marked.is_empty() {
            return Ok(());
        }

        for msg_id in &marked {
            self.inner.events.emit(Event::MessageStatusUpdated {
                msg_id: msg_id.clone(),
                chat_id: chat_id.to_string(),
                status: MessageStatus::Read.as_str().to_string(),
            });
        }

        if chat_id != SELF_CHAT && self.store()?.is_peer(chat_id) {
            let frame = OutboundFrame {
                msg_id: new_msg_id(),
                chat_id: chat_id.to_string(),
                body: FrameBody::ReadAck { msg_ids: marked },
                track_status: false,
            };
            if let Err(e) = self.inner.sessions.enqueue(chat_id, frame) {
                tracing::debug!(chat = %chat_id, error = %e, "read ack not queued");
            }
        }
        Ok(())
    }
}
