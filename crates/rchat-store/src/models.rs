use serde::{Deserialize, Serialize};

use rchat_shared::types::{ContentType, Direction, MessageStatus};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrustedPeer {
    pub id: String,
    pub handle: String,
    pub public_key: Vec<u8>,
    pub added_at: i64,
    pub last_seen: i64,
    pub pinned: bool,
    pub order_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    pub id: String,
    pub name: String,
    pub icon: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: String,
    pub chat_id: String,
    pub direction: Direction,
    pub sender_peer_id: String,
    pub content_type: ContentType,
    pub text: Option<String>,
    pub file_hash: Option<String>,
    pub file_name: Option<String>,
    pub created_at: i64,
    pub status: MessageStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileRecord {
    pub hash: String,
    pub size_bytes: i64,
    pub mime_hint: Option<String>,
    pub local_path: String,
    pub first_seen: i64,
    pub origin: String,
    pub quarantined: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sticker {
    pub file_hash: String,
    pub name: String,
    pub size_bytes: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    pub alias: Option<String>,
    pub avatar_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingInvitation {
    pub nonce: String,
    pub invitee_handle: Option<String>,
    pub password_hash: String,
    pub offer_json: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
    pub state: String,
}
