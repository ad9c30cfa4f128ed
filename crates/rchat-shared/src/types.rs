use serde::{Deserialize, Serialize};

/// Chat id of the local "note to self" conversation. Messages in this chat
/// never leave the node.
pub const SELF_CHAT: &str = "self";

/// Message payload classification, stored with each chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Image,
    Document,
    Video,
    Sticker,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Image => "image",
            ContentType::Document => "document",
            ContentType::Video => "video",
            ContentType::Sticker => "sticker",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "text" => Some(ContentType::Text),
            "image" => Some(ContentType::Image),
            "document" => Some(ContentType::Document),
            "video" => Some(ContentType::Video),
            "sticker" => Some(ContentType::Sticker),
            _ => None,
        }
    }
}

/// Delivery state of a chat message.
///
/// Transitions are monotone along `pending -> sent -> delivered -> read`;
/// `failed` is a terminal sink reachable only from `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MessageStatus::Pending),
            "sent" => Some(MessageStatus::Sent),
            "delivered" => Some(MessageStatus::Delivered),
            "read" => Some(MessageStatus::Read),
            "failed" => Some(MessageStatus::Failed),
            _ => None,
        }
    }

    /// Position in the status partial order. `failed` sits outside the
    /// chain and is handled separately by [`MessageStatus::can_advance_to`].
    fn rank(&self) -> u8 {
        match self {
            MessageStatus::Pending => 0,
            MessageStatus::Sent => 1,
            MessageStatus::Delivered => 2,
            MessageStatus::Read => 3,
            MessageStatus::Failed => 0,
        }
    }

    /// Whether a transition from `self` to `next` moves strictly forward.
    pub fn can_advance_to(&self, next: MessageStatus) -> bool {
        match next {
            MessageStatus::Failed => *self == MessageStatus::Pending,
            _ => !matches!(self, MessageStatus::Failed) && next.rank() > self.rank(),
        }
    }
}

/// Whether a message was sent or received by this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Out,
    In,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Out => "out",
            Direction::In => "in",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "out" => Some(Direction::Out),
            "in" => Some(Direction::In),
            _ => None,
        }
    }
}

/// Current unix time in seconds.
pub fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_are_monotone() {
        use MessageStatus::*;

        assert!(Pending.can_advance_to(Sent));
        assert!(Pending.can_advance_to(Delivered));
        assert!(Sent.can_advance_to(Delivered));
        assert!(Delivered.can_advance_to(Read));

        assert!(!Sent.can_advance_to(Pending));
        assert!(!Delivered.can_advance_to(Sent));
        assert!(!Read.can_advance_to(Delivered));
        assert!(!Read.can_advance_to(Read));
    }

    #[test]
    fn failed_only_from_pending() {
        use MessageStatus::*;

        assert!(Pending.can_advance_to(Failed));
        assert!(!Sent.can_advance_to(Failed));
        assert!(!Delivered.can_advance_to(Failed));
        assert!(!Read.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(Sent));
    }

    #[test]
    fn status_string_roundtrip() {
        for s in ["pending", "sent", "delivered", "read", "failed"] {
            assert_eq!(MessageStatus::from_str(s).unwrap().as_str(), s);
        }
        assert!(MessageStatus::from_str("bogus").is_none());
    }
}
