/// Protocol major version, advertised in the mDNS TXT record.
/// Peers with a different major version are filtered out during discovery.
pub const PROTOCOL_VERSION: u8 = 1;

/// Protocol version string for libp2p identify.
pub const IDENTIFY_PROTOCOL: &str = "/rchat/1.0.0";

/// Stream protocol for chat frames (text, receipts, announcements).
pub const MSG_PROTOCOL: &str = "/rchat/msg/1";

/// Stream protocol for content-addressed file transfer.
pub const FILE_PROTOCOL: &str = "/rchat/file/1";

/// Stream protocol tag reserved for the invitation channel. The sealed
/// offers themselves travel over gossipsub topics (see [`invite_topic`]).
pub const INVITE_PROTOCOL: &str = "/rchat/invite/1";

/// mDNS service type advertised and browsed on the local network.
pub const MDNS_SERVICE_TYPE: &str = "_rchat._udp.local.";

/// Gossipsub topic for opportunistic presence pings.
pub const PRESENCE_TOPIC: &str = "presence";

/// XChaCha20-Poly1305 nonce size in bytes.
pub const NONCE_SIZE: usize = 24;

/// Argon2 salt size in bytes.
pub const SALT_SIZE: usize = 16;

/// Maximum size of a single chat frame (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Maximum file transfer size in bytes (50 MiB).
pub const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Maximum sticker size in bytes (1 MiB, WebP only).
pub const MAX_STICKER_SIZE: u64 = 1024 * 1024;

/// Default file transfer chunk size (64 KiB).
pub const FILE_CHUNK_SIZE: u64 = 64 * 1024;

/// File transfer flow-control window (chunks in flight).
pub const FILE_WINDOW: usize = 16;

/// Per-session outbound queue bound; beyond this `send_message` fails
/// with `BackpressureExceeded`.
pub const OUTBOX_CAPACITY: usize = 256;

/// Redial backoff schedule in seconds; the last entry repeats.
pub const BACKOFF_SCHEDULE_SECS: [u64; 5] = [1, 2, 5, 15, 60];

/// Dial timeout in seconds.
pub const DIAL_TIMEOUT_SECS: u64 = 15;

/// Noise handshake timeout in seconds. Bounds the upgrade of an
/// accepted connection that never completes authentication.
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// Per-frame request timeout in seconds.
pub const FRAME_TIMEOUT_SECS: u64 = 10;

/// Per-chunk request timeout in seconds.
pub const CHUNK_TIMEOUT_SECS: u64 = 30;

/// Invitation validity window in seconds (15 minutes).
pub const INVITE_TTL_SECS: i64 = 15 * 60;

/// Presence records older than this are ignored (15 minutes).
pub const PRESENCE_MAX_AGE_SECS: i64 = 15 * 60;

/// Rendezvous publish interval in seconds.
pub const RENDEZVOUS_PUBLISH_SECS: u64 = 60;

/// Invite password length; the 62-symbol alphabet gives > 70 bits.
pub const INVITE_PASSWORD_LEN: usize = 14;

/// GossipSub heartbeat interval in seconds.
pub const GOSSIPSUB_HEARTBEAT_SECS: u64 = 1;

/// Key derivation contexts (BLAKE3).
pub const KDF_CONTEXT_INVITE: &str = "rchat-invite-v1";
pub const KDF_CONTEXT_VAULT: &str = "rchat-vault-v1";

/// Argon2id parameters for the vault KEK (64 MiB, t=3, p=1).
pub const VAULT_KDF_M_COST: u32 = 64 * 1024;
pub const VAULT_KDF_T_COST: u32 = 3;
pub const VAULT_KDF_P_COST: u32 = 1;

/// Gossipsub topic for the invitation channel between two handles.
/// The pair is sorted lexicographically so both sides derive the same name.
pub fn invite_topic(a: &str, b: &str) -> String {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a <= b {
        format!("invite/{a},{b}")
    } else {
        format!("invite/{b},{a}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invite_topic_is_order_independent() {
        assert_eq!(invite_topic("alice", "bob"), invite_topic("bob", "alice"));
        assert_eq!(invite_topic("Alice", "BOB"), "invite/alice,bob");
    }
}
