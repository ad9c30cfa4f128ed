//! Wire formats for the three rchat protocols.
//!
//! `/rchat/msg/1` carries [`MsgFrame`] / [`MsgAck`], `/rchat/file/1` carries
//! [`FileRequest`] / [`FileResponse`] (both CBOR via the transport's
//! request-response codec), and the invitation channel moves
//! [`SealedInvite`] blobs over gossipsub and the rendezvous directory.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroize;

use crate::constants::{INVITE_TTL_SECS, KDF_CONTEXT_INVITE, PRESENCE_MAX_AGE_SECS};
use crate::crypto::{self, KdfParams};
use crate::error::{CryptoError, IdentityError, ProtocolError};
use crate::identity::{self, Identity};
use crate::types::{now_unix, ContentType};

/// Generate a fresh message id: UUIDv7, time-sortable and monotone within
/// a sender, globally unique across both endpoints.
pub fn new_msg_id() -> String {
    Uuid::now_v7().to_string()
}

// ---------------------------------------------------------------------------
// /rchat/msg/1
// ---------------------------------------------------------------------------

/// One frame on the chat protocol. `seq` is the per-session sequence
/// number used for replay rejection; `msg_id` identifies the message for
/// receipts and idempotent storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsgFrame {
    pub seq: u64,
    pub msg_id: String,
    pub body: FrameBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReceiptStatus {
    Delivered,
    Read,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FrameBody {
    Text {
        text: String,
    },
    FileAnnounce {
        file_hash: String,
        size: u64,
        mime_hint: String,
        file_name: String,
        content_type: ContentType,
    },
    Receipt {
        refers_to: String,
        status: ReceiptStatus,
    },
    ReadAck {
        msg_ids: Vec<String>,
    },
    Typing,
    ProfileHint {
        alias: Option<String>,
    },
    /// Invitation acceptance, sent by the invitee over the first
    /// authenticated connection. `signature` covers the invite nonce with
    /// the invitee's identity key.
    InviteAccept {
        handle: String,
        public_key: [u8; 32],
        nonce: [u8; 16],
        signature: Vec<u8>,
    },
}

/// Transport-level acknowledgement of a frame. A frame from an untrusted
/// peer is dropped without any ack at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsgAck {
    pub msg_id: String,
    pub accepted: bool,
}

// ---------------------------------------------------------------------------
// /rchat/file/1
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FileRequest {
    /// Open a transfer: ask for the size and chunk size of a blob,
    /// starting at `offset` (non-zero to resume).
    Header { file_hash: String, offset: u64 },
    /// Fetch one chunk by index (offset = index * chunk_size).
    Chunk { file_hash: String, index: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FileResponse {
    Header { size: u64, chunk_size: u64 },
    Chunk { index: u64, bytes: Vec<u8> },
    NotFound,
}

// ---------------------------------------------------------------------------
// Presence records (rendezvous directory + presence topic)
// ---------------------------------------------------------------------------

/// A signed claim that `peer_id` is reachable at `addrs`.
///
/// The directory hosting these is untrusted; verification checks the
/// Ed25519 signature against the embedded key and that the key actually
/// derives the claimed PeerID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub peer_id: String,
    pub public_key: [u8; 32],
    pub addrs: Vec<String>,
    pub issued_at: i64,
    pub signature: Vec<u8>,
}

impl PresenceRecord {
    pub fn sign(identity: &Identity, addrs: Vec<String>) -> Self {
        let peer_id = identity.peer_id().to_string();
        let public_key = identity.public_key_bytes();
        let issued_at = now_unix();
        let signature = identity
            .sign(&Self::signable(&peer_id, &public_key, &addrs, issued_at))
            .to_bytes()
            .to_vec();
        Self {
            peer_id,
            public_key,
            addrs,
            issued_at,
            signature,
        }
    }

    /// Verify signature and key-to-PeerID binding. Freshness is checked
    /// separately so stale-but-valid records can still be logged.
    pub fn verify(&self) -> Result<(), IdentityError> {
        let derived = identity::peer_id_from_public_key(&self.public_key)?;
        if derived.to_string() != self.peer_id {
            return Err(IdentityError::InvalidKeyBytes);
        }
        identity::verify_signature(
            &self.public_key,
            &Self::signable(&self.peer_id, &self.public_key, &self.addrs, self.issued_at),
            &self.signature,
        )
    }

    pub fn is_fresh(&self, now: i64) -> bool {
        now - self.issued_at <= PRESENCE_MAX_AGE_SECS
    }

    fn signable(peer_id: &str, public_key: &[u8; 32], addrs: &[String], issued_at: i64) -> Vec<u8> {
        // Stable layout: bincode of the record minus the signature.
        bincode::serialize(&(peer_id, public_key, addrs, issued_at))
            .expect("presence record serialization")
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serialize(self).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        bincode::deserialize(data).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Sealed invitations
// ---------------------------------------------------------------------------

/// Plaintext of an invitation offer. Wiped from memory when dropped.
#[derive(Debug, Clone, Serialize, Deserialize, Zeroize)]
pub struct InviteOffer {
    pub inviter_handle: String,
    pub inviter_peer_id: String,
    pub inviter_public_key: [u8; 32],
    pub addrs: Vec<String>,
    pub nonce: [u8; 16],
    /// Prevents a "wrong user" redeeming an offer sealed for someone else.
    pub target_handle: String,
    pub expires_at: i64,
}

impl InviteOffer {
    pub fn new(
        identity: &Identity,
        inviter_handle: &str,
        target_handle: &str,
        addrs: Vec<String>,
        nonce: [u8; 16],
    ) -> Self {
        Self {
            inviter_handle: inviter_handle.trim().to_lowercase(),
            inviter_peer_id: identity.peer_id().to_string(),
            inviter_public_key: identity.public_key_bytes(),
            addrs,
            nonce,
            target_handle: target_handle.trim().to_lowercase(),
            expires_at: now_unix() + INVITE_TTL_SECS,
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }
}

/// Publicly storable form of an offer: salt + nonce-prefixed ciphertext,
/// both base64. Reveals nothing about the parties involved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedInvite {
    pub salt: String,
    pub ciphertext: String,
}

/// Derive the invite sealing key: Argon2id over the password (it is a
/// human-transcribed 14-character code, so the memory-hard step matters),
/// then a BLAKE3 context step binding the protocol label.
fn invite_key(
    password: &str,
    salt: &[u8],
    params: &KdfParams,
) -> Result<crypto::SymmetricKey, CryptoError> {
    let stretched = crypto::derive_password_key(password.trim().as_bytes(), salt, params)?;
    Ok(crypto::derive_context_key(KDF_CONTEXT_INVITE, &stretched))
}

pub fn seal_invite(password: &str, offer: &InviteOffer) -> Result<SealedInvite, CryptoError> {
    seal_invite_with_params(password, offer, &KdfParams::default())
}

pub fn seal_invite_with_params(
    password: &str,
    offer: &InviteOffer,
    params: &KdfParams,
) -> Result<SealedInvite, CryptoError> {
    let salt = crypto::generate_salt();
    let key = invite_key(password, &salt, params)?;

    let plaintext =
        bincode::serialize(offer).map_err(|_| CryptoError::EncryptionFailed)?;
    let sealed = crypto::seal(&key, &plaintext)?;

    Ok(SealedInvite {
        salt: BASE64.encode(salt),
        ciphertext: BASE64.encode(sealed),
    })
}

/// Attempt to open a sealed invite. `Ok(None)` means the key did not fit,
/// which is the expected outcome while scanning someone's directory.
pub fn open_invite(
    password: &str,
    sealed: &SealedInvite,
) -> Result<Option<InviteOffer>, CryptoError> {
    open_invite_with_params(password, sealed, &KdfParams::default())
}

pub fn open_invite_with_params(
    password: &str,
    sealed: &SealedInvite,
    params: &KdfParams,
) -> Result<Option<InviteOffer>, CryptoError> {
    let salt = BASE64
        .decode(&sealed.salt)
        .map_err(|_| CryptoError::DecryptionFailed)?;
    let data = BASE64
        .decode(&sealed.ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)?;

    let key = invite_key(password, &salt, params)?;
    match crypto::open(&key, &data) {
        Ok(plaintext) => {
            let offer: InviteOffer =
                bincode::deserialize(&plaintext).map_err(|_| CryptoError::DecryptionFailed)?;
            Ok(Some(offer))
        }
        Err(_) => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Rendezvous directory document
// ---------------------------------------------------------------------------

/// The JSON document each node publishes to its directory blob: one signed
/// presence record plus any sealed invitation offers awaiting redemption.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryDoc {
    pub presence: Option<PresenceRecord>,
    #[serde(default)]
    pub invitations: Vec<SealedInvite>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_params() -> KdfParams {
        KdfParams {
            m_cost: 8,
            t_cost: 1,
            p_cost: 1,
        }
    }

    #[test]
    fn msg_ids_sort_by_time() {
        let a = new_msg_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = new_msg_id();
        assert!(a < b);
    }

    #[test]
    fn presence_record_verifies() {
        let id = Identity::generate();
        let record = PresenceRecord::sign(&id, vec!["/ip4/192.168.1.5/tcp/40123".into()]);
        assert!(record.verify().is_ok());
        assert!(record.is_fresh(now_unix()));
    }

    #[test]
    fn tampered_presence_record_rejected() {
        let id = Identity::generate();
        let mut record = PresenceRecord::sign(&id, vec!["/ip4/10.0.0.1/tcp/1".into()]);
        record.addrs.push("/ip4/6.6.6.6/tcp/666".into());
        assert!(record.verify().is_err());
    }

    #[test]
    fn presence_record_key_substitution_rejected() {
        let real = Identity::generate();
        let attacker = Identity::generate();
        let mut record = PresenceRecord::sign(&attacker, vec![]);
        // Claim someone else's PeerID with the attacker's key.
        record.peer_id = real.peer_id().to_string();
        assert!(record.verify().is_err());
    }

    #[test]
    fn stale_presence_record_not_fresh() {
        let id = Identity::generate();
        let mut record = PresenceRecord::sign(&id, vec![]);
        record.issued_at -= PRESENCE_MAX_AGE_SECS + 60;
        assert!(!record.is_fresh(now_unix()));
    }

    #[test]
    fn invite_seal_open_roundtrip() {
        let inviter = Identity::generate();
        let offer = InviteOffer::new(
            &inviter,
            "alice",
            "bob",
            vec!["/ip4/192.168.1.5/udp/4001/quic-v1".into()],
            [9u8; 16],
        );

        let sealed = seal_invite_with_params("ABCD1234EFGH56", &offer, &fast_params()).unwrap();
        let opened = open_invite_with_params("ABCD1234EFGH56", &sealed, &fast_params())
            .unwrap()
            .expect("offer should decrypt");

        assert_eq!(opened.target_handle, "bob");
        assert_eq!(opened.inviter_peer_id, inviter.peer_id().to_string());
        assert_eq!(opened.nonce, [9u8; 16]);
    }

    #[test]
    fn invite_wrong_password_yields_none() {
        let inviter = Identity::generate();
        let offer = InviteOffer::new(&inviter, "alice", "bob", vec![], [0u8; 16]);
        let sealed = seal_invite_with_params("ABCD1234EFGH56", &offer, &fast_params()).unwrap();

        let opened =
            open_invite_with_params("WRONGPASSWORD0", &sealed, &fast_params()).unwrap();
        assert!(opened.is_none());
    }

    #[test]
    fn frame_cbor_shape_survives_serde() {
        // The transport codec is CBOR; serde_roundtrip through a
        // self-describing format catches enum shape regressions.
        let frame = MsgFrame {
            seq: 7,
            msg_id: new_msg_id(),
            body: FrameBody::FileAnnounce {
                file_hash: "ab".repeat(32),
                size: 1234,
                mime_hint: "image/png".into(),
                file_name: "cat.png".into(),
                content_type: ContentType::Image,
            },
        };
        let json = serde_json::to_string(&frame).unwrap();
        let back: MsgFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back.seq, 7);
        match back.body {
            FrameBody::FileAnnounce { size, .. } => assert_eq!(size, 1234),
            other => panic!("wrong body: {other:?}"),
        }
    }

    #[test]
    fn directory_doc_tolerates_missing_invitations() {
        let doc: DirectoryDoc = serde_json::from_str("{\"presence\":null}").unwrap();
        assert!(doc.invitations.is_empty());
    }
}
