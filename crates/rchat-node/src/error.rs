use thiserror::Error;

use rchat_net::RequestError;
use rchat_store::StoreError;

/// Error surface of the command dispatcher. Every command either runs to
/// completion or fails with one of these kinds; none leaves partial state
/// behind.
#[derive(Error, Debug)]
pub enum NodeError {
    // -- Auth ------------------------------------------------------------
    #[error("Vault is not set up")]
    VaultNotSetUp,

    #[error("Vault is already set up")]
    VaultAlreadySetUp,

    #[error("Vault is locked")]
    VaultLocked,

    #[error("Invalid password")]
    InvalidPassword,

    // -- Trust -----------------------------------------------------------
    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    #[error("Peer is not trusted: {0}")]
    NotTrusted(String),

    #[error("Peer identity does not match its claimed key")]
    IdentityMismatch,

    // -- Transport -------------------------------------------------------
    #[error("No route to peer")]
    NoRoute,

    #[error("Dial failed")]
    DialFailed,

    #[error("Handshake failed")]
    HandshakeFailed,

    #[error("Operation timed out")]
    Timeout,

    // -- Protocol --------------------------------------------------------
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Replayed sequence number")]
    SequenceReplay,

    #[error("Unsupported protocol version")]
    UnsupportedVersion,

    // -- Resource --------------------------------------------------------
    #[error("Outbound queue is full")]
    BackpressureExceeded,

    #[error("Storage is full")]
    StorageFull,

    #[error("File exceeds the size limit")]
    FileTooLarge,

    #[error("Quota exceeded")]
    QuotaExceeded,

    // -- Store -----------------------------------------------------------
    #[error("Not found")]
    NotFound,

    #[error("Conflict")]
    Conflict,

    // -- Invite ----------------------------------------------------------
    #[error("Invitation has expired")]
    InviteExpired,

    #[error("No invitation matches that password")]
    InviteMismatch,

    #[error("Rendezvous handle not configured; connect a GitHub account first")]
    HandleNotSet,

    // -- Wrappers --------------------------------------------------------
    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(String),
}

impl From<StoreError> for NodeError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => NodeError::NotFound,
            StoreError::Conflict => NodeError::Conflict,
            StoreError::StorageFull => NodeError::StorageFull,
            StoreError::HashMismatch { .. } => NodeError::NotFound,
            other => NodeError::Store(other),
        }
    }
}

impl From<RequestError> for NodeError {
    fn from(e: RequestError) -> Self {
        match e {
            RequestError::Timeout => NodeError::Timeout,
            RequestError::DialFailure => NodeError::DialFailed,
            RequestError::ConnectionClosed => NodeError::DialFailed,
            RequestError::UnsupportedProtocols => NodeError::UnsupportedVersion,
            RequestError::Io(msg) => NodeError::Network(msg),
            RequestError::SwarmGone => NodeError::Network("network not running".into()),
        }
    }
}

impl From<rchat_shared::CryptoError> for NodeError {
    fn from(e: rchat_shared::CryptoError) -> Self {
        match e {
            rchat_shared::CryptoError::DecryptionFailed => NodeError::InvalidPassword,
            other => NodeError::Network(other.to_string()),
        }
    }
}
