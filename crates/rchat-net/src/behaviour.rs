//! Composed libp2p `NetworkBehaviour` for rchat nodes.
//!
//! Combines GossipSub (invitation channel + presence pings), Identify
//! (protocol negotiation and observed addresses), Ping (connection
//! liveness) and two CBOR request-response protocols: `/rchat/msg/1` for
//! chat frames and `/rchat/file/1` for content-addressed transfer.

use libp2p::{
    gossipsub, identify, ping,
    request_response,
    swarm::NetworkBehaviour,
};

use rchat_shared::protocol::{FileRequest, FileResponse, MsgAck, MsgFrame};

/// Composed network behaviour, driven by the single swarm event loop.
/// Construction is handled by [`super::transport::build_swarm`].
#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "RchatEvent")]
pub struct RchatBehaviour {
    /// Pub/sub for sealed invitation offers and presence pings
    pub gossipsub: gossipsub::Behaviour,
    /// Protocol identification and observed-address exchange
    pub identify: identify::Behaviour,
    /// Keeps connections alive and measures latency
    pub ping: ping::Behaviour,
    /// `/rchat/msg/1`: chat frames with per-frame acknowledgement
    pub messaging: request_response::cbor::Behaviour<MsgFrame, MsgAck>,
    /// `/rchat/file/1`: chunked content-addressed file transfer
    pub file_transfer: request_response::cbor::Behaviour<FileRequest, FileResponse>,
}

/// Events emitted by the composed behaviour, one variant per sub-behaviour.
#[derive(Debug)]
pub enum RchatEvent {
    Gossipsub(gossipsub::Event),
    Identify(identify::Event),
    Ping(ping::Event),
    Messaging(request_response::Event<MsgFrame, MsgAck>),
    FileTransfer(request_response::Event<FileRequest, FileResponse>),
}

impl From<gossipsub::Event> for RchatEvent {
    fn from(event: gossipsub::Event) -> Self {
        RchatEvent::Gossipsub(event)
    }
}

impl From<identify::Event> for RchatEvent {
    fn from(event: identify::Event) -> Self {
        RchatEvent::Identify(event)
    }
}

impl From<ping::Event> for RchatEvent {
    fn from(event: ping::Event) -> Self {
        RchatEvent::Ping(event)
    }
}

impl From<request_response::Event<MsgFrame, MsgAck>> for RchatEvent {
    fn from(event: request_response::Event<MsgFrame, MsgAck>) -> Self {
        RchatEvent::Messaging(event)
    }
}

impl From<request_response::Event<FileRequest, FileResponse>> for RchatEvent {
    fn from(event: request_response::Event<FileRequest, FileResponse>) -> Self {
        RchatEvent::FileTransfer(event)
    }
}
