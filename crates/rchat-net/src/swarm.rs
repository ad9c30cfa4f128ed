//! Swarm orchestration with a tokio mpsc command/notification pattern.
//!
//! The swarm event loop runs in a dedicated tokio task. The node talks to
//! it through typed command and notification channels; commands that need
//! an answer carry a oneshot sender. Inbound request-response requests are
//! forwarded together with their libp2p response channel so trust gating
//! happens in the node, above the transport.
//!
//! Connection deadlines are enforced here: outbound dials are aborted
//! after 15 s and inbound connections that never finish the Noise
//! upgrade after 10 s. Pending connections are tracked by
//! `ConnectionId` and closed by a once-a-second sweep.

use std::collections::HashMap;
use std::time::Duration;

use futures::StreamExt;
use libp2p::{
    gossipsub,
    request_response::{self, OutboundFailure, OutboundRequestId, ResponseChannel},
    swarm::{
        dial_opts::{DialOpts, PeerCondition},
        ConnectionId, SwarmEvent,
    },
    Multiaddr, PeerId,
};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use rchat_shared::constants::{DIAL_TIMEOUT_SECS, HANDSHAKE_TIMEOUT_SECS};
use rchat_shared::protocol::{FileRequest, FileResponse, MsgAck, MsgFrame};

use crate::behaviour::RchatEvent;
use crate::peers::PeerTracker;
use crate::transport::build_swarm;

/// Why an outbound request did not produce a response.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RequestError {
    #[error("request timed out")]
    Timeout,
    #[error("peer could not be dialed")]
    DialFailure,
    #[error("connection closed mid-request")]
    ConnectionClosed,
    #[error("peer does not speak this protocol")]
    UnsupportedProtocols,
    #[error("transport error: {0}")]
    Io(String),
    #[error("swarm task is gone")]
    SwarmGone,
}

impl From<OutboundFailure> for RequestError {
    fn from(e: OutboundFailure) -> Self {
        match e {
            OutboundFailure::Timeout => RequestError::Timeout,
            OutboundFailure::DialFailure => RequestError::DialFailure,
            OutboundFailure::ConnectionClosed => RequestError::ConnectionClosed,
            OutboundFailure::UnsupportedProtocols => RequestError::UnsupportedProtocols,
            other => RequestError::Io(other.to_string()),
        }
    }
}

/// Commands sent *into* the swarm task.
pub enum SwarmCommand {
    /// Record additional addresses for a peer (from mDNS or rendezvous).
    AddAddresses {
        peer_id: PeerId,
        addrs: Vec<Multiaddr>,
    },
    /// Dial a peer using every address known to the tracker.
    Dial(PeerId),
    /// Send a chat frame and resolve the oneshot with the peer's ack.
    SendFrame {
        peer_id: PeerId,
        frame: MsgFrame,
        reply: oneshot::Sender<Result<MsgAck, RequestError>>,
    },
    /// Answer an inbound chat frame.
    RespondFrame {
        channel: ResponseChannel<MsgAck>,
        ack: MsgAck,
    },
    /// Send a file-transfer request and resolve with the response.
    SendFileRequest {
        peer_id: PeerId,
        request: FileRequest,
        reply: oneshot::Sender<Result<FileResponse, RequestError>>,
    },
    /// Answer an inbound file-transfer request.
    RespondFile {
        channel: ResponseChannel<FileResponse>,
        response: FileResponse,
    },
    /// Publish on a GossipSub topic.
    Publish { topic: String, data: Vec<u8> },
    /// Subscribe to a GossipSub topic.
    Subscribe(String),
    /// Unsubscribe from a GossipSub topic.
    Unsubscribe(String),
    /// Snapshot of current listen addresses.
    ListenAddrs(oneshot::Sender<Vec<Multiaddr>>),
    /// Snapshot of currently connected peers.
    ConnectedPeers(oneshot::Sender<Vec<PeerId>>),
    /// Gracefully shut down the swarm.
    Shutdown,
}

/// Notifications sent *from* the swarm task to the node.
pub enum SwarmNotification {
    PeerConnected {
        peer_id: PeerId,
        address: Multiaddr,
    },
    PeerDisconnected {
        peer_id: PeerId,
    },
    /// Inbound chat frame; the node must answer via
    /// [`SwarmCommand::RespondFrame`] or drop the channel to stay silent.
    InboundFrame {
        peer_id: PeerId,
        frame: MsgFrame,
        channel: ResponseChannel<MsgAck>,
    },
    /// Inbound file-transfer request, answered the same way.
    InboundFileRequest {
        peer_id: PeerId,
        request: FileRequest,
        channel: ResponseChannel<FileResponse>,
    },
    /// A GossipSub message was received.
    PubsubMessage {
        source: Option<PeerId>,
        topic: String,
        data: Vec<u8>,
    },
    NewListenAddr(Multiaddr),
}

/// Spawn the libp2p swarm in a background tokio task.
///
/// Listens on ephemeral TCP and QUIC ports and returns
/// `(command_tx, notification_rx, local_peer_id)`.
pub async fn spawn_swarm(
    keypair: libp2p::identity::Keypair,
) -> anyhow::Result<(
    mpsc::Sender<SwarmCommand>,
    mpsc::Receiver<SwarmNotification>,
    PeerId,
)> {
    let mut swarm = build_swarm(keypair)?;
    let local_peer_id = *swarm.local_peer_id();

    swarm.listen_on("/ip4/0.0.0.0/udp/0/quic-v1".parse()?)?;
    swarm.listen_on("/ip4/0.0.0.0/tcp/0".parse()?)?;

    info!(peer_id = %local_peer_id, "swarm listening");

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<SwarmCommand>(256);
    let (notif_tx, notif_rx) = mpsc::channel::<SwarmNotification>(256);

    tokio::spawn(async move {
        let mut tracker = PeerTracker::new();
        let mut pending_frames: HashMap<
            OutboundRequestId,
            oneshot::Sender<Result<MsgAck, RequestError>>,
        > = HashMap::new();
        let mut pending_files: HashMap<
            OutboundRequestId,
            oneshot::Sender<Result<FileResponse, RequestError>>,
        > = HashMap::new();

        // In-flight connections and their deadlines: 15 s for outbound
        // dials, 10 s for inbound Noise upgrades.
        let mut pending_dials: HashMap<ConnectionId, Instant> = HashMap::new();
        let mut pending_incoming: HashMap<ConnectionId, Instant> = HashMap::new();
        let mut deadline_sweep = tokio::time::interval(Duration::from_secs(1));
        deadline_sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else {
                        info!("command channel closed, shutting down swarm");
                        break;
                    };
                    match cmd {
                        SwarmCommand::AddAddresses { peer_id, addrs } => {
                            for addr in addrs {
                                tracker.add_address(peer_id, addr);
                            }
                        }
                        SwarmCommand::Dial(peer_id) => {
                            dial_tracked(&mut swarm, &tracker, &mut pending_dials, peer_id);
                        }
                        SwarmCommand::SendFrame { peer_id, frame, reply } => {
                            if !tracker.is_connected(&peer_id) {
                                dial_tracked(&mut swarm, &tracker, &mut pending_dials, peer_id);
                            }
                            let id = swarm
                                .behaviour_mut()
                                .messaging
                                .send_request(&peer_id, frame);
                            pending_frames.insert(id, reply);
                        }
                        SwarmCommand::RespondFrame { channel, ack } => {
                            if swarm
                                .behaviour_mut()
                                .messaging
                                .send_response(channel, ack)
                                .is_err()
                            {
                                debug!("inbound frame channel already closed");
                            }
                        }
                        SwarmCommand::SendFileRequest { peer_id, request, reply } => {
                            if !tracker.is_connected(&peer_id) {
                                dial_tracked(&mut swarm, &tracker, &mut pending_dials, peer_id);
                            }
                            let id = swarm
                                .behaviour_mut()
                                .file_transfer
                                .send_request(&peer_id, request);
                            pending_files.insert(id, reply);
                        }
                        SwarmCommand::RespondFile { channel, response } => {
                            if swarm
                                .behaviour_mut()
                                .file_transfer
                                .send_response(channel, response)
                                .is_err()
                            {
                                debug!("inbound file channel already closed");
                            }
                        }
                        SwarmCommand::Publish { topic, data } => {
                            let topic = gossipsub::IdentTopic::new(&topic);
                            if let Err(e) =
                                swarm.behaviour_mut().gossipsub.publish(topic, data)
                            {
                                // InsufficientPeers is routine on a quiet mesh.
                                debug!(error = %e, "gossipsub publish failed");
                            }
                        }
                        SwarmCommand::Subscribe(topic) => {
                            let topic = gossipsub::IdentTopic::new(&topic);
                            if let Err(e) = swarm.behaviour_mut().gossipsub.subscribe(&topic) {
                                warn!(error = %e, "gossipsub subscribe failed");
                            }
                        }
                        SwarmCommand::Unsubscribe(topic) => {
                            let topic = gossipsub::IdentTopic::new(&topic);
                            swarm.behaviour_mut().gossipsub.unsubscribe(&topic);
                        }
                        SwarmCommand::ListenAddrs(reply) => {
                            let addrs = swarm.listeners().cloned().collect();
                            let _ = reply.send(addrs);
                        }
                        SwarmCommand::ConnectedPeers(reply) => {
                            let _ = reply.send(tracker.connected_peers());
                        }
                        SwarmCommand::Shutdown => {
                            info!("swarm shutdown requested");
                            break;
                        }
                    }
                }

                _ = deadline_sweep.tick() => {
                    let now = Instant::now();
                    // Aborting a timed-out dial surfaces as an
                    // OutgoingConnectionError, which resolves any queued
                    // requests for that peer with DialFailure.
                    let expired: Vec<ConnectionId> = pending_dials
                        .iter()
                        .filter(|(_, deadline)| **deadline <= now)
                        .map(|(id, _)| *id)
                        .collect();
                    for id in expired {
                        pending_dials.remove(&id);
                        if swarm.close_connection(id) {
                            debug!(connection = ?id, "dial timed out");
                        }
                    }

                    let expired: Vec<ConnectionId> = pending_incoming
                        .iter()
                        .filter(|(_, deadline)| **deadline <= now)
                        .map(|(id, _)| *id)
                        .collect();
                    for id in expired {
                        pending_incoming.remove(&id);
                        if swarm.close_connection(id) {
                            debug!(connection = ?id, "inbound handshake timed out");
                        }
                    }
                }

                event = swarm.select_next_some() => {
                    match event {
                        SwarmEvent::Behaviour(RchatEvent::Messaging(event)) => {
                            handle_rr_event(
                                event,
                                &mut pending_frames,
                                &notif_tx,
                                |peer_id, request, channel| SwarmNotification::InboundFrame {
                                    peer_id,
                                    frame: request,
                                    channel,
                                },
                            )
                            .await;
                        }

                        SwarmEvent::Behaviour(RchatEvent::FileTransfer(event)) => {
                            handle_rr_event(
                                event,
                                &mut pending_files,
                                &notif_tx,
                                |peer_id, request, channel| {
                                    SwarmNotification::InboundFileRequest {
                                        peer_id,
                                        request,
                                        channel,
                                    }
                                },
                            )
                            .await;
                        }

                        SwarmEvent::Behaviour(RchatEvent::Gossipsub(
                            gossipsub::Event::Message { message, .. },
                        )) => {
                            let topic = message.topic.as_str().to_string();
                            debug!(topic = %topic, len = message.data.len(), "pubsub message");
                            let _ = notif_tx
                                .send(SwarmNotification::PubsubMessage {
                                    source: message.source,
                                    topic,
                                    data: message.data,
                                })
                                .await;
                        }

                        SwarmEvent::Behaviour(RchatEvent::Identify(
                            libp2p::identify::Event::Received { peer_id, info, .. },
                        )) => {
                            for addr in info.listen_addrs {
                                tracker.add_address(peer_id, addr);
                            }
                        }

                        SwarmEvent::ConnectionEstablished { peer_id, connection_id, endpoint, .. } => {
                            pending_dials.remove(&connection_id);
                            pending_incoming.remove(&connection_id);
                            let addr = endpoint.get_remote_address().clone();
                            tracker.on_connected(peer_id, addr.clone());
                            info!(peer = %peer_id, addr = %addr, "peer connected");
                            let _ = notif_tx
                                .send(SwarmNotification::PeerConnected {
                                    peer_id,
                                    address: addr,
                                })
                                .await;
                        }

                        SwarmEvent::ConnectionClosed { peer_id, num_established, .. } => {
                            if num_established == 0 {
                                tracker.on_disconnected(&peer_id);
                                info!(peer = %peer_id, "peer disconnected");
                                let _ = notif_tx
                                    .send(SwarmNotification::PeerDisconnected { peer_id })
                                    .await;
                            }
                        }

                        SwarmEvent::NewListenAddr { address, .. } => {
                            info!(addr = %address, "listening on new address");
                            let _ = notif_tx
                                .send(SwarmNotification::NewListenAddr(address))
                                .await;
                        }

                        SwarmEvent::IncomingConnection { connection_id, .. } => {
                            // The Noise upgrade has this long to finish.
                            pending_incoming.insert(
                                connection_id,
                                Instant::now() + Duration::from_secs(HANDSHAKE_TIMEOUT_SECS),
                            );
                        }

                        SwarmEvent::OutgoingConnectionError { connection_id, peer_id, error, .. } => {
                            pending_dials.remove(&connection_id);
                            debug!(peer = ?peer_id, error = %error, "outgoing connection error");
                        }

                        SwarmEvent::IncomingConnectionError { connection_id, error, .. } => {
                            pending_incoming.remove(&connection_id);
                            debug!(error = %error, "incoming connection error");
                        }

                        _ => {}
                    }
                }
            }
        }

        // Resolve anything still in flight so callers do not hang.
        for (_, reply) in pending_frames.drain() {
            let _ = reply.send(Err(RequestError::SwarmGone));
        }
        for (_, reply) in pending_files.drain() {
            let _ = reply.send(Err(RequestError::SwarmGone));
        }
        info!("swarm event loop terminated");
    });

    Ok((cmd_tx, notif_rx, local_peer_id))
}

/// Dial with every address the tracker knows and register the attempt
/// for the 15 s dial deadline.
fn dial_tracked(
    swarm: &mut libp2p::Swarm<crate::behaviour::RchatBehaviour>,
    tracker: &PeerTracker,
    pending_dials: &mut HashMap<ConnectionId, Instant>,
    peer_id: PeerId,
) {
    let addrs = tracker.addresses_of(&peer_id);
    let opts = DialOpts::peer_id(peer_id)
        .addresses(addrs)
        .condition(PeerCondition::DisconnectedAndNotDialing)
        .build();
    let connection_id = opts.connection_id();
    match swarm.dial(opts) {
        Ok(()) => {
            pending_dials.insert(
                connection_id,
                Instant::now() + Duration::from_secs(DIAL_TIMEOUT_SECS),
            );
        }
        Err(e) => debug!(peer = %peer_id, error = %e, "dial failed"),
    }
}

/// Shared handling for both request-response behaviours: inbound requests
/// become notifications carrying their response channel, responses and
/// failures resolve the matching oneshot.
async fn handle_rr_event<Req, Resp>(
    event: request_response::Event<Req, Resp>,
    pending: &mut HashMap<OutboundRequestId, oneshot::Sender<Result<Resp, RequestError>>>,
    notif_tx: &mpsc::Sender<SwarmNotification>,
    make_notification: impl Fn(PeerId, Req, ResponseChannel<Resp>) -> SwarmNotification,
) {
    match event {
        request_response::Event::Message { peer, message, .. } => match message {
            request_response::Message::Request {
                request, channel, ..
            } => {
                let _ = notif_tx.send(make_notification(peer, request, channel)).await;
            }
            request_response::Message::Response {
                request_id,
                response,
            } => {
                if let Some(reply) = pending.remove(&request_id) {
                    let _ = reply.send(Ok(response));
                }
            }
        },
        request_response::Event::OutboundFailure {
            peer,
            request_id,
            error,
            ..
        } => {
            debug!(peer = %peer, error = %error, "outbound request failed");
            if let Some(reply) = pending.remove(&request_id) {
                let _ = reply.send(Err(error.into()));
            }
        }
        request_response::Event::InboundFailure { peer, error, .. } => {
            debug!(peer = %peer, error = %error, "inbound request failed");
        }
        request_response::Event::ResponseSent { .. } => {}
    }
}
