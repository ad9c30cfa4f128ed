//! Background loops: swarm notifications, mDNS discovery and the
//! rendezvous publish/poll cycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use libp2p::{Multiaddr, PeerId};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use rchat_net::{rendezvous, MdnsEvent, SwarmCommand, SwarmNotification};
use rchat_shared::constants::{
    invite_topic, PRESENCE_TOPIC, RENDEZVOUS_PUBLISH_SECS,
};
use rchat_shared::protocol::{DirectoryDoc, PresenceRecord, SealedInvite};
use rchat_shared::types::now_unix;
use rchat_shared::Identity;

use crate::events::Event;
use crate::messaging;
use crate::node::{lock_store, RuntimeCtx};
use crate::session::SessionManager;
use crate::transfer::{self, TransferManager};

/// Forward swarm notifications to sessions, messaging and the event bus.
pub(crate) async fn run_bridge(
    ctx: RuntimeCtx,
    sessions: Arc<SessionManager>,
    transfers: Arc<TransferManager>,
    offer_inbox: Arc<StdMutex<HashMap<String, Vec<SealedInvite>>>>,
    mut notif_rx: mpsc::Receiver<SwarmNotification>,
) {
    info!("swarm bridge started");

    while let Some(notification) = notif_rx.recv().await {
        match notification {
            SwarmNotification::PeerConnected { peer_id, address } => {
                let peer_str = peer_id.to_string();
                let trusted = lock_store(&ctx.store)
                    .map(|s| s.is_peer(&peer_str))
                    .unwrap_or(false);
                debug!(peer = %peer_str, addr = %address, trusted, "peer connected (bridge)");
                sessions.on_peer_connected(&peer_str, trusted);
                ctx.events.emit(Event::PeerConnected { peer_id: peer_str });
            }

            SwarmNotification::PeerDisconnected { peer_id } => {
                let peer_str = peer_id.to_string();
                sessions.on_peer_disconnected(&peer_str);
                ctx.events.emit(Event::PeerDisconnected { peer_id: peer_str });
            }

            SwarmNotification::InboundFrame {
                peer_id,
                frame,
                channel,
            } => {
                messaging::handle_inbound_frame(
                    &ctx, &sessions, &transfers, peer_id, frame, channel,
                )
                .await;
            }

            SwarmNotification::InboundFileRequest {
                peer_id,
                request,
                channel,
            } => {
                transfer::handle_inbound_file_request(&ctx, peer_id, request, channel).await;
            }

            SwarmNotification::PubsubMessage { topic, data, .. } => {
                handle_pubsub(&ctx, &offer_inbox, &topic, &data).await;
            }

            SwarmNotification::NewListenAddr(addr) => {
                debug!(addr = %addr, "new listen address");
            }
        }
    }

    warn!("swarm bridge ended");
}

async fn handle_pubsub(
    ctx: &RuntimeCtx,
    offer_inbox: &Arc<StdMutex<HashMap<String, Vec<SealedInvite>>>>,
    topic: &str,
    data: &[u8],
) {
    if topic == PRESENCE_TOPIC {
        let Ok(record) = PresenceRecord::from_bytes(data) else {
            debug!("malformed presence ping");
            return;
        };
        if record.verify().is_err() || !record.is_fresh(now_unix()) {
            debug!(peer = %record.peer_id, "presence ping rejected");
            return;
        }
        let trusted = lock_store(&ctx.store)
            .map(|s| s.is_peer(&record.peer_id))
            .unwrap_or(false);
        if !trusted {
            return;
        }
        if let Ok(peer_id) = record.peer_id.parse::<PeerId>() {
            add_addresses(ctx, peer_id, &record.addrs).await;
            if let Ok(store) = lock_store(&ctx.store) {
                let _ = store.touch_peer(&record.peer_id, now_unix());
            }
        }
        return;
    }

    if topic.starts_with("invite/") {
        // Sealed offers are opaque; stash them for a redeem in progress.
        let Ok(sealed) = serde_json::from_slice::<SealedInvite>(data) else {
            debug!(topic, "malformed sealed invite on topic");
            return;
        };
        let mut inbox = offer_inbox.lock().unwrap_or_else(|e| e.into_inner());
        let offers = inbox.entry(topic.to_string()).or_default();
        if !offers.contains(&sealed) {
            offers.push(sealed);
        }
    }
}

/// mDNS events: discovered peers feed the address book (and are dialed
/// when trusted); expiries surface to the UI.
pub(crate) async fn run_mdns_loop(ctx: RuntimeCtx, mut mdns_rx: mpsc::Receiver<MdnsEvent>) {
    while let Some(event) = mdns_rx.recv().await {
        match event {
            MdnsEvent::Discovered(peer) => {
                info!(peer = %peer.peer_id, "local peer discovered");
                ctx.events.emit(Event::LocalPeerDiscovered {
                    peer_id: peer.peer_id.clone(),
                    addrs: peer.addrs.clone(),
                });

                let Ok(peer_id) = peer.peer_id.parse::<PeerId>() else {
                    continue;
                };
                add_addresses(&ctx, peer_id, &peer.addrs).await;

                // Reconnecting to trusted peers drains their outboxes
                // without any user action.
                let trusted = lock_store(&ctx.store)
                    .map(|s| s.is_peer(&peer.peer_id))
                    .unwrap_or(false);
                if trusted {
                    let _ = ctx.cmd_tx.send(SwarmCommand::Dial(peer_id)).await;
                }
            }
            MdnsEvent::Expired { peer_id } => {
                debug!(peer = %peer_id, "local peer expired");
                ctx.events.emit(Event::LocalPeerExpired { peer_id });
            }
        }
    }
}

async fn add_addresses(ctx: &RuntimeCtx, peer_id: PeerId, addrs: &[String]) {
    let parsed: Vec<Multiaddr> = addrs.iter().filter_map(|a| a.parse().ok()).collect();
    if !parsed.is_empty() {
        let _ = ctx
            .cmd_tx
            .send(SwarmCommand::AddAddresses {
                peer_id,
                addrs: parsed,
            })
            .await;
    }
}

/// Periodically publish our signed presence record (and any pending
/// sealed invitations) to the rendezvous directory and the presence
/// topic. Suspended while offline.
pub(crate) async fn run_rendezvous_publish(
    ctx: RuntimeCtx,
    identity: Identity,
    api_token: Arc<StdMutex<Option<String>>>,
    handle: Arc<StdMutex<Option<String>>>,
    online: Arc<AtomicBool>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(RENDEZVOUS_PUBLISH_SECS));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        if !online.load(Ordering::Relaxed) {
            continue;
        }

        let addrs = listen_addrs(&ctx).await;
        if addrs.is_empty() {
            continue;
        }

        let record = PresenceRecord::sign(&identity, addrs);

        // Opportunistic presence ping for peers already in the mesh.
        if let Ok(bytes) = record.to_bytes() {
            let _ = ctx
                .cmd_tx
                .send(SwarmCommand::Publish {
                    topic: PRESENCE_TOPIC.to_string(),
                    data: bytes,
                })
                .await;
        }

        // Pending invitations ride along in the directory document and
        // on their invite topics.
        let now = now_unix();
        let (invitations, invitees) = match lock_store(&ctx.store) {
            Ok(store) => {
                let _ = store.expire_invitations(now);
                let pending = store.publishable_invitations(now).unwrap_or_default();
                let mut sealed = Vec::new();
                let mut invitees = Vec::new();
                for invitation in pending {
                    if let (Some(json), Some(invitee)) =
                        (invitation.offer_json, invitation.invitee_handle)
                    {
                        if let Ok(offer) = serde_json::from_str::<SealedInvite>(&json) {
                            sealed.push(offer);
                            invitees.push(invitee);
                        }
                    }
                }
                (sealed, invitees)
            }
            Err(_) => continue,
        };

        let my_handle = handle.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(ref my_handle) = my_handle {
            for (sealed, invitee) in invitations.iter().zip(invitees.iter()) {
                if let Ok(bytes) = serde_json::to_vec(sealed) {
                    let _ = ctx
                        .cmd_tx
                        .send(SwarmCommand::Publish {
                            topic: invite_topic(my_handle, invitee),
                            data: bytes,
                        })
                        .await;
                }
            }
        }

        let token = api_token.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let Some(token) = token else { continue };

        let doc = DirectoryDoc {
            presence: Some(record),
            invitations,
        };
        if let Err(e) = rendezvous::publish_directory(&token, &doc).await {
            warn!(error = %e, "rendezvous publish failed");
        } else {
            debug!("rendezvous directory published");
        }
    }
}

/// Poll the directories of trusted handles; verified fresh records feed
/// the address book, and peers with queued messages get dialed.
pub(crate) async fn run_rendezvous_poll(ctx: RuntimeCtx, online: Arc<AtomicBool>) {
    let mut interval = tokio::time::interval(Duration::from_secs(RENDEZVOUS_PUBLISH_SECS * 2));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        if !online.load(Ordering::Relaxed) {
            continue;
        }

        let peers = match lock_store(&ctx.store) {
            Ok(store) => store.get_peers().unwrap_or_default(),
            Err(_) => continue,
        };

        for peer in peers {
            let doc = match rendezvous::fetch_directory(&peer.handle).await {
                Ok(Some(doc)) => doc,
                Ok(None) => continue,
                Err(e) => {
                    debug!(handle = %peer.handle, error = %e, "rendezvous poll failed");
                    continue;
                }
            };

            let Some(record) = rendezvous::verified_presence(&doc) else {
                continue;
            };
            // The record must belong to the peer we trust under this
            // handle, not whoever happens to control the blob.
            if record.peer_id != peer.id {
                warn!(handle = %peer.handle, "directory presence names a different peer");
                continue;
            }

            let Ok(peer_id) = record.peer_id.parse::<PeerId>() else {
                continue;
            };
            add_addresses(&ctx, peer_id, &record.addrs).await;

            let has_pending = lock_store(&ctx.store)
                .map(|s| !s.pending_outbound(&peer.id).unwrap_or_default().is_empty())
                .unwrap_or(false);
            if has_pending {
                let _ = ctx.cmd_tx.send(SwarmCommand::Dial(peer_id)).await;
            }
        }
    }
}

async fn listen_addrs(ctx: &RuntimeCtx) -> Vec<String> {
    let (reply_tx, reply_rx) = oneshot::channel();
    if ctx
        .cmd_tx
        .send(SwarmCommand::ListenAddrs(reply_tx))
        .await
        .is_err()
    {
        return Vec::new();
    }
    match reply_rx.await {
        Ok(addrs) => addrs
            .into_iter()
            .filter(|a| !is_loopback(a))
            .map(|a| a.to_string())
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn is_loopback(addr: &Multiaddr) -> bool {
    use libp2p::multiaddr::Protocol;
    addr.iter().any(|p| match p {
        Protocol::Ip4(ip) => ip.is_loopback(),
        Protocol::Ip6(ip) => ip.is_loopback(),
        _ => false,
    })
}
