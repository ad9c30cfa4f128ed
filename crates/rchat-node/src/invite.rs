//! The invitation engine.
//!
//! Trust between two peers starts with a 14-character password shared
//! out of band. The inviter seals an offer (its PeerID, public key and
//! addresses) under a key derived from that password and publishes the
//! opaque blob on the pair's invite topic and in its rendezvous
//! directory. The invitee scans, decrypts, dials, and proves its own
//! identity with a signed acceptance; both sides then hold each other as
//! trusted peers.

use std::time::Duration;

use libp2p::PeerId;
use rand::RngCore;
use tokio::sync::oneshot;
use tracing::{debug, info};

use rchat_net::{rendezvous, SwarmCommand};
use rchat_shared::constants::{invite_topic, DIAL_TIMEOUT_SECS, INVITE_TTL_SECS};
use rchat_shared::crypto::{self, KdfParams};
use rchat_shared::identity::peer_id_from_public_key;
use rchat_shared::protocol::{
    new_msg_id, open_invite_with_params, seal_invite_with_params, FrameBody, InviteOffer,
    SealedInvite,
};
use rchat_shared::types::now_unix;

use crate::error::NodeError;
use crate::node::Node;
use crate::session::OutboundFrame;

/// Hash an invite password for the pending-invitation table. The sealing
/// key derivation is the memory-hard step; this only links a later
/// `create_invite` call back to its generated password.
fn password_hash(password: &str) -> String {
    crypto::content_hash(password.trim().as_bytes())
}

pub(crate) fn generate_invite_password(node: &Node) -> Result<String, NodeError> {
    let password = crypto::generate_invite_password();

    let mut nonce = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let now = now_unix();
    node.store()?.insert_invitation(
        &hex::encode(nonce),
        &password_hash(&password),
        now,
        now + INVITE_TTL_SECS,
    )?;

    Ok(password)
}

pub(crate) async fn create_invite(
    node: &Node,
    invitee: &str,
    password: &str,
) -> Result<(), NodeError> {
    let identity = node.identity().await?;
    let my_handle = node.rendezvous_handle().ok_or(NodeError::HandleNotSet)?;

    let invitation = node
        .store()?
        .find_invitation_by_password_hash(&password_hash(password))?
        .ok_or(NodeError::NotFound)?;
    if invitation.expires_at <= now_unix() {
        return Err(NodeError::InviteExpired);
    }

    let mut nonce = [0u8; 16];
    hex::decode_to_slice(&invitation.nonce, &mut nonce)
        .map_err(|_| NodeError::ProtocolViolation("corrupt invitation nonce".into()))?;

    // Whatever addresses we currently listen on; the redeemer also
    // learns addresses from mDNS and the directory poll.
    let addrs = match node.cmd_tx().await {
        Some(cmd_tx) => {
            let (reply_tx, reply_rx) = oneshot::channel();
            let _ = cmd_tx.send(SwarmCommand::ListenAddrs(reply_tx)).await;
            reply_rx
                .await
                .map(|addrs| addrs.iter().map(|a| a.to_string()).collect())
                .unwrap_or_default()
        }
        None => Vec::new(),
    };

    let offer = InviteOffer::new(&identity, &my_handle, invitee, addrs, nonce);
    let sealed = seal_blocking(password.to_string(), offer, node.inner.kdf).await?;

    let sealed_json = serde_json::to_string(&sealed)
        .map_err(|e| NodeError::Network(format!("offer serialization: {e}")))?;
    node.store()?
        .attach_invitation_offer(&invitation.nonce, invitee.trim(), &sealed_json)?;

    // Publish immediately; the rendezvous loop republishes every cycle
    // until the invite is redeemed or expires.
    if let Some(cmd_tx) = node.cmd_tx().await {
        let topic = invite_topic(&my_handle, invitee);
        let _ = cmd_tx.send(SwarmCommand::Subscribe(topic.clone())).await;
        if let Ok(bytes) = serde_json::to_vec(&sealed) {
            let _ = cmd_tx.send(SwarmCommand::Publish { topic, data: bytes }).await;
        }
    }

    info!(invitee = %invitee, "invitation created");
    Ok(())
}

pub(crate) async fn redeem_and_connect(
    node: &Node,
    inviter: &str,
    password: &str,
) -> Result<String, NodeError> {
    let identity = node.identity().await?;
    let my_handle = node.rendezvous_handle().ok_or(NodeError::HandleNotSet)?;
    let topic = invite_topic(inviter, &my_handle);

    if let Some(cmd_tx) = node.cmd_tx().await {
        let _ = cmd_tx.send(SwarmCommand::Subscribe(topic.clone())).await;
    }

    // Offers can arrive from the inviter's directory or on the invite
    // topic; scan both, rechecking for a few seconds to let gossip land.
    let mut offer: Option<InviteOffer> = None;
    for attempt in 0..4 {
        let mut sealed: Vec<SealedInvite> = Vec::new();

        match rendezvous::fetch_directory(inviter).await {
            Ok(Some(doc)) => sealed.extend(doc.invitations),
            Ok(None) => {}
            Err(e) => debug!(inviter, error = %e, "directory fetch failed"),
        }
        {
            let inbox = node
                .inner
                .offer_inbox
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if let Some(offers) = inbox.get(&topic) {
                sealed.extend(offers.iter().cloned());
            }
        }

        for candidate in sealed {
            if let Some(opened) =
                open_blocking(password.to_string(), candidate, node.inner.kdf).await?
            {
                if opened.target_handle == my_handle.trim().to_lowercase()
                    && opened.inviter_handle == inviter.trim().to_lowercase()
                {
                    offer = Some(opened);
                    break;
                }
            }
        }
        if offer.is_some() {
            break;
        }
        if attempt < 3 {
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }

    let offer = offer.ok_or(NodeError::InviteMismatch)?;
    if offer.is_expired(now_unix()) {
        return Err(NodeError::InviteExpired);
    }

    // The offer's key must derive the PeerID it claims; the transport
    // handshake then proves the dialed node owns that key.
    let derived = peer_id_from_public_key(&offer.inviter_public_key)
        .map_err(|_| NodeError::IdentityMismatch)?;
    if derived.to_string() != offer.inviter_peer_id {
        return Err(NodeError::IdentityMismatch);
    }

    let cmd_tx = node.cmd_tx().await.ok_or(NodeError::NoRoute)?;
    let peer_id: PeerId = offer
        .inviter_peer_id
        .parse()
        .map_err(|_| NodeError::IdentityMismatch)?;

    let addrs = offer
        .addrs
        .iter()
        .filter_map(|a| a.parse().ok())
        .collect::<Vec<_>>();
    if !addrs.is_empty() {
        let _ = cmd_tx
            .send(SwarmCommand::AddAddresses { peer_id, addrs })
            .await;
    }
    let _ = cmd_tx.send(SwarmCommand::Dial(peer_id)).await;

    wait_for_connection(&cmd_tx, peer_id).await?;

    // Trust is mutual from here: we persist the inviter, and the signed
    // acceptance lets the inviter persist us.
    node.store()?.upsert_peer(
        &offer.inviter_peer_id,
        inviter.trim(),
        &offer.inviter_public_key,
        now_unix(),
    )?;

    let acceptance = OutboundFrame {
        msg_id: new_msg_id(),
        chat_id: offer.inviter_peer_id.clone(),
        body: FrameBody::InviteAccept {
            handle: my_handle,
            public_key: identity.public_key_bytes(),
            nonce: offer.nonce,
            signature: identity.sign(&offer.nonce).to_bytes().to_vec(),
        },
        track_status: false,
    };
    node.inner
        .sessions
        .enqueue(&offer.inviter_peer_id, acceptance)?;

    info!(inviter = %inviter, peer = %offer.inviter_peer_id, "invitation redeemed");
    Ok(offer.inviter_peer_id.clone())
}

async fn wait_for_connection(
    cmd_tx: &tokio::sync::mpsc::Sender<SwarmCommand>,
    peer_id: PeerId,
) -> Result<(), NodeError> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(DIAL_TIMEOUT_SECS);
    loop {
        let (reply_tx, reply_rx) = oneshot::channel();
        cmd_tx
            .send(SwarmCommand::ConnectedPeers(reply_tx))
            .await
            .map_err(|_| NodeError::NoRoute)?;
        if let Ok(peers) = reply_rx.await {
            if peers.contains(&peer_id) {
                return Ok(());
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(NodeError::DialFailed);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

async fn seal_blocking(
    password: String,
    offer: InviteOffer,
    kdf: KdfParams,
) -> Result<SealedInvite, NodeError> {
    tokio::task::spawn_blocking(move || seal_invite_with_params(&password, &offer, &kdf))
        .await
        .map_err(|e| NodeError::Network(format!("seal task: {e}")))?
        .map_err(|e| NodeError::Network(e.to_string()))
}

async fn open_blocking(
    password: String,
    sealed: SealedInvite,
    kdf: KdfParams,
) -> Result<Option<InviteOffer>, NodeError> {
    tokio::task::spawn_blocking(move || open_invite_with_params(&password, &sealed, &kdf))
        .await
        .map_err(|e| NodeError::Network(format!("open task: {e}")))?
        .map_err(|e| NodeError::Network(e.to_string()))
}
