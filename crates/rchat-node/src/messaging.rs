//! Inbound chat-frame handling: the trust gate, replay rejection, the
//! message-status state machine and automatic receipts.

use std::sync::Arc;

use libp2p::PeerId;
use tracing::{debug, warn};

use rchat_net::SwarmCommand;
use rchat_shared::constants::MAX_FILE_SIZE;
use rchat_shared::identity;
use rchat_shared::protocol::{new_msg_id, FrameBody, MsgAck, MsgFrame, ReceiptStatus};
use rchat_shared::types::{now_unix, ContentType, Direction, MessageStatus};
use rchat_store::ChatMessage;

use crate::events::Event;
use crate::node::{lock_store, RuntimeCtx};
use crate::session::{update_status, OutboundFrame, SessionManager};
use crate::transfer::{self, TransferManager};

/// Handle one inbound frame from the swarm.
///
/// Frames from untrusted peers are dropped without acknowledgement and
/// leave no trace beyond a log line; the only exception is an invitation
/// acceptance matching a pending invite. Replayed sequence numbers are
/// dropped silently.
pub(crate) async fn handle_inbound_frame(
    ctx: &RuntimeCtx,
    sessions: &Arc<SessionManager>,
    transfers: &Arc<TransferManager>,
    peer: PeerId,
    frame: MsgFrame,
    channel: libp2p::request_response::ResponseChannel<MsgAck>,
) {
    let peer_str = peer.to_string();

    // Invitation acceptance is the one frame allowed before trust.
    if let FrameBody::InviteAccept { .. } = frame.body {
        let accepted = handle_invite_accept(ctx, &peer_str, &frame.body);
        respond(ctx, channel, &frame.msg_id, accepted).await;
        return;
    }

    let trusted = match lock_store(&ctx.store) {
        Ok(store) => store.is_peer(&peer_str),
        Err(_) => false,
    };
    if !trusted {
        warn!(peer = %peer_str, "dropping frame from untrusted peer");
        return; // no ack, no event, no persistence
    }

    if !sessions.register_inbound_seq(&peer_str, frame.seq) {
        debug!(peer = %peer_str, seq = frame.seq, "replayed frame dropped");
        return;
    }

    if let Ok(store) = lock_store(&ctx.store) {
        let _ = store.touch_peer(&peer_str, now_unix());
    }

    match frame.body {
        FrameBody::Text { text } => {
            let message = ChatMessage {
                id: frame.msg_id.clone(),
                chat_id: peer_str.clone(),
                direction: Direction::In,
                sender_peer_id: peer_str.clone(),
                content_type: ContentType::Text,
                text: Some(text),
                file_hash: None,
                file_name: None,
                created_at: now_unix(),
                status: MessageStatus::Delivered,
            };
            store_and_ack_message(ctx, sessions, channel, message).await;
        }

        FrameBody::FileAnnounce {
            file_hash,
            size,
            mime_hint,
            file_name,
            content_type,
        } => {
            if size > MAX_FILE_SIZE {
                warn!(peer = %peer_str, size, "announced file exceeds size limit");
                respond(ctx, channel, &frame.msg_id, false).await;
                return;
            }
            let message = ChatMessage {
                id: frame.msg_id.clone(),
                chat_id: peer_str.clone(),
                direction: Direction::In,
                sender_peer_id: peer_str.clone(),
                content_type,
                text: None,
                file_hash: Some(file_hash.clone()),
                file_name: Some(file_name.clone()),
                created_at: now_unix(),
                status: MessageStatus::Delivered,
            };
            let inserted = store_and_ack_message(ctx, sessions, channel, message).await;

            // The announce only carries metadata; fetch the bytes now.
            if inserted {
                transfer::start_fetch(
                    ctx.clone(),
                    transfers.clone(),
                    peer,
                    transfer::Announce {
                        file_hash,
                        size,
                        mime_hint,
                        file_name,
                        content_type,
                    },
                );
            }
        }

        FrameBody::Receipt { refers_to, status } => {
            let new_status = match status {
                ReceiptStatus::Delivered => MessageStatus::Delivered,
                ReceiptStatus::Read => MessageStatus::Read,
            };
            apply_receipt(ctx, &peer_str, &refers_to, new_status);
            respond(ctx, channel, &frame.msg_id, true).await;
        }

        FrameBody::ReadAck { msg_ids } => {
            for msg_id in &msg_ids {
                apply_receipt(ctx, &peer_str, msg_id, MessageStatus::Read);
            }
            respond(ctx, channel, &frame.msg_id, true).await;
        }

        FrameBody::Typing => {
            // Informational; not persisted, not surfaced for now.
            respond(ctx, channel, &frame.msg_id, true).await;
        }

        FrameBody::ProfileHint { alias } => {
            debug!(peer = %peer_str, alias = ?alias, "profile hint");
            respond(ctx, channel, &frame.msg_id, true).await;
        }

        FrameBody::InviteAccept { .. } => unreachable!("handled before the trust gate"),
    }
}

/// Persist an inbound message (idempotent on msg_id), emit
/// `message-received`, ack the frame and queue a delivered receipt.
/// Returns whether the message was newly inserted.
async fn store_and_ack_message(
    ctx: &RuntimeCtx,
    sessions: &Arc<SessionManager>,
    channel: libp2p::request_response::ResponseChannel<MsgAck>,
    message: ChatMessage,
) -> bool {
    let msg_id = message.id.clone();
    let chat_id = message.chat_id.clone();

    let insert_result = match lock_store(&ctx.store) {
        Ok(store) => store.insert_message(&message),
        Err(_) => return false,
    };

    let inserted = match insert_result {
        Ok(inserted) => inserted,
        Err(e) => {
            warn!(msg = %msg_id, error = %e, "failed to store inbound message");
            respond(ctx, channel, &msg_id, false).await;
            return false;
        }
    };

    if inserted {
        ctx.events.emit(Event::MessageReceived { message });
    }

    respond(ctx, channel, &msg_id, true).await;

    // Delivered receipt rides the session like any other frame, so it
    // reaches the sender even if this connection flaps first.
    let receipt = OutboundFrame {
        msg_id: new_msg_id(),
        chat_id: chat_id.clone(),
        body: FrameBody::Receipt {
            refers_to: msg_id,
            status: ReceiptStatus::Delivered,
        },
        track_status: false,
    };
    if let Err(e) = sessions.enqueue(&chat_id, receipt) {
        debug!(peer = %chat_id, error = %e, "could not queue delivered receipt");
    }

    inserted
}

/// Apply a delivery/read receipt to one of our outbound messages.
/// Receipts for messages outside this peer's chat are a protocol
/// violation and are ignored.
fn apply_receipt(ctx: &RuntimeCtx, peer_str: &str, msg_id: &str, status: MessageStatus) {
    let belongs = match lock_store(&ctx.store) {
        Ok(store) => match store.get_message(msg_id) {
            Ok(msg) => msg.chat_id == peer_str && msg.direction == Direction::Out,
            Err(_) => false,
        },
        Err(_) => false,
    };
    if !belongs {
        debug!(peer = %peer_str, msg = %msg_id, "receipt for foreign message ignored");
        return;
    }
    update_status(&ctx.store, &ctx.events, msg_id, peer_str, status);
}

/// Complete the inviter side of an invitation: verify the acceptance
/// against the pending invite and insert the new trusted peer.
fn handle_invite_accept(ctx: &RuntimeCtx, peer_str: &str, body: &FrameBody) -> bool {
    let FrameBody::InviteAccept {
        handle,
        public_key,
        nonce,
        signature,
    } = body
    else {
        return false;
    };

    let Ok(store) = lock_store(&ctx.store) else {
        return false;
    };

    let nonce_hex = hex::encode(nonce);
    let invitation = match store.find_invitation_by_nonce(&nonce_hex) {
        Ok(Some(inv)) => inv,
        _ => {
            debug!(peer = %peer_str, "invite accept with unknown nonce");
            return false;
        }
    };
    if invitation.state != "pending" {
        debug!(peer = %peer_str, state = %invitation.state, "invite no longer pending");
        return false;
    }
    if invitation.expires_at <= now_unix() {
        let _ = store.expire_invitations(now_unix());
        return false;
    }

    // The acceptance must be signed by the key it names, and that key
    // must derive the PeerID proven by the transport handshake.
    if identity::verify_signature(public_key, nonce, signature).is_err() {
        warn!(peer = %peer_str, "invite accept with bad signature");
        return false;
    }
    match identity::peer_id_from_public_key(public_key) {
        Ok(derived) if derived.to_string() == peer_str => {}
        _ => {
            warn!(peer = %peer_str, "invite accept key does not match peer identity");
            return false;
        }
    }

    if let Err(e) = store.upsert_peer(peer_str, handle, public_key, now_unix()) {
        warn!(peer = %peer_str, error = %e, "failed to persist invited peer");
        return false;
    }
    let _ = store.mark_invitation_redeemed(&invitation.nonce);

    tracing::info!(peer = %peer_str, handle = %handle, "invitation redeemed, peer trusted");
    true
}

async fn respond(
    ctx: &RuntimeCtx,
    channel: libp2p::request_response::ResponseChannel<MsgAck>,
    msg_id: &str,
    accepted: bool,
) {
    let _ = ctx
        .cmd_tx
        .send(SwarmCommand::RespondFrame {
            channel,
            ack: MsgAck {
                msg_id: msg_id.to_string(),
                accepted,
            },
        })
        .await;
}
