//! Per-peer session state and the outbox actor.
//!
//! Each trusted peer with traffic gets a session: an actor task owning a
//! queue of outgoing frames, drained while a connection to the peer is
//! established. Frames carry a per-session sequence number; inbound
//! frames at or below the last observed number are replays and are
//! dropped. Sessions never span process restarts, and sequence counters
//! reset on every reconnect.
//!
//! When a peer is unreachable the actor redials on the fixed backoff
//! schedule (1 s, 2 s, 5 s, 15 s, then steady 60 s). Queued messages stay
//! `pending` until delivered or the peer is deleted; they never expire.

use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use libp2p::PeerId;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use rchat_net::{RequestError, SwarmCommand};
use rchat_shared::constants::{BACKOFF_SCHEDULE_SECS, FRAME_TIMEOUT_SECS, OUTBOX_CAPACITY};
use rchat_shared::protocol::{FrameBody, MsgAck, MsgFrame};
use rchat_shared::types::{now_unix, ContentType, MessageStatus};
use rchat_store::Database;

use crate::error::NodeError;
use crate::events::{Event, EventBus};
use crate::node::{lock_store, RuntimeCtx};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionState {
    Handshaking,
    Established,
    Closed,
}

/// A frame waiting in a session's outbox.
#[derive(Debug, Clone)]
pub(crate) struct OutboundFrame {
    pub msg_id: String,
    pub chat_id: String,
    pub body: FrameBody,
    /// Whether the frame is a chat message whose store row follows the
    /// delivery state machine (receipts and acks are not tracked).
    pub track_status: bool,
}

enum SessionInput {
    Frame(OutboundFrame),
    Connected,
    Disconnected,
    Close,
}

struct SessionShared {
    peer_id: String,
    state: StdMutex<SessionState>,
    rx_seq: AtomicU64,
    queued: AtomicUsize,
    last_seen: AtomicI64,
}

struct SessionHandle {
    input: mpsc::UnboundedSender<SessionInput>,
    shared: Arc<SessionShared>,
}

/// Owns the `peer_id -> session` map. Sessions are created lazily on the
/// first outbound enqueue or inbound connection and live until the peer
/// disconnects for good or the node shuts down.
pub(crate) struct SessionManager {
    store: Arc<StdMutex<Database>>,
    events: EventBus,
    online: Arc<AtomicBool>,
    ctx: StdMutex<Option<RuntimeCtx>>,
    sessions: StdMutex<HashMap<String, SessionHandle>>,
}

impl SessionManager {
    pub fn new(store: Arc<StdMutex<Database>>, events: EventBus, online: Arc<AtomicBool>) -> Self {
        Self {
            store,
            events,
            online,
            ctx: StdMutex::new(None),
            sessions: StdMutex::new(HashMap::new()),
        }
    }

    pub fn set_ctx(&self, ctx: RuntimeCtx) {
        *self.ctx.lock().unwrap_or_else(|e| e.into_inner()) = Some(ctx);
    }

    fn ctx(&self) -> Option<RuntimeCtx> {
        self.ctx.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Queue a frame for a peer. With the network down the frame is not
    /// queued here; the message row stays `pending` in the store and is
    /// reloaded into the outbox when the network comes back.
    pub fn enqueue(&self, peer_id: &str, frame: OutboundFrame) -> Result<(), NodeError> {
        let Some(ctx) = self.ctx() else {
            debug!(peer = %peer_id, "network not running; message stays pending");
            return Ok(());
        };

        let handle_exists = {
            let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions.contains_key(peer_id)
        };
        if !handle_exists {
            self.spawn_session(peer_id, &ctx);
        }

        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let Some(handle) = sessions.get(peer_id) else {
            return Ok(());
        };

        if frame.track_status && handle.shared.queued.load(Ordering::Relaxed) >= OUTBOX_CAPACITY {
            return Err(NodeError::BackpressureExceeded);
        }

        handle.shared.queued.fetch_add(1, Ordering::Relaxed);
        if handle.input.send(SessionInput::Frame(frame)).is_err() {
            handle.shared.queued.fetch_sub(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Create the session actor and refill its outbox with any messages
    /// still pending in the store.
    fn spawn_session(&self, peer_id: &str, ctx: &RuntimeCtx) {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(SessionShared {
            peer_id: peer_id.to_string(),
            state: StdMutex::new(SessionState::Handshaking),
            rx_seq: AtomicU64::new(0),
            queued: AtomicUsize::new(0),
            last_seen: AtomicI64::new(now_unix()),
        });

        {
            let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions.insert(
                peer_id.to_string(),
                SessionHandle {
                    input: input_tx.clone(),
                    shared: shared.clone(),
                },
            );
        }

        info!(peer = %peer_id, "session created");
        tokio::spawn(run_session(
            shared.clone(),
            input_rx,
            ctx.clone(),
            self.store.clone(),
            self.events.clone(),
            self.online.clone(),
        ));

        // Refill from the store: everything still pending for this chat.
        let pending = {
            let Ok(store) = self.store.lock() else { return };
            store.pending_outbound(peer_id).unwrap_or_default()
        };
        for msg in pending {
            if let Some(frame) = frame_for_pending(&self.store, &msg) {
                shared.queued.fetch_add(1, Ordering::Relaxed);
                if input_tx.send(SessionInput::Frame(frame)).is_err() {
                    shared.queued.fetch_sub(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Ensure sessions exist for every trusted peer with queued messages.
    /// Called once when the network comes up.
    pub fn resume_pending(&self) {
        let Some(ctx) = self.ctx() else { return };
        let peers = {
            let Ok(store) = self.store.lock() else { return };
            store.get_peers().unwrap_or_default()
        };
        for peer in peers {
            let has_pending = {
                let Ok(store) = self.store.lock() else { return };
                !store.pending_outbound(&peer.id).unwrap_or_default().is_empty()
            };
            let exists = {
                let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
                sessions.contains_key(&peer.id)
            };
            if has_pending && !exists {
                self.spawn_session(&peer.id, &ctx);
            }
        }
    }

    /// A connection to `peer_id` was established. Resets the replay
    /// counter for the fresh session and wakes the actor.
    pub fn on_peer_connected(&self, peer_id: &str, trusted: bool) {
        if trusted {
            if let Some(ctx) = self.ctx() {
                let exists = {
                    let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
                    sessions.contains_key(peer_id)
                };
                if !exists {
                    self.spawn_session(peer_id, &ctx);
                }
            }
        }

        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = sessions.get(peer_id) {
            handle.shared.rx_seq.store(0, Ordering::Release);
            *handle.shared.state.lock().unwrap_or_else(|e| e.into_inner()) =
                SessionState::Established;
            let _ = handle.input.send(SessionInput::Connected);
        }
    }

    pub fn on_peer_disconnected(&self, peer_id: &str) {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = sessions.get(peer_id) {
            handle.shared.rx_seq.store(0, Ordering::Release);
            *handle.shared.state.lock().unwrap_or_else(|e| e.into_inner()) = SessionState::Closed;
            let _ = handle.input.send(SessionInput::Disconnected);
        }
    }

    /// Replay gate: accept `seq` only if it moves strictly forward.
    pub fn register_inbound_seq(&self, peer_id: &str, seq: u64) -> bool {
        let shared = {
            let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            match sessions.get(peer_id) {
                Some(handle) => handle.shared.clone(),
                None => {
                    drop(sessions);
                    let Some(ctx) = self.ctx() else { return false };
                    self.spawn_session(peer_id, &ctx);
                    let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
                    match sessions.get(peer_id) {
                        Some(handle) => handle.shared.clone(),
                        None => return false,
                    }
                }
            }
        };

        loop {
            let current = shared.rx_seq.load(Ordering::Acquire);
            if seq <= current {
                return false;
            }
            if shared
                .rx_seq
                .compare_exchange(current, seq, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                shared.last_seen.store(now_unix(), Ordering::Relaxed);
                return true;
            }
        }
    }

    /// Drop a single session (peer deleted).
    pub fn close_session(&self, peer_id: &str) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = sessions.remove(peer_id) {
            let _ = handle.input.send(SessionInput::Close);
        }
    }

    /// Close every session and forget the network context.
    pub fn shutdown(&self) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        for (_, handle) in sessions.drain() {
            let _ = handle.input.send(SessionInput::Close);
        }
        drop(sessions);
        *self.ctx.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

/// Rebuild the wire frame for a pending store row.
fn frame_for_pending(
    store: &Arc<StdMutex<Database>>,
    msg: &rchat_store::ChatMessage,
) -> Option<OutboundFrame> {
    let body = match msg.content_type {
        ContentType::Text => FrameBody::Text {
            text: msg.text.clone()?,
        },
        _ => {
            let hash = msg.file_hash.clone()?;
            let record = {
                let store = store.lock().ok()?;
                store.get_file_record(&hash).ok()?
            };
            FrameBody::FileAnnounce {
                file_hash: hash,
                size: record.size_bytes as u64,
                mime_hint: record.mime_hint.unwrap_or_default(),
                file_name: msg.file_name.clone().unwrap_or_default(),
                content_type: msg.content_type,
            }
        }
    };
    Some(OutboundFrame {
        msg_id: msg.id.clone(),
        chat_id: msg.chat_id.clone(),
        body,
        track_status: true,
    })
}

async fn run_session(
    shared: Arc<SessionShared>,
    mut input_rx: mpsc::UnboundedReceiver<SessionInput>,
    ctx: RuntimeCtx,
    store: Arc<StdMutex<Database>>,
    events: EventBus,
    online: Arc<AtomicBool>,
) {
    let peer: PeerId = match shared.peer_id.parse() {
        Ok(p) => p,
        Err(e) => {
            warn!(peer = %shared.peer_id, error = %e, "invalid peer id, session aborted");
            return;
        }
    };

    let mut outbox: VecDeque<OutboundFrame> = VecDeque::new();
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut tx_seq: u64 = 0;
    let mut connected = false;
    let mut backoff_idx = 0usize;

    'main: loop {
        // Drain the outbox while a connection is up.
        while connected {
            let Some(frame) = outbox.front().cloned() else { break };

            tx_seq += 1;
            let wire = MsgFrame {
                seq: tx_seq,
                msg_id: frame.msg_id.clone(),
                body: frame.body.clone(),
            };

            match send_frame(&ctx, peer, wire).await {
                Ok(ack) => {
                    outbox.pop_front();
                    seen_ids.remove(&frame.msg_id);
                    shared.queued.fetch_sub(1, Ordering::Relaxed);
                    backoff_idx = 0;
                    shared.last_seen.store(now_unix(), Ordering::Relaxed);

                    if frame.track_status {
                        // Ack means the frame reached an established
                        // session; the delivered receipt follows as its
                        // own frame. A rejected frame means the remote no
                        // longer trusts us.
                        let status = if ack.accepted {
                            MessageStatus::Sent
                        } else {
                            MessageStatus::Failed
                        };
                        update_status(&store, &events, &frame.msg_id, &frame.chat_id, status);
                        if !ack.accepted {
                            warn!(peer = %shared.peer_id, msg = %frame.msg_id, "frame rejected by peer");
                        }
                    }
                }
                Err(e) => {
                    debug!(peer = %shared.peer_id, error = %e, "frame send failed, waiting for reconnect");
                    // The frame stays queued; it is retried with a fresh
                    // sequence number after the next connect.
                    connected = false;
                    *shared.state.lock().unwrap_or_else(|p| p.into_inner()) =
                        SessionState::Handshaking;
                }
            }

            // Absorb inputs that arrived while sending.
            while let Ok(input) = input_rx.try_recv() {
                if handle_input(input, &mut outbox, &mut seen_ids, &shared, &mut connected, &mut tx_seq, &mut backoff_idx)
                    .is_break()
                {
                    break 'main;
                }
            }
        }

        // Idle or disconnected: wait for input, redialing on the backoff
        // schedule while messages are queued and the node is online.
        let retry_delay = if !connected && !outbox.is_empty() && online.load(Ordering::Relaxed) {
            let _ = ctx.cmd_tx.send(SwarmCommand::Dial(peer)).await;
            let step = BACKOFF_SCHEDULE_SECS[backoff_idx.min(BACKOFF_SCHEDULE_SECS.len() - 1)];
            Some(Duration::from_secs(step))
        } else {
            None
        };

        tokio::select! {
            input = input_rx.recv() => {
                match input {
                    Some(input) => {
                        if handle_input(input, &mut outbox, &mut seen_ids, &shared, &mut connected, &mut tx_seq, &mut backoff_idx).is_break() {
                            break 'main;
                        }
                    }
                    None => break 'main,
                }
            }
            _ = sleep_or_never(retry_delay) => {
                backoff_idx = (backoff_idx + 1).min(BACKOFF_SCHEDULE_SECS.len() - 1);
                // Probe: attempt the send. If the peer is genuinely
                // unreachable the request fails and we fall back here;
                // if the connection was alive all along (a lost ack, a
                // slow peer) the frame goes through without waiting for
                // a connection event that will never come.
                connected = true;
            }
        }
    }

    *shared.state.lock().unwrap_or_else(|p| p.into_inner()) = SessionState::Closed;
    debug!(peer = %shared.peer_id, "session actor stopped");
}

fn handle_input(
    input: SessionInput,
    outbox: &mut VecDeque<OutboundFrame>,
    seen_ids: &mut HashSet<String>,
    shared: &Arc<SessionShared>,
    connected: &mut bool,
    tx_seq: &mut u64,
    backoff_idx: &mut usize,
) -> ControlFlow<()> {
    match input {
        SessionInput::Frame(frame) => {
            // The store refill and a live enqueue can race on the same
            // message; the outbox holds each msg_id once.
            if seen_ids.contains(&frame.msg_id) {
                shared.queued.fetch_sub(1, Ordering::Relaxed);
            } else {
                seen_ids.insert(frame.msg_id.clone());
                outbox.push_back(frame);
            }
            ControlFlow::Continue(())
        }
        SessionInput::Connected => {
            *connected = true;
            *tx_seq = 0;
            *backoff_idx = 0;
            shared.last_seen.store(now_unix(), Ordering::Relaxed);
            ControlFlow::Continue(())
        }
        SessionInput::Disconnected => {
            *connected = false;
            ControlFlow::Continue(())
        }
        SessionInput::Close => ControlFlow::Break(()),
    }
}

async fn send_frame(
    ctx: &RuntimeCtx,
    peer: PeerId,
    frame: MsgFrame,
) -> Result<MsgAck, RequestError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    ctx.cmd_tx
        .send(SwarmCommand::SendFrame {
            peer_id: peer,
            frame,
            reply: reply_tx,
        })
        .await
        .map_err(|_| RequestError::SwarmGone)?;

    match tokio::time::timeout(Duration::from_secs(FRAME_TIMEOUT_SECS + 5), reply_rx).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(RequestError::SwarmGone),
        Err(_) => Err(RequestError::Timeout),
    }
}

pub(crate) fn update_status(
    store: &Arc<StdMutex<Database>>,
    events: &EventBus,
    msg_id: &str,
    chat_id: &str,
    status: MessageStatus,
) {
    let updated = match lock_store(store) {
        Ok(store) => store.update_message_status(msg_id, status),
        Err(_) => return,
    };
    match updated {
        Ok(true) => events.emit(Event::MessageStatusUpdated {
            msg_id: msg_id.to_string(),
            chat_id: chat_id.to_string(),
            status: status.as_str().to_string(),
        }),
        Ok(false) => {}
        Err(e) => debug!(msg = %msg_id, error = %e, "status update failed"),
    }
}

async fn sleep_or_never(delay: Option<Duration>) {
    match delay {
        Some(d) => tokio::time::sleep(d).await,
        None => futures::future::pending().await,
    }
}
