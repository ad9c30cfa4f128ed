//! The node handle: explicit state owned by one struct, constructed at
//! startup. All UI commands are methods on [`Node`] (see the `commands`
//! modules); networking starts after the vault unlocks so the identity
//! keypair can authenticate the transport.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use libp2p::{Multiaddr, PeerId};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use rchat_net::{spawn_mdns, spawn_swarm, MdnsService, SwarmCommand};
use rchat_shared::constants::{invite_topic, PRESENCE_TOPIC};
use rchat_shared::crypto::KdfParams;
use rchat_shared::protocol::SealedInvite;
use rchat_shared::types::now_unix;
use rchat_shared::Identity;
use rchat_store::Database;

use crate::bridge;
use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::events::{Event, EventBus};
use crate::session::SessionManager;
use crate::transfer::TransferManager;
use crate::vault::Vault;

/// Clonable bundle handed to every background task: the store, the event
/// bus and the channel into the swarm actor.
#[derive(Clone)]
pub(crate) struct RuntimeCtx {
    pub store: Arc<StdMutex<Database>>,
    pub events: EventBus,
    pub cmd_tx: mpsc::Sender<SwarmCommand>,
    pub local_peer_id: PeerId,
}

pub(crate) struct NetHandle {
    pub cmd_tx: mpsc::Sender<SwarmCommand>,
    pub local_peer_id: PeerId,
    pub mdns: Option<MdnsService>,
    pub tasks: Vec<JoinHandle<()>>,
}

pub(crate) struct NodeInner {
    pub data_dir: PathBuf,
    pub vault: tokio::sync::Mutex<Vault>,
    pub store: Arc<StdMutex<Database>>,
    pub config: tokio::sync::Mutex<NodeConfig>,
    pub events: EventBus,
    pub online: Arc<AtomicBool>,
    pub sessions: Arc<SessionManager>,
    pub transfers: Arc<TransferManager>,
    pub net: tokio::sync::Mutex<Option<NetHandle>>,
    /// Rendezvous API token and handle, mirrored out of the vault so
    /// background loops can read them without locking it.
    pub api_token: Arc<StdMutex<Option<String>>>,
    pub handle: Arc<StdMutex<Option<String>>>,
    /// Sealed invitation offers seen on subscribed invite topics,
    /// keyed by topic; drained by `redeem_and_connect`.
    pub offer_inbox: Arc<StdMutex<HashMap<String, Vec<SealedInvite>>>>,
    /// Generation counter for the fast-discovery auto-revert timer.
    pub fast_gen: AtomicU64,
    /// Argon2id cost used for the vault and invite sealing.
    pub kdf: KdfParams,
}

/// The node runtime handle.
#[derive(Clone)]
pub struct Node {
    pub(crate) inner: Arc<NodeInner>,
}

impl Node {
    /// Open (or create) a node rooted at `data_dir`. The store opens
    /// immediately; networking waits for the vault to unlock.
    pub async fn start(data_dir: PathBuf) -> Result<Self, NodeError> {
        Self::start_with_kdf(data_dir, KdfParams::default()).await
    }

    /// As [`Node::start`] with explicit Argon2id parameters. Tests pass
    /// small costs; production uses the defaults.
    pub async fn start_with_kdf(data_dir: PathBuf, kdf: KdfParams) -> Result<Self, NodeError> {
        std::fs::create_dir_all(&data_dir)?;

        let config = NodeConfig::load(&data_dir);
        let store = Arc::new(StdMutex::new(Database::open(&data_dir)?));
        let vault = Vault::with_kdf_params(&data_dir, kdf);
        let events = EventBus::new();
        let online = Arc::new(AtomicBool::new(config.online_by_default));
        let sessions = Arc::new(SessionManager::new(
            store.clone(),
            events.clone(),
            online.clone(),
        ));

        info!(data_dir = %data_dir.display(), "node starting");

        Ok(Self {
            inner: Arc::new(NodeInner {
                data_dir,
                vault: tokio::sync::Mutex::new(vault),
                store,
                config: tokio::sync::Mutex::new(config),
                events,
                online,
                sessions,
                transfers: Arc::new(TransferManager::new()),
                net: tokio::sync::Mutex::new(None),
                api_token: Arc::new(StdMutex::new(None)),
                handle: Arc::new(StdMutex::new(None)),
                offer_inbox: Arc::new(StdMutex::new(HashMap::new())),
                fast_gen: AtomicU64::new(0),
                kdf,
            }),
        })
    }

    /// The outbound event stream consumed by the UI process.
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.inner.events.subscribe()
    }

    // -- internal plumbing -----------------------------------------------

    pub(crate) fn store(&self) -> Result<MutexGuard<'_, Database>, NodeError> {
        lock_store(&self.inner.store)
    }

    /// Identity of the unlocked vault; `VaultLocked` otherwise.
    pub(crate) async fn identity(&self) -> Result<Identity, NodeError> {
        self.inner.vault.lock().await.identity()
    }

    pub(crate) fn rendezvous_handle(&self) -> Option<String> {
        self.inner
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) async fn local_peer_str(&self) -> Result<String, NodeError> {
        if let Some(net) = self.inner.net.lock().await.as_ref() {
            return Ok(net.local_peer_id.to_string());
        }
        Ok(self.identity().await?.peer_id().to_string())
    }

    pub(crate) async fn cmd_tx(&self) -> Option<mpsc::Sender<SwarmCommand>> {
        self.inner.net.lock().await.as_ref().map(|n| n.cmd_tx.clone())
    }

    pub(crate) async fn emit_auth_status(&self) {
        let vault = self.inner.vault.lock().await;
        self.inner.events.emit(Event::AuthStatus {
            is_setup: vault.is_setup(),
            is_unlocked: vault.is_unlocked(),
            is_online: self.inner.online.load(Ordering::Relaxed),
        });
    }

    /// Mirror the vault's token and handle into the cells the rendezvous
    /// loops read.
    pub(crate) async fn refresh_credential_cells(&self) {
        let vault = self.inner.vault.lock().await;
        let token = vault.api_token().unwrap_or(None);
        let handle = vault.handle().unwrap_or(None);
        drop(vault);
        *self.inner.api_token.lock().unwrap_or_else(|e| e.into_inner()) = token;
        *self.inner.handle.lock().unwrap_or_else(|e| e.into_inner()) = handle;
    }

    /// Bring up the swarm, discovery and the background loops. Called
    /// after a successful vault setup or unlock; a second call is a
    /// no-op. Network failures are logged, not fatal: the node keeps
    /// working locally and the next unlock retries.
    pub(crate) async fn start_network(&self) -> Result<(), NodeError> {
        let mut net_slot = self.inner.net.lock().await;
        if net_slot.is_some() {
            return Ok(());
        }

        let identity = self.identity().await?;
        let keypair = identity.to_libp2p_keypair();

        let (cmd_tx, notif_rx, local_peer_id) = spawn_swarm(keypair)
            .await
            .map_err(|e| NodeError::Network(e.to_string()))?;

        let ctx = RuntimeCtx {
            store: self.inner.store.clone(),
            events: self.inner.events.clone(),
            cmd_tx: cmd_tx.clone(),
            local_peer_id,
        };
        self.inner.sessions.set_ctx(ctx.clone());

        let mut tasks = Vec::new();

        // Bridge: swarm notifications -> sessions, messaging, events.
        tasks.push(tokio::spawn(bridge::run_bridge(
            ctx.clone(),
            self.inner.sessions.clone(),
            self.inner.transfers.clone(),
            self.inner.offer_inbox.clone(),
            notif_rx,
        )));

        // Standing pubsub subscriptions: presence, plus the invite
        // topics of any still-pending invitations.
        let _ = cmd_tx
            .send(SwarmCommand::Subscribe(PRESENCE_TOPIC.to_string()))
            .await;
        if let Some(my_handle) = self.rendezvous_handle() {
            let invitees: Vec<String> = self
                .store()?
                .publishable_invitations(now_unix())?
                .into_iter()
                .filter_map(|i| i.invitee_handle)
                .collect();
            for invitee in invitees {
                let _ = cmd_tx
                    .send(SwarmCommand::Subscribe(invite_topic(&my_handle, &invitee)))
                    .await;
            }
        }

        // mDNS responder/browser on the QUIC port. Best effort: a
        // machine without multicast still runs, just undiscoverable.
        let mdns = match wait_for_quic_port(&cmd_tx).await {
            Some(port) => {
                let (mdns_tx, mdns_rx) = mpsc::channel(32);
                match spawn_mdns(&local_peer_id.to_string(), port, mdns_tx) {
                    Ok(service) => {
                        tasks.push(tokio::spawn(bridge::run_mdns_loop(ctx.clone(), mdns_rx)));
                        Some(service)
                    }
                    Err(e) => {
                        warn!(error = %e, "mDNS unavailable");
                        None
                    }
                }
            }
            None => {
                warn!("no QUIC listen port; skipping mDNS");
                None
            }
        };

        // Rendezvous publish/poll loops (gated on the online flag).
        tasks.push(tokio::spawn(bridge::run_rendezvous_publish(
            ctx.clone(),
            identity.clone(),
            self.inner.api_token.clone(),
            self.inner.handle.clone(),
            self.inner.online.clone(),
        )));
        tasks.push(tokio::spawn(bridge::run_rendezvous_poll(
            ctx.clone(),
            self.inner.online.clone(),
        )));

        // Refill outboxes for peers with messages queued before shutdown.
        self.inner.sessions.resume_pending();

        *net_slot = Some(NetHandle {
            cmd_tx,
            local_peer_id,
            mdns,
            tasks,
        });
        info!(peer_id = %local_peer_id, "network started");
        Ok(())
    }

    /// Tear the network down: close sessions, stop the swarm and every
    /// background task.
    pub(crate) async fn stop_network(&self) {
        let mut net_slot = self.inner.net.lock().await;
        let Some(net) = net_slot.take() else { return };

        self.inner.sessions.shutdown();
        let _ = net.cmd_tx.send(SwarmCommand::Shutdown).await;
        if let Some(mdns) = net.mdns {
            mdns.shutdown();
        }
        for task in net.tasks {
            task.abort();
        }
        info!("network stopped");
    }
}

pub(crate) fn lock_store(
    store: &Arc<StdMutex<Database>>,
) -> Result<MutexGuard<'_, Database>, NodeError> {
    store
        .lock()
        .map_err(|_| NodeError::Network("store lock poisoned".into()))
}

/// The swarm binds its listeners asynchronously; poll briefly for the
/// QUIC port the mDNS responder should advertise.
async fn wait_for_quic_port(cmd_tx: &mpsc::Sender<SwarmCommand>) -> Option<u16> {
    for _ in 0..10 {
        let (reply_tx, reply_rx) = oneshot::channel();
        if cmd_tx
            .send(SwarmCommand::ListenAddrs(reply_tx))
            .await
            .is_err()
        {
            return None;
        }
        if let Ok(addrs) = reply_rx.await {
            if let Some(port) = addrs.iter().find_map(udp_port) {
                return Some(port);
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    None
}

fn udp_port(addr: &Multiaddr) -> Option<u16> {
    use libp2p::multiaddr::Protocol;
    addr.iter().find_map(|p| match p {
        Protocol::Udp(port) if port != 0 => Some(port),
        _ => None,
    })
}
