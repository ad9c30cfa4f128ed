//! Link-local discovery: an mDNS responder/browser for
//! `_rchat._udp.local.`.
//!
//! The TXT record carries the node's PeerID and the protocol major
//! version; peers advertising a different major version are filtered out.
//! Entries not refreshed within the TTL produce expiry events. A transient
//! fast-discovery mode raises the re-announce frequency while the "add
//! person" flow is open.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use rchat_shared::constants::{MDNS_SERVICE_TYPE, PROTOCOL_VERSION};

/// A peer seen on the local network.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MdnsPeer {
    pub peer_id: String,
    pub addrs: Vec<String>,
}

#[derive(Clone, Debug)]
pub enum MdnsEvent {
    Discovered(MdnsPeer),
    Expired { peer_id: String },
}

/// Seconds after which a peer not re-seen on the LAN is considered gone.
const ENTRY_TTL: Duration = Duration::from_secs(120);
/// Sweep interval for expiry detection.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);
/// Re-announce period while fast discovery is on.
const FAST_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(5);

/// Handle to the running responder/browser.
pub struct MdnsService {
    daemon: ServiceDaemon,
    fast_tx: watch::Sender<bool>,
}

impl MdnsService {
    /// Toggle fast discovery (5 s re-announce instead of the daemon's
    /// default cadence). The node reverts this after five minutes.
    pub fn set_fast_discovery(&self, enabled: bool) {
        let _ = self.fast_tx.send(enabled);
    }

    pub fn shutdown(&self) {
        if let Err(e) = self.daemon.shutdown() {
            warn!(error = ?e, "mDNS daemon shutdown failed");
        }
    }
}

/// Start advertising and browsing. `port` is the node's QUIC listen port;
/// discovered peers are reported with ready-to-dial multiaddrs.
pub fn spawn_mdns(
    local_peer_id: &str,
    port: u16,
    events: mpsc::Sender<MdnsEvent>,
) -> Result<MdnsService> {
    let daemon = ServiceDaemon::new()?;
    let instance_name = local_peer_id.to_string();

    let mut properties = HashMap::new();
    properties.insert("peer_id".to_string(), instance_name.clone());
    properties.insert("version".to_string(), PROTOCOL_VERSION.to_string());

    let host_name = format!("rchat-{}.local.", &instance_name[..12.min(instance_name.len())]);
    let service_info = ServiceInfo::new(
        MDNS_SERVICE_TYPE,
        &instance_name,
        &host_name,
        "0.0.0.0",
        port,
        properties,
    )?
    .enable_addr_auto();

    daemon.register(service_info.clone())?;
    info!(instance = %instance_name, port, "mDNS service registered");

    let receiver = daemon.browse(MDNS_SERVICE_TYPE)?;

    let last_seen: Arc<Mutex<HashMap<String, Instant>>> = Arc::new(Mutex::new(HashMap::new()));

    // Browser thread: mdns-sd hands events over a blocking receiver.
    {
        let events = events.clone();
        let my_peer_id = instance_name.clone();
        let last_seen = last_seen.clone();
        std::thread::spawn(move || {
            while let Ok(event) = receiver.recv() {
                match event {
                    ServiceEvent::ServiceResolved(info) => {
                        if let Some(peer) = peer_from_service(&info, &my_peer_id) {
                            if let Ok(mut seen) = last_seen.lock() {
                                seen.insert(peer.peer_id.clone(), Instant::now());
                            }
                            if events.blocking_send(MdnsEvent::Discovered(peer)).is_err() {
                                break;
                            }
                        }
                    }
                    ServiceEvent::ServiceRemoved(_, fullname) => {
                        let peer_id = fullname
                            .split('.')
                            .next()
                            .unwrap_or_default()
                            .to_string();
                        if peer_id.is_empty() || peer_id == my_peer_id {
                            continue;
                        }
                        if let Ok(mut seen) = last_seen.lock() {
                            seen.remove(&peer_id);
                        }
                        if events
                            .blocking_send(MdnsEvent::Expired { peer_id })
                            .is_err()
                        {
                            break;
                        }
                    }
                    _ => {}
                }
            }
            debug!("mDNS browser thread exiting");
        });
    }

    // TTL sweeper: peers that stopped announcing expire after ENTRY_TTL.
    {
        let events = events.clone();
        let last_seen = last_seen.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                let expired: Vec<String> = {
                    let Ok(mut seen) = last_seen.lock() else { break };
                    let now = Instant::now();
                    let gone: Vec<String> = seen
                        .iter()
                        .filter(|(_, t)| now.duration_since(**t) > ENTRY_TTL)
                        .map(|(id, _)| id.clone())
                        .collect();
                    for id in &gone {
                        seen.remove(id);
                    }
                    gone
                };
                for peer_id in expired {
                    if events.send(MdnsEvent::Expired { peer_id }).await.is_err() {
                        return;
                    }
                }
            }
        });
    }

    // Fast-discovery task: while enabled, re-register every 5 s so the
    // daemon re-announces well below its default cadence.
    let (fast_tx, mut fast_rx) = watch::channel(false);
    {
        let daemon = daemon.clone();
        tokio::spawn(async move {
            loop {
                if !*fast_rx.borrow() {
                    if fast_rx.changed().await.is_err() {
                        break;
                    }
                    continue;
                }
                if let Err(e) = daemon.register(service_info.clone()) {
                    debug!(error = ?e, "fast re-announce failed");
                }
                tokio::time::sleep(FAST_ANNOUNCE_INTERVAL).await;
            }
        });
    }

    Ok(MdnsService { daemon, fast_tx })
}

/// Extract a dialable peer from a resolved service, filtering out
/// ourselves and incompatible protocol versions.
fn peer_from_service(info: &ServiceInfo, my_peer_id: &str) -> Option<MdnsPeer> {
    let peer_id = info
        .get_property_val_str("peer_id")
        .map(str::to_string)
        .or_else(|| info.get_fullname().split('.').next().map(str::to_string))?;

    if peer_id == my_peer_id {
        return None;
    }

    match info.get_property_val_str("version") {
        Some(v) if v == PROTOCOL_VERSION.to_string() => {}
        other => {
            debug!(peer = %peer_id, version = ?other, "ignoring peer with different protocol version");
            return None;
        }
    }

    let port = info.get_port();
    let addrs: Vec<String> = info
        .get_addresses()
        .iter()
        .map(|ip| match ip {
            std::net::IpAddr::V4(v4) => format!("/ip4/{v4}/udp/{port}/quic-v1"),
            std::net::IpAddr::V6(v6) => format!("/ip6/{v6}/udp/{port}/quic-v1"),
        })
        .collect();

    if addrs.is_empty() {
        return None;
    }

    debug!(peer = %peer_id, count = addrs.len(), "resolved local peer");
    Some(MdnsPeer { peer_id, addrs })
}
