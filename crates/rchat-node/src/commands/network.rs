use std::sync::atomic::Ordering;
use std::time::Duration;

use libp2p::PeerId;

use rchat_net::SwarmCommand;

use crate::error::NodeError;
use crate::node::Node;

/// Fast discovery reverts on its own after this long.
const FAST_DISCOVERY_REVERT: Duration = Duration::from_secs(5 * 60);

impl Node {
    /// Raise or restore the mDNS announce frequency. Enabled while the
    /// "add person" flow is open; auto-reverts after five minutes.
    pub async fn set_fast_discovery(&self, enabled: bool) -> Result<(), NodeError> {
        let generation = self.inner.fast_gen.fetch_add(1, Ordering::SeqCst) + 1;

        {
            let net = self.inner.net.lock().await;
            if let Some(net) = net.as_ref() {
                if let Some(mdns) = net.mdns.as_ref() {
                    mdns.set_fast_discovery(enabled);
                }
            }
        }

        if enabled {
            let node = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(FAST_DISCOVERY_REVERT).await;
                // A newer toggle supersedes this revert.
                if node.inner.fast_gen.load(Ordering::SeqCst) == generation {
                    let net = node.inner.net.lock().await;
                    if let Some(net) = net.as_ref() {
                        if let Some(mdns) = net.mdns.as_ref() {
                            mdns.set_fast_discovery(false);
                        }
                    }
                }
            });
        }
        Ok(())
    }

    /// Online mode: rendezvous publish/poll and outbound dials run only
    /// while enabled. Inbound local-network connections always work.
    pub async fn toggle_online_status(&self, enabled: bool) -> Result<(), NodeError> {
        self.inner.online.store(enabled, Ordering::Relaxed);

        {
            let mut config = self.inner.config.lock().await;
            config.online_by_default = enabled;
            if let Err(e) = config.save(&self.inner.data_dir) {
                tracing::warn!(error = %e, "could not persist online mode");
            }
        }

        self.emit_auth_status().await;
        Ok(())
    }

    /// Explicitly dial a known peer (the UI's "connect" button).
    pub async fn request_connection(&self, peer_id: &str) -> Result<(), NodeError> {
        let peer: PeerId = peer_id
            .parse()
            .map_err(|_| NodeError::UnknownPeer(peer_id.to_string()))?;

        let cmd_tx = self.cmd_tx().await.ok_or(NodeError::NoRoute)?;
        cmd_tx
            .send(SwarmCommand::Dial(peer))
            .await
            .map_err(|_| NodeError::NoRoute)?;
        Ok(())
    }
}
