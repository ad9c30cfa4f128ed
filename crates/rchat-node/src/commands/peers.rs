use crate::error::NodeError;
use crate::node::Node;

impl Node {
    /// PeerIDs of every trusted peer, pinned first.
    pub async fn get_trusted_peers(&self) -> Result<Vec<String>, NodeError> {
        let peers = self.store()?.get_peers()?;
        Ok(peers.into_iter().map(|p| p.id).collect())
    }

    /// Forget a peer entirely: session, chat log and envelope assignment
    /// go with it.
    pub async fn delete_peer(&self, peer_id: &str) -> Result<(), NodeError> {
        self.inner.sessions.close_session(peer_id);
        self.store()?.delete_peer(peer_id)?;
        tracing::info!(peer = %peer_id, "peer deleted");
        Ok(())
    }

    pub async fn get_pinned_peers(&self) -> Result<Vec<String>, NodeError> {
        Ok(self.store()?.get_pinned_peers()?)
    }

    pub async fn set_peer_pinned(&self, peer_id: &str, pinned: bool) -> Result<(), NodeError> {
        self.store()?.set_peer_pinned(peer_id, pinned)?;
        Ok(())
    }
}
