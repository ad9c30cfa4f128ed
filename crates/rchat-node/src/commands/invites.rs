use crate::error::NodeError;
use crate::invite;
use crate::node::Node;

impl Node {
    /// Mint a 14-character invite password and record the pending
    /// invitation it belongs to. The password is shown to the user and
    /// shared out of band.
    pub async fn generate_invite_password(&self) -> Result<String, NodeError> {
        invite::generate_invite_password(self)
    }

    /// Seal and publish an invitation offer for `invitee` under a
    /// previously generated password.
    pub async fn create_invite(&self, invitee: &str, password: &str) -> Result<(), NodeError> {
        invite::create_invite(self, invitee, password).await
    }

    /// Redeem an invitation: find the sealed offer, decrypt it with the
    /// password, connect and establish mutual trust. Returns the
    /// inviter's PeerID.
    pub async fn redeem_and_connect(
        &self,
        inviter: &str,
        password: &str,
    ) -> Result<String, NodeError> {
        invite::redeem_and_connect(self, inviter, password).await
    }
}
