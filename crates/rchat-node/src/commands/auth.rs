use std::sync::atomic::Ordering;

use serde::Serialize;
use tracing::warn;

use rchat_net::rendezvous;

use crate::error::NodeError;
use crate::node::Node;
use crate::oauth::{self, AuthState};

#[derive(Debug, Clone, Serialize)]
pub struct AuthStatus {
    pub is_setup: bool,
    pub is_unlocked: bool,
    pub is_online: bool,
}

impl Node {
    pub async fn check_auth_status(&self) -> Result<AuthStatus, NodeError> {
        let vault = self.inner.vault.lock().await;
        Ok(AuthStatus {
            is_setup: vault.is_setup(),
            is_unlocked: vault.is_unlocked(),
            is_online: self.inner.online.load(Ordering::Relaxed),
        })
    }

    /// Create the vault and identity, then bring the network up.
    pub async fn init_vault(&self, password: &str) -> Result<(), NodeError> {
        self.inner.vault.lock().await.setup(password).await?;
        self.refresh_credential_cells().await;

        if let Err(e) = self.start_network().await {
            warn!(error = %e, "network start failed after setup");
        }
        self.emit_auth_status().await;
        Ok(())
    }

    /// Unlock with the vault password. Wrong password surfaces as
    /// `InvalidPassword` and changes nothing.
    pub async fn unlock_vault(&self, password: &str) -> Result<(), NodeError> {
        self.inner.vault.lock().await.unlock(password).await?;
        self.refresh_credential_cells().await;

        if let Err(e) = self.start_network().await {
            warn!(error = %e, "network start failed after unlock");
        }
        self.emit_auth_status().await;
        Ok(())
    }

    /// Destroy the vault and everything derived from the identity: the
    /// trust list, the chat log, all blobs. The caller has confirmed.
    pub async fn reset_vault(&self) -> Result<(), NodeError> {
        self.stop_network().await;

        self.inner.vault.lock().await.reset()?;
        self.store()?.wipe_all()?;
        self.refresh_credential_cells().await;

        self.emit_auth_status().await;
        Ok(())
    }

    /// Begin the GitHub OAuth device flow for the rendezvous token.
    pub async fn start_github_auth(&self) -> Result<AuthState, NodeError> {
        oauth::start_device_flow().await
    }

    /// One polling step of the device flow; the UI retries on the
    /// interval GitHub specified and stops when its modal closes.
    pub async fn poll_github_auth(&self, device_code: &str) -> Result<String, NodeError> {
        oauth::poll_for_token(device_code).await
    }

    /// Persist the rendezvous API token in the vault, binding it to the
    /// account's login, which becomes this node's handle.
    pub async fn save_api_token(&self, token: &str) -> Result<(), NodeError> {
        let username = rendezvous::fetch_github_username(token)
            .await
            .map_err(|e| NodeError::Network(e.to_string()))?;

        self.inner
            .vault
            .lock()
            .await
            .set_api_token(token.to_string(), username)?;
        self.refresh_credential_cells().await;
        Ok(())
    }
}
