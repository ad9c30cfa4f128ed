//! Password-protected vault for the identity keypair and API token.
//!
//! On disk: `vault.bin`, a bincode record `{salt, kdf_params, nonce,
//! ciphertext}`. The ciphertext is the secret bundle sealed with
//! XChaCha20-Poly1305 under a key derived from the password via Argon2id
//! (64 MiB, t=3, p=1; parameters stored with the record). A wrong
//! password fails the AEAD open; nothing reveals which half of the
//! KDF+MAC check rejected it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use rchat_shared::constants::{NONCE_SIZE, SALT_SIZE};
use rchat_shared::crypto::{self, KdfParams, SymmetricKey};
use rchat_shared::Identity;
use rchat_store::StoreError;

use crate::error::NodeError;

const VAULT_FILE: &str = "vault.bin";

#[derive(Serialize, Deserialize)]
struct VaultRecord {
    salt: [u8; SALT_SIZE],
    kdf: KdfParams,
    nonce: [u8; NONCE_SIZE],
    ciphertext: Vec<u8>,
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct SecretBundle {
    identity_secret: [u8; 32],
    api_token: Option<String>,
    /// Rendezvous handle (GitHub login) bound to the token.
    handle: Option<String>,
}

pub struct Vault {
    path: PathBuf,
    kdf: KdfParams,
    key: Option<SymmetricKey>,
    bundle: Option<SecretBundle>,
}

impl Vault {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(VAULT_FILE),
            kdf: KdfParams::default(),
            key: None,
            bundle: None,
        }
    }

    /// Override the KDF cost. Tests use this; production keeps defaults.
    pub fn with_kdf_params(data_dir: &Path, kdf: KdfParams) -> Self {
        Self {
            kdf,
            ..Self::new(data_dir)
        }
    }

    pub fn is_setup(&self) -> bool {
        self.path.exists()
    }

    pub fn is_unlocked(&self) -> bool {
        self.key.is_some()
    }

    /// Create the vault: derive the KEK, generate a fresh identity and
    /// persist the sealed bundle. Fails if a vault already exists.
    pub async fn setup(&mut self, password: &str) -> Result<(), NodeError> {
        if self.is_setup() {
            return Err(NodeError::VaultAlreadySetUp);
        }

        let salt = crypto::generate_salt();
        let key = derive_blocking(password.trim().to_string(), salt, self.kdf).await?;

        let identity = Identity::generate();
        let bundle = SecretBundle {
            identity_secret: *identity.secret_bytes(),
            api_token: None,
            handle: None,
        };

        self.write_record(&key, salt, &bundle)?;
        self.key = Some(key);
        self.bundle = Some(bundle);

        tracing::info!(peer_id = %identity.peer_id(), "vault created");
        Ok(())
    }

    /// Unlock with a password. A wrong password surfaces as
    /// `InvalidPassword` and leaves the vault locked.
    pub async fn unlock(&mut self, password: &str) -> Result<(), NodeError> {
        let record = self.read_record()?;
        let key = derive_blocking(password.trim().to_string(), record.salt, record.kdf).await?;

        let plaintext = Zeroizing::new(
            crypto::open_with_nonce(&key, &record.nonce, &record.ciphertext)
                .map_err(|_| NodeError::InvalidPassword)?,
        );

        let bundle: SecretBundle = bincode::deserialize(&plaintext)
            .map_err(|e| StoreError::InvalidData(format!("vault bundle: {e}")))?;

        self.key = Some(key);
        self.bundle = Some(bundle);
        tracing::info!("vault unlocked");
        Ok(())
    }

    pub fn lock(&mut self) {
        if let Some(mut key) = self.key.take() {
            key.zeroize();
        }
        self.bundle = None;
    }

    /// Erase the vault record and forget all secrets. The caller wipes
    /// the dependent state (store, blobs) and acknowledges the loss.
    pub fn reset(&mut self) -> Result<(), NodeError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        self.lock();
        tracing::warn!("vault reset");
        Ok(())
    }

    pub fn identity(&self) -> Result<Identity, NodeError> {
        let bundle = self.bundle.as_ref().ok_or(NodeError::VaultLocked)?;
        Ok(Identity::from_secret_bytes(&bundle.identity_secret))
    }

    pub fn api_token(&self) -> Result<Option<String>, NodeError> {
        let bundle = self.bundle.as_ref().ok_or(NodeError::VaultLocked)?;
        Ok(bundle.api_token.clone())
    }

    pub fn handle(&self) -> Result<Option<String>, NodeError> {
        let bundle = self.bundle.as_ref().ok_or(NodeError::VaultLocked)?;
        Ok(bundle.handle.clone())
    }

    /// Store the rendezvous API token and the handle it belongs to,
    /// re-sealing the bundle under the cached KEK with a fresh nonce.
    pub fn set_api_token(&mut self, token: String, handle: String) -> Result<(), NodeError> {
        let key = self.key.ok_or(NodeError::VaultLocked)?;
        let record = self.read_record()?;

        let bundle = self.bundle.as_mut().ok_or(NodeError::VaultLocked)?;
        bundle.api_token = Some(token);
        bundle.handle = Some(handle);

        let salt = record.salt;
        let bundle_copy = SecretBundle {
            identity_secret: bundle.identity_secret,
            api_token: bundle.api_token.clone(),
            handle: bundle.handle.clone(),
        };
        self.write_record(&key, salt, &bundle_copy)?;
        Ok(())
    }

    fn read_record(&self) -> Result<VaultRecord, NodeError> {
        if !self.path.exists() {
            return Err(NodeError::VaultNotSetUp);
        }
        let raw = std::fs::read(&self.path)?;
        Ok(bincode::deserialize(&raw)
            .map_err(|e| StoreError::InvalidData(format!("vault record: {e}")))?)
    }

    fn write_record(
        &self,
        key: &SymmetricKey,
        salt: [u8; SALT_SIZE],
        bundle: &SecretBundle,
    ) -> Result<(), NodeError> {
        let plaintext = Zeroizing::new(
            bincode::serialize(bundle)
                .map_err(|e| StoreError::InvalidData(format!("vault bundle: {e}")))?,
        );

        let nonce = crypto::generate_nonce();
        let ciphertext = crypto::seal_with_nonce(key, &nonce, &plaintext)
            .map_err(|e| NodeError::Network(e.to_string()))?;

        let record = VaultRecord {
            salt,
            kdf: self.kdf,
            nonce,
            ciphertext,
        };
        let raw = bincode::serialize(&record)
            .map_err(|e| StoreError::InvalidData(format!("vault record: {e}")))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Argon2id is CPU and memory heavy; keep it off the reactor threads.
async fn derive_blocking(
    password: String,
    salt: [u8; SALT_SIZE],
    kdf: KdfParams,
) -> Result<SymmetricKey, NodeError> {
    let key = tokio::task::spawn_blocking(move || {
        let password = Zeroizing::new(password);
        crypto::derive_password_key(password.as_bytes(), &salt, &kdf)
    })
    .await
    .map_err(|e| NodeError::Network(format!("kdf task: {e}")))?
    .map_err(|e| NodeError::Network(e.to_string()))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_kdf() -> KdfParams {
        KdfParams {
            m_cost: 8,
            t_cost: 1,
            p_cost: 1,
        }
    }

    #[tokio::test]
    async fn setup_unlock_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut vault = Vault::with_kdf_params(dir.path(), fast_kdf());

        assert!(!vault.is_setup());
        vault.setup("correcthorse").await.unwrap();
        assert!(vault.is_setup());
        assert!(vault.is_unlocked());
        let peer_id = vault.identity().unwrap().peer_id();

        // Fresh instance, as after a process restart.
        let mut vault = Vault::with_kdf_params(dir.path(), fast_kdf());
        assert!(vault.is_setup());
        assert!(!vault.is_unlocked());
        assert!(matches!(vault.identity(), Err(NodeError::VaultLocked)));

        vault.unlock("correcthorse").await.unwrap();
        assert_eq!(vault.identity().unwrap().peer_id(), peer_id);
    }

    #[tokio::test]
    async fn wrong_password_is_rejected_without_partial_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut vault = Vault::with_kdf_params(dir.path(), fast_kdf());
        vault.setup("correcthorse").await.unwrap();

        let mut vault = Vault::with_kdf_params(dir.path(), fast_kdf());
        match vault.unlock("wrongpass").await {
            Err(NodeError::InvalidPassword) => {}
            other => panic!("expected InvalidPassword, got {other:?}"),
        }
        assert!(!vault.is_unlocked());

        vault.unlock("correcthorse").await.unwrap();
    }

    #[tokio::test]
    async fn double_setup_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut vault = Vault::with_kdf_params(dir.path(), fast_kdf());
        vault.setup("one").await.unwrap();
        assert!(matches!(
            vault.setup("two").await,
            Err(NodeError::VaultAlreadySetUp)
        ));
    }

    #[tokio::test]
    async fn api_token_survives_reseal() {
        let dir = tempfile::tempdir().unwrap();
        let mut vault = Vault::with_kdf_params(dir.path(), fast_kdf());
        vault.setup("pw").await.unwrap();
        let peer_id = vault.identity().unwrap().peer_id();

        vault
            .set_api_token("ghp_token".into(), "ata-sesli".into())
            .unwrap();

        let mut vault = Vault::with_kdf_params(dir.path(), fast_kdf());
        vault.unlock("pw").await.unwrap();
        assert_eq!(vault.api_token().unwrap().as_deref(), Some("ghp_token"));
        assert_eq!(vault.handle().unwrap().as_deref(), Some("ata-sesli"));
        // Identity unchanged by the reseal.
        assert_eq!(vault.identity().unwrap().peer_id(), peer_id);
    }

    #[tokio::test]
    async fn reset_returns_to_pre_setup() {
        let dir = tempfile::tempdir().unwrap();
        let mut vault = Vault::with_kdf_params(dir.path(), fast_kdf());
        vault.setup("pw").await.unwrap();

        vault.reset().unwrap();
        assert!(!vault.is_setup());
        assert!(!vault.is_unlocked());
        assert!(matches!(
            vault.unlock("pw").await,
            Err(NodeError::VaultNotSetUp)
        ));

        // Setting up again mints a new identity.
        vault.setup("pw2").await.unwrap();
        assert!(vault.is_unlocked());
    }
}
