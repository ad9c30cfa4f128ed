use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use libp2p::PeerId;
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::error::IdentityError;

// Ed25519-based identity. The libp2p PeerId derived from the public key is
// the node's canonical identifier; no account or phone number exists.
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        Self { signing_key }
    }

    pub fn secret_bytes(&self) -> &[u8; 32] {
        self.signing_key.as_bytes()
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// The node's PeerID: the libp2p identifier derived from the Ed25519
    /// public key, rendered base58 via `Display`.
    pub fn peer_id(&self) -> PeerId {
        self.to_libp2p_keypair()
            .public()
            .to_peer_id()
    }

    /// Convert into the libp2p keypair used for the transport handshake,
    /// so the PeerID proven during Noise is bound to this identity.
    pub fn to_libp2p_keypair(&self) -> libp2p::identity::Keypair {
        let secret = Zeroizing::new(*self.signing_key.as_bytes());
        let mut bytes = *secret;
        // Infallible for a 32-byte Ed25519 secret.
        libp2p::identity::Keypair::ed25519_from_bytes(&mut bytes)
            .expect("32-byte ed25519 secret")
    }
}

/// Derive the PeerId a given Ed25519 public key would produce.
pub fn peer_id_from_public_key(pubkey: &[u8; 32]) -> Result<PeerId, IdentityError> {
    let key = libp2p::identity::ed25519::PublicKey::try_from_bytes(pubkey)
        .map_err(|_| IdentityError::InvalidKeyBytes)?;
    Ok(libp2p::identity::PublicKey::from(key).to_peer_id())
}

pub fn verify_signature(
    pubkey_bytes: &[u8; 32],
    message: &[u8],
    signature: &[u8],
) -> Result<(), IdentityError> {
    let verifying_key =
        VerifyingKey::from_bytes(pubkey_bytes).map_err(|_| IdentityError::InvalidKeyBytes)?;
    let signature =
        Signature::from_slice(signature).map_err(|_| IdentityError::InvalidSignature)?;
    verifying_key
        .verify(message, &signature)
        .map_err(|_| IdentityError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_roundtrip() {
        let id = Identity::generate();
        let restored = Identity::from_secret_bytes(id.secret_bytes());
        assert_eq!(id.peer_id(), restored.peer_id());
        assert_eq!(id.public_key_bytes(), restored.public_key_bytes());
    }

    #[test]
    fn sign_verify() {
        let id = Identity::generate();
        let message = b"presence record";
        let signature = id.sign(message);

        assert!(verify_signature(&id.public_key_bytes(), message, &signature.to_bytes()).is_ok());
        assert!(verify_signature(&id.public_key_bytes(), b"wrong", &signature.to_bytes()).is_err());
    }

    #[test]
    fn peer_id_matches_public_key() {
        let id = Identity::generate();
        let derived = peer_id_from_public_key(&id.public_key_bytes()).unwrap();
        assert_eq!(derived, id.peer_id());
    }
}
