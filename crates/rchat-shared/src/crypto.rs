use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::constants::{
    INVITE_PASSWORD_LEN, NONCE_SIZE, SALT_SIZE, VAULT_KDF_M_COST, VAULT_KDF_P_COST,
    VAULT_KDF_T_COST,
};
use crate::error::CryptoError;

pub type SymmetricKey = [u8; 32];

/// Argon2id cost parameters, persisted alongside every ciphertext so old
/// records stay decryptable when the defaults change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            m_cost: VAULT_KDF_M_COST,
            t_cost: VAULT_KDF_T_COST,
            p_cost: VAULT_KDF_P_COST,
        }
    }
}

pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Derive a 32-byte key from a password and salt via Argon2id.
///
/// This is the memory-hard path used for the vault KEK and invite keys;
/// callers on the async runtime must run it under `spawn_blocking`.
pub fn derive_password_key(
    password: &[u8],
    salt: &[u8],
    params: &KdfParams,
) -> Result<SymmetricKey, CryptoError> {
    let params = Params::new(params.m_cost, params.t_cost, params.p_cost, Some(32))
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut output = [0u8; 32];
    argon2
        .hash_password_into(password, salt, &mut output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(output)
}

// BLAKE3 KDF with domain separation
pub fn derive_context_key(context: &str, material: &[u8]) -> SymmetricKey {
    blake3::derive_key(context, material)
}

/// Returns nonce || ciphertext (24 bytes nonce prepended).
pub fn seal(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

pub fn open(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XNonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Seal with an explicit nonce, for records that persist the nonce as a
/// separate field (the vault file).
pub fn seal_with_nonce(
    key: &SymmetricKey,
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .encrypt(XNonce::from_slice(nonce), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)
}

pub fn open_with_nonce(
    key: &SymmetricKey,
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// BLAKE3 hash of a byte slice, hex encoded. Used as the content address
/// for every transferred file.
pub fn content_hash(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Incremental content hasher for chunked transfers.
pub struct ContentHasher(blake3::Hasher);

impl ContentHasher {
    pub fn new() -> Self {
        Self(blake3::Hasher::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> String {
        self.0.finalize().to_hex().to_string()
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

const PASSWORD_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Generate a 14-character invite password from a 62-symbol alphabet
/// (just over 83 bits of entropy).
pub fn generate_invite_password() -> String {
    let mut rng = rand::rngs::OsRng;
    (0..INVITE_PASSWORD_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..PASSWORD_ALPHABET.len());
            PASSWORD_ALPHABET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let key = derive_context_key("rchat-test", b"material");
        let plaintext = b"an encrypted secret bundle";

        let sealed = seal(&key, plaintext).unwrap();
        let opened = open(&key, &sealed).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn wrong_key_fails() {
        let key1 = derive_context_key("rchat-test", b"one");
        let key2 = derive_context_key("rchat-test", b"two");

        let sealed = seal(&key1, b"secret").unwrap();
        assert!(open(&key2, &sealed).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = derive_context_key("rchat-test", b"material");
        let mut sealed = seal(&key, b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        assert!(open(&key, &sealed).is_err());
    }

    #[test]
    fn short_input_fails() {
        let key = derive_context_key("rchat-test", b"material");
        assert!(open(&key, &[0u8; 5]).is_err());
    }

    #[test]
    fn detached_nonce_roundtrip() {
        let key = derive_context_key("rchat-test", b"vault");
        let nonce = generate_nonce();
        let ct = seal_with_nonce(&key, &nonce, b"bundle").unwrap();
        assert_eq!(open_with_nonce(&key, &nonce, &ct).unwrap(), b"bundle");

        let other = generate_nonce();
        assert!(open_with_nonce(&key, &other, &ct).is_err());
    }

    #[test]
    fn password_kdf_deterministic_per_salt() {
        // Small parameters to keep the test fast.
        let params = KdfParams {
            m_cost: 8,
            t_cost: 1,
            p_cost: 1,
        };
        let salt = [7u8; SALT_SIZE];

        let k1 = derive_password_key(b"hunter2", &salt, &params).unwrap();
        let k2 = derive_password_key(b"hunter2", &salt, &params).unwrap();
        let k3 = derive_password_key(b"hunter3", &salt, &params).unwrap();
        assert_eq!(k1, k2);
        assert_ne!(k1, k3);
    }

    #[test]
    fn invite_password_shape() {
        let p1 = generate_invite_password();
        let p2 = generate_invite_password();
        assert_eq!(p1.len(), INVITE_PASSWORD_LEN);
        assert!(p1.bytes().all(|b| b.is_ascii_alphanumeric()));
        assert_ne!(p1, p2);
    }

    #[test]
    fn content_hash_matches_incremental() {
        let data = vec![42u8; 200_000];
        let whole = content_hash(&data);

        let mut hasher = ContentHasher::new();
        for chunk in data.chunks(65536) {
            hasher.update(chunk);
        }
        assert_eq!(hasher.finalize(), whole);
    }
}
