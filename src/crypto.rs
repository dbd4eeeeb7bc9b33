//! Credential encryption at rest.
//!
//! Service credentials are stored as an AES-256-GCM envelope:
//! `base64(nonce || ciphertext)` over the credential JSON. The key is a
//! base64-encoded 32-byte value supplied via config or environment.

use aes_gcm::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use thiserror::Error;

use crate::models::Credentials;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("credential key must be base64 of exactly 32 bytes")]
    BadKey,
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed (wrong key or corrupted envelope)")]
    Decrypt,
    #[error("malformed credential envelope")]
    BadEnvelope,
}

/// Encrypts and decrypts stored credentials.
#[derive(Clone)]
pub struct CredentialVault {
    key: [u8; 32],
}

impl CredentialVault {
    /// Build a vault from a base64-encoded 32-byte key.
    pub fn from_base64_key(encoded: &str) -> Result<Self, VaultError> {
        let bytes = BASE64.decode(encoded.trim()).map_err(|_| VaultError::BadKey)?;
        let key: [u8; 32] = bytes.try_into().map_err(|_| VaultError::BadKey)?;
        Ok(Self { key })
    }

    /// Generate a fresh random key, base64-encoded for storage in config.
    pub fn generate_key() -> String {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        BASE64.encode(key)
    }

    /// Encrypt credentials into a storable envelope.
    pub fn seal(&self, creds: &Credentials) -> Result<String, VaultError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let plaintext = serde_json::to_vec(creds).map_err(|_| VaultError::Encrypt)?;
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|_| VaultError::Encrypt)?;

        let mut envelope = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(envelope))
    }

    /// Decrypt a stored envelope back into credentials.
    pub fn open(&self, envelope: &str) -> Result<Credentials, VaultError> {
        let raw = BASE64
            .decode(envelope.trim())
            .map_err(|_| VaultError::BadEnvelope)?;
        if raw.len() <= NONCE_LEN {
            return Err(VaultError::BadEnvelope);
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| VaultError::Decrypt)?;

        serde_json::from_slice(&plaintext).map_err(|_| VaultError::BadEnvelope)
    }
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault").finish_non_exhaustive()
    }
}
