// src/crypto.rs
// Credential Encryption (§4.1): authenticated symmetric encryption with a
// self-describing envelope `ENC:v1:<base64(nonce||ciphertext||tag)>`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;

const ENVELOPE_PREFIX: &str = "ENC:v1:";
const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum CredentialCryptoError {
    #[error("invalid envelope encoding")]
    InvalidEncoding,
    #[error("envelope too short")]
    Truncated,
    #[error("decryption failed")]
    DecryptionFailed,
}

/// Derives a 256-bit key from the configured master key string. The spec
/// leaves key derivation implementation-defined ("HKDF-like or fixed SHA-256
/// over the configured master-key string"); this crate uses a single SHA-256
/// pass, matching the simpler of the two options named in §4.1.
fn derive_key(master_key: &str) -> Key<Aes256Gcm> {
    let mut hasher = Sha256::new();
    hasher.update(master_key.as_bytes());
    let digest = hasher.finalize();
    *Key::<Aes256Gcm>::from_slice(&digest)
}

#[derive(Clone)]
pub struct CredentialCipher {
    key: Key<Aes256Gcm>,
}

impl CredentialCipher {
    pub fn new(master_key: &str) -> Self {
        Self {
            key: derive_key(master_key),
        }
    }

    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with(ENVELOPE_PREFIX)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CredentialCryptoError> {
        let cipher = Aes256Gcm::new(&self.key);
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CredentialCryptoError::DecryptionFailed)?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);

        Ok(format!("{ENVELOPE_PREFIX}{}", BASE64.encode(payload)))
    }

    /// Returns the input unchanged if it is not an encrypted envelope
    /// (legacy plaintext passthrough, §4.1), logging once at warn level.
    pub fn decrypt(&self, value: &str) -> Result<String, CredentialCryptoError> {
        if !Self::is_encrypted(value) {
            warn!("decrypting legacy plaintext credential (no ENC:v1: envelope)");
            return Ok(value.to_string());
        }

        let encoded = &value[ENVELOPE_PREFIX.len()..];
        let payload = BASE64
            .decode(encoded)
            .map_err(|_| CredentialCryptoError::InvalidEncoding)?;

        if payload.len() < NONCE_LEN {
            return Err(CredentialCryptoError::Truncated);
        }

        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let cipher = Aes256Gcm::new(&self.key);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CredentialCryptoError::DecryptionFailed)?;

        String::from_utf8(plaintext).map_err(|_| CredentialCryptoError::DecryptionFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> CredentialCipher {
        CredentialCipher::new("test-master-key-not-for-production")
    }

    #[test]
    fn roundtrip_preserves_plaintext() {
        let c = cipher();
        let encrypted = c.encrypt("hunter2").unwrap();
        assert!(CredentialCipher::is_encrypted(&encrypted));
        assert_eq!(c.decrypt(&encrypted).unwrap(), "hunter2");
    }

    #[test]
    fn legacy_plaintext_passes_through_unchanged() {
        let c = cipher();
        assert_eq!(c.decrypt("hunter2").unwrap(), "hunter2");
    }

    #[test]
    fn is_encrypted_detects_envelope_prefix() {
        assert!(CredentialCipher::is_encrypted("ENC:v1:abc"));
        assert!(!CredentialCipher::is_encrypted("plaintext"));
    }

    #[test]
    fn two_encryptions_of_same_plaintext_differ_by_nonce() {
        let c = cipher();
        let a = c.encrypt("same").unwrap();
        let b = c.encrypt("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let encrypted = cipher().encrypt("secret").unwrap();
        let other = CredentialCipher::new("a-different-master-key");
        assert!(other.decrypt(&encrypted).is_err());
    }
}
