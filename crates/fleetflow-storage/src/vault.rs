//! Credential vault - authenticated encryption for secrets at rest.
//!
//! Credential bundles are sealed with AES-256-GCM before they touch the
//! database and only decrypted when handed to an authenticated agent.
//! Ciphertexts use a `nonce:tag:body` hex envelope. Decryption tries every
//! configured key in order so values sealed before a key rotation stay
//! readable. A value that does not match the envelope format is passed
//! through unchanged to tolerate historical plaintext entries.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::Rng;
use thiserror::Error;

const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;
pub const KEY_SIZE: usize = 32;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Vault requires at least one encryption key")]
    NoKeys,
    #[error("Vault key must be {KEY_SIZE} bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("Failed to encrypt credential bundle")]
    EncryptionFailed,
    #[error("Credential unavailable: no configured key can decrypt this value")]
    CredentialUnavailable,
}

/// Symmetric vault with key-rotation support.
///
/// The first key seals new values; all keys are candidates for decryption.
pub struct CredentialVault {
    ciphers: Vec<Aes256Gcm>,
}

impl CredentialVault {
    pub fn new<K: AsRef<[u8]>>(keys: &[K]) -> Result<Self, VaultError> {
        if keys.is_empty() {
            return Err(VaultError::NoKeys);
        }

        let mut ciphers = Vec::with_capacity(keys.len());
        for key in keys {
            let bytes = key.as_ref();
            if bytes.len() != KEY_SIZE {
                return Err(VaultError::InvalidKeyLength(bytes.len()));
            }
            let cipher = Aes256Gcm::new_from_slice(bytes)
                .map_err(|_| VaultError::InvalidKeyLength(bytes.len()))?;
            ciphers.push(cipher);
        }

        Ok(Self { ciphers })
    }

    /// Seal a plaintext credential into the `nonce:tag:body` envelope.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        // aes-gcm appends the 16-byte tag to the ciphertext
        let sealed = self.ciphers[0]
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| VaultError::EncryptionFailed)?;
        let (body, tag) = sealed.split_at(sealed.len() - TAG_SIZE);

        Ok(format!(
            "{}:{}:{}",
            hex::encode(nonce_bytes),
            hex::encode(tag),
            hex::encode(body)
        ))
    }

    /// Open an enveloped value, trying each configured key in order.
    ///
    /// Values that are not in envelope form are returned unchanged; callers
    /// must not treat that as an error.
    pub fn decrypt(&self, value: &str) -> Result<String, VaultError> {
        let Some((nonce_bytes, tag, body)) = parse_envelope(value) else {
            return Ok(value.to_string());
        };

        let nonce = Nonce::from_slice(&nonce_bytes);
        let mut sealed = body;
        sealed.extend_from_slice(&tag);

        for cipher in &self.ciphers {
            if let Ok(plaintext) = cipher.decrypt(nonce, sealed.as_slice()) {
                return String::from_utf8(plaintext)
                    .map_err(|_| VaultError::CredentialUnavailable);
            }
        }

        Err(VaultError::CredentialUnavailable)
    }
}

/// Split `nonce:tag:body` into raw parts, or None if the value is not an
/// envelope (wrong part count, non-hex, or wrong nonce/tag sizes).
fn parse_envelope(value: &str) -> Option<([u8; NONCE_SIZE], Vec<u8>, Vec<u8>)> {
    let mut parts = value.splitn(3, ':');
    let nonce = hex::decode(parts.next()?).ok()?;
    let tag = hex::decode(parts.next()?).ok()?;
    let body = hex::decode(parts.next()?).ok()?;

    if tag.len() != TAG_SIZE {
        return None;
    }
    let nonce: [u8; NONCE_SIZE] = nonce.try_into().ok()?;
    Some((nonce, tag, body))
}
