//! AES-256-GCM encryption for the credential file

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{FeedSyncError, Result};
use crate::types::EncryptedBlob;

const KEY_LEN: usize = 32;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Symmetric cipher for credential blobs
#[derive(Clone)]
pub struct CredentialCipher {
    key: [u8; KEY_LEN],
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCipher").finish_non_exhaustive()
    }
}

impl CredentialCipher {
    /// Accepts 64 hex chars, base64 of exactly 32 bytes, or any other
    /// non-empty passphrase (hashed with SHA-256).
    pub fn from_key_material(material: &str) -> Result<Self> {
        let material = material.trim();
        if material.is_empty() {
            return Err(FeedSyncError::Config(
                "credential encryption key is empty".to_string(),
            ));
        }

        if material.len() == KEY_LEN * 2 {
            if let Ok(bytes) = hex::decode(material) {
                return Ok(Self::from_bytes(&bytes));
            }
        }

        if let Ok(bytes) = BASE64.decode(material) {
            if bytes.len() == KEY_LEN {
                return Ok(Self::from_bytes(&bytes));
            }
        }

        let digest = Sha256::digest(material.as_bytes());
        Ok(Self::from_bytes(&digest))
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&bytes[..KEY_LEN]);
        Self { key }
    }

    /// Generate a fresh random key, hex encoded
    pub fn generate_key_hex() -> String {
        let mut key = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut key);
        hex::encode(key)
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.key).map_err(|e| FeedSyncError::Encryption(e.to_string()))
    }

    /// Encrypt with a random IV. The GCM tag is split out into `auth_tag`.
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedBlob> {
        let cipher = self.cipher()?;

        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let mut sealed = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
            .map_err(|e| FeedSyncError::Encryption(e.to_string()))?;

        let tag = sealed.split_off(sealed.len() - TAG_LEN);

        Ok(EncryptedBlob {
            ciphertext: hex::encode(sealed),
            iv: hex::encode(iv),
            auth_tag: hex::encode(tag),
        })
    }

    /// Decrypt and verify. Any tampering with ciphertext, IV or tag fails.
    pub fn decrypt(&self, blob: &EncryptedBlob) -> Result<String> {
        let ciphertext = decode_field("ciphertext", &blob.ciphertext)?;
        let iv = decode_field("iv", &blob.iv)?;
        let tag = decode_field("authTag", &blob.auth_tag)?;

        if iv.len() != IV_LEN {
            return Err(FeedSyncError::Decryption(format!(
                "iv must be {} bytes, got {}",
                IV_LEN,
                iv.len()
            )));
        }
        if tag.len() != TAG_LEN {
            return Err(FeedSyncError::Decryption(format!(
                "authTag must be {} bytes, got {}",
                TAG_LEN,
                tag.len()
            )));
        }

        let mut sealed = ciphertext;
        sealed.extend_from_slice(&tag);

        let plaintext = self
            .cipher()?
            .decrypt(Nonce::from_slice(&iv), sealed.as_slice())
            .map_err(|_| {
                FeedSyncError::Decryption("authentication tag did not verify".to_string())
            })?;

        String::from_utf8(plaintext)
            .map_err(|e| FeedSyncError::Decryption(format!("plaintext is not UTF-8: {}", e)))
    }
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>> {
    hex::decode(value)
        .map_err(|e| FeedSyncError::Decryption(format!("{} is not valid hex: {}", name, e)))
}
