//! Encrypted-at-rest credential file

use std::io::Write;
use std::path::{Path, PathBuf};

use super::crypto::CredentialCipher;
use crate::error::{FeedSyncError, Result};
use crate::types::{Credential, EncryptedBlob};

/// JSON `{ciphertext, iv, authTag}` file holding the OAuth token set
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
    cipher: CredentialCipher,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>, cipher: CredentialCipher) -> Self {
        Self {
            path: path.into(),
            cipher,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read and decrypt the stored credential
    pub fn load(&self) -> Result<Credential> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FeedSyncError::NoCredential(
                    self.path.display().to_string(),
                ))
            }
            Err(e) => return Err(e.into()),
        };

        let blob: EncryptedBlob = serde_json::from_str(&raw).map_err(|e| {
            FeedSyncError::Decryption(format!("credential file is not a valid blob: {}", e))
        })?;
        let plaintext = self.cipher.decrypt(&blob)?;

        serde_json::from_str(&plaintext).map_err(|e| {
            FeedSyncError::Decryption(format!("decrypted credential is malformed: {}", e))
        })
    }

    /// Encrypt and persist, owner-only. Writes a sibling temp file then renames over.
    pub fn save(&self, credential: &Credential) -> Result<()> {
        let plaintext = serde_json::to_string(credential)?;
        let blob = self.cipher.encrypt(&plaintext)?;
        let serialized = serde_json::to_string_pretty(&blob)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut file = owner_only_options().open(&tmp_path)?;
            file.write_all(serialized.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        restrict_permissions(&self.path)?;

        tracing::debug!(path = %self.path.display(), "Persisted encrypted credential");
        Ok(())
    }

    pub fn delete(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(unix)]
fn owner_only_options() -> std::fs::OpenOptions {
    use std::os::unix::fs::OpenOptionsExt;
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true).mode(0o600);
    options
}

#[cfg(not(unix))]
fn owner_only_options() -> std::fs::OpenOptions {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    options
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
