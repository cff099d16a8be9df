//! Engine configuration
//!
//! Everything can be set from `FEEDSYNC_*` environment variables; the CLI
//! exposes the same knobs as flags.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FeedSyncError, Result};

/// Drain-cycle tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Delay between periodic drain cycles
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,
    /// Minimum queued changes before a cycle is worth running
    #[serde(default = "default_min_changes")]
    pub min_changes: usize,
    /// Oldest-entry age that forces a cycle regardless of `min_changes`
    #[serde(default = "default_staleness_threshold_ms")]
    pub staleness_threshold_ms: u64,
    /// Maximum item ids per remote call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Entries at or above this many attempts are no longer sent
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base for the recorded exponential backoff
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    /// Timeout attached to every outbound call, including token refresh
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_sync_interval_ms() -> u64 {
    5 * 60 * 1000
}

fn default_min_changes() -> usize {
    10
}

fn default_staleness_threshold_ms() -> u64 {
    15 * 60 * 1000
}

fn default_batch_size() -> usize {
    50
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_backoff_ms() -> u64 {
    60_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval_ms: default_sync_interval_ms(),
            min_changes: default_min_changes(),
            staleness_threshold_ms: default_staleness_threshold_ms(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl SyncConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn staleness_threshold(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.staleness_threshold_ms as i64)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(FeedSyncError::Config("batch_size must be at least 1".into()));
        }
        if self.max_retries == 0 {
            return Err(FeedSyncError::Config("max_retries must be at least 1".into()));
        }
        if self.sync_interval_ms == 0 {
            return Err(FeedSyncError::Config(
                "sync_interval_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Remote service endpoints and OAuth client
#[derive(Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Service name used as the usage-tracking key
    pub service: String,
    /// Base of the reader API, e.g. `https://www.inoreader.com/reader/api/0`
    pub api_base_url: String,
    /// OAuth token endpoint used for the refresh grant
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RemoteConfig")
            .field("service", &self.service)
            .field("api_base_url", &self.api_base_url)
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// Where and how the credential is kept at rest
#[derive(Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    pub credential_path: PathBuf,
    /// 64 hex chars, base64 of 32 bytes, or a passphrase
    pub encryption_key: String,
}

impl std::fmt::Debug for CredentialConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("CredentialConfig")
            .field("credential_path", &self.credential_path)
            .field("encryption_key", &"[REDACTED]")
            .finish()
    }
}

/// Complete configuration surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSyncConfig {
    pub db_path: String,
    pub sync: SyncConfig,
    pub remote: RemoteConfig,
    pub credentials: CredentialConfig,
}

/// Default data directory (`~/.local/share/feedsync` on Linux)
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("feedsync")
}

/// Expand `~` and environment variables in a user-supplied path
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required_env(name: &str) -> Result<String> {
    env_var(name).ok_or_else(|| FeedSyncError::Config(format!("{} is not set", name)))
}

fn parsed_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env_var(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| FeedSyncError::Config(format!("{} has invalid value {:?}", name, raw))),
        None => Ok(default),
    }
}

impl FeedSyncConfig {
    /// Build configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = SyncConfig::default();
        let sync = SyncConfig {
            sync_interval_ms: parsed_env("FEEDSYNC_SYNC_INTERVAL_MS", defaults.sync_interval_ms)?,
            min_changes: parsed_env("FEEDSYNC_MIN_CHANGES", defaults.min_changes)?,
            staleness_threshold_ms: parsed_env(
                "FEEDSYNC_STALENESS_THRESHOLD_MS",
                defaults.staleness_threshold_ms,
            )?,
            batch_size: parsed_env("FEEDSYNC_BATCH_SIZE", defaults.batch_size)?,
            max_retries: parsed_env("FEEDSYNC_MAX_RETRIES", defaults.max_retries)?,
            base_backoff_ms: parsed_env("FEEDSYNC_BASE_BACKOFF_MS", defaults.base_backoff_ms)?,
            request_timeout_ms: parsed_env(
                "FEEDSYNC_REQUEST_TIMEOUT_MS",
                defaults.request_timeout_ms,
            )?,
        };

        let remote = RemoteConfig {
            service: env_var("FEEDSYNC_SERVICE").unwrap_or_else(|| "inoreader".to_string()),
            api_base_url: env_var("FEEDSYNC_API_BASE_URL")
                .unwrap_or_else(|| "https://www.inoreader.com/reader/api/0".to_string()),
            token_url: env_var("FEEDSYNC_TOKEN_URL")
                .unwrap_or_else(|| "https://www.inoreader.com/oauth2/token".to_string()),
            client_id: required_env("FEEDSYNC_CLIENT_ID")?,
            client_secret: required_env("FEEDSYNC_CLIENT_SECRET")?,
        };

        let data_dir = default_data_dir();
        let credentials = CredentialConfig {
            credential_path: env_var("FEEDSYNC_CREDENTIAL_PATH")
                .map(|p| expand_path(&p))
                .unwrap_or_else(|| data_dir.join("credentials.json")),
            encryption_key: required_env("FEEDSYNC_ENCRYPTION_KEY")?,
        };

        let db_path = env_var("FEEDSYNC_DB_PATH")
            .map(|p| expand_path(&p).to_string_lossy().into_owned())
            .unwrap_or_else(|| data_dir.join("feedsync.db").to_string_lossy().into_owned());

        let config = Self {
            db_path,
            sync,
            remote,
            credentials,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.sync.validate()?;
        if self.credentials.encryption_key.trim().is_empty() {
            return Err(FeedSyncError::Config("encryption key must not be empty".into()));
        }
        if self.remote.api_base_url.trim().is_empty() {
            return Err(FeedSyncError::Config("api_base_url must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sync_interval(), Duration::from_secs(300));
        assert_eq!(config.staleness_threshold(), chrono::Duration::minutes(15));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = SyncConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(FeedSyncError::Config(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SyncConfig = serde_json::from_str(r#"{"batch_size": 4}"#).unwrap();
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.max_retries, 5);
    }

    #[test]
    fn test_secrets_redacted_in_debug() {
        let remote = RemoteConfig {
            service: "inoreader".into(),
            api_base_url: "https://example.test/reader/api/0".into(),
            token_url: "https://example.test/oauth2/token".into(),
            client_id: "client".into(),
            client_secret: "hunter2".into(),
        };
        assert!(!format!("{:?}", remote).contains("hunter2"));
    }
}
