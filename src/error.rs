//! Error types for feedsync

use thiserror::Error;

/// Result type alias for feedsync operations
pub type Result<T> = std::result::Result<T, FeedSyncError>;

/// Main error type for feedsync
#[derive(Error, Debug)]
pub enum FeedSyncError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("No stored credential at {0}; run the authorization flow first")]
    NoCredential(String),

    #[error("No refresh token on file")]
    NoRefreshToken,

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    #[error("Remote API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FeedSyncError {
    /// Check if error is retryable through the normal attempt-increment path
    pub fn is_retryable(&self) -> bool {
        match self {
            FeedSyncError::Http(_) | FeedSyncError::Timeout(_) | FeedSyncError::Auth(_) => true,
            FeedSyncError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Configuration and credential-store errors that must stop the cycle.
    ///
    /// A broken credential store otherwise shows up as silent sync stoppage.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FeedSyncError::NoCredential(_)
                | FeedSyncError::NoRefreshToken
                | FeedSyncError::Decryption(_)
                | FeedSyncError::Encryption(_)
                | FeedSyncError::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(FeedSyncError::Timeout(1000).is_retryable());
        assert!(FeedSyncError::Api {
            status: 429,
            body: String::new()
        }
        .is_retryable());
        assert!(!FeedSyncError::Api {
            status: 400,
            body: String::new()
        }
        .is_retryable());

        assert!(FeedSyncError::Decryption("bad tag".into()).is_fatal());
        assert!(FeedSyncError::NoCredential("/tmp/x".into()).is_fatal());
        assert!(!FeedSyncError::Timeout(1000).is_fatal());
    }
}
