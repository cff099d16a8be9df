//! OAuth credential handling
//!
//! Provides:
//! - AES-256-GCM encryption of the token set at rest
//! - Owner-only credential file persistence
//! - Token lifecycle with proactive and 401-driven refresh

mod credential_store;
mod crypto;
mod tokens;

pub use credential_store::CredentialStore;
pub use crypto::CredentialCipher;
pub use tokens::{TokenManager, REFRESH_MARGIN_SECS};
