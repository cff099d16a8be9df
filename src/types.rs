//! Core types for feedsync

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Row id of a pending queue entry
pub type QueueEntryId = i64;

/// Local mutation awaiting propagation to the remote service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Read,
    Unread,
    Star,
    Unstar,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Read => "read",
            ActionType::Unread => "unread",
            ActionType::Star => "star",
            ActionType::Unstar => "unstar",
        }
    }

    /// The remote state tag this action touches
    pub fn tag(&self) -> StateTag {
        match self {
            ActionType::Read | ActionType::Unread => StateTag::Read,
            ActionType::Star | ActionType::Unstar => StateTag::Starred,
        }
    }

    /// Whether the tag is added (true) or removed (false)
    pub fn adds_tag(&self) -> bool {
        matches!(self, ActionType::Read | ActionType::Star)
    }
}

impl std::str::FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "read" => Ok(ActionType::Read),
            "unread" => Ok(ActionType::Unread),
            "star" => Ok(ActionType::Star),
            "unstar" => Ok(ActionType::Unstar),
            _ => Err(format!("Unknown action type: {}", s)),
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote system tags mutated by queue entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateTag {
    Read,
    Starred,
}

impl StateTag {
    /// Stream id understood by the remote edit-tag endpoint
    pub fn stream_id(&self) -> &'static str {
        match self {
            StateTag::Read => "user/-/state/com.google/read",
            StateTag::Starred => "user/-/state/com.google/starred",
        }
    }
}

/// A durable pending mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: QueueEntryId,
    pub action_type: ActionType,
    /// Identifier the remote service assigned to the article
    pub remote_item_id: String,
    pub sync_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

/// Queue counters for observability
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Entries still eligible for sync (`sync_attempts < max`)
    pub pending: u64,
    /// Entries that exhausted their attempts
    pub failed: u64,
    /// Eligible entries that have failed at least once
    pub retry_pending: u64,
    pub oldest_pending_at: Option<DateTime<Utc>>,
}

/// Plaintext OAuth token set. Only ever lives in process memory.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds from `created_at`
    pub expires_in: i64,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub scope: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl Credential {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + chrono::Duration::seconds(self.expires_in)
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token
            .as_deref()
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// At-rest form of a credential (hex-encoded AES-256-GCM output)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    pub ciphertext: String,
    pub iv: String,
    #[serde(rename = "authTag")]
    pub auth_tag: String,
}

/// One row of API usage per (service, day)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub service: String,
    pub date: NaiveDate,
    pub count: i64,
    pub zone1_usage: Option<i64>,
    pub zone1_limit: Option<i64>,
    pub zone2_usage: Option<i64>,
    pub zone2_limit: Option<i64>,
    pub reset_after_seconds: Option<i64>,
}

impl UsageRecord {
    pub fn empty(service: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            service: service.into(),
            date,
            count: 0,
            zone1_usage: None,
            zone1_limit: None,
            zone2_usage: None,
            zone2_limit: None,
            reset_after_seconds: None,
        }
    }
}

/// Fields supplied to a single `track` call. `None` means "not reported".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageUpdate {
    pub increment: Option<i64>,
    pub zone1_usage: Option<i64>,
    pub zone1_limit: Option<i64>,
    pub zone2_usage: Option<i64>,
    pub zone2_limit: Option<i64>,
    pub reset_after: Option<i64>,
}

impl UsageUpdate {
    pub fn increment(by: i64) -> Self {
        Self {
            increment: Some(by),
            ..Default::default()
        }
    }

    /// True if any quota field is present, which switches `track` to merge mode
    pub fn has_zone_fields(&self) -> bool {
        self.zone1_usage.is_some()
            || self.zone1_limit.is_some()
            || self.zone2_usage.is_some()
            || self.zone2_limit.is_some()
            || self.reset_after.is_some()
    }

    /// Overlay the supplied fields onto `record`, leaving the rest untouched
    pub fn apply_to(&self, record: &mut UsageRecord) {
        if let Some(by) = self.increment {
            record.count += by;
        }
        if let Some(v) = self.zone1_usage {
            record.zone1_usage = Some(v);
        }
        if let Some(v) = self.zone1_limit {
            record.zone1_limit = Some(v);
        }
        if let Some(v) = self.zone2_usage {
            record.zone2_usage = Some(v);
        }
        if let Some(v) = self.zone2_limit {
            record.zone2_limit = Some(v);
        }
        if let Some(v) = self.reset_after {
            record.reset_after_seconds = Some(v);
        }
    }
}

/// Outcome of a usage write. Tracking never raises.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<UsageRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TrackResult {
    pub fn ok(record: UsageRecord) -> Self {
        Self {
            success: true,
            data: Some(record),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Read/starred snapshot of an article
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleFlags {
    pub is_read: bool,
    pub is_starred: bool,
}

/// Local view of an article as far as reconciliation cares
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalArticle {
    pub id: i64,
    pub remote_id: String,
    pub is_read: bool,
    pub is_starred: bool,
    /// Set when the user mutated read/starred locally
    pub local_updated_at: Option<DateTime<Utc>>,
    /// Last time local state was confirmed against the remote
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl LocalArticle {
    pub fn flags(&self) -> ArticleFlags {
        ArticleFlags {
            is_read: self.is_read,
            is_starred: self.is_starred,
        }
    }
}

/// Remote record as pulled from the feed service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteArticle {
    pub remote_id: String,
    pub is_read: bool,
    pub is_starred: bool,
}

impl RemoteArticle {
    pub fn flags(&self) -> ArticleFlags {
        ArticleFlags {
            is_read: self.is_read,
            is_starred: self.is_starred,
        }
    }
}

/// Which flags disagree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    ReadStatus,
    StarredStatus,
    Both,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::ReadStatus => "read_status",
            ConflictType::StarredStatus => "starred_status",
            ConflictType::Both => "both",
        }
    }
}

/// Which side's state is kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Local,
    /// The remote exposes no change timestamps, so precedence cannot be proven
    #[default]
    Remote,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Local => "local",
            Resolution::Remote => "remote",
        }
    }
}

/// Audit record for one detected divergence. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictLogEntry {
    pub timestamp: DateTime<Utc>,
    pub sync_session_id: String,
    pub entity_id: i64,
    pub remote_id: String,
    pub conflict_type: ConflictType,
    pub local_value: ArticleFlags,
    pub remote_value: ArticleFlags,
    pub resolution: Resolution,
    pub last_local_update: Option<DateTime<Utc>>,
    pub last_remote_known_update: Option<DateTime<Utc>>,
    pub note: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_type_round_trip_str() {
        for action in [
            ActionType::Read,
            ActionType::Unread,
            ActionType::Star,
            ActionType::Unstar,
        ] {
            assert_eq!(action.as_str().parse::<ActionType>(), Ok(action));
        }
        assert!("archive".parse::<ActionType>().is_err());
    }

    #[test]
    fn test_action_tag_mapping() {
        assert_eq!(ActionType::Unread.tag(), StateTag::Read);
        assert!(!ActionType::Unread.adds_tag());
        assert_eq!(ActionType::Star.tag(), StateTag::Starred);
        assert!(ActionType::Star.adds_tag());
    }

    #[test]
    fn test_credential_debug_redacts_tokens() {
        let credential = Credential {
            access_token: "secret-access".to_string(),
            refresh_token: Some("secret-refresh".to_string()),
            expires_in: 3600,
            token_type: "Bearer".to_string(),
            scope: Some("read write".to_string()),
            created_at: Utc::now(),
        };
        let debug = format!("{:?}", credential);
        assert!(!debug.contains("secret-access"));
        assert!(!debug.contains("secret-refresh"));
    }

    #[test]
    fn test_usage_update_apply_keeps_unsupplied_fields() {
        let mut record = UsageRecord::empty("reader", NaiveDate::from_ymd_opt(2026, 1, 2).unwrap());
        record.zone2_usage = Some(40);
        record.zone2_limit = Some(100);

        let update = UsageUpdate {
            zone1_usage: Some(7),
            zone1_limit: Some(1000),
            ..Default::default()
        };
        update.apply_to(&mut record);

        assert_eq!(record.zone1_usage, Some(7));
        assert_eq!(record.zone2_usage, Some(40));
        assert_eq!(record.zone2_limit, Some(100));
        assert_eq!(record.count, 0);
    }

    #[test]
    fn test_encrypted_blob_uses_auth_tag_key() {
        let blob = EncryptedBlob {
            ciphertext: "00".into(),
            iv: "11".into(),
            auth_tag: "22".into(),
        };
        let json = serde_json::to_value(&blob).unwrap();
        assert_eq!(json["authTag"], "22");
    }
}
