//! Composition root wiring stores, auth, usage and the orchestrator

use std::sync::Arc;

use crate::auth::{CredentialCipher, CredentialStore, TokenManager};
use crate::clock::{Clock, SystemClock};
use crate::config::FeedSyncConfig;
use crate::error::Result;
use crate::remote::{HttpTransport, ReqwestTransport};
use crate::storage::{ConflictLogSink, QueueStore, Storage};
use crate::types::{ActionType, QueueEntry, Resolution};
use crate::usage::UsageTracker;

use super::conflict::ConflictDetector;
use super::orchestrator::SyncOrchestrator;

/// Builder for [`SyncEngine`]. Anything not supplied gets the production default.
pub struct SyncEngineBuilder {
    config: FeedSyncConfig,
    storage: Option<Storage>,
    transport: Option<Arc<dyn HttpTransport>>,
    clock: Option<Arc<dyn Clock>>,
    conflict_sink: Option<Arc<dyn ConflictLogSink>>,
    conflict_policy: Resolution,
}

impl SyncEngineBuilder {
    pub fn storage(mut self, storage: Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Where conflict audit entries go (defaults to the `conflict_log` table)
    pub fn conflict_sink(mut self, sink: Arc<dyn ConflictLogSink>) -> Self {
        self.conflict_sink = Some(sink);
        self
    }

    pub fn conflict_policy(mut self, policy: Resolution) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn build(self) -> Result<SyncEngine> {
        let config = self.config;
        config.validate()?;

        let storage = match self.storage {
            Some(storage) => storage,
            None => Storage::open(&config.db_path)?,
        };
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };

        let cipher = CredentialCipher::from_key_material(&config.credentials.encryption_key)?;
        let credential_store =
            CredentialStore::new(config.credentials.credential_path.clone(), cipher);
        let tokens = Arc::new(TokenManager::new(
            credential_store,
            config.remote.clone(),
            transport,
            clock.clone(),
            config.sync.request_timeout(),
        ));

        let queue: Arc<dyn QueueStore> = Arc::new(storage.clone());
        let usage = Arc::new(UsageTracker::new(Arc::new(storage.clone()), clock.clone()));
        let conflict_sink: Arc<dyn ConflictLogSink> = match self.conflict_sink {
            Some(sink) => sink,
            None => Arc::new(storage.clone()),
        };

        let orchestrator = Arc::new(SyncOrchestrator::new(
            queue.clone(),
            tokens.clone(),
            usage.clone(),
            clock.clone(),
            config.sync.clone(),
            config.remote.service.clone(),
            config.remote.api_base_url.clone(),
        ));

        tracing::info!(
            db_path = storage.db_path(),
            service = %config.remote.service,
            batch_size = config.sync.batch_size,
            max_retries = config.sync.max_retries,
            "Sync engine ready"
        );

        Ok(SyncEngine {
            config,
            storage,
            clock,
            queue,
            tokens,
            usage,
            orchestrator,
            conflict_sink,
            conflict_policy: self.conflict_policy,
        })
    }
}

/// Fully wired reconciliation engine
pub struct SyncEngine {
    config: FeedSyncConfig,
    storage: Storage,
    clock: Arc<dyn Clock>,
    queue: Arc<dyn QueueStore>,
    tokens: Arc<TokenManager>,
    usage: Arc<UsageTracker>,
    orchestrator: Arc<SyncOrchestrator>,
    conflict_sink: Arc<dyn ConflictLogSink>,
    conflict_policy: Resolution,
}

impl SyncEngine {
    pub fn builder(config: FeedSyncConfig) -> SyncEngineBuilder {
        SyncEngineBuilder {
            config,
            storage: None,
            transport: None,
            clock: None,
            conflict_sink: None,
            conflict_policy: Resolution::default(),
        }
    }

    pub fn config(&self) -> &FeedSyncConfig {
        &self.config
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    pub fn usage(&self) -> &Arc<UsageTracker> {
        &self.usage
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    /// Queue a local read/starred mutation for the next drain
    pub fn enqueue(&self, action: ActionType, remote_item_id: &str) -> Result<QueueEntry> {
        let entry = self.queue.enqueue(action, remote_item_id, self.clock.now())?;
        tracing::debug!(id = entry.id, action = %action, remote_item_id, "Queued mutation");
        Ok(entry)
    }

    /// Fresh conflict detector for one pull session
    pub fn conflict_session(&self) -> ConflictDetector {
        ConflictDetector::new(self.conflict_sink.clone(), self.clock.clone())
            .with_policy(self.conflict_policy)
    }

    /// Start the periodic timer at the configured interval
    pub fn start(&self) {
        self.orchestrator.start(self.config.sync.sync_interval());
    }

    pub fn stop(&self) {
        self.orchestrator.stop();
    }
}
