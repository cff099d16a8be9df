//! OAuth token lifecycle: load, proactive/reactive refresh, authenticated calls

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;

use super::credential_store::CredentialStore;
use crate::clock::Clock;
use crate::config::RemoteConfig;
use crate::error::{FeedSyncError, Result};
use crate::remote::{send_with_timeout, HttpRequest, HttpResponse, HttpTransport};
use crate::types::Credential;

/// Refresh this long before the token actually expires
pub const REFRESH_MARGIN_SECS: i64 = 60 * 60;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

/// Produces valid bearer tokens and performs authenticated calls
pub struct TokenManager {
    store: CredentialStore,
    remote: RemoteConfig,
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
    request_timeout: Duration,
    cached: Mutex<Option<Credential>>,
}

impl TokenManager {
    pub fn new(
        store: CredentialStore,
        remote: RemoteConfig,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            store,
            remote,
            transport,
            clock,
            request_timeout,
            cached: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Read and decrypt the credential from disk into the cache
    pub fn load_credential(&self) -> Result<Credential> {
        let credential = self.store.load()?;
        *self.cached.lock() = Some(credential.clone());
        Ok(credential)
    }

    /// Persist a token set obtained from the out-of-band authorization flow
    pub fn store_initial(&self, credential: Credential) -> Result<()> {
        if credential.access_token.trim().is_empty() {
            return Err(FeedSyncError::InvalidInput(
                "access_token must not be empty".to_string(),
            ));
        }
        self.store.save(&credential)?;
        *self.cached.lock() = Some(credential);
        tracing::info!(path = %self.store.path().display(), "Stored initial credential");
        Ok(())
    }

    /// True without a cached credential, or once inside the refresh margin
    pub fn needs_refresh(&self) -> bool {
        match self.cached.lock().as_ref() {
            Some(credential) => {
                let refresh_at =
                    credential.expires_at() - chrono::Duration::seconds(REFRESH_MARGIN_SECS);
                self.clock.now() >= refresh_at
            }
            None => true,
        }
    }

    fn cached_or_load(&self) -> Result<Credential> {
        if let Some(credential) = self.cached.lock().clone() {
            return Ok(credential);
        }
        self.load_credential()
    }

    /// Exchange the refresh token for a new token set and persist it
    pub async fn refresh(&self) -> Result<Credential> {
        let current = self.cached_or_load()?;
        let refresh_token = match current.refresh_token.as_deref() {
            Some(token) if !token.trim().is_empty() => token.to_string(),
            _ => return Err(FeedSyncError::NoRefreshToken),
        };

        tracing::info!(service = %self.remote.service, "Refreshing access token");

        let request = HttpRequest::post(&self.remote.token_url)
            .header("Accept", "application/json")
            .form_field("grant_type", "refresh_token")
            .form_field("client_id", &self.remote.client_id)
            .form_field("client_secret", &self.remote.client_secret)
            .form_field("refresh_token", &refresh_token);

        let response =
            send_with_timeout(self.transport.as_ref(), request, self.request_timeout).await?;

        if !response.is_success() {
            tracing::error!(status = response.status, "Token refresh rejected");
            return Err(FeedSyncError::Auth(format!(
                "token refresh rejected with status {}: {}",
                response.status,
                truncate(&response.body, 200)
            )));
        }

        let payload: TokenResponse = serde_json::from_str(&response.body).map_err(|e| {
            FeedSyncError::Auth(format!("token refresh returned an invalid payload: {}", e))
        })?;

        let rotated = Credential {
            access_token: payload.access_token,
            // the service may keep the existing refresh token
            refresh_token: payload
                .refresh_token
                .filter(|t| !t.trim().is_empty())
                .or(Some(refresh_token)),
            expires_in: payload.expires_in,
            token_type: payload.token_type.unwrap_or(current.token_type),
            scope: payload.scope.or(current.scope),
            created_at: self.clock.now(),
        };

        self.store.save(&rotated)?;
        *self.cached.lock() = Some(rotated.clone());

        tracing::info!(
            expires_in = rotated.expires_in,
            "Access token refreshed"
        );
        Ok(rotated)
    }

    /// Current access token, loading and refreshing as needed
    pub async fn get_access_token(&self) -> Result<String> {
        let credential = self.cached_or_load()?;
        if self.needs_refresh() {
            let refreshed = self.refresh().await?;
            return Ok(refreshed.access_token);
        }
        Ok(credential.access_token)
    }

    /// Execute `request` with a bearer token. A 401 triggers exactly one
    /// refresh and retry; every other status (429 included) goes back to the caller.
    pub async fn authenticated_request(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.authenticated_request_observed(request, |_| {}).await
    }

    /// Like [`authenticated_request`](Self::authenticated_request), but `observe`
    /// sees every response received, including the 401 that caused a retry.
    pub async fn authenticated_request_observed<F>(
        &self,
        request: HttpRequest,
        mut observe: F,
    ) -> Result<HttpResponse>
    where
        F: FnMut(&HttpResponse) + Send,
    {
        let token = self.get_access_token().await?;
        let response = send_with_timeout(
            self.transport.as_ref(),
            request.with_bearer(&token),
            self.request_timeout,
        )
        .await?;
        observe(&response);

        if response.status != 401 {
            return Ok(response);
        }

        tracing::warn!(url = %request.url, "Got 401, refreshing token and retrying once");
        let refreshed = self.refresh().await?;
        let retried = send_with_timeout(
            self.transport.as_ref(),
            request.with_bearer(&refreshed.access_token),
            self.request_timeout,
        )
        .await?;
        observe(&retried);
        Ok(retried)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
