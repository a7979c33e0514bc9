//! Credential store and token lifecycle manager.
//!
//! Schwab issues a 30-minute access token nested inside a 7-day refresh
//! token. A successful refresh exchanges the refresh token for a fresh pair
//! and resets BOTH clocks, so any process refreshing at least daily keeps
//! the credential alive indefinitely. Once the refresh clock lapses, only
//! the external one-shot authorization flow can recover, so that state is
//! surfaced as a distinct fatal error and never retried.
//!
//! The manager is the single writer of the token file; the fetch loop only
//! ever reads a credential out of it.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use gexray_core::{ActivityEntry, ActivityLog};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::error::{Result, SchwabError};

// =============================================================================
// Expiry policy
// =============================================================================

/// Access token lifetime.
pub const ACCESS_TTL_SECS: i64 = 30 * 60;

/// Refresh token lifetime.
pub const REFRESH_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Refresh this long before the access token actually expires.
pub const REFRESH_MARGIN_SECS: i64 = 5 * 60;

// =============================================================================
// Credential
// =============================================================================

/// The access/refresh pair plus both issuance instants. Matches the token
/// file written by the one-shot authorization flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub access_issued_at: DateTime<Utc>,
    pub refresh_issued_at: DateTime<Utc>,
}

impl Credential {
    /// Creates a credential with both clocks starting at `issued_at`.
    #[must_use]
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            access_issued_at: issued_at,
            refresh_issued_at: issued_at,
        }
    }

    #[must_use]
    pub fn access_age(&self, now: DateTime<Utc>) -> Duration {
        now - self.access_issued_at
    }

    #[must_use]
    pub fn refresh_age(&self, now: DateTime<Utc>) -> Duration {
        now - self.refresh_issued_at
    }

    #[must_use]
    pub fn access_expires_at(&self) -> DateTime<Utc> {
        self.access_issued_at + Duration::seconds(ACCESS_TTL_SECS)
    }

    #[must_use]
    pub fn refresh_expires_at(&self) -> DateTime<Utc> {
        self.refresh_issued_at + Duration::seconds(REFRESH_TTL_SECS)
    }

    /// True when the access clock is inside the safety margin.
    #[must_use]
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        self.access_age(now) > Duration::seconds(ACCESS_TTL_SECS - REFRESH_MARGIN_SECS)
    }

    /// True when the refresh clock has lapsed and this credential is
    /// unrecoverable by the pipeline.
    #[must_use]
    pub fn is_refresh_expired(&self, now: DateTime<Utc>) -> bool {
        self.refresh_age(now) >= Duration::seconds(REFRESH_TTL_SECS)
    }
}

// =============================================================================
// TokenStore
// =============================================================================

/// File-backed credential persistence, shared with the external
/// authorization flow.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the credential written by the authorization flow or a prior run.
    ///
    /// # Errors
    /// Returns `Configuration` if the file is missing (the one-shot flow has
    /// not run yet) and `Serialization` if it cannot be parsed.
    pub fn load(&self) -> Result<Credential> {
        let raw = std::fs::read_to_string(&self.path).map_err(|e| {
            SchwabError::Configuration(format!(
                "cannot read token file {}: {e}; run the one-shot authorization flow first",
                self.path.display()
            ))
        })?;
        let credential = serde_json::from_str(&raw)?;
        Ok(credential)
    }

    /// Persists the credential durably. Writes a sibling temp file and
    /// renames it over the target so the external flow never reads a torn
    /// token file.
    ///
    /// # Errors
    /// Returns `Persistence` on any I/O failure.
    pub fn save(&self, credential: &Credential) -> Result<()> {
        let json = serde_json::to_string_pretty(credential)?;
        let tmp = self.path.with_extension("json.tmp");

        std::fs::write(&tmp, json)
            .and_then(|()| std::fs::rename(&tmp, &self.path))
            .map_err(|e| {
                SchwabError::Persistence(format!(
                    "cannot write token file {}: {e}",
                    self.path.display()
                ))
            })
    }
}

// =============================================================================
// TokenManager
// =============================================================================

/// Configuration for the token lifecycle manager.
#[derive(Clone)]
pub struct TokenManagerConfig {
    /// OAuth token endpoint.
    pub token_url: String,
    /// Schwab application key.
    pub app_key: String,
    /// Schwab application secret. Never logged.
    pub app_secret: SecretString,
    /// Bounded retry attempts for transient refresh failures.
    pub retry_attempts: u32,
    /// Base delay for exponential backoff.
    pub retry_base_delay_secs: u64,
    /// HTTP timeout for the token endpoint.
    pub timeout_secs: u64,
}

impl std::fmt::Debug for TokenManagerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManagerConfig")
            .field("token_url", &self.token_url)
            .field("app_key", &self.app_key)
            .field("app_secret", &"[REDACTED]")
            .field("retry_attempts", &self.retry_attempts)
            .finish_non_exhaustive()
    }
}

impl TokenManagerConfig {
    /// Reads the app key/secret from the named environment variables.
    ///
    /// # Errors
    /// Returns `Configuration` if either variable is missing.
    pub fn from_env(
        token_url: impl Into<String>,
        app_key_env: &str,
        app_secret_env: &str,
    ) -> Result<Self> {
        let app_key = std::env::var(app_key_env).map_err(|_| {
            SchwabError::Configuration(format!("missing environment variable: {app_key_env}"))
        })?;
        let app_secret = std::env::var(app_secret_env).map_err(|_| {
            SchwabError::Configuration(format!("missing environment variable: {app_secret_env}"))
        })?;

        Ok(Self {
            token_url: token_url.into(),
            app_key,
            app_secret: SecretString::from(app_secret),
            retry_attempts: 3,
            retry_base_delay_secs: 2,
            timeout_secs: 30,
        })
    }
}

/// Successful response from the token endpoint.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    refresh_token: String,
}

/// Owns the credential and its two expiry clocks.
///
/// `get_valid_credential` is the read path used every cycle; it refreshes
/// lazily only when the access clock is inside the safety margin, so a
/// fresh credential costs one `RwLock` read and no network call.
pub struct TokenManager {
    config: TokenManagerConfig,
    store: TokenStore,
    credential: RwLock<Credential>,
    http: reqwest::Client,
    activity: ActivityLog,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("token_url", &self.config.token_url)
            .field("store", &self.store.path())
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    /// Creates a manager around an existing token file.
    ///
    /// # Errors
    /// Returns an error if the token file cannot be loaded or the HTTP
    /// client cannot be built.
    pub fn new(
        config: TokenManagerConfig,
        store: TokenStore,
        activity: ActivityLog,
    ) -> Result<Self> {
        let credential = store.load()?;
        info!(
            access_expires_at = %credential.access_expires_at(),
            refresh_expires_at = %credential.refresh_expires_at(),
            "Loaded credential from {}",
            store.path().display()
        );

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SchwabError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            store,
            credential: RwLock::new(credential),
            http,
            activity,
        })
    }

    /// Returns a credential with at least the safety margin left on its
    /// access clock, refreshing first if necessary.
    ///
    /// # Errors
    /// Returns `CredentialExpired` if the refresh clock has lapsed, or the
    /// refresh failure after bounded retries.
    pub async fn get_valid_credential(&self) -> Result<Credential> {
        {
            let credential = self.credential.read().await;
            if !credential.needs_refresh(Utc::now()) {
                return Ok(credential.clone());
            }
        }
        self.refresh(false).await
    }

    /// Unconditionally refreshes, regardless of remaining access time.
    /// Used by the scheduled keep-alive job that holds the 7-day clock open
    /// on days the market never opens.
    ///
    /// # Errors
    /// Same contract as [`Self::get_valid_credential`].
    pub async fn force_refresh(&self) -> Result<Credential> {
        self.refresh(true).await
    }

    /// Returns a copy of the current credential without touching either
    /// clock. For status reporting only.
    pub async fn current(&self) -> Credential {
        self.credential.read().await.clone()
    }

    async fn refresh(&self, forced: bool) -> Result<Credential> {
        // Write lock held across the exchange: the manager is the single
        // writer and concurrent callers must not race duplicate refreshes.
        let mut credential = self.credential.write().await;

        let now = Utc::now();
        if !forced && !credential.needs_refresh(now) {
            // Another caller refreshed while we waited on the lock.
            return Ok(credential.clone());
        }

        if credential.is_refresh_expired(now) {
            let age_hours = credential.refresh_age(now).num_hours();
            let err = SchwabError::CredentialExpired {
                refresh_age_hours: age_hours,
            };
            error!(refresh_age_hours = age_hours, "Refresh credential has lapsed; reauthorization required");
            self.log_refresh("expired", &err.to_string(), None);
            return Err(err);
        }

        let mut attempt = 1;
        loop {
            match self.exchange(&credential.refresh_token).await {
                Ok(fresh) => {
                    // Durability before visibility: if the save fails the
                    // in-memory credential is valid but a restart would roll
                    // the refresh token back, so that is its own fatal kind.
                    if let Err(e) = self.store.save(&fresh) {
                        self.log_refresh("persistence_failed", &e.to_string(), None);
                        return Err(e);
                    }

                    info!(
                        access_expires_at = %fresh.access_expires_at(),
                        refresh_expires_at = %fresh.refresh_expires_at(),
                        "Credential refreshed"
                    );
                    self.log_refresh("ok", "refreshed", Some(fresh.access_expires_at()));

                    *credential = fresh.clone();
                    return Ok(fresh);
                }
                Err(e) if e.is_transient() && attempt < self.config.retry_attempts => {
                    let delay = e.retry_delay_secs().unwrap_or(1).max(
                        self.config.retry_base_delay_secs * 2u64.pow(attempt - 1),
                    );
                    warn!(
                        attempt,
                        max_attempts = self.config.retry_attempts,
                        delay_secs = delay,
                        error = %e,
                        "Token refresh failed, retrying"
                    );
                    self.log_refresh("transient_failure", &e.to_string(), None);
                    tokio::time::sleep(std::time::Duration::from_secs(delay)).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(attempt, error = %e, "Token refresh failed");
                    self.log_refresh("failed", &e.to_string(), None);
                    return Err(e);
                }
            }
        }
    }

    /// One `grant_type=refresh_token` exchange against the token endpoint.
    async fn exchange(&self, refresh_token: &str) -> Result<Credential> {
        let basic = BASE64.encode(format!(
            "{}:{}",
            self.config.app_key,
            self.config.app_secret.expose_secret()
        ));

        let response = self
            .http
            .post(&self.config.token_url)
            .header("Authorization", format!("Basic {basic}"))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(2);
            return Err(SchwabError::rate_limit(retry_after));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SchwabError::api(status.as_u16(), body));
        }

        let parsed: RefreshResponse = response.json().await.map_err(|e| {
            SchwabError::Serialization(format!("invalid token response: {e}"))
        })?;

        // Both clocks restart: the exchange mints a new refresh token too.
        Ok(Credential::new(
            parsed.access_token,
            parsed.refresh_token,
            Utc::now(),
        ))
    }

    fn log_refresh(&self, outcome: &str, detail: &str, access_expires_at: Option<DateTime<Utc>>) {
        let entry = ActivityEntry::TokenRefresh {
            at: Utc::now(),
            outcome: outcome.to_string(),
            detail: detail.to_string(),
            access_expires_at,
        };
        if let Err(e) = self.activity.append(&entry) {
            warn!(error = %e, "Could not append token refresh to activity log");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credential_with_ages(access_age_secs: i64, refresh_age_secs: i64) -> Credential {
        let now = Utc::now();
        Credential {
            access_token: "access-old".to_string(),
            refresh_token: "refresh-old".to_string(),
            access_issued_at: now - Duration::seconds(access_age_secs),
            refresh_issued_at: now - Duration::seconds(refresh_age_secs),
        }
    }

    fn manager_for(server_url: Option<&str>, credential: &Credential) -> (TokenManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"));
        store.save(credential).unwrap();

        let config = TokenManagerConfig {
            token_url: server_url
                .map(|u| format!("{u}/v1/oauth/token"))
                .unwrap_or_else(|| "http://127.0.0.1:9/v1/oauth/token".to_string()),
            app_key: "app-key".to_string(),
            app_secret: SecretString::from("app-secret"),
            retry_attempts: 3,
            retry_base_delay_secs: 0,
            timeout_secs: 5,
        };
        let activity = ActivityLog::new(dir.path().join("activity.jsonl"));
        let manager = TokenManager::new(config, store, activity).unwrap();
        (manager, dir)
    }

    // ==================== Credential clock tests ====================

    #[test]
    fn fresh_access_clock_does_not_need_refresh() {
        let credential = credential_with_ages(60, 60);
        assert!(!credential.needs_refresh(Utc::now()));
    }

    #[test]
    fn access_inside_margin_needs_refresh() {
        // 26 minutes old: 4 minutes remain, margin is 5.
        let credential = credential_with_ages(26 * 60, 26 * 60);
        assert!(credential.needs_refresh(Utc::now()));
    }

    #[test]
    fn refresh_clock_lapses_at_seven_days() {
        let credential = credential_with_ages(60, REFRESH_TTL_SECS);
        assert!(credential.is_refresh_expired(Utc::now()));

        let alive = credential_with_ages(60, REFRESH_TTL_SECS - 3600);
        assert!(!alive.is_refresh_expired(Utc::now()));
    }

    // ==================== TokenStore tests ====================

    #[test]
    fn store_round_trips_credential() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"));
        let credential = Credential::new("a", "r", Utc::now());

        store.save(&credential).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.access_token, "a");
        assert_eq!(loaded.refresh_token, "r");
        assert_eq!(loaded.access_issued_at, credential.access_issued_at);
    }

    #[test]
    fn missing_token_file_is_configuration_error() {
        let store = TokenStore::new("/nonexistent/dir/token.json");
        let err = store.load().unwrap_err();
        assert!(matches!(err, SchwabError::Configuration(_)));
        assert!(err.to_string().contains("one-shot authorization"));
    }

    // ==================== TokenManager tests ====================

    #[tokio::test]
    async fn valid_credential_returned_without_network_call() {
        // No mock server mounted: a network call would fail loudly.
        let credential = credential_with_ages(60, 60);
        let (manager, _dir) = manager_for(None, &credential);

        let got = manager.get_valid_credential().await.unwrap();
        assert_eq!(got.access_token, "access-old");
    }

    #[tokio::test]
    async fn stale_access_triggers_refresh_and_persists() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/oauth/token"))
            .and(header_exists("Authorization"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "access-new",
                "refresh_token": "refresh-new",
                "expires_in": 1800,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let credential = credential_with_ages(28 * 60, 3 * 24 * 3600);
        let (manager, dir) = manager_for(Some(&server.uri()), &credential);

        let got = manager.get_valid_credential().await.unwrap();
        assert_eq!(got.access_token, "access-new");
        assert_eq!(got.refresh_token, "refresh-new");

        // Both clocks were renewed together.
        assert!(got.refresh_age(Utc::now()) < Duration::seconds(5));

        // Persisted before returning.
        let on_disk = TokenStore::new(dir.path().join("token.json")).load().unwrap();
        assert_eq!(on_disk.access_token, "access-new");
    }

    #[tokio::test]
    async fn transient_failure_is_retried_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/oauth/token"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "access-new",
                "refresh_token": "refresh-new"
            })))
            .mount(&server)
            .await;

        let credential = credential_with_ages(28 * 60, 3600);
        let (manager, _dir) = manager_for(Some(&server.uri()), &credential);

        let got = manager.force_refresh().await.unwrap();
        assert_eq!(got.access_token, "access-new");
    }

    #[tokio::test]
    async fn transient_failures_surface_after_bounded_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/oauth/token"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let credential = credential_with_ages(28 * 60, 3600);
        let (manager, _dir) = manager_for(Some(&server.uri()), &credential);

        let err = manager.force_refresh().await.unwrap_err();
        assert!(err.is_transient());
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn lapsed_refresh_clock_is_fatal_without_any_request() {
        // No mock server: the expired path must not touch the network.
        let credential = credential_with_ages(28 * 60, REFRESH_TTL_SECS + 3600);
        let (manager, _dir) = manager_for(None, &credential);

        let err = manager.get_valid_credential().await.unwrap_err();
        assert!(matches!(err, SchwabError::CredentialExpired { .. }));
        assert!(err.is_fatal());
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn refresh_attempts_are_appended_to_activity_log() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "access-new",
                "refresh_token": "refresh-new"
            })))
            .mount(&server)
            .await;

        let credential = credential_with_ages(60, 60);
        let (manager, dir) = manager_for(Some(&server.uri()), &credential);
        manager.force_refresh().await.unwrap();

        let log = std::fs::read_to_string(dir.path().join("activity.jsonl")).unwrap();
        let entry: ActivityEntry = serde_json::from_str(log.lines().next().unwrap()).unwrap();
        match entry {
            ActivityEntry::TokenRefresh {
                outcome,
                access_expires_at,
                ..
            } => {
                assert_eq!(outcome, "ok");
                assert!(access_expires_at.is_some());
            }
            other => panic!("unexpected activity entry: {other:?}"),
        }
    }
}
