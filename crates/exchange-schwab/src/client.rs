//! Rate-limited Schwab market-data client.
//!
//! Every request waits on a client-side `governor` limiter before going
//! out, carries the current access token from the [`TokenManager`], and is
//! bounded by the configured timeout. The client never writes the
//! credential; it only reads a valid one per request.

use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::Client;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::debug;

use crate::chain::{parse_chain, ChainData, RawChainResponse};
use crate::error::{Result, SchwabError};
use crate::token::TokenManager;

/// Configuration for the market-data client.
#[derive(Debug, Clone)]
pub struct SchwabClientConfig {
    /// API base URL.
    pub base_url: String,

    /// Requests per minute limit.
    pub requests_per_minute: NonZeroU32,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Strikes per side requested around the money.
    pub strike_count: u32,
}

impl Default for SchwabClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.schwabapi.com".to_string(),
            requests_per_minute: nonzero!(120u32),
            timeout_secs: 30,
            strike_count: 100,
        }
    }
}

impl SchwabClientConfig {
    /// Sets the base URL (useful for testing).
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Sets the rate limit.
    #[must_use]
    pub fn with_rate_limit(mut self, requests_per_minute: NonZeroU32) -> Self {
        self.requests_per_minute = requests_per_minute;
        self
    }
}

/// Schwab REST client for option-chain data.
pub struct SchwabClient {
    config: SchwabClientConfig,
    http: Client,
    rate_limiter: Arc<
        RateLimiter<
            governor::state::NotKeyed,
            governor::state::InMemoryState,
            governor::clock::DefaultClock,
        >,
    >,
    tokens: Arc<TokenManager>,
}

impl std::fmt::Debug for SchwabClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchwabClient")
            .field("base_url", &self.config.base_url)
            .field("requests_per_minute", &self.config.requests_per_minute)
            .finish_non_exhaustive()
    }
}

impl SchwabClient {
    /// Creates a new client bound to a token manager.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: SchwabClientConfig, tokens: Arc<TokenManager>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SchwabError::Network(format!("failed to build HTTP client: {e}")))?;

        let quota = Quota::per_minute(config.requests_per_minute);
        let rate_limiter = Arc::new(RateLimiter::direct(quota));

        Ok(Self {
            config,
            http,
            rate_limiter,
            tokens,
        })
    }

    /// Returns the base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Fetches the option chain for one underlying and parses it into
    /// per-contract records.
    ///
    /// # Errors
    /// Propagates credential errors from the token manager (including the
    /// fatal kinds) and maps HTTP failures into the transient/permanent
    /// taxonomy.
    pub async fn option_chain(&self, symbol: &str) -> Result<ChainData> {
        self.rate_limiter.until_ready().await;

        let credential = self.tokens.get_valid_credential().await?;

        debug!(symbol, "Fetching option chain");
        let url = format!("{}/marketdata/v1/chains", self.config.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&credential.access_token)
            .query(&[
                ("symbol", symbol),
                ("contractType", "ALL"),
                ("strikeCount", &self.config.strike_count.to_string()),
                ("includeUnderlyingQuote", "true"),
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

        let raw: RawChainResponse = response
            .json()
            .await
            .map_err(|e| SchwabError::Serialization(format!("invalid chain response: {e}")))?;

        parse_chain(symbol, raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{Credential, TokenManagerConfig, TokenStore};
    use chrono::Utc;
    use gexray_core::ActivityLog;
    use secrecy::SecretString;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> (SchwabClient, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"));
        store
            .save(&Credential::new("access-token", "refresh-token", Utc::now()))
            .unwrap();

        let manager = TokenManager::new(
            TokenManagerConfig {
                token_url: format!("{}/v1/oauth/token", server.uri()),
                app_key: "key".to_string(),
                app_secret: SecretString::from("secret"),
                retry_attempts: 3,
                retry_base_delay_secs: 0,
                timeout_secs: 5,
            },
            store,
            ActivityLog::new(dir.path().join("activity.jsonl")),
        )
        .unwrap();

        let client = SchwabClient::new(
            SchwabClientConfig::default().with_base_url(server.uri()),
            Arc::new(manager),
        )
        .unwrap();
        (client, dir)
    }

    #[tokio::test]
    async fn fetches_and_parses_a_chain() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/marketdata/v1/chains"))
            .and(query_param("symbol", "SPY"))
            .and(query_param("contractType", "ALL"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "symbol": "SPY",
                "status": "SUCCESS",
                "underlyingPrice": 590.25,
                "callExpDateMap": {
                    "2026-09-18:19": {
                        "590.0": [{
                            "putCall": "CALL",
                            "strikePrice": 590.0,
                            "openInterest": 1500,
                            "gamma": 0.021,
                            "vega": 0.35,
                            "multiplier": 100.0
                        }]
                    }
                },
                "putExpDateMap": {}
            })))
            .mount(&server)
            .await;

        let (client, _dir) = client_for(&server).await;
        let chain = client.option_chain("SPY").await.unwrap();

        assert_eq!(chain.symbol, "SPY");
        assert_eq!(chain.records.len(), 1);
        assert!((chain.underlying_spot - 590.25).abs() < 1e-9);
    }

    #[tokio::test]
    async fn maps_429_to_rate_limit_with_server_hint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/marketdata/v1/chains"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
            .mount(&server)
            .await;

        let (client, _dir) = client_for(&server).await;
        let err = client.option_chain("SPY").await.unwrap_err();
        assert!(matches!(err, SchwabError::RateLimit { retry_after_secs: 7 }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn maps_unexpected_status_to_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/marketdata/v1/chains"))
            .respond_with(ResponseTemplate::new(401).set_body_string("expired bearer"))
            .mount(&server)
            .await;

        let (client, _dir) = client_for(&server).await;
        let err = client.option_chain("SPY").await.unwrap_err();
        assert!(matches!(err, SchwabError::Api { status_code: 401, .. }));
        assert!(!err.is_transient());
    }
}
