//! One fetch cycle: every universe symbol, concurrently, failure-isolated.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use gexray_core::config::FetcherConfig;
use gexray_schwab::{ChainData, SchwabError};

use crate::source::ChainSource;

/// Outcome of one cycle, kept for logging and the activity log only.
#[derive(Debug)]
pub struct FetchCycleResult {
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, SchwabError)>,
    pub contracts_fetched: usize,
}

impl FetchCycleResult {
    /// Returns the first loop-terminating error seen this cycle, if any.
    #[must_use]
    pub fn first_fatal(&self) -> Option<&SchwabError> {
        self.failed.iter().map(|(_, e)| e).find(|e| e.is_fatal())
    }
}

/// Fetches one symbol with bounded retries. Transient errors back off
/// exponentially (rate limits honor the server's hint); fatal credential
/// errors are returned immediately so the cycle can stop issuing doomed
/// requests.
async fn fetch_with_retry<S: ChainSource>(
    source: &S,
    symbol: &str,
    config: &FetcherConfig,
) -> Result<ChainData, SchwabError> {
    let mut attempt = 1;
    loop {
        match source.option_chain(symbol).await {
            Ok(chain) => return Ok(chain),
            Err(e) if e.is_transient() && attempt < config.retry_attempts => {
                let delay = e
                    .retry_delay_secs()
                    .unwrap_or(1)
                    .max(config.retry_base_delay_secs * 2u64.pow(attempt - 1));
                warn!(
                    symbol,
                    attempt,
                    max_attempts = config.retry_attempts,
                    delay_secs = delay,
                    error = %e,
                    "Chain fetch failed, retrying"
                );
                tokio::time::sleep(std::time::Duration::from_secs(delay)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Runs one full cycle over the universe with bounded concurrency.
///
/// Failures are isolated per symbol: each one is recorded in the result
/// and excluded from the returned chains, and the rest of the cycle
/// continues regardless.
pub async fn fetch_cycle<S: ChainSource>(
    source: &S,
    symbols: &[String],
    config: &FetcherConfig,
) -> (FetchCycleResult, Vec<ChainData>) {
    let started_at = Utc::now();
    let start = std::time::Instant::now();

    let outcomes: Vec<(String, Result<ChainData, SchwabError>)> = stream::iter(symbols.to_vec())
        .map(|symbol| async move {
            let outcome = fetch_with_retry(source, &symbol, config).await;
            (symbol, outcome)
        })
        .buffer_unordered(config.max_concurrent_fetches.max(1))
        .collect()
        .await;

    let mut succeeded = Vec::new();
    let mut failed = Vec::new();
    let mut chains = Vec::new();
    let mut contracts_fetched = 0;

    for (symbol, outcome) in outcomes {
        match outcome {
            Ok(chain) => {
                contracts_fetched += chain.records.len();
                succeeded.push(symbol);
                chains.push(chain);
            }
            Err(e) => {
                warn!(symbol, error = %e, "Symbol excluded from cycle");
                failed.push((symbol, e));
            }
        }
    }

    // Deterministic ordering for logs and downstream aggregation.
    succeeded.sort();
    failed.sort_by(|a, b| a.0.cmp(&b.0));
    chains.sort_by(|a, b| a.symbol.cmp(&b.symbol));

    let result = FetchCycleResult {
        started_at,
        elapsed_ms: start.elapsed().as_millis() as u64,
        succeeded,
        failed,
        contracts_fetched,
    };

    info!(
        succeeded = result.succeeded.len(),
        failed = result.failed.len(),
        contracts = result.contracts_fetched,
        elapsed_ms = result.elapsed_ms,
        "Fetch cycle finished"
    );

    (result, chains)
}
