//! The long-running fetch service.
//!
//! Cadence is measured cycle-start to cycle-start: the loop sleeps until
//! `cycle_start + cadence`, so a slow cycle starts the next one
//! immediately instead of sleeping a negative duration, and a fast cycle
//! never drifts. The market-hours gate is consulted every cycle, the
//! cancellation token only at cycle boundaries, and the two fatal
//! credential conditions terminate the loop with the last good snapshot
//! still published.

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use gexray_core::config::FetcherConfig;
use gexray_core::{ActivityEntry, ActivityLog, TradingCalendar, Universe};
use gexray_exposure::{aggregate, normalize, SnapshotStore};
use gexray_schwab::TokenManager;

use crate::cycle::{fetch_cycle, FetchCycleResult};
use crate::source::ChainSource;

pub struct FetchService<S: ChainSource> {
    config: FetcherConfig,
    calendar: TradingCalendar,
    universe: Universe,
    source: S,
    tokens: Arc<TokenManager>,
    store: Arc<SnapshotStore>,
    activity: ActivityLog,
    cancel: CancellationToken,
}

impl<S: ChainSource> FetchService<S> {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        config: FetcherConfig,
        calendar: TradingCalendar,
        universe: Universe,
        source: S,
        tokens: Arc<TokenManager>,
        store: Arc<SnapshotStore>,
        activity: ActivityLog,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            calendar,
            universe,
            source,
            tokens,
            store,
            activity,
            cancel,
        }
    }

    /// Runs until cancelled or a fatal credential condition.
    ///
    /// # Errors
    /// Returns the fatal error that terminated the loop; clean
    /// cancellation returns `Ok`.
    pub async fn run(&self) -> Result<()> {
        info!(
            cadence_secs = self.config.cadence_secs,
            symbols = self.universe.len(),
            "Fetch service started"
        );
        let cadence = std::time::Duration::from_secs(self.config.cadence_secs);

        let this = self;
        let outcome = run_on_cadence(cadence, &self.cancel, move || async move {
            if this.calendar.is_open(Utc::now()) {
                this.run_cycle().await
            } else {
                debug!("Market closed, skipping cycle");
                Ok(())
            }
        })
        .await;

        match &outcome {
            Ok(()) => info!("Fetch service stopped"),
            Err(e) => error!(error = %e, "Fatal pipeline condition, terminating fetch loop"),
        }
        outcome
    }

    /// One gate-passed cycle. `Err` is reserved for fatal conditions;
    /// anything recoverable is logged and absorbed here.
    async fn run_cycle(&self) -> Result<()> {
        // Credential check up front: a lapsed refresh clock must not be
        // hammered with a universe worth of doomed requests.
        if let Err(e) = self.tokens.get_valid_credential().await {
            if e.is_fatal() {
                return Err(e.into());
            }
            warn!(error = %e, "No valid credential this cycle, skipping");
            return Ok(());
        }

        let (result, chains) = fetch_cycle(&self.source, self.universe.symbols(), &self.config).await;

        self.log_cycle(&result);

        if let Some(fatal) = result.first_fatal() {
            return Err(anyhow::anyhow!("{fatal}"));
        }

        if result.succeeded.is_empty() {
            // Leave the last good snapshot in place for consumers.
            warn!("Every symbol failed this cycle, snapshot not replaced");
            return Ok(());
        }

        let aggregated = aggregate(&chains);
        let snapshot = normalize(&aggregated, result.started_at);
        debug!(
            cells = snapshot.cells.len(),
            instruments = snapshot.instruments.len(),
            "Publishing snapshot"
        );
        self.store.publish(snapshot);

        Ok(())
    }

    fn log_cycle(&self, result: &FetchCycleResult) {
        for (symbol, error) in &result.failed {
            let entry = ActivityEntry::InstrumentFailure {
                at: result.started_at,
                symbol: symbol.clone(),
                reason: error.to_string(),
            };
            if let Err(e) = self.activity.append(&entry) {
                warn!(error = %e, "Could not append instrument failure to activity log");
            }
        }

        let entry = ActivityEntry::CycleCompleted {
            at: result.started_at,
            succeeded: result.succeeded.len(),
            failed: result.failed.len(),
            contracts_fetched: result.contracts_fetched,
            elapsed_ms: result.elapsed_ms,
        };
        if let Err(e) = self.activity.append(&entry) {
            warn!(error = %e, "Could not append cycle result to activity log");
        }
    }
}

/// Drives `cycle` on a fixed start-to-start cadence until cancelled or
/// the cycle returns an error.
///
/// The next deadline is `cycle_start + cadence`: a cycle that overruns
/// the interval leaves the deadline in the past and `sleep_until`
/// returns at once, so the next cycle starts immediately instead of
/// sleeping a negative duration. A fast cycle waits out the remainder,
/// so starts never drift. Cancellation is observed only between cycles.
async fn run_on_cadence<F, Fut>(
    cadence: std::time::Duration,
    cancel: &CancellationToken,
    mut cycle: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let cycle_start = Instant::now();
        cycle().await?;

        tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            () = tokio::time::sleep_until(cycle_start + cadence) => {}
        }
    }
}
