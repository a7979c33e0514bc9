//! The published snapshot and its atomically-swapped store.
//!
//! A snapshot is immutable once built. The store replaces the whole
//! `Arc` on publish, so readers on other tasks always observe either the
//! previous complete snapshot or the new one, never a mix, and the read
//! path never takes a lock.

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use gexray_schwab::types::Instrument;

use crate::aggregate::CellKey;
use crate::normalize::NormalizedCell;

/// Per-instrument derived values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSummary {
    /// Last spot observed for the symbol in the producing cycle.
    pub spot: f64,
    /// Present strike nearest the spot; absent if the instrument kept no
    /// cells this cycle.
    pub atm_strike: Option<Decimal>,
}

/// Global extreme tie sets per exposure kind, across all instruments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtremeMarkers {
    pub gex_max: Vec<CellKey>,
    pub gex_min: Vec<CellKey>,
    pub vex_max: Vec<CellKey>,
    pub vex_min: Vec<CellKey>,
}

/// Per-symbol gamma star levels (max positive / most negative net GEX
/// strike), matching the dashboard's star markers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StarLevels {
    pub price: f64,
    pub max_positive: Option<(Decimal, f64)>,
    pub max_negative: Option<(Decimal, f64)>,
}

/// One complete normalized view of the options universe, immutable once
/// published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub generated_at: DateTime<Utc>,
    pub cells: Vec<NormalizedCell>,
    pub instruments: BTreeMap<Instrument, InstrumentSummary>,
    pub extremes: ExtremeMarkers,
    pub star_levels: BTreeMap<String, StarLevels>,
}

/// Holds at most one live snapshot. `None` until the first successful
/// cycle publishes.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    current: ArcSwapOption<Snapshot>,
}

impl SnapshotStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replaces the stored snapshot.
    pub fn publish(&self, snapshot: Snapshot) {
        self.current.store(Some(Arc::new(snapshot)));
    }

    /// Returns the most recently published snapshot, or `None` before the
    /// first successful cycle. Never blocks.
    #[must_use]
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.current.load_full()
    }
}
