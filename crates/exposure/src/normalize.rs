//! Statistical normalization of raw exposure into color-intensity classes.
//!
//! Statistics are computed over the current snapshot's cells only, so every
//! snapshot is reproducible from its own cell set. Positive and negative
//! values form separate subsets per exposure kind: the color scheme is
//! deliberately asymmetric, and unifying the subsets would change its
//! meaning. Each subset gets a population mean/stddev; a cell's z-score is
//! taken against the stats of its own sign subset.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use gexray_schwab::types::Instrument;

use crate::aggregate::{AggregatedChain, CellKey};
use crate::snapshot::{ExtremeMarkers, InstrumentSummary, Snapshot, StarLevels};

/// |z| at or beyond which a cell is an outlier.
pub const OUTLIER_Z: f64 = 1.5;

/// z at or below which a cell is below-average within its sign subset.
pub const BELOW_AVERAGE_Z: f64 = -0.5;

/// Color-intensity bucket consumed by the presentation layer. The actual
/// palette is not this crate's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorClass {
    BelowAverage,
    Average,
    Outlier,
}

/// Population statistics for one sign subset of one exposure kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SignStats {
    pub mean: f64,
    pub stddev: f64,
    pub count: usize,
}

impl SignStats {
    /// Computes population mean and stddev over the subset.
    #[must_use]
    pub fn from_values(values: &[f64]) -> Self {
        let count = values.len();
        if count == 0 {
            return Self::default();
        }

        let mean = values.iter().sum::<f64>() / count as f64;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;

        Self {
            mean,
            stddev: variance.sqrt(),
            count,
        }
    }

    /// Returns the z-score and class for one member of this subset.
    ///
    /// A degenerate subset (fewer than 2 members, or zero spread) maps
    /// every member to `Average` instead of dividing by zero.
    #[must_use]
    pub fn classify(&self, value: f64) -> (Option<f64>, ColorClass) {
        if self.count < 2 || self.stddev == 0.0 {
            return (None, ColorClass::Average);
        }

        let z = (value - self.mean) / self.stddev;
        let class = if z.abs() >= OUTLIER_Z {
            ColorClass::Outlier
        } else if z <= BELOW_AVERAGE_Z {
            ColorClass::BelowAverage
        } else {
            ColorClass::Average
        };
        (Some(z), class)
    }
}

/// One cell of the published snapshot: raw values plus their normalized
/// classification per exposure kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedCell {
    pub key: CellKey,
    pub gex: f64,
    pub vex: f64,
    pub gex_z: Option<f64>,
    pub gex_class: ColorClass,
    pub vex_z: Option<f64>,
    pub vex_class: ColorClass,
}

fn sign_split(values: impl Iterator<Item = f64>) -> (Vec<f64>, Vec<f64>) {
    let mut positive = Vec::new();
    let mut negative = Vec::new();
    for v in values {
        if v > 0.0 {
            positive.push(v);
        } else if v < 0.0 {
            negative.push(v);
        }
        // Exact zeros only occur for the kind that did not keep the cell
        // alive; they belong to neither subset and classify as Average.
    }
    (positive, negative)
}

fn stats_for(value: f64, positive: &SignStats, negative: &SignStats) -> (Option<f64>, ColorClass) {
    if value > 0.0 {
        positive.classify(value)
    } else if value < 0.0 {
        negative.classify(value)
    } else {
        (None, ColorClass::Average)
    }
}

/// At-the-money strike: the present strike nearest the spot, ties broken
/// toward the lower strike.
fn atm_strike(strikes: &[Decimal], spot: f64) -> Option<Decimal> {
    let mut best: Option<(f64, Decimal)> = None;
    for &strike in strikes {
        let strike_f = strike.to_f64().unwrap_or(f64::MAX);
        let distance = (strike_f - spot).abs();
        best = match best {
            None => Some((distance, strike)),
            Some((best_distance, best_strike)) => {
                if distance < best_distance || (distance == best_distance && strike < best_strike) {
                    Some((distance, strike))
                } else {
                    Some((best_distance, best_strike))
                }
            }
        };
    }
    best.map(|(_, strike)| strike)
}

/// Global extreme tie sets for one exposure kind.
fn extremes(cells: &BTreeMap<CellKey, f64>) -> (Vec<CellKey>, Vec<CellKey>) {
    let max_positive = cells
        .values()
        .copied()
        .filter(|v| *v > 0.0)
        .fold(f64::NEG_INFINITY, f64::max);
    let min_negative = cells
        .values()
        .copied()
        .filter(|v| *v < 0.0)
        .fold(f64::INFINITY, f64::min);

    let max_set = if max_positive.is_finite() {
        cells
            .iter()
            .filter(|(_, v)| **v == max_positive)
            .map(|(k, _)| k.clone())
            .collect()
    } else {
        Vec::new()
    };
    let min_set = if min_negative.is_finite() {
        cells
            .iter()
            .filter(|(_, v)| **v == min_negative)
            .map(|(k, _)| k.clone())
            .collect()
    } else {
        Vec::new()
    };
    (max_set, min_set)
}

/// Per-symbol star levels: the strikes holding the highest positive and
/// most negative net GEX cell for that symbol.
fn star_levels(
    cells: &BTreeMap<CellKey, crate::aggregate::Exposure>,
    spots: &BTreeMap<String, f64>,
) -> BTreeMap<String, StarLevels> {
    let mut levels: BTreeMap<String, StarLevels> = BTreeMap::new();

    for (symbol, &spot) in spots {
        levels.insert(
            symbol.clone(),
            StarLevels {
                price: spot,
                max_positive: None,
                max_negative: None,
            },
        );
    }

    for (key, exposure) in cells {
        let Some(level) = levels.get_mut(&key.symbol) else {
            continue;
        };
        if exposure.gex > 0.0
            && level
                .max_positive
                .map_or(true, |(_, value)| exposure.gex > value)
        {
            level.max_positive = Some((key.strike, exposure.gex));
        }
        if exposure.gex < 0.0
            && level
                .max_negative
                .map_or(true, |(_, value)| exposure.gex < value)
        {
            level.max_negative = Some((key.strike, exposure.gex));
        }
    }

    levels
}

/// Normalizes one cycle's aggregated cells into a publishable snapshot.
#[must_use]
pub fn normalize(aggregated: &AggregatedChain, generated_at: DateTime<Utc>) -> Snapshot {
    let (gex_pos, gex_neg) = sign_split(aggregated.cells.values().map(|e| e.gex));
    let (vex_pos, vex_neg) = sign_split(aggregated.cells.values().map(|e| e.vex));

    let gex_pos_stats = SignStats::from_values(&gex_pos);
    let gex_neg_stats = SignStats::from_values(&gex_neg);
    let vex_pos_stats = SignStats::from_values(&vex_pos);
    let vex_neg_stats = SignStats::from_values(&vex_neg);

    let mut cells = Vec::with_capacity(aggregated.cells.len());
    let mut gex_by_key: BTreeMap<CellKey, f64> = BTreeMap::new();
    let mut vex_by_key: BTreeMap<CellKey, f64> = BTreeMap::new();
    let mut strikes_by_instrument: BTreeMap<Instrument, Vec<Decimal>> = BTreeMap::new();

    for (key, exposure) in &aggregated.cells {
        let (gex_z, gex_class) = stats_for(exposure.gex, &gex_pos_stats, &gex_neg_stats);
        let (vex_z, vex_class) = stats_for(exposure.vex, &vex_pos_stats, &vex_neg_stats);

        cells.push(NormalizedCell {
            key: key.clone(),
            gex: exposure.gex,
            vex: exposure.vex,
            gex_z,
            gex_class,
            vex_z,
            vex_class,
        });

        gex_by_key.insert(key.clone(), exposure.gex);
        vex_by_key.insert(key.clone(), exposure.vex);
        strikes_by_instrument
            .entry(key.instrument())
            .or_default()
            .push(key.strike);
    }

    let mut instruments = BTreeMap::new();
    for (instrument, strikes) in strikes_by_instrument {
        let Some(&spot) = aggregated.spots.get(&instrument.symbol) else {
            continue;
        };
        instruments.insert(
            instrument,
            InstrumentSummary {
                spot,
                atm_strike: atm_strike(&strikes, spot),
            },
        );
    }

    let (gex_max, gex_min) = extremes(&gex_by_key);
    let (vex_max, vex_min) = extremes(&vex_by_key);

    Snapshot {
        generated_at,
        cells,
        instruments,
        extremes: ExtremeMarkers {
            gex_max,
            gex_min,
            vex_max,
            vex_min,
        },
        star_levels: star_levels(&aggregated.cells, &aggregated.spots),
    }
}
