//! Exposure aggregation.
//!
//! Folds raw per-contract fields into net GEX/VEX per (symbol, expiry,
//! strike) cell. Pure and deterministic: the same records always produce
//! the same cells, with no dependence on prior snapshots.
//!
//! Formulas per contract, with the fixed dealer convention of calls +1,
//! puts -1 (the policy lives in `OptionRight::side_sign`):
//!   `gex = gamma * open_interest * multiplier * spot^2 * 0.01 * side_sign`
//!   `vex = vega  * open_interest * multiplier * side_sign`
//! GEX is expressed per 1% move of the underlying, hence the spot^2 * 0.01
//! factor; vega is already a per-point dollar sensitivity, so VEX carries
//! no spot scaling. Cells whose net GEX and net VEX are both zero are
//! omitted: an empty cell is absence, not a zero entry.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use gexray_schwab::types::Instrument;
use gexray_schwab::ChainData;

/// Identity of one exposure cell.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellKey {
    pub symbol: String,
    pub expiry: chrono::NaiveDate,
    pub strike: Decimal,
}

impl CellKey {
    #[must_use]
    pub fn instrument(&self) -> Instrument {
        Instrument::new(self.symbol.clone(), self.expiry)
    }
}

/// Net signed exposure for one cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Exposure {
    pub gex: f64,
    pub vex: f64,
}

/// Output of one aggregation pass: sparse cells plus the last spot
/// observed per symbol this cycle.
#[derive(Debug, Clone, Default)]
pub struct AggregatedChain {
    pub cells: BTreeMap<CellKey, Exposure>,
    pub spots: BTreeMap<String, f64>,
}

impl AggregatedChain {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Aggregates one cycle's parsed chains into net exposure cells.
#[must_use]
pub fn aggregate(chains: &[ChainData]) -> AggregatedChain {
    let mut cells: BTreeMap<CellKey, Exposure> = BTreeMap::new();
    let mut spots: BTreeMap<String, f64> = BTreeMap::new();

    for chain in chains {
        if !(chain.underlying_spot.is_finite() && chain.underlying_spot > 0.0) {
            continue;
        }
        // Most recent observation for the symbol wins within the cycle.
        spots.insert(chain.symbol.clone(), chain.underlying_spot);

        for record in &chain.records {
            let spot = record.underlying_spot;
            if !(spot.is_finite() && spot > 0.0) {
                continue;
            }

            let sign = record.right.side_sign();
            let oi = record.open_interest as f64;
            let gex_scale = oi * record.multiplier * spot * spot * 0.01 * sign;
            let vex_scale = oi * record.multiplier * sign;

            let key = CellKey {
                symbol: record.symbol.clone(),
                expiry: record.expiry,
                strike: record.strike,
            };
            let cell = cells.entry(key).or_default();
            cell.gex += record.gamma * gex_scale;
            cell.vex += record.vega * vex_scale;
        }
    }

    // Sparse representation: strikes that net out to nothing are absent.
    cells.retain(|_, exposure| exposure.gex != 0.0 || exposure.vex != 0.0);

    AggregatedChain { cells, spots }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use gexray_schwab::{ContractRecord, OptionRight};
    use rust_decimal_macros::dec;

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 9, 18).unwrap()
    }

    fn contract(
        strike: Decimal,
        right: OptionRight,
        oi: u64,
        gamma: f64,
        vega: f64,
        spot: f64,
    ) -> ContractRecord {
        ContractRecord {
            symbol: "SPY".to_string(),
            expiry: expiry(),
            strike,
            right,
            open_interest: oi,
            gamma,
            vega,
            multiplier: 100.0,
            underlying_spot: spot,
        }
    }

    fn chain(records: Vec<ContractRecord>, spot: f64) -> ChainData {
        ChainData {
            symbol: "SPY".to_string(),
            underlying_spot: spot,
            records,
        }
    }

    #[test]
    fn known_value_gex() {
        // gamma=0.02, oi=10_000, spot=500:
        // 0.02 * 10_000 * 100 * 500^2 * 0.01 = 50_000_000
        let agg = aggregate(&[chain(
            vec![contract(dec!(500), OptionRight::Call, 10_000, 0.02, 0.0, 500.0)],
            500.0,
        )]);

        let cell = agg.cells.values().next().unwrap();
        assert!((cell.gex - 50_000_000.0).abs() < 1e-6);
    }

    #[test]
    fn known_value_vex_carries_no_spot_scaling() {
        // vega=0.35, oi=1000: 0.35 * 1000 * 100 = 35_000, regardless of spot.
        let agg = aggregate(&[chain(
            vec![contract(dec!(500), OptionRight::Call, 1000, 0.0, 0.35, 500.0)],
            500.0,
        )]);

        let cell = agg.cells.values().next().unwrap();
        assert!((cell.vex - 35_000.0).abs() < 1e-6);

        // Same contract at a different spot yields the same VEX.
        let far = aggregate(&[chain(
            vec![contract(dec!(500), OptionRight::Call, 1000, 0.0, 0.35, 50.0)],
            50.0,
        )]);
        let far_cell = far.cells.values().next().unwrap();
        assert!((far_cell.vex - cell.vex).abs() < 1e-9);
    }

    #[test]
    fn puts_flip_sign_and_net_against_calls() {
        let agg = aggregate(&[chain(
            vec![
                contract(dec!(590), OptionRight::Call, 1000, 0.02, 0.5, 590.0),
                contract(dec!(590), OptionRight::Put, 400, 0.02, 0.5, 590.0),
            ],
            590.0,
        )]);

        assert_eq!(agg.cells.len(), 1);
        let cell = agg.cells.values().next().unwrap();
        // Net OI of 600 contracts at the call sign.
        let expected_gex = 0.02 * 600.0 * 100.0 * 590.0 * 590.0 * 0.01;
        assert!((cell.gex - expected_gex).abs() < 1e-6);
        assert!(cell.gex > 0.0);
        let expected_vex = 0.5 * 600.0 * 100.0;
        assert!((cell.vex - expected_vex).abs() < 1e-6);
    }

    #[test]
    fn exactly_offsetting_cells_are_omitted() {
        let agg = aggregate(&[chain(
            vec![
                contract(dec!(590), OptionRight::Call, 500, 0.02, 0.4, 590.0),
                contract(dec!(590), OptionRight::Put, 500, 0.02, 0.4, 590.0),
            ],
            590.0,
        )]);

        assert!(agg.is_empty());
    }

    #[test]
    fn aggregation_is_deterministic_under_replay() {
        let chains = vec![chain(
            vec![
                contract(dec!(580), OptionRight::Call, 300, 0.015, 0.4, 590.0),
                contract(dec!(590), OptionRight::Put, 700, 0.02, 0.6, 590.0),
                contract(dec!(600), OptionRight::Call, 120, 0.01, 0.3, 590.0),
            ],
            590.0,
        )];

        let first = aggregate(&chains);
        let second = aggregate(&chains);
        assert_eq!(first.cells, second.cells);
        assert_eq!(first.spots, second.spots);
    }

    #[test]
    fn strikes_and_expiries_key_distinct_cells() {
        let later = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        let mut far = contract(dec!(590), OptionRight::Call, 100, 0.01, 0.2, 590.0);
        far.expiry = later;

        let agg = aggregate(&[chain(
            vec![
                contract(dec!(590), OptionRight::Call, 100, 0.01, 0.2, 590.0),
                far,
            ],
            590.0,
        )]);

        assert_eq!(agg.cells.len(), 2);
    }

    #[test]
    fn zero_spot_chain_is_skipped() {
        let agg = aggregate(&[chain(
            vec![contract(dec!(590), OptionRight::Call, 100, 0.01, 0.2, 0.0)],
            0.0,
        )]);
        assert!(agg.is_empty());
        assert!(agg.spots.is_empty());
    }
}
