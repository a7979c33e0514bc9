//! Core types for the options exposure pipeline.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Option right (call or put).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionRight {
    Call,
    Put,
}

impl OptionRight {
    /// Exposure sign under the fixed dealer-positioning convention:
    /// calls contribute positive, puts negative. This is policy, applied
    /// identically across all instruments.
    #[must_use]
    pub fn side_sign(self) -> f64 {
        match self {
            Self::Call => 1.0,
            Self::Put => -1.0,
        }
    }
}

impl std::fmt::Display for OptionRight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "C"),
            Self::Put => write!(f, "P"),
        }
    }
}

/// One polled instrument: an underlying symbol and one of its expiries.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub expiry: NaiveDate,
}

impl Instrument {
    #[must_use]
    pub fn new(symbol: impl Into<String>, expiry: NaiveDate) -> Self {
        Self {
            symbol: symbol.into(),
            expiry,
        }
    }
}

impl std::fmt::Display for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.symbol, self.expiry)
    }
}

/// Raw per-contract fields consumed by the aggregator. Produced once per
/// fetch cycle, never retained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractRecord {
    pub symbol: String,
    pub expiry: NaiveDate,
    pub strike: Decimal,
    pub right: OptionRight,
    pub open_interest: u64,
    pub gamma: f64,
    pub vega: f64,
    /// Contract multiplier (100 for standard US equity options).
    pub multiplier: f64,
    /// Underlying spot observed alongside this contract.
    pub underlying_spot: f64,
}

impl ContractRecord {
    #[must_use]
    pub fn instrument(&self) -> Instrument {
        Instrument::new(self.symbol.clone(), self.expiry)
    }
}
