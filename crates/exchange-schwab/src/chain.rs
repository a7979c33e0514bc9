//! Option-chain response parsing.
//!
//! Schwab returns calls and puts as nested maps keyed by
//! `"<expiry>:<days-to-expiry>"` then by strike, with one or more contracts
//! per strike (index symbols like $SPX carry both the monthly and weekly
//! series at the same strike). Parsing flattens everything into
//! [`ContractRecord`]s and keeps only the fields the aggregator consumes.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::warn;

use crate::error::{Result, SchwabError};
use crate::types::{ContractRecord, OptionRight};

/// Parsed chain for one underlying: the spot plus flattened contracts.
#[derive(Debug, Clone)]
pub struct ChainData {
    /// Display symbol (index prefix stripped).
    pub symbol: String,
    pub underlying_spot: f64,
    pub records: Vec<ContractRecord>,
}

/// Wire shape of the chain endpoint response.
#[derive(Debug, Deserialize)]
pub struct RawChainResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(rename = "underlyingPrice", default)]
    pub underlying_price: Option<f64>,
    #[serde(rename = "callExpDateMap", default)]
    pub call_exp_date_map: BTreeMap<String, BTreeMap<String, Vec<RawContract>>>,
    #[serde(rename = "putExpDateMap", default)]
    pub put_exp_date_map: BTreeMap<String, BTreeMap<String, Vec<RawContract>>>,
}

#[derive(Debug, Deserialize)]
pub struct RawContract {
    #[serde(rename = "strikePrice", default)]
    strike_price: Option<f64>,
    #[serde(rename = "openInterest", default)]
    open_interest: Option<f64>,
    #[serde(default)]
    gamma: Option<f64>,
    #[serde(default)]
    vega: Option<f64>,
    #[serde(default)]
    multiplier: Option<f64>,
}

/// Schwab reports -999 when a greek is unavailable; treat it like missing.
fn sanitize_greek(value: Option<f64>) -> f64 {
    match value {
        Some(v) if v.is_finite() && v > -900.0 => v,
        _ => 0.0,
    }
}

/// Expiry map keys look like "2026-09-18:19"; the suffix is days to expiry.
fn parse_expiry_key(key: &str) -> Option<NaiveDate> {
    let date_part = key.split(':').next()?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

/// Flattens a raw chain response into per-contract records.
///
/// # Errors
/// Returns an `Api` error when the endpoint reports a non-success status in
/// the body, and `Serialization` when the underlying price is absent (the
/// exposure formula cannot run without a spot).
pub fn parse_chain(symbol: &str, raw: RawChainResponse) -> Result<ChainData> {
    if let Some(status) = raw.status.as_deref() {
        if status != "SUCCESS" {
            return Err(SchwabError::api(
                200,
                format!("chain status for {symbol}: {status}"),
            ));
        }
    }

    let spot = raw.underlying_price.unwrap_or(0.0);
    if !(spot.is_finite() && spot > 0.0) {
        return Err(SchwabError::Serialization(format!(
            "chain for {symbol} carries no underlying price"
        )));
    }

    let display = gexray_core::display_symbol(symbol).to_string();
    let mut records = Vec::new();

    let mut sides = [
        (OptionRight::Call, raw.call_exp_date_map),
        (OptionRight::Put, raw.put_exp_date_map),
    ];
    for (right, exp_map) in &mut sides {
        for (exp_key, strikes) in std::mem::take(exp_map) {
            let Some(expiry) = parse_expiry_key(&exp_key) else {
                warn!(symbol, key = %exp_key, "Skipping unparseable expiry key");
                continue;
            };

            for contracts in strikes.into_values() {
                for contract in contracts {
                    let Some(strike) = contract
                        .strike_price
                        .filter(|s| s.is_finite() && *s > 0.0)
                        .and_then(|s| Decimal::try_from(s).ok())
                    else {
                        continue;
                    };

                    records.push(ContractRecord {
                        symbol: display.clone(),
                        expiry,
                        strike,
                        right: *right,
                        open_interest: contract
                            .open_interest
                            .filter(|oi| oi.is_finite() && *oi > 0.0)
                            .map_or(0, |oi| oi as u64),
                        gamma: sanitize_greek(contract.gamma),
                        vega: sanitize_greek(contract.vega),
                        multiplier: contract
                            .multiplier
                            .filter(|m| m.is_finite() && *m > 0.0)
                            .unwrap_or(100.0),
                        underlying_spot: spot,
                    });
                }
            }
        }
    }

    Ok(ChainData {
        symbol: display,
        underlying_spot: spot,
        records,
    })
}
