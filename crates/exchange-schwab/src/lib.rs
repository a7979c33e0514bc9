//! Schwab market-data integration.
//!
//! Owns the credential lifecycle (two-clock OAuth refresh against the token
//! endpoint), the rate-limited REST client, and option-chain response
//! parsing. Used by `gexray-fetcher` to pull raw contracts each cycle.

pub mod chain;
pub mod client;
pub mod error;
pub mod token;
pub mod types;

pub use chain::ChainData;
pub use client::{SchwabClient, SchwabClientConfig};
pub use error::{Result, SchwabError};
pub use token::{Credential, TokenManager, TokenManagerConfig, TokenStore};
pub use types::{ContractRecord, Instrument, OptionRight};
