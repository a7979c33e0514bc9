//! The configured set of underlyings to poll each cycle.

use crate::config::UniverseConfig;

/// Most liquid US options underlyings, polled by default. Index symbols
/// carry the `$` prefix the Schwab API expects.
pub const DEFAULT_SYMBOLS: &[&str] = &[
    "SPY", "QQQ", "IWM", "$SPX", "$NDX", "$VIX", "AAPL", "MSFT", "NVDA", "TSLA", "AMZN", "META",
    "GOOGL", "AMD", "NFLX", "COIN", "PLTR", "SMCI", "GLD", "TLT",
];

/// Immutable polling universe, fixed for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct Universe {
    symbols: Vec<String>,
}

impl Universe {
    #[must_use]
    pub fn new(symbols: Vec<String>) -> Self {
        Self { symbols }
    }

    #[must_use]
    pub fn from_config(config: &UniverseConfig) -> Self {
        Self::new(config.symbols.clone())
    }

    #[must_use]
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Strips the index prefix for keys and logs ("$SPX" -> "SPX").
#[must_use]
pub fn display_symbol(symbol: &str) -> &str {
    symbol.trim_start_matches('$')
}
