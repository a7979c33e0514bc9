use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::universe::DEFAULT_SYMBOLS;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub schwab: SchwabConfig,
    pub market_hours: MarketHoursConfig,
    pub fetcher: FetcherConfig,
    pub universe: UniverseConfig,
    pub activity: ActivityConfig,
}

/// Schwab API endpoints and credential locations.
///
/// The app key/secret are read from the named environment variables,
/// never stored in the config file itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchwabConfig {
    pub api_base_url: String,
    pub token_url: String,
    /// Token file shared with the one-shot authorization flow.
    pub token_path: String,
    pub app_key_env: String,
    pub app_secret_env: String,
    pub timeout_secs: u64,
    pub requests_per_minute: u32,
    /// Strikes per side requested around the money.
    pub strike_count: u32,
}

impl Default for SchwabConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.schwabapi.com".to_string(),
            token_url: "https://api.schwabapi.com/v1/oauth/token".to_string(),
            token_path: "token.json".to_string(),
            app_key_env: "SCHWAB_APP_KEY".to_string(),
            app_secret_env: "SCHWAB_APP_SECRET".to_string(),
            timeout_secs: 30,
            requests_per_minute: 120,
            strike_count: 100,
        }
    }
}

/// Trading session bounds, interpreted in US/Eastern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketHoursConfig {
    /// Session open, "HH:MM".
    pub open: String,
    /// Session close, "HH:MM".
    pub close: String,
    /// Full-day market holidays.
    pub holidays: Vec<NaiveDate>,
}

impl Default for MarketHoursConfig {
    fn default() -> Self {
        Self {
            open: "09:30".to_string(),
            close: "16:00".to_string(),
            holidays: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    /// Wall-clock seconds from one cycle start to the next.
    pub cadence_secs: u64,
    /// Bound on concurrent per-symbol chain requests.
    pub max_concurrent_fetches: usize,
    pub retry_attempts: u32,
    pub retry_base_delay_secs: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            cadence_secs: 60,
            max_concurrent_fetches: 4,
            retry_attempts: 3,
            retry_base_delay_secs: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UniverseConfig {
    pub symbols: Vec<String>,
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            symbols: DEFAULT_SYMBOLS.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    /// Append-only JSONL activity log.
    pub path: String,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            path: "logs/activity.jsonl".to_string(),
        }
    }
}
