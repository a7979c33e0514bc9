pub mod activity;
pub mod config;
pub mod config_loader;
pub mod market_hours;
pub mod universe;

pub use activity::{ActivityEntry, ActivityLog};
pub use config::{
    ActivityConfig, AppConfig, FetcherConfig, MarketHoursConfig, SchwabConfig, UniverseConfig,
};
pub use config_loader::ConfigLoader;
pub use market_hours::TradingCalendar;
pub use universe::{display_symbol, Universe};
