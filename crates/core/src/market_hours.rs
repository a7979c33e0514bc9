//! Market hours gate, a pure function of the clock and the trading calendar.
//!
//! The fetch loop consults this before every cycle, so a process started
//! pre-market begins fetching at the open and idles after the close without
//! a restart.

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::US::Eastern;
use std::collections::BTreeSet;

use crate::config::MarketHoursConfig;

/// Regular-session trading calendar for US listed options.
#[derive(Debug, Clone)]
pub struct TradingCalendar {
    open: NaiveTime,
    close: NaiveTime,
    holidays: BTreeSet<NaiveDate>,
}

impl TradingCalendar {
    /// Builds a calendar from session bounds in "HH:MM" Eastern time.
    ///
    /// # Errors
    /// Returns an error if either bound fails to parse or open >= close.
    pub fn new(open: &str, close: &str, holidays: Vec<NaiveDate>) -> Result<Self> {
        let open = NaiveTime::parse_from_str(open, "%H:%M")
            .with_context(|| format!("invalid session open: {open}"))?;
        let close = NaiveTime::parse_from_str(close, "%H:%M")
            .with_context(|| format!("invalid session close: {close}"))?;
        anyhow::ensure!(open < close, "session open must precede close");

        Ok(Self {
            open,
            close,
            holidays: holidays.into_iter().collect(),
        })
    }

    /// Builds a calendar from the loaded configuration section.
    ///
    /// # Errors
    /// Returns an error if the configured session bounds are invalid.
    pub fn from_config(config: &MarketHoursConfig) -> Result<Self> {
        Self::new(&config.open, &config.close, config.holidays.clone())
    }

    /// Returns true when `now` falls inside the regular session on a
    /// non-holiday weekday. Open and close are both inclusive.
    #[must_use]
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        let eastern = now.with_timezone(&Eastern);

        if matches!(eastern.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        if self.holidays.contains(&eastern.date_naive()) {
            return false;
        }

        let time = eastern.time();
        self.open <= time && time <= self.close
    }
}
