//! Market-local clock: window predicate and the human-readable timestamps
//! written into snapshot notes and status responses.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

use crate::config::Config;
use crate::types::QuoteError;

#[derive(Debug, Clone, Copy)]
pub struct MarketClock {
    tz: Tz,
    window_start: NaiveTime,
    window_end: NaiveTime,
}

impl MarketClock {
    pub fn new(tz: Tz, window_start: NaiveTime, window_end: NaiveTime) -> Self {
        Self {
            tz,
            window_start,
            window_end,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.market_tz, cfg.market_window_start, cfg.market_window_end)
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    pub fn local(&self, now: DateTime<Utc>) -> DateTime<Tz> {
        now.with_timezone(&self.tz)
    }

    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        self.local(now).date_naive()
    }

    /// Weekday and local time inside `[window_start, window_end]`.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        let local = self.local(now);
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let t = local.time();
        t >= self.window_start && t <= self.window_end
    }

    /// `YYYY-MM-DD HH:MM:SS TZ` in market time.
    pub fn format(&self, now: DateTime<Utc>) -> String {
        self.local(now).format("%Y-%m-%d %H:%M:%S %Z").to_string()
    }

    pub fn format_epoch(&self, epoch: i64) -> Option<String> {
        Utc.timestamp_opt(epoch, 0).single().map(|dt| self.format(dt))
    }

    /// Snapshot note: time, window state and fetch outcome.
    pub fn snapshot_note(&self, now: DateTime<Utc>, outcome: Option<&QuoteError>) -> String {
        let window = if self.is_open(now) { "OPEN" } else { "CLOSED" };
        let result = match outcome {
            None => "Price check ok".to_string(),
            Some(e) => e.to_string(),
        };
        format!("{} | Window: {window} | {result}", self.format(now))
    }
}
