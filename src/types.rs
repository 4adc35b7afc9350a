use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Provider error classification
// ---------------------------------------------------------------------------

/// Standardised provider failure. Anything present on a payload means
/// "no usable data", including the free-form `Other` passthrough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum QuoteError {
    KeyMissing,
    NetworkError,
    RateLimited,
    InvalidSymbol,
    EmptyQuote,
    ParseError,
    Unconfigured,
    NoRealtimeAccess,
    Unknown,
    /// Unrecognised source reason, lower-cased.
    Other(String),
}

impl QuoteError {
    pub fn as_str(&self) -> &str {
        match self {
            QuoteError::KeyMissing => "key_missing",
            QuoteError::NetworkError => "network_error",
            QuoteError::RateLimited => "rate_limited",
            QuoteError::InvalidSymbol => "invalid_symbol",
            QuoteError::EmptyQuote => "empty_quote",
            QuoteError::ParseError => "parse_error",
            QuoteError::Unconfigured => "unconfigured",
            QuoteError::NoRealtimeAccess => "no_realtime_access",
            QuoteError::Unknown => "unknown",
            QuoteError::Other(s) => s,
        }
    }

    /// Map a loosely worded source reason onto the closed set. Returns `None`
    /// for empty input.
    pub fn normalize(raw: &str) -> Option<Self> {
        let s = raw.trim().to_lowercase();
        if s.is_empty() || s == "null" || s == "none" {
            return None;
        }
        let kind = match s.as_str() {
            "key_missing" | "no_api_key" => QuoteError::KeyMissing,
            "network_error" | "network" => QuoteError::NetworkError,
            "rate_limited" | "rate-limit" => QuoteError::RateLimited,
            "invalid_symbol" | "invalid-sym" | "bad_symbol" => QuoteError::InvalidSymbol,
            "empty_quote" | "empty" => QuoteError::EmptyQuote,
            "parse_error" | "parse" => QuoteError::ParseError,
            "unconfigured" => QuoteError::Unconfigured,
            "no_realtime_access" | "no-real-time-access" => QuoteError::NoRealtimeAccess,
            "unknown" => QuoteError::Unknown,
            _ if s.contains("rate") && s.contains("limit") => QuoteError::RateLimited,
            _ if s.contains("api key") || s.contains("unauth") => QuoteError::KeyMissing,
            _ if s.contains("realtime") || s.contains("real-time") => QuoteError::NoRealtimeAccess,
            _ if s.contains("invalid") && s.contains("symbol") => QuoteError::InvalidSymbol,
            _ if s.contains("parse") => QuoteError::ParseError,
            _ if s.contains("empty") || s.contains("not found") => QuoteError::EmptyQuote,
            _ => QuoteError::Other(s),
        };
        Some(kind)
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, QuoteError::RateLimited)
    }
}

impl std::fmt::Display for QuoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<String> for QuoteError {
    fn from(s: String) -> Self {
        QuoteError::normalize(&s).unwrap_or(QuoteError::Unknown)
    }
}

impl From<QuoteError> for String {
    fn from(e: QuoteError) -> Self {
        e.as_str().to_string()
    }
}

// ---------------------------------------------------------------------------
// Unified quote payload
// ---------------------------------------------------------------------------

/// The contract every provider answers with. Every value field is optional;
/// providers never invent numbers they could not source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnifiedQuote {
    pub symbol: String,
    pub price: Option<f64>,
    pub prev_close: Option<f64>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub volume: Option<i64>,
    /// `YYYY-MM-DD`
    pub latest_trading_day: Option<String>,
    pub change: Option<f64>,
    /// e.g. `"1.23%"` / `"-0.23%"`
    pub change_percent: Option<String>,
    pub market_cap: Option<i64>,
    pub pe_ratio: Option<f64>,
    /// 2.73 means 2.73%
    pub dividend_yield_percent: Option<f64>,
    pub fifty_two_week_high: Option<f64>,
    pub fifty_two_week_low: Option<f64>,
    pub quarterly_dividend_amount: Option<f64>,
    /// `YYYY-MM-DD` when known and upcoming.
    pub next_earning_day: Option<String>,
    /// One sentence: industry and business focus.
    pub description: Option<String>,
    pub source: String,
    pub error: Option<QuoteError>,
}

impl UnifiedQuote {
    /// A payload with every value field null.
    pub fn empty(symbol: &str, source: &str, error: Option<QuoteError>) -> Self {
        Self {
            symbol: normalize_ticker(symbol),
            source: source.to_string(),
            error,
            ..Default::default()
        }
    }

    /// True when at least one of price / previous close is known.
    pub fn has_data(&self) -> bool {
        self.price.is_some() || self.prev_close.is_some()
    }

    /// Fill `change` and `change_percent` when the source did not supply them.
    pub fn fill_derived(&mut self) {
        if self.change.is_none() {
            if let (Some(price), Some(prev)) = (self.price, self.prev_close) {
                self.change = Some(price - prev);
            }
        }
        if self.change_percent.is_none() {
            if let (Some(change), Some(prev)) = (self.change, self.prev_close) {
                self.change_percent = format_change_percent(change, prev);
            }
        }
    }

    /// Mark a payload with neither price nor previous close as `empty_quote`
    /// unless it already carries an error.
    pub fn flag_if_empty(&mut self) {
        if !self.has_data() && self.error.is_none() {
            self.error = Some(QuoteError::EmptyQuote);
        }
    }
}

/// `change / prev_close * 100` rendered to two decimals with a `%` suffix.
pub fn format_change_percent(change: f64, prev_close: f64) -> Option<String> {
    if prev_close == 0.0 {
        return None;
    }
    Some(format!("{:.2}%", change / prev_close * 100.0))
}

pub fn normalize_ticker(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// First ten characters of a date-ish string, when they form `YYYY-MM-DD`.
pub fn normalize_date(raw: &str) -> Option<String> {
    let head: String = raw.trim().chars().take(10).collect();
    chrono::NaiveDate::parse_from_str(&head, "%Y-%m-%d").ok()?;
    Some(head)
}

// ---------------------------------------------------------------------------
// Watchlist groups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Group {
    Watch,
    Archived,
}

impl Group {
    pub fn as_str(&self) -> &'static str {
        match self {
            Group::Watch => "watch",
            Group::Archived => "archived",
        }
    }
}

impl std::fmt::Display for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Group {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "watch" => Ok(Group::Watch),
            "archived" => Ok(Group::Archived),
            other => Err(format!("unknown group '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Alert rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Above,
    Below,
    PctDrop,
    PctJump,
    EarningsDays,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Above => "above",
            AlertKind::Below => "below",
            AlertKind::PctDrop => "pct_drop",
            AlertKind::PctJump => "pct_jump",
            AlertKind::EarningsDays => "earnings_days",
        }
    }

    /// Earnings reminders are suppressed per earnings date, everything else by cooldown.
    pub fn is_keyed(&self) -> bool {
        matches!(self, AlertKind::EarningsDays)
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AlertKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "above" => Ok(AlertKind::Above),
            "below" => Ok(AlertKind::Below),
            "pct_drop" => Ok(AlertKind::PctDrop),
            "pct_jump" => Ok(AlertKind::PctJump),
            "earnings_days" => Ok(AlertKind::EarningsDays),
            other => Err(format!("unknown alert kind '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Run status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Idle,
    Running,
    Finished,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Idle => "idle",
            RunPhase::Running => "running",
            RunPhase::Finished => "finished",
        }
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RunPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(RunPhase::Idle),
            "running" => Ok(RunPhase::Running),
            "finished" => Ok(RunPhase::Finished),
            other => Err(format!("unknown run phase '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatusCode {
    Ok,
    Partial,
    RateLimited,
    Interrupted,
    InterruptedTimeout,
    ManualReset,
}

impl RunStatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatusCode::Ok => "ok",
            RunStatusCode::Partial => "partial",
            RunStatusCode::RateLimited => "rate_limited",
            RunStatusCode::Interrupted => "interrupted",
            RunStatusCode::InterruptedTimeout => "interrupted_timeout",
            RunStatusCode::ManualReset => "manual_reset",
        }
    }

    /// Completion code for a finished batch. A rate-limit error outranks a
    /// generic partial failure.
    pub fn from_counts(err_count: u32, rate_limited_seen: bool) -> Self {
        if err_count == 0 {
            RunStatusCode::Ok
        } else if rate_limited_seen {
            RunStatusCode::RateLimited
        } else {
            RunStatusCode::Partial
        }
    }
}

impl std::fmt::Display for RunStatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RunStatusCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(RunStatusCode::Ok),
            "partial" => Ok(RunStatusCode::Partial),
            "rate_limited" => Ok(RunStatusCode::RateLimited),
            "interrupted" => Ok(RunStatusCode::Interrupted),
            "interrupted_timeout" => Ok(RunStatusCode::InterruptedTimeout),
            "manual_reset" => Ok(RunStatusCode::ManualReset),
            other => Err(format!("unknown status code '{other}'")),
        }
    }
}

/// The single global run-status record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStatus {
    pub phase: RunPhase,
    pub started_epoch: Option<i64>,
    pub finished_epoch: Option<i64>,
    pub status_code: Option<RunStatusCode>,
    pub message: Option<String>,
    pub ok_count: i64,
    pub err_count: i64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
