use chrono::NaiveTime;
use chrono_tz::Tz;
use tracing::warn;

use crate::error::{AppError, Result};

pub const ALPHA_VANTAGE_URL: &str = "https://www.alphavantage.co/query";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini-search-preview";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash-lite";

/// Snapshot notes are cut to this many characters before they are stored.
pub const SNAPSHOT_NOTE_MAX_CHARS: usize = 300;

/// Run-status messages are cut to this many characters before they are stored.
pub const RUN_MESSAGE_MAX_CHARS: usize = 400;

/// Per-call timeout for LLM-backed providers when `PROVIDER_TIMEOUT_SECS` is unset.
pub const LLM_TIMEOUT_SECS: u64 = 20;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Provider selection (QUOTE_PROVIDER), lower-cased.
    pub quote_provider: String,
    pub alpha_vantage_key: Option<String>,
    pub alpha_vantage_url: String,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: String,
    /// Explicit per-call provider timeout (PROVIDER_TIMEOUT_SECS). Adapters pick
    /// their own default when unset.
    pub provider_timeout_secs: Option<u64>,
    /// Outbound webhook (DISCORD_WEBHOOK). `None` disables notifications.
    pub webhook_url: Option<String>,
    pub webhook_timeout_secs: u64,
    pub market_tz: Tz,
    pub market_window_start: NaiveTime,
    pub market_window_end: NaiveTime,
    pub cooldown_minutes: i64,
    /// Lead time of the `earnings_days` rule seeded on new symbols. Negative disables seeding.
    pub earnings_notify_default_days: i64,
    /// Daily bulk-run fire times in the market timezone (ALERT_FIRE_TIMES).
    pub fire_times: Vec<NaiveTime>,
    pub run_timeout_secs: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let market_tz_raw =
            std::env::var("MARKET_TZ").unwrap_or_else(|_| "America/New_York".to_string());
        let market_tz = market_tz_raw
            .parse::<Tz>()
            .map_err(|_| AppError::Config(format!("MARKET_TZ '{market_tz_raw}' is not a known timezone")))?;

        let market_window_start = parse_hhmm(
            &std::env::var("MARKET_WINDOW_START").unwrap_or_else(|_| "08:30".to_string()),
        )
        .ok_or_else(|| AppError::Config("MARKET_WINDOW_START must be HH:MM".to_string()))?;
        let market_window_end = parse_hhmm(
            &std::env::var("MARKET_WINDOW_END").unwrap_or_else(|_| "17:00".to_string()),
        )
        .ok_or_else(|| AppError::Config("MARKET_WINDOW_END must be HH:MM".to_string()))?;

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "stocks.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            quote_provider: std::env::var("QUOTE_PROVIDER")
                .unwrap_or_else(|_| "alpha_vantage".to_string())
                .trim()
                .to_lowercase(),
            alpha_vantage_key: non_empty_var("ALPHA_VANTAGE_KEY"),
            alpha_vantage_url: std::env::var("ALPHA_VANTAGE_URL")
                .unwrap_or_else(|_| ALPHA_VANTAGE_URL.to_string()),
            openai_api_key: non_empty_var("OPENAI_API_KEY"),
            openai_model: std::env::var("OPENAI_MODEL")
                .unwrap_or_else(|_| DEFAULT_OPENAI_MODEL.to_string()),
            openai_base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| OPENAI_BASE_URL.to_string()),
            gemini_api_key: non_empty_var("GEMINI_API_KEY"),
            gemini_model: std::env::var("GEMINI_MODEL")
                .unwrap_or_else(|_| DEFAULT_GEMINI_MODEL.to_string()),
            gemini_base_url: std::env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| GEMINI_BASE_URL.to_string()),
            provider_timeout_secs: std::env::var("PROVIDER_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok()),
            webhook_url: non_empty_var("DISCORD_WEBHOOK"),
            webhook_timeout_secs: std::env::var("WEBHOOK_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse::<u64>()
                .unwrap_or(10),
            market_tz,
            market_window_start,
            market_window_end,
            cooldown_minutes: std::env::var("ALERT_COOLDOWN_MINUTES")
                .unwrap_or_else(|_| "15".to_string())
                .parse::<i64>()
                .unwrap_or(15),
            earnings_notify_default_days: std::env::var("EARNINGS_NOTIFY_DEFAULT_DAYS")
                .unwrap_or_else(|_| "1".to_string())
                .parse::<i64>()
                .unwrap_or(1),
            fire_times: parse_fire_times(
                &std::env::var("ALERT_FIRE_TIMES")
                    .unwrap_or_else(|_| "09:35,12:00,15:55".to_string()),
            ),
            run_timeout_secs: std::env::var("RUN_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "600".to_string())
                .parse::<i64>()
                .unwrap_or(600),
        })
    }

    pub fn cooldown_secs(&self) -> i64 {
        self.cooldown_minutes * 60
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a wall-clock `HH:MM` string.
pub fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    let (hh, mm) = s.trim().split_once(':')?;
    NaiveTime::from_hms_opt(hh.trim().parse().ok()?, mm.trim().parse().ok()?, 0)
}

/// Parse a comma-separated `HH:MM` list; bad entries are logged and skipped.
pub fn parse_fire_times(raw: &str) -> Vec<NaiveTime> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match parse_hhmm(s) {
            Some(t) => Some(t),
            None => {
                warn!("Invalid ALERT_FIRE_TIMES entry '{s}', expected HH:MM");
                None
            }
        })
        .collect()
}

/// Render a credential for logs without leaking it.
pub fn mask_key(key: Option<&str>) -> String {
    match key {
        None | Some("") => "<MISSING>".to_string(),
        Some(k) if k.chars().count() > 8 => {
            let head: String = k.chars().take(4).collect();
            let tail: String = k.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
            format!("{head}…{tail}")
        }
        Some(_) => "****".to_string(),
    }
}

#[cfg(test)]
impl Config {
    /// Defaults used by unit tests; no env access.
    pub fn for_tests() -> Self {
        Self {
            log_level: "debug".to_string(),
            db_path: ":memory:".to_string(),
            api_port: 0,
            quote_provider: "alpha_vantage".to_string(),
            alpha_vantage_key: None,
            alpha_vantage_url: ALPHA_VANTAGE_URL.to_string(),
            openai_api_key: None,
            openai_model: DEFAULT_OPENAI_MODEL.to_string(),
            openai_base_url: OPENAI_BASE_URL.to_string(),
            gemini_api_key: None,
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            gemini_base_url: GEMINI_BASE_URL.to_string(),
            provider_timeout_secs: None,
            webhook_url: None,
            webhook_timeout_secs: 10,
            market_tz: chrono_tz::America::New_York,
            market_window_start: NaiveTime::from_hms_opt(8, 30, 0).unwrap(),
            market_window_end: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            cooldown_minutes: 15,
            earnings_notify_default_days: 1,
            fire_times: vec![NaiveTime::from_hms_opt(9, 35, 0).unwrap()],
            run_timeout_secs: 600,
        }
    }
}
