//! Web-search language-model adapter with OpenAI and Gemini backends.
//! The model's reply is untrusted text: it is cleaned, the first JSON object
//! is extracted and checked against the quote schema before use.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::error::Result;
use crate::provider::{value_f64, value_i64, value_str, PriceCheck, QuoteProvider};
use crate::types::{normalize_date, normalize_ticker, QuoteError, UnifiedQuote};

const NUMERIC_KEYS: &[&str] = &[
    "price",
    "prev_close",
    "open",
    "high",
    "low",
    "volume",
    "change",
    "market_cap",
    "pe_ratio",
    "dividend_yield_percent",
    "fifty_two_week_high",
    "fifty_two_week_low",
    "quarterly_dividend_amount",
];
const DATE_KEYS: &[&str] = &["latest_trading_day", "next_earning_day"];
const TEXT_KEYS: &[&str] = &["symbol", "description", "source", "error"];

const SYSTEM_PROMPT: &str = "You are a finance quote extractor. Use web search to fetch a current price, \
basic fundamentals and the next scheduled earnings date for the given US stock ticker from reputable \
sources (exchange site, Nasdaq, Yahoo Finance, company IR, SEC). Return ONLY one JSON object with the \
exact keys requested. Use null for anything you cannot verify and set error to 'no_realtime_access' when \
fresh data cannot be confirmed. Never guess numbers. No markdown, no code fences, no commentary.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    OpenAi,
    Gemini,
}

impl LlmBackend {
    fn source_name(&self) -> &'static str {
        match self {
            LlmBackend::OpenAi => "chatgpt_search_preview",
            LlmBackend::Gemini => "gemini_search",
        }
    }
}

pub struct LlmSearchProvider {
    client: reqwest::Client,
    backend: LlmBackend,
    api_key: Option<String>,
    model: String,
    base_url: String,
}

impl LlmSearchProvider {
    pub fn new(
        backend: LlmBackend,
        api_key: Option<String>,
        model: String,
        base_url: String,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            backend,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn user_prompt(&self, symbol: &str) -> String {
        let schema = json!({
            "symbol": symbol,
            "price": "<number or null>",
            "prev_close": "<number or null>",
            "open": "<number or null>",
            "high": "<number or null>",
            "low": "<number or null>",
            "volume": "<integer or null>",
            "latest_trading_day": "<YYYY-MM-DD or null>",
            "next_earning_day": "<YYYY-MM-DD or null>",
            "change": "<number or null>",
            "change_percent": "<string like -0.23% or null>",
            "market_cap": "<integer or null>",
            "pe_ratio": "<number or null>",
            "dividend_yield_percent": "<number or null>",
            "fifty_two_week_high": "<number or null>",
            "fifty_two_week_low": "<number or null>",
            "quarterly_dividend_amount": "<number or null>",
            "description": "<one sentence: business focus or null>",
            "source": self.backend.source_name(),
            "error": "<null or short error string>",
        });
        format!("Ticker: {symbol}\nReturn ONLY this JSON object:\n{schema}")
    }

    /// Raw reply text from the backend.
    async fn complete(&self, key: &str, symbol: &str) -> std::result::Result<String, QuoteError> {
        let request = match self.backend {
            LlmBackend::OpenAi => self
                .client
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(key)
                .json(&json!({
                    "model": self.model,
                    "web_search_options": {},
                    "messages": [
                        {"role": "system", "content": SYSTEM_PROMPT},
                        {"role": "user", "content": self.user_prompt(symbol)},
                    ],
                })),
            LlmBackend::Gemini => self
                .client
                .post(format!("{}/models/{}:generateContent", self.base_url, self.model))
                .header("x-goog-api-key", key)
                .json(&json!({
                    "systemInstruction": {"parts": [{"text": SYSTEM_PROMPT}]},
                    "contents": [{"role": "user", "parts": [{"text": self.user_prompt(symbol)}]}],
                    "tools": [{"google_search": {}}],
                    "generationConfig": {"temperature": 0},
                })),
        };

        let resp = request.send().await.map_err(|e| {
            debug!("{} transport error for {symbol}: {e}", self.backend.source_name());
            QuoteError::NetworkError
        })?;
        match resp.status() {
            s if s.is_success() => {}
            StatusCode::TOO_MANY_REQUESTS => return Err(QuoteError::RateLimited),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => return Err(QuoteError::KeyMissing),
            s => {
                debug!("{} HTTP {s} for {symbol}", self.backend.source_name());
                return Err(QuoteError::NetworkError);
            }
        }
        let body: Value = resp.json().await.map_err(|_| QuoteError::NetworkError)?;

        let text = match self.backend {
            LlmBackend::OpenAi => body
                .pointer("/choices/0/message/content")
                .and_then(Value::as_str)
                .map(str::to_string),
            LlmBackend::Gemini => body
                .pointer("/candidates/0/content/parts")
                .and_then(Value::as_array)
                .map(|parts| {
                    parts
                        .iter()
                        .filter_map(|p| p.get("text").and_then(Value::as_str))
                        .collect::<String>()
                }),
        };
        text.filter(|t| !t.trim().is_empty())
            .ok_or(QuoteError::NetworkError)
    }

    async fn ask(&self, symbol: &str) -> std::result::Result<Map<String, Value>, QuoteError> {
        let Some(key) = self.api_key.as_deref() else {
            return Err(QuoteError::KeyMissing);
        };
        let text = self.complete(key, symbol).await?;
        parse_reply(&text).map_err(|reason| {
            let preview: String = text.chars().take(300).collect();
            warn!(
                "{} reply for {symbol} rejected ({reason}) :: preview={preview:?}",
                self.backend.source_name()
            );
            QuoteError::ParseError
        })
    }

    fn to_quote(&self, symbol: &str, data: &Map<String, Value>) -> UnifiedQuote {
        let change_percent = match data.get("change_percent") {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(Value::Number(n)) => n.as_f64().map(|v| format!("{v:.2}%")),
            _ => None,
        };
        let mut quote = UnifiedQuote {
            symbol: value_str(data.get("symbol"))
                .map(|s| normalize_ticker(&s))
                .unwrap_or_else(|| symbol.to_string()),
            price: value_f64(data.get("price")),
            prev_close: value_f64(data.get("prev_close")),
            open: value_f64(data.get("open")),
            high: value_f64(data.get("high")),
            low: value_f64(data.get("low")),
            volume: value_i64(data.get("volume")),
            latest_trading_day: value_str(data.get("latest_trading_day")).and_then(|d| normalize_date(&d)),
            change: value_f64(data.get("change")),
            change_percent,
            market_cap: value_i64(data.get("market_cap")),
            pe_ratio: value_f64(data.get("pe_ratio")),
            dividend_yield_percent: value_f64(data.get("dividend_yield_percent")),
            fifty_two_week_high: value_f64(data.get("fifty_two_week_high")),
            fifty_two_week_low: value_f64(data.get("fifty_two_week_low")),
            quarterly_dividend_amount: value_f64(data.get("quarterly_dividend_amount")),
            next_earning_day: value_str(data.get("next_earning_day")).and_then(|d| normalize_date(&d)),
            description: value_str(data.get("description")),
            source: self.backend.source_name().to_string(),
            error: value_str(data.get("error")).and_then(|e| QuoteError::normalize(&e)),
        };
        quote.fill_derived();
        quote.flag_if_empty();
        quote
    }
}

#[async_trait]
impl QuoteProvider for LlmSearchProvider {
    fn name(&self) -> &str {
        self.backend.source_name()
    }

    fn is_ready(&self) -> bool {
        self.api_key.is_some()
    }

    async fn get_full(&self, ticker: &str) -> Result<UnifiedQuote> {
        let symbol = normalize_ticker(ticker);
        match self.ask(&symbol).await {
            Ok(data) => Ok(self.to_quote(&symbol, &data)),
            Err(e) => Ok(UnifiedQuote::empty(&symbol, self.name(), Some(e))),
        }
    }

    async fn get_price_prev_close(&self, ticker: &str) -> Result<PriceCheck> {
        let symbol = normalize_ticker(ticker);
        let data = match self.ask(&symbol).await {
            Ok(d) => d,
            Err(e) => return Ok((None, None, Some(e))),
        };
        let price = value_f64(data.get("price"));
        let prev_close = value_f64(data.get("prev_close"));
        let mut err = value_str(data.get("error")).and_then(|e| QuoteError::normalize(&e));
        if price.is_none() && prev_close.is_none() && err.is_none() {
            err = Some(QuoteError::EmptyQuote);
        }
        Ok((price, prev_close, err))
    }
}

/// Contents of the first fenced block, or the text before a lone fence.
pub(crate) fn strip_fences(text: &str) -> &str {
    let t = text.trim();
    let Some(open) = t.find("```") else {
        return t;
    };
    let after = &t[open + 3..];
    if let Some(close) = after.find("```") {
        let inner = after[..close].trim_start();
        let inner = match inner.get(..4) {
            Some(tag) if tag.eq_ignore_ascii_case("json") => &inner[4..],
            _ => inner,
        };
        return inner.trim();
    }
    if open == 0 {
        // Opening fence with no closing one: drop the fence line.
        return after.find('\n').map(|i| after[i + 1..].trim()).unwrap_or("");
    }
    t[..open].trim()
}

/// The first balanced `{...}` in `s`, respecting string literals and escapes.
pub(crate) fn first_json_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut depth = 0usize;
    let mut in_str = false;
    let mut escaped = false;
    for (i, ch) in s[start..].char_indices() {
        if in_str {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_str = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_str = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract and schema-check the reply. `Err` carries a short reason for logs.
pub(crate) fn parse_reply(text: &str) -> std::result::Result<Map<String, Value>, String> {
    let cleaned = strip_fences(text);
    let candidate = first_json_object(cleaned).unwrap_or(cleaned);
    let value: Value = serde_json::from_str(candidate).map_err(|e| format!("invalid json: {e}"))?;
    let Value::Object(map) = value else {
        return Err("reply is not a JSON object".to_string());
    };
    validate(&map)?;
    Ok(map)
}

/// Strings models write for "no value". Read as null, not as a schema violation.
fn is_placeholder(s: &str) -> bool {
    let s = s.trim();
    s.is_empty()
        || ["n/a", "na", "none", "null", "nan", "-", "—"]
            .iter()
            .any(|p| s.eq_ignore_ascii_case(p))
}

fn validate(map: &Map<String, Value>) -> std::result::Result<(), String> {
    for key in NUMERIC_KEYS {
        match map.get(*key) {
            None | Some(Value::Null) | Some(Value::Number(_)) => {}
            Some(v @ Value::String(s)) => {
                if !is_placeholder(s) && value_f64(Some(v)).is_none() {
                    return Err(format!("'{key}' is not numeric"));
                }
            }
            Some(_) => return Err(format!("'{key}' has the wrong type")),
        }
    }
    for key in DATE_KEYS {
        match map.get(*key) {
            None | Some(Value::Null) => {}
            Some(Value::String(s)) => {
                if !is_placeholder(s) && normalize_date(s).is_none() {
                    return Err(format!("'{key}' is not YYYY-MM-DD"));
                }
            }
            Some(_) => return Err(format!("'{key}' has the wrong type")),
        }
    }
    for key in TEXT_KEYS {
        if !matches!(map.get(*key), None | Some(Value::Null) | Some(Value::String(_))) {
            return Err(format!("'{key}' must be a string"));
        }
    }
    if !matches!(
        map.get("change_percent"),
        None | Some(Value::Null) | Some(Value::String(_)) | Some(Value::Number(_))
    ) {
        return Err("'change_percent' has the wrong type".to_string());
    }
    Ok(())
}
