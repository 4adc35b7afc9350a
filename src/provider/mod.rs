//! Quote providers: one trait, concrete adapters, and the fallback composite.

pub mod alpha_vantage;
pub mod fallback;
pub mod llm_search;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::config::{mask_key, Config, LLM_TIMEOUT_SECS};
use crate::error::Result;
use crate::types::{QuoteError, UnifiedQuote};

pub use alpha_vantage::AlphaVantageProvider;
pub use fallback::FallbackProvider;
pub use llm_search::{LlmBackend, LlmSearchProvider};

/// `(price, prev_close, error)`
pub type PriceCheck = (Option<f64>, Option<f64>, Option<QuoteError>);

const ALPHA_VANTAGE_TIMEOUT_SECS: u64 = 12;

/// Data-source contract. Data failures travel inside the payload as a
/// `QuoteError`; `Err` is reserved for unexpected faults, which callers
/// treat as `network_error`.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    fn name(&self) -> &str;

    /// True iff fully configured (credential present).
    fn is_ready(&self) -> bool;

    async fn get_full(&self, ticker: &str) -> Result<UnifiedQuote>;

    async fn get_price_prev_close(&self, ticker: &str) -> Result<PriceCheck>;
}

/// Stand-in for an unknown provider selection.
pub struct UnconfiguredProvider {
    name: String,
}

impl UnconfiguredProvider {
    pub fn new(name: &str) -> Self {
        let name = if name.trim().is_empty() { "unconfigured" } else { name.trim() };
        Self { name: name.to_string() }
    }
}

#[async_trait]
impl QuoteProvider for UnconfiguredProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_ready(&self) -> bool {
        false
    }

    async fn get_full(&self, ticker: &str) -> Result<UnifiedQuote> {
        Ok(UnifiedQuote::empty(ticker, &self.name, Some(QuoteError::Unconfigured)))
    }

    async fn get_price_prev_close(&self, _ticker: &str) -> Result<PriceCheck> {
        Ok((None, None, Some(QuoteError::Unconfigured)))
    }
}

/// Provider for the configured selection. LLM selections fall back to
/// Alpha Vantage when it has a key.
pub fn build_provider(cfg: &Config) -> Result<Arc<dyn QuoteProvider>> {
    let alpha_timeout = Duration::from_secs(cfg.provider_timeout_secs.unwrap_or(ALPHA_VANTAGE_TIMEOUT_SECS));
    let llm_timeout = Duration::from_secs(cfg.provider_timeout_secs.unwrap_or(LLM_TIMEOUT_SECS));

    let alpha = || -> Result<AlphaVantageProvider> {
        AlphaVantageProvider::new(
            cfg.alpha_vantage_key.clone(),
            cfg.alpha_vantage_url.clone(),
            alpha_timeout,
        )
    };

    let llm = match cfg.quote_provider.as_str() {
        "alpha_vantage" => {
            info!(
                "Quote provider: alpha_vantage (key {})",
                mask_key(cfg.alpha_vantage_key.as_deref())
            );
            return Ok(Arc::new(alpha()?));
        }
        "gemini" | "google" | "gemini_search" => {
            info!(
                "Quote provider: gemini_search model={} (key {})",
                cfg.gemini_model,
                mask_key(cfg.gemini_api_key.as_deref())
            );
            LlmSearchProvider::new(
                LlmBackend::Gemini,
                cfg.gemini_api_key.clone(),
                cfg.gemini_model.clone(),
                cfg.gemini_base_url.clone(),
                llm_timeout,
            )?
        }
        "chatgpt" | "openai" => {
            info!(
                "Quote provider: chatgpt_search_preview model={} (key {})",
                cfg.openai_model,
                mask_key(cfg.openai_api_key.as_deref())
            );
            LlmSearchProvider::new(
                LlmBackend::OpenAi,
                cfg.openai_api_key.clone(),
                cfg.openai_model.clone(),
                cfg.openai_base_url.clone(),
                llm_timeout,
            )?
        }
        other => {
            info!("Quote provider '{other}' is not recognised; quotes will report 'unconfigured'");
            return Ok(Arc::new(UnconfiguredProvider::new(other)));
        }
    };

    let secondary = alpha()?;
    if secondary.is_ready() {
        info!("Fallback enabled: {} then alpha_vantage", llm.name());
        Ok(Arc::new(FallbackProvider::new(Arc::new(llm), Arc::new(secondary))))
    } else {
        Ok(Arc::new(llm))
    }
}

/// Lenient number parsing for vendor strings: `"1,234.5"`, `"2.7%"`,
/// `"$3.49T"`. `"None"`, blanks and non-finite values give `None`.
pub(crate) fn parse_number(raw: &str) -> Option<f64> {
    let cleaned = raw.trim().trim_end_matches('%').replace([',', '$'], "");
    let s = cleaned.trim();
    let last = s.chars().last()?;
    let (digits, scale) = match last {
        'K' | 'k' => (&s[..s.len() - 1], 1e3),
        'M' | 'm' => (&s[..s.len() - 1], 1e6),
        'B' | 'b' => (&s[..s.len() - 1], 1e9),
        'T' | 't' => (&s[..s.len() - 1], 1e12),
        _ => (s, 1.0),
    };
    digits
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| v * scale)
}

pub(crate) fn value_f64(v: Option<&Value>) -> Option<f64> {
    match v? {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => parse_number(s),
        _ => None,
    }
}

pub(crate) fn value_i64(v: Option<&Value>) -> Option<i64> {
    value_f64(v).map(|f| f.round() as i64)
}

pub(crate) fn value_str(v: Option<&Value>) -> Option<String> {
    v?.as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
