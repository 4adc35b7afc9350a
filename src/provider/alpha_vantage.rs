//! Alpha Vantage adapter: `GLOBAL_QUOTE` for prices, `OVERVIEW` for
//! fundamentals. Missing fields stay `None`; nothing is invented.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::Result;
use crate::provider::{value_f64, value_i64, value_str, PriceCheck, QuoteProvider};
use crate::types::{format_change_percent, normalize_date, normalize_ticker, QuoteError, UnifiedQuote};

const NAME: &str = "alpha_vantage";

type Object = Map<String, Value>;

pub struct AlphaVantageProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl AlphaVantageProvider {
    pub fn new(api_key: Option<String>, base_url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url,
        })
    }

    async fn call(&self, function: &str, symbol: &str) -> std::result::Result<Object, QuoteError> {
        let Some(key) = self.api_key.as_deref() else {
            return Err(QuoteError::KeyMissing);
        };

        let resp = self
            .client
            .get(&self.base_url)
            .query(&[("function", function), ("symbol", symbol), ("apikey", key)])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                debug!("Alpha Vantage {function} {symbol} transport error: {e}");
                QuoteError::NetworkError
            })?;
        let body: Value = resp.json().await.map_err(|e| {
            debug!("Alpha Vantage {function} {symbol} body error: {e}");
            QuoteError::NetworkError
        })?;

        let Value::Object(obj) = body else {
            return Ok(Object::new());
        };
        if obj.contains_key("Note") || obj.contains_key("Information") {
            warn!("Alpha Vantage throttled {function} for {symbol}");
            return Err(QuoteError::RateLimited);
        }
        if obj.contains_key("Error Message") {
            return Err(QuoteError::InvalidSymbol);
        }
        Ok(obj)
    }

    async fn global_quote(&self, symbol: &str) -> std::result::Result<Object, QuoteError> {
        let body = self.call("GLOBAL_QUOTE", symbol).await?;
        let quote = body
            .get("Global Quote")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        if quote.is_empty() || (!quote.contains_key("05. price") && !quote.contains_key("08. previous close")) {
            return Err(QuoteError::EmptyQuote);
        }
        Ok(quote)
    }

    fn apply_overview(quote: &mut UnifiedQuote, ov: &Object) {
        quote.market_cap = value_i64(ov.get("MarketCapitalization"));
        quote.pe_ratio = value_f64(ov.get("PERatio"));
        quote.dividend_yield_percent = value_f64(ov.get("DividendYield")).map(|dy| dy * 100.0);
        quote.fifty_two_week_high = value_f64(ov.get("52WeekHigh"));
        quote.fifty_two_week_low = value_f64(ov.get("52WeekLow"));
        quote.quarterly_dividend_amount = value_f64(ov.get("DividendPerShare")).map(|dps| dps / 4.0);
        quote.description = short_description(ov);
    }
}

#[async_trait]
impl QuoteProvider for AlphaVantageProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn is_ready(&self) -> bool {
        self.api_key.is_some()
    }

    async fn get_full(&self, ticker: &str) -> Result<UnifiedQuote> {
        let symbol = normalize_ticker(ticker);
        let mut quote = UnifiedQuote::empty(&symbol, NAME, None);

        match self.global_quote(&symbol).await {
            Ok(q) => {
                if let Some(s) = value_str(q.get("01. symbol")) {
                    quote.symbol = s;
                }
                quote.open = value_f64(q.get("02. open"));
                quote.high = value_f64(q.get("03. high"));
                quote.low = value_f64(q.get("04. low"));
                quote.price = value_f64(q.get("05. price"));
                quote.volume = value_i64(q.get("06. volume"));
                quote.latest_trading_day = value_str(q.get("07. latest trading day"))
                    .and_then(|d| normalize_date(&d));
                quote.prev_close = value_f64(q.get("08. previous close"));

                if let (Some(price), Some(prev)) = (quote.price, quote.prev_close) {
                    if prev != 0.0 {
                        let change = price - prev;
                        quote.change = Some(change);
                        quote.change_percent = format_change_percent(change, prev);
                    }
                }
            }
            Err(e) => quote.error = Some(e),
        }

        // Fundamentals are best-effort and never override the quote error.
        match self.call("OVERVIEW", &symbol).await {
            Ok(ov) => Self::apply_overview(&mut quote, &ov),
            Err(e) => debug!("Alpha Vantage overview for {symbol} unavailable: {e}"),
        }

        quote.flag_if_empty();
        Ok(quote)
    }

    async fn get_price_prev_close(&self, ticker: &str) -> Result<PriceCheck> {
        let symbol = normalize_ticker(ticker);
        let q = match self.global_quote(&symbol).await {
            Ok(q) => q,
            Err(e) => return Ok((None, None, Some(e))),
        };
        let price = value_f64(q.get("05. price"));
        let prev_close = value_f64(q.get("08. previous close"));
        if price.is_none() && prev_close.is_none() {
            return Ok((None, None, Some(QuoteError::EmptyQuote)));
        }
        Ok((price, prev_close, None))
    }
}

/// First sentence of `text`, terminated with punctuation.
fn first_sentence(text: &str) -> Option<String> {
    let t = text.trim();
    if t.is_empty() {
        return None;
    }
    let mut end = t.len();
    let mut chars = t.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') && chars.peek().is_some_and(|&(_, n)| n.is_whitespace()) {
            end = i + c.len_utf8();
            break;
        }
    }
    let mut first = t[..end].trim().to_string();
    if !first.ends_with(['.', '!', '?']) {
        first.push('.');
    }
    Some(first)
}

fn short_description(ov: &Object) -> Option<String> {
    if let Some(desc) = value_str(ov.get("Description")) {
        return first_sentence(&desc);
    }
    let industry = value_str(ov.get("Industry"));
    let sector = value_str(ov.get("Sector"));
    match (industry, sector) {
        (Some(i), Some(s)) => Some(format!("{i} business in the {s} sector.")),
        (Some(i), None) => Some(format!("{i} business.")),
        (None, Some(s)) => Some(format!("Operates in the {s} sector.")),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::{extract::Query, routing::get, Json, Router};
    use serde_json::json;

    use super::*;
    use crate::test_util::serve;

    async fn alpha_stub(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
        let symbol = params.get("symbol").cloned().unwrap_or_default();
        let function = params.get("function").cloned().unwrap_or_default();
        let body = match (symbol.as_str(), function.as_str()) {
            ("AAPL", "GLOBAL_QUOTE") => json!({"Global Quote": {
                "01. symbol": "AAPL",
                "02. open": "229.01",
                "03. high": "230.15",
                "04. low": "226.80",
                "05. price": "227.79",
                "06. volume": "48231512",
                "07. latest trading day": "2025-09-12",
                "08. previous close": "228.32"
            }}),
            ("AAPL", "OVERVIEW") => json!({
                "MarketCapitalization": "3490000000000",
                "PERatio": "32.4",
                "DividendYield": "0.0047",
                "DividendPerShare": "1.00",
                "52WeekHigh": "238.56",
                "52WeekLow": "None",
                "Description": "Apple designs smartphones and services. It also sells wearables."
            }),
            ("BUSY", _) => json!({"Note": "Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute."}),
            ("NOPE", _) => json!({"Error Message": "Invalid API call."}),
            (_, "GLOBAL_QUOTE") => json!({"Global Quote": {}}),
            _ => json!({"Industry": "Semiconductors", "Sector": "Technology"}),
        };
        Json(body)
    }

    async fn provider() -> AlphaVantageProvider {
        let addr = serve(Router::new().route("/query", get(alpha_stub))).await;
        AlphaVantageProvider::new(
            Some("demo".to_string()),
            format!("http://{addr}/query"),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn full_quote_merges_overview() {
        let quote = provider().await.get_full("aapl").await.unwrap();
        assert_eq!(quote.error, None);
        assert_eq!(quote.price, Some(227.79));
        assert_eq!(quote.prev_close, Some(228.32));
        assert_eq!(quote.volume, Some(48_231_512));
        assert_eq!(quote.change_percent.as_deref(), Some("-0.23%"));
        assert_eq!(quote.market_cap, Some(3_490_000_000_000));
        assert!((quote.dividend_yield_percent.unwrap() - 0.47).abs() < 1e-9);
        assert_eq!(quote.quarterly_dividend_amount, Some(0.25));
        assert_eq!(quote.fifty_two_week_low, None);
        assert_eq!(quote.next_earning_day, None);
        assert_eq!(quote.description.as_deref(), Some("Apple designs smartphones and services."));
        assert_eq!(quote.source, "alpha_vantage");
    }

    #[tokio::test]
    async fn vendor_failures_map_to_closed_set() {
        let p = provider().await;
        assert_eq!(p.get_full("BUSY").await.unwrap().error, Some(QuoteError::RateLimited));
        assert_eq!(p.get_full("NOPE").await.unwrap().error, Some(QuoteError::InvalidSymbol));

        let empty = p.get_full("NVDA").await.unwrap();
        assert_eq!(empty.error, Some(QuoteError::EmptyQuote));
        assert_eq!(
            empty.description.as_deref(),
            Some("Semiconductors business in the Technology sector.")
        );

        let (price, prev, err) = p.get_price_prev_close("AAPL").await.unwrap();
        assert_eq!((price, prev, err), (Some(227.79), Some(228.32), None));
    }

    #[tokio::test]
    async fn missing_key_and_dead_endpoint() {
        let no_key = AlphaVantageProvider::new(None, "http://127.0.0.1:9/query".into(), Duration::from_secs(1)).unwrap();
        assert!(!no_key.is_ready());
        assert_eq!(no_key.get_full("AAPL").await.unwrap().error, Some(QuoteError::KeyMissing));

        let dead = AlphaVantageProvider::new(Some("k".into()), "http://127.0.0.1:9/query".into(), Duration::from_secs(1)).unwrap();
        let (_, _, err) = dead.get_price_prev_close("AAPL").await.unwrap();
        assert_eq!(err, Some(QuoteError::NetworkError));
    }

    #[test]
    fn first_sentence_adds_terminal_punctuation() {
        assert_eq!(first_sentence("Makes chips"), Some("Makes chips.".to_string()));
        assert_eq!(first_sentence("Designs chips! More text"), Some("Designs chips!".to_string()));
        assert_eq!(first_sentence("   "), None);
    }
}
