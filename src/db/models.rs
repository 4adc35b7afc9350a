//! Database row types matching `migrations/0001_init.sql`.
//! Used by sqlx for typed queries.
use serde::Serialize;

use crate::types::{QuoteError, UnifiedQuote};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SymbolRow {
    pub id: i64,
    pub ticker: String,
    pub group_name: String,
    pub note: String,
    pub rating: i64,
    pub last_edit_epoch: Option<i64>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AlertRuleRow {
    pub id: i64,
    pub symbol_id: i64,
    pub kind: String,
    pub value: f64,
}

#[derive(Debug, Clone, Default, sqlx::FromRow)]
pub struct AlertStateRow {
    pub last_sent_epoch: Option<i64>,
    pub last_sent_key: Option<String>,
}

#[derive(Debug, Clone, Default, sqlx::FromRow)]
pub struct SnapshotRow {
    pub last_check_epoch: Option<i64>,
    pub last_check_note: Option<String>,
    pub window_open: Option<bool>,
    pub price: Option<f64>,
    pub prev_close: Option<f64>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub volume: Option<i64>,
    pub latest_trading_day: Option<String>,
    pub change: Option<f64>,
    pub change_percent: Option<String>,
    pub market_cap: Option<i64>,
    pub pe_ratio: Option<f64>,
    pub dividend_yield_percent: Option<f64>,
    pub fifty_two_week_high: Option<f64>,
    pub fifty_two_week_low: Option<f64>,
    pub quarterly_dividend_amount: Option<f64>,
    pub next_earning_day: Option<String>,
    pub description: Option<String>,
    pub source: Option<String>,
}

impl SnapshotRow {
    /// Rebuild the cached quote, deriving change fields the writer left null.
    pub fn to_quote(&self, ticker: &str) -> UnifiedQuote {
        let mut quote = UnifiedQuote {
            symbol: ticker.to_string(),
            price: self.price,
            prev_close: self.prev_close,
            open: self.open,
            high: self.high,
            low: self.low,
            volume: self.volume,
            latest_trading_day: self.latest_trading_day.clone(),
            change: self.change,
            change_percent: self.change_percent.clone(),
            market_cap: self.market_cap,
            pe_ratio: self.pe_ratio,
            dividend_yield_percent: self.dividend_yield_percent,
            fifty_two_week_high: self.fifty_two_week_high,
            fifty_two_week_low: self.fifty_two_week_low,
            quarterly_dividend_amount: self.quarterly_dividend_amount,
            next_earning_day: self.next_earning_day.clone(),
            description: self.description.clone(),
            source: self.source.clone().unwrap_or_default(),
            error: None::<QuoteError>,
        };
        quote.fill_derived();
        quote
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RunStatusRow {
    pub phase: String,
    pub started_epoch: Option<i64>,
    pub finished_epoch: Option<i64>,
    pub status_code: Option<String>,
    pub message: Option<String>,
    pub ok_count: i64,
    pub err_count: i64,
}
