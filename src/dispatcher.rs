//! Bulk and single-symbol refresh: fetch, snapshot, evaluate.
//!
//! A bulk run walks the watch group in ticker order, one provider call at a
//! time, and always finalizes the run-status record it claimed. Single-symbol
//! refreshes never touch the run-status record.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{error, info, warn};

use crate::api::latency::LatencyStats;
use crate::db;
use crate::error::{AppError, Result};
use crate::evaluator::AlertEvaluator;
use crate::market_hours::MarketClock;
use crate::provider::QuoteProvider;
use crate::run_tracker::{RunGuard, RunTracker};
use crate::types::{Group, QuoteError, RunStatusCode, UnifiedQuote};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkTrigger {
    Started,
    AlreadyRunning,
}

/// Result of refreshing one symbol.
#[derive(Debug, Clone, PartialEq)]
pub enum SymbolOutcome {
    Updated { notified: usize },
    Failed(QuoteError),
}

/// Counters accumulated over one bulk run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchTally {
    pub ok: i64,
    pub err: i64,
    pub notified: usize,
    pub rate_limited: bool,
}

impl BatchTally {
    fn add(&mut self, outcome: &SymbolOutcome) {
        match outcome {
            SymbolOutcome::Updated { notified } => {
                self.ok += 1;
                self.notified += notified;
            }
            SymbolOutcome::Failed(e) => {
                self.err += 1;
                self.rate_limited |= e.is_rate_limited();
            }
        }
    }

    pub fn status_code(&self) -> RunStatusCode {
        RunStatusCode::from_counts(self.err.max(0) as u32, self.rate_limited)
    }

    pub fn summary(&self) -> String {
        format!(
            "Updated {} symbol(s), {} error(s); notified {}",
            self.ok, self.err, self.notified
        )
    }
}

pub struct Dispatcher {
    pool: SqlitePool,
    provider: Arc<dyn QuoteProvider>,
    evaluator: AlertEvaluator,
    clock: MarketClock,
    tracker: RunTracker,
    latency: Arc<LatencyStats>,
}

impl Dispatcher {
    pub fn new(
        pool: SqlitePool,
        provider: Arc<dyn QuoteProvider>,
        evaluator: AlertEvaluator,
        clock: MarketClock,
        tracker: RunTracker,
        latency: Arc<LatencyStats>,
    ) -> Self {
        Self {
            pool,
            provider,
            evaluator,
            clock,
            tracker,
            latency,
        }
    }

    pub fn provider(&self) -> &dyn QuoteProvider {
        self.provider.as_ref()
    }

    /// Start a bulk run in the background unless one is already in flight.
    pub async fn trigger_bulk(self: &Arc<Self>) -> Result<BulkTrigger> {
        let Some(guard) = self.tracker.try_begin(Utc::now().timestamp()).await? else {
            return Ok(BulkTrigger::AlreadyRunning);
        };
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.execute(guard).await;
        });
        Ok(BulkTrigger::Started)
    }

    /// Run a bulk pass inline. `None` when another batch holds the run.
    pub async fn run_bulk(&self) -> Result<Option<BatchTally>> {
        let Some(guard) = self.tracker.try_begin(Utc::now().timestamp()).await? else {
            return Ok(None);
        };
        Ok(Some(self.execute(guard).await))
    }

    async fn execute(&self, guard: RunGuard) -> BatchTally {
        let started = Utc::now();
        let mut tally = BatchTally::default();

        let (code, message) = match db::symbols::list_by_group(&self.pool, Group::Watch).await {
            Ok(symbols) if symbols.is_empty() => (RunStatusCode::Ok, "No symbols in watchlist".to_string()),
            Ok(symbols) => {
                info!(count = symbols.len(), provider = self.provider.name(), "Bulk run started");
                for symbol in &symbols {
                    let outcome = match self.refresh(symbol.id, &symbol.ticker, started).await {
                        Ok(o) => o,
                        Err(e) => {
                            warn!(symbol_id = symbol.id, "Snapshot write failed for {}: {e}", symbol.ticker);
                            SymbolOutcome::Failed(QuoteError::Unknown)
                        }
                    };
                    tally.add(&outcome);
                }
                (tally.status_code(), tally.summary())
            }
            Err(e) => {
                error!("Bulk run could not read the watchlist: {e}");
                (RunStatusCode::Partial, format!("Run aborted: {e}"))
            }
        };

        let finished = Utc::now().timestamp();
        match self
            .tracker
            .finish(guard, finished, code, &message, tally.ok, tally.err)
            .await
        {
            Ok(_) => info!(code = %code, "Bulk run finished: {message}"),
            Err(e) => error!("Could not record bulk run completion: {e}"),
        }
        tally
    }

    /// On-demand refresh of one symbol in any group. Bypasses the run guard.
    pub async fn update_symbol(&self, symbol_id: i64) -> Result<SymbolOutcome> {
        let symbol = db::symbols::get(&self.pool, symbol_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("symbol {symbol_id}")))?;
        self.refresh(symbol.id, &symbol.ticker, Utc::now()).await
    }

    /// Fetch, snapshot and evaluate. `note_time` stamps the snapshot note, so
    /// a batch shares one prefix.
    async fn refresh(&self, symbol_id: i64, ticker: &str, note_time: DateTime<Utc>) -> Result<SymbolOutcome> {
        let quote = self.fetch(ticker).await;
        let now = Utc::now();
        let window_open = self.clock.is_open(note_time);
        let note = self.clock.snapshot_note(note_time, quote.error.as_ref());

        if let Some(err) = quote.error {
            db::snapshots::upsert(&self.pool, symbol_id, now.timestamp(), window_open, &note, None).await?;
            warn!(symbol_id, "Quote for {ticker} failed: {err}");
            return Ok(SymbolOutcome::Failed(err));
        }

        db::snapshots::upsert(&self.pool, symbol_id, now.timestamp(), window_open, &note, Some(&quote)).await?;
        let notified = self.evaluator.evaluate(symbol_id, ticker, &quote, now).await;
        Ok(SymbolOutcome::Updated { notified })
    }

    async fn fetch(&self, ticker: &str) -> UnifiedQuote {
        let provider = Arc::clone(&self.provider);
        let symbol = ticker.to_string();
        let t0 = Instant::now();
        // A panicking adapter costs one symbol, not the batch.
        let result = tokio::spawn(async move { provider.get_full(&symbol).await })
            .await
            .unwrap_or_else(|e| Err(AppError::Provider(format!("provider task failed: {e}"))));
        self.latency.record(t0.elapsed());
        match result {
            Ok(q) => q,
            Err(e) => {
                warn!("Provider {} raised for {ticker}: {e}", self.provider.name());
                UnifiedQuote::empty(ticker, self.provider.name(), Some(QuoteError::NetworkError))
            }
        }
    }
}
