//! Last-known quote per symbol. A cache, not a ledger: every fetch overwrites it.

use sqlx::SqlitePool;

use crate::config::SNAPSHOT_NOTE_MAX_CHARS;
use crate::db::models::SnapshotRow;
use crate::error::Result;
use crate::types::{normalize_date, UnifiedQuote};

/// Overwrite the snapshot row. `data = None` records a failed fetch: value
/// columns go null, bookkeeping columns are still written.
pub async fn upsert(
    pool: &SqlitePool,
    symbol_id: i64,
    now_epoch: i64,
    window_open: bool,
    note: &str,
    data: Option<&UnifiedQuote>,
) -> Result<()> {
    let note: String = note.chars().take(SNAPSHOT_NOTE_MAX_CHARS).collect();
    let next_earning_day = data
        .and_then(|q| q.next_earning_day.as_deref())
        .and_then(normalize_date);

    sqlx::query(
        r#"
        INSERT INTO symbol_state (
            symbol_id, last_check_epoch, last_check_note, window_open,
            price, prev_close, open, high, low, volume, latest_trading_day,
            change, change_percent, market_cap, pe_ratio, dividend_yield_percent,
            fifty_two_week_high, fifty_two_week_low, quarterly_dividend_amount,
            next_earning_day, description, source
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(symbol_id) DO UPDATE SET
            last_check_epoch = excluded.last_check_epoch,
            last_check_note = excluded.last_check_note,
            window_open = excluded.window_open,
            price = excluded.price,
            prev_close = excluded.prev_close,
            open = excluded.open,
            high = excluded.high,
            low = excluded.low,
            volume = excluded.volume,
            latest_trading_day = excluded.latest_trading_day,
            change = excluded.change,
            change_percent = excluded.change_percent,
            market_cap = excluded.market_cap,
            pe_ratio = excluded.pe_ratio,
            dividend_yield_percent = excluded.dividend_yield_percent,
            fifty_two_week_high = excluded.fifty_two_week_high,
            fifty_two_week_low = excluded.fifty_two_week_low,
            quarterly_dividend_amount = excluded.quarterly_dividend_amount,
            next_earning_day = excluded.next_earning_day,
            description = excluded.description,
            source = excluded.source
        "#,
    )
    .bind(symbol_id)
    .bind(now_epoch)
    .bind(note)
    .bind(window_open)
    .bind(data.and_then(|q| q.price))
    .bind(data.and_then(|q| q.prev_close))
    .bind(data.and_then(|q| q.open))
    .bind(data.and_then(|q| q.high))
    .bind(data.and_then(|q| q.low))
    .bind(data.and_then(|q| q.volume))
    .bind(data.and_then(|q| q.latest_trading_day.clone()))
    .bind(data.and_then(|q| q.change))
    .bind(data.and_then(|q| q.change_percent.clone()))
    .bind(data.and_then(|q| q.market_cap))
    .bind(data.and_then(|q| q.pe_ratio))
    .bind(data.and_then(|q| q.dividend_yield_percent))
    .bind(data.and_then(|q| q.fifty_two_week_high))
    .bind(data.and_then(|q| q.fifty_two_week_low))
    .bind(data.and_then(|q| q.quarterly_dividend_amount))
    .bind(next_earning_day)
    .bind(data.and_then(|q| q.description.clone()))
    .bind(data.map(|q| q.source.clone()))
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get(pool: &SqlitePool, symbol_id: i64) -> Result<Option<SnapshotRow>> {
    let row = sqlx::query_as::<_, SnapshotRow>(
        r#"
        SELECT last_check_epoch, last_check_note, window_open,
               price, prev_close, open, high, low, volume, latest_trading_day,
               change, change_percent, market_cap, pe_ratio, dividend_yield_percent,
               fifty_two_week_high, fifty_two_week_low, quarterly_dividend_amount,
               next_earning_day, description, source
        FROM symbol_state
        WHERE symbol_id = ?
        "#,
    )
    .bind(symbol_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Most recent fetch across all symbols.
pub async fn last_check_epoch(pool: &SqlitePool) -> Result<Option<i64>> {
    let epoch = sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(last_check_epoch) FROM symbol_state")
        .fetch_one(pool)
        .await?;
    Ok(epoch)
}
