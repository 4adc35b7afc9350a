//! Watchlist symbols: the CRUD surface plus the lookups the core consumes.

use sqlx::SqlitePool;

use crate::db::models::SymbolRow;
use crate::error::Result;
use crate::types::{normalize_ticker, AlertKind, Group};

const SYMBOL_COLUMNS: &str = "id, ticker, group_name, note, rating, last_edit_epoch";

/// Symbols of one group in ticker order.
pub async fn list_by_group(pool: &SqlitePool, group: Group) -> Result<Vec<SymbolRow>> {
    let rows = sqlx::query_as::<_, SymbolRow>(&format!(
        "SELECT {SYMBOL_COLUMNS} FROM symbols WHERE group_name = ? ORDER BY ticker"
    ))
    .bind(group.as_str())
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Filtered listing: ticker substring (case-insensitive), groups, minimum rating.
pub async fn search(
    pool: &SqlitePool,
    query: Option<&str>,
    groups: &[Group],
    min_rating: i64,
) -> Result<Vec<SymbolRow>> {
    let placeholders = vec!["?"; groups.len().max(1)].join(",");
    let mut sql = format!("SELECT {SYMBOL_COLUMNS} FROM symbols WHERE group_name IN ({placeholders})");
    let like = query
        .map(normalize_ticker)
        .filter(|q| !q.is_empty())
        .map(|q| format!("%{q}%"));
    if like.is_some() {
        sql.push_str(" AND UPPER(ticker) LIKE ?");
    }
    if min_rating > 0 {
        sql.push_str(" AND rating >= ?");
    }
    sql.push_str(" ORDER BY ticker");

    let mut q = sqlx::query_as::<_, SymbolRow>(&sql);
    if groups.is_empty() {
        q = q.bind(Group::Watch.as_str());
    }
    for g in groups {
        q = q.bind(g.as_str());
    }
    if let Some(like) = like {
        q = q.bind(like);
    }
    if min_rating > 0 {
        q = q.bind(min_rating);
    }
    Ok(q.fetch_all(pool).await?)
}

pub async fn get(pool: &SqlitePool, id: i64) -> Result<Option<SymbolRow>> {
    let row = sqlx::query_as::<_, SymbolRow>(&format!(
        "SELECT {SYMBOL_COLUMNS} FROM symbols WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn find_id_by_ticker(pool: &SqlitePool, ticker: &str) -> Result<Option<i64>> {
    let id = sqlx::query_scalar::<_, i64>("SELECT id FROM symbols WHERE UPPER(ticker) = UPPER(?)")
        .bind(ticker.trim())
        .fetch_optional(pool)
        .await?;
    Ok(id)
}

/// Insert a symbol, seeding an `earnings_days` reminder when a lead time is given.
pub async fn create(
    pool: &SqlitePool,
    ticker: &str,
    group: Group,
    default_earnings_days: Option<i64>,
) -> Result<i64> {
    let mut tx = pool.begin().await?;
    let id = sqlx::query(
        "INSERT INTO symbols (ticker, note, group_name, rating, last_edit_epoch) VALUES (?, '', ?, 0, NULL)",
    )
    .bind(normalize_ticker(ticker))
    .bind(group.as_str())
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    if let Some(days) = default_earnings_days.filter(|d| *d >= 0) {
        sqlx::query("INSERT INTO alerts (symbol_id, kind, value) VALUES (?, ?, ?)")
            .bind(id)
            .bind(AlertKind::EarningsDays.as_str())
            .bind(days as f64)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(id)
}

pub async fn move_to(pool: &SqlitePool, id: i64, group: Group) -> Result<bool> {
    let res = sqlx::query("UPDATE symbols SET group_name = ? WHERE id = ?")
        .bind(group.as_str())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

pub async fn update_note(pool: &SqlitePool, id: i64, note: &str, now_epoch: i64) -> Result<bool> {
    let res = sqlx::query("UPDATE symbols SET note = ?, last_edit_epoch = ? WHERE id = ?")
        .bind(note)
        .bind(now_epoch)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

pub async fn update_rating(pool: &SqlitePool, id: i64, rating: i64) -> Result<bool> {
    let res = sqlx::query("UPDATE symbols SET rating = ? WHERE id = ?")
        .bind(rating)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

/// Remove a symbol together with its rules, their suppression state and its snapshot.
pub async fn delete(pool: &SqlitePool, id: i64) -> Result<bool> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM alert_state WHERE alert_id IN (SELECT id FROM alerts WHERE symbol_id = ?)")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM alerts WHERE symbol_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM symbol_state WHERE symbol_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    let res = sqlx::query("DELETE FROM symbols WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(res.rows_affected() > 0)
}
