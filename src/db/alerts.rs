//! Alert rules and their per-rule suppression state.

use sqlx::SqlitePool;

use crate::db::models::{AlertRuleRow, AlertStateRow};
use crate::error::Result;
use crate::types::AlertKind;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewRule {
    pub kind: AlertKind,
    pub value: f64,
}

pub async fn rules_for_symbol(pool: &SqlitePool, symbol_id: i64) -> Result<Vec<AlertRuleRow>> {
    let rows = sqlx::query_as::<_, AlertRuleRow>(
        "SELECT id, symbol_id, kind, value FROM alerts WHERE symbol_id = ? ORDER BY id",
    )
    .bind(symbol_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Replace every rule of a symbol (delete-then-insert) and stamp its last edit.
/// Suppression state of the replaced rules goes with them.
pub async fn replace_rules(
    pool: &SqlitePool,
    symbol_id: i64,
    rules: &[NewRule],
    now_epoch: i64,
) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM alert_state WHERE alert_id IN (SELECT id FROM alerts WHERE symbol_id = ?)")
        .bind(symbol_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM alerts WHERE symbol_id = ?")
        .bind(symbol_id)
        .execute(&mut *tx)
        .await?;
    for rule in rules {
        sqlx::query("INSERT INTO alerts (symbol_id, kind, value) VALUES (?, ?, ?)")
            .bind(symbol_id)
            .bind(rule.kind.as_str())
            .bind(rule.value)
            .execute(&mut *tx)
            .await?;
    }
    sqlx::query("UPDATE symbols SET last_edit_epoch = ? WHERE id = ?")
        .bind(now_epoch)
        .bind(symbol_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

pub async fn suppression(pool: &SqlitePool, alert_id: i64) -> Result<Option<AlertStateRow>> {
    let row = sqlx::query_as::<_, AlertStateRow>(
        "SELECT last_sent_epoch, last_sent_key FROM alert_state WHERE alert_id = ?",
    )
    .bind(alert_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Record a delivered notification. `key` is only written when given, so a
/// cooldown stamp never clears an earnings key.
pub async fn mark_sent(pool: &SqlitePool, alert_id: i64, epoch: i64, key: Option<&str>) -> Result<()> {
    match key {
        Some(key) => {
            sqlx::query(
                r#"
                INSERT INTO alert_state (alert_id, last_sent_epoch, last_sent_key)
                VALUES (?, ?, ?)
                ON CONFLICT(alert_id) DO UPDATE SET
                    last_sent_epoch = excluded.last_sent_epoch,
                    last_sent_key = excluded.last_sent_key
                "#,
            )
            .bind(alert_id)
            .bind(epoch)
            .bind(key)
            .execute(pool)
            .await?;
        }
        None => {
            sqlx::query(
                r#"
                INSERT INTO alert_state (alert_id, last_sent_epoch)
                VALUES (?, ?)
                ON CONFLICT(alert_id) DO UPDATE SET
                    last_sent_epoch = excluded.last_sent_epoch
                "#,
            )
            .bind(alert_id)
            .bind(epoch)
            .execute(pool)
            .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{symbols, test_pool};
    use crate::types::Group;

    #[tokio::test]
    async fn replace_rules_swaps_set_and_drops_old_state() {
        let pool = test_pool().await;
        let id = symbols::create(&pool, "AAPL", Group::Watch, Some(1)).await.unwrap();
        let old = rules_for_symbol(&pool, id).await.unwrap()[0].id;
        mark_sent(&pool, old, 100, Some("2025-01-01")).await.unwrap();

        let rules = [
            NewRule { kind: AlertKind::Above, value: 200.0 },
            NewRule { kind: AlertKind::PctDrop, value: 3.0 },
            NewRule { kind: AlertKind::PctDrop, value: 3.0 },
        ];
        replace_rules(&pool, id, &rules, 555).await.unwrap();

        let stored = rules_for_symbol(&pool, id).await.unwrap();
        let kinds: Vec<&str> = stored.iter().map(|r| r.kind.as_str()).collect();
        assert_eq!(kinds, vec!["above", "pct_drop", "pct_drop"]);
        assert!(suppression(&pool, old).await.unwrap().is_none());
        let sym = symbols::get(&pool, id).await.unwrap().unwrap();
        assert_eq!(sym.last_edit_epoch, Some(555));
    }

    #[tokio::test]
    async fn mark_sent_without_key_preserves_existing_key() {
        let pool = test_pool().await;
        mark_sent(&pool, 7, 100, Some("2025-10-30")).await.unwrap();
        mark_sent(&pool, 7, 200, None).await.unwrap();

        let state = suppression(&pool, 7).await.unwrap().unwrap();
        assert_eq!(state.last_sent_epoch, Some(200));
        assert_eq!(state.last_sent_key.as_deref(), Some("2025-10-30"));
    }
}
