//! Alert rule evaluation against a fresh quote, with per-rule suppression.
//! Each rule is judged on its own: a broken rule is logged and skipped.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::db::{self, models::AlertRuleRow};
use crate::market_hours::MarketClock;
use crate::notifier::Notifier;
use crate::types::{normalize_date, AlertKind, UnifiedQuote};

const PLACEHOLDER: &str = "—";

/// Why a rule fired.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    Above(f64),
    Below(f64),
    PctDrop(f64),
    PctJump(f64),
    Earnings { days: i64, date: String },
}

impl Trigger {
    fn describe(&self) -> String {
        match self {
            Trigger::Above(v) => format!("crossed **above {v:.2}**"),
            Trigger::Below(v) => format!("fell **below {v:.2}**"),
            Trigger::PctDrop(v) => format!("**{:.0}% drop** from open", v.abs()),
            Trigger::PctJump(v) => format!("**{:.0}% jump** from open", v.abs()),
            Trigger::Earnings { days, date } => format!("**earnings in {days} day(s)** on `{date}`"),
        }
    }
}

/// Quantities derived once per quote and shared by all rules.
#[derive(Debug, Clone, Default)]
struct Derived {
    price: Option<f64>,
    pct_from_open: Option<f64>,
    earnings: Option<(i64, String)>,
}

impl Derived {
    fn new(quote: &UnifiedQuote, today: NaiveDate) -> Self {
        let pct_from_open = match (quote.price, quote.open) {
            (Some(price), Some(open)) if open != 0.0 => Some((price - open) / open * 100.0),
            _ => None,
        };
        let earnings = quote
            .next_earning_day
            .as_deref()
            .and_then(normalize_date)
            .and_then(|d| {
                let date = NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()?;
                Some(((date - today).num_days(), d))
            });
        Self {
            price: quote.price,
            pct_from_open,
            earnings,
        }
    }
}

/// Decide whether one rule fires. `Err` marks a rule that cannot be judged.
fn check_rule(kind: AlertKind, value: f64, d: &Derived) -> Result<Option<Trigger>, String> {
    if !value.is_finite() {
        return Err(format!("value {value} is not a finite number"));
    }
    let fired = match kind {
        AlertKind::Above => d.price.filter(|p| *p >= value).map(|_| Trigger::Above(value)),
        AlertKind::Below => d.price.filter(|p| *p <= value).map(|_| Trigger::Below(value)),
        AlertKind::PctDrop => d
            .pct_from_open
            .filter(|pct| *pct <= -value.abs())
            .map(|_| Trigger::PctDrop(value)),
        AlertKind::PctJump => d
            .pct_from_open
            .filter(|pct| *pct >= value.abs())
            .map(|_| Trigger::PctJump(value)),
        AlertKind::EarningsDays => d
            .earnings
            .as_ref()
            .filter(|(days, _)| *days == value.trunc() as i64)
            .map(|(days, date)| Trigger::Earnings {
                days: *days,
                date: date.clone(),
            }),
    };
    Ok(fired)
}

fn fmt_money(v: Option<f64>) -> String {
    v.map(|x| format!("{x:.2}")).unwrap_or_else(|| PLACEHOLDER.to_string())
}

fn fmt_pct(v: Option<f64>) -> String {
    v.map(|x| format!("{x:.2}%")).unwrap_or_else(|| PLACEHOLDER.to_string())
}

/// One-line notification text.
pub fn build_message(ticker: &str, trigger: &Trigger, quote: &UnifiedQuote, pct_from_open: Option<f64>) -> String {
    let bell = if matches!(trigger, Trigger::Earnings { .. }) { "🔔 " } else { "" };
    format!(
        "{bell}**{ticker}** {} | Price: {} | Open: {} | From open: {}",
        trigger.describe(),
        fmt_money(quote.price),
        fmt_money(quote.open),
        fmt_pct(pct_from_open),
    )
}

pub struct AlertEvaluator {
    pool: SqlitePool,
    notifier: Arc<dyn Notifier>,
    clock: MarketClock,
    cooldown_secs: i64,
}

impl AlertEvaluator {
    pub fn new(pool: SqlitePool, notifier: Arc<dyn Notifier>, clock: MarketClock, cooldown_secs: i64) -> Self {
        Self {
            pool,
            notifier,
            clock,
            cooldown_secs,
        }
    }

    /// Evaluate every rule of `symbol_id` against `quote`; returns the number
    /// of notifications actually delivered.
    pub async fn evaluate(&self, symbol_id: i64, ticker: &str, quote: &UnifiedQuote, now: DateTime<Utc>) -> usize {
        let rules = match db::alerts::rules_for_symbol(&self.pool, symbol_id).await {
            Ok(r) => r,
            Err(e) => {
                warn!(symbol_id, "Could not load alert rules for {ticker}: {e}");
                return 0;
            }
        };
        if rules.is_empty() {
            return 0;
        }

        let derived = Derived::new(quote, self.clock.today(now));
        let mut sent = 0;
        for rule in &rules {
            if self.evaluate_rule(rule, ticker, quote, &derived, now).await {
                sent += 1;
            }
        }
        sent
    }

    async fn evaluate_rule(
        &self,
        rule: &AlertRuleRow,
        ticker: &str,
        quote: &UnifiedQuote,
        derived: &Derived,
        now: DateTime<Utc>,
    ) -> bool {
        let kind = match rule.kind.parse::<AlertKind>() {
            Ok(k) => k,
            Err(e) => {
                warn!(rule_id = rule.id, "Skipping alert rule for {ticker}: {e}");
                return false;
            }
        };
        let trigger = match check_rule(kind, rule.value, derived) {
            Ok(Some(t)) => t,
            Ok(None) => return false,
            Err(e) => {
                warn!(rule_id = rule.id, "Alert evaluation failed for {ticker}: {e}");
                return false;
            }
        };

        let state = match db::alerts::suppression(&self.pool, rule.id).await {
            Ok(s) => s.unwrap_or_default(),
            Err(e) => {
                warn!(rule_id = rule.id, "Could not read suppression state for {ticker}: {e}");
                return false;
            }
        };
        let now_epoch = now.timestamp();
        let key = match &trigger {
            Trigger::Earnings { date, .. } => Some(date.clone()),
            _ => None,
        };
        if kind.is_keyed() {
            if state.last_sent_key.is_some() && state.last_sent_key == key {
                debug!(rule_id = rule.id, "Earnings reminder for {ticker} on {key:?} already sent");
                return false;
            }
        } else if let Some(last) = state.last_sent_epoch {
            if now_epoch - last < self.cooldown_secs {
                debug!(rule_id = rule.id, "Alert for {ticker} in cooldown");
                return false;
            }
        }

        let text = build_message(ticker, &trigger, quote, derived.pct_from_open);
        if !self.notifier.send(&text).await {
            return false;
        }
        info!(rule_id = rule.id, kind = %kind, "Alert sent for {ticker}");
        if let Err(e) = db::alerts::mark_sent(&self.pool, rule.id, now_epoch, key.as_deref()).await {
            warn!(rule_id = rule.id, "Alert sent for {ticker} but suppression state not saved: {e}");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::db::alerts::{replace_rules, NewRule};
    use crate::db::{symbols, test_pool};
    use crate::test_util::{quote, RecordingNotifier};
    use crate::types::Group;

    fn clock() -> MarketClock {
        MarketClock::new(
            chrono_tz::America::New_York,
            chrono::NaiveTime::from_hms_opt(8, 30, 0).unwrap(),
            chrono::NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
        )
    }

    // Wednesday 2025-10-29 10:00 EDT
    fn at(offset_secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 29, 14, 0, 0).unwrap() + chrono::Duration::seconds(offset_secs)
    }

    async fn setup(rules: &[NewRule], accept: bool) -> (AlertEvaluator, Arc<RecordingNotifier>, i64, SqlitePool) {
        let pool = test_pool().await;
        let id = symbols::create(&pool, "AAPL", Group::Watch, None).await.unwrap();
        replace_rules(&pool, id, rules, 0).await.unwrap();
        let notifier = Arc::new(RecordingNotifier::new(accept));
        let eval = AlertEvaluator::new(pool.clone(), notifier.clone(), clock(), 15 * 60);
        (eval, notifier, id, pool)
    }

    fn priced(price: f64, open: f64) -> UnifiedQuote {
        let mut q = quote("AAPL", Some(price), Some(open));
        q.open = Some(open);
        q
    }

    #[tokio::test]
    async fn cooldown_limits_repeat_notifications() {
        let (eval, notifier, id, _) = setup(&[NewRule { kind: AlertKind::Above, value: 200.0 }], true).await;
        let q = priced(201.0, 199.0);

        assert_eq!(eval.evaluate(id, "AAPL", &q, at(0)).await, 1);
        assert_eq!(eval.evaluate(id, "AAPL", &q, at(14 * 60)).await, 0);
        assert_eq!(eval.evaluate(id, "AAPL", &q, at(15 * 60)).await, 1);
        assert_eq!(notifier.messages().len(), 2);
        assert_eq!(
            notifier.messages()[0],
            "**AAPL** crossed **above 200.00** | Price: 201.00 | Open: 199.00 | From open: 1.01%"
        );
    }

    #[tokio::test]
    async fn percent_rules_use_move_from_open() {
        let rules = [
            NewRule { kind: AlertKind::PctDrop, value: 3.0 },
            NewRule { kind: AlertKind::PctJump, value: -3.0 },
            NewRule { kind: AlertKind::Below, value: 90.0 },
        ];
        let (eval, notifier, id, _) = setup(&rules, true).await;

        // -4% from open: drop fires, jump does not, below does not.
        assert_eq!(eval.evaluate(id, "AAPL", &priced(96.0, 100.0), at(0)).await, 1);
        assert_eq!(
            notifier.messages()[0],
            "**AAPL** **3% drop** from open | Price: 96.00 | Open: 100.00 | From open: -4.00%"
        );

        // No open: percent rules cannot fire, placeholders render.
        let mut no_open = quote("AAPL", Some(80.0), None);
        no_open.open = None;
        assert_eq!(eval.evaluate(id, "AAPL", &no_open, at(0)).await, 1);
        assert_eq!(
            notifier.messages()[1],
            "**AAPL** fell **below 90.00** | Price: 80.00 | Open: — | From open: —"
        );
    }

    #[tokio::test]
    async fn earnings_reminder_is_keyed_by_date() {
        let (eval, notifier, id, pool) =
            setup(&[NewRule { kind: AlertKind::EarningsDays, value: 1.0 }], true).await;
        let mut q = priced(100.0, 100.0);
        q.next_earning_day = Some("2025-10-30".to_string());

        assert_eq!(eval.evaluate(id, "AAPL", &q, at(0)).await, 1);
        // Same date: suppressed regardless of elapsed time.
        assert_eq!(eval.evaluate(id, "AAPL", &q, at(60)).await, 0);
        assert!(notifier.messages()[0].starts_with("🔔 **AAPL** **earnings in 1 day(s)** on `2025-10-30`"));

        // Upstream date moves: the rule re-arms.
        q.next_earning_day = Some("2025-11-06T20:00:00Z".to_string());
        let week_later = at(7 * 24 * 3600);
        assert_eq!(eval.evaluate(id, "AAPL", &q, week_later).await, 1);

        let rule_id = db::alerts::rules_for_symbol(&pool, id).await.unwrap()[0].id;
        let state = db::alerts::suppression(&pool, rule_id).await.unwrap().unwrap();
        assert_eq!(state.last_sent_key.as_deref(), Some("2025-11-06"));
    }

    #[tokio::test]
    async fn failed_delivery_leaves_state_for_retry() {
        let (eval, notifier, id, pool) = setup(&[NewRule { kind: AlertKind::Above, value: 1.0 }], false).await;
        let q = priced(2.0, 2.0);
        assert_eq!(eval.evaluate(id, "AAPL", &q, at(0)).await, 0);
        assert_eq!(eval.evaluate(id, "AAPL", &q, at(1)).await, 0);
        assert_eq!(notifier.messages().len(), 2);

        let rule_id = db::alerts::rules_for_symbol(&pool, id).await.unwrap()[0].id;
        assert!(db::alerts::suppression(&pool, rule_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn broken_rule_does_not_block_siblings() {
        let (eval, notifier, id, pool) = setup(&[NewRule { kind: AlertKind::Above, value: 10.0 }], true).await;
        sqlx::query("INSERT INTO alerts (symbol_id, kind, value) VALUES (?, 'sideways', 1.0)")
            .bind(id)
            .execute(&pool)
            .await
            .unwrap();

        assert_eq!(eval.evaluate(id, "AAPL", &priced(11.0, 11.0), at(0)).await, 1);
        assert_eq!(notifier.messages().len(), 1);
    }

    #[test]
    fn non_finite_value_is_an_error() {
        let d = Derived::default();
        assert!(check_rule(AlertKind::Above, f64::NAN, &d).is_err());
        assert_eq!(check_rule(AlertKind::Above, 5.0, &d), Ok(None));
    }
}
