use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::SqlitePool;

use crate::api::latency::{LatencyStats, LatencySummary};
use crate::db::{self, alerts::NewRule, models::SymbolRow};
use crate::dispatcher::{Dispatcher, SymbolOutcome};
use crate::error::AppError;
use crate::market_hours::MarketClock;
use crate::run_tracker::RunTracker;
use crate::types::{normalize_ticker, AlertKind, Group, RunStatus, UnifiedQuote};

#[derive(Clone)]
pub struct ApiState {
    pub pool: SqlitePool,
    pub tracker: RunTracker,
    pub dispatcher: Arc<Dispatcher>,
    pub clock: MarketClock,
    pub cooldown_minutes: i64,
    /// Lead time of the seeded `earnings_days` rule; negative disables seeding.
    pub earnings_default_days: i64,
    pub latency: Arc<LatencyStats>,
}

impl ApiState {
    fn default_earnings_days(&self) -> Option<i64> {
        Some(self.earnings_default_days).filter(|d| *d >= 0)
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/symbols_by_group", get(symbols_by_group))
        .route("/api/symbols", get(list_symbols).post(add_symbol))
        .route("/api/symbols/:id", get(get_symbol).delete(delete_symbol))
        .route("/api/symbols/:id/move", post(move_symbol))
        .route("/api/note/:id", post(update_note))
        .route("/api/rating/:id", post(update_rating))
        .route("/api/alerts/:id", get(get_alerts).post(save_alerts))
        .route("/api/quote/:id", get(get_quote))
        .route("/api/quote_by_ticker/:ticker", get(quote_by_ticker))
        .route("/api/last_update", get(last_update))
        .route("/api/run_status", get(get_run_status))
        .route("/api/run_status/reset", post(reset_run_status))
        .route("/api/update_symbol/:id", post(update_symbol))
        .route("/api/update_all", post(update_all))
        .route("/api/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request bodies / query params
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct SymbolsQuery {
    pub q: Option<String>,
    pub scope: Option<String>,
    pub min_rating: Option<i64>,
}

#[derive(Deserialize)]
pub struct NewSymbolBody {
    pub ticker: String,
    pub group: Option<String>,
}

#[derive(Deserialize)]
pub struct MoveBody {
    pub group: Option<String>,
}

#[derive(Deserialize)]
pub struct NoteBody {
    #[serde(default)]
    pub note: String,
}

#[derive(Deserialize)]
pub struct AlertsBody {
    pub above: Option<f64>,
    pub below: Option<f64>,
    #[serde(default)]
    pub pct_drop: Vec<f64>,
    #[serde(default)]
    pub pct_jump: Vec<f64>,
    pub earn_days: Option<f64>,
}

impl AlertsBody {
    fn into_rules(self, default_earn_days: Option<i64>) -> Vec<NewRule> {
        let mut rules = Vec::new();
        if let Some(v) = self.above {
            rules.push(NewRule { kind: AlertKind::Above, value: v });
        }
        if let Some(v) = self.below {
            rules.push(NewRule { kind: AlertKind::Below, value: v });
        }
        rules.extend(self.pct_drop.into_iter().map(|v| NewRule { kind: AlertKind::PctDrop, value: v }));
        rules.extend(self.pct_jump.into_iter().map(|v| NewRule { kind: AlertKind::PctJump, value: v }));
        let earn = self.earn_days.map(f64::trunc).or(default_earn_days.map(|d| d as f64));
        if let Some(v) = earn {
            rules.push(NewRule { kind: AlertKind::EarningsDays, value: v });
        }
        rules
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct SymbolResponse {
    pub id: i64,
    pub ticker: String,
    pub note: String,
    pub rating: i64,
    pub last_edit_epoch: Option<i64>,
}

impl From<SymbolRow> for SymbolResponse {
    fn from(r: SymbolRow) -> Self {
        Self {
            id: r.id,
            ticker: r.ticker,
            note: r.note,
            rating: r.rating,
            last_edit_epoch: r.last_edit_epoch,
        }
    }
}

#[derive(Serialize)]
pub struct SymbolDetailResponse {
    #[serde(flatten)]
    pub symbol: SymbolResponse,
    pub group: String,
    pub description: Option<String>,
    pub next_earning_day: Option<String>,
}

#[derive(Serialize)]
pub struct AlertRuleResponse {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub value: f64,
}

#[derive(Serialize)]
pub struct CachedQuoteResponse {
    #[serde(flatten)]
    pub quote: UnifiedQuote,
    pub last_check_epoch: Option<i64>,
    pub last_check_note: Option<String>,
    pub window_open: Option<bool>,
    pub server_tz: String,
    pub cooldown_minutes: i64,
}

#[derive(Serialize)]
pub struct RunStatusResponse {
    #[serde(flatten)]
    pub status: RunStatus,
    pub started_text: Option<String>,
    pub finished_text: Option<String>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health(State(state): State<ApiState>) -> Result<Json<Value>, AppError> {
    state.tracker.read(Utc::now().timestamp()).await?;
    let provider = state.dispatcher.provider();
    Ok(Json(json!({
        "ok": true,
        "provider": provider.name(),
        "provider_ready": provider.is_ready(),
        "run_in_flight": state.tracker.is_in_flight(),
        "market_tz": state.clock.tz().name(),
        "cooldown_minutes": state.cooldown_minutes,
    })))
}

async fn symbols_by_group(State(state): State<ApiState>) -> Result<Json<Value>, AppError> {
    let watch = db::symbols::list_by_group(&state.pool, Group::Watch).await?;
    let archived = db::symbols::list_by_group(&state.pool, Group::Archived).await?;
    let to_json = |rows: Vec<SymbolRow>| rows.into_iter().map(SymbolResponse::from).collect::<Vec<_>>();
    Ok(Json(json!({ "watch": to_json(watch), "archived": to_json(archived) })))
}

async fn list_symbols(
    State(state): State<ApiState>,
    Query(params): Query<SymbolsQuery>,
) -> Result<Json<Vec<SymbolResponse>>, AppError> {
    let groups: &[Group] = match params.scope.as_deref().map(str::to_lowercase).as_deref() {
        Some("archived") => &[Group::Archived],
        Some("all") => &[Group::Watch, Group::Archived],
        _ => &[Group::Watch],
    };
    let rows = db::symbols::search(
        &state.pool,
        params.q.as_deref(),
        groups,
        params.min_rating.unwrap_or(0),
    )
    .await?;
    Ok(Json(rows.into_iter().map(SymbolResponse::from).collect()))
}

async fn add_symbol(
    State(state): State<ApiState>,
    Json(body): Json<NewSymbolBody>,
) -> Result<Json<Value>, AppError> {
    let ticker = normalize_ticker(&body.ticker);
    if ticker.is_empty() {
        return Err(AppError::BadRequest("invalid_ticker".to_string()));
    }
    let group = match body.group.as_deref().map(str::to_lowercase).as_deref() {
        Some("archived") => Group::Archived,
        _ => Group::Watch,
    };
    let id = db::symbols::create(&state.pool, &ticker, group, state.default_earnings_days()).await?;
    tracing::info!(symbol_id = id, "Added {ticker} to {group}");
    Ok(Json(json!({ "status": "ok", "id": id })))
}

async fn get_symbol(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<SymbolDetailResponse>, AppError> {
    let row = db::symbols::get(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Symbol not found".to_string()))?;
    let snapshot = db::snapshots::get(&state.pool, id).await?.unwrap_or_default();
    Ok(Json(SymbolDetailResponse {
        group: row.group_name.clone(),
        symbol: row.into(),
        description: snapshot.description,
        next_earning_day: snapshot.next_earning_day,
    }))
}

async fn delete_symbol(State(state): State<ApiState>, Path(id): Path<i64>) -> Result<Json<Value>, AppError> {
    if !db::symbols::delete(&state.pool, id).await? {
        return Err(AppError::NotFound("Symbol not found".to_string()));
    }
    Ok(Json(json!({ "status": "deleted" })))
}

async fn move_symbol(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(body): Json<MoveBody>,
) -> Result<Json<Value>, AppError> {
    let group: Group = body
        .group
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(|_| AppError::BadRequest("invalid_group".to_string()))?;
    if !db::symbols::move_to(&state.pool, id, group).await? {
        return Err(AppError::NotFound("Symbol not found".to_string()));
    }
    Ok(Json(json!({ "status": "ok", "moved_to": group })))
}

async fn update_note(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(body): Json<NoteBody>,
) -> Result<Json<Value>, AppError> {
    let now = Utc::now().timestamp();
    if !db::symbols::update_note(&state.pool, id, &body.note, now).await? {
        return Err(AppError::NotFound("Symbol not found".to_string()));
    }
    Ok(Json(json!({ "status": "saved", "last_edit_epoch": now })))
}

/// Accepts a JSON number or numeric string in `rating`.
fn parse_rating(body: &Value) -> Option<i64> {
    let raw = body.get("rating").unwrap_or(&Value::Null);
    let rating = match raw {
        Value::Null => Some(0),
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    (0..=5).contains(&rating).then_some(rating)
}

async fn update_rating(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let rating = parse_rating(&body).ok_or_else(|| AppError::BadRequest("invalid_rating".to_string()))?;
    if !db::symbols::update_rating(&state.pool, id, rating).await? {
        return Err(AppError::NotFound("Symbol not found".to_string()));
    }
    Ok(Json(json!({ "status": "ok", "rating": rating })))
}

async fn get_alerts(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<AlertRuleResponse>>, AppError> {
    let rules = db::alerts::rules_for_symbol(&state.pool, id).await?;
    Ok(Json(
        rules
            .into_iter()
            .map(|r| AlertRuleResponse {
                id: r.id,
                kind: r.kind,
                value: r.value,
            })
            .collect(),
    ))
}

async fn save_alerts(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(body): Json<AlertsBody>,
) -> Result<Json<Value>, AppError> {
    if db::symbols::get(&state.pool, id).await?.is_none() {
        return Err(AppError::NotFound("Symbol not found".to_string()));
    }
    let rules = body.into_rules(state.default_earnings_days());
    if rules.iter().any(|r| !r.value.is_finite()) {
        return Err(AppError::BadRequest("invalid_alert_value".to_string()));
    }
    let now = Utc::now().timestamp();
    db::alerts::replace_rules(&state.pool, id, &rules, now).await?;
    Ok(Json(json!({ "status": "saved", "last_edit_epoch": now })))
}

async fn cached_quote(state: &ApiState, id: i64, ticker: String) -> Result<CachedQuoteResponse, AppError> {
    let snapshot = db::snapshots::get(&state.pool, id).await?;
    let (mut quote, epoch, note, window_open) = match snapshot {
        Some(s) => (s.to_quote(&ticker), s.last_check_epoch, s.last_check_note, s.window_open),
        None => (UnifiedQuote::empty(&ticker, "", None), None, None, None),
    };
    quote.source = "cache_only".to_string();
    Ok(CachedQuoteResponse {
        quote,
        last_check_epoch: epoch,
        last_check_note: note,
        window_open,
        server_tz: state.clock.tz().name().to_string(),
        cooldown_minutes: state.cooldown_minutes,
    })
}

async fn get_quote(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<CachedQuoteResponse>, AppError> {
    let row = db::symbols::get(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Symbol not found".to_string()))?;
    Ok(Json(cached_quote(&state, row.id, row.ticker).await?))
}

async fn quote_by_ticker(
    State(state): State<ApiState>,
    Path(ticker): Path<String>,
) -> Result<Json<CachedQuoteResponse>, AppError> {
    let id = db::symbols::find_id_by_ticker(&state.pool, &ticker)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("unknown symbol {ticker}")))?;
    let row = db::symbols::get(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("unknown symbol {ticker}")))?;
    Ok(Json(cached_quote(&state, row.id, row.ticker).await?))
}

async fn last_update(State(state): State<ApiState>) -> Result<Json<Value>, AppError> {
    let epoch = db::snapshots::last_check_epoch(&state.pool).await?;
    let text = epoch
        .and_then(|e| state.clock.format_epoch(e))
        .unwrap_or_else(|| "—".to_string());
    Ok(Json(json!({
        "epoch": epoch,
        "text": text,
        "timezone": state.clock.tz().name(),
    })))
}

fn with_text(state: &ApiState, status: RunStatus) -> RunStatusResponse {
    let fmt = |e: Option<i64>| e.filter(|v| *v > 0).and_then(|v| state.clock.format_epoch(v));
    RunStatusResponse {
        started_text: fmt(status.started_epoch),
        finished_text: fmt(status.finished_epoch),
        status,
    }
}

async fn get_run_status(State(state): State<ApiState>) -> Result<Json<RunStatusResponse>, AppError> {
    let status = state.tracker.read(Utc::now().timestamp()).await?;
    Ok(Json(with_text(&state, status)))
}

async fn reset_run_status(State(state): State<ApiState>) -> Result<Json<Value>, AppError> {
    let status = state.tracker.reset(Utc::now().timestamp()).await?;
    Ok(Json(json!({ "status": "ok", "run_status": with_text(&state, status) })))
}

/// Unknown ids answer 404 in the same `{status, error}` shape as a failed fetch.
async fn update_symbol(State(state): State<ApiState>, Path(id): Path<i64>) -> Response {
    match state.dispatcher.update_symbol(id).await {
        Ok(SymbolOutcome::Updated { notified }) => Json(json!({ "status": "ok", "notified": notified })).into_response(),
        Ok(SymbolOutcome::Failed(e)) => Json(json!({ "status": "error", "error": e })).into_response(),
        Err(AppError::NotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "status": "error", "error": "not_found" })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn update_all(State(state): State<ApiState>) -> Result<Json<Value>, AppError> {
    let outcome = state.dispatcher.trigger_bulk().await?;
    Ok(Json(json!({ "status": outcome })))
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencySummary> {
    Json(state.latency.summary())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::evaluator::AlertEvaluator;
    use crate::test_util::{quote, serve, RecordingNotifier, Reply, StubProvider};

    async fn app() -> (String, SqlitePool) {
        let cfg = Config::for_tests();
        let pool = db::test_pool().await;
        let clock = MarketClock::from_config(&cfg);
        let tracker = RunTracker::new(pool.clone(), cfg.run_timeout_secs);
        let latency = Arc::new(LatencyStats::new().unwrap());
        let provider = StubProvider::new("stub", Reply::Quote(quote("X", Some(10.0), Some(9.0))));
        let evaluator = AlertEvaluator::new(pool.clone(), Arc::new(RecordingNotifier::new(true)), clock, cfg.cooldown_secs());
        let dispatcher = Arc::new(Dispatcher::new(
            pool.clone(),
            Arc::new(provider),
            evaluator,
            clock,
            tracker.clone(),
            latency.clone(),
        ));
        let state = ApiState {
            pool: pool.clone(),
            tracker,
            dispatcher,
            clock,
            cooldown_minutes: cfg.cooldown_minutes,
            earnings_default_days: cfg.earnings_notify_default_days,
            latency,
        };
        let addr = serve(router(state)).await;
        (format!("http://{addr}"), pool)
    }

    #[test]
    fn alert_body_builds_rules_with_default_earnings() {
        let body: AlertsBody = serde_json::from_value(json!({
            "above": 200.0,
            "pct_drop": [3, 5],
        }))
        .unwrap();
        let rules = body.into_rules(Some(1));
        let kinds: Vec<_> = rules.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![AlertKind::Above, AlertKind::PctDrop, AlertKind::PctDrop, AlertKind::EarningsDays]
        );
        assert_eq!(rules[3].value, 1.0);

        let body: AlertsBody = serde_json::from_value(json!({ "earn_days": 3.7 })).unwrap();
        assert_eq!(body.into_rules(None), vec![NewRule { kind: AlertKind::EarningsDays, value: 3.0 }]);
    }

    #[test]
    fn rating_accepts_numbers_and_numeric_strings() {
        assert_eq!(parse_rating(&json!({ "rating": 4 })), Some(4));
        assert_eq!(parse_rating(&json!({ "rating": "2" })), Some(2));
        assert_eq!(parse_rating(&json!({})), Some(0));
        assert_eq!(parse_rating(&json!({ "rating": 6 })), None);
        assert_eq!(parse_rating(&json!({ "rating": "lots" })), None);
    }

    #[tokio::test]
    async fn symbol_lifecycle_over_http() {
        let (base, _pool) = app().await;
        let client = reqwest::Client::new();

        let created: Value = client
            .post(format!("{base}/api/symbols"))
            .json(&json!({ "ticker": " aapl " }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let id = created["id"].as_i64().unwrap();

        let alerts: Value = client.get(format!("{base}/api/alerts/{id}")).send().await.unwrap().json().await.unwrap();
        assert_eq!(alerts[0]["type"], "earnings_days");

        let bad = client
            .post(format!("{base}/api/symbols/{id}/move"))
            .json(&json!({ "group": "trash" }))
            .send()
            .await
            .unwrap();
        assert_eq!(bad.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: Value = bad.json().await.unwrap();
        assert_eq!(body["error"], "invalid_group");

        let empty: Value = client.get(format!("{base}/api/quote/{id}")).send().await.unwrap().json().await.unwrap();
        assert_eq!(empty["symbol"], "AAPL");
        assert_eq!(empty["source"], "cache_only");
        assert!(empty["price"].is_null());

        let updated: Value = client
            .post(format!("{base}/api/update_symbol/{id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(updated, json!({ "status": "ok", "notified": 0 }));

        let cached: Value = client
            .get(format!("{base}/api/quote_by_ticker/aapl"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(cached["price"], 10.0);
        assert_eq!(cached["change_percent"], "11.11%");

        let deleted = client.delete(format!("{base}/api/symbols/{id}")).send().await.unwrap();
        assert!(deleted.status().is_success());
        let gone = client.get(format!("{base}/api/symbols/{id}")).send().await.unwrap();
        assert_eq!(gone.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn update_of_unknown_symbol_is_404_with_status_body() {
        let (base, _pool) = app().await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/api/update_symbol/4242"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body, json!({ "status": "error", "error": "not_found" }));
    }

    #[tokio::test]
    async fn run_status_and_reset() {
        let (base, pool) = app().await;
        let client = reqwest::Client::new();

        let idle: Value = client.get(format!("{base}/api/run_status")).send().await.unwrap().json().await.unwrap();
        assert_eq!(idle["phase"], "idle");
        assert!(idle["started_text"].is_null());

        db::run_status::set_running(&pool, Utc::now().timestamp(), "Running").await.unwrap();
        let reset: Value = client
            .post(format!("{base}/api/run_status/reset"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(reset["run_status"]["phase"], "finished");
        assert_eq!(reset["run_status"]["status_code"], "manual_reset");
        assert!(reset["run_status"]["started_text"].is_string());
    }
}
