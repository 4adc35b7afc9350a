mod api;
mod config;
mod db;
mod dispatcher;
mod error;
mod evaluator;
mod market_hours;
mod notifier;
mod provider;
mod run_tracker;
mod scheduler;
#[cfg(test)]
mod test_util;
mod types;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::config::{mask_key, Config};
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::evaluator::AlertEvaluator;
use crate::market_hours::MarketClock;
use crate::notifier::WebhookNotifier;
use crate::provider::build_provider;
use crate::run_tracker::RunTracker;
use crate::scheduler::FireScheduler;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = db::connect(&cfg.db_path).await?;
    info!("Database ready at {}", cfg.db_path);

    // --- Run-status recovery ---
    let tracker = RunTracker::new(pool.clone(), cfg.run_timeout_secs);
    tracker.recover_on_startup(Utc::now().timestamp()).await?;

    // --- Provider + notifier ---
    let provider = build_provider(&cfg)?;
    if provider.is_ready() {
        info!("Provider {} ready", provider.name());
    } else {
        warn!("Provider {} is not ready; quotes will carry errors", provider.name());
    }

    let notifier = WebhookNotifier::new(cfg.webhook_url.clone(), Duration::from_secs(cfg.webhook_timeout_secs))?;
    if notifier.is_configured() {
        info!("Webhook notifications enabled ({})", mask_key(cfg.webhook_url.as_deref()));
    } else {
        warn!("DISCORD_WEBHOOK not set: alerts will be evaluated but not delivered");
    }

    // --- Core services ---
    let clock = MarketClock::from_config(&cfg);
    let latency = Arc::new(LatencyStats::new()?);
    let evaluator = AlertEvaluator::new(pool.clone(), Arc::new(notifier), clock, cfg.cooldown_secs());
    let dispatcher = Arc::new(Dispatcher::new(
        pool.clone(),
        provider,
        evaluator,
        clock,
        tracker.clone(),
        Arc::clone(&latency),
    ));

    // Daily fire times (background)
    let scheduler = FireScheduler::new(Arc::clone(&dispatcher), clock, cfg.fire_times.clone());
    tokio::spawn(async move { scheduler.run().await });

    // HTTP API server
    let api_state = ApiState {
        pool,
        tracker,
        dispatcher,
        clock,
        cooldown_minutes: cfg.cooldown_minutes,
        earnings_default_days: cfg.earnings_notify_default_days,
        latency,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(
        "HTTP API listening on {bind_addr} (market tz {}, window {}-{})",
        clock.tz(),
        cfg.market_window_start.format("%H:%M"),
        cfg.market_window_end.format("%H:%M"),
    );

    axum::serve(listener, app).await?;

    Ok(())
}
