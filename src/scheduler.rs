//! Daily fire times in the market timezone. Each fire runs the bulk pass
//! through the run guard; a fire that finds a batch in flight is skipped.

use std::sync::Arc;

use chrono::{DateTime, Duration, LocalResult, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::market_hours::MarketClock;

/// Next instant strictly after `now` matching any of `times` on the market
/// calendar. Local times skipped by a DST jump do not fire that day; repeated
/// local times fire at their first occurrence.
pub fn next_fire(now: DateTime<Utc>, tz: Tz, times: &[NaiveTime]) -> Option<DateTime<Utc>> {
    let today = now.with_timezone(&tz).date_naive();
    (0..=2)
        .filter_map(|offset| today.checked_add_signed(Duration::days(offset)))
        .flat_map(|date| times.iter().map(move |t| date.and_time(*t)))
        .filter_map(|local| match tz.from_local_datetime(&local) {
            LocalResult::Single(dt) => Some(dt),
            LocalResult::Ambiguous(first, _) => Some(first),
            LocalResult::None => None,
        })
        .map(|dt| dt.with_timezone(&Utc))
        .filter(|dt| *dt > now)
        .min()
}

pub struct FireScheduler {
    dispatcher: Arc<Dispatcher>,
    clock: MarketClock,
    fire_times: Vec<NaiveTime>,
}

impl FireScheduler {
    pub fn new(dispatcher: Arc<Dispatcher>, clock: MarketClock, fire_times: Vec<NaiveTime>) -> Self {
        Self {
            dispatcher,
            clock,
            fire_times,
        }
    }

    pub async fn run(self) {
        if self.fire_times.is_empty() {
            warn!("No valid ALERT_FIRE_TIMES; scheduled bulk runs disabled");
            return;
        }
        for t in &self.fire_times {
            info!("Scheduled bulk run at {} ({})", t.format("%H:%M"), self.clock.tz());
        }

        loop {
            let now = Utc::now();
            let Some(next) = next_fire(now, self.clock.tz(), &self.fire_times) else {
                warn!("No upcoming fire time found; scheduler stopping");
                return;
            };
            info!("Next bulk run at {}", self.clock.format(next));
            tokio::time::sleep((next - now).to_std().unwrap_or_default()).await;

            match self.dispatcher.run_bulk().await {
                Ok(Some(tally)) => info!(
                    ok = tally.ok,
                    err = tally.err,
                    notified = tally.notified,
                    "Scheduled bulk run complete"
                ),
                Ok(None) => info!("Scheduled bulk run skipped: a batch is already running"),
                Err(e) => error!("Scheduled bulk run failed to start: {e}"),
            }
        }
    }
}
