//! Lifecycle of the bulk run: single-flight guard over the persisted
//! run-status record plus the two auto-recovery paths.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::db::run_status;
use crate::error::Result;
use crate::types::{RunPhase, RunStatus, RunStatusCode};

pub const STARTUP_RECOVERY_MESSAGE: &str = "Previous run did not finish (server restarted).";
pub const TIMEOUT_RECOVERY_MESSAGE: &str = "Auto-recovered: run exceeded timeout";
pub const MANUAL_RESET_MESSAGE: &str = "Manually reset by user";

#[derive(Debug, Clone, Copy)]
struct Claim {
    token: u64,
    started_epoch: i64,
}

#[derive(Clone)]
pub struct RunTracker {
    pool: SqlitePool,
    claim: Arc<Mutex<Option<Claim>>>,
    next_token: Arc<AtomicU64>,
    timeout_secs: i64,
}

/// Held by the worker executing a bulk run. Dropping it releases the
/// in-process claim unless a later run has already taken it over.
#[derive(Debug)]
pub struct RunGuard {
    claim: Arc<Mutex<Option<Claim>>>,
    token: u64,
    started_epoch: i64,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut claim = self.claim.lock().unwrap_or_else(PoisonError::into_inner);
        if claim.is_some_and(|c| c.token == self.token) {
            *claim = None;
        }
    }
}

impl RunTracker {
    pub fn new(pool: SqlitePool, timeout_secs: i64) -> Self {
        Self {
            pool,
            claim: Arc::new(Mutex::new(None)),
            next_token: Arc::new(AtomicU64::new(0)),
            timeout_secs,
        }
    }

    fn held(&self) -> Option<Claim> {
        *self.claim.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the run. `None` means a batch is recorded as running.
    ///
    /// A worker whose record was since recovered or reset still holds its
    /// guard, but no longer blocks: the new run takes the claim over and the
    /// old worker's completion is discarded.
    pub async fn try_begin(&self, now_epoch: i64) -> Result<Option<RunGuard>> {
        self.recover_timeout(now_epoch).await?;

        let held = self.held();
        if let Some(held) = held {
            let status = run_status::read(&self.pool).await?;
            if status.phase == RunPhase::Running && status.started_epoch == Some(held.started_epoch) {
                return Ok(None);
            }
            warn!(
                started_epoch = held.started_epoch,
                "Previous batch was reclassified while still working; starting a new one"
            );
        }

        // Must differ from a stale worker's epoch, or its finish would land on this run.
        let started_epoch = match held {
            Some(h) => now_epoch.max(h.started_epoch + 1),
            None => now_epoch,
        };
        if !run_status::set_running(&self.pool, started_epoch, "Running").await? {
            warn!("Run status already 'running'; refusing to start a second batch");
            return Ok(None);
        }

        let token = self.next_token.fetch_add(1, Ordering::AcqRel) + 1;
        *self.claim.lock().unwrap_or_else(PoisonError::into_inner) = Some(Claim { token, started_epoch });
        Ok(Some(RunGuard {
            claim: Arc::clone(&self.claim),
            token,
            started_epoch,
        }))
    }

    /// Record normal completion. Returns false when the record was recovered
    /// while the batch was still working; the outcome is then only logged.
    pub async fn finish(
        &self,
        guard: RunGuard,
        now_epoch: i64,
        code: RunStatusCode,
        message: &str,
        ok_count: i64,
        err_count: i64,
    ) -> Result<bool> {
        let wrote = run_status::finish_if_current(
            &self.pool,
            guard.started_epoch,
            now_epoch,
            code,
            message,
            ok_count,
            err_count,
        )
        .await?;
        if !wrote {
            warn!(
                started_epoch = guard.started_epoch,
                "Run record was reclassified before completion; discarding outcome: {message}"
            );
        }
        Ok(wrote)
    }

    /// Nothing can legitimately be running when the process starts.
    pub async fn recover_on_startup(&self, now_epoch: i64) -> Result<bool> {
        let recovered = run_status::force_finish_running(
            &self.pool,
            None,
            now_epoch,
            RunStatusCode::Interrupted,
            STARTUP_RECOVERY_MESSAGE,
        )
        .await?;
        if recovered {
            warn!("Recovered run left in 'running' by a previous process");
        }
        Ok(recovered)
    }

    async fn recover_timeout(&self, now_epoch: i64) -> Result<bool> {
        let recovered = run_status::force_finish_running(
            &self.pool,
            Some(now_epoch - self.timeout_secs),
            now_epoch,
            RunStatusCode::InterruptedTimeout,
            TIMEOUT_RECOVERY_MESSAGE,
        )
        .await?;
        if recovered {
            warn!(timeout_secs = self.timeout_secs, "Run exceeded timeout; marked interrupted_timeout");
        }
        Ok(recovered)
    }

    /// Status read with timeout auto-recovery applied first.
    pub async fn read(&self, now_epoch: i64) -> Result<RunStatus> {
        self.recover_timeout(now_epoch).await?;
        run_status::read(&self.pool).await
    }

    /// Operator override. Does not stop an in-flight worker; its late
    /// completion becomes a no-op and the next trigger starts a new run.
    pub async fn reset(&self, now_epoch: i64) -> Result<RunStatus> {
        run_status::force_finish(&self.pool, now_epoch, RunStatusCode::ManualReset, MANUAL_RESET_MESSAGE)
            .await?;
        info!("Run status manually reset");
        run_status::read(&self.pool).await
    }

    /// True while a worker holds the current claim.
    pub fn is_in_flight(&self) -> bool {
        self.held().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn second_begin_is_refused_until_guard_drops() {
        let tracker = RunTracker::new(test_pool().await, 600);
        let guard = tracker.try_begin(1_000).await.unwrap().expect("first claim");
        assert!(tracker.try_begin(1_001).await.unwrap().is_none());

        tracker.finish(guard, 1_010, RunStatusCode::Ok, "done", 1, 0).await.unwrap();
        assert!(!tracker.is_in_flight());

        let again = tracker.try_begin(1_020).await.unwrap();
        assert!(again.is_some());
    }

    #[tokio::test]
    async fn timeout_recovery_happens_exactly_once() {
        let pool = test_pool().await;
        let tracker = RunTracker::new(pool.clone(), 600);
        run_status::set_running(&pool, 1_000, "Running").await.unwrap();

        let fresh = tracker.read(1_600).await.unwrap();
        assert_eq!(fresh.phase, RunPhase::Running);

        let recovered = tracker.read(1_601).await.unwrap();
        assert_eq!(recovered.phase, RunPhase::Finished);
        assert_eq!(recovered.status_code, Some(RunStatusCode::InterruptedTimeout));
        assert_eq!(recovered.finished_epoch, Some(1_601));

        let again = tracker.read(5_000).await.unwrap();
        assert_eq!(again, recovered);
    }

    #[tokio::test]
    async fn startup_recovery_marks_interrupted() {
        let pool = test_pool().await;
        let tracker = RunTracker::new(pool.clone(), 600);
        assert!(!tracker.recover_on_startup(10).await.unwrap());

        run_status::set_running(&pool, 20, "Running").await.unwrap();
        assert!(tracker.recover_on_startup(30).await.unwrap());
        assert!(!tracker.recover_on_startup(31).await.unwrap());

        let status = tracker.read(32).await.unwrap();
        assert_eq!(status.status_code, Some(RunStatusCode::Interrupted));
        assert_eq!(status.message.as_deref(), Some(STARTUP_RECOVERY_MESSAGE));
    }

    #[tokio::test]
    async fn late_finisher_after_reset_is_discarded() {
        let tracker = RunTracker::new(test_pool().await, 600);
        let guard = tracker.try_begin(100).await.unwrap().unwrap();

        let reset = tracker.reset(150).await.unwrap();
        assert_eq!(reset.status_code, Some(RunStatusCode::ManualReset));
        assert!(tracker.is_in_flight());

        let wrote = tracker.finish(guard, 200, RunStatusCode::Ok, "done", 5, 0).await.unwrap();
        assert!(!wrote);
        let status = tracker.read(201).await.unwrap();
        assert_eq!(status.status_code, Some(RunStatusCode::ManualReset));
        assert!(!tracker.is_in_flight());
    }

    #[tokio::test]
    async fn reset_lets_a_new_run_take_over() {
        let tracker = RunTracker::new(test_pool().await, 600);
        let stale = tracker.try_begin(100).await.unwrap().unwrap();
        tracker.reset(150).await.unwrap();

        let fresh = tracker.try_begin(160).await.unwrap().expect("claim after reset");
        assert_eq!(fresh.started_epoch, 160);
        assert!(tracker.try_begin(161).await.unwrap().is_none());

        // The stale worker finishing and dropping its guard leaves the new run alone.
        assert!(!tracker.finish(stale, 170, RunStatusCode::Ok, "late", 9, 0).await.unwrap());
        assert!(tracker.is_in_flight());
        let status = tracker.read(171).await.unwrap();
        assert_eq!(status.phase, RunPhase::Running);
        assert_eq!(status.started_epoch, Some(160));

        assert!(tracker.finish(fresh, 180, RunStatusCode::Ok, "done", 2, 0).await.unwrap());
        assert!(!tracker.is_in_flight());
    }

    #[tokio::test]
    async fn timeout_recovery_lets_a_new_run_take_over() {
        let tracker = RunTracker::new(test_pool().await, 600);
        let _stuck = tracker.try_begin(1_000).await.unwrap().unwrap();
        assert!(tracker.try_begin(1_500).await.unwrap().is_none());

        let recovered = tracker.read(1_601).await.unwrap();
        assert_eq!(recovered.status_code, Some(RunStatusCode::InterruptedTimeout));

        let fresh = tracker.try_begin(1_602).await.unwrap();
        assert_eq!(fresh.map(|g| g.started_epoch), Some(1_602));
    }

    #[tokio::test]
    async fn takeover_in_the_same_second_gets_a_distinct_epoch() {
        let tracker = RunTracker::new(test_pool().await, 600);
        let stale = tracker.try_begin(100).await.unwrap().unwrap();
        tracker.reset(100).await.unwrap();

        let fresh = tracker.try_begin(100).await.unwrap().unwrap();
        assert_eq!(fresh.started_epoch, 101);
        assert!(!tracker.finish(stale, 100, RunStatusCode::Ok, "late", 1, 0).await.unwrap());
        assert_eq!(tracker.read(100).await.unwrap().phase, RunPhase::Running);
    }
}
