//! Per-(user, action-class) minimum-interval rate limiter.
//!
//! Each key owns one cell in a concurrent map. The check and the update of a
//! cell happen under that cell's entry lock, so two concurrent requests for
//! the same key cannot both be allowed. Unrelated keys never contend on a
//! shared lock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::PipelineError;
use super::report::ReportPeriod;
use super::user::UserId;

/// Rate-limited action classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionClass {
    /// Invoice submissions.
    SubmitInvoice,
    /// Report requests, keyed additionally by period.
    RequestReport,
}

/// Minimum intervals per action class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitIntervals {
    /// Minimum spacing between two submissions from one user.
    pub submit_invoice: Duration,
    /// Minimum spacing between two reports of one period from one user.
    pub request_report: Duration,
}

impl Default for RateLimitIntervals {
    fn default() -> Self {
        Self {
            submit_invoice: Duration::from_secs(50),
            request_report: Duration::from_secs(3600),
        }
    }
}

impl RateLimitIntervals {
    fn for_class(self, class: ActionClass) -> Duration {
        match class {
            ActionClass::SubmitInvoice => self.submit_invoice,
            ActionClass::RequestReport => self.request_report,
        }
    }
}

/// Key of one rate-limit cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// Acting user.
    pub user: UserId,
    /// Action class.
    pub class: ActionClass,
    /// Report period, when the class is keyed by period.
    pub period: Option<ReportPeriod>,
}

/// Monotonic time source, immune to wall-clock adjustment.
pub trait MonotonicClock: Send + Sync {
    /// Current monotonic instant.
    fn now(&self) -> Instant;
}

/// [`MonotonicClock`] backed by [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemMonotonicClock;

impl MonotonicClock for SystemMonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Minimum-interval limiter.
pub struct RateLimiter {
    cells: DashMap<RateLimitKey, Instant>,
    intervals: RateLimitIntervals,
    clock: Arc<dyn MonotonicClock>,
}

impl RateLimiter {
    /// Build a limiter with the given intervals and clock.
    pub fn new(intervals: RateLimitIntervals, clock: Arc<dyn MonotonicClock>) -> Self {
        Self {
            cells: DashMap::new(),
            intervals,
            clock,
        }
    }

    /// Check and consume the allowance for `user` and `class`.
    ///
    /// The period is only part of the key for [`ActionClass::RequestReport`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::RateLimited`] with the remaining wait rounded
    /// up to whole seconds.
    pub fn check(
        &self,
        user: UserId,
        class: ActionClass,
        period: Option<ReportPeriod>,
    ) -> Result<(), PipelineError> {
        let key = RateLimitKey {
            user,
            class,
            period: match class {
                ActionClass::RequestReport => period,
                ActionClass::SubmitInvoice => None,
            },
        };
        let interval = self.intervals.for_class(class);
        let now = self.clock.now();

        match self.cells.entry(key) {
            Entry::Occupied(mut cell) => {
                let elapsed = now.saturating_duration_since(*cell.get());
                if elapsed < interval {
                    let retry_after_secs = ceil_secs(interval.saturating_sub(elapsed));
                    debug!(user_id = %user, ?class, retry_after_secs, "rate limited");
                    return Err(PipelineError::RateLimited { retry_after_secs });
                }
                cell.insert(now);
            }
            Entry::Vacant(cell) => {
                cell.insert(now);
            }
        }
        Ok(())
    }

    /// Drop cells whose interval has fully elapsed. Returns how many were
    /// removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.cells.len();
        self.cells.retain(|key, last| {
            now.saturating_duration_since(*last) < self.intervals.for_class(key.class)
        });
        before.saturating_sub(self.cells.len())
    }

    /// Number of live cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether no cells are tracked.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    }
}

#[cfg(test)]
mod tests {
    //! Limiter behaviour under a manual clock.

    use super::*;
    use crate::test_support::ManualMonotonicClock;
    use rstest::{fixture, rstest};

    const ALICE: UserId = UserId::new(42);

    #[fixture]
    fn clock() -> Arc<ManualMonotonicClock> {
        Arc::new(ManualMonotonicClock::new())
    }

    fn limiter(clock: &Arc<ManualMonotonicClock>) -> RateLimiter {
        RateLimiter::new(RateLimitIntervals::default(), clock.clone())
    }

    #[rstest]
    fn second_submission_within_window_reports_remaining_wait(clock: Arc<ManualMonotonicClock>) {
        let limiter = limiter(&clock);
        limiter
            .check(ALICE, ActionClass::SubmitInvoice, None)
            .expect("first submission allowed");

        clock.advance(Duration::from_secs(10));
        let error = limiter
            .check(ALICE, ActionClass::SubmitInvoice, None)
            .expect_err("second submission limited");
        assert_eq!(
            error,
            PipelineError::RateLimited {
                retry_after_secs: 40
            }
        );

        clock.advance(Duration::from_secs(40));
        limiter
            .check(ALICE, ActionClass::SubmitInvoice, None)
            .expect("allowed after 50 seconds");
    }

    #[rstest]
    fn partial_seconds_round_up(clock: Arc<ManualMonotonicClock>) {
        let limiter = limiter(&clock);
        limiter
            .check(ALICE, ActionClass::SubmitInvoice, None)
            .expect("first allowed");
        clock.advance(Duration::from_millis(49_500));
        let error = limiter
            .check(ALICE, ActionClass::SubmitInvoice, None)
            .expect_err("still limited");
        assert_eq!(error, PipelineError::RateLimited { retry_after_secs: 1 });
    }

    #[rstest]
    fn report_periods_have_independent_cooldowns(clock: Arc<ManualMonotonicClock>) {
        let limiter = limiter(&clock);
        limiter
            .check(ALICE, ActionClass::RequestReport, Some(ReportPeriod::Week))
            .expect("week allowed");
        limiter
            .check(ALICE, ActionClass::RequestReport, Some(ReportPeriod::Month))
            .expect("month allowed");
        assert!(
            limiter
                .check(ALICE, ActionClass::RequestReport, Some(ReportPeriod::Week))
                .is_err()
        );
    }

    #[rstest]
    fn classes_and_users_do_not_share_cells(clock: Arc<ManualMonotonicClock>) {
        let limiter = limiter(&clock);
        limiter
            .check(ALICE, ActionClass::SubmitInvoice, None)
            .expect("submit allowed");
        limiter
            .check(ALICE, ActionClass::RequestReport, Some(ReportPeriod::Day))
            .expect("report allowed");
        limiter
            .check(UserId::new(7), ActionClass::SubmitInvoice, None)
            .expect("other user allowed");
    }

    #[rstest]
    fn purge_drops_only_expired_cells(clock: Arc<ManualMonotonicClock>) {
        let limiter = limiter(&clock);
        limiter
            .check(ALICE, ActionClass::SubmitInvoice, None)
            .expect("submit allowed");
        limiter
            .check(ALICE, ActionClass::RequestReport, Some(ReportPeriod::Day))
            .expect("report allowed");

        clock.advance(Duration::from_secs(60));
        assert_eq!(limiter.purge_expired(), 1);
        assert_eq!(limiter.len(), 1);
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_checks_allow_exactly_one(clock: Arc<ManualMonotonicClock>) {
        let limiter = Arc::new(limiter(&clock));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move { limiter.check(ALICE, ActionClass::SubmitInvoice, None) })
            })
            .collect();

        let mut allowed = 0;
        for handle in handles {
            if handle.await.expect("task joins").is_ok() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 1);
    }
}
