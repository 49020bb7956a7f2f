//! Runtime helpers for portal fetch retries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use super::{BackoffJitter, FetchSleeper};

/// Runtime helpers used by the retry policy.
pub struct PortalRegistryRuntime {
    /// Async sleep implementation.
    pub sleeper: Arc<dyn FetchSleeper>,
    /// Jitter strategy for retry delays.
    pub jitter: Arc<dyn BackoffJitter>,
}

impl Default for PortalRegistryRuntime {
    fn default() -> Self {
        Self {
            sleeper: Arc::new(TokioSleeper),
            jitter: Arc::new(AttemptJitter),
        }
    }
}

/// Tokio-based sleeper implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl FetchSleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Default jitter: a uniform extra of up to a quarter of the base delay.
///
/// The generator is seeded from the attempt instant and number, so two
/// retries scheduled at the same nanosecond wait the same time.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttemptJitter;

impl BackoffJitter for AttemptJitter {
    fn jittered_delay(&self, base: Duration, attempt: u32, now: DateTime<Utc>) -> Duration {
        let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        let max_extra = (base_ms / 4).max(1);
        let seed = now
            .timestamp_nanos_opt()
            .map_or(0, |nanos| u64::from_ne_bytes(nanos.to_ne_bytes()))
            .rotate_left(32)
            ^ u64::from(attempt);
        let extra = SmallRng::seed_from_u64(seed).gen_range(0..=max_extra);
        Duration::from_millis(base_ms.saturating_add(extra))
    }
}
