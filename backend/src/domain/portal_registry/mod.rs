//! Region-keyed registry of portal adapters.
//!
//! The registry owns adapter selection and the retry policy (jittered
//! exponential backoff for transient failures). It is assembled with
//! [`PortalRegistryBuilder`] and is read-only afterwards.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockable::Clock;
use tracing::{debug, instrument, warn};

use crate::domain::error::{FetchFailureKind, PipelineError};
use crate::domain::ports::{PortalAdapter, PortalFetchError, RawDocument};
use crate::domain::reference::{CanonicalReference, Region};

mod runtime;

pub use runtime::{AttemptJitter, PortalRegistryRuntime, TokioSleeper};

/// Retry settings for portal fetches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRetryPolicy {
    /// Maximum attempts per fetch (including the first call).
    pub max_attempts: u32,
    /// Initial retry backoff.
    pub initial_backoff: Duration,
    /// Maximum retry backoff cap.
    pub max_backoff: Duration,
}

impl Default for FetchRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl FetchRetryPolicy {
    /// Un-jittered delay before retrying after `attempt` failed.
    ///
    /// ```rust
    /// use invoice_backend::domain::FetchRetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = FetchRetryPolicy::default();
    /// assert_eq!(policy.base_delay(1), Duration::from_millis(500));
    /// assert_eq!(policy.base_delay(2), Duration::from_millis(1000));
    /// assert_eq!(policy.base_delay(10), Duration::from_secs(5));
    /// ```
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = 2_u32.saturating_pow(attempt.saturating_sub(1));
        let base_ms = u64::try_from(self.initial_backoff.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_backoff.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(u64::from(exponent)).min(max_ms))
    }
}

/// Async sleeping abstraction for retries.
#[async_trait]
pub trait FetchSleeper: Send + Sync {
    /// Suspend execution for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Retry backoff jitter abstraction.
pub trait BackoffJitter: Send + Sync {
    /// Return a jittered delay from the exponential base delay.
    ///
    /// ```rust
    /// use invoice_backend::domain::BackoffJitter;
    /// use chrono::{TimeZone, Utc};
    /// use std::time::Duration;
    /// struct DeterministicJitter;
    /// impl BackoffJitter for DeterministicJitter {
    ///     fn jittered_delay(&self, base: Duration, attempt: u32, _now: chrono::DateTime<chrono::Utc>) -> Duration {
    ///         base + Duration::from_millis(u64::from(attempt) * 5)
    ///     }
    /// }
    /// let now = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).single().expect("valid time");
    /// let delay = DeterministicJitter.jittered_delay(Duration::from_millis(100), 2, now);
    /// assert_eq!(delay, Duration::from_millis(110));
    /// ```
    fn jittered_delay(&self, base: Duration, attempt: u32, now: DateTime<Utc>) -> Duration;
}

/// Builder collecting adapters before the registry is frozen.
pub struct PortalRegistryBuilder {
    adapters: HashMap<Region, Arc<dyn PortalAdapter>>,
    policy: FetchRetryPolicy,
    runtime: PortalRegistryRuntime,
}

impl PortalRegistryBuilder {
    /// Start an empty builder with the default policy and runtime.
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
            policy: FetchRetryPolicy::default(),
            runtime: PortalRegistryRuntime::default(),
        }
    }

    /// Register `adapter` for its region, replacing any earlier one.
    #[must_use]
    pub fn register(mut self, adapter: Arc<dyn PortalAdapter>) -> Self {
        let region = adapter.region();
        if self.adapters.insert(region, adapter).is_some() {
            warn!(%region, "portal adapter replaced during registration");
        }
        self
    }

    /// Register every adapter in `adapters`.
    #[must_use]
    pub fn register_all<I>(self, adapters: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn PortalAdapter>>,
    {
        adapters
            .into_iter()
            .fold(self, |builder, adapter| builder.register(adapter))
    }

    /// Override the retry policy.
    #[must_use]
    pub fn retry_policy(mut self, policy: FetchRetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Override the sleeper and jitter.
    #[must_use]
    pub fn runtime(mut self, runtime: PortalRegistryRuntime) -> Self {
        self.runtime = runtime;
        self
    }

    /// Freeze the registry.
    pub fn build(self, clock: Arc<dyn Clock>) -> PortalRegistry {
        PortalRegistry {
            adapters: self.adapters,
            policy: self.policy,
            sleeper: self.runtime.sleeper,
            jitter: self.runtime.jitter,
            clock,
        }
    }
}

impl Default for PortalRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only region to adapter lookup with retrying fetches.
pub struct PortalRegistry {
    adapters: HashMap<Region, Arc<dyn PortalAdapter>>,
    policy: FetchRetryPolicy,
    sleeper: Arc<dyn FetchSleeper>,
    jitter: Arc<dyn BackoffJitter>,
    clock: Arc<dyn Clock>,
}

impl PortalRegistry {
    /// Start building a registry.
    pub fn builder() -> PortalRegistryBuilder {
        PortalRegistryBuilder::new()
    }

    /// Whether an adapter serves `region`.
    pub fn supports(&self, region: Region) -> bool {
        self.adapters.contains_key(&region)
    }

    /// Regions with an adapter, ordered by code.
    pub fn regions(&self) -> Vec<Region> {
        let mut regions: Vec<Region> = self.adapters.keys().copied().collect();
        regions.sort_unstable();
        regions
    }

    /// Fetch the document for `reference` from its region's portal.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::UnsupportedPortal`] when no adapter serves the
    ///   region; no request is made.
    /// - [`PipelineError::FetchError`] with [`FetchFailureKind::Transient`]
    ///   once transient failures exhaust the attempt limit.
    /// - [`PipelineError::FetchError`] with [`FetchFailureKind::Permanent`]
    ///   on the first non-transient failure.
    #[instrument(skip(self, reference), fields(region = %reference.region, key = %reference.access_key))]
    pub async fn fetch(&self, reference: &CanonicalReference) -> Result<RawDocument, PipelineError> {
        let adapter = self.adapters.get(&reference.region).ok_or_else(|| {
            PipelineError::UnsupportedPortal {
                region: reference.region.to_string(),
            }
        })?;
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match adapter.fetch(reference).await {
                Ok(document) => {
                    debug!(attempt, bytes = document.body.len(), "portal document fetched");
                    return Ok(document);
                }
                Err(error) if error.is_transient() && attempt < max_attempts => {
                    let base_delay = self.policy.base_delay(attempt);
                    let jittered = self
                        .jitter
                        .jittered_delay(base_delay, attempt, self.clock.utc());
                    warn!(attempt, delay_ms = jittered.as_millis(), %error, "retrying portal fetch");
                    self.sleeper.sleep(jittered).await;
                }
                Err(error) => return Err(map_fetch_error(&error, attempt)),
            }
        }

        Err(PipelineError::FetchError {
            kind: FetchFailureKind::Permanent,
            message: "portal fetch attempts exhausted without a result".to_owned(),
        })
    }
}

fn map_fetch_error(error: &PortalFetchError, attempts: u32) -> PipelineError {
    let kind = if error.is_transient() {
        FetchFailureKind::Transient
    } else {
        FetchFailureKind::Permanent
    };
    warn!(attempts, ?kind, %error, "portal fetch failed");
    PipelineError::FetchError {
        kind,
        message: format!("{error} (after {attempts} attempt(s))"),
    }
}
