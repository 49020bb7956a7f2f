//! Composition root: wires ports, services and adapters into a running bot.
//!
//! [`assemble`] builds the service graph from already constructed ports so
//! tests can swap any of them; [`from_settings`] opens the on-disk stores
//! and the HTTP portal adapters described by [`BotSettings`]. Roles and the
//! activity register are restored from their snapshots before the first
//! command is handled.

use std::sync::Arc;

use mockable::{Clock, DefaultClock};
use tracing::{info, warn};

use crate::config::BotSettings;
use crate::domain::ports::{
    ActivitySnapshotStore, ActivitySnapshotStoreError, InvoiceStore, InvoiceStoreError, LogSource,
    OperatorAlerts, QrDecoder, ReportRenderer, RoleSnapshotStore, RoleSnapshotStoreError,
};
use crate::domain::{
    AccessControlGate, ActivityTracker, CommandService, CommandServiceParts, MonotonicClock,
    PortalRegistry, RateLimitIntervals, RateLimiter, ReportAggregator, SubmissionPipeline,
    SubmissionPorts, SystemMonotonicClock, UserId,
};
use crate::outbound::activity_file::JsonActivityFile;
use crate::outbound::alerts::TracingOperatorAlerts;
use crate::outbound::portals::{default_endpoints, register_http_portals};
use crate::outbound::qr::UnavailableQrDecoder;
use crate::outbound::roles_file::JsonRoleFile;
use crate::outbound::storage::JsonlInvoiceStore;
use crate::outbound::text_report::TextReportRenderer;
use crate::telemetry::LogRing;

/// Errors raised while building the bot from configuration.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    /// Invoice store could not be opened.
    #[error("failed to open invoice store: {0}")]
    Store(#[from] InvoiceStoreError),
    /// Role snapshot could not be loaded.
    #[error("failed to load role snapshot: {0}")]
    Roles(#[from] RoleSnapshotStoreError),
    /// Activity register could not be loaded.
    #[error("failed to load activity register: {0}")]
    Activity(#[from] ActivitySnapshotStoreError),
    /// Portal HTTP client could not be built.
    #[error("failed to build portal client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Ports and clocks the bot is assembled from.
pub struct BotComponents {
    /// Deduplication store.
    pub store: Arc<dyn InvoiceStore>,
    /// Role persistence.
    pub snapshots: Arc<dyn RoleSnapshotStore>,
    /// Activity persistence.
    pub activity_store: Arc<dyn ActivitySnapshotStore>,
    /// Portal adapters with their retry policy.
    pub registry: Arc<PortalRegistry>,
    /// QR decoder for photo submissions.
    pub qr_decoder: Arc<dyn QrDecoder>,
    /// Report renderer.
    pub renderer: Arc<dyn ReportRenderer>,
    /// Operator escalation.
    pub alerts: Arc<dyn OperatorAlerts>,
    /// Captured log lines.
    pub logs: Arc<dyn LogSource>,
    /// Wall clock for timestamps and report windows.
    pub clock: Arc<dyn Clock>,
    /// Monotonic clock for rate limiting.
    pub monotonic: Arc<dyn MonotonicClock>,
}

/// Assembled bot.
pub struct Bot {
    /// Command dispatcher shared by inbound transports.
    pub service: Arc<CommandService>,
    /// Rate limiter, exposed so the host can purge expired entries.
    pub limiter: Arc<RateLimiter>,
}

/// Build the service graph, restoring roles and activity from their stores.
///
/// # Errors
///
/// Returns [`BootstrapError::Roles`] or [`BootstrapError::Activity`] when a
/// saved snapshot cannot be read.
pub async fn assemble(
    seed_admin: Option<UserId>,
    components: BotComponents,
) -> Result<Bot, BootstrapError> {
    let BotComponents {
        store,
        snapshots,
        activity_store,
        registry,
        qr_decoder,
        renderer,
        alerts,
        logs,
        clock,
        monotonic,
    } = components;

    let gate = Arc::new(match snapshots.load().await? {
        Some(snapshot) => {
            info!(users = snapshot.assignments.len(), "restored role snapshot");
            AccessControlGate::restore(seed_admin, snapshot)
        }
        None => AccessControlGate::new(seed_admin),
    });
    let activity = Arc::new(match activity_store.load().await? {
        Some(snapshot) => {
            info!(users = snapshot.entries.len(), "restored activity register");
            ActivityTracker::restore(snapshot)
        }
        None => ActivityTracker::new(),
    });
    let limiter = Arc::new(RateLimiter::new(RateLimitIntervals::default(), monotonic));
    let pipeline = Arc::new(SubmissionPipeline::new(
        gate.clone(),
        limiter.clone(),
        registry,
        SubmissionPorts::new(store.clone(), qr_decoder, alerts.clone()),
        clock.clone(),
    ));
    let service = Arc::new(CommandService::new(CommandServiceParts {
        gate,
        limiter: limiter.clone(),
        activity,
        activity_store,
        pipeline,
        aggregator: ReportAggregator::new(store, clock.clone()),
        renderer,
        logs,
        snapshots,
        alerts,
        clock,
    }));
    Ok(Bot { service, limiter })
}

/// Build the bot from settings using the file stores and HTTP portals.
///
/// # Errors
///
/// Returns a [`BootstrapError`] when a store cannot be opened or the HTTP
/// client cannot be built.
pub async fn from_settings(settings: &BotSettings, logs: LogRing) -> Result<Bot, BootstrapError> {
    let data_dir = settings.data_dir();
    let store = JsonlInvoiceStore::open(&data_dir)?;
    let clock: Arc<dyn Clock> = Arc::new(DefaultClock);
    let registry = register_http_portals(
        PortalRegistry::builder(),
        default_endpoints(),
        settings.fetch_timeout(),
    )?
    .retry_policy(settings.retry_policy())
    .build(clock.clone());
    if settings.seed_admin().is_none() {
        warn!("no seed admin configured; roles can only come from a saved snapshot");
    }
    info!(
        data_dir = %data_dir.display(),
        regions = registry.regions().len(),
        "bot components ready"
    );

    assemble(
        settings.seed_admin(),
        BotComponents {
            store: Arc::new(store),
            snapshots: Arc::new(JsonRoleFile::new(&data_dir)),
            activity_store: Arc::new(JsonActivityFile::new(data_dir)),
            registry: Arc::new(registry),
            qr_decoder: Arc::new(UnavailableQrDecoder),
            renderer: Arc::new(TextReportRenderer),
            alerts: Arc::new(TracingOperatorAlerts),
            logs: Arc::new(logs),
            clock,
            monotonic: Arc::new(SystemMonotonicClock),
        },
    )
    .await
}
