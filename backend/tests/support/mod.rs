//! Shared harness for end-to-end bot tests.
//!
//! Builds the full service graph over a temporary JSON-lines store and a
//! fixture portal, with clocks the tests control.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use invoice_backend::domain::ports::{
    DocumentFormat, FixtureLogSource, FixtureOperatorAlerts, FixturePortalAdapter,
    FixtureQrDecoder, FixtureReportRenderer, FixtureRoleSnapshotStore, InvoiceStore,
};
use invoice_backend::domain::{
    Command, CommandRequest, PipelineError, PortalRegistry, PortalRegistryRuntime, Region, Reply,
    Role, SubmissionInput, UserId,
};
use invoice_backend::outbound::activity_file::JsonActivityFile;
use invoice_backend::outbound::storage::JsonlInvoiceStore;
use invoice_backend::test_support::{
    ImmediateSleeper, ManualMonotonicClock, MutableClock, NoJitter, temp_data_dir,
};
use invoice_backend::{Bot, BotComponents, assemble};
use tempfile::TempDir;

pub const ADMIN: UserId = UserId::new(1);
pub const MODERATOR: UserId = UserId::new(2);
pub const OTHER_MODERATOR: UserId = UserId::new(3);
pub const VISITOR: UserId = UserId::new(4);

/// Wall-clock instant one day after the sample invoice was emitted.
pub fn day_after_sample() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 10, 6, 12, 0, 0)
        .single()
        .expect("valid time")
}

pub struct Harness {
    pub bot: Bot,
    pub store: Arc<JsonlInvoiceStore>,
    pub snapshots: Arc<FixtureRoleSnapshotStore>,
    pub clock: Arc<MutableClock>,
    pub monotonic: Arc<ManualMonotonicClock>,
    pub data_dir: TempDir,
}

impl Harness {
    /// Bot whose SP portal always serves `body`, with two moderators.
    pub async fn with_portal_body(format: DocumentFormat, body: String) -> Self {
        let data_dir = temp_data_dir();
        Self::build(data_dir, format, body).await
    }

    /// Reopen the same data directory with a fresh service graph.
    pub async fn reopen(self, format: DocumentFormat, body: String) -> Self {
        let Self { data_dir, .. } = self;
        Self::build(data_dir, format, body).await
    }

    async fn build(data_dir: TempDir, format: DocumentFormat, body: String) -> Self {
        let store = Arc::new(JsonlInvoiceStore::open(data_dir.path()).expect("open store"));
        let snapshots = Arc::new(FixtureRoleSnapshotStore::default());
        let clock = Arc::new(MutableClock::new(day_after_sample()));
        let monotonic = Arc::new(ManualMonotonicClock::new());
        let registry = PortalRegistry::builder()
            .register(Arc::new(FixturePortalAdapter::new(
                Region::from_code(35),
                format,
                body,
            )))
            .runtime(PortalRegistryRuntime {
                sleeper: Arc::new(ImmediateSleeper),
                jitter: Arc::new(NoJitter),
            })
            .build(clock.clone());
        let bot = assemble(
            Some(ADMIN),
            BotComponents {
                store: store.clone(),
                snapshots: snapshots.clone(),
                activity_store: Arc::new(JsonActivityFile::new(data_dir.path())),
                registry: Arc::new(registry),
                qr_decoder: Arc::new(FixtureQrDecoder),
                renderer: Arc::new(FixtureReportRenderer),
                alerts: Arc::new(FixtureOperatorAlerts),
                logs: Arc::new(FixtureLogSource),
                clock: clock.clone(),
                monotonic: monotonic.clone(),
            },
        )
        .await
        .expect("assemble bot");

        let harness = Self {
            bot,
            store,
            snapshots,
            clock,
            monotonic,
            data_dir,
        };
        for moderator in [MODERATOR, OTHER_MODERATOR] {
            harness
                .send(
                    ADMIN,
                    Command::GrantRole {
                        target: moderator,
                        role: Role::Moderator,
                    },
                )
                .await
                .expect("grant moderator");
        }
        harness
    }

    pub async fn send(&self, user: UserId, command: Command) -> Result<Reply, PipelineError> {
        self.bot
            .service
            .handle(CommandRequest {
                user,
                display_name: None,
                command,
            })
            .await
    }

    pub async fn submit(&self, user: UserId, url: &str) -> Result<Reply, PipelineError> {
        self.send(
            user,
            Command::SubmitInvoice(SubmissionInput::Reference(url.to_owned())),
        )
        .await
    }

    pub async fn stored_count(&self) -> usize {
        self.store.count().await.expect("count")
    }
}
