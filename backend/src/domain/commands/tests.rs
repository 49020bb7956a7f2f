//! Dispatcher coverage: authorisation, role persistence and replies.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use mockall::predicate::eq;
use rstest::{fixture, rstest};

use super::{Command, CommandRequest, CommandService, CommandServiceParts, Reply, RoleCount};
use crate::domain::access::{AccessControlGate, RoleChange};
use crate::domain::activity::ActivityTracker;
use crate::domain::error::PipelineError;
use crate::domain::pipeline::{SubmissionInput, SubmissionPipeline, SubmissionPorts};
use crate::domain::portal_registry::{PortalRegistry, PortalRegistryRuntime};
use crate::domain::ports::{
    ActivitySnapshotStore, ActivitySnapshotStoreError, DocumentFormat,
    FixtureActivitySnapshotStore, FixtureInvoiceStore, FixtureOperatorAlerts,
    FixturePortalAdapter, FixtureQrDecoder, FixtureReportRenderer, FixtureRoleSnapshotStore,
    LogSource, MockActivitySnapshotStore, MockLogSource,
};
use crate::domain::rate_limit::{RateLimitIntervals, RateLimiter};
use crate::domain::reference::Region;
use crate::domain::report::{ReportAggregator, ReportPeriod};
use crate::domain::user::{Action, Role, UserId};
use crate::test_support::{
    ImmediateSleeper, ManualMonotonicClock, MutableClock, NoJitter, SampleDocument, sample_url,
};

const ADMIN: UserId = UserId::new(100);
const ALICE: UserId = UserId::new(200);

struct Harness {
    service: CommandService,
    snapshots: Arc<FixtureRoleSnapshotStore>,
    activity: Arc<FixtureActivitySnapshotStore>,
}

fn harness_with_logs(logs: Arc<dyn LogSource>) -> Harness {
    let activity = Arc::new(FixtureActivitySnapshotStore::default());
    let (service, snapshots) = service_with(logs, activity.clone());
    Harness {
        service,
        snapshots,
        activity,
    }
}

fn service_with(
    logs: Arc<dyn LogSource>,
    activity_store: Arc<dyn ActivitySnapshotStore>,
) -> (CommandService, Arc<FixtureRoleSnapshotStore>) {
    let now = Utc
        .with_ymd_and_hms(2026, 10, 18, 12, 0, 0)
        .single()
        .expect("valid time");
    let clock = Arc::new(MutableClock::new(now));
    let gate = Arc::new(AccessControlGate::new(Some(ADMIN)));
    let limiter = Arc::new(RateLimiter::new(
        RateLimitIntervals::default(),
        Arc::new(ManualMonotonicClock::new()),
    ));
    let registry = PortalRegistry::builder()
        .register(Arc::new(FixturePortalAdapter::new(
            Region::from_code(35),
            DocumentFormat::Html,
            SampleDocument::default().html(),
        )))
        .runtime(PortalRegistryRuntime {
            sleeper: Arc::new(ImmediateSleeper),
            jitter: Arc::new(NoJitter),
        })
        .build(clock.clone());
    let pipeline = SubmissionPipeline::new(
        gate.clone(),
        limiter.clone(),
        Arc::new(registry),
        SubmissionPorts::new(
            Arc::new(FixtureInvoiceStore),
            Arc::new(FixtureQrDecoder),
            Arc::new(FixtureOperatorAlerts),
        ),
        clock.clone(),
    );
    let snapshots = Arc::new(FixtureRoleSnapshotStore::default());
    let service = CommandService::new(CommandServiceParts {
        gate,
        limiter,
        activity: Arc::new(ActivityTracker::new()),
        activity_store,
        pipeline: Arc::new(pipeline),
        aggregator: ReportAggregator::new(Arc::new(FixtureInvoiceStore), clock.clone()),
        renderer: Arc::new(FixtureReportRenderer),
        logs,
        snapshots: snapshots.clone(),
        alerts: Arc::new(FixtureOperatorAlerts),
        clock,
    });
    (service, snapshots)
}

#[fixture]
fn harness() -> Harness {
    harness_with_logs(Arc::new(MockLogSource::new()))
}

fn request(user: UserId, command: Command) -> CommandRequest {
    CommandRequest {
        user,
        display_name: None,
        command,
    }
}

fn week_report() -> Command {
    Command::RequestReport {
        period: ReportPeriod::Week,
        own_only: false,
    }
}

#[rstest]
#[tokio::test]
async fn granting_moderator_unlocks_reports(harness: Harness) {
    let denied = harness
        .service
        .handle(request(ALICE, week_report()))
        .await
        .expect_err("plain users cannot request reports");
    assert_eq!(
        denied,
        PipelineError::AccessDenied {
            user: ALICE,
            action: Action::RequestReport
        }
    );

    let granted = harness
        .service
        .handle(request(
            ADMIN,
            Command::GrantRole {
                target: ALICE,
                role: Role::Moderator,
            },
        ))
        .await
        .expect("admin grants");
    assert!(matches!(
        granted,
        Reply::RoleChanged {
            change: RoleChange::Applied,
            ..
        }
    ));

    let report = harness
        .service
        .handle(request(ALICE, week_report()))
        .await
        .expect("moderator may request reports");
    assert!(matches!(report, Reply::Report { artifact: Some(_), .. }));

    let saved = harness.snapshots.saved().expect("snapshot persisted");
    assert!(
        saved
            .assignments
            .iter()
            .any(|assignment| assignment.user == ALICE
                && assignment.roles.contains(Role::Moderator))
    );
}

#[rstest]
#[tokio::test]
async fn repeated_grant_reports_unchanged(harness: Harness) {
    let grant = || {
        request(
            ADMIN,
            Command::GrantRole {
                target: ALICE,
                role: Role::Moderator,
            },
        )
    };
    harness.service.handle(grant()).await.expect("first grant");
    let second = harness.service.handle(grant()).await.expect("second grant");
    assert!(matches!(
        second,
        Reply::RoleChanged {
            change: RoleChange::Unchanged,
            ..
        }
    ));
}

#[rstest]
#[tokio::test]
async fn seed_admin_keeps_admin(harness: Harness) {
    let error = harness
        .service
        .handle(request(
            ADMIN,
            Command::RevokeRole {
                target: ADMIN,
                role: Role::Admin,
            },
        ))
        .await
        .expect_err("protected");
    assert!(matches!(error, PipelineError::ProtectedRole { .. }));
}

#[rstest]
#[tokio::test]
async fn non_admins_cannot_grant(harness: Harness) {
    let error = harness
        .service
        .handle(request(
            ALICE,
            Command::GrantRole {
                target: ALICE,
                role: Role::Admin,
            },
        ))
        .await
        .expect_err("denied");
    assert!(matches!(error, PipelineError::AccessDenied { .. }));
    assert!(harness.snapshots.saved().is_none());
}

#[rstest]
#[case(None, 20)]
#[case(Some(5), 5)]
#[case(Some(0), 1)]
#[case(Some(500), 100)]
#[tokio::test]
async fn view_logs_clamps_the_line_count(#[case] requested: Option<usize>, #[case] expected: usize) {
    let mut logs = MockLogSource::new();
    logs.expect_recent()
        .with(eq(expected))
        .times(1)
        .returning(|_| vec!["line".to_owned()]);
    let harness = harness_with_logs(Arc::new(logs));

    let reply = harness
        .service
        .handle(request(ADMIN, Command::ViewLogs { lines: requested }))
        .await
        .expect("logs");
    assert_eq!(
        reply,
        Reply::Logs {
            lines: vec!["line".to_owned()]
        }
    );
}

#[rstest]
#[tokio::test]
async fn help_lists_only_permitted_commands(harness: Harness) {
    let reply = harness
        .service
        .handle(request(ALICE, Command::Help))
        .await
        .expect("help");
    let Reply::Help { commands } = reply else {
        panic!("expected help reply");
    };
    let names: Vec<&str> = commands.iter().map(|help| help.command).collect();
    assert_eq!(names, ["whoami", "help"]);
}

#[rstest]
#[tokio::test]
async fn activity_is_recorded_for_every_command(harness: Harness) {
    harness
        .service
        .handle(CommandRequest {
            user: ALICE,
            display_name: Some("alice".to_owned()),
            command: Command::WhoAmI,
        })
        .await
        .expect("whoami");
    let reply = harness
        .service
        .handle(request(ADMIN, Command::ViewUserActivity))
        .await
        .expect("activity");
    let Reply::UserActivity { entries } = reply else {
        panic!("expected activity reply");
    };
    assert_eq!(entries.len(), 2);
    let alice = entries
        .iter()
        .find(|entry| entry.user == ALICE)
        .expect("alice tracked");
    assert_eq!(alice.display_name.as_deref(), Some("alice"));
    assert_eq!(alice.role, Role::User);
}

#[rstest]
#[tokio::test]
async fn report_cooldown_is_per_period(harness: Harness) {
    harness
        .service
        .handle(request(ADMIN, week_report()))
        .await
        .expect("first week report");
    let limited = harness
        .service
        .handle(request(ADMIN, week_report()))
        .await
        .expect_err("second week report");
    assert_eq!(
        limited,
        PipelineError::RateLimited {
            retry_after_secs: 3600
        }
    );
    harness
        .service
        .handle(request(
            ADMIN,
            Command::RequestReport {
                period: ReportPeriod::Month,
                own_only: true,
            },
        ))
        .await
        .expect("month report has its own cooldown");
}

#[rstest]
#[tokio::test]
async fn submissions_flow_through_the_pipeline(harness: Harness) {
    let reply = harness
        .service
        .handle(request(
            ADMIN,
            Command::SubmitInvoice(SubmissionInput::Reference(sample_url())),
        ))
        .await
        .expect("accepted");
    let Reply::InvoiceAccepted { acknowledgment } = reply else {
        panic!("expected acknowledgment");
    };
    assert!(!acknowledgment.duplicate);
    assert_eq!(acknowledgment.invoice.number, 1234);
}

#[rstest]
#[tokio::test]
async fn whoami_reports_roles_and_capabilities(harness: Harness) {
    let reply = harness
        .service
        .handle(request(ADMIN, Command::WhoAmI))
        .await
        .expect("whoami");
    let Reply::WhoAmI {
        user,
        roles,
        capabilities,
    } = reply
    else {
        panic!("expected whoami reply");
    };
    assert_eq!(user, ADMIN);
    assert!(roles.contains(&Role::Admin));
    assert_eq!(capabilities.len(), Action::ALL.len());
}

#[rstest]
#[tokio::test]
async fn every_command_saves_the_activity_register(harness: Harness) {
    harness
        .service
        .handle(request(ALICE, Command::Help))
        .await
        .expect("help");
    let saved = harness.activity.saved().expect("register saved");
    assert_eq!(saved.entries.len(), 1);
    assert_eq!(saved.entries[0].user, ALICE);
    assert_eq!(saved.entries[0].message_count, 1);
}

#[rstest]
#[tokio::test]
async fn role_changes_refresh_the_saved_activity_role(harness: Harness) {
    harness
        .service
        .handle(request(ALICE, Command::WhoAmI))
        .await
        .expect("whoami");
    harness
        .service
        .handle(request(
            ADMIN,
            Command::GrantRole {
                target: ALICE,
                role: Role::Moderator,
            },
        ))
        .await
        .expect("grant");
    let saved = harness.activity.saved().expect("register saved");
    let alice = saved
        .entries
        .iter()
        .find(|entry| entry.user == ALICE)
        .expect("alice tracked");
    assert_eq!(alice.role, Role::Moderator);
}

#[rstest]
#[tokio::test]
async fn stats_count_users_messages_and_roles(harness: Harness) {
    for _ in 0..2 {
        harness
            .service
            .handle(request(ALICE, Command::WhoAmI))
            .await
            .expect("whoami");
    }
    let denied = harness
        .service
        .handle(request(ALICE, Command::ViewStats))
        .await
        .expect_err("plain users cannot view stats");
    assert!(matches!(denied, PipelineError::AccessDenied { .. }));

    let reply = harness
        .service
        .handle(request(ADMIN, Command::ViewStats))
        .await
        .expect("stats");
    let Reply::Stats { stats } = reply else {
        panic!("expected stats reply");
    };
    assert_eq!(stats.users, 2);
    assert_eq!(stats.messages, 4);
    assert_eq!(stats.invoices, 0);
    assert_eq!(
        stats.roles,
        [
            RoleCount {
                role: Role::Admin,
                users: 1
            },
            RoleCount {
                role: Role::Moderator,
                users: 0
            },
            RoleCount {
                role: Role::User,
                users: 1
            },
        ]
    );
}

#[tokio::test]
async fn failed_activity_save_does_not_fail_the_command() {
    let mut store = MockActivitySnapshotStore::new();
    store
        .expect_save()
        .times(1)
        .returning(|_| Err(ActivitySnapshotStoreError::io("disk full")));
    let (service, _) = service_with(Arc::new(MockLogSource::new()), Arc::new(store));

    let reply = service
        .handle(request(ALICE, Command::WhoAmI))
        .await
        .expect("whoami still answers");
    assert!(matches!(reply, Reply::WhoAmI { user: ALICE, .. }));
}
