//! Role management and report aggregation through the command service.

use chrono::TimeDelta;
use invoice_backend::domain::ports::{DocumentFormat, InvoiceStore};
use invoice_backend::domain::{
    Action, Command, PipelineError, Reply, ReportPeriod, ReportSummary, Role, RoleChange, RoleSet,
};
use invoice_backend::test_support::{SampleDocument, sample_record};
use rstest::rstest;
use rust_decimal_macros::dec;

mod support;

use support::{ADMIN, Harness, MODERATOR, OTHER_MODERATOR, VISITOR, day_after_sample};

async fn harness() -> Harness {
    Harness::with_portal_body(DocumentFormat::Html, SampleDocument::default().html()).await
}

fn summary(reply: Result<Reply, PipelineError>) -> ReportSummary {
    match reply.expect("report") {
        Reply::Report { summary, artifact } => {
            assert!(artifact.is_some(), "fixture renderer always renders");
            summary
        }
        other => panic!("unexpected reply: {other:?}"),
    }
}

fn report(period: ReportPeriod, own_only: bool) -> Command {
    Command::RequestReport { period, own_only }
}

#[rstest]
fn higher_roles_never_lose_capabilities(
    #[values(
        Action::SubmitInvoice,
        Action::RequestReport,
        Action::ViewStats,
        Action::WhoAmI,
        Action::Help,
        Action::GrantRole,
        Action::RevokeRole,
        Action::ViewLogs,
        Action::ViewUserActivity
    )]
    action: Action,
) {
    let user = RoleSet::default().permits(action).is_some();
    let moderator = RoleSet::with(Role::Moderator).permits(action).is_some();
    let admin = RoleSet::with(Role::Admin).permits(action).is_some();
    assert!(!user || moderator, "{action} granted to users but not moderators");
    assert!(!moderator || admin, "{action} granted to moderators but not admins");
}

#[tokio::test]
async fn granting_and_revoking_changes_what_a_user_may_do() {
    let harness = harness().await;
    let before = harness
        .send(VISITOR, report(ReportPeriod::Day, true))
        .await
        .expect_err("users may not request reports");
    assert!(matches!(before, PipelineError::AccessDenied { .. }));

    let grant = Command::GrantRole {
        target: VISITOR,
        role: Role::Moderator,
    };

    let granted = harness.send(ADMIN, grant.clone()).await.expect("grant");
    assert!(matches!(
        granted,
        Reply::RoleChanged {
            change: RoleChange::Applied,
            ..
        }
    ));
    let repeated = harness.send(ADMIN, grant).await.expect("grant again");
    assert!(matches!(
        repeated,
        Reply::RoleChanged {
            change: RoleChange::Unchanged,
            ..
        }
    ));
    harness
        .send(VISITOR, report(ReportPeriod::Day, true))
        .await
        .expect("moderators may request reports");

    harness
        .send(
            ADMIN,
            Command::RevokeRole {
                target: VISITOR,
                role: Role::Moderator,
            },
        )
        .await
        .expect("revoke");
    let denied = harness
        .send(VISITOR, report(ReportPeriod::Week, true))
        .await
        .expect_err("denied after revoke");
    assert!(matches!(denied, PipelineError::AccessDenied { .. }));
}

#[tokio::test]
async fn role_changes_are_persisted() {
    let harness = harness().await;
    let snapshot = harness.snapshots.saved().expect("snapshot saved");
    let moderators: Vec<_> = snapshot
        .assignments
        .iter()
        .filter(|assignment| assignment.roles.contains(Role::Moderator))
        .map(|assignment| assignment.user)
        .collect();
    assert_eq!(moderators, vec![MODERATOR, OTHER_MODERATOR]);
}

#[tokio::test]
async fn moderators_cannot_manage_roles() {
    let harness = harness().await;
    let error = harness
        .send(
            MODERATOR,
            Command::GrantRole {
                target: VISITOR,
                role: Role::Admin,
            },
        )
        .await
        .expect_err("denied");
    assert!(matches!(error, PipelineError::AccessDenied { .. }));
}

#[tokio::test]
async fn seed_admin_keeps_the_admin_role() {
    let harness = harness().await;
    let error = harness
        .send(
            ADMIN,
            Command::RevokeRole {
                target: ADMIN,
                role: Role::Admin,
            },
        )
        .await
        .expect_err("protected");
    assert!(matches!(error, PipelineError::ProtectedRole { .. }));
}

async fn seed_reports(harness: &Harness) {
    let now = day_after_sample();
    let rows = [
        (1, dec!(30), MODERATOR),
        (2, dec!(20), MODERATOR),
        (3, dec!(10), OTHER_MODERATOR),
    ];
    for (days_ago, (number, total, submitter)) in (1..).zip(rows) {
        let record = sample_record(number, now - TimeDelta::days(days_ago), total, submitter);
        harness
            .store
            .put(record.invoice, record.line_items)
            .await
            .expect("seed record");
    }
    let stale = sample_record(4, now - TimeDelta::days(40), dec!(99), MODERATOR);
    harness
        .store
        .put(stale.invoice, stale.line_items)
        .await
        .expect("seed stale record");
}

#[tokio::test]
async fn report_totals_cover_the_window() {
    let harness = harness().await;
    seed_reports(&harness).await;

    let all = summary(harness.send(ADMIN, report(ReportPeriod::Week, false)).await);
    assert_eq!(all.invoice_count, 3);
    assert_eq!(all.submitter_count, 2);
    assert_eq!(all.grand_total, dec!(60));
    assert_eq!(all.by_day.len(), 3);
    assert_eq!(
        all.by_day.iter().map(|row| row.value).sum::<rust_decimal::Decimal>(),
        dec!(60)
    );

    let own = summary(harness.send(MODERATOR, report(ReportPeriod::Week, true)).await);
    assert_eq!(own.invoice_count, 2);
    assert_eq!(own.grand_total, dec!(50));
}

#[tokio::test]
async fn report_requests_are_limited_per_period() {
    let harness = harness().await;
    seed_reports(&harness).await;

    summary(harness.send(MODERATOR, report(ReportPeriod::Week, false)).await);
    let limited = harness
        .send(MODERATOR, report(ReportPeriod::Week, false))
        .await
        .expect_err("limited");
    assert!(matches!(limited, PipelineError::RateLimited { .. }));

    let month = summary(harness.send(MODERATOR, report(ReportPeriod::Month, false)).await);
    assert_eq!(month.invoice_count, 3);
}

#[tokio::test]
async fn stats_count_every_stored_invoice_and_survive_a_restart() {
    let harness = harness().await;
    seed_reports(&harness).await;
    harness
        .send(VISITOR, Command::WhoAmI)
        .await
        .expect("whoami");

    let stats = match harness.send(MODERATOR, Command::ViewStats).await {
        Ok(Reply::Stats { stats }) => stats,
        other => panic!("unexpected reply: {other:?}"),
    };
    assert_eq!(stats.invoices, 4, "stale invoices still count");
    assert_eq!(stats.users, 3);
    assert_eq!(stats.messages, 4);

    let reopened = harness
        .reopen(DocumentFormat::Html, SampleDocument::default().html())
        .await;
    let stats = match reopened.send(MODERATOR, Command::ViewStats).await {
        Ok(Reply::Stats { stats }) => stats,
        other => panic!("unexpected reply: {other:?}"),
    };
    assert_eq!(stats.invoices, 4);
    assert_eq!(stats.users, 3);
    assert_eq!(stats.messages, 7, "counters resume from activity.json");
}
