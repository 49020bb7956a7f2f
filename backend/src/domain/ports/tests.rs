//! Behaviour of the fixture port implementations.

use super::*;
use crate::domain::report::{ReportPeriod, ReportScope, summarize};
use crate::domain::user::{Role, RoleSet, UserId};
use crate::domain::{ActivityTracker, RoleAssignment, RoleSnapshot};
use chrono::Utc;
use rstest::rstest;

#[tokio::test]
async fn fixture_snapshot_store_returns_the_last_save() {
    let store = FixtureRoleSnapshotStore::default();
    assert_eq!(store.load().await.expect("load"), None);

    let snapshot = RoleSnapshot {
        assignments: vec![RoleAssignment {
            user: UserId::new(7),
            roles: RoleSet::with(Role::Moderator),
        }],
    };
    store.save(&snapshot).await.expect("save");
    assert_eq!(store.load().await.expect("load"), Some(snapshot));
}

#[tokio::test]
async fn fixture_activity_store_returns_the_last_save() {
    let store = FixtureActivitySnapshotStore::default();
    assert_eq!(store.load().await.expect("load"), None);

    let tracker = ActivityTracker::new();
    tracker.record(UserId::new(7), Some("Dora"), Role::User, Utc::now());
    let snapshot = tracker.snapshot();
    store.save(&snapshot).await.expect("save");
    assert_eq!(store.load().await.expect("load"), Some(snapshot));
}

#[rstest]
#[case(b"  https://portal.example/qrcode?p=1  ".as_slice(), Ok("https://portal.example/qrcode?p=1"))]
#[case(b"   ".as_slice(), Err(QrDecodeError::not_found()))]
#[tokio::test]
async fn fixture_decoder_reads_utf8_payloads(
    #[case] photo: &[u8],
    #[case] expected: Result<&str, QrDecodeError>,
) {
    let decoded = FixtureQrDecoder.decode(photo).await;
    assert_eq!(decoded, expected.map(str::to_owned));
}

#[tokio::test]
async fn fixture_decoder_rejects_binary_payloads() {
    let error = FixtureQrDecoder
        .decode(&[0xff, 0xd8, 0xff])
        .await
        .expect_err("not utf-8");
    assert!(matches!(error, QrDecodeError::Decoder { .. }));
}

#[tokio::test]
async fn fixture_renderer_emits_json() {
    let summary = summarize(
        &RecordSet::default(),
        ReportPeriod::Day,
        ReportScope::All,
        Utc::now(),
    );
    let rendered = FixtureReportRenderer
        .render(&summary)
        .await
        .expect("rendered");
    assert_eq!(rendered.media_type, "application/json");
    let value: serde_json::Value = serde_json::from_slice(&rendered.bytes).expect("json");
    assert_eq!(value["period"], "day");
    assert_eq!(value["invoice_count"], 0);
}
