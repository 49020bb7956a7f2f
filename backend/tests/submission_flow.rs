//! End-to-end submission behaviour over the JSON-lines store.

use std::time::Duration;

use invoice_backend::domain::ports::{DocumentFormat, InvoiceStore};
use invoice_backend::domain::{Acknowledgment, PipelineError, Reply};
use invoice_backend::outbound::storage::INVOICES_FILENAME;
use invoice_backend::test_support::cap_fs::read_file_to_string;
use invoice_backend::test_support::{SampleDocument, sample_url};
use rstest::rstest;

mod support;

use support::{ADMIN, Harness, MODERATOR, OTHER_MODERATOR, VISITOR};

const SUBMIT_INTERVAL: Duration = Duration::from_secs(50);

async fn html_harness() -> Harness {
    Harness::with_portal_body(DocumentFormat::Html, SampleDocument::default().html()).await
}

fn acknowledgment(reply: Result<Reply, PipelineError>) -> Acknowledgment {
    match reply.expect("submission accepted") {
        Reply::InvoiceAccepted { acknowledgment } => acknowledgment,
        other => panic!("unexpected reply: {other:?}"),
    }
}

fn stored_lines(harness: &Harness) -> usize {
    read_file_to_string(&harness.data_dir.path().join(INVOICES_FILENAME))
        .expect("read invoices file")
        .lines()
        .count()
}

#[tokio::test]
async fn repeated_submissions_store_one_invoice() {
    let harness = html_harness().await;
    let url = sample_url();

    let mut acknowledgments = Vec::new();
    for _ in 0..5 {
        acknowledgments.push(acknowledgment(harness.submit(MODERATOR, &url).await));
        harness.monotonic.advance(SUBMIT_INTERVAL);
    }

    let duplicates: Vec<bool> = acknowledgments.iter().map(|ack| ack.duplicate).collect();
    assert_eq!(duplicates, vec![false, true, true, true, true]);
    let first = &acknowledgments[0].fingerprint;
    assert!(acknowledgments.iter().all(|ack| &ack.fingerprint == first));
    assert_eq!(harness.stored_count().await, 1);
    assert_eq!(stored_lines(&harness), 1);
}

#[tokio::test]
async fn concurrent_submissions_of_one_invoice_store_it_once() {
    let harness = html_harness().await;
    let url = sample_url();

    let (first, second, third) = tokio::join!(
        harness.submit(MODERATOR, &url),
        harness.submit(OTHER_MODERATOR, &url),
        harness.submit(ADMIN, &url),
    );
    let acks = [
        acknowledgment(first),
        acknowledgment(second),
        acknowledgment(third),
    ];

    assert_eq!(acks.iter().filter(|ack| !ack.duplicate).count(), 1);
    assert_eq!(harness.stored_count().await, 1);
    assert_eq!(stored_lines(&harness), 1);
}

#[rstest]
#[case(Duration::from_secs(10), Some(40))]
#[case(Duration::from_secs(49), Some(1))]
#[case(Duration::from_secs(50), None)]
#[tokio::test]
async fn second_submission_respects_the_interval(
    #[case] wait: Duration,
    #[case] retry_after_secs: Option<u64>,
) {
    let harness = html_harness().await;
    let url = sample_url();
    acknowledgment(harness.submit(MODERATOR, &url).await);

    harness.monotonic.advance(wait);
    let second = harness.submit(MODERATOR, &url).await;

    match retry_after_secs {
        Some(retry_after_secs) => {
            assert_eq!(second, Err(PipelineError::RateLimited { retry_after_secs }));
        }
        None => assert!(acknowledgment(second).duplicate),
    }
}

#[tokio::test]
async fn rate_limit_is_per_user() {
    let harness = html_harness().await;
    let url = sample_url();
    acknowledgment(harness.submit(MODERATOR, &url).await);
    assert!(acknowledgment(harness.submit(OTHER_MODERATOR, &url).await).duplicate);
}

#[tokio::test]
async fn missing_total_fails_parsing_and_stores_nothing() {
    let document = SampleDocument {
        total: None,
        ..SampleDocument::default()
    };
    let harness = Harness::with_portal_body(DocumentFormat::Html, document.html()).await;

    let error = harness
        .submit(MODERATOR, &sample_url())
        .await
        .expect_err("parse failure");

    assert_eq!(error, PipelineError::parse("total"));
    assert_eq!(harness.stored_count().await, 0);
}

#[tokio::test]
async fn visitors_cannot_submit() {
    let harness = html_harness().await;
    let error = harness
        .submit(VISITOR, &sample_url())
        .await
        .expect_err("denied");

    assert!(matches!(error, PipelineError::AccessDenied { .. }));
    assert_eq!(harness.stored_count().await, 0);
}

#[tokio::test]
async fn xml_and_html_renderings_share_a_fingerprint() {
    let html = html_harness().await;
    let xml =
        Harness::with_portal_body(DocumentFormat::Xml, SampleDocument::default().xml()).await;

    let from_html = acknowledgment(html.submit(MODERATOR, &sample_url()).await);
    let from_xml = acknowledgment(xml.submit(MODERATOR, &sample_url()).await);

    assert_eq!(from_html.fingerprint, from_xml.fingerprint);
    assert_eq!(from_html.invoice.total, from_xml.invoice.total);
}

#[tokio::test]
async fn stored_invoices_survive_a_restart() {
    let harness = html_harness().await;
    let first = acknowledgment(harness.submit(MODERATOR, &sample_url()).await);

    let reopened = harness
        .reopen(DocumentFormat::Html, SampleDocument::default().html())
        .await;
    let again = acknowledgment(reopened.submit(OTHER_MODERATOR, &sample_url()).await);

    assert!(again.duplicate);
    assert_eq!(again.fingerprint, first.fingerprint);
    assert_eq!(again.invoice.submitted_by, MODERATOR);
    assert_eq!(reopened.store.count().await.expect("count"), 1);
}
