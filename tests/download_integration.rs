//! Integration tests for the download pipeline.
//!
//! These tests verify the fetch-sniff-write flow against mock HTTP servers.

use std::path::Path;
use std::time::Duration;

use harvester_core::download::{PART_SUFFIX, file_name_for};
use harvester_core::render::SessionCookie;
use harvester_core::{
    DownloadPipeline, DownloadStatus, FailureReason, FetchSession, NullSink, Record, RecordKey,
    RecordSink, RetryPolicy, SkipReason, SqliteSink,
};
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PDF_BODY: &[u8] = b"%PDF-1.7\n1 0 obj\n<< /Type /Catalog >>\nendobj\n";
const CAJ_BODY: &[u8] = b"CAJ\x00\x01\x02 binary payload without a pdf signature";

fn record(position: u32, title: &str, reference: &str) -> Record {
    Record::new(
        RecordKey { page: 1, position },
        title,
        "Li；Wang",
        "2024-03-01",
        Some(reference),
    )
    .expect("record has a title")
}

fn session_for(server: &MockServer, cookies: &[SessionCookie], user_agent: Option<&str>) -> FetchSession {
    let origin = Url::parse(&server.uri()).expect("mock server uri");
    FetchSession::new(cookies, &origin, user_agent, Duration::from_secs(5))
        .expect("client builds")
}

fn pipeline(server: &MockServer, dir: &Path) -> DownloadPipeline {
    let referer = format!("{}/kns8/defaultresult/index", server.uri());
    DownloadPipeline::new(session_for(server, &[], None), dir, Some(referer.as_str()))
        .with_retry_policy(RetryPolicy::fixed(2, Duration::ZERO))
}

async fn serve(server: &MockServer, route: &str, status: u16, body: &[u8]) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status).set_body_bytes(body.to_vec()))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_pdf_signature_saved_with_pdf_extension() {
    let server = MockServer::start().await;
    serve(&server, "/dl/1", 200, PDF_BODY).await;
    let dir = TempDir::new().expect("failed to create temp dir");

    let record = record(1, "Graph Neural Networks", &format!("{}/dl/1", server.uri()));
    let outcome = pipeline(&server, dir.path()).fetch(&record).await;

    assert_eq!(outcome.status, DownloadStatus::Success);
    assert_eq!(
        outcome.local_file_name.as_deref(),
        Some("Graph Neural Networks.pdf")
    );
    let saved = std::fs::read(dir.path().join("Graph Neural Networks.pdf")).expect("file exists");
    assert_eq!(saved, PDF_BODY);
}

#[tokio::test]
async fn test_other_binary_content_defaults_to_caj() {
    let server = MockServer::start().await;
    serve(&server, "/dl/2", 200, CAJ_BODY).await;
    let dir = TempDir::new().expect("failed to create temp dir");

    let record = record(1, "Thesis: Part 1/2", &format!("{}/dl/2", server.uri()));
    let outcome = pipeline(&server, dir.path()).fetch(&record).await;

    assert_eq!(outcome.status, DownloadStatus::Success);
    assert_eq!(outcome.local_file_name.as_deref(), Some("Thesis_ Part 1_2.caj"));
    assert!(dir.path().join("Thesis_ Part 1_2.caj").exists());
}

#[tokio::test]
async fn test_large_body_is_streamed_completely() {
    let server = MockServer::start().await;
    let mut body = b"%PDF-1.4\n".to_vec();
    body.extend(std::iter::repeat_n(b'x', 64 * 1024));
    serve(&server, "/dl/big", 200, &body).await;
    let dir = TempDir::new().expect("failed to create temp dir");

    let record = record(1, "Big", &format!("{}/dl/big", server.uri()));
    let outcome = pipeline(&server, dir.path()).fetch(&record).await;

    assert!(outcome.is_success());
    let saved = std::fs::read(dir.path().join("Big.pdf")).expect("file exists");
    assert_eq!(saved.len(), body.len());
    assert!(!dir.path().join(format!("Big.pdf{PART_SUFFIX}")).exists());
}

#[tokio::test]
async fn test_error_page_marker_is_not_written() {
    let server = MockServer::start().await;
    let page = "<!DOCTYPE html><html><body>来源应用不正确</body></html>";
    serve(&server, "/dl/3", 200, page.as_bytes()).await;
    let dir = TempDir::new().expect("failed to create temp dir");

    let record = record(1, "Blocked", &format!("{}/dl/3", server.uri()));
    let outcome = pipeline(&server, dir.path()).fetch(&record).await;

    assert_eq!(outcome.status, DownloadStatus::Failed(FailureReason::ErrorPage));
    assert!(outcome.local_file_name.is_none());
    assert_eq!(std::fs::read_dir(dir.path()).expect("dir readable").count(), 0);
}

#[tokio::test]
async fn test_html_body_is_treated_as_error_page() {
    let server = MockServer::start().await;
    serve(&server, "/dl/4", 200, b"<html><head><title>Login</title></head></html>").await;
    let dir = TempDir::new().expect("failed to create temp dir");

    let record = record(1, "Login Wall", &format!("{}/dl/4", server.uri()));
    let outcome = pipeline(&server, dir.path()).fetch(&record).await;

    assert_eq!(outcome.status, DownloadStatus::Failed(FailureReason::ErrorPage));
    assert!(!dir.path().join("Login Wall.caj").exists());
}

#[tokio::test]
async fn test_http_404_is_reported_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/dl/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    let dir = TempDir::new().expect("failed to create temp dir");

    let record = record(1, "Missing", &format!("{}/dl/missing", server.uri()));
    let outcome = pipeline(&server, dir.path()).fetch(&record).await;

    assert_eq!(outcome.status, DownloadStatus::Failed(FailureReason::HttpStatus(404)));
}

#[tokio::test]
async fn test_server_error_is_retried_then_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/dl/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;
    let dir = TempDir::new().expect("failed to create temp dir");

    let record = record(1, "Flaky", &format!("{}/dl/flaky", server.uri()));
    let outcome = pipeline(&server, dir.path()).fetch(&record).await;

    assert_eq!(outcome.status, DownloadStatus::Failed(FailureReason::HttpStatus(503)));
}

#[tokio::test]
async fn test_empty_body_fails() {
    let server = MockServer::start().await;
    serve(&server, "/dl/empty", 200, b"").await;
    let dir = TempDir::new().expect("failed to create temp dir");

    let record = record(1, "Empty", &format!("{}/dl/empty", server.uri()));
    let outcome = pipeline(&server, dir.path()).fetch(&record).await;

    assert_eq!(outcome.status, DownloadStatus::Failed(FailureReason::EmptyBody));
    assert_eq!(std::fs::read_dir(dir.path()).expect("dir readable").count(), 0);
}

#[tokio::test]
async fn test_existing_file_is_skipped_and_left_untouched() {
    let server = MockServer::start().await;
    serve(&server, "/dl/5", 200, PDF_BODY).await;
    let dir = TempDir::new().expect("failed to create temp dir");
    let existing = dir.path().join("Already Here.pdf");
    std::fs::write(&existing, b"%PDF-old").expect("seed file");

    let record = record(1, "Already Here", &format!("{}/dl/5", server.uri()));
    let outcome = pipeline(&server, dir.path()).fetch(&record).await;

    assert_eq!(
        outcome.status,
        DownloadStatus::Skipped(SkipReason::AlreadyExists)
    );
    assert!(outcome.local_file_name.is_none());
    assert_eq!(std::fs::read(&existing).expect("file exists"), b"%PDF-old");
}

#[tokio::test]
async fn test_second_run_skips_everything() {
    let server = MockServer::start().await;
    serve(&server, "/dl/a", 200, PDF_BODY).await;
    serve(&server, "/dl/b", 200, CAJ_BODY).await;
    let dir = TempDir::new().expect("failed to create temp dir");
    let records = vec![
        record(1, "Alpha", &format!("{}/dl/a", server.uri())),
        record(2, "Beta", &format!("{}/dl/b", server.uri())),
    ];
    let pipeline = pipeline(&server, dir.path());

    let (_, first) = pipeline.fetch_all(&records, &NullSink, |_| {}).await;
    assert_eq!(first.succeeded, 2);

    let (outcomes, second) = pipeline.fetch_all(&records, &NullSink, |_| {}).await;
    assert_eq!(second.succeeded, 0);
    assert_eq!(second.skipped, 2);
    assert!(outcomes.iter().all(|o| o.local_file_name.is_none()));
    assert_eq!(second.to_string(), "0 succeeded, 2 skipped, 0 failed");
}

#[tokio::test]
async fn test_requests_carry_referer_user_agent_and_cookies() {
    let server = MockServer::start().await;
    let referer = format!("{}/kns8/defaultresult/index", server.uri());
    Mock::given(method("GET"))
        .and(path("/dl/6"))
        .and(header("referer", referer.as_str()))
        .and(header("user-agent", "Mozilla/5.0 (Test Browser)"))
        .and(header("cookie", "SID=abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PDF_BODY.to_vec()))
        .expect(1)
        .mount(&server)
        .await;
    let dir = TempDir::new().expect("failed to create temp dir");

    let cookies = [SessionCookie::new("SID", "abc123")];
    let session = session_for(&server, &cookies, Some("Mozilla/5.0 (Test Browser)"));
    assert_eq!(session.cookie_count(), 1);
    let pipeline = DownloadPipeline::new(session, dir.path(), Some(referer.as_str()));

    let record = record(1, "With Identity", &format!("{}/dl/6", server.uri()));
    let outcome = pipeline.fetch(&record).await;
    assert_eq!(outcome.status, DownloadStatus::Success);
}

#[tokio::test]
async fn test_relative_reference_resolves_against_listing() {
    let server = MockServer::start().await;
    serve(&server, "/kns8/download", 200, PDF_BODY).await;
    let dir = TempDir::new().expect("failed to create temp dir");

    let record = record(1, "Relative", "/kns8/download?id=7");
    let outcome = pipeline(&server, dir.path()).fetch(&record).await;

    assert_eq!(outcome.status, DownloadStatus::Success);
    assert!(dir.path().join("Relative.pdf").exists());
}

#[tokio::test]
async fn test_successful_files_are_associated_with_their_rows() {
    let server = MockServer::start().await;
    serve(&server, "/dl/ok", 200, PDF_BODY).await;
    serve(&server, "/dl/gone", 404, b"").await;
    let dir = TempDir::new().expect("failed to create temp dir");

    let sink = SqliteSink::in_memory().await.expect("sink opens");
    let ok = record(1, "Kept", &format!("{}/dl/ok", server.uri()));
    let gone = record(2, "Lost", &format!("{}/dl/gone", server.uri()));
    sink.bulk_insert(&[ok.clone(), gone.clone()])
        .await
        .expect("insert");

    let mut seen = Vec::new();
    let (_, summary) = pipeline(&server, dir.path())
        .fetch_all(&[ok.clone(), gone.clone()], &sink, |outcome| {
            seen.push(outcome.record.key());
        })
        .await;

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(seen, vec![ok.key(), gone.key()]);
    assert_eq!(
        sink.file_name(ok.key()).await.expect("query"),
        Some(file_name_for("Kept", harvester_core::download::ArtifactKind::Pdf))
    );
    assert_eq!(sink.file_name(gone.key()).await.expect("query"), None);
}

#[tokio::test]
async fn test_write_failure_removes_partial_file() {
    let server = MockServer::start().await;
    serve(&server, "/dl/w", 200, PDF_BODY).await;
    let dir = TempDir::new().expect("failed to create temp dir");
    // a directory squatting on the part path makes the write fail
    let blocker = dir.path().join(format!("Unwritable.pdf{PART_SUFFIX}"));
    std::fs::create_dir(&blocker).expect("create blocker");

    let record = record(1, "Unwritable", &format!("{}/dl/w", server.uri()));
    let outcome = pipeline(&server, dir.path()).fetch(&record).await;

    assert!(matches!(
        outcome.status,
        DownloadStatus::Failed(FailureReason::WriteError(_))
    ));
    assert!(outcome.local_file_name.is_none());
    assert!(!dir.path().join("Unwritable.pdf").exists());
}
