//! Integration tests for a complete run against an in-memory browser.
//!
//! Listing pages live in a [`MemoryBrowser`] under the mock server's origin,
//! so the artifact requests made after the traversal hit the mock server with
//! the browser's cookies.

use harvester_core::render::SessionCookie;
use harvester_core::render::memory::{Element, MemoryBrowser, MemoryPage, el};
use harvester_core::{
    HarvestRun, NullSink, Pacing, RecordKey, RunOptions, SearchForm, SqliteSink, StopReason,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const HOME: &str = "https://www.example.org/";
const PDF_BODY: &[u8] = b"%PDF-1.5\nfixture\n";

struct Site {
    listing: String,
    page_two: String,
}

impl Site {
    fn on(server: &MockServer) -> Self {
        Self {
            listing: format!("{}/kns8/defaultresult/index", server.uri()),
            page_two: format!("{}/kns8/defaultresult/index?page=2", server.uri()),
        }
    }
}

fn row(title: &str, download: &str) -> Element {
    el("tr").children([
        el("td").child(el("a").class("fz14").text(title)),
        el("td")
            .class("author")
            .child(el("a").class("KnowledgeNetLink").text("Zhao")),
        el("td").class("date").text("2024-05-06"),
        el("td").class("operat").child(
            el("a")
                .class("downloadlink")
                .class("icon-download")
                .attr("href", download),
        ),
    ])
}

fn listing(url: &str, titles: &[&str], next: Option<&str>) -> MemoryPage {
    let rows = titles
        .iter()
        .enumerate()
        .map(|(i, title)| row(title, &format!("/dl/{}-{i}", title.replace(' ', "-"))));
    let mut root = el("div").child(el("table").class("result").children(rows));
    root = match next {
        Some(next_url) => root.child(el("a").id("PageNext").link(next_url)),
        None => root.child(el("a").id("PageNext").attr("disabled", "disabled")),
    };
    MemoryPage::new(url, root)
}

fn home(listing_url: &str) -> MemoryPage {
    MemoryPage::new(
        HOME,
        el("div").children([
            el("input").id("txt_SearchText"),
            el("button").class("search-btn").link(listing_url),
        ]),
    )
}

fn options(dir: &TempDir, target: usize) -> RunOptions {
    let mut options = RunOptions::new("graph", target);
    options.pacing = Pacing::immediate();
    options.search_form = SearchForm::default().with_home_url(HOME);
    options.output_dir = dir.path().to_path_buf();
    options
}

async fn serve_pdfs(server: &MockServer, expected: u64) {
    Mock::given(method("GET"))
        .and(path_regex(r"^/dl/.+$"))
        .and(header("cookie", "SID=session-1"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PDF_BODY.to_vec()))
        .expect(expected)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_run_harvests_persists_and_downloads() {
    let server = MockServer::start().await;
    serve_pdfs(&server, 3).await;
    let site = Site::on(&server);
    let dir = TempDir::new().expect("failed to create temp dir");

    let browser = MemoryBrowser::new()
        .with_cookie(SessionCookie::new("SID", "session-1"))
        .with_page(home(&site.listing))
        .with_page(listing(&site.listing, &["Alpha", "Beta"], Some(site.page_two.as_str())))
        .with_page(listing(&site.page_two, &["Gamma", "Delta"], None));
    let sink = SqliteSink::in_memory().await.expect("sink opens");

    let run = HarvestRun::new(browser, Box::new(sink.clone()), options(&dir, 3));
    let mut progress = 0;
    let report = run
        .execute(CancellationToken::new(), |_| progress += 1)
        .await
        .expect("run succeeds");

    let titles: Vec<&str> = report.harvest.records.iter().map(|r| r.title()).collect();
    assert_eq!(titles, ["Alpha", "Beta", "Gamma"]);
    assert_eq!(report.harvest.stop_reason, StopReason::TargetReached);
    assert_eq!(report.harvest.pages_visited, 2);
    assert_eq!(report.harvest.listing_url.as_deref(), Some(site.page_two.as_str()));
    assert_eq!(report.inserted, 3);
    assert_eq!(progress, 3);

    let summary = report.downloads.expect("downloads ran");
    assert_eq!(summary.succeeded, 3);
    assert!(dir.path().join("Gamma.pdf").exists());
    assert!(!dir.path().join("Delta.pdf").exists());

    assert_eq!(sink.count().await.expect("count"), 3);
    assert_eq!(
        sink.file_name(RecordKey { page: 2, position: 1 })
            .await
            .expect("query")
            .as_deref(),
        Some("Gamma.pdf")
    );
    assert!(run.source().is_closed());
}

#[tokio::test]
async fn test_short_listing_stops_at_disabled_next_control() {
    let server = MockServer::start().await;
    serve_pdfs(&server, 0).await;
    let site = Site::on(&server);
    let dir = TempDir::new().expect("failed to create temp dir");

    let browser = MemoryBrowser::new()
        .with_page(home(&site.listing))
        .with_page(listing(&site.listing, &["One", "Two", "Three"], None));
    let mut opts = options(&dir, 5);
    opts.download = false;

    let run = HarvestRun::new(browser, Box::new(NullSink), opts);
    let report = run
        .execute(CancellationToken::new(), |_| {})
        .await
        .expect("run succeeds");

    assert_eq!(report.harvest.records.len(), 3);
    assert_eq!(report.harvest.stop_reason, StopReason::NoNextPage);
    assert_eq!(report.harvest.pages_visited, 1);
    assert!(report.downloads.is_none());
    // search button only
    assert_eq!(run.source().click_count(), 1);
    assert_eq!(run.source().history().iter().filter(|u| *u == &site.listing).count(), 1);
}

#[tokio::test]
async fn test_unverifiable_listing_exceeds_failure_threshold() {
    let server = MockServer::start().await;
    serve_pdfs(&server, 0).await;
    let site = Site::on(&server);
    let dir = TempDir::new().expect("failed to create temp dir");

    let browser = MemoryBrowser::new()
        .with_page(home(&site.listing))
        .with_page(MemoryPage::new(&site.listing, el("div").class("captcha")));
    let sink = SqliteSink::in_memory().await.expect("sink opens");

    let run = HarvestRun::new(browser, Box::new(sink.clone()), options(&dir, 10));
    let report = run
        .execute(CancellationToken::new(), |_| {})
        .await
        .expect("run completes");

    assert_eq!(report.harvest.stop_reason, StopReason::FailureThresholdExceeded);
    assert!(report.harvest.records.is_empty());
    assert_eq!(report.harvest.pages_visited, 0);
    assert_eq!(report.inserted, 0);
    assert_eq!(report.downloads.map(|s| s.total()), Some(0));
    assert_eq!(sink.count().await.expect("count"), 0);
    assert!(run.source().is_closed());
}

#[tokio::test]
async fn test_navigation_failure_keeps_records_already_collected() {
    let server = MockServer::start().await;
    serve_pdfs(&server, 2).await;
    let site = Site::on(&server);
    let dir = TempDir::new().expect("failed to create temp dir");

    let browser = MemoryBrowser::new()
        .with_cookie(SessionCookie::new("SID", "session-1"))
        .with_page(home(&site.listing))
        .with_page(listing(&site.listing, &["Kept A", "Kept B"], Some(site.page_two.as_str())))
        .with_page(MemoryPage::new(&site.page_two, el("div").class("spinner")));
    let sink = SqliteSink::in_memory().await.expect("sink opens");

    let run = HarvestRun::new(browser, Box::new(sink.clone()), options(&dir, 10));
    let report = run
        .execute(CancellationToken::new(), |_| {})
        .await
        .expect("run completes");

    assert_eq!(report.harvest.stop_reason, StopReason::NavigationFailed);
    assert_eq!(report.harvest.records.len(), 2);
    assert_eq!(report.inserted, 2);
    assert_eq!(report.downloads.map(|s| s.succeeded), Some(2));
    assert_eq!(run.source().refresh_count(), 1);
}

#[tokio::test]
async fn test_cancelled_run_persists_nothing_and_closes_browser() {
    let server = MockServer::start().await;
    serve_pdfs(&server, 0).await;
    let site = Site::on(&server);
    let dir = TempDir::new().expect("failed to create temp dir");

    let browser = MemoryBrowser::new()
        .with_page(home(&site.listing))
        .with_page(listing(&site.listing, &["Never"], None));
    let sink = SqliteSink::in_memory().await.expect("sink opens");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let run = HarvestRun::new(browser, Box::new(sink.clone()), options(&dir, 10));
    let report = run.execute(cancel, |_| {}).await.expect("run completes");

    assert_eq!(report.harvest.stop_reason, StopReason::Cancelled);
    assert!(report.harvest.records.is_empty());
    assert_eq!(sink.count().await.expect("count"), 0);
    assert!(run.source().is_closed());
}
