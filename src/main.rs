//! CLI entry point for the harvester tool.

use std::fs::{self, File};
use std::io::{self, IsTerminal};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::Parser;
use harvester_core::render::webdriver::BrowserOptions;
use harvester_core::{
    DownloadStatus, HarvestRun, NullSink, Pacing, RecordSink, RunOptions, RunReport, SearchForm,
    SqliteSink,
};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

mod cli;
mod config;

use cli::Args;
use config::{Settings, load_config};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    let loaded = load_config(args.config.as_deref())?;

    // Priority: RUST_LOG env var > quiet flag > verbose flag > config verbosity > info
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => loaded
                .config
                .verbosity
                .map_or("info", config::VerbositySetting::log_level),
            1 => "debug",
            _ => "trace",
        }
    };

    let settings = Settings::resolve(&args, &loaded.config);
    init_tracing(default_level, settings.log_dir.as_deref())?;

    debug!(?args, "CLI arguments parsed");
    if let Some(path) = &loaded.path {
        debug!(path = %path.display(), from_file = loaded.loaded_from_file, "config resolved");
    }
    info!(query = %settings.query, target = settings.target_count, "Harvester starting");

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current page");
            on_interrupt.cancel();
        }
    });

    let browser = BrowserOptions {
        headless: settings.headless,
        ..BrowserOptions::default()
    };
    let sink = open_sink(&settings).await;
    let options = run_options(&settings);
    let run = HarvestRun::connect(&settings.webdriver_url, &browser, sink, options)
        .await
        .with_context(|| format!("could not start a browser via {}", settings.webdriver_url))?;

    let progress = download_spinner(args.quiet);
    progress.set_message("harvesting listing pages");
    let result = run
        .execute(cancel, |outcome| {
            progress.inc(1);
            let marker = match &outcome.status {
                DownloadStatus::Success => "saved",
                DownloadStatus::Skipped(_) => "skipped",
                DownloadStatus::Failed(_) => "failed",
            };
            progress.set_message(format!("{marker}: {}", outcome.record.title()));
        })
        .await;
    progress.finish_and_clear();

    let report = result?;
    print_report(&report);
    Ok(())
}

fn init_tracing(default_level: &str, log_dir: Option<&Path>) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let console = fmt::layer().with_writer(io::stderr).with_filter(filter);

    let file = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("could not create log directory {}", dir.display()))?;
            let secs = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            let path = dir.join(format!("harvest_{secs}.log"));
            let handle = File::create(&path)
                .with_context(|| format!("could not create log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(handle))
                    .with_ansi(false)
                    .with_filter(LevelFilter::DEBUG),
            )
        }
        None => None,
    };

    tracing_subscriber::registry().with(console).with(file).init();
    Ok(())
}

async fn open_sink(settings: &Settings) -> Box<dyn RecordSink> {
    if !settings.persist {
        debug!("persistence disabled");
        return Box::new(NullSink);
    }
    match SqliteSink::open(&settings.database).await {
        Ok(sink) => {
            debug!(path = %settings.database.display(), run_id = sink.run_id(), "record store opened");
            Box::new(sink)
        }
        Err(error) => {
            warn!(%error, path = %settings.database.display(), "record store unavailable, continuing without persistence");
            Box::new(NullSink)
        }
    }
}

fn run_options(settings: &Settings) -> RunOptions {
    let mut options = RunOptions::new(settings.query.clone(), settings.target_count);
    options.max_pages = settings.max_pages;
    options.failure_threshold = settings.failure_threshold;
    options.download = settings.download;
    options.output_dir.clone_from(&settings.output_dir);
    options.download_timeout = settings.request_timeout;
    options.pacing = Pacing {
        element_timeout: settings.element_timeout,
        ..Pacing::default()
    };
    options.search_form = SearchForm::default().with_home_url(&settings.home_url);
    options
}

fn download_spinner(quiet: bool) -> ProgressBar {
    if quiet || !io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} [{pos}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

fn print_report(report: &RunReport) {
    let harvest = &report.harvest;
    println!(
        "Collected {} records from {} pages ({})",
        harvest.records.len(),
        harvest.pages_visited,
        harvest.stop_reason
    );
    if report.inserted > 0 {
        println!("Stored {} records", report.inserted);
    }
    if let Some(summary) = &report.downloads {
        println!("Downloads: {summary}");
        for outcome in &report.download_outcomes {
            if let DownloadStatus::Failed(reason) = &outcome.status {
                println!("  failed: {} ({reason})", outcome.record.title());
            }
        }
    }
}
