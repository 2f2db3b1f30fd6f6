//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Harvest bibliographic records from a search listing and fetch their documents.
///
/// Submits QUERY on the search home page, walks the result listing page by
/// page until COUNT records are collected, stores them in SQLite and
/// downloads each record's document.
#[derive(Parser, Debug)]
#[command(name = "harvester")]
#[command(author, version, about)]
pub struct Args {
    /// Search query
    pub query: String,

    /// Number of records to collect
    #[arg(short = 'n', long = "count", value_parser = clap::value_parser!(u32).range(1..))]
    pub count: Option<u32>,

    /// Stop after this many listing pages
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_pages: Option<u32>,

    /// Skip downloading documents
    #[arg(long)]
    pub no_download: bool,

    /// Do not persist records to the database
    #[arg(long)]
    pub no_db: bool,

    /// Directory receiving downloaded documents
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// SQLite database file for harvested records
    #[arg(long = "db")]
    pub database: Option<PathBuf>,

    /// WebDriver endpoint (chromedriver or geckodriver)
    #[arg(long = "webdriver")]
    pub webdriver_url: Option<String>,

    /// Run the browser without a window
    #[arg(long)]
    pub headless: bool,

    /// Config file (default: $XDG_CONFIG_HOME/harvester/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Also write a debug-level log file per run into this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}
