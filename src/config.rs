//! File configuration for CLI defaults.
//!
//! The file is a flat `key = value` list: double-quoted strings, integers,
//! booleans and `#` comments. Unknown keys are rejected. CLI flags override
//! values found here, which override built-in defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use std::time::Duration;

use anyhow::{Context, Result, bail};
use harvester_core::DEFAULT_TARGET_COUNT;
use harvester_core::failure::DEFAULT_FAILURE_THRESHOLD;
use harvester_core::harvest::DEFAULT_HOME_URL;

use crate::cli::Args;

/// Default WebDriver endpoint (chromedriver's default port).
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";
const DEFAULT_OUTPUT_DIR: &str = "downloads";
const DEFAULT_DATABASE: &str = "harvest.db";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_ELEMENT_TIMEOUT_SECS: u64 = 10;

const APP_DIR: &str = "harvester";
const CONFIG_FILE: &str = "config.toml";

/// Harvester defaults read from the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// Directory receiving downloaded artifacts.
    pub output_dir: Option<PathBuf>,
    /// SQLite database file for harvested records.
    pub database: Option<PathBuf>,
    /// WebDriver endpoint, e.g. `http://localhost:9515`.
    pub webdriver_url: Option<String>,
    pub headless: Option<bool>,
    /// Search home page.
    pub home_url: Option<String>,
    pub target_count: Option<u64>,
    pub max_pages: Option<u64>,
    /// Consecutive page failures that stop a traversal (1..=20).
    pub failure_threshold: Option<u64>,
    /// Per-download request timeout in seconds.
    pub request_timeout_secs: Option<u64>,
    /// Bounded wait for primary page elements in seconds.
    pub element_timeout_secs: Option<u64>,
    /// Fetch artifacts after harvesting.
    pub download: Option<bool>,
    /// Persist records to the database.
    pub persist: Option<bool>,
    pub verbosity: Option<VerbositySetting>,
    /// Directory for per-run debug log files.
    pub log_dir: Option<PathBuf>,
}

impl FileConfig {
    /// Validates config values against runtime and CLI constraints.
    pub fn validate(&self) -> Result<()> {
        validate_range("target_count", self.target_count, 1, u64::from(u32::MAX))?;
        validate_range("max_pages", self.max_pages, 1, u64::from(u32::MAX))?;
        validate_range("failure_threshold", self.failure_threshold, 1, 20)?;
        validate_range("request_timeout_secs", self.request_timeout_secs, 1, 3600)?;
        validate_range("element_timeout_secs", self.element_timeout_secs, 1, 600)?;

        if let Some(url) = &self.webdriver_url {
            url::Url::parse(url)
                .with_context(|| format!("Invalid config value for `webdriver_url`: '{url}'"))?;
        }
        if let Some(url) = &self.home_url {
            url::Url::parse(url)
                .with_context(|| format!("Invalid config value for `home_url`: '{url}'"))?;
        }
        Ok(())
    }
}

fn validate_range(field: &str, value: Option<u64>, min: u64, max: u64) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(min..=max).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: {min}..={max}");
    }
    Ok(())
}

/// Supported config verbosity labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbositySetting {
    Default,
    Verbose,
    Quiet,
    Debug,
}

impl VerbositySetting {
    /// Tracing level used when neither `RUST_LOG` nor a CLI flag decides.
    #[must_use]
    pub fn log_level(self) -> &'static str {
        match self {
            Self::Default => "info",
            Self::Verbose => "debug",
            Self::Quiet => "error",
            Self::Debug => "trace",
        }
    }
}

/// Effective settings after merging CLI flags, file values and defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub query: String,
    pub target_count: usize,
    pub max_pages: Option<u32>,
    pub output_dir: PathBuf,
    pub database: PathBuf,
    pub webdriver_url: String,
    pub headless: bool,
    pub home_url: String,
    pub failure_threshold: u32,
    pub request_timeout: Duration,
    pub element_timeout: Duration,
    pub download: bool,
    pub persist: bool,
    pub log_dir: Option<PathBuf>,
}

impl Settings {
    /// CLI flags win over file values, which win over built-in defaults.
    #[must_use]
    pub fn resolve(args: &Args, file: &FileConfig) -> Self {
        let target_count = args
            .count
            .map(u64::from)
            .or(file.target_count)
            .and_then(|count| usize::try_from(count).ok())
            .unwrap_or(DEFAULT_TARGET_COUNT);
        let max_pages = args
            .max_pages
            .or_else(|| file.max_pages.and_then(|pages| u32::try_from(pages).ok()));
        let failure_threshold = file
            .failure_threshold
            .and_then(|threshold| u32::try_from(threshold).ok())
            .unwrap_or(DEFAULT_FAILURE_THRESHOLD);

        Self {
            query: args.query.clone(),
            target_count,
            max_pages,
            output_dir: args
                .output_dir
                .clone()
                .or_else(|| file.output_dir.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            database: args
                .database
                .clone()
                .or_else(|| file.database.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE)),
            webdriver_url: args
                .webdriver_url
                .clone()
                .or_else(|| file.webdriver_url.clone())
                .unwrap_or_else(|| DEFAULT_WEBDRIVER_URL.to_string()),
            headless: args.headless || file.headless.unwrap_or(false),
            home_url: file
                .home_url
                .clone()
                .unwrap_or_else(|| DEFAULT_HOME_URL.to_string()),
            failure_threshold,
            request_timeout: Duration::from_secs(
                file.request_timeout_secs
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            element_timeout: Duration::from_secs(
                file.element_timeout_secs
                    .unwrap_or(DEFAULT_ELEMENT_TIMEOUT_SECS),
            ),
            download: !args.no_download && file.download.unwrap_or(true),
            persist: !args.no_db && file.persist.unwrap_or(true),
            log_dir: args.log_dir.clone().or_else(|| file.log_dir.clone()),
        }
    }
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path, if any.
    pub path: Option<PathBuf>,
    /// Parsed file config; defaults when no file exists.
    pub config: FileConfig,
    pub loaded_from_file: bool,
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/harvester/config.toml`
/// 2. `$HOME/.config/harvester/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join(APP_DIR).join(CONFIG_FILE));
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join(CONFIG_FILE),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config at `explicit`, or from the default path if present.
///
/// An explicit path must exist; a missing default file yields defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        let config = load_file_config(path)?;
        return Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            config,
            loaded_from_file: true,
        });
    }

    let path = resolve_default_config_path();
    match path.as_deref() {
        Some(path_ref) if path_ref.exists() => {
            let config = load_file_config(path_ref)?;
            Ok(LoadedConfig {
                path,
                config,
                loaded_from_file: true,
            })
        }
        _ => Ok(LoadedConfig {
            path,
            config: FileConfig::default(),
            loaded_from_file: false,
        }),
    }
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let line_no = line_index + 1;

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let context = || format!("Invalid `{key}` value on line {line_no}");

        match key {
            "output_dir" => {
                cfg.output_dir = Some(PathBuf::from(parse_string_literal(value).with_context(context)?));
            }
            "database" => {
                cfg.database = Some(PathBuf::from(parse_string_literal(value).with_context(context)?));
            }
            "log_dir" => {
                cfg.log_dir = Some(PathBuf::from(parse_string_literal(value).with_context(context)?));
            }
            "webdriver_url" => {
                cfg.webdriver_url = Some(parse_string_literal(value).with_context(context)?);
            }
            "home_url" => {
                cfg.home_url = Some(parse_string_literal(value).with_context(context)?);
            }
            "headless" => cfg.headless = Some(parse_boolean(value).with_context(context)?),
            "download" => cfg.download = Some(parse_boolean(value).with_context(context)?),
            "persist" => cfg.persist = Some(parse_boolean(value).with_context(context)?),
            "target_count" => cfg.target_count = Some(parse_integer_u64(value).with_context(context)?),
            "max_pages" => cfg.max_pages = Some(parse_integer_u64(value).with_context(context)?),
            "failure_threshold" => {
                cfg.failure_threshold = Some(parse_integer_u64(value).with_context(context)?);
            }
            "request_timeout_secs" => {
                cfg.request_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "element_timeout_secs" => {
                cfg.element_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "verbosity" => {
                let parsed = parse_string_literal(value).with_context(context)?;
                cfg.verbosity = Some(parse_verbosity(&parsed).with_context(|| {
                    format!("Invalid `verbosity` value '{parsed}' on line {line_no}")
                })?);
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_no}");
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_verbosity(value: &str) -> Result<VerbositySetting> {
    match value {
        "default" => Ok(VerbositySetting::Default),
        "verbose" => Ok(VerbositySetting::Verbose),
        "quiet" => Ok(VerbositySetting::Quiet),
        "debug" => Ok(VerbositySetting::Debug),
        _ => bail!("Expected one of: default, verbose, quiet, debug"),
    }
}

fn parse_boolean(raw_value: &str) -> Result<bool> {
    match raw_value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => bail!("Expected 'true' or 'false'"),
    }
}
