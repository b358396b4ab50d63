use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;
use crate::odds::markets;
use crate::odds::{ScrapeOptions, DEFAULT_LISTING_URL, DEFAULT_USER_AGENT};
use crate::storage::{OutputMode, StorageFormat};

/// Shortest allowed gap between two poll cycles.
pub const MIN_POLL_INTERVAL_SECS: u64 = 10;

/// Continuously scrape live odds for one sport and persist each poll cycle
#[derive(Parser, Debug, Clone)]
#[command(name = "live-odds-poller", version, about)]
pub struct Config {
    /// Sport slug as it appears in match URLs (e.g. football, basketball)
    #[arg(long, env = "SPORT")]
    pub sport: String,

    /// Comma-separated markets to scrape (e.g. 1x2,over_under_2_5,btts)
    #[arg(long, env = "MARKETS", value_delimiter = ',', default_value = "1x2")]
    pub markets: Vec<String>,

    /// Comma-separated league slugs; only matches in one of them are scraped
    #[arg(long, env = "LEAGUES", value_delimiter = ',')]
    pub leagues: Vec<String>,

    /// Seconds between poll cycles (minimum 10)
    #[arg(long, env = "POLL_INTERVAL", default_value = "30")]
    pub poll_interval: u64,

    /// Append each cycle to the file, or overwrite it with the latest cycle
    #[arg(long, env = "OUTPUT_MODE", value_enum, default_value = "append")]
    pub output_mode: OutputMode,

    /// Stop after this many cycles (default: run until interrupted)
    #[arg(long, env = "MAX_CYCLES")]
    pub max_cycles: Option<u64>,

    /// Output file (default: live_odds_<sport>.json)
    #[arg(long, env = "FILE_PATH")]
    pub file_path: Option<PathBuf>,

    /// Output file layout
    #[arg(long, env = "STORAGE_FORMAT", value_enum, default_value = "json")]
    pub storage_format: StorageFormat,

    /// Live listing page enumerating in-play matches
    #[arg(long, env = "LISTING_URL", default_value = DEFAULT_LISTING_URL)]
    pub listing_url: String,

    /// Maximum match pages scraped at the same time
    #[arg(long, env = "CONCURRENCY", default_value = "3")]
    pub concurrency: usize,

    /// Seconds before a single match extraction is abandoned
    #[arg(long, env = "EXTRACTION_TIMEOUT", default_value = "60")]
    pub extraction_timeout: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT", default_value = "20")]
    pub request_timeout: u64,

    /// User-Agent header sent with every request
    #[arg(long, env = "USER_AGENT", default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    /// Only keep odds from this bookmaker
    #[arg(long, env = "TARGET_BOOKMAKER")]
    pub target_bookmaker: Option<String>,

    /// Period label stamped on every quote
    #[arg(long, env = "PERIOD", default_value = "FullTime")]
    pub period: String,

    /// Comma-separated proxy URLs; requests rotate through them in order
    #[arg(long, env = "PROXIES", value_delimiter = ',')]
    pub proxies: Vec<String>,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.request_timeout == 0 {
            return Err(ConfigError::ZeroTimeout("request_timeout").into());
        }
        if Url::parse(&self.listing_url).is_err() {
            return Err(ConfigError::InvalidListingUrl(self.listing_url.clone()).into());
        }
        if let Some(bad) = self.proxies.iter().find(|p| reqwest::Proxy::all(p.as_str()).is_err()) {
            return Err(ConfigError::InvalidProxy(bad.clone()).into());
        }
        self.poll_config().validate()?;
        Ok(())
    }

    /// The immutable part of the configuration the poll loop runs with.
    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            sport: self.sport.clone(),
            leagues: self.leagues.clone(),
            markets: self.markets.clone(),
            poll_interval: Duration::from_secs(self.poll_interval),
            output_mode: self.output_mode,
            max_cycles: self.max_cycles,
            file_path: self
                .file_path
                .clone()
                .unwrap_or_else(|| default_file_path(&self.sport)),
            storage_format: self.storage_format,
            concurrency: self.concurrency,
            extraction_timeout: Duration::from_secs(self.extraction_timeout),
        }
    }

    pub fn scrape_options(&self) -> ScrapeOptions {
        ScrapeOptions {
            target_bookmaker: self.target_bookmaker.clone(),
            period: self.period.clone(),
        }
    }
}

pub fn default_file_path(sport: &str) -> PathBuf {
    PathBuf::from(format!("live_odds_{}.json", sport))
}

/// Per-run settings; fixed once the run starts.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub sport: String,
    pub leagues: Vec<String>,
    pub markets: Vec<String>,
    pub poll_interval: Duration,
    pub output_mode: OutputMode,
    /// `None` runs until shutdown is requested
    pub max_cycles: Option<u64>,
    pub file_path: PathBuf,
    pub storage_format: StorageFormat,
    pub concurrency: usize,
    pub extraction_timeout: Duration,
}

impl PollConfig {
    pub fn new(sport: impl Into<String>, markets: Vec<String>) -> Self {
        let sport = sport.into();
        PollConfig {
            file_path: default_file_path(&sport),
            sport,
            leagues: Vec::new(),
            markets,
            poll_interval: Duration::from_secs(30),
            output_mode: OutputMode::Append,
            max_cycles: None,
            storage_format: StorageFormat::Json,
            concurrency: 3,
            extraction_timeout: Duration::from_secs(60),
        }
    }

    /// Reject configs the loop must never start with. Nothing is clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let secs = self.poll_interval.as_secs();
        if secs < MIN_POLL_INTERVAL_SECS {
            return Err(ConfigError::PollIntervalTooShort {
                got: secs,
                min: MIN_POLL_INTERVAL_SECS,
            });
        }
        if self.markets.is_empty() {
            return Err(ConfigError::NoMarkets);
        }
        if let Some(unknown) = self.markets.iter().find(|m| !markets::is_supported(m)) {
            return Err(ConfigError::UnknownMarket(unknown.clone()));
        }
        if self.max_cycles == Some(0) {
            return Err(ConfigError::ZeroMaxCycles);
        }
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.extraction_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("extraction_timeout"));
        }
        Ok(())
    }
}
