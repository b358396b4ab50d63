use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Rejected run configuration. The run never starts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("poll interval must be at least {min}s, got {got}s")]
    PollIntervalTooShort { got: u64, min: u64 },

    #[error("at least one market is required")]
    NoMarkets,

    #[error("unknown market '{0}'")]
    UnknownMarket(String),

    #[error("max_cycles must be positive")]
    ZeroMaxCycles,

    #[error("concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("{0} must be positive")]
    ZeroTimeout(&'static str),

    #[error("invalid listing URL '{0}'")]
    InvalidListingUrl(String),

    #[error("invalid proxy '{0}'")]
    InvalidProxy(String),
}

/// Bad sport/league input handed to the link filter.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidFilterInput {
    #[error("sport must not be empty")]
    EmptySport,

    #[error("league names must not be empty")]
    EmptyLeague,
}

/// The listing page could not be fetched or parsed; the whole cycle is lost.
#[derive(Debug, Error)]
#[error("cycle {cycle} failed: {reason}")]
pub struct CycleFailure {
    pub cycle: u64,
    pub reason: String,
}

/// A single match page could not be extracted. Never aborts the cycle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("extraction of {link} failed: {reason}")]
    Failed { link: String, reason: String },

    #[error("extraction of {link} timed out after {timeout:?}")]
    TimedOut { link: String, timeout: Duration },
}

impl ExtractionError {
    pub fn link(&self) -> &str {
        match self {
            ExtractionError::Failed { link, .. } | ExtractionError::TimedOut { link, .. } => link,
        }
    }
}

/// Persisting a batch failed; that batch is lost but the run continues.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("existing content of {path} is not usable: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("storage task did not complete: {0}")]
    Task(String),
}

impl SinkError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SinkError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors that stop a run before its first cycle.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid filter input: {0}")]
    Filter(#[from] InvalidFilterInput),

    #[error("setup error: {0}")]
    Setup(String),
}
