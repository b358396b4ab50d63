pub mod file;

pub use file::FileSink;

use clap::ValueEnum;

use crate::error::SinkError;
use crate::models::MatchRecord;

/// What happens to earlier content when a cycle's batch is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    /// Add each cycle's batch after what is already stored
    Append,
    /// Replace the stored content with the latest batch
    Overwrite,
}

/// On-disk layout of the destination file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageFormat {
    /// A single JSON array of records
    Json,
    /// One JSON record per line
    Jsonl,
}

/// Persists one cycle's batch. A write either lands completely or not at all.
pub trait OutputSink: Send + Sync {
    fn write(&self, records: &[MatchRecord]) -> Result<(), SinkError>;

    /// Destination for logging.
    fn describe(&self) -> String;
}
