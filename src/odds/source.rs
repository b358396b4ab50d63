use anyhow::Result;
use async_trait::async_trait;

use crate::models::MatchRecord;

/// Trait that every live-odds scraping backend must implement.
#[async_trait]
pub trait OddsSource: Send + Sync {
    /// Fetch the live listing page and return every match link on it,
    /// across all sports, as absolute URLs.
    async fn fetch_listing(&self) -> Result<Vec<String>>;

    /// Scrape one match page. Polling metadata on the returned record is
    /// overwritten by the caller.
    async fn extract_match(&self, link: &str, markets: &[String]) -> Result<MatchRecord>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}
