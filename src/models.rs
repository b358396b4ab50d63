use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Value stamped into every record produced by the live poller.
pub const SCRAPE_TYPE_LIVE: &str = "live";

/// One match snapshot taken during a single poll cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_link: String,
    pub sport: String,
    pub home_team: String,
    pub away_team: String,
    pub league: String,
    pub home_score: Option<u32>,
    pub away_score: Option<u32>,
    /// Per-period scores in play order, e.g. halves or sets
    pub partial_results: Vec<PeriodScore>,
    /// Requested market name → one quote per bookmaker
    pub markets: BTreeMap<String, Vec<BookmakerOdds>>,
    /// Always "live"
    pub scrape_type: String,
    pub poll_cycle: u64,
    pub match_status: MatchStatus,
    pub scraped_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodScore {
    pub home: u32,
    pub away: u32,
}

/// A single bookmaker's prices for one market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookmakerOdds {
    /// Outcome label (e.g. "1", "X", "odds_over") → price as shown on the page
    pub odds: BTreeMap<String, String>,
    pub bookmaker_name: String,
    pub period: String,
}

/// How a match compares with the last time it was seen in this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    New,
    Updated,
    Unchanged,
}

impl MatchRecord {
    /// Build an untagged record; the cycle executor fills in polling metadata.
    pub fn new(match_link: impl Into<String>) -> Self {
        MatchRecord {
            match_link: match_link.into(),
            sport: String::new(),
            home_team: String::new(),
            away_team: String::new(),
            league: String::new(),
            home_score: None,
            away_score: None,
            partial_results: Vec::new(),
            markets: BTreeMap::new(),
            scrape_type: SCRAPE_TYPE_LIVE.to_string(),
            poll_cycle: 0,
            match_status: MatchStatus::New,
            scraped_at: Utc::now(),
        }
    }

    /// Everything that can move while a match is in play. Two snapshots with
    /// equal fingerprints are the same as far as `match_status` is concerned.
    pub fn fingerprint(&self) -> RecordFingerprint {
        RecordFingerprint {
            home_score: self.home_score,
            away_score: self.away_score,
            partial_results: self.partial_results.clone(),
            markets: self.markets.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFingerprint {
    home_score: Option<u32>,
    away_score: Option<u32>,
    partial_results: Vec<PeriodScore>,
    markets: BTreeMap<String, Vec<BookmakerOdds>>,
}
