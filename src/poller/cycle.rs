use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::filter::filter_links;
use crate::config::PollConfig;
use crate::error::{CycleFailure, ExtractionError};
use crate::models::{MatchRecord, MatchStatus, RecordFingerprint, SCRAPE_TYPE_LIVE};
use crate::odds::OddsSource;

/// Cycles a link may be missing from the filtered listing before its
/// fingerprint is forgotten; it is reported as new if it comes back later.
pub const FORGET_AFTER_CYCLES: u64 = 10;

/// Result of one fetch → filter → extract pass.
#[derive(Debug, Default)]
pub struct CycleOutcome {
    /// Successfully extracted matches, in listing order
    pub records: Vec<MatchRecord>,
    /// Per-link failures; reported, never fatal
    pub soft_errors: Vec<ExtractionError>,
    pub links_found: usize,
    pub links_matched: usize,
}

/// Runs single scrape cycles against an [`OddsSource`] and remembers what each
/// match looked like last time so records can be tagged new/updated/unchanged.
pub struct CycleExecutor {
    source: Arc<dyn OddsSource>,
    config: PollConfig,
    /// match_link → last successful extraction, for links still being listed
    previous: HashMap<String, Seen>,
}

struct Seen {
    fingerprint: RecordFingerprint,
    /// Last cycle the link passed the filter
    listed: u64,
}

impl CycleExecutor {
    pub fn new(source: Arc<dyn OddsSource>, config: PollConfig) -> Self {
        CycleExecutor {
            source,
            config,
            previous: HashMap::new(),
        }
    }

    pub async fn run_cycle(&mut self, cycle: u64) -> Result<CycleOutcome, CycleFailure> {
        let links = self
            .source
            .fetch_listing()
            .await
            .map_err(|e| CycleFailure {
                cycle,
                reason: format!("listing page from {}: {:#}", self.source.name(), e),
            })?;

        let matched = filter_links(&links, &self.config.sport, &self.config.leagues).map_err(|e| {
            CycleFailure {
                cycle,
                reason: e.to_string(),
            }
        })?;
        info!(
            "Cycle {}: {} links on listing, {} for {}",
            cycle,
            links.len(),
            matched.len(),
            self.config.sport
        );
        self.forget_stale(&matched, cycle);

        let source = self.source.as_ref();
        let markets = self.config.markets.as_slice();
        let timeout = self.config.extraction_timeout;

        // At most `concurrency` extractions in flight; results come back in link order.
        let results = stream::iter(matched.iter())
            .map(|link| async move {
                let res = tokio::time::timeout(timeout, source.extract_match(link, markets)).await;
                (link.clone(), res)
            })
            .buffered(self.config.concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut outcome = CycleOutcome {
            links_found: links.len(),
            links_matched: matched.len(),
            ..Default::default()
        };

        for (link, res) in results {
            match res {
                Ok(Ok(record)) => outcome.records.push(self.stamp(record, &link, cycle)),
                Ok(Err(e)) => outcome.soft_errors.push(ExtractionError::Failed {
                    link,
                    reason: format!("{:#}", e),
                }),
                Err(_) => outcome.soft_errors.push(ExtractionError::TimedOut { link, timeout }),
            }
        }

        for err in &outcome.soft_errors {
            warn!("Cycle {}: {}", cycle, err);
        }
        Ok(outcome)
    }

    /// Number of matches with a remembered fingerprint.
    pub fn remembered(&self) -> usize {
        self.previous.len()
    }

    fn forget_stale(&mut self, matched: &[String], cycle: u64) {
        for link in matched {
            if let Some(seen) = self.previous.get_mut(link) {
                seen.listed = cycle;
            }
        }
        let before = self.previous.len();
        self.previous
            .retain(|_, seen| cycle.saturating_sub(seen.listed) <= FORGET_AFTER_CYCLES);
        if self.previous.len() < before {
            debug!("Cycle {}: forgot {} finished matches", cycle, before - self.previous.len());
        }
    }

    /// Fill in polling metadata and classify against the previous snapshot.
    fn stamp(&mut self, mut record: MatchRecord, link: &str, cycle: u64) -> MatchRecord {
        record.match_link = link.to_string();
        record.sport = self.config.sport.clone();
        record.scrape_type = SCRAPE_TYPE_LIVE.to_string();
        record.poll_cycle = cycle;

        let fingerprint = record.fingerprint();
        record.match_status = match self.previous.get(link) {
            None => MatchStatus::New,
            Some(prev) if prev.fingerprint == fingerprint => MatchStatus::Unchanged,
            Some(_) => MatchStatus::Updated,
        };
        if record.match_status == MatchStatus::Updated {
            debug!("{} changed since last cycle", link);
        }
        self.previous.insert(
            link.to_string(),
            Seen {
                fingerprint,
                listed: cycle,
            },
        );
        record
    }
}
