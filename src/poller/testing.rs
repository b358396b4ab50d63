//! In-memory doubles for the odds source and the sink.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::signals::{ShutdownFlag, SignalSource};
use crate::error::SinkError;
use crate::models::{MatchRecord, PeriodScore};
use crate::odds::OddsSource;
use crate::storage::OutputSink;

#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Fail,
    Hang,
}

#[derive(Default)]
pub struct MockSource {
    pub listing: Mutex<Vec<String>>,
    /// Number of upcoming listing fetches that fail
    pub listing_failures: AtomicUsize,
    pub behaviors: Mutex<HashMap<String, Behavior>>,
    /// Home score reported per link; changing it makes the match "updated"
    pub scores: Mutex<HashMap<String, u32>>,
    pub extract_delay: Duration,
    /// Requested as soon as any extraction starts
    pub shutdown_on_extract: Option<ShutdownFlag>,
    pub listing_calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl MockSource {
    pub fn with_links(links: &[&str]) -> Self {
        MockSource {
            listing: Mutex::new(links.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        }
    }

    pub fn set_behavior(&self, link: &str, behavior: Behavior) {
        self.behaviors.lock().unwrap().insert(link.to_string(), behavior);
    }

    pub fn set_score(&self, link: &str, score: u32) {
        self.scores.lock().unwrap().insert(link.to_string(), score);
    }

    pub fn listing_calls(&self) -> usize {
        self.listing_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OddsSource for MockSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_listing(&self) -> Result<Vec<String>> {
        self.listing_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .listing_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            anyhow::bail!("listing unavailable");
        }
        Ok(self.listing.lock().unwrap().clone())
    }

    async fn extract_match(&self, link: &str, markets: &[String]) -> Result<MatchRecord> {
        if let Some(flag) = &self.shutdown_on_extract {
            flag.request();
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.extract_delay.is_zero() {
            tokio::time::sleep(self.extract_delay).await;
        }
        let behavior = self.behaviors.lock().unwrap().get(link).copied();
        let result = match behavior {
            Some(Behavior::Fail) => Err(anyhow::anyhow!("match page broken")),
            Some(Behavior::Hang) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            None => {
                let mut rec = MatchRecord::new(link);
                rec.home_team = "Home".into();
                rec.away_team = "Away".into();
                rec.home_score = Some(self.scores.lock().unwrap().get(link).copied().unwrap_or(0));
                rec.away_score = Some(0);
                rec.partial_results = vec![PeriodScore { home: 0, away: 0 }];
                for m in markets {
                    rec.markets.insert(m.clone(), Vec::new());
                }
                Ok(rec)
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Collects every batch it is given; can be told to fail the next writes.
#[derive(Default)]
pub struct MemorySink {
    pub batches: Mutex<Vec<Vec<MatchRecord>>>,
    pub failures: AtomicUsize,
    /// Requested while a batch is being written
    pub shutdown_on_write: Option<ShutdownFlag>,
}

impl MemorySink {
    pub fn batches(&self) -> Vec<Vec<MatchRecord>> {
        self.batches.lock().unwrap().clone()
    }
}

impl OutputSink for MemorySink {
    fn write(&self, records: &[MatchRecord]) -> Result<(), SinkError> {
        if let Some(flag) = &self.shutdown_on_write {
            flag.request();
        }
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SinkError::io(
                "memory",
                std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            ));
        }
        self.batches.lock().unwrap().push(records.to_vec());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// A signal source that never fires.
pub struct NoSignals;

#[async_trait]
impl SignalSource for NoSignals {
    async fn recv(&mut self) -> Option<&'static str> {
        std::future::pending().await
    }
}
