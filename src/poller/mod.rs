//! The live polling loop.
//!
//! ```text
//!  Idle ──validate + arm signals──▶ Running ──cycle──▶ persist ──▶ continue?
//!                                    │   ▲                          │
//!                                    │   └──── interruptible sleep ◀┘ yes
//!                  shutdown during   ▼                              │ no
//!                  a cycle ──────▶ Draining ──persist──▶ Stopped ◀──┘
//! ```
//!
//! A shutdown request never aborts a cycle: the in-flight cycle is extracted
//! and persisted, then the loop exits without sleeping.

pub mod cycle;
pub mod filter;
pub mod signals;

#[cfg(test)]
pub(crate) mod testing;

pub use cycle::{CycleExecutor, CycleOutcome};
pub use filter::filter_links;
pub use signals::{ShutdownFlag, SignalBridge, SignalGuard, SignalSource};

use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::PollConfig;
use crate::error::{PollError, SinkError};
use crate::odds::OddsSource;
use crate::storage::OutputSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Running,
    Draining,
    Stopped,
}

/// Why a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    MaxCyclesReached,
    ShutdownRequested,
    FatalError(String),
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::MaxCyclesReached => write!(f, "max_cycles_reached"),
            ExitReason::ShutdownRequested => write!(f, "shutdown_requested"),
            ExitReason::FatalError(msg) => write!(f, "fatal_error: {}", msg),
        }
    }
}

/// Counters for the end-of-run summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub records_written: u64,
    pub failed_cycles: u64,
    pub lost_batches: u64,
    pub soft_errors: u64,
}

/// Drives cycles at a fixed cadence and hands each batch to the sink.
pub struct PollController {
    config: PollConfig,
    executor: CycleExecutor,
    sink: Arc<dyn OutputSink>,
    shutdown: ShutdownFlag,
    phase: RunPhase,
    /// Every phase entered, in order
    transitions: Vec<RunPhase>,
    /// Cycles completed so far; the next cycle is `cycle + 1`
    cycle: u64,
    stats: RunStats,
}

impl PollController {
    pub fn new(config: PollConfig, source: Arc<dyn OddsSource>, sink: Arc<dyn OutputSink>) -> Self {
        PollController {
            executor: CycleExecutor::new(source, config.clone()),
            config,
            sink,
            shutdown: ShutdownFlag::new(),
            phase: RunPhase::Idle,
            transitions: Vec::new(),
            cycle: 0,
            stats: RunStats::default(),
        }
    }

    /// Share an externally owned shutdown flag instead of the controller's own.
    pub fn with_shutdown_flag(mut self, flag: ShutdownFlag) -> Self {
        self.shutdown = flag;
        self
    }

    /// Handle for requesting a graceful stop from outside the loop.
    pub fn shutdown_flag(&self) -> ShutdownFlag {
        self.shutdown.clone()
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn transitions(&self) -> &[RunPhase] {
        &self.transitions
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycle
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Validate, intercept SIGINT/SIGTERM, and poll until max_cycles or shutdown.
    /// The previous signal handlers are back in place when this returns.
    pub async fn run(&mut self) -> Result<ExitReason, PollError> {
        self.validate()?;
        let guard = SignalBridge::arm(self.shutdown.clone())
            .map_err(|e| PollError::Setup(format!("failed to install signal handlers: {}", e)))?;
        Ok(self.run_guarded(guard).await)
    }

    pub async fn run_with<S: SignalSource>(&mut self, signals: S) -> Result<ExitReason, PollError> {
        self.validate()?;
        let guard = SignalBridge::arm_with(self.shutdown.clone(), signals);
        Ok(self.run_guarded(guard).await)
    }

    async fn run_guarded(&mut self, guard: SignalGuard) -> ExitReason {
        let reason = self.poll_loop().await;
        guard.disarm().await;
        reason
    }

    fn validate(&self) -> Result<(), PollError> {
        if self.phase != RunPhase::Idle {
            return Err(PollError::Setup("controller has already run".to_string()));
        }
        self.config.validate()?;
        filter_links(&[], &self.config.sport, &self.config.leagues)?;
        Ok(())
    }

    fn set_phase(&mut self, phase: RunPhase) {
        if self.phase != phase {
            info!("Poller {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
            self.transitions.push(phase);
        }
    }

    async fn poll_loop(&mut self) -> ExitReason {
        self.set_phase(RunPhase::Running);
        info!(
            "Polling {} every {:?} ({} cycles, {:?} to {})",
            self.config.sport,
            self.config.poll_interval,
            self.config
                .max_cycles
                .map_or_else(|| "unbounded".to_string(), |n| n.to_string()),
            self.config.output_mode,
            self.sink.describe()
        );

        let reason = loop {
            let cycle = self.cycle + 1;
            let outcome = self.executor.run_cycle(cycle).await;

            if self.shutdown.is_requested() {
                self.set_phase(RunPhase::Draining);
            }

            match outcome {
                Ok(outcome) => self.persist(cycle, outcome).await,
                Err(failure) => {
                    self.stats.failed_cycles += 1;
                    error!("{}; retrying next tick", failure);
                }
            }
            self.cycle = cycle;

            if self.shutdown.is_requested() {
                // also reached when the request landed while the batch was stored
                self.set_phase(RunPhase::Draining);
                break ExitReason::ShutdownRequested;
            }
            if let Some(max) = self.config.max_cycles {
                if self.cycle >= max {
                    break ExitReason::MaxCyclesReached;
                }
            }
            if self.shutdown.sleep(self.config.poll_interval).await {
                break ExitReason::ShutdownRequested;
            }
        };

        self.set_phase(RunPhase::Stopped);
        info!(
            "Live polling stopped after {} cycles ({}): {} records written, {} failed cycles, {} lost batches, {} extraction errors",
            self.cycle,
            reason,
            self.stats.records_written,
            self.stats.failed_cycles,
            self.stats.lost_batches,
            self.stats.soft_errors
        );
        reason
    }

    /// Hand the batch to the sink on the blocking pool. An empty batch is
    /// skipped so the last stored snapshot survives a quiet cycle.
    async fn persist(&mut self, cycle: u64, outcome: CycleOutcome) {
        let soft_errors = outcome.soft_errors.len();
        self.stats.soft_errors += soft_errors as u64;
        if outcome.records.is_empty() {
            warn!(
                "Cycle {}: no records extracted, nothing stored ({} extraction errors)",
                cycle, soft_errors
            );
            return;
        }

        let count = outcome.records.len();
        let sink = Arc::clone(&self.sink);
        let records = outcome.records;
        let written = tokio::task::spawn_blocking(move || sink.write(&records))
            .await
            .unwrap_or_else(|e| Err(SinkError::Task(e.to_string())));

        match written {
            Ok(()) => {
                self.stats.records_written += count as u64;
                info!(
                    "Cycle {}: stored {} records to {} ({} extraction errors)",
                    cycle,
                    count,
                    self.sink.describe(),
                    soft_errors
                );
            }
            Err(e) => {
                self.stats.lost_batches += 1;
                error!("Cycle {}: failed to store {} records, batch lost: {}", cycle, count, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{Behavior, MemorySink, MockSource, NoSignals};
    use super::*;
    use crate::error::ConfigError;
    use crate::models::MatchRecord;
    use crate::storage::{FileSink, OutputMode, StorageFormat};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    const A: &str = "https://x/football/a/b/m1/";
    const B: &str = "https://x/football/a/b/m2/";
    const C: &str = "https://x/football/a/b/m3/";

    fn config(max_cycles: Option<u64>) -> PollConfig {
        let mut cfg = PollConfig::new("football", vec!["1x2".to_string()]);
        cfg.max_cycles = max_cycles;
        cfg
    }

    fn cycles_of(batch: &[MatchRecord]) -> Vec<u64> {
        batch.iter().map(|r| r.poll_cycle).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_max_cycles() {
        let source = Arc::new(MockSource::with_links(&[A, B]));
        let sink = Arc::new(MemorySink::default());
        let mut ctl = PollController::new(config(Some(3)), source.clone(), sink.clone());

        let reason = ctl.run_with(NoSignals).await.unwrap();
        assert_eq!(reason, ExitReason::MaxCyclesReached);
        assert_eq!(ctl.cycles_completed(), 3);
        assert_eq!(ctl.phase(), RunPhase::Stopped);
        assert_eq!(source.listing_calls(), 3);

        let batches = sink.batches();
        assert_eq!(batches.len(), 3);
        for (i, batch) in batches.iter().enumerate() {
            assert_eq!(cycles_of(batch), vec![i as u64 + 1; 2]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycles_are_spaced_by_poll_interval() {
        let source = Arc::new(MockSource::with_links(&[A]));
        let sink = Arc::new(MemorySink::default());
        let mut ctl = PollController::new(config(Some(3)), source, sink);

        let start = tokio::time::Instant::now();
        ctl.run_with(NoSignals).await.unwrap();
        // two sleeps between three cycles, none after the last
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(60) && elapsed < Duration::from_secs(61));
    }

    #[tokio::test]
    async fn test_short_interval_never_runs_a_cycle() {
        let source = Arc::new(MockSource::with_links(&[A]));
        let sink = Arc::new(MemorySink::default());
        let mut cfg = config(Some(1));
        cfg.poll_interval = Duration::from_secs(5);
        let mut ctl = PollController::new(cfg, source.clone(), sink.clone());

        let err = ctl.run_with(NoSignals).await.unwrap_err();
        assert!(matches!(
            err,
            PollError::Config(ConfigError::PollIntervalTooShort { got: 5, min: 10 })
        ));
        assert_eq!(source.listing_calls(), 0);
        assert!(sink.batches().is_empty());
        assert_eq!(ctl.phase(), RunPhase::Idle);
    }

    #[tokio::test]
    async fn test_empty_sport_is_fatal_at_start() {
        let source = Arc::new(MockSource::with_links(&[A]));
        let sink = Arc::new(MemorySink::default());
        let mut cfg = config(Some(1));
        cfg.sport = String::new();
        let mut ctl = PollController::new(cfg, source.clone(), sink);

        let err = ctl.run_with(NoSignals).await.unwrap_err();
        assert!(matches!(err, PollError::Filter(_)));
        assert_eq!(source.listing_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_cycle_still_persists() {
        // The mock requests shutdown as soon as the first extraction starts
        let flag = ShutdownFlag::new();
        let source = Arc::new(MockSource {
            shutdown_on_extract: Some(flag.clone()),
            extract_delay: Duration::from_secs(2),
            ..MockSource::with_links(&[A, B, C])
        });
        let sink = Arc::new(MemorySink::default());
        let mut ctl = PollController::new(config(None), source.clone(), sink.clone())
            .with_shutdown_flag(flag);

        let reason = ctl.run_with(NoSignals).await.unwrap();
        assert_eq!(reason, ExitReason::ShutdownRequested);
        assert_eq!(ctl.cycles_completed(), 1);
        assert_eq!(ctl.phase(), RunPhase::Stopped);
        assert_eq!(
            ctl.transitions(),
            &[RunPhase::Running, RunPhase::Draining, RunPhase::Stopped]
        );
        assert_eq!(source.listing_calls(), 1);
        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_sleep_wakes_early() {
        let source = Arc::new(MockSource::with_links(&[A]));
        let sink = Arc::new(MemorySink::default());
        let mut ctl = PollController::new(config(None), source, sink.clone());

        let flag = ctl.shutdown_flag();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(45)).await;
            flag.request();
        });

        let start = tokio::time::Instant::now();
        let reason = ctl.run_with(NoSignals).await.unwrap();
        assert_eq!(reason, ExitReason::ShutdownRequested);
        assert_eq!(ctl.cycles_completed(), 2);
        assert_eq!(sink.batches().len(), 2);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(45) && elapsed < Duration::from_secs(46));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_failure_is_retried_next_tick() {
        let source = Arc::new(MockSource::with_links(&[A]));
        source.listing_failures.store(1, Ordering::SeqCst);
        let sink = Arc::new(MemorySink::default());
        let mut ctl = PollController::new(config(Some(3)), source.clone(), sink.clone());

        let reason = ctl.run_with(NoSignals).await.unwrap();
        assert_eq!(reason, ExitReason::MaxCyclesReached);
        assert_eq!(source.listing_calls(), 3);
        assert_eq!(ctl.stats().failed_cycles, 1);
        let cycles: Vec<Vec<u64>> = sink.batches().iter().map(|b| cycles_of(b)).collect();
        assert_eq!(cycles, vec![vec![2], vec![3]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_error_loses_only_that_batch() {
        let source = Arc::new(MockSource::with_links(&[A]));
        let sink = Arc::new(MemorySink::default());
        sink.failures.store(1, Ordering::SeqCst);
        let mut ctl = PollController::new(config(Some(2)), source, sink.clone());

        let reason = ctl.run_with(NoSignals).await.unwrap();
        assert_eq!(reason, ExitReason::MaxCyclesReached);
        assert_eq!(ctl.stats().lost_batches, 1);
        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(cycles_of(&batches[0]), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_errors_do_not_stop_the_run() {
        let source = Arc::new(MockSource::with_links(&[A, B, C]));
        source.set_behavior(B, Behavior::Fail);
        let sink = Arc::new(MemorySink::default());
        let mut ctl = PollController::new(config(Some(2)), source, sink.clone());

        ctl.run_with(NoSignals).await.unwrap();
        assert_eq!(ctl.stats().soft_errors, 2);
        assert!(sink.batches().iter().all(|b| b.len() == 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_append_file_holds_all_cycles_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.json");
        let source = Arc::new(MockSource::with_links(&[A, B]));
        let sink = Arc::new(FileSink::new(&path, OutputMode::Append, StorageFormat::Json));
        let mut ctl = PollController::new(config(Some(3)), source, sink);

        ctl.run_with(NoSignals).await.unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        let records: Vec<MatchRecord> = serde_json::from_str(&raw).unwrap();
        assert_eq!(cycles_of(&records), vec![1, 1, 2, 2, 3, 3]);
        assert_eq!(records[0].match_link, A);
        assert_eq!(records[1].match_link, B);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_cycle_is_not_stored() {
        let source = Arc::new(MockSource::with_links(&[A]));
        source.set_behavior(A, Behavior::Fail);
        let sink = Arc::new(MemorySink::default());
        let mut ctl = PollController::new(config(Some(2)), source, sink.clone());

        let reason = ctl.run_with(NoSignals).await.unwrap();
        assert_eq!(reason, ExitReason::MaxCyclesReached);
        assert!(sink.batches().is_empty());
        assert_eq!(ctl.stats().soft_errors, 2);
        assert_eq!(ctl.stats().lost_batches, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_snapshot_survives_a_quiet_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.json");
        let sink = FileSink::new(&path, OutputMode::Overwrite, StorageFormat::Json);
        let mut previous = MatchRecord::new(A);
        previous.poll_cycle = 9;
        sink.write(&[previous]).unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        let source = Arc::new(MockSource::with_links(&[]));
        let mut ctl = PollController::new(config(Some(1)), source, Arc::new(sink));
        ctl.run_with(NoSignals).await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_while_storing_drains() {
        let flag = ShutdownFlag::new();
        let source = Arc::new(MockSource::with_links(&[A]));
        let sink = Arc::new(MemorySink {
            shutdown_on_write: Some(flag.clone()),
            ..Default::default()
        });
        let mut ctl = PollController::new(config(None), source, sink.clone())
            .with_shutdown_flag(flag);

        let reason = ctl.run_with(NoSignals).await.unwrap();
        assert_eq!(reason, ExitReason::ShutdownRequested);
        assert_eq!(ctl.cycles_completed(), 1);
        assert_eq!(sink.batches().len(), 1);
        assert_eq!(
            ctl.transitions(),
            &[RunPhase::Running, RunPhase::Draining, RunPhase::Stopped]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_controller_runs_only_once() {
        let source = Arc::new(MockSource::with_links(&[A]));
        let sink = Arc::new(MemorySink::default());
        let mut ctl = PollController::new(config(Some(1)), source, sink);

        ctl.run_with(NoSignals).await.unwrap();
        assert!(matches!(ctl.run_with(NoSignals).await, Err(PollError::Setup(_))));
    }
}
