use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use live_odds_poller::config::Config;
use live_odds_poller::odds::OddsPortal;
use live_odds_poller::poller::{ExitReason, PollController};
use live_odds_poller::storage::FileSink;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();

    match run(&config).await {
        ExitReason::FatalError(msg) => {
            error!("Live polling aborted: {}", msg);
            ExitCode::FAILURE
        }
        reason => {
            info!("Live polling finished: {}", reason);
            ExitCode::SUCCESS
        }
    }
}

/// Run one polling session; every failure before the loop starts is fatal.
async fn run(config: &Config) -> ExitReason {
    match try_run(config).await {
        Ok(reason) => reason,
        Err(e) => ExitReason::FatalError(format!("{:#}", e)),
    }
}

async fn try_run(config: &Config) -> Result<ExitReason> {
    config.validate()?;
    let poll = config.poll_config();

    let source = OddsPortal::new(
        &config.listing_url,
        &config.user_agent,
        Duration::from_secs(config.request_timeout),
        &config.proxies,
        config.scrape_options(),
    )?;
    let sink = FileSink::new(poll.file_path.clone(), poll.output_mode, poll.storage_format);

    info!(
        "Starting live scraper for {} (markets: {}, leagues: {}) – Ctrl+C stops after the current cycle",
        poll.sport,
        poll.markets.join(","),
        if poll.leagues.is_empty() {
            "all".to_string()
        } else {
            poll.leagues.join(",")
        }
    );

    let mut controller = PollController::new(poll, Arc::new(source), Arc::new(sink));
    Ok(controller.run().await?)
}
