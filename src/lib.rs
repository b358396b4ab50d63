//! Live-odds poller.
//!
//! Library crate exposing the polling core, the OddsPortal scraper and the
//! file sinks to the binary entry point.

pub mod config;
pub mod error;
pub mod models;
pub mod odds;
pub mod poller;
pub mod storage;
