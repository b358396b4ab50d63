pub mod markets;
pub mod oddsportal;
pub mod source;

pub use oddsportal::{OddsPortal, ScrapeOptions, DEFAULT_LISTING_URL, DEFAULT_USER_AGENT};
pub use source::OddsSource;
