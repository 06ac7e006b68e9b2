use chrono::NaiveDate;
use thiserror::Error;

use crate::model::DayHarvest;

pub mod reddit;

pub use reddit::{HttpTransport, RedditClient, Transport, DEFAULT_USER_AGENT};

/// Transient upstream failure. The orchestrator hands these to the circuit breaker
/// and never propagates them.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("rate limited by upstream")]
    RateLimited,
    #[error("upstream returned HTTP {status} for {url}")]
    Status { status: u16, url: String },
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("malformed response from {url}: {message}")]
    Malformed { url: String, message: String },
}

/// Supplies the submissions and comments posted to a subreddit on one UTC day.
pub trait FetchClient {
    fn fetch(&mut self, subreddit: &str, day: NaiveDate) -> Result<DayHarvest, FetchError>;
}
