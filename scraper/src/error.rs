use thiserror::Error;

/// Problems detected before the scrape loop starts.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("no batch span for code '{0}' (expected 'd' or 'm')")]
    UnknownBatchSpan(String),
    #[error("subreddit name must not be empty")]
    EmptySubreddit,
    #[error("days must be at least 1")]
    NoDays,
    #[error("{0} days back from today is outside the supported calendar")]
    DayRangeOutOfBounds(u32),
    #[error("{name} is out of range: {value}")]
    OutOfRange { name: &'static str, value: f64 },
}

/// Fatal outcomes of a scrape run. Upstream fetch failures never show up here;
/// the circuit breaker absorbs them.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to persist batch '{name}'")]
    Persist {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}
