pub mod batch_span;
pub mod circuit_breaker;
pub mod clock;
pub mod elapsed;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod model;
pub mod orchestrator;
pub mod persist;

#[cfg(test)]
pub mod tests;

// Re-export key types for easier access
pub use crate::batch_span::BatchSpan;
pub use crate::circuit_breaker::{BreakerConfig, CircuitBreaker, CircuitState, EventContext};
pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::elapsed::{format_duration, minutes_between, ElapsedError, TimeUnit};
pub use crate::error::{ConfigError, ScrapeError};
pub use crate::fetch::{FetchClient, FetchError, RedditClient};
pub use crate::model::{Batch, Comment, DayHarvest, Submission};
pub use crate::orchestrator::{BatchReport, RunSummary, ScrapeJob, ScrapeOrchestrator};
pub use crate::persist::{JsonFileStore, MemoryStore, Persistence};
