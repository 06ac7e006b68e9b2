use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use reddit_scraper::circuit_breaker::{
    DEFAULT_COOLDOWN_MINUTES, DEFAULT_FAILURE_THRESHOLD, DEFAULT_RATE_LIMIT_PER_MINUTE,
    DEFAULT_SUCCESS_THRESHOLD,
};
use reddit_scraper::fetch::DEFAULT_USER_AGENT;
use reddit_scraper::logging;
use reddit_scraper::{
    BatchSpan, BreakerConfig, CircuitBreaker, ConfigError, JsonFileStore, RedditClient,
    ScrapeJob, ScrapeOrchestrator,
};
use std::path::PathBuf;

/// Scrape a subreddit's submissions and comments into daily or monthly JSON batches
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Subreddit to scrape, without the r/ prefix
    #[arg(long, short = 's')]
    subreddit: String,

    /// Number of whole days back from today to scrape
    #[arg(long, short = 'd')]
    days: u32,

    /// Batch span: D for one file per day, M for one file per month
    #[arg(long, short = 'b')]
    batch: BatchSpan,

    /// Directory the batch files are written to (created on demand)
    #[arg(long, env = "FILE_LOCATION", default_value = "data")]
    data_dir: PathBuf,

    /// Write logs to this file instead of stderr
    #[arg(long, env = "LOG_FILEPATH")]
    log_file: Option<PathBuf>,

    /// With --log-file, also copy log lines to stderr
    #[arg(long, env = "LOG_TO_CONSOLE")]
    log_to_console: bool,

    /// Consecutive failures tolerated before the circuit opens
    #[arg(long, env = "FAILURE_THRESHOLD", default_value_t = DEFAULT_FAILURE_THRESHOLD)]
    failure_threshold: u32,

    /// Consecutive half-open successes needed, plus one, to close the circuit
    #[arg(long, env = "SUCCESS_THRESHOLD", default_value_t = DEFAULT_SUCCESS_THRESHOLD)]
    success_threshold: u32,

    /// Minutes the circuit stays open before it may try again
    #[arg(long, env = "COOLDOWN_MINUTES", default_value_t = DEFAULT_COOLDOWN_MINUTES as f64)]
    cooldown_minutes: f64,

    /// Upstream requests per minute
    #[arg(long, env = "RATE_LIMIT_PER_MINUTE", default_value_t = DEFAULT_RATE_LIMIT_PER_MINUTE)]
    rate_limit: u32,

    /// User agent sent to Reddit
    #[arg(long, env = "REDDIT_USER_AGENT", default_value = DEFAULT_USER_AGENT)]
    user_agent: String,
}

impl Cli {
    fn breaker_config(&self) -> Result<BreakerConfig, ConfigError> {
        if !self.cooldown_minutes.is_finite() {
            return Err(ConfigError::OutOfRange {
                name: "cooldown-minutes",
                value: self.cooldown_minutes,
            });
        }
        let config = BreakerConfig {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            cooldown: chrono::Duration::milliseconds((self.cooldown_minutes * 60_000.0) as i64),
            rate_limit_per_minute: self.rate_limit,
            ..BreakerConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    // A missing .env is fine; real environment variables still apply
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    logging::init(cli.log_file.as_deref(), cli.log_to_console)?;

    info!(
        "CLI started for r/{}, days={}, batch={}",
        cli.subreddit, cli.days, cli.batch
    );

    let job = ScrapeJob {
        subreddit: cli.subreddit.clone(),
        days: cli.days,
        span: cli.batch,
    };
    job.validate()?;
    let config = cli.breaker_config()?;

    let fetcher = RedditClient::new(&cli.user_agent, config.request_delay())
        .context("Failed to build the Reddit client")?;
    let store = JsonFileStore::new(&cli.data_dir);
    let breaker = CircuitBreaker::new(config);

    let mut orchestrator = ScrapeOrchestrator::new(fetcher, store, breaker);
    let summary = orchestrator.run(&job)?;

    println!("{}", summary);
    Ok(())
}
