use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use log::{info, warn};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;

use crate::batch_span::BatchSpan;
use crate::circuit_breaker::{CircuitBreaker, EventContext};
use crate::clock::Clock;
use crate::elapsed::format_duration;
use crate::error::{ConfigError, ScrapeError};
use crate::fetch::FetchClient;
use crate::model::{Batch, Comment, DayHarvest, Submission};
use crate::persist::Persistence;

/// What to scrape: `days` whole UTC days ending yesterday, grouped by `span`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeJob {
    pub subreddit: String,
    pub days: u32,
    pub span: BatchSpan,
}

impl ScrapeJob {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.subreddit.trim().is_empty() {
            return Err(ConfigError::EmptySubreddit);
        }
        if self.days == 0 {
            return Err(ConfigError::NoDays);
        }
        Ok(())
    }

    /// The half-open range `[today - days, today)`, oldest first.
    pub fn day_range(&self, today: NaiveDate) -> Result<Vec<NaiveDate>, ConfigError> {
        let first = today
            .checked_sub_days(Days::new(u64::from(self.days)))
            .ok_or(ConfigError::DayRangeOutOfBounds(self.days))?;
        Ok(first.iter_days().take_while(|day| *day < today).collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub bucket_key: String,
    pub path: PathBuf,
    pub submission_count: usize,
    pub comment_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub subreddit: String,
    pub span: BatchSpan,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub batches: Vec<BatchReport>,
    pub days_fetched: usize,
    pub days_failed: usize,
    pub days_skipped: usize,
    pub total_submissions: usize,
    pub total_comments: usize,
}

impl RunSummary {
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(80);
        writeln!(f, "{}", rule)?;
        writeln!(
            f,
            "Scraping for r/{} completed on {}",
            self.subreddit,
            self.finished_at.format("%Y-%m-%d at %H:%M:%S")
        )?;
        writeln!(f, "Batch span: {}", self.span)?;
        writeln!(
            f,
            "Days fetched / failed / skipped: {} / {} / {}",
            self.days_fetched, self.days_failed, self.days_skipped
        )?;
        for batch in &self.batches {
            writeln!(
                f,
                "  {}: {} submissions, {} comments -> {}",
                batch.bucket_key,
                batch.submission_count,
                batch.comment_count,
                batch.path.display()
            )?;
        }
        writeln!(f, "Total Submissions Processed: {}", self.total_submissions)?;
        writeln!(f, "Total Comments Processed: {}", self.total_comments)?;
        writeln!(f, "Elapsed: {}", format_duration(self.elapsed()))?;
        write!(f, "{}", rule)
    }
}

/// Records collected for the bucket currently being filled.
#[derive(Debug)]
struct Accumulator {
    bucket_key: String,
    /// First day seen for this bucket; names the output file.
    first_day: DateTime<Utc>,
    submissions: Vec<Submission>,
    comments: Vec<Comment>,
}

impl Accumulator {
    fn new(bucket_key: String, first_day: DateTime<Utc>) -> Self {
        Accumulator {
            bucket_key,
            first_day,
            submissions: Vec::new(),
            comments: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.submissions.is_empty() && self.comments.is_empty()
    }

    fn fold(&mut self, harvest: DayHarvest) {
        self.submissions.extend(harvest.submissions);
        self.comments.extend(harvest.comments);
    }

    fn into_batch(self, subreddit: &str, span: BatchSpan) -> Batch {
        Batch {
            subreddit: subreddit.to_string(),
            span: span.name().to_string(),
            submission_count: self.submissions.len(),
            comment_count: self.comments.len(),
            bucket_key: self.bucket_key,
            submissions: self.submissions,
            comments: self.comments,
        }
    }
}

/// Walks the day range one day at a time, gating every fetch on the circuit
/// breaker and flushing a batch each time the bucket key changes.
pub struct ScrapeOrchestrator<F, P, C: Clock> {
    fetcher: F,
    store: P,
    breaker: CircuitBreaker<C>,
}

impl<F: FetchClient, P: Persistence, C: Clock> ScrapeOrchestrator<F, P, C> {
    pub fn new(fetcher: F, store: P, breaker: CircuitBreaker<C>) -> Self {
        ScrapeOrchestrator {
            fetcher,
            store,
            breaker,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker<C> {
        &self.breaker
    }

    pub fn store(&self) -> &P {
        &self.store
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn run(&mut self, job: &ScrapeJob) -> Result<RunSummary, ScrapeError> {
        job.validate()?;
        let started_at = self.breaker.clock().now();
        let days = job.day_range(started_at.date_naive())?;

        info!(
            "Starting scrape for r/{} for the last {} days in {} batches.",
            job.subreddit, job.days, job.span
        );

        let mut summary = RunSummary {
            subreddit: job.subreddit.clone(),
            span: job.span,
            started_at,
            finished_at: started_at,
            batches: Vec::new(),
            days_fetched: 0,
            days_failed: 0,
            days_skipped: 0,
            total_submissions: 0,
            total_comments: 0,
        };
        let mut current: Option<Accumulator> = None;
        let mut batch_index = 0usize;

        for (i, day) in days.iter().copied().enumerate() {
            let timestamp = day.and_time(NaiveTime::MIN).and_utc();
            let bucket_key = job.span.bucket_key_for(timestamp);

            if current.as_ref().map(|acc| &acc.bucket_key) != Some(&bucket_key) {
                if let Some(previous) = current.take() {
                    info!("New batch detected. Closing '{}'.", previous.bucket_key);
                    self.flush(previous, job, &mut summary)?;
                }
                batch_index += 1;
                current = Some(Accumulator::new(bucket_key.clone(), timestamp));
            }

            if !self.breaker.is_call_permitted() {
                warn!(
                    "Circuit is open; skipping r/{} on {} (batch '{}').",
                    job.subreddit, day, bucket_key
                );
                summary.days_skipped += 1;
                let mut context = self.failure_context(job, day, batch_index, &summary);
                context.insert("reason".to_string(), Value::from("circuit_open"));
                self.breaker.record_failure(&context);
                self.pace();
                continue;
            }

            match self.fetcher.fetch(&job.subreddit, day) {
                Ok(harvest) => {
                    self.breaker.record_success();
                    summary.days_fetched += 1;
                    summary.total_submissions += harvest.submissions.len();
                    summary.total_comments += harvest.comments.len();
                    if let Some(acc) = current.as_mut() {
                        acc.fold(harvest);
                    }
                }
                Err(e) => {
                    summary.days_failed += 1;
                    let mut context = self.failure_context(job, day, batch_index, &summary);
                    context.insert("error".to_string(), Value::from(e.to_string()));
                    self.breaker.record_failure(&context);
                }
            }

            let elapsed = self.breaker.clock().now() - started_at;
            info!(
                "[{}/{}] r/{} {} done; {} submissions, {} comments so far ({} elapsed, circuit {}).",
                i + 1,
                days.len(),
                job.subreddit,
                day,
                summary.total_submissions,
                summary.total_comments,
                format_duration(elapsed),
                self.breaker.state()
            );
            self.pace();
        }

        if let Some(last) = current.take() {
            self.flush(last, job, &mut summary)?;
        }

        summary.finished_at = self.breaker.clock().now();
        info!("Scraping job for r/{} finished.", job.subreddit);
        Ok(summary)
    }

    fn flush(
        &mut self,
        acc: Accumulator,
        job: &ScrapeJob,
        summary: &mut RunSummary,
    ) -> Result<(), ScrapeError> {
        if acc.is_empty() {
            info!("Batch '{}' collected nothing; not writing it.", acc.bucket_key);
            return Ok(());
        }

        let name = job.span.output_name(&job.subreddit, acc.first_day);
        let batch = acc.into_batch(&job.subreddit, job.span);
        info!("Saving data batch for '{}'.", batch.bucket_key);
        let path = self
            .store
            .write(&name, &batch)
            .map_err(|source| ScrapeError::Persist {
                name: name.clone(),
                source,
            })?;

        summary.batches.push(BatchReport {
            bucket_key: batch.bucket_key,
            path,
            submission_count: batch.submission_count,
            comment_count: batch.comment_count,
        });
        Ok(())
    }

    fn failure_context(
        &self,
        job: &ScrapeJob,
        day: NaiveDate,
        batch_index: usize,
        summary: &RunSummary,
    ) -> EventContext {
        let mut context = EventContext::new();
        context.insert("subreddit".to_string(), Value::from(job.subreddit.as_str()));
        context.insert("day".to_string(), Value::from(day.to_string()));
        context.insert("batch".to_string(), Value::from(batch_index));
        context.insert("submissions".to_string(), Value::from(summary.total_submissions));
        context.insert("comments".to_string(), Value::from(summary.total_comments));
        context
    }

    fn pace(&self) {
        self.breaker.clock().sleep(self.breaker.backoff());
    }
}
