use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use std::collections::HashSet;
use std::path::PathBuf;
use std::rc::Rc;

use crate::fetch::{FetchClient, FetchError};
use crate::model::{Batch, Comment, DayHarvest, Submission};
use crate::persist::Persistence;
use crate::ManualClock;

pub mod fixtures;

/// Clock pinned to midday on 2025-02-03, so a four day run covers Jan 30 - Feb 2.
pub fn test_clock() -> Rc<ManualClock> {
    Rc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 2, 3, 12, 0, 0).unwrap(),
    ))
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Fetch client that fabricates records per day and fails on demand.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    pub calls: Vec<NaiveDate>,
    pub submissions_per_day: usize,
    pub comments_per_day: usize,
    pub fail_days: HashSet<NaiveDate>,
    /// Fail this many calls before answering normally.
    pub fail_first: usize,
}

impl ScriptedFetcher {
    pub fn healthy(submissions_per_day: usize, comments_per_day: usize) -> Self {
        ScriptedFetcher {
            submissions_per_day,
            comments_per_day,
            ..ScriptedFetcher::default()
        }
    }
}

impl FetchClient for ScriptedFetcher {
    fn fetch(&mut self, subreddit: &str, day: NaiveDate) -> Result<DayHarvest, FetchError> {
        self.calls.push(day);
        if self.calls.len() <= self.fail_first || self.fail_days.contains(&day) {
            return Err(FetchError::RateLimited);
        }

        let midnight = day.and_time(NaiveTime::MIN).and_utc().timestamp() as f64;
        let submissions = (0..self.submissions_per_day)
            .map(|i| Submission {
                submission_id: format!("t3_{}_{}", day, i),
                title: format!("post {} on {}", i, day),
                author: "someone".to_string(),
                created_utc: midnight + i as f64,
                score: 1,
                upvote_ratio: 1.0,
                num_comments: 0,
                permalink: format!("/r/{}/comments/{}_{}/", subreddit, day, i),
                selftext: String::new(),
            })
            .collect();
        let comments = (0..self.comments_per_day)
            .map(|i| Comment {
                comment_id: format!("t1_{}_{}", day, i),
                submission_id: format!("t3_{}_0", day),
                author: "someone".to_string(),
                created_utc: midnight + 60.0 + i as f64,
                score: 1,
                body: "reply".to_string(),
                parent_id: format!("t3_{}_0", day),
                depth: 0,
            })
            .collect();
        Ok(DayHarvest {
            submissions,
            comments,
        })
    }
}

/// Persistence that refuses every write.
#[derive(Debug, Default)]
pub struct BrokenStore {
    pub attempts: usize,
}

impl Persistence for BrokenStore {
    fn write(&mut self, name: &str, _batch: &Batch) -> anyhow::Result<PathBuf> {
        self.attempts += 1;
        Err(anyhow::anyhow!("disk full while writing {}", name))
    }
}
