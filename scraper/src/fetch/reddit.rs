use chrono::{NaiveDate, NaiveTime};
use log::{debug, info};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::{FetchClient, FetchError};
use crate::clock::{Clock, SystemClock};
use crate::model::{Comment, DayHarvest, Submission};

pub const DEFAULT_USER_AGENT: &str = "reddit-scraper/0.1";
const BASE_URL: &str = "https://www.reddit.com";
const PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
struct Listing<T> {
    data: ListingData<T>,
}

#[derive(Debug, Deserialize)]
struct ListingData<T> {
    after: Option<String>,
    children: Vec<Thing<T>>,
}

#[derive(Debug, Deserialize)]
struct Thing<T> {
    kind: String,
    data: T,
}

#[derive(Debug, Deserialize)]
struct RawSubmission {
    id: String,
    title: String,
    author: Option<String>,
    created_utc: f64,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    upvote_ratio: f64,
    #[serde(default)]
    num_comments: u64,
    #[serde(default)]
    permalink: String,
    #[serde(default)]
    selftext: String,
}

#[derive(Debug, Deserialize)]
struct RawComment {
    id: String,
    author: Option<String>,
    body: Option<String>,
    created_utc: f64,
    #[serde(default)]
    score: i64,
    parent_id: String,
    #[serde(default)]
    depth: u32,
    #[serde(default)]
    replies: Value,
}

/// Source of raw response bodies. Non-success answers are already mapped to
/// `FetchError` here.
pub trait Transport {
    fn get_text(&self, url: &str) -> Result<String, FetchError>;
}

/// Blocking reqwest transport.
pub struct HttpTransport {
    http: Client,
}

impl HttpTransport {
    pub fn new(user_agent: &str) -> Result<Self, FetchError> {
        let http = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| FetchError::Transport {
                url: BASE_URL.to_string(),
                message: e.to_string(),
            })?;
        Ok(HttpTransport { http })
    }
}

impl Transport for HttpTransport {
    fn get_text(&self, url: &str) -> Result<String, FetchError> {
        debug!("GET {}", url);
        let response = self.http.get(url).send().map_err(|e| FetchError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        if let Some(err) = status_error(response.status(), url) {
            return Err(err);
        }

        response.text().map_err(|e| FetchError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

/// 429 is reported separately from other non-success statuses.
pub fn status_error(status: StatusCode, url: &str) -> Option<FetchError> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        Some(FetchError::RateLimited)
    } else if !status.is_success() {
        Some(FetchError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        })
    } else {
        None
    }
}

/// Client over Reddit's public JSON listings.
///
/// Pages of `/new` are cached and pruned as days are served, so walking days
/// oldest first pages through the subreddit only once. Every request is followed
/// by `request_delay` on the clock.
pub struct RedditClient<T: Transport = HttpTransport, C: Clock = SystemClock> {
    transport: T,
    clock: C,
    base_url: String,
    request_delay: Duration,
    subreddit: Option<String>,
    cached: Vec<Submission>,
    oldest_seen: f64,
    after: Option<String>,
    exhausted: bool,
}

impl RedditClient {
    pub fn new(user_agent: &str, request_delay: Duration) -> Result<Self, FetchError> {
        Ok(RedditClient::with_transport(
            HttpTransport::new(user_agent)?,
            SystemClock,
            BASE_URL,
            request_delay,
        ))
    }
}

impl<T: Transport, C: Clock> RedditClient<T, C> {
    pub fn with_transport(
        transport: T,
        clock: C,
        base_url: &str,
        request_delay: Duration,
    ) -> Self {
        RedditClient {
            transport,
            clock,
            base_url: base_url.trim_end_matches('/').to_string(),
            request_delay,
            subreddit: None,
            cached: Vec::new(),
            oldest_seen: f64::INFINITY,
            after: None,
            exhausted: false,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn request(&self, url: &str) -> Result<String, FetchError> {
        let body = self.transport.get_text(url)?;
        self.clock.sleep(self.request_delay);
        Ok(body)
    }

    fn reset_for(&mut self, subreddit: &str) {
        if self.subreddit.as_deref() != Some(subreddit) {
            self.subreddit = Some(subreddit.to_string());
            self.cached.clear();
            self.oldest_seen = f64::INFINITY;
            self.after = None;
            self.exhausted = false;
        }
    }

    /// Pages `/new` until the oldest submission seen predates `boundary`.
    fn fill_until(&mut self, subreddit: &str, boundary: f64) -> Result<(), FetchError> {
        while !self.exhausted && self.oldest_seen >= boundary {
            let mut url = format!(
                "{}/r/{}/new.json?limit={}&raw_json=1",
                self.base_url, subreddit, PAGE_SIZE
            );
            if let Some(after) = &self.after {
                url.push_str(&format!("&after={}", after));
            }

            let body = self.request(&url)?;
            let (page, after) = parse_listing(&body).map_err(|e| FetchError::Malformed {
                url: url.clone(),
                message: e.to_string(),
            })?;
            debug!("Fetched {} submissions from r/{}", page.len(), subreddit);

            self.exhausted = after.is_none() || page.is_empty();
            self.after = after;
            if let Some(oldest) = page.last() {
                self.oldest_seen = self.oldest_seen.min(oldest.created_utc);
            }
            self.cached.extend(page);
        }
        Ok(())
    }

    fn comments_for(&self, submission: &Submission) -> Result<Vec<Comment>, FetchError> {
        let id = submission.submission_id.trim_start_matches("t3_");
        let url = format!("{}/comments/{}.json?limit=500&raw_json=1", self.base_url, id);
        let body = self.request(&url)?;

        parse_thread(&body, &submission.submission_id).map_err(|e| FetchError::Malformed {
            url,
            message: e.to_string(),
        })
    }
}

impl<T: Transport, C: Clock> FetchClient for RedditClient<T, C> {
    fn fetch(&mut self, subreddit: &str, day: NaiveDate) -> Result<DayHarvest, FetchError> {
        self.reset_for(subreddit);
        let start = day.and_time(NaiveTime::MIN).and_utc().timestamp() as f64;
        let end = start + 86_400.0;

        self.fill_until(subreddit, start)?;

        let submissions = submissions_between(&self.cached, start, end);
        let mut comments = Vec::new();
        for submission in &submissions {
            comments.extend(self.comments_for(submission)?);
        }

        // Later days never need anything older than this one.
        self.cached.retain(|s| s.created_utc >= end);

        info!(
            "r/{} {}: {} submissions, {} comments",
            subreddit,
            day,
            submissions.len(),
            comments.len()
        );
        Ok(DayHarvest {
            submissions,
            comments,
        })
    }
}

/// Submissions created in `[start, end)`, oldest first. `cached` is newest first.
fn submissions_between(cached: &[Submission], start: f64, end: f64) -> Vec<Submission> {
    cached
        .iter()
        .filter(|s| s.created_utc >= start && s.created_utc < end)
        .rev()
        .cloned()
        .collect()
}

fn submissions_from_listing(
    listing: Listing<RawSubmission>,
) -> (Vec<Submission>, Option<String>) {
    let submissions = listing
        .data
        .children
        .into_iter()
        .filter(|thing| thing.kind == "t3")
        .map(|thing| {
            let raw = thing.data;
            Submission {
                submission_id: format!("t3_{}", raw.id),
                title: raw.title,
                author: raw.author.unwrap_or_else(|| "[deleted]".to_string()),
                created_utc: raw.created_utc,
                score: raw.score,
                upvote_ratio: raw.upvote_ratio,
                num_comments: raw.num_comments,
                permalink: raw.permalink,
                selftext: raw.selftext,
            }
        })
        .collect();
    (submissions, listing.data.after)
}

fn is_gone(text: &str) -> bool {
    text.is_empty() || text == "[deleted]" || text == "[removed]"
}

/// Depth-first walk of a comment tree. "more" stubs and deleted comments are
/// skipped, but replies under a deleted comment are still kept.
fn flatten_comments(tree: Listing<Value>, submission_id: &str, out: &mut Vec<Comment>) {
    for thing in tree.data.children {
        if thing.kind != "t1" {
            continue;
        }
        let Ok(raw) = serde_json::from_value::<RawComment>(thing.data) else {
            continue;
        };

        let author = raw.author.unwrap_or_default();
        let body = raw.body.unwrap_or_default();
        if !is_gone(&author) && !is_gone(&body) {
            out.push(Comment {
                comment_id: format!("t1_{}", raw.id),
                submission_id: submission_id.to_string(),
                author,
                created_utc: raw.created_utc,
                score: raw.score,
                body,
                parent_id: raw.parent_id,
                depth: raw.depth,
            });
        }

        // An empty string means no replies.
        if let Ok(replies) = serde_json::from_value::<Listing<Value>>(raw.replies) {
            flatten_comments(replies, submission_id, out);
        }
    }
}

/// Parses a `/new.json` page into submissions and the `after` cursor.
pub fn parse_listing(
    json: &str,
) -> Result<(Vec<Submission>, Option<String>), serde_json::Error> {
    let listing: Listing<RawSubmission> = serde_json::from_str(json)?;
    Ok(submissions_from_listing(listing))
}

/// Parses a `/comments/<id>.json` thread into a flat comment list.
pub fn parse_thread(
    json: &str,
    submission_id: &str,
) -> Result<Vec<Comment>, serde_json::Error> {
    let thread: Vec<Listing<Value>> = serde_json::from_str(json)?;
    let mut comments = Vec::new();
    match thread.into_iter().nth(1) {
        Some(tree) => flatten_comments(tree, submission_id, &mut comments),
        None => {
            return Err(<serde_json::Error as serde::de::Error>::custom(
                "comment listing missing",
            ))
        }
    }
    Ok(comments)
}
