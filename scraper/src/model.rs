use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Comment {
    pub comment_id: String,
    pub submission_id: String,
    pub author: String,
    pub created_utc: f64,
    pub score: i64,
    pub body: String,
    pub parent_id: String,
    pub depth: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Submission {
    pub submission_id: String,
    pub title: String,
    pub author: String,
    pub created_utc: f64,
    pub score: i64,
    pub upvote_ratio: f64,
    pub num_comments: u64,
    pub permalink: String,
    pub selftext: String,
}

/// Everything fetched for one subreddit day.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct DayHarvest {
    pub submissions: Vec<Submission>,
    pub comments: Vec<Comment>,
}

/// One output file: all records collected under a single bucket key.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Batch {
    pub subreddit: String,
    pub span: String,
    pub bucket_key: String,
    pub submission_count: usize,
    pub comment_count: usize,
    pub submissions: Vec<Submission>,
    pub comments: Vec<Comment>,
}
