use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Calendar window that decides which output file a day's records land in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchSpan {
    Day,
    Month,
}

impl BatchSpan {
    pub const ALL: [BatchSpan; 2] = [BatchSpan::Day, BatchSpan::Month];

    /// Looks a span up by its selector. `D`/`M` are accepted as well since that is
    /// how the command line spells them.
    pub fn from_code(code: &str) -> Result<Self, ConfigError> {
        BatchSpan::ALL
            .into_iter()
            .find(|span| span.code().eq_ignore_ascii_case(code))
            .ok_or_else(|| ConfigError::UnknownBatchSpan(code.to_string()))
    }

    pub fn code(self) -> &'static str {
        match self {
            BatchSpan::Day => "d",
            BatchSpan::Month => "m",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BatchSpan::Day => "DAY",
            BatchSpan::Month => "MONTH",
        }
    }

    /// `strftime` template for bucket keys and file name suffixes.
    pub fn key_format(self) -> &'static str {
        match self {
            BatchSpan::Day => "%Y-%m-%d",
            BatchSpan::Month => "%Y-%m",
        }
    }

    /// Zero-padded, most significant field first, so keys sort the same way as time.
    pub fn bucket_key_for(self, timestamp: DateTime<Utc>) -> String {
        timestamp.format(self.key_format()).to_string()
    }

    pub fn output_name(self, subreddit: &str, timestamp: DateTime<Utc>) -> String {
        format!("r_{}_{}.json", subreddit, self.bucket_key_for(timestamp))
    }
}

impl FromStr for BatchSpan {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BatchSpan::from_code(s)
    }
}

impl fmt::Display for BatchSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
