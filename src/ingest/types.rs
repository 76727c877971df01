// src/ingest/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// Author of a post as reported by the search API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Author {
    pub handle: String,
    pub followers_count: u64,
    pub favourites_count: u64,
    pub friends_count: u64,
    pub statuses_count: u64,
    pub created_at: DateTime<Utc>,
}

/// The post a retweet points at.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Retweeted {
    pub author_handle: String,
    pub full_text: String,
}

/// One search result, already validated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawPost {
    pub id: u64,
    pub author: Author,
    pub created_at: DateTime<Utc>,
    pub full_text: String,
    pub retweeted: Option<Retweeted>,
    pub in_reply_to: Option<String>,
}

/// A post accepted for a target, carried through normalization, scoring and storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestedPost {
    pub post_id: u64,
    pub target_id: String,
    pub inserted_at: DateTime<Utc>,
    /// Effective text: the synthesized `RT @author ...` form for retweets.
    pub full_text: String,
    pub processed_text: String,
    pub author: Author,
    pub posted_at: DateTime<Utc>,
    pub is_retweet: bool,
    pub sentiment: Option<f64>,
}

impl IngestedPost {
    /// Key used for deduplication before scoring.
    pub fn score_key(&self) -> (&str, &str) {
        (&self.full_text, &self.processed_text)
    }
}

/// Highest post id durably stored for a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Watermark(pub u64);

impl Watermark {
    /// Highest id in a batch, if any.
    pub fn of_batch(posts: &[IngestedPost]) -> Option<Watermark> {
        posts.iter().map(|p| p.post_id).max().map(Watermark)
    }
}

impl std::fmt::Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parameters of one search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub account: String,
    pub excluded_accounts: Vec<String>,
    pub language: String,
    pub page_size: u32,
    pub since: Option<Watermark>,
}

impl SearchQuery {
    /// `to:acc OR (@acc -@other ...)`
    pub fn query_string(&self) -> String {
        let mut q = format!("to:{acc} OR (@{acc}", acc = self.account);
        for other in &self.excluded_accounts {
            if other != &self.account {
                q.push_str(" -@");
                q.push_str(other);
            }
        }
        q.push(')');
        q
    }
}

/// Snapshot of the search endpoint's rate-limit window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RateBudget {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub reset_at: Option<DateTime<Utc>>,
}

/// One page of search results.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub posts: Vec<RawPost>,
    /// Results that could not be turned into a `RawPost`.
    pub malformed: usize,
    pub budget: RateBudget,
}

#[async_trait::async_trait]
pub trait SearchApi: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<SearchPage, FetchError>;
    fn name(&self) -> &'static str;
}
