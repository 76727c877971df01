// Scripted stand-ins for the search API, scoring service and storage.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use sentiment_fetcher::error::FetchError;
use sentiment_fetcher::ingest::types::{
    Author, IngestedPost, RateBudget, RawPost, SearchApi, SearchPage, SearchQuery, Watermark,
};
use sentiment_fetcher::sentiment::{ScoreKey, ScoringService};
use sentiment_fetcher::storage::{PersistOutcome, PostStore, SqliteStore};

pub fn raw(id: u64, text: &str) -> RawPost {
    let t = Utc.with_ymd_and_hms(2020, 7, 18, 14, 8, 3).unwrap();
    RawPost {
        id,
        author: Author {
            handle: format!("user{id}"),
            followers_count: 10,
            favourites_count: 20,
            friends_count: 30,
            statuses_count: 40,
            created_at: t,
        },
        created_at: t,
        full_text: text.into(),
        retweeted: None,
        in_reply_to: None,
    }
}

pub fn page(posts: Vec<RawPost>) -> SearchPage {
    SearchPage {
        posts,
        malformed: 0,
        budget: RateBudget {
            limit: Some(450),
            remaining: Some(400),
            reset_at: None,
        },
    }
}

/// Search API that replays scripted answers per account. Once the script is
/// exhausted it keeps returning `fallback` (filtered by `since_id`).
#[derive(Default)]
pub struct ScriptedSearch {
    script: Mutex<HashMap<String, VecDeque<Result<SearchPage, FetchError>>>>,
    fallback: Mutex<HashMap<String, Vec<RawPost>>>,
    pub queries: Mutex<Vec<SearchQuery>>,
}

impl ScriptedSearch {
    pub fn push(&self, account: &str, answer: Result<SearchPage, FetchError>) {
        self.script
            .lock()
            .unwrap()
            .entry(account.to_string())
            .or_default()
            .push_back(answer);
    }

    pub fn serve(&self, account: &str, posts: Vec<RawPost>) {
        self.fallback
            .lock()
            .unwrap()
            .insert(account.to_string(), posts);
    }

    pub fn since_values(&self, account: &str) -> Vec<Option<u64>> {
        self.queries
            .lock()
            .unwrap()
            .iter()
            .filter(|q| q.account == account)
            .map(|q| q.since.map(|w| w.0))
            .collect()
    }
}

#[async_trait]
impl SearchApi for ScriptedSearch {
    async fn search(&self, query: &SearchQuery) -> Result<SearchPage, FetchError> {
        self.queries.lock().unwrap().push(query.clone());
        if let Some(answer) = self
            .script
            .lock()
            .unwrap()
            .get_mut(&query.account)
            .and_then(|q| q.pop_front())
        {
            return answer;
        }
        let posts = self
            .fallback
            .lock()
            .unwrap()
            .get(&query.account)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|p| query.since.map_or(true, |w| p.id > w.0))
            .collect();
        Ok(page(posts))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Scores every key 0.5 and records what it was asked.
#[derive(Default)]
pub struct FixedScorer {
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<ScoreKey>>,
    pub fail_next: AtomicUsize,
}

#[async_trait]
impl ScoringService for FixedScorer {
    async fn predict(
        &self,
        keys: &[ScoreKey],
        _account: &str,
    ) -> Result<Vec<(ScoreKey, Option<f64>)>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(FetchError::Scoring("service unavailable".into()));
        }
        self.seen.lock().unwrap().extend_from_slice(keys);
        Ok(keys.iter().cloned().map(|k| (k, Some(0.5))).collect())
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

/// SQLite in memory, with an optional number of forced persist failures.
pub struct FlakyStore {
    pub inner: SqliteStore,
    pub fail_persists: AtomicUsize,
    pub fail_watermark: AtomicUsize,
    pub persisted_ids: Mutex<Vec<u64>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteStore::open_in_memory().unwrap(),
            fail_persists: AtomicUsize::new(0),
            fail_watermark: AtomicUsize::new(0),
            persisted_ids: Mutex::new(Vec::new()),
        }
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl PostStore for FlakyStore {
    async fn watermark(&self, target_id: &str) -> Result<Option<Watermark>, FetchError> {
        if take_one(&self.fail_watermark) {
            return Err(FetchError::Persist("database is locked".into()));
        }
        self.inner.watermark(target_id).await
    }

    async fn persist_batch(
        &self,
        target_id: &str,
        posts: &[IngestedPost],
    ) -> Result<PersistOutcome, FetchError> {
        if take_one(&self.fail_persists) {
            return Err(FetchError::Persist("disk I/O error".into()));
        }
        let out = self.inner.persist_batch(target_id, posts).await?;
        self.persisted_ids
            .lock()
            .unwrap()
            .extend(posts.iter().map(|p| p.post_id));
        Ok(out)
    }
}
