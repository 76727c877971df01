// src/ingest/cycle.rs
//! One end-to-end pass for a single target:
//! `ReadWatermark -> Query -> Filter -> Normalize -> Score -> Persist -> Done`,
//! with a bounded retry wrapped around `Query..=Persist`.

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

use crate::config::targets::Target;
use crate::error::FetchError;
use crate::ingest::anon_hash;
use crate::ingest::filter::{classify, effective_text, Decision};
use crate::ingest::normalize::normalize;
use crate::ingest::types::{IngestedPost, RateBudget, RawPost, SearchApi, SearchQuery, Watermark};
use crate::sentiment::{score_posts, ScoringService};
use crate::storage::{PersistOutcome, PostStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    ReadWatermark,
    Query,
    Filter,
    Normalize,
    Score,
    Persist,
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// A batch was stored and the watermark advanced.
    Persisted {
        fetched: usize,
        accepted: usize,
        stored: PersistOutcome,
    },
    /// Nothing accepted; no storage write happened.
    NothingNew { fetched: usize },
    /// The search API signalled a rate limit; the next pass resumes from the watermark.
    RateLimited { reset_at: Option<DateTime<Utc>> },
    /// Retries exhausted (or the watermark could not be read); watermark unchanged.
    Abandoned {
        state: CycleState,
        kind: &'static str,
        error: String,
    },
}

impl CycleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Persisted { .. } => "persisted",
            CycleOutcome::NothingNew { .. } => "nothing_new",
            CycleOutcome::RateLimited { .. } => "rate_limited",
            CycleOutcome::Abandoned { .. } => "abandoned",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub target_id: String,
    pub outcome: CycleOutcome,
    pub attempts: u32,
    pub watermark_before: Option<Watermark>,
    pub budget: Option<RateBudget>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub language: String,
    pub page_size: u32,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            language: "es".to_string(),
            page_size: 100,
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

pub struct FetchCycle {
    search: Arc<dyn SearchApi>,
    scorer: Arc<dyn ScoringService>,
    store: Arc<dyn PostStore>,
    tracked_accounts: Vec<String>,
    settings: CycleSettings,
}

/// Mutable progress of one attempt, kept across the `?` boundaries for reporting.
#[derive(Debug)]
struct Progress {
    state: CycleState,
    budget: Option<RateBudget>,
}

impl FetchCycle {
    pub fn new(
        search: Arc<dyn SearchApi>,
        scorer: Arc<dyn ScoringService>,
        store: Arc<dyn PostStore>,
        targets: &[Target],
        settings: CycleSettings,
    ) -> Self {
        Self {
            search,
            scorer,
            store,
            tracked_accounts: targets.iter().map(|t| t.account.clone()).collect(),
            settings,
        }
    }

    /// Run a full cycle for `target`. Never fails: failures are contained in the report.
    pub async fn run(&self, target: &Target) -> CycleReport {
        let span = tracing::info_span!(
            "fetch_cycle",
            target_id = %target.id,
            search = self.search.name(),
            scorer = self.scorer.name()
        );
        self.run_inner(target).instrument(span).await
    }

    async fn run_inner(&self, target: &Target) -> CycleReport {
        let t0 = Instant::now();
        tracing::info!(account = %target.account, "starting fetch cycle");

        let mut report = CycleReport {
            target_id: target.id.clone(),
            outcome: CycleOutcome::NothingNew { fetched: 0 },
            attempts: 0,
            watermark_before: None,
            budget: None,
            elapsed: Duration::ZERO,
        };

        let outcome = match self.store.watermark(&target.id).await {
            Err(e) => {
                tracing::error!(error = %e, "could not read watermark; skipping target this pass");
                CycleOutcome::Abandoned {
                    state: CycleState::ReadWatermark,
                    kind: e.kind(),
                    error: e.to_string(),
                }
            }
            Ok(since) => {
                report.watermark_before = since;
                tracing::info!(watermark = ?since.map(|w| w.0), "read watermark");
                self.attempt_with_retries(target, since, &mut report).await
            }
        };
        report.outcome = outcome;

        report.elapsed = t0.elapsed();
        let ms = report.elapsed.as_secs_f64() * 1_000.0;
        histogram!("fetch_cycle_ms").record(ms);
        counter!(
            "fetch_cycles_total",
            "target" => target.id.clone(),
            "outcome" => report.outcome.label()
        )
        .increment(1);
        tracing::info!(
            outcome = report.outcome.label(),
            attempts = report.attempts,
            elapsed_ms = ms as u64,
            "completed fetch cycle"
        );
        report
    }

    async fn attempt_with_retries(
        &self,
        target: &Target,
        since: Option<Watermark>,
        report: &mut CycleReport,
    ) -> CycleOutcome {
        let max_attempts = self.settings.max_attempts.max(1);
        loop {
            report.attempts += 1;
            let mut progress = Progress {
                state: CycleState::Query,
                budget: None,
            };
            let result = self.attempt(target, since, &mut progress).await;
            if progress.budget.is_some() {
                report.budget = progress.budget;
            }

            match result {
                Ok(outcome) => return outcome,
                Err(FetchError::RateLimited { reset_at }) => {
                    tracing::warn!(reset_at = ?reset_at, "rate limit reached; aborting cycle");
                    counter!("fetch_rate_limited_total").increment(1);
                    return CycleOutcome::RateLimited { reset_at };
                }
                Err(e) if report.attempts < max_attempts => {
                    tracing::warn!(
                        error = %e,
                        state = ?progress.state,
                        attempt = report.attempts,
                        retry_in_secs = self.settings.retry_delay.as_secs_f64(),
                        "fetch attempt failed; will retry"
                    );
                    counter!("fetch_retries_total", "kind" => e.kind()).increment(1);
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        state = ?progress.state,
                        attempts = report.attempts,
                        "giving up on target for this pass"
                    );
                    return CycleOutcome::Abandoned {
                        state: progress.state,
                        kind: e.kind(),
                        error: e.to_string(),
                    };
                }
            }
        }
    }

    async fn attempt(
        &self,
        target: &Target,
        since: Option<Watermark>,
        progress: &mut Progress,
    ) -> Result<CycleOutcome, FetchError> {
        // Query
        progress.state = CycleState::Query;
        let query = SearchQuery {
            account: target.account.clone(),
            excluded_accounts: self.tracked_accounts.clone(),
            language: self.settings.language.clone(),
            page_size: self.settings.page_size,
            since,
        };
        let page = self.search.search(&query).await?;
        progress.budget = Some(page.budget);
        if let Some(remaining) = page.budget.remaining {
            gauge!("search_rate_limit_remaining").set(remaining as f64);
        }
        let fetched = page.posts.len();
        tracing::info!(
            fetched,
            malformed = page.malformed,
            budget_remaining = ?page.budget.remaining,
            budget_limit = ?page.budget.limit,
            "got search results"
        );
        counter!("fetch_posts_total").increment(fetched as u64);

        // Filter
        progress.state = CycleState::Filter;
        let inserted_at = Utc::now();
        let mut candidates = select_candidates(page.posts, target, since, inserted_at);

        // Normalize
        progress.state = CycleState::Normalize;
        for post in candidates.iter_mut() {
            post.processed_text = normalize(&post.full_text);
        }

        // Score
        progress.state = CycleState::Score;
        if candidates.is_empty() {
            progress.state = CycleState::Done;
            return Ok(CycleOutcome::NothingNew { fetched });
        }
        let accepted = candidates.len();
        let scored = score_posts(self.scorer.as_ref(), candidates, target).await?;

        // Persist
        progress.state = CycleState::Persist;
        tracing::info!(accepted, "inserting posts into storage");
        let stored = self.store.persist_batch(&target.id, &scored).await?;
        counter!("fetch_inserted_total").increment(stored.inserted as u64);
        if stored.duplicates > 0 {
            counter!("fetch_duplicates_total").increment(stored.duplicates as u64);
        }
        gauge!("fetch_watermark", "target" => target.id.clone()).set(stored.watermark.0 as f64);

        progress.state = CycleState::Done;
        Ok(CycleOutcome::Persisted {
            fetched,
            accepted,
            stored,
        })
    }
}

/// Apply the filter to a page and build unscored, unnormalized candidates.
/// Results at or below the watermark are dropped even if the API returned them.
pub fn select_candidates(
    posts: Vec<RawPost>,
    target: &Target,
    since: Option<Watermark>,
    inserted_at: DateTime<Utc>,
) -> Vec<IngestedPost> {
    let mut out = Vec::with_capacity(posts.len());
    for raw in posts {
        if since.is_some_and(|w| raw.id <= w.0) {
            counter!("fetch_rejected_total", "reason" => "below_watermark").increment(1);
            continue;
        }
        match classify(&raw, target) {
            Decision::Reject(reason) => {
                tracing::debug!(
                    post_id = raw.id,
                    text_id = %anon_hash(&raw.full_text),
                    reason = reason.as_str(),
                    "rejected post"
                );
                counter!("fetch_rejected_total", "reason" => reason.as_str()).increment(1);
            }
            Decision::Accept { is_retweet } => {
                counter!("fetch_accepted_total").increment(1);
                let (full_text, _) = effective_text(&raw);
                out.push(IngestedPost {
                    post_id: raw.id,
                    target_id: target.id.clone(),
                    inserted_at,
                    full_text,
                    processed_text: String::new(),
                    author: raw.author,
                    posted_at: raw.created_at,
                    is_retweet,
                    sentiment: None,
                });
            }
        }
    }
    out
}
