// src/ingest/mod.rs
pub mod cycle;
pub mod filter;
pub mod normalize;
pub mod providers;
pub mod scheduler;
pub mod types;

pub use cycle::{CycleOutcome, CycleReport, CycleSettings, CycleState, FetchCycle};
pub use filter::{classify, Decision, RejectReason};
pub use normalize::normalize;
pub use scheduler::{PassReport, Scheduler, SchedulerSettings};

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "fetch_cycles_total",
            "Completed fetch cycles, labelled by target and outcome."
        );
        describe_counter!("fetch_posts_total", "Search results returned by the API.");
        describe_counter!("fetch_accepted_total", "Posts accepted by the filter.");
        describe_counter!(
            "fetch_rejected_total",
            "Posts rejected by the filter, labelled by reason."
        );
        describe_counter!("fetch_inserted_total", "Posts newly written to storage.");
        describe_counter!(
            "fetch_duplicates_total",
            "Posts already present in storage and skipped."
        );
        describe_counter!("fetch_retries_total", "Cycle attempts retried after a failure.");
        describe_counter!(
            "fetch_rate_limited_total",
            "Cycles aborted because the search budget was spent."
        );
        describe_counter!(
            "fetch_malformed_total",
            "Search results skipped because they failed validation."
        );
        describe_counter!("scoring_keys_total", "Unique rows sent to the scoring service.");
        describe_histogram!("fetch_cycle_ms", "Fetch cycle wall time in milliseconds.");
        describe_histogram!("search_request_ms", "Search API latency in milliseconds.");
        describe_histogram!("scoring_request_ms", "Scoring service latency in milliseconds.");
        describe_gauge!("fetch_watermark", "Highest stored post id per target.");
        describe_gauge!(
            "search_rate_limit_remaining",
            "Requests left in the current search window."
        );
        describe_gauge!(
            "scheduler_last_pass_ts",
            "Unix ts when the scheduler last finished a pass."
        );
    });
}

/// Short stable id for log lines that must not carry raw post text.
pub(crate) fn anon_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
