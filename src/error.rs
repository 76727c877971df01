// src/error.rs
//! Failure categories of a fetch cycle.
//!
//! Configuration and startup problems are not represented here; they surface as
//! `anyhow::Error` from `config` and abort the process before the first pass.

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    /// The search API refused the request because the window budget is spent.
    /// Never retried inside the same pass.
    #[error("search api rate limit reached (reset at {reset_at:?})")]
    RateLimited { reset_at: Option<DateTime<Utc>> },

    /// Network, timeout or upstream service error.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The scoring service failed or its answer could not be joined back onto
    /// every submitted post.
    #[error("scoring failure: {0}")]
    Scoring(String),

    /// The storage write failed; the watermark did not move.
    #[error("persist failure: {0}")]
    Persist(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::RateLimited { .. })
    }

    /// Short label used as a metrics dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::RateLimited { .. } => "rate_limited",
            FetchError::Transient(_) => "transient",
            FetchError::Scoring(_) => "scoring",
            FetchError::Persist(_) => "persist",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Transient(e.to_string())
    }
}

impl From<rusqlite::Error> for FetchError {
    fn from(e: rusqlite::Error) -> Self {
        FetchError::Persist(e.to_string())
    }
}
