// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod sentiment;
pub mod storage;

pub use crate::config::{FetcherConfig, Target};
pub use crate::error::FetchError;
pub use crate::ingest::{FetchCycle, Scheduler};
pub use crate::storage::SqliteStore;
