// src/config/mod.rs
//! Startup configuration: environment-driven settings plus the target registry.

pub mod fetcher;
pub mod targets;

pub use fetcher::{FetcherConfig, LogFormat};
pub use targets::{load_targets_from, Presentation, Target};
