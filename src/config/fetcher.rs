// src/config/fetcher.rs
use anyhow::{bail, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_TWITTER_API_BASE: &str = "https://api.twitter.com";
pub const DEFAULT_SENTIMENT_PORT: u16 = 5000;
pub const DEFAULT_DB_PATH: &str = "data/tweets.db";
pub const DEFAULT_TARGETS_PATH: &str = "config/targets.toml";
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

/// Everything the fetcher needs, resolved and validated once at startup.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub twitter_key: String,
    pub twitter_secret: String,
    pub twitter_api_base: String,
    pub language: String,
    pub page_size: u32,

    pub sentiment_host: String,
    pub sentiment_port: u16,
    pub sentiment_timeout: Duration,

    pub db_path: PathBuf,
    pub targets_path: PathBuf,

    pub fetch_interval: Duration,
    pub startup_delay: Duration,
    pub retry_delay: Duration,
    pub max_attempts: u32,
    pub concurrency: usize,

    pub metrics_addr: Option<SocketAddr>,
    pub log_format: LogFormat,
}

impl FetcherConfig {
    /// Read from the process environment (after `.env` has been loaded).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from an arbitrary key lookup. All problems are reported together.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut problems: Vec<String> = Vec::new();
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut required = |k: &str| match get(k) {
            Some(v) => v,
            None => {
                problems.push(format!("{k} is required"));
                String::new()
            }
        };
        let twitter_key = required("TWITTER_KEY");
        let twitter_secret = required("TWITTER_SECRET");
        let sentiment_host = required("SENTIMENT_APP_HOST");
        let language = required("LANGUAGE");
        let interval_raw = required("FETCH_INTERVAL");

        let fetch_interval = match interval_raw.parse::<u64>() {
            Ok(0) => {
                problems.push("FETCH_INTERVAL must be > 0".into());
                Duration::ZERO
            }
            Ok(s) => Duration::from_secs(s),
            Err(_) if interval_raw.is_empty() => Duration::ZERO,
            Err(_) => {
                problems.push(format!("FETCH_INTERVAL is not a number: {interval_raw:?}"));
                Duration::ZERO
            }
        };

        let sentiment_port = parse_or(&get, "SENTIMENT_APP_PORT", DEFAULT_SENTIMENT_PORT, &mut problems);
        let sentiment_timeout =
            Duration::from_secs(parse_or(&get, "SENTIMENT_TIMEOUT_SECS", 60u64, &mut problems));
        let startup_delay =
            Duration::from_secs(parse_or(&get, "STARTUP_DELAY_SECS", 30u64, &mut problems));
        let retry_delay = Duration::from_secs(parse_or(&get, "RETRY_DELAY_SECS", 5u64, &mut problems));
        let max_attempts = parse_or(&get, "MAX_ATTEMPTS", 3u32, &mut problems);
        let page_size = parse_or(&get, "PAGE_SIZE", MAX_PAGE_SIZE, &mut problems);
        let concurrency = parse_or(&get, "FETCH_CONCURRENCY", 1usize, &mut problems);

        if max_attempts == 0 {
            problems.push("MAX_ATTEMPTS must be >= 1".into());
        }
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            problems.push(format!("PAGE_SIZE must be within 1..={MAX_PAGE_SIZE}"));
        }
        if concurrency == 0 {
            problems.push("FETCH_CONCURRENCY must be >= 1".into());
        }

        let metrics_addr = match get("METRICS_ADDR") {
            None => None,
            Some(v) => match v.parse::<SocketAddr>() {
                Ok(a) => Some(a),
                Err(_) => {
                    problems.push(format!("METRICS_ADDR is not a socket address: {v:?}"));
                    None
                }
            },
        };

        let log_format = match get("LOG_FORMAT").map(|v| v.to_ascii_lowercase()).as_deref() {
            None | Some("compact") => LogFormat::Compact,
            Some("json") => LogFormat::Json,
            Some(other) => {
                problems.push(format!("LOG_FORMAT must be compact or json, got {other:?}"));
                LogFormat::Compact
            }
        };

        if !problems.is_empty() {
            bail!("invalid configuration: {}", problems.join("; "));
        }

        Ok(Self {
            twitter_key,
            twitter_secret,
            twitter_api_base: get("TWITTER_API_BASE")
                .unwrap_or_else(|| DEFAULT_TWITTER_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            language,
            page_size,
            sentiment_host,
            sentiment_port,
            sentiment_timeout,
            db_path: get("TWEETS_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            targets_path: get("TARGETS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TARGETS_PATH)),
            fetch_interval,
            startup_delay,
            retry_delay,
            max_attempts,
            concurrency,
            metrics_addr,
            log_format,
        })
    }

    /// Base URL of the scoring service, e.g. `http://sentiment:5000`.
    pub fn sentiment_url(&self) -> String {
        format!("http://{}:{}", self.sentiment_host, self.sentiment_port)
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T, problems: &mut Vec<String>) -> T
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => default,
        Some(v) => v.parse::<T>().unwrap_or_else(|_| {
            problems.push(format!("{key} is not valid: {v:?}"));
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    const MINIMAL: &[(&str, &str)] = &[
        ("TWITTER_KEY", "k"),
        ("TWITTER_SECRET", "s"),
        ("SENTIMENT_APP_HOST", "sentiment"),
        ("FETCH_INTERVAL", "300"),
        ("LANGUAGE", "es"),
    ];

    #[test]
    fn minimal_env_gets_defaults() {
        let cfg = FetcherConfig::from_lookup(lookup(MINIMAL)).unwrap();
        assert_eq!(cfg.fetch_interval, Duration::from_secs(300));
        assert_eq!(cfg.sentiment_url(), "http://sentiment:5000");
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.page_size, 100);
        assert_eq!(cfg.startup_delay, Duration::from_secs(30));
        assert_eq!(cfg.retry_delay, Duration::from_secs(5));
        assert_eq!(cfg.concurrency, 1);
        assert!(cfg.metrics_addr.is_none());
        assert_eq!(cfg.log_format, LogFormat::Compact);
    }

    #[test]
    fn all_problems_are_reported_at_once() {
        let err = FetcherConfig::from_lookup(lookup(&[("FETCH_INTERVAL", "soon"), ("PAGE_SIZE", "500")]))
            .unwrap_err()
            .to_string();
        assert!(err.contains("TWITTER_KEY is required"));
        assert!(err.contains("SENTIMENT_APP_HOST is required"));
        assert!(err.contains("FETCH_INTERVAL is not a number"));
        assert!(err.contains("PAGE_SIZE must be within"));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut pairs = MINIMAL.to_vec();
        pairs.retain(|(k, _)| *k != "FETCH_INTERVAL");
        pairs.push(("FETCH_INTERVAL", "0"));
        assert!(FetcherConfig::from_lookup(lookup(&pairs)).is_err());
    }
}
