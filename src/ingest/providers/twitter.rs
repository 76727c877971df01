// src/ingest/providers/twitter.rs
//! Standard search (v1.1) client with application-only bearer auth.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::FetchError;
use crate::ingest::types::{
    Author, RateBudget, RawPost, Retweeted, SearchApi, SearchPage, SearchQuery,
};

const TWITTER_TIME_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";
/// Error code the API uses in the body when the window budget is spent.
const RATE_LIMIT_ERROR_CODE: i64 = 88;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    statuses: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct WireStatus {
    id: Option<u64>,
    created_at: Option<String>,
    full_text: Option<String>,
    text: Option<String>,
    in_reply_to_screen_name: Option<String>,
    user: Option<WireUser>,
    retweeted_status: Option<Box<WireStatus>>,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    screen_name: Option<String>,
    #[serde(default)]
    followers_count: u64,
    #[serde(default)]
    favourites_count: u64,
    #[serde(default)]
    friends_count: u64,
    #[serde(default)]
    statuses_count: u64,
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrors {
    #[serde(default)]
    errors: Vec<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub fn parse_twitter_time(ts: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_str(ts, TWITTER_TIME_FORMAT)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("bad timestamp {ts:?}"))
}

impl WireStatus {
    fn text(&self) -> Option<&str> {
        self.full_text.as_deref().or(self.text.as_deref())
    }
}

/// Validate one wire result into a `RawPost`.
fn into_raw_post(w: WireStatus) -> Result<RawPost> {
    let id = w.id.ok_or_else(|| anyhow!("missing id"))?;
    let full_text = w
        .text()
        .ok_or_else(|| anyhow!("post {id} has no text"))?
        .to_string();
    let created_at = parse_twitter_time(
        w.created_at
            .as_deref()
            .ok_or_else(|| anyhow!("post {id} has no created_at"))?,
    )?;
    let user = w.user.ok_or_else(|| anyhow!("post {id} has no author"))?;
    let handle = user
        .screen_name
        .ok_or_else(|| anyhow!("post {id} author has no handle"))?;
    let author_created = parse_twitter_time(
        user.created_at
            .as_deref()
            .ok_or_else(|| anyhow!("post {id} author has no created_at"))?,
    )?;

    let retweeted = match w.retweeted_status {
        None => None,
        Some(rt) => {
            let text = rt
                .text()
                .ok_or_else(|| anyhow!("retweet {id} has no original text"))?
                .to_string();
            let author_handle = rt
                .user
                .and_then(|u| u.screen_name)
                .ok_or_else(|| anyhow!("retweet {id} has no original author"))?;
            Some(Retweeted {
                author_handle,
                full_text: text,
            })
        }
    };

    Ok(RawPost {
        id,
        author: Author {
            handle,
            followers_count: user.followers_count,
            favourites_count: user.favourites_count,
            friends_count: user.friends_count,
            statuses_count: user.statuses_count,
            created_at: author_created,
        },
        created_at,
        full_text,
        retweeted,
        in_reply_to: w.in_reply_to_screen_name,
    })
}

/// Parse a search response body. Individual malformed results are skipped and counted.
pub fn parse_search_body(body: &str) -> Result<(Vec<RawPost>, usize)> {
    let resp: SearchResponse = serde_json::from_str(body).context("decoding search response")?;
    let mut posts = Vec::with_capacity(resp.statuses.len());
    let mut malformed = 0usize;
    for value in resp.statuses {
        let parsed = serde_json::from_value::<WireStatus>(value)
            .map_err(anyhow::Error::from)
            .and_then(into_raw_post);
        match parsed {
            Ok(p) => posts.push(p),
            Err(e) => {
                malformed += 1;
                tracing::warn!(error = %e, "skipping malformed search result");
            }
        }
    }
    Ok((posts, malformed))
}

pub fn rate_budget_from_headers(headers: &HeaderMap) -> RateBudget {
    let num = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
    };
    RateBudget {
        limit: num("x-rate-limit-limit").and_then(|v| u32::try_from(v).ok()),
        remaining: num("x-rate-limit-remaining").and_then(|v| u32::try_from(v).ok()),
        reset_at: num("x-rate-limit-reset").and_then(|s| DateTime::from_timestamp(s, 0)),
    }
}

fn is_rate_limited(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 420 {
        return true;
    }
    serde_json::from_str::<ApiErrors>(body)
        .map(|e| e.errors.iter().any(|e| e.code == RATE_LIMIT_ERROR_CODE))
        .unwrap_or(false)
}

pub struct TwitterSearch {
    http: Client,
    base: String,
    consumer_key: String,
    consumer_secret: String,
    bearer: Mutex<Option<String>>,
}

impl TwitterSearch {
    pub fn new(base: &str, consumer_key: &str, consumer_secret: &str) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("sentiment-fetcher/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(20))
            .build()
            .context("building search http client")?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            consumer_key: consumer_key.to_string(),
            consumer_secret: consumer_secret.to_string(),
            bearer: Mutex::new(None),
        })
    }

    async fn bearer_token(&self) -> Result<String, FetchError> {
        let mut guard = self.bearer.lock().await;
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }
        let resp = self
            .http
            .post(format!("{}/oauth2/token", self.base))
            .basic_auth(&self.consumer_key, Some(&self.consumer_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(FetchError::Transient(format!(
                "token endpoint returned {}",
                resp.status()
            )));
        }
        let token: TokenResponse = resp.json().await?;
        *guard = Some(token.access_token.clone());
        Ok(token.access_token)
    }

    async fn forget_token(&self) {
        *self.bearer.lock().await = None;
    }

    async fn search_once(
        &self,
        query: &SearchQuery,
        token: &str,
    ) -> Result<(StatusCode, HeaderMap, String), FetchError> {
        let mut params: Vec<(&str, String)> = vec![
            ("q", query.query_string()),
            ("lang", query.language.clone()),
            ("result_type", "recent".to_string()),
            ("count", query.page_size.to_string()),
            ("tweet_mode", "extended".to_string()),
        ];
        if let Some(since) = query.since {
            params.push(("since_id", since.0.to_string()));
        }
        let resp = self
            .http
            .get(format!("{}/1.1/search/tweets.json", self.base))
            .bearer_auth(token)
            .query(&params)
            .send()
            .await?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.text().await?;
        Ok((status, headers, body))
    }
}

#[async_trait]
impl SearchApi for TwitterSearch {
    async fn search(&self, query: &SearchQuery) -> Result<SearchPage, FetchError> {
        let t0 = std::time::Instant::now();

        let token = self.bearer_token().await?;
        let (mut status, mut headers, mut body) = self.search_once(query, &token).await?;
        if status == StatusCode::UNAUTHORIZED {
            // Bearer tokens can be invalidated server side; fetch a fresh one once.
            self.forget_token().await;
            let token = self.bearer_token().await?;
            (status, headers, body) = self.search_once(query, &token).await?;
        }

        histogram!("search_request_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        let budget = rate_budget_from_headers(&headers);

        if is_rate_limited(status, &body) {
            return Err(FetchError::RateLimited {
                reset_at: budget.reset_at,
            });
        }
        if !status.is_success() {
            return Err(FetchError::Transient(format!("search returned {status}")));
        }

        let (posts, malformed) =
            parse_search_body(&body).map_err(|e| FetchError::Transient(format!("{e:#}")))?;
        if malformed > 0 {
            counter!("fetch_malformed_total").increment(malformed as u64);
        }
        Ok(SearchPage {
            posts,
            malformed,
            budget,
        })
    }

    fn name(&self) -> &'static str {
        "twitter"
    }
}
