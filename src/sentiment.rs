// src/sentiment.rs
//! Client side of the external scoring service: dedup, one request per batch,
//! and a strict join of the answers back onto every post.

use anyhow::Context;
use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use crate::config::targets::Target;
use crate::error::FetchError;
use crate::ingest::types::IngestedPost;

/// What the service actually scores: the effective text and its normalized form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScoreKey {
    pub full_text: String,
    pub processed_text: String,
}

impl ScoreKey {
    pub fn of(post: &IngestedPost) -> Self {
        let (full, processed) = post.score_key();
        Self {
            full_text: full.to_string(),
            processed_text: processed.to_string(),
        }
    }
}

#[async_trait]
pub trait ScoringService: Send + Sync {
    /// Score a deduplicated set of keys. `account` lets the service recognise
    /// retweets of the target (scored 1.0 without inference).
    ///
    /// Rows come back as the service sent them; a `None` score is only an
    /// error for keys that were actually submitted.
    async fn predict(&self, keys: &[ScoreKey], account: &str)
        -> Result<Vec<(ScoreKey, Option<f64>)>, FetchError>;
    fn name(&self) -> &'static str;
}

/// Deduplicate first occurrence wins, order preserved.
pub fn dedup_keys(posts: &[IngestedPost]) -> Vec<ScoreKey> {
    let mut seen = HashSet::with_capacity(posts.len());
    let mut keys = Vec::with_capacity(posts.len());
    for p in posts {
        let key = ScoreKey::of(p);
        if seen.insert(key.clone()) {
            keys.push(key);
        }
    }
    keys
}

/// Attach a score to every post. All-or-nothing: any key left unscored fails the batch.
pub async fn score_posts(
    service: &dyn ScoringService,
    mut posts: Vec<IngestedPost>,
    target: &Target,
) -> Result<Vec<IngestedPost>, FetchError> {
    if posts.is_empty() {
        return Ok(posts);
    }
    let keys = dedup_keys(&posts);
    tracing::debug!(
        target_id = %target.id,
        posts = posts.len(),
        unique = keys.len(),
        "scoring deduplicated batch"
    );

    let t0 = std::time::Instant::now();
    let answers = service.predict(&keys, &target.account).await?;
    histogram!("scoring_request_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    counter!("scoring_keys_total").increment(keys.len() as u64);

    let submitted: HashSet<&ScoreKey> = keys.iter().collect();
    let mut scores: HashMap<ScoreKey, f64> = HashMap::with_capacity(answers.len());
    for (key, score) in answers {
        if !submitted.contains(&key) {
            tracing::warn!(target_id = %target.id, "scoring service returned an unknown row");
            continue;
        }
        let score = score.ok_or_else(|| FetchError::Scoring("submitted row has no score".into()))?;
        if !score.is_finite() || !(0.0..=1.0).contains(&score) {
            return Err(FetchError::Scoring(format!("score {score} outside [0, 1]")));
        }
        if let Some(prev) = scores.insert(key, score) {
            if prev != score {
                return Err(FetchError::Scoring("conflicting scores for one key".into()));
            }
        }
    }

    let missing = keys.iter().filter(|k| !scores.contains_key(*k)).count();
    if missing > 0 {
        return Err(FetchError::Scoring(format!(
            "{missing} of {} submitted rows came back without a score",
            keys.len()
        )));
    }

    for post in posts.iter_mut() {
        post.sentiment = scores.get(&ScoreKey::of(post)).copied();
    }
    Ok(posts)
}

// ------------------------------------------------------------
// HTTP implementation (column-oriented frames, as the service expects)
// ------------------------------------------------------------

#[derive(Serialize)]
struct FrameOut<'a> {
    #[serde(rename = "FULL_TEXT")]
    full_text: BTreeMap<String, &'a str>,
    #[serde(rename = "PROCESSED_TEXT")]
    processed_text: BTreeMap<String, &'a str>,
}

#[derive(Deserialize)]
struct FrameIn {
    #[serde(rename = "FULL_TEXT")]
    full_text: BTreeMap<String, String>,
    #[serde(rename = "PROCESSED_TEXT")]
    processed_text: BTreeMap<String, String>,
    #[serde(rename = "SENTIMENT")]
    sentiment: BTreeMap<String, Option<f64>>,
}

/// Encode keys as the `data` query parameter.
pub fn encode_frame(keys: &[ScoreKey]) -> Result<String, FetchError> {
    let mut frame = FrameOut {
        full_text: BTreeMap::new(),
        processed_text: BTreeMap::new(),
    };
    for (i, k) in keys.iter().enumerate() {
        frame.full_text.insert(i.to_string(), &k.full_text);
        frame.processed_text.insert(i.to_string(), &k.processed_text);
    }
    serde_json::to_string(&frame).map_err(|e| FetchError::Scoring(e.to_string()))
}

/// Decode the service answer; every row must carry both text columns.
/// Scores may be null here; `score_posts` decides whether that matters.
pub fn decode_frame(body: &str) -> Result<Vec<(ScoreKey, Option<f64>)>, FetchError> {
    let frame: FrameIn = serde_json::from_str(body)
        .map_err(|e| FetchError::Scoring(format!("undecodable response: {e}")))?;
    let mut out = Vec::with_capacity(frame.sentiment.len());
    for (row, score) in frame.sentiment {
        let (Some(full), Some(processed)) =
            (frame.full_text.get(&row), frame.processed_text.get(&row))
        else {
            return Err(FetchError::Scoring(format!("row {row} is incomplete")));
        };
        out.push((
            ScoreKey {
                full_text: full.clone(),
                processed_text: processed.clone(),
            },
            score,
        ));
    }
    Ok(out)
}

pub struct HttpScoringService {
    http: reqwest::Client,
    base_url: String,
}

impl HttpScoringService {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("sentiment-fetcher/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .timeout(timeout)
            .build()
            .context("building scoring http client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Startup check: any HTTP answer means the service is up.
    pub async fn probe(&self) -> anyhow::Result<()> {
        let resp = self
            .http
            .get(format!("{}/", self.base_url))
            .send()
            .await
            .with_context(|| format!("scoring service at {} is unreachable", self.base_url))?;
        tracing::info!(status = %resp.status(), url = %self.base_url, "scoring service reachable");
        Ok(())
    }
}

#[async_trait]
impl ScoringService for HttpScoringService {
    async fn predict(
        &self,
        keys: &[ScoreKey],
        account: &str,
    ) -> Result<Vec<(ScoreKey, Option<f64>)>, FetchError> {
        let data = encode_frame(keys)?;
        let resp = self
            .http
            .get(format!("{}/predict", self.base_url))
            .query(&[("data", data.as_str()), ("account", account)])
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| FetchError::Scoring(format!("request failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Scoring(format!("service returned {status}")));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| FetchError::Scoring(format!("reading response: {e}")))?;
        decode_frame(&body)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trip_keeps_pairs_together() {
        let keys = vec![
            ScoreKey {
                full_text: "RT @pablocasado_ Hola".into(),
                processed_text: "hola".into(),
            },
            ScoreKey {
                full_text: "qué mal".into(),
                processed_text: "qué mal".into(),
            },
        ];
        let data = encode_frame(&keys).unwrap();
        assert!(data.contains("\"FULL_TEXT\":{\"0\":\"RT @pablocasado_ Hola\""));

        let body = r#"{
            "FULL_TEXT": {"0": "qué mal", "1": "RT @pablocasado_ Hola"},
            "PROCESSED_TEXT": {"0": "qué mal", "1": "hola"},
            "SENTIMENT": {"0": 0.12, "1": 1.0}
        }"#;
        let mut rows = decode_frame(body).unwrap();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(rows[0].0, keys[0]);
        assert_eq!(rows[0].1, Some(1.0));
        assert_eq!(rows[1].1, Some(0.12));
    }

    #[test]
    fn incomplete_rows_fail_but_null_scores_decode() {
        let null_score = r#"{"FULL_TEXT":{"0":"a"},"PROCESSED_TEXT":{"0":"a"},"SENTIMENT":{"0":null}}"#;
        let rows = decode_frame(null_score).unwrap();
        assert_eq!(rows[0].1, None);
        let missing = r#"{"FULL_TEXT":{},"PROCESSED_TEXT":{"0":"a"},"SENTIMENT":{"0":0.5}}"#;
        assert!(matches!(decode_frame(missing), Err(FetchError::Scoring(_))));
        assert!(matches!(decode_frame("<html>"), Err(FetchError::Scoring(_))));
    }

    /// Replays a canned answer regardless of the keys.
    struct Canned(Vec<(ScoreKey, Option<f64>)>);

    #[async_trait]
    impl ScoringService for Canned {
        async fn predict(
            &self,
            _keys: &[ScoreKey],
            _account: &str,
        ) -> Result<Vec<(ScoreKey, Option<f64>)>, FetchError> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &'static str {
            "canned"
        }
    }

    fn key(text: &str) -> ScoreKey {
        ScoreKey {
            full_text: text.into(),
            processed_text: text.into(),
        }
    }

    fn post(id: u64, text: &str) -> IngestedPost {
        use crate::ingest::types::Author;
        use chrono::{TimeZone, Utc};
        let t = Utc.with_ymd_and_hms(2020, 7, 18, 14, 8, 3).unwrap();
        IngestedPost {
            post_id: id,
            target_id: "pablo_casado".into(),
            inserted_at: t,
            full_text: text.into(),
            processed_text: text.into(),
            author: Author {
                handle: "alguien".into(),
                followers_count: 0,
                favourites_count: 0,
                friends_count: 0,
                statuses_count: 0,
                created_at: t,
            },
            posted_at: t,
            is_retweet: false,
            sentiment: None,
        }
    }

    fn casado() -> Target {
        Target::new("pablo_casado", "Pablo Casado", "pablocasado_")
    }

    #[tokio::test]
    async fn unknown_rows_are_ignored_whatever_their_score() {
        let body = r#"{"FULL_TEXT":{"0":"a","1":"zzz","2":"yyy"},
                       "PROCESSED_TEXT":{"0":"a","1":"zzz","2":"yyy"},
                       "SENTIMENT":{"0":0.5,"1":null,"2":7.5}}"#;
        let service = Canned(decode_frame(body).unwrap());
        let scored = score_posts(&service, vec![post(1, "a")], &casado())
            .await
            .unwrap();
        assert_eq!(scored[0].sentiment, Some(0.5));
    }

    #[tokio::test]
    async fn submitted_rows_must_carry_a_valid_score() {
        let null = Canned(vec![(key("a"), None)]);
        let err = score_posts(&null, vec![post(1, "a")], &casado())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Scoring(_)));

        let out_of_range = Canned(vec![(key("a"), Some(-0.1))]);
        let err = score_posts(&out_of_range, vec![post(1, "a")], &casado())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Scoring(_)));
    }
}
