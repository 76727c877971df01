// src/storage.rs
//! SQLite storage for ingested posts and per-target watermarks.
//!
//! A batch insert and its watermark advance commit in one transaction, so the
//! watermark can never point past rows that are not durable.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::FetchError;
use crate::ingest::types::{Author, IngestedPost, Watermark};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Result of one durable batch write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistOutcome {
    pub inserted: usize,
    /// Ids that were already stored and were skipped.
    pub duplicates: usize,
    pub watermark: Watermark,
}

#[async_trait]
pub trait PostStore: Send + Sync {
    /// Highest durably stored post id for `target_id`, if any.
    async fn watermark(&self, target_id: &str) -> Result<Option<Watermark>, FetchError>;

    /// Store every post and advance the watermark, atomically.
    async fn persist_batch(
        &self,
        target_id: &str,
        posts: &[IngestedPost],
    ) -> Result<PersistOutcome, FetchError>;
}

/// Shared SQLite handle; writers are serialized by the mutex.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (and create if needed) the database at `db_path`.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating database directory {}", dir.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;
        create_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database (tests, dry runs).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        create_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, FetchError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, FetchError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| FetchError::Persist("storage mutex poisoned".into()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| FetchError::Persist(format!("storage task failed: {e}")))?
    }

    /// Read back all rows of a target, oldest id first.
    pub fn load_posts(&self, target_id: &str) -> Result<Vec<IngestedPost>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("storage mutex poisoned"))?;
        let mut stmt = conn.prepare(
            "SELECT TWEET_ID, TARGET, INSERT_TIMESTAMP, FULL_TEXT, PROCESSED_TEXT,
                    FOLLOWERS_COUNT, FAVOURITES_COUNT, FRIENDS_COUNT, TWEETS_COUNT,
                    ACCOUNT_CREATION_DATE, TWEET_TIMESTAMP, IS_RT, SENTIMENT, AUTHOR
             FROM TWEETS WHERE TARGET = ?1 ORDER BY TWEET_ID",
        )?;
        let rows = stmt.query_map([target_id], |row| {
            Ok(IngestedPost {
                post_id: row.get::<_, i64>(0)? as u64,
                target_id: row.get(1)?,
                inserted_at: parse_ts(row.get::<_, String>(2)?),
                full_text: row.get(3)?,
                processed_text: row.get(4)?,
                author: Author {
                    handle: row.get::<_, Option<String>>(13)?.unwrap_or_default(),
                    followers_count: row.get::<_, i64>(5)? as u64,
                    favourites_count: row.get::<_, i64>(6)? as u64,
                    friends_count: row.get::<_, i64>(7)? as u64,
                    statuses_count: row.get::<_, i64>(8)? as u64,
                    created_at: parse_ts(row.get::<_, String>(9)?),
                },
                posted_at: parse_ts(row.get::<_, String>(10)?),
                is_retweet: row.get::<_, i64>(11)? != 0,
                sentiment: row.get(12)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}

#[async_trait]
impl PostStore for SqliteStore {
    async fn watermark(&self, target_id: &str) -> Result<Option<Watermark>, FetchError> {
        let target_id = target_id.to_string();
        self.with_conn(move |conn| Ok(read_watermark(conn, &target_id)?))
            .await
    }

    async fn persist_batch(
        &self,
        target_id: &str,
        posts: &[IngestedPost],
    ) -> Result<PersistOutcome, FetchError> {
        if let Some(p) = posts.iter().find(|p| p.sentiment.is_none()) {
            return Err(FetchError::Persist(format!(
                "refusing to store unscored post {}",
                p.post_id
            )));
        }
        let Some(batch_max) = Watermark::of_batch(posts) else {
            return Err(FetchError::Persist("empty batch".into()));
        };
        let target_id = target_id.to_string();
        let posts = posts.to_vec();
        self.with_conn(move |conn| write_batch(conn, &target_id, &posts, batch_max))
            .await
    }
}

fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS TWEETS (
            TWEET_ID INTEGER PRIMARY KEY,
            TARGET TEXT NOT NULL,
            INSERT_TIMESTAMP TEXT NOT NULL,
            FULL_TEXT TEXT,
            PROCESSED_TEXT TEXT,
            AUTHOR TEXT,
            FOLLOWERS_COUNT INTEGER,
            FAVOURITES_COUNT INTEGER,
            FRIENDS_COUNT INTEGER,
            TWEETS_COUNT INTEGER,
            ACCOUNT_CREATION_DATE TEXT,
            TWEET_TIMESTAMP TEXT NOT NULL,
            IS_RT INTEGER NOT NULL,
            SENTIMENT REAL
        );

        CREATE INDEX IF NOT EXISTS IDX_TWEETS
            ON TWEETS(TWEET_TIMESTAMP, TARGET, IS_RT);

        CREATE TABLE IF NOT EXISTS WATERMARKS (
            TARGET TEXT PRIMARY KEY,
            LAST_TWEET_ID INTEGER NOT NULL
        );
        ",
    )
    .context("creating schema")?;
    Ok(())
}

fn read_watermark(conn: &Connection, target_id: &str) -> rusqlite::Result<Option<Watermark>> {
    let stored: Option<i64> = conn
        .query_row(
            "SELECT LAST_TWEET_ID FROM WATERMARKS WHERE TARGET = ?1",
            [target_id],
            |r| r.get(0),
        )
        .optional()?;
    let id = match stored {
        Some(id) => Some(id),
        // Databases written before the watermark table existed.
        None => conn.query_row(
            "SELECT MAX(TWEET_ID) FROM TWEETS WHERE TARGET = ?1",
            [target_id],
            |r| r.get::<_, Option<i64>>(0),
        )?,
    };
    Ok(id.and_then(|v| u64::try_from(v).ok()).map(Watermark))
}

fn to_sql_id(id: u64) -> Result<i64, FetchError> {
    i64::try_from(id).map_err(|_| FetchError::Persist(format!("post id {id} overflows storage")))
}

fn write_batch(
    conn: &mut Connection,
    target_id: &str,
    posts: &[IngestedPost],
    batch_max: Watermark,
) -> Result<PersistOutcome, FetchError> {
    let tx = conn.transaction()?;
    let mut inserted = 0usize;
    {
        let mut stmt = tx.prepare_cached(
            "INSERT OR IGNORE INTO TWEETS (
                TWEET_ID, TARGET, INSERT_TIMESTAMP, FULL_TEXT, PROCESSED_TEXT, AUTHOR,
                FOLLOWERS_COUNT, FAVOURITES_COUNT, FRIENDS_COUNT, TWEETS_COUNT,
                ACCOUNT_CREATION_DATE, TWEET_TIMESTAMP, IS_RT, SENTIMENT
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        )?;
        for p in posts {
            inserted += stmt.execute(params![
                to_sql_id(p.post_id)?,
                target_id,
                format_ts(&p.inserted_at),
                p.full_text,
                p.processed_text,
                p.author.handle,
                saturating_i64(p.author.followers_count),
                saturating_i64(p.author.favourites_count),
                saturating_i64(p.author.friends_count),
                saturating_i64(p.author.statuses_count),
                format_ts(&p.author.created_at),
                format_ts(&p.posted_at),
                p.is_retweet as i64,
                p.sentiment,
            ])?;
        }
    }

    tx.execute(
        "INSERT INTO WATERMARKS (TARGET, LAST_TWEET_ID) VALUES (?1, ?2)
         ON CONFLICT(TARGET) DO UPDATE
         SET LAST_TWEET_ID = MAX(LAST_TWEET_ID, excluded.LAST_TWEET_ID)",
        params![target_id, to_sql_id(batch_max.0)?],
    )?;
    let current: i64 = tx.query_row(
        "SELECT LAST_TWEET_ID FROM WATERMARKS WHERE TARGET = ?1",
        [target_id],
        |r| r.get(0),
    )?;
    tx.commit()?;

    Ok(PersistOutcome {
        inserted,
        duplicates: posts.len() - inserted,
        watermark: Watermark(current as u64),
    })
}

fn saturating_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_ts(s: String) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(&s, TIMESTAMP_FORMAT)
        .map(|n| n.and_utc())
        .unwrap_or_default()
}
