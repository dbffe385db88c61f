//! Content-addressed cache gating expensive collaborator calls (OCR,
//! link fetch, LLM enrichment/synthesis).
//!
//! Keys are pure hashes over (category, canonical input, operation version),
//! so changing a prompt or model version changes the key. TTL is evaluated at
//! read time: expired entries behave as a miss and are deleted, never returned
//! stale. Store I/O failures degrade to cache-miss behavior and are logged,
//! never surfaced as run failures.

use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use threadlens_core::CoreError;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Logical category of a cached computation. Part of the key derivation and
/// the unit of the stats breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CacheCategory {
    Thread,
    PostEnrichment,
    CommentEnrichment,
    Synthesis,
    Ocr,
    LinkContent,
}

impl CacheCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheCategory::Thread => "thread",
            CacheCategory::PostEnrichment => "post_enrichment",
            CacheCategory::CommentEnrichment => "comment_enrichment",
            CacheCategory::Synthesis => "synthesis",
            CacheCategory::Ocr => "ocr",
            CacheCategory::LinkContent => "link_content",
        }
    }
}

/// A derived cache key. Construction is pure and total.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    category: CacheCategory,
    hash: String,
}

impl CacheKey {
    /// Derive a key from the operation category, its canonicalized input, and
    /// the operation version tag.
    pub fn derive(category: CacheCategory, input: &str, version: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(category.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(input.as_bytes());
        hasher.update([0u8]);
        hasher.update(version.as_bytes());
        let hash = format!("{:x}", hasher.finalize());
        Self { category, hash }
    }

    pub fn category(&self) -> CacheCategory {
        self.category
    }

    pub fn as_str(&self) -> &str {
        &self.hash
    }
}

/// Entry counts per logical category.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub entries: BTreeMap<String, u64>,
}

impl CacheStats {
    pub fn total(&self) -> u64 {
        self.entries.values().sum()
    }
}

/// SQLite-backed cache with at-most-one-outstanding-computation-per-key
/// semantics. The single shared-mutable resource of a run; constructed
/// explicitly and passed to each component.
#[derive(Debug)]
pub struct CacheStore {
    pool: SqlitePool,
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CacheStore {
    /// Open (creating if missing) a cache database at the given path.
    pub async fn open(path: &str) -> Result<Self, CoreError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Self::init_schema(&pool).await?;
        info!("Cache database initialized at {path}");
        Ok(Self {
            pool,
            inflight: Mutex::new(HashMap::new()),
        })
    }

    /// Open an in-memory cache. A single connection keeps every caller on the
    /// same database.
    pub async fn open_in_memory() -> Result<Self, CoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::init_schema(&pool).await?;
        Ok(Self {
            pool,
            inflight: Mutex::new(HashMap::new()),
        })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<(), CoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                category TEXT NOT NULL,
                value TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                ttl_seconds INTEGER NOT NULL
            )",
        )
        .execute(pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_cache_category ON cache_entries(category)",
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    fn now_unix() -> i64 {
        chrono::Utc::now().timestamp()
    }

    /// Look up a key. Expired entries are deleted and reported as a miss.
    pub async fn get(&self, key: &CacheKey) -> Result<Option<String>, CoreError> {
        let row = sqlx::query(
            "SELECT value, created_at, ttl_seconds FROM cache_entries WHERE key = ?",
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let value: String = row.try_get("value")?;
        let created_at: i64 = row.try_get("created_at")?;
        let ttl_seconds: i64 = row.try_get("ttl_seconds")?;

        if Self::now_unix() >= created_at.saturating_add(ttl_seconds) {
            debug!("Cache expired for {} key", key.category().as_str());
            self.invalidate(key).await?;
            return Ok(None);
        }

        debug!("Cache hit for {} key", key.category().as_str());
        Ok(Some(value))
    }

    /// Insert or replace an entry with the given TTL.
    pub async fn put(
        &self,
        key: &CacheKey,
        value: &str,
        ttl: Duration,
    ) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO cache_entries
             (key, category, value, created_at, ttl_seconds)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(key.as_str())
        .bind(key.category().as_str())
        .bind(value)
        .bind(Self::now_unix())
        .bind(ttl.as_secs() as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn invalidate(&self, key: &CacheKey) -> Result<(), CoreError> {
        sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(key.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Entry counts per category.
    pub async fn stats(&self) -> Result<CacheStats, CoreError> {
        let rows = sqlx::query(
            "SELECT category, COUNT(*) AS n FROM cache_entries GROUP BY category",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = CacheStats::default();
        for row in rows {
            let category: String = row.try_get("category")?;
            let count: i64 = row.try_get("n")?;
            stats.entries.insert(category, count as u64);
        }
        Ok(stats)
    }

    /// Delete all expired entries; returns the number removed.
    pub async fn clear_expired(&self) -> Result<u64, CoreError> {
        let result =
            sqlx::query("DELETE FROM cache_entries WHERE ? >= created_at + ttl_seconds")
                .bind(Self::now_unix())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    /// Delete every entry; returns the number removed.
    pub async fn clear_all(&self) -> Result<u64, CoreError> {
        let result = sqlx::query("DELETE FROM cache_entries")
            .execute(&self.pool)
            .await?;
        warn!("All cache entries cleared");
        Ok(result.rows_affected())
    }

    /// `get` that degrades store failures to a miss.
    pub async fn get_degraded(&self, key: &CacheKey) -> Option<String> {
        match self.get(key).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!("Cache read failed, proceeding uncached: {}", e);
                None
            }
        }
    }

    /// `put` that degrades store failures to a no-op.
    pub async fn put_degraded(&self, key: &CacheKey, value: &str, ttl: Duration) {
        if let Err(e) = self.put(key, value, ttl).await {
            warn!("Cache write failed, result not persisted: {}", e);
        }
    }

    /// Return the cached value for `key`, or run `compute` and cache its
    /// result. Concurrent callers for the same in-flight key wait for and
    /// reuse the first caller's result instead of duplicating upstream work.
    /// Store failures degrade to uncached computation.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        compute: F,
    ) -> Result<String, CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, CoreError>>,
    {
        if let Some(hit) = self.get_degraded(key).await {
            return Ok(hit);
        }

        let guard = {
            let mut inflight = self.inflight.lock().await;
            inflight
                .entry(key.as_str().to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let result = {
            let _held = guard.lock().await;
            // The first caller may have populated the entry while we waited.
            if let Some(hit) = self.get_degraded(key).await {
                Ok(hit)
            } else {
                let result = compute().await;
                if let Ok(value) = &result {
                    self.put_degraded(key, value, ttl).await;
                }
                result
            }
        };

        let mut inflight = self.inflight.lock().await;
        if Arc::strong_count(&guard) <= 2 {
            inflight.remove(key.as_str());
        }

        result
    }
}
