//! Redis-backed counter and ranking stores.
//!
//! Counters are plain string keys bumped with `INCRBY`; the leaderboard is a
//! single sorted set bumped with `ZINCRBY`. Every command runs under a
//! timeout and the shared circuit breaker. Only idempotent reads are retried:
//! an increment whose outcome is unknown is reported as a failure rather than
//! replayed, so a view can be lost but is never counted twice.

use super::circuit_breaker::CircuitBreaker;
use super::{AtomicViewStore, CounterStore, RankingStore};
use crate::config::{CircuitBreakerConfig, StoreConfig};
use crate::error::{ViewRankError, ViewRankResult};
use crate::metrics::StoreMetrics;
use crate::types::{sort_and_truncate, ItemId, RankedEntry, Score, ScoreOrder};
use anyhow::Context;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, instrument, warn};

/// Reads the top `ARGV[1]` members by descending score plus the
/// lexicographically first members tied at the cutoff score, in one atomic
/// step. `ZREVRANGE` alone orders ties by descending member, which would
/// make the cut at `n` depend on the wrong end of a tie group.
const TOP_DESC_SCRIPT: &str = r#"
local n = tonumber(ARGV[1])
local top = redis.call('ZREVRANGE', KEYS[1], 0, n - 1, 'WITHSCORES')
if #top == 0 then
  return top
end
local floor = top[#top]
local out = {}
for i = 1, #top, 2 do
  if tonumber(top[i + 1]) > tonumber(floor) then
    out[#out + 1] = top[i]
    out[#out + 1] = top[i + 1]
  end
end
local ties = redis.call('ZRANGEBYSCORE', KEYS[1], floor, floor, 'WITHSCORES', 'LIMIT', 0, n)
for i = 1, #ties do
  out[#out + 1] = ties[i]
end
return out
"#;

/// Counter and ranking bumped together. Both keys must live on the same node
/// when running against a cluster.
const RECORD_VIEW_SCRIPT: &str = r#"
local total = redis.call('INCRBY', KEYS[1], ARGV[1])
redis.call('ZINCRBY', KEYS[2], ARGV[1], ARGV[2])
return total
"#;

/// Reads the counter and the score and closes the gap in one atomic step.
/// The score is returned as a string since Lua numbers reply as integers.
const RECONCILE_SCRIPT: &str = r#"
local total = tonumber(redis.call('GET', KEYS[1]) or '0')
local score = tonumber(redis.call('ZSCORE', KEYS[2], ARGV[1]) or '0')
if total ~= score then
  redis.call('ZINCRBY', KEYS[2], total - score, ARGV[1])
end
return {total, tostring(score)}
"#;

/// Key naming for counters and the leaderboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
    ranking_key: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>, ranking_key: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ranking_key: ranking_key.into(),
        }
    }

    pub fn views_key(&self, item_id: &ItemId) -> String {
        format!("{}:{}:views", self.prefix, item_id)
    }

    pub fn ranking_key(&self) -> &str {
        &self.ranking_key
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new("image", "image_ranking")
    }
}

/// Networked counter/ranking store on a multiplexed Redis connection.
pub struct RedisStore {
    conn: ConnectionManager,
    keys: KeySpace,
    command_timeout: Duration,
    max_read_retries: u32,
    retry_delay: Duration,
    breaker: CircuitBreaker,
    metrics: Arc<StoreMetrics>,
    top_script: Script,
    record_script: Script,
    reconcile_script: Script,
}

impl RedisStore {
    /// Connect using the store and circuit breaker configuration.
    pub async fn connect(
        store: &StoreConfig,
        breaker: &CircuitBreakerConfig,
        metrics: Arc<StoreMetrics>,
    ) -> anyhow::Result<Self> {
        let client = Client::open(store.url.as_str()).context("failed to construct Redis client")?;
        let conn = timeout(store.command_timeout() * 4, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                ViewRankError::StoreUnavailable(format!("timed out connecting to {}", store.url))
            })?
            .context("failed to initialize Redis connection manager")?;

        debug!(url = %store.url, "Connected to Redis");

        Ok(Self::with_connection(
            conn,
            KeySpace::new(store.key_prefix.clone(), store.ranking_key.clone()),
            store,
            CircuitBreaker::new(breaker.failure_threshold, breaker.reset_timeout()),
            metrics,
        ))
    }

    pub fn with_connection(
        conn: ConnectionManager,
        keys: KeySpace,
        store: &StoreConfig,
        breaker: CircuitBreaker,
        metrics: Arc<StoreMetrics>,
    ) -> Self {
        Self {
            conn,
            keys,
            command_timeout: store.command_timeout(),
            max_read_retries: store.max_read_retries,
            retry_delay: store.retry_delay(),
            breaker,
            metrics,
            top_script: Script::new(TOP_DESC_SCRIPT),
            record_script: Script::new(RECORD_VIEW_SCRIPT),
            reconcile_script: Script::new(RECONCILE_SCRIPT),
        }
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Run one command under the timeout and circuit breaker.
    async fn execute<T, F, Fut>(&self, store_op: &str, command: F) -> ViewRankResult<T>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        self.breaker.guard(store_op).await?;
        self.metrics.record_request(store_op);

        let started = Instant::now();
        let outcome = match timeout(self.command_timeout, command(self.conn.clone())).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ViewRankError::from(e)),
            Err(_) => {
                self.metrics.record_timeout(store_op);
                Err(ViewRankError::StoreUnavailable(format!(
                    "{} timed out after {}ms",
                    store_op,
                    self.command_timeout.as_millis()
                )))
            }
        };

        match outcome {
            Ok(value) => {
                self.metrics.record_success(store_op, started.elapsed());
                if self.breaker.record_success().await {
                    self.metrics.record_circuit_breaker_close();
                }
                Ok(value)
            }
            Err(err) => {
                self.metrics.record_failure(store_op, &err.to_string());
                if err.is_store_failure() && self.breaker.record_failure().await {
                    self.metrics.record_circuit_breaker_open();
                }
                Err(err)
            }
        }
    }

    /// Run an idempotent read, retrying transient failures with linear backoff.
    async fn execute_read<T, F, Fut>(&self, store_op: &str, command: F) -> ViewRankResult<T>
    where
        F: Fn(ConnectionManager) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match self.execute(store_op, &command).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_read_retries => {
                    attempt += 1;
                    self.metrics.record_retry(store_op, attempt);
                    warn!(store_op, attempt, error = %err, "Retrying store read");
                    sleep(self.retry_delay * attempt).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    #[instrument(skip(self, item_id), fields(store_op = "incrby", item_id = %item_id))]
    async fn increment_by(&self, item_id: &ItemId, delta: u64) -> ViewRankResult<u64> {
        let key = self.keys.views_key(item_id);
        self.execute("incrby", |mut conn| async move {
            let total: u64 = conn.incr(key, delta).await?;
            Ok(total)
        })
        .await
    }

    async fn get(&self, item_id: &ItemId) -> ViewRankResult<Option<u64>> {
        let key = self.keys.views_key(item_id);
        self.execute_read("get", |mut conn| {
            let key = key.clone();
            async move {
                let total: Option<u64> = conn.get(key).await?;
                Ok(total)
            }
        })
        .await
    }
}

#[async_trait]
impl RankingStore for RedisStore {
    #[instrument(skip(self, item_id), fields(store_op = "zincrby", item_id = %item_id))]
    async fn increment_score(&self, item_id: &ItemId, delta: Score) -> ViewRankResult<Score> {
        if !delta.is_finite() {
            return Err(ViewRankError::InvalidArgument(format!(
                "score delta must be finite, got {}",
                delta
            )));
        }
        let key = self.keys.ranking_key().to_string();
        let member = item_id.as_str().to_string();
        self.execute("zincrby", |mut conn| async move {
            let score: f64 = conn.zincr(key, member, delta).await?;
            Ok(score)
        })
        .await
    }

    async fn top_by_score(
        &self,
        n: usize,
        order: ScoreOrder,
    ) -> ViewRankResult<Vec<RankedEntry>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let key = self.keys.ranking_key().to_string();
        let raw: Vec<(String, f64)> = match order {
            ScoreOrder::Descending => {
                self.execute_read("top_desc", |mut conn| {
                    let mut invocation = self.top_script.prepare_invoke();
                    invocation.key(key.clone()).arg(n);
                    async move { invocation.invoke_async(&mut conn).await }
                })
                .await?
            }
            // ZRANGE already orders equal scores by member ascending.
            ScoreOrder::Ascending => {
                self.execute_read("zrange", |mut conn| {
                    let key = key.clone();
                    async move {
                        conn.zrange_withscores(key, 0, n as isize - 1).await
                    }
                })
                .await?
            }
        };

        let mut entries: Vec<RankedEntry> = raw
            .into_iter()
            .map(|(member, score)| RankedEntry::new(member, score))
            .collect();
        sort_and_truncate(&mut entries, n, order);
        Ok(entries)
    }

    async fn score(&self, item_id: &ItemId) -> ViewRankResult<Option<Score>> {
        let key = self.keys.ranking_key().to_string();
        let member = item_id.as_str().to_string();
        self.execute_read("zscore", |mut conn| {
            let (key, member) = (key.clone(), member.clone());
            async move {
                let score: Option<f64> = conn.zscore(key, member).await?;
                Ok(score)
            }
        })
        .await
    }

    async fn entry_count(&self) -> ViewRankResult<usize> {
        let key = self.keys.ranking_key().to_string();
        self.execute_read("zcard", |mut conn| {
            let key = key.clone();
            async move {
                let count: usize = conn.zcard(key).await?;
                Ok(count)
            }
        })
        .await
    }
}

#[async_trait]
impl AtomicViewStore for RedisStore {
    #[instrument(skip(self, item_id), fields(store_op = "record_view_script", item_id = %item_id))]
    async fn record_view_atomic(&self, item_id: &ItemId, delta: u64) -> ViewRankResult<u64> {
        let mut invocation = self.record_script.prepare_invoke();
        invocation
            .key(self.keys.views_key(item_id))
            .key(self.keys.ranking_key())
            .arg(delta)
            .arg(item_id.as_str());
        self.execute("record_view_script", |mut conn| async move {
            let total: u64 = invocation.invoke_async(&mut conn).await?;
            Ok(total)
        })
        .await
    }

    #[instrument(skip(self, item_id), fields(store_op = "reconcile_script", item_id = %item_id))]
    async fn reconcile_atomic(&self, item_id: &ItemId) -> ViewRankResult<(u64, Score)> {
        let mut invocation = self.reconcile_script.prepare_invoke();
        invocation
            .key(self.keys.views_key(item_id))
            .key(self.keys.ranking_key())
            .arg(item_id.as_str());
        self.execute("reconcile_script", |mut conn| async move {
            let (total, score_before): (u64, f64) = invocation.invoke_async(&mut conn).await?;
            Ok((total, score_before))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_keyspace_matches_image_layout() {
        let keys = KeySpace::default();
        assert_eq!(keys.views_key(&ItemId::from(42u64)), "image:42:views");
        assert_eq!(keys.ranking_key(), "image_ranking");
    }

    #[test]
    fn test_custom_keyspace() {
        let keys = KeySpace::new("post", "post_ranking");
        assert_eq!(keys.views_key(&ItemId::from("abc")), "post:abc:views");
        assert_eq!(keys.ranking_key(), "post_ranking");
    }

    #[test]
    fn test_scripts_touch_expected_commands() {
        assert!(TOP_DESC_SCRIPT.contains("ZREVRANGE"));
        assert!(TOP_DESC_SCRIPT.contains("ZRANGEBYSCORE"));
        assert!(RECORD_VIEW_SCRIPT.contains("INCRBY"));
        assert!(RECORD_VIEW_SCRIPT.contains("ZINCRBY"));
        assert!(RECONCILE_SCRIPT.contains("ZSCORE"));
        assert!(RECONCILE_SCRIPT.contains("ZINCRBY"));
    }
}
