//! Counter and ranking store abstractions.
//!
//! The engine only talks to these traits. [`memory`] provides in-process
//! implementations and [`redis`] the networked ones.

pub mod circuit_breaker;
pub mod memory;
pub mod redis;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use memory::{InMemoryCounterStore, InMemoryRankingStore};
pub use self::redis::{KeySpace, RedisStore};

use crate::error::ViewRankResult;
use crate::types::{ItemId, RankedEntry, Score, ScoreOrder};
use async_trait::async_trait;

/// One monotonically increasing view counter per item.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically add one and return the new total. Concurrent callers on the
    /// same item always observe distinct totals.
    async fn increment(&self, item_id: &ItemId) -> ViewRankResult<u64> {
        self.increment_by(item_id, 1).await
    }

    /// Atomically add `delta` and return the new total.
    async fn increment_by(&self, item_id: &ItemId, delta: u64) -> ViewRankResult<u64>;

    /// Current total, `None` if the item was never counted.
    async fn get(&self, item_id: &ItemId) -> ViewRankResult<Option<u64>>;
}

/// Score-ordered association of items, i.e. a sorted set.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RankingStore: Send + Sync {
    /// Atomically add `delta` to the item's score, creating it if absent.
    async fn increment_score(&self, item_id: &ItemId, delta: Score) -> ViewRankResult<Score>;

    /// At most `n` entries ordered by score, ties broken by item id
    /// ascending, read from a single consistent snapshot.
    async fn top_by_score(&self, n: usize, order: ScoreOrder)
        -> ViewRankResult<Vec<RankedEntry>>;

    async fn score(&self, item_id: &ItemId) -> ViewRankResult<Option<Score>>;

    /// Number of ranked items.
    async fn entry_count(&self) -> ViewRankResult<usize>;
}

/// Stores that can bump the counter and the ranking in one atomic step.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AtomicViewStore: Send + Sync {
    /// Add `delta` views to both the counter and the ranking score and return
    /// the new counter total.
    async fn record_view_atomic(&self, item_id: &ItemId, delta: u64) -> ViewRankResult<u64>;

    /// Set the ranking score to the counter total in one atomic step and
    /// return `(counter_total, score_before)`.
    async fn reconcile_atomic(&self, item_id: &ItemId) -> ViewRankResult<(u64, Score)>;
}
