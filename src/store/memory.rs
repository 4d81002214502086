//! In-process counter and ranking stores.
//!
//! Used for tests, benchmarks and single-process deployments. Both stores can
//! be switched into an unavailable state to exercise failure handling.

use super::{CounterStore, RankingStore};
use crate::error::{ViewRankError, ViewRankResult};
use crate::types::{sort_and_truncate, ItemId, RankedEntry, Score, ScoreOrder};
use async_trait::async_trait;
use dashmap::DashMap;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::trace;

/// Counter store backed by a sharded concurrent map.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    counts: DashMap<ItemId, u64>,
    unavailable: AtomicBool,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `StoreUnavailable` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    fn check_available(&self) -> ViewRankResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(ViewRankError::StoreUnavailable(
                "in-memory counter store is unavailable".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment_by(&self, item_id: &ItemId, delta: u64) -> ViewRankResult<u64> {
        self.check_available()?;
        // The entry guard holds the shard lock, so read-modify-write is atomic
        // per item and every caller sees its own total.
        let mut count = self.counts.entry(item_id.clone()).or_insert(0);
        *count = count.checked_add(delta).ok_or_else(|| {
            ViewRankError::InvalidArgument(format!("view counter overflow for item {}", item_id))
        })?;
        trace!(store_op = "incr", item_id = %item_id, total = *count);
        Ok(*count)
    }

    async fn get(&self, item_id: &ItemId) -> ViewRankResult<Option<u64>> {
        self.check_available()?;
        Ok(self.counts.get(item_id).map(|count| *count))
    }
}

/// Sort key of the leaderboard: score descending, then item id ascending.
#[derive(Debug, Clone)]
struct RankKey(RankedEntry);

impl PartialEq for RankKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for RankKey {}

impl PartialOrd for RankKey {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for RankKey {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.0.cmp_ranked(&other.0, ScoreOrder::Descending)
    }
}

#[derive(Debug, Default)]
struct Leaderboard {
    scores: HashMap<ItemId, Score>,
    order: BTreeSet<RankKey>,
}

/// Sorted-set ranking store guarded by a single reader/writer lock.
///
/// Queries hold the read lock for the whole scan, so every result is a
/// consistent snapshot.
#[derive(Debug, Default)]
pub struct InMemoryRankingStore {
    board: RwLock<Leaderboard>,
    unavailable: AtomicBool,
}

impl InMemoryRankingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `StoreUnavailable` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> ViewRankResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(ViewRankError::StoreUnavailable(
                "in-memory ranking store is unavailable".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RankingStore for InMemoryRankingStore {
    async fn increment_score(&self, item_id: &ItemId, delta: Score) -> ViewRankResult<Score> {
        self.check_available()?;
        if !delta.is_finite() {
            return Err(ViewRankError::InvalidArgument(format!(
                "score delta must be finite, got {}",
                delta
            )));
        }

        let mut board = self.board.write().await;
        let previous = board.scores.get(item_id).copied();
        if let Some(old) = previous {
            board
                .order
                .remove(&RankKey(RankedEntry::new(item_id.clone(), old)));
        }
        let score = previous.unwrap_or(0.0) + delta;
        board.scores.insert(item_id.clone(), score);
        board
            .order
            .insert(RankKey(RankedEntry::new(item_id.clone(), score)));
        trace!(store_op = "zincrby", item_id = %item_id, score = score);
        Ok(score)
    }

    async fn top_by_score(
        &self,
        n: usize,
        order: ScoreOrder,
    ) -> ViewRankResult<Vec<RankedEntry>> {
        self.check_available()?;
        let board = self.board.read().await;
        let entries = match order {
            ScoreOrder::Descending => board.order.iter().take(n).map(|k| k.0.clone()).collect(),
            ScoreOrder::Ascending => {
                let mut all: Vec<RankedEntry> = board.order.iter().map(|k| k.0.clone()).collect();
                sort_and_truncate(&mut all, n, ScoreOrder::Ascending);
                all
            }
        };
        Ok(entries)
    }

    async fn score(&self, item_id: &ItemId) -> ViewRankResult<Option<Score>> {
        self.check_available()?;
        Ok(self.board.read().await.scores.get(item_id).copied())
    }

    async fn entry_count(&self) -> ViewRankResult<usize> {
        self.check_available()?;
        Ok(self.board.read().await.scores.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn ids(entries: &[RankedEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.item_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_counter_starts_at_zero() {
        let store = InMemoryCounterStore::new();
        let item = ItemId::from(1u64);

        assert_eq!(store.get(&item).await.unwrap(), None);
        assert_eq!(store.increment(&item).await.unwrap(), 1);
        assert_eq!(store.increment(&item).await.unwrap(), 2);
        assert_eq!(store.increment_by(&item, 5).await.unwrap(), 7);
        assert_eq!(store.get(&item).await.unwrap(), Some(7));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_distinct() {
        let store = Arc::new(InMemoryCounterStore::new());
        let item = ItemId::from("hot");
        let mut handles = vec![];

        for _ in 0..200 {
            let store = Arc::clone(&store);
            let item = item.clone();
            handles.push(tokio::spawn(async move { store.increment(&item).await.unwrap() }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            assert!(seen.insert(handle.await.unwrap()));
        }

        assert_eq!(seen.len(), 200);
        assert_eq!(store.get(&item).await.unwrap(), Some(200));
        assert_eq!(seen.iter().max(), Some(&200));
    }

    #[tokio::test]
    async fn test_counter_unavailable() {
        let store = InMemoryCounterStore::new();
        store.set_unavailable(true);
        let err = store.increment(&ItemId::from(1u64)).await.unwrap_err();
        assert!(err.is_store_failure());

        store.set_unavailable(false);
        assert_eq!(store.increment(&ItemId::from(1u64)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ranking_orders_by_score_then_id() {
        let store = InMemoryRankingStore::new();
        store.increment_score(&"b".into(), 2.0).await.unwrap();
        store.increment_score(&"a".into(), 2.0).await.unwrap();
        store.increment_score(&"c".into(), 5.0).await.unwrap();
        store.increment_score(&"d".into(), 1.0).await.unwrap();

        let top = store.top_by_score(3, ScoreOrder::Descending).await.unwrap();
        assert_eq!(ids(&top), vec!["c", "a", "b"]);

        let bottom = store.top_by_score(2, ScoreOrder::Ascending).await.unwrap();
        assert_eq!(ids(&bottom), vec!["d", "a"]);
    }

    #[tokio::test]
    async fn test_ranking_increment_moves_entry() {
        let store = InMemoryRankingStore::new();
        let a = ItemId::from("a");
        let b = ItemId::from("b");

        store.increment_score(&a, 1.0).await.unwrap();
        store.increment_score(&b, 2.0).await.unwrap();
        assert_eq!(store.increment_score(&a, 2.0).await.unwrap(), 3.0);

        let top = store.top_by_score(10, ScoreOrder::Descending).await.unwrap();
        assert_eq!(ids(&top), vec!["a", "b"]);
        assert_eq!(store.entry_count().await.unwrap(), 2);
        assert_eq!(store.score(&a).await.unwrap(), Some(3.0));
        assert_eq!(store.score(&"zzz".into()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ranking_top_n_bounded_by_entries() {
        let store = InMemoryRankingStore::new();
        assert!(store
            .top_by_score(5, ScoreOrder::Descending)
            .await
            .unwrap()
            .is_empty());

        store.increment_score(&"only".into(), 1.0).await.unwrap();
        assert_eq!(
            store.top_by_score(5, ScoreOrder::Descending).await.unwrap().len(),
            1
        );
        assert!(store
            .top_by_score(0, ScoreOrder::Descending)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_ranking_rejects_non_finite_delta() {
        let store = InMemoryRankingStore::new();
        assert!(store
            .increment_score(&"a".into(), f64::NAN)
            .await
            .is_err());
        assert_eq!(store.entry_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ranking_unavailable() {
        let store = InMemoryRankingStore::new();
        store.set_unavailable(true);
        assert!(store
            .increment_score(&"a".into(), 1.0)
            .await
            .unwrap_err()
            .is_store_failure());
        assert!(store
            .top_by_score(1, ScoreOrder::Descending)
            .await
            .is_err());
    }
}
