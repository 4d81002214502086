//! Item repository collaborators.
//!
//! The engine needs exactly one thing from the application's item storage: a
//! bulk lookup by identifier that may return records in any order and may
//! omit ids that no longer exist.

use crate::error::{ViewRankError, ViewRankResult};
use crate::metrics::RepositoryMetrics;
use crate::types::{Identified, ItemId, ItemRecord};
use async_trait::async_trait;
use dashmap::DashMap;
use moka::future::Cache as MokaCache;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

#[async_trait]
pub trait ItemRepository: Send + Sync {
    type Item: Identified + Clone + Send + Sync + 'static;

    /// Fetch every known item among `ids`. Order of the result is unspecified
    /// and missing ids are simply absent.
    async fn fetch_by_ids(&self, ids: &[ItemId]) -> ViewRankResult<Vec<Self::Item>>;
}

#[async_trait]
impl<R: ItemRepository> ItemRepository for Arc<R> {
    type Item = R::Item;

    async fn fetch_by_ids(&self, ids: &[ItemId]) -> ViewRankResult<Vec<Self::Item>> {
        (**self).fetch_by_ids(ids).await
    }
}

/// Concurrent in-process item storage.
#[derive(Debug)]
pub struct InMemoryItemRepository<T> {
    items: DashMap<ItemId, T>,
}

impl<T> Default for InMemoryItemRepository<T> {
    fn default() -> Self {
        Self {
            items: DashMap::new(),
        }
    }
}

impl<T> InMemoryItemRepository<T>
where
    T: Identified + Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: impl IntoIterator<Item = T>) -> Self {
        let repo = Self::new();
        for item in items {
            repo.insert(item);
        }
        repo
    }

    /// Insert or replace an item, returning the previous record.
    pub fn insert(&self, item: T) -> Option<T> {
        self.items.insert(item.item_id().clone(), item)
    }

    pub fn remove(&self, id: &ItemId) -> Option<T> {
        self.items.remove(id).map(|(_, item)| item)
    }

    pub fn get(&self, id: &ItemId) -> Option<T> {
        self.items.get(id).map(|item| item.clone())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl InMemoryItemRepository<ItemRecord> {
    /// Load a JSON array of item records.
    pub fn from_json_file(path: &Path) -> ViewRankResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let records: Vec<ItemRecord> = serde_json::from_str(&content)?;
        debug!(path = %path.display(), items = records.len(), "Loaded item catalog");
        Ok(Self::from_items(records))
    }
}

#[async_trait]
impl<T> ItemRepository for InMemoryItemRepository<T>
where
    T: Identified + Clone + Send + Sync + 'static,
{
    type Item = T;

    async fn fetch_by_ids(&self, ids: &[ItemId]) -> ViewRankResult<Vec<T>> {
        Ok(ids.iter().filter_map(|id| self.get(id)).collect())
    }
}

/// Read-through cache in front of another repository.
///
/// Entries expire after the configured TTL; the cache is bounded by entry
/// count with TinyLFU eviction. Misses are fetched from the backing
/// repository in a single batch.
///
/// A deleted item keeps resolving from the cache, and so keeps appearing in
/// rankings, until its entry expires or [`invalidate`](Self::invalidate) is
/// called. Delete paths should invalidate.
pub struct CachedItemRepository<R: ItemRepository> {
    inner: R,
    cache: MokaCache<ItemId, R::Item>,
    metrics: Arc<RepositoryMetrics>,
}

impl<R: ItemRepository> CachedItemRepository<R> {
    pub fn new(inner: R, max_entries: u64, ttl: Duration, metrics: Arc<RepositoryMetrics>) -> Self {
        let cache = MokaCache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();
        Self {
            inner,
            cache,
            metrics,
        }
    }

    /// Drop a cached record, e.g. after the item was edited or deleted.
    pub async fn invalidate(&self, id: &ItemId) {
        self.cache.invalidate(id).await;
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }
}

#[async_trait]
impl<R: ItemRepository> ItemRepository for CachedItemRepository<R> {
    type Item = R::Item;

    async fn fetch_by_ids(&self, ids: &[ItemId]) -> ViewRankResult<Vec<R::Item>> {
        let mut found = Vec::with_capacity(ids.len());
        let mut missing = Vec::new();

        for id in ids {
            match self.cache.get(id).await {
                Some(item) => {
                    self.metrics.record_hit();
                    found.push(item);
                }
                None => {
                    self.metrics.record_miss();
                    missing.push(id.clone());
                }
            }
        }

        if !missing.is_empty() {
            self.metrics.record_fetch(missing.len());
            let fetched = self.inner.fetch_by_ids(&missing).await.map_err(|e| match e {
                ViewRankError::RepositoryUnavailable(_) => e,
                other => ViewRankError::RepositoryUnavailable(other.to_string()),
            })?;
            for item in fetched {
                self.cache.insert(item.item_id().clone(), item.clone()).await;
                found.push(item);
            }
        }

        trace!(
            requested = ids.len(),
            resolved = found.len(),
            "Resolved items through cache"
        );
        Ok(found)
    }
}
