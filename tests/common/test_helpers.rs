//! Consolidated test helpers for viewrank
//!
//! [`TestEnvironment`] wires a [`RankingEngine`] to in-memory stores that can
//! be switched off individually, plus a [`RecordingObserver`] to inspect what
//! the engine reported.

use std::sync::{Arc, Mutex};

use viewrank::{
    DivergenceEvent, DivergenceObserver, InMemoryCounterStore, InMemoryItemRepository,
    InMemoryRankingStore, ItemId, ItemRecord, RankingEngine,
};

use super::fixtures::abc_catalog;

/// Observer that keeps every event for later assertions.
#[derive(Default)]
pub struct RecordingObserver {
    pub divergences: Mutex<Vec<DivergenceEvent>>,
    pub stale: Mutex<Vec<ItemId>>,
}

impl RecordingObserver {
    pub fn divergence_count(&self) -> usize {
        self.divergences.lock().unwrap().len()
    }

    pub fn stale_ids(&self) -> Vec<ItemId> {
        self.stale.lock().unwrap().clone()
    }
}

impl DivergenceObserver for RecordingObserver {
    fn on_divergence(&self, event: &DivergenceEvent) {
        self.divergences.lock().unwrap().push(event.clone());
    }

    fn on_stale_reference(&self, item_id: &ItemId) {
        self.stale.lock().unwrap().push(item_id.clone());
    }
}

pub type Catalog = Arc<InMemoryItemRepository<ItemRecord>>;

/// Engine plus handles on everything behind it.
pub struct TestEnvironment {
    pub engine: Arc<RankingEngine<Catalog>>,
    pub counters: Arc<InMemoryCounterStore>,
    pub rankings: Arc<InMemoryRankingStore>,
    pub catalog: Catalog,
    pub observer: Arc<RecordingObserver>,
}

impl TestEnvironment {
    /// Environment over the A/B/C catalog
    pub fn new() -> Self {
        Self::with_catalog(abc_catalog())
    }

    pub fn with_catalog(catalog: InMemoryItemRepository<ItemRecord>) -> Self {
        let counters = Arc::new(InMemoryCounterStore::new());
        let rankings = Arc::new(InMemoryRankingStore::new());
        let catalog = Arc::new(catalog);
        let observer = Arc::new(RecordingObserver::default());

        let engine = RankingEngine::new(counters.clone(), rankings.clone(), Arc::clone(&catalog))
            .with_observer(observer.clone());

        Self {
            engine: Arc::new(engine),
            counters,
            rankings,
            catalog,
            observer,
        }
    }

    /// Record `times` views of `id`, returning the last total.
    pub async fn views(&self, id: &str, times: usize) -> u64 {
        let item = ItemId::from(id);
        let mut total = 0;
        for _ in 0..times {
            total = self.engine.record_view(&item).await.unwrap();
        }
        total
    }

    /// `(id, views)` pairs of the current top `n`
    pub async fn top(&self, n: usize) -> Vec<(String, u64)> {
        self.engine
            .top_ranked(n)
            .await
            .unwrap()
            .into_iter()
            .map(|ranked| (ranked.item.id.to_string(), ranked.views()))
            .collect()
    }
}
