//! View recording and most-viewed ranking.
//!
//! [`RankingEngine`] composes a [`CounterStore`], a [`RankingStore`] and an
//! [`ItemRepository`]. The two stores are updated one after the other; when
//! the second write fails the view still counts, the item is queued for
//! [`RankingEngine::reconcile`] and the [`DivergenceObserver`] is notified.

use crate::error::{ViewRankError, ViewRankResult};
use crate::metrics::EngineMetrics;
use crate::repository::ItemRepository;
use crate::store::{AtomicViewStore, CounterStore, RankingStore};
use crate::types::{Identified, ItemId, Ranked, RankedEntry, Score, ScoreOrder};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Default size of a most-viewed listing.
pub const DEFAULT_TOP_N: usize = 10;

/// Items reconciled in parallel by [`RankingEngine::reconcile_pending`].
const RECONCILE_CONCURRENCY: usize = 8;

/// Which side of the counter/ranking pair is behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum DivergenceKind {
    /// The counter moved but the ranking write failed
    RankingBehind,
    /// The ranking holds more views than the counter
    RankingAhead,
}

/// Reported whenever the two stores are known to disagree.
#[derive(Debug, Clone)]
pub struct DivergenceEvent {
    pub item_id: ItemId,
    pub kind: DivergenceKind,
    /// Counter total at the time of detection, if known
    pub counter_total: Option<u64>,
    /// Always a `ViewRankError::PartialUpdateDivergence`
    pub error: ViewRankError,
}

/// Monitoring hook for conditions the engine absorbs instead of failing.
pub trait DivergenceObserver: Send + Sync {
    fn on_divergence(&self, event: &DivergenceEvent);

    /// A ranked id did not resolve in the item repository.
    fn on_stale_reference(&self, _item_id: &ItemId) {}
}

/// Observer that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl DivergenceObserver for LoggingObserver {
    fn on_divergence(&self, event: &DivergenceEvent) {
        warn!(
            item_id = %event.item_id,
            kind = %event.kind,
            counter_total = ?event.counter_total,
            error = %event.error,
            "View counter and ranking diverged"
        );
    }

    fn on_stale_reference(&self, item_id: &ItemId) {
        debug!(item_id = %item_id, "Dropping stale ranking reference");
    }
}

/// Result of reconciling one item.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    pub item_id: ItemId,
    /// Counter total read after any repair
    pub counter_total: u64,
    pub score_before: Score,
    pub score_after: Score,
    /// Delta applied to the ranking score, 0 when nothing was written
    pub adjusted_by: Score,
    /// Counter and score agreed after the repair and no view ran meanwhile
    pub settled: bool,
}

impl ReconcileOutcome {
    pub fn was_repaired(&self) -> bool {
        self.adjusted_by != 0.0
    }
}

#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub outcomes: Vec<ReconcileOutcome>,
    /// Items that could not be reconciled and stay queued
    pub failed: Vec<(ItemId, ViewRankError)>,
}

impl ReconcileReport {
    pub fn repaired(&self) -> usize {
        self.outcomes.iter().filter(|o| o.was_repaired()).count()
    }

    /// Items that were reconciled but are still queued.
    pub fn unsettled(&self) -> Vec<&ItemId> {
        self.outcomes
            .iter()
            .filter(|o| !o.settled)
            .map(|o| &o.item_id)
            .collect()
    }
}

/// Queue entry. Every report gets a fresh generation so a reconcile only
/// dequeues the entry it observed when it started.
#[derive(Debug, Clone, Copy)]
struct PendingEntry {
    kind: DivergenceKind,
    generation: u64,
}

/// Two-step views of one item seen by this engine.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ViewActivity {
    running: usize,
    started: u64,
}

impl ViewActivity {
    /// No view was running at `self` and none started up to `now`.
    fn idle_until(&self, now: &ViewActivity) -> bool {
        self.running == 0 && self == now
    }
}

/// Marks a two-step view as running for its whole lifetime, including
/// cancellation.
struct InFlightView<'a> {
    activity: &'a DashMap<ItemId, ViewActivity>,
    item_id: ItemId,
}

impl<'a> InFlightView<'a> {
    fn start(activity: &'a DashMap<ItemId, ViewActivity>, item_id: &ItemId) -> Self {
        {
            let mut entry = activity.entry(item_id.clone()).or_default();
            entry.running += 1;
            entry.started += 1;
        }
        Self {
            activity,
            item_id: item_id.clone(),
        }
    }
}

impl Drop for InFlightView<'_> {
    fn drop(&mut self) {
        if let Some(mut entry) = self.activity.get_mut(&self.item_id) {
            entry.running = entry.running.saturating_sub(1);
        }
    }
}

fn divergence_kind(counter_minus_score: Score) -> DivergenceKind {
    if counter_minus_score < 0.0 {
        DivergenceKind::RankingAhead
    } else {
        DivergenceKind::RankingBehind
    }
}

pub struct RankingEngine<R: ItemRepository> {
    counters: Arc<dyn CounterStore>,
    rankings: Arc<dyn RankingStore>,
    atomic: Option<Arc<dyn AtomicViewStore>>,
    repository: R,
    observer: Arc<dyn DivergenceObserver>,
    pending: DashMap<ItemId, PendingEntry>,
    next_generation: AtomicU64,
    /// One entry per item viewed through this engine
    activity: DashMap<ItemId, ViewActivity>,
    metrics: Arc<EngineMetrics>,
}

impl<R: ItemRepository> RankingEngine<R> {
    pub fn new(
        counters: Arc<dyn CounterStore>,
        rankings: Arc<dyn RankingStore>,
        repository: R,
    ) -> Self {
        Self {
            counters,
            rankings,
            atomic: None,
            repository,
            observer: Arc::new(LoggingObserver),
            pending: DashMap::new(),
            next_generation: AtomicU64::new(0),
            activity: DashMap::new(),
            metrics: Arc::new(EngineMetrics::new()),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn DivergenceObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Record views and reconcile through single atomic counter+ranking
    /// updates instead of separate writes.
    pub fn with_atomic_store(mut self, atomic: Arc<dyn AtomicViewStore>) -> Self {
        self.atomic = Some(atomic);
        self
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// Count one view of `item_id` and return the new total.
    ///
    /// Fails only when the counter itself cannot be updated.
    #[instrument(skip(self, item_id), fields(engine_op = "record_view", item_id = %item_id))]
    pub async fn record_view(&self, item_id: &ItemId) -> ViewRankResult<u64> {
        let started = Instant::now();

        if let Some(atomic) = &self.atomic {
            let total = atomic.record_view_atomic(item_id, 1).await.map_err(|e| {
                self.metrics.record_view_failure();
                e
            })?;
            self.metrics.record_view(started.elapsed());
            return Ok(total);
        }

        let _in_flight = InFlightView::start(&self.activity, item_id);

        let total = self.counters.increment(item_id).await.map_err(|e| {
            self.metrics.record_view_failure();
            e
        })?;

        if let Err(err) = self.rankings.increment_score(item_id, 1.0).await {
            self.report_divergence(
                item_id,
                DivergenceKind::RankingBehind,
                Some(total),
                format!("ranking update failed after counter reached {}: {}", total, err),
            );
        }

        self.metrics.record_view(started.elapsed());
        debug!(total, "View recorded");
        Ok(total)
    }

    /// Current view total without counting a view.
    pub async fn total_views(&self, item_id: &ItemId) -> ViewRankResult<u64> {
        Ok(self.counters.get(item_id).await?.unwrap_or(0))
    }

    /// Top `n` ranking entries without resolving items.
    pub async fn top_entries(&self, n: usize) -> ViewRankResult<Vec<RankedEntry>> {
        if n == 0 {
            return Err(ViewRankError::InvalidArgument(
                "ranking size must be at least 1".to_string(),
            ));
        }
        self.rankings.top_by_score(n, ScoreOrder::Descending).await
    }

    /// The `n` most viewed items, most viewed first.
    ///
    /// Ids that no longer resolve in the repository are dropped, so fewer than
    /// `n` items may come back.
    #[instrument(skip(self), fields(engine_op = "top_ranked"))]
    pub async fn top_ranked(&self, n: usize) -> ViewRankResult<Vec<Ranked<R::Item>>> {
        let entries = self.top_entries(n).await.map_err(|e| {
            self.metrics.record_ranking_failure();
            e
        })?;
        if entries.is_empty() {
            self.metrics.record_ranking_query();
            return Ok(Vec::new());
        }

        let ids: Vec<ItemId> = entries.iter().map(|e| e.item_id.clone()).collect();
        let fetched = self.repository.fetch_by_ids(&ids).await.map_err(|e| {
            self.metrics.record_ranking_failure();
            match e {
                ViewRankError::RepositoryUnavailable(_) => e,
                other => ViewRankError::RepositoryUnavailable(other.to_string()),
            }
        })?;

        let mut by_id: HashMap<ItemId, R::Item> = fetched
            .into_iter()
            .map(|item| (item.item_id().clone(), item))
            .collect();

        let mut ranked = Vec::with_capacity(entries.len());
        for entry in entries {
            match by_id.remove(&entry.item_id) {
                Some(item) => ranked.push(Ranked {
                    item,
                    score: entry.score,
                }),
                None => {
                    self.metrics.record_stale_reference();
                    self.observer.on_stale_reference(&entry.item_id);
                }
            }
        }

        self.metrics.record_ranking_query();
        Ok(ranked)
    }

    pub async fn top_ranked_default(&self) -> ViewRankResult<Vec<Ranked<R::Item>>> {
        self.top_ranked(DEFAULT_TOP_N).await
    }

    /// Items waiting for reconciliation, sorted by id.
    pub fn pending_divergences(&self) -> Vec<ItemId> {
        let mut ids: Vec<ItemId> = self.pending.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// How a queued item diverged, `None` if it is not queued.
    pub fn pending_kind(&self, item_id: &ItemId) -> Option<DivergenceKind> {
        self.pending.get(item_id).map(|entry| entry.kind)
    }

    /// Bring the ranking score of `item_id` back in line with its counter.
    ///
    /// The counter is the source of truth. Nothing is written unless no view
    /// of the item ran through this engine since the reconcile began, and a
    /// score is only lowered after a second counter read confirms it. The item
    /// leaves the queue only when reads after the repair find both sides equal
    /// and still no view ran. Anything else keeps it queued for the next pass.
    #[instrument(skip(self, item_id), fields(engine_op = "reconcile", item_id = %item_id))]
    pub async fn reconcile(&self, item_id: &ItemId) -> ViewRankResult<ReconcileOutcome> {
        if let Some(atomic) = &self.atomic {
            return self.reconcile_atomic(atomic.as_ref(), item_id).await;
        }

        let activity = self.view_activity(item_id);
        let counter_total = self.total_views(item_id).await?;
        let score_before = self.rankings.score(item_id).await?.unwrap_or(0.0);
        let observed = counter_total as Score - score_before;

        let generation = if observed != 0.0 {
            Some(self.mark_pending(item_id, divergence_kind(observed)))
        } else {
            self.pending.get(item_id).map(|entry| entry.generation)
        };

        let mut adjusted_by = 0.0;
        if observed != 0.0 && activity.idle_until(&self.view_activity(item_id)) {
            // A view landing between the two reads above makes the score
            // look ahead of a counter that has already moved on.
            let confirmed =
                observed > 0.0 || self.total_views(item_id).await? == counter_total;
            if confirmed {
                if observed < 0.0 {
                    self.emit_divergence(
                        item_id,
                        DivergenceKind::RankingAhead,
                        Some(counter_total),
                        format!(
                            "ranking score {} exceeds counter total {}",
                            score_before, counter_total
                        ),
                    );
                }
                self.rankings.increment_score(item_id, observed).await?;
                adjusted_by = observed;
                self.metrics.record_reconciliation();
                info!(
                    counter_total,
                    score_before,
                    adjusted_by,
                    "Reconciled ranking score"
                );
            } else {
                debug!(counter_total, score_before, "Counter moved, score left as is");
            }
        }

        let counter_after = self.total_views(item_id).await?;
        let score_after = self.rankings.score(item_id).await?.unwrap_or(0.0);
        let settled = counter_after as Score == score_after
            && activity.idle_until(&self.view_activity(item_id));

        if settled {
            if let Some(generation) = generation {
                self.pending
                    .remove_if(item_id, |_, entry| entry.generation == generation);
            }
        } else {
            self.mark_pending(item_id, divergence_kind(counter_after as Score - score_after));
            debug!(counter_after, score_after, "Item stays queued");
        }

        Ok(ReconcileOutcome {
            item_id: item_id.clone(),
            counter_total: counter_after,
            score_before,
            score_after,
            adjusted_by,
            settled,
        })
    }

    async fn reconcile_atomic(
        &self,
        atomic: &dyn AtomicViewStore,
        item_id: &ItemId,
    ) -> ViewRankResult<ReconcileOutcome> {
        let generation = self.pending.get(item_id).map(|entry| entry.generation);
        let (counter_total, score_before) = atomic.reconcile_atomic(item_id).await?;
        let adjusted_by = counter_total as Score - score_before;

        if adjusted_by != 0.0 {
            if adjusted_by < 0.0 {
                self.emit_divergence(
                    item_id,
                    DivergenceKind::RankingAhead,
                    Some(counter_total),
                    format!(
                        "ranking score {} exceeds counter total {}",
                        score_before, counter_total
                    ),
                );
            }
            self.metrics.record_reconciliation();
            info!(
                counter_total,
                score_before,
                adjusted_by,
                "Reconciled ranking score"
            );
        }

        if let Some(generation) = generation {
            self.pending
                .remove_if(item_id, |_, entry| entry.generation == generation);
        }
        Ok(ReconcileOutcome {
            item_id: item_id.clone(),
            counter_total,
            score_before,
            score_after: counter_total as Score,
            adjusted_by,
            settled: true,
        })
    }

    /// Reconcile every queued item. Items that fail stay queued.
    pub async fn reconcile_pending(&self) -> ReconcileReport {
        let results: Vec<_> = stream::iter(self.pending_divergences())
            .map(|item_id| async move {
                let result = self.reconcile(&item_id).await;
                (item_id, result)
            })
            .buffer_unordered(RECONCILE_CONCURRENCY)
            .collect()
            .await;

        let mut report = ReconcileReport::default();
        for (item_id, result) in results {
            match result {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(err) => {
                    warn!(item_id = %item_id, error = %err, "Reconciliation failed");
                    report.failed.push((item_id, err));
                }
            }
        }
        report.outcomes.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        report.failed.sort_by(|a, b| a.0.cmp(&b.0));
        report
    }

    fn view_activity(&self, item_id: &ItemId) -> ViewActivity {
        self.activity
            .get(item_id)
            .map(|entry| *entry)
            .unwrap_or_default()
    }

    /// Queue `item_id` unless it is already queued; returns the generation
    /// of the queue entry.
    fn mark_pending(&self, item_id: &ItemId, kind: DivergenceKind) -> u64 {
        self.pending
            .entry(item_id.clone())
            .or_insert_with(|| PendingEntry {
                kind,
                generation: self.next_generation.fetch_add(1, AtomicOrdering::Relaxed),
            })
            .generation
    }

    fn report_divergence(
        &self,
        item_id: &ItemId,
        kind: DivergenceKind,
        counter_total: Option<u64>,
        detail: String,
    ) {
        let generation = self.next_generation.fetch_add(1, AtomicOrdering::Relaxed);
        self.pending
            .insert(item_id.clone(), PendingEntry { kind, generation });
        self.emit_divergence(item_id, kind, counter_total, detail);
    }

    fn emit_divergence(
        &self,
        item_id: &ItemId,
        kind: DivergenceKind,
        counter_total: Option<u64>,
        detail: String,
    ) {
        self.metrics.record_divergence();
        let event = DivergenceEvent {
            item_id: item_id.clone(),
            kind,
            counter_total,
            error: ViewRankError::PartialUpdateDivergence {
                item_id: item_id.to_string(),
                detail,
            },
        };
        self.observer.on_divergence(&event);
    }
}
