use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Metrics for engine operations
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Views successfully recorded
    pub views_recorded: AtomicU64,
    /// `record_view` calls that failed at the counter step
    pub view_failures: AtomicU64,
    /// Ranking queries served
    pub ranking_queries: AtomicU64,
    /// Ranking queries that failed
    pub ranking_failures: AtomicU64,
    /// Counter/ranking divergences detected
    pub divergences: AtomicU64,
    /// Ranked ids that no longer resolve in the item repository
    pub stale_references: AtomicU64,
    /// Items whose score was corrected by reconciliation
    pub reconciliations: AtomicU64,
    /// Total time spent in record_view (nanoseconds)
    pub record_latency_ns: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_view(&self, latency: Duration) {
        self.views_recorded.fetch_add(1, Ordering::Relaxed);
        self.record_latency_ns
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
        trace!(
            engine_op = "record_view",
            latency_ns = latency.as_nanos() as u64
        );
    }

    pub fn record_view_failure(&self) {
        self.view_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ranking_query(&self) {
        self.ranking_queries.fetch_add(1, Ordering::Relaxed);
        trace!(engine_op = "top_ranked");
    }

    pub fn record_ranking_failure(&self) {
        self.ranking_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_divergence(&self) {
        self.divergences.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_reference(&self) {
        self.stale_references.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconciliation(&self) {
        self.reconciliations.fetch_add(1, Ordering::Relaxed);
    }

    /// Average record_view latency in milliseconds
    pub fn avg_record_latency_ms(&self) -> f64 {
        let count = self.views_recorded.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        let total_ns = self.record_latency_ns.load(Ordering::Relaxed);
        (total_ns as f64 / count as f64) / 1_000_000.0
    }

    pub fn log_summary(&self) {
        info!(
            operation = "engine_metrics_summary",
            views_recorded = self.views_recorded.load(Ordering::Relaxed),
            view_failures = self.view_failures.load(Ordering::Relaxed),
            ranking_queries = self.ranking_queries.load(Ordering::Relaxed),
            ranking_failures = self.ranking_failures.load(Ordering::Relaxed),
            divergences = self.divergences.load(Ordering::Relaxed),
            stale_references = self.stale_references.load(Ordering::Relaxed),
            reconciliations = self.reconciliations.load(Ordering::Relaxed),
            avg_record_latency_ms = self.avg_record_latency_ms(),
        );
    }
}

/// Metrics for store round trips
#[derive(Debug, Default)]
pub struct StoreMetrics {
    /// Total number of store commands issued
    pub request_count: AtomicU64,
    /// Total number of successful commands
    pub success_count: AtomicU64,
    /// Total number of failed commands
    pub failure_count: AtomicU64,
    /// Commands that hit the command timeout
    pub timeout_count: AtomicU64,
    /// Total number of read retries
    pub retry_count: AtomicU64,
    /// Total time spent in store calls (nanoseconds)
    pub total_latency_ns: AtomicU64,
    /// Circuit breaker state changes
    pub circuit_breaker_opens: AtomicU64,
    pub circuit_breaker_closes: AtomicU64,
}

impl StoreMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, store_op: &str) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        trace!(store_op = store_op, "request");
    }

    pub fn record_success(&self, store_op: &str, latency: Duration) {
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ns
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
        trace!(
            store_op = store_op,
            latency_ms = latency.as_millis() as u64,
            "success"
        );
    }

    pub fn record_failure(&self, store_op: &str, error: &str) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        debug!(store_op = store_op, error = error, "failure");
    }

    pub fn record_timeout(&self, store_op: &str) {
        self.timeout_count.fetch_add(1, Ordering::Relaxed);
        debug!(store_op = store_op, "timeout");
    }

    pub fn record_retry(&self, store_op: &str, attempt: u32) {
        self.retry_count.fetch_add(1, Ordering::Relaxed);
        debug!(store_op = store_op, attempt = attempt, "retry");
    }

    pub fn record_circuit_breaker_open(&self) {
        self.circuit_breaker_opens.fetch_add(1, Ordering::Relaxed);
        warn!(store_op = "circuit_breaker", state = "opened");
    }

    pub fn record_circuit_breaker_close(&self) {
        self.circuit_breaker_closes.fetch_add(1, Ordering::Relaxed);
        info!(store_op = "circuit_breaker", state = "closed");
    }

    /// Calculate average latency in milliseconds
    pub fn avg_latency_ms(&self) -> f64 {
        let count = self.success_count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        let total_ns = self.total_latency_ns.load(Ordering::Relaxed);
        (total_ns as f64 / count as f64) / 1_000_000.0
    }

    /// Get success rate as a percentage
    pub fn success_rate(&self) -> f64 {
        let total = self.request_count.load(Ordering::Relaxed);
        if total == 0 {
            return 100.0;
        }
        let success = self.success_count.load(Ordering::Relaxed);
        (success as f64 / total as f64) * 100.0
    }

    pub fn log_summary(&self) {
        info!(
            operation = "store_metrics_summary",
            total_requests = self.request_count.load(Ordering::Relaxed),
            successful = self.success_count.load(Ordering::Relaxed),
            failed = self.failure_count.load(Ordering::Relaxed),
            timeouts = self.timeout_count.load(Ordering::Relaxed),
            retries = self.retry_count.load(Ordering::Relaxed),
            success_rate_pct = self.success_rate(),
            avg_latency_ms = self.avg_latency_ms(),
        );
    }
}

/// Metrics for item repository lookups
#[derive(Debug, Default)]
pub struct RepositoryMetrics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    /// Batch fetches forwarded to the backing repository
    pub fetches: AtomicU64,
}

impl RepositoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch(&self, ids: usize) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        trace!(repository_op = "fetch_by_ids", ids = ids);
    }

    /// Get hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            return 0.0;
        }
        (hits as f64 / total as f64) * 100.0
    }

    pub fn log_summary(&self) {
        info!(
            operation = "repository_metrics_summary",
            hits = self.hits.load(Ordering::Relaxed),
            misses = self.misses.load(Ordering::Relaxed),
            hit_rate_pct = self.hit_rate(),
            fetches = self.fetches.load(Ordering::Relaxed),
        );
    }
}

/// Combined metrics for the entire system
#[derive(Debug)]
pub struct Metrics {
    pub engine: Arc<EngineMetrics>,
    pub store: Arc<StoreMetrics>,
    pub repository: Arc<RepositoryMetrics>,
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            engine: Arc::new(EngineMetrics::new()),
            store: Arc::new(StoreMetrics::new()),
            repository: Arc::new(RepositoryMetrics::new()),
            start_time: Instant::now(),
        }
    }

    /// Log a complete metrics summary
    pub fn log_full_summary(&self) {
        info!(
            "=== viewrank metrics ({:.1}s) ===",
            self.elapsed().as_secs_f64()
        );
        self.engine.log_summary();
        self.store.log_summary();
        self.repository.log_summary();
    }

    /// Time since the metrics were created
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
