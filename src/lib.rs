pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod repository;
pub mod store;
pub mod types;

pub use config::{CliArgs, Config};
pub use engine::{
    DivergenceEvent, DivergenceKind, DivergenceObserver, LoggingObserver, RankingEngine,
    ReconcileOutcome, ReconcileReport, DEFAULT_TOP_N,
};
pub use error::{ViewRankError, ViewRankResult};
pub use metrics::Metrics;
pub use repository::{CachedItemRepository, InMemoryItemRepository, ItemRepository};
pub use store::{CounterStore, InMemoryCounterStore, InMemoryRankingStore, RankingStore, RedisStore};
pub use types::{ItemId, ItemRecord, Ranked, RankedEntry};

use anyhow::{Context, Result};
use std::sync::Arc;

/// One command-line operation against the configured store.
#[derive(Debug, Clone)]
pub enum Command {
    /// Count `count` views of an item
    Record { item_id: ItemId, count: u32 },
    /// Print the most viewed items
    Top { limit: Option<usize> },
    /// Repair ranking scores from the counters
    Reconcile { item_ids: Vec<ItemId> },
}

pub async fn run(config: Config, command: Command) -> Result<()> {
    tracing::info!(operation = "startup", message = "viewrank starting");
    tracing::debug!(config = ?config, "Configuration loaded");

    config.validate().context("Invalid configuration")?;
    if let Command::Record { count: 0, .. } = &command {
        return Err(ViewRankError::InvalidArgument(
            "view count must be at least 1".to_string(),
        )
        .into());
    }

    let metrics = Arc::new(Metrics::new());

    let store = Arc::new(
        RedisStore::connect(
            &config.store,
            &config.circuit_breaker,
            Arc::clone(&metrics.store),
        )
        .await
        .context("Failed to connect to the view store")?,
    );

    let catalog = match config.repository.catalog_path {
        Some(ref path) => InMemoryItemRepository::from_json_file(path)
            .with_context(|| format!("Failed to load item catalog {}", path.display()))?,
        None => InMemoryItemRepository::new(),
    };
    let has_catalog = !catalog.is_empty();
    let repository = CachedItemRepository::new(
        catalog,
        config.repository.cache_max_entries,
        std::time::Duration::from_secs(config.repository.cache_ttl_secs),
        Arc::clone(&metrics.repository),
    );

    let mut engine = RankingEngine::new(store.clone(), store.clone(), repository)
        .with_metrics(Arc::clone(&metrics.engine));
    if config.store.atomic_updates {
        engine = engine.with_atomic_store(store.clone());
    }

    match command {
        Command::Record { item_id, count } => {
            let mut total = 0;
            for _ in 0..count {
                total = engine.record_view(&item_id).await?;
            }
            println!("{} views: {}", item_id, total);
        }
        Command::Top { limit } => {
            let limit = limit
                .unwrap_or(config.ranking.default_limit)
                .clamp(1, config.ranking.max_limit);
            if has_catalog {
                for (rank, ranked) in engine.top_ranked(limit).await?.iter().enumerate() {
                    println!(
                        "{:>3}. {} ({} views) [{}]",
                        rank + 1,
                        ranked.item.title,
                        ranked.views(),
                        ranked.item.id
                    );
                }
            } else {
                for (rank, entry) in engine.top_entries(limit).await?.iter().enumerate() {
                    println!("{:>3}. {} ({} views)", rank + 1, entry.item_id, entry.score);
                }
            }
        }
        Command::Reconcile { item_ids } => {
            for item_id in item_ids {
                let outcome = engine
                    .reconcile(&item_id)
                    .await
                    .with_context(|| format!("Failed to reconcile item {}", item_id))?;
                if !outcome.settled {
                    println!(
                        "{}: counter {} vs score {}, still diverging",
                        item_id, outcome.counter_total, outcome.score_after
                    );
                } else if outcome.was_repaired() {
                    println!(
                        "{}: score {} -> {}",
                        item_id, outcome.score_before, outcome.score_after
                    );
                } else {
                    println!("{}: consistent at {}", item_id, outcome.counter_total);
                }
            }
        }
    }

    if config.logging.metrics_summary {
        metrics.log_full_summary();
    }
    tracing::debug!(elapsed_ms = metrics.elapsed().as_millis() as u64, "Command finished");

    Ok(())
}
