use super::item::ItemId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Ranking metric: cumulative view increments applied to an item.
pub type Score = f64;

/// Direction of a ranking range query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ScoreOrder {
    Descending,
    Ascending,
}

/// One `(item, score)` pair read from the ranking store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub item_id: ItemId,
    pub score: Score,
}

impl RankedEntry {
    pub fn new(item_id: impl Into<ItemId>, score: Score) -> Self {
        Self {
            item_id: item_id.into(),
            score,
        }
    }

    /// Total order used for every ranking result: score in the requested
    /// direction, then item id ascending.
    pub fn cmp_ranked(&self, other: &Self, order: ScoreOrder) -> Ordering {
        let by_score = match order {
            ScoreOrder::Descending => other.score.total_cmp(&self.score),
            ScoreOrder::Ascending => self.score.total_cmp(&other.score),
        };
        by_score.then_with(|| self.item_id.cmp(&other.item_id))
    }
}

/// Sort entries into ranking order and keep at most `n`.
pub fn sort_and_truncate(entries: &mut Vec<RankedEntry>, n: usize, order: ScoreOrder) {
    entries.sort_by(|a, b| a.cmp_ranked(b, order));
    entries.truncate(n);
}

/// A resolved item together with its ranking score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ranked<T> {
    pub item: T,
    pub score: Score,
}

impl<T> Ranked<T> {
    /// Score as a whole view count.
    pub fn views(&self) -> u64 {
        if self.score <= 0.0 {
            0
        } else {
            self.score.round() as u64
        }
    }
}
