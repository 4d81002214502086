//! Core data types for item identifiers, item records and ranking entries.

pub mod item;
pub mod ranking;

pub use item::{Identified, ItemId, ItemRecord};
pub use ranking::{sort_and_truncate, Ranked, RankedEntry, Score, ScoreOrder};
