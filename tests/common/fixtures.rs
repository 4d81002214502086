//! Item catalog fixtures

use viewrank::{InMemoryItemRepository, ItemRecord};

/// Three images named A, B and C with ids "a", "b" and "c".
pub fn abc_catalog() -> InMemoryItemRepository<ItemRecord> {
    InMemoryItemRepository::from_items(vec![
        image("a", "A"),
        image("b", "B"),
        image("c", "C"),
    ])
}

/// Catalog of `count` images with numeric ids `1..=count`.
pub fn numbered_catalog(count: u64) -> InMemoryItemRepository<ItemRecord> {
    InMemoryItemRepository::from_items((1..=count).map(|id| image(&id.to_string(), &format!("Image {}", id))))
}

pub fn image(id: &str, title: &str) -> ItemRecord {
    let mut record = ItemRecord::new(id, title);
    record.url = Some(format!("https://images.example.com/{}.jpg", id));
    record
}
