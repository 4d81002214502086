use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque identifier of a viewable item.
///
/// Integer and string keys are both accepted and kept in their canonical
/// string form, which is also the member name inside the ranking sorted set.
/// Ordering is byte-wise lexicographic on that form, so `"10" < "9"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for ItemId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ItemId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl FromStr for ItemId {
    type Err = crate::error::ViewRankError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(crate::error::ViewRankError::InvalidArgument(
                "item id cannot be empty".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl AsRef<str> for ItemId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Anything the ranking can resolve back to by identifier.
pub trait Identified {
    fn item_id(&self) -> &ItemId;
}

/// Item metadata as stored by the surrounding application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: ItemId,
    pub title: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ItemRecord {
    pub fn new(id: impl Into<ItemId>, title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            id: id.into(),
            slug: slugify(&title),
            title,
            url: None,
            description: None,
        }
    }
}

impl Identified for ItemRecord {
    fn item_id(&self) -> &ItemId {
        &self.id
    }
}

fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for c in title.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_id_from_integer_and_string_agree() {
        assert_eq!(ItemId::from(42u64), ItemId::from("42"));
        assert_eq!(ItemId::from(42u64).to_string(), "42");
    }

    #[test]
    fn test_item_id_ordering_is_lexicographic() {
        let mut ids = vec![ItemId::from(9u64), ItemId::from(10u64), ItemId::from("a")];
        ids.sort();
        assert_eq!(ids, vec![ItemId::from("10"), ItemId::from("9"), ItemId::from("a")]);
    }

    #[test]
    fn test_item_id_parse_trims_and_rejects_empty() {
        assert_eq!(" 17 ".parse::<ItemId>().unwrap(), ItemId::from(17u64));
        assert!("   ".parse::<ItemId>().is_err());
    }

    #[test]
    fn test_item_record_slug() {
        let record = ItemRecord::new(1u64, "Sunset over the Bay!");
        assert_eq!(record.slug, "sunset-over-the-bay");
        assert_eq!(record.item_id(), &ItemId::from(1u64));
    }

    #[test]
    fn test_item_record_json_uses_plain_id() {
        let record: ItemRecord =
            serde_json::from_str(r#"{"id": "7", "title": "Cat"}"#).unwrap();
        assert_eq!(record.id, ItemId::from(7u64));
        assert_eq!(record.slug, "");
        assert!(record.url.is_none());
    }
}
