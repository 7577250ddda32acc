use std::fmt;

use crate::error::ModelError;

/// Identifier shared by every part of a release delivered in one batch.
///
/// Download clients report hashes with inconsistent casing, so the value is
/// normalized to lowercase at construction and all comparisons go through
/// the normalized form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct ContentHash(String);

impl ContentHash {
    pub fn new(value: impl Into<String>) -> Result<Self, ModelError> {
        let value = value.into();
        if value.is_empty() {
            return Err(ModelError::InvalidKey(
                "content hash cannot be empty".to_string(),
            ));
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Typed identifier binding an incoming fact to a tracked entity.
///
/// Different upstream systems speak different keyspaces: the request portal
/// issues its own request ids, the acquisition services key on catalog ids,
/// and the download client only knows content hashes. Keeping the keyspace
/// in the type avoids cross-space collisions on raw integers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(tag = "type", content = "value", rename_all = "snake_case")
)]
pub enum CorrelationKey {
    /// Request id issued by the request portal.
    Portal(u64),
    /// Primary content catalog id (movies and most series).
    Catalog(u64),
    /// Alternate catalog id (series keyed differently by the tv indexer).
    AltCatalog(u64),
    /// Batch content hash from the download client.
    Hash(ContentHash),
}

impl CorrelationKey {
    pub fn hash(value: impl Into<String>) -> Result<Self, ModelError> {
        Ok(Self::Hash(ContentHash::new(value)?))
    }

    pub fn as_hash(&self) -> Option<&ContentHash> {
        match self {
            CorrelationKey::Hash(hash) => Some(hash),
            _ => None,
        }
    }

    /// Whether this key identifies a whole item (as opposed to a batch of
    /// sub-items).
    pub fn is_item_level(&self) -> bool {
        !matches!(self, CorrelationKey::Hash(_))
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationKey::Portal(id) => write!(f, "portal:{id}"),
            CorrelationKey::Catalog(id) => write!(f, "catalog:{id}"),
            CorrelationKey::AltCatalog(id) => write!(f, "alt-catalog:{id}"),
            CorrelationKey::Hash(hash) => write!(f, "hash:{hash}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_normalizes_case() {
        let upper = ContentHash::new("ABC123DEF").unwrap();
        let lower = ContentHash::new("abc123def").unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.as_str(), "abc123def");
    }

    #[test]
    fn empty_hash_rejected() {
        assert!(ContentHash::new("").is_err());
    }

    #[test]
    fn item_level_excludes_hashes() {
        assert!(CorrelationKey::Portal(1).is_item_level());
        assert!(CorrelationKey::Catalog(42).is_item_level());
        assert!(!CorrelationKey::hash("aa").unwrap().is_item_level());
    }
}
