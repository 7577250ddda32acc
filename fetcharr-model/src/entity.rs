use chrono::{DateTime, Utc};

use crate::ids::{ItemId, SubItemId};
use crate::keys::{ContentHash, CorrelationKey};
use crate::state::MediaState;

/// Simple enum for tracked media kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum MediaKind {
    /// Single-unit item
    Movie,
    /// Composite item with episode sub-items
    Series,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Movie => write!(f, "Movie"),
            MediaKind::Series => write!(f, "Series"),
        }
    }
}

/// Request metadata carried by the initial portal fact.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RequestDetails {
    pub kind: MediaKind,
    pub title: String,
    #[cfg_attr(
        feature = "serde",
        serde(skip_serializing_if = "Option::is_none")
    )]
    pub year: Option<u16>,
    #[cfg_attr(
        feature = "serde",
        serde(skip_serializing_if = "Option::is_none")
    )]
    pub requested_by: Option<String>,
    #[cfg_attr(
        feature = "serde",
        serde(skip_serializing_if = "Option::is_none")
    )]
    pub poster_url: Option<String>,
}

impl RequestDetails {
    pub fn new(kind: MediaKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            year: None,
            requested_by: None,
            poster_url: None,
        }
    }
}

/// Latest download snapshot reported by the download client.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DownloadTelemetry {
    pub percent: f32,
    #[cfg_attr(
        feature = "serde",
        serde(skip_serializing_if = "Option::is_none")
    )]
    pub speed: Option<String>,
    #[cfg_attr(
        feature = "serde",
        serde(skip_serializing_if = "Option::is_none")
    )]
    pub eta: Option<String>,
}

/// Release details captured when the acquisition service grabs from an
/// indexer.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReleaseInfo {
    #[cfg_attr(
        feature = "serde",
        serde(skip_serializing_if = "Option::is_none")
    )]
    pub quality: Option<String>,
    #[cfg_attr(
        feature = "serde",
        serde(skip_serializing_if = "Option::is_none")
    )]
    pub indexer: Option<String>,
}

/// An addressable part of a composite item (an episode).
///
/// Sub-items created from one grab share the batch's content hash, so a
/// single download-client fact can advance the whole batch.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SubItem {
    pub id: SubItemId,
    pub item_id: ItemId,
    /// Ordinal position within the item (episode number).
    pub ordinal: u32,
    #[cfg_attr(
        feature = "serde",
        serde(skip_serializing_if = "Option::is_none")
    )]
    pub hash: Option<ContentHash>,
    pub state: MediaState,
    pub state_changed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubItem {
    pub fn new(item_id: ItemId, ordinal: u32, state: MediaState) -> Self {
        let now = Utc::now();
        Self {
            id: SubItemId::new(),
            item_id,
            ordinal,
            hash: None,
            state,
            state_changed_at: now,
            updated_at: now,
        }
    }
}

/// Top-level tracked entity: a movie or a series request.
///
/// Owns its sub-items so that one lock covers both the sub-item mutation
/// and the aggregate recomputation. For items without sub-items `state` is
/// the entity's own state; for composite items it is the committed
/// aggregate derived from the sub-items and is never set independently.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Item {
    pub id: ItemId,
    pub details: RequestDetails,
    /// External identifiers this item answers to.
    pub keys: Vec<CorrelationKey>,
    pub state: MediaState,
    #[cfg_attr(
        feature = "serde",
        serde(skip_serializing_if = "Option::is_none")
    )]
    pub telemetry: Option<DownloadTelemetry>,
    #[cfg_attr(
        feature = "serde",
        serde(skip_serializing_if = "Option::is_none")
    )]
    pub release: Option<ReleaseInfo>,
    pub sub_items: Vec<SubItem>,
    pub created_at: DateTime<Utc>,
    pub state_changed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    pub fn new(details: RequestDetails, keys: Vec<CorrelationKey>) -> Self {
        let now = Utc::now();
        Self {
            id: ItemId::new(),
            details,
            keys,
            state: MediaState::Requested,
            telemetry: None,
            release: None,
            sub_items: Vec::new(),
            created_at: now,
            state_changed_at: now,
            updated_at: now,
        }
    }

    pub fn is_composite(&self) -> bool {
        !self.sub_items.is_empty()
    }

    pub fn has_key(&self, key: &CorrelationKey) -> bool {
        self.keys.contains(key)
    }

    /// Record a key learned from a later fact (e.g. the grab hash) without
    /// duplicating existing bindings.
    pub fn bind_key(&mut self, key: CorrelationKey) {
        if !self.has_key(&key) {
            self.keys.push(key);
        }
    }

    pub fn sub_items_for_hash(&self, hash: &ContentHash) -> Vec<SubItemId> {
        self.sub_items
            .iter()
            .filter(|sub| sub.hash.as_ref() == Some(hash))
            .map(|sub| sub.id)
            .collect()
    }

    /// `(completed, total)` sub-item availability counts. Single-unit items
    /// count as one unit keyed off their own state.
    pub fn progress_counts(&self) -> (usize, usize) {
        if self.sub_items.is_empty() {
            let done = usize::from(self.state == MediaState::Available);
            return (done, 1);
        }
        let done = self
            .sub_items
            .iter()
            .filter(|sub| sub.state == MediaState::Available)
            .count();
        (done, self.sub_items.len())
    }
}
