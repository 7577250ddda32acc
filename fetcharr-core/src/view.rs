//! Read-side projections of tracked items.
//!
//! Built under the owning item's lock, so a view never shows an aggregate
//! that disagrees with its sub-items.

use chrono::{DateTime, Utc};
use fetcharr_model::{
    DownloadTelemetry, Item, ItemId, MediaState, ReleaseInfo, RequestDetails,
    SubItemId,
};
use serde::{Deserialize, Serialize};

/// Current state of one sub-item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubItemView {
    pub id: SubItemId,
    pub ordinal: u32,
    pub state: MediaState,
    pub updated_at: DateTime<Utc>,
}

/// Consistent current-state view of one item and its sub-items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemView {
    pub id: ItemId,
    pub details: RequestDetails,
    /// Aggregate state (the item's own state for single-unit items).
    pub state: MediaState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<DownloadTelemetry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<ReleaseInfo>,
    pub sub_items: Vec<SubItemView>,
    /// `(available, total)` unit counts.
    pub progress: (usize, usize),
    pub updated_at: DateTime<Utc>,
}

impl ItemView {
    pub fn of(item: &Item) -> Self {
        Self {
            id: item.id,
            details: item.details.clone(),
            state: item.state,
            telemetry: item.telemetry.clone(),
            release: item.release.clone(),
            sub_items: item
                .sub_items
                .iter()
                .map(|sub| SubItemView {
                    id: sub.id,
                    ordinal: sub.ordinal,
                    state: sub.state,
                    updated_at: sub.updated_at,
                })
                .collect(),
            progress: item.progress_counts(),
            updated_at: item.updated_at,
        }
    }
}
