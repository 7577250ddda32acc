//! Append-only fact journal.
//!
//! Every submitted fact lands here exactly once, including facts that
//! matched nothing or produced no transition. The journal is the audit
//! surface for idempotent replay; it is never mutated or compacted.

mod memory;

pub use memory::MemoryJournal;

use async_trait::async_trait;
use fetcharr_model::{Fact, ItemId, MediaState};

use crate::Result;

/// What a fact ended up doing once processed. Stored alongside the fact so
/// replay and audit don't have to re-derive the outcome.
#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FactDisposition {
    /// Committed a state transition on the named item (or its sub-items).
    Applied {
        item_id: ItemId,
        old_state: MediaState,
        new_state: MediaState,
    },
    /// Matched an entity but changed no state (idempotent redelivery,
    /// progress-only update, or rejected backward move).
    Recorded { item_id: ItemId },
    /// Created a new item.
    Created { item_id: ItemId },
    /// Matched nothing; kept for audit only.
    Dropped,
}

impl FactDisposition {
    pub fn item_id(&self) -> Option<ItemId> {
        match self {
            FactDisposition::Applied { item_id, .. }
            | FactDisposition::Recorded { item_id }
            | FactDisposition::Created { item_id } => Some(*item_id),
            FactDisposition::Dropped => None,
        }
    }
}

/// One journal row: the fact as submitted plus its disposition.
#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct JournalRecord {
    pub fact: Fact,
    pub disposition: FactDisposition,
}

/// Storage seam for the journal. The engine only appends and reads; durable
/// backends can slot in behind this without touching the correlation path.
#[async_trait]
pub trait FactJournal: Send + Sync {
    /// Record one processed fact. Called after the state mutation has
    /// already committed under the entity lock: an append error surfaces
    /// to the submitter and suppresses the fact's notifications, but it
    /// does not roll the transition back.
    async fn append(&self, record: JournalRecord) -> Result<()>;

    /// Every record, in append order.
    async fn snapshot(&self) -> Result<Vec<JournalRecord>>;

    /// Records attributed to one item, in append order. This is the
    /// per-request timeline the dashboard renders.
    async fn for_item(&self, item_id: ItemId) -> Result<Vec<JournalRecord>>;

    async fn len(&self) -> Result<usize>;
}
