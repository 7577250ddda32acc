//! Core data model definitions shared across Fetcharr crates.
#![allow(missing_docs)]

pub mod entity;
pub mod error;
pub mod fact;
pub mod ids;
pub mod keys;
pub mod state;

// Intentionally curated re-exports for downstream consumers.
pub use entity::{
    DownloadTelemetry, Item, MediaKind, ReleaseInfo, RequestDetails, SubItem,
};
pub use error::{ModelError, Result as ModelResult};
pub use fact::{Fact, FactKind, FactSource};
pub use ids::{FactId, ItemId, SubItemId, SubscriberId};
pub use keys::{ContentHash, CorrelationKey};
pub use state::{AGGREGATE_PRIORITY, MediaState};
