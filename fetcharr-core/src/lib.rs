//! Event correlation and state aggregation for media acquisition tracking.
//!
//! External systems (request portal, acquisition managers, download client,
//! media index, media library) emit uncoordinated events about content
//! moving from requested to watchable. This crate normalizes those events
//! into facts, correlates them to tracked items, drives a monotonic state
//! machine per entity, aggregates sub-item states up to their owning item,
//! and fans committed changes out to subscribers. A fallback verifier
//! actively reconciles entities that passive events left behind.
//!
//! [`engine::Tracker`] is the entry point; everything else hangs off it.

pub mod adapters;
pub mod aggregate;
pub mod config;
mod error;
pub mod journal;
pub mod machine;
pub mod notify;
pub mod verifier;
pub mod view;

pub mod correlation;
pub mod engine;

pub use config::{NotifierConfig, TrackerConfig, VerifierConfig};
pub use engine::{StallCandidate, Tracker};
pub use error::{Result, TrackerError};
pub use journal::{FactDisposition, FactJournal, JournalRecord, MemoryJournal};
pub use notify::{
    EntityRef, Notification, NotificationStream, SubscriptionFilter,
};
pub use verifier::{AvailabilityIndex, FallbackVerifier, IndexReference};
pub use view::{ItemView, SubItemView};

/// Re-export of the domain model crate.
pub use fetcharr_model as model;
