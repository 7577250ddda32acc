use chrono::{DateTime, Utc};

use crate::entity::{ReleaseInfo, RequestDetails};
use crate::ids::FactId;
use crate::keys::{ContentHash, CorrelationKey};
use crate::state::MediaState;

/// Which external system produced a fact.
///
/// The state machine never branches on this; it exists for the journal and
/// for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FactSource {
    /// Request portal (where users file requests).
    RequestPortal,
    /// Movie/series acquisition manager (grabs and imports releases).
    AcquisitionManager,
    /// Download client.
    DownloadClient,
    /// Media index that identifies imported files.
    MediaIndex,
    /// Streaming library the content finally lands in.
    MediaLibrary,
    /// Synthesized by the fallback verifier.
    Verifier,
}

impl std::fmt::Display for FactSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FactSource::RequestPortal => "request-portal",
            FactSource::AcquisitionManager => "acquisition-manager",
            FactSource::DownloadClient => "download-client",
            FactSource::MediaIndex => "media-index",
            FactSource::MediaLibrary => "media-library",
            FactSource::Verifier => "verifier",
        };
        f.write_str(name)
    }
}

/// Closed union of everything upstream systems can tell us.
///
/// Producers translate their wire payloads into one of these kinds before
/// submission; the resolver and state machine match on them exhaustively.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "snake_case"))]
pub enum FactKind {
    /// New request filed at the portal. The only creation-capable kind.
    Requested { details: RequestDetails },
    /// Request approved, acquisition pending.
    Approved,
    /// Release grabbed from an indexer. `parts` enumerates the episode
    /// ordinals covered by the batch (empty for single-unit items).
    Grabbed {
        parts: Vec<u32>,
        #[cfg_attr(
            feature = "serde",
            serde(skip_serializing_if = "Option::is_none")
        )]
        release: Option<ReleaseInfo>,
    },
    /// Download client progress snapshot.
    DownloadProgress {
        percent: f32,
        #[cfg_attr(
            feature = "serde",
            serde(skip_serializing_if = "Option::is_none")
        )]
        speed: Option<String>,
        #[cfg_attr(
            feature = "serde",
            serde(skip_serializing_if = "Option::is_none")
        )]
        eta: Option<String>,
    },
    /// Transfer finished, waiting for import.
    DownloadFinished,
    /// Acquisition manager started importing into the library.
    ImportStarted,
    /// Media index picked up the file and is matching it.
    IdentifyStarted,
    /// Content observed ready to watch by a passive source.
    Available,
    /// Availability confirmed by the fallback verifier's active check.
    /// Distinct from `Available` so the journal keeps the audit trail.
    VerifiedAvailable { reference: String },
    /// Upstream reported an unrecoverable failure.
    Failed { reason: String },
}

impl FactKind {
    /// Target state this kind drives an entity toward.
    pub fn implied_state(&self) -> MediaState {
        match self {
            FactKind::Requested { .. } => MediaState::Requested,
            FactKind::Approved => MediaState::Approved,
            FactKind::Grabbed { .. } => MediaState::Acquiring,
            FactKind::DownloadProgress { .. } => MediaState::Downloading,
            FactKind::DownloadFinished => MediaState::Downloaded,
            FactKind::ImportStarted => MediaState::Importing,
            FactKind::IdentifyStarted => MediaState::Identifying,
            FactKind::Available | FactKind::VerifiedAvailable { .. } => {
                MediaState::Available
            }
            FactKind::Failed { .. } => MediaState::Failed,
        }
    }

    /// Whether an unmatched correlation key may create a new item instead
    /// of being dropped.
    pub fn is_creation_capable(&self) -> bool {
        matches!(self, FactKind::Requested { .. })
    }

    /// Episode ordinals enumerated by this fact, if any.
    pub fn enumerated_parts(&self) -> &[u32] {
        match self {
            FactKind::Grabbed { parts, .. } => parts,
            _ => &[],
        }
    }

    /// Short label for logs and the journal.
    pub fn label(&self) -> &'static str {
        match self {
            FactKind::Requested { .. } => "requested",
            FactKind::Approved => "approved",
            FactKind::Grabbed { .. } => "grabbed",
            FactKind::DownloadProgress { .. } => "download_progress",
            FactKind::DownloadFinished => "download_finished",
            FactKind::ImportStarted => "import_started",
            FactKind::IdentifyStarted => "identify_started",
            FactKind::Available => "available",
            FactKind::VerifiedAvailable { .. } => "verified_available",
            FactKind::Failed { .. } => "failed",
        }
    }
}

/// Immutable, normalized input event from an external source.
///
/// Facts are appended to the journal exactly as submitted and never mutated
/// or deleted, including facts that end up producing no transition.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Fact {
    pub id: FactId,
    pub source: FactSource,
    pub kind: FactKind,
    /// Correlation keys carried in the upstream payload.
    pub keys: Vec<CorrelationKey>,
    /// Raw upstream payload, kept opaque for audit/debugging.
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl Fact {
    pub fn new(
        source: FactSource,
        kind: FactKind,
        keys: Vec<CorrelationKey>,
    ) -> Self {
        Self {
            id: FactId::new(),
            source,
            kind,
            keys,
            payload: serde_json::Value::Null,
            received_at: Utc::now(),
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// First content hash among the carried keys, if any.
    pub fn content_hash(&self) -> Option<&ContentHash> {
        self.keys.iter().find_map(CorrelationKey::as_hash)
    }

    /// Item-level keys (everything except content hashes).
    pub fn item_keys(&self) -> impl Iterator<Item = &CorrelationKey> {
        self.keys.iter().filter(|key| key.is_item_level())
    }
}
