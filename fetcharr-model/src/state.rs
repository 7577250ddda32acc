use std::fmt::{Display, Formatter};

/// Lifecycle state of a tracked entity.
///
/// The progress order is strict:
/// `Requested < Approved < Acquiring < Downloading < Downloaded < Importing
/// < Identifying < Available`, with `Failed` reachable from any
/// non-terminal state. Entities only ever move forward along this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum MediaState {
    /// Initial request recorded at the request portal.
    Requested,
    /// Request approved, waiting for a grab.
    Approved,
    /// Release grabbed from an indexer, handed to the download client.
    Acquiring,
    /// Download client actively transferring.
    Downloading,
    /// Transfer complete, waiting for import.
    Downloaded,
    /// Acquisition service importing into the library.
    Importing,
    /// Media index matching/identifying the imported file.
    Identifying,
    /// Ready to watch.
    Available,
    /// Terminal failure (absorbing).
    Failed,
}

/// Aggregation priority, most-severe/least-complete first. The aggregate of
/// a composite item is the first state here held by at least one sub-item,
/// unless every sub-item is `Available`.
pub const AGGREGATE_PRIORITY: [MediaState; 8] = [
    MediaState::Failed,
    MediaState::Identifying,
    MediaState::Importing,
    MediaState::Downloaded,
    MediaState::Downloading,
    MediaState::Acquiring,
    MediaState::Approved,
    MediaState::Requested,
];

impl MediaState {
    /// Position along the forward progress order. `Failed` sits outside the
    /// order and has no rank.
    pub fn progress_rank(&self) -> Option<u8> {
        match self {
            MediaState::Requested => Some(0),
            MediaState::Approved => Some(1),
            MediaState::Acquiring => Some(2),
            MediaState::Downloading => Some(3),
            MediaState::Downloaded => Some(4),
            MediaState::Importing => Some(5),
            MediaState::Identifying => Some(6),
            MediaState::Available => Some(7),
            MediaState::Failed => None,
        }
    }

    /// States in between `current` and `target` on the progress order,
    /// exclusive on both ends. Used to synthesize transitions skipped by
    /// out-of-order delivery.
    pub fn intermediate_path(current: Self, target: Self) -> Vec<Self> {
        const ORDER: [MediaState; 8] = [
            MediaState::Requested,
            MediaState::Approved,
            MediaState::Acquiring,
            MediaState::Downloading,
            MediaState::Downloaded,
            MediaState::Importing,
            MediaState::Identifying,
            MediaState::Available,
        ];
        match (current.progress_rank(), target.progress_rank()) {
            (Some(from), Some(to)) if to > from + 1 => ORDER
                [(from as usize + 1)..(to as usize)]
                .to_vec(),
            _ => Vec::new(),
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MediaState::Available | MediaState::Failed)
    }

    /// Whether the entity is still eligible for event correlation.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl Display for MediaState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MediaState::Requested => "requested",
            MediaState::Approved => "approved",
            MediaState::Acquiring => "acquiring",
            MediaState::Downloading => "downloading",
            MediaState::Downloaded => "downloaded",
            MediaState::Importing => "importing",
            MediaState::Identifying => "identifying",
            MediaState::Available => "available",
            MediaState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_order_is_strict() {
        let order = [
            MediaState::Requested,
            MediaState::Approved,
            MediaState::Acquiring,
            MediaState::Downloading,
            MediaState::Downloaded,
            MediaState::Importing,
            MediaState::Identifying,
            MediaState::Available,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].progress_rank() < pair[1].progress_rank());
        }
        assert_eq!(MediaState::Failed.progress_rank(), None);
    }

    #[test]
    fn intermediate_path_fills_gaps() {
        let path = MediaState::intermediate_path(
            MediaState::Requested,
            MediaState::Downloaded,
        );
        assert_eq!(
            path,
            vec![
                MediaState::Approved,
                MediaState::Acquiring,
                MediaState::Downloading,
            ]
        );
    }

    #[test]
    fn intermediate_path_empty_for_adjacent_or_backward() {
        assert!(
            MediaState::intermediate_path(
                MediaState::Requested,
                MediaState::Approved
            )
            .is_empty()
        );
        assert!(
            MediaState::intermediate_path(
                MediaState::Downloaded,
                MediaState::Requested
            )
            .is_empty()
        );
        assert!(
            MediaState::intermediate_path(
                MediaState::Importing,
                MediaState::Failed
            )
            .is_empty()
        );
    }
}
