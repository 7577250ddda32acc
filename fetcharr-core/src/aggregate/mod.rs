//! Composite item state derivation.
//!
//! A composite item's state is a pure function of its sub-items' states,
//! recomputed inside the same critical section as the sub-item mutation
//! that triggered it. It is never set independently.

use fetcharr_model::{AGGREGATE_PRIORITY, MediaState};

/// Derive the aggregate state of a composite item from its sub-item
/// states. Returns `None` for an empty slice; such items carry their own
/// state (pass-through).
///
/// `Available` requires every sub-item to be available; otherwise the
/// aggregate is the first state in the fixed priority order held by at
/// least one sub-item.
pub fn derive(states: &[MediaState]) -> Option<MediaState> {
    if states.is_empty() {
        return None;
    }

    if states.iter().all(|state| *state == MediaState::Available) {
        return Some(MediaState::Available);
    }

    AGGREGATE_PRIORITY
        .iter()
        .copied()
        .find(|candidate| states.contains(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_passes_through() {
        assert_eq!(derive(&[]), None);
    }

    #[test]
    fn available_requires_all() {
        assert_eq!(
            derive(&[MediaState::Available, MediaState::Available]),
            Some(MediaState::Available)
        );
        assert_eq!(
            derive(&[MediaState::Available, MediaState::Importing]),
            Some(MediaState::Importing)
        );
    }

    #[test]
    fn any_failure_dominates() {
        assert_eq!(
            derive(&[
                MediaState::Available,
                MediaState::Failed,
                MediaState::Downloading,
            ]),
            Some(MediaState::Failed)
        );
    }

    #[test]
    fn priority_order_picks_least_complete_in_progress() {
        assert_eq!(
            derive(&[MediaState::Downloading, MediaState::Identifying]),
            Some(MediaState::Identifying)
        );
        assert_eq!(
            derive(&[MediaState::Acquiring, MediaState::Downloaded]),
            Some(MediaState::Downloaded)
        );
        assert_eq!(
            derive(&[MediaState::Requested, MediaState::Approved]),
            Some(MediaState::Approved)
        );
    }

    #[test]
    fn uniform_states_pass_straight_through() {
        for state in AGGREGATE_PRIORITY {
            assert_eq!(derive(&[state, state]), Some(state));
        }
    }
}
