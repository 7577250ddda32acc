//! Per-entity transition engine.
//!
//! Pure planning logic: given an entity's current state and a fact kind,
//! decide whether the entity advances, stays put, or the fact is rejected.
//! Upstream producers have no global order, so a fact implying a state far
//! ahead of the current one is normal; the planner synthesizes the skipped
//! intermediate steps instead of rejecting it, and forward progress is
//! never lost to ordering artifacts.

use fetcharr_model::{FactKind, MediaState};

/// Outcome of planning one fact against one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// Move forward through `path` (synthesized intermediates included,
    /// final state last). Committed as a single transition.
    To { path: Vec<MediaState> },
    /// Implied state is at or behind the current one; idempotent no-op.
    NoOp,
    /// Backward or terminal-violating move. Logged and ignored, never an
    /// error.
    Invalid,
}

impl Advance {
    /// Final state of the planned move, if it moves at all.
    pub fn target(&self) -> Option<MediaState> {
        match self {
            Advance::To { path } => path.last().copied(),
            Advance::NoOp | Advance::Invalid => None,
        }
    }
}

/// Plan the transition a fact kind implies for an entity in `current`.
pub fn plan(current: MediaState, kind: &FactKind) -> Advance {
    let implied = kind.implied_state();

    if implied == MediaState::Failed {
        return match current {
            // Failure is absorbing; redelivery is a no-op.
            MediaState::Failed => Advance::NoOp,
            // Available is terminal and cannot fail through this path.
            MediaState::Available => Advance::Invalid,
            _ => Advance::To {
                path: vec![MediaState::Failed],
            },
        };
    }

    // Failed entities only leave via administrative reset, not facts.
    if current == MediaState::Failed {
        return Advance::Invalid;
    }

    let (Some(from), Some(to)) =
        (current.progress_rank(), implied.progress_rank())
    else {
        return Advance::Invalid;
    };

    if to <= from {
        return Advance::NoOp;
    }

    let mut path = MediaState::intermediate_path(current, implied);
    path.push(implied);
    Advance::To { path }
}
