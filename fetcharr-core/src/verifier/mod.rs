//! Fallback verification for stalled entities.
//!
//! Passive sources drop events: the library's item-added hook fires
//! unreliably once the media index gets involved, and a dropped push
//! leaves a request sitting in `Importing` or `Identifying` forever. The
//! verifier is the active path around that: on a timer it finds entities
//! whose state has not moved past the stall threshold, asks the media
//! index directly, and on a hit synthesizes the availability fact the
//! passive source failed to deliver. The synthesized fact goes through
//! the normal submit path, so no invariant is bypassed and the verifier
//! can never race a passive fact for the same entity.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fetcharr_model::{
    CorrelationKey, Fact, FactKind, FactSource, ItemId, MediaState,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::VerifierConfig;
use crate::engine::{StallCandidate, Tracker};
use crate::Result;

/// Library reference returned by a successful availability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexReference {
    pub id: String,
}

/// External media-index collaborator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AvailabilityIndex: Send + Sync {
    /// Look the key up in the index. `Ok(None)` means "not there yet".
    async fn verify_availability(
        &self,
        key: &CorrelationKey,
    ) -> Result<Option<IndexReference>>;

    /// Best-effort remediation: ask the index to rescan. Failures are
    /// logged and do not abort the cycle.
    async fn refresh_index(&self) -> Result<()>;
}

/// Miss bookkeeping for one stall episode. `state` is the stalled state
/// the misses were recorded against; an entity that progresses and stalls
/// again starts over.
#[derive(Debug, Clone)]
struct RetryState {
    attempts: u32,
    next_check: DateTime<Utc>,
    state: MediaState,
}

/// An entity the verifier has given up on; left in place for manual
/// attention, never force-failed.
#[derive(Debug, Clone)]
pub struct StuckItem {
    pub item_id: ItemId,
    pub state: MediaState,
    pub attempts: u32,
    pub stalled_since: DateTime<Utc>,
}

/// Outcome counts for one reconciliation cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub checked: usize,
    pub promoted: usize,
    pub deferred: usize,
    pub stuck: usize,
}

/// Periodic reconciliation loop over stalled entities.
pub struct FallbackVerifier {
    tracker: Arc<Tracker>,
    index: Arc<dyn AvailabilityIndex>,
    config: VerifierConfig,
    retries: DashMap<ItemId, RetryState>,
}

impl std::fmt::Debug for FallbackVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackVerifier")
            .field("tracked_retries", &self.retries.len())
            .field("config", &self.config)
            .finish()
    }
}

impl FallbackVerifier {
    pub fn new(
        tracker: Arc<Tracker>,
        index: Arc<dyn AvailabilityIndex>,
    ) -> Self {
        let config = tracker.config().verifier.clone();
        Self {
            tracker,
            index,
            config,
            retries: DashMap::new(),
        }
    }

    /// Run cycles until cancelled.
    pub fn spawn(
        self: Arc<Self>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(self.config.cycle_interval());
            ticker.set_missed_tick_behavior(
                tokio::time::MissedTickBehavior::Skip,
            );
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let summary = self.run_cycle().await;
                        if summary.checked > 0 {
                            debug!(?summary, "verifier cycle finished");
                        }
                    }
                }
            }
        })
    }

    /// One reconciliation pass. Public so callers (and tests) can drive
    /// cycles directly.
    pub async fn run_cycle(&self) -> CycleSummary {
        let candidates = self
            .tracker
            .stalled_candidates(self.config.stall_threshold())
            .await;

        // Retry entries for entities that progressed or left tracking are
        // stale; keep only the ones still stalled.
        let stalled: HashSet<ItemId> =
            candidates.iter().map(|candidate| candidate.item_id).collect();
        self.retries.retain(|item_id, _| stalled.contains(item_id));

        let mut summary = CycleSummary::default();

        for candidate in candidates {
            let now = Utc::now();
            let recorded = self.retries.get(&candidate.item_id).map(|r| {
                (r.attempts, r.next_check, r.state)
            });
            if let Some((attempts, next_check, state)) = recorded {
                if state != candidate.state {
                    // The entity moved since those misses were recorded;
                    // this stall is a new episode.
                    self.retries.remove(&candidate.item_id);
                } else if attempts >= self.config.max_retries {
                    summary.stuck += 1;
                    continue;
                } else if next_check > now {
                    summary.deferred += 1;
                    continue;
                }
            }

            summary.checked += 1;
            if self.check_candidate(&candidate).await {
                summary.promoted += 1;
                self.retries.remove(&candidate.item_id);
            } else {
                self.record_miss(&candidate);
            }
        }
        summary
    }

    /// Entities the verifier has exhausted retries on, still stalled.
    pub async fn stuck_items(&self) -> Vec<StuckItem> {
        let mut stuck = Vec::new();
        for candidate in self
            .tracker
            .stalled_candidates(self.config.stall_threshold())
            .await
        {
            if let Some(retry) = self.retries.get(&candidate.item_id)
                && retry.attempts >= self.config.max_retries
                && retry.state == candidate.state
            {
                stuck.push(StuckItem {
                    item_id: candidate.item_id,
                    state: candidate.state,
                    attempts: retry.attempts,
                    stalled_since: candidate.stalled_since,
                });
            }
        }
        stuck
    }

    /// Check one candidate against the index, remediating once if needed.
    /// External calls happen with no entity lock held; the lock is only
    /// re-acquired inside `submit_fact` to apply the synthesized result.
    async fn check_candidate(&self, candidate: &StallCandidate) -> bool {
        let Some(key) = candidate.key.clone() else {
            warn!(
                item = %candidate.item_id,
                "stalled item has no verifiable key, leaving for manual attention"
            );
            return false;
        };

        if let Some(reference) = self.lookup(&key).await {
            return self.promote(candidate, key, reference).await;
        }

        // Remediation: at most one refresh per entity per cycle, then a
        // single re-check after a fixed delay. The refresh gets the same
        // timeout bound as lookups; a wedged scan endpoint must not hang
        // the whole cycle.
        match tokio::time::timeout(
            self.config.check_timeout(),
            self.index.refresh_index(),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                warn!(item = %candidate.item_id, %error, "index refresh failed");
            }
            Err(_) => {
                warn!(item = %candidate.item_id, "index refresh timed out");
            }
        }
        tokio::time::sleep(self.config.recheck_delay()).await;

        if let Some(reference) = self.lookup(&key).await {
            return self.promote(candidate, key, reference).await;
        }
        false
    }

    /// Timeout-bounded index lookup so one stuck external call cannot
    /// starve the rest of the cycle.
    async fn lookup(&self, key: &CorrelationKey) -> Option<IndexReference> {
        let check = self.index.verify_availability(key);
        match tokio::time::timeout(self.config.check_timeout(), check).await
        {
            Ok(Ok(found)) => found,
            Ok(Err(error)) => {
                warn!(%key, %error, "availability check failed");
                None
            }
            Err(_) => {
                warn!(%key, "availability check timed out");
                None
            }
        }
    }

    async fn promote(
        &self,
        candidate: &StallCandidate,
        key: CorrelationKey,
        reference: IndexReference,
    ) -> bool {
        info!(
            item = %candidate.item_id,
            state = %candidate.state,
            reference = %reference.id,
            "verified available, synthesizing fact"
        );
        let fact = Fact::new(
            FactSource::Verifier,
            FactKind::VerifiedAvailable {
                reference: reference.id,
            },
            vec![key],
        );
        match self.tracker.submit_fact(fact).await {
            Ok(_) => true,
            Err(error) => {
                warn!(
                    item = %candidate.item_id,
                    %error,
                    "failed to apply synthesized fact"
                );
                false
            }
        }
    }

    fn record_miss(&self, candidate: &StallCandidate) {
        let mut retry = self
            .retries
            .entry(candidate.item_id)
            .or_insert_with(|| RetryState {
                attempts: 0,
                next_check: Utc::now(),
                state: candidate.state,
            });
        retry.attempts += 1;
        retry.state = candidate.state;
        retry.next_check = Utc::now() + self.config.backoff(retry.attempts);
        if retry.attempts >= self.config.max_retries {
            warn!(
                item = %candidate.item_id,
                state = %candidate.state,
                attempts = retry.attempts,
                "verification retries exhausted, surfacing as stuck"
            );
        }
    }
}
