//! Fallback verifier reconciliation against a scripted media index.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fetcharr_core::model::{
    CorrelationKey, Fact, FactKind, FactSource, MediaKind, MediaState,
    RequestDetails,
};
use fetcharr_core::{
    AvailabilityIndex, FallbackVerifier, IndexReference, Result, Tracker,
    TrackerConfig,
};
use tokio::sync::Mutex;

/// Scripted index: answers from a queue of canned responses and counts
/// every call.
struct ScriptedIndex {
    responses: Mutex<Vec<Option<IndexReference>>>,
    checks: AtomicUsize,
    refreshes: AtomicUsize,
}

impl ScriptedIndex {
    fn new(responses: Vec<Option<IndexReference>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            checks: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
        }
    }

    fn always_missing() -> Self {
        Self::new(Vec::new())
    }

    fn found(id: &str) -> Option<IndexReference> {
        Some(IndexReference { id: id.to_string() })
    }
}

#[async_trait]
impl AvailabilityIndex for ScriptedIndex {
    async fn verify_availability(
        &self,
        _key: &CorrelationKey,
    ) -> Result<Option<IndexReference>> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().await;
        if responses.is_empty() {
            Ok(None)
        } else {
            Ok(responses.remove(0))
        }
    }

    async fn refresh_index(&self) -> Result<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn quick_config() -> TrackerConfig {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let mut config = TrackerConfig::default();
    config.verifier.stall_threshold_secs = 0;
    config.verifier.recheck_delay_secs = 0;
    config.verifier.backoff_base_secs = 0;
    config.verifier.max_retries = 3;
    config
}

/// A movie request stuck in `Importing` because the library's item-added
/// event never arrived.
async fn stalled_import(tracker: &Tracker, catalog: u64) {
    tracker
        .submit_fact(Fact::new(
            FactSource::RequestPortal,
            FactKind::Requested {
                details: RequestDetails::new(MediaKind::Movie, "Solaris"),
            },
            vec![CorrelationKey::Catalog(catalog)],
        ))
        .await
        .unwrap();
    tracker
        .submit_fact(Fact::new(
            FactSource::AcquisitionManager,
            FactKind::ImportStarted,
            vec![CorrelationKey::Catalog(catalog)],
        ))
        .await
        .unwrap();
}

#[tokio::test]
async fn lost_availability_event_is_reconciled() {
    let tracker = Arc::new(Tracker::new(quick_config()));
    stalled_import(&tracker, 301).await;

    let index = Arc::new(ScriptedIndex::new(vec![ScriptedIndex::found(
        "lib-301",
    )]));
    let verifier = FallbackVerifier::new(
        Arc::clone(&tracker),
        Arc::clone(&index) as Arc<dyn AvailabilityIndex>,
    );

    let summary = verifier.run_cycle().await;
    assert_eq!(summary.checked, 1);
    assert_eq!(summary.promoted, 1);

    // The synthesized fact went through the normal path and is journaled
    // with the verifier as its source.
    let records = tracker.journal().snapshot().await.unwrap();
    let synthesized = records
        .iter()
        .find(|record| record.fact.source == FactSource::Verifier)
        .expect("verifier fact journaled");
    assert!(matches!(
        synthesized.fact.kind,
        FactKind::VerifiedAvailable { ref reference } if reference == "lib-301"
    ));

    let item_id = synthesized.disposition.item_id().unwrap();
    let view = tracker.get_state(item_id).await.unwrap();
    assert_eq!(view.state, MediaState::Available);
}

#[tokio::test]
async fn healthy_and_terminal_items_are_never_checked() {
    let tracker = Arc::new(Tracker::new(quick_config()));

    // One item already available, one still early in the pipeline.
    tracker
        .submit_fact(Fact::new(
            FactSource::RequestPortal,
            FactKind::Requested {
                details: RequestDetails::new(MediaKind::Movie, "Mirror"),
            },
            vec![CorrelationKey::Catalog(401)],
        ))
        .await
        .unwrap();
    tracker
        .submit_fact(Fact::new(
            FactSource::MediaLibrary,
            FactKind::Available,
            vec![CorrelationKey::Catalog(401)],
        ))
        .await
        .unwrap();
    tracker
        .submit_fact(Fact::new(
            FactSource::RequestPortal,
            FactKind::Requested {
                details: RequestDetails::new(MediaKind::Movie, "Nostalghia"),
            },
            vec![CorrelationKey::Catalog(402)],
        ))
        .await
        .unwrap();

    let index = Arc::new(ScriptedIndex::always_missing());
    let verifier = FallbackVerifier::new(
        Arc::clone(&tracker),
        Arc::clone(&index) as Arc<dyn AvailabilityIndex>,
    );

    let summary = verifier.run_cycle().await;
    assert_eq!(summary.checked, 0);
    assert_eq!(index.checks.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn persistent_miss_surfaces_stuck_without_failing() {
    let tracker = Arc::new(Tracker::new(quick_config()));
    stalled_import(&tracker, 501).await;

    let index = Arc::new(ScriptedIndex::always_missing());
    let verifier = FallbackVerifier::new(
        Arc::clone(&tracker),
        Arc::clone(&index) as Arc<dyn AvailabilityIndex>,
    );

    for _ in 0..3 {
        let summary = verifier.run_cycle().await;
        assert_eq!(summary.checked, 1);
        // Each miss triggers exactly one remediation refresh.
    }
    assert_eq!(index.refreshes.load(Ordering::SeqCst), 3);

    // Retries exhausted: the index is left alone and the entity is
    // reported, still in its stalled state.
    let checks_so_far = index.checks.load(Ordering::SeqCst);
    let summary = verifier.run_cycle().await;
    assert_eq!(summary.checked, 0);
    assert_eq!(summary.stuck, 1);
    assert_eq!(index.checks.load(Ordering::SeqCst), checks_so_far);

    let stuck = verifier.stuck_items().await;
    assert_eq!(stuck.len(), 1);
    assert_eq!(stuck[0].state, MediaState::Importing);
    assert_eq!(stuck[0].attempts, 3);
}

#[tokio::test]
async fn late_passive_event_beats_the_verifier_harmlessly() {
    let tracker = Arc::new(Tracker::new(quick_config()));
    stalled_import(&tracker, 601).await;

    // The library event shows up after all, before the next cycle runs.
    tracker
        .submit_fact(Fact::new(
            FactSource::MediaLibrary,
            FactKind::Available,
            vec![CorrelationKey::Catalog(601)],
        ))
        .await
        .unwrap();

    let index = Arc::new(ScriptedIndex::new(vec![ScriptedIndex::found(
        "lib-601",
    )]));
    let verifier = FallbackVerifier::new(
        Arc::clone(&tracker),
        Arc::clone(&index) as Arc<dyn AvailabilityIndex>,
    );

    // Nothing is stalled anymore, so the verifier has nothing to do.
    let summary = verifier.run_cycle().await;
    assert_eq!(summary.checked, 0);
    assert_eq!(index.checks.load(Ordering::SeqCst), 0);
}

/// Index whose rescan endpoint never answers.
struct WedgedRefreshIndex {
    checks: AtomicUsize,
}

#[async_trait]
impl AvailabilityIndex for WedgedRefreshIndex {
    async fn verify_availability(
        &self,
        _key: &CorrelationKey,
    ) -> Result<Option<IndexReference>> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }

    async fn refresh_index(&self) -> Result<()> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn wedged_refresh_cannot_stall_the_cycle() {
    let mut config = quick_config();
    config.verifier.check_timeout_secs = 0;
    let tracker = Arc::new(Tracker::new(config));
    stalled_import(&tracker, 701).await;

    let index = Arc::new(WedgedRefreshIndex {
        checks: AtomicUsize::new(0),
    });
    let verifier = FallbackVerifier::new(
        Arc::clone(&tracker),
        Arc::clone(&index) as Arc<dyn AvailabilityIndex>,
    );

    // The refresh hangs forever; the timeout bound must cut it loose and
    // let the cycle finish.
    let summary =
        tokio::time::timeout(Duration::from_secs(5), verifier.run_cycle())
            .await
            .expect("cycle finishes despite wedged refresh");
    assert_eq!(summary.checked, 1);
    assert_eq!(summary.promoted, 0);
}

#[tokio::test]
async fn passive_progress_starts_a_fresh_retry_episode() {
    let mut config = quick_config();
    config.verifier.max_retries = 1;
    let tracker = Arc::new(Tracker::new(config));
    stalled_import(&tracker, 801).await;

    // Two misses while stuck in Importing, then a hit once it re-stalls.
    let index = Arc::new(ScriptedIndex::new(vec![
        None,
        None,
        ScriptedIndex::found("lib-801"),
    ]));
    let verifier = FallbackVerifier::new(
        Arc::clone(&tracker),
        Arc::clone(&index) as Arc<dyn AvailabilityIndex>,
    );

    // Retries exhaust at Importing.
    assert_eq!(verifier.run_cycle().await.checked, 1);
    let summary = verifier.run_cycle().await;
    assert_eq!(summary.stuck, 1);
    assert_eq!(verifier.stuck_items().await.len(), 1);

    // The media index picks the file up after all: the entity moves to
    // Identifying and stalls there. That is a new episode; the old
    // attempt count must not carry over.
    tracker
        .submit_fact(Fact::new(
            FactSource::MediaIndex,
            FactKind::IdentifyStarted,
            vec![CorrelationKey::Catalog(801)],
        ))
        .await
        .unwrap();

    let summary = verifier.run_cycle().await;
    assert_eq!(summary.stuck, 0);
    assert_eq!(summary.checked, 1);
    assert_eq!(summary.promoted, 1);
    assert!(verifier.stuck_items().await.is_empty());
    // Only the Importing-episode miss triggered a refresh.
    assert_eq!(index.refreshes.load(Ordering::SeqCst), 1);
}
