//! The tracker engine: the sole mutation surface.
//!
//! A fact flows journal-ward through one path: resolve the target entity,
//! take that entity's lock, advance the state machine, recompute the
//! owning item's aggregate inside the same critical section, append to the
//! journal, then publish deltas. Observers can never see an item whose
//! aggregate has not caught up with a committed sub-item change.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fetcharr_model::{
    CorrelationKey, DownloadTelemetry, Fact, FactKind, Item, ItemId,
    MediaState, SubItem, SubItemId,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregate;
use crate::config::TrackerConfig;
use crate::correlation::{EntityRegistry, Resolution, Resolver, Target};
use crate::journal::{
    FactDisposition, FactJournal, JournalRecord, MemoryJournal,
};
use crate::machine::{self, Advance};
use crate::notify::{
    ChangeNotifier, EntityRef, Notification, NotificationStream,
    SubscriptionFilter,
};
use crate::view::ItemView;
use crate::{Result, TrackerError};

/// An entity the fallback verifier should check on.
#[derive(Debug, Clone)]
pub struct StallCandidate {
    pub item_id: ItemId,
    /// Best key to verify with (catalog ids preferred over portal ids).
    pub key: Option<CorrelationKey>,
    pub state: MediaState,
    pub stalled_since: DateTime<Utc>,
}

/// Event correlation and state aggregation engine.
pub struct Tracker {
    registry: Arc<EntityRegistry>,
    resolver: Resolver,
    journal: Arc<dyn FactJournal>,
    notifier: Arc<ChangeNotifier>,
    config: TrackerConfig,
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("items", &self.registry.len())
            .field("config", &self.config)
            .finish()
    }
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self::with_journal(config, Arc::new(MemoryJournal::new()))
    }

    /// Build against a caller-provided journal backend.
    pub fn with_journal(
        config: TrackerConfig,
        journal: Arc<dyn FactJournal>,
    ) -> Self {
        let registry = Arc::new(EntityRegistry::new());
        let notifier = Arc::new(ChangeNotifier::new(
            Arc::clone(&registry),
            config.notifier.clone(),
        ));
        Self {
            resolver: Resolver::new(Arc::clone(&registry)),
            registry,
            journal,
            notifier,
            config,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn journal(&self) -> &Arc<dyn FactJournal> {
        &self.journal
    }

    pub fn item_count(&self) -> usize {
        self.registry.len()
    }

    /// Submit one normalized fact. This is the only way entity state ever
    /// changes. Correlation misses and rejected transitions are journaled
    /// outcomes, not errors; only contract violations fail.
    pub async fn submit_fact(&self, fact: Fact) -> Result<FactDisposition> {
        if fact.keys.is_empty() {
            return Err(TrackerError::MalformedFact(
                "fact carries no correlation keys".to_string(),
            ));
        }
        if fact.kind.is_creation_capable()
            && fact.item_keys().next().is_none()
        {
            return Err(TrackerError::MalformedFact(
                "creation-capable fact carries no item-level key"
                    .to_string(),
            ));
        }

        let (disposition, notifications) =
            match self.resolver.resolve(&fact).await {
                Resolution::Create => self.create_item(&fact),
                Resolution::NoMatch => {
                    debug!(
                        kind = fact.kind.label(),
                        source = %fact.source,
                        "fact matched nothing, journaling and dropping"
                    );
                    (FactDisposition::Dropped, Vec::new())
                }
                Resolution::Matched(targets) => {
                    self.apply_to_targets(&fact, targets).await
                }
            };

        // Commit order: mutation is already done under the entity lock;
        // journal before publishing so every delta a subscriber sees has
        // its fact on record. An append failure surfaces to the submitter
        // with the transition already committed and its deltas withheld.
        self.journal
            .append(JournalRecord {
                fact,
                disposition: disposition.clone(),
            })
            .await?;

        for notification in notifications {
            self.notifier.publish(notification);
        }

        Ok(disposition)
    }

    /// Consistent current view of one item, or `None` if unknown.
    pub async fn get_state(&self, item_id: ItemId) -> Option<ItemView> {
        let cell = self.registry.get(item_id)?;
        let item = cell.lock().await;
        Some(ItemView::of(&item))
    }

    /// Snapshot-then-delta notification stream.
    pub async fn subscribe(
        &self,
        filter: SubscriptionFilter,
    ) -> NotificationStream {
        self.notifier.subscribe(filter).await
    }

    /// Keep-alive ticker for the notification channel.
    pub fn spawn_heartbeat(
        &self,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        self.notifier.spawn_heartbeat(cancel)
    }

    /// Journaled facts attributed to one item, in arrival order.
    pub async fn timeline(
        &self,
        item_id: ItemId,
    ) -> Result<Vec<JournalRecord>> {
        self.journal.for_item(item_id).await
    }

    /// Items sitting unchanged in an awaiting-confirmation state for
    /// longer than `threshold`. Input for the fallback verifier.
    pub async fn stalled_candidates(
        &self,
        threshold: chrono::Duration,
    ) -> Vec<StallCandidate> {
        let cutoff = Utc::now() - threshold;
        let mut candidates = Vec::new();
        for cell in self.registry.cells() {
            let item = cell.lock().await;
            let awaiting = matches!(
                item.state,
                MediaState::Identifying | MediaState::Importing
            );
            if awaiting && item.state_changed_at < cutoff {
                candidates.push(StallCandidate {
                    item_id: item.id,
                    key: verification_key(&item),
                    state: item.state,
                    stalled_since: item.state_changed_at,
                });
            }
        }
        candidates
    }

    fn create_item(
        &self,
        fact: &Fact,
    ) -> (FactDisposition, Vec<Notification>) {
        let FactKind::Requested { details } = &fact.kind else {
            // is_creation_capable gates this arm.
            unreachable!("only requested facts create items");
        };
        let item = Item::new(details.clone(), fact.keys.clone());
        let item_id = item.id;
        let view = ItemView::of(&item);
        self.registry.insert(item);
        info!(
            item = %item_id,
            title = %details.title,
            kind = %details.kind,
            "tracking new request"
        );
        (
            FactDisposition::Created { item_id },
            vec![Notification::ItemCreated { item: view }],
        )
    }

    async fn apply_to_targets(
        &self,
        fact: &Fact,
        targets: Vec<Target>,
    ) -> (FactDisposition, Vec<Notification>) {
        let mut disposition = FactDisposition::Dropped;
        let mut notifications = Vec::new();
        for target in targets {
            let (target_disposition, mut target_notifications) =
                self.apply_to_target(fact, &target).await;
            notifications.append(&mut target_notifications);
            disposition = prefer(disposition, target_disposition);
        }
        (disposition, notifications)
    }

    /// Apply one fact to one item under that item's lock. The aggregate is
    /// recomputed before the lock drops; deltas are returned for
    /// post-commit publication.
    async fn apply_to_target(
        &self,
        fact: &Fact,
        target: &Target,
    ) -> (FactDisposition, Vec<Notification>) {
        let now = Utc::now();
        let mut item = target.cell.lock().await;
        let item_id = item.id;
        let old_aggregate = item.state;
        let mut deltas: Vec<(EntityRef, MediaState, MediaState)> = Vec::new();
        let mut progress_changed = false;

        // Learn keys carried by the fact (grab hashes in particular) so
        // later hash-only facts correlate directly.
        for key in &fact.keys {
            item.bind_key(key.clone());
        }

        if let FactKind::Grabbed {
            release: Some(release),
            ..
        } = &fact.kind
        {
            item.release = Some(release.clone());
        }

        if let FactKind::DownloadProgress {
            percent,
            speed,
            eta,
        } = &fact.kind
        {
            let telemetry = DownloadTelemetry {
                percent: *percent,
                speed: speed.clone(),
                eta: eta.clone(),
            };
            if item.telemetry.as_ref() != Some(&telemetry) {
                item.telemetry = Some(telemetry);
                progress_changed = true;
            }
        }

        // Lazy sub-item creation: the first fact enumerating parts turns
        // the item composite and binds the batch hash to every part.
        let parts = fact.kind.enumerated_parts();
        if !parts.is_empty() {
            let hash = fact.content_hash().cloned();
            for &ordinal in parts {
                if !item.sub_items.iter().any(|sub| sub.ordinal == ordinal) {
                    let seed = item.state;
                    let sub = SubItem::new(item_id, ordinal, seed);
                    item.sub_items.push(sub);
                }
            }
            if let Some(hash) = hash {
                for sub in item
                    .sub_items
                    .iter_mut()
                    .filter(|sub| parts.contains(&sub.ordinal))
                {
                    sub.hash = Some(hash.clone());
                }
            }
        }

        if target.sub_items.is_empty() {
            if item.is_composite() {
                // Item-level fact on a composite item: drive every
                // sub-item; the aggregate below reflects the result.
                let sub_ids: Vec<_> =
                    item.sub_items.iter().map(|sub| sub.id).collect();
                advance_sub_items(
                    &mut item, &sub_ids, &fact.kind, now, &mut deltas,
                );
            } else {
                match machine::plan(item.state, &fact.kind) {
                    Advance::To { path } => {
                        let new_state =
                            *path.last().expect("path never empty");
                        item.state = new_state;
                        item.state_changed_at = now;
                        deltas.push((
                            EntityRef::Item { item_id },
                            old_aggregate,
                            new_state,
                        ));
                    }
                    Advance::NoOp => {}
                    Advance::Invalid => {
                        warn!(
                            item = %item_id,
                            state = %item.state,
                            kind = fact.kind.label(),
                            "invalid transition ignored"
                        );
                    }
                }
            }
        } else {
            advance_sub_items(
                &mut item,
                &target.sub_items,
                &fact.kind,
                now,
                &mut deltas,
            );
        }

        // Aggregate recomputation, same critical section as the sub-item
        // mutation that triggered it.
        if item.is_composite() {
            let states: Vec<MediaState> =
                item.sub_items.iter().map(|sub| sub.state).collect();
            if let Some(aggregate) = aggregate::derive(&states)
                && aggregate != item.state
            {
                item.state = aggregate;
                item.state_changed_at = now;
                deltas.push((
                    EntityRef::Item { item_id },
                    old_aggregate,
                    aggregate,
                ));
            }
        }

        item.updated_at = now;
        let view = ItemView::of(&item);
        drop(item);

        let mut notifications: Vec<Notification> = deltas
            .iter()
            .map(|(entity, old_state, new_state)| {
                Notification::StateChanged {
                    entity: *entity,
                    old_state: *old_state,
                    new_state: *new_state,
                    timestamp: now,
                    item: view.clone(),
                }
            })
            .collect();

        if deltas.is_empty()
            && progress_changed
            && let Some(telemetry) = view.telemetry.clone()
        {
            notifications.push(Notification::Progress {
                item_id,
                telemetry,
                timestamp: now,
            });
        }

        let disposition = if deltas.is_empty() {
            FactDisposition::Recorded { item_id }
        } else {
            let new_state = view.state;
            info!(
                item = %item_id,
                old = %old_aggregate,
                new = %new_state,
                source = %fact.source,
                kind = fact.kind.label(),
                "committed transition"
            );
            FactDisposition::Applied {
                item_id,
                old_state: old_aggregate,
                new_state,
            }
        };
        (disposition, notifications)
    }
}

/// Advance the named sub-items, recording one delta per committed
/// transition. Runs under the owning item's lock.
fn advance_sub_items(
    item: &mut Item,
    sub_ids: &[SubItemId],
    kind: &FactKind,
    now: DateTime<Utc>,
    deltas: &mut Vec<(EntityRef, MediaState, MediaState)>,
) {
    let item_id = item.id;
    for sub in item
        .sub_items
        .iter_mut()
        .filter(|sub| sub_ids.contains(&sub.id))
    {
        match machine::plan(sub.state, kind) {
            Advance::To { path } => {
                let old_state = sub.state;
                let new_state = *path.last().expect("path never empty");
                sub.state = new_state;
                sub.state_changed_at = now;
                sub.updated_at = now;
                deltas.push((
                    EntityRef::SubItem {
                        item_id,
                        sub_item_id: sub.id,
                    },
                    old_state,
                    new_state,
                ));
            }
            Advance::NoOp => {}
            Advance::Invalid => {
                warn!(
                    item = %item_id,
                    sub_item = %sub.id,
                    state = %sub.state,
                    kind = kind.label(),
                    "invalid sub-item transition ignored"
                );
            }
        }
    }
}

/// Catalog keys verify most reliably against the media index; fall back to
/// whatever item-level key exists.
fn verification_key(item: &Item) -> Option<CorrelationKey> {
    item.keys
        .iter()
        .find(|key| matches!(key, CorrelationKey::Catalog(_)))
        .or_else(|| {
            item.keys
                .iter()
                .find(|key| matches!(key, CorrelationKey::AltCatalog(_)))
        })
        .or_else(|| item.keys.iter().find(|key| key.is_item_level()))
        .cloned()
}

fn prefer(
    current: FactDisposition,
    candidate: FactDisposition,
) -> FactDisposition {
    fn weight(disposition: &FactDisposition) -> u8 {
        match disposition {
            FactDisposition::Applied { .. } => 3,
            FactDisposition::Created { .. } => 2,
            FactDisposition::Recorded { .. } => 1,
            FactDisposition::Dropped => 0,
        }
    }
    if weight(&candidate) > weight(&current) {
        candidate
    } else {
        current
    }
}
