//! Change notification fan-out.
//!
//! Publishing is fire-and-forget from the mutation path: the engine drops
//! each committed delta onto a broadcast ring and moves on, so a slow or
//! disconnected subscriber can never delay a state transition. Each
//! subscriber gets a pump task that forwards deltas through its own
//! bounded queue; when a subscriber falls behind far enough to lag the
//! ring, the pump discards the missed deltas and hands it a fresh snapshot
//! instead, which is always safe because snapshots are built under the
//! item locks.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fetcharr_model::{
    DownloadTelemetry, ItemId, MediaState, SubItemId, SubscriberId,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::NotifierConfig;
use crate::correlation::EntityRegistry;
use crate::view::ItemView;

/// Which entity a delta refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum EntityRef {
    Item { item_id: ItemId },
    SubItem {
        item_id: ItemId,
        sub_item_id: SubItemId,
    },
}

impl EntityRef {
    pub fn item_id(&self) -> ItemId {
        match self {
            EntityRef::Item { item_id }
            | EntityRef::SubItem { item_id, .. } => *item_id,
        }
    }
}

/// Messages delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Full current-state view. Sent once on subscribe and again whenever
    /// a subscriber overflowed its queue (`resync: true`).
    Snapshot { items: Vec<ItemView>, resync: bool },
    /// A new item entered tracking.
    ItemCreated { item: ItemView },
    /// Exactly one of these per committed state transition.
    StateChanged {
        entity: EntityRef,
        old_state: MediaState,
        new_state: MediaState,
        timestamp: DateTime<Utc>,
        /// Post-transition view of the owning item.
        item: ItemView,
    },
    /// Download telemetry update that changed no state.
    Progress {
        item_id: ItemId,
        telemetry: DownloadTelemetry,
        timestamp: DateTime<Utc>,
    },
    /// Keep-alive, independent of business events.
    Heartbeat { timestamp: DateTime<Utc> },
}

impl Notification {
    fn item_id(&self) -> Option<ItemId> {
        match self {
            Notification::ItemCreated { item } => Some(item.id),
            Notification::StateChanged { entity, .. } => {
                Some(entity.item_id())
            }
            Notification::Progress { item_id, .. } => Some(*item_id),
            Notification::Snapshot { .. } | Notification::Heartbeat { .. } => {
                None
            }
        }
    }
}

/// What a subscriber wants to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionFilter {
    All,
    Item(ItemId),
}

impl SubscriptionFilter {
    fn matches(&self, notification: &Notification) -> bool {
        match (self, notification.item_id()) {
            (SubscriptionFilter::All, _) => true,
            // Heartbeats and snapshots always pass.
            (_, None) => true,
            (SubscriptionFilter::Item(wanted), Some(item_id)) => {
                *wanted == item_id
            }
        }
    }
}

/// Stream handed to subscribers: snapshot first, deltas after.
pub type NotificationStream = ReceiverStream<Notification>;

/// In-process notification hub.
pub struct ChangeNotifier {
    registry: Arc<EntityRegistry>,
    sender: broadcast::Sender<Notification>,
    config: NotifierConfig,
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("subscribers", &self.sender.receiver_count())
            .field("config", &self.config)
            .finish()
    }
}

impl ChangeNotifier {
    pub fn new(registry: Arc<EntityRegistry>, config: NotifierConfig) -> Self {
        let (sender, _) = broadcast::channel(config.queue_capacity.max(1));
        Self {
            registry,
            sender,
            config,
        }
    }

    /// Publish a committed delta. Never blocks and never fails; with no
    /// subscribers the message simply evaporates.
    pub fn publish(&self, notification: Notification) {
        let _ = self.sender.send(notification);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Subscribe with a filter. The returned stream yields a full snapshot
    /// of the matching items first, then only deltas.
    pub async fn subscribe(
        &self,
        filter: SubscriptionFilter,
    ) -> NotificationStream {
        let subscriber = SubscriberId::new();
        let mut ring = self.sender.subscribe();
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let registry = Arc::clone(&self.registry);
        debug!(%subscriber, ?filter, "subscriber attached");

        let initial = Notification::Snapshot {
            items: snapshot_views(&registry, filter).await,
            resync: false,
        };

        tokio::spawn(async move {
            if tx.send(initial).await.is_err() {
                return;
            }
            loop {
                match ring.recv().await {
                    Ok(notification) => {
                        if !filter.matches(&notification) {
                            continue;
                        }
                        if tx.send(notification).await.is_err() {
                            debug!(%subscriber, "subscriber dropped, stopping pump");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            %subscriber,
                            skipped,
                            "subscriber overflowed, forcing resnapshot"
                        );
                        let snapshot = Notification::Snapshot {
                            items: snapshot_views(&registry, filter).await,
                            resync: true,
                        };
                        if tx.send(snapshot).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        ReceiverStream::new(rx)
    }

    /// Periodic keep-alive so transports and subscribers can tell a quiet
    /// channel from a dead one.
    pub fn spawn_heartbeat(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let notifier = Arc::clone(self);
        let period = self.config.heartbeat_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(
                tokio::time::MissedTickBehavior::Skip,
            );
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        notifier.publish(Notification::Heartbeat {
                            timestamp: Utc::now(),
                        });
                    }
                }
            }
        })
    }
}

/// Consistent per-item views for a snapshot. Each item is read under its
/// own lock; there is no cross-item consistency requirement.
async fn snapshot_views(
    registry: &EntityRegistry,
    filter: SubscriptionFilter,
) -> Vec<ItemView> {
    let mut views = Vec::new();
    for cell in registry.cells() {
        if let SubscriptionFilter::Item(wanted) = filter
            && cell.id() != wanted
        {
            continue;
        }
        let item = cell.lock().await;
        views.push(ItemView::of(&item));
    }
    views.sort_by_key(|view| view.id);
    views
}

#[cfg(test)]
mod tests {
    use fetcharr_model::{Item, MediaKind, RequestDetails};
    use tokio_stream::StreamExt;

    use super::*;

    fn notifier_with_one_item() -> (Arc<ChangeNotifier>, ItemId) {
        let registry = Arc::new(EntityRegistry::new());
        let item = Item::new(
            RequestDetails::new(MediaKind::Movie, "Heat"),
            Vec::new(),
        );
        let id = item.id;
        registry.insert(item);
        let notifier = Arc::new(ChangeNotifier::new(
            registry,
            NotifierConfig::default(),
        ));
        (notifier, id)
    }

    #[tokio::test]
    async fn snapshot_arrives_before_deltas() {
        let (notifier, item_id) = notifier_with_one_item();
        let mut stream =
            notifier.subscribe(SubscriptionFilter::All).await;

        let first = stream.next().await.unwrap();
        match first {
            Notification::Snapshot { items, resync } => {
                assert!(!resync);
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].id, item_id);
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn filter_drops_foreign_deltas() {
        let (notifier, item_id) = notifier_with_one_item();
        let mut stream = notifier
            .subscribe(SubscriptionFilter::Item(item_id))
            .await;
        // initial snapshot
        let _ = stream.next().await.unwrap();

        notifier.publish(Notification::Progress {
            item_id: ItemId::new(),
            telemetry: DownloadTelemetry {
                percent: 10.0,
                speed: None,
                eta: None,
            },
            timestamp: Utc::now(),
        });
        notifier.publish(Notification::Heartbeat {
            timestamp: Utc::now(),
        });

        // The foreign progress delta is filtered; the heartbeat passes.
        match stream.next().await.unwrap() {
            Notification::Heartbeat { .. } => {}
            other => panic!("expected heartbeat, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_harmless() {
        let (notifier, _) = notifier_with_one_item();
        notifier.publish(Notification::Heartbeat {
            timestamp: Utc::now(),
        });
        assert_eq!(notifier.subscriber_count(), 0);
    }
}
