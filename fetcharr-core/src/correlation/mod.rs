//! Event correlation.
//!
//! Binds incoming facts to tracked entities across the keyspaces the
//! upstream systems speak: portal request ids, catalog ids, and download
//! batch hashes. The registry is also the concurrency backbone: every item
//! lives in its own cell with a dedicated async mutex, so mutation is
//! serialized per entity while distinct entities proceed in parallel. No
//! lock ever spans more than one item.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fetcharr_model::{
    ContentHash, CorrelationKey, Fact, Item, ItemId, SubItemId,
};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// One tracked item behind its per-entity lock.
///
/// `id` and `created_at` are immutable and cached outside the mutex so the
/// resolver can tie-break candidates without re-locking.
#[derive(Debug)]
pub struct ItemCell {
    id: ItemId,
    created_at: DateTime<Utc>,
    inner: Mutex<Item>,
}

impl ItemCell {
    fn new(item: Item) -> Self {
        Self {
            id: item.id,
            created_at: item.created_at,
            inner: Mutex::new(item),
        }
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Acquire this entity's write lock. All state mutation and the
    /// owning item's aggregate recomputation happen under this guard.
    pub async fn lock(&self) -> MutexGuard<'_, Item> {
        self.inner.lock().await
    }
}

/// Shared registry of all tracked items.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    items: DashMap<ItemId, Arc<ItemCell>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, item: Item) -> Arc<ItemCell> {
        let cell = Arc::new(ItemCell::new(item));
        self.items.insert(cell.id(), Arc::clone(&cell));
        cell
    }

    pub fn get(&self, id: ItemId) -> Option<Arc<ItemCell>> {
        self.items.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Snapshot of all cell handles. Cloned out so no map shard stays
    /// borrowed across the caller's lock acquisitions.
    pub fn cells(&self) -> Vec<Arc<ItemCell>> {
        self.items
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Resolved target within one item; an empty `sub_items` list means the
/// fact addresses the item as a whole.
#[derive(Debug, Clone)]
pub struct Target {
    pub cell: Arc<ItemCell>,
    pub sub_items: Vec<SubItemId>,
}

/// Outcome of correlating one fact.
#[derive(Debug)]
pub enum Resolution {
    /// One target per owning item. A content hash may fan out to several
    /// items when a batch spans requests.
    Matched(Vec<Target>),
    /// Fresh item-level key on a creation-capable fact; the engine
    /// creates the item.
    Create,
    /// Nothing matched and the fact cannot create; journaled and dropped.
    NoMatch,
}

/// Maps incoming facts to zero, one, or many tracked entities.
#[derive(Debug)]
pub struct Resolver {
    registry: Arc<EntityRegistry>,
}

impl Resolver {
    pub fn new(registry: Arc<EntityRegistry>) -> Self {
        Self { registry }
    }

    /// Correlate a fact. Hash keys are tried first (most specific), then
    /// item-level keys; ambiguity resolves to the most recently created
    /// active item.
    pub async fn resolve(&self, fact: &Fact) -> Resolution {
        if let Some(hash) = fact.content_hash() {
            let targets = self.find_by_hash(hash).await;
            if !targets.is_empty() {
                return Resolution::Matched(targets);
            }
        }

        let candidates = self.find_by_item_keys(fact).await;
        match candidates.len() {
            0 => {
                if fact.kind.is_creation_capable() {
                    return Resolution::Create;
                }
                debug!(
                    kind = fact.kind.label(),
                    source = %fact.source,
                    "correlation miss, dropping fact"
                );
                Resolution::NoMatch
            }
            1 => Resolution::Matched(vec![Target {
                cell: candidates.into_iter().next().expect("len checked"),
                sub_items: Vec::new(),
            }]),
            count => {
                // Duplicate requests for the same content: deterministic
                // tie-break on newest creation, still processed.
                let newest = candidates
                    .into_iter()
                    .max_by_key(|cell| cell.created_at())
                    .expect("non-empty");
                warn!(
                    kind = fact.kind.label(),
                    candidates = count,
                    winner = %newest.id(),
                    "ambiguous correlation, picking most recent item"
                );
                Resolution::Matched(vec![Target {
                    cell: newest,
                    sub_items: Vec::new(),
                }])
            }
        }
    }

    /// All active items bound to `hash`, either through sub-items created
    /// from the batch or through an item-level hash binding (single-unit
    /// items).
    async fn find_by_hash(&self, hash: &ContentHash) -> Vec<Target> {
        let mut targets = Vec::new();
        for cell in self.registry.cells() {
            let item = cell.lock().await;
            if !item.state.is_active() {
                continue;
            }
            let sub_items = item.sub_items_for_hash(hash);
            let bound_at_item =
                item.has_key(&CorrelationKey::Hash(hash.clone()));
            drop(item);
            if !sub_items.is_empty() {
                targets.push(Target { cell, sub_items });
            } else if bound_at_item {
                targets.push(Target {
                    cell,
                    sub_items: Vec::new(),
                });
            }
        }
        targets
    }

    async fn find_by_item_keys(&self, fact: &Fact) -> Vec<Arc<ItemCell>> {
        let keys: Vec<&CorrelationKey> = fact.item_keys().collect();
        if keys.is_empty() {
            return Vec::new();
        }
        let mut candidates = Vec::new();
        for cell in self.registry.cells() {
            let item = cell.lock().await;
            if item.state.is_active()
                && keys.iter().any(|key| item.has_key(key))
            {
                drop(item);
                candidates.push(cell);
            }
        }
        candidates
    }
}
