use async_trait::async_trait;
use fetcharr_model::ItemId;
use tokio::sync::RwLock;

use super::{FactJournal, JournalRecord};
use crate::Result;

/// In-process journal backed by a growable vector. Suitable for a single
/// engine instance; durable backends implement [`FactJournal`] instead.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    records: RwLock<Vec<JournalRecord>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FactJournal for MemoryJournal {
    async fn append(&self, record: JournalRecord) -> Result<()> {
        self.records.write().await.push(record);
        Ok(())
    }

    async fn snapshot(&self) -> Result<Vec<JournalRecord>> {
        Ok(self.records.read().await.clone())
    }

    async fn for_item(&self, item_id: ItemId) -> Result<Vec<JournalRecord>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|record| record.disposition.item_id() == Some(item_id))
            .cloned()
            .collect())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.records.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use fetcharr_model::{
        CorrelationKey, Fact, FactKind, FactSource, MediaState,
    };

    use super::*;
    use crate::journal::FactDisposition;

    fn record(item_id: Option<ItemId>) -> JournalRecord {
        let fact = Fact::new(
            FactSource::AcquisitionManager,
            FactKind::Approved,
            vec![CorrelationKey::Catalog(7)],
        );
        let disposition = match item_id {
            Some(item_id) => FactDisposition::Applied {
                item_id,
                old_state: MediaState::Requested,
                new_state: MediaState::Approved,
            },
            None => FactDisposition::Dropped,
        };
        JournalRecord { fact, disposition }
    }

    #[tokio::test]
    async fn appends_preserve_order_and_filter_by_item() {
        let journal = MemoryJournal::new();
        let item = ItemId::new();
        journal.append(record(Some(item))).await.unwrap();
        journal.append(record(None)).await.unwrap();
        journal.append(record(Some(item))).await.unwrap();

        assert_eq!(journal.len().await.unwrap(), 3);
        assert_eq!(journal.snapshot().await.unwrap().len(), 3);
        assert_eq!(journal.for_item(item).await.unwrap().len(), 2);
        assert_eq!(journal.for_item(ItemId::new()).await.unwrap().len(), 0);
    }
}
