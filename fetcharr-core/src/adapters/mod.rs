//! Producer-side translation helpers.
//!
//! The download client does not push events; callers poll its batch list
//! and hand the rows here to be turned into normalized facts. Everything
//! downstream of this point speaks facts only.

use fetcharr_model::{ContentHash, CorrelationKey, Fact, FactKind, FactSource};
use serde::Deserialize;
use tracing::warn;

/// Transfer status as reported by the download client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Queued,
    Downloading,
    Completed,
    Failed,
}

/// One row of the download client's batch listing.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchProgressRow {
    pub hash: String,
    pub status: BatchStatus,
    pub percent: f32,
    #[serde(default)]
    pub speed: Option<String>,
    #[serde(default)]
    pub eta: Option<String>,
}

/// Translate one poll of the batch list into facts ready for submission.
///
/// Queued rows produce nothing; the entity already moved to the grab state
/// when the batch was created. Rows with unusable hashes are skipped with a
/// warning rather than failing the whole poll.
pub fn batch_progress_to_facts(rows: &[BatchProgressRow]) -> Vec<Fact> {
    let mut facts = Vec::new();
    for row in rows {
        let hash = match ContentHash::new(&row.hash) {
            Ok(hash) => hash,
            Err(error) => {
                warn!(hash = %row.hash, %error, "skipping batch row");
                continue;
            }
        };
        let kind = match row.status {
            BatchStatus::Queued => continue,
            BatchStatus::Downloading => FactKind::DownloadProgress {
                percent: row.percent.clamp(0.0, 100.0),
                speed: row.speed.clone(),
                eta: row.eta.clone(),
            },
            BatchStatus::Completed => FactKind::DownloadFinished,
            BatchStatus::Failed => FactKind::Failed {
                reason: "download client reported failure".to_string(),
            },
        };
        facts.push(Fact::new(
            FactSource::DownloadClient,
            kind,
            vec![CorrelationKey::Hash(hash)],
        ));
    }
    facts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(hash: &str, status: BatchStatus, percent: f32) -> BatchProgressRow {
        BatchProgressRow {
            hash: hash.to_string(),
            status,
            percent,
            speed: None,
            eta: None,
        }
    }

    #[test]
    fn statuses_map_to_fact_kinds() {
        let rows = vec![
            row("aaaa0001", BatchStatus::Downloading, 42.5),
            row("aaaa0002", BatchStatus::Completed, 100.0),
            row("aaaa0003", BatchStatus::Failed, 10.0),
            row("aaaa0004", BatchStatus::Queued, 0.0),
        ];
        let facts = batch_progress_to_facts(&rows);
        assert_eq!(facts.len(), 3);
        assert!(matches!(
            facts[0].kind,
            FactKind::DownloadProgress { percent, .. } if percent == 42.5
        ));
        assert!(matches!(facts[1].kind, FactKind::DownloadFinished));
        assert!(matches!(facts[2].kind, FactKind::Failed { .. }));
        assert_eq!(facts[0].source, FactSource::DownloadClient);
    }

    #[test]
    fn bad_hash_is_skipped_not_fatal() {
        let rows = vec![
            row("", BatchStatus::Completed, 100.0),
            row("ABCD1234", BatchStatus::Completed, 100.0),
        ];
        let facts = batch_progress_to_facts(&rows);
        assert_eq!(facts.len(), 1);
        // Hashes are matched case-insensitively downstream.
        assert_eq!(
            facts[0].content_hash().unwrap().as_str(),
            "abcd1234"
        );
    }

    #[test]
    fn progress_is_clamped() {
        let rows = vec![row("abcd1234", BatchStatus::Downloading, 250.0)];
        let facts = batch_progress_to_facts(&rows);
        assert!(matches!(
            facts[0].kind,
            FactKind::DownloadProgress { percent, .. } if percent == 100.0
        ));
    }
}
