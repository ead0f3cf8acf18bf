//! Rule publication
//!
//! Turns improved candidates into [`Rule`]s: the candidate's sequence is
//! read back from the dataset's offset sequence log, the latest rule per
//! dataset is cached for [`RuleRequest`](adlab_core::RuleRequest)s, and
//! every rule is broadcast to subscribers.

use std::sync::Arc;

use adlab_core::{DatasetKey, Rule};
use adlab_storage::{
    StorageError, StoreRegistry, decode_offset_sequence, offsets_sequence_store_name,
};
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, instrument, warn};

use crate::error::ServiceResult;
use crate::train::{Update, UpdateEvent};

/// Latest rule per dataset, fed by candidate updates
pub struct RuleService {
    registry: Arc<StoreRegistry>,
    rules: DashMap<DatasetKey, Rule>,
    published: broadcast::Sender<Rule>,
}

impl RuleService {
    pub fn new(registry: Arc<StoreRegistry>, broadcast_capacity: usize) -> Self {
        let (published, _) = broadcast::channel(broadcast_capacity.max(1));
        Self {
            registry,
            rules: DashMap::new(),
            published,
        }
    }

    /// Receive every rule published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Rule> {
        self.published.subscribe()
    }

    /// The most recent rule for `key`
    pub fn rule(&self, key: &DatasetKey) -> Option<Rule> {
        self.rules.get(key).map(|r| r.clone())
    }

    /// Datasets with a published rule
    pub fn datasets(&self) -> Vec<DatasetKey> {
        self.rules.iter().map(|r| r.key().clone()).collect()
    }

    /// Resolve a candidate to its sequence and publish the resulting rule
    #[instrument(skip(self, update), fields(dataset = %update.key, index = update.candidate.index))]
    pub async fn handle_update(&self, update: &Update) -> ServiceResult<Rule> {
        let store = offsets_sequence_store_name(&update.key.store_name());
        let log = self.registry.get_or_open(&store).await?;
        let record = log.get_record(update.candidate.index).await?;

        let (offset, sequence) = decode_offset_sequence(&record.data).ok_or_else(|| {
            StorageError::deserialization(format!(
                "{store}: record {} is not an offset sequence",
                record.index
            ))
        })?;

        let rule = Rule {
            dataset: update.key.dataset.clone(),
            require_forbid: update.candidate.require_forbid(),
            incoming: update.key.direction.is_incoming(),
            sequence: sequence.to_vec(),
        };
        info!(
            offset,
            score = update.candidate.score(),
            rule = %rule,
            "Publishing rule"
        );

        self.rules.insert(update.key.clone(), rule.clone());
        if self.published.send(rule.clone()).is_err() {
            debug!("No rule subscribers");
        }
        Ok(rule)
    }

    async fn handle_event(&self, event: UpdateEvent) {
        match event {
            UpdateEvent::Update(update) => {
                if let Err(e) = self.handle_update(&update).await {
                    warn!(dataset = %update.key, error = %e, "Failed to publish rule");
                }
            }
            UpdateEvent::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }

    /// Consume updates until shutdown, then handle whatever is already queued
    pub(crate) async fn run(
        self: Arc<Self>,
        mut updates: mpsc::Receiver<UpdateEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                event = updates.recv() => {
                    let Some(event) = event else { break };
                    self.handle_event(event).await;
                }
                _ = shutdown.recv() => {
                    while let Ok(event) = updates.try_recv() {
                        self.handle_event(event).await;
                    }
                    break;
                }
            }
        }
        info!("Rule service stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adlab_core::Direction;
    use adlab_storage::{RecordLogConfig, RuleCandidate, encode_offset_sequence};
    use tempfile::TempDir;

    fn candidate(index: i64, allow_count: i64, block_count: i64) -> RuleCandidate {
        RuleCandidate {
            index,
            allow_count,
            allow_total: 10,
            block_count,
            block_total: 10,
        }
    }

    #[tokio::test]
    async fn test_handle_update_resolves_sequence() {
        let temp = TempDir::new().unwrap();
        let registry = Arc::new(StoreRegistry::new(RecordLogConfig::with_base_dir(temp.path())));
        let key = DatasetKey::new("web", Direction::Incoming);

        let log = registry
            .get_or_open(&offsets_sequence_store_name(&key.store_name()))
            .await
            .unwrap();
        log.add(&encode_offset_sequence(0, b"G")).await.unwrap();
        let index = log.add(&encode_offset_sequence(0, b"GET")).await.unwrap();

        let service = RuleService::new(registry, 8);
        let mut rules = service.subscribe();

        let update = Update {
            key: key.clone(),
            candidate: candidate(index, 9, 1),
        };
        let rule = service.handle_update(&update).await.unwrap();

        assert_eq!(rule.sequence, b"GET".to_vec());
        assert!(rule.require_forbid);
        assert!(rule.incoming);
        assert_eq!(service.rule(&key), Some(rule.clone()));
        assert_eq!(rules.recv().await.unwrap(), rule);
    }

    #[tokio::test]
    async fn test_later_update_replaces_rule() {
        let temp = TempDir::new().unwrap();
        let registry = Arc::new(StoreRegistry::new(RecordLogConfig::with_base_dir(temp.path())));
        let key = DatasetKey::new("web", Direction::Outgoing);

        let log = registry
            .get_or_open(&offsets_sequence_store_name(&key.store_name()))
            .await
            .unwrap();
        let first = log.add(&encode_offset_sequence(0, b"A")).await.unwrap();
        let second = log.add(&encode_offset_sequence(0, b"AB")).await.unwrap();

        let service = RuleService::new(registry, 8);
        for (index, allow) in [(first, 6), (second, 1)] {
            let update = Update {
                key: key.clone(),
                candidate: candidate(index, allow, 9),
            };
            service.handle_update(&update).await.unwrap();
        }

        let rule = service.rule(&key).unwrap();
        assert_eq!(rule.sequence, b"AB".to_vec());
        assert!(!rule.require_forbid);
        assert_eq!(service.datasets(), vec![key]);
    }

    #[tokio::test]
    async fn test_unknown_candidate_index_fails() {
        let temp = TempDir::new().unwrap();
        let registry = Arc::new(StoreRegistry::new(RecordLogConfig::with_base_dir(temp.path())));
        let key = DatasetKey::new("web", Direction::Incoming);

        let service = RuleService::new(registry, 8);
        let update = Update {
            key: key.clone(),
            candidate: candidate(4, 9, 1),
        };

        assert!(service.handle_update(&update).await.is_err());
        assert!(service.rule(&key).is_none());
    }
}
