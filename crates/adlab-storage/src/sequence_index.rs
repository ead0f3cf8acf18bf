//! Content-addressed sequence identities and their per-class counters
//!
//! [`SequenceIndex`] stores each distinct byte sequence once, as a record in
//! a dedicated [`RecordLog`], and uses that record's index as the
//! sequence's identity. [`SequenceCounter`] layers a [`CountTable`] on top
//! and tracks the best-scoring [`RuleCandidate`] seen so far.

use std::collections::HashMap;
use std::sync::Arc;

use adlab_core::Class;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, instrument, trace};

use crate::count_table::CountTable;
use crate::error::StorageError;
use crate::record_log::RecordLog;
use crate::registry::StoreRegistry;
use crate::rule_candidate::RuleCandidate;

/// Deduplicating map from byte sequence to a stable record index
#[derive(Debug)]
pub struct SequenceIndex {
    log: Arc<RecordLog>,
    ids: RwLock<HashMap<Vec<u8>, i64>>,
}

impl SequenceIndex {
    /// Open the sequence log `name` and rebuild the lookup map from it
    #[instrument(skip(registry))]
    pub async fn open(registry: &StoreRegistry, name: &str) -> Result<Self, StorageError> {
        let log = registry.get_or_open(name).await?;

        let mut ids = HashMap::with_capacity(log.len());
        let mut cursor = log.cursor(-1);
        while let Some(record) = cursor.next().await {
            ids.entry(record.data.to_vec()).or_insert(record.index);
        }

        info!(store = name, sequences = ids.len(), "Loaded sequence index");
        Ok(Self {
            log,
            ids: RwLock::new(ids),
        })
    }

    /// Identity of `sequence`, if it has been stored
    pub async fn lookup(&self, sequence: &[u8]) -> Option<i64> {
        self.ids.read().await.get(sequence).copied()
    }

    /// Identity of `sequence`, storing it first if it is new
    ///
    /// Concurrent callers with the same sequence always receive the same
    /// identity.
    pub async fn lookup_or_insert(&self, sequence: &[u8]) -> Result<i64, StorageError> {
        if let Some(id) = self.lookup(sequence).await {
            return Ok(id);
        }

        let mut ids = self.ids.write().await;
        if let Some(&id) = ids.get(sequence) {
            return Ok(id);
        }

        let id = self.log.add(sequence).await?;
        ids.insert(sequence.to_vec(), id);
        trace!(
            store = %self.log.name(),
            id,
            sequence = %hex::encode(sequence),
            "Stored new sequence"
        );
        Ok(id)
    }

    /// Number of distinct sequences
    pub async fn len(&self) -> usize {
        self.ids.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.ids.read().await.is_empty()
    }

    /// The backing sequence log
    pub fn log(&self) -> &Arc<RecordLog> {
        &self.log
    }
}

/// Per-class sequence counts with best-candidate tracking
///
/// Every increment recomputes the candidate for the touched sequence. A
/// candidate with a non-zero score that strictly beats the current best
/// replaces it and is sent on the update channel. The send waits for
/// capacity, so a slow consumer stalls the caller rather than losing an
/// update.
#[derive(Debug)]
pub struct SequenceCounter {
    name: String,
    index: SequenceIndex,
    counts: CountTable,
    best: Option<RuleCandidate>,
    updates: mpsc::Sender<RuleCandidate>,
}

impl SequenceCounter {
    /// Open the counter `name`: sequences in `{name}-sequence`, counts in `{name}/`
    pub async fn open(
        registry: &StoreRegistry,
        name: &str,
        updates: mpsc::Sender<RuleCandidate>,
    ) -> Result<Self, StorageError> {
        let index = SequenceIndex::open(registry, &format!("{name}-sequence")).await?;
        let counts = CountTable::open(&registry.base_dir().join(name)).await?;

        Ok(Self {
            name: name.to_string(),
            index,
            counts,
            best: None,
            updates,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Count one `class` observation of `sequence`, returning its identity
    pub async fn increment(&mut self, class: Class, sequence: &[u8]) -> Result<i64, StorageError> {
        let id = self.index.lookup_or_insert(sequence).await?;
        self.counts.increment(id, class).await?;
        self.keep_best(id).await?;
        Ok(id)
    }

    /// Current candidate for `sequence`, if it has been seen
    pub async fn candidate_for(
        &mut self,
        sequence: &[u8],
    ) -> Result<Option<RuleCandidate>, StorageError> {
        match self.index.lookup(sequence).await {
            Some(id) => Ok(Some(self.counts.candidate(id).await?)),
            None => Ok(None),
        }
    }

    /// Best candidate seen since open
    pub fn best(&self) -> Option<&RuleCandidate> {
        self.best.as_ref()
    }

    pub fn sequences(&self) -> &SequenceIndex {
        &self.index
    }

    pub fn counts(&mut self) -> &mut CountTable {
        &mut self.counts
    }

    pub async fn save(&mut self) -> Result<(), StorageError> {
        self.counts.save().await
    }

    async fn keep_best(&mut self, id: i64) -> Result<(), StorageError> {
        let candidate = self.counts.candidate(id).await?;
        if candidate.score() == 0.0 {
            return Ok(());
        }

        let improved = match &self.best {
            None => true,
            Some(best) => candidate.better_than(best),
        };
        if !improved {
            return Ok(());
        }

        debug!(
            counter = %self.name,
            index = id,
            score = candidate.score(),
            require = candidate.require_forbid(),
            "New best candidate"
        );
        self.best = Some(candidate);
        if self.updates.send(candidate).await.is_err() {
            debug!(counter = %self.name, "Candidate receiver closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record_log::RecordLogConfig;
    use std::time::Duration;
    use tempfile::TempDir;

    fn create_test_registry() -> (StoreRegistry, TempDir) {
        let temp = TempDir::new().unwrap();
        let registry = StoreRegistry::new(RecordLogConfig::with_base_dir(temp.path()));
        (registry, temp)
    }

    #[tokio::test]
    async fn test_lookup_or_insert_dedups() {
        let (registry, _temp) = create_test_registry();
        let index = SequenceIndex::open(&registry, "seq").await.unwrap();

        let a = index.lookup_or_insert(b"abc").await.unwrap();
        let b = index.lookup_or_insert(b"abd").await.unwrap();
        let again = index.lookup_or_insert(b"abc").await.unwrap();

        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(again, a);
        assert_eq!(index.len().await, 2);
        assert_eq!(index.log().last_index(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_inserts_share_identity() {
        let (registry, _temp) = create_test_registry();
        let index = Arc::new(SequenceIndex::open(&registry, "seq").await.unwrap());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let index = index.clone();
            handles.push(tokio::spawn(async move {
                index.lookup_or_insert(b"same").await.unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 0);
        }
        assert_eq!(index.log().len(), 1);
    }

    #[tokio::test]
    async fn test_index_rebuilt_on_open() {
        let temp = TempDir::new().unwrap();
        {
            let registry = StoreRegistry::new(RecordLogConfig::with_base_dir(temp.path()));
            let index = SequenceIndex::open(&registry, "seq").await.unwrap();
            index.lookup_or_insert(b"one").await.unwrap();
            index.lookup_or_insert(b"two").await.unwrap();
            registry.close_all().await.unwrap();
        }

        let registry = StoreRegistry::new(RecordLogConfig::with_base_dir(temp.path()));
        let index = SequenceIndex::open(&registry, "seq").await.unwrap();
        assert_eq!(index.lookup(b"two").await, Some(1));
        assert_eq!(index.lookup_or_insert(b"three").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_counter_emits_improving_candidates() {
        let (registry, _temp) = create_test_registry();
        let (tx, mut rx) = mpsc::channel(16);
        let mut counter = SequenceCounter::open(&registry, "counts", tx).await.unwrap();

        for _ in 0..3 {
            counter.increment(Class::Allow, b"a").await.unwrap();
        }
        // No block samples yet, so nothing scores
        assert!(counter.best().is_none());
        assert!(rx.try_recv().is_err());

        for _ in 0..3 {
            counter.increment(Class::Block, b"b").await.unwrap();
        }

        let best = *counter.best().unwrap();
        assert!(best.score() > 0.0);
        let mut last = None;
        while let Ok(candidate) = rx.try_recv() {
            last = Some(candidate);
        }
        assert_eq!(last, Some(best));

        let a = counter.candidate_for(b"a").await.unwrap().unwrap();
        assert!(a.require_forbid());
        assert!(counter.candidate_for(b"zzz").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_full_update_channel_stalls_counter() {
        let (registry, _temp) = create_test_registry();
        let (tx, mut rx) = mpsc::channel(1);
        let mut counter = SequenceCounter::open(&registry, "gated", tx).await.unwrap();

        for _ in 0..3 {
            counter.increment(Class::Block, b"p").await.unwrap();
        }
        for _ in 0..2 {
            counter.increment(Class::Allow, b"q").await.unwrap();
        }
        // p scores 2/3 and takes the only slot
        counter.increment(Class::Allow, b"p").await.unwrap();
        let first = *counter.best().unwrap();

        // q scores 3/4 but has nowhere to go until the receiver drains
        let mut pending = tokio::spawn(async move {
            counter.increment(Class::Allow, b"q").await.unwrap();
            counter
        });
        let stalled = tokio::time::timeout(Duration::from_millis(50), &mut pending).await;
        assert!(stalled.is_err());

        assert_eq!(rx.recv().await, Some(first));
        let counter = pending.await.unwrap();
        let second = *counter.best().unwrap();
        assert!(second.better_than(&first));
        assert_eq!(rx.recv().await, Some(second));
        assert!(rx.try_recv().is_err());
    }
}
