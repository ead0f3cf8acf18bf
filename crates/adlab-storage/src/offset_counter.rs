//! Prefix counting for rule discovery
//!
//! Every payload contributes one observation for each of its growing
//! prefixes. Sequences are keyed by their starting offset (a 2-byte
//! little-endian prefix on the stored sequence) so sub-sequences starting
//! mid-payload can share the same store. Only offset 0 is counted today.

use adlab_core::Class;
use tokio::sync::mpsc;
use tracing::{instrument, trace};

use crate::error::StorageError;
use crate::record_log::Record;
use crate::registry::StoreRegistry;
use crate::rule_candidate::RuleCandidate;
use crate::sequence_index::SequenceCounter;

/// Width of the encoded offset prefix
pub const OFFSET_PREFIX_LEN: usize = 2;

/// Longest prefix counted for a single payload
pub const MAX_PREFIX_LEN: usize = i16::MAX as usize;

/// Prepend the little-endian `offset` to `bytes`
pub fn encode_offset_sequence(offset: i16, bytes: &[u8]) -> Vec<u8> {
    let mut sequence = Vec::with_capacity(OFFSET_PREFIX_LEN + bytes.len());
    sequence.extend_from_slice(&offset.to_le_bytes());
    sequence.extend_from_slice(bytes);
    sequence
}

/// Split a stored sequence into its offset and bytes
///
/// Returns `None` if the record is too short to carry an offset.
pub fn decode_offset_sequence(stored: &[u8]) -> Option<(i16, &[u8])> {
    if stored.len() < OFFSET_PREFIX_LEN {
        return None;
    }
    let (offset, bytes) = stored.split_at(OFFSET_PREFIX_LEN);
    Some((i16::from_le_bytes([offset[0], offset[1]]), bytes))
}

/// Store name of the offset counter for dataset store `name`
pub fn offsets_store_name(name: &str) -> String {
    format!("{name}-offsets")
}

/// Store name of the sequence log behind the offset counter for `name`
pub fn offsets_sequence_store_name(name: &str) -> String {
    format!("{name}-offsets-sequence")
}

/// Growing-prefix counter over the payloads of one dataset
#[derive(Debug)]
pub struct OffsetSequenceCounter {
    counter: SequenceCounter,
}

impl OffsetSequenceCounter {
    /// Open the counter for dataset store `name`
    pub async fn open(
        registry: &StoreRegistry,
        name: &str,
        updates: mpsc::Sender<RuleCandidate>,
    ) -> Result<Self, StorageError> {
        let counter = SequenceCounter::open(registry, &offsets_store_name(name), updates).await?;
        Ok(Self { counter })
    }

    /// Count one `class` observation of `bytes` starting at `offset`
    pub async fn increment(
        &mut self,
        class: Class,
        offset: i16,
        bytes: &[u8],
    ) -> Result<i64, StorageError> {
        let sequence = encode_offset_sequence(offset, bytes);
        self.counter.increment(class, &sequence).await
    }

    /// Count every prefix of `payload` as a `class` observation
    #[instrument(skip(self, payload), fields(counter = %self.counter.name(), len = payload.len()))]
    pub async fn process_bytes(
        &mut self,
        class: Class,
        payload: &[u8],
    ) -> Result<(), StorageError> {
        let limit = payload.len().min(MAX_PREFIX_LEN);
        for length in 1..=limit {
            self.increment(class, 0, &payload[..length]).await?;
        }
        trace!(prefixes = limit, "Counted prefixes");
        self.counter.save().await
    }

    /// Count a stored record and record it as the class's progress
    pub async fn process_record(
        &mut self,
        class: Class,
        record: &Record,
    ) -> Result<(), StorageError> {
        self.process_bytes(class, &record.data).await?;
        self.counter.counts().set_progress(class, record.index).await?;
        self.counter.save().await
    }

    /// Last record index of `class` counted, -1 if none
    pub async fn progress(&mut self, class: Class) -> Result<i64, StorageError> {
        self.counter.counts().progress(class).await
    }

    /// Current candidate for `bytes` at `offset`, if it has been seen
    pub async fn candidate_for(
        &mut self,
        offset: i16,
        bytes: &[u8],
    ) -> Result<Option<RuleCandidate>, StorageError> {
        let sequence = encode_offset_sequence(offset, bytes);
        self.counter.candidate_for(&sequence).await
    }

    /// Best candidate seen since open
    pub fn best(&self) -> Option<&RuleCandidate> {
        self.counter.best()
    }

    /// Number of distinct sequences counted
    pub async fn sequences(&self) -> usize {
        self.counter.sequences().len().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record_log::RecordLogConfig;
    use bytes::Bytes;
    use tempfile::TempDir;

    #[test]
    fn test_offset_sequence_encoding() {
        let stored = encode_offset_sequence(0, &[0x16, 0x03]);
        assert_eq!(stored, vec![0x00, 0x00, 0x16, 0x03]);
        assert_eq!(decode_offset_sequence(&stored), Some((0, &[0x16, 0x03][..])));

        let stored = encode_offset_sequence(258, b"x");
        assert_eq!(&stored[..2], &[0x02, 0x01]);
        assert_eq!(decode_offset_sequence(&stored), Some((258, &b"x"[..])));

        assert_eq!(decode_offset_sequence(&[1]), None);
    }

    #[test]
    fn test_store_names() {
        assert_eq!(offsets_store_name("tls-incoming"), "tls-incoming-offsets");
        assert_eq!(
            offsets_sequence_store_name("tls-incoming"),
            "tls-incoming-offsets-sequence"
        );
    }

    #[tokio::test]
    async fn test_process_bytes_counts_prefixes() {
        let temp = TempDir::new().unwrap();
        let registry = StoreRegistry::new(RecordLogConfig::with_base_dir(temp.path()));
        let (tx, _rx) = mpsc::channel(16);
        let mut counter = OffsetSequenceCounter::open(&registry, "ds-incoming", tx)
            .await
            .unwrap();

        counter.process_bytes(Class::Allow, b"abc").await.unwrap();
        counter.process_bytes(Class::Allow, b"abd").await.unwrap();

        // a, ab, abc, abd
        assert_eq!(counter.sequences().await, 4);
        let ab = counter.candidate_for(0, b"ab").await.unwrap().unwrap();
        assert_eq!(ab.allow_count, 2);
        assert_eq!(ab.allow_total, 6);

        let log = registry.get("ds-incoming-offsets-sequence").unwrap();
        let record = log.get_record(ab.index).await.unwrap();
        assert_eq!(decode_offset_sequence(&record.data), Some((0, &b"ab"[..])));
    }

    #[tokio::test]
    async fn test_process_record_tracks_progress() {
        let temp = TempDir::new().unwrap();
        let registry = StoreRegistry::new(RecordLogConfig::with_base_dir(temp.path()));
        let (tx, _rx) = mpsc::channel(16);
        let mut counter = OffsetSequenceCounter::open(&registry, "ds-incoming", tx)
            .await
            .unwrap();

        let record = Record {
            index: 4,
            data: Bytes::from_static(b"q"),
        };
        counter.process_record(Class::Block, &record).await.unwrap();
        assert_eq!(counter.progress(Class::Block).await.unwrap(), 4);
        assert_eq!(counter.progress(Class::Allow).await.unwrap(), -1);
    }
}
