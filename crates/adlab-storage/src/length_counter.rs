//! Per-class payload length histogram
//!
//! `lengths` holds one block of [`LENGTH_BUCKETS`] slots per class, block
//! first. Lengths past the last bucket are counted in it.

use std::path::Path;

use adlab_core::Class;

use crate::error::StorageError;
use crate::slot::{SLOT_SIZE, SlotFile};

/// Number of length buckets per class
pub const LENGTH_BUCKETS: usize = 1500;

const LENGTHS_FILE: &str = "lengths";

/// Histogram bucket for a payload of `len` bytes
pub fn length_bucket(len: usize) -> usize {
    len.min(LENGTH_BUCKETS - 1)
}

#[derive(Debug)]
pub struct LengthCounter {
    file: SlotFile,
}

impl LengthCounter {
    /// Open (creating if absent) the histogram stored under `base_dir/name`
    pub async fn open(base_dir: &Path, name: &str) -> Result<Self, StorageError> {
        let dir = base_dir.join(name);
        tokio::fs::create_dir_all(&dir).await?;
        let file = SlotFile::open(&dir.join(LENGTHS_FILE)).await?;
        Ok(Self { file })
    }

    pub async fn open_readonly(base_dir: &Path, name: &str) -> Result<Self, StorageError> {
        let file = SlotFile::open_readonly(&base_dir.join(name).join(LENGTHS_FILE)).await?;
        Ok(Self { file })
    }

    /// Count one `class` payload of `len` bytes
    pub async fn increment(&mut self, class: Class, len: usize) -> Result<(), StorageError> {
        if !self.file.is_writable() {
            return Err(StorageError::ReadOnly(LENGTHS_FILE.to_string()));
        }
        let offset = bucket_offset(class, length_bucket(len));
        let count = self.file.read_slot(offset).await?;
        self.file.write_slot(offset, count + 1).await
    }

    /// Count `payload` and flush
    pub async fn process_bytes(
        &mut self,
        class: Class,
        payload: &[u8],
    ) -> Result<(), StorageError> {
        self.increment(class, payload.len()).await?;
        self.file.sync().await
    }

    /// Number of `class` payloads that landed in the bucket for `len`
    pub async fn get(&mut self, class: Class, len: usize) -> Result<i64, StorageError> {
        self.file
            .read_slot(bucket_offset(class, length_bucket(len)))
            .await
    }

    /// Every bucket for `class`
    pub async fn histogram(&mut self, class: Class) -> Result<Vec<i64>, StorageError> {
        self.file
            .read_slots(bucket_offset(class, 0), LENGTH_BUCKETS)
            .await
    }
}

fn bucket_offset(class: Class, bucket: usize) -> u64 {
    let block = if class.is_allow() { 1 } else { 0 };
    ((block * LENGTH_BUCKETS + bucket) as u64) * SLOT_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_buckets_clamp() {
        assert_eq!(length_bucket(0), 0);
        assert_eq!(length_bucket(1498), 1498);
        assert_eq!(length_bucket(1499), 1499);
        assert_eq!(length_bucket(65535), 1499);
    }

    #[tokio::test]
    async fn test_counts_every_call() {
        let temp = TempDir::new().unwrap();
        let mut lengths = LengthCounter::open(temp.path(), "ds-incoming").await.unwrap();

        lengths.process_bytes(Class::Allow, b"abc").await.unwrap();
        lengths.process_bytes(Class::Allow, b"xyz").await.unwrap();
        lengths.process_bytes(Class::Block, b"xyz").await.unwrap();
        lengths.process_bytes(Class::Block, &[0u8; 4000]).await.unwrap();

        assert_eq!(lengths.get(Class::Allow, 3).await.unwrap(), 2);
        assert_eq!(lengths.get(Class::Block, 3).await.unwrap(), 1);
        assert_eq!(lengths.get(Class::Block, 1499).await.unwrap(), 1);

        let allow = lengths.histogram(Class::Allow).await.unwrap();
        assert_eq!(allow.len(), LENGTH_BUCKETS);
        assert_eq!(allow.iter().sum::<i64>(), 2);
    }

    #[tokio::test]
    async fn test_readonly_rejects_increment() {
        let temp = TempDir::new().unwrap();
        {
            let mut lengths = LengthCounter::open(temp.path(), "ds").await.unwrap();
            lengths.process_bytes(Class::Allow, b"a").await.unwrap();
        }

        let mut lengths = LengthCounter::open_readonly(temp.path(), "ds").await.unwrap();
        assert_eq!(lengths.get(Class::Allow, 1).await.unwrap(), 1);
        assert!(lengths.increment(Class::Allow, 1).await.is_err());
    }
}
