//! Fixed-width integer slots
//!
//! Every integer persisted by this crate occupies one 8-byte slot holding a
//! little-endian two's-complement `i64`. Counter files are addressed by slot
//! offset and may be sparse: any slot past the end of the file reads as zero.

use std::io::SeekFrom;
use std::path::Path;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::error::StorageError;

/// Width of one slot in bytes
pub const SLOT_SIZE: u64 = 8;

/// Encode a value into a slot
pub fn encode_slot(value: i64) -> [u8; 8] {
    value.to_le_bytes()
}

/// Decode a slot
pub fn decode_slot(bytes: [u8; 8]) -> i64 {
    i64::from_le_bytes(bytes)
}

/// Decode a buffer of consecutive slots
pub fn decode_slots(buf: &[u8]) -> Vec<i64> {
    buf.chunks_exact(SLOT_SIZE as usize)
        .map(|chunk| {
            let mut slot = [0u8; 8];
            slot.copy_from_slice(chunk);
            decode_slot(slot)
        })
        .collect()
}

/// A file of 8-byte slots with positional reads and writes
#[derive(Debug)]
pub struct SlotFile {
    file: File,
    writable: bool,
}

impl SlotFile {
    /// Open (creating if absent) a slot file for reading and writing
    pub async fn open(path: &Path) -> Result<Self, StorageError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .await?;
        Ok(Self {
            file,
            writable: true,
        })
    }

    /// Open an existing slot file without write access
    pub async fn open_readonly(path: &Path) -> Result<Self, StorageError> {
        let file = File::open(path).await?;
        Ok(Self {
            file,
            writable: false,
        })
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Current file length in bytes
    pub async fn len(&self) -> Result<u64, StorageError> {
        Ok(self.file.metadata().await?.len())
    }

    /// Extend the file to `len` bytes; never shrinks it
    pub async fn ensure_len(&mut self, len: u64) -> Result<(), StorageError> {
        if self.len().await? < len {
            self.file.set_len(len).await?;
        }
        Ok(())
    }

    /// Read `count` consecutive slots starting at byte `offset`
    pub async fn read_slots(
        &mut self,
        offset: u64,
        count: usize,
    ) -> Result<Vec<i64>, StorageError> {
        let mut buf = vec![0u8; count * SLOT_SIZE as usize];
        self.file.seek(SeekFrom::Start(offset)).await?;

        let mut filled = 0;
        while filled < buf.len() {
            let n = self.file.read(&mut buf[filled..]).await?;
            if n == 0 {
                // Past the end of a sparse file; the remainder stays zero
                break;
            }
            filled += n;
        }

        Ok(decode_slots(&buf))
    }

    /// Read one slot at byte `offset`
    pub async fn read_slot(&mut self, offset: u64) -> Result<i64, StorageError> {
        let slots = self.read_slots(offset, 1).await?;
        Ok(slots[0])
    }

    /// Write one slot at byte `offset`
    pub async fn write_slot(&mut self, offset: u64, value: i64) -> Result<(), StorageError> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.write_all(&encode_slot(value)).await?;
        Ok(())
    }

    /// Flush written slots to disk
    pub async fn sync(&mut self) -> Result<(), StorageError> {
        if self.writable {
            self.file.sync_data().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_slot_encoding_is_fixed_width() {
        assert_eq!(encode_slot(-1), [0xff; 8]);
        assert_eq!(decode_slot(encode_slot(i64::MIN)), i64::MIN);
        assert_eq!(decode_slots(&[1, 0, 0, 0, 0, 0, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0]), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_sparse_reads_are_zero() {
        let temp = TempDir::new().unwrap();
        let mut file = SlotFile::open(&temp.path().join("slots")).await.unwrap();

        assert_eq!(file.read_slot(800).await.unwrap(), 0);

        file.write_slot(16, 42).await.unwrap();
        assert_eq!(file.read_slots(0, 4).await.unwrap(), vec![0, 0, 42, 0]);
        assert_eq!(file.len().await.unwrap(), 24);
    }

    #[tokio::test]
    async fn test_ensure_len_never_shrinks() {
        let temp = TempDir::new().unwrap();
        let mut file = SlotFile::open(&temp.path().join("slots")).await.unwrap();

        file.ensure_len(64).await.unwrap();
        file.ensure_len(8).await.unwrap();
        assert_eq!(file.len().await.unwrap(), 64);
    }
}
