//! Index stream entries

use crate::error::StorageError;
use crate::slot::{SLOT_SIZE, decode_slots, encode_slot};

/// Size of one index entry on disk: three slots
pub const ENTRY_SIZE: u64 = SLOT_SIZE * 3;

/// Location of one record in the source stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Record index; always equals the entry's position in the index stream
    pub index: i64,
    /// Byte offset of the record in the source stream
    pub offset: i64,
    /// Record length in bytes, always positive
    pub length: i64,
}

impl IndexEntry {
    /// Encode as three consecutive slots
    pub fn encode(&self) -> [u8; ENTRY_SIZE as usize] {
        let mut buf = [0u8; ENTRY_SIZE as usize];
        buf[0..8].copy_from_slice(&encode_slot(self.index));
        buf[8..16].copy_from_slice(&encode_slot(self.offset));
        buf[16..24].copy_from_slice(&encode_slot(self.length));
        buf
    }

    /// Byte offset one past the end of this record
    pub fn end(&self) -> i64 {
        self.offset + self.length
    }
}

/// Decode and verify a buffer of complete index entries
///
/// Checks, for every position `n`, that the entry's index is `n`, its
/// length is positive and its offset follows the previous record directly.
/// `buf` must hold a whole number of entries.
pub(crate) fn verify_entries(buf: &[u8]) -> Result<Vec<IndexEntry>, StorageError> {
    debug_assert_eq!(buf.len() as u64 % ENTRY_SIZE, 0);

    let mut entries = Vec::with_capacity(buf.len() / ENTRY_SIZE as usize);
    let mut expected_offset = 0i64;

    for (position, chunk) in buf.chunks_exact(ENTRY_SIZE as usize).enumerate() {
        let position = position as i64;
        let slots = decode_slots(chunk);
        let entry = IndexEntry {
            index: slots[0],
            offset: slots[1],
            length: slots[2],
        };

        if entry.index != position {
            return Err(StorageError::verification(
                position,
                format!("index field is {}", entry.index),
            ));
        }
        if entry.length <= 0 {
            return Err(StorageError::verification(
                position,
                format!("non-positive length {}", entry.length),
            ));
        }
        if entry.offset != expected_offset {
            return Err(StorageError::verification(
                position,
                format!("offset {} but expected {}", entry.offset, expected_offset),
            ));
        }

        expected_offset = entry.end();
        entries.push(entry);
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_all(entries: &[IndexEntry]) -> Vec<u8> {
        entries.iter().flat_map(|e| e.encode()).collect()
    }

    #[test]
    fn test_verify_contiguous_entries() {
        let entries = vec![
            IndexEntry { index: 0, offset: 0, length: 3 },
            IndexEntry { index: 1, offset: 3, length: 5 },
            IndexEntry { index: 2, offset: 8, length: 1 },
        ];
        let verified = verify_entries(&encode_all(&entries)).unwrap();
        assert_eq!(verified, entries);
        assert_eq!(verified[2].end(), 9);
    }

    #[test]
    fn test_out_of_sequence_index_fails() {
        let entries = vec![
            IndexEntry { index: 0, offset: 0, length: 3 },
            IndexEntry { index: 2, offset: 3, length: 5 },
        ];
        let err = verify_entries(&encode_all(&entries)).unwrap_err();
        assert!(matches!(err, StorageError::Verification { position: 1, .. }));
    }

    #[test]
    fn test_zero_length_entry_fails() {
        let entries = vec![IndexEntry { index: 0, offset: 0, length: 0 }];
        let err = verify_entries(&encode_all(&entries)).unwrap_err();
        assert!(matches!(err, StorageError::Verification { position: 0, .. }));
    }

    #[test]
    fn test_gap_in_offsets_fails() {
        let entries = vec![
            IndexEntry { index: 0, offset: 0, length: 3 },
            IndexEntry { index: 1, offset: 4, length: 5 },
        ];
        assert!(verify_entries(&encode_all(&entries)).is_err());
    }

    #[test]
    fn test_empty_index_verifies() {
        assert!(verify_entries(&[]).unwrap().is_empty());
    }
}
