//! Positional byte-frequency model
//!
//! For every byte position of a payload (up to [`POSITIONS`]) and every value
//! of the byte before it, counts how often each following byte value occurs.
//! The greedy [`ByteFrequencyTable::extract`] walk then recovers the longest
//! prefix whose every byte is a strict majority given the byte chosen before
//! it.
//!
//! ## File Format
//!
//! ```text
//! [last processed index:8][count(0,0,0):8][count(0,0,1):8]...[count(1499,255,255):8]
//! ```
//!
//! The file is extended to full size (sparse) the first time it is created.

use std::path::Path;

use tracing::{debug, info, trace, warn};

use crate::error::StorageError;
use crate::record_log::Record;
use crate::slot::{SLOT_SIZE, SlotFile};

/// Number of tracked byte positions
pub const POSITIONS: usize = 1500;

/// Minimum frequency, in percent, a byte must strictly exceed to be extracted
pub const MAJORITY_PERCENT: i64 = 50;

const BYTEMAP_FILE: &str = "bytemap";
const HEADER_SIZE: u64 = SLOT_SIZE;
const ROW_SIZE: u64 = 256 * SLOT_SIZE;
const BLOCK_SIZE: u64 = 256 * ROW_SIZE;
const FILE_SIZE: u64 = HEADER_SIZE + POSITIONS as u64 * BLOCK_SIZE;

/// Counter grid of `count[position][prev][current]`
#[derive(Debug)]
pub struct ByteFrequencyTable {
    file: SlotFile,
    /// Index of the last record folded into the table, -1 if none
    last_processed: i64,
}

impl ByteFrequencyTable {
    /// Open (creating if absent) the table stored under `base_dir/name`
    pub async fn open(base_dir: &Path, name: &str) -> Result<Self, StorageError> {
        let dir = base_dir.join(name);
        tokio::fs::create_dir_all(&dir).await?;

        let mut file = SlotFile::open(&dir.join(BYTEMAP_FILE)).await?;
        if file.len().await? == 0 {
            info!(store = name, "Allocating byte frequency table");
            file.write_slot(0, -1).await?;
            file.ensure_len(FILE_SIZE).await?;
            file.sync().await?;
        }

        let last_processed = file.read_slot(0).await?;
        debug!(store = name, last_processed, "Opened byte frequency table");

        Ok(Self {
            file,
            last_processed,
        })
    }

    /// Open an existing table for inspection only
    pub async fn open_readonly(base_dir: &Path, name: &str) -> Result<Self, StorageError> {
        let mut file = SlotFile::open_readonly(&base_dir.join(name).join(BYTEMAP_FILE)).await?;
        let last_processed = file.read_slot(0).await?;
        Ok(Self {
            file,
            last_processed,
        })
    }

    /// Index of the last record folded into the table, -1 if none
    pub fn last_processed_index(&self) -> i64 {
        self.last_processed
    }

    /// Read one cell
    pub async fn get_count(
        &mut self,
        position: usize,
        prev: u8,
        current: u8,
    ) -> Result<i64, StorageError> {
        let offset = cell_offset(position, prev, current)?;
        self.file.read_slot(offset).await
    }

    /// Add one to a cell
    pub async fn increment_count(
        &mut self,
        position: usize,
        prev: u8,
        current: u8,
    ) -> Result<(), StorageError> {
        self.ensure_writable()?;
        let offset = cell_offset(position, prev, current)?;
        let value = self.file.read_slot(offset).await?;
        self.file.write_slot(offset, value + 1).await
    }

    /// All 256 counts following `prev` at `position`
    pub async fn row(&mut self, position: usize, prev: u8) -> Result<Vec<i64>, StorageError> {
        let offset = cell_offset(position, prev, 0)?;
        self.file.read_slots(offset, 256).await
    }

    /// The most frequent byte after `prev` at `position` and its count
    ///
    /// Returns `None` when every count is zero. Ties go to the lowest byte.
    pub async fn get_max(
        &mut self,
        position: usize,
        prev: u8,
    ) -> Result<Option<(u8, i64)>, StorageError> {
        let row = self.row(position, prev).await?;
        Ok(row_max(&row))
    }

    /// Sum of all counts after `prev` at `position`
    pub async fn get_total(&mut self, position: usize, prev: u8) -> Result<i64, StorageError> {
        Ok(self.row(position, prev).await?.iter().sum())
    }

    /// Greedily extract the longest majority byte sequence
    ///
    /// Starting at position 0 with `prev = 0`, appends the most frequent next
    /// byte while its share of the cell strictly exceeds
    /// [`MAJORITY_PERCENT`], then continues from it at the next position.
    pub async fn extract(&mut self) -> Result<Vec<u8>, StorageError> {
        let mut result = Vec::new();
        let mut prev = 0u8;

        for position in 0..POSITIONS {
            let row = self.row(position, prev).await?;
            let Some((next, count)) = row_max(&row) else {
                break;
            };
            let total: i64 = row.iter().sum();
            let frequency = count * 100 / total;
            if frequency <= MAJORITY_PERCENT {
                break;
            }

            trace!(position, prev, next, frequency, "Extracting byte");
            result.push(next);
            prev = next;
        }

        Ok(result)
    }

    /// Fold a record into the table if it is the next one in sequence
    ///
    /// A record whose index is not exactly one past the last processed index
    /// is logged and skipped without touching the table. Returns whether the
    /// record was applied.
    pub async fn process_bytes(&mut self, record: &Record) -> Result<bool, StorageError> {
        let expected = self.last_processed + 1;
        if record.index != expected {
            warn!(
                index = record.index,
                expected, "Rejecting out-of-order record"
            );
            return Ok(false);
        }

        self.apply(record).await?;
        Ok(true)
    }

    /// Fold a record into the table without the ordering check
    ///
    /// Only for one-shot rebuilds: applying a record twice counts it twice.
    pub async fn force_process_bytes(&mut self, record: &Record) -> Result<(), StorageError> {
        self.apply(record).await
    }

    /// Flush the table to disk
    pub async fn save(&mut self) -> Result<(), StorageError> {
        self.file.sync().await
    }

    async fn apply(&mut self, record: &Record) -> Result<(), StorageError> {
        self.ensure_writable()?;

        let mut prev = 0u8;
        for (position, &current) in record.data.iter().take(POSITIONS).enumerate() {
            self.increment_count(position, prev, current).await?;
            prev = current;
        }

        self.file.write_slot(0, record.index).await?;
        self.file.sync().await?;
        self.last_processed = record.index;
        Ok(())
    }

    fn ensure_writable(&self) -> Result<(), StorageError> {
        if self.file.is_writable() {
            Ok(())
        } else {
            Err(StorageError::ReadOnly(BYTEMAP_FILE.to_string()))
        }
    }
}

fn cell_offset(position: usize, prev: u8, current: u8) -> Result<u64, StorageError> {
    if position >= POSITIONS {
        return Err(StorageError::PositionOutOfRange(position));
    }
    Ok(HEADER_SIZE
        + BLOCK_SIZE * position as u64
        + ROW_SIZE * prev as u64
        + SLOT_SIZE * current as u64)
}

fn row_max(row: &[i64]) -> Option<(u8, i64)> {
    let mut best: Option<(u8, i64)> = None;
    for (value, &count) in row.iter().enumerate() {
        if count > 0 && best.is_none_or(|(_, max)| count > max) {
            best = Some((value as u8, count));
        }
    }
    best
}
