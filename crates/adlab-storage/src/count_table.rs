//! Per-class counters with a progress header
//!
//! ## File Format
//!
//! ```text
//! [progress(block):8][progress(allow):8][total(block):8][total(allow):8]
//! [count(0, block):8][count(0, allow):8][count(1, block):8][count(1, allow):8]...
//! ```
//!
//! Counts are addressed by sequence identity. The file grows as identities
//! are first written; unwritten counts read as zero.

use std::path::Path;

use adlab_core::Class;
use tracing::debug;

use crate::error::StorageError;
use crate::rule_candidate::RuleCandidate;
use crate::slot::{SLOT_SIZE, SlotFile};

const COUNTMAP_FILE: &str = "countmap";
const CELL_SIZE: u64 = SLOT_SIZE * 2;
const HEADER_SIZE: u64 = CELL_SIZE * 2;

const PROGRESS_HEADER: u64 = 0;
const TOTAL_HEADER: u64 = 1;

/// Allow/block counts per sequence identity plus per-class totals
#[derive(Debug)]
pub struct CountTable {
    file: SlotFile,
}

impl CountTable {
    /// Open (creating if absent) the table in `dir`
    pub async fn open(dir: &Path) -> Result<Self, StorageError> {
        tokio::fs::create_dir_all(dir).await?;
        let mut file = SlotFile::open(&dir.join(COUNTMAP_FILE)).await?;

        if file.len().await? == 0 {
            for class in [Class::Block, Class::Allow] {
                file.write_slot(header_offset(PROGRESS_HEADER, class), -1).await?;
                file.write_slot(header_offset(TOTAL_HEADER, class), 0).await?;
            }
            file.sync().await?;
            debug!(dir = %dir.display(), "Created count table");
        }

        Ok(Self { file })
    }

    /// Count of `class` observations for sequence `id`
    pub async fn get_count(&mut self, id: i64, class: Class) -> Result<i64, StorageError> {
        self.file.read_slot(count_offset(id, class)).await
    }

    /// Total `class` observations across all sequences
    pub async fn get_total(&mut self, class: Class) -> Result<i64, StorageError> {
        self.file.read_slot(header_offset(TOTAL_HEADER, class)).await
    }

    /// Count one `class` observation of `id`, updating the class total
    pub async fn increment(&mut self, id: i64, class: Class) -> Result<(), StorageError> {
        let offset = count_offset(id, class);
        let count = self.file.read_slot(offset).await?;
        self.file.write_slot(offset, count + 1).await?;

        let offset = header_offset(TOTAL_HEADER, class);
        let total = self.file.read_slot(offset).await?;
        self.file.write_slot(offset, total + 1).await
    }

    /// Last record index of `class` folded into the table, -1 if none
    pub async fn progress(&mut self, class: Class) -> Result<i64, StorageError> {
        self.file.read_slot(header_offset(PROGRESS_HEADER, class)).await
    }

    pub async fn set_progress(&mut self, class: Class, index: i64) -> Result<(), StorageError> {
        self.file
            .write_slot(header_offset(PROGRESS_HEADER, class), index)
            .await
    }

    /// Current counters for `id` as a scorable candidate
    pub async fn candidate(&mut self, id: i64) -> Result<RuleCandidate, StorageError> {
        Ok(RuleCandidate {
            index: id,
            allow_count: self.get_count(id, Class::Allow).await?,
            allow_total: self.get_total(Class::Allow).await?,
            block_count: self.get_count(id, Class::Block).await?,
            block_total: self.get_total(Class::Block).await?,
        })
    }

    pub async fn save(&mut self) -> Result<(), StorageError> {
        self.file.sync().await
    }
}

fn class_slot(class: Class) -> u64 {
    if class.is_allow() { SLOT_SIZE } else { 0 }
}

fn header_offset(header: u64, class: Class) -> u64 {
    header * CELL_SIZE + class_slot(class)
}

fn count_offset(id: i64, class: Class) -> u64 {
    HEADER_SIZE + id as u64 * CELL_SIZE + class_slot(class)
}
