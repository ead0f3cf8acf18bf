//! Out-of-order folding of per-record length summaries
//!
//! Each stored record maps to a [`StoreData`] fragment: a length histogram
//! covering the index range `[first, last]`. Fragments may arrive in any
//! order. The [`Reconciler`] keeps one aggregate covering a gap-free range
//! starting at record 0 and parks fragments that cannot be attached yet,
//! coalescing adjacent parked fragments as they arrive.
//!
//! ```text
//! value:   [0 ........ 41]
//! pending:                   [43..44]   [47]
//! receive 42 → value [0 .. 44], pending [47]
//! ```
//!
//! The aggregate is persisted to `derived` after every fold. Parked
//! fragments are not persisted; they are rebuilt by catching up from the
//! aggregate's frontier.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, trace};

use crate::error::StorageError;
use crate::length_counter::{LENGTH_BUCKETS, length_bucket};
use crate::record_log::Record;

const DERIVED_FILE: &str = "derived";

/// Length histogram over a contiguous range of record indices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreData {
    pub first: i64,
    pub last: i64,
    pub data: Vec<i64>,
}

impl StoreData {
    /// One-record summary of `record`
    pub fn from_record(record: &Record) -> Self {
        let mut data = vec![0; LENGTH_BUCKETS];
        data[length_bucket(record.data.len())] = 1;
        Self {
            first: record.index,
            last: record.index,
            data,
        }
    }

    /// Append the directly following range `next`
    pub fn fold(&mut self, next: StoreData) {
        debug_assert_eq!(next.first, self.last + 1);
        for (sum, count) in self.data.iter_mut().zip(next.data) {
            *sum += count;
        }
        self.last = next.last;
    }

    /// Number of records summarised
    pub fn records(&self) -> i64 {
        self.last - self.first + 1
    }
}

/// What a received fragment did to the reconciler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconcile {
    /// Extended the aggregate; carries the new frontier
    Folded(i64),
    /// Parked until the gap before it closes
    Pending,
    /// Already covered by the aggregate or a parked fragment
    Duplicate,
}

/// Folds fragments into one aggregate starting at record 0
#[derive(Debug)]
pub struct Reconciler {
    path: PathBuf,
    value: Option<StoreData>,
    /// Parked fragments keyed by their first index; never overlapping
    pending: BTreeMap<i64, StoreData>,
    writable: bool,
}

impl Reconciler {
    /// Open the reconciler stored under `base_dir/name`, loading any saved aggregate
    pub async fn open(base_dir: &Path, name: &str) -> Result<Self, StorageError> {
        let dir = base_dir.join(name);
        fs::create_dir_all(&dir).await?;
        Self::load(dir.join(DERIVED_FILE), name, true).await
    }

    /// Load the saved aggregate without touching the disk
    ///
    /// A missing store yields an empty reconciler. Receiving fragments
    /// fails with [`StorageError::ReadOnly`].
    pub async fn open_readonly(base_dir: &Path, name: &str) -> Result<Self, StorageError> {
        Self::load(base_dir.join(name).join(DERIVED_FILE), name, false).await
    }

    async fn load(path: PathBuf, name: &str, writable: bool) -> Result<Self, StorageError> {
        let value = match fs::read(&path).await {
            Ok(bytes) => Some(postcard::from_bytes::<StoreData>(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        if let Some(value) = &value {
            info!(
                store = name,
                first = value.first,
                last = value.last,
                "Loaded length aggregate"
            );
        }

        Ok(Self {
            path,
            value,
            pending: BTreeMap::new(),
            writable,
        })
    }

    /// The aggregate, once record 0 has been folded
    pub fn value(&self) -> Option<&StoreData> {
        self.value.as_ref()
    }

    /// Highest index folded into the aggregate, -1 if none
    pub fn frontier(&self) -> i64 {
        self.value.as_ref().map_or(-1, |value| value.last)
    }

    /// Number of parked fragments
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Summarise and receive a freshly stored record
    pub async fn receive_record(&mut self, record: &Record) -> Result<Reconcile, StorageError> {
        self.receive(StoreData::from_record(record)).await
    }

    /// Receive a fragment, folding it into the aggregate when possible
    pub async fn receive(&mut self, fragment: StoreData) -> Result<Reconcile, StorageError> {
        if !self.writable {
            return Err(StorageError::ReadOnly(self.path.display().to_string()));
        }
        if fragment.first <= self.frontier() || self.overlaps_pending(&fragment) {
            trace!(first = fragment.first, last = fragment.last, "Duplicate fragment");
            return Ok(Reconcile::Duplicate);
        }

        if fragment.first == self.frontier() + 1 {
            match &mut self.value {
                Some(value) => value.fold(fragment),
                None => self.value = Some(fragment),
            }
            let frontier = self.fold_pending();
            self.save().await?;
            return Ok(Reconcile::Folded(frontier));
        }

        self.park(fragment);
        Ok(Reconcile::Pending)
    }

    /// Persist the aggregate
    pub async fn save(&self) -> Result<(), StorageError> {
        if !self.writable {
            return Err(StorageError::ReadOnly(self.path.display().to_string()));
        }
        let Some(value) = &self.value else {
            return Ok(());
        };
        let bytes =
            postcard::to_allocvec(value).map_err(|e| StorageError::serialization(e.to_string()))?;

        let temp_path = self.path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }

    /// Attach every parked fragment that now directly follows the aggregate
    fn fold_pending(&mut self) -> i64 {
        let Some(value) = &mut self.value else {
            return -1;
        };
        while let Some(next) = self.pending.remove(&(value.last + 1)) {
            debug!(first = next.first, last = next.last, "Folding parked fragment");
            value.fold(next);
        }
        value.last
    }

    fn overlaps_pending(&self, fragment: &StoreData) -> bool {
        self.pending
            .range(..=fragment.last)
            .next_back()
            .is_some_and(|(_, parked)| parked.last >= fragment.first)
    }

    /// Park `fragment`, merging with parked neighbours on either side
    fn park(&mut self, mut fragment: StoreData) {
        if let Some(next) = self.pending.remove(&(fragment.last + 1)) {
            fragment.fold(next);
        }

        let predecessor = self
            .pending
            .range(..fragment.first)
            .next_back()
            .filter(|(_, parked)| parked.last + 1 == fragment.first)
            .map(|(&first, _)| first);

        match predecessor.and_then(|first| self.pending.remove(&first)) {
            Some(mut merged) => {
                merged.fold(fragment);
                self.pending.insert(merged.first, merged);
            }
            None => {
                self.pending.insert(fragment.first, fragment);
            }
        }
    }
}
