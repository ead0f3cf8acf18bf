//! Record log implementation
//!
//! Provides per-dataset append-only record logs with verified recovery.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use bytes::Bytes;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, info, instrument, warn};

use super::index::{ENTRY_SIZE, IndexEntry, verify_entries};
use crate::error::StorageError;

const SOURCE_FILE: &str = "source";
const INDEX_FILE: &str = "index";

/// Configuration for record logs
#[derive(Debug, Clone)]
pub struct RecordLogConfig {
    /// Base directory; each log lives in its own subdirectory
    pub base_dir: PathBuf,
    /// Whether to sync both streams to disk before `add` returns
    pub sync_on_write: bool,
}

impl Default for RecordLogConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./store"),
            sync_on_write: true,
        }
    }
}

impl RecordLogConfig {
    /// Create a configuration rooted at `base_dir`
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }
}

/// One stored record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Dense zero-based index of the record
    pub index: i64,
    /// Record payload, never empty
    pub data: Bytes,
}

/// Write handles, present only while the log is open for writing
struct Writer {
    source: File,
    index: File,
    /// Logical end of the source stream, tracked in memory
    data_end: u64,
}

/// Append-only store of non-empty byte records
///
/// `add` is serialized internally, but callers are still expected to funnel
/// all writes for one log through a single owner.
pub struct RecordLog {
    /// Name of this log (its directory under the base dir)
    name: String,
    /// Directory holding both streams
    dir: PathBuf,
    /// Configuration
    config: RecordLogConfig,
    /// Write handles; `None` for read-only or closed logs
    writer: Mutex<Option<Writer>>,
    /// Read handle on the source stream
    reader: Mutex<File>,
    /// Verified index entries
    entries: RwLock<Vec<IndexEntry>>,
    /// Highest durable index, -1 when empty
    last: AtomicI64,
}

impl std::fmt::Debug for RecordLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordLog")
            .field("name", &self.name)
            .field("dir", &self.dir)
            .field("last", &self.last_index())
            .finish()
    }
}

impl RecordLog {
    /// Open a log for reading and writing, creating it if absent
    ///
    /// Verifies the index stream and repairs interrupted appends.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Verification`] if the index stream contains an
    /// out-of-sequence or inconsistent entry, or if the source stream is
    /// shorter than the index claims.
    #[instrument(skip(config), fields(base_dir = %config.base_dir.display()))]
    pub async fn open(name: &str, config: RecordLogConfig) -> Result<Self, StorageError> {
        let dir = config.base_dir.join(name);
        tokio::fs::create_dir_all(&dir).await?;

        let mut index = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(INDEX_FILE))
            .await?;
        let mut source = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(SOURCE_FILE))
            .await?;

        let index_len = index.metadata().await?.len();
        let complete_len = index_len - index_len % ENTRY_SIZE;
        if complete_len != index_len {
            warn!(
                store = name,
                length = index_len,
                truncated = complete_len,
                "Truncating incomplete index entry"
            );
            index.set_len(complete_len).await?;
            index.sync_all().await?;
        }

        let entries = read_entries(&mut index, complete_len).await?;
        let data_end = entries.last().map(|e| e.end() as u64).unwrap_or(0);

        let source_len = source.metadata().await?.len();
        if source_len < data_end {
            return Err(StorageError::verification(
                entries.len() as i64 - 1,
                format!("source stream holds {source_len} bytes, index claims {data_end}"),
            ));
        }
        if source_len > data_end {
            warn!(
                store = name,
                length = source_len,
                truncated = data_end,
                "Truncating unindexed source bytes"
            );
            source.set_len(data_end).await?;
            source.sync_all().await?;
        }

        index.seek(SeekFrom::Start(complete_len)).await?;
        source.seek(SeekFrom::Start(data_end)).await?;

        let reader = File::open(dir.join(SOURCE_FILE)).await?;
        let last = entries.len() as i64 - 1;

        info!(store = name, last_index = last, "Opened record log");

        Ok(Self {
            name: name.to_string(),
            dir,
            config,
            writer: Mutex::new(Some(Writer {
                source,
                index,
                data_end,
            })),
            reader: Mutex::new(reader),
            entries: RwLock::new(entries),
            last: AtomicI64::new(last),
        })
    }

    /// Open an existing log for reading only
    ///
    /// Nothing on disk is modified: a trailing partial index entry is
    /// ignored rather than truncated.
    #[instrument(skip(config), fields(base_dir = %config.base_dir.display()))]
    pub async fn open_readonly(name: &str, config: RecordLogConfig) -> Result<Self, StorageError> {
        let dir = config.base_dir.join(name);

        let mut index = File::open(dir.join(INDEX_FILE)).await?;
        let index_len = index.metadata().await?.len();
        let complete_len = index_len - index_len % ENTRY_SIZE;
        let entries = read_entries(&mut index, complete_len).await?;

        let reader = File::open(dir.join(SOURCE_FILE)).await?;
        let source_len = reader.metadata().await?.len();
        let data_end = entries.last().map(|e| e.end() as u64).unwrap_or(0);
        if source_len < data_end {
            return Err(StorageError::verification(
                entries.len() as i64 - 1,
                format!("source stream holds {source_len} bytes, index claims {data_end}"),
            ));
        }

        let last = entries.len() as i64 - 1;
        debug!(store = name, last_index = last, "Opened read-only record log");

        Ok(Self {
            name: name.to_string(),
            dir,
            config,
            writer: Mutex::new(None),
            reader: Mutex::new(reader),
            entries: RwLock::new(entries),
            last: AtomicI64::new(last),
        })
    }

    /// Append a record and return its index
    ///
    /// Writes the payload at the logical end of the source stream, then its
    /// index entry, syncing both before returning when `sync_on_write` is set.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::EmptyPayload`] for zero-length data; nothing is
    /// written in that case.
    #[instrument(skip(self, data), fields(store = %self.name, len = data.len()))]
    pub async fn add(&self, data: &[u8]) -> Result<i64, StorageError> {
        if data.is_empty() {
            warn!("Rejecting zero-length record");
            return Err(StorageError::EmptyPayload);
        }

        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| StorageError::ReadOnly(self.name.clone()))?;

        let index = self.last.load(Ordering::SeqCst) + 1;
        let entry = IndexEntry {
            index,
            offset: writer.data_end as i64,
            length: data.len() as i64,
        };

        writer
            .source
            .seek(SeekFrom::Start(writer.data_end))
            .await?;
        writer.source.write_all(data).await?;
        if self.config.sync_on_write {
            writer.source.sync_data().await?;
        }

        writer
            .index
            .seek(SeekFrom::Start(index as u64 * ENTRY_SIZE))
            .await?;
        writer.index.write_all(&entry.encode()).await?;
        if self.config.sync_on_write {
            writer.index.sync_data().await?;
        }

        writer.data_end += data.len() as u64;
        self.entries.write().await.push(entry);
        self.last.store(index, Ordering::SeqCst);

        debug!(index, "Appended record");
        Ok(index)
    }

    /// Read the record at `index`
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::OutOfRange`] past the end of the log and
    /// [`StorageError::CorruptRead`] if the source stream yields fewer bytes
    /// than the index entry promises.
    pub async fn get_record(&self, index: i64) -> Result<Record, StorageError> {
        let entry = {
            let entries = self.entries.read().await;
            match usize::try_from(index).ok().and_then(|i| entries.get(i)) {
                Some(entry) => *entry,
                None => {
                    return Err(StorageError::OutOfRange {
                        index,
                        last: self.last_index(),
                    });
                }
            }
        };

        let expected = entry.length as u64;
        let mut buf = vec![0u8; entry.length as usize];
        let mut filled = 0;
        {
            let mut reader = self.reader.lock().await;
            reader.seek(SeekFrom::Start(entry.offset as u64)).await?;
            while filled < buf.len() {
                let n = reader.read(&mut buf[filled..]).await?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
        }

        if filled as u64 != expected {
            warn!(store = %self.name, index, expected, actual = filled, "Short record read");
            return Err(StorageError::CorruptRead {
                index,
                expected,
                actual: filled as u64,
            });
        }

        Ok(Record {
            index,
            data: Bytes::from(buf),
        })
    }

    /// Highest durable index, `-1` if the log is empty
    pub fn last_index(&self) -> i64 {
        self.last.load(Ordering::SeqCst)
    }

    /// Number of records in the log
    pub fn len(&self) -> usize {
        (self.last_index() + 1) as usize
    }

    /// Check if the log holds no records
    pub fn is_empty(&self) -> bool {
        self.last_index() < 0
    }

    /// Name of this log
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory holding this log's streams
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Re-run verification against the index stream on disk
    ///
    /// Returns the highest verified index.
    pub async fn verify(&self) -> Result<i64, StorageError> {
        let mut index = File::open(self.dir.join(INDEX_FILE)).await?;
        let len = index.metadata().await?.len();
        let entries = read_entries(&mut index, len - len % ENTRY_SIZE).await?;
        Ok(entries.len() as i64 - 1)
    }

    /// Iterate records with index in `(from_index, last_index()]`
    ///
    /// The upper bound is fixed when the cursor is created.
    pub fn cursor(&self, from_index: i64) -> RecordCursor<'_> {
        RecordCursor {
            log: self,
            next: from_index.max(-1) + 1,
            end: self.last_index(),
        }
    }

    /// Call `visit` for every record after `from_index`, in index order
    ///
    /// Records that fail to read are logged and skipped. Returns the number
    /// of records visited.
    pub async fn blocking_from_index_do<F>(&self, from_index: i64, mut visit: F) -> usize
    where
        F: FnMut(Record),
    {
        let mut cursor = self.cursor(from_index);
        let mut visited = 0;
        while let Some(record) = cursor.next().await {
            visit(record);
            visited += 1;
        }
        visited
    }

    /// Send every record after `from_index` down `channel`, in index order
    ///
    /// Stops early if the receiver is dropped. Returns the number of
    /// records sent.
    pub async fn from_index_do(&self, from_index: i64, channel: mpsc::Sender<Record>) -> usize {
        let mut cursor = self.cursor(from_index);
        let mut sent = 0;
        while let Some(record) = cursor.next().await {
            if channel.send(record).await.is_err() {
                debug!(store = %self.name, "Record receiver closed");
                break;
            }
            sent += 1;
        }
        sent
    }

    /// Sync and release the write handles
    pub async fn close(&self) -> Result<(), StorageError> {
        let mut guard = self.writer.lock().await;
        if let Some(writer) = guard.take() {
            writer.source.sync_all().await?;
            writer.index.sync_all().await?;
            debug!(store = %self.name, "Closed record log");
        }
        Ok(())
    }
}

/// Ordered traversal over a range of a [`RecordLog`]
pub struct RecordCursor<'a> {
    log: &'a RecordLog,
    next: i64,
    end: i64,
}

impl RecordCursor<'_> {
    /// Next readable record, skipping (and logging) unreadable ones
    pub async fn next(&mut self) -> Option<Record> {
        while self.next <= self.end {
            let index = self.next;
            self.next += 1;
            match self.log.get_record(index).await {
                Ok(record) => return Some(record),
                Err(e) => {
                    warn!(store = %self.log.name, index, error = %e, "Skipping unreadable record");
                }
            }
        }
        None
    }
}

/// Read and verify `len` bytes of index entries from the start of `index`
async fn read_entries(index: &mut File, len: u64) -> Result<Vec<IndexEntry>, StorageError> {
    let mut buf = vec![0u8; len as usize];
    index.seek(SeekFrom::Start(0)).await?;
    index.read_exact(&mut buf).await?;
    verify_entries(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_log() -> (RecordLog, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = RecordLogConfig::with_base_dir(temp_dir.path());
        let log = RecordLog::open("test", config).await.unwrap();
        (log, temp_dir)
    }

    #[tokio::test]
    async fn test_add_and_get() {
        let (log, _temp) = create_test_log().await;
        assert_eq!(log.last_index(), -1);
        assert!(log.is_empty());

        let index = log.add(b"hello").await.unwrap();
        assert_eq!(index, 0);

        let record = log.get_record(0).await.unwrap();
        assert_eq!(record.index, 0);
        assert_eq!(&record.data[..], b"hello");
    }

    #[tokio::test]
    async fn test_multiple_records() {
        let (log, _temp) = create_test_log().await;

        for i in 0..10u8 {
            let data = vec![i; i as usize + 1];
            assert_eq!(log.add(&data).await.unwrap(), i as i64);
        }

        assert_eq!(log.last_index(), 9);
        assert_eq!(log.len(), 10);
        assert_eq!(&log.get_record(4).await.unwrap().data[..], &[4u8; 5]);
        assert_eq!(log.verify().await.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_empty_payload_rejected() {
        let (log, _temp) = create_test_log().await;

        let err = log.add(&[]).await.unwrap_err();
        assert!(matches!(err, StorageError::EmptyPayload));
        assert_eq!(log.last_index(), -1);
    }

    #[tokio::test]
    async fn test_out_of_range() {
        let (log, _temp) = create_test_log().await;
        log.add(b"x").await.unwrap();

        let err = log.get_record(1).await.unwrap_err();
        assert!(matches!(err, StorageError::OutOfRange { index: 1, last: 0 }));
        assert!(log.get_record(-1).await.is_err());
    }

    #[tokio::test]
    async fn test_blocking_from_index_do() {
        let (log, _temp) = create_test_log().await;
        for i in 0..5u8 {
            log.add(&[i]).await.unwrap();
        }

        let mut seen = Vec::new();
        let visited = log
            .blocking_from_index_do(1, |record| seen.push(record.index))
            .await;
        assert_eq!(visited, 3);
        assert_eq!(seen, vec![2, 3, 4]);

        let mut all = Vec::new();
        log.blocking_from_index_do(-1, |record| all.push(record.data[0]))
            .await;
        assert_eq!(all, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_from_index_do_channel() {
        let (log, _temp) = create_test_log().await;
        for i in 0..3u8 {
            log.add(&[i, i]).await.unwrap();
        }

        let (tx, mut rx) = mpsc::channel(8);
        let sent = log.from_index_do(0, tx).await;
        assert_eq!(sent, 2);
        assert_eq!(rx.recv().await.unwrap().index, 1);
        assert_eq!(rx.recv().await.unwrap().index, 2);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_readonly_rejects_writes() {
        let temp_dir = TempDir::new().unwrap();
        let config = RecordLogConfig::with_base_dir(temp_dir.path());
        {
            let log = RecordLog::open("ro", config.clone()).await.unwrap();
            log.add(b"abc").await.unwrap();
            log.close().await.unwrap();
        }

        let log = RecordLog::open_readonly("ro", config).await.unwrap();
        assert_eq!(log.last_index(), 0);
        assert_eq!(&log.get_record(0).await.unwrap().data[..], b"abc");
        assert!(matches!(
            log.add(b"def").await.unwrap_err(),
            StorageError::ReadOnly(_)
        ));
    }

    #[tokio::test]
    async fn test_persistence_and_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let config = RecordLogConfig::with_base_dir(temp_dir.path());

        {
            let log = RecordLog::open("persist", config.clone()).await.unwrap();
            for i in 0..5u8 {
                log.add(&[i; 3]).await.unwrap();
            }
            log.close().await.unwrap();
        }

        let log = RecordLog::open("persist", config).await.unwrap();
        assert_eq!(log.last_index(), 4);
        assert_eq!(log.add(b"next").await.unwrap(), 5);
        assert_eq!(&log.get_record(2).await.unwrap().data[..], &[2u8; 3]);
        assert_eq!(&log.get_record(5).await.unwrap().data[..], b"next");
    }
}
