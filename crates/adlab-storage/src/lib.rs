//! # Adlab Storage
//!
//! Durable record logs and the online statistics learned from them.
//!
//! ## Features
//!
//! - **RecordLog**: append-only log of non-empty byte records with
//!   verification and crash recovery on open
//! - **ByteFrequencyTable**: positional byte-frequency model with greedy
//!   majority-sequence extraction
//! - **SequenceIndex / OffsetSequenceCounter**: content-addressed prefixes
//!   with per-class counts and best-rule tracking
//! - **RuleCandidate**: allow-rate versus block-rate scoring
//! - **Reconciler**: out-of-order folding of per-record length summaries
//! - **StoreRegistry**: one open log handle per store name
//!
//! ## Example
//!
//! ```rust,ignore
//! use adlab_storage::{RecordLog, RecordLogConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let log = RecordLog::open("tls-incoming", RecordLogConfig::with_base_dir("./store"))
//!         .await
//!         .unwrap();
//!
//!     let index = log.add(b"\x16\x03\x01").await.unwrap();
//!     let record = log.get_record(index).await.unwrap();
//!     assert_eq!(&record.data[..], b"\x16\x03\x01");
//! }
//! ```

pub mod byte_table;
pub mod count_table;
pub mod error;
pub mod length_counter;
pub mod offset_counter;
pub mod reconciler;
pub mod record_log;
pub mod registry;
pub mod rule_candidate;
pub mod sequence_index;
pub mod slot;

// Re-exports
pub use byte_table::{ByteFrequencyTable, POSITIONS};
pub use count_table::CountTable;
pub use error::StorageError;
pub use length_counter::{LENGTH_BUCKETS, LengthCounter};
pub use offset_counter::{
    OffsetSequenceCounter, decode_offset_sequence, encode_offset_sequence,
    offsets_sequence_store_name,
};
pub use reconciler::{Reconcile, Reconciler, StoreData};
pub use record_log::{Record, RecordCursor, RecordLog, RecordLogConfig};
pub use registry::StoreRegistry;
pub use rule_candidate::{MIN_SAMPLES, RuleCandidate};
pub use sequence_index::{SequenceCounter, SequenceIndex};
