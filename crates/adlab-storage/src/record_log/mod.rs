//! Append-only record log
//!
//! Stores opaque, non-empty byte records, each retrievable by a dense
//! zero-based index. Records are immutable once written and are never
//! deleted.
//!
//! ## Storage Format
//!
//! Each log is a directory holding two streams:
//!
//! ```text
//! source: [record 0 bytes][record 1 bytes][record 2 bytes]...
//! index:  [index:8][offset:8][length:8][index:8][offset:8][length:8]...
//! ```
//!
//! Every index field is a fixed 8-byte slot (see [`crate::slot`]). Entry `n`
//! always carries `index == n`, and its offset is the sum of all previous
//! lengths, so the source stream is packed contiguously.
//!
//! ## Recovery
//!
//! Opening a log verifies the whole index stream. A trailing partial entry
//! (an interrupted index write) is truncated away, as are source bytes past
//! the last indexed record (an interrupted data write). Any other
//! inconsistency is a verification failure and the log refuses to open.

mod index;
mod log;

pub use index::{ENTRY_SIZE, IndexEntry};
pub use log::{Record, RecordCursor, RecordLog, RecordLogConfig};
