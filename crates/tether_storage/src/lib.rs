//! # Tether Storage
//!
//! Durable journal backends for the Tether mutation queue.
//!
//! Journals are **append-only byte logs**. Backends do not interpret what
//! they store; the queue owns the record format and writes CRC-checked
//! frames produced by [`encode_frame`].
//!
//! ## Design Principles
//!
//! - Appends are durable once `append` returns
//! - `replace` swaps the whole journal atomically (used for compaction)
//! - A torn tail from a crash mid-append is detectable with [`scan_frames`],
//!   which also skips damaged frames that valid frames follow
//! - Must be `Send + Sync`; only one queue may own a file journal at a time
//!
//! ## Available Backends
//!
//! - [`MemoryJournal`] - For testing; clones share the same bytes so a
//!   "reload" can be simulated by reopening a clone
//! - [`FileJournal`] - For persistent storage, exclusively locked
//!
//! ## Example
//!
//! ```rust
//! use tether_storage::{encode_frame, scan_frames, JournalBackend, MemoryJournal};
//!
//! let mut journal = MemoryJournal::new();
//! journal.append(&encode_frame(b"hello")).unwrap();
//! let scan = scan_frames(&journal.read_all().unwrap());
//! assert_eq!(scan.frames[0].payload, b"hello");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod frame;
mod memory;

pub use backend::JournalBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileJournal;
pub use frame::{
    compute_crc32, encode_frame, scan_frames, Frame, FrameDamage, FrameScan, SkippedRegion,
    FRAME_HEADER_SIZE, FRAME_MAGIC,
};
pub use memory::MemoryJournal;
