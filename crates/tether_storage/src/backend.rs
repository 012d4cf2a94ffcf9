//! Journal backend trait definition.

use crate::error::StorageResult;

/// A durable, append-only byte journal.
///
/// # Invariants
///
/// - `append` writes at the end and returns the offset of the written bytes
/// - Data is durable once `append` returns successfully
/// - `read_all` returns every byte appended since the last `replace`
/// - `replace` is atomic: readers see either the old or the new contents
/// - Backends must be `Send + Sync`
///
/// # Implementors
///
/// - [`super::MemoryJournal`] - For testing
/// - [`super::FileJournal`] - For persistent storage
pub trait JournalBackend: Send + Sync {
    /// Reads the whole journal.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn read_all(&self) -> StorageResult<Vec<u8>>;

    /// Appends data durably and returns the offset it was written at.
    ///
    /// # Errors
    ///
    /// Returns an error if the write or the durability sync fails.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Atomically replaces the journal contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the new contents cannot be made durable; the old
    /// contents are then left untouched.
    fn replace(&mut self, data: &[u8]) -> StorageResult<()>;

    /// Truncates the journal to `new_size` bytes (drops a torn tail).
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is beyond the current size or the
    /// truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Returns the current size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;
}
