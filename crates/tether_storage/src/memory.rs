//! In-memory journal for testing.

use crate::backend::JournalBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// An in-memory journal.
///
/// Clones share the same bytes, which lets tests simulate a reload: drop the
/// queue, then open a new one over a clone of the same journal.
///
/// # Example
///
/// ```rust
/// use tether_storage::{JournalBackend, MemoryJournal};
///
/// let mut journal = MemoryJournal::new();
/// let reopened = journal.clone();
/// journal.append(b"data").unwrap();
/// assert_eq!(reopened.read_all().unwrap(), b"data");
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryJournal {
    data: Arc<RwLock<Vec<u8>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryJournal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a journal with pre-existing bytes (recovery tests).
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns a copy of the journal bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Makes every subsequent write fail, simulating a full or revoked store.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StorageError::NotWritable("memory journal write failure".into()))
        } else {
            Ok(())
        }
    }
}

impl JournalBackend for MemoryJournal {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        Ok(self.data.read().clone())
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        self.check_writable()?;
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn replace(&mut self, bytes: &[u8]) -> StorageResult<()> {
        self.check_writable()?;
        *self.data.write() = bytes.to_vec();
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.check_writable()?;
        let mut data = self.data.write();
        let current = data.len() as u64;
        if new_size > current {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("cannot truncate to {new_size}, journal is {current} bytes"),
            )));
        }
        data.truncate(new_size as usize);
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }
}
