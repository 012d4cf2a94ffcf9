//! File-based journal for persistent storage.

use crate::backend::JournalBackend;
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A file-backed journal.
///
/// Survives process restarts. The file is exclusively locked for the
/// lifetime of the journal so two queues can never interleave writes.
///
/// # Durability
///
/// - `append` calls `File::sync_data()` before returning
/// - `replace` writes a sibling temporary file, syncs it and renames it over
///   the journal
///
/// # Example
///
/// ```no_run
/// use tether_storage::{FileJournal, JournalBackend};
/// use std::path::Path;
///
/// let mut journal = FileJournal::open(Path::new("queue.journal")).unwrap();
/// journal.append(b"record").unwrap();
/// ```
#[derive(Debug)]
pub struct FileJournal {
    path: PathBuf,
    file: RwLock<File>,
    size: RwLock<u64>,
}

impl FileJournal {
    /// Opens or creates a journal at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another owner holds the journal,
    /// or an I/O error if the file cannot be opened.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = open_locked(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            size: RwLock::new(size),
        })
    }

    /// Returns the journal path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".compact");
        self.path.with_file_name(name)
    }
}

fn open_locked(path: &Path) -> StorageResult<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    file.try_lock_exclusive()
        .map_err(|_| StorageError::Locked(path.display().to_string()))?;
    Ok(file)
}

impl JournalBackend for FileJournal {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(0))?;
        let mut buffer = Vec::with_capacity(*self.size.read() as usize);
        file.read_to_end(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut file = self.file.write();
        let mut size = self.size.write();

        let offset = *size;
        if data.is_empty() {
            return Ok(offset);
        }
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.sync_data()?;
        *size += data.len() as u64;

        Ok(offset)
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        let temp = self.temp_path();
        {
            let mut staged = File::create(&temp)?;
            staged.write_all(data)?;
            staged.sync_all()?;
        }
        std::fs::rename(&temp, &self.path)?;

        // The old handle (and its lock) refers to the replaced inode.
        let reopened = open_locked(&self.path)?;
        *self.file.write() = reopened;
        *self.size.write() = data.len() as u64;
        tracing::debug!(path = %self.path.display(), bytes = data.len(), "journal replaced");
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let file = self.file.write();
        let mut size = self.size.write();

        if new_size > *size {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("cannot truncate to {new_size}, journal is {} bytes", *size),
            )));
        }

        file.set_len(new_size)?;
        file.sync_all()?;
        *size = new_size;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }
}
