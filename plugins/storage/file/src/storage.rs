use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use krake_api::{SegmentStorage, StorageError};

// ════════════════════════════════════════════════════════════════
//  FileStorage
// ════════════════════════════════════════════════════════════════

/// One segment backed by one file on disk.
pub struct FileStorage {
    path: PathBuf,
    file: Mutex<File>,
    capacity: u64,
    sync_writes: bool,
}

impl FileStorage {
    /// Create (or truncate) the segment file at `path`.
    pub fn create(
        path: &Path,
        capacity: u64,
        preallocate: bool,
        sync_writes: bool,
    ) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::unavailable(format!("mkdir {}: {e}", parent.display())))?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| StorageError::unavailable(format!("open {}: {e}", path.display())))?;

        if preallocate {
            file.set_len(capacity)
                .map_err(|e| StorageError::unavailable(format!("allocate {}: {e}", path.display())))?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            capacity,
            sync_writes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, File>, StorageError> {
        self.file
            .lock()
            .map_err(|_| StorageError::unavailable(format!("{}: file lock poisoned", self.path.display())))
    }
}

impl SegmentStorage for FileStorage {
    fn write_at(&self, position: u64, data: &[u8]) -> Result<(), StorageError> {
        let end = position + data.len() as u64;
        if end > self.capacity {
            return Err(StorageError::out_of_bounds(format!(
                "{}: write {}..{end} exceeds capacity {}",
                self.path.display(),
                position,
                self.capacity
            )));
        }

        let mut f = self.lock()?;
        f.seek(SeekFrom::Start(position))
            .map_err(|e| StorageError::io(format!("seek: {e}")))?;
        f.write_all(data)
            .map_err(|e| StorageError::io(format!("write {}: {e}", self.path.display())))?;
        if self.sync_writes {
            f.sync_data()
                .map_err(|e| StorageError::io(format!("fsync {}: {e}", self.path.display())))?;
        }
        Ok(())
    }

    fn read_at(&self, position: u64, len: usize) -> Result<Vec<u8>, StorageError> {
        if position >= self.capacity {
            return Ok(Vec::new());
        }
        let len = len.min((self.capacity - position) as usize);

        let mut f = self.lock()?;
        f.seek(SeekFrom::Start(position))
            .map_err(|e| StorageError::io(format!("seek: {e}")))?;
        let mut buf = Vec::with_capacity(len);
        (&mut *f)
            .take(len as u64)
            .read_to_end(&mut buf)
            .map_err(|e| StorageError::io(format!("read {}: {e}", self.path.display())))?;
        Ok(buf)
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn flush(&self) -> Result<(), StorageError> {
        let f = self.lock()?;
        f.sync_data()
            .map_err(|e| StorageError::io(format!("fsync {}: {e}", self.path.display())))
    }

    fn close(&self) -> Result<(), StorageError> {
        let f = self.lock()?;
        f.sync_all()
            .map_err(|e| StorageError::io(format!("fsync {}: {e}", self.path.display())))?;
        tracing::debug!(path = %self.path.display(), "segment file closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn preallocates_to_capacity() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("t-0-00000000000000000000.log");
        let storage = FileStorage::create(&path, 64, true, false).expect("create");
        assert_eq!(std::fs::metadata(&path).expect("stat").len(), 64);
        assert_eq!(storage.capacity(), 64);
    }

    #[test]
    fn write_then_read_positional() {
        let dir = TempDir::new().expect("tempdir");
        let storage = FileStorage::create(&dir.path().join("seg.log"), 16, true, true).expect("create");

        storage.write_at(0, b"hello").expect("write");
        storage.write_at(5, b"world").expect("write");

        assert_eq!(storage.read_at(0, 10).expect("read"), b"helloworld");
        assert_eq!(storage.read_at(5, 3).expect("read"), b"wor");
    }

    #[test]
    fn read_is_clamped_to_capacity() {
        let dir = TempDir::new().expect("tempdir");
        let storage = FileStorage::create(&dir.path().join("seg.log"), 8, true, false).expect("create");
        storage.write_at(4, b"abcd").expect("write");
        assert_eq!(storage.read_at(4, 100).expect("read"), b"abcd");
        assert!(storage.read_at(8, 4).expect("read").is_empty());
    }

    #[test]
    fn rejects_write_past_capacity() {
        let dir = TempDir::new().expect("tempdir");
        let storage = FileStorage::create(&dir.path().join("seg.log"), 4, false, false).expect("create");
        let err = storage.write_at(2, b"xyz").unwrap_err();
        assert_eq!(err.kind(), krake_api::ErrorKind::OutOfBounds);
    }

    #[test]
    fn create_makes_parent_dirs() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("nested/deeper/seg.log");
        let storage = FileStorage::create(&path, 4, false, false).expect("create");
        storage.close().expect("close");
        assert!(path.exists());
    }
}
