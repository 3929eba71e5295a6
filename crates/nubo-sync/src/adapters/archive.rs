//! Filesystem archive storage: one `file%09d.bin` per file row.

use crate::domain::error::ArchiveError;
use crate::ports::outbound::ArchiveStorage;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct FsArchiveStorage {
    dir: PathBuf,
}

impl FsArchiveStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, file_id: i64) -> PathBuf {
        self.dir.join(format!("file{file_id:09}.bin"))
    }
}

fn io_err(file_id: i64, err: std::io::Error) -> ArchiveError {
    if err.kind() == ErrorKind::NotFound {
        ArchiveError::NotFound { file_id }
    } else {
        ArchiveError::Io {
            file_id,
            reason: err.to_string(),
        }
    }
}

impl ArchiveStorage for FsArchiveStorage {
    /// Writes through a temporary file so readers never see partial content.
    fn write(&self, file_id: i64, content: &[u8]) -> Result<(), ArchiveError> {
        let path = self.path_for(file_id);
        let tmp = path.with_extension("bin.tmp");
        let fail = |e: std::io::Error| ArchiveError::Io {
            file_id,
            reason: e.to_string(),
        };
        std::fs::write(&tmp, content).map_err(fail)?;
        std::fs::rename(&tmp, &path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            fail(e)
        })
    }

    fn read(&self, file_id: i64) -> Result<Vec<u8>, ArchiveError> {
        std::fs::read(self.path_for(file_id)).map_err(|e| io_err(file_id, e))
    }

    fn remove(&self, file_id: i64) -> Result<(), ArchiveError> {
        std::fs::remove_file(self.path_for(file_id)).map_err(|e| io_err(file_id, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_naming() {
        let storage = FsArchiveStorage::new("/data");
        assert_eq!(storage.path_for(42), PathBuf::from("/data/file000000042.bin"));
    }

    #[test]
    fn test_write_read_remove() {
        let dir = TempDir::new().unwrap();
        let storage = FsArchiveStorage::new(dir.path());
        storage.write(7, b"hello").unwrap();
        storage.write(7, b"hello again").unwrap();
        assert_eq!(storage.read(7).unwrap(), b"hello again");
        assert!(!dir.path().join("file000000007.bin.tmp").exists());

        storage.remove(7).unwrap();
        assert_eq!(storage.read(7), Err(ArchiveError::NotFound { file_id: 7 }));
        assert_eq!(storage.remove(7), Err(ArchiveError::NotFound { file_id: 7 }));
    }

    #[test]
    fn test_write_into_missing_dir() {
        let dir = TempDir::new().unwrap();
        let storage = FsArchiveStorage::new(dir.path().join("gone"));
        assert!(matches!(storage.write(1, b"x"), Err(ArchiveError::Io { .. })));
    }
}
