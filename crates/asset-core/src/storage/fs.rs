//! Local filesystem backend.
//!
//! Committed folders live under `data_dir`; staged folders are unique
//! temporary directories under `temp_dir` and publication is a single
//! `rename` into `data_dir`, which is atomic on the same filesystem. The
//! scratch directory is wiped at startup so partial results from a crashed
//! run never survive.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{FolderEntry, StagedFolder, StorageBackend};
use crate::error::StorageError;

pub struct FsStorage {
    data_dir: PathBuf,
    temp_dir: PathBuf,
}

impl FsStorage {
    pub fn new(data_dir: PathBuf, temp_dir: PathBuf) -> Self {
        Self { data_dir, temp_dir }
    }

    fn walk_dir(path: &Path) -> Result<Vec<FolderEntry>, StorageError> {
        let mut entries = Vec::new();
        let dir = fs::read_dir(path).map_err(|e| StorageError::io(path, e))?;
        for entry in dir {
            let entry = entry.map_err(|e| StorageError::io(path, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let file_type = entry
                .file_type()
                .map_err(|e| StorageError::io(entry.path(), e))?;
            let children = if file_type.is_dir() {
                Some(Self::walk_dir(&entry.path())?)
            } else {
                None
            };
            entries.push(FolderEntry { name, children });
        }
        // Directory iteration order is arbitrary; sort for determinism.
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

impl StorageBackend for FsStorage {
    fn init(&self) -> Result<(), StorageError> {
        match fs::remove_dir_all(&self.temp_dir) {
            Ok(()) => tracing::debug!("cleared scratch dir {}", self.temp_dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::io(&self.temp_dir, e)),
        }
        fs::create_dir_all(&self.temp_dir).map_err(|e| StorageError::io(&self.temp_dir, e))?;
        fs::create_dir_all(&self.data_dir).map_err(|e| StorageError::io(&self.data_dir, e))?;
        Ok(())
    }

    fn walk(&self, path: &str) -> Result<Option<Vec<FolderEntry>>, StorageError> {
        let full = self.data_dir.join(path);
        if !full.exists() {
            return Ok(None);
        }
        Self::walk_dir(&full).map(Some)
    }

    fn create_staged(&self, public_name: &str) -> Result<Arc<dyn StagedFolder>, StorageError> {
        let scratch = tempfile::Builder::new()
            .prefix(&format!("{public_name}."))
            .tempdir_in(&self.temp_dir)
            .map_err(|e| StorageError::io(&self.temp_dir, e))?;
        Ok(Arc::new(FsStagedFolder {
            scratch,
            target: self.data_dir.join(public_name),
            name: public_name.to_string(),
            committed: AtomicBool::new(false),
        }))
    }
}

/// A staged folder backed by a unique temp dir under the scratch area.
///
/// The temp dir cleans itself up on drop; after a successful commit the
/// directory has been renamed away and there is nothing left to remove.
struct FsStagedFolder {
    scratch: tempfile::TempDir,
    target: PathBuf,
    name: String,
    committed: AtomicBool,
}

impl StagedFolder for FsStagedFolder {
    fn create_file(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.scratch.path().join(name);
        fs::write(&path, bytes).map_err(|e| StorageError::io(path, e))
    }

    fn create_dir(&self, name: &str) -> Result<(), StorageError> {
        let path = self.scratch.path().join(name);
        fs::create_dir(&path).map_err(|e| StorageError::io(path, e))
    }

    fn commit(&self) -> Result<(), StorageError> {
        if self.committed.swap(true, Ordering::AcqRel) {
            return Err(StorageError::AlreadyCommitted {
                name: self.name.clone(),
            });
        }
        fs::rename(self.scratch.path(), &self.target)
            .map_err(|e| StorageError::io(&self.target, e))?;
        tracing::debug!("committed {}", self.target.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> (tempfile::TempDir, FsStorage) {
        let root = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(root.path().join("data"), root.path().join("tmp"));
        storage.init().unwrap();
        (root, storage)
    }

    #[test]
    fn test_walk_missing_folder_is_none() {
        let (_root, storage) = backend();
        assert!(storage.walk("nope").unwrap().is_none());
    }

    #[test]
    fn test_staged_commit_roundtrip() {
        let (_root, storage) = backend();

        let staged = storage.create_staged("abc123").unwrap();
        staged.create_file("photo.png", b"png bytes").unwrap();
        staged.create_dir("100x50").unwrap();
        staged.create_file("100x50/photo.webp", b"webp bytes").unwrap();

        // Nothing visible before commit.
        assert!(storage.walk("abc123").unwrap().is_none());

        staged.commit().unwrap();
        let tree = storage.walk("abc123").unwrap().unwrap();
        assert_eq!(
            tree,
            vec![
                FolderEntry::folder("100x50", vec![FolderEntry::file("photo.webp")]),
                FolderEntry::file("photo.png"),
            ]
        );
    }

    #[test]
    fn test_double_commit_rejected() {
        let (_root, storage) = backend();
        let staged = storage.create_staged("abc123").unwrap();
        staged.create_file("f.png", b"x").unwrap();
        staged.commit().unwrap();
        assert!(matches!(
            staged.commit(),
            Err(StorageError::AlreadyCommitted { .. })
        ));
    }

    #[test]
    fn test_drop_without_commit_reclaims_scratch() {
        let (root, storage) = backend();
        {
            let staged = storage.create_staged("abc123").unwrap();
            staged.create_file("f.png", b"x").unwrap();
        }
        let leftovers: Vec<_> = fs::read_dir(root.path().join("tmp")).unwrap().collect();
        assert!(leftovers.is_empty());
        assert!(storage.walk("abc123").unwrap().is_none());
    }

    #[test]
    fn test_concurrent_stagings_do_not_collide() {
        let (_root, storage) = backend();
        let a = storage.create_staged("samename").unwrap();
        let b = storage.create_staged("samename").unwrap();
        a.create_file("f.png", b"a").unwrap();
        b.create_file("f.png", b"b").unwrap();
        a.commit().unwrap();
        // b stays uncommitted and cleans up on drop without touching a's data.
        drop(b);
        let tree = storage.walk("samename").unwrap().unwrap();
        assert_eq!(tree, vec![FolderEntry::file("f.png")]);
    }

    #[test]
    fn test_init_wipes_scratch() {
        let root = tempfile::tempdir().unwrap();
        let tmp = root.path().join("tmp");
        fs::create_dir_all(tmp.join("stale.123")).unwrap();
        fs::write(tmp.join("stale.123/partial.png"), b"junk").unwrap();

        let storage = FsStorage::new(root.path().join("data"), tmp.clone());
        storage.init().unwrap();
        let leftovers: Vec<_> = fs::read_dir(&tmp).unwrap().collect();
        assert!(leftovers.is_empty());
    }
}
