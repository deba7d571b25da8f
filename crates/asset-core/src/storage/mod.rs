//! Storage abstraction: committed-folder reads and staged atomic writes.
//!
//! The pipeline only ever talks to these traits. A backend provides a
//! read-only recursive listing of committed folders plus staged scratch
//! folders that become publicly visible in a single atomic commit. The
//! only backend today is the local filesystem ([`fs::FsStorage`]); the
//! interface is kept narrow so a bucket- or database-backed implementation
//! can slot in behind the same pipeline.

pub mod fs;

use std::sync::Arc;

use crate::config::StorageOptions;
use crate::error::StorageError;

/// One entry of a committed folder listing.
///
/// `children` is `None` for a file and the (recursively listed) contents
/// for a subfolder. Listings are sorted by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderEntry {
    pub name: String,
    pub children: Option<Vec<FolderEntry>>,
}

impl FolderEntry {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: None,
        }
    }

    pub fn folder(name: impl Into<String>, children: Vec<FolderEntry>) -> Self {
        Self {
            name: name.into(),
            children: Some(children),
        }
    }

    /// True when this entry is a file.
    pub fn is_file(&self) -> bool {
        self.children.is_none()
    }
}

/// A writable scratch area that publishes atomically.
///
/// The pipeline never creates the same path twice within one staging, but
/// it does write distinct paths concurrently from several worker threads;
/// implementations must tolerate that. Dropping a handle without a commit
/// must reclaim the scratch space.
pub trait StagedFolder: Send + Sync {
    /// Write a file under the staged area. `name` may contain `/`-separated
    /// components; any folders on the path were created beforehand via
    /// [`StagedFolder::create_dir`].
    fn create_file(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError>;

    /// Create a subfolder under the staged area.
    fn create_dir(&self, name: &str) -> Result<(), StorageError>;

    /// Atomically publish the staged tree under its public name.
    ///
    /// Either the whole tree becomes visible to [`StorageBackend::walk`] or
    /// none of it does. Single-shot.
    fn commit(&self) -> Result<(), StorageError>;
}

/// A content-addressed folder store.
pub trait StorageBackend: Send + Sync {
    /// Prepare the backend for use (create directories, wipe stale scratch).
    fn init(&self) -> Result<(), StorageError>;

    /// Recursive listing of the committed folder at `path`, or `None` if it
    /// does not exist. Only called on committed folders, so it need not be
    /// safe against concurrent writers.
    fn walk(&self, path: &str) -> Result<Option<Vec<FolderEntry>>, StorageError>;

    /// Allocate a staged folder that will commit under `public_name`.
    /// Concurrent stagings for distinct names must not collide.
    fn create_staged(&self, public_name: &str) -> Result<Arc<dyn StagedFolder>, StorageError>;
}

/// Instantiate the backend selected by the configuration.
pub fn create(options: &StorageOptions) -> Arc<dyn StorageBackend> {
    match options {
        StorageOptions::Fs { data_dir, temp_dir } => {
            Arc::new(fs::FsStorage::new(data_dir.clone(), temp_dir.clone()))
        }
    }
}
