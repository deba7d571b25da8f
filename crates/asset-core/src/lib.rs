//! Asset Core - content-addressed image ingest pipeline.
//!
//! This crate holds everything below the HTTP surface of the asset
//! server: the worker pool and task groups that carry the CPU-bound work,
//! the dedup registry that serializes identical uploads, the storage
//! abstraction with its atomic staged-folder commit, and the per-upload
//! processing state machine.
//!
//! # Architecture
//!
//! ```text
//! bytes -> digest -> dedup lookup -> decode -> resize fan-out -> encode fan-out
//!                         |                                           |
//!                  committed folder  <-- atomic commit <--     staged folder
//! ```
//!
//! Everything here is synchronous; the server binary hosts the async
//! surface and talks to this crate only through thread-safe handles.

pub mod config;
pub mod error;
pub mod group;
pub mod pipeline;
pub mod pool;
pub mod registry;
pub mod storage;
pub mod types;

// Re-exports for convenient access
pub use config::{Config, SizeSpec, SizeSpecs, StorageOptions};
pub use error::{Cancelled, ConfigError, ProcessError, ProcessResult, StorageError};
pub use group::TaskGroup;
pub use pipeline::{ImageProcessor, PipelineContext};
pub use pool::WorkerPool;
pub use registry::DedupRegistry;
pub use storage::{FolderEntry, StagedFolder, StorageBackend};
pub use types::{DimensionSpec, UploadRecord};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
