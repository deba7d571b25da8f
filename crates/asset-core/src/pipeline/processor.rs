//! Per-upload processing state machine.
//!
//! Each upload gets one [`ImageProcessor`], alive for exactly as long as
//! its task group: every in-flight task holds a strong reference, and the
//! group's terminal callback performs the finalization, so background work
//! can never outlive the processor and the ready hook fires exactly once.
//!
//! The machine: digest the bytes, return early if the digest's folder is
//! already committed, otherwise win or lose the dedup registration. The
//! winner stages a folder, decodes once, fans out one resize task per
//! target width and one encode task per (width, format) pair, and commits
//! atomically when the whole group finishes. Losers park until the winner
//! releases them and then read the committed folder.

use std::sync::{Arc, Mutex, OnceLock, Weak};

use image::DynamicImage;

use super::{codec, digest, filename};
use crate::config::Config;
use crate::error::{ProcessError, ProcessResult};
use crate::group::TaskGroup;
use crate::pool::WorkerPool;
use crate::registry::DedupRegistry;
use crate::storage::{FolderEntry, StagedFolder, StorageBackend};
use crate::types::{DimensionSpec, UploadRecord};

/// Shared handles every processor needs; cheap to clone per upload.
#[derive(Clone)]
pub struct PipelineContext {
    pub config: Arc<Config>,
    pub storage: Arc<dyn StorageBackend>,
    pub pool: Arc<WorkerPool>,
    pub registry: Arc<DedupRegistry>,
}

/// Callback invoked exactly once when processing terminates.
pub type ReadyHook = Box<dyn FnOnce(ProcessResult<UploadRecord>) + Send + 'static>;

struct Inner {
    digest: String,
    filename: String,
    suggested_extension: Option<String>,
    original: DimensionSpec,
    is_new: bool,
    /// True once this processor won the dedup registration for its digest.
    owner: bool,
    staged: Option<Arc<dyn StagedFolder>>,
}

pub struct ImageProcessor {
    ctx: PipelineContext,
    group: Arc<TaskGroup<ProcessError>>,
    ready: Mutex<Option<ReadyHook>>,
    inner: Mutex<Inner>,
    /// Variant slots, allocated in full before any resize task is
    /// submitted so concurrent tasks only ever touch their own index.
    variants: OnceLock<Vec<Mutex<DimensionSpec>>>,
}

impl ImageProcessor {
    /// Start processing an upload.
    ///
    /// Sanitizes the suggested filename, then enqueues the initial task on
    /// the shared pool. `ready` is called from a worker thread with either
    /// the finished record or the first error.
    pub fn spawn(
        ctx: PipelineContext,
        bytes: Vec<u8>,
        suggested_filename: &str,
        ready: impl FnOnce(ProcessResult<UploadRecord>) + Send + 'static,
    ) -> Arc<Self> {
        let (stem, extension) = filename::split(suggested_filename);
        let inner = Inner {
            digest: String::new(),
            filename: filename::sanitize(stem),
            suggested_extension: extension.map(str::to_lowercase),
            original: DimensionSpec::default(),
            is_new: false,
            owner: false,
            staged: None,
        };

        let pool = Arc::clone(&ctx.pool);
        let processor = Arc::new_cyclic(|weak: &Weak<ImageProcessor>| {
            let on_error = {
                let weak = weak.clone();
                move |e| {
                    if let Some(p) = weak.upgrade() {
                        p.finalize(Err(e));
                    }
                }
            };
            let on_finish = {
                let weak = weak.clone();
                move || {
                    if let Some(p) = weak.upgrade() {
                        p.finalize(Ok(()));
                    }
                }
            };
            ImageProcessor {
                ctx,
                group: TaskGroup::new(pool, on_error, on_finish),
                ready: Mutex::new(Some(Box::new(ready))),
                inner: Mutex::new(inner),
                variants: OnceLock::new(),
            }
        });

        let bytes = Arc::new(bytes);
        let this = Arc::clone(&processor);
        processor.group.add_task(move || this.start(&bytes));
        processor
    }

    /// Initial task: digest, dedup arbitration, and either the cached path
    /// or the start of the fresh pipeline.
    fn start(self: &Arc<Self>, bytes: &Arc<Vec<u8>>) -> ProcessResult<()> {
        let digest = digest::content_digest(bytes);
        self.inner.lock().unwrap().digest = digest.clone();

        if let Some(tree) = self.ctx.storage.walk(&digest)? {
            tracing::debug!("upload {digest} already stored");
            return self.populate_from_tree(&digest, &tree, bytes);
        }

        let (slot, is_owner) = self.ctx.registry.register(&digest);
        if !is_owner {
            tracing::debug!("upload {digest} in flight elsewhere, waiting");
            slot.wait();
            return match self.ctx.storage.walk(&digest)? {
                Some(tree) => self.populate_from_tree(&digest, &tree, bytes),
                None => Err(ProcessError::Invariant(format!(
                    "no data for {digest} after its owner finished processing"
                ))),
            };
        }
        self.inner.lock().unwrap().owner = true;

        // Another processor may have committed between our first walk and
        // the registration; re-check before doing any work.
        if let Some(tree) = self.ctx.storage.walk(&digest)? {
            return self.populate_from_tree(&digest, &tree, bytes);
        }

        let staged = self.ctx.storage.create_staged(&digest)?;
        {
            let mut inner = self.inner.lock().unwrap();
            inner.is_new = true;
            inner.staged = Some(staged);
        }

        let this = Arc::clone(self);
        let bytes = Arc::clone(bytes);
        self.group.add_task(move || this.load_and_fan_out(&bytes));
        Ok(())
    }

    /// Cached path: reconstruct the record from the committed folder.
    fn populate_from_tree(
        &self,
        digest: &str,
        tree: &[FolderEntry],
        bytes: &[u8],
    ) -> ProcessResult<()> {
        let (stem, extension, variants) = descriptor_from_tree(digest, tree)?;

        // The folder does not record the original's pixel size; sniff it
        // from the (identical) uploaded bytes without a full decode.
        let (width, height) = codec::probe_dimensions(bytes).ok_or_else(|| {
            ProcessError::Invariant(format!("stored upload {digest} has undecodable bytes"))
        })?;

        let mut inner = self.inner.lock().unwrap();
        inner.filename = stem;
        inner.original = DimensionSpec {
            width,
            height,
            formats: vec![extension],
        };
        inner.is_new = false;
        drop(inner);

        self.variants
            .set(variants.into_iter().map(Mutex::new).collect())
            .map_err(|_| ProcessError::Invariant("variant slots set twice".into()))
    }

    /// Owner path, step two: persist the original, decode, and fan out one
    /// resize task per target width.
    fn load_and_fan_out(self: &Arc<Self>, bytes: &Arc<Vec<u8>>) -> ProcessResult<()> {
        let (filename, fallback) = {
            let inner = self.inner.lock().unwrap();
            (inner.filename.clone(), inner.suggested_extension.clone())
        };
        let format = codec::probe_format(bytes)
            .map(str::to_string)
            .or(fallback)
            .ok_or_else(|| {
                ProcessError::InvalidImage("unrecognized format and no filename extension".into())
            })?;

        self.staged()?
            .create_file(&format!("{filename}.{format}"), bytes)?;

        let image = codec::decode(bytes)?;
        let widths = self.ctx.config.target_widths(image.width());
        tracing::debug!(
            "decoded {format} {}x{}, producing {} sizes",
            image.width(),
            image.height(),
            widths.len()
        );

        {
            let mut inner = self.inner.lock().unwrap();
            inner.original = DimensionSpec {
                width: image.width(),
                height: image.height(),
                formats: vec![format],
            };
        }

        let slots = widths
            .into_iter()
            .map(|width| {
                Mutex::new(DimensionSpec {
                    width,
                    height: 0,
                    formats: Vec::new(),
                })
            })
            .collect::<Vec<_>>();
        let count = slots.len();
        self.variants
            .set(slots)
            .map_err(|_| ProcessError::Invariant("variant slots set twice".into()))?;

        let image = Arc::new(image);
        for index in 0..count {
            let this = Arc::clone(self);
            let image = Arc::clone(&image);
            self.group.add_task(move || this.resize_variant(&image, index));
        }
        Ok(())
    }

    /// Resize one variant and fan out its encode tasks.
    fn resize_variant(self: &Arc<Self>, image: &Arc<DynamicImage>, index: usize) -> ProcessResult<()> {
        let slots = self.variant_slots()?;
        let width = slots[index].lock().unwrap().width;
        let resized = codec::resize_to_width(image, width);

        let input_format = {
            let inner = self.inner.lock().unwrap();
            inner.original.formats[0].clone()
        };
        let formats = self.ctx.config.output_formats(&input_format);
        if formats.is_empty() {
            return Err(ProcessError::Invariant(format!(
                "no output formats configured for input format {input_format}"
            )));
        }

        let folder = {
            let mut slot = slots[index].lock().unwrap();
            slot.height = resized.height();
            slot.formats = formats.clone();
            slot.folder_name()
        };
        self.staged()?.create_dir(&folder)?;

        let resized = Arc::new(resized);
        for format_index in 0..formats.len() {
            let this = Arc::clone(self);
            let resized = Arc::clone(&resized);
            self.group
                .add_task(move || this.encode_variant(&resized, index, format_index));
        }
        Ok(())
    }

    /// Encode one (width, format) pair into the staged folder.
    fn encode_variant(
        &self,
        resized: &DynamicImage,
        index: usize,
        format_index: usize,
    ) -> ProcessResult<()> {
        let slots = self.variant_slots()?;
        let (folder, format) = {
            let slot = slots[index].lock().unwrap();
            (slot.folder_name(), slot.formats[format_index].clone())
        };
        let encoded = codec::encode(resized, &format)?;

        let name = {
            let inner = self.inner.lock().unwrap();
            format!("{folder}/{}.{format}", inner.filename)
        };
        self.staged()?.create_file(&name, &encoded)?;
        Ok(())
    }

    /// Terminal routine shared by the group's success and error callbacks.
    ///
    /// Commit (owner, clean runs only) strictly precedes the registry
    /// removal, which strictly precedes waking the waiters; that ordering
    /// is what lets a woken waiter trust `walk`.
    fn finalize(&self, outcome: ProcessResult<()>) {
        let (digest, owner, staged) = {
            let mut inner = self.inner.lock().unwrap();
            (inner.digest.clone(), inner.owner, inner.staged.take())
        };

        let mut result = outcome;
        if result.is_ok() {
            if let (true, Some(staged)) = (owner, &staged) {
                result = staged.commit().map_err(Into::into);
            }
        }
        if owner {
            self.ctx.registry.finish(&digest);
        }
        // An uncommitted staging is reclaimed here, when the last
        // reference drops.
        drop(staged);

        let Some(ready) = self.ready.lock().unwrap().take() else {
            tracing::error!("processor for {digest} finalized twice");
            return;
        };
        match result {
            Ok(()) => ready(Ok(self.record())),
            Err(e) => {
                if e.is_user_error() {
                    tracing::debug!("rejected upload {digest}: {e}");
                } else {
                    tracing::error!("processing {digest} failed: {e}");
                }
                ready(Err(e));
            }
        }
    }

    fn record(&self) -> UploadRecord {
        let inner = self.inner.lock().unwrap();
        let variants = self
            .variants
            .get()
            .map(|slots| slots.iter().map(|s| s.lock().unwrap().clone()).collect())
            .unwrap_or_default();
        UploadRecord {
            hash: inner.digest.clone(),
            filename: inner.filename.clone(),
            original: inner.original.clone(),
            variants,
            is_new: inner.is_new,
        }
    }

    fn staged(&self) -> ProcessResult<Arc<dyn StagedFolder>> {
        self.inner
            .lock()
            .unwrap()
            .staged
            .clone()
            .ok_or_else(|| ProcessError::Invariant("no staged folder for pipeline task".into()))
    }

    fn variant_slots(&self) -> ProcessResult<&Vec<Mutex<DimensionSpec>>> {
        self.variants
            .get()
            .ok_or_else(|| ProcessError::Invariant("variant slots not allocated".into()))
    }
}

/// Parse a committed digest folder back into (stem, original extension,
/// width-sorted variants).
fn descriptor_from_tree(
    digest: &str,
    tree: &[FolderEntry],
) -> ProcessResult<(String, String, Vec<DimensionSpec>)> {
    let mut files = tree.iter().filter(|e| e.is_file());
    let original = files.next().ok_or_else(|| {
        ProcessError::Invariant(format!("no original file found for {digest}"))
    })?;
    if let Some(extra) = files.next() {
        tracing::warn!(
            "multiple files in root folder for {digest} ({} and {}), using {}",
            original.name,
            extra.name,
            original.name
        );
    }
    let (stem, extension) = filename::split(&original.name);

    let mut variants = Vec::new();
    for entry in tree {
        let Some(children) = &entry.children else {
            continue;
        };
        let mut spec = DimensionSpec::from_folder_name(&entry.name).ok_or_else(|| {
            ProcessError::Invariant(format!("bad dimensions folder {digest}/{}", entry.name))
        })?;
        for leaf in children {
            let (leaf_stem, leaf_extension) = filename::split(&leaf.name);
            if leaf_stem != stem {
                return Err(ProcessError::Invariant(format!(
                    "filename mismatch in folder {digest}/{}: {} (expected {stem})",
                    entry.name, leaf.name
                )));
            }
            spec.formats
                .push(leaf_extension.unwrap_or_default().to_string());
        }
        spec.formats.sort();
        variants.push(spec);
    }
    variants.sort_by_key(|v| v.width);

    Ok((
        stem.to_string(),
        extension.unwrap_or_default().to_string(),
        variants,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> Vec<FolderEntry> {
        vec![
            FolderEntry::folder(
                "100x50",
                vec![FolderEntry::file("photo.webp"), FolderEntry::file("photo.jpg")],
            ),
            FolderEntry::folder("50x25", vec![FolderEntry::file("photo.jpg")]),
            FolderEntry::file("photo.jpeg"),
        ]
    }

    #[test]
    fn test_descriptor_from_tree() {
        let (stem, extension, variants) = descriptor_from_tree("d", &tree()).unwrap();
        assert_eq!(stem, "photo");
        assert_eq!(extension, "jpeg");
        assert_eq!(
            variants,
            vec![
                DimensionSpec {
                    width: 50,
                    height: 25,
                    formats: vec!["jpg".to_string()],
                },
                DimensionSpec {
                    width: 100,
                    height: 50,
                    formats: vec!["jpg".to_string(), "webp".to_string()],
                },
            ]
        );
    }

    #[test]
    fn test_descriptor_requires_original_file() {
        let tree = vec![FolderEntry::folder("100x50", vec![])];
        assert!(matches!(
            descriptor_from_tree("d", &tree),
            Err(ProcessError::Invariant(_))
        ));
    }

    #[test]
    fn test_descriptor_rejects_stem_mismatch() {
        let tree = vec![
            FolderEntry::file("photo.jpeg"),
            FolderEntry::folder("100x50", vec![FolderEntry::file("other.jpg")]),
        ];
        assert!(matches!(
            descriptor_from_tree("d", &tree),
            Err(ProcessError::Invariant(_))
        ));
    }

    #[test]
    fn test_descriptor_rejects_bad_folder_name() {
        let tree = vec![
            FolderEntry::file("photo.jpeg"),
            FolderEntry::folder("100by50", vec![]),
        ];
        assert!(matches!(
            descriptor_from_tree("d", &tree),
            Err(ProcessError::Invariant(_))
        ));
    }
}
