//! The image ingest pipeline.
//!
//! Stages, in the order an upload flows through them:
//! - **digest**: content addressing (truncated BLAKE3)
//! - **filename**: sanitizing the client-suggested name
//! - **codec**: probe, decode, resize, encode
//! - **processor**: the per-upload state machine tying it all together

pub mod codec;
pub mod digest;
pub mod filename;
pub mod processor;

pub use processor::{ImageProcessor, PipelineContext};
