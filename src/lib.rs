//! dualframe composites dual-channel video frames and reads the effect metadata embedded in
//! their containers.
//!
//! A dual-channel frame stores color and a grayscale alpha mask as two sub-frames. The crate has
//! two independent halves:
//!
//! - [`Extractor`] finds the `yyeffectmp4json[[...]]` block in raw MP4 bytes, decodes it and
//!   yields a typed [`MetadataDocument`]
//! - [`CompositeService`] runs a [`Compositor`] on a worker thread and merges color and alpha
//!   buffers into RGBA frames, returning a [`TaskHandle`] per request
#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// Pixel merging: layouts, resampling, buffer pool.
pub mod composite;
mod foundation;
/// Embedded effect metadata.
pub mod metadata;
/// Worker-backed compositing service.
pub mod service;

pub use crate::foundation::core::{PixelBuffer, PixelRect, RgbaFrame, Size, TaskId};
pub use crate::foundation::error::{CompositeError, DualframeError, DualframeResult};

pub use crate::composite::compositor::{Compositor, CompositorOpts, FrameGeometry, FrameInput};
pub use crate::composite::layout::{AlphaLayout, AlphaSide, detect_alpha_side};
pub use crate::composite::sample::Sampling;
pub use crate::composite::scratch_pool::{ScratchPoolOpts, ScratchPoolStats};
pub use crate::metadata::extract::{ExtractOpts, Extractor, extract_metadata};
pub use crate::metadata::inflate::{InflateChain, InflateError, Inflater};
pub use crate::metadata::model::{
    Descriptor, EffectDef, EffectEntry, EffectKind, FrameRecord, MetadataDocument,
};
pub use crate::service::host::{CompositeService, ServiceOpts, ServiceStatus};
pub use crate::service::pending::{ProgressFn, TaskHandle};
pub use crate::service::protocol::{CancelToken, TaskOutput, WorkerRequest};
pub use crate::service::worker::FrameProcessor;
