//! Messages exchanged between the host and the compositing worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::composite::compositor::{FrameGeometry, FrameInput};
use crate::foundation::core::{RgbaFrame, TaskId};
use crate::foundation::error::CompositeError;

/// Shared cancellation flag for one task.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// True once [`CancelToken::cancel`] has been called on any clone.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Work items understood by the worker.
#[derive(Debug)]
pub enum WorkerRequest {
    /// Composite one frame.
    ProcessFrame {
        /// Source, target and layout.
        geometry: FrameGeometry,
        /// Buffers, moved into the worker.
        input: FrameInput,
    },
    /// Composite a batch in order.
    ProcessFrames {
        /// Source, target and layout shared by every frame.
        geometry: FrameGeometry,
        /// Buffers, moved into the worker.
        frames: Vec<FrameInput>,
    },
    /// Drop the worker's scratch pool.
    ClearMemory,
}

impl WorkerRequest {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProcessFrame { .. } => "process_frame",
            Self::ProcessFrames { .. } => "process_frames",
            Self::ClearMemory => "clear_memory",
        }
    }
}

/// Request tagged with its correlation id.
#[derive(Debug)]
pub struct RequestEnvelope {
    /// Correlation id.
    pub id: TaskId,
    /// Cancellation flag shared with the caller's handle.
    pub cancel: CancelToken,
    /// Work item.
    pub request: WorkerRequest,
}

/// Successful task payloads.
#[derive(Debug, PartialEq, Eq)]
pub enum TaskOutput {
    /// Result of [`WorkerRequest::ProcessFrame`].
    Frame(RgbaFrame),
    /// Result of [`WorkerRequest::ProcessFrames`], in submission order.
    Frames(Vec<RgbaFrame>),
    /// Result of [`WorkerRequest::ClearMemory`].
    Cleared,
}

impl TaskOutput {
    /// Unwrap a single frame.
    pub fn into_frame(self) -> Result<RgbaFrame, CompositeError> {
        match self {
            Self::Frame(f) => Ok(f),
            other => Err(other.unexpected("frame")),
        }
    }

    /// Unwrap a batch.
    pub fn into_frames(self) -> Result<Vec<RgbaFrame>, CompositeError> {
        match self {
            Self::Frames(f) => Ok(f),
            other => Err(other.unexpected("frames")),
        }
    }

    /// Unwrap a clear acknowledgement.
    pub fn into_cleared(self) -> Result<(), CompositeError> {
        match self {
            Self::Cleared => Ok(()),
            other => Err(other.unexpected("cleared")),
        }
    }

    fn unexpected(&self, wanted: &str) -> CompositeError {
        let got = match self {
            Self::Frame(_) => "frame",
            Self::Frames(_) => "frames",
            Self::Cleared => "cleared",
        };
        CompositeError::UnexpectedResponse(format!("expected {wanted}, got {got}"))
    }
}

/// Worker replies. `Progress` is partial; `Result` and `Error` are terminal.
#[derive(Debug, PartialEq, Eq)]
pub enum WorkerResponse {
    /// Batch progress in percent (0-100), strictly increasing per task.
    Progress(u8),
    /// Terminal success.
    Result(TaskOutput),
    /// Terminal failure.
    Error(CompositeError),
}

/// Response tagged with the id of the request it answers.
#[derive(Debug)]
pub struct ResponseEnvelope {
    /// Correlation id.
    pub id: TaskId,
    /// Payload.
    pub response: WorkerResponse,
}

#[cfg(test)]
#[path = "../../tests/unit/service/protocol.rs"]
mod tests;
