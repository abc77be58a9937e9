/// Convenience result type used across dualframe.
pub type DualframeResult<T> = Result<T, DualframeError>;

/// Top-level error taxonomy used by crate APIs.
#[derive(thiserror::Error, Debug)]
pub enum DualframeError {
    /// Invalid caller-provided geometry, options or buffers.
    #[error("validation error: {0}")]
    Validation(String),

    /// Errors while decoding embedded payloads.
    #[error("decode error: {0}")]
    Decode(String),

    /// Failures reported by the compositing service.
    #[error("composite error: {0}")]
    Composite(#[from] CompositeError),

    /// Errors when serializing or deserializing data structures.
    #[error("serialization error: {0}")]
    Serde(String),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DualframeError {
    /// Build a [`DualframeError::Validation`] value.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a [`DualframeError::Decode`] value.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Build a [`DualframeError::Serde`] value.
    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }
}

/// Terminal failure of a composite task.
///
/// Cloneable because a single worker fault fans out to every pending task.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CompositeError {
    /// The worker rejected or failed this particular task.
    #[error("task failed: {0}")]
    Task(String),

    /// The worker execution context itself died; all pending tasks share this error.
    #[error("worker fault: {0}")]
    WorkerFault(String),

    /// The task was cancelled through its token before it finished.
    #[error("task cancelled")]
    Cancelled,

    /// The service was disposed while the task was still pending.
    #[error("service disposed")]
    Disposed,

    /// The worker answered with a result of the wrong shape for this request.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl CompositeError {
    /// Build a [`CompositeError::Task`] value.
    pub fn task(msg: impl Into<String>) -> Self {
        Self::Task(msg.into())
    }

    /// Build a [`CompositeError::WorkerFault`] value.
    pub fn worker_fault(msg: impl Into<String>) -> Self {
        Self::WorkerFault(msg.into())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
