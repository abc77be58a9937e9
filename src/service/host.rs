//! Host-side compositing service.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use parking_lot::Mutex;

use crate::composite::compositor::{Compositor, CompositorOpts, FrameGeometry, FrameInput};
use crate::foundation::core::{RgbaFrame, TaskId};
use crate::foundation::error::{CompositeError, DualframeError, DualframeResult};
use crate::service::pending::{ProgressFn, TaskHandle};
use crate::service::protocol::{CancelToken, RequestEnvelope, TaskOutput, WorkerRequest};
use crate::service::worker::{FrameProcessor, SubmitError, WorkerContext};

/// Service configuration.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ServiceOpts {
    /// Options for the compositor built on every worker (re)start.
    pub compositor: CompositorOpts,
    /// Request queue bound; `0` means unbounded. Submissions to a full queue fail immediately.
    pub queue_capacity: usize,
    /// Name of the worker thread (the router thread gets a `-router` suffix).
    pub thread_name: String,
}

impl Default for ServiceOpts {
    fn default() -> Self {
        Self {
            compositor: CompositorOpts::default(),
            queue_capacity: 0,
            thread_name: "dualframe-worker".to_string(),
        }
    }
}

impl ServiceOpts {
    /// Parse options from JSON; absent fields keep their defaults.
    pub fn from_json(json: &str) -> DualframeResult<Self> {
        let opts: Self = serde_json::from_str(json)
            .map_err(|e| DualframeError::serde(format!("service options: {e}")))?;
        opts.validate()?;
        Ok(opts)
    }

    /// Load options from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> DualframeResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("read service options '{}'", path.display()))?;
        Self::from_json(&json)
    }

    fn validate(&self) -> DualframeResult<()> {
        if self.thread_name.trim().is_empty() {
            return Err(DualframeError::validation("thread_name must not be empty"));
        }
        if self.compositor.threads == Some(0) {
            return Err(DualframeError::validation(
                "compositor.threads must be >= 1 when set",
            ));
        }
        Ok(())
    }
}

/// Snapshot returned by [`CompositeService::status`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct ServiceStatus {
    /// A live worker context exists.
    pub initialized: bool,
    /// Tasks awaiting a terminal response.
    pub pending: usize,
}

type ProcessorFactory = dyn Fn() -> DualframeResult<Box<dyn FrameProcessor>> + Send + Sync;

/// Compositing service with one worker thread.
///
/// The worker starts lazily on first use and restarts on the next call after a fault.
/// Submissions never block; each returns a [`TaskHandle`].
pub struct CompositeService {
    opts: ServiceOpts,
    factory: Arc<ProcessorFactory>,
    slot: Mutex<Slot>,
}

#[derive(Default)]
struct Slot {
    next_id: u64,
    ctx: Option<WorkerContext>,
}

impl std::fmt::Debug for CompositeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeService")
            .field("opts", &self.opts)
            .field("status", &self.status())
            .finish()
    }
}

impl CompositeService {
    /// Create a service backed by [`Compositor`]. No thread is started yet.
    pub fn open(opts: ServiceOpts) -> DualframeResult<Self> {
        let compositor_opts = opts.compositor;
        Self::with_processor(opts, move || {
            Ok(Box::new(Compositor::new(compositor_opts)?) as Box<dyn FrameProcessor>)
        })
    }

    /// Create a service whose worker runs processors built by `factory`.
    ///
    /// `factory` is called once per worker start, on the submitting thread.
    pub fn with_processor(
        opts: ServiceOpts,
        factory: impl Fn() -> DualframeResult<Box<dyn FrameProcessor>> + Send + Sync + 'static,
    ) -> DualframeResult<Self> {
        opts.validate()?;
        Ok(Self {
            opts,
            factory: Arc::new(factory),
            slot: Mutex::new(Slot::default()),
        })
    }

    /// Active options.
    pub fn opts(&self) -> &ServiceOpts {
        &self.opts
    }

    /// Composite one frame. Buffers move into the worker.
    pub fn process_frame(
        &self,
        geometry: FrameGeometry,
        input: FrameInput,
    ) -> TaskHandle<RgbaFrame> {
        self.submit_typed(
            WorkerRequest::ProcessFrame { geometry, input },
            None,
            TaskOutput::into_frame,
        )
    }

    /// Composite a batch in order. `progress` receives strictly increasing fractions ending at
    /// `1.0`.
    pub fn process_frames(
        &self,
        geometry: FrameGeometry,
        frames: Vec<FrameInput>,
        progress: Option<ProgressFn>,
    ) -> TaskHandle<Vec<RgbaFrame>> {
        self.submit_typed(
            WorkerRequest::ProcessFrames { geometry, frames },
            progress,
            TaskOutput::into_frames,
        )
    }

    /// Drop the worker's scratch pool. Queued behind earlier tasks.
    pub fn clear_memory(&self) -> TaskHandle<()> {
        self.submit_typed(WorkerRequest::ClearMemory, None, TaskOutput::into_cleared)
    }

    /// Submit a raw request.
    pub fn submit(
        &self,
        request: WorkerRequest,
        progress: Option<ProgressFn>,
    ) -> TaskHandle<TaskOutput> {
        self.submit_typed(request, progress, Ok)
    }

    /// Whether a worker is running and how many tasks wait on it.
    pub fn status(&self) -> ServiceStatus {
        let slot = self.slot.lock();
        match &slot.ctx {
            Some(ctx) => ServiceStatus {
                initialized: ctx.is_alive(),
                pending: ctx.pending().len(),
            },
            None => ServiceStatus {
                initialized: false,
                pending: 0,
            },
        }
    }

    /// Stop the worker and reject every pending task with [`CompositeError::Disposed`].
    ///
    /// The service stays usable; the next submission starts a fresh worker.
    pub fn dispose(&self) {
        let ctx = self.slot.lock().ctx.take();
        if let Some(ctx) = ctx {
            tracing::debug!("disposing compositing service");
            ctx.shutdown(CompositeError::Disposed);
        }
    }

    fn submit_typed<T>(
        &self,
        request: WorkerRequest,
        progress: Option<ProgressFn>,
        extract: fn(TaskOutput) -> Result<T, CompositeError>,
    ) -> TaskHandle<T> {
        let mut retired = Vec::new();
        let handle = {
            let mut slot = self.slot.lock();
            slot.next_id += 1;
            let id = TaskId(slot.next_id);
            self.submit_locked(&mut slot, &mut retired, id, request, progress, extract)
        };
        // Joined without the slot lock: a router still draining callbacks may call back in.
        for dead in retired {
            dead.shutdown(CompositeError::worker_fault("worker is not running"));
        }
        handle
    }

    fn submit_locked<T>(
        &self,
        slot: &mut Slot,
        retired: &mut Vec<WorkerContext>,
        id: TaskId,
        request: WorkerRequest,
        progress: Option<ProgressFn>,
        extract: fn(TaskOutput) -> Result<T, CompositeError>,
    ) -> TaskHandle<T> {
        if let Err(err) = self.ensure_context(slot, retired) {
            tracing::warn!(task = %id, error = %err, "failed to start compositing worker");
            return TaskHandle::failed(id, CompositeError::worker_fault(err.to_string()), extract);
        }
        let Some(ctx) = slot.ctx.as_ref() else {
            return TaskHandle::failed(id, CompositeError::worker_fault("no worker"), extract);
        };

        let cancel = CancelToken::new();
        let rx = ctx.pending().register(id, cancel.clone(), progress);
        tracing::trace!(task = %id, kind = request.kind(), "submitting");
        let env = RequestEnvelope {
            id,
            cancel: cancel.clone(),
            request,
        };
        match ctx.send(env) {
            Ok(()) => {}
            Err(SubmitError::Full) => {
                ctx.pending()
                    .reject(id, CompositeError::task("worker queue is full"));
            }
            Err(SubmitError::Disconnected) => {
                ctx.pending()
                    .reject(id, CompositeError::worker_fault("worker is not running"));
                retired.extend(slot.ctx.take());
            }
        }
        TaskHandle::new(id, cancel, rx, extract)
    }

    /// Start a worker unless a live one exists. Caller holds the slot lock, so concurrent
    /// first calls create a single context. A dead context is moved to `retired` for the caller
    /// to shut down once the lock is released.
    fn ensure_context(
        &self,
        slot: &mut Slot,
        retired: &mut Vec<WorkerContext>,
    ) -> DualframeResult<()> {
        if slot.ctx.as_ref().is_some_and(WorkerContext::is_alive) {
            return Ok(());
        }
        if let Some(dead) = slot.ctx.take() {
            tracing::debug!("replacing faulted worker context");
            retired.push(dead);
        }
        let processor = (self.factory)()?;
        slot.ctx = Some(WorkerContext::spawn(
            processor,
            self.opts.queue_capacity,
            &self.opts.thread_name,
        )?);
        Ok(())
    }
}

impl Drop for CompositeService {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
#[path = "../../tests/unit/service/host.rs"]
mod tests;
