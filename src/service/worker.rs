//! Worker thread that owns the compositor, plus the host-side router that feeds its replies
//! back into the pending table.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use anyhow::Context as _;
use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::composite::compositor::{Compositor, FrameGeometry, FrameInput};
use crate::foundation::core::{RgbaFrame, TaskId};
use crate::foundation::error::{CompositeError, DualframeError, DualframeResult};
use crate::service::pending::PendingTable;
use crate::service::protocol::{
    RequestEnvelope, ResponseEnvelope, TaskOutput, WorkerRequest, WorkerResponse,
};

/// The compositing work a worker thread performs.
///
/// [`Compositor`] is the production implementation. The service only talks to this trait, so
/// alternative processors can be plugged in through
/// [`CompositeService::with_processor`](crate::service::host::CompositeService::with_processor).
pub trait FrameProcessor: Send {
    /// Composite one frame.
    fn process_frame(
        &mut self,
        geometry: &FrameGeometry,
        input: FrameInput,
    ) -> DualframeResult<RgbaFrame>;

    /// Composite a batch in order.
    fn process_frames(
        &mut self,
        geometry: &FrameGeometry,
        frames: Vec<FrameInput>,
        on_progress: &mut dyn FnMut(f32),
        is_cancelled: &dyn Fn() -> bool,
    ) -> DualframeResult<Vec<RgbaFrame>>;

    /// Release scratch memory.
    fn clear_memory(&mut self);
}

impl FrameProcessor for Compositor {
    fn process_frame(
        &mut self,
        geometry: &FrameGeometry,
        input: FrameInput,
    ) -> DualframeResult<RgbaFrame> {
        self.composite(geometry, input)
    }

    fn process_frames(
        &mut self,
        geometry: &FrameGeometry,
        frames: Vec<FrameInput>,
        on_progress: &mut dyn FnMut(f32),
        is_cancelled: &dyn Fn() -> bool,
    ) -> DualframeResult<Vec<RgbaFrame>> {
        self.composite_batch(geometry, frames, on_progress, is_cancelled)
    }

    fn clear_memory(&mut self) {
        Compositor::clear_memory(self);
    }
}

fn to_task_error(err: DualframeError) -> CompositeError {
    match err {
        DualframeError::Composite(e) => e,
        other => CompositeError::task(other.to_string()),
    }
}

fn reply(responses: &Sender<ResponseEnvelope>, id: TaskId, response: WorkerResponse) {
    if responses.send(ResponseEnvelope { id, response }).is_err() {
        tracing::trace!(task = %id, "router gone; dropping response");
    }
}

#[tracing::instrument(skip_all, fields(task = %env.id, kind = env.request.kind()))]
fn run_task(
    processor: &mut dyn FrameProcessor,
    env: RequestEnvelope,
    responses: &Sender<ResponseEnvelope>,
) {
    let RequestEnvelope {
        id,
        cancel,
        request,
    } = env;

    if cancel.is_cancelled() && !matches!(request, WorkerRequest::ClearMemory) {
        tracing::debug!("task cancelled before start");
        reply(responses, id, WorkerResponse::Error(CompositeError::Cancelled));
        return;
    }

    let outcome = match request {
        WorkerRequest::ProcessFrame { geometry, input } => processor
            .process_frame(&geometry, input)
            .map(TaskOutput::Frame),
        WorkerRequest::ProcessFrames { geometry, frames } => {
            let mut last_percent = None;
            let mut on_progress = |fraction: f32| {
                let percent = (fraction.clamp(0.0, 1.0) * 100.0).round() as u8;
                if last_percent.is_none_or(|last| percent > last) {
                    last_percent = Some(percent);
                    reply(responses, id, WorkerResponse::Progress(percent));
                }
            };
            processor
                .process_frames(&geometry, frames, &mut on_progress, &|| {
                    cancel.is_cancelled()
                })
                .map(TaskOutput::Frames)
        }
        WorkerRequest::ClearMemory => {
            processor.clear_memory();
            Ok(TaskOutput::Cleared)
        }
    };

    let response = match outcome {
        Ok(out) => WorkerResponse::Result(out),
        Err(err) => {
            let err = to_task_error(err);
            tracing::debug!(error = %err, "task failed");
            WorkerResponse::Error(err)
        }
    };
    reply(responses, id, response);
}

fn worker_loop(
    mut processor: Box<dyn FrameProcessor>,
    requests: Receiver<RequestEnvelope>,
    responses: Sender<ResponseEnvelope>,
) {
    tracing::debug!("worker started");
    for env in requests.iter() {
        run_task(processor.as_mut(), env, &responses);
    }
    tracing::debug!("worker stopped");
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Marks the context dead and rejects whatever is still pending once the router stops, whether
/// it returns or unwinds.
struct RouterExit {
    pending: Arc<PendingTable>,
    alive: Arc<AtomicBool>,
    reason: String,
}

impl Drop for RouterExit {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
        let rejected = self
            .pending
            .fail_all(CompositeError::worker_fault(self.reason.clone()));
        if rejected > 0 {
            tracing::warn!(
                rejected,
                reason = %self.reason,
                "worker context faulted; pending tasks rejected"
            );
        } else {
            tracing::debug!(reason = %self.reason, "worker context closed");
        }
    }
}

fn router_loop(
    responses: Receiver<ResponseEnvelope>,
    pending: Arc<PendingTable>,
    alive: Arc<AtomicBool>,
    worker: JoinHandle<()>,
) {
    // Replaced below on a normal exit; only an unwinding router keeps this reason.
    let mut exit = RouterExit {
        pending: Arc::clone(&pending),
        alive,
        reason: "response router panicked".to_string(),
    };
    for env in responses.iter() {
        pending.dispatch(env);
    }
    // Every response sender is gone: the worker has exited, normally or by panic.
    exit.reason = match worker.join() {
        Ok(()) => "worker thread exited".to_string(),
        Err(payload) => format!("worker thread panicked: {}", panic_message(payload.as_ref())),
    };
}

/// Why a request could not be queued.
#[derive(Debug)]
pub(crate) enum SubmitError {
    /// Bounded queue is full.
    Full,
    /// Worker is gone.
    Disconnected,
}

/// One live worker thread, its router and its correlation table.
pub(crate) struct WorkerContext {
    requests: Sender<RequestEnvelope>,
    pending: Arc<PendingTable>,
    alive: Arc<AtomicBool>,
    router: Option<JoinHandle<()>>,
}

impl WorkerContext {
    /// Start the worker and router threads.
    pub(crate) fn spawn(
        processor: Box<dyn FrameProcessor>,
        queue_capacity: usize,
        thread_name: &str,
    ) -> DualframeResult<Self> {
        let (req_tx, req_rx) = if queue_capacity == 0 {
            crossbeam_channel::unbounded()
        } else {
            crossbeam_channel::bounded(queue_capacity)
        };
        let (resp_tx, resp_rx) = crossbeam_channel::unbounded();
        let pending = Arc::new(PendingTable::new());
        let alive = Arc::new(AtomicBool::new(true));

        let worker = std::thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || worker_loop(processor, req_rx, resp_tx))
            .context("spawn compositing worker thread")?;

        let router = {
            let pending = Arc::clone(&pending);
            let alive = Arc::clone(&alive);
            std::thread::Builder::new()
                .name(format!("{thread_name}-router"))
                .spawn(move || router_loop(resp_rx, pending, alive, worker))
                .context("spawn response router thread")?
        };

        tracing::debug!(thread = thread_name, queue_capacity, "worker context started");
        Ok(Self {
            requests: req_tx,
            pending,
            alive,
            router: Some(router),
        })
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub(crate) fn pending(&self) -> &PendingTable {
        &self.pending
    }

    /// Queue a request without blocking.
    pub(crate) fn send(&self, env: RequestEnvelope) -> Result<(), SubmitError> {
        // The rejected envelope, buffers included, is dropped here.
        self.requests.try_send(env).map_err(|e| match e {
            TrySendError::Full(_) => SubmitError::Full,
            TrySendError::Disconnected(_) => SubmitError::Disconnected,
        })
    }

    /// Reject pending tasks with `reason`, stop the worker and wait for both threads.
    pub(crate) fn shutdown(mut self, reason: CompositeError) {
        let rejected = self.pending.fail_all(reason);
        if rejected > 0 {
            tracing::debug!(rejected, "pending tasks rejected on shutdown");
        }
        let router = self.router.take();
        // Closing the request channel ends the worker loop, which in turn ends the router.
        drop(self);
        if let Some(router) = router {
            if router.thread().id() == std::thread::current().id() {
                return;
            }
            if router.join().is_err() {
                tracing::warn!("response router panicked during shutdown");
            }
        }
    }
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("alive", &self.is_alive())
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/service/worker.rs"]
mod tests;
