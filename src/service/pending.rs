//! Task correlation table and the caller-side task handle.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use parking_lot::Mutex;

use crate::foundation::core::TaskId;
use crate::foundation::error::CompositeError;
use crate::service::protocol::{CancelToken, ResponseEnvelope, TaskOutput, WorkerResponse};
use crate::service::worker::panic_message;

/// Progress callback; receives a fraction in `0.0..=1.0`.
pub type ProgressFn = Box<dyn FnMut(f32) + Send>;

type Completion = Result<TaskOutput, CompositeError>;

struct PendingEntry {
    done: oneshot::Sender<Completion>,
    cancel: CancelToken,
    progress: Option<ProgressFn>,
}

/// Map from task id to the waiting caller.
#[derive(Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<TaskId, PendingEntry>>,
}

impl std::fmt::Debug for PendingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTable")
            .field("pending", &self.len())
            .finish()
    }
}

impl PendingTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unresolved tasks.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True if no task is waiting.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Register a task and return the receiving end of its completion.
    pub fn register(
        &self,
        id: TaskId,
        cancel: CancelToken,
        progress: Option<ProgressFn>,
    ) -> oneshot::Receiver<Completion> {
        let (done, rx) = oneshot::channel();
        let prev = self.entries.lock().insert(
            id,
            PendingEntry {
                done,
                cancel,
                progress,
            },
        );
        if prev.is_some() {
            tracing::warn!(task = %id, "task id registered twice; previous waiter dropped");
        }
        rx
    }

    /// Route one worker response. Returns `false` if the id is unknown or already resolved.
    pub fn dispatch(&self, env: ResponseEnvelope) -> bool {
        let ResponseEnvelope { id, response } = env;
        match response {
            WorkerResponse::Progress(percent) => self.progress(id, percent),
            WorkerResponse::Result(out) => self.resolve(id, Ok(out)),
            WorkerResponse::Error(err) => self.resolve(id, Err(err)),
        }
    }

    /// Terminate one task with `err`.
    pub fn reject(&self, id: TaskId, err: CompositeError) -> bool {
        self.resolve(id, Err(err))
    }

    /// Reject and remove every pending task, cancelling their tokens. Returns how many were
    /// rejected.
    pub fn fail_all(&self, err: CompositeError) -> usize {
        let drained: Vec<_> = self.entries.lock().drain().collect();
        let n = drained.len();
        for (_, entry) in drained {
            entry.cancel.cancel();
            let _ = entry.done.send(Err(err.clone()));
        }
        n
    }

    fn resolve(&self, id: TaskId, outcome: Completion) -> bool {
        let Some(entry) = self.entries.lock().remove(&id) else {
            tracing::trace!(task = %id, "dropping response for unknown task");
            return false;
        };
        // The caller may have dropped its handle.
        let _ = entry.done.send(outcome);
        true
    }

    fn progress(&self, id: TaskId, percent: u8) -> bool {
        // The callback runs outside the lock so it may call back into the service.
        let cb = match self.entries.lock().get_mut(&id) {
            Some(entry) => entry.progress.take(),
            None => {
                tracing::trace!(task = %id, "dropping progress for unknown task");
                return false;
            }
        };
        let Some(mut cb) = cb else {
            return true;
        };
        let fraction = f32::from(percent.min(100)) / 100.0;
        match std::panic::catch_unwind(AssertUnwindSafe(|| cb(fraction))) {
            Ok(()) => {
                if let Some(entry) = self.entries.lock().get_mut(&id) {
                    entry.progress = Some(cb);
                }
            }
            Err(payload) => {
                let msg = format!(
                    "progress callback panicked: {}",
                    panic_message(payload.as_ref())
                );
                tracing::warn!(task = %id, %msg, "failing task");
                if let Some(entry) = self.entries.lock().remove(&id) {
                    // Stops the rest of the batch on the worker.
                    entry.cancel.cancel();
                    let _ = entry.done.send(Err(CompositeError::task(msg)));
                }
            }
        }
        true
    }
}

/// Caller-side view of a submitted task.
///
/// Resolves exactly once with the task's result. Await it, or block with [`TaskHandle::wait`].
#[must_use = "a task handle does nothing unless awaited or waited on"]
pub struct TaskHandle<T> {
    id: TaskId,
    cancel: CancelToken,
    rx: oneshot::Receiver<Completion>,
    extract: fn(TaskOutput) -> Result<T, CompositeError>,
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(
        id: TaskId,
        cancel: CancelToken,
        rx: oneshot::Receiver<Completion>,
        extract: fn(TaskOutput) -> Result<T, CompositeError>,
    ) -> Self {
        Self {
            id,
            cancel,
            rx,
            extract,
        }
    }

    /// A handle that is already resolved with `err`.
    pub(crate) fn failed(
        id: TaskId,
        err: CompositeError,
        extract: fn(TaskOutput) -> Result<T, CompositeError>,
    ) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(err));
        Self::new(id, CancelToken::new(), rx, extract)
    }

    /// Correlation id of this task.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Ask the worker to abandon this task.
    ///
    /// Takes effect before the task starts or between frames of a batch; a task that already
    /// finished keeps its result.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token shared with the worker.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Block the current thread until the task resolves.
    pub fn wait(self) -> Result<T, CompositeError> {
        pollster::block_on(self)
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, CompositeError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let extract = self.extract;
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome.and_then(extract)),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(CompositeError::worker_fault(
                "task dropped without a response",
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/service/pending.rs"]
mod tests;
