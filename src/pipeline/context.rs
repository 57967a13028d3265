//! Caller-owned runtime context for pipelines.

use std::future::Future;

use tokio::{
    runtime::{Handle, TryCurrentError},
    task::JoinHandle,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// Runtime handle, task tracker and root cancellation token shared by the
/// pipelines built from it.
///
/// Every connection and accept worker is spawned through the context and
/// cancelled by [`PipelineContext::shutdown`].
#[derive(Clone, Debug)]
pub struct PipelineContext {
    runtime: Handle,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl PipelineContext {
    /// Create a context spawning onto `runtime`.
    #[must_use]
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Create a context for the runtime the caller is running on.
    ///
    /// # Errors
    ///
    /// Returns [`TryCurrentError`] when called outside a Tokio runtime.
    pub fn try_current() -> Result<Self, TryCurrentError> { Handle::try_current().map(Self::new) }

    /// Root token; cancelling it tears down everything spawned here.
    #[must_use]
    pub fn token(&self) -> &CancellationToken { &self.cancel }

    /// Returns `true` once [`shutdown`](Self::shutdown) has been requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool { self.cancel.is_cancelled() }

    /// Spawn a tracked task on the context's runtime.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn_on(task, &self.runtime)
    }

    /// Cancel every task spawned through this context and wait for them to
    /// finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}
