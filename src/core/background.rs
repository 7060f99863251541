//! # Background Task Submission
//!
//! Fire-and-forget side effects (metric mirroring, deferred invalidation,
//! response cache writes, warmup) are submitted here instead of being spawned
//! ad hoc. Each task's failure is logged and never reaches the request that
//! submitted it. The tracker lets the process drain outstanding work on
//! shutdown.

use std::future::Future;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::core::error::ServiceResult;

/// Handle for submitting detached work.
#[derive(Debug, Clone, Default)]
pub struct BackgroundTasks {
    tracker: TaskTracker,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self {
            tracker: TaskTracker::new(),
        }
    }

    /// Submit a task. Errors are logged under `name`.
    ///
    /// Outside a tokio runtime the task is dropped with a warning.
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ServiceResult<()>> + Send + 'static,
    {
        if tokio::runtime::Handle::try_current().is_err() {
            warn!(task = name, "No async runtime available, dropping background task");
            return;
        }

        self.tracker.spawn(async move {
            match task.await {
                Ok(()) => debug!(task = name, "Background task completed"),
                Err(e) => warn!(task = name, error = %e, "Background task failed"),
            }
        });
    }

    /// Number of tasks still running.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every task submitted so far, then accept new tasks again.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Close the tracker and wait for outstanding tasks.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}
