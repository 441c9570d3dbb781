//! Fire-and-forget background work tracking.
//!
//! Slow operations (persistence writes, trade recording) run off the
//! owner task; their results arrive via completion notifications, not
//! return values. At shutdown the outstanding set is drained with a
//! bounded wait; a timeout is reported but not treated as fatal.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Tracks spawned background tasks for bounded shutdown.
#[derive(Default)]
pub struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a fire-and-forget task. Finished handles are pruned on each
    /// spawn to bound memory.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handles.retain(|h| !h.is_finished());
        self.handles.push(tokio::spawn(future));
    }

    /// Number of tasks not yet observed finished.
    pub fn outstanding(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }

    /// Wait for all outstanding tasks, bounded by `timeout`.
    ///
    /// Returns true if everything finished in time. On timeout the
    /// stragglers are left running (there is no cancellation; a later
    /// state change supersedes their work).
    pub async fn shutdown(self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        let total = self.handles.len();

        for handle in self.handles {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(error = %e, "Background task failed");
                }
                Err(_) => {
                    warn!(total, "Timed out waiting for background tasks at shutdown");
                    return false;
                }
            }
        }

        debug!(total, "Background tasks drained");
        true
    }
}
