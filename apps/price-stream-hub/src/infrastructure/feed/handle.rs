//! Running tick source handle.

use std::fmt::Display;
use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A spawned tick source that can be stopped independently of the process.
#[derive(Debug)]
pub struct SourceHandle {
    name: &'static str,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SourceHandle {
    /// Spawn `source` as a background task. `cancel` must be the token the
    /// source itself watches.
    pub fn spawn<F, E>(name: &'static str, cancel: CancellationToken, source: F) -> Self
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let task = tokio::spawn(async move {
            match source.await {
                Ok(()) => tracing::info!(source = name, "Tick source finished"),
                Err(e) => tracing::error!(source = name, error = %e, "Tick source failed"),
            }
        });
        Self { name, cancel, task }
    }

    /// Source name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the task is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Cancel the source and wait for it to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(source = self.name, error = %e, "Tick source task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn stop_cancels_and_joins() {
        let cancel = CancellationToken::new();
        let watched = cancel.clone();
        let handle = SourceHandle::spawn("test", cancel, async move {
            watched.cancelled().await;
            Ok::<(), String>(())
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(handle.is_running());
        assert_eq!(handle.name(), "test");

        tokio::time::timeout(Duration::from_secs(1), handle.stop())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failed_source_is_not_running() {
        let handle = SourceHandle::spawn("broken", CancellationToken::new(), async {
            Err::<(), _>("boom")
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_running());
        handle.stop().await;
    }
}
