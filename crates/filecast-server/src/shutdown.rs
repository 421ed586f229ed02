//! Stop signalling and the bounded wait for the HTTP listener to drain.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How a drained task finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The task finished inside the grace period.
    Completed,
    /// The grace period ran out and the task was aborted.
    Aborted,
    /// The task had already been drained by an earlier caller.
    AlreadyDrained,
}

/// Shared stop signal for every service component.
#[derive(Debug, Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a coordinator that has not been triggered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone of the underlying token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Trigger the stop signal. Repeated calls are no-ops.
    pub fn shutdown(&self) {
        if !self.is_shutting_down() {
            info!("shutdown requested");
        }
        self.token.cancel();
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the stop signal fires.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

/// Wait up to `grace` for `task`, aborting it if the wait runs out.
///
/// Takes the handle out of `slot` so only the first caller waits on it.
pub async fn drain<T>(slot: &mut Option<JoinHandle<T>>, grace: Duration, what: &str) -> DrainOutcome {
    let Some(mut task) = slot.take() else {
        return DrainOutcome::AlreadyDrained;
    };
    if tokio::time::timeout(grace, &mut task).await.is_ok() {
        info!(task = what, "drained");
        DrainOutcome::Completed
    } else {
        warn!(task = what, ?grace, "grace period elapsed, aborting");
        task.abort();
        let _ = task.await;
        DrainOutcome::Aborted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_not_shutting_down() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_shutting_down());
    }

    #[test]
    fn token_propagation() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        assert!(!token.is_cancelled());
        coord.shutdown();
        assert!(token.is_cancelled());
    }

    #[test]
    fn multiple_shutdown_calls_idempotent() {
        let coord = ShutdownCoordinator::new();
        coord.shutdown();
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
    }

    #[test]
    fn clones_share_the_signal() {
        let coord = ShutdownCoordinator::new();
        let other = coord.clone();
        other.shutdown();
        assert!(coord.is_shutting_down());
    }

    #[tokio::test]
    async fn cancelled_future_resolves() {
        let coord = ShutdownCoordinator::new();
        let waiter = tokio::spawn({
            let coord = coord.clone();
            async move { coord.cancelled().await }
        });
        coord.shutdown();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn drain_completes_cooperative_task() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let mut slot = Some(tokio::spawn(async move { token.cancelled().await }));
        coord.shutdown();
        let outcome = drain(&mut slot, Duration::from_secs(5), "listener").await;
        assert_eq!(outcome, DrainOutcome::Completed);
        assert!(slot.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn drain_aborts_after_grace() {
        let mut slot = Some(tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        }));
        let outcome = drain(&mut slot, Duration::from_secs(5), "listener").await;
        assert_eq!(outcome, DrainOutcome::Aborted);
    }

    #[tokio::test]
    async fn second_drain_is_noop() {
        let mut slot = Some(tokio::spawn(async {}));
        let _ = drain(&mut slot, Duration::from_secs(1), "listener").await;
        let outcome = drain(&mut slot, Duration::from_secs(1), "listener").await;
        assert_eq!(outcome, DrainOutcome::AlreadyDrained);
    }
}
