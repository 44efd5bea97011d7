//! Pool lifecycle state and instance tracking for graceful shutdown.
//!
//! Uses `ArcSwap` for lock-free state transitions and a `TaskTracker` that
//! follows every instance loop and every spawned execution, so `stop` can
//! wait for in-flight work to finish.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Lifecycle state of a worker pool.
///
/// State machine: Created -> Running -> Terminating -> Terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Constructed, `start()` not called yet.
    Created,
    /// Workers are scheduled and reconfiguration is accepted.
    Running,
    /// `stop()` is draining in-flight executions.
    Terminating,
    /// All instances have ended (or the forced wait gave up).
    Terminated,
}

impl PoolState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Terminating => "terminating",
            Self::Terminated => "terminated",
        }
    }
}

/// Shared lifecycle of one pool.
///
/// `graceful` is cancelled to let instances finish their current execution
/// and end; `forced` is cancelled to drop in-flight executions at their next
/// await point. Every instance derives child tokens from both.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: ArcSwap<PoolState>,
    tracker: TaskTracker,
    graceful: CancellationToken,
    forced: CancellationToken,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: ArcSwap::from_pointee(PoolState::Created),
            tracker: TaskTracker::new(),
            graceful: CancellationToken::new(),
            forced: CancellationToken::new(),
        }
    }

    pub(crate) fn state(&self) -> PoolState {
        **self.state.load()
    }

    pub(crate) fn set_state(&self, state: PoolState) {
        self.state.store(Arc::new(state));
    }

    /// Moves `from` to `to` atomically; returns the state actually observed.
    pub(crate) fn transition(&self, from: PoolState, to: PoolState) -> PoolState {
        let previous = self.state.rcu(|current| {
            if **current == from {
                Arc::new(to)
            } else {
                Arc::clone(current)
            }
        });
        *previous
    }

    pub(crate) fn graceful_token(&self) -> CancellationToken {
        self.graceful.child_token()
    }

    pub(crate) fn forced_token(&self) -> CancellationToken {
        self.forced.child_token()
    }

    /// Spawns `future` as tracked work.
    pub(crate) fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(future)
    }

    /// Number of tracked tasks (instance loops plus executions) still alive.
    pub(crate) fn live_tasks(&self) -> usize {
        self.tracker.len()
    }

    /// Signals every instance to end after its current execution.
    pub(crate) fn cancel_gracefully(&self) {
        self.graceful.cancel();
        self.tracker.close();
    }

    /// Drops in-flight executions at their next await point.
    pub(crate) fn cancel_forcibly(&self) {
        self.forced.cancel();
    }

    /// Waits until every tracked task has ended, up to `timeout`.
    ///
    /// Returns `true` if all tasks ended in time.
    pub(crate) async fn wait_for_drain(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_created() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), PoolState::Created);
        assert_eq!(lifecycle.live_tasks(), 0);
    }

    #[test]
    fn transition_only_from_expected_state() {
        let lifecycle = Lifecycle::new();
        assert_eq!(
            lifecycle.transition(PoolState::Created, PoolState::Running),
            PoolState::Created
        );
        assert_eq!(lifecycle.state(), PoolState::Running);

        // Not in Created any more, so nothing changes.
        assert_eq!(
            lifecycle.transition(PoolState::Created, PoolState::Running),
            PoolState::Running
        );
        assert_eq!(lifecycle.state(), PoolState::Running);
    }

    #[tokio::test]
    async fn drain_waits_for_tracked_tasks() {
        let lifecycle = Lifecycle::new();
        let token = lifecycle.graceful_token();
        lifecycle.spawn(async move { token.cancelled().await });
        assert_eq!(lifecycle.live_tasks(), 1);

        lifecycle.cancel_gracefully();
        assert!(lifecycle.wait_for_drain(Duration::from_secs(1)).await);
        assert_eq!(lifecycle.live_tasks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_times_out_until_forced() {
        let lifecycle = Lifecycle::new();
        let forced = lifecycle.forced_token();
        lifecycle.spawn(async move { forced.cancelled().await });

        lifecycle.cancel_gracefully();
        assert!(!lifecycle.wait_for_drain(Duration::from_millis(50)).await);

        lifecycle.cancel_forcibly();
        assert!(lifecycle.wait_for_drain(Duration::from_secs(1)).await);
    }
}
