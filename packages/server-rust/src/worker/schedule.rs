//! Execution modes and the supervised loop that drives one worker instance.
//!
//! Every execution runs in its own tracked tokio task holding a capacity
//! permit, so a panicking or failing task never takes the loop down with it.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::config::Parameters;
use super::interval::Interval;
use super::lifecycle::Lifecycle;
use super::task::{TaskContext, TaskError, WorkerTask};

/// Counter of finished executions, labelled by `worker` and `outcome`.
pub const EXECUTIONS_METRIC: &str = "ebgate_worker_executions_total";

/// A task instance shared between its instance loop and reconfiguration.
pub(crate) type SharedTask = Arc<Mutex<Box<dyn WorkerTask>>>;

/// Parameters accepted while an execution held the task, applied right before
/// the next execution.
pub(crate) type PendingParameters = Arc<parking_lot::Mutex<Option<Parameters>>>;

// ---------------------------------------------------------------------------
// ExecutionMode
// ---------------------------------------------------------------------------

/// How an instance is scheduled, resolved once from a worker's delay and
/// interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Run once, immediately.
    Once,
    /// Run once after the delay.
    Delayed(Duration),
    /// Run repeatedly; `period` separates the end of one execution from the
    /// start of the next.
    FixedDelay { initial: Duration, period: Duration },
    /// Run back-to-back until cancelled or a panic.
    Continuous { initial: Duration },
}

impl ExecutionMode {
    /// Resolve the mode for a worker.
    ///
    /// For fixed-delay workers the initial delay is truncated to whole units
    /// of the interval.
    #[must_use]
    pub fn resolve(delay: Duration, interval: Option<Interval>) -> Self {
        match interval {
            None if delay.is_zero() => Self::Once,
            None => Self::Delayed(delay),
            Some(interval) if interval.is_continuous() => Self::Continuous { initial: delay },
            Some(interval) => Self::FixedDelay {
                initial: interval.unit.truncate(delay),
                period: interval.duration(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Result of one scheduled execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Completed,
    Failed,
    Panicked,
    Interrupted,
    /// Never started, or dropped by a forced cancel.
    Cancelled,
}

impl Outcome {
    fn metric_label(self) -> Option<&'static str> {
        match self {
            Self::Completed => Some("completed"),
            Self::Failed => Some("failed"),
            Self::Panicked => Some("panicked"),
            Self::Interrupted => Some("interrupted"),
            Self::Cancelled => None,
        }
    }

    fn ends_instance(self) -> bool {
        matches!(self, Self::Interrupted | Self::Cancelled)
    }
}

// ---------------------------------------------------------------------------
// InstanceRuntime
// ---------------------------------------------------------------------------

/// Everything one instance loop needs.
pub(crate) struct InstanceRuntime {
    pub ctx: TaskContext,
    pub task: SharedTask,
    pub pending: PendingParameters,
    pub mode: ExecutionMode,
    pub capacity: Arc<Semaphore>,
    /// Ends the instance once the current execution (if any) completes.
    pub cancel: CancellationToken,
    /// Drops the current execution at its next await point.
    pub kill: CancellationToken,
    pub lifecycle: Arc<Lifecycle>,
}

impl InstanceRuntime {
    /// Drive the instance according to its mode until it ends.
    pub(crate) async fn run(self) {
        match self.mode {
            ExecutionMode::Once => {
                self.execute().await;
            }
            ExecutionMode::Delayed(delay) => {
                if self.pause(delay).await {
                    self.execute().await;
                }
            }
            ExecutionMode::FixedDelay { initial, period } => {
                if self.pause(initial).await {
                    loop {
                        if self.execute().await.ends_instance() || !self.pause(period).await {
                            break;
                        }
                    }
                }
            }
            ExecutionMode::Continuous { initial } => {
                if self.pause(initial).await {
                    self.run_continuously().await;
                }
            }
        }
        debug!(
            pool = %self.ctx.pool,
            instance = %self.ctx.instance,
            "worker instance ended"
        );
    }

    async fn run_continuously(&self) {
        loop {
            match self.execute().await {
                Outcome::Panicked => {
                    error!(
                        pool = %self.ctx.pool,
                        worker = %self.ctx.worker,
                        instance = %self.ctx.instance,
                        "continuous worker stopped after a panic"
                    );
                    return;
                }
                outcome if outcome.ends_instance() => return,
                _ => {}
            }
            if self.cancel.is_cancelled() {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    /// Sleeps for `delay`; returns `false` if the instance was cancelled.
    async fn pause(&self, delay: Duration) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        if delay.is_zero() {
            return true;
        }
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }

    async fn execute(&self) -> Outcome {
        let permit = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Outcome::Cancelled,
            permit = Arc::clone(&self.capacity).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return Outcome::Cancelled,
            },
        };

        let task = Arc::clone(&self.task);
        let pending = Arc::clone(&self.pending);
        let ctx = self.ctx.clone();
        let kill = self.kill.clone();
        let handle = self.lifecycle.spawn(async move {
            let _permit = permit;
            let mut guard = tokio::select! {
                biased;
                () = kill.cancelled() => return None,
                guard = task.lock() => guard,
            };
            let update = pending.lock().take();
            if let Some(parameters) = update {
                if let Err(err) = guard.configure(&parameters) {
                    warn!(
                        pool = %ctx.pool,
                        instance = %ctx.instance,
                        error = %err,
                        "deferred parameters rejected, keeping the previous ones"
                    );
                } else {
                    debug!(pool = %ctx.pool, instance = %ctx.instance, "deferred parameters applied");
                }
            }
            tokio::select! {
                biased;
                () = kill.cancelled() => None,
                result = guard.execute(&ctx) => Some(result),
            }
        });

        let outcome = match handle.await {
            Ok(Some(Ok(()))) => Outcome::Completed,
            Ok(Some(Err(TaskError::Interrupted))) => Outcome::Interrupted,
            Ok(Some(Err(TaskError::Failed(err)))) => {
                warn!(
                    pool = %self.ctx.pool,
                    worker = %self.ctx.worker,
                    instance = %self.ctx.instance,
                    error = %err,
                    "worker execution failed"
                );
                Outcome::Failed
            }
            Ok(None) => Outcome::Cancelled,
            Err(join_err) if join_err.is_panic() => {
                let payload = join_err.into_panic();
                error!(
                    pool = %self.ctx.pool,
                    worker = %self.ctx.worker,
                    instance = %self.ctx.instance,
                    panic = %panic_message(payload.as_ref()),
                    "worker execution panicked"
                );
                Outcome::Panicked
            }
            Err(_) => Outcome::Cancelled,
        };

        if let Some(label) = outcome.metric_label() {
            metrics::counter!(
                EXECUTIONS_METRIC,
                "worker" => self.ctx.worker.clone(),
                "outcome" => label
            )
            .increment(1);
        }
        outcome
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::worker::config::Parameters;
    use crate::worker::interval::TimeUnit;
    use crate::worker::task::ConfigurationError;

    /// Counts executions; behaviour per call is decided by `on_call`.
    struct Scripted {
        calls: Arc<AtomicU32>,
        on_call: Box<dyn Fn(u32) -> Result<(), TaskError> + Send>,
    }

    #[async_trait]
    impl WorkerTask for Scripted {
        fn configure(&mut self, _parameters: &Parameters) -> Result<(), ConfigurationError> {
            Ok(())
        }

        async fn execute(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            (self.on_call)(call)
        }
    }

    /// Sleeps for a fixed time per execution.
    struct Slow {
        started: Arc<AtomicU32>,
        finished: Arc<AtomicU32>,
        duration: Duration,
    }

    #[async_trait]
    impl WorkerTask for Slow {
        fn configure(&mut self, _parameters: &Parameters) -> Result<(), ConfigurationError> {
            Ok(())
        }

        async fn execute(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.duration).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn instance(task: impl WorkerTask, mode: ExecutionMode) -> InstanceRuntime {
        let lifecycle = Arc::new(Lifecycle::new());
        let task: Box<dyn WorkerTask> = Box::new(task);
        InstanceRuntime {
            ctx: TaskContext {
                pool: "test".to_string(),
                worker: "w".to_string(),
                instance: "w".to_string(),
            },
            task: Arc::new(Mutex::new(task)),
            pending: PendingParameters::default(),
            mode,
            capacity: Arc::new(Semaphore::new(2)),
            cancel: lifecycle.graceful_token(),
            kill: lifecycle.forced_token(),
            lifecycle,
        }
    }

    #[test]
    fn resolve_modes() {
        let delay = Duration::from_millis(2_500);
        assert_eq!(ExecutionMode::resolve(Duration::ZERO, None), ExecutionMode::Once);
        assert_eq!(ExecutionMode::resolve(delay, None), ExecutionMode::Delayed(delay));
        assert_eq!(
            ExecutionMode::resolve(delay, Some(Interval::seconds(10))),
            ExecutionMode::FixedDelay {
                initial: Duration::from_secs(2),
                period: Duration::from_secs(10),
            }
        );
        assert_eq!(
            ExecutionMode::resolve(delay, Some(Interval::new(0, TimeUnit::Minutes))),
            ExecutionMode::Continuous { initial: delay }
        );
    }

    #[tokio::test]
    async fn once_runs_a_single_time() {
        let calls = Arc::new(AtomicU32::new(0));
        let task = Scripted {
            calls: calls.clone(),
            on_call: Box::new(|_| Ok(())),
        };
        instance(task, ExecutionMode::Once).run().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_delay_repeats_after_each_completion() {
        let calls = Arc::new(AtomicU32::new(0));
        let task = Scripted {
            calls: calls.clone(),
            on_call: Box::new(|call| {
                if call % 2 == 0 {
                    Err(TaskError::failed("even call"))
                } else {
                    Ok(())
                }
            }),
        };
        let rt = instance(
            task,
            ExecutionMode::FixedDelay {
                initial: Duration::ZERO,
                period: Duration::from_secs(10),
            },
        );
        let cancel = rt.cancel.clone();
        let handle = tokio::spawn(rt.run());

        tokio::time::sleep(Duration::from_secs(35)).await;
        // t = 0, 10, 20, 30; failures do not stop the schedule.
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_runs_once_after_the_delay() {
        let calls = Arc::new(AtomicU32::new(0));
        let task = Scripted {
            calls: calls.clone(),
            on_call: Box::new(|_| Ok(())),
        };
        let handle = tokio::spawn(instance(task, ExecutionMode::Delayed(Duration::from_secs(3))).run());

        tokio::time::sleep(Duration::from_millis(2_900)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(handle.is_finished());
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_delay_waits_the_initial_delay_first() {
        let calls = Arc::new(AtomicU32::new(0));
        let task = Scripted {
            calls: calls.clone(),
            on_call: Box::new(|_| Ok(())),
        };
        let rt = instance(
            task,
            ExecutionMode::FixedDelay {
                initial: Duration::from_secs(2),
                period: Duration::from_secs(10),
            },
        );
        let cancel = rt.cancel.clone();
        let handle = tokio::spawn(rt.run());

        tokio::time::sleep(Duration::from_millis(1_900)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // t = 11.9
        tokio::time::sleep(Duration::from_millis(9_800)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // t = 12.1
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_initial_delay_skips_execution() {
        for mode in [
            ExecutionMode::Delayed(Duration::from_secs(5)),
            ExecutionMode::FixedDelay {
                initial: Duration::from_secs(5),
                period: Duration::from_secs(10),
            },
            ExecutionMode::Continuous {
                initial: Duration::from_secs(5),
            },
        ] {
            let calls = Arc::new(AtomicU32::new(0));
            let task = Scripted {
                calls: calls.clone(),
                on_call: Box::new(|_| Ok(())),
            };
            let rt = instance(task, mode);
            let cancel = rt.cancel.clone();
            let handle = tokio::spawn(rt.run());

            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
            handle.await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            assert_eq!(calls.load(Ordering::SeqCst), 0, "{mode:?}");
        }
    }

    #[tokio::test]
    async fn pending_parameters_apply_before_next_execution() {
        struct Remembering {
            current: Parameters,
            executed_with: Arc<parking_lot::Mutex<Vec<Parameters>>>,
        }

        #[async_trait]
        impl WorkerTask for Remembering {
            fn configure(&mut self, parameters: &Parameters) -> Result<(), ConfigurationError> {
                if parameters.get_bool("reject")? == Some(true) {
                    return Err(ConfigurationError::Invalid("rejected".to_string()));
                }
                self.current = parameters.clone();
                Ok(())
            }

            async fn execute(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
                self.executed_with.lock().push(self.current.clone());
                Ok(())
            }
        }

        let executed_with = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let rt = instance(
            Remembering {
                current: Parameters::new().with("k", "v1"),
                executed_with: executed_with.clone(),
            },
            ExecutionMode::Once,
        );
        let v2 = Parameters::new().with("k", "v2");
        *rt.pending.lock() = Some(v2.clone());
        let pending = Arc::clone(&rt.pending);
        rt.run().await;

        assert_eq!(*executed_with.lock(), vec![v2.clone()]);
        assert!(pending.lock().is_none());

        // A rejected deferred update leaves the task as it was.
        let rt = instance(
            Remembering {
                current: v2.clone(),
                executed_with: executed_with.clone(),
            },
            ExecutionMode::Once,
        );
        *rt.pending.lock() = Some(Parameters::new().with("reject", true));
        rt.run().await;
        assert_eq!(executed_with.lock().last(), Some(&v2));
    }

    #[tokio::test]
    async fn continuous_survives_failed_iterations() {
        let calls = Arc::new(AtomicU32::new(0));
        let rt = instance(
            Scripted {
                calls: calls.clone(),
                on_call: Box::new(|_| Ok(())),
            },
            ExecutionMode::Continuous {
                initial: Duration::ZERO,
            },
        );
        let cancel = rt.cancel.clone();
        *rt.task.lock().await = Box::new(Scripted {
            calls: calls.clone(),
            on_call: Box::new(move |call| {
                if call == 5 {
                    cancel.cancel();
                    Ok(())
                } else {
                    Err(TaskError::failed("flaky"))
                }
            }),
        });

        rt.run().await;
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn continuous_stops_after_panic() {
        let calls = Arc::new(AtomicU32::new(0));
        let task = Scripted {
            calls: calls.clone(),
            on_call: Box::new(|call| {
                assert!(call < 3, "fatal on third call");
                Ok(())
            }),
        };
        instance(
            task,
            ExecutionMode::Continuous {
                initial: Duration::ZERO,
            },
        )
        .run()
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn interrupted_ends_the_instance() {
        let calls = Arc::new(AtomicU32::new(0));
        let task = Scripted {
            calls: calls.clone(),
            on_call: Box::new(|_| Err(TaskError::Interrupted)),
        };
        instance(
            task,
            ExecutionMode::Continuous {
                initial: Duration::ZERO,
            },
        )
        .run()
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_cancel_lets_current_execution_finish() {
        let started = Arc::new(AtomicU32::new(0));
        let finished = Arc::new(AtomicU32::new(0));
        let rt = instance(
            Slow {
                started: started.clone(),
                finished: finished.clone(),
                duration: Duration::from_secs(5),
            },
            ExecutionMode::FixedDelay {
                initial: Duration::ZERO,
                period: Duration::from_secs(1),
            },
        );
        let cancel = rt.cancel.clone();
        let handle = tokio::spawn(rt.run());

        while started.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_cancel_drops_current_execution() {
        let started = Arc::new(AtomicU32::new(0));
        let finished = Arc::new(AtomicU32::new(0));
        let rt = instance(
            Slow {
                started: started.clone(),
                finished: finished.clone(),
                duration: Duration::from_secs(3_600),
            },
            ExecutionMode::Once,
        );
        let kill = rt.kill.clone();
        let handle = tokio::spawn(rt.run());

        while started.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        kill.cancel();
        handle.await.unwrap();

        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancelled_before_start_never_executes() {
        let calls = Arc::new(AtomicU32::new(0));
        let rt = instance(
            Scripted {
                calls: calls.clone(),
                on_call: Box::new(|_| Ok(())),
            },
            ExecutionMode::Once,
        );
        rt.cancel.cancel();
        rt.run().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
