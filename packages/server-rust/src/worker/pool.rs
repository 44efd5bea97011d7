//! The worker pool: schedules worker instances and reconciles them against
//! live configuration changes.
//!
//! All changes to the set of running workers happen under one async mutex, so
//! manual `reconfigure` calls and the periodic refresh never interleave.
//! Readers (`current_workers`, `worker_instances`) use a snapshot published at
//! the end of every reconciliation and never wait for that lock.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use arc_swap::ArcSwap;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::{Parameters, PoolConfiguration, WorkerSpec};
use super::diff::plan_reconcile;
use super::error::{FailureKind, WorkerFailure, WorkerPoolError};
use super::lifecycle::{Lifecycle, PoolState};
use super::registry::TaskRegistry;
use super::schedule::{ExecutionMode, InstanceRuntime, PendingParameters, SharedTask};
use super::source::ConfigSource;
use super::task::{ConfigurationError, TaskContext, WorkerTask};

/// Execution slots kept on top of the number of scheduled instances.
pub const POOL_OVERHEAD: usize = 2;

/// How long `stop` waits after cancelling in-flight executions.
pub const FORCED_TERMINATION_WAIT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Runtime state
// ---------------------------------------------------------------------------

/// Identity of one scheduled instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    /// Unique per scheduling; a rescheduled worker gets new ids.
    pub id: Uuid,
    /// Worker name, suffixed with `-<n>` when the worker runs several
    /// instances.
    pub name: String,
}

struct WorkerInstance {
    info: InstanceInfo,
    task: SharedTask,
    pending: PendingParameters,
    cancel: CancellationToken,
    kill: CancellationToken,
}

struct RunningWorker {
    spec: WorkerSpec,
    /// Empty for inactive workers.
    instances: Vec<WorkerInstance>,
}

impl RunningWorker {
    /// Lets in-flight executions finish; no further runs.
    fn cancel(&self) {
        for instance in &self.instances {
            instance.cancel.cancel();
        }
    }

    fn kill(&self) {
        for instance in &self.instances {
            instance.cancel.cancel();
            instance.kill.cancel();
        }
    }
}

#[derive(Debug, Clone)]
struct WorkerSnapshot {
    spec: WorkerSpec,
    instances: Vec<InstanceInfo>,
}

struct RefreshTask {
    interval_secs: u64,
    token: CancellationToken,
}

struct PoolInner {
    name: String,
    initial: PoolConfiguration,
    registry: Arc<TaskRegistry>,
    source: parking_lot::RwLock<Option<Arc<dyn ConfigSource>>>,
    lifecycle: Arc<Lifecycle>,
    /// Reconciliation lock and the running set it guards.
    workers: Mutex<BTreeMap<String, RunningWorker>>,
    applied: ArcSwap<Vec<WorkerSnapshot>>,
    capacity: Arc<Semaphore>,
    capacity_total: parking_lot::Mutex<usize>,
    refresh: parking_lot::Mutex<Option<RefreshTask>>,
    /// Serializes `refresh()` calls from the periodic loop and callers.
    refreshing: Mutex<()>,
    last_refresh: parking_lot::Mutex<SystemTime>,
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        if let Some(refresh) = self.refresh.get_mut().take() {
            refresh.token.cancel();
        }
        self.lifecycle.cancel_gracefully();
    }
}

// ---------------------------------------------------------------------------
// WorkerPool
// ---------------------------------------------------------------------------

/// A named pool of scheduled workers.
///
/// Cloning yields another handle to the same pool. Dropping the last handle
/// cancels every instance gracefully.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Creates a pool that will run `config` once started.
    #[must_use]
    pub fn new(config: PoolConfiguration, registry: Arc<TaskRegistry>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                name: config.name.clone(),
                initial: config,
                registry,
                source: parking_lot::RwLock::new(None),
                lifecycle: Arc::new(Lifecycle::new()),
                workers: Mutex::new(BTreeMap::new()),
                applied: ArcSwap::from_pointee(Vec::new()),
                capacity: Arc::new(Semaphore::new(0)),
                capacity_total: parking_lot::Mutex::new(0),
                refresh: parking_lot::Mutex::new(None),
                refreshing: Mutex::new(()),
                last_refresh: parking_lot::Mutex::new(SystemTime::now()),
            }),
        }
    }

    /// Sets the source consulted by `refresh()`.
    #[must_use]
    pub fn with_config_source(self, source: Arc<dyn ConfigSource>) -> Self {
        *self.inner.source.write() = Some(source);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn state(&self) -> PoolState {
        self.inner.lifecycle.state()
    }

    /// `true` between a successful `start()` and `stop()`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == PoolState::Running
    }

    /// Number of executions that may run at the same time.
    #[must_use]
    pub fn capacity(&self) -> usize {
        *self.inner.capacity_total.lock()
    }

    /// Current period of the configuration refresh; 0 when disabled.
    #[must_use]
    pub fn refresh_interval_secs(&self) -> u64 {
        self.inner
            .refresh
            .lock()
            .as_ref()
            .map_or(0, |refresh| refresh.interval_secs)
    }

    /// The applied worker specifications, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns `NotRunning` before `start()` and `Stopped` after `stop()`.
    pub fn current_workers(&self) -> Result<Vec<WorkerSpec>, WorkerPoolError> {
        self.ensure_running()?;
        Ok(self
            .inner
            .applied
            .load()
            .iter()
            .map(|worker| worker.spec.clone())
            .collect())
    }

    /// The scheduled instances of worker `name`, or `None` if no such worker
    /// is applied. Inactive workers have no instances.
    ///
    /// # Errors
    ///
    /// Returns `NotRunning` before `start()` and `Stopped` after `stop()`.
    pub fn worker_instances(&self, name: &str) -> Result<Option<Vec<InstanceInfo>>, WorkerPoolError> {
        self.ensure_running()?;
        Ok(self
            .inner
            .applied
            .load()
            .iter()
            .find(|worker| worker.spec.name == name)
            .map(|worker| worker.instances.clone()))
    }

    /// Schedules the initial configuration. Calling it again while running
    /// does nothing.
    ///
    /// Workers that fail to start are logged; the pool starts regardless.
    ///
    /// # Errors
    ///
    /// - `NoRuntime` outside a tokio runtime.
    /// - `NothingToRun` if there are no workers and refresh is disabled.
    /// - `Stopped` if the pool was stopped before.
    pub async fn start(&self) -> Result<(), WorkerPoolError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(WorkerPoolError::NoRuntime);
        }

        let mut workers = self.inner.workers.lock().await;
        let config = &self.inner.initial;
        match self.state() {
            PoolState::Running => {
                debug!(pool = %self.name(), "worker pool already running");
                return Ok(());
            }
            PoolState::Terminating | PoolState::Terminated => return Err(WorkerPoolError::Stopped),
            PoolState::Created => {}
        }
        if config.workers.is_empty() && config.refresh_interval_secs == 0 {
            return Err(WorkerPoolError::NothingToRun);
        }
        if self
            .inner
            .lifecycle
            .transition(PoolState::Created, PoolState::Running)
            != PoolState::Created
        {
            return Err(WorkerPoolError::Stopped);
        }

        self.grow_capacity(config.initial_instance_count() + POOL_OVERHEAD);
        *self.inner.last_refresh.lock() = SystemTime::now();
        let failures = self.apply(&mut workers, &config.workers).await;
        drop(workers);
        self.set_refresh_interval(config.refresh_interval_secs);

        if failures.is_empty() {
            info!(
                pool = %self.name(),
                workers = config.workers.len(),
                capacity = self.capacity(),
                "worker pool started"
            );
        } else {
            warn!(
                pool = %self.name(),
                workers = config.workers.len(),
                failed = failures.len(),
                "worker pool started with failed workers"
            );
        }
        Ok(())
    }

    /// Reconciles the running workers with `specs`.
    ///
    /// Removed workers are cancelled, new ones scheduled, workers with
    /// changed scheduling rescheduled and workers with changed parameters
    /// reconfigured in place. Never waits for a running execution; a busy
    /// instance takes new parameters right before its next execution.
    ///
    /// # Errors
    ///
    /// - `NotRunning` / `Stopped` if the pool is not running.
    /// - `PartialFailure` naming every worker that could not be applied; all
    ///   other changes remain in effect.
    pub async fn reconfigure(&self, specs: &[WorkerSpec]) -> Result<(), WorkerPoolError> {
        let mut workers = self.inner.workers.lock().await;
        self.ensure_running()?;
        let failures = self.apply(&mut workers, specs).await;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(WorkerPoolError::PartialFailure { failures })
        }
    }

    /// Reloads the configuration source if it reports a change and
    /// reconciles against it. Returns whether a reload happened.
    ///
    /// Also reschedules the periodic refresh if its interval changed.
    ///
    /// # Errors
    ///
    /// - `NotRunning` / `Stopped` if the pool is not running.
    /// - `Source` if the source cannot be checked or read.
    /// - `PartialFailure` as for `reconfigure`.
    pub async fn refresh(&self) -> Result<bool, WorkerPoolError> {
        let _refreshing = self.inner.refreshing.lock().await;
        self.ensure_running()?;
        let Some(source) = self.inner.source.read().clone() else {
            return Ok(false);
        };

        let since = *self.inner.last_refresh.lock();
        let checked_at = SystemTime::now();
        if !source.has_changed(since).await? {
            debug!(pool = %self.name(), "pool configuration unchanged");
            return Ok(false);
        }
        let config = source.reload().await?;
        *self.inner.last_refresh.lock() = checked_at;

        info!(pool = %self.name(), workers = config.workers.len(), "pool configuration changed");
        let result = self.reconfigure(&config.workers).await;
        self.set_refresh_interval(config.refresh_interval_secs);
        result.map(|()| true)
    }

    /// Stops the pool.
    ///
    /// Lets in-flight executions finish for up to `timeout`, then cancels
    /// them and waits up to `FORCED_TERMINATION_WAIT` more.
    pub async fn stop(&self, timeout: Duration) {
        let lifecycle = &self.inner.lifecycle;
        match lifecycle.transition(PoolState::Running, PoolState::Terminating) {
            PoolState::Running => {}
            PoolState::Created => {
                lifecycle.transition(PoolState::Created, PoolState::Terminated);
                lifecycle.cancel_gracefully();
                info!(pool = %self.name(), "worker pool stopped before start");
                return;
            }
            PoolState::Terminating | PoolState::Terminated => return,
        }

        if let Some(refresh) = self.inner.refresh.lock().take() {
            refresh.token.cancel();
        }
        info!(
            pool = %self.name(),
            live = lifecycle.live_tasks(),
            "stopping worker pool"
        );
        lifecycle.cancel_gracefully();

        if !lifecycle.wait_for_drain(timeout).await {
            warn!(
                pool = %self.name(),
                remaining = lifecycle.live_tasks(),
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                "graceful stop timed out, cancelling in-flight executions"
            );
            lifecycle.cancel_forcibly();
            if !lifecycle.wait_for_drain(FORCED_TERMINATION_WAIT).await {
                error!(
                    pool = %self.name(),
                    remaining = lifecycle.live_tasks(),
                    "worker executions still running after forced cancellation"
                );
            }
        }

        lifecycle.set_state(PoolState::Terminated);
        info!(pool = %self.name(), "worker pool stopped");
    }

    /// Runs `stop(timeout)` on its own task so the caller never waits.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn shutdown_in_background(&self, timeout: Duration) -> JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move { pool.stop(timeout).await })
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    /// Applies `target` to the running set and returns the failures.
    async fn apply(
        &self,
        workers: &mut BTreeMap<String, RunningWorker>,
        target: &[WorkerSpec],
    ) -> Vec<WorkerFailure> {
        let current: Vec<WorkerSpec> = workers.values().map(|w| w.spec.clone()).collect();
        let plan = plan_reconcile(&current, target);
        if plan.is_empty() {
            debug!(pool = %self.name(), "worker configuration unchanged");
            return Vec::new();
        }

        let mut failures: Vec<WorkerFailure> = plan
            .duplicates
            .iter()
            .map(|name| WorkerFailure::new(name.as_str(), FailureKind::DuplicateName))
            .collect();

        // Rescheduled workers are removed here and re-added below.
        for name in plan
            .removed
            .iter()
            .chain(plan.rescheduled.iter().map(|spec| &spec.name))
        {
            if let Some(worker) = workers.remove(name) {
                worker.cancel();
                info!(pool = %self.name(), worker = %name, "worker cancelled");
            }
        }

        for spec in plan.added.iter().chain(&plan.rescheduled) {
            match self.launch(spec) {
                Ok(worker) => {
                    workers.insert(spec.name.clone(), worker);
                }
                Err(err) => failures.push(WorkerFailure::new(spec.name.as_str(), err)),
            }
        }

        for spec in &plan.reparameterized {
            let Some(worker) = workers.get_mut(&spec.name) else {
                continue;
            };
            if let Err(kind) = reparameterize(&self.inner.registry, worker, spec) {
                if matches!(kind, FailureKind::RollbackFailed { .. }) {
                    if let Some(worker) = workers.remove(&spec.name) {
                        worker.kill();
                    }
                }
                failures.push(WorkerFailure::new(spec.name.as_str(), kind));
            } else {
                info!(pool = %self.name(), worker = %spec.name, "worker parameters updated");
            }
        }

        for spec in &plan.updated {
            if let Some(worker) = workers.get_mut(&spec.name) {
                worker.spec = spec.clone();
            }
        }

        let instances: usize = workers.values().map(|w| w.instances.len()).sum();
        self.grow_capacity(instances + POOL_OVERHEAD);
        self.publish(workers);

        for failure in &failures {
            warn!(
                pool = %self.name(),
                worker = %failure.worker,
                error = %failure.kind,
                "worker reconciliation failed"
            );
        }
        failures
    }

    /// Instantiates, configures and schedules every instance of `spec`.
    ///
    /// Nothing is scheduled unless all instances could be configured.
    fn launch(&self, spec: &WorkerSpec) -> Result<RunningWorker, ConfigurationError> {
        if !spec.active {
            debug!(pool = %self.name(), worker = %spec.name, "worker inactive");
            return Ok(RunningWorker {
                spec: spec.clone(),
                instances: Vec::new(),
            });
        }

        let count = spec.effective_concurrency();
        let mut tasks = Vec::with_capacity(count);
        for _ in 0..count {
            let mut task = self.inner.registry.instantiate(&spec.task)?;
            task.configure(&spec.parameters)?;
            tasks.push(task);
        }

        let mode = ExecutionMode::resolve(spec.delay, spec.interval);
        let instances = tasks
            .into_iter()
            .enumerate()
            .map(|(index, task)| {
                let name = if count > 1 {
                    format!("{}-{}", spec.name, index + 1)
                } else {
                    spec.name.clone()
                };
                self.spawn_instance(&spec.name, name, task, mode)
            })
            .collect();

        info!(
            pool = %self.name(),
            worker = %spec.name,
            task = %spec.task,
            instances = count,
            mode = ?mode,
            "worker scheduled"
        );
        Ok(RunningWorker {
            spec: spec.clone(),
            instances,
        })
    }

    fn spawn_instance(
        &self,
        worker: &str,
        name: String,
        task: Box<dyn WorkerTask>,
        mode: ExecutionMode,
    ) -> WorkerInstance {
        let task: SharedTask = Arc::new(Mutex::new(task));
        let pending = PendingParameters::default();
        let cancel = self.inner.lifecycle.graceful_token();
        let kill = self.inner.lifecycle.forced_token();
        let runtime = InstanceRuntime {
            ctx: TaskContext {
                pool: self.inner.name.clone(),
                worker: worker.to_string(),
                instance: name.clone(),
            },
            task: Arc::clone(&task),
            pending: Arc::clone(&pending),
            mode,
            capacity: Arc::clone(&self.inner.capacity),
            cancel: cancel.clone(),
            kill: kill.clone(),
            lifecycle: Arc::clone(&self.inner.lifecycle),
        };
        self.inner.lifecycle.spawn(runtime.run());

        WorkerInstance {
            info: InstanceInfo {
                id: Uuid::new_v4(),
                name,
            },
            task,
            pending,
            cancel,
            kill,
        }
    }

    fn grow_capacity(&self, required: usize) {
        let mut total = self.inner.capacity_total.lock();
        if required > *total {
            self.inner.capacity.add_permits(required - *total);
            debug!(pool = %self.name(), from = *total, to = required, "pool capacity grown");
            *total = required;
        }
    }

    fn publish(&self, workers: &BTreeMap<String, RunningWorker>) {
        let snapshot = workers
            .values()
            .map(|worker| WorkerSnapshot {
                spec: worker.spec.clone(),
                instances: worker.instances.iter().map(|i| i.info.clone()).collect(),
            })
            .collect();
        self.inner.applied.store(Arc::new(snapshot));
    }

    fn ensure_running(&self) -> Result<(), WorkerPoolError> {
        match self.state() {
            PoolState::Running => Ok(()),
            PoolState::Created => Err(WorkerPoolError::NotRunning),
            PoolState::Terminating | PoolState::Terminated => Err(WorkerPoolError::Stopped),
        }
    }

    // -----------------------------------------------------------------------
    // Refresh
    // -----------------------------------------------------------------------

    /// (Re)schedules the periodic refresh; 0 disables it.
    fn set_refresh_interval(&self, interval_secs: u64) {
        let mut slot = self.inner.refresh.lock();
        if slot.as_ref().map(|refresh| refresh.interval_secs) == Some(interval_secs) {
            return;
        }
        if let Some(previous) = slot.take() {
            previous.token.cancel();
        }
        if interval_secs == 0 || !self.is_running() {
            debug!(pool = %self.name(), "configuration refresh disabled");
            return;
        }

        let token = self.inner.lifecycle.graceful_token();
        tokio::spawn(refresh_loop(
            Arc::downgrade(&self.inner),
            Duration::from_secs(interval_secs),
            token.clone(),
        ));
        *slot = Some(RefreshTask {
            interval_secs,
            token,
        });
        info!(pool = %self.name(), interval_secs, "configuration refresh scheduled");
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}

/// Applies new parameters to every live instance of `worker`, restoring the
/// previous parameters on all of them if any instance rejects the change.
///
/// Idle instances are reconfigured directly. An instance in the middle of an
/// execution is never waited for: the parameters are checked against a fresh
/// task from `registry` and handed to the instance for its next execution.
fn reparameterize(
    registry: &TaskRegistry,
    worker: &mut RunningWorker,
    spec: &WorkerSpec,
) -> Result<(), FailureKind> {
    let previous = worker.spec.parameters.clone();
    let mut guards: Vec<_> = worker
        .instances
        .iter()
        .map(|instance| instance.task.try_lock().ok())
        .collect();

    if guards.iter().any(Option::is_none) {
        registry
            .instantiate(&spec.task)
            .and_then(|mut scratch| scratch.configure(&spec.parameters))
            .map_err(FailureKind::RolledBack)?;
    }

    // Deferred parameters each instance held before this change.
    let mut earlier: Vec<Option<Parameters>> = Vec::with_capacity(guards.len());
    for index in 0..guards.len() {
        let pending = &worker.instances[index].pending;
        let result = match guards[index].as_mut() {
            Some(task) => task.configure(&spec.parameters).map(|()| pending.lock().take()),
            None => Ok(pending.lock().replace(spec.parameters.clone())),
        };
        match result {
            Ok(held) => earlier.push(held),
            Err(error) => {
                let restored = roll_back(
                    &worker.instances[..=index],
                    &mut guards[..=index],
                    earlier,
                    &previous,
                );
                return Err(match restored {
                    Ok(()) => FailureKind::RolledBack(error),
                    Err(rollback) => FailureKind::RollbackFailed { error, rollback },
                });
            }
        }
    }

    let deferred = guards.iter().filter(|guard| guard.is_none()).count();
    drop(guards);
    if deferred > 0 {
        debug!(worker = %spec.name, deferred, "parameters deferred until the next execution");
    }
    worker.spec = spec.clone();
    Ok(())
}

fn roll_back(
    instances: &[WorkerInstance],
    guards: &mut [Option<tokio::sync::MutexGuard<'_, Box<dyn WorkerTask>>>],
    earlier: Vec<Option<Parameters>>,
    previous: &Parameters,
) -> Result<(), ConfigurationError> {
    let mut earlier = earlier.into_iter();
    for (instance, guard) in instances.iter().zip(guards) {
        let held = earlier.next().flatten();
        match guard {
            Some(task) => {
                *instance.pending.lock() = None;
                task.configure(previous)?;
            }
            None => *instance.pending.lock() = held,
        }
    }
    Ok(())
}

async fn refresh_loop(pool: Weak<PoolInner>, period: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {
                let Some(inner) = pool.upgrade() else { break };
                let pool = WorkerPool { inner };
                match pool.refresh().await {
                    Ok(_) => {}
                    Err(WorkerPoolError::NotRunning | WorkerPoolError::Stopped) => break,
                    Err(err) => warn!(pool = %pool.name(), error = %err, "configuration refresh failed"),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
