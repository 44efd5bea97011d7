//! Registry of task factories, keyed by the `task` reference of a worker.

use std::sync::Arc;

use dashmap::DashMap;
use ebgate_core::PModeSet;

use super::task::{ConfigurationError, WorkerTask};
use crate::pull::{PullRequestDispatcher, PullWorker, PULL_WORKER_TASK};

/// Produces a fresh, unconfigured task instance.
pub type TaskFactory = Arc<dyn Fn() -> Box<dyn WorkerTask> + Send + Sync>;

// ---------------------------------------------------------------------------
// TaskRegistry
// ---------------------------------------------------------------------------

/// Maps the `task` reference of a `WorkerSpec` to a factory for its task.
///
/// Lookups happen once per worker instance when the pool adds a worker; an
/// unknown reference fails that worker only.
pub struct TaskRegistry {
    factories: DashMap<String, TaskFactory>,
}

impl TaskRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: DashMap::new(),
        }
    }

    /// Creates a registry with the Pull Worker registered under
    /// `PULL_WORKER_TASK`.
    #[must_use]
    pub fn with_pull_worker(
        pmodes: Arc<dyn PModeSet>,
        dispatcher: Arc<dyn PullRequestDispatcher>,
    ) -> Self {
        let registry = Self::new();
        registry.register(PULL_WORKER_TASK, move || {
            Box::new(PullWorker::new(Arc::clone(&pmodes), Arc::clone(&dispatcher)))
        });
        registry
    }

    /// Register `factory` under `task_ref`, replacing any previous factory.
    pub fn register<F>(&self, task_ref: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn WorkerTask> + Send + Sync + 'static,
    {
        self.factories.insert(task_ref.into(), Arc::new(factory));
    }

    #[must_use]
    pub fn contains(&self, task_ref: &str) -> bool {
        self.factories.contains_key(task_ref)
    }

    /// Create an unconfigured instance of the task registered as `task_ref`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::UnknownTask` if nothing is registered
    /// under `task_ref`.
    pub fn instantiate(&self, task_ref: &str) -> Result<Box<dyn WorkerTask>, ConfigurationError> {
        // Clone the factory out so the shard lock is not held while it runs.
        let factory = self
            .factories
            .get(task_ref)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ConfigurationError::UnknownTask {
                task: task_ref.to_string(),
            })?;
        Ok(factory())
    }

    /// Registered task references, sorted.
    #[must_use]
    pub fn task_refs(&self) -> Vec<String> {
        let mut refs: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        refs.sort();
        refs
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.task_refs())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use ebgate_core::InMemoryPModeSet;
    use tokio::sync::mpsc;

    use super::*;
    use crate::pull::ChannelDispatcher;
    use crate::worker::config::Parameters;
    use crate::worker::task::{TaskContext, TaskError};

    struct Noop;

    #[async_trait]
    impl WorkerTask for Noop {
        fn configure(&mut self, _parameters: &Parameters) -> Result<(), ConfigurationError> {
            Ok(())
        }

        async fn execute(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
            Ok(())
        }
    }

    #[test]
    fn register_and_instantiate() {
        let registry = TaskRegistry::new();
        registry.register("noop", || Box::new(Noop));

        assert!(registry.contains("noop"));
        assert!(registry.instantiate("noop").is_ok());
        assert_eq!(registry.task_refs(), vec!["noop".to_string()]);
    }

    #[test]
    fn unknown_task_is_a_configuration_error() {
        let registry = TaskRegistry::new();
        let err = registry.instantiate("missing").err().unwrap();
        assert_eq!(
            err,
            ConfigurationError::UnknownTask {
                task: "missing".to_string()
            }
        );
    }

    #[test]
    fn pull_worker_is_preregistered() {
        let (tx, _rx) = mpsc::channel(4);
        let registry = TaskRegistry::with_pull_worker(
            Arc::new(InMemoryPModeSet::new()),
            Arc::new(ChannelDispatcher::new(tx)),
        );
        assert!(registry.contains(PULL_WORKER_TASK));
        assert!(registry.instantiate(PULL_WORKER_TASK).is_ok());
    }
}
