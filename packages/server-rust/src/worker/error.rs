use super::source::SourceError;
use super::task::ConfigurationError;

/// Why one worker could not be reconciled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureKind {
    /// The task could not be instantiated or rejected its parameters.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// Another worker in the same configuration has this name.
    #[error("duplicate worker name")]
    DuplicateName,
    /// The new parameters were rejected; every instance runs with the
    /// previous parameters again.
    #[error("new parameters rejected, previous parameters restored: {0}")]
    RolledBack(ConfigurationError),
    /// Restoring the previous parameters failed too; the worker was
    /// cancelled and dropped.
    #[error("new parameters rejected ({error}) and rollback failed ({rollback}); worker cancelled")]
    RollbackFailed {
        error: ConfigurationError,
        rollback: ConfigurationError,
    },
}

/// A worker that failed to reconcile.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("worker '{worker}': {kind}")]
pub struct WorkerFailure {
    pub worker: String,
    pub kind: FailureKind,
}

impl WorkerFailure {
    pub(crate) fn new(worker: impl Into<String>, kind: impl Into<FailureKind>) -> Self {
        Self {
            worker: worker.into(),
            kind: kind.into(),
        }
    }
}

/// Errors returned by `WorkerPool` operations.
#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    #[error("worker pool is not running")]
    NotRunning,
    #[error("worker pool has been stopped")]
    Stopped,
    #[error("worker pool requires a tokio runtime")]
    NoRuntime,
    #[error("worker pool has no workers and refresh is disabled")]
    NothingToRun,
    /// Some workers failed; all other changes were applied.
    #[error("{} worker(s) failed to reconcile: {}", .failures.len(), failed_names(.failures))]
    PartialFailure { failures: Vec<WorkerFailure> },
    #[error(transparent)]
    Source(#[from] SourceError),
}

impl WorkerPoolError {
    /// The per-worker failures of a `PartialFailure`, empty otherwise.
    #[must_use]
    pub fn failures(&self) -> &[WorkerFailure] {
        match self {
            Self::PartialFailure { failures } => failures,
            _ => &[],
        }
    }
}

fn failed_names(failures: &[WorkerFailure]) -> String {
    failures
        .iter()
        .map(|f| f.worker.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
