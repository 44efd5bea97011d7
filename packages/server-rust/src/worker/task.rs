//! The contract implemented by every schedulable unit of work.

use async_trait::async_trait;

use super::config::Parameters;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A worker specification or task parameter set is structurally invalid.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("no task registered under '{task}'")]
    UnknownTask { task: String },
    #[error("missing required parameter '{name}'")]
    MissingParameter { name: String },
    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },
    #[error("{0}")]
    Invalid(String),
}

impl ConfigurationError {
    pub(crate) fn invalid_parameter(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Failure of a single task execution.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The execution observed a cancellation request and stopped early.
    ///
    /// Ends the instance quietly; it is not counted as a failure.
    #[error("task interrupted")]
    Interrupted,
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl TaskError {
    pub fn failed(message: impl std::fmt::Display) -> Self {
        Self::Failed(anyhow::anyhow!("{message}"))
    }
}

// ---------------------------------------------------------------------------
// TaskContext
// ---------------------------------------------------------------------------

/// Identity of the instance an execution runs as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskContext {
    /// Name of the owning worker pool.
    pub pool: String,
    /// Name of the worker specification.
    pub worker: String,
    /// Instance name; equals `worker` unless the worker runs several
    /// concurrent instances, in which case a `-<n>` suffix is appended.
    pub instance: String,
}

// ---------------------------------------------------------------------------
// WorkerTask trait
// ---------------------------------------------------------------------------

/// A unit of recurring or one-shot work run by the worker pool.
///
/// Instances are created by the `TaskRegistry`, configured once before their
/// first execution and possibly reconfigured between executions when only the
/// worker's parameters change.
#[async_trait]
pub trait WorkerTask: Send + 'static {
    /// Apply the worker's parameters.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` when required parameters are missing or
    /// have the wrong shape. The task must keep its previous configuration in
    /// that case.
    fn configure(&mut self, parameters: &Parameters) -> Result<(), ConfigurationError>;

    /// Perform one unit of work.
    ///
    /// # Errors
    ///
    /// Returns `TaskError` on failure. The pool logs it and keeps the instance
    /// scheduled; `TaskError::Interrupted` ends the instance without logging.
    async fn execute(&mut self, ctx: &TaskContext) -> Result<(), TaskError>;
}
