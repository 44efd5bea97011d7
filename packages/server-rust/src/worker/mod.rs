//! Worker pool scheduler.
//!
//! Workers are declared as `WorkerSpec`s, instantiated through the
//! `TaskRegistry` and scheduled by a `WorkerPool`, which reconciles them
//! against configuration changes without restarting unaffected workers.

pub mod config;
pub mod diff;
pub mod error;
pub mod interval;
pub mod lifecycle;
pub mod pool;
pub mod registry;
pub mod schedule;
pub mod source;
pub mod task;

pub use config::{Parameters, PoolConfiguration, WorkerSpec};
pub use diff::{plan_reconcile, ReconcilePlan};
pub use error::{FailureKind, WorkerFailure, WorkerPoolError};
pub use interval::{Interval, TimeUnit};
pub use lifecycle::PoolState;
pub use pool::{InstanceInfo, WorkerPool, FORCED_TERMINATION_WAIT, POOL_OVERHEAD};
pub use registry::{TaskFactory, TaskRegistry};
pub use schedule::{ExecutionMode, EXECUTIONS_METRIC};
pub use source::{ConfigSource, FileConfigSource, SourceError, StaticConfigSource};
pub use task::{ConfigurationError, TaskContext, TaskError, WorkerTask};
