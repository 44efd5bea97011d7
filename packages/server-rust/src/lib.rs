//! ebgate Server: worker pool scheduler, Pull Worker and runtime bootstrap.

pub mod logging;
pub mod pull;
pub mod worker;

pub use logging::{init_tracing, LogFormat};
pub use pull::{ChannelDispatcher, PullRequest, PullRequestDispatcher, PullWorker};
pub use worker::{
    ConfigSource, FileConfigSource, PoolConfiguration, PoolState, StaticConfigSource,
    TaskRegistry, WorkerPool, WorkerPoolError, WorkerSpec, WorkerTask,
};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
