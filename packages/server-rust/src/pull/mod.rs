//! Pull Worker and the hand-off of the pull requests it triggers.

pub mod dispatch;
pub mod worker;

pub use dispatch::{ChannelDispatcher, DispatchError, PullRequest, PullRequestDispatcher};
pub use worker::{
    PullWorker, INCLUDE_PARAMETER, PMODES_PARAMETER, PULL_REQUESTS_METRIC, PULL_WORKER_TASK,
};
