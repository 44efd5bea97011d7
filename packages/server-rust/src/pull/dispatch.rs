//! Hand-off of pull requests to the messaging layer.

use std::time::SystemTime;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A request to create and send one outbound Pull Request signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    /// Message id of the signal to create.
    pub message_id: String,
    /// P-Mode governing the pull.
    pub pmode_id: String,
    /// Message partition channel to pull from.
    pub mpc: String,
    pub created_at: SystemTime,
}

impl PullRequest {
    #[must_use]
    pub fn new(pmode_id: impl Into<String>, mpc: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            pmode_id: pmode_id.into(),
            mpc: mpc.into(),
            created_at: SystemTime::now(),
        }
    }
}

/// Failure to hand a pull request over.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The receiving side is gone.
    #[error("pull request channel closed")]
    Closed,
    #[error(transparent)]
    Rejected(#[from] anyhow::Error),
}

/// Submits pull requests for sending.
#[async_trait]
pub trait PullRequestDispatcher: Send + Sync {
    /// Submit `request`.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError` if the request could not be accepted.
    async fn dispatch(&self, request: PullRequest) -> Result<(), DispatchError>;
}

/// Dispatcher feeding a bounded tokio channel; senders wait while it is full.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::Sender<PullRequest>,
}

impl ChannelDispatcher {
    #[must_use]
    pub fn new(tx: mpsc::Sender<PullRequest>) -> Self {
        Self { tx }
    }

    /// A dispatcher and the receiver it feeds.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<PullRequest>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl PullRequestDispatcher for ChannelDispatcher {
    async fn dispatch(&self, request: PullRequest) -> Result<(), DispatchError> {
        self.tx.send(request).await.map_err(|_| DispatchError::Closed)
    }
}
