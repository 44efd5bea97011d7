//! The Pull Worker: sends one pull request per eligible P-Mode on every run.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use ebgate_core::{mep, PMode, PModeSet};
use tracing::{debug, warn};

use super::dispatch::{PullRequest, PullRequestDispatcher};
use crate::worker::{ConfigurationError, Parameters, TaskContext, TaskError, WorkerTask};

/// Registry key of the Pull Worker.
pub const PULL_WORKER_TASK: &str = "pull";

/// Parameter naming the P-Modes to include or exclude.
pub const PMODES_PARAMETER: &str = "pmodes";

/// Parameter selecting inclusion (`true`) or exclusion (`false`) mode.
pub const INCLUDE_PARAMETER: &str = "include";

/// Counter of pull requests, labelled by `pmode` and `outcome`.
pub const PULL_REQUESTS_METRIC: &str = "ebgate_pull_requests_total";

/// Triggers pull requests for the P-Modes this gateway pulls on.
///
/// In inclusion mode only the named P-Modes are considered; in exclusion mode
/// every P-Mode except the named ones. Either way a P-Mode is only pulled for
/// if its binding has us sending pull requests.
pub struct PullWorker {
    pmodes: Arc<dyn PModeSet>,
    dispatcher: Arc<dyn PullRequestDispatcher>,
    selection: BTreeSet<String>,
    include: bool,
}

impl PullWorker {
    /// An unconfigured worker pulls for every pull-capable P-Mode.
    #[must_use]
    pub fn new(pmodes: Arc<dyn PModeSet>, dispatcher: Arc<dyn PullRequestDispatcher>) -> Self {
        Self {
            pmodes,
            dispatcher,
            selection: BTreeSet::new(),
            include: false,
        }
    }

    /// The P-Modes to send pull requests for right now.
    #[must_use]
    pub fn eligible_pmodes(&self) -> Vec<Arc<PMode>> {
        if self.include {
            self.selection
                .iter()
                .filter_map(|id| match self.pmodes.get(id) {
                    None => {
                        warn!(pmode = %id, "P-Mode to pull for is not loaded, skipped");
                        None
                    }
                    Some(pmode) if !mep::sends_pull_requests(&pmode) => {
                        warn!(pmode = %id, "P-Mode is not configured for pulling by us, skipped");
                        None
                    }
                    Some(pmode) => Some(pmode),
                })
                .collect()
        } else {
            self.pmodes
                .get_all()
                .into_iter()
                .filter(|pmode| !self.selection.contains(&pmode.id))
                .filter(|pmode| mep::sends_pull_requests(pmode))
                .collect()
        }
    }

    async fn dispatch(&self, ctx: &TaskContext, pmode: &PMode) -> bool {
        let mpc = mep::pull_mpc(pmode);
        let request = PullRequest::new(pmode.id.as_str(), mpc.as_str());
        let message_id = request.message_id.clone();
        let outcome = match self.dispatcher.dispatch(request).await {
            Ok(()) => {
                debug!(
                    worker = %ctx.instance,
                    pmode = %pmode.id,
                    mpc = %mpc,
                    message_id = %message_id,
                    "pull request dispatched"
                );
                "dispatched"
            }
            Err(err) => {
                warn!(
                    worker = %ctx.instance,
                    pmode = %pmode.id,
                    mpc = %mpc,
                    error = %err,
                    "failed to dispatch pull request"
                );
                "failed"
            }
        };
        metrics::counter!(
            PULL_REQUESTS_METRIC,
            "pmode" => pmode.id.clone(),
            "outcome" => outcome
        )
        .increment(1);
        outcome == "dispatched"
    }
}

#[async_trait]
impl WorkerTask for PullWorker {
    fn configure(&mut self, parameters: &Parameters) -> Result<(), ConfigurationError> {
        let include = parameters.get_bool(INCLUDE_PARAMETER)?.unwrap_or(false);
        let selection: BTreeSet<String> = parameters
            .get_string_list(PMODES_PARAMETER)?
            .unwrap_or_default()
            .into_iter()
            .collect();
        if include && selection.is_empty() {
            return Err(ConfigurationError::MissingParameter {
                name: PMODES_PARAMETER.to_string(),
            });
        }
        self.include = include;
        self.selection = selection;
        Ok(())
    }

    async fn execute(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
        let eligible = self.eligible_pmodes();
        if eligible.is_empty() {
            debug!(worker = %ctx.instance, "no P-Modes to pull for");
            return Ok(());
        }

        let mut dispatched = 0usize;
        for pmode in &eligible {
            if self.dispatch(ctx, pmode).await {
                dispatched += 1;
            }
        }
        debug!(
            worker = %ctx.instance,
            eligible = eligible.len(),
            dispatched,
            "pull run finished"
        );
        Ok(())
    }
}

impl std::fmt::Debug for PullWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullWorker")
            .field("selection", &self.selection)
            .field("include", &self.include)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
