//! Reconciliation planning.
//!
//! `plan_reconcile()` diffs the applied worker specifications against a new
//! configuration, matching on worker name. It is pure; the pool applies the
//! resulting plan under its reconciliation lock.

use std::collections::{BTreeMap, BTreeSet};

use super::config::WorkerSpec;

/// Changes needed to move from one set of worker specifications to another.
///
/// Every list is sorted by worker name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    /// Workers absent from the target; their instances are cancelled.
    pub removed: Vec<String>,
    /// Workers absent from the current set; instantiated and scheduled.
    pub added: Vec<WorkerSpec>,
    /// Workers whose task, active flag, concurrency or interval changed;
    /// cancelled and then re-added with the new spec.
    pub rescheduled: Vec<WorkerSpec>,
    /// Workers whose parameters changed; their live instances are
    /// reconfigured in place.
    pub reparameterized: Vec<WorkerSpec>,
    /// Workers with other changes (e.g. only the delay); the stored spec is
    /// replaced and instances are kept.
    pub updated: Vec<WorkerSpec>,
    /// Names given to more than one target spec. Only the first is planned.
    pub duplicates: Vec<String>,
}

impl ReconcilePlan {
    /// Returns `true` if applying the plan changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
            && self.added.is_empty()
            && self.rescheduled.is_empty()
            && self.reparameterized.is_empty()
            && self.updated.is_empty()
            && self.duplicates.is_empty()
    }
}

/// Plans the changes turning `current` into `target`.
#[must_use]
pub fn plan_reconcile(current: &[WorkerSpec], target: &[WorkerSpec]) -> ReconcilePlan {
    let current_by_name: BTreeMap<&str, &WorkerSpec> =
        current.iter().map(|spec| (spec.name.as_str(), spec)).collect();

    let mut plan = ReconcilePlan::default();
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let mut duplicates: BTreeSet<&str> = BTreeSet::new();

    for spec in target {
        if !seen.insert(spec.name.as_str()) {
            duplicates.insert(spec.name.as_str());
            continue;
        }
        match current_by_name.get(spec.name.as_str()) {
            None => plan.added.push(spec.clone()),
            Some(existing) if *existing == spec => {}
            Some(existing) if existing.requires_reschedule(spec) => {
                plan.rescheduled.push(spec.clone());
            }
            Some(existing) if existing.parameters != spec.parameters => {
                plan.reparameterized.push(spec.clone());
            }
            Some(_) => plan.updated.push(spec.clone()),
        }
    }

    plan.removed = current_by_name
        .keys()
        .filter(|name| !seen.contains(*name))
        .map(|name| (*name).to_string())
        .collect();
    plan.duplicates = duplicates.into_iter().map(str::to_string).collect();

    for specs in [
        &mut plan.added,
        &mut plan.rescheduled,
        &mut plan.reparameterized,
        &mut plan.updated,
    ] {
        specs.sort_by(|a, b| a.name.cmp(&b.name));
    }
    plan
}
