//! Drift correction between the catalog and the scheduler's entry table.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::catalog::JobStore;
use crate::error::Result;
use crate::job::{Job, JobId};
use crate::scheduler::Scheduler;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: usize,
    pub removed: usize,
}

/// Re-establish the invariant that the scheduled id set equals the set of
/// enabled (non-Stopped) jobs in the catalog.
///
/// Per-id failures are logged and the loop keeps going; only a failure to
/// read the catalog aborts.
pub async fn reconcile(catalog: &Arc<dyn JobStore>, scheduler: &Scheduler) -> Result<ReconcileReport> {
    let enabled: HashMap<JobId, Job> = catalog
        .load_enabled()?
        .into_iter()
        .map(|job| (job.id, job))
        .collect();
    let scheduled: HashSet<JobId> = scheduler
        .entries()
        .await
        .iter()
        .map(|entry| entry.job_id)
        .collect();

    let mut report = ReconcileReport::default();

    for id in &scheduled {
        if !enabled.contains_key(id) {
            match scheduler.remove(*id).await {
                Ok(()) => report.removed += 1,
                Err(e) => tracing::error!(job_id = *id, error = %e, "Reconcile: remove failed"),
            }
        }
    }

    for (id, job) in &enabled {
        if !scheduled.contains(id) {
            match scheduler.add(job).await {
                Ok(()) => report.added += 1,
                Err(e) => tracing::error!(job_id = *id, error = %e, "Reconcile: add failed"),
            }
        }
    }

    tracing::info!(added = report.added, removed = report.removed, "Reconcile finished");
    Ok(report)
}
