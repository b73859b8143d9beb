//! Per-job concurrency gates implementing the Skip and Queue policies.
//!
//! One gate per job id, created lazily with double-checked insertion. The
//! gate is a capacity-1 semaphore acting as a mutex; scheduled fires and
//! manual invocations share it, so the policies hold across both paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::job::{AllowMode, JobId};

pub struct Gate {
    sem: Arc<Semaphore>,
    waiters: AtomicUsize,
}

impl Gate {
    fn new() -> Self {
        Self {
            sem: Arc::new(Semaphore::new(1)),
            waiters: AtomicUsize::new(0),
        }
    }

    pub fn waiters(&self) -> usize {
        self.waiters.load(Ordering::SeqCst)
    }
}

/// Outcome of asking the gate for permission to run.
pub enum Admission {
    /// Go ahead; hold the permit (if any) for the duration of the execution.
    Run(Option<OwnedSemaphorePermit>),
    /// Dropped by policy; `reason` is a human-readable explanation.
    Skipped { reason: &'static str },
}

impl Admission {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

pub const SKIP_STILL_RUNNING: &str = "previous invocation still running; skipped by policy";
pub const SKIP_QUEUE_FULL: &str = "queue is full; invocation dropped";

#[derive(Default)]
pub struct GateMap {
    gates: RwLock<HashMap<JobId, Arc<Gate>>>,
}

impl GateMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing gate for the job, or a freshly inserted one.
    pub fn gate(&self, job_id: JobId) -> Arc<Gate> {
        {
            let gates = self.gates.read().expect("gate lock poisoned");
            if let Some(gate) = gates.get(&job_id) {
                return Arc::clone(gate);
            }
        }
        let mut gates = self.gates.write().expect("gate lock poisoned");
        Arc::clone(gates.entry(job_id).or_insert_with(|| Arc::new(Gate::new())))
    }

    /// Apply `policy` for one invocation of `job_id`.
    ///
    /// - Parallel: always admitted, no permit held.
    /// - Skip: admitted only if the gate is free right now.
    /// - Queue: waits for the gate in FIFO order; bounded by `max_waiters`,
    ///   beyond which the invocation is dropped like a skip. Callers whose
    ///   contract forbids dropping (manual runs) pass `usize::MAX`.
    pub async fn admit(&self, job_id: JobId, policy: AllowMode, max_waiters: usize) -> Admission {
        match policy {
            AllowMode::Parallel => Admission::Run(None),
            AllowMode::Skip => {
                let gate = self.gate(job_id);
                match gate.sem.clone().try_acquire_owned() {
                    Ok(permit) => Admission::Run(Some(permit)),
                    Err(_) => Admission::Skipped {
                        reason: SKIP_STILL_RUNNING,
                    },
                }
            }
            AllowMode::Queue => {
                let gate = self.gate(job_id);
                if gate.waiters.load(Ordering::SeqCst) >= max_waiters {
                    return Admission::Skipped {
                        reason: SKIP_QUEUE_FULL,
                    };
                }
                gate.waiters.fetch_add(1, Ordering::SeqCst);
                let acquired = gate.sem.clone().acquire_owned().await;
                gate.waiters.fetch_sub(1, Ordering::SeqCst);
                match acquired {
                    Ok(permit) => Admission::Run(Some(permit)),
                    // The semaphore is never closed; treat it like a skip
                    // anyway rather than panicking.
                    Err(_) => Admission::Skipped {
                        reason: SKIP_STILL_RUNNING,
                    },
                }
            }
        }
    }

    /// Garbage-collect the gate of a removed job. Holders of outstanding
    /// permits keep the semaphore alive through their own Arc.
    pub fn remove(&self, job_id: JobId) {
        self.gates
            .write()
            .expect("gate lock poisoned")
            .remove(&job_id);
    }

    pub fn len(&self) -> usize {
        self.gates.read().expect("gate lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
