//! # Reconciliation: converge the worker set to a desired count.
//!
//! ```text
//! reconcile(n)
//!   ├─ n > capacity ──► CapacityExceeded (nothing touched)
//!   ├─ desired = {worker-1 .. worker-n}
//!   ├─ stop (concurrently) every known worker outside `desired` that is not stopped
//!   ├─ start (in order) every desired worker that is not running or starting
//!   └─ return list_workers()
//! ```
//!
//! Starting in ordinal order keeps the id → port mapping deterministic. Desired workers
//! waiting on a backoff restart are left to their timer.

use futures::future::join_all;
use nix::sys::signal::Signal;

use super::supervisor::{StartMode, Supervisor};
use crate::error::SupervisorError;
use crate::events::{Event, EventKind};
use crate::records::{WorkerRecord, WorkerStatus, worker_id};

impl Supervisor {
    /// Converges to exactly `{worker-1 .. worker-desired}` and returns every record.
    ///
    /// Idempotent once converged: running workers are not touched.
    ///
    /// # Errors
    /// - [`SupervisorError::CapacityExceeded`] if `desired` exceeds the port range;
    /// - [`SupervisorError::ShuttingDown`] once `close` has begun;
    /// - any error from starting a desired worker.
    pub async fn reconcile(&self, desired: usize) -> Result<Vec<WorkerRecord>, SupervisorError> {
        self.ensure_accepting()?;
        let capacity = self.cfg.ports.capacity();
        if desired > capacity {
            return Err(SupervisorError::CapacityExceeded {
                requested: desired,
                capacity,
            });
        }
        self.bus
            .publish(Event::new(EventKind::ReconcileStarted).with_count(desired));

        let wanted: Vec<String> = (1..=desired as u64).map(worker_id).collect();
        let surplus: Vec<String> = self
            .list_workers()
            .into_iter()
            .filter(|r| r.status != WorkerStatus::Stopped && !wanted.contains(&r.id))
            .map(|r| r.id)
            .collect();
        join_all(surplus.iter().map(|id| self.stop_with(id, Signal::SIGTERM))).await;

        for id in &wanted {
            let converged = self
                .get_worker(id)
                .is_some_and(|r| matches!(r.status, WorkerStatus::Running | WorkerStatus::Starting));
            if !converged {
                self.start_id(id, None, StartMode::Reconcile).await?;
            }
        }

        self.bus
            .publish(Event::new(EventKind::ReconcileFinished).with_count(desired));
        Ok(self.list_workers())
    }
}
