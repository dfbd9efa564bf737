//! Health snapshot derived from the worker list.

use serde::Serialize;

use super::supervisor::Supervisor;
use crate::records::WorkerStatus;

/// Running and total worker counts at the time of the call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    /// Workers in `running`.
    pub running: usize,
    /// Known workers.
    pub total: usize,
}

impl Supervisor {
    /// Counts running and known workers. Purely derived, no independent state.
    pub fn health(&self) -> HealthSnapshot {
        let workers = self.list_workers();
        HealthSnapshot {
            running: workers
                .iter()
                .filter(|w| w.status == WorkerStatus::Running)
                .count(),
            total: workers.len(),
        }
    }
}
