//! # Worker registry: the in-memory mirror of every known worker.
//!
//! The registry maps worker id → [`Entry`]:
//! - `record`: mirror of the last committed [`WorkerRecord`];
//! - `control`: handle to the worker's [`WorkerControl`] (its own async mutex);
//! - `committed`: whether the record was ever written (transient claims are not);
//! - `claimed`: a start is resolving this id right now;
//! - `restart_pending`: a backoff timer will restart this worker, so its port stays held.
//!
//! ## Rules
//! - The registry sits behind a synchronous mutex: critical sections are map reads and
//!   writes only, never I/O or awaits.
//! - Port reservation happens here, so it is atomic with respect to other reservations.
//! - Listing returns committed records ordered by (`worker-N` ordinal, id).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use super::ports::{self, Holding};
use super::slot::WorkerControl;
use crate::config::PortRange;
use crate::error::SupervisorError;
use crate::records::{WorkerRecord, WorkerStatus, worker_id};

pub(crate) type ControlHandle = Arc<AsyncMutex<WorkerControl>>;

struct Entry {
    control: ControlHandle,
    record: WorkerRecord,
    committed: bool,
    claimed: bool,
    restart_pending: bool,
}

impl Entry {
    fn new(record: WorkerRecord, committed: bool) -> Self {
        Self {
            control: Arc::new(AsyncMutex::new(WorkerControl::default())),
            record,
            committed,
            claimed: false,
            restart_pending: false,
        }
    }
}

pub(crate) struct Registry {
    entries: HashMap<String, Entry>,
    manager_id: String,
}

impl Registry {
    pub fn new(manager_id: impl Into<String>) -> Self {
        Self {
            entries: HashMap::new(),
            manager_id: manager_id.into(),
        }
    }

    /// Inserts a record loaded from the store.
    pub fn insert_recovered(&mut self, record: WorkerRecord) {
        self.entries
            .insert(record.id.clone(), Entry::new(record, true));
    }

    /// Claims `id` for a start, creating its entry if needed.
    pub fn claim(&mut self, id: &str) -> ControlHandle {
        let manager_id = &self.manager_id;
        let entry = self
            .entries
            .entry(id.to_string())
            .or_insert_with(|| Entry::new(WorkerRecord::new(id, manager_id.as_str()), false));
        entry.claimed = true;
        Arc::clone(&entry.control)
    }

    /// Claims the lowest `worker-N` that is unknown, or stopped and not being started.
    pub fn claim_next_ordinal(&mut self) -> (String, ControlHandle) {
        let id = (1u64..)
            .map(worker_id)
            .find(|id| match self.entries.get(id) {
                None => true,
                Some(e) => !e.claimed && e.record.status == WorkerStatus::Stopped,
            })
            .unwrap_or_else(|| worker_id(u64::MAX));
        let control = self.claim(&id);
        (id, control)
    }

    /// Ends a claim. Entries never committed are dropped once nobody holds their control.
    pub fn release(&mut self, id: &str) {
        let drop_entry = match self.entries.get_mut(id) {
            Some(entry) => {
                entry.claimed = false;
                !entry.committed && Arc::strong_count(&entry.control) == 1
            }
            None => false,
        };
        if drop_entry {
            self.entries.remove(id);
        }
    }

    /// Marks whether a backoff restart is armed for `id`.
    pub fn set_restart_pending(&mut self, id: &str, pending: bool) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.restart_pending = pending;
        }
    }

    pub fn control(&self, id: &str) -> Option<ControlHandle> {
        self.entries.get(id).map(|e| Arc::clone(&e.control))
    }

    /// Mirror of `id`, or a fresh record if unknown.
    pub fn record(&self, id: &str) -> WorkerRecord {
        self.entries
            .get(id)
            .map(|e| e.record.clone())
            .unwrap_or_else(|| WorkerRecord::new(id, self.manager_id.as_str()))
    }

    /// Committed mirror of `id`.
    pub fn committed(&self, id: &str) -> Option<WorkerRecord> {
        self.entries
            .get(id)
            .filter(|e| e.committed)
            .map(|e| e.record.clone())
    }

    /// Replaces the mirror of `record.id` and marks it committed.
    pub fn commit(&mut self, record: WorkerRecord) {
        match self.entries.get_mut(&record.id) {
            Some(entry) => {
                entry.record = record;
                entry.committed = true;
            }
            None => {
                self.entries
                    .insert(record.id.clone(), Entry::new(record, true));
            }
        }
    }

    /// Reserves a port for `id` and marks its mirror `starting`.
    pub fn reserve(
        &mut self,
        id: &str,
        preferred: Option<u16>,
        range: PortRange,
    ) -> Result<u16, SupervisorError> {
        let holdings: Vec<Holding> = self
            .entries
            .iter()
            .filter(|(other, _)| other.as_str() != id)
            .filter_map(|(_, e)| {
                e.record.port.map(|port| Holding {
                    port,
                    active: e.record.status.is_active() || e.restart_pending,
                })
            })
            .collect();
        let current = self.entries.get(id).and_then(|e| e.record.port);

        let port = ports::allocate(range, id, current, preferred, &holdings)?;
        if let Some(entry) = self.entries.get_mut(id) {
            entry.record.port = Some(port);
            entry.record.transition(WorkerStatus::Starting);
        }
        Ok(port)
    }

    /// Committed records ordered by (ordinal, id); non-ordinal ids sort last.
    pub fn records(&self) -> Vec<WorkerRecord> {
        let mut out: Vec<WorkerRecord> = self
            .entries
            .values()
            .filter(|e| e.committed)
            .map(|e| e.record.clone())
            .collect();
        out.sort_by(|a, b| {
            let ka = (a.ordinal().unwrap_or(u64::MAX), a.id.as_str());
            let kb = (b.ordinal().unwrap_or(u64::MAX), b.id.as_str());
            ka.cmp(&kb)
        });
        out
    }

    /// Ids of every entry, including claims still being started.
    pub fn all_ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}
