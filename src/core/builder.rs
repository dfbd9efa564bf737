//! # Supervisor construction and startup recovery.
//!
//! [`SupervisorBuilder::open`] is the only way to obtain a [`Supervisor`]:
//! 1. validates the [`SupervisorConfig`];
//! 2. opens the [`RecordStore`] (a lock held by another instance is fatal);
//! 3. loads every record and forces it to `stopped`, since no process survives a
//!    supervisor restart; normalized records get `recoveredAt` / `recoveredFrom`;
//! 4. starts the subscriber listener and publishes `WorkersRecovered`.
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use worker_manager::{LogWriter, SqliteStore, SupervisorBuilder, SupervisorConfig};
//!
//! # async fn run() -> Result<(), worker_manager::SupervisorError> {
//! let sup = SupervisorBuilder::new(SupervisorConfig::default())
//!     .with_store(SqliteStore::new("data/workers.db"))
//!     .with_subscribers(vec![Arc::new(LogWriter::new())])
//!     .open()
//!     .await?;
//!
//! sup.reconcile(3).await?;
//! sup.close().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

use super::registry::Registry;
use super::supervisor::Supervisor;
use crate::config::SupervisorConfig;
use crate::error::{StoreError, SupervisorError};
use crate::events::{Bus, Event, EventKind};
use crate::records::{MemoryStore, RecordStore, WorkerRecord, WorkerStatus};
use crate::subscribers::{Subscribe, SubscriberSet};

/// Builder for a [`Supervisor`].
pub struct SupervisorBuilder {
    cfg: SupervisorConfig,
    store: Option<Arc<dyn RecordStore>>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl SupervisorBuilder {
    /// Creates a builder; the store defaults to an in-memory one.
    pub fn new(cfg: SupervisorConfig) -> Self {
        Self {
            cfg,
            store: None,
            subscribers: Vec::new(),
        }
    }

    /// Uses `store` for worker records.
    pub fn with_store(self, store: impl RecordStore) -> Self {
        self.with_shared_store(Arc::new(store))
    }

    /// Uses a store the caller keeps a handle to.
    pub fn with_shared_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets event subscribers.
    ///
    /// Each gets a dedicated worker with a bounded queue.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Opens the store, recovers records and returns the running supervisor.
    ///
    /// # Errors
    /// - [`SupervisorError::Config`] for an invalid configuration;
    /// - [`SupervisorError::Store`] if the store cannot be opened or read.
    pub async fn open(self) -> Result<Arc<Supervisor>, SupervisorError> {
        self.cfg.validate()?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));

        store.open().await?;
        let recovered = match recover(store.as_ref(), &self.cfg.manager_id).await {
            Ok(records) => records,
            Err(e) => {
                if let Err(close_err) = store.close().await {
                    warn!(error = %close_err, "failed to close store after recovery error");
                }
                return Err(e.into());
            }
        };
        info!(
            store = store.name(),
            records = recovered.len(),
            manager_id = %self.cfg.manager_id,
            "record store opened"
        );

        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let set = SubscriberSet::new(self.subscribers, bus.clone());
        spawn_listener(bus.subscribe(), set);

        let count = recovered.len();
        let mut registry = Registry::new(self.cfg.manager_id.as_str());
        for record in recovered {
            registry.insert_recovered(record);
        }

        let sup = Supervisor::new_internal(self.cfg, store, bus.clone(), registry);
        bus.publish(Event::new(EventKind::WorkersRecovered).with_count(count));
        Ok(sup)
    }
}

/// Loads every record and normalizes the ones that claim a process.
async fn recover(
    store: &dyn RecordStore,
    manager_id: &str,
) -> Result<Vec<WorkerRecord>, StoreError> {
    let mut records = store.list().await?;
    for record in records.iter_mut() {
        if record.status == WorkerStatus::Stopped && record.pid.is_none() {
            continue;
        }
        let from = record.status;
        record.transition(WorkerStatus::Stopped);
        record.pid = None;
        record.managed_by = manager_id.to_string();
        record.set_meta("recoveredAt", Utc::now().to_rfc3339());
        record.set_meta("recoveredFrom", from.as_str());
        record.touch();
        store.put(record).await?;
        info!(worker = %record.id, from = %from, "recovered worker record as stopped");
    }
    Ok(records)
}

/// Forwards bus events to the subscriber set until shutdown finishes.
fn spawn_listener(mut rx: broadcast::Receiver<Event>, set: SubscriberSet) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ev) => {
                    if matches!(
                        ev.kind,
                        EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
                    ) {
                        continue;
                    }
                    set.emit(&ev);
                    if ev.kind == EventKind::ShutdownFinished {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber listener lagged behind the event bus");
                }
                Err(RecvError::Closed) => break,
            }
        }
        set.shutdown().await;
    });
}
