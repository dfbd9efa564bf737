//! # Supervisor: owns worker processes, their records and the restart loop.
//!
//! The [`Supervisor`] is the authoritative state machine per worker id. It reserves
//! ports, spawns OS processes, persists every transition to the [`RecordStore`], and
//! restarts crashed workers with backoff.
//!
//! ## States
//! ```text
//! stopped ──start──► starting ──spawned──► running ──stop──► stopping ──exit──► stopped
//!                        │                    │
//!                        │ spawn failure      │ unexpected exit (expected_running)
//!                        ▼                    ▼
//!                      error (no retry)     error ──backoff delay──► starting
//! ```
//!
//! ## Event sources
//! ```text
//! API calls (start/stop/reconcile/close) ──┐
//! process monitors (one per live child)  ──┼──► per-worker slot lock ──► commit(record)
//! restart timers (one per crashed worker) ──┘                              ├─► registry mirror
//!                                                                          ├─► RecordStore::put
//!                                                                          └─► Bus::publish
//! ```
//!
//! ## Rules
//! - Every transition of a worker holds that worker's slot lock; the registry lock is
//!   only taken for short map reads/writes, never across an await.
//! - A process exit is matched to its launch by generation; stale exits are ignored.
//! - Restart timers are children of the runtime token and carry a ticket; a timer
//!   that was cancelled or superseded never launches anything.
//! - Store write failures are logged and do not interrupt a transition; the mirror stays
//!   authoritative until the next successful write.
//! - After [`Supervisor::close`] begins, no start is accepted and no restart fires.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use nix::sys::signal::Signal;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::process::Child;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use super::process::{self, ExitInfo};
use super::registry::{ControlHandle, Registry};
use super::slot::{LiveProcess, PendingRestart, WorkerControl};
use crate::config::SupervisorConfig;
use crate::error::SupervisorError;
use crate::events::{Bus, Event, EventKind};
use crate::records::{RecordStore, WorkerRecord, WorkerStatus};

/// Longest accepted worker id.
pub const MAX_WORKER_ID_LEN: usize = 64;

/// Request to start one worker.
///
/// Without `worker_id` the lowest free `worker-N` is used. `port` is a preference only.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    /// Explicit worker id.
    #[serde(default)]
    pub worker_id: Option<String>,
    /// Preferred port.
    #[serde(default)]
    pub port: Option<u16>,
}

impl StartRequest {
    /// Targets a specific worker id.
    pub fn for_worker(id: impl Into<String>) -> Self {
        Self {
            worker_id: Some(id.into()),
            port: None,
        }
    }

    /// Sets the preferred port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

/// Checks that `id` is non-empty, at most [`MAX_WORKER_ID_LEN`] bytes, and limited to
/// `[A-Za-z0-9._-]`.
pub fn validate_worker_id(id: &str) -> Result<(), SupervisorError> {
    let valid = !id.is_empty()
        && id.len() <= MAX_WORKER_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
    if valid {
        Ok(())
    } else {
        Err(SupervisorError::InvalidWorkerId { id: id.to_string() })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Launch {
    /// Operator or reconcile start; does not count as a restart.
    Manual,
    /// Backoff timer fired after a crash.
    Restart,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum StartMode {
    Explicit,
    /// Leaves workers waiting on a backoff restart alone.
    Reconcile,
}

/// Supervises worker processes. Construct with [`SupervisorBuilder`](crate::SupervisorBuilder).
pub struct Supervisor {
    pub(super) cfg: SupervisorConfig,
    pub(super) store: Arc<dyn RecordStore>,
    pub(super) bus: Bus,
    pub(super) registry: Mutex<Registry>,
    runtime_token: CancellationToken,
    shutting_down: AtomicBool,
    tickets: AtomicU64,
    me: Weak<Supervisor>,
}

impl Supervisor {
    pub(super) fn new_internal(
        cfg: SupervisorConfig,
        store: Arc<dyn RecordStore>,
        bus: Bus,
        registry: Registry,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            cfg,
            store,
            bus,
            registry: Mutex::new(registry),
            runtime_token: CancellationToken::new(),
            shutting_down: AtomicBool::new(false),
            tickets: AtomicU64::new(0),
            me: me.clone(),
        })
    }

    /// Configuration this supervisor was opened with.
    pub fn config(&self) -> &SupervisorConfig {
        &self.cfg
    }

    /// Identity written to `managedBy`.
    pub fn manager_id(&self) -> &str {
        &self.cfg.manager_id
    }

    /// Receiver of lifecycle events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// True once [`Supervisor::close`] has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Current record of `id`, if known.
    pub fn get_worker(&self, id: &str) -> Option<WorkerRecord> {
        self.registry.lock().committed(id)
    }

    /// Every known record, ordered by `worker-N` ordinal, then id.
    pub fn list_workers(&self) -> Vec<WorkerRecord> {
        self.registry.lock().records()
    }

    /// Starts a worker and returns its record (`running`, or `error` if the spawn failed).
    ///
    /// Idempotent: a worker with a live process is returned unchanged.
    ///
    /// # Errors
    /// - [`SupervisorError::ShuttingDown`] once `close` has begun;
    /// - [`SupervisorError::InvalidWorkerId`] for a malformed id;
    /// - [`SupervisorError::PortRangeExhausted`] when no port can be reserved.
    pub async fn start_worker(&self, req: StartRequest) -> Result<WorkerRecord, SupervisorError> {
        self.ensure_accepting()?;
        let (id, control) = match req.worker_id {
            Some(id) => {
                validate_worker_id(&id)?;
                let control = self.registry.lock().claim(&id);
                (id, control)
            }
            None => self.registry.lock().claim_next_ordinal(),
        };
        let result = self
            .start_claimed(&id, control, req.port, StartMode::Explicit)
            .await;
        self.registry.lock().release(&id);
        result
    }

    /// Stops a worker with `signal` (default `SIGTERM`), escalating to `SIGKILL` after the
    /// grace period. Returns `None` for an unknown id.
    ///
    /// A worker without a live process is normalized to `stopped`.
    pub async fn stop_worker(
        &self,
        id: &str,
        signal: Option<&str>,
    ) -> Result<Option<WorkerRecord>, SupervisorError> {
        let signal = process::parse_signal(signal)?;
        Ok(self.stop_with(id, signal).await)
    }

    /// Stops every worker and closes the record store. Idempotent.
    ///
    /// Pending restarts are cancelled first; stops run concurrently, each with its own grace.
    pub async fn close(&self) -> Result<(), SupervisorError> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.bus.publish(Event::new(EventKind::ShutdownRequested));
        self.runtime_token.cancel();

        let ids = self.registry.lock().all_ids();
        join_all(ids.iter().map(|id| self.stop_with(id, Signal::SIGTERM))).await;

        let closed = self.store.close().await;
        self.bus.publish(Event::new(EventKind::ShutdownFinished));
        closed.map_err(SupervisorError::from)
    }

    pub(super) fn ensure_accepting(&self) -> Result<(), SupervisorError> {
        if self.is_shutting_down() {
            Err(SupervisorError::ShuttingDown)
        } else {
            Ok(())
        }
    }

    /// Claims `id` and starts it.
    pub(super) async fn start_id(
        &self,
        id: &str,
        preferred: Option<u16>,
        mode: StartMode,
    ) -> Result<WorkerRecord, SupervisorError> {
        let control = self.registry.lock().claim(id);
        let result = self.start_claimed(id, control, preferred, mode).await;
        self.registry.lock().release(id);
        result
    }

    async fn start_claimed(
        &self,
        id: &str,
        control: ControlHandle,
        preferred: Option<u16>,
        mode: StartMode,
    ) -> Result<WorkerRecord, SupervisorError> {
        let mut slot = control.lock().await;
        self.ensure_accepting()?;

        if slot.is_live() {
            slot.expected_running = true;
            return Ok(self.registry.lock().record(id));
        }
        if mode == StartMode::Reconcile && slot.pending_restart.is_some() {
            return Ok(self.registry.lock().record(id));
        }

        let port = self.registry.lock().reserve(id, preferred, self.cfg.ports)?;
        self.cancel_restart(id, &mut slot);
        slot.streak = 0;
        Ok(self.launch(id, &mut slot, port, Launch::Manual).await)
    }

    /// Commits `starting`, spawns, then commits `running` (or `error` on spawn failure).
    async fn launch(
        &self,
        id: &str,
        slot: &mut WorkerControl,
        port: u16,
        kind: Launch,
    ) -> WorkerRecord {
        let mut record = self.registry.lock().record(id);
        record.port = Some(port);
        record.transition(WorkerStatus::Starting);
        record.pid = None;
        record.managed_by = self.cfg.manager_id.clone();
        if kind == Launch::Restart {
            record.restart_count = record.restart_count.saturating_add(1);
        }
        record.clear_meta("lastError");
        record.clear_meta("spawnFailed");
        record.clear_meta("backoffMs");
        record.set_meta("coordinatorUrl", self.cfg.coordinator_url.as_str());
        let mut record = self.commit(record).await;
        self.bus.publish(
            Event::new(EventKind::WorkerStarting)
                .with_worker(id)
                .with_port(Some(port))
                .with_attempt(record.restart_count),
        );

        let spawned = process::spawn(&self.cfg, id, port).and_then(|child| match child.id() {
            Some(pid) => Ok((child, pid)),
            None => Err(std::io::Error::other("process exited before its pid was read")),
        });
        let (child, pid) = match spawned {
            Ok(spawned) => spawned,
            Err(e) => {
                slot.expected_running = false;
                record.transition(WorkerStatus::Error);
                record.set_meta("lastError", e.to_string());
                record.set_meta("spawnFailed", true);
                let record = self.commit(record).await;
                self.bus.publish(
                    Event::new(EventKind::SpawnFailed)
                        .with_worker(id)
                        .with_reason(e.to_string()),
                );
                return record;
            }
        };

        slot.generation += 1;
        let (tx, rx) = watch::channel(None);
        slot.process = Some(LiveProcess {
            pid,
            generation: slot.generation,
            exit: rx,
        });
        slot.expected_running = true;
        slot.last_started_at = Some(Instant::now());
        self.monitor(id, slot.generation, child, tx);

        record.transition(WorkerStatus::Running);
        record.pid = Some(pid);
        record.started_at = Some(Utc::now());
        let record = self.commit(record).await;
        self.bus.publish(
            Event::new(EventKind::WorkerRunning)
                .with_worker(id)
                .with_pid(Some(pid))
                .with_port(Some(port)),
        );
        record
    }

    /// Reaps `child` and reports its exit.
    fn monitor(&self, id: &str, generation: u64, mut child: Child, tx: watch::Sender<Option<ExitInfo>>) {
        let me = self.me.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            let exit = match child.wait().await {
                Ok(status) => ExitInfo::from_status(status),
                Err(e) => {
                    warn!(worker = %id, error = %e, "failed to wait on worker process");
                    ExitInfo::default()
                }
            };
            let _ = tx.send(Some(exit.clone()));
            if let Some(sup) = me.upgrade() {
                sup.handle_exit(id, generation, exit).await;
            }
        });
    }

    /// Exit handler: stop quietly, or schedule a backoff restart.
    fn handle_exit(self: Arc<Self>, id: String, generation: u64, exit: ExitInfo) -> BoxFuture<'static, ()> {
        async move {
            let control = self.registry.lock().control(&id);
            let Some(control) = control else {
                return;
            };
            let mut slot = control.lock().await;
            let pid = match &slot.process {
                Some(live) if live.generation == generation => live.pid,
                _ => return,
            };
            slot.process = None;
            let uptime = slot.uptime();

            let mut record = self.registry.lock().record(&id);
            exit.annotate(&mut record);
            self.bus.publish(
                Event::new(EventKind::WorkerExited)
                    .with_worker(id.as_str())
                    .with_pid(Some(pid))
                    .with_exit(exit.code, exit.signal.as_deref()),
            );

            if !slot.expected_running || self.is_shutting_down() {
                slot.expected_running = false;
                record.transition(WorkerStatus::Stopped);
                self.commit(record).await;
                self.bus.publish(
                    Event::new(EventKind::WorkerStopped)
                        .with_worker(id.as_str())
                        .with_reason(exit.describe()),
                );
                return;
            }

            let backoff = self.cfg.restart;
            slot.streak = backoff.next_streak(slot.streak, uptime);
            let delay = backoff.delay(slot.streak);
            slot.restart_delay = delay;
            self.schedule_restart(&id, &mut slot, delay);

            record.transition(WorkerStatus::Error);
            record.set_meta("lastError", format!("worker {}", exit.describe()));
            record.set_meta("backoffMs", millis(delay));
            record.set_meta("crashStreak", slot.streak);
            record.set_meta("uptimeMs", millis(uptime));
            self.commit(record).await;
            self.bus.publish(
                Event::new(EventKind::BackoffScheduled)
                    .with_worker(id.as_str())
                    .with_delay(delay)
                    .with_attempt(slot.streak)
                    .with_reason(exit.describe()),
            );
        }
        .boxed()
    }

    fn schedule_restart(&self, id: &str, slot: &mut WorkerControl, delay: Duration) {
        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
        let cancel = self.runtime_token.child_token();
        slot.pending_restart = Some(PendingRestart {
            ticket,
            cancel: cancel.clone(),
        });
        self.registry.lock().set_restart_pending(id, true);

        let me = self.me.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Some(sup) = me.upgrade() {
                        sup.fire_restart(&id, ticket).await;
                    }
                }
            }
        });
    }

    async fn fire_restart(&self, id: &str, ticket: u64) {
        let control = self.registry.lock().control(id);
        let Some(control) = control else {
            return;
        };
        let mut slot = control.lock().await;
        if slot.pending_restart.as_ref().map(|p| p.ticket) != Some(ticket) {
            return;
        }
        slot.pending_restart = None;
        if !slot.expected_running || slot.is_live() || self.is_shutting_down() {
            self.registry.lock().set_restart_pending(id, false);
            return;
        }

        let reserved = {
            let mut registry = self.registry.lock();
            registry.set_restart_pending(id, false);
            registry.reserve(id, None, self.cfg.ports)
        };
        match reserved {
            Ok(port) => {
                self.launch(id, &mut slot, port, Launch::Restart).await;
            }
            Err(e) => {
                warn!(worker = id, error = %e, "restart abandoned");
                slot.expected_running = false;
                let mut record = self.registry.lock().record(id);
                record.transition(WorkerStatus::Error);
                record.set_meta("lastError", e.to_string());
                self.commit(record).await;
            }
        }
    }

    fn cancel_restart(&self, id: &str, slot: &mut WorkerControl) {
        if let Some(pending) = slot.pending_restart.take() {
            pending.cancel.cancel();
            self.registry.lock().set_restart_pending(id, false);
            self.bus
                .publish(Event::new(EventKind::RestartCancelled).with_worker(id));
        }
    }

    pub(super) async fn stop_with(&self, id: &str, signal: Signal) -> Option<WorkerRecord> {
        let control = self.registry.lock().control(id)?;
        let mut slot = control.lock().await;
        slot.expected_running = false;
        self.cancel_restart(id, &mut slot);

        let live = slot.process.as_ref().map(|p| (p.pid, p.exit.clone()));
        let Some((pid, mut exit_rx)) = live else {
            let committed = self.registry.lock().committed(id);
            let mut record = committed?;
            if record.status == WorkerStatus::Stopped && record.pid.is_none() {
                return Some(record);
            }
            record.transition(WorkerStatus::Stopped);
            let record = self.commit(record).await;
            self.bus.publish(
                Event::new(EventKind::WorkerStopped)
                    .with_worker(id)
                    .with_reason("no live process"),
            );
            return Some(record);
        };

        let mut record = self.registry.lock().record(id);
        record.transition(WorkerStatus::Stopping);
        self.commit(record).await;
        self.bus.publish(
            Event::new(EventKind::StopRequested)
                .with_worker(id)
                .with_pid(Some(pid))
                .with_signal(signal.as_str()),
        );
        if let Err(e) = process::send_signal(pid, signal) {
            warn!(worker = id, pid, error = %e, "failed to signal worker");
        }

        let grace = self.cfg.stop_grace;
        let exit = match tokio::time::timeout(grace, process::wait_exit(&mut exit_rx)).await {
            Ok(exit) => exit,
            Err(_) => {
                self.bus.publish(
                    Event::new(EventKind::StopEscalated)
                        .with_worker(id)
                        .with_pid(Some(pid))
                        .with_delay(grace),
                );
                if let Err(e) = process::send_signal(pid, Signal::SIGKILL) {
                    warn!(worker = id, pid, error = %e, "failed to kill worker");
                }
                tokio::time::timeout(grace, process::wait_exit(&mut exit_rx))
                    .await
                    .ok()
                    .flatten()
            }
        };
        if exit.is_none() {
            error!(worker = id, pid, "worker exit not observed after SIGKILL");
        }
        slot.process = None;

        let mut record = self.registry.lock().record(id);
        record.transition(WorkerStatus::Stopped);
        if let Some(exit) = &exit {
            exit.annotate(&mut record);
        }
        record.set_meta("stopSignal", signal.as_str());
        let record = self.commit(record).await;

        let mut stopped = Event::new(EventKind::WorkerStopped).with_worker(id);
        if let Some(exit) = &exit {
            stopped = stopped
                .with_exit(exit.code, exit.signal.as_deref())
                .with_reason(exit.describe());
        }
        self.bus.publish(stopped);
        Some(record)
    }

    /// Refreshes `updatedAt`, updates the mirror, then persists.
    async fn commit(&self, mut record: WorkerRecord) -> WorkerRecord {
        record.touch();
        self.registry.lock().commit(record.clone());
        if let Err(e) = self.store.put(&record).await {
            error!(
                worker = %record.id,
                status = %record.status,
                error = %e,
                "failed to persist worker record"
            );
        }
        record
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_ids_are_restricted() {
        assert!(validate_worker_id("worker-1").is_ok());
        assert!(validate_worker_id("api.v2_blue").is_ok());
        assert!(validate_worker_id("").is_err());
        assert!(validate_worker_id("../etc").is_err());
        assert!(validate_worker_id("has space").is_err());
        assert!(validate_worker_id(&"x".repeat(MAX_WORKER_ID_LEN + 1)).is_err());
    }

    #[test]
    fn start_request_uses_camel_case() {
        let req: StartRequest = serde_json::from_str(r#"{"workerId":"worker-4","port":9004}"#).unwrap();
        assert_eq!(req, StartRequest::for_worker("worker-4").with_port(9004));

        let empty: StartRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, StartRequest::default());
    }
}
