//! # LogWriter: renders supervisor events through `tracing`.
//!
//! ## Example output (fmt layer)
//! ```text
//! INFO worker_manager::subscribers::log: worker starting worker="worker-2" port=9002 restarts=1
//! INFO worker_manager::subscribers::log: worker running worker="worker-2" pid=4242 port=9002
//! WARN worker_manager::subscribers::log: worker exited worker="worker-2" pid=4242 code=None signal=Some("SIGKILL")
//! WARN worker_manager::subscribers::log: restart scheduled worker="worker-2" delay_ms=2000 streak=1
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let worker = e.worker.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::WorkerStarting => {
                info!(worker, port = ?e.port, restarts = ?e.attempt, "worker starting");
            }
            EventKind::WorkerRunning => {
                info!(worker, pid = ?e.pid, port = ?e.port, "worker running");
            }
            EventKind::SpawnFailed => {
                error!(worker, reason = ?e.reason, "worker spawn failed");
            }
            EventKind::WorkerExited => {
                warn!(worker, pid = ?e.pid, code = ?e.exit_code, signal = ?e.signal, "worker exited");
            }
            EventKind::StopRequested => {
                info!(worker, pid = ?e.pid, signal = ?e.signal, "stopping worker");
            }
            EventKind::StopEscalated => {
                warn!(worker, pid = ?e.pid, grace_ms = ?e.delay_ms, "grace period exceeded, killing worker");
            }
            EventKind::WorkerStopped => {
                info!(worker, reason = ?e.reason, "worker stopped");
            }
            EventKind::BackoffScheduled => {
                warn!(worker, delay_ms = ?e.delay_ms, streak = ?e.attempt, reason = ?e.reason, "restart scheduled");
            }
            EventKind::RestartCancelled => {
                debug!(worker, "pending restart cancelled");
            }
            EventKind::WorkersRecovered => {
                info!(records = ?e.count, "worker records recovered");
            }
            EventKind::ReconcileStarted => {
                info!(desired = ?e.count, "reconcile started");
            }
            EventKind::ReconcileFinished => {
                info!(desired = ?e.count, "reconcile finished");
            }
            EventKind::ShutdownRequested => {
                info!("supervisor shutdown requested");
            }
            EventKind::ShutdownFinished => {
                info!("supervisor shut down");
            }
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked => {}
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
