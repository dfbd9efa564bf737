//! Per-worker control state.
//!
//! A [`WorkerControl`] lives behind its own async mutex; every transition of one worker
//! (start, stop, exit handling, restart firing) holds it for the whole transition, so a
//! worker never has two transitions interleaving. Different workers proceed independently.

use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::process::ExitInfo;

/// Live OS process owned by a monitor task.
pub(crate) struct LiveProcess {
    pub pid: u32,
    /// Launch this process belongs to; exits of older launches are ignored.
    pub generation: u64,
    /// Set once by the monitor when the process has been reaped.
    pub exit: watch::Receiver<Option<ExitInfo>>,
}

/// Restart timer armed after a crash.
pub(crate) struct PendingRestart {
    pub ticket: u64,
    pub cancel: CancellationToken,
}

/// Transient control state for one worker (never persisted).
#[derive(Default)]
pub(crate) struct WorkerControl {
    /// Whether the supervisor wants this worker alive; false suppresses auto-restart.
    pub expected_running: bool,
    pub process: Option<LiveProcess>,
    pub generation: u64,
    /// Consecutive fast crashes.
    pub streak: u32,
    /// Last computed restart delay.
    pub restart_delay: Duration,
    pub last_started_at: Option<Instant>,
    pub pending_restart: Option<PendingRestart>,
}

impl WorkerControl {
    #[inline]
    pub fn is_live(&self) -> bool {
        self.process.is_some()
    }

    /// Uptime of the current (or just exited) launch.
    pub fn uptime(&self) -> Duration {
        self.last_started_at
            .map(|at| at.elapsed())
            .unwrap_or_default()
    }
}
