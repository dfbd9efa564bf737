//! # Lifecycle events emitted by the supervisor.
//!
//! [`EventKind`] classifies events in four groups:
//! - **Process lifecycle**: starting, running, spawn failure, exit, stop
//! - **Restart loop**: backoff scheduled / cancelled
//! - **Supervisor**: recovery at startup, reconcile, shutdown
//! - **Subscriber health**: overflow, panic
//!
//! [`Event`] carries the optional metadata relevant to its kind (worker id, pid, port,
//! exit code/signal, delay, reason).
//!
//! ## Ordering guarantees
//! Each event has a process-wide sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use worker_manager::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::BackoffScheduled)
//!     .with_worker("worker-2")
//!     .with_delay(Duration::from_secs(2))
//!     .with_attempt(3);
//!
//! assert_eq!(ev.worker.as_deref(), Some("worker-2"));
//! assert_eq!(ev.delay_ms, Some(2000));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of supervisor events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Process lifecycle ===
    /// Record persisted as `starting`; the process is about to be spawned.
    ///
    /// Sets: `worker`, `port`, `attempt` (restart count after this start)
    WorkerStarting,

    /// Process launched; record persisted as `running`.
    ///
    /// Sets: `worker`, `pid`, `port`
    WorkerRunning,

    /// The OS refused to spawn the process; record persisted as `error`, no retry.
    ///
    /// Sets: `worker`, `reason`
    SpawnFailed,

    /// A supervised process terminated (any cause).
    ///
    /// Sets: `worker`, `pid`, `exit_code` and/or `signal`
    WorkerExited,

    /// Stop requested for a live process; record persisted as `stopping`.
    ///
    /// Sets: `worker`, `pid`, `signal`
    StopRequested,

    /// Grace period elapsed; the process is being killed.
    ///
    /// Sets: `worker`, `pid`, `delay_ms` (grace period)
    StopEscalated,

    /// Record persisted as `stopped`.
    ///
    /// Sets: `worker`, optional `reason`
    WorkerStopped,

    // === Restart loop ===
    /// Unexpected exit; restart scheduled after a delay.
    ///
    /// Sets: `worker`, `delay_ms`, `attempt` (crash streak), `reason`
    BackoffScheduled,

    /// A pending restart timer was cancelled (explicit stop/start or shutdown).
    ///
    /// Sets: `worker`
    RestartCancelled,

    // === Supervisor ===
    /// Stored records were loaded and normalized at startup.
    ///
    /// Sets: `count` (records loaded)
    WorkersRecovered,

    /// Reconcile began.
    ///
    /// Sets: `count` (desired count)
    ReconcileStarted,

    /// Reconcile converged.
    ///
    /// Sets: `count` (desired count)
    ReconcileFinished,

    /// `close()` was called.
    ShutdownRequested,

    /// Every worker stopped and the store is closed.
    ShutdownFinished,

    // === Subscriber health ===
    /// A subscriber's queue was full or closed; the event was dropped for it.
    ///
    /// Sets: `worker` (subscriber name), `reason`
    SubscriberOverflow,

    /// A subscriber panicked while handling an event.
    ///
    /// Sets: `worker` (subscriber name), `reason`
    SubscriberPanicked,
}

/// Supervisor event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Worker id (or subscriber name for subscriber events).
    pub worker: Option<Arc<str>>,
    /// OS process id.
    pub pid: Option<u32>,
    /// Reserved port.
    pub port: Option<u16>,
    /// Restart count or crash streak, depending on kind.
    pub attempt: Option<u32>,
    /// Delay in milliseconds (backoff or grace).
    pub delay_ms: Option<u32>,
    /// Process exit code.
    pub exit_code: Option<i32>,
    /// Signal name (exit signal or stop signal).
    pub signal: Option<Arc<str>>,
    /// Counter for supervisor-wide events.
    pub count: Option<usize>,
    /// Human-readable reason.
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            worker: None,
            pid: None,
            port: None,
            attempt: None,
            delay_ms: None,
            exit_code: None,
            signal: None,
            count: None,
            reason: None,
        }
    }

    #[inline]
    pub fn with_worker(mut self, id: impl Into<Arc<str>>) -> Self {
        self.worker = Some(id.into());
        self
    }

    #[inline]
    pub fn with_pid(mut self, pid: Option<u32>) -> Self {
        self.pid = pid;
        self
    }

    #[inline]
    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a delay (stored as milliseconds, saturating).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(d.as_millis().min(u128::from(u32::MAX)) as u32);
        self
    }

    #[inline]
    pub fn with_exit(mut self, code: Option<i32>, signal: Option<&str>) -> Self {
        self.exit_code = code;
        self.signal = signal.map(Arc::from);
        self
    }

    #[inline]
    pub fn with_signal(mut self, signal: impl Into<Arc<str>>) -> Self {
        self.signal = Some(signal.into());
        self
    }

    #[inline]
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_worker(subscriber)
            .with_reason(reason)
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_worker(subscriber)
            .with_reason(info)
    }

    /// True if this event concerns worker `id`.
    #[inline]
    pub fn is_for(&self, id: &str) -> bool {
        self.worker.as_deref() == Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_increase() {
        let a = Event::new(EventKind::WorkerStarting);
        let b = Event::new(EventKind::WorkerRunning);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn delay_saturates_at_u32() {
        let ev = Event::new(EventKind::BackoffScheduled).with_delay(Duration::from_secs(u64::MAX));
        assert_eq!(ev.delay_ms, Some(u32::MAX));
    }
}
