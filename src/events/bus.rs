//! # Event bus for supervisor lifecycle events.
//!
//! [`Bus`] wraps [`tokio::sync::broadcast`]: the supervisor, process monitors and restart
//! timers publish without blocking; the subscriber listener (and anyone holding a
//! receiver from [`Supervisor::subscribe`](crate::Supervisor::subscribe)) observes.
//!
//! ```text
//! start/stop calls ──┐
//! process monitors ──┼──► Bus ──► listener ──► SubscriberSet ──► LogWriter, ...
//! restart timers   ──┘     └────► Supervisor::subscribe() receivers
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**; events with no receivers are dropped.
//! - **Bounded capacity**: slow receivers observe `RecvError::Lagged(n)`.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for supervisor events. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a bus holding at most `capacity` undelivered events (min 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all current receivers.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a receiver for events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}
