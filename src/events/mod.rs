//! Supervisor events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Supervisor` operations, process monitor tasks, restart timers,
//!   `SubscriberSet` lanes (overflow/panic).
//! - **Consumers**: the subscriber listener spawned by the builder, plus receivers from
//!   `Supervisor::subscribe()`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
