//! # Subscriber extension point.
//!
//! Implement [`Subscribe`] to react to worker lifecycle events: shipping them to a log
//! pipeline, counting crashes, paging someone when a worker keeps failing to spawn.
//! The supervisor hands each subscriber its own lane (see [`SubscriberSet`]), so a slow
//! or panicking subscriber only hurts itself.
//!
//! [`SubscriberSet`]: crate::SubscriberSet
//!
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! use async_trait::async_trait;
//! use worker_manager::{Event, EventKind, Subscribe};
//!
//! #[derive(Default)]
//! struct CrashCounter(AtomicUsize);
//!
//! #[async_trait]
//! impl Subscribe for CrashCounter {
//!     async fn on_event(&self, ev: &Event) {
//!         if ev.kind == EventKind::BackoffScheduled {
//!             self.0.fetch_add(1, Ordering::Relaxed);
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str {
//!         "crash-counter"
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Receives supervisor events in publication order.
///
/// `on_event` runs on the subscriber's own task; blocking there stalls only this
/// subscriber's lane, which then starts dropping events.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    async fn on_event(&self, ev: &Event);

    /// Label used in logs and in `SubscriberOverflow` / `SubscriberPanicked` events.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Lane capacity; values below 1 are raised to 1.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
