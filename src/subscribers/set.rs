//! # Fan-out of supervisor events to subscribers.
//!
//! Every subscriber owns a lane: a bounded queue drained by its own task.
//!
//! ```text
//! emit(ev) ─┬─► lane "log-writer" ─► task ─► LogWriter::on_event
//!           └─► lane "<custom>"   ─► task ─► Subscribe::on_event
//! ```
//!
//! `emit` is synchronous and never waits for a lane. When a lane is full (or its task is
//! gone) the event is lost for that lane only and `SubscriberOverflow` is published.
//! A panic inside `on_event` is caught, reported as `SubscriberPanicked`, and the lane
//! keeps draining. Order is FIFO within a lane.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::events::{Bus, Event};
use crate::subscribers::Subscribe;

struct Lane {
    label: &'static str,
    tx: mpsc::Sender<Arc<Event>>,
}

/// Subscribers of one supervisor, each behind its own bounded lane.
pub struct SubscriberSet {
    lanes: Vec<Lane>,
    drains: Vec<JoinHandle<()>>,
    bus: Bus,
}

impl SubscriberSet {
    /// Spawns a draining task per subscriber. Requires a Tokio runtime.
    pub fn new(subscribers: Vec<Arc<dyn Subscribe>>, bus: Bus) -> Self {
        let (lanes, drains) = subscribers
            .into_iter()
            .map(|sub| {
                let label = sub.name();
                let (tx, rx) = mpsc::channel(sub.queue_capacity().max(1));
                let drain = tokio::spawn(drain_lane(sub, rx, bus.clone()));
                (Lane { label, tx }, drain)
            })
            .unzip();
        Self { lanes, drains, bus }
    }

    /// Queues `ev` on every lane without waiting.
    pub fn emit(&self, ev: &Event) {
        let shared = Arc::new(ev.clone());
        for lane in &self.lanes {
            let reason = match lane.tx.try_send(Arc::clone(&shared)) {
                Ok(()) => continue,
                Err(TrySendError::Full(_)) => "full",
                Err(TrySendError::Closed(_)) => "closed",
            };
            warn!(subscriber = lane.label, reason, seq = shared.seq, "event not delivered");
            self.bus.publish(Event::subscriber_overflow(lane.label, reason));
        }
    }

    /// Closes the lanes and waits until every task has drained what was queued.
    pub async fn shutdown(self) {
        let Self { lanes, drains, .. } = self;
        drop(lanes);
        for drain in drains {
            if let Err(e) = drain.await {
                warn!(error = %e, "subscriber task ended abnormally");
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }
}

async fn drain_lane(sub: Arc<dyn Subscribe>, mut rx: mpsc::Receiver<Arc<Event>>, bus: Bus) {
    let label = sub.name();
    while let Some(ev) = rx.recv().await {
        let outcome = AssertUnwindSafe(sub.on_event(&ev)).catch_unwind().await;
        if let Err(payload) = outcome {
            let info = describe_panic(payload.as_ref());
            warn!(subscriber = label, %info, seq = ev.seq, "subscriber panicked");
            bus.publish(Event::subscriber_panicked(label, info));
        }
    }
}

fn describe_panic(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
