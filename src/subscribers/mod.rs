//! # Event subscribers.
//!
//! ```text
//! Bus ──► listener ──► SubscriberSet ──┬──► LogWriter (tracing)
//!                                      └──► custom subscribers
//! ```
//!
//! Subscriber-health events (`SubscriberOverflow`, `SubscriberPanicked`) are logged by
//! the set itself and are not fed back into it.

mod log;
mod set;
mod subscriber;

pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscriber::Subscribe;
