//! Restart policies.
//!
//! ## Contents
//! - [`RestartBackoff`] how long a crashed worker waits before it is started again
//! - [`JitterPolicy`]  randomization to avoid restarting a whole pool at once
//!
//! ## Wiring
//! ```text
//! SupervisorConfig { restart: RestartBackoff, .. }
//!      └─► exit handler:
//!           - streak = restart.next_streak(streak, uptime)
//!           - delay  = restart.delay(streak)  → cancellable restart timer
//! ```
//!
//! Workers that failed to *spawn* never enter this loop; only crashes after a
//! successful launch are retried.

mod backoff;
mod jitter;

pub use backoff::RestartBackoff;
pub use jitter::JitterPolicy;
