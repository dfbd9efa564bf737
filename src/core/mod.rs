//! Runtime core: worker lifecycle, ports, reconciliation.
//!
//! The only public API from this module is [`Supervisor`] (built by
//! [`SupervisorBuilder`]) plus its request/response types.
//!
//! Internal modules:
//! - [`supervisor`]: per-worker state machine, exit handling, restart timers;
//! - [`reconcile`]: converges to a desired worker count;
//! - [`registry`]: in-memory mirror of records and per-worker control handles;
//! - [`ports`]: port allocation rules;
//! - [`process`]: spawning, signalling and reaping OS processes;
//! - [`builder`]: store opening and startup recovery;
//! - [`shutdown`]: OS termination signals for the binary.

mod builder;
mod health;
mod ports;
mod process;
mod reconcile;
mod registry;
mod shutdown;
mod slot;
mod supervisor;

pub use builder::SupervisorBuilder;
pub use health::HealthSnapshot;
pub use process::ExitInfo;
pub use shutdown::wait_for_shutdown_signal;
pub use supervisor::{MAX_WORKER_ID_LEN, StartRequest, Supervisor, validate_worker_id};
