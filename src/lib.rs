//! # worker-manager
//!
//! **worker-manager** supervises a pool of long-lived worker processes on one host.
//!
//! It reserves a unique port for each worker, spawns it with its identity in the
//! environment, restarts it with backoff when it crashes, and converges the pool to a
//! declared size. Every state transition is persisted, so a restarted supervisor knows
//! which workers existed and which ports they owned.
//!
//! ## Architecture
//! ```text
//!   HTTP control surface (axum)            binary: signals, config, startup reconcile
//!            │                                          │
//!            ▼                                          ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Supervisor                                                       │
//! │  - Registry (record mirror + per-worker control slots, ports)     │
//! │  - process monitors (one per live child, report exits)            │
//! │  - restart timers (cancellable, one per crashed worker)           │
//! │  - Bus (broadcast lifecycle events)                               │
//! └──────┬──────────────────────────────┬─────────────────────────────┘
//!        ▼                              ▼
//! ┌──────────────┐              ┌────────────────┐
//! │ RecordStore  │              │ SubscriberSet  │──► LogWriter (tracing), ...
//! │ (SQLite/mem) │              │ (per-sub queue)│
//! └──────────────┘              └────────────────┘
//! ```
//!
//! ### Worker lifecycle
//! ```text
//! start ─► reserve port ─► persist starting ─► spawn ─► persist running
//!                                                │
//!                           spawn error ─► persist error (no retry)
//!
//! exit (expected_running) ─► streak = reset or +1 ─► delay = base × 2^streak (≤ max)
//!                         ─► persist error ─► sleep(delay, cancellable) ─► start (restartCount += 1)
//!
//! stop ─► persist stopping ─► signal ─► wait grace ─► SIGKILL ─► persist stopped
//! ```
//!
//! ## Features
//! | Area              | Description                                                 | Key types                                    |
//! |-------------------|-------------------------------------------------------------|----------------------------------------------|
//! | **Supervision**   | Start/stop workers, crash restarts, graceful close          | [`Supervisor`], [`SupervisorBuilder`]        |
//! | **Reconcile**     | Converge to `{worker-1..worker-n}`                          | [`Supervisor::reconcile`]                    |
//! | **Ports**         | Unique, stable ports from a fixed range                     | [`PortRange`]                                |
//! | **Persistence**   | One JSON record per worker, exclusive file lock             | [`RecordStore`], [`SqliteStore`], [`MemoryStore`] |
//! | **Policies**      | Restart backoff with optional jitter                        | [`RestartBackoff`], [`JitterPolicy`]         |
//! | **Events**        | Lifecycle events on a broadcast bus                         | [`Event`], [`EventKind`], [`Subscribe`]      |
//! | **HTTP**          | JSON control surface                                        | [`router`]                                   |
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use worker_manager::{
//!     LaunchConfig, LogWriter, PortRange, StartRequest, SupervisorBuilder, SupervisorConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = SupervisorConfig {
//!         ports: PortRange::new(9001, 9003)?,
//!         launch: LaunchConfig::command(["./worker"]),
//!         ..SupervisorConfig::default()
//!     };
//!
//!     let sup = SupervisorBuilder::new(cfg)
//!         .with_subscribers(vec![Arc::new(LogWriter::new())])
//!         .open()
//!         .await?;
//!
//!     sup.reconcile(2).await?;
//!     let extra = sup.start_worker(StartRequest::default()).await?;
//!     assert_eq!(extra.id, "worker-3");
//!
//!     sup.close().await?;
//!     Ok(())
//! }
//! ```

mod config;
mod core;
mod error;
mod events;
mod http;
mod policies;
mod records;
mod subscribers;

// ---- Public re-exports ----

pub use config::{
    ENV_COORDINATOR_URL, ENV_MANAGER_ID, ENV_PORT, ENV_WORKER_ID, ENV_WORKER_PORT, LaunchConfig,
    PortRange, SupervisorConfig,
};
pub use crate::core::{
    ExitInfo, HealthSnapshot, MAX_WORKER_ID_LEN, StartRequest, Supervisor, SupervisorBuilder,
    validate_worker_id, wait_for_shutdown_signal,
};
pub use error::{ConfigError, StoreError, SupervisorError};
pub use events::{Bus, Event, EventKind};
pub use http::{ApiError, SERVICE_NAME, router};
pub use policies::{JitterPolicy, RestartBackoff};
pub use records::{
    MemoryStore, RecordStore, SqliteStore, WORKER_KIND, WorkerRecord, WorkerStatus, worker_id,
    worker_ordinal,
};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
