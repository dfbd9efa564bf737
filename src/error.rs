//! Error types used by the worker supervisor, its record store and its configuration.
//!
//! - [`StoreError`]: failures of the durable record store.
//! - [`SupervisorError`]: errors returned synchronously to callers of supervisor operations.
//! - [`ConfigError`]: invalid configuration detected before the supervisor starts.
//!
//! Every enum exposes `as_label` (a stable snake_case label for logs and API error codes).
//! Failures that happen *inside* a worker's lifecycle (spawn failure, crash) are never
//! returned from here: they are absorbed into that worker's record.

use std::time::Duration;

use thiserror::Error;

/// # Errors produced by a [`RecordStore`](crate::RecordStore).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store cannot be opened (e.g. another supervisor holds its lock) or has been closed.
    #[error("record store unavailable: {reason}")]
    Unavailable {
        /// Why the store could not be used.
        reason: String,
    },

    /// Underlying SQLite failure after the store was opened.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Filesystem failure (directories, lock file) or a blocking task that could not finish.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be encoded for writing.
    #[error("record encoding failed: {0}")]
    Codec(#[from] serde_json::Error),
}

impl StoreError {
    /// Shorthand for [`StoreError::Unavailable`].
    pub fn unavailable(reason: impl Into<String>) -> Self {
        StoreError::Unavailable {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            StoreError::Unavailable { .. } => "store_unavailable",
            StoreError::Sqlite(_) => "store_sqlite",
            StoreError::Io(_) => "store_io",
            StoreError::Codec(_) => "store_codec",
        }
    }

    /// True for [`StoreError::Unavailable`].
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. })
    }
}

/// # Errors returned by supervisor operations.
///
/// Caller mistakes (bad desired count, malformed id or signal) are detected before any
/// state changes. `Store` wraps environmental failures of the record store.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// The record store failed; `StoreError::Unavailable` at startup is fatal.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The configuration was rejected before the supervisor started.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Every port of the configured range is held by another worker.
    #[error("no free port in range {start}..={end}")]
    PortRangeExhausted {
        /// First port of the range.
        start: u16,
        /// Last port of the range (inclusive).
        end: u16,
    },

    /// A reconcile asked for more workers than the port range can host.
    #[error("desired count {requested} exceeds port range capacity {capacity}")]
    CapacityExceeded {
        /// Requested worker count.
        requested: usize,
        /// Number of ports in the configured range.
        capacity: usize,
    },

    /// The supervisor is closing and accepts no new starts.
    #[error("supervisor is shutting down")]
    ShuttingDown,

    /// Worker id is empty, too long, or contains characters outside `[A-Za-z0-9._-]`.
    #[error("invalid worker id {id:?}")]
    InvalidWorkerId {
        /// The rejected id.
        id: String,
    },

    /// Stop signal name not recognised.
    #[error("invalid signal {signal:?}")]
    InvalidSignal {
        /// The rejected signal name.
        signal: String,
    },
}

impl SupervisorError {
    /// Returns a short stable label (snake_case) for use in logs/metrics and API error codes.
    ///
    /// # Example
    /// ```
    /// use worker_manager::SupervisorError;
    ///
    /// let err = SupervisorError::CapacityExceeded { requested: 9, capacity: 3 };
    /// assert_eq!(err.as_label(), "capacity_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            SupervisorError::Store(e) => e.as_label(),
            SupervisorError::Config(e) => e.as_label(),
            SupervisorError::PortRangeExhausted { .. } => "port_range_exhausted",
            SupervisorError::CapacityExceeded { .. } => "capacity_exceeded",
            SupervisorError::ShuttingDown => "shutting_down",
            SupervisorError::InvalidWorkerId { .. } => "invalid_worker_id",
            SupervisorError::InvalidSignal { .. } => "invalid_signal",
        }
    }

    /// Indicates whether the error was caused by the request itself (no state was changed).
    ///
    /// # Example
    /// ```
    /// use worker_manager::SupervisorError;
    ///
    /// assert!(SupervisorError::InvalidSignal { signal: "SIGNOPE".into() }.is_client_error());
    /// assert!(!SupervisorError::ShuttingDown.is_client_error());
    /// ```
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SupervisorError::CapacityExceeded { .. }
                | SupervisorError::InvalidWorkerId { .. }
                | SupervisorError::InvalidSignal { .. }
        )
    }
}

/// # Invalid configuration.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Port range with `start > end`, or starting at port 0.
    #[error("invalid port range {start}..={end}")]
    InvalidPortRange {
        /// Configured first port.
        start: u16,
        /// Configured last port.
        end: u16,
    },

    /// The selected launch command has no program.
    #[error("worker launch command is empty (watch mode: {watch})")]
    EmptyCommand {
        /// Whether watch mode selected the command.
        watch: bool,
    },

    /// A timing knob that must be positive was zero.
    #[error("{name} must be greater than zero (got {value:?})")]
    ZeroDuration {
        /// Setting name.
        name: &'static str,
        /// Rejected value.
        value: Duration,
    },
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::InvalidPortRange { .. } => "config_port_range",
            ConfigError::EmptyCommand { .. } => "config_empty_command",
            ConfigError::ZeroDuration { .. } => "config_zero_duration",
        }
    }
}
