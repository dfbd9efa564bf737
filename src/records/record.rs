//! # Persisted worker record.
//!
//! One [`WorkerRecord`] exists per worker id. It is the durable view of a worker:
//! status, pid, reserved port, restart counter and a free-form metadata bag used for
//! diagnostics (last error, exit code/signal, backoff, recovery marker).
//!
//! The JSON shape (camelCase) is what the store persists and what the HTTP surface returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default `kind` for records created by the supervisor.
pub const WORKER_KIND: &str = "worker";

/// Lifecycle status of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// No process; not expected to run.
    Stopped,
    /// Record reserved, process being launched.
    Starting,
    /// Process launched and alive.
    Running,
    /// Stop signal sent, waiting for the process to exit.
    Stopping,
    /// Spawn failed, or crashed and waiting for a backoff restart.
    Error,
}

impl WorkerStatus {
    /// True for statuses that own a port and may carry a pid.
    #[inline]
    pub fn is_active(self) -> bool {
        matches!(
            self,
            WorkerStatus::Starting | WorkerStatus::Running | WorkerStatus::Stopping
        )
    }

    /// Lowercase name as persisted.
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerStatus::Stopped => "stopped",
            WorkerStatus::Starting => "starting",
            WorkerStatus::Running => "running",
            WorkerStatus::Stopping => "stopping",
            WorkerStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable state of one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRecord {
    /// Stable unique id; also the store key.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Descriptive kind.
    pub kind: String,
    /// Current lifecycle status.
    pub status: WorkerStatus,
    /// OS pid while a process is associated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Supervisor instance that last wrote this record.
    pub managed_by: String,
    /// Most recent successful launch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Last mutation.
    pub updated_at: DateTime<Utc>,
    /// Reserved port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Automatic restarts after unexpected exits.
    #[serde(default)]
    pub restart_count: u32,
    /// Diagnostic context.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl WorkerRecord {
    /// Creates a fresh `stopped` record with no port.
    pub fn new(id: impl Into<String>, managed_by: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind: WORKER_KIND.to_string(),
            status: WorkerStatus::Stopped,
            pid: None,
            managed_by: managed_by.into(),
            started_at: None,
            updated_at: Utc::now(),
            port: None,
            restart_count: 0,
            metadata: Map::new(),
        }
    }

    /// Moves to `status`, dropping the pid when the status cannot carry one.
    pub fn transition(&mut self, status: WorkerStatus) {
        self.status = status;
        if !status.is_active() {
            self.pid = None;
        }
    }

    /// Refreshes `updated_at`.
    #[inline]
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Sets a metadata entry.
    pub fn set_meta(&mut self, key: &str, value: impl Into<Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    /// Removes a metadata entry.
    pub fn clear_meta(&mut self, key: &str) {
        self.metadata.remove(key);
    }

    /// Reads a string metadata entry.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Ordinal `N` when the id follows the `worker-N` convention.
    pub fn ordinal(&self) -> Option<u64> {
        worker_ordinal(&self.id)
    }
}

/// Canonical id for ordinal `n`.
pub fn worker_id(n: u64) -> String {
    format!("worker-{n}")
}

/// Parses `worker-N` (N ≥ 1, decimal, no sign or leading zeros).
pub fn worker_ordinal(id: &str) -> Option<u64> {
    let digits = id.strip_prefix("worker-")?;
    if digits.is_empty() || digits.starts_with('0') || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
