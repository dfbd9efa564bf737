//! # Supervisor configuration.
//!
//! [`SupervisorConfig`] centralizes everything the supervisor needs at construction time:
//! - **Identity**: `manager_id` stamped into every record's `managedBy`
//! - **Ports**: the [`PortRange`] workers are allocated from
//! - **Launch**: the [`LaunchConfig`] command (normal or watch mode)
//! - **Downstream**: the coordinator URL injected into each worker's environment
//! - **Policies**: restart backoff and the stop grace period
//!
//! The binary builds it from command-line flags / environment variables; tests build it
//! directly. Call [`SupervisorConfig::validate`] before use (the builder does).

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::policies::RestartBackoff;

/// Environment variable carrying the worker id.
pub const ENV_WORKER_ID: &str = "WORKER_ID";
/// Environment variable carrying the reserved port.
pub const ENV_WORKER_PORT: &str = "WORKER_PORT";
/// Conventional alias of [`ENV_WORKER_PORT`] for servers that read `PORT`.
pub const ENV_PORT: &str = "PORT";
/// Environment variable carrying the coordinator endpoint.
pub const ENV_COORDINATOR_URL: &str = "COORDINATOR_URL";
/// Environment variable carrying the owning supervisor id.
pub const ENV_MANAGER_ID: &str = "WORKER_MANAGER_ID";

/// Inclusive range of ports workers are allocated from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortRange {
    /// First port (inclusive).
    pub start: u16,
    /// Last port (inclusive).
    pub end: u16,
}

impl PortRange {
    /// Creates a validated range.
    pub fn new(start: u16, end: u16) -> Result<Self, ConfigError> {
        if start == 0 || start > end {
            return Err(ConfigError::InvalidPortRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Number of ports in the range (`end - start + 1`).
    #[inline]
    pub fn capacity(&self) -> usize {
        usize::from(self.end.saturating_sub(self.start)) + 1
    }

    /// True if `port` lies inside the range.
    #[inline]
    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }

    /// Ports in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }

    /// Deterministic port for the 1-based ordinal `n` (`worker-n`).
    ///
    /// `worker-1` maps to `start`; ordinals past the end wrap to `start`.
    pub fn for_ordinal(&self, n: u64) -> u16 {
        let offset = n.saturating_sub(1);
        match u16::try_from(offset)
            .ok()
            .and_then(|off| self.start.checked_add(off))
        {
            Some(port) if port <= self.end => port,
            _ => self.start,
        }
    }
}

impl Default for PortRange {
    /// `5001..=5100`.
    fn default() -> Self {
        Self {
            start: 5001,
            end: 5100,
        }
    }
}

/// How worker processes are launched.
#[derive(Clone, Debug)]
pub struct LaunchConfig {
    /// Program and arguments used normally.
    pub command: Vec<String>,
    /// Program and arguments used in watch mode (development reloads).
    pub watch_command: Vec<String>,
    /// Selects `watch_command` instead of `command`.
    pub watch: bool,
    /// Working directory for spawned workers (`None` = inherit).
    pub working_dir: Option<PathBuf>,
}

impl LaunchConfig {
    /// Launch config running `command` with no watch alternative.
    pub fn command<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            watch_command: Vec::new(),
            watch: false,
            working_dir: None,
        }
    }

    /// Returns the argv that will be spawned (`argv[0]` is the program).
    #[inline]
    pub fn argv(&self) -> &[String] {
        if self.watch {
            &self.watch_command
        } else {
            &self.command
        }
    }
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            command: vec!["./worker".to_string()],
            watch_command: vec![
                "cargo".to_string(),
                "watch".to_string(),
                "-x".to_string(),
                "run --bin worker".to_string(),
            ],
            watch: false,
            working_dir: None,
        }
    }
}

/// Global configuration for the worker supervisor.
///
/// ## Field semantics
/// - `manager_id`: identifier written to `managedBy` of every record this instance touches
/// - `ports`: allocation range; its capacity bounds `reconcile`
/// - `coordinator_url`: injected as `COORDINATOR_URL` into every worker
/// - `launch`: worker command line
/// - `restart`: crash backoff (base/max/min-uptime)
/// - `stop_grace`: wait after the stop signal before escalating to `SIGKILL`
/// - `bus_capacity`: lifecycle event ring buffer size (min 1)
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Identity of this supervisor instance.
    pub manager_id: String,
    /// Worker port range.
    pub ports: PortRange,
    /// Downstream coordinator base URL.
    pub coordinator_url: String,
    /// Worker launch command.
    pub launch: LaunchConfig,
    /// Crash restart backoff.
    pub restart: RestartBackoff,
    /// Grace period before a stop escalates to a forceful kill.
    pub stop_grace: Duration,
    /// Capacity of the lifecycle event bus.
    pub bus_capacity: usize,
}

impl SupervisorConfig {
    /// Checks the invariants the supervisor relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        PortRange::new(self.ports.start, self.ports.end)?;
        if self.launch.argv().first().is_none_or(|p| p.trim().is_empty()) {
            return Err(ConfigError::EmptyCommand {
                watch: self.launch.watch,
            });
        }
        if self.stop_grace.is_zero() {
            return Err(ConfigError::ZeroDuration {
                name: "stop_grace",
                value: self.stop_grace,
            });
        }
        Ok(())
    }

    /// Returns the bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for SupervisorConfig {
    /// Defaults:
    ///
    /// - `manager_id = "manager-<pid>"`
    /// - `ports = 5001..=5100`
    /// - `coordinator_url = "http://127.0.0.1:4000"`
    /// - `stop_grace = 5s`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            manager_id: format!("manager-{}", std::process::id()),
            ports: PortRange::default(),
            coordinator_url: "http://127.0.0.1:4000".to_string(),
            launch: LaunchConfig::default(),
            restart: RestartBackoff::default(),
            stop_grace: Duration::from_secs(5),
            bus_capacity: 1024,
        }
    }
}
