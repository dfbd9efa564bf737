//! # OS process plumbing.
//!
//! Spawning a worker with its environment, signalling it through `nix`, and turning a
//! reaped [`ExitStatus`] into [`ExitInfo`] metadata.
//!
//! Every spawned worker receives:
//! - `WORKER_ID`: its id;
//! - `WORKER_PORT` and `PORT`: its reserved port;
//! - `COORDINATOR_URL`: the downstream coordinator endpoint;
//! - `WORKER_MANAGER_ID`: the supervisor instance id.

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::str::FromStr;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::sync::watch;

use crate::config::{
    ENV_COORDINATOR_URL, ENV_MANAGER_ID, ENV_PORT, ENV_WORKER_ID, ENV_WORKER_PORT,
    SupervisorConfig,
};
use crate::error::SupervisorError;
use crate::records::WorkerRecord;

/// How a supervised process terminated.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code for a normal exit.
    pub code: Option<i32>,
    /// Signal name (`SIGKILL`, ...) when killed by a signal.
    pub signal: Option<String>,
}

impl ExitInfo {
    pub(crate) fn from_status(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status
                .signal()
                .map(|raw| match Signal::try_from(raw) {
                    Ok(sig) => sig.as_str().to_string(),
                    Err(_) => format!("signal {raw}"),
                }),
        }
    }

    /// Short human-readable description (`exit code 3`, `killed by SIGKILL`).
    pub fn describe(&self) -> String {
        match (&self.signal, self.code) {
            (Some(sig), _) => format!("killed by {sig}"),
            (None, Some(code)) => format!("exit code {code}"),
            (None, None) => "exited".to_string(),
        }
    }

    /// Writes `exitCode` / `exitSignal` into the record's metadata.
    pub(crate) fn annotate(&self, record: &mut WorkerRecord) {
        match self.code {
            Some(code) => record.set_meta("exitCode", code),
            None => record.set_meta("exitCode", serde_json::Value::Null),
        }
        match &self.signal {
            Some(sig) => record.set_meta("exitSignal", sig.as_str()),
            None => record.set_meta("exitSignal", serde_json::Value::Null),
        }
    }
}

/// Spawns the configured worker command for `id` on `port`.
pub(crate) fn spawn(cfg: &SupervisorConfig, id: &str, port: u16) -> io::Result<Child> {
    let (program, args) = cfg
        .launch
        .argv()
        .split_first()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty worker command"))?;

    let port = port.to_string();
    let mut cmd = Command::new(program);
    cmd.args(args)
        .env(ENV_WORKER_ID, id)
        .env(ENV_WORKER_PORT, &port)
        .env(ENV_PORT, &port)
        .env(ENV_COORDINATOR_URL, &cfg.coordinator_url)
        .env(ENV_MANAGER_ID, &cfg.manager_id)
        .stdin(Stdio::null())
        .kill_on_drop(true);
    if let Some(dir) = &cfg.launch.working_dir {
        cmd.current_dir(dir);
    }
    cmd.spawn()
}

/// Parses a stop signal name; `None` or blank means `SIGTERM`.
///
/// Accepts `TERM`, `sigterm`, `SIGTERM` and so on.
pub(crate) fn parse_signal(name: Option<&str>) -> Result<Signal, SupervisorError> {
    let Some(raw) = name.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(Signal::SIGTERM);
    };
    let upper = raw.to_ascii_uppercase();
    let full = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };
    Signal::from_str(&full).map_err(|_| SupervisorError::InvalidSignal {
        signal: raw.to_string(),
    })
}

/// Sends `sig` to `pid`. A process that is already gone is not an error.
pub(crate) fn send_signal(pid: u32, sig: Signal) -> nix::Result<()> {
    let raw = i32::try_from(pid).map_err(|_| Errno::EINVAL)?;
    match signal::kill(Pid::from_raw(raw), sig) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Waits until the monitor publishes the exit. `None` if the monitor went away first.
pub(crate) async fn wait_exit(rx: &mut watch::Receiver<Option<ExitInfo>>) -> Option<ExitInfo> {
    rx.wait_for(Option::is_some)
        .await
        .ok()
        .and_then(|exit| exit.clone())
}
