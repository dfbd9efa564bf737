#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use worker_manager::{
    Event, EventKind, LaunchConfig, MemoryStore, PortRange, RestartBackoff, Supervisor,
    SupervisorBuilder, SupervisorConfig, WorkerRecord, WorkerStatus,
};

/// Long-lived worker that exits promptly on SIGTERM.
pub const SLEEPER: &str = "exec sleep 30";
/// Worker that ignores SIGTERM.
pub const STUBBORN: &str = "trap '' TERM; exec sleep 30";

pub fn config(start: u16, end: u16, script: &str) -> SupervisorConfig {
    SupervisorConfig {
        manager_id: "manager-test".into(),
        ports: PortRange::new(start, end).unwrap(),
        coordinator_url: "http://127.0.0.1:4999".into(),
        launch: LaunchConfig::command(["sh", "-c", script]),
        restart: RestartBackoff {
            base: Duration::from_millis(100),
            max: Duration::from_millis(400),
            min_uptime: Duration::from_secs(5),
            ..RestartBackoff::default()
        },
        stop_grace: Duration::from_secs(2),
        ..SupervisorConfig::default()
    }
}

pub async fn open(cfg: SupervisorConfig) -> Arc<Supervisor> {
    SupervisorBuilder::new(cfg)
        .with_store(MemoryStore::new())
        .open()
        .await
        .unwrap()
}

/// Polls `check` every 20ms until it holds or `timeout` elapses.
pub async fn eventually<F: FnMut() -> bool>(timeout: Duration, mut check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Waits for `id` to satisfy `pred` and returns its record.
pub async fn wait_for<F>(sup: &Supervisor, id: &str, pred: F) -> WorkerRecord
where
    F: Fn(&WorkerRecord) -> bool,
{
    let mut last = None;
    let ok = eventually(Duration::from_secs(10), || {
        last = sup.get_worker(id);
        last.as_ref().is_some_and(&pred)
    })
    .await;
    assert!(ok, "worker {id} never reached the expected state, last: {last:?}");
    last.unwrap()
}

pub async fn wait_for_status(sup: &Supervisor, id: &str, status: WorkerStatus) -> WorkerRecord {
    wait_for(sup, id, |r| r.status == status).await
}

/// Receives events until one matches, failing after 10s.
pub async fn next_event<F>(rx: &mut broadcast::Receiver<Event>, pred: F) -> Event
where
    F: Fn(&Event) -> bool,
{
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(ev) if pred(&ev) => return ev,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event bus closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("expected event not published")
}

/// Everything already published to `rx`.
pub fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(ev) => out.push(ev),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => return out,
        }
    }
}

pub fn count(events: &[Event], kind: EventKind) -> usize {
    events.iter().filter(|e| e.kind == kind).count()
}

/// Active records never share a port.
pub fn assert_unique_active_ports(workers: &[WorkerRecord]) {
    let mut ports: Vec<u16> = workers
        .iter()
        .filter(|w| w.status.is_active())
        .filter_map(|w| w.port)
        .collect();
    let before = ports.len();
    ports.sort_unstable();
    ports.dedup();
    assert_eq!(before, ports.len(), "duplicate ports among {workers:?}");
}

pub fn kill(pid: u32, signal: nix::sys::signal::Signal) {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), signal).unwrap();
}
