mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::Signal;

use common::*;
use worker_manager::{
    Event, EventKind, LaunchConfig, SqliteStore, StartRequest, Subscribe, SupervisorBuilder,
    SupervisorError, WorkerStatus,
};

#[tokio::test]
async fn starts_ordinal_workers_on_unique_ports() {
    let sup = open(config(9001, 9003, SLEEPER)).await;

    for n in 1..=3u16 {
        let rec = sup.start_worker(StartRequest::default()).await.unwrap();
        assert_eq!(rec.id, format!("worker-{n}"));
        assert_eq!(rec.status, WorkerStatus::Running);
        assert_eq!(rec.port, Some(9000 + n));
        assert!(rec.pid.is_some());
        assert!(rec.started_at.is_some());
        assert_eq!(rec.restart_count, 0);
        assert_eq!(rec.managed_by, "manager-test");
    }
    assert_unique_active_ports(&sup.list_workers());

    let err = sup.start_worker(StartRequest::default()).await.unwrap_err();
    assert!(matches!(
        err,
        SupervisorError::PortRangeExhausted {
            start: 9001,
            end: 9003
        }
    ));
    assert_eq!(sup.list_workers().len(), 3, "failed start leaves no record");

    sup.close().await.unwrap();
}

#[tokio::test]
async fn start_is_idempotent_while_process_is_live() {
    let sup = open(config(9011, 9015, SLEEPER)).await;
    let mut rx = sup.subscribe();

    let first = sup
        .start_worker(StartRequest::for_worker("worker-2"))
        .await
        .unwrap();
    let second = sup
        .start_worker(StartRequest::for_worker("worker-2"))
        .await
        .unwrap();

    assert_eq!(first.pid, second.pid);
    assert_eq!(first.port, Some(9012));
    assert_eq!(count(&drain(&mut rx), EventKind::WorkerStarting), 1);

    sup.close().await.unwrap();
}

#[tokio::test]
async fn preferred_port_is_honoured_only_when_free() {
    let sup = open(config(9021, 9023, SLEEPER)).await;

    let api = sup
        .start_worker(StartRequest::for_worker("api").with_port(9022))
        .await
        .unwrap();
    assert_eq!(api.port, Some(9022));

    let w2 = sup
        .start_worker(StartRequest::for_worker("worker-2").with_port(9022))
        .await
        .unwrap();
    assert_eq!(w2.port, Some(9021));

    let outside = sup
        .start_worker(StartRequest::for_worker("edge").with_port(80))
        .await
        .unwrap();
    assert_eq!(outside.port, Some(9023));

    assert_unique_active_ports(&sup.list_workers());
    sup.close().await.unwrap();
}

#[tokio::test]
async fn rejects_malformed_ids_without_side_effects() {
    let sup = open(config(9031, 9033, SLEEPER)).await;

    let err = sup
        .start_worker(StartRequest::for_worker("../escape"))
        .await
        .unwrap_err();
    assert!(matches!(err, SupervisorError::InvalidWorkerId { .. }));
    assert!(sup.list_workers().is_empty());

    sup.close().await.unwrap();
}

#[tokio::test]
async fn injects_identity_into_worker_environment() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(
        9041,
        9043,
        "echo \"$WORKER_ID $WORKER_PORT $PORT $COORDINATOR_URL $WORKER_MANAGER_ID\" > \"$WORKER_ID.env\"; exec sleep 30",
    );
    cfg.launch.working_dir = Some(dir.path().to_path_buf());
    let sup = open(cfg).await;

    sup.start_worker(StartRequest::for_worker("worker-3"))
        .await
        .unwrap();

    let path = dir.path().join("worker-3.env");
    assert!(eventually(Duration::from_secs(5), || path.exists()).await);
    let mut env = String::new();
    assert!(
        eventually(Duration::from_secs(5), || {
            env = std::fs::read_to_string(&path).unwrap_or_default();
            env.ends_with('\n')
        })
        .await
    );
    assert_eq!(
        env.trim(),
        "worker-3 9043 9043 http://127.0.0.1:4999 manager-test"
    );

    sup.close().await.unwrap();
}

#[tokio::test]
async fn stop_suppresses_restart() {
    let sup = open(config(9051, 9053, SLEEPER)).await;
    let mut rx = sup.subscribe();

    let rec = sup.start_worker(StartRequest::default()).await.unwrap();
    let stopped = sup.stop_worker(&rec.id, None).await.unwrap().unwrap();

    assert_eq!(stopped.status, WorkerStatus::Stopped);
    assert_eq!(stopped.pid, None);
    assert_eq!(stopped.port, rec.port, "port stays reserved for the id");
    assert_eq!(stopped.meta_str("exitSignal"), Some("SIGTERM"));
    assert_eq!(stopped.meta_str("stopSignal"), Some("SIGTERM"));

    tokio::time::sleep(Duration::from_millis(600)).await;
    let after = sup.get_worker(&rec.id).unwrap();
    assert_eq!(after.status, WorkerStatus::Stopped);
    assert_eq!(after.restart_count, 0);

    let events = drain(&mut rx);
    assert_eq!(count(&events, EventKind::BackoffScheduled), 0);
    assert_eq!(count(&events, EventKind::WorkerStarting), 1);

    sup.close().await.unwrap();
}

#[tokio::test]
async fn stop_of_unknown_or_idle_worker() {
    let sup = open(config(9061, 9063, SLEEPER)).await;

    assert!(sup.stop_worker("worker-9", None).await.unwrap().is_none());

    let rec = sup.start_worker(StartRequest::default()).await.unwrap();
    sup.stop_worker(&rec.id, Some("INT")).await.unwrap();
    let again = sup.stop_worker(&rec.id, None).await.unwrap().unwrap();
    assert_eq!(again.status, WorkerStatus::Stopped);
    assert_eq!(again.meta_str("stopSignal"), Some("SIGINT"));

    let err = sup.stop_worker(&rec.id, Some("SIGBOGUS")).await.unwrap_err();
    assert!(matches!(err, SupervisorError::InvalidSignal { .. }));

    sup.close().await.unwrap();
}

#[tokio::test]
async fn stop_escalates_to_sigkill_after_grace() {
    let mut cfg = config(9071, 9073, STUBBORN);
    cfg.stop_grace = Duration::from_millis(300);
    let sup = open(cfg).await;
    let mut rx = sup.subscribe();

    let rec = sup.start_worker(StartRequest::default()).await.unwrap();
    // let the shell install its trap before signalling
    tokio::time::sleep(Duration::from_millis(200)).await;
    let stopped = sup.stop_worker(&rec.id, None).await.unwrap().unwrap();

    assert_eq!(stopped.status, WorkerStatus::Stopped);
    assert_eq!(stopped.meta_str("exitSignal"), Some("SIGKILL"));
    let escalated = next_event(&mut rx, |e| e.kind == EventKind::StopEscalated).await;
    assert_eq!(escalated.delay_ms, Some(300));

    sup.close().await.unwrap();
}

#[tokio::test]
async fn crash_loop_backs_off_up_to_the_cap() {
    let sup = open(config(9081, 9083, "sleep 0.1; exit 3")).await;
    let mut rx = sup.subscribe();

    let rec = sup.start_worker(StartRequest::default()).await.unwrap();

    let mut delays = Vec::new();
    for _ in 0..3 {
        let ev = next_event(&mut rx, |e| e.kind == EventKind::BackoffScheduled).await;
        assert_eq!(ev.reason.as_deref(), Some("exit code 3"));
        delays.push(ev.delay_ms.unwrap());
    }
    assert_eq!(delays, [200, 400, 400]);

    let restarted = wait_for(&sup, &rec.id, |r| r.restart_count >= 2).await;
    assert_eq!(restarted.port, rec.port);

    let crashed = wait_for_status(&sup, &rec.id, WorkerStatus::Error).await;
    assert_eq!(crashed.pid, None);
    assert!(crashed.metadata.contains_key("backoffMs"));
    assert_eq!(crashed.metadata["exitCode"], 3);

    let stopped = sup.stop_worker(&rec.id, None).await.unwrap().unwrap();
    assert_eq!(stopped.status, WorkerStatus::Stopped);
    let settled = stopped.restart_count;
    tokio::time::sleep(Duration::from_millis(800)).await;
    let after = sup.get_worker(&rec.id).unwrap();
    assert_eq!(after.status, WorkerStatus::Stopped);
    assert_eq!(after.restart_count, settled);

    sup.close().await.unwrap();
}

#[tokio::test]
async fn long_uptime_resets_backoff() {
    let mut cfg = config(9091, 9093, "sleep 0.4; exit 1");
    cfg.restart.min_uptime = Duration::from_millis(200);
    let sup = open(cfg).await;
    let mut rx = sup.subscribe();

    sup.start_worker(StartRequest::default()).await.unwrap();

    for _ in 0..2 {
        let ev = next_event(&mut rx, |e| e.kind == EventKind::BackoffScheduled).await;
        assert_eq!(ev.attempt, Some(0));
        assert_eq!(ev.delay_ms, Some(100));
    }

    sup.close().await.unwrap();
}

#[tokio::test]
async fn spawn_failure_is_recorded_and_not_retried() {
    let mut cfg = config(9101, 9103, SLEEPER);
    cfg.launch = LaunchConfig::command(["/nonexistent/worker-binary"]);
    let sup = open(cfg).await;
    let mut rx = sup.subscribe();

    let rec = sup.start_worker(StartRequest::default()).await.unwrap();
    assert_eq!(rec.status, WorkerStatus::Error);
    assert_eq!(rec.pid, None);
    assert_eq!(rec.metadata["spawnFailed"], true);
    assert!(rec.meta_str("lastError").is_some());

    tokio::time::sleep(Duration::from_millis(500)).await;
    let after = sup.get_worker(&rec.id).unwrap();
    assert_eq!(after.status, WorkerStatus::Error);
    assert_eq!(after.restart_count, 0);

    let events = drain(&mut rx);
    assert_eq!(count(&events, EventKind::SpawnFailed), 1);
    assert_eq!(count(&events, EventKind::WorkerStarting), 1);
    assert_eq!(count(&events, EventKind::BackoffScheduled), 0);

    sup.close().await.unwrap();
}

#[tokio::test]
async fn close_stops_everything_and_refuses_new_work() {
    let sup = open(config(9111, 9113, SLEEPER)).await;
    let mut rx = sup.subscribe();

    sup.start_worker(StartRequest::default()).await.unwrap();
    sup.start_worker(StartRequest::default()).await.unwrap();

    sup.close().await.unwrap();
    assert!(sup.is_shutting_down());
    assert!(
        sup.list_workers()
            .iter()
            .all(|w| w.status == WorkerStatus::Stopped && w.pid.is_none())
    );

    let err = sup.start_worker(StartRequest::default()).await.unwrap_err();
    assert!(matches!(err, SupervisorError::ShuttingDown));
    assert!(matches!(
        sup.reconcile(1).await.unwrap_err(),
        SupervisorError::ShuttingDown
    ));
    sup.close().await.unwrap();

    let events = drain(&mut rx);
    assert_eq!(count(&events, EventKind::ShutdownRequested), 1);
    assert_eq!(count(&events, EventKind::ShutdownFinished), 1);
}

#[tokio::test]
async fn close_cancels_pending_restarts() {
    let mut cfg = config(9121, 9123, "exit 2");
    cfg.restart.base = Duration::from_millis(300);
    cfg.restart.max = Duration::from_secs(1);
    let sup = open(cfg).await;
    let mut rx = sup.subscribe();

    let rec = sup.start_worker(StartRequest::default()).await.unwrap();
    next_event(&mut rx, |e| e.kind == EventKind::BackoffScheduled).await;

    sup.close().await.unwrap();
    let closing = drain(&mut rx);
    assert_eq!(count(&closing, EventKind::RestartCancelled), 1);

    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(count(&drain(&mut rx), EventKind::WorkerStarting), 0);
    let after = sup.get_worker(&rec.id).unwrap();
    assert_eq!(after.status, WorkerStatus::Stopped);
}

struct Counter(Arc<AtomicUsize>);

#[async_trait]
impl Subscribe for Counter {
    async fn on_event(&self, ev: &Event) {
        if ev.kind == EventKind::WorkerRunning {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn name(&self) -> &'static str {
        "running-counter"
    }
}

#[tokio::test]
async fn subscribers_observe_lifecycle_events() {
    let running = Arc::new(AtomicUsize::new(0));
    let sup = SupervisorBuilder::new(config(9131, 9133, SLEEPER))
        .with_subscribers(vec![Arc::new(Counter(Arc::clone(&running)))])
        .open()
        .await
        .unwrap();

    sup.start_worker(StartRequest::default()).await.unwrap();
    sup.start_worker(StartRequest::default()).await.unwrap();

    assert!(eventually(Duration::from_secs(5), || running.load(Ordering::SeqCst) == 2).await);
    sup.close().await.unwrap();
}

fn durable_config() -> worker_manager::SupervisorConfig {
    let mut cfg = config(9141, 9143, SLEEPER);
    cfg.restart.base = Duration::from_secs(5);
    cfg.restart.max = Duration::from_secs(10);
    cfg
}

#[tokio::test]
async fn reopening_recovers_records_as_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("workers.db");

    let first = SupervisorBuilder::new(durable_config())
        .with_store(SqliteStore::new(&db))
        .open()
        .await
        .unwrap();
    let w1 = first.start_worker(StartRequest::default()).await.unwrap();
    let w2 = first.start_worker(StartRequest::default()).await.unwrap();

    let locked = SupervisorBuilder::new(durable_config())
        .with_store(SqliteStore::new(&db))
        .open()
        .await
        .err()
        .unwrap();
    assert_eq!(locked.as_label(), "store_unavailable");

    // simulate a supervisor crash: kill the workers and drop without close()
    for rec in [&w1, &w2] {
        kill(rec.pid.unwrap(), Signal::SIGKILL);
        wait_for_status(&first, &rec.id, WorkerStatus::Error).await;
    }
    drop(first);

    // exit handlers may briefly keep the old instance (and its lock) alive
    let mut second = None;
    for _ in 0..50 {
        match SupervisorBuilder::new(durable_config())
            .with_store(SqliteStore::new(&db))
            .open()
            .await
        {
            Ok(sup) => {
                second = Some(sup);
                break;
            }
            Err(e) => {
                assert_eq!(e.as_label(), "store_unavailable");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
    let second = second.expect("store lock was never released");

    let workers = second.list_workers();
    assert_eq!(workers.len(), 2);
    for (rec, before) in workers.iter().zip([&w1, &w2]) {
        assert_eq!(rec.id, before.id);
        assert_eq!(rec.status, WorkerStatus::Stopped);
        assert_eq!(rec.pid, None);
        assert_eq!(rec.port, before.port);
        assert_eq!(rec.meta_str("recoveredFrom"), Some("error"));
        assert!(rec.meta_str("recoveredAt").is_some());
    }

    let restarted = second.reconcile(2).await.unwrap();
    assert_eq!(restarted[0].port, Some(9141));
    assert_eq!(restarted[1].port, Some(9142));
    assert!(restarted.iter().all(|w| w.status == WorkerStatus::Running));

    second.close().await.unwrap();
}
