use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use worker_manager::{
    JitterPolicy, LaunchConfig, LogWriter, PortRange, RestartBackoff, SqliteStore,
    Supervisor, SupervisorBuilder, SupervisorConfig, router, wait_for_shutdown_signal,
};

#[derive(Parser, Debug)]
#[command(name = "worker-manager")]
#[command(about = "Supervises worker processes and exposes an HTTP control surface", long_about = None)]
struct Args {
    /// Record store path (SQLite)
    #[arg(long, default_value = "data/worker-manager.db", env = "WORKER_MANAGER_DB")]
    db: PathBuf,

    /// Control surface host
    #[arg(long, default_value = "127.0.0.1", env = "WORKER_MANAGER_HOST")]
    host: String,

    /// Control surface port
    #[arg(short, long, default_value = "4100", env = "WORKER_MANAGER_PORT")]
    port: u16,

    /// First port handed to workers
    #[arg(long, default_value = "5001", env = "WORKER_PORT_START")]
    port_start: u16,

    /// Last port handed to workers (inclusive)
    #[arg(long, default_value = "5100", env = "WORKER_PORT_END")]
    port_end: u16,

    /// Coordinator endpoint injected into every worker
    #[arg(long, default_value = "http://127.0.0.1:4000", env = "COORDINATOR_URL")]
    coordinator_url: String,

    /// Workers to reconcile to at startup (0 leaves the pool as recovered)
    #[arg(long, default_value = "0", env = "WORKER_DESIRED_COUNT")]
    desired_count: usize,

    /// Launch workers with the watch command
    #[arg(long, env = "WORKER_WATCH")]
    watch: bool,

    /// Worker command line (whitespace separated)
    #[arg(long, default_value = "./worker", env = "WORKER_COMMAND")]
    command: String,

    /// Worker command line in watch mode (whitespace separated)
    #[arg(long, default_value = "cargo watch --exec run", env = "WORKER_WATCH_COMMAND")]
    watch_command: String,

    /// Supervisor identity written to `managedBy` (default: manager-<pid>)
    #[arg(long, env = "WORKER_MANAGER_ID")]
    manager_id: Option<String>,

    /// Restart delay after an isolated crash, in milliseconds
    #[arg(long, default_value = "1000", env = "WORKER_RESTART_BASE_MS")]
    restart_base_ms: u64,

    /// Restart delay cap, in milliseconds
    #[arg(long, default_value = "10000", env = "WORKER_RESTART_MAX_MS")]
    restart_max_ms: u64,

    /// Uptime that resets the crash streak, in milliseconds
    #[arg(long, default_value = "5000", env = "WORKER_MIN_UPTIME_MS")]
    min_uptime_ms: u64,

    /// Grace period before a stop escalates to SIGKILL, in milliseconds
    #[arg(long, default_value = "5000", env = "WORKER_STOP_GRACE_MS")]
    stop_grace_ms: u64,

    /// Restart delay jitter: none, full or equal
    #[arg(long, default_value = "none", env = "WORKER_RESTART_JITTER")]
    restart_jitter: JitterPolicy,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,
}

impl Args {
    fn supervisor_config(&self) -> Result<SupervisorConfig> {
        let defaults = SupervisorConfig::default();
        let cfg = SupervisorConfig {
            manager_id: self.manager_id.clone().unwrap_or(defaults.manager_id),
            ports: PortRange::new(self.port_start, self.port_end)?,
            coordinator_url: self.coordinator_url.clone(),
            launch: LaunchConfig {
                command: split_command(&self.command),
                watch_command: split_command(&self.watch_command),
                watch: self.watch,
                working_dir: None,
            },
            restart: RestartBackoff {
                base: Duration::from_millis(self.restart_base_ms),
                max: Duration::from_millis(self.restart_max_ms),
                min_uptime: Duration::from_millis(self.min_uptime_ms),
                jitter: self.restart_jitter,
                ..RestartBackoff::default()
            },
            stop_grace: Duration::from_millis(self.stop_grace_ms),
            bus_capacity: defaults.bus_capacity,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

fn split_command(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = args.supervisor_config().context("invalid configuration")?;
    info!(
        manager_id = %cfg.manager_id,
        ports = %format!("{}..={}", cfg.ports.start, cfg.ports.end),
        watch = cfg.launch.watch,
        db = %args.db.display(),
        "starting worker manager"
    );

    let sup = SupervisorBuilder::new(cfg)
        .with_store(SqliteStore::new(&args.db))
        .with_subscribers(vec![Arc::new(LogWriter::new())])
        .open()
        .await
        .context("failed to open supervisor")?;

    let listener = bind_or_close(&sup, &args.host, args.port).await?;

    if args.desired_count > 0 {
        if let Err(e) = sup.reconcile(args.desired_count).await {
            error!(error = %e, desired = args.desired_count, "startup reconcile failed");
            sup.close().await?;
            return Err(e).context("startup reconcile failed");
        }
    }
    info!("control surface listening on http://{}:{}", args.host, args.port);

    let served = axum::serve(listener, router(Arc::clone(&sup)))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    sup.close().await?;
    served?;
    info!("worker manager stopped");
    Ok(())
}

/// Binds the control surface; on failure stops the workers started so far.
async fn bind_or_close(sup: &Supervisor, host: &str, port: u16) -> Result<TcpListener> {
    match TcpListener::bind((host, port)).await {
        Ok(listener) => Ok(listener),
        Err(e) => {
            error!(error = %e, host, port, "failed to bind control surface");
            sup.close().await?;
            Err(e).with_context(|| format!("failed to bind {host}:{port}"))
        }
    }
}

async fn shutdown_signal() {
    match wait_for_shutdown_signal().await {
        Ok(signal) => info!(signal, "shutdown signal received, stopping workers"),
        Err(e) => {
            error!(error = %e, "failed to install signal handlers, falling back to Ctrl-C");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use worker_manager::MemoryStore;

    #[tokio::test]
    async fn failed_bind_closes_the_supervisor() {
        let taken = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let cfg = SupervisorConfig {
            ports: PortRange::new(9401, 9402).unwrap(),
            launch: LaunchConfig::command(["sh", "-c", "exec sleep 30"]),
            ..SupervisorConfig::default()
        };
        let sup = SupervisorBuilder::new(cfg)
            .with_store(MemoryStore::new())
            .open()
            .await
            .unwrap();

        let err = bind_or_close(&sup, "127.0.0.1", port).await.unwrap_err();
        assert!(err.to_string().contains("failed to bind"));
        assert!(sup.is_shutting_down());
    }

    #[test]
    fn commands_split_on_whitespace() {
        assert_eq!(split_command("cargo  watch --exec run"), ["cargo", "watch", "--exec", "run"]);
    }
}
