use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;

use steward_adapter::AdapterRegistry;
use steward_core::{config, paths, snapshot, MemoryStore};
use steward_sync::{
    pipeline, staleness, EntitySink, RunOutput, Services, Submission, SyncRequest,
};

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;
use crate::protocol::{DaemonRequest, DaemonResponse};

/// Runs shown in the status payload.
const RECENT_RUNS: usize = 10;

struct RunJob {
    request: SyncRequest,
    respond_to: oneshot::Sender<Result<RunSummary, String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub adapter: String,
    pub org_id: String,
    pub result: Submission<RunOutput>,
    pub duration_ms: u128,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct MaintenanceReport {
    stuck: usize,
    released: usize,
    saved: bool,
}

/// Load settings and the store snapshot from `home` and wire the in-process
/// services around them.
pub fn bootstrap(
    home: &Path,
    adapters: AdapterRegistry,
    sink: Arc<dyn EntitySink>,
) -> Result<(Services, Arc<MemoryStore>), DaemonError> {
    let settings = config::load_at(home)?;
    let store = Arc::new(MemoryStore::from_snapshot(snapshot::load_at(home)?));
    let services = Services::in_memory(store.clone(), adapters, sink, settings);
    Ok((services, store))
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(
    home: &Path,
    adapters: AdapterRegistry,
    sink: Arc<dyn EntitySink>,
) -> Result<(), DaemonError> {
    init_tracing();
    let (services, store) = bootstrap(home, adapters, sink)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), services, store))
}

/// Run the daemon until `stop` or ctrl-c. The store is snapshotted on the
/// maintenance cadence and once more on the way out.
pub async fn run(
    home: PathBuf,
    services: Services,
    store: Arc<MemoryStore>,
) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;
    let started_at_unix = unix_seconds_now();

    let (run_tx, run_rx) = mpsc::channel::<RunJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let services = services.clone();
        tokio::spawn(async move {
            let result = run_processor_task(services, run_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let maintenance_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let services = services.clone();
        let store = store.clone();
        tokio::spawn(async move {
            let result = maintenance_task(home, services, store, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let services = services.clone();
        let store = store.clone();
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                services,
                store,
                run_tx,
                shutdown.clone(),
                shutdown.subscribe(),
                started_at_unix,
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    tracing::info!(
        socket = %socket_path(&home).display(),
        adapters = ?services.adapters.kinds(),
        "daemon started",
    );

    let (processor_result, maintenance_result, socket_result, signal_result) = tokio::join!(
        processor_handle,
        maintenance_handle,
        socket_handle,
        signal_handle
    );

    let saved = save_snapshot(&home, &store).await;

    handle_join("run_processor", processor_result)?;
    handle_join("maintenance", maintenance_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    saved?;
    tracing::info!("daemon stopped");
    Ok(())
}

/// Runs are processed one at a time, in arrival order.
async fn run_processor_task(
    services: Services,
    mut run_rx: mpsc::Receiver<RunJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = run_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let started = Instant::now();
                let adapter = job.request.adapter.clone();
                let org_id = job.request.org_id.to_string();

                let outcome = match pipeline::run(&services, job.request).await {
                    Ok(result) => Ok(RunSummary {
                        adapter,
                        org_id,
                        result,
                        duration_ms: started.elapsed().as_millis(),
                    }),
                    Err(err) => Err(format!("[{}] {err}", err.kind())),
                };

                let _ = job.respond_to.send(outcome);
            }
        }
    }

    Ok(())
}

async fn maintenance_task(
    home: PathBuf,
    services: Services,
    store: Arc<MemoryStore>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(services.settings.maintenance_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await; // consume the first immediate tick

    let mut saved_writes = store.writes();
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                match run_maintenance(&home, &services, &store, &mut saved_writes).await {
                    Ok(report) if report.stuck > 0 || report.saved => {
                        tracing::info!(
                            stuck = report.stuck,
                            released = report.released,
                            saved = report.saved,
                            "maintenance tick",
                        );
                    }
                    Ok(_) => {}
                    Err(err) => tracing::warn!(error = %err, "maintenance tick failed"),
                }
            }
        }
    }
    Ok(())
}

/// Release stuck claims, then snapshot the store if anything was written
/// since the last save.
async fn run_maintenance(
    home: &Path,
    services: &Services,
    store: &Arc<MemoryStore>,
    saved_writes: &mut u64,
) -> Result<MaintenanceReport, DaemonError> {
    let now = Utc::now();
    let stale_after = services.settings.stale_after();
    let stuck = staleness::sweep(&services.links, None, now, stale_after).await?;
    for link in &stuck {
        tracing::warn!(
            org_id = %link.org_id,
            adapter = %link.adapter,
            entity_type = %link.entity_type,
            external_id = %link.external_id,
            age = %link.age,
            "stuck sync claim",
        );
    }
    let released = staleness::reclaim(&services.links, &stuck, now, stale_after).await?;

    let writes = store.writes();
    let saved = writes != *saved_writes;
    if saved {
        save_snapshot(home, store).await?;
        *saved_writes = writes;
    }

    Ok(MaintenanceReport {
        stuck: stuck.len(),
        released,
        saved,
    })
}

async fn save_snapshot(home: &Path, store: &Arc<MemoryStore>) -> Result<(), DaemonError> {
    let snapshot = store.snapshot()?;
    let home = home.to_path_buf();
    tokio::task::spawn_blocking(move || snapshot::save_at(&home, &snapshot))
        .await
        .map_err(|err| DaemonError::Protocol(format!("snapshot join error: {err}")))??;
    Ok(())
}

async fn socket_server_task(
    home: PathBuf,
    services: Services,
    store: Arc<MemoryStore>,
    run_tx: mpsc::Sender<RunJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let home = home.clone();
                let services = services.clone();
                let store = store.clone();
                let run_tx = run_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(
                        stream,
                        home,
                        services,
                        store,
                        run_tx,
                        shutdown_tx,
                        started_at_unix,
                    ).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    home: PathBuf,
    services: Services,
    store: Arc<MemoryStore>,
    run_tx: mpsc::Sender<RunJob>,
    shutdown_tx: broadcast::Sender<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<DaemonRequest>(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request: {err}")),
                )
                .await?;
                continue;
            }
        };

        let cmd = request.cmd();
        tracing::debug!(cmd, "daemon request");
        let response = match request {
            DaemonRequest::Status => {
                match build_status_payload(&home, &services, &store, started_at_unix).await {
                    Ok(payload) => DaemonResponse::ok(payload),
                    Err(err) => DaemonResponse::error(err.to_string()),
                }
            }
            DaemonRequest::Stop => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            run_command => match run_command.into_sync_request() {
                Some(request) => match enqueue_run(&run_tx, request).await {
                    Ok(summary) => DaemonResponse::ok(json!(summary)),
                    Err(err) => DaemonResponse::error(err.to_string()),
                },
                None => DaemonResponse::error(format!("unknown command '{cmd}'")),
            },
        };

        write_response(&mut writer, &response).await?;
        if cmd == "stop" {
            break;
        }
    }

    Ok(())
}

async fn build_status_payload(
    home: &Path,
    services: &Services,
    store: &MemoryStore,
    started_at_unix: u64,
) -> Result<Value, DaemonError> {
    let links = services.links.list(None).await?;
    let syncing = links.iter().filter(|link| link.syncing).count();
    let stuck = staleness::classify(&links, Utc::now(), services.settings.stale_after());

    let mut runs = services.executor.ledger().list().await?;
    runs.truncate(RECENT_RUNS);

    let adapters: Vec<&str> = services
        .adapters
        .kinds()
        .iter()
        .map(|kind| kind.as_str())
        .collect();

    Ok(json!({
        "running": true,
        "started_at_unix": started_at_unix,
        "socket": socket_path(home).display().to_string(),
        "snapshot": snapshot::snapshot_path_at(home).display().to_string(),
        "adapters": adapters,
        "links": links.len(),
        "syncing": syncing,
        "stuck": stuck.len(),
        "store_writes": store.writes(),
        "recent_runs": runs,
    }))
}

async fn enqueue_run(
    run_tx: &mpsc::Sender<RunJob>,
    request: SyncRequest,
) -> Result<RunSummary, DaemonError> {
    let (tx, rx) = oneshot::channel();
    run_tx
        .send(RunJob {
            request,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("run queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("run response"))?;
    outcome.map_err(DaemonError::Protocol)
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    paths::ensure_dir(&paths::steward_root(home))?;
    paths::ensure_dir(&paths::state_dir(home))?;
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
