//! Offline-first sync engine behind the thought-capture browser extension.
//!
//! Captures are written to a local SQLite store first and delivered to the
//! remote thoughts API later by the sync engine, which tolerates network
//! loss, retries with backoff and never runs two passes at once.

mod utils;

pub mod db;
pub mod error;
pub mod host;
pub mod ingress;
pub mod router;
pub mod settings;
pub mod status;
pub mod sync;

use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use db::Database;
use ingress::CaptureIngress;
use router::MessageRouter;
use settings::{debug_enabled, SettingsStore};
use status::StatusService;
use sync::{HttpRemote, MemoryRemote, RemoteEndpoint, SyncEngine, SyncScheduler};

pub const DATA_DIR_ENV: &str = "THOUGHTSYNC_DATA_DIR";
const MEMORY_REMOTE_URL: &str = "memory:";

/// Components shared by every router handler.
pub struct AppState {
    pub engine: Arc<SyncEngine>,
    pub ingress: CaptureIngress,
    pub status: StatusService,
}

impl AppState {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self {
            ingress: CaptureIngress::new(engine.clone()),
            status: StatusService::new(engine.clone()),
            engine,
        }
    }
}

fn resolve_data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir.trim()));
        }
    }
    let home = std::env::var("HOME")
        .map_err(|_| anyhow!("neither {DATA_DIR_ENV} nor HOME is set"))?;
    Ok(PathBuf::from(home).join(".local/share/thoughtsync"))
}

pub fn run() -> Result<()> {
    let level = if debug_enabled() {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    // stdout carries protocol frames, so logs must stay on stderr.
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .init();

    info!("thoughtsync host starting up...");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build async runtime")?;
    runtime.block_on(serve_process())
}

async fn serve_process() -> Result<()> {
    let data_dir = resolve_data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let settings_path = data_dir.join("settings.json");
    let first_run = !settings_path.exists();
    let settings_store = SettingsStore::new(settings_path)?;
    if first_run {
        // Write defaults so there is a file to edit.
        if let Err(err) = settings_store.update_sync(settings_store.sync()) {
            warn!("failed to write default settings: {err:#}");
        }
    }
    let settings = settings_store.sync().with_env_overrides();

    let database = Database::new(data_dir.join("thoughtsync.sqlite3"))?;

    let remote: Arc<dyn RemoteEndpoint> = if settings.remote_url == MEMORY_REMOTE_URL {
        warn!("using in-memory remote; captures will not leave this process");
        Arc::new(MemoryRemote::default())
    } else {
        Arc::new(HttpRemote::new(&settings)?)
    };

    let (engine, triggers) = SyncEngine::open(database, remote, settings).await?;

    // A pass never survives the process, so `Syncing` rows are crash residue.
    engine.recover_interrupted().await?;
    engine.refresh_pending_count().await;

    let shutdown = CancellationToken::new();
    let scheduler = SyncScheduler::spawn(engine.clone(), triggers, shutdown.child_token());
    let router = MessageRouter::new(Arc::new(AppState::new(engine))).start(shutdown.child_token());

    tokio::select! {
        result = host::serve_stdio(&router) => {
            if let Err(err) = result {
                warn!("host channel ended with error: {err:#}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received");
        }
    }

    shutdown.cancel();
    scheduler.shutdown().await?;
    router.shutdown().await?;
    info!("thoughtsync host stopped");
    Ok(())
}
