#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use tempfile::TempDir;
use thoughtsync_lib::{
    db::{Capture, Database, SyncState},
    error::{CaptureError, CaptureResult},
    ingress::CaptureInput,
    settings::SyncSettings,
    sync::{RemoteEndpoint, SyncEngine, SyncTrigger},
    AppState,
};
use tokio::sync::{mpsc, watch, Notify};

/// Remote endpoint with programmable failures. Stored records are keyed by
/// capture id, so repeated deliveries overwrite instead of duplicating.
pub struct ScriptedRemote {
    records: Mutex<HashMap<String, Capture>>,
    delivery_log: Mutex<Vec<String>>,
    fail_all: AtomicBool,
    fail_ids: Mutex<HashSet<String>>,
    /// Remaining failures per id before deliveries start succeeding.
    fail_budget: Mutex<HashMap<String, u32>>,
    /// Store the record but report a network error, once per listed id.
    lose_reply: Mutex<HashSet<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    gate: watch::Sender<bool>,
    pub entered: Notify,
}

impl Default for ScriptedRemote {
    fn default() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            records: Mutex::new(HashMap::new()),
            delivery_log: Mutex::new(Vec::new()),
            fail_all: AtomicBool::new(false),
            fail_ids: Mutex::new(HashSet::new()),
            fail_budget: Mutex::new(HashMap::new()),
            lose_reply: Mutex::new(HashSet::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            gate,
            entered: Notify::new(),
        }
    }
}

impl ScriptedRemote {
    pub fn set_fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    pub fn fail_id(&self, id: &str) {
        self.fail_ids.lock().unwrap().insert(id.to_string());
    }

    pub fn fail_times(&self, id: &str, times: u32) {
        self.fail_budget.lock().unwrap().insert(id.to_string(), times);
    }

    pub fn lose_reply_once(&self, id: &str) {
        self.lose_reply.lock().unwrap().insert(id.to_string());
    }

    /// Hold every delivery until `open_gate` is called.
    pub fn close_gate(&self) {
        self.gate.send_replace(false);
    }

    pub fn open_gate(&self) {
        self.gate.send_replace(true);
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn has_record(&self, id: &str) -> bool {
        self.records.lock().unwrap().contains_key(id)
    }

    pub fn deliveries(&self) -> Vec<String> {
        self.delivery_log.lock().unwrap().clone()
    }

    pub fn delivery_count(&self) -> usize {
        self.delivery_log.lock().unwrap().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn should_fail(&self, id: &str) -> bool {
        if self.fail_all.load(Ordering::SeqCst) || self.fail_ids.lock().unwrap().contains(id) {
            return true;
        }
        let mut budget = self.fail_budget.lock().unwrap();
        match budget.get_mut(id) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl RemoteEndpoint for ScriptedRemote {
    async fn deliver(&self, capture: &Capture) -> CaptureResult<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.delivery_log.lock().unwrap().push(capture.id.clone());
        self.entered.notify_one();

        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        let outcome = if self.should_fail(&capture.id) {
            Err(CaptureError::remote_rejected(503, "service unavailable"))
        } else {
            self.records
                .lock()
                .unwrap()
                .insert(capture.id.clone(), capture.clone());
            if self.lose_reply.lock().unwrap().remove(&capture.id) {
                Err(CaptureError::NetworkError("connection reset".into()))
            } else {
                Ok(())
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

pub fn test_settings() -> SyncSettings {
    SyncSettings {
        remote_url: "http://127.0.0.1:9".into(),
        backoff_base_ms: 0,
        sync_interval_secs: 3_600,
        capture_debounce_ms: 30,
        ..SyncSettings::default()
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub remote: Arc<ScriptedRemote>,
    pub engine: Arc<SyncEngine>,
    pub state: Arc<AppState>,
    pub triggers: Option<mpsc::UnboundedReceiver<SyncTrigger>>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_settings(test_settings()).await
    }

    pub async fn with_settings(settings: SyncSettings) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let database = Database::new(dir.path().join("captures.sqlite3")).expect("open store");
        let remote = Arc::new(ScriptedRemote::default());
        let (engine, triggers) = SyncEngine::open(database, remote.clone(), settings)
            .await
            .expect("open engine");
        let state = Arc::new(AppState::new(engine.clone()));
        Self {
            dir,
            remote,
            engine,
            state,
            triggers: Some(triggers),
        }
    }

    pub async fn capture(&self, text: &str) -> Capture {
        self.state
            .ingress
            .capture(CaptureInput::text(text), thoughtsync_lib::db::CaptureSource::Popup)
            .await
            .expect("capture")
    }

    pub async fn get(&self, id: &str) -> Capture {
        self.engine
            .store()
            .get_capture(id)
            .await
            .expect("read capture")
            .expect("capture exists")
    }

    pub async fn all(&self) -> Vec<Capture> {
        self.engine
            .store()
            .list_captures(None, 500, 0)
            .await
            .expect("list captures")
    }

    /// Run raw SQL on the store's worker, used to inject faults.
    pub async fn run_sql(&self, sql: &'static str) {
        self.engine
            .store()
            .execute(move |conn| {
                conn.execute_batch(sql)?;
                Ok(())
            })
            .await
            .expect("run sql");
    }

    /// `pendingCount` must equal the number of captures not yet synced.
    pub async fn assert_pending_invariant(&self) {
        let unsynced = self
            .all()
            .await
            .iter()
            .filter(|capture| capture.sync_state != SyncState::Synced)
            .count() as u64;
        assert_eq!(self.engine.status().pending_count, unsynced);
    }
}

pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check().await
}
