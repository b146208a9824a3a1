use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use rand::Rng;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use super::engine::{SyncEngine, SyncTrigger};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// A burst of captures is flushed at most this many debounce windows after
/// its first capture, even if captures keep arriving.
const MAX_DEBOUNCE_WINDOWS: u32 = 4;

/// Trailing debounce for capture-triggered passes.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    first_signal: Option<Instant>,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            first_signal: None,
            deadline: None,
        }
    }

    pub fn signal(&mut self, now: Instant) {
        let first = *self.first_signal.get_or_insert(now);
        let cap = first + self.window * MAX_DEBOUNCE_WINDOWS;
        self.deadline = Some((now + self.window).min(cap));
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn reset(&mut self) {
        self.first_signal = None;
        self.deadline = None;
    }
}

/// Runs automatic passes: on an interval, when connectivity returns, and
/// shortly after new captures.
pub struct SyncScheduler {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

impl SyncScheduler {
    pub fn spawn(
        engine: Arc<SyncEngine>,
        triggers: mpsc::UnboundedReceiver<SyncTrigger>,
        cancel_token: CancellationToken,
    ) -> Self {
        let token_clone = cancel_token.clone();
        let handle = tokio::spawn(scheduler_loop(engine, triggers, token_clone));
        Self {
            handle,
            cancel_token,
        }
    }

    pub async fn shutdown(self) -> Result<()> {
        self.cancel_token.cancel();
        self.handle
            .await
            .context("sync scheduler task failed to join")
    }
}

fn jittered(period: Duration) -> Duration {
    let max_jitter_ms = (period.as_millis() / 10).min(30_000) as u64;
    if max_jitter_ms == 0 {
        return period;
    }
    period + Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter_ms))
}

async fn scheduler_loop(
    engine: Arc<SyncEngine>,
    mut triggers: mpsc::UnboundedReceiver<SyncTrigger>,
    cancel_token: CancellationToken,
) {
    let period = engine.settings().sync_interval();
    let mut ticker = time::interval_at(Instant::now() + jittered(period), period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut debouncer = Debouncer::new(engine.settings().capture_debounce());

    run_pass(&engine, "startup").await;

    loop {
        let debounce_at = debouncer
            .deadline()
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400));

        tokio::select! {
            _ = cancel_token.cancelled() => {
                log_info!("sync scheduler shutting down");
                break;
            }
            _ = ticker.tick() => {
                run_pass(&engine, "interval").await;
            }
            trigger = triggers.recv() => match trigger {
                Some(SyncTrigger::CaptureAdded) => debouncer.signal(Instant::now()),
                Some(SyncTrigger::ConnectivityRestored) => {
                    debouncer.reset();
                    run_pass(&engine, "connectivity restored").await;
                }
                None => {
                    log_info!("sync trigger channel closed; scheduler exiting");
                    break;
                }
            },
            _ = time::sleep_until(debounce_at), if debouncer.deadline().is_some() => {
                debouncer.reset();
                run_pass(&engine, "new capture").await;
            }
        }
    }
}

async fn run_pass(engine: &SyncEngine, reason: &str) {
    let result = engine.run_automatic_pass().await;
    match result.error.as_deref() {
        Some(error) if !result.success && result.synced == 0 && result.failed == 0 => {
            log_info!("automatic pass ({reason}) did not run: {error}");
        }
        _ if result.failed > 0 => {
            log_warn!(
                "automatic pass ({reason}): {} synced, {} failed",
                result.synced,
                result.failed
            );
        }
        _ => {
            log_info!("automatic pass ({reason}): {} synced", result.synced);
        }
    }
}
