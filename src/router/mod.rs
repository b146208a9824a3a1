//! Single entry point for requests from the extension's front-end surfaces.
//!
//! Each surface gets its own `RouterClient` channel; the router resolves the
//! message type through a dispatch table and runs every request on its own
//! task so a long sync pass never blocks status reads.

pub mod messages;

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use anyhow::{anyhow, Result};
use log::{debug, warn};
use serde_json::Value;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    db::CaptureSource,
    error::{CaptureError, CaptureResult},
    ingress::CaptureInput,
    AppState,
};

pub use messages::{MessageType, Request, Response};

use messages::{parse_payload, ConnectivityPayload, RecentThoughtsPayload};

type HandlerFuture<'a> = Pin<Box<dyn Future<Output = CaptureResult<Option<Response>>> + Send + 'a>>;
type Handler = for<'a> fn(&'a AppState, CaptureSource, Value) -> HandlerFuture<'a>;

const ROUTER_QUEUE_DEPTH: usize = 64;

fn dispatch_table() -> HashMap<MessageType, Handler> {
    let entries: [(MessageType, Handler); 6] = [
        (MessageType::CaptureThought, capture_thought as Handler),
        (MessageType::SyncNow, sync_now as Handler),
        (MessageType::GetRecentThoughts, get_recent_thoughts as Handler),
        (MessageType::GetSyncStatus, get_sync_status as Handler),
        (MessageType::ClearStorage, clear_storage as Handler),
        (MessageType::ConnectivityChanged, connectivity_changed as Handler),
    ];
    entries.into_iter().collect()
}

fn capture_thought(state: &AppState, surface: CaptureSource, payload: Value) -> HandlerFuture<'_> {
    Box::pin(async move {
        let input: CaptureInput = parse_payload(payload)?;
        let capture = state.ingress.capture(input, surface).await?;
        Response::ok().with("capture", capture).map(Some)
    })
}

fn sync_now(state: &AppState, _surface: CaptureSource, _payload: Value) -> HandlerFuture<'_> {
    Box::pin(async move {
        let result = state.engine.sync_now().await;
        Response::from_sync_result(result).map(Some)
    })
}

fn get_recent_thoughts(
    state: &AppState,
    _surface: CaptureSource,
    payload: Value,
) -> HandlerFuture<'_> {
    Box::pin(async move {
        let query: RecentThoughtsPayload = parse_payload(payload)?;
        let thoughts = state
            .status
            .list_captures(query.sync_state, query.limit, query.offset.unwrap_or(0))
            .await;
        Response::ok().with("thoughts", thoughts).map(Some)
    })
}

fn get_sync_status(state: &AppState, _surface: CaptureSource, _payload: Value) -> HandlerFuture<'_> {
    Box::pin(async move {
        Response::ok()
            .with("syncStatus", state.status.sync_status())
            .map(Some)
    })
}

fn clear_storage(state: &AppState, surface: CaptureSource, _payload: Value) -> HandlerFuture<'_> {
    Box::pin(async move {
        let removed = state.engine.clear_storage().await?;
        debug!("{} cleared {removed} capture(s)", surface.as_str());
        Ok(Some(Response::ok()))
    })
}

fn connectivity_changed(
    state: &AppState,
    _surface: CaptureSource,
    payload: Value,
) -> HandlerFuture<'_> {
    Box::pin(async move {
        let signal: ConnectivityPayload = parse_payload(payload)?;
        state.engine.set_online(signal.online).await;
        Ok(None)
    })
}

#[derive(Clone)]
pub struct MessageRouter {
    state: Arc<AppState>,
    handlers: Arc<HashMap<MessageType, Handler>>,
}

impl MessageRouter {
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            state,
            handlers: Arc::new(dispatch_table()),
        }
    }

    /// Validate and run one request. `None` means the message was a
    /// notification and expects no reply.
    pub async fn dispatch(&self, surface: CaptureSource, request: Request) -> Option<Response> {
        let Some(kind) = MessageType::parse(&request.kind) else {
            warn!("rejecting unsupported message type {:?}", request.kind);
            return Some(Response::failure(&CaptureError::UnsupportedOperation(
                request.kind,
            )));
        };
        let Some(handler) = self.handlers.get(&kind) else {
            return Some(Response::failure(&CaptureError::UnsupportedOperation(
                kind.as_str().to_string(),
            )));
        };

        debug!("dispatching {} from {}", kind.as_str(), surface.as_str());
        match handler(&*self.state, surface, request.payload).await {
            Ok(response) => response,
            Err(err) => {
                if !err.is_retryable() {
                    debug!("{} failed: {err}", kind.as_str());
                }
                Some(Response::failure(&err))
            }
        }
    }

    /// Start serving channel requests on a background task.
    pub fn start(self, cancel_token: CancellationToken) -> RouterService {
        let (tx, rx) = mpsc::channel(ROUTER_QUEUE_DEPTH);
        let handle = tokio::spawn(serve(self, rx, cancel_token.clone()));
        RouterService {
            tx,
            handle,
            cancel_token,
        }
    }
}

struct Envelope {
    surface: CaptureSource,
    request: Request,
    reply: oneshot::Sender<Option<Response>>,
}

async fn serve(
    router: MessageRouter,
    mut rx: mpsc::Receiver<Envelope>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            envelope = rx.recv() => {
                let Some(envelope) = envelope else { break };
                let router = router.clone();
                tokio::spawn(async move {
                    let response = router.dispatch(envelope.surface, envelope.request).await;
                    if envelope.reply.send(response).is_err() {
                        debug!("caller went away before reply");
                    }
                });
            }
        }
    }
    debug!("message router stopped");
}

pub struct RouterService {
    tx: mpsc::Sender<Envelope>,
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

impl RouterService {
    /// Request/response channel bound to one front-end surface.
    pub fn client(&self, surface: CaptureSource) -> RouterClient {
        RouterClient {
            surface,
            tx: self.tx.clone(),
        }
    }

    pub async fn shutdown(self) -> Result<()> {
        self.cancel_token.cancel();
        self.handle
            .await
            .map_err(|err| anyhow!("message router task failed to join: {err}"))
    }
}

#[derive(Clone)]
pub struct RouterClient {
    surface: CaptureSource,
    tx: mpsc::Sender<Envelope>,
}

impl RouterClient {
    pub fn surface(&self) -> CaptureSource {
        self.surface
    }

    pub async fn request(&self, request: Request) -> Result<Option<Response>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Envelope {
                surface: self.surface,
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow!("message router is not running"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("message router dropped the request"))
    }

    pub async fn send(&self, kind: MessageType, payload: Value) -> Result<Option<Response>> {
        self.request(Request::new(kind, payload)).await
    }
}
