//! Native-messaging host: the process boundary between the browser
//! extension and the message router.

pub mod codec;

use std::collections::HashMap;

use anyhow::{Context, Result};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
};

use crate::{
    db::CaptureSource,
    error::CaptureError,
    router::{Request, Response, RouterClient, RouterService},
};

use codec::{read_frame, write_frame, Frame, MAX_INBOUND_FRAME};

const WRITER_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InboundFrame {
    #[serde(default)]
    request_id: Option<Value>,
    #[serde(default)]
    surface: Option<CaptureSource>,
    #[serde(flatten)]
    request: Request,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutboundFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<Value>,
    #[serde(flatten)]
    response: Response,
}

/// One router channel per front-end surface.
pub struct SurfaceClients {
    clients: HashMap<CaptureSource, RouterClient>,
}

impl SurfaceClients {
    pub fn new(router: &RouterService) -> Self {
        let clients = [
            CaptureSource::Popup,
            CaptureSource::ContentScript,
            CaptureSource::Background,
        ]
        .into_iter()
        .map(|surface| (surface, router.client(surface)))
        .collect();
        Self { clients }
    }

    fn for_surface(&self, surface: CaptureSource) -> Option<RouterClient> {
        self.clients.get(&surface).cloned()
    }
}

fn encode_reply(request_id: Option<Value>, response: Response) -> Option<Vec<u8>> {
    let frame = OutboundFrame {
        request_id: request_id.clone(),
        response,
    };
    let body = match serde_json::to_vec(&frame) {
        Ok(body) => body,
        Err(err) => {
            error!("failed to encode reply: {err}");
            return None;
        }
    };
    if body.len() <= codec::MAX_OUTBOUND_FRAME {
        return Some(body);
    }

    warn!("reply of {} bytes exceeds host limit; sending error", body.len());
    let fallback = OutboundFrame {
        request_id,
        response: Response::failure(&CaptureError::InvalidInput(
            "response too large; request a smaller page".into(),
        )),
    };
    serde_json::to_vec(&fallback).ok()
}

/// Serve framed requests from `reader` until EOF, writing replies to
/// `writer`. Requests run concurrently; replies carry the caller's
/// `requestId` for correlation.
pub async fn serve<R, W>(mut reader: R, writer: W, clients: SurfaceClients) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (reply_tx, mut reply_rx) = mpsc::channel::<Vec<u8>>(WRITER_QUEUE_DEPTH);

    let writer_task = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(body) = reply_rx.recv().await {
            if let Err(err) = write_frame(&mut writer, &body).await {
                error!("failed to write reply frame: {err}");
                break;
            }
        }
    });

    loop {
        let frame = read_frame(&mut reader)
            .await
            .context("failed to read request frame")?;

        let body = match frame {
            None => {
                debug!("extension closed the host channel");
                break;
            }
            Some(Frame::Rejected(len)) => {
                let err = CaptureError::InvalidInput(format!(
                    "frame length {len} outside 1..={MAX_INBOUND_FRAME}"
                ));
                if let Some(reply) = encode_reply(None, Response::failure(&err)) {
                    let _ = reply_tx.send(reply).await;
                }
                continue;
            }
            Some(Frame::Message(body)) => body,
        };

        let inbound: InboundFrame = match serde_json::from_slice(&body) {
            Ok(inbound) => inbound,
            Err(err) => {
                let err = CaptureError::InvalidInput(format!("malformed message: {err}"));
                if let Some(reply) = encode_reply(None, Response::failure(&err)) {
                    let _ = reply_tx.send(reply).await;
                }
                continue;
            }
        };

        let surface = inbound.surface.unwrap_or(CaptureSource::Background);
        let Some(client) = clients.for_surface(surface) else {
            continue;
        };
        let reply_tx = reply_tx.clone();
        tokio::spawn(async move {
            let request_id = inbound.request_id;
            match client.request(inbound.request).await {
                Ok(Some(response)) => {
                    if let Some(reply) = encode_reply(request_id, response) {
                        let _ = reply_tx.send(reply).await;
                    }
                }
                Ok(None) => {}
                Err(err) => error!("request could not be routed: {err:#}"),
            }
        });
    }

    drop(reply_tx);
    writer_task
        .await
        .context("reply writer task failed to join")?;
    Ok(())
}

/// Serve the browser over this process's stdin/stdout.
pub async fn serve_stdio(router: &RouterService) -> Result<()> {
    serve(
        tokio::io::stdin(),
        tokio::io::stdout(),
        SurfaceClients::new(router),
    )
    .await
}
