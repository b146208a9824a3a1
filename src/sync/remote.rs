use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client};
use serde::Serialize;

use crate::{
    db::{Capture, CaptureContext, CaptureSource},
    error::{CaptureError, CaptureResult},
    settings::SyncSettings,
};

/// The authoritative store captures are delivered to.
///
/// Delivery must be an upsert keyed by `Capture::id`: repeating it for the
/// same id may overwrite but never duplicates.
#[async_trait]
pub trait RemoteEndpoint: Send + Sync {
    async fn deliver(&self, capture: &Capture) -> CaptureResult<()>;
}

/// Wire body for `POST /api/thoughts`. Local sync bookkeeping stays local.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThoughtPayload<'a> {
    id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a CaptureContext>,
    created_at: DateTime<Utc>,
    source: CaptureSource,
    #[serde(skip_serializing_if = "no_tags")]
    tags: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a serde_json::Value>,
}

fn no_tags(tags: &&[String]) -> bool {
    tags.is_empty()
}

impl<'a> From<&'a Capture> for ThoughtPayload<'a> {
    fn from(capture: &'a Capture) -> Self {
        Self {
            id: &capture.id,
            text: &capture.text,
            context: capture.context.as_ref(),
            created_at: capture.created_at,
            source: capture.source,
            tags: &capture.tags,
            metadata: capture.metadata.as_ref(),
        }
    }
}

pub struct HttpRemote {
    client: Client,
    endpoint: String,
    auth_token: Option<String>,
}

impl HttpRemote {
    pub fn new(settings: &SyncSettings) -> Result<Self> {
        let base = settings.remote_url.trim().trim_end_matches('/');
        if base.is_empty() {
            return Err(anyhow!("missing remote url"));
        }
        let client = Client::builder()
            .timeout(settings.request_timeout())
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{base}{}", settings.thoughts_path),
            auth_token: settings.auth_token.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RemoteEndpoint for HttpRemote {
    async fn deliver(&self, capture: &Capture) -> CaptureResult<()> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Idempotency-Key", capture.id.as_str())
            .header(header::ACCEPT, "application/json")
            .json(&ThoughtPayload::from(capture));
        if let Some(token) = self.auth_token.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|err| CaptureError::NetworkError(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(CaptureError::remote_rejected(status.as_u16(), &body))
    }
}

/// Upsert-by-id store kept in memory. Backs local runs without a server
/// (`remoteUrl = "memory:"`).
#[derive(Default)]
pub struct MemoryRemote {
    records: tokio::sync::Mutex<HashMap<String, Capture>>,
}

impl MemoryRemote {
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    pub async fn get(&self, id: &str) -> Option<Capture> {
        self.records.lock().await.get(id).cloned()
    }
}

#[async_trait]
impl RemoteEndpoint for MemoryRemote {
    async fn deliver(&self, capture: &Capture) -> CaptureResult<()> {
        self.records
            .lock()
            .await
            .insert(capture.id.clone(), capture.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SyncState;

    fn capture() -> Capture {
        Capture {
            id: "abc".into(),
            text: "Buy milk".into(),
            context: Some(CaptureContext {
                url: Some("https://example.test".into()),
                ..CaptureContext::default()
            }),
            created_at: Utc::now(),
            source: CaptureSource::ContentScript,
            sync_state: SyncState::Syncing,
            synced_at: None,
            retry_count: 2,
            last_attempt_at: None,
            last_error: Some("timeout".into()),
            tags: Vec::new(),
            metadata: None,
            client_token: Some("tok".into()),
        }
    }

    #[test]
    fn payload_omits_local_bookkeeping() {
        let capture = capture();
        let json = serde_json::to_value(ThoughtPayload::from(&capture)).unwrap();
        assert_eq!(json["id"], "abc");
        assert_eq!(json["source"], "content-script");
        assert_eq!(json["context"]["url"], "https://example.test");
        assert!(json.get("retryCount").is_none());
        assert!(json.get("syncState").is_none());
        assert!(json.get("clientToken").is_none());
        assert!(json.get("tags").is_none());
    }

    #[test]
    fn endpoint_joins_base_and_path() {
        let settings = SyncSettings {
            remote_url: "https://api.example.test/".into(),
            ..SyncSettings::default()
        };
        let remote = HttpRemote::new(&settings).unwrap();
        assert_eq!(remote.endpoint(), "https://api.example.test/api/thoughts");
    }

    fn request_complete(buf: &[u8]) -> bool {
        let text = String::from_utf8_lossy(buf);
        let Some(split) = text.find("\r\n\r\n") else {
            return false;
        };
        let length = text[..split]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                if name.eq_ignore_ascii_case("content-length") {
                    value.trim().parse::<usize>().ok()
                } else {
                    None
                }
            })
            .unwrap_or(0);
        buf.len() >= split + 4 + length
    }

    /// Accept one connection, answer with `status_line`, return the raw request.
    async fn one_shot_server(
        status_line: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let read = socket.read(&mut chunk).await.unwrap();
                request.extend_from_slice(&chunk[..read]);
                if read == 0 || request_complete(&request) {
                    break;
                }
            }
            let reply = format!(
                "{status_line}\r\ncontent-length: 9\r\nconnection: close\r\n\r\nduplicate"
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).to_ascii_lowercase()
        });
        (format!("http://{addr}"), handle)
    }

    fn settings_for(remote_url: String) -> SyncSettings {
        SyncSettings {
            remote_url,
            auth_token: Some("secret".into()),
            request_timeout_secs: 5,
            ..SyncSettings::default()
        }
    }

    #[tokio::test]
    async fn http_delivery_sends_idempotency_key() {
        let (url, server) = one_shot_server("HTTP/1.1 201 Created").await;
        let remote = HttpRemote::new(&settings_for(url)).unwrap();

        remote.deliver(&capture()).await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("post /api/thoughts "));
        assert!(request.contains("idempotency-key: abc"));
        assert!(request.contains("authorization: bearer secret"));
        assert!(request.contains("\"text\":\"buy milk\""));
    }

    #[tokio::test]
    async fn http_rejection_keeps_status_and_body() {
        let (url, server) = one_shot_server("HTTP/1.1 409 Conflict").await;
        let remote = HttpRemote::new(&settings_for(url)).unwrap();

        let err = remote.deliver(&capture()).await.unwrap_err();
        server.await.unwrap();
        assert_eq!(err, CaptureError::remote_rejected(409, "duplicate"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn unreachable_remote_is_a_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let remote = HttpRemote::new(&settings_for(format!("http://{addr}"))).unwrap();
        let err = remote.deliver(&capture()).await.unwrap_err();
        assert!(matches!(err, CaptureError::NetworkError(_)));
    }

    #[tokio::test]
    async fn memory_remote_upserts_by_id() {
        let remote = MemoryRemote::default();
        let capture = capture();
        remote.deliver(&capture).await.unwrap();
        remote.deliver(&capture).await.unwrap();
        assert_eq!(remote.len().await, 1);
    }
}
