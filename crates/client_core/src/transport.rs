//! Server-to-client push channels carrying mint feedback frames.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use eventsource_client as es;
use futures::{future, stream::BoxStream, StreamExt};
use shared::domain::TokenHash;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;
use url::Url;

use crate::config::{ClientSettings, PushTransport};

/// Raw text frames of one connection; the stream ends when the connection
/// closes.
pub type FrameStream = BoxStream<'static, Result<String>>;

#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self, identity: &TokenHash) -> Result<FrameStream>;
}

pub struct MissingPushConnector;

#[async_trait]
impl PushConnector for MissingPushConnector {
    async fn connect(&self, identity: &TokenHash) -> Result<FrameStream> {
        Err(anyhow!("no push channel configured for {identity}"))
    }
}

pub fn feedback_url(base: &Url, identity: &TokenHash) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| anyhow!("indexer url cannot be a base: {base}"))?
        .pop_if_empty()
        .push("mint-feedback")
        .push(identity.as_str());
    Ok(url)
}

fn websocket_url(base: &Url, identity: &TokenHash) -> Result<Url> {
    let mut url = feedback_url(base, identity)?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => return Err(anyhow!("unsupported indexer url scheme: {other}")),
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow!("cannot switch {base} to {scheme}"))?;
    Ok(url)
}

pub struct WebSocketConnector {
    base_url: Url,
}

impl WebSocketConnector {
    pub fn new(base_url: Url) -> Self {
        Self { base_url }
    }
}

#[async_trait]
impl PushConnector for WebSocketConnector {
    async fn connect(&self, identity: &TokenHash) -> Result<FrameStream> {
        let ws_url = websocket_url(&self.base_url, identity)?;
        let (ws_stream, _) = connect_async(ws_url.as_str())
            .await
            .with_context(|| format!("failed to connect websocket: {ws_url}"))?;
        debug!(identity = %identity, url = %ws_url, "push channel: websocket open");
        let (_, ws_reader) = ws_stream.split();

        let frames = ws_reader
            .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Text(text)) => Some(Ok(text)),
                    Ok(Message::Binary(bytes)) => {
                        Some(String::from_utf8(bytes).context("binary frame is not utf-8"))
                    }
                    Ok(_) => None,
                    Err(err) => Some(Err(anyhow!("websocket receive failed: {err}"))),
                })
            })
            .boxed();
        Ok(frames)
    }
}

/// `text/event-stream` variant, the protocol the indexer exposes to browsers.
pub struct EventSourceConnector {
    base_url: Url,
}

impl EventSourceConnector {
    pub fn new(base_url: Url) -> Self {
        Self { base_url }
    }
}

#[async_trait]
impl PushConnector for EventSourceConnector {
    async fn connect(&self, identity: &TokenHash) -> Result<FrameStream> {
        let url = feedback_url(&self.base_url, identity)?;
        // Reconnects are owned by the progress session.
        let builder = es::ClientBuilder::for_url(url.as_str())
            .map_err(|e| anyhow!("failed to start event stream client {e:?}"))?
            .header("accept", "text/event-stream")
            .map_err(|e| anyhow!("failed to add header to event stream client {e:?}"))?
            .reconnect(es::ReconnectOptions::reconnect(false).build());
        let client: Box<dyn es::Client> = match url.scheme() {
            "https" => Box::new(builder.build()),
            _ => Box::new(builder.build_http()),
        };
        debug!(identity = %identity, url = %url, "push channel: event stream requested");

        let frames = client
            .stream()
            .take_while(|result| future::ready(!matches!(result, Err(es::Error::Eof))))
            .filter_map(|result| {
                future::ready(match result {
                    Ok(es::SSE::Event(es::Event { data, .. })) => Some(Ok(data)),
                    Ok(_) => None,
                    Err(e) => Some(Err(anyhow!("event stream receive failed: {e:?}"))),
                })
            })
            .boxed();
        Ok(frames)
    }
}

/// Connector matching the configured transport.
pub fn connector_from_settings(settings: &ClientSettings) -> Result<Arc<dyn PushConnector>> {
    let base_url = settings.indexer_url()?;
    Ok(match settings.push_transport {
        PushTransport::WebSocket => Arc::new(WebSocketConnector::new(base_url)),
        PushTransport::EventSource => Arc::new(EventSourceConnector::new(base_url)),
    })
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
