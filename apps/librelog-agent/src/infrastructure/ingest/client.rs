//! WebSocket Ingest Client
//!
//! Opens `{ingest_url}?token=<token>` and exchanges one text frame per
//! sample. The token travels only in the handshake; the URL is logged with
//! its query stripped.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use super::codec;
use crate::application::ports::{Ack, IngestChannel, IngestConnector, IngestError};
use crate::domain::session::SessionToken;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Connector
// =============================================================================

/// Opens authenticated WebSocket sessions to the ingester.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    ingest_url: Url,
    ack_timeout: Duration,
}

impl WebSocketConnector {
    /// Create a connector for `ingest_url`.
    #[must_use]
    pub const fn new(ingest_url: Url, ack_timeout: Duration) -> Self {
        Self {
            ingest_url,
            ack_timeout,
        }
    }

    /// The ingest URL with the token appended.
    #[must_use]
    pub fn session_url(&self, token: &SessionToken) -> Url {
        let mut url = self.ingest_url.clone();
        url.query_pairs_mut().append_pair("token", token.expose());
        url
    }

    fn display_url(&self) -> Url {
        let mut url = self.ingest_url.clone();
        url.set_query(None);
        url
    }
}

#[async_trait]
impl IngestConnector for WebSocketConnector {
    async fn connect(&self, token: &SessionToken) -> Result<Box<dyn IngestChannel>, IngestError> {
        let url = self.session_url(token);
        tracing::debug!(url = %self.display_url(), "Connecting to ingester");

        let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(handshake_error)?;

        tracing::info!(url = %self.display_url(), "Connected to ingester");
        Ok(Box::new(WebSocketChannel::new(stream, self.ack_timeout)))
    }
}

fn handshake_error(err: WsError) -> IngestError {
    match err {
        WsError::Http(response) => {
            let status = response.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                IngestError::TokenRejected
            } else {
                IngestError::Transport(format!("handshake rejected with HTTP {status}"))
            }
        }
        WsError::Url(e) => IngestError::Protocol(format!("invalid ingest URL: {e}")),
        other => IngestError::Transport(other.to_string()),
    }
}

// =============================================================================
// Channel
// =============================================================================

/// One open ingest stream.
pub struct WebSocketChannel {
    stream: WsStream,
    ack_timeout: Duration,
}

impl WebSocketChannel {
    const fn new(stream: WsStream, ack_timeout: Duration) -> Self {
        Self {
            stream,
            ack_timeout,
        }
    }

    async fn read_reply(&mut self) -> Result<Ack, IngestError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return codec::decode_reply(text.as_str()),
                Some(Ok(Message::Binary(_))) => {
                    return Err(IngestError::Protocol("unexpected binary reply".into()));
                }
                Some(Ok(Message::Ping(data))) => {
                    self.stream
                        .send(Message::Pong(data))
                        .await
                        .map_err(|e| IngestError::Transport(e.to_string()))?;
                }
                Some(Ok(Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => return Err(codec::close_error(frame.as_ref())),
                Some(Err(e)) => return Err(IngestError::Transport(e.to_string())),
                None => return Err(IngestError::Transport("stream ended".into())),
            }
        }
    }
}

impl std::fmt::Debug for WebSocketChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketChannel")
            .field("ack_timeout", &self.ack_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl IngestChannel for WebSocketChannel {
    async fn send(&mut self, frame: String) -> Result<Ack, IngestError> {
        self.stream
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| IngestError::Transport(e.to_string()))?;

        let ack_timeout = self.ack_timeout;
        tokio::time::timeout(ack_timeout, self.read_reply())
            .await
            .map_err(|_| {
                IngestError::Transport(format!(
                    "no acknowledgement within {}ms",
                    ack_timeout.as_millis()
                ))
            })?
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "Error closing ingest stream");
        }
    }
}
