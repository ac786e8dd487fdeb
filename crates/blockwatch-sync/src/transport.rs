//! WebSocket implementation of the feed transport.
//!
//! After dialing, a single subscribe request names the topic; every text or
//! binary frame after that is one raw block-update message.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::{FeedSubscription, FeedTransport, SyncError, SyncResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long a close handshake may take before the socket is just dropped.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Default)]
pub struct WebSocketFeed;

impl WebSocketFeed {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FeedTransport for WebSocketFeed {
    async fn subscribe(&self, endpoint: &str, topic: &str) -> SyncResult<Box<dyn FeedSubscription>> {
        let (stream, _response) = connect_async(endpoint)
            .await
            .map_err(|e| SyncError::Transport(format!("Failed to dial {}: {}", endpoint, e)))?;
        let (mut writer, reader) = stream.split();

        let request = serde_json::json!({ "method": "subscribe", "topic": topic });
        writer
            .send(Message::Text(request.to_string().into()))
            .await
            .map_err(|e| {
                SyncError::Transport(format!("Failed to subscribe to {}: {}", topic, e))
            })?;

        info!("Subscribed to {} on {}", topic, endpoint);
        Ok(Box::new(WebSocketSubscription {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            closed: CancellationToken::new(),
        }))
    }
}

pub struct WebSocketSubscription {
    reader: Mutex<SplitStream<WsStream>>,
    writer: Mutex<SplitSink<WsStream, Message>>,
    closed: CancellationToken,
}

impl WebSocketSubscription {
    async fn next_payload(&self) -> SyncResult<Option<Vec<u8>>> {
        let mut reader = self.reader.lock().await;
        loop {
            match reader.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.as_bytes().to_vec())),
                Some(Ok(Message::Binary(data))) => return Ok(Some(data.to_vec())),
                Some(Ok(Message::Close(frame))) => {
                    debug!("Feed closed by peer: {:?}", frame);
                    return Ok(None);
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(SyncError::Transport(e.to_string())),
                None => return Ok(None),
            }
        }
    }
}

#[async_trait]
impl FeedSubscription for WebSocketSubscription {
    async fn recv(&self) -> SyncResult<Option<Vec<u8>>> {
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Ok(None),
            payload = self.next_payload() => payload,
        }
    }

    async fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();

        let mut writer = self.writer.lock().await;
        let shutdown = async {
            writer.send(Message::Close(None)).await?;
            writer.close().await
        };
        match tokio::time::timeout(CLOSE_GRACE, shutdown).await {
            Ok(Ok(())) => debug!("Feed subscription closed"),
            Ok(Err(e)) => debug!("Feed close handshake failed: {}", e),
            Err(_) => warn!("Feed close handshake timed out"),
        }
    }
}
