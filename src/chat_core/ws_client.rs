//! Chat WebSocket transport
//!
//! The connection is split once: the read half feeds decoded `ChatMessage`s
//! into the ingestion channel, the write half is shared with the keepalive
//! task. Any read or write failure is fatal to the runtime; there is no
//! reconnect.

use super::message::{parse_frame, ChatMessage};
use futures::stream::{SplitSink, SplitStream};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type WsReader = SplitStream<WsStream>;
pub type WsWriter = SplitSink<WsStream, Message>;

/// A keepalive that cannot be written within this window counts as a write failure
pub const KEEPALIVE_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Connect(String),
    Read(String),
    Write(String),
    Closed,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Connect(e) => write!(f, "Connection failed: {}", e),
            TransportError::Read(e) => write!(f, "Read failed: {}", e),
            TransportError::Write(e) => write!(f, "Write failed: {}", e),
            TransportError::Closed => write!(f, "Connection closed by server"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Open the chat connection and split it into reader and keepalive halves
pub async fn connect(url: &str) -> Result<(WsReader, KeepaliveWriter<WsWriter>), TransportError> {
    log::info!("🔗 Connecting to {}", url);

    let (stream, response) = connect_async(url)
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;

    log::info!("✅ Connected to chat (HTTP {})", response.status());

    let (writer, reader) = stream.split();
    Ok((reader, KeepaliveWriter::new(writer)))
}

/// Forward chat messages from `frames` into `tx` until cancelled
///
/// Returns `Ok` when cancelled or when the receiving side hung up; any
/// transport failure (including a server close) is returned as an error.
/// Malformed `MSG` payloads are skipped.
pub async fn pump_frames<S>(
    mut frames: S,
    tx: mpsc::Sender<ChatMessage>,
    cancel: CancellationToken,
) -> Result<u64, TransportError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let mut forwarded = 0u64;

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return Ok(forwarded),
            frame = frames.next() => frame,
        };

        let text = match frame {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(reason))) => {
                log::warn!("⚠️  Server closed connection: {:?}", reason);
                return Err(TransportError::Closed);
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(TransportError::Read(e.to_string())),
            None => return Err(TransportError::Closed),
        };

        match parse_frame(text.as_str()) {
            Ok(Some(message)) => {
                if tx.send(message).await.is_err() {
                    log::debug!("Ingestion channel closed, stopping reader");
                    return Ok(forwarded);
                }
                forwarded += 1;
            }
            Ok(None) => {}
            Err(e) => log::debug!("⚠️  Skipping frame: {}", e),
        }
    }
}

/// Shared write half used for keepalive frames
pub struct KeepaliveWriter<S> {
    sink: Arc<Mutex<S>>,
}

impl<S> Clone for KeepaliveWriter<S> {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
        }
    }
}

impl<S> KeepaliveWriter<S>
where
    S: Sink<Message> + Unpin + Send,
    S::Error: std::fmt::Display,
{
    pub fn new(sink: S) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
        }
    }

    /// Send one text frame carrying the current time
    ///
    /// Bounded by `KEEPALIVE_WRITE_TIMEOUT` so a stalled socket surfaces as
    /// `TransportError::Write` instead of blocking shutdown.
    pub async fn send_keepalive(&self) -> Result<(), TransportError> {
        let frame = chrono::Utc::now().to_rfc3339();
        let write = async {
            self.sink
                .lock()
                .await
                .send(Message::Text(frame.into()))
                .await
                .map_err(|e| TransportError::Write(e.to_string()))
        };

        tokio::time::timeout(KEEPALIVE_WRITE_TIMEOUT, write)
            .await
            .map_err(|_| {
                TransportError::Write(format!(
                    "keepalive not written within {}ms",
                    KEEPALIVE_WRITE_TIMEOUT.as_millis()
                ))
            })?
    }

    /// Best-effort close frame on shutdown
    pub async fn close(&self) {
        if let Err(e) = self.sink.lock().await.close().await {
            log::debug!("Close frame not sent: {}", e);
        }
    }
}
