//! WebSocket channel to an external broker.
//!
//! One connection per topic: the topic name is appended to the broker
//! URL. A writer task drains an outbound queue into the socket and a
//! reader task decodes inbound text frames onto an inbound queue, so
//! neither the editor nor the UI ever blocks on the network.
//!
//! Frames that fail to decode are logged and dropped — a malformed
//! message from a misbehaving peer must never take the session down.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::WireEnvelope;
use crate::transport::{Channel, TransportError};

const QUEUE_DEPTH: usize = 256;

/// A duplex WebSocket subscription to one topic.
pub struct WsChannel {
    topic: String,
    outgoing: Option<mpsc::Sender<String>>,
    incoming: mpsc::Receiver<WireEnvelope>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl WsChannel {
    /// Connect to `{url}/{topic}` as `author`.
    pub async fn connect(
        url: &str,
        topic: impl Into<String>,
        author: impl Into<String>,
    ) -> Result<Self, TransportError> {
        let topic = topic.into();
        let author = author.into();
        let endpoint = format!("{url}/{topic}");

        let (stream, _) = tokio_tungstenite::connect_async(&endpoint)
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;
        let (mut ws_writer, mut ws_reader) = stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(QUEUE_DEPTH);
        let writer = tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = ws_writer.send(Message::Text(text.into())).await {
                    log::warn!("websocket send failed: {e}");
                    break;
                }
            }
        });

        let (in_tx, in_rx) = mpsc::channel::<WireEnvelope>(QUEUE_DEPTH);
        let reader_topic = topic.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = ws_reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => match WireEnvelope::decode(text.as_str()) {
                        Ok(envelope) => {
                            if envelope.author == author {
                                continue; // skip our own messages
                            }
                            if in_tx.send(envelope).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            log::warn!("dropping undecodable frame on {reader_topic:?}: {e}");
                        }
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            log::info!("websocket channel {reader_topic:?} closed");
        });

        Ok(Self {
            topic,
            outgoing: Some(out_tx),
            incoming: in_rx,
            reader,
            writer,
        })
    }
}

#[async_trait]
impl Channel for WsChannel {
    async fn send(&self, envelope: WireEnvelope) -> Result<(), TransportError> {
        let tx = self
            .outgoing
            .as_ref()
            .ok_or_else(|| TransportError::NotConnected(self.topic.clone()))?;
        tx.send(envelope.encode())
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Option<WireEnvelope> {
        self.incoming.recv().await
    }

    async fn leave(&mut self) {
        self.outgoing = None;
        self.reader.abort();
        self.writer.abort();
        self.incoming.close();
    }

    fn topic(&self) -> &str {
        &self.topic
    }
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}
