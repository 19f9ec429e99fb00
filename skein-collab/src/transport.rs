//! Topic-based pub/sub transport.
//!
//! The editor talks to an abstract [`Channel`]: join a named topic,
//! send envelopes, receive the topic's stream. The in-memory [`Broker`]
//! implements the same fan-out a real broker performs — one broadcast
//! channel per topic, every subscriber but the author sees each message
//! — and is what tests and single-process setups run against. The
//! WebSocket channel in [`crate::ws`] speaks to an external broker.
//!
//! Delivery on a topic is FIFO per subscriber; a subscriber that lags
//! past the buffer capacity loses the oldest messages (logged, not
//! fatal — the periodic full-story save re-converges replicas).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};

use crate::protocol::WireEnvelope;

/// The global topic carrying story lifecycle notifications.
pub const LOBBY_TOPIC: &str = "library:*";

/// Topic name for a story's channel.
pub fn story_topic(story_name: &str) -> String {
    format!("story:{story_name}")
}

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("channel closed")]
    Closed,
    #[error("not connected to {0:?}")]
    NotConnected(String),
    #[error("websocket failure: {0}")]
    WebSocket(String),
}

/// A duplex subscription to one topic.
#[async_trait]
pub trait Channel: Send {
    /// Publish an envelope to the topic.
    async fn send(&self, envelope: WireEnvelope) -> Result<(), TransportError>;

    /// Next envelope from the topic, excluding this session's own
    /// messages. `None` once the channel is closed.
    async fn recv(&mut self) -> Option<WireEnvelope>;

    /// Leave the topic; subsequent sends fail, `recv` returns `None`.
    async fn leave(&mut self);

    fn topic(&self) -> &str;
}

/// In-memory topic fan-out.
#[derive(Clone)]
pub struct Broker {
    topics: Arc<RwLock<HashMap<String, broadcast::Sender<WireEnvelope>>>>,
    capacity: usize,
}

impl Broker {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    /// Join a topic as `author`. The returned channel never yields the
    /// author's own messages back.
    pub async fn join(&self, topic: impl Into<String>, author: impl Into<String>) -> BrokerChannel {
        let topic = topic.into();
        let mut topics = self.topics.write().await;
        let sender = topics
            .entry(topic.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone();
        BrokerChannel {
            topic,
            author: author.into(),
            receiver: Some(sender.subscribe()),
            sender,
        }
    }

    /// Number of live subscribers on a topic.
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .await
            .get(topic)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }
}

/// A [`Broker`] subscription.
pub struct BrokerChannel {
    topic: String,
    author: String,
    sender: broadcast::Sender<WireEnvelope>,
    receiver: Option<broadcast::Receiver<WireEnvelope>>,
}

#[async_trait]
impl Channel for BrokerChannel {
    async fn send(&self, envelope: WireEnvelope) -> Result<(), TransportError> {
        if self.receiver.is_none() {
            return Err(TransportError::NotConnected(self.topic.clone()));
        }
        // A topic with no other subscriber is fine; the message simply
        // fans out to nobody.
        let _ = self.sender.send(envelope);
        Ok(())
    }

    async fn recv(&mut self) -> Option<WireEnvelope> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(envelope) => {
                    if envelope.author == self.author {
                        continue; // skip our own messages
                    }
                    return Some(envelope);
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    log::warn!(
                        "channel {:?} lagged, dropped {missed} messages",
                        self.topic
                    );
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    async fn leave(&mut self) {
        self.receiver = None;
    }

    fn topic(&self) -> &str {
        &self.topic
    }
}
