//! In-process bus backed by tokio broadcast channels
//!
//! Several hubs sharing one `MemoryBus` behave like separate server
//! instances attached to the same broker.

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::{PubSub, Subscription};
use crate::constants::BUS_CHANNEL_CAPACITY;
use crate::error::Result;

pub struct MemoryBus {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    capacity: usize,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::with_capacity(BUS_CHANNEL_CAPACITY)
    }

    /// Bus whose channels buffer at most `capacity` payloads per slow subscriber
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, channel: &str) -> Result<broadcast::Sender<String>> {
        let mut channels = self.channels.lock()?;
        let sender = channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        Ok(sender.clone())
    }

    /// Number of live subscriptions on a channel
    pub fn subscriber_count(&self, channel: &str) -> Result<usize> {
        let channels = self.channels.lock()?;
        Ok(channels
            .get(channel)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0))
    }
}

fn receiver_stream(channel: String, rx: broadcast::Receiver<String>) -> Subscription {
    stream::unfold((channel, rx), |(channel, mut rx)| async move {
        loop {
            match rx.recv().await {
                Ok(payload) => return Some((payload, (channel, rx))),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        "Subscriber on channel {} lagged, {} payloads dropped",
                        channel, skipped
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}

#[async_trait]
impl PubSub for MemoryBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let sender = self.sender(channel)?;
        // A channel nobody listens to is not an error
        if sender.send(payload.to_string()).is_err() {
            debug!("Published to channel {} without subscribers", channel);
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let rx = self.sender(channel)?.subscribe();
        Ok(receiver_stream(channel.to_string(), rx))
    }
}
