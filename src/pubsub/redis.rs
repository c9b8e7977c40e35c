//! Redis-backed bus for multi-instance deployments
//!
//! Publishes go through one shared multiplexed connection. Each subscription
//! owns a dedicated pub/sub connection, since a subscribed Redis connection
//! cannot issue other commands.

use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, info, warn};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use super::{PubSub, Subscription};
use crate::error::Result;

pub struct RedisBus {
    client: redis::Client,
    publisher: MultiplexedConnection,
}

impl RedisBus {
    /// Open the publishing connection; fails fast when the broker is unreachable
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let publisher = client.get_multiplexed_async_connection().await?;
        info!("Connected to redis bus at {}", redacted(url));
        Ok(Self { client, publisher })
    }
}

#[async_trait]
impl PubSub for RedisBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.publisher.clone();
        let receivers: i64 = conn.publish(channel, payload).await?;
        debug!("Published on {} to {} subscribers", channel, receivers);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        let channel = channel.to_string();
        let stream = pubsub.into_on_message().filter_map(move |msg| {
            let channel = channel.clone();
            async move {
                match msg.get_payload::<String>() {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        warn!("Dropping undecodable payload on {}: {}", channel, e);
                        None
                    }
                }
            }
        });
        Ok(stream.boxed())
    }
}

/// Connection URL without its password, for logs
fn redacted(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => {
            format!("{}://***{}", &url[..scheme], &url[at..])
        }
        _ => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_redacted_hides_credentials() {
        assert_eq!(redacted("redis://:secret@cache:6379/0"), "redis://***@cache:6379/0");
        assert_eq!(redacted("redis://127.0.0.1:6379"), "redis://127.0.0.1:6379");
    }

    #[tokio::test]
    async fn test_invalid_url_is_a_bus_error() {
        let err = RedisBus::connect("not a redis url").await.err().unwrap();
        assert!(matches!(err, crate::error::RustyRoomsError::BusError(_)));
    }

    /// Needs a broker: `RUSTY_ROOMS_REDIS_URL=redis://127.0.0.1 cargo test -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn test_publish_reaches_subscriber() {
        let url = std::env::var("RUSTY_ROOMS_REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let bus = RedisBus::connect(&url).await.unwrap();

        let channel = format!("room:test-{}", uuid::Uuid::new_v4());
        let mut sub = bus.subscribe(&channel).await.unwrap();
        bus.publish(&channel, "hello").await.unwrap();

        let received = timeout(Duration::from_secs(2), sub.next()).await.unwrap();
        assert_eq!(received.as_deref(), Some("hello"));
    }
}
