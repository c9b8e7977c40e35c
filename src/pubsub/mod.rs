//! Publish/subscribe bus connecting hub instances
//!
//! Channels are plain strings: one shared presence channel plus one
//! `room:`-prefixed channel per room name. Every subscriber of a channel, the publishing instance
//! included, observes that channel's publishes in publish order.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::sync::Arc;

use crate::error::Result;

pub use self::memory::MemoryBus;
pub use self::redis::RedisBus;

/// Stream of raw payloads received on one channel
pub type Subscription = BoxStream<'static, String>;

#[async_trait]
pub trait PubSub: Send + Sync {
    /// Publish a payload to every subscriber of `channel`
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Start receiving payloads published to `channel` from now on
    async fn subscribe(&self, channel: &str) -> Result<Subscription>;
}

pub type SharedPubSub = Arc<dyn PubSub>;
