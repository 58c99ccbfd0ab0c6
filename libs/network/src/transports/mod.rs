//! Message Transport
//!
//! Subject-based publish/subscribe with request/reply. Every node subscribes
//! to its point, topic and call channels; replies travel on the one-shot inbox
//! subject the requester supplied.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use crate::Result;

pub mod memory;

pub use memory::MemoryBus;

/// Subscription handle returned by [`MessageTransport::subscribe`].
pub type SubscriptionId = u64;

/// Message delivered to a subscription handler.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub channel: String,
    pub payload: Bytes,
    /// Reply subject, present on requests.
    pub reply: Option<String>,
}

/// Callback invoked for every message on a subscribed channel.
pub type MessageHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;

/// Unified transport trait for cluster messaging
#[async_trait]
pub trait MessageTransport: Send + Sync + 'static {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()>;

    async fn publish_with_reply(&self, channel: &str, reply: &str, payload: Bytes) -> Result<()>;

    async fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<SubscriptionId>;

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;

    /// Publish and wait for exactly one reply.
    async fn request(&self, channel: &str, payload: Bytes, timeout: Duration) -> Result<Bytes>;
}
