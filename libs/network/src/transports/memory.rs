//! In-process message bus
//!
//! Delivers every publish synchronously to the channel's handlers in
//! subscription order, so one publisher's messages arrive in the order sent.
//! Requests register a one-shot inbox subject and wait on it with a timeout.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use super::{InboundMessage, MessageHandler, MessageTransport, SubscriptionId};
use crate::{ClusterError, Result};

const INBOX_PREFIX: &str = "_INBOX.";

/// Delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    pub requests: u64,
    pub request_timeouts: u64,
}

#[derive(Default)]
struct Subscriptions {
    by_channel: HashMap<String, Vec<(SubscriptionId, MessageHandler)>>,
    channel_of: HashMap<SubscriptionId, String>,
}

/// Message transport for nodes sharing one process
pub struct MemoryBus {
    subscriptions: RwLock<Subscriptions>,
    inboxes: Mutex<HashMap<String, oneshot::Sender<Bytes>>>,
    next_id: AtomicU64,
    connected: AtomicBool,
    published: AtomicU64,
    delivered: AtomicU64,
    requests: AtomicU64,
    request_timeouts: AtomicU64,
}

impl std::fmt::Debug for MemoryBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBus")
            .field("channels", &self.subscriptions.read().by_channel.len())
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Subscriptions::default()),
            inboxes: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            connected: AtomicBool::new(true),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            requests: AtomicU64::new(0),
            request_timeouts: AtomicU64::new(0),
        }
    }

    /// Simulate losing the broker. Publishes fail while disconnected.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        if !connected {
            warn!("Message bus disconnected");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.subscriptions
            .read()
            .by_channel
            .get(channel)
            .map_or(0, Vec::len)
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            request_timeouts: self.request_timeouts.load(Ordering::Relaxed),
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ClusterError::transport("message bus disconnected"))
        }
    }

    fn deliver(&self, channel: &str, payload: Bytes, reply: Option<&str>) {
        self.published.fetch_add(1, Ordering::Relaxed);

        if channel.starts_with(INBOX_PREFIX) {
            match self.inboxes.lock().remove(channel) {
                Some(tx) => {
                    if tx.send(payload).is_ok() {
                        self.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                }
                None => debug!(channel, "Reply for expired inbox dropped"),
            }
            return;
        }

        // Handlers run outside the lock so they may subscribe or publish
        let handlers: Vec<MessageHandler> = match self.subscriptions.read().by_channel.get(channel) {
            Some(subs) => subs.iter().map(|(_, h)| h.clone()).collect(),
            None => {
                trace!(channel, "No subscribers");
                return;
            }
        };
        for handler in handlers {
            handler(InboundMessage {
                channel: channel.to_string(),
                payload: payload.clone(),
                reply: reply.map(str::to_string),
            });
            self.delivered.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[async_trait]
impl MessageTransport for MemoryBus {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()> {
        self.ensure_connected()?;
        self.deliver(channel, payload, None);
        Ok(())
    }

    async fn publish_with_reply(&self, channel: &str, reply: &str, payload: Bytes) -> Result<()> {
        self.ensure_connected()?;
        self.deliver(channel, payload, Some(reply));
        Ok(())
    }

    async fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<SubscriptionId> {
        self.ensure_connected()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subs = self.subscriptions.write();
        subs.by_channel
            .entry(channel.to_string())
            .or_default()
            .push((id, handler));
        subs.channel_of.insert(id, channel.to_string());
        debug!(channel, subscription = id, "Subscribed");
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        let mut subs = self.subscriptions.write();
        let Some(channel) = subs.channel_of.remove(&id) else {
            return Err(ClusterError::transport(format!("unknown subscription {id}")));
        };
        if let Some(list) = subs.by_channel.get_mut(&channel) {
            list.retain(|(sid, _)| *sid != id);
            if list.is_empty() {
                subs.by_channel.remove(&channel);
            }
        }
        debug!(channel = %channel, subscription = id, "Unsubscribed");
        Ok(())
    }

    async fn request(&self, channel: &str, payload: Bytes, timeout: Duration) -> Result<Bytes> {
        self.ensure_connected()?;
        self.requests.fetch_add(1, Ordering::Relaxed);

        let inbox = format!("{INBOX_PREFIX}{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.inboxes.lock().insert(inbox.clone(), tx);
        self.deliver(channel, payload, Some(&inbox));

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) | Err(_) => {
                self.inboxes.lock().remove(&inbox);
                self.request_timeouts.fetch_add(1, Ordering::Relaxed);
                Err(ClusterError::timeout(
                    format!("request {channel}"),
                    timeout.as_millis() as u64,
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recorder() -> (MessageHandler, Arc<Mutex<Vec<Bytes>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: MessageHandler = Arc::new(move |msg: InboundMessage| sink.lock().push(msg.payload));
        (handler, seen)
    }

    #[tokio::test]
    async fn test_publish_preserves_order() {
        let bus = MemoryBus::new();
        let (handler, seen) = recorder();
        bus.subscribe("ns/game/1", handler).await.unwrap();

        for i in 0..50u8 {
            bus.publish("ns/game/1", Bytes::from(vec![i])).await.unwrap();
        }
        let seen = seen.lock();
        assert_eq!(seen.len(), 50);
        assert!(seen.iter().enumerate().all(|(i, b)| b[0] == i as u8));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = MemoryBus::new();
        let (handler, seen) = recorder();
        let id = bus.subscribe("c", handler).await.unwrap();
        bus.publish("c", Bytes::from_static(b"1")).await.unwrap();
        bus.unsubscribe(id).await.unwrap();
        bus.publish("c", Bytes::from_static(b"2")).await.unwrap();

        assert_eq!(seen.lock().len(), 1);
        assert_eq!(bus.subscriber_count("c"), 0);
        assert!(bus.unsubscribe(id).await.is_err());
    }

    #[tokio::test]
    async fn test_request_reply() {
        let bus = Arc::new(MemoryBus::new());
        let responder = bus.clone();
        let handler: MessageHandler = Arc::new(move |msg: InboundMessage| {
            let bus = responder.clone();
            tokio::spawn(async move {
                let reply = msg.reply.unwrap();
                bus.publish(&reply, Bytes::from_static(b"pong")).await.unwrap();
            });
        });
        bus.subscribe("svc", handler).await.unwrap();

        let reply = bus
            .request("svc", Bytes::from_static(b"ping"), Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(&reply[..], b"pong");
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_without_responder_times_out() {
        let bus = MemoryBus::new();
        let err = bus
            .request("nobody", Bytes::new(), Duration::from_millis(500))
            .await
            .unwrap_err();
        assert_eq!(err.category(), "timeout");
        assert_eq!(bus.stats().request_timeouts, 1);
    }

    #[tokio::test]
    async fn test_disconnected_bus_rejects_publish() {
        let bus = MemoryBus::new();
        bus.set_connected(false);
        assert_eq!(
            bus.publish("c", Bytes::new()).await.unwrap_err().category(),
            "transport"
        );
    }
}
