//! In-memory bus using tokio channels.
//!
//! Single process only. Publishing to a home topic that the hub subscribed
//! to loops the message back into the hub, which is how the provisioning
//! echo is delivered. Every publish is also recorded per destination so
//! tests can inspect what the hub sent.

use super::{Bus, Destination};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default buffer size for subscriber and watch channels
const DEFAULT_BUFFER_SIZE: usize = 1024;

pub struct MemoryBus {
    subscribers: Arc<DashMap<String, mpsc::Sender<Vec<u8>>>>,
    watchers: DashMap<Destination, broadcast::Sender<Vec<u8>>>,
    history: DashMap<Destination, Vec<Vec<u8>>>,
    buffer_size: usize,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
            watchers: DashMap::new(),
            history: DashMap::new(),
            buffer_size,
        }
    }

    /// Receives every message published to `destination` from now on.
    pub fn watch(&self, destination: &Destination) -> broadcast::Receiver<Vec<u8>> {
        self.watchers
            .entry(destination.clone())
            .or_insert_with(|| broadcast::channel(self.buffer_size).0)
            .subscribe()
    }

    /// Every message published to `destination` so far, oldest first.
    pub fn published(&self, destination: &Destination) -> Vec<Vec<u8>> {
        self.history
            .get(destination)
            .map(|h| h.value().clone())
            .unwrap_or_default()
    }

    /// Delivers `body` to the subscriber of a home topic, as a client
    /// publishing to the hub would.
    pub async fn inject(&self, topic: &str, body: impl Into<Vec<u8>>) -> anyhow::Result<()> {
        let tx = self
            .subscribers
            .get(topic)
            .map(|s| s.value().clone())
            .ok_or_else(|| anyhow::anyhow!("no subscriber on topic '{topic}'"))?;
        tx.send(body.into())
            .await
            .map_err(|_| anyhow::anyhow!("subscriber on topic '{topic}' has stopped"))
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn publish(&self, destination: &Destination, body: Vec<u8>) -> anyhow::Result<()> {
        self.history
            .entry(destination.clone())
            .or_default()
            .push(body.clone());

        if let Some(tx) = self.watchers.get(destination) {
            // No receivers is fine; nobody is watching this destination.
            let _ = tx.send(body.clone());
        }

        if destination.address.is_none() {
            let subscriber = self
                .subscribers
                .get(&destination.topic)
                .map(|s| s.value().clone());
            if let Some(tx) = subscriber {
                if tx.send(body).await.is_err() {
                    debug!(topic = %destination.topic, "Subscriber gone, dropping loopback");
                }
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        _channel: &str,
        shutdown: CancellationToken,
    ) -> anyhow::Result<mpsc::Receiver<Vec<u8>>> {
        let (tx, rx) = mpsc::channel(self.buffer_size);
        self.subscribers.insert(topic.to_string(), tx);

        // Drop the sender on shutdown so the receiver drains and closes.
        let subscribers = self.subscribers.clone();
        let topic = topic.to_string();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            subscribers.remove(&topic);
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn home_publish_loops_back_to_subscriber() {
        let bus = MemoryBus::new();
        let shutdown = CancellationToken::new();
        let mut rx = bus.subscribe("glcd", "glcd", shutdown.clone()).await.expect("subscribe");

        bus.publish(&Destination::home("glcd"), b"one".to_vec()).await.expect("publish");
        bus.inject("glcd", "two").await.expect("inject");

        assert_eq!(rx.recv().await, Some(b"one".to_vec()));
        assert_eq!(rx.recv().await, Some(b"two".to_vec()));
    }

    #[tokio::test]
    async fn remote_publish_is_watched_and_recorded() {
        let bus = MemoryBus::new();
        let dest = Destination::at("10.0.0.5:4151", "arena");
        let mut watch = bus.watch(&dest);

        bus.publish(&dest, b"hello".to_vec()).await.expect("publish");

        assert_eq!(watch.recv().await.expect("delivered"), b"hello".to_vec());
        assert_eq!(bus.published(&dest), vec![b"hello".to_vec()]);
        assert!(bus.published(&Destination::home("arena")).is_empty());
    }

    #[tokio::test]
    async fn shutdown_closes_subscription() {
        let bus = MemoryBus::new();
        let shutdown = CancellationToken::new();
        let mut rx = bus.subscribe("glcd", "glcd", shutdown.clone()).await.expect("subscribe");

        shutdown.cancel();
        assert_eq!(rx.recv().await, None);
        assert!(bus.inject("glcd", "late").await.is_err());
    }
}
