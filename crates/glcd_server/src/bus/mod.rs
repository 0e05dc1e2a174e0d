//! Message bus abstraction.
//!
//! The hub consumes one topic (the server topic) and publishes to many: each
//! client names its own nsqd and topic in its identifier. Backends implement
//! [`Bus`]:
//!
//! - [`NsqBus`] - NSQ over TCP, with nsqlookupd discovery
//! - [`MemoryBus`] - in-process, for tests and local runs

pub mod memory;
pub mod nsq;

pub use memory::MemoryBus;
pub use nsq::NsqBus;

use crate::registry::ClientAddress;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Where a published message goes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    /// nsqd `host:port`, or `None` for the hub's home nsqd
    pub address: Option<String>,
    pub topic: String,
}

impl Destination {
    /// A topic on the hub's home nsqd.
    pub fn home(topic: impl Into<String>) -> Self {
        Self {
            address: None,
            topic: topic.into(),
        }
    }

    /// A topic on a specific nsqd.
    pub fn at(address: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            topic: topic.into(),
        }
    }
}

impl From<ClientAddress> for Destination {
    fn from(addr: ClientAddress) -> Self {
        Self::at(addr.node, addr.topic)
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.address {
            Some(address) => write!(f, "{}@{}", self.topic, address),
            None => write!(f, "{}@home", self.topic),
        }
    }
}

/// Publish/subscribe transport.
#[async_trait]
pub trait Bus: Send + Sync + 'static {
    /// Publishes one message. Delivery is at-least-once.
    async fn publish(&self, destination: &Destination, body: Vec<u8>) -> anyhow::Result<()>;

    /// Starts consuming `topic` through `channel`.
    ///
    /// Messages arrive on the returned receiver in delivery order. The
    /// receiver closes once `shutdown` is cancelled and the consumer has
    /// stopped.
    async fn subscribe(
        &self,
        topic: &str,
        channel: &str,
        shutdown: CancellationToken,
    ) -> anyhow::Result<mpsc::Receiver<Vec<u8>>>;
}
