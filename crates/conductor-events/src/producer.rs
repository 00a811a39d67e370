use crate::bus::EventBus;
use async_trait::async_trait;
use conductor_core::{BusMessage, Result};
use std::sync::Arc;
use tracing::trace;

/// Publishes messages onto one topic.
#[async_trait]
pub trait Producer: Send + Sync {
    fn topic(&self) -> &str;

    /// Returns the bus-assigned message id.
    async fn send(&self, message: BusMessage) -> Result<String>;
}

/// Resolves a topic to a producer.
///
/// Lookups may fail transiently (e.g. while a remote bus reconnects); the
/// sender retries them a bounded number of times.
#[async_trait]
pub trait ProducerRegistry: Send + Sync {
    async fn lookup(&self, topic: &str, max_len: usize) -> Result<Arc<dyn Producer>>;
}

/// Producer bound to a topic of an [`EventBus`].
pub struct BusProducer {
    bus: Arc<dyn EventBus>,
    topic: String,
    max_len: usize,
}

impl BusProducer {
    pub fn new(bus: Arc<dyn EventBus>, topic: impl Into<String>, max_len: usize) -> Self {
        Self {
            bus,
            topic: topic.into(),
            max_len,
        }
    }
}

#[async_trait]
impl Producer for BusProducer {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn send(&self, message: BusMessage) -> Result<String> {
        let id = self.bus.publish(&self.topic, self.max_len, message).await?;
        trace!(topic = %self.topic, message_id = %id, "Message published");
        Ok(id)
    }
}

/// Registry that hands out [`BusProducer`]s for a shared bus.
pub struct BusProducerRegistry {
    bus: Arc<dyn EventBus>,
}

impl BusProducerRegistry {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl ProducerRegistry for BusProducerRegistry {
    async fn lookup(&self, topic: &str, max_len: usize) -> Result<Arc<dyn Producer>> {
        Ok(Arc::new(BusProducer::new(self.bus.clone(), topic, max_len)))
    }
}
