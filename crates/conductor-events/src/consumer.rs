use crate::bus::{EventBus, ReceivedMessage};
use crate::routing::topic_name;
use async_trait::async_trait;
use conductor_core::config::{ConsumerConfig, TopicsConfig};
use conductor_core::{EngineError, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Decodes and processes batches read by an [`EventConsumer`].
#[async_trait]
pub trait BatchHandler: Send + Sync {
    type Item: Send;

    /// A decode error drops the message; it is still acknowledged.
    fn decode(&self, message: &ReceivedMessage) -> Result<Self::Item>;

    async fn process(&self, items: Vec<Self::Item>) -> Result<()>;
}

/// Shared switch that parks consumers during maintenance windows.
#[derive(Debug, Clone, Default)]
pub struct MaintenanceMode(Arc<AtomicBool>);

impl MaintenanceMode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    pub batches: u64,
    pub messages: u64,
    pub dropped: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub received: usize,
    pub dropped: usize,
}

pub struct EventConsumer<H: BatchHandler> {
    bus: Arc<dyn EventBus>,
    handler: H,
    topic: String,
    group: String,
    name: String,
    batch_size: usize,
    poll_wait: Duration,
    idle_sleep: Duration,
    shutdown: CancellationToken,
    maintenance: MaintenanceMode,
}

impl<H: BatchHandler> EventConsumer<H> {
    pub fn new(
        bus: Arc<dyn EventBus>,
        handler: H,
        topic: impl Into<String>,
        config: &ConsumerConfig,
        shutdown: CancellationToken,
        maintenance: MaintenanceMode,
    ) -> Self {
        Self {
            bus,
            handler,
            topic: topic.into(),
            group: config.group.clone(),
            name: config.consumer_name.clone(),
            batch_size: config.batch_size.max(1),
            poll_wait: config.poll_wait(),
            idle_sleep: config.idle_sleep(),
            shutdown,
            maintenance,
        }
    }

    /// Consumer for the topic the configured service owns for the configured category.
    pub fn from_config(
        bus: Arc<dyn EventBus>,
        handler: H,
        consumer: &ConsumerConfig,
        topics: &TopicsConfig,
        shutdown: CancellationToken,
        maintenance: MaintenanceMode,
    ) -> Result<Self> {
        let mapping = topics.mapping(consumer.category).ok_or_else(|| {
            EngineError::configuration("topics.mappings", format!("no topic mapped for {}", consumer.category))
        })?;
        let topic = topic_name(&consumer.service, &mapping.topic);
        Ok(Self::new(bus, handler, topic, consumer, shutdown, maintenance))
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Polls until shutdown is requested or maintenance mode is switched on.
    pub async fn run(&self) -> ConsumerStats {
        let mut stats = ConsumerStats::default();
        info!(topic = %self.topic, group = %self.group, consumer = %self.name, "Consumer started");

        loop {
            if self.shutdown.is_cancelled() {
                info!(topic = %self.topic, "Shutdown requested, stopping consumer");
                break;
            }
            if self.maintenance.is_enabled() {
                info!(topic = %self.topic, "Maintenance mode on, stopping consumer");
                break;
            }

            let received = match self.poll_once().await {
                Ok(outcome) => {
                    if outcome.received > 0 {
                        stats.batches += 1;
                        stats.messages += outcome.received as u64;
                        stats.dropped += outcome.dropped as u64;
                    }
                    outcome.received
                }
                Err(e) => {
                    error!(topic = %self.topic, error = %e, "Failed to process batch");
                    0
                }
            };

            if received < self.batch_size {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {}
                    _ = tokio::time::sleep(self.idle_sleep) => {}
                }
            }
        }

        info!(
            topic = %self.topic,
            batches = stats.batches,
            messages = stats.messages,
            dropped = stats.dropped,
            "Consumer stopped"
        );
        stats
    }

    /// Reads, acknowledges and processes a single batch.
    pub async fn poll_once(&self) -> Result<BatchOutcome> {
        let messages = tokio::select! {
            _ = self.shutdown.cancelled() => return Ok(BatchOutcome::default()),
            read = self.bus.read(&self.topic, &self.group, &self.name, self.batch_size, self.poll_wait) => read?,
        };
        if messages.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let mut items = Vec::with_capacity(messages.len());
        let mut dropped = 0;
        for message in &messages {
            match self.handler.decode(message) {
                Ok(item) => items.push(item),
                Err(e) => {
                    dropped += 1;
                    warn!(topic = %self.topic, message_id = %message.id, error = %e, "Dropping malformed message");
                }
            }
        }

        let ids: Vec<String> = messages.iter().map(|m| m.id.clone()).collect();
        let acked = self.bus.ack(&self.topic, &self.group, &ids).await?;
        debug!(topic = %self.topic, received = messages.len(), acked, dropped, "Batch acknowledged");

        if !items.is_empty() {
            self.handler.process(items).await?;
        }

        Ok(BatchOutcome {
            received: messages.len(),
            dropped,
        })
    }
}
