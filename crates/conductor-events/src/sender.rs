use crate::producer::{Producer, ProducerRegistry};
use crate::routing::{EventRouter, Route};
use conductor_core::config::ProducerConfig;
use conductor_core::event::metadata_keys;
use conductor_core::{BusMessage, EngineError, EventCategory, Result};
use moka::future::Cache;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Producers cached per (category, service) pair.
pub type ProducerCache = Cache<(EventCategory, String), Arc<dyn Producer>>;

pub fn producer_cache(config: &ProducerConfig) -> ProducerCache {
    Cache::builder()
        .max_capacity(config.cache_capacity)
        .time_to_live(config.cache_ttl())
        .build()
}

/// Ambient execution context attached to an outgoing event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendContext {
    pub plan_execution_id: Option<String>,
    pub node_execution_id: Option<String>,
    pub step_type: Option<String>,
    pub log_context: BTreeMap<String, String>,
}

impl SendContext {
    pub fn for_plan(plan_execution_id: impl Into<String>) -> Self {
        Self {
            plan_execution_id: Some(plan_execution_id.into()),
            ..Self::default()
        }
    }

    pub fn with_node(mut self, node_execution_id: impl Into<String>) -> Self {
        self.node_execution_id = Some(node_execution_id.into());
        self
    }

    pub fn with_step_type(mut self, step_type: impl Into<String>) -> Self {
        self.step_type = Some(step_type.into());
        self
    }

    pub fn with_log_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.log_context.insert(key.into(), value.into());
        self
    }
}

/// Publishes typed execution events to the topic owned by the target service.
pub struct EventSender {
    router: EventRouter,
    registry: Arc<dyn ProducerRegistry>,
    cache: ProducerCache,
    lookup_attempts: u32,
    lookup_backoff: Duration,
}

impl EventSender {
    pub fn new(
        router: EventRouter,
        registry: Arc<dyn ProducerRegistry>,
        cache: ProducerCache,
        config: &ProducerConfig,
    ) -> Self {
        Self {
            router,
            registry,
            cache,
            lookup_attempts: config.lookup_attempts.max(1),
            lookup_backoff: config.lookup_backoff(),
        }
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    /// Publishes `payload` and returns the message id.
    ///
    /// Fails without retrying when `category` has no topic mapping.
    pub async fn send_event(
        &self,
        ctx: &SendContext,
        payload: Vec<u8>,
        category: EventCategory,
        service: &str,
        monitored: bool,
    ) -> Result<String> {
        let route = self.router.route(category, service, ctx.step_type.as_deref())?;
        let producer = self.producer_for(category, &route).await?;

        let mut message = BusMessage::new(category, route.service.clone(), payload);
        enrich_metadata(&mut message, ctx, monitored);

        let message_id = producer.send(message).await?;
        debug!(
            topic = %route.topic,
            category = %category,
            message_id = %message_id,
            plan_execution_id = ?ctx.plan_execution_id,
            "Event sent"
        );
        Ok(message_id)
    }

    pub async fn send_json<T: Serialize + ?Sized>(
        &self,
        ctx: &SendContext,
        payload: &T,
        category: EventCategory,
        service: &str,
        monitored: bool,
    ) -> Result<String> {
        let bytes = serde_json::to_vec(payload)
            .map_err(|e| EngineError::serialization(format!("{category} payload"), e.to_string()))?;
        self.send_event(ctx, bytes, category, service, monitored).await
    }

    async fn producer_for(&self, category: EventCategory, route: &Route) -> Result<Arc<dyn Producer>> {
        let key = (category, route.service.clone());
        if let Some(producer) = self.cache.get(&key).await {
            return Ok(producer);
        }

        let mut last_error = None;
        for attempt in 1..=self.lookup_attempts {
            match self.registry.lookup(&route.topic, route.max_len).await {
                Ok(producer) => {
                    self.cache.insert(key, producer.clone()).await;
                    return Ok(producer);
                }
                Err(e) => {
                    warn!(topic = %route.topic, attempt, error = %e, "Producer lookup failed");
                    last_error = Some(e);
                    if attempt < self.lookup_attempts {
                        tokio::time::sleep(self.lookup_backoff * attempt).await;
                    }
                }
            }
        }

        let message = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no producer available".to_string());
        Err(EngineError::transient(
            format!("producer lookup for {}", route.topic),
            message,
            self.lookup_attempts,
        ))
    }
}

fn enrich_metadata(message: &mut BusMessage, ctx: &SendContext, monitored: bool) {
    let metadata = &mut message.metadata;
    metadata.insert(metadata_keys::SERVICE_NAME.to_string(), message.service.clone());
    metadata.insert(metadata_keys::EVENT_CATEGORY.to_string(), message.category.to_string());
    if let Some(plan_execution_id) = &ctx.plan_execution_id {
        metadata.insert(metadata_keys::PLAN_EXECUTION_ID.to_string(), plan_execution_id.clone());
    }
    if let Some(node_execution_id) = &ctx.node_execution_id {
        metadata.insert(metadata_keys::NODE_EXECUTION_ID.to_string(), node_execution_id.clone());
    }
    for (key, value) in &ctx.log_context {
        metadata.insert(format!("{}{key}", metadata_keys::LOG_CONTEXT_PREFIX), value.clone());
    }
    if monitored {
        metadata.insert(metadata_keys::MONITORED.to_string(), "true".to_string());
    }
}
