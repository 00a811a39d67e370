use crate::dispatcher::GraphUpdateDispatcher;
use async_trait::async_trait;
use conductor_core::Result;
use conductor_events::{BatchHandler, OrchestrationLogEvent, ReceivedMessage};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Turns orchestration events into one graph update per affected plan.
pub struct GraphUpdateHandler {
    dispatcher: Arc<GraphUpdateDispatcher>,
}

impl GraphUpdateHandler {
    pub fn new(dispatcher: Arc<GraphUpdateDispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl BatchHandler for GraphUpdateHandler {
    type Item = OrchestrationLogEvent;

    fn decode(&self, message: &ReceivedMessage) -> Result<Self::Item> {
        Ok(serde_json::from_slice(&message.message.payload)?)
    }

    async fn process(&self, items: Vec<Self::Item>) -> Result<()> {
        let mut seen = HashSet::new();
        let plan_ids: Vec<String> = items
            .into_iter()
            .map(|event| event.plan_execution_id)
            .filter(|id| seen.insert(id.clone()))
            .collect();
        debug!(plans = plan_ids.len(), "Dispatching graph updates");

        for plan_execution_id in plan_ids {
            self.dispatcher.dispatch(plan_execution_id).await;
        }
        Ok(())
    }
}
