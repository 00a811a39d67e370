use super::{NodeStatusUpdateObserver, NodeUpdateInfo, PlanStatusUpdateObserver};
use async_trait::async_trait;
use conductor_core::{EventCategory, PlanExecution, Result, Status};
use conductor_events::{EventSender, OrchestrationEventType, OrchestrationLogEvent, SendContext};
use std::sync::Arc;
use tracing::trace;

/// Publishes an `ORCHESTRATION` event for every committed status change,
/// which is what keeps the execution graph fresh.
pub struct OrchestrationLogPublisher {
    sender: Arc<EventSender>,
    service: String,
}

impl OrchestrationLogPublisher {
    pub fn new(sender: Arc<EventSender>, service: impl Into<String>) -> Self {
        Self {
            sender,
            service: service.into(),
        }
    }

    async fn publish(&self, ctx: SendContext, event: OrchestrationLogEvent) -> Result<()> {
        let message_id = self
            .sender
            .send_json(&ctx, &event, EventCategory::Orchestration, &self.service, false)
            .await?;
        trace!(
            plan_execution_id = %event.plan_execution_id,
            event_type = %event.event_type,
            message_id = %message_id,
            "Orchestration event published"
        );
        Ok(())
    }
}

#[async_trait]
impl NodeStatusUpdateObserver for OrchestrationLogPublisher {
    fn name(&self) -> &str {
        "orchestration_log"
    }

    async fn on_node_status_update(&self, info: &NodeUpdateInfo) -> Result<()> {
        let node = &info.node;
        let ctx = SendContext::for_plan(node.plan_execution_id.clone()).with_node(node.id.clone());
        let event = OrchestrationLogEvent::new(
            node.plan_execution_id.clone(),
            OrchestrationEventType::NodeExecutionStatusUpdate,
        )
        .for_node(node.id.clone())
        .with_status(node.status);
        self.publish(ctx, event).await
    }
}

#[async_trait]
impl PlanStatusUpdateObserver for OrchestrationLogPublisher {
    fn name(&self) -> &str {
        "orchestration_log"
    }

    async fn on_plan_status_update(&self, plan: &PlanExecution, _previous_status: Status) -> Result<()> {
        let ctx = plan
            .metadata
            .iter()
            .fold(SendContext::for_plan(plan.id.clone()), |ctx, (key, value)| {
                ctx.with_log_context(key.clone(), value.clone())
            });
        let event = OrchestrationLogEvent::new(plan.id.clone(), OrchestrationEventType::PlanExecutionStatusUpdate)
            .with_status(plan.status);
        self.publish(ctx, event).await
    }
}
