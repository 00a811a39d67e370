use super::{NodeStatusUpdateObserver, NodeUpdateInfo};
use crate::node_service::NodeExecutionService;
use crate::plan_service::PlanExecutionService;
use async_trait::async_trait;
use conductor_core::status::PAUSABLE_STATUSES;
use conductor_core::{Result, Status};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Bubbles a pause up the tree: a parent pauses once none of its children is
/// still progressing.
///
/// The parent transition goes through the node service, so it reaches this
/// observer again for the next level up.
pub struct PauseObserver {
    nodes: Weak<NodeExecutionService>,
    plans: Arc<PlanExecutionService>,
}

impl PauseObserver {
    pub fn new(nodes: Weak<NodeExecutionService>, plans: Arc<PlanExecutionService>) -> Self {
        Self { nodes, plans }
    }
}

#[async_trait]
impl NodeStatusUpdateObserver for PauseObserver {
    fn name(&self) -> &str {
        "pause"
    }

    async fn on_node_status_update(&self, info: &NodeUpdateInfo) -> Result<()> {
        if info.status() != Status::Paused {
            return Ok(());
        }
        let plan_execution_id = info.plan_execution_id();

        if let (Some(parent_id), Some(nodes)) = (info.node.parent_id.as_deref(), self.nodes.upgrade()) {
            let children = nodes.fetch_children(parent_id).await?;
            if children.iter().all(|child| !child.status.is_unpausable()) {
                let paused = nodes
                    .update_status(parent_id, Status::Paused, PAUSABLE_STATUSES)
                    .await?;
                debug!(
                    plan_execution_id,
                    parent_id,
                    paused = paused.is_some(),
                    "All children paused"
                );
            }
        }

        self.plans.update_calculated_status(plan_execution_id).await?;
        Ok(())
    }
}
