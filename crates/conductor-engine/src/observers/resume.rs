use super::{NodeStatusUpdateObserver, NodeUpdateInfo};
use crate::node_service::NodeExecutionService;
use crate::plan_service::PlanExecutionService;
use async_trait::async_trait;
use conductor_core::{Result, Status};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Bubbles a resume up the tree and hands the plan back to the execution loop.
///
/// Each ancestor moves `Paused -> Running` through the node service, which
/// re-enters this observer for the level above. The walk only continues past
/// an ancestor that needed no resuming while the plan waits for input.
pub struct ResumeObserver {
    nodes: Weak<NodeExecutionService>,
    plans: Arc<PlanExecutionService>,
}

impl ResumeObserver {
    pub fn new(nodes: Weak<NodeExecutionService>, plans: Arc<PlanExecutionService>) -> Self {
        Self { nodes, plans }
    }
}

#[async_trait]
impl NodeStatusUpdateObserver for ResumeObserver {
    fn name(&self) -> &str {
        "resume"
    }

    async fn on_node_status_update(&self, info: &NodeUpdateInfo) -> Result<()> {
        if info.status() != Status::Running || !info.previous_status.is_suspended() {
            return Ok(());
        }
        let Some(nodes) = self.nodes.upgrade() else {
            return Ok(());
        };
        let plan_execution_id = info.plan_execution_id();

        let mut parent_id = info.node.parent_id.clone();
        while let Some(current) = parent_id {
            if nodes
                .update_status(&current, Status::Running, &[Status::Paused])
                .await?
                .is_some()
            {
                return Ok(());
            }
            if self.plans.get_status(plan_execution_id).await? != Status::InputWaiting {
                debug!(plan_execution_id, node_execution_id = %current, "Ancestor already active, stopping resume walk");
                return Ok(());
            }
            parent_id = nodes.get(&current).await?.parent_id;
        }

        self.plans
            .update_status(plan_execution_id, Status::Queued, &[])
            .await?;
        Ok(())
    }
}
