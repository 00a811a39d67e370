use super::{NodeStatusUpdateObserver, NodeUpdateInfo};
use crate::plan_service::PlanExecutionService;
use async_trait::async_trait;
use conductor_core::{Result, Status};
use std::sync::Arc;

/// A node waiting for approval puts the whole plan in `ApprovalWaiting`.
pub struct ApprovalWaitObserver {
    plans: Arc<PlanExecutionService>,
}

impl ApprovalWaitObserver {
    pub fn new(plans: Arc<PlanExecutionService>) -> Self {
        Self { plans }
    }
}

#[async_trait]
impl NodeStatusUpdateObserver for ApprovalWaitObserver {
    fn name(&self) -> &str {
        "approval_wait"
    }

    async fn on_node_status_update(&self, info: &NodeUpdateInfo) -> Result<()> {
        if info.status() != Status::ApprovalWaiting {
            return Ok(());
        }
        self.plans
            .update_status(info.plan_execution_id(), Status::ApprovalWaiting, &[])
            .await?;
        Ok(())
    }
}
