use super::{NodeStatusUpdateObserver, NodeUpdateInfo};
use crate::plan_service::PlanExecutionService;
use async_trait::async_trait;
use conductor_core::{Result, Status};
use std::sync::Arc;

/// Mirrors a node held back by the license limit onto a running plan.
pub struct LicenseLimitObserver {
    plans: Arc<PlanExecutionService>,
}

impl LicenseLimitObserver {
    pub fn new(plans: Arc<PlanExecutionService>) -> Self {
        Self { plans }
    }
}

#[async_trait]
impl NodeStatusUpdateObserver for LicenseLimitObserver {
    fn name(&self) -> &str {
        "license_limit"
    }

    async fn on_node_status_update(&self, info: &NodeUpdateInfo) -> Result<()> {
        if info.status() != Status::QueuedLicenseLimitReached {
            return Ok(());
        }
        self.plans
            .update_status(
                info.plan_execution_id(),
                Status::QueuedLicenseLimitReached,
                &[Status::Running],
            )
            .await?;
        Ok(())
    }
}
