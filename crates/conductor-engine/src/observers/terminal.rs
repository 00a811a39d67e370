use super::{NodeStatusUpdateObserver, NodeUpdateInfo};
use crate::interrupts::InterruptService;
use async_trait::async_trait;
use conductor_core::{InterruptState, Result};
use std::sync::Arc;
use tracing::debug;

/// Completes the RETRY interrupts recorded on a node once it finishes.
pub struct TerminalCleanupObserver {
    interrupts: Arc<InterruptService>,
}

impl TerminalCleanupObserver {
    pub fn new(interrupts: Arc<InterruptService>) -> Self {
        Self { interrupts }
    }
}

#[async_trait]
impl NodeStatusUpdateObserver for TerminalCleanupObserver {
    fn name(&self) -> &str {
        "terminal_cleanup"
    }

    async fn on_node_status_update(&self, info: &NodeUpdateInfo) -> Result<()> {
        if !info.status().is_final() {
            return Ok(());
        }
        for interrupt_id in info.node.retry_interrupt_ids() {
            if self
                .interrupts
                .mark_processed(interrupt_id, InterruptState::ProcessedSuccessfully)
                .await?
                .is_some()
            {
                debug!(
                    interrupt_id,
                    node_execution_id = %info.node.id,
                    "Retry interrupt completed"
                );
            }
        }
        Ok(())
    }
}
