use crate::graph::GraphGenerationService;
use conductor_core::config::ConsumerConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Runs graph regeneration off the consumer's hot path on a bounded pool.
pub struct GraphUpdateDispatcher {
    graphs: Arc<GraphGenerationService>,
    semaphore: Arc<Semaphore>,
    delay_warn_threshold: Duration,
}

impl GraphUpdateDispatcher {
    pub fn new(graphs: Arc<GraphGenerationService>, max_concurrent: usize, delay_warn_threshold: Duration) -> Self {
        Self {
            graphs,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            delay_warn_threshold,
        }
    }

    pub fn from_config(graphs: Arc<GraphGenerationService>, config: &ConsumerConfig) -> Self {
        Self::new(graphs, config.max_concurrent_dispatches, config.scheduling_delay_warn())
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Waits for pool capacity, then regenerates the plan's graph in the background.
    ///
    /// Returns `None` if the pool has been closed.
    pub async fn dispatch(&self, plan_execution_id: String) -> Option<JoinHandle<()>> {
        let submitted_at = Instant::now();
        let permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                error!(plan_execution_id = %plan_execution_id, error = %e, "Dispatch pool closed");
                return None;
            }
        };

        let graphs = self.graphs.clone();
        let threshold = self.delay_warn_threshold;
        Some(tokio::spawn(async move {
            let _permit = permit;
            let delay = submitted_at.elapsed();
            if delay > threshold {
                warn!(
                    plan_execution_id = %plan_execution_id,
                    delay_ms = delay.as_millis() as u64,
                    "Graph update scheduled late"
                );
            }
            match graphs.generate_graph(&plan_execution_id).await {
                Ok(graph) => debug!(
                    plan_execution_id = %plan_execution_id,
                    watermark = graph.cache_context_order,
                    "Graph update dispatched"
                ),
                Err(e) => error!(plan_execution_id = %plan_execution_id, error = %e, "Graph update failed"),
            }
        }))
    }

    pub fn close(&self) {
        self.semaphore.close();
    }
}
