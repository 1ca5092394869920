use crate::application::registry::TaskRegistry;
use crate::domain::flow::Flow;
use crate::domain::store::FlowStore;
use crate::EngineError;
use std::sync::Arc;
use tracing::info;

/// Validates the integrity of every registered flow.
///
/// Intended to run once at boot; a failure should prevent the host from
/// serving traffic. Validation is fail-fast: the first invalid flow
/// aborts the whole call.
pub struct FlowCatalog {
    flow_store: Arc<dyn FlowStore>,
    registry: Arc<TaskRegistry>,
}

impl FlowCatalog {
    /// Create a catalog over a flow store and task registry
    pub fn new(flow_store: Arc<dyn FlowStore>, registry: Arc<TaskRegistry>) -> Self {
        Self {
            flow_store,
            registry,
        }
    }

    /// Validate every registered flow: non-empty task list, contiguous
    /// 1-based order values, and resolvable task names.
    pub async fn validate_flows(&self) -> Result<(), EngineError> {
        let flows = self.flow_store.find_all().await?;

        for flow in &flows {
            info!(flow = %flow.name, "Validating flow");

            if flow.tasks.is_empty() {
                return Err(EngineError::Configuration(format!(
                    "flow [{}] has no flow task associated",
                    flow.name
                )));
            }

            Self::validate_task_order(flow)?;

            for flow_task in &flow.tasks {
                self.registry.resolve(flow_task.task_name()).map_err(|e| {
                    EngineError::Configuration(format!(
                        "task [{}] of flow [{}] is invalid: {e}",
                        flow_task.task_name(),
                        flow.name
                    ))
                })?;
            }
        }

        Ok(())
    }

    /// Order values over all task references (enabled or not) must be
    /// exactly the contiguous range `1..=count`.
    fn validate_task_order(flow: &Flow) -> Result<(), EngineError> {
        let orders: Vec<u32> = flow.tasks.iter().map(|t| t.order).collect();
        let count = orders.len() as u32;

        // Max-vs-count first: catches duplicates and gaps at the top
        let max = orders.iter().copied().max().unwrap_or(0);
        if max != count {
            return Err(EngineError::Configuration(format!(
                "the max value ({max}) of flow task order does not match the count of flow tasks ({count}) for flow {}",
                flow.name
            )));
        }

        // Then membership of every index: catches interior duplicates/gaps
        for i in 1..=count {
            if !orders.contains(&i) {
                return Err(EngineError::Configuration(format!(
                    "could not find flow task with order {i} for flow {}",
                    flow.name
                )));
            }
        }

        Ok(())
    }
}
