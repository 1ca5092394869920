//! Store traits for the Ratchet engine.
//!
//! The engine persists all state through these traits; embedders can
//! implement them over any backing store. Implementations must apply the
//! writes issued by one `Processor::execute` call atomically, so a crash
//! never leaves a task instance and its process half-updated.

use async_trait::async_trait;

use super::flow::Flow;
use super::process::{Process, ProcessContext, ProcessId, ProcessStatus, TaskInstance};
use crate::EngineError;

/// Store for flow definitions
#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Find a flow by name, tasks ordered by `order`
    async fn find_by_name(&self, name: &str) -> Result<Option<Flow>, EngineError>;

    /// All registered flows
    async fn find_all(&self) -> Result<Vec<Flow>, EngineError>;

    /// Save a flow definition
    async fn save(&self, flow: &Flow) -> Result<(), EngineError>;
}

/// Store for processes and their task instances
#[async_trait]
pub trait ProcessStore: Send + Sync {
    /// Find a process by id, task instances ordered by creation time
    async fn find_by_id(&self, id: &ProcessId) -> Result<Option<Process>, EngineError>;

    /// All processes with the given status
    async fn find_by_status(&self, status: ProcessStatus) -> Result<Vec<Process>, EngineError>;

    /// Processes for the given ids, in the order the ids were given
    async fn find_by_ids(&self, ids: &[ProcessId]) -> Result<Vec<Process>, EngineError>;

    /// Save a process (including its embedded task instances and context)
    async fn save(&self, process: &Process) -> Result<(), EngineError>;

    /// Save several processes in one batch
    async fn save_all(&self, processes: &[Process]) -> Result<(), EngineError>;

    /// Save one task instance of an already-saved process
    async fn save_task_instance(&self, instance: &TaskInstance) -> Result<(), EngineError>;

    /// Save the context blob of an already-saved process
    async fn save_context(
        &self,
        process_id: &ProcessId,
        context: &ProcessContext,
    ) -> Result<(), EngineError>;
}

/// In-memory implementations for testing and stateless embedding
#[cfg(feature = "testing")]
pub mod memory {
    use super::*;
    use dashmap::DashMap;
    use std::sync::Arc;
    use uuid::Uuid;

    /// In-memory flow store. Sorts tasks by order on save so reads honor
    /// the ordering contract.
    pub struct MemoryFlowStore {
        flows: Arc<DashMap<String, Flow>>,
    }

    impl MemoryFlowStore {
        /// Create an empty flow store
        pub fn new() -> Self {
            Self {
                flows: Arc::new(DashMap::new()),
            }
        }
    }

    impl Default for MemoryFlowStore {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl FlowStore for MemoryFlowStore {
        async fn find_by_name(&self, name: &str) -> Result<Option<Flow>, EngineError> {
            Ok(self.flows.get(name).map(|flow| flow.clone()))
        }

        async fn find_all(&self) -> Result<Vec<Flow>, EngineError> {
            Ok(self.flows.iter().map(|entry| entry.clone()).collect())
        }

        async fn save(&self, flow: &Flow) -> Result<(), EngineError> {
            let mut flow = flow.clone();
            flow.tasks.sort_by_key(|t| t.order);
            self.flows.insert(flow.name.clone(), flow);
            Ok(())
        }
    }

    /// In-memory process store. Each process is one map entry holding the
    /// whole aggregate, so the writes of one execute call land together.
    pub struct MemoryProcessStore {
        processes: Arc<DashMap<Uuid, Process>>,
    }

    impl MemoryProcessStore {
        /// Create an empty process store
        pub fn new() -> Self {
            Self {
                processes: Arc::new(DashMap::new()),
            }
        }
    }

    impl Default for MemoryProcessStore {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ProcessStore for MemoryProcessStore {
        async fn find_by_id(&self, id: &ProcessId) -> Result<Option<Process>, EngineError> {
            Ok(self.processes.get(&id.0).map(|process| process.clone()))
        }

        async fn find_by_status(
            &self,
            status: ProcessStatus,
        ) -> Result<Vec<Process>, EngineError> {
            Ok(self
                .processes
                .iter()
                .filter(|entry| entry.status == status)
                .map(|entry| entry.clone())
                .collect())
        }

        async fn find_by_ids(&self, ids: &[ProcessId]) -> Result<Vec<Process>, EngineError> {
            Ok(ids
                .iter()
                .filter_map(|id| self.processes.get(&id.0).map(|process| process.clone()))
                .collect())
        }

        async fn save(&self, process: &Process) -> Result<(), EngineError> {
            self.processes.insert(process.id.0, process.clone());
            Ok(())
        }

        async fn save_all(&self, processes: &[Process]) -> Result<(), EngineError> {
            for process in processes {
                self.processes.insert(process.id.0, process.clone());
            }
            Ok(())
        }

        async fn save_task_instance(&self, instance: &TaskInstance) -> Result<(), EngineError> {
            let mut entry = self.processes.get_mut(&instance.process_id.0).ok_or_else(|| {
                EngineError::Store(format!(
                    "cannot save task instance for unknown process {}",
                    instance.process_id
                ))
            })?;

            match entry
                .task_instances
                .iter_mut()
                .find(|ti| ti.id == instance.id)
            {
                Some(existing) => *existing = instance.clone(),
                None => entry.task_instances.push(instance.clone()),
            }

            Ok(())
        }

        async fn save_context(
            &self,
            process_id: &ProcessId,
            context: &ProcessContext,
        ) -> Result<(), EngineError> {
            let mut entry = self.processes.get_mut(&process_id.0).ok_or_else(|| {
                EngineError::Store(format!(
                    "cannot save context for unknown process {process_id}"
                ))
            })?;

            entry.context = context.clone();
            Ok(())
        }
    }

}
