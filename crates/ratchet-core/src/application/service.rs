use crate::application::catalog::FlowCatalog;
use crate::application::processor::Processor;
use crate::application::registry::TaskRegistry;
use crate::bus::{EventConsumer, EventPublisher};
use crate::config::EngineConfig;
use crate::domain::event::EngineEvent;
use crate::domain::flow::Flow;
use crate::domain::process::{
    Process, ProcessContext, ProcessId, ProcessStatus, TaskInstanceId, TaskStatus,
};
use crate::domain::store::{FlowStore, ProcessStore};
use crate::EngineError;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// The engine's public facade.
///
/// Owns the event bus wiring: constructing a service spawns the single
/// event consumer task, so it must be created inside a tokio runtime.
/// All chain progression happens asynchronously on that task; the
/// methods here only create, read and nudge processes.
pub struct WorkflowService {
    flow_store: Arc<dyn FlowStore>,
    process_store: Arc<dyn ProcessStore>,
    catalog: FlowCatalog,
    processor: Arc<Processor>,
    publisher: EventPublisher,
}

impl WorkflowService {
    /// Wire up the engine over the given stores and task registry and
    /// spawn the event consumer.
    pub fn new(
        flow_store: Arc<dyn FlowStore>,
        process_store: Arc<dyn ProcessStore>,
        registry: Arc<TaskRegistry>,
    ) -> Self {
        let (publisher, engine_rx) = EventPublisher::new();

        let processor = Arc::new(Processor::new(
            process_store.clone(),
            flow_store.clone(),
            registry.clone(),
            publisher.clone(),
        ));

        let consumer = EventConsumer::new(
            engine_rx,
            processor.clone(),
            process_store.clone(),
            flow_store.clone(),
        );
        tokio::spawn(consumer.run());

        Self {
            catalog: FlowCatalog::new(flow_store.clone(), registry),
            flow_store,
            process_store,
            processor,
            publisher,
        }
    }

    /// Run the configured startup phases.
    ///
    /// Flow validation failures are fatal and should keep the host from
    /// serving traffic.
    pub async fn start_up(&self, config: &EngineConfig) -> Result<(), EngineError> {
        if config.validate_flows_on_startup {
            info!("Validating flows");
            self.catalog.validate_flows().await?;
        }

        if config.recover_processes_on_startup {
            info!("Recovering interrupted processes");
            self.processor.recover_interrupted_processes().await?;
        }

        if config.resume_processes_on_startup {
            // Accepted for configuration compatibility; interrupted
            // processes are repaired, never resumed
            debug!("resume_processes_on_startup is set but resuming is not supported");
        }

        Ok(())
    }

    /// Start a new process for a flow.
    ///
    /// Creates and persists the process in INIT, publishes StartProcess,
    /// then publishes StartTask for the first enabled flow task. The
    /// returned snapshot is the freshly created process; execution
    /// progresses asynchronously.
    pub async fn start(
        &self,
        flow_name: &str,
        context_data: serde_json::Value,
    ) -> Result<Process, EngineError> {
        let flow = self
            .flow_store
            .find_by_name(flow_name)
            .await?
            .ok_or_else(|| EngineError::FlowNotFound(flow_name.to_string()))?;

        let process = Process::new(
            flow_name,
            ProcessContext::new(context_data),
            flow.enabled_count() as u32,
        );
        self.process_store.save(&process).await?;

        info!(process_id = %process.id, flow = %flow.name, "Starting process");
        self.publisher
            .publish(EngineEvent::start_process(&flow.name, process.id));

        let first = flow.first_enabled().ok_or_else(|| {
            EngineError::Execution(format!(
                "no enabled flow task was found on flow [{flow_name}]"
            ))
        })?;
        self.publisher
            .publish(EngineEvent::start_task(&flow.name, first, process.id));

        Ok(process)
    }

    /// Fetch one process by id
    pub async fn get(&self, id: &ProcessId) -> Result<Process, EngineError> {
        self.process_store
            .find_by_id(id)
            .await?
            .ok_or_else(|| EngineError::ProcessNotFound(id.to_string()))
    }

    /// Fetch several processes; unknown ids are silently skipped
    pub async fn get_many(&self, ids: &[ProcessId]) -> Result<Vec<Process>, EngineError> {
        self.process_store.find_by_ids(ids).await
    }

    /// Force a process to the given status.
    ///
    /// An escape hatch for operators; no task instances are touched and
    /// no events are published.
    pub async fn update_status(
        &self,
        id: &ProcessId,
        status: ProcessStatus,
    ) -> Result<Process, EngineError> {
        let mut process = self.get(id).await?;

        info!(process_id = %process.id, from = ?process.status, to = ?status, "Updating process status");
        process.status = status;
        process.touch();
        self.process_store.save(&process).await?;

        Ok(process)
    }

    /// Retry one failed task instance.
    ///
    /// Allowed only for an ERROR instance of an allow-to-fail flow task.
    /// The process is moved back to IN_PROGRESS and a StartTask is
    /// published for the same flow task; the new execution supersedes the
    /// failed instance and reconciles the process status when it
    /// finishes. Returns the IN_PROGRESS snapshot.
    pub async fn retry(
        &self,
        process_id: &ProcessId,
        task_instance_id: &TaskInstanceId,
    ) -> Result<Process, EngineError> {
        let mut process = self.get(process_id).await?;

        let instance = process
            .instance_by_id(task_instance_id)
            .ok_or_else(|| EngineError::TaskInstanceNotFound(task_instance_id.to_string()))?;

        let flow = self
            .flow_store
            .find_by_name(&process.flow_name)
            .await?
            .ok_or_else(|| EngineError::FlowNotFound(process.flow_name.clone()))?;

        let flow_task = flow.task_ref_by_name(&instance.task_name).ok_or_else(|| {
            EngineError::Execution(format!(
                "task [{}] is not part of flow [{}]",
                instance.task_name, flow.name
            ))
        })?;

        if !flow_task.allow_to_fail {
            return Err(EngineError::RetryNotAllowed(format!(
                "cannot retry task [{}], not allowed to fail",
                instance.task_name
            )));
        }

        if instance.status != TaskStatus::Error {
            return Err(EngineError::RetryNotAllowed(format!(
                "can only retry an ERROR task, instance [{task_instance_id}] is {:?}",
                instance.status
            )));
        }

        info!(
            process_id = %process.id,
            task_instance_id = %task_instance_id,
            task = %flow_task.task_name(),
            "Retrying task instance"
        );

        process.status = ProcessStatus::InProgress;
        process.touch();
        self.process_store.save(&process).await?;

        self.publisher
            .publish(EngineEvent::start_task(&flow.name, flow_task, process.id));

        Ok(process)
    }

    /// All registered flows
    pub async fn get_flows(&self) -> Result<Vec<Flow>, EngineError> {
        self.flow_store.find_all().await
    }

    /// Fetch one flow by name
    pub async fn get_flow(&self, name: &str) -> Result<Flow, EngineError> {
        self.flow_store
            .find_by_name(name)
            .await?
            .ok_or_else(|| EngineError::FlowNotFound(name.to_string()))
    }

    /// Subscribe to a copy of every engine lifecycle event
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.publisher.subscribe()
    }
}
