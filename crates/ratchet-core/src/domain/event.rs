use crate::domain::flow::FlowTaskRef;
use crate::domain::process::{ProcessId, TaskInstanceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The four engine lifecycle event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// A flow task should start executing on a process
    StartTask,

    /// A task instance reached a terminal status
    EndTask,

    /// A process was created and its chain is about to start
    StartProcess,

    /// A process reached its final status
    EndProcess,
}

/// Names one [`FlowTaskRef`] by foreign key: the owning flow's name plus
/// the task's order within it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowTaskPointer {
    /// Name of the flow owning the task reference
    pub flow_name: String,

    /// Order of the task reference within the flow
    pub order: u32,
}

/// One engine lifecycle event.
///
/// Payload fields are optional so a consumer can reject a malformed event
/// with a dedicated error instead of crashing; the constructors below fill
/// in what each kind requires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    /// What happened
    pub kind: EventKind,

    /// The process this event concerns
    pub process_id: Option<ProcessId>,

    /// The flow this event concerns (process-level events)
    pub flow_name: Option<String>,

    /// The flow task this event concerns (task-level events)
    pub flow_task: Option<FlowTaskPointer>,

    /// The task instance this event concerns (EndTask)
    pub task_instance_id: Option<TaskInstanceId>,

    /// When the event was published
    pub timestamp: DateTime<Utc>,
}

impl EngineEvent {
    fn new(kind: EventKind) -> Self {
        Self {
            kind,
            process_id: None,
            flow_name: None,
            flow_task: None,
            task_instance_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Event: start executing a flow task on a process
    pub fn start_task(flow_name: &str, flow_task: &FlowTaskRef, process_id: ProcessId) -> Self {
        Self {
            process_id: Some(process_id),
            flow_task: Some(FlowTaskPointer {
                flow_name: flow_name.to_string(),
                order: flow_task.order,
            }),
            ..Self::new(EventKind::StartTask)
        }
    }

    /// Event: a task instance finished (terminal status reached)
    pub fn end_task(
        flow_name: &str,
        flow_task: &FlowTaskRef,
        process_id: ProcessId,
        task_instance_id: TaskInstanceId,
    ) -> Self {
        Self {
            process_id: Some(process_id),
            flow_task: Some(FlowTaskPointer {
                flow_name: flow_name.to_string(),
                order: flow_task.order,
            }),
            task_instance_id: Some(task_instance_id),
            ..Self::new(EventKind::EndTask)
        }
    }

    /// Event: a process was created for a flow
    pub fn start_process(flow_name: &str, process_id: ProcessId) -> Self {
        Self {
            process_id: Some(process_id),
            flow_name: Some(flow_name.to_string()),
            ..Self::new(EventKind::StartProcess)
        }
    }

    /// Event: a process reached its final status
    pub fn end_process(process_id: ProcessId) -> Self {
        Self {
            process_id: Some(process_id),
            ..Self::new(EventKind::EndProcess)
        }
    }
}
