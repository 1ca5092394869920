use crate::domain::flow::TaskDef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Value object: Process ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessId(pub Uuid);

impl ProcessId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Value object: Task instance ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskInstanceId(pub Uuid);

impl TaskInstanceId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskInstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Value object: Context ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(pub Uuid);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Process status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessStatus {
    /// Process created, no task started yet
    Init,

    /// At least one task instance has started
    InProgress,

    /// Chain completed with no unrecovered failure
    Success,

    /// An allow-to-fail task failed and was never retried to success
    Warning,

    /// A non-allow-to-fail task failed, or startup recovery forced it
    Error,
}

impl ProcessStatus {
    /// A process is "open" while a task failure may still change its
    /// status: Init, InProgress or Warning.
    #[inline]
    pub fn is_open(self) -> bool {
        matches!(
            self,
            ProcessStatus::Init | ProcessStatus::InProgress | ProcessStatus::Warning
        )
    }
}

/// Task instance status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Task code is currently running
    InProgress,

    /// Task code returned without failure
    Success,

    /// Task code failed
    Error,

    /// Superseded by a newer instance with the same task name
    Retried,
}

/// The opaque, caller-owned context blob carried by a process.
///
/// Exclusively owned by its process and mutated only by task code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessContext {
    /// Unique identifier
    pub id: ContextId,

    /// Arbitrary caller data
    pub data: serde_json::Value,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl ProcessContext {
    /// Create a new context around caller data
    pub fn new(data: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: ContextId(Uuid::new_v4()),
            data,
            created_at: now,
            updated_at: now,
        }
    }

    /// Get the inner value
    #[inline]
    pub fn as_value(&self) -> &serde_json::Value {
        &self.data
    }

    /// Get a mutable reference to the inner value
    #[inline]
    pub fn as_value_mut(&mut self) -> &mut serde_json::Value {
        self.updated_at = Utc::now();
        &mut self.data
    }
}

/// The record of one execution attempt of one task within a process.
///
/// Created IN_PROGRESS and carried to SUCCESS or ERROR; an ERROR instance
/// may later be marked RETRIED when a newer instance supersedes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInstance {
    /// Unique identifier
    pub id: TaskInstanceId,

    /// Owning process (plain foreign key, no back-pointer)
    pub process_id: ProcessId,

    /// Name of the executed task
    pub task_name: String,

    /// Current status
    pub status: TaskStatus,

    /// Failure message when status is Error
    pub error: Option<String>,

    /// Description copied from the task definition at creation
    pub task_description: Option<String>,

    /// Creation timestamp; defines the significant instance ordering
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl TaskInstance {
    /// Create a new IN_PROGRESS instance for a task within a process
    pub fn new(process_id: ProcessId, task: &TaskDef) -> Self {
        let now = Utc::now();
        Self {
            id: TaskInstanceId::new(),
            process_id,
            task_name: task.name.clone(),
            status: TaskStatus::InProgress,
            error: None,
            task_description: task.description.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Move the instance to a terminal or superseded status
    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Aggregate: one running or completed execution of a flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Process {
    /// Unique identifier
    pub id: ProcessId,

    /// Name of the flow this process executes
    pub flow_name: String,

    /// Current status
    pub status: ProcessStatus,

    /// Count of enabled task references at creation time, fixed
    pub task_total_count: u32,

    /// Count of task instances that ended in success
    pub task_success_count: u32,

    /// Count of task instances that ended in error and were not
    /// successfully retried
    pub task_error_count: u32,

    /// Task instances in creation order
    pub task_instances: Vec<TaskInstance>,

    /// Caller-owned context blob
    pub context: ProcessContext,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl Process {
    /// Create a new INIT process for a flow
    pub fn new(flow_name: &str, context: ProcessContext, task_total_count: u32) -> Self {
        let now = Utc::now();
        Self {
            id: ProcessId::new(),
            flow_name: flow_name.to_string(),
            status: ProcessStatus::Init,
            task_total_count,
            task_success_count: 0,
            task_error_count: 0,
            task_instances: Vec::new(),
            context,
            created_at: now,
            updated_at: now,
        }
    }

    /// Update the timestamp
    #[inline]
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// True when every task instance is Success or Retried
    pub fn all_settled_success(&self) -> bool {
        self.task_instances
            .iter()
            .all(|ti| matches!(ti.status, TaskStatus::Success | TaskStatus::Retried))
    }

    /// Index of the ERROR instance for a task name, if one exists.
    /// At most one such instance is expected at any time.
    pub fn error_instance_index(&self, task_name: &str) -> Option<usize> {
        self.task_instances
            .iter()
            .position(|ti| ti.task_name == task_name && ti.status == TaskStatus::Error)
    }

    /// Index of the (expected-unique) IN_PROGRESS instance, if any
    pub fn in_progress_instance_index(&self) -> Option<usize> {
        self.task_instances
            .iter()
            .position(|ti| ti.status == TaskStatus::InProgress)
    }

    /// Find an instance by id
    pub fn instance_by_id(&self, id: &TaskInstanceId) -> Option<&TaskInstance> {
        self.task_instances.iter().find(|ti| ti.id == *id)
    }
}
