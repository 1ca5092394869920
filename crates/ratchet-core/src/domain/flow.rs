use serde::{Deserialize, Serialize};

/// A registered, named unit of business logic referenced by flows.
///
/// The definition only names the capability; the executable itself is
/// resolved at runtime through the
/// [`TaskRegistry`](crate::application::registry::TaskRegistry).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDef {
    /// Unique task name, the registry lookup key
    pub name: String,

    /// Human-readable description, copied onto every task instance
    pub description: Option<String>,
}

/// One position in a flow: a task reference plus ordering and
/// failure-tolerance metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowTaskRef {
    /// The referenced task
    pub task: TaskDef,

    /// 1-based position in the flow
    pub order: u32,

    /// When true, a failure degrades the process to WARNING instead of
    /// ERROR and the step may later be retried
    #[serde(default)]
    pub allow_to_fail: bool,

    /// Disabled entries are skipped during execution but still count for
    /// order-contiguity validation
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl FlowTaskRef {
    /// Name of the referenced task
    #[inline]
    pub fn task_name(&self) -> &str {
        &self.task.name
    }
}

/// A static, named, ordered definition of tasks to execute.
///
/// Immutable once validation passes; the store contract guarantees
/// `tasks` is sorted by `order` on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    /// Unique flow name
    pub name: String,

    /// Ordered task references
    pub tasks: Vec<FlowTaskRef>,
}

impl Flow {
    /// Number of enabled task references. Fixed as `task_total_count` on
    /// every process created from this flow.
    pub fn enabled_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.enabled).count()
    }

    /// First enabled task reference in order, if any.
    pub fn first_enabled(&self) -> Option<&FlowTaskRef> {
        self.tasks.iter().find(|t| t.enabled)
    }

    /// Next enabled task reference after the given order, skipping forward
    /// through consecutive disabled entries. `None` when the chain is
    /// exhausted.
    pub fn next_enabled_after(&self, order: u32) -> Option<&FlowTaskRef> {
        let next = self.tasks.iter().find(|t| t.order == order + 1)?;

        if next.enabled {
            Some(next)
        } else {
            self.next_enabled_after(next.order)
        }
    }

    /// Find a task reference by task name.
    pub fn task_ref_by_name(&self, task_name: &str) -> Option<&FlowTaskRef> {
        self.tasks.iter().find(|t| t.task_name() == task_name)
    }

    /// Find a task reference by its order value.
    pub fn task_ref_by_order(&self, order: u32) -> Option<&FlowTaskRef> {
        self.tasks.iter().find(|t| t.order == order)
    }
}
