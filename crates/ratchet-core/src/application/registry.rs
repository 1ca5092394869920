use crate::{EngineError, Task};
use std::collections::HashMap;
use std::sync::Arc;

/// Name-keyed, case-insensitive table of executable tasks.
///
/// Populated by the host application at boot through explicit
/// [`register`](TaskRegistry::register) calls; flows refer to tasks by
/// name only.
pub struct TaskRegistry {
    tasks: HashMap<String, Arc<dyn Task>>,
}

impl TaskRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
        }
    }

    /// Register a task under its own name. A task registered twice under
    /// the same (case-folded) name replaces the earlier entry.
    pub fn register(&mut self, task: Arc<dyn Task>) {
        self.tasks.insert(task.name().to_lowercase(), task);
    }

    /// Resolve a task name to its executable
    pub fn resolve(&self, task_name: &str) -> Result<Arc<dyn Task>, EngineError> {
        self.tasks
            .get(&task_name.to_lowercase())
            .cloned()
            .ok_or_else(|| EngineError::Configuration(format!("could not load task [{task_name}]")))
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
