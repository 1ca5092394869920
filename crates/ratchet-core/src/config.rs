use serde::Deserialize;

/// Startup toggles for an embedded engine.
///
/// Each toggle maps to one action run once by
/// [`WorkflowService::start_up`](crate::application::service::WorkflowService::start_up).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Validate every registered flow before serving traffic.
    pub validate_flows_on_startup: bool,

    /// Repair processes left IN_PROGRESS by a previous crash.
    pub recover_processes_on_startup: bool,

    /// Reserved for future resume-after-restart behavior. Currently a no-op.
    pub resume_processes_on_startup: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            validate_flows_on_startup: true,
            recover_processes_on_startup: false,
            resume_processes_on_startup: false,
        }
    }
}
