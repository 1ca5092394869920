//! Ratchet: an embeddable sequential workflow engine.
//!
//! A *flow* is a named, ordered chain of task references. Starting a flow
//! creates a *process* that executes the chain one task at a time, driven
//! by events on an in-process bus. Each execution attempt is recorded as a
//! *task instance*; a task marked allow-to-fail degrades its process to
//! WARNING instead of halting it, and a failed instance can be retried
//! manually. Processes interrupted by a crash are repaired at startup.
//!
//! The engine owns no storage and no task code. Embedders implement the
//! [`domain::store`] traits over their database, implement [`Task`] for
//! each unit of work, and drive everything through [`WorkflowService`].
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use ratchet_core::application::registry::TaskRegistry;
//! use ratchet_core::domain::flow::{Flow, FlowTaskRef, TaskDef};
//! use ratchet_core::domain::process::ProcessContext;
//! use ratchet_core::domain::store::memory::{MemoryFlowStore, MemoryProcessStore};
//! use ratchet_core::domain::store::FlowStore;
//! use ratchet_core::{Task, WorkflowService};
//!
//! struct Greet;
//!
//! #[async_trait]
//! impl Task for Greet {
//!     fn name(&self) -> &str {
//!         "greet"
//!     }
//!
//!     async fn execute(&self, context: &mut ProcessContext) -> anyhow::Result<()> {
//!         context.as_value_mut()["greeting"] = "hello".into();
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let flow_store = Arc::new(MemoryFlowStore::new());
//!     flow_store
//!         .save(&Flow {
//!             name: "hello".to_string(),
//!             tasks: vec![FlowTaskRef {
//!                 task: TaskDef {
//!                     name: "greet".to_string(),
//!                     description: None,
//!                 },
//!                 order: 1,
//!                 allow_to_fail: false,
//!                 enabled: true,
//!             }],
//!         })
//!         .await?;
//!
//!     let mut registry = TaskRegistry::new();
//!     registry.register(Arc::new(Greet));
//!
//!     let service = WorkflowService::new(
//!         flow_store,
//!         Arc::new(MemoryProcessStore::new()),
//!         Arc::new(registry),
//!     );
//!
//!     let process = service.start("hello", serde_json::json!({})).await?;
//!     println!("started process {}", process.id);
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;

/// Domain model: flows, processes, events and store traits
pub mod domain;

/// Application services built on the domain model
pub mod application;

/// In-process event bus
pub mod bus;

/// Engine configuration
pub mod config;

/// Error types
pub mod error;

pub use application::service::WorkflowService;
pub use config::EngineConfig;
pub use domain::event::{EngineEvent, EventKind};
pub use domain::flow::{Flow, FlowTaskRef, TaskDef};
pub use domain::process::{
    ContextId, Process, ProcessContext, ProcessId, ProcessStatus, TaskInstance, TaskInstanceId,
    TaskStatus,
};
pub use error::EngineError;

/// A unit of executable work, registered by name.
///
/// Implementations receive exclusive access to the process context and may
/// mutate it; the engine persists the context after every attempt. Any
/// error (or panic) returned from [`execute`](Task::execute) marks the
/// task instance as failed and never propagates further.
#[async_trait]
pub trait Task: Send + Sync {
    /// The unique, case-insensitive name flows refer to this task by
    fn name(&self) -> &str;

    /// Optional human-readable description
    fn description(&self) -> Option<&str> {
        None
    }

    /// Run the task against the process context
    async fn execute(&self, context: &mut ProcessContext) -> anyhow::Result<()>;
}

impl std::fmt::Debug for dyn Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").field("name", &self.name()).finish()
    }
}
