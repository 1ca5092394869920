//! Domain layer: the flow definition model, the process state machine,
//! engine events, and the store traits the engine persists through.

/// Flow definitions (static, validated configuration)
pub mod flow;

/// Process and task instance aggregates (runtime state)
pub mod process;

/// Engine lifecycle events
pub mod event;

/// Store traits and in-memory implementations
pub mod store;
