//! Application services: task registry, flow validation, the execution
//! processor, and the public service facade.

/// Name-keyed registry of executable tasks
pub mod registry;

/// Flow catalog validation
pub mod catalog;

/// The execution engine state machine
pub mod processor;

/// Public service facade
pub mod service;
