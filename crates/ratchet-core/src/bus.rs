//! In-process event bus.
//!
//! Engine lifecycle events flow over an unbounded mpsc channel into a
//! single consumer loop that drives chain continuation. A broadcast
//! channel carries a copy of every event to external observers, which
//! can never slow down or fail the engine.

use crate::application::processor::Processor;
use crate::domain::event::{EngineEvent, EventKind, FlowTaskPointer};
use crate::domain::flow::Flow;
use crate::domain::process::{Process, ProcessId};
use crate::domain::store::{FlowStore, ProcessStore};
use crate::EngineError;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, warn};

/// Capacity of the observer broadcast channel. Observers that fall this
/// far behind lose the oldest events, never block the engine.
const OBSERVER_CHANNEL_CAPACITY: usize = 256;

/// Publishes engine lifecycle events.
///
/// Cheap to clone; every clone feeds the same consumer loop and the same
/// observer broadcast.
#[derive(Clone)]
pub struct EventPublisher {
    engine_tx: mpsc::UnboundedSender<EngineEvent>,
    observer_tx: broadcast::Sender<EngineEvent>,
}

impl EventPublisher {
    /// Create a publisher and the receiving end of the engine channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let (observer_tx, _) = broadcast::channel(OBSERVER_CHANNEL_CAPACITY);

        (
            Self {
                engine_tx,
                observer_tx,
            },
            engine_rx,
        )
    }

    /// Publish an event to the consumer loop and to any observers.
    ///
    /// Publishing never fails: a closed engine channel is logged and the
    /// event dropped, and a lagging or absent observer is ignored.
    pub fn publish(&self, event: EngineEvent) {
        debug!(kind = ?event.kind, process_id = ?event.process_id, "Publishing event");

        // No receiver means no observers are subscribed, which is fine
        let _ = self.observer_tx.send(event.clone());

        if self.engine_tx.send(event).is_err() {
            warn!("Event consumer is gone; dropping event");
        }
    }

    /// Subscribe to a copy of every published event
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.observer_tx.subscribe()
    }
}

/// The single consumer of the engine event channel.
///
/// Reacts to StartTask events by executing the named flow task; all other
/// kinds are observer-only. One malformed or failing event is logged and
/// skipped, the loop itself only exits when every publisher is dropped.
pub struct EventConsumer {
    engine_rx: mpsc::UnboundedReceiver<EngineEvent>,
    processor: Arc<Processor>,
    process_store: Arc<dyn ProcessStore>,
    flow_store: Arc<dyn FlowStore>,
}

impl EventConsumer {
    /// Create a consumer over the engine channel
    pub fn new(
        engine_rx: mpsc::UnboundedReceiver<EngineEvent>,
        processor: Arc<Processor>,
        process_store: Arc<dyn ProcessStore>,
        flow_store: Arc<dyn FlowStore>,
    ) -> Self {
        Self {
            engine_rx,
            processor,
            process_store,
            flow_store,
        }
    }

    /// Drive the consumer loop to completion
    pub async fn run(mut self) {
        while let Some(event) = self.engine_rx.recv().await {
            if event.kind != EventKind::StartTask {
                continue;
            }

            if let Err(e) = self.handle_start_task(&event).await {
                error!(error = %e, "Failed to handle StartTask event");
            }
        }

        debug!("Event consumer stopped");
    }

    async fn handle_start_task(&self, event: &EngineEvent) -> Result<(), EngineError> {
        let (process, flow, order) = self.validate_start_task(event).await?;

        let flow_task = flow.task_ref_by_order(order).ok_or_else(|| {
            EngineError::InvalidEvent(format!(
                "no flow task with order {order} on flow [{}]",
                flow.name
            ))
        })?;

        self.processor.execute(&flow, flow_task, process).await
    }

    /// Check the payload a StartTask event must carry and load the
    /// entities it points at.
    async fn validate_start_task(
        &self,
        event: &EngineEvent,
    ) -> Result<(Process, Flow, u32), EngineError> {
        let process_id: ProcessId = event
            .process_id
            .ok_or_else(|| EngineError::InvalidEvent("StartTask event without process id".into()))?;

        let pointer: &FlowTaskPointer = event.flow_task.as_ref().ok_or_else(|| {
            EngineError::InvalidEvent("StartTask event without flow task pointer".into())
        })?;

        let process = self
            .process_store
            .find_by_id(&process_id)
            .await?
            .ok_or_else(|| EngineError::ProcessNotFound(process_id.to_string()))?;

        let flow = self
            .flow_store
            .find_by_name(&pointer.flow_name)
            .await?
            .ok_or_else(|| EngineError::FlowNotFound(pointer.flow_name.clone()))?;

        Ok((process, flow, pointer.order))
    }
}
