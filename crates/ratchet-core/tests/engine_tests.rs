//! End-to-end engine tests over the in-memory stores.
//!
//! Execution is asynchronous, so tests subscribe to the event bus before
//! acting and wait for the events that mark completion instead of
//! sleeping.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::timeout;

use ratchet_core::application::registry::TaskRegistry;
use ratchet_core::bus::{EventConsumer, EventPublisher};
use ratchet_core::domain::process::ProcessContext;
use ratchet_core::domain::store::memory::{MemoryFlowStore, MemoryProcessStore};
use ratchet_core::domain::store::{FlowStore, ProcessStore};
use ratchet_core::{
    EngineConfig, EngineEvent, EventKind, Flow, FlowTaskRef, Process, ProcessStatus, Task,
    TaskDef, TaskStatus, WorkflowService,
};

const WAIT: Duration = Duration::from_secs(5);

/// Appends its own name to the `trail` array in the context.
struct RecordingTask(&'static str);

#[async_trait]
impl Task for RecordingTask {
    fn name(&self) -> &str {
        self.0
    }

    async fn execute(&self, context: &mut ProcessContext) -> anyhow::Result<()> {
        context.as_value_mut()["trail"]
            .as_array_mut()
            .expect("context must carry a trail array")
            .push(json!(self.0));
        Ok(())
    }
}

struct FailingTask(&'static str);

#[async_trait]
impl Task for FailingTask {
    fn name(&self) -> &str {
        self.0
    }

    async fn execute(&self, _context: &mut ProcessContext) -> anyhow::Result<()> {
        anyhow::bail!("{} refused to run", self.0)
    }
}

/// Fails the first `failures` executions, succeeds afterwards.
struct FlakyTask {
    name: &'static str,
    failures: u32,
    calls: AtomicU32,
}

impl FlakyTask {
    fn new(name: &'static str, failures: u32) -> Self {
        Self {
            name,
            failures,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Task for FlakyTask {
    fn name(&self) -> &str {
        self.name
    }

    async fn execute(&self, _context: &mut ProcessContext) -> anyhow::Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            anyhow::bail!("{} failed on attempt {}", self.name, call + 1)
        }
        Ok(())
    }
}

fn task_ref(name: &str, order: u32, allow_to_fail: bool, enabled: bool) -> FlowTaskRef {
    FlowTaskRef {
        task: TaskDef {
            name: name.to_string(),
            description: None,
        },
        order,
        allow_to_fail,
        enabled,
    }
}

struct Engine {
    service: WorkflowService,
    flow_store: Arc<MemoryFlowStore>,
    process_store: Arc<MemoryProcessStore>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn engine(flow: Flow, tasks: Vec<Arc<dyn Task>>) -> Engine {
    init_tracing();
    let flow_store = Arc::new(MemoryFlowStore::new());
    flow_store.save(&flow).await.unwrap();
    let process_store = Arc::new(MemoryProcessStore::new());

    let mut registry = TaskRegistry::new();
    for task in tasks {
        registry.register(task);
    }

    let service = WorkflowService::new(
        flow_store.clone(),
        process_store.clone(),
        Arc::new(registry),
    );

    Engine {
        service,
        flow_store,
        process_store,
    }
}

/// Collect events until EndProcess arrives.
async fn events_until_end(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    loop {
        let event = timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for EndProcess")
            .expect("event channel closed");
        let kind = event.kind;
        events.push(event);
        if kind == EventKind::EndProcess {
            return events;
        }
    }
}

/// Wait for the next EndTask event and return it.
async fn next_end_task(rx: &mut broadcast::Receiver<EngineEvent>) -> EngineEvent {
    loop {
        let event = timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for EndTask")
            .expect("event channel closed");
        if event.kind == EventKind::EndTask {
            return event;
        }
    }
}

/// Assert the chain has gone quiet: no further event of any kind arrives.
async fn assert_chain_idle(rx: &mut broadcast::Receiver<EngineEvent>) {
    tokio::time::sleep(Duration::from_millis(100)).await;
    loop {
        match rx.try_recv() {
            Ok(event) => panic!("unexpected event after chain should be idle: {:?}", event.kind),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => return,
        }
    }
}

fn kinds(events: &[EngineEvent]) -> Vec<EventKind> {
    events.iter().map(|e| e.kind).collect()
}

#[tokio::test]
async fn test_happy_path_runs_all_tasks_in_order() {
    let flow = Flow {
        name: "happy".to_string(),
        tasks: vec![
            task_ref("a", 1, false, true),
            task_ref("b", 2, false, true),
            task_ref("c", 3, false, true),
        ],
    };
    let engine = engine(
        flow,
        vec![
            Arc::new(RecordingTask("a")),
            Arc::new(RecordingTask("b")),
            Arc::new(RecordingTask("c")),
        ],
    )
    .await;

    let mut rx = engine.service.subscribe();
    let started = engine
        .service
        .start("happy", json!({"trail": []}))
        .await
        .unwrap();
    assert_eq!(started.status, ProcessStatus::Init);

    let events = events_until_end(&mut rx).await;
    assert_eq!(
        kinds(&events),
        vec![
            EventKind::StartProcess,
            EventKind::StartTask,
            EventKind::EndTask,
            EventKind::StartTask,
            EventKind::EndTask,
            EventKind::StartTask,
            EventKind::EndTask,
            EventKind::EndProcess,
        ]
    );

    let process = engine.service.get(&started.id).await.unwrap();
    assert_eq!(process.status, ProcessStatus::Success);
    assert_eq!(process.task_total_count, 3);
    assert_eq!(process.task_success_count, 3);
    assert_eq!(process.task_error_count, 0);
    assert_eq!(process.task_instances.len(), 3);
    assert!(process
        .task_instances
        .iter()
        .all(|ti| ti.status == TaskStatus::Success));
    assert_eq!(process.context.as_value()["trail"], json!(["a", "b", "c"]));
}

#[tokio::test]
async fn test_allow_to_fail_failure_degrades_to_warning_and_continues() {
    let flow = Flow {
        name: "tolerant".to_string(),
        tasks: vec![
            task_ref("a", 1, false, true),
            task_ref("flaky", 2, true, true),
            task_ref("c", 3, false, true),
        ],
    };
    let engine = engine(
        flow,
        vec![
            Arc::new(RecordingTask("a")),
            Arc::new(FailingTask("flaky")),
            Arc::new(RecordingTask("c")),
        ],
    )
    .await;

    let mut rx = engine.service.subscribe();
    let started = engine
        .service
        .start("tolerant", json!({"trail": []}))
        .await
        .unwrap();
    events_until_end(&mut rx).await;

    let process = engine.service.get(&started.id).await.unwrap();
    assert_eq!(process.status, ProcessStatus::Warning);
    assert_eq!(process.task_success_count, 2);
    assert_eq!(process.task_error_count, 1);

    // The failure did not stop the chain
    assert_eq!(process.context.as_value()["trail"], json!(["a", "c"]));

    let failed = &process.task_instances[1];
    assert_eq!(failed.status, TaskStatus::Error);
    assert_eq!(failed.error.as_deref(), Some("flaky refused to run"));
}

#[tokio::test]
async fn test_fatal_failure_halts_the_chain() {
    let flow = Flow {
        name: "fatal".to_string(),
        tasks: vec![
            task_ref("boom", 1, false, true),
            task_ref("never", 2, false, true),
        ],
    };
    let engine = engine(
        flow,
        vec![
            Arc::new(FailingTask("boom")),
            Arc::new(RecordingTask("never")),
        ],
    )
    .await;

    let mut rx = engine.service.subscribe();
    let started = engine
        .service
        .start("fatal", json!({"trail": []}))
        .await
        .unwrap();

    let events = events_until_end(&mut rx).await;
    assert_eq!(
        kinds(&events),
        vec![
            EventKind::StartProcess,
            EventKind::StartTask,
            EventKind::EndTask,
            EventKind::EndProcess,
        ]
    );

    let process = engine.service.get(&started.id).await.unwrap();
    assert_eq!(process.status, ProcessStatus::Error);
    assert_eq!(process.task_success_count, 0);
    assert_eq!(process.task_error_count, 1);
    assert_eq!(process.task_instances.len(), 1);
    assert_eq!(process.context.as_value()["trail"], json!([]));
}

#[tokio::test]
async fn test_disabled_tasks_are_skipped() {
    let flow = Flow {
        name: "gaps".to_string(),
        tasks: vec![
            task_ref("a", 1, false, true),
            task_ref("b", 2, false, false),
            task_ref("c", 3, false, false),
            task_ref("d", 4, false, true),
        ],
    };
    let engine = engine(
        flow,
        vec![Arc::new(RecordingTask("a")), Arc::new(RecordingTask("d"))],
    )
    .await;

    let mut rx = engine.service.subscribe();
    let started = engine
        .service
        .start("gaps", json!({"trail": []}))
        .await
        .unwrap();
    events_until_end(&mut rx).await;

    let process = engine.service.get(&started.id).await.unwrap();
    assert_eq!(process.status, ProcessStatus::Success);
    assert_eq!(process.task_total_count, 2);
    assert_eq!(process.task_success_count, 2);
    assert_eq!(process.task_instances.len(), 2);
    assert_eq!(process.context.as_value()["trail"], json!(["a", "d"]));
}

#[tokio::test]
async fn test_successful_retry_reconciles_the_process() {
    let flow = Flow {
        name: "retryable".to_string(),
        tasks: vec![task_ref("flaky", 1, true, true)],
    };
    let engine = engine(flow, vec![Arc::new(FlakyTask::new("flaky", 1))]).await;

    let mut rx = engine.service.subscribe();
    let started = engine
        .service
        .start("retryable", json!({"trail": []}))
        .await
        .unwrap();
    events_until_end(&mut rx).await;

    let process = engine.service.get(&started.id).await.unwrap();
    assert_eq!(process.status, ProcessStatus::Warning);
    assert_eq!(process.task_error_count, 1);
    let failed_id = process.task_instances[0].id;

    engine.service.retry(&started.id, &failed_id).await.unwrap();

    // A retry ends with EndTask only; the process is reconciled without
    // a second EndProcess and without re-entering the chain
    let end_task = next_end_task(&mut rx).await;
    assert_ne!(end_task.task_instance_id, Some(failed_id));
    assert_chain_idle(&mut rx).await;

    let process = engine.service.get(&started.id).await.unwrap();
    assert_eq!(process.status, ProcessStatus::Success);
    assert_eq!(process.task_success_count, 1);
    assert_eq!(process.task_error_count, 0);
    assert_eq!(process.task_instances.len(), 2);
    assert_eq!(process.task_instances[0].status, TaskStatus::Retried);
    assert_eq!(process.task_instances[1].status, TaskStatus::Success);
}

#[tokio::test]
async fn test_failed_retry_keeps_warning_and_counters() {
    let flow = Flow {
        name: "still-broken".to_string(),
        tasks: vec![task_ref("flaky", 1, true, true)],
    };
    let engine = engine(flow, vec![Arc::new(FlakyTask::new("flaky", 5))]).await;

    let mut rx = engine.service.subscribe();
    let started = engine
        .service
        .start("still-broken", json!({"trail": []}))
        .await
        .unwrap();
    events_until_end(&mut rx).await;

    let process = engine.service.get(&started.id).await.unwrap();
    let failed_id = process.task_instances[0].id;

    engine.service.retry(&started.id, &failed_id).await.unwrap();
    next_end_task(&mut rx).await;

    // The still-failing retry does not finalize or advance the chain either
    assert_chain_idle(&mut rx).await;

    let process = engine.service.get(&started.id).await.unwrap();
    assert_eq!(process.status, ProcessStatus::Warning);
    assert_eq!(process.task_success_count, 0);
    assert_eq!(process.task_error_count, 1);
    assert_eq!(process.task_instances.len(), 2);
    assert_eq!(process.task_instances[0].status, TaskStatus::Retried);
    assert_eq!(process.task_instances[1].status, TaskStatus::Error);

    // The new failed instance can be retried again
    let newest_id = process.task_instances[1].id;
    assert!(engine.service.retry(&started.id, &newest_id).await.is_ok());
    next_end_task(&mut rx).await;
}

#[tokio::test]
async fn test_startup_recovery_repairs_interrupted_processes() {
    let flow = Flow {
        name: "crashed".to_string(),
        tasks: vec![
            task_ref("strict", 1, false, true),
            task_ref("lenient", 2, true, true),
        ],
    };
    let engine = engine(flow, vec![]).await;

    // A process caught mid-flight on a strict task
    let mut strict = Process::new("crashed", ProcessContext::new(json!({})), 2);
    strict.status = ProcessStatus::InProgress;
    strict.task_instances.push(
        ratchet_core::TaskInstance::new(
            strict.id,
            &TaskDef {
                name: "strict".to_string(),
                description: None,
            },
        ),
    );
    engine.process_store.save(&strict).await.unwrap();

    // A process caught mid-flight on an allow-to-fail task, with its
    // first task already settled
    let mut lenient = Process::new("crashed", ProcessContext::new(json!({})), 2);
    lenient.status = ProcessStatus::InProgress;
    lenient.task_success_count = 1;
    let mut settled = ratchet_core::TaskInstance::new(
        lenient.id,
        &TaskDef {
            name: "strict".to_string(),
            description: None,
        },
    );
    settled.set_status(TaskStatus::Success);
    lenient.task_instances.push(settled);
    lenient.task_instances.push(
        ratchet_core::TaskInstance::new(
            lenient.id,
            &TaskDef {
                name: "lenient".to_string(),
                description: None,
            },
        ),
    );
    engine.process_store.save(&lenient).await.unwrap();

    // A process caught between tasks, with no instance in flight
    let mut between = Process::new("crashed", ProcessContext::new(json!({})), 2);
    between.status = ProcessStatus::InProgress;
    engine.process_store.save(&between).await.unwrap();

    let config = EngineConfig {
        validate_flows_on_startup: false,
        recover_processes_on_startup: true,
        resume_processes_on_startup: false,
    };
    engine.service.start_up(&config).await.unwrap();

    let strict = engine.service.get(&strict.id).await.unwrap();
    assert_eq!(strict.status, ProcessStatus::Error);
    assert_eq!(strict.task_instances[0].status, TaskStatus::Error);
    assert_eq!(strict.task_success_count, 1);

    let lenient = engine.service.get(&lenient.id).await.unwrap();
    assert_eq!(lenient.status, ProcessStatus::Warning);
    // Only the stalled instance is repaired; the settled one is untouched
    assert_eq!(lenient.task_instances[0].status, TaskStatus::Success);
    assert_eq!(lenient.task_instances[1].status, TaskStatus::Error);
    assert_eq!(lenient.task_success_count, 2);

    let between = engine.service.get(&between.id).await.unwrap();
    assert_eq!(between.status, ProcessStatus::Error);
    assert_eq!(between.task_success_count, 1);

    assert!(engine
        .process_store
        .find_by_status(ProcessStatus::InProgress)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_startup_validation_rejects_broken_catalog() {
    let flow = Flow {
        name: "broken".to_string(),
        tasks: vec![task_ref("ghost", 1, false, true)],
    };
    let engine = engine(flow, vec![]).await;

    let result = engine.service.start_up(&EngineConfig::default()).await;
    assert!(matches!(
        result,
        Err(ratchet_core::EngineError::Configuration(_))
    ));
}

#[tokio::test]
async fn test_malformed_event_does_not_kill_the_consumer() {
    init_tracing();
    let flow_store: Arc<dyn FlowStore> = Arc::new(MemoryFlowStore::new());
    let process_store: Arc<dyn ProcessStore> = Arc::new(MemoryProcessStore::new());

    let flow = Flow {
        name: "resilient".to_string(),
        tasks: vec![task_ref("a", 1, false, true)],
    };
    flow_store.save(&flow).await.unwrap();

    let mut registry = TaskRegistry::new();
    registry.register(Arc::new(RecordingTask("a")));

    let (publisher, engine_rx) = EventPublisher::new();
    let processor = Arc::new(ratchet_core::application::processor::Processor::new(
        process_store.clone(),
        flow_store.clone(),
        Arc::new(registry),
        publisher.clone(),
    ));
    tokio::spawn(
        EventConsumer::new(
            engine_rx,
            processor,
            process_store.clone(),
            flow_store.clone(),
        )
        .run(),
    );

    let process = Process::new("resilient", ProcessContext::new(json!({"trail": []})), 1);
    process_store.save(&process).await.unwrap();

    let mut rx = publisher.subscribe();

    // A StartTask with its payload stripped must be rejected, not crash
    // the loop
    let mut malformed = EngineEvent::start_task("resilient", &flow.tasks[0], process.id);
    malformed.process_id = None;
    malformed.flow_task = None;
    publisher.publish(malformed);

    publisher.publish(EngineEvent::start_task("resilient", &flow.tasks[0], process.id));

    events_until_end(&mut rx).await;

    let process = process_store.find_by_id(&process.id).await.unwrap().unwrap();
    assert_eq!(process.status, ProcessStatus::Success);
    assert_eq!(process.task_success_count, 1);
}

#[tokio::test]
async fn test_get_many_returns_known_processes_in_order() {
    let flow = Flow {
        name: "single".to_string(),
        tasks: vec![task_ref("a", 1, false, true)],
    };
    let engine = engine(flow, vec![Arc::new(RecordingTask("a"))]).await;

    let mut rx = engine.service.subscribe();
    let first = engine
        .service
        .start("single", json!({"trail": []}))
        .await
        .unwrap();
    events_until_end(&mut rx).await;

    let mut rx = engine.service.subscribe();
    let second = engine
        .service
        .start("single", json!({"trail": []}))
        .await
        .unwrap();
    events_until_end(&mut rx).await;

    let found = engine
        .service
        .get_many(&[second.id, ratchet_core::ProcessId::new(), first.id])
        .await
        .unwrap();
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].id, second.id);
    assert_eq!(found[1].id, first.id);

    // Flow accessors round out the read surface
    assert_eq!(engine.flow_store.find_all().await.unwrap().len(), 1);
    assert_eq!(engine.service.get_flow("single").await.unwrap().name, "single");
}
