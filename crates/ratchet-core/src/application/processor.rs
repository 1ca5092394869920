use crate::application::registry::TaskRegistry;
use crate::bus::EventPublisher;
use crate::domain::event::EngineEvent;
use crate::domain::flow::{Flow, FlowTaskRef};
use crate::domain::process::{Process, ProcessStatus, TaskInstance, TaskStatus};
use crate::domain::store::{FlowStore, ProcessStore};
use crate::EngineError;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info, Instrument};

/// The execution engine state machine.
///
/// Runs one flow task against one process, performs every status and
/// counter transition, decides continuation, and repairs processes left
/// stuck after a crash.
pub struct Processor {
    process_store: Arc<dyn ProcessStore>,
    flow_store: Arc<dyn FlowStore>,
    registry: Arc<TaskRegistry>,
    publisher: EventPublisher,
}

impl Processor {
    /// Create a new processor
    pub fn new(
        process_store: Arc<dyn ProcessStore>,
        flow_store: Arc<dyn FlowStore>,
        registry: Arc<TaskRegistry>,
        publisher: EventPublisher,
    ) -> Self {
        Self {
            process_store,
            flow_store,
            registry,
            publisher,
        }
    }

    /// Execute one flow task on a process.
    ///
    /// Updates the task instance and the process, always publishes
    /// EndTask, and then, unless this execution is a retry, either
    /// publishes StartTask for the next enabled task or finalizes the
    /// process.
    pub async fn execute(
        &self,
        flow: &Flow,
        flow_task: &FlowTaskRef,
        mut process: Process,
    ) -> Result<(), EngineError> {
        info!(task = flow_task.task_name(), process_id = %process.id, "Starting task");

        // Retry detection: an ERROR instance with the same task name means
        // this execution supersedes it. At most one such instance exists.
        let retried_index = process.error_instance_index(flow_task.task_name());
        if let Some(index) = retried_index {
            info!(task_instance_id = %process.task_instances[index].id, "Retrying task");
            process.task_instances[index].set_status(TaskStatus::Retried);
        }

        let instance = self
            .run_task_instance(flow_task, &mut process, retried_index)
            .await?;

        self.publisher.publish(EngineEvent::end_task(
            &flow.name,
            flow_task,
            process.id,
            instance.id,
        ));

        // A retry is a one-shot, externally triggered action: it never
        // re-enters the chain-advancement logic.
        if retried_index.is_none() {
            self.next(flow, flow_task, &mut process, instance.status)
                .await?;
        }

        Ok(())
    }

    /// Run the new task instance and reconcile process state. The store
    /// contract makes the writes issued here atomic per call.
    async fn run_task_instance(
        &self,
        flow_task: &FlowTaskRef,
        process: &mut Process,
        retried_index: Option<usize>,
    ) -> Result<TaskInstance, EngineError> {
        // New IN_PROGRESS instance; the process leaves INIT on its first task
        process
            .task_instances
            .push(TaskInstance::new(process.id, &flow_task.task));
        let new_index = process.task_instances.len() - 1;
        self.process_store
            .save_task_instance(&process.task_instances[new_index])
            .await?;

        if process.status == ProcessStatus::Init {
            process.status = ProcessStatus::InProgress;
        }
        process.touch();
        self.process_store.save(process).await?;

        match self.invoke_task(flow_task, process).await {
            Ok(()) => process.task_instances[new_index].set_status(TaskStatus::Success),
            Err(message) => {
                error!(
                    task = flow_task.task_name(),
                    error = %message,
                    "Task failed"
                );
                let failed = &mut process.task_instances[new_index];
                failed.set_status(TaskStatus::Error);
                failed.error = Some(message);

                if process.status.is_open() {
                    process.status = if flow_task.allow_to_fail {
                        ProcessStatus::Warning
                    } else {
                        ProcessStatus::Error
                    };
                    self.process_store.save(process).await?;
                }
            }
        }
        self.process_store
            .save_task_instance(&process.task_instances[new_index])
            .await?;

        // Task code may have mutated the context; persist it regardless of
        // the outcome
        self.process_store
            .save_context(&process.id, &process.context)
            .await?;

        if let Some(old_index) = retried_index {
            self.end_retried(process, old_index, new_index).await?;
        } else {
            match process.task_instances[new_index].status {
                TaskStatus::Success => process.task_success_count += 1,
                TaskStatus::Error => process.task_error_count += 1,
                _ => {}
            }
        }

        process.touch();
        self.process_store.save(process).await?;

        Ok(process.task_instances[new_index].clone())
    }

    /// Run the task code, converting every failure signal (error return,
    /// panic, resolution failure) into a uniform failure message that
    /// never escapes into the engine's own control flow.
    async fn invoke_task(
        &self,
        flow_task: &FlowTaskRef,
        process: &mut Process,
    ) -> Result<(), String> {
        let task = match self.registry.resolve(flow_task.task_name()) {
            Ok(task) => task,
            Err(e) => return Err(e.to_string()),
        };

        let span = tracing::info_span!(
            "task_execution",
            process_id = %process.id,
            task = flow_task.task_name()
        );

        let result = AssertUnwindSafe(task.execute(&mut process.context))
            .catch_unwind()
            .instrument(span)
            .await;

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(panic) => Err(panic_message(panic)),
        }
    }

    /// Persist the superseded instance and reconcile status and counters
    /// after a retry. A retried process ends up SUCCESS or WARNING from
    /// this path, never ERROR and never IN_PROGRESS.
    async fn end_retried(
        &self,
        process: &mut Process,
        old_index: usize,
        new_index: usize,
    ) -> Result<(), EngineError> {
        self.process_store
            .save_task_instance(&process.task_instances[old_index])
            .await?;

        process.status =
            if process.status == ProcessStatus::InProgress && process.all_settled_success() {
                ProcessStatus::Success
            } else {
                ProcessStatus::Warning
            };

        // A successful retry moves one count from error to success; a
        // still-failing retry leaves both counters untouched
        if process.task_instances[new_index].status == TaskStatus::Success {
            process.task_success_count += 1;
            process.task_error_count = process.task_error_count.saturating_sub(1);
        }

        info!(
            task = %process.task_instances[old_index].task_name,
            old_instance_id = %process.task_instances[old_index].id,
            new_instance_id = %process.task_instances[new_index].id,
            status = ?process.task_instances[new_index].status,
            "Task instance retried"
        );

        Ok(())
    }

    /// Advance the chain after a non-retry execution: publish StartTask
    /// for the next enabled task, or finalize the process when the chain
    /// is exhausted or a non-tolerated failure occurred.
    async fn next(
        &self,
        flow: &Flow,
        flow_task: &FlowTaskRef,
        process: &mut Process,
        status: TaskStatus,
    ) -> Result<(), EngineError> {
        if status == TaskStatus::Success || flow_task.allow_to_fail {
            match flow.next_enabled_after(flow_task.order) {
                Some(next_task) => self.publisher.publish(EngineEvent::start_task(
                    &flow.name,
                    next_task,
                    process.id,
                )),
                None => self.end_process(process).await?,
            }
        } else {
            self.end_process(process).await?;
        }

        Ok(())
    }

    /// Finalize a process. IN_PROGRESS becomes SUCCESS; a WARNING or
    /// ERROR set earlier in the chain is preserved.
    pub async fn end_process(&self, process: &mut Process) -> Result<(), EngineError> {
        if process.status == ProcessStatus::InProgress {
            process.status = ProcessStatus::Success;
        }
        process.touch();
        self.process_store.save(process).await?;
        self.publisher.publish(EngineEvent::end_process(process.id));

        info!(process_id = %process.id, status = ?process.status, "Process done");
        Ok(())
    }

    /// Repair processes left IN_PROGRESS by a previous crash.
    ///
    /// Each such process is forced to ERROR (or WARNING when the task
    /// caught mid-flight is allowed to fail) and its single IN_PROGRESS
    /// task instance, if any, is forced to ERROR. Subsequent tasks are
    /// not resumed or re-triggered.
    pub async fn recover_interrupted_processes(&self) -> Result<(), EngineError> {
        let mut stalled = self
            .process_store
            .find_by_status(ProcessStatus::InProgress)
            .await?;

        if stalled.is_empty() {
            return Ok(());
        }

        info!(count = stalled.len(), "Found IN_PROGRESS processes");

        for process in &mut stalled {
            let flow = self
                .flow_store
                .find_by_name(&process.flow_name)
                .await?
                .ok_or_else(|| {
                    EngineError::Execution(format!(
                        "could not load IN_PROGRESS process {} for flow {}",
                        process.id, process.flow_name
                    ))
                })?;

            process.status = ProcessStatus::Error;

            if let Some(index) = process.in_progress_instance_index() {
                process.task_instances[index].set_status(TaskStatus::Error);

                let task_name = process.task_instances[index].task_name.clone();
                let flow_task = flow.task_ref_by_name(&task_name).ok_or_else(|| {
                    EngineError::Execution(format!("could not load IN_PROGRESS task {task_name}"))
                })?;

                if flow_task.allow_to_fail {
                    process.status = ProcessStatus::Warning;
                }

                self.process_store
                    .save_task_instance(&process.task_instances[index])
                    .await?;
            }

            // The success counter is bumped for every repaired process,
            // even when the stalled task was just forced to ERROR
            process.task_success_count += 1;
            process.touch();
        }

        self.process_store.save_all(&stalled).await
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}
