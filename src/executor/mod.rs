//! Running-phase scheduler
//!
//! Drives a validated run from `running` to a terminal status. Ready steps
//! are dispatched concurrently up to `max_parallelism`; the run's mutex is
//! held only for bookkeeping, never across an operation call, so status
//! queries observe every transition while steps are in flight.

use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

pub mod arguments;

use crate::catalog::{
    Arguments, ErrorClass, OperationCatalog, OperationError, OperationExecutor,
};
use crate::config::OrchestratorConfig;
use crate::events::{EventBus, WorkflowEvent};
use crate::graph::StepGraph;
use crate::planner::{WorkflowPlan, WorkflowStep};
use crate::rollback::RollbackCoordinator;
use crate::run::{ErrorInfo, RunStatus, StepStatus, WorkflowRun};
use crate::store::WorkflowStore;
use arguments::{resolve_arguments, ResultSource};

/// A run shared between its executor and status queries
pub type SharedRun = Arc<Mutex<WorkflowRun>>;

/// Set to stop dispatching new steps
pub type CancelFlag = Arc<AtomicBool>;

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionSettings {
    pub max_parallelism: usize,
    pub step_timeout: Duration,
    pub retry_backoff: Duration,
    pub transient_retries: u32,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

impl From<&OrchestratorConfig> for ExecutionSettings {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            max_parallelism: config.max_parallelism.max(1),
            step_timeout: config.step_timeout,
            retry_backoff: config.retry_backoff,
            transient_retries: config.transient_retries,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecutionOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

struct StepOutcome {
    step_id: String,
    result: Result<Value, OperationError>,
    retries: u32,
}

pub struct WorkflowExecutor {
    catalog: Arc<OperationCatalog>,
    settings: ExecutionSettings,
    store: Arc<dyn WorkflowStore>,
    events: EventBus,
    rollback: RollbackCoordinator,
}

impl WorkflowExecutor {
    pub fn new(
        catalog: Arc<OperationCatalog>,
        settings: ExecutionSettings,
        store: Arc<dyn WorkflowStore>,
        events: EventBus,
    ) -> Self {
        let rollback = RollbackCoordinator::new(catalog.clone(), settings.step_timeout)
            .with_events(events.clone());
        Self {
            catalog,
            settings,
            store,
            events,
            rollback,
        }
    }

    pub fn settings(&self) -> &ExecutionSettings {
        &self.settings
    }

    /// Execute a run that is already in `running` and return its terminal status
    pub async fn execute(
        &self,
        plan: &WorkflowPlan,
        run: &SharedRun,
        cancel: &CancelFlag,
    ) -> RunStatus {
        if let Err(cycle) = StepGraph::build(&plan.steps).topological_order() {
            error!(
                plan_id = %plan.id,
                steps = ?cycle.steps,
                "Refusing to execute plan with a dependency cycle"
            );
            let mut guard = run.lock().await;
            self.set_status(&mut guard, RunStatus::Failed);
            self.persist(&guard).await;
            return guard.status;
        }

        let outcome = self.execute_steps(plan, run, cancel).await;
        self.finish(plan, run, outcome).await
    }

    async fn execute_steps(
        &self,
        plan: &WorkflowPlan,
        run: &SharedRun,
        cancel: &CancelFlag,
    ) -> ExecutionOutcome {
        let graph = StepGraph::build(&plan.steps);
        let workflow_id = run.lock().await.id.clone();
        let max_parallelism = self.settings.max_parallelism.max(1);
        let mut in_flight = FuturesUnordered::new();
        let mut any_failed = false;

        info!(
            workflow_id = %workflow_id,
            steps = plan.steps.len(),
            max_parallelism,
            "Executing workflow"
        );

        loop {
            if cancel.load(Ordering::SeqCst) {
                debug!(
                    workflow_id = %workflow_id,
                    "Cancellation requested, draining in-flight steps"
                );
            } else {
                let ready = ready_steps(plan, &*run.lock().await);
                for step in ready {
                    if in_flight.len() >= max_parallelism {
                        break;
                    }

                    let Some(entry) = self.catalog.get(&step.operation_name) else {
                        let err = OperationError::permanent(format!(
                            "operation '{}' is not in the catalog",
                            step.operation_name
                        ));
                        self.record(
                            run,
                            &graph,
                            StepOutcome {
                                step_id: step.id.clone(),
                                result: Err(err),
                                retries: 0,
                            },
                        )
                        .await;
                        any_failed = true;
                        continue;
                    };

                    let arguments = {
                        let mut guard = run.lock().await;
                        let sources = dependency_sources(&guard, &graph, &step.id);
                        let arguments = resolve_arguments(&step.arguments, &sources);
                        guard.mark_running(&step.id);
                        self.persist(&guard).await;
                        arguments
                    };

                    in_flight.push(self.attempt_step(
                        workflow_id.clone(),
                        step.id.clone(),
                        entry.executor.clone(),
                        entry.spec.idempotent,
                        arguments,
                    ));
                }
            }

            let Some(outcome) = in_flight.next().await else {
                break;
            };
            if outcome.result.is_err() {
                any_failed = true;
            }
            self.record(run, &graph, outcome).await;
        }

        let mut guard = run.lock().await;
        let leftover: Vec<String> = guard
            .steps_with_status(StepStatus::Pending)
            .into_iter()
            .map(String::from)
            .collect();
        for step_id in &leftover {
            guard.mark_skipped(step_id);
            self.events.emit(WorkflowEvent::StepSkipped {
                workflow_id: workflow_id.clone(),
                step_id: step_id.clone(),
            });
        }
        if !leftover.is_empty() {
            self.persist(&guard).await;
        }

        if any_failed {
            ExecutionOutcome::Failed
        } else if cancel.load(Ordering::SeqCst) && !leftover.is_empty() {
            ExecutionOutcome::Cancelled
        } else if leftover.is_empty() {
            ExecutionOutcome::Succeeded
        } else {
            warn!(workflow_id = %workflow_id, steps = ?leftover, "Steps could never become ready");
            ExecutionOutcome::Failed
        }
    }

    /// Run one step, retrying transient failures.
    ///
    /// A timed-out attempt may still have taken effect, so timeouts are only
    /// retried for idempotent operations.
    async fn attempt_step(
        &self,
        workflow_id: String,
        step_id: String,
        executor: Arc<dyn OperationExecutor>,
        idempotent: bool,
        arguments: Arguments,
    ) -> StepOutcome {
        let mut retries = 0;
        loop {
            self.events.emit(WorkflowEvent::StepStarted {
                workflow_id: workflow_id.clone(),
                step_id: step_id.clone(),
                attempt: retries + 1,
            });

            let timeout = self.settings.step_timeout;
            let (result, timed_out) =
                match tokio::time::timeout(timeout, executor.execute(&arguments)).await {
                    Ok(result) => (result, false),
                    Err(_) => (
                        Err(OperationError::transient(format!(
                            "step timed out after {timeout:?}"
                        ))),
                        true,
                    ),
                };

            if timed_out && !idempotent {
                warn!(
                    workflow_id = %workflow_id,
                    step_id = %step_id,
                    "Timed out on a non-idempotent operation, not retrying"
                );
            }

            match result {
                Err(err)
                    if err.class() == ErrorClass::Transient
                        && retries < self.settings.transient_retries
                        && (idempotent || !timed_out) =>
                {
                    warn!(
                        workflow_id = %workflow_id,
                        step_id = %step_id,
                        error = %err,
                        backoff = ?self.settings.retry_backoff,
                        "Transient failure, retrying"
                    );
                    self.events.emit(WorkflowEvent::StepRetrying {
                        workflow_id: workflow_id.clone(),
                        step_id: step_id.clone(),
                        error: err.to_string(),
                    });
                    retries += 1;
                    tokio::time::sleep(self.settings.retry_backoff).await;
                }
                result => {
                    return StepOutcome {
                        step_id,
                        result,
                        retries,
                    }
                }
            }
        }
    }

    async fn record(&self, run: &SharedRun, graph: &StepGraph, outcome: StepOutcome) {
        let mut guard = run.lock().await;
        let workflow_id = guard.id.clone();

        match outcome.result {
            Ok(value) => {
                info!(
                    workflow_id = %workflow_id,
                    step_id = %outcome.step_id,
                    retries = outcome.retries,
                    "Step succeeded"
                );
                guard.mark_succeeded(&outcome.step_id, value, outcome.retries);
                self.events.emit(WorkflowEvent::StepSucceeded {
                    workflow_id,
                    step_id: outcome.step_id,
                });
            }
            Err(err) => {
                error!(
                    workflow_id = %workflow_id,
                    step_id = %outcome.step_id,
                    error = %err,
                    retries = outcome.retries,
                    "Step failed"
                );
                guard.mark_failed(&outcome.step_id, ErrorInfo::from(&err), outcome.retries);
                self.events.emit(WorkflowEvent::StepFailed {
                    workflow_id: workflow_id.clone(),
                    step_id: outcome.step_id.clone(),
                    class: err.class(),
                    error: err.message().to_string(),
                });

                for dependent in graph.dependents(&outcome.step_id) {
                    if guard.step_run(&dependent).map(|s| s.status) == Some(StepStatus::Pending) {
                        guard.mark_skipped(&dependent);
                        self.events.emit(WorkflowEvent::StepSkipped {
                            workflow_id: workflow_id.clone(),
                            step_id: dependent,
                        });
                    }
                }
            }
        }

        self.persist(&guard).await;
    }

    async fn finish(
        &self,
        plan: &WorkflowPlan,
        run: &SharedRun,
        outcome: ExecutionOutcome,
    ) -> RunStatus {
        let snapshot = {
            let mut guard = run.lock().await;
            let status = match outcome {
                ExecutionOutcome::Succeeded => RunStatus::Succeeded,
                ExecutionOutcome::Failed => RunStatus::Failed,
                ExecutionOutcome::Cancelled => RunStatus::Cancelled,
            };
            self.set_status(&mut guard, status);
            self.persist(&guard).await;
            if outcome == ExecutionOutcome::Succeeded {
                return guard.status;
            }
            guard.clone()
        };

        // Inverse operations run without the lock
        let report = self.rollback.rollback(&snapshot, plan).await;
        info!(
            workflow_id = %snapshot.id,
            executed = report.executed_count(),
            skipped = report.skipped_count(),
            failed = report.failures().len(),
            "Rollback finished"
        );

        let mut guard = run.lock().await;
        guard.apply_rollback(report);
        if guard.status == RunStatus::Failed {
            self.set_status(&mut guard, RunStatus::RolledBack);
        }
        self.persist(&guard).await;
        guard.status
    }

    /// Apply a lifecycle transition and publish it; illegal transitions are logged
    pub(crate) fn set_status(&self, run: &mut WorkflowRun, next: RunStatus) {
        let from = run.status;
        match run.transition(next) {
            Ok(()) => {
                info!(workflow_id = %run.id, %from, to = %next, "Workflow status changed");
                self.events.emit(WorkflowEvent::StatusChanged {
                    workflow_id: run.id.clone(),
                    from,
                    to: next,
                });
            }
            Err(err) => error!(workflow_id = %run.id, error = %err, "Rejected status change"),
        }
    }

    pub(crate) async fn persist(&self, run: &WorkflowRun) {
        if let Err(err) = self.store.save_run(run).await {
            error!(workflow_id = %run.id, error = %err, "Failed to persist workflow run");
        }
    }
}

/// Pending steps whose dependencies have all succeeded, in plan order
fn ready_steps<'p>(plan: &'p WorkflowPlan, run: &WorkflowRun) -> Vec<&'p WorkflowStep> {
    plan.steps
        .iter()
        .filter(|step| {
            run.step_run(&step.id).map(|s| s.status) == Some(StepStatus::Pending)
                && step.depends_on.iter().all(|dep| {
                    run.step_run(dep).map(|s| s.status) == Some(StepStatus::Succeeded)
                })
        })
        .collect()
}

/// Results of the step's transitive dependencies, most recently completed first
fn dependency_sources<'r>(
    run: &'r WorkflowRun,
    graph: &StepGraph,
    step_id: &str,
) -> Vec<ResultSource<'r>> {
    let ancestors = graph.ancestors(step_id);
    run.succeeded_newest_first()
        .into_iter()
        .filter(|s| ancestors.contains(&s.step_id))
        .filter_map(|s| s.result.as_ref().map(|r| ResultSource::new(&s.step_id, r)))
        .collect()
}
