//! Workflow orchestrator
//!
//! Owns the lifecycle of every run: plan, validate, gate on confirmation,
//! execute, roll back. All state lives in the injected [`WorkflowStore`], so a
//! run left in `awaiting_confirmation` can be confirmed later by a fresh
//! orchestrator over the same store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::catalog::OperationCatalog;
use crate::config::OrchestratorConfig;
use crate::confirmation::{
    ConfirmationChannel, ConfirmationDecision, DeferredConfirmation, PlanSummary,
};
use crate::error::{AdminflowError, ErrorCode, Result};
use crate::events::{EventBus, WorkflowEvent};
use crate::executor::{CancelFlag, ExecutionSettings, SharedRun, WorkflowExecutor};
use crate::intent::{IntentParser, LanguageModel};
use crate::planner::{StepDraft, WorkflowPlan, WorkflowPlanner};
use crate::run::{RunStatus, WorkflowRun, WorkflowStatusView};
use crate::store::{InMemoryWorkflowStore, WorkflowStore};
use crate::validator::{ResourceResolver, ValidationResult, WorkflowValidator};

/// A run this orchestrator is currently responsible for
#[derive(Clone)]
struct ActiveRun {
    run: SharedRun,
    plan: Arc<WorkflowPlan>,
    cancel: CancelFlag,
}

/// How a request reached a run
enum Claim {
    /// Driven, or about to be driven, by this orchestrator
    Local(ActiveRun),
    /// Stored snapshot of a run this orchestrator may not drive
    Detached(WorkflowRun),
}

pub struct OrchestratorBuilder {
    catalog: Arc<OperationCatalog>,
    config: OrchestratorConfig,
    store: Option<Arc<dyn WorkflowStore>>,
    confirmation: Option<Arc<dyn ConfirmationChannel>>,
    resolver: Option<Arc<dyn ResourceResolver>>,
    model: Option<Arc<dyn LanguageModel>>,
    events: Option<EventBus>,
}

impl OrchestratorBuilder {
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(mut self, store: Arc<dyn WorkflowStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn confirmation(mut self, channel: Arc<dyn ConfirmationChannel>) -> Self {
        self.confirmation = Some(channel);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn ResourceResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn language_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> WorkflowOrchestrator {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryWorkflowStore::new()));
        let events = self.events.unwrap_or_default();

        let mut validator = WorkflowValidator::new(self.catalog.clone());
        if let Some(resolver) = self.resolver {
            validator = validator.with_resolver(resolver);
        }

        WorkflowOrchestrator {
            parser: IntentParser::from_config(&self.config, self.model),
            planner: WorkflowPlanner::new(self.catalog.clone(), self.config.planner.clone()),
            validator,
            executor: WorkflowExecutor::new(
                self.catalog,
                ExecutionSettings::from(&self.config),
                store.clone(),
                events.clone(),
            ),
            confirmation: self
                .confirmation
                .unwrap_or_else(|| Arc::new(DeferredConfirmation)),
            store,
            events,
            config: self.config,
            active: RwLock::new(HashMap::new()),
        }
    }
}

pub struct WorkflowOrchestrator {
    config: OrchestratorConfig,
    parser: IntentParser,
    planner: WorkflowPlanner,
    validator: WorkflowValidator,
    executor: WorkflowExecutor,
    store: Arc<dyn WorkflowStore>,
    confirmation: Arc<dyn ConfirmationChannel>,
    events: EventBus,
    active: RwLock<HashMap<String, ActiveRun>>,
}

impl WorkflowOrchestrator {
    pub fn builder(catalog: Arc<OperationCatalog>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            catalog,
            config: OrchestratorConfig::default(),
            store: None,
            confirmation: None,
            resolver: None,
            model: None,
            events: None,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Parse, plan and validate a request without creating a run
    pub async fn preview(&self, request: &str) -> Result<(WorkflowPlan, ValidationResult)> {
        let intent = self.parser.parse(request).await;
        let plan = self.planner.plan(&intent)?;
        let validation = self.validator.validate(&plan).await;
        Ok((plan, validation))
    }

    /// Plan a free-form request and start a run for it.
    ///
    /// Returns once the run is terminal or waiting for confirmation.
    pub async fn submit(&self, request: &str) -> Result<String> {
        let intent = self.parser.parse(request).await;
        let plan = self.planner.plan(&intent)?;
        self.submit_plan(plan).await
    }

    /// Start a run from explicit steps, for requests no template covers
    pub async fn submit_steps(&self, request: &str, steps: Vec<StepDraft>) -> Result<String> {
        let intent = self.parser.parse(request).await;
        let plan = self.planner.plan_custom(&intent, steps)?;
        self.submit_plan(plan).await
    }

    /// Start a fresh run of an existing plan
    pub async fn submit_plan(&self, plan: WorkflowPlan) -> Result<String> {
        self.store.save_plan(&plan).await?;

        let run = WorkflowRun::new(&plan);
        let workflow_id = run.id.clone();
        self.store.save_run(&run).await?;
        info!(
            workflow_id = %workflow_id,
            plan_id = %plan.id,
            title = %plan.title,
            "Submitted workflow"
        );

        let entry = ActiveRun {
            run: Arc::new(Mutex::new(run)),
            plan: Arc::new(plan),
            cancel: Arc::new(AtomicBool::new(false)),
        };
        self.active
            .write()
            .await
            .insert(workflow_id.clone(), entry.clone());

        let validation = self.validator.validate(&entry.plan).await;

        {
            let mut run = entry.run.lock().await;
            run.validation = Some(validation.clone());

            if !validation.is_valid {
                warn!(
                    workflow_id = %workflow_id,
                    issues = %validation.summary(),
                    "Plan failed validation"
                );
                self.executor.set_status(&mut run, RunStatus::Failed);
                self.executor.persist(&run).await;
                drop(run);
                self.release(&workflow_id).await;
                return Ok(workflow_id);
            }

            self.executor.set_status(&mut run, RunStatus::Validated);

            if !entry.plan.requires_confirmation {
                self.executor.set_status(&mut run, RunStatus::Running);
                self.executor.persist(&run).await;
                drop(run);
                self.drive(&workflow_id, &entry).await;
                return Ok(workflow_id);
            }

            self.executor
                .set_status(&mut run, RunStatus::AwaitingConfirmation);
            self.executor.persist(&run).await;
        }

        self.events.emit(WorkflowEvent::ConfirmationRequested {
            workflow_id: workflow_id.clone(),
            title: entry.plan.title.clone(),
        });

        let summary = PlanSummary::new(&workflow_id, &entry.plan, &validation);
        match self.confirmation.request_confirmation(&summary).await {
            ConfirmationDecision::Approved => {
                self.confirm(&workflow_id, true).await?;
            }
            ConfirmationDecision::Declined => {
                self.confirm(&workflow_id, false).await?;
            }
            ConfirmationDecision::Pending => {
                info!(workflow_id = %workflow_id, "Waiting for confirmation");
                self.release(&workflow_id).await;
            }
        }

        Ok(workflow_id)
    }

    /// Resolve a pending confirmation. Approval runs the workflow to a
    /// terminal status; declining cancels it without running any step.
    pub async fn confirm(&self, workflow_id: &str, approve: bool) -> Result<RunStatus> {
        let entry = match self.acquire(workflow_id).await? {
            Claim::Local(entry) => entry,
            Claim::Detached(run) => return Err(not_awaiting(workflow_id, run.status)),
        };

        {
            let mut run = entry.run.lock().await;
            if run.status != RunStatus::AwaitingConfirmation {
                // Whoever holds this entry releases it
                return Err(not_awaiting(workflow_id, run.status));
            }

            if !approve {
                info!(workflow_id, "Confirmation declined");
                self.executor.set_status(&mut run, RunStatus::Cancelled);
                self.executor.persist(&run).await;
                drop(run);
                self.release(workflow_id).await;
                return Ok(RunStatus::Cancelled);
            }

            info!(workflow_id, "Confirmation approved");
            self.executor.set_status(&mut run, RunStatus::Running);
            self.executor.persist(&run).await;
        }

        Ok(self.drive(workflow_id, &entry).await)
    }

    /// Cancel a run. Runs that have not started are cancelled at once; a
    /// running run stops dispatching and ends `cancelled` after its in-flight
    /// steps finish and completed steps are rolled back.
    ///
    /// Only runs this orchestrator drives can be cancelled mid-flight. A run
    /// executing under another orchestrator is rejected and left untouched.
    pub async fn cancel(&self, workflow_id: &str) -> Result<RunStatus> {
        let entry = match self.acquire(workflow_id).await? {
            Claim::Local(entry) => entry,
            Claim::Detached(run) if run.status.is_terminal() => {
                return Err(already_finished(workflow_id, run.status));
            }
            Claim::Detached(run) => {
                return Err(AdminflowError::workflow_with_code(
                    ErrorCode::WORKFLOW_INVALID_TRANSITION,
                    format!("workflow is {} in another orchestrator", run.status),
                    Some(workflow_id.to_string()),
                ));
            }
        };
        let mut run = entry.run.lock().await;

        match run.status {
            RunStatus::Pending | RunStatus::Validated | RunStatus::AwaitingConfirmation => {
                self.executor.set_status(&mut run, RunStatus::Cancelled);
                self.executor.persist(&run).await;
                drop(run);
                self.release(workflow_id).await;
                Ok(RunStatus::Cancelled)
            }
            RunStatus::Running => {
                info!(workflow_id, "Cancellation requested");
                entry.cancel.store(true, Ordering::SeqCst);
                run.cancel_requested = true;
                self.executor.persist(&run).await;
                Ok(RunStatus::Running)
            }
            status => Err(already_finished(workflow_id, status)),
        }
    }

    pub async fn get_status(&self, workflow_id: &str) -> Result<WorkflowStatusView> {
        let active = self.active.read().await.get(workflow_id).cloned();
        if let Some(entry) = active {
            let run = entry.run.lock().await;
            return Ok(run.status_view(&entry.plan));
        }

        let run = self
            .store
            .load_run(workflow_id)
            .await?
            .ok_or_else(|| AdminflowError::run_not_found(workflow_id))?;
        let plan = self.load_plan(&run).await?;
        Ok(run.status_view(&plan))
    }

    /// Every stored run, oldest first
    pub async fn list_runs(&self) -> Result<Vec<WorkflowStatusView>> {
        let mut views = Vec::new();
        for run in self.store.list_runs().await? {
            match self.load_plan(&run).await {
                Ok(plan) => views.push(run.status_view(&plan)),
                Err(err) => {
                    warn!(workflow_id = %run.id, error = %err, "Skipping run without plan")
                }
            }
        }
        Ok(views)
    }

    /// Cancel runs that have waited for confirmation longer than the
    /// configured timeout. Returns the ids of the cancelled runs.
    pub async fn expire_confirmations(&self) -> Result<Vec<String>> {
        let Some(cutoff) = chrono::Duration::from_std(self.config.confirmation_timeout)
            .ok()
            .and_then(|timeout| chrono::Utc::now().checked_sub_signed(timeout))
        else {
            return Ok(Vec::new());
        };

        let mut expired = Vec::new();
        for run in self.store.list_runs().await? {
            if run.status == RunStatus::AwaitingConfirmation && run.status_since() <= cutoff {
                info!(workflow_id = %run.id, "Confirmation timed out");
                self.cancel(&run.id).await?;
                expired.push(run.id);
            }
        }
        Ok(expired)
    }

    async fn drive(&self, workflow_id: &str, entry: &ActiveRun) -> RunStatus {
        let status = self
            .executor
            .execute(&entry.plan, &entry.run, &entry.cancel)
            .await;
        info!(workflow_id, %status, "Workflow finished");
        self.release(workflow_id).await;
        status
    }

    /// Find an active run, or claim one suspended at the confirmation gate.
    /// Anything else in the store is handed back as a snapshot and never
    /// enters `active`, so `get_status` keeps reading the store for it.
    async fn acquire(&self, workflow_id: &str) -> Result<Claim> {
        if let Some(entry) = self.active.read().await.get(workflow_id) {
            return Ok(Claim::Local(entry.clone()));
        }

        let run = self
            .store
            .load_run(workflow_id)
            .await?
            .ok_or_else(|| AdminflowError::run_not_found(workflow_id))?;
        if run.status != RunStatus::AwaitingConfirmation {
            return Ok(Claim::Detached(run));
        }
        let plan = self.load_plan(&run).await?;
        let entry = ActiveRun {
            cancel: Arc::new(AtomicBool::new(run.cancel_requested)),
            run: Arc::new(Mutex::new(run)),
            plan: Arc::new(plan),
        };

        let mut active = self.active.write().await;
        Ok(Claim::Local(
            active
                .entry(workflow_id.to_string())
                .or_insert(entry)
                .clone(),
        ))
    }

    async fn release(&self, workflow_id: &str) {
        self.active.write().await.remove(workflow_id);
    }

    async fn load_plan(&self, run: &WorkflowRun) -> Result<WorkflowPlan> {
        self.store.load_plan(&run.plan_id).await?.ok_or_else(|| {
            AdminflowError::workflow_with_code(
                ErrorCode::WORKFLOW_PLAN_NOT_FOUND,
                format!("plan {} is missing from the store", run.plan_id),
                Some(run.id.clone()),
            )
        })
    }
}

fn not_awaiting(workflow_id: &str, status: RunStatus) -> AdminflowError {
    AdminflowError::workflow_with_code(
        ErrorCode::WORKFLOW_INVALID_TRANSITION,
        format!("workflow is {status}, not awaiting confirmation"),
        Some(workflow_id.to_string()),
    )
}

fn already_finished(workflow_id: &str, status: RunStatus) -> AdminflowError {
    AdminflowError::workflow_with_code(
        ErrorCode::WORKFLOW_INVALID_TRANSITION,
        format!("workflow is already {status}"),
        Some(workflow_id.to_string()),
    )
}
