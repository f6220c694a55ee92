//! Mutable execution records
//!
//! A [`WorkflowRun`] is the single source of truth for one execution of a
//! plan. Plans and steps are never mutated; progress lives in the per-step
//! [`StepRun`] records attached here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::catalog::{ErrorClass, OperationError};
use crate::error::{AdminflowError, ErrorCode};
use crate::planner::WorkflowPlan;
use crate::rollback::{RollbackReport, RollbackStatus};
use crate::validator::ValidationResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Validated,
    AwaitingConfirmation,
    Running,
    Succeeded,
    Failed,
    RolledBack,
    Cancelled,
}

impl RunStatus {
    /// Legal lifecycle transitions.
    ///
    /// `Failed` is final for runs rejected by validation; a run that fails
    /// while running moves on to `RolledBack`.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (self, next),
            (Pending, Validated)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Validated, Running)
                | (Validated, AwaitingConfirmation)
                | (Validated, Cancelled)
                | (AwaitingConfirmation, Running)
                | (AwaitingConfirmation, Cancelled)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Failed, RolledBack)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::RolledBack | RunStatus::Cancelled
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Validated => "validated",
            RunStatus::AwaitingConfirmation => "awaiting_confirmation",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::RolledBack => "rolled_back",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    RolledBack,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
            StepStatus::RolledBack => "rolled_back",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub class: ErrorClass,
    pub message: String,
}

impl From<&OperationError> for ErrorInfo {
    fn from(err: &OperationError) -> Self {
        Self {
            class: err.class(),
            message: err.message().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRun {
    pub step_id: String,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error: Option<ErrorInfo>,
    pub retry_count: u32,
    /// Position in the run's completion order; set on success
    pub completion_seq: Option<u64>,
}

impl StepRun {
    pub fn pending(step_id: &str) -> Self {
        Self {
            step_id: step_id.to_string(),
            status: StepStatus::Pending,
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
            retry_count: 0,
            completion_seq: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: RunStatus,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: String,
    pub plan_id: String,
    pub status: RunStatus,
    pub step_runs: BTreeMap<String, StepRun>,
    pub history: Vec<StatusChange>,
    pub validation: Option<ValidationResult>,
    pub rollback: Option<RollbackReport>,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    next_completion: u64,
}

impl WorkflowRun {
    pub fn new(plan: &WorkflowPlan) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            plan_id: plan.id.clone(),
            status: RunStatus::Pending,
            step_runs: plan
                .steps
                .iter()
                .map(|s| (s.id.clone(), StepRun::pending(&s.id)))
                .collect(),
            history: vec![StatusChange {
                status: RunStatus::Pending,
                at: now,
            }],
            validation: None,
            rollback: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
            next_completion: 0,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now().max(self.updated_at);
    }

    pub fn transition(&mut self, next: RunStatus) -> Result<(), AdminflowError> {
        if !self.status.can_transition_to(next) {
            return Err(AdminflowError::workflow_with_code(
                ErrorCode::WORKFLOW_INVALID_TRANSITION,
                format!("cannot move from {} to {}", self.status, next),
                Some(self.id.clone()),
            ));
        }
        self.status = next;
        self.touch();
        self.history.push(StatusChange {
            status: next,
            at: self.updated_at,
        });
        Ok(())
    }

    /// Time the run entered its current status
    pub fn status_since(&self) -> DateTime<Utc> {
        self.history
            .last()
            .map(|c| c.at)
            .unwrap_or(self.updated_at)
    }

    pub fn step_run(&self, step_id: &str) -> Option<&StepRun> {
        self.step_runs.get(step_id)
    }

    fn step_mut(&mut self, step_id: &str) -> Option<&mut StepRun> {
        self.step_runs.get_mut(step_id)
    }

    pub fn mark_running(&mut self, step_id: &str) {
        if let Some(step) = self.step_mut(step_id) {
            step.status = StepStatus::Running;
            step.started_at = Some(Utc::now());
        }
        self.touch();
    }

    pub fn mark_succeeded(&mut self, step_id: &str, result: Value, retry_count: u32) {
        let seq = self.next_completion;
        if let Some(step) = self.step_mut(step_id) {
            step.status = StepStatus::Succeeded;
            step.finished_at = Some(Utc::now());
            step.result = Some(result);
            step.error = None;
            step.retry_count = retry_count;
            step.completion_seq = Some(seq);
        }
        self.next_completion += 1;
        self.touch();
    }

    pub fn mark_failed(&mut self, step_id: &str, error: ErrorInfo, retry_count: u32) {
        if let Some(step) = self.step_mut(step_id) {
            step.status = StepStatus::Failed;
            step.finished_at = Some(Utc::now());
            step.error = Some(error);
            step.retry_count = retry_count;
        }
        self.touch();
    }

    pub fn mark_skipped(&mut self, step_id: &str) {
        if let Some(step) = self.step_mut(step_id) {
            if step.status == StepStatus::Pending {
                step.status = StepStatus::Skipped;
            }
        }
        self.touch();
    }

    /// Attach a rollback report and mark every undone step
    pub fn apply_rollback(&mut self, report: RollbackReport) {
        for record in &report.records {
            if record.status == RollbackStatus::Succeeded {
                if let Some(step) = self.step_mut(&record.step_id) {
                    step.status = StepStatus::RolledBack;
                }
            }
        }
        self.rollback = Some(report);
        self.touch();
    }

    /// Succeeded steps, most recently completed first
    pub fn succeeded_newest_first(&self) -> Vec<&StepRun> {
        let mut done: Vec<&StepRun> = self
            .step_runs
            .values()
            .filter(|s| s.status == StepStatus::Succeeded)
            .collect();
        done.sort_by(|a, b| b.completion_seq.cmp(&a.completion_seq));
        done
    }

    pub fn steps_with_status(&self, status: StepStatus) -> Vec<&str> {
        self.step_runs
            .values()
            .filter(|s| s.status == status)
            .map(|s| s.step_id.as_str())
            .collect()
    }

    pub fn failed_step(&self) -> Option<&StepRun> {
        self.step_runs
            .values()
            .find(|s| s.status == StepStatus::Failed)
    }

    pub fn progress(&self, plan: &WorkflowPlan) -> RunProgress {
        let total = plan.steps.len();
        let completed = self
            .step_runs
            .values()
            .filter(|s| matches!(s.status, StepStatus::Succeeded | StepStatus::RolledBack))
            .count();
        let fraction = if total == 0 {
            1.0
        } else {
            completed as f64 / total as f64
        };
        let remaining = if self.status.is_terminal() {
            0
        } else {
            (plan.estimated_duration_seconds as f64 * (1.0 - fraction)).round() as u64
        };

        RunProgress {
            completed,
            total,
            percentage: (fraction * 100.0 * 10.0).round() / 10.0,
            running: self
                .steps_with_status(StepStatus::Running)
                .into_iter()
                .map(String::from)
                .collect(),
            estimated_remaining_seconds: remaining,
        }
    }

    /// Read-only view served to status queries
    pub fn status_view(&self, plan: &WorkflowPlan) -> WorkflowStatusView {
        WorkflowStatusView {
            workflow_id: self.id.clone(),
            plan_id: self.plan_id.clone(),
            title: plan.title.clone(),
            status: self.status,
            progress: self.progress(plan),
            steps: plan
                .steps
                .iter()
                .filter_map(|s| self.step_runs.get(&s.id).cloned())
                .collect(),
            failed_step: self.failed_step().and_then(|s| {
                s.error.as_ref().map(|e| FailedStep {
                    step_id: s.step_id.clone(),
                    class: e.class,
                    message: e.message.clone(),
                })
            }),
            validation: self.validation.clone(),
            rollback: self.rollback.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunProgress {
    pub completed: usize,
    pub total: usize,
    pub percentage: f64,
    pub running: Vec<String>,
    pub estimated_remaining_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedStep {
    pub step_id: String,
    pub class: ErrorClass,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStatusView {
    pub workflow_id: String,
    pub plan_id: String,
    pub title: String,
    pub status: RunStatus,
    pub progress: RunProgress,
    pub steps: Vec<StepRun>,
    pub failed_step: Option<FailedStep>,
    pub validation: Option<ValidationResult>,
    pub rollback: Option<RollbackReport>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::OperationCatalog;
    use crate::config::PlannerDefaults;
    use crate::intent::{IntentKind, WorkflowIntent};
    use crate::planner::WorkflowPlanner;
    use serde_json::json;
    use std::sync::Arc;

    fn cleanup_plan() -> WorkflowPlan {
        WorkflowPlanner::new(
            Arc::new(OperationCatalog::simulated()),
            PlannerDefaults::default(),
        )
        .plan(&WorkflowIntent::new(IntentKind::Cleanup, "clean up"))
        .unwrap()
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        use RunStatus::*;
        let all = [
            Pending,
            Validated,
            AwaitingConfirmation,
            Running,
            Succeeded,
            Failed,
            RolledBack,
            Cancelled,
        ];
        for from in [Succeeded, RolledBack, Cancelled] {
            for to in all {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
        assert!(Failed.can_transition_to(RolledBack));
        assert!(!Failed.can_transition_to(Running));
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        let mut run = WorkflowRun::new(&cleanup_plan());
        let err = run.transition(RunStatus::Running).unwrap_err();
        assert_eq!(err.code(), ErrorCode::WORKFLOW_INVALID_TRANSITION);
        assert_eq!(run.status, RunStatus::Pending);

        run.transition(RunStatus::Validated).unwrap();
        run.transition(RunStatus::AwaitingConfirmation).unwrap();
        assert_eq!(run.history.len(), 3);
    }

    #[test]
    fn test_completion_order_is_tracked() {
        let plan = cleanup_plan();
        let mut run = WorkflowRun::new(&plan);
        run.mark_running("analyze");
        run.mark_succeeded("analyze", json!({}), 0);
        run.mark_running("confirm");
        run.mark_succeeded("confirm", json!({}), 1);

        let order: Vec<_> = run
            .succeeded_newest_first()
            .iter()
            .map(|s| s.step_id.as_str())
            .collect();
        assert_eq!(order, vec!["confirm", "analyze"]);
        assert_eq!(run.step_run("confirm").unwrap().retry_count, 1);
    }

    #[test]
    fn test_progress_and_status_view() {
        let plan = cleanup_plan();
        let mut run = WorkflowRun::new(&plan);
        run.transition(RunStatus::Validated).unwrap();
        run.transition(RunStatus::Running).unwrap();
        run.mark_running("analyze");
        run.mark_succeeded("analyze", json!({"candidates": []}), 0);
        run.mark_running("confirm");

        let progress = run.progress(&plan);
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.total, 3);
        assert_eq!(progress.running, vec!["confirm".to_string()]);
        assert!(progress.estimated_remaining_seconds < plan.estimated_duration_seconds);

        run.mark_failed(
            "confirm",
            ErrorInfo::from(&OperationError::permanent("denied")),
            0,
        );
        let view = run.status_view(&plan);
        assert_eq!(view.steps.len(), 3);
        assert_eq!(view.steps[0].step_id, "analyze");
        let failed = view.failed_step.unwrap();
        assert_eq!(failed.step_id, "confirm");
        assert_eq!(failed.class, ErrorClass::Permanent);
    }
}
