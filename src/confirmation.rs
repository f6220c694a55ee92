//! Confirmation gate
//!
//! Runs that need approval ask a [`ConfirmationChannel`]. A channel may answer
//! right away or return [`ConfirmationDecision::Pending`], in which case the
//! run waits in `awaiting_confirmation` until `confirm` is called, possibly by
//! another process sharing the store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::catalog::RiskTier;
use crate::planner::WorkflowPlan;
use crate::validator::ValidationResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationDecision {
    Approved,
    Declined,
    Pending,
}

/// What an approver is shown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub workflow_id: String,
    pub plan_id: String,
    pub title: String,
    pub description: String,
    pub aggregate_risk: RiskTier,
    pub steps: Vec<String>,
    pub destructive_steps: Vec<String>,
    pub risk_factors: Vec<String>,
    pub warnings: Vec<String>,
    pub estimated_duration_seconds: u64,
}

impl PlanSummary {
    pub fn new(workflow_id: &str, plan: &WorkflowPlan, validation: &ValidationResult) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            plan_id: plan.id.clone(),
            title: plan.title.clone(),
            description: plan.description.clone(),
            aggregate_risk: plan.aggregate_risk,
            steps: plan
                .steps
                .iter()
                .map(|s| format!("{}: {}", s.id, s.description))
                .collect(),
            destructive_steps: plan
                .steps
                .iter()
                .filter(|s| s.destructive)
                .map(|s| s.id.clone())
                .collect(),
            risk_factors: validation.risks.factors.clone(),
            warnings: validation.warnings.iter().map(|w| w.to_string()).collect(),
            estimated_duration_seconds: plan.estimated_duration_seconds,
        }
    }
}

#[async_trait]
pub trait ConfirmationChannel: Send + Sync {
    async fn request_confirmation(&self, summary: &PlanSummary) -> ConfirmationDecision;
}

/// Leaves every run waiting for an explicit `confirm` call
#[derive(Debug, Clone, Copy, Default)]
pub struct DeferredConfirmation;

#[async_trait]
impl ConfirmationChannel for DeferredConfirmation {
    async fn request_confirmation(&self, _summary: &PlanSummary) -> ConfirmationDecision {
        ConfirmationDecision::Pending
    }
}

/// Approves everything; for unattended runs
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl ConfirmationChannel for AutoApprove {
    async fn request_confirmation(&self, _summary: &PlanSummary) -> ConfirmationDecision {
        ConfirmationDecision::Approved
    }
}
