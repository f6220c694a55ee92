//! Workflow planning
//!
//! Expands a [`WorkflowIntent`] into a [`WorkflowPlan`]: a dependency-annotated
//! list of steps, each bound to a catalog operation with concrete arguments.
//! Risk tiers come from the catalog; the aggregate risk and the confirmation
//! requirement are derived from the steps and nothing else.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

pub mod templates;

use crate::catalog::{Arguments, OperationCatalog, RiskTier};
use crate::config::PlannerDefaults;
use crate::intent::{IntentKind, WorkflowIntent};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanningError {
    #[error("no workflow template for '{kind}' requests and no steps were supplied")]
    UnsupportedIntent { kind: IntentKind },
    #[error("a plan needs at least one step")]
    EmptyPlan,
}

impl PlanningError {
    pub fn reason(&self) -> &'static str {
        match self {
            PlanningError::UnsupportedIntent { .. } => "unsupported_intent",
            PlanningError::EmptyPlan => "empty_plan",
        }
    }
}

/// Operation that undoes a completed step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackOperation {
    pub operation_name: String,
    pub arguments: Arguments,
}

impl RollbackOperation {
    pub fn new(operation_name: &str, arguments: Arguments) -> Self {
        Self {
            operation_name: operation_name.to_string(),
            arguments,
        }
    }
}

/// A planned step; immutable once the plan is built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    pub description: String,
    pub operation_name: String,
    pub arguments: Arguments,
    pub depends_on: BTreeSet<String>,
    pub risk_tier: RiskTier,
    pub destructive: bool,
    pub rollback_operation: Option<RollbackOperation>,
}

/// Step as written by a template or a caller, before catalog binding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDraft {
    pub id: String,
    pub description: String,
    pub operation_name: String,
    #[serde(default)]
    pub arguments: Arguments,
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    #[serde(default)]
    pub rollback: Option<RollbackOperation>,
}

impl StepDraft {
    pub fn new(id: &str, operation_name: &str, description: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            description: description.into(),
            operation_name: operation_name.to_string(),
            arguments: Arguments::new(),
            depends_on: BTreeSet::new(),
            rollback: None,
        }
    }

    pub fn arg(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.arguments.insert(key.to_string(), value.into());
        self
    }

    pub fn arg_opt(self, key: &str, value: Option<impl Into<serde_json::Value>>) -> Self {
        match value {
            Some(value) => self.arg(key, value),
            None => self,
        }
    }

    pub fn after(mut self, step_id: &str) -> Self {
        self.depends_on.insert(step_id.to_string());
        self
    }

    pub fn rollback(mut self, rollback: RollbackOperation) -> Self {
        self.rollback = Some(rollback);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowPlan {
    pub id: String,
    pub title: String,
    pub description: String,
    pub intent_kind: IntentKind,
    pub steps: Vec<WorkflowStep>,
    pub aggregate_risk: RiskTier,
    pub requires_confirmation: bool,
    pub estimated_duration_seconds: u64,
    pub created_at: DateTime<Utc>,
}

impl WorkflowPlan {
    /// Build a plan, deriving aggregate risk and the confirmation requirement
    pub fn assemble(
        title: impl Into<String>,
        description: impl Into<String>,
        intent_kind: IntentKind,
        steps: Vec<WorkflowStep>,
        estimated_duration_seconds: u64,
    ) -> Self {
        let aggregate_risk = aggregate_risk(&steps);
        let requires_confirmation = requires_confirmation(&steps);
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            description: description.into(),
            intent_kind,
            steps,
            aggregate_risk,
            requires_confirmation,
            estimated_duration_seconds,
            created_at: Utc::now(),
        }
    }

    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }
}

/// Maximum step risk; `Low` for an empty plan
pub fn aggregate_risk(steps: &[WorkflowStep]) -> RiskTier {
    steps
        .iter()
        .map(|s| s.risk_tier)
        .max()
        .unwrap_or(RiskTier::Low)
}

pub fn requires_confirmation(steps: &[WorkflowStep]) -> bool {
    aggregate_risk(steps) >= RiskTier::Medium || steps.iter().any(|s| s.destructive)
}

pub struct WorkflowPlanner {
    catalog: Arc<OperationCatalog>,
    defaults: PlannerDefaults,
}

impl WorkflowPlanner {
    pub fn new(catalog: Arc<OperationCatalog>, defaults: PlannerDefaults) -> Self {
        Self { catalog, defaults }
    }

    /// Plan a templated intent; custom intents need [`Self::plan_custom`]
    pub fn plan(&self, intent: &WorkflowIntent) -> Result<WorkflowPlan, PlanningError> {
        let draft = match intent.kind {
            IntentKind::Cleanup => templates::cleanup(intent, &self.defaults),
            IntentKind::Migration => templates::migration(intent, &self.defaults),
            IntentKind::Audit => templates::audit(intent),
            IntentKind::Custom => {
                return Err(PlanningError::UnsupportedIntent { kind: intent.kind });
            }
        };

        let plan = self.bind(draft.title, draft.description, intent.kind, draft.steps)?;
        info!(
            plan_id = %plan.id,
            kind = %intent.kind,
            steps = plan.steps.len(),
            risk = %plan.aggregate_risk,
            "Planned workflow"
        );
        Ok(plan)
    }

    /// Plan from caller-supplied steps, for requests no template covers
    pub fn plan_custom(
        &self,
        intent: &WorkflowIntent,
        steps: Vec<StepDraft>,
    ) -> Result<WorkflowPlan, PlanningError> {
        let title = format!("Custom Workflow - {}", truncate(&intent.raw_text, 48));
        self.bind(title, intent.raw_text.clone(), intent.kind, steps)
    }

    fn bind(
        &self,
        title: String,
        description: String,
        kind: IntentKind,
        drafts: Vec<StepDraft>,
    ) -> Result<WorkflowPlan, PlanningError> {
        if drafts.is_empty() {
            return Err(PlanningError::EmptyPlan);
        }

        let mut estimated = 0u64;
        let steps = drafts
            .into_iter()
            .map(|draft| {
                let spec = self.catalog.spec(&draft.operation_name);
                let (risk_tier, destructive) = match spec {
                    Some(spec) => {
                        estimated += u64::from(spec.estimated_seconds);
                        (spec.risk_tier, spec.destructive)
                    }
                    None => {
                        // Left for the validator to reject; treat as worst case meanwhile
                        debug!(operation = %draft.operation_name, "Unknown operation in plan");
                        (RiskTier::High, false)
                    }
                };
                // The catalog inverse receives the step's own arguments; its
                // placeholders resolve against the step's result first
                let rollback_operation = draft.rollback.or_else(|| {
                    spec.and_then(|spec| spec.inverse.as_deref())
                        .map(|inverse| RollbackOperation::new(inverse, draft.arguments.clone()))
                });
                WorkflowStep {
                    id: draft.id,
                    description: draft.description,
                    operation_name: draft.operation_name,
                    arguments: draft.arguments,
                    depends_on: draft.depends_on,
                    risk_tier,
                    destructive,
                    rollback_operation,
                }
            })
            .collect();

        Ok(WorkflowPlan::assemble(
            title,
            description,
            kind,
            steps,
            estimated,
        ))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}
