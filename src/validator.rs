//! Pre-execution plan validation
//!
//! Every check runs regardless of what earlier checks found, so a single
//! [`ValidationResult`] lists all problems with a plan at once.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::catalog::{is_placeholder, ContentType, OperationCatalog, RiskTier};
use crate::graph::StepGraph;
use crate::planner::{aggregate_risk, requires_confirmation, WorkflowPlan, WorkflowStep};

/// Plans longer than this carry an extra risk factor
const LARGE_PLAN_STEPS: usize = 10;
const LARGE_PLAN_WEIGHT: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    UnknownOperation,
    MissingDependency,
    DuplicateStepId,
    CyclicDependency,
    UnconfirmedDestructiveStep,
    InvalidArguments,
    UnresolvedReference,
    IrreversibleStep,
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IssueCode::UnknownOperation => "unknown_operation",
            IssueCode::MissingDependency => "missing_dependency",
            IssueCode::DuplicateStepId => "duplicate_step_id",
            IssueCode::CyclicDependency => "cyclic_dependency",
            IssueCode::UnconfirmedDestructiveStep => "unconfirmed_destructive_step",
            IssueCode::InvalidArguments => "invalid_arguments",
            IssueCode::UnresolvedReference => "unresolved_reference",
            IssueCode::IrreversibleStep => "irreversible_step",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub code: IssueCode,
    pub step_id: Option<String>,
    pub message: String,
}

impl Issue {
    fn for_step(code: IssueCode, step_id: &str, message: impl Into<String>) -> Self {
        Self {
            code,
            step_id: Some(step_id.to_string()),
            message: message.into(),
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.step_id {
            Some(step) => write!(f, "{} [{}]: {}", self.code, step, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub level: RiskTier,
    pub score: u32,
    pub factors: Vec<String>,
    pub requires_confirmation: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub blocking_issues: Vec<Issue>,
    pub warnings: Vec<Issue>,
    pub risks: RiskAssessment,
}

impl ValidationResult {
    pub fn has_blocking(&self, code: IssueCode) -> bool {
        self.blocking_issues.iter().any(|i| i.code == code)
    }

    pub fn has_warning(&self, code: IssueCode) -> bool {
        self.warnings.iter().any(|i| i.code == code)
    }

    /// One line per blocking issue, for error messages
    pub fn summary(&self) -> String {
        self.blocking_issues
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    #[error("{content_type} '{name}' not found")]
    NotFound {
        content_type: ContentType,
        name: String,
    },
    #[error("resource lookup unavailable: {0}")]
    Unavailable(String),
}

/// Resolves human-readable resource names to site identifiers
#[async_trait]
pub trait ResourceResolver: Send + Sync {
    async fn resolve_name_to_id(
        &self,
        content_type: ContentType,
        name: &str,
        scope: Option<&str>,
    ) -> Result<String, ResolveError>;
}

pub struct WorkflowValidator {
    catalog: Arc<OperationCatalog>,
    resolver: Option<Arc<dyn ResourceResolver>>,
}

impl WorkflowValidator {
    pub fn new(catalog: Arc<OperationCatalog>) -> Self {
        Self {
            catalog,
            resolver: None,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ResourceResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub async fn validate(&self, plan: &WorkflowPlan) -> ValidationResult {
        let graph = StepGraph::build(&plan.steps);
        let mut blocking = Vec::new();
        let mut warnings = Vec::new();

        for id in graph.duplicate_ids() {
            blocking.push(Issue::for_step(
                IssueCode::DuplicateStepId,
                id,
                format!("step id '{id}' is declared more than once"),
            ));
        }

        blocking.extend(self.check_operations(plan));

        for (step, dep) in graph.missing_dependencies() {
            blocking.push(Issue::for_step(
                IssueCode::MissingDependency,
                step,
                format!("depends on undeclared step '{dep}'"),
            ));
        }

        if let Err(cycle) = graph.topological_order() {
            blocking.push(Issue {
                code: IssueCode::CyclicDependency,
                step_id: cycle.steps.first().cloned(),
                message: format!("dependency cycle through {}", cycle.steps.join(" -> ")),
            });
        }

        blocking.extend(self.check_arguments(plan));

        let (unconfirmed, irreversible) = self.check_destructive(plan, &graph);
        blocking.extend(unconfirmed);
        warnings.extend(irreversible);

        warnings.extend(self.check_references(plan).await);

        let risks = assess_risk(plan, &self.catalog);
        let result = ValidationResult {
            is_valid: blocking.is_empty(),
            blocking_issues: blocking,
            warnings,
            risks,
        };

        info!(
            plan_id = %plan.id,
            valid = result.is_valid,
            blocking = result.blocking_issues.len(),
            warnings = result.warnings.len(),
            "Validated plan"
        );
        result
    }

    fn check_operations(&self, plan: &WorkflowPlan) -> Vec<Issue> {
        let mut issues = Vec::new();
        for step in &plan.steps {
            if !self.catalog.contains(&step.operation_name) {
                issues.push(Issue::for_step(
                    IssueCode::UnknownOperation,
                    &step.id,
                    format!("operation '{}' is not in the catalog", step.operation_name),
                ));
            }
            if let Some(rollback) = &step.rollback_operation {
                if !self.catalog.contains(&rollback.operation_name) {
                    issues.push(Issue::for_step(
                        IssueCode::UnknownOperation,
                        &step.id,
                        format!(
                            "rollback operation '{}' is not in the catalog",
                            rollback.operation_name
                        ),
                    ));
                }
            }
        }
        issues
    }

    fn check_arguments(&self, plan: &WorkflowPlan) -> Vec<Issue> {
        plan.steps
            .iter()
            .filter_map(|step| {
                let spec = self.catalog.spec(&step.operation_name)?;
                let problems = spec.check_arguments(&step.arguments);
                (!problems.is_empty()).then(|| {
                    Issue::for_step(IssueCode::InvalidArguments, &step.id, problems.join("; "))
                })
            })
            .collect()
    }

    /// Destructive steps need a confirmation gate among their ancestors and
    /// should declare an inverse
    fn check_destructive(
        &self,
        plan: &WorkflowPlan,
        graph: &StepGraph,
    ) -> (Vec<Issue>, Vec<Issue>) {
        let mut unconfirmed = Vec::new();
        let mut irreversible = Vec::new();

        for step in &plan.steps {
            let Some(spec) = self.catalog.spec(&step.operation_name) else {
                continue;
            };
            if !spec.destructive {
                continue;
            }

            let gated = graph.ancestors(&step.id).iter().any(|ancestor| {
                plan.step(ancestor)
                    .and_then(|s| self.catalog.spec(&s.operation_name))
                    .is_some_and(|s| s.is_confirmation_gate())
            });
            if !gated {
                unconfirmed.push(Issue::for_step(
                    IssueCode::UnconfirmedDestructiveStep,
                    &step.id,
                    format!(
                        "destructive operation '{}' has no confirmation step before it",
                        step.operation_name
                    ),
                ));
            }

            if step.rollback_operation.is_none() {
                irreversible.push(Issue::for_step(
                    IssueCode::IrreversibleStep,
                    &step.id,
                    format!("'{}' cannot be rolled back", step.operation_name),
                ));
            }
        }

        (unconfirmed, irreversible)
    }

    async fn check_references(&self, plan: &WorkflowPlan) -> Vec<Issue> {
        let Some(resolver) = &self.resolver else {
            return Vec::new();
        };

        let mut issues = Vec::new();
        for step in &plan.steps {
            let Some(spec) = self.catalog.spec(&step.operation_name) else {
                continue;
            };
            for parameter in &spec.parameters {
                let Some(content_type) = parameter.resource else {
                    continue;
                };
                let Some(value) = step.arguments.get(&parameter.name) else {
                    continue;
                };
                if is_placeholder(value) {
                    continue;
                }
                let Some(name) = value.as_str() else {
                    continue;
                };

                let scope = scope_for(step, content_type);
                match resolver.resolve_name_to_id(content_type, name, scope).await {
                    Ok(_) => {}
                    Err(err @ ResolveError::NotFound { .. }) => {
                        issues.push(Issue::for_step(
                            IssueCode::UnresolvedReference,
                            &step.id,
                            err.to_string(),
                        ));
                    }
                    Err(ResolveError::Unavailable(reason)) => {
                        debug!(step_id = %step.id, %reason, "Skipping reference check");
                    }
                }
            }
        }
        issues
    }
}

/// Workbooks and data sources are looked up within the step's project
fn scope_for(step: &WorkflowStep, content_type: ContentType) -> Option<&str> {
    match content_type {
        ContentType::Workbook | ContentType::Datasource => step
            .arguments
            .get("project_name")
            .and_then(|v| v.as_str()),
        _ => None,
    }
}

pub fn assess_risk(plan: &WorkflowPlan, catalog: &OperationCatalog) -> RiskAssessment {
    let mut score = 0;
    let mut factors = Vec::new();

    for step in &plan.steps {
        let Some(spec) = catalog.spec(&step.operation_name) else {
            continue;
        };
        let weight = spec.kind.risk_weight();
        score += weight;
        if weight >= 2 {
            factors.push(format!(
                "{} step '{}' ({})",
                format!("{:?}", spec.kind).to_lowercase(),
                step.id,
                step.operation_name
            ));
        }
    }

    if plan.steps.len() > LARGE_PLAN_STEPS {
        score += LARGE_PLAN_WEIGHT;
        factors.push(format!("large plan with {} steps", plan.steps.len()));
    }

    RiskAssessment {
        level: aggregate_risk(&plan.steps),
        score,
        factors,
        requires_confirmation: requires_confirmation(&plan.steps),
    }
}
