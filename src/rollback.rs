//! Rollback coordination
//!
//! Walks a run's succeeded steps newest first and invokes each step's
//! inverse operation. Rollback is best-effort: missing inverses and failing
//! inverses are recorded in the [`RollbackReport`] and the sweep carries on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::catalog::OperationCatalog;
use crate::events::{EventBus, WorkflowEvent};
use crate::executor::arguments::{resolve_arguments, ResultSource};
use crate::graph::StepGraph;
use crate::planner::WorkflowPlan;
use crate::run::WorkflowRun;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStatus {
    Succeeded,
    Failed,
    /// The step declares no inverse
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub step_id: String,
    pub rollback_operation: Option<String>,
    pub status: RollbackStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackReport {
    pub workflow_id: String,
    /// In the order the inverses were attempted
    pub records: Vec<RollbackRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RollbackReport {
    fn count(&self, status: RollbackStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }

    /// Inverse operations actually invoked, successful or not
    pub fn executed_count(&self) -> usize {
        self.count(RollbackStatus::Succeeded) + self.count(RollbackStatus::Failed)
    }

    pub fn skipped_count(&self) -> usize {
        self.count(RollbackStatus::Skipped)
    }

    pub fn failures(&self) -> Vec<&RollbackRecord> {
        self.records
            .iter()
            .filter(|r| r.status == RollbackStatus::Failed)
            .collect()
    }

    /// Every completed step was undone
    pub fn is_complete(&self) -> bool {
        self.records
            .iter()
            .all(|r| r.status == RollbackStatus::Succeeded)
    }

    pub fn record(&self, step_id: &str) -> Option<&RollbackRecord> {
        self.records.iter().find(|r| r.step_id == step_id)
    }
}

pub struct RollbackCoordinator {
    catalog: Arc<OperationCatalog>,
    step_timeout: Duration,
    events: Option<EventBus>,
}

impl RollbackCoordinator {
    pub fn new(catalog: Arc<OperationCatalog>, step_timeout: Duration) -> Self {
        Self {
            catalog,
            step_timeout,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub async fn rollback(&self, run: &WorkflowRun, plan: &WorkflowPlan) -> RollbackReport {
        let started_at = Utc::now();
        let graph = StepGraph::build(&plan.steps);
        let completed = run.succeeded_newest_first();
        let mut records = Vec::with_capacity(completed.len());

        info!(
            workflow_id = %run.id,
            steps = completed.len(),
            "Rolling back completed steps"
        );

        for step_run in &completed {
            let record = self.undo_step(run, plan, &graph, &step_run.step_id).await;
            if let Some(events) = &self.events {
                events.emit(WorkflowEvent::RollbackStep {
                    workflow_id: run.id.clone(),
                    step_id: record.step_id.clone(),
                    status: record.status,
                });
            }
            records.push(record);
        }

        RollbackReport {
            workflow_id: run.id.clone(),
            records,
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn undo_step(
        &self,
        run: &WorkflowRun,
        plan: &WorkflowPlan,
        graph: &StepGraph,
        step_id: &str,
    ) -> RollbackRecord {
        let rollback = plan.step(step_id).and_then(|s| s.rollback_operation.as_ref());
        let Some(rollback) = rollback else {
            info!(workflow_id = %run.id, %step_id, "No inverse declared, skipping");
            return RollbackRecord {
                step_id: step_id.to_string(),
                rollback_operation: None,
                status: RollbackStatus::Skipped,
                result: None,
                error: None,
            };
        };

        let failed = |error: String| {
            warn!(
                workflow_id = %run.id,
                %step_id,
                operation = %rollback.operation_name,
                %error,
                "Rollback action failed"
            );
            RollbackRecord {
                step_id: step_id.to_string(),
                rollback_operation: Some(rollback.operation_name.clone()),
                status: RollbackStatus::Failed,
                result: None,
                error: Some(error),
            }
        };

        let Some(entry) = self.catalog.get(&rollback.operation_name) else {
            return failed(format!(
                "operation '{}' is not in the catalog",
                rollback.operation_name
            ));
        };

        let arguments = resolve_arguments(&rollback.arguments, &sources_for(run, graph, step_id));

        match tokio::time::timeout(self.step_timeout, entry.executor.execute(&arguments)).await {
            Ok(Ok(result)) => {
                info!(
                    workflow_id = %run.id,
                    %step_id,
                    operation = %rollback.operation_name,
                    "Rolled back step"
                );
                RollbackRecord {
                    step_id: step_id.to_string(),
                    rollback_operation: Some(rollback.operation_name.clone()),
                    status: RollbackStatus::Succeeded,
                    result: Some(result),
                    error: None,
                }
            }
            Ok(Err(err)) => failed(err.to_string()),
            Err(_) => failed(format!("timed out after {:?}", self.step_timeout)),
        }
    }
}

/// The step's own result, then its dependencies' results newest first
fn sources_for<'a>(
    run: &'a WorkflowRun,
    graph: &StepGraph,
    step_id: &'a str,
) -> Vec<ResultSource<'a>> {
    let ancestors = graph.ancestors(step_id);
    let own = run
        .step_run(step_id)
        .and_then(|s| s.result.as_ref())
        .map(|r| ResultSource::new(step_id, r));

    own.into_iter()
        .chain(
            run.succeeded_newest_first()
                .into_iter()
                .filter(|s| ancestors.contains(&s.step_id))
                .filter_map(|s| s.result.as_ref().map(|r| ResultSource::new(&s.step_id, r))),
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{OperationKind, OperationSpec, RiskTier};
    use crate::config::PlannerDefaults;
    use crate::intent::WorkflowIntent;
    use crate::planner::{RollbackOperation, StepDraft, WorkflowPlanner};
    use crate::testing::MockOperation;
    use serde_json::json;

    fn catalog_with(undo: Arc<MockOperation>) -> Arc<OperationCatalog> {
        Arc::new(
            OperationCatalog::simulated().register(
                OperationSpec::new("undo_a", OperationKind::Update, RiskTier::Low),
                undo,
            ),
        )
    }

    fn plan(catalog: &Arc<OperationCatalog>) -> WorkflowPlan {
        WorkflowPlanner::new(catalog.clone(), PlannerDefaults::default())
            .plan_custom(
                &WorkflowIntent::custom("two steps"),
                vec![
                    StepDraft::new("a", "search_workbooks", "a").rollback(RollbackOperation::new(
                        "undo_a",
                        [("ids".to_string(), json!("{{ids}}"))].into_iter().collect(),
                    )),
                    StepDraft::new("b", "search_workbooks", "b").after("a"),
                ],
            )
            .unwrap()
    }

    #[tokio::test]
    async fn test_missing_inverse_is_skipped_not_swallowed() {
        let undo = Arc::new(MockOperation::succeeding(json!({"restored": true})));
        let catalog = catalog_with(undo.clone());
        let plan = plan(&catalog);

        let mut run = WorkflowRun::new(&plan);
        run.mark_succeeded("a", json!({"ids": [1, 2]}), 0);
        run.mark_succeeded("b", json!({}), 0);

        let report = RollbackCoordinator::new(catalog, Duration::from_secs(1))
            .rollback(&run, &plan)
            .await;

        assert_eq!(report.records[0].step_id, "b");
        assert_eq!(report.records[0].status, RollbackStatus::Skipped);
        assert_eq!(report.records[0].rollback_operation, None);
        assert_eq!(report.records[1].status, RollbackStatus::Succeeded);
        assert_eq!(report.executed_count(), 1);
        assert_eq!(report.skipped_count(), 1);
        assert!(!report.is_complete());
        assert_eq!(undo.calls()[0]["ids"], json!([1, 2]));
    }

    #[tokio::test]
    async fn test_failed_inverse_is_recorded_and_sweep_continues() {
        let undo = Arc::new(MockOperation::failing_permanently("owner no longer exists"));
        let catalog = catalog_with(undo.clone());
        let plan = plan(&catalog);

        let mut run = WorkflowRun::new(&plan);
        run.mark_succeeded("a", json!({}), 0);

        let report = RollbackCoordinator::new(catalog, Duration::from_secs(1))
            .rollback(&run, &plan)
            .await;

        let failures = report.failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[0]
            .error
            .as_deref()
            .unwrap()
            .contains("owner no longer exists"));
        assert_eq!(undo.call_count(), 1);
    }

    #[tokio::test]
    async fn test_sweep_continues_past_failed_inverse() {
        let undo_a = Arc::new(MockOperation::succeeding(json!({"restored": true})));
        let undo_b = Arc::new(MockOperation::failing_permanently("target project was deleted"));
        let catalog = Arc::new(
            OperationCatalog::simulated()
                .register(
                    OperationSpec::new("undo_a", OperationKind::Update, RiskTier::Low),
                    undo_a.clone(),
                )
                .register(
                    OperationSpec::new("undo_b", OperationKind::Update, RiskTier::Low),
                    undo_b.clone(),
                ),
        );
        let plan = WorkflowPlanner::new(catalog.clone(), PlannerDefaults::default())
            .plan_custom(
                &WorkflowIntent::custom("two reversible steps"),
                vec![
                    StepDraft::new("a", "search_workbooks", "a")
                        .rollback(RollbackOperation::new("undo_a", Default::default())),
                    StepDraft::new("b", "search_workbooks", "b")
                        .after("a")
                        .rollback(RollbackOperation::new("undo_b", Default::default())),
                ],
            )
            .unwrap();

        let mut run = WorkflowRun::new(&plan);
        run.mark_succeeded("a", json!({}), 0);
        run.mark_succeeded("b", json!({}), 0);

        let report = RollbackCoordinator::new(catalog, Duration::from_secs(1))
            .rollback(&run, &plan)
            .await;

        let order: Vec<_> = report.records.iter().map(|r| r.step_id.as_str()).collect();
        assert_eq!(order, vec!["b", "a"]);
        assert_eq!(undo_b.call_count(), 1);
        assert_eq!(undo_a.call_count(), 1);
        assert_eq!(report.failures().len(), 1);
        assert_eq!(report.failures()[0].step_id, "b");
        assert_eq!(report.record("a").unwrap().status, RollbackStatus::Succeeded);
        assert_eq!(report.executed_count(), 2);
    }

    #[tokio::test]
    async fn test_nothing_completed_gives_empty_report() {
        let catalog = Arc::new(OperationCatalog::simulated());
        let plan = plan(&catalog_with(Arc::new(MockOperation::succeeding(json!({})))));
        let run = WorkflowRun::new(&plan);

        let report = RollbackCoordinator::new(catalog, Duration::from_secs(1))
            .rollback(&run, &plan)
            .await;
        assert!(report.records.is_empty());
        assert!(report.is_complete());
    }
}
