//! End-to-end workflow lifecycle through the public orchestrator surface

mod common;

use std::sync::Arc;
use std::time::Duration;

use adminflow::catalog::{ErrorClass, OperationCatalog, OperationError, RiskTier};
use adminflow::error::ErrorCode;
use adminflow::events::WorkflowEvent;
use adminflow::planner::RollbackOperation;
use adminflow::testing::MockOperation;
use adminflow::validator::IssueCode;
use adminflow::{
    AutoApprove, InMemoryWorkflowStore, JsonFileStore, RunStatus, StepDraft, StepStatus,
    WorkflowOrchestrator, WorkflowStore,
};
use common::{auto_approving, catalog_with, deferring, op_spec};
use serde_json::json;
use tempfile::TempDir;

#[tokio::test]
async fn test_finance_cleanup_plan_shape() {
    let orchestrator = deferring(Arc::new(OperationCatalog::simulated()));

    let (plan, validation) = orchestrator
        .preview("Clean up content older than 90 days in the Finance project")
        .await
        .unwrap();

    let ids: Vec<&str> = plan.steps.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["analyze", "confirm", "archive"]);
    assert!(plan.step("confirm").unwrap().depends_on.contains("analyze"));
    assert!(plan.step("archive").unwrap().depends_on.contains("confirm"));
    assert_eq!(plan.aggregate_risk, RiskTier::Medium);
    assert!(plan.requires_confirmation);
    assert!(validation.is_valid);
}

#[tokio::test]
async fn test_cleanup_waits_then_runs_after_approval() {
    let orchestrator = deferring(Arc::new(OperationCatalog::simulated()));
    let id = orchestrator
        .submit("Clean up the Finance project")
        .await
        .unwrap();

    let view = orchestrator.get_status(&id).await.unwrap();
    assert_eq!(view.status, RunStatus::AwaitingConfirmation);
    assert_eq!(view.progress.completed, 0);

    assert_eq!(
        orchestrator.confirm(&id, true).await.unwrap(),
        RunStatus::Succeeded
    );
    let view = orchestrator.get_status(&id).await.unwrap();
    assert_eq!(view.progress.completed, view.progress.total);
    assert!(view.rollback.is_none());
}

#[tokio::test]
async fn test_declined_confirmation_executes_nothing() {
    let guarded = Arc::new(MockOperation::succeeding(json!({})));
    let catalog = catalog_with(vec![(op_spec("reassign", RiskTier::Medium), guarded.clone())]);
    let orchestrator = deferring(catalog);

    let id = orchestrator
        .submit_steps(
            "reassign dashboards",
            vec![StepDraft::new("reassign", "reassign", "Reassign dashboards")],
        )
        .await
        .unwrap();
    assert_eq!(
        orchestrator.get_status(&id).await.unwrap().status,
        RunStatus::AwaitingConfirmation
    );

    let status = orchestrator.confirm(&id, false).await.unwrap();

    assert_eq!(status, RunStatus::Cancelled);
    assert_eq!(guarded.call_count(), 0);
    let view = orchestrator.get_status(&id).await.unwrap();
    assert!(view.steps.iter().all(|s| s.status == StepStatus::Pending));
}

#[tokio::test]
async fn test_transient_failure_recovers_on_retry() {
    let flaky = Arc::new(MockOperation::scripted(vec![
        Err(OperationError::transient("503 service unavailable")),
        Ok(json!({"refreshed": 12})),
    ]));
    let catalog = catalog_with(vec![(op_spec("refresh_extracts", RiskTier::Low), flaky.clone())]);
    let orchestrator = auto_approving(catalog);

    let id = orchestrator
        .submit_steps(
            "refresh extracts",
            vec![StepDraft::new("refresh", "refresh_extracts", "Refresh extracts")],
        )
        .await
        .unwrap();

    let view = orchestrator.get_status(&id).await.unwrap();
    assert_eq!(view.status, RunStatus::Succeeded);
    let step = &view.steps[0];
    assert_eq!(step.status, StepStatus::Succeeded);
    assert_eq!(step.retry_count, 1);
    assert_eq!(flaky.call_count(), 2);
}

#[tokio::test]
async fn test_unknown_operation_fails_validation() {
    let orchestrator = auto_approving(Arc::new(OperationCatalog::simulated()));

    let id = orchestrator
        .submit_steps(
            "do something odd",
            vec![StepDraft::new("odd", "unknown_op", "Not in the catalog")],
        )
        .await
        .unwrap();

    let view = orchestrator.get_status(&id).await.unwrap();
    assert_eq!(view.status, RunStatus::Failed);
    let validation = view.validation.unwrap();
    assert!(!validation.is_valid);
    assert_eq!(validation.blocking_issues.len(), 1);
    assert_eq!(validation.blocking_issues[0].code, IssueCode::UnknownOperation);
    assert!(validation.warnings.is_empty());
    assert!(view.rollback.is_none());
    assert!(view.steps.iter().all(|s| s.status == StepStatus::Pending));
}

#[tokio::test]
async fn test_failure_after_two_steps_rolls_back_one() {
    let step_a = Arc::new(MockOperation::succeeding(json!({"moved": ["wb-1"]})));
    let step_b = Arc::new(MockOperation::succeeding(json!({"tagged": 3})));
    let undo_a = Arc::new(MockOperation::succeeding(json!({"restored": 1})));
    let boom = Arc::new(MockOperation::failing_permanently("permission denied"));
    let catalog = catalog_with(vec![
        (op_spec("step_a", RiskTier::Low), step_a.clone()),
        (op_spec("step_b", RiskTier::Low), step_b.clone()),
        (op_spec("undo_a", RiskTier::Low), undo_a.clone()),
        (op_spec("boom", RiskTier::Low), boom.clone()),
    ]);
    let orchestrator = auto_approving(catalog);

    let mut undo_args = serde_json::Map::new();
    undo_args.insert("input".into(), json!("{{moved}}"));
    let id = orchestrator
        .submit_steps(
            "move and tag",
            vec![
                StepDraft::new("a", "step_a", "Move workbooks")
                    .rollback(RollbackOperation::new("undo_a", undo_args)),
                StepDraft::new("b", "step_b", "Tag workbooks"),
                StepDraft::new("c", "boom", "Publish").after("a").after("b"),
            ],
        )
        .await
        .unwrap();

    let view = orchestrator.get_status(&id).await.unwrap();
    assert_eq!(view.status, RunStatus::RolledBack);

    let failed = view.failed_step.unwrap();
    assert_eq!(failed.step_id, "c");
    assert_eq!(failed.class, ErrorClass::Permanent);

    let report = view.rollback.unwrap();
    assert_eq!(report.executed_count(), 1);
    assert_eq!(report.skipped_count(), 1);
    assert!(report.record("b").is_some());
    assert_eq!(undo_a.call_count(), 1);
    assert_eq!(undo_a.calls()[0]["input"], json!(["wb-1"]));
    assert_eq!(boom.call_count(), 1);
}

#[tokio::test]
async fn test_same_plan_runs_independently() {
    let orchestrator = auto_approving(Arc::new(OperationCatalog::simulated()));
    let (plan, _) = orchestrator
        .preview("Audit permissions in the Sales project")
        .await
        .unwrap();

    let first = orchestrator.submit_plan(plan.clone()).await.unwrap();
    let second = orchestrator.submit_plan(plan).await.unwrap();
    assert_ne!(first, second);

    let first = orchestrator.get_status(&first).await.unwrap();
    let second = orchestrator.get_status(&second).await.unwrap();
    assert_eq!(first.plan_id, second.plan_id);
    assert_eq!(first.status, RunStatus::Succeeded);
    assert_eq!(second.status, RunStatus::Succeeded);
    assert_eq!(orchestrator.list_runs().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_cancel_while_running() {
    let slow = Arc::new(
        MockOperation::succeeding(json!({})).with_delay(Duration::from_millis(200)),
    );
    let after = Arc::new(MockOperation::succeeding(json!({})));
    let catalog = catalog_with(vec![
        (op_spec("slow_export", RiskTier::Low), slow.clone()),
        (op_spec("after_export", RiskTier::Low), after.clone()),
    ]);
    let orchestrator = Arc::new(auto_approving(catalog));
    let mut events = orchestrator.events().subscribe();

    let runner = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .submit_steps(
                    "export then notify",
                    vec![
                        StepDraft::new("export", "slow_export", "Export"),
                        StepDraft::new("notify", "after_export", "Notify").after("export"),
                    ],
                )
                .await
        })
    };

    let workflow_id = loop {
        match events.recv().await.unwrap() {
            WorkflowEvent::StepStarted { workflow_id, .. } => break workflow_id,
            _ => continue,
        }
    };
    assert_eq!(
        orchestrator.cancel(&workflow_id).await.unwrap(),
        RunStatus::Running
    );

    let submitted = runner.await.unwrap().unwrap();
    assert_eq!(submitted, workflow_id);

    let view = orchestrator.get_status(&workflow_id).await.unwrap();
    assert_eq!(view.status, RunStatus::Cancelled);
    assert_eq!(after.call_count(), 0);
    let notify = view.steps.iter().find(|s| s.step_id == "notify").unwrap();
    assert_eq!(notify.status, StepStatus::Skipped);
    assert!(view.rollback.is_some());
}

#[tokio::test]
async fn test_confirmation_survives_restart() {
    let dir = TempDir::new().unwrap();

    let id = {
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        let orchestrator =
            WorkflowOrchestrator::builder(Arc::new(OperationCatalog::simulated()))
                .store(Arc::new(store))
                .build();
        orchestrator
            .submit("Clean up the Marketing project")
            .await
            .unwrap()
    };

    let store = JsonFileStore::open(dir.path()).await.unwrap();
    let orchestrator = WorkflowOrchestrator::builder(Arc::new(OperationCatalog::simulated()))
        .store(Arc::new(store))
        .build();

    assert_eq!(
        orchestrator.get_status(&id).await.unwrap().status,
        RunStatus::AwaitingConfirmation
    );
    assert_eq!(
        orchestrator.confirm(&id, true).await.unwrap(),
        RunStatus::Succeeded
    );

    let runs = orchestrator.list_runs().await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Succeeded);
}

#[tokio::test]
async fn test_rollback_continues_past_failed_inverse() {
    let undo_a = Arc::new(MockOperation::succeeding(json!({"restored": 1})));
    let undo_b = Arc::new(MockOperation::failing_permanently("tag was deleted"));
    let catalog = catalog_with(vec![
        (op_spec("step_a", RiskTier::Low), Arc::new(MockOperation::succeeding(json!({})))),
        (op_spec("step_b", RiskTier::Low), Arc::new(MockOperation::succeeding(json!({})))),
        (op_spec("undo_a", RiskTier::Low), undo_a.clone()),
        (op_spec("undo_b", RiskTier::Low), undo_b.clone()),
        (
            op_spec("boom", RiskTier::Low),
            Arc::new(MockOperation::failing_permanently("quota exceeded")),
        ),
    ]);
    let orchestrator = auto_approving(catalog);

    let id = orchestrator
        .submit_steps(
            "move, tag and publish",
            vec![
                StepDraft::new("a", "step_a", "Move workbooks")
                    .rollback(RollbackOperation::new("undo_a", Default::default())),
                StepDraft::new("b", "step_b", "Tag workbooks")
                    .after("a")
                    .rollback(RollbackOperation::new("undo_b", Default::default())),
                StepDraft::new("c", "boom", "Publish").after("b"),
            ],
        )
        .await
        .unwrap();

    let view = orchestrator.get_status(&id).await.unwrap();
    assert_eq!(view.status, RunStatus::RolledBack);

    let report = view.rollback.unwrap();
    let order: Vec<&str> = report.records.iter().map(|r| r.step_id.as_str()).collect();
    assert_eq!(order, vec!["b", "a"]);
    let failures = report.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].step_id, "b");
    assert_eq!(undo_b.call_count(), 1);
    assert_eq!(undo_a.call_count(), 1);
}

#[tokio::test]
async fn test_status_is_readable_while_a_step_runs() {
    let fast = Arc::new(MockOperation::succeeding(json!({"found": 4})));
    let slow = Arc::new(
        MockOperation::succeeding(json!({})).with_delay(Duration::from_millis(300)),
    );
    let catalog = catalog_with(vec![
        (op_spec("find_stale", RiskTier::Low), fast),
        (op_spec("slow_export", RiskTier::Low), slow),
    ]);
    let orchestrator = Arc::new(auto_approving(catalog));
    let mut events = orchestrator.events().subscribe();

    let runner = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .submit_steps(
                    "find then export",
                    vec![
                        StepDraft::new("find", "find_stale", "Find stale content"),
                        StepDraft::new("export", "slow_export", "Export").after("find"),
                    ],
                )
                .await
        })
    };

    let workflow_id = loop {
        match events.recv().await.unwrap() {
            WorkflowEvent::StepStarted { workflow_id, step_id, .. } if step_id == "export" => {
                break workflow_id
            }
            _ => continue,
        }
    };

    let view = orchestrator.get_status(&workflow_id).await.unwrap();
    assert_eq!(view.status, RunStatus::Running);
    assert_eq!(view.progress.running, vec!["export".to_string()]);
    assert_eq!(view.progress.completed, 1);
    assert_eq!(view.progress.total, 2);
    assert!(!runner.is_finished());

    runner.await.unwrap().unwrap();
    let view = orchestrator.get_status(&workflow_id).await.unwrap();
    assert_eq!(view.status, RunStatus::Succeeded);
    assert!(view.progress.running.is_empty());
}

#[tokio::test]
async fn test_other_orchestrator_cannot_take_over_running_run() {
    let slow = Arc::new(
        MockOperation::succeeding(json!({})).with_delay(Duration::from_millis(300)),
    );
    let catalog = catalog_with(vec![(op_spec("slow_export", RiskTier::Low), slow)]);
    let store = Arc::new(InMemoryWorkflowStore::new());
    let owner = Arc::new(
        WorkflowOrchestrator::builder(catalog.clone())
            .store(store.clone())
            .confirmation(Arc::new(AutoApprove))
            .build(),
    );
    let other = WorkflowOrchestrator::builder(catalog)
        .store(store.clone())
        .build();
    let mut events = owner.events().subscribe();

    let runner = {
        let owner = owner.clone();
        tokio::spawn(async move {
            owner
                .submit_steps("export", vec![StepDraft::new("export", "slow_export", "Export")])
                .await
        })
    };

    let workflow_id = loop {
        match events.recv().await.unwrap() {
            WorkflowEvent::StepStarted { workflow_id, .. } => break workflow_id,
            _ => continue,
        }
    };

    let err = other.cancel(&workflow_id).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::WORKFLOW_INVALID_TRANSITION);
    let err = other.confirm(&workflow_id, true).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::WORKFLOW_INVALID_TRANSITION);
    assert_eq!(
        other.get_status(&workflow_id).await.unwrap().status,
        RunStatus::Running
    );

    runner.await.unwrap().unwrap();

    // Nothing the other orchestrator did shadows or overwrites the outcome
    assert_eq!(
        other.get_status(&workflow_id).await.unwrap().status,
        RunStatus::Succeeded
    );
    let stored = store.load_run(&workflow_id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Succeeded);
    assert!(!stored.cancel_requested);
}
