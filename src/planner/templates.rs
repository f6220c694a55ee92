//! Step skeletons for each templated intent kind
//!
//! Arguments written as `{{...}}` are placeholders bound at run time from the
//! results of upstream steps.

use serde_json::json;

use super::{RollbackOperation, StepDraft};
use crate::catalog::Arguments;
use crate::config::PlannerDefaults;
use crate::intent::WorkflowIntent;

/// Template output before catalog binding
#[derive(Debug, Clone)]
pub struct TemplatePlan {
    pub title: String,
    pub description: String,
    pub steps: Vec<StepDraft>,
}

fn rollback_args(pairs: &[(&str, serde_json::Value)]) -> Arguments {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn flag(intent: &WorkflowIntent, key: &str) -> bool {
    matches!(intent.parameter(key), Some("true") | Some("yes") | Some("1"))
}

pub fn cleanup(intent: &WorkflowIntent, defaults: &PlannerDefaults) -> TemplatePlan {
    let project = intent.parameter("project");
    let days = intent
        .parameter("age_threshold")
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(defaults.age_threshold_days);

    let mut steps = vec![
        StepDraft::new(
            "analyze",
            "analyze_usage_patterns",
            format!("Find content unused for {days} days"),
        )
        .arg("days_threshold", days)
        .arg_opt("project_name", project),
        StepDraft::new(
            "confirm",
            "request_user_confirmation",
            "Confirm the content to archive",
        )
        .arg("action", "archive")
        .arg("items", "{{candidates}}")
        .after("analyze"),
        StepDraft::new(
            "archive",
            "bulk_move_content",
            format!("Move confirmed content to {}", defaults.archive_project),
        )
        .arg("target_project", defaults.archive_project.as_str())
        .arg("items", "{{confirmed_items}}")
        .after("confirm")
        .rollback(RollbackOperation::new(
            "restore_from_archive",
            rollback_args(&[("items", json!("{{moved_items}}"))]),
        )),
    ];

    if flag(intent, "include_duplicates") {
        steps.push(
            StepDraft::new(
                "analyze_duplicates",
                "find_duplicate_content",
                "Find duplicate workbooks and data sources",
            )
            .arg_opt("project_name", project)
            .after("archive"),
        );
        steps.push(
            StepDraft::new(
                "consolidate",
                "consolidate_content",
                "Consolidate duplicates into canonical copies",
            )
            .arg("duplicates", "{{duplicates}}")
            .after("analyze_duplicates")
            .rollback(RollbackOperation::new(
                "restore_content",
                rollback_args(&[("items", json!("{{consolidated}}"))]),
            )),
        );
    }

    TemplatePlan {
        title: format!("Content Cleanup - {}", project.unwrap_or("all projects")),
        description: format!("Archive content not used in the last {days} days"),
        steps,
    }
}

pub fn migration(intent: &WorkflowIntent, defaults: &PlannerDefaults) -> TemplatePlan {
    let user = intent.parameter("user").unwrap_or("unknown_user");
    let target = intent
        .parameter("target_user")
        .unwrap_or(defaults.default_target_user.as_str());

    let steps = vec![
        StepDraft::new(
            "inventory",
            "get_user_content",
            format!("Inventory content owned by {user}"),
        )
        .arg("username", user),
        StepDraft::new(
            "analyze_importance",
            "analyze_content_importance",
            "Rank content by usage and references",
        )
        .arg("user", user)
        .arg("inventory", "{{content_inventory}}")
        .after("inventory"),
        StepDraft::new(
            "plan_migration",
            "create_migration_plan",
            format!("Decide what moves to {target}"),
        )
        .arg("from_user", user)
        .arg("to_user", target)
        .arg("importance", "{{importance_analysis}}")
        .after("analyze_importance"),
        StepDraft::new(
            "confirm",
            "request_user_confirmation",
            "Confirm the ownership transfer",
        )
        .arg("action", "transfer_ownership")
        .arg("items", "{{migration_plan.transfer_actions}}")
        .after("plan_migration"),
        StepDraft::new(
            "transfer_ownership",
            "bulk_transfer_ownership",
            format!("Transfer ownership from {user} to {target}"),
        )
        .arg("from_user", user)
        .arg("to_user", target)
        .arg("migration_plan", "{{migration_plan}}")
        .after("confirm")
        .rollback(RollbackOperation::new(
            "restore_ownership",
            rollback_args(&[
                ("original_user", json!(user)),
                ("transferred", json!("{{transferred}}")),
            ]),
        )),
        StepDraft::new(
            "revoke_permissions",
            "update_user_permissions",
            format!("Revoke site permissions for {user}"),
        )
        .arg("user", user)
        .arg("action", "revoke_all")
        .after("transfer_ownership")
        .rollback(RollbackOperation::new(
            "restore_permissions",
            rollback_args(&[
                ("user", json!(user)),
                ("permissions", json!("{{revoked_permissions}}")),
            ]),
        )),
    ];

    TemplatePlan {
        title: format!("User Migration - {user}"),
        description: format!("Transfer content from {user} to {target} and revoke access"),
        steps,
    }
}

pub fn audit(intent: &WorkflowIntent) -> TemplatePlan {
    let project = intent.parameter("project");
    let scope = intent.parameter("scope").unwrap_or("all");

    let steps = vec![
        StepDraft::new(
            "identify_content",
            "search_workbooks",
            "Identify content in scope",
        )
        .arg_opt("project_name", project),
        StepDraft::new(
            "analyze_permissions",
            "list_content_permissions",
            "List explicit permissions on the identified content",
        )
        .arg("content_type", "workbook")
        .arg("items", "{{workbooks}}")
        .after("identify_content"),
        StepDraft::new(
            "summarize_findings",
            "summarize_audit",
            "Summarize permission findings",
        )
        .arg("scope", scope)
        .arg("findings", "{{permissions}}")
        .after("analyze_permissions"),
    ];

    TemplatePlan {
        title: format!("Permission Audit - {}", project.unwrap_or("all content")),
        description: format!("Review permissions on {scope} content"),
        steps,
    }
}
