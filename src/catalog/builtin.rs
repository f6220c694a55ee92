//! Built-in admin operations
//!
//! Specs for the content, ownership and permission operations the workflow
//! templates are composed from. Executors are supplied by the embedding
//! application; [`SimulatedOperation`] stands in for dry runs.

use super::{
    Arguments, ContentType, OperationError, OperationExecutor, OperationKind, OperationSpec,
    ParameterSpec, RiskTier,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::ParameterType::{Any, Array, Integer, String as Text};

pub fn admin_operation_specs() -> Vec<OperationSpec> {
    vec![
        // Read-only discovery
        OperationSpec::new("search_workbooks", OperationKind::Read, RiskTier::Low)
            .describe("Search workbooks, optionally within one project")
            .param(ParameterSpec::optional("project_name", Text).resource(ContentType::Project))
            .param(ParameterSpec::optional("name", Text))
            .estimated_seconds(2),
        OperationSpec::new("analyze_usage_patterns", OperationKind::Read, RiskTier::Low)
            .describe("Find content not accessed within a number of days")
            .param(ParameterSpec::optional("project_name", Text).resource(ContentType::Project))
            .param(ParameterSpec::required("days_threshold", Integer))
            .estimated_seconds(5),
        OperationSpec::new("find_duplicate_content", OperationKind::Read, RiskTier::Low)
            .describe("Group workbooks and data sources that duplicate each other")
            .param(ParameterSpec::optional("project_name", Text).resource(ContentType::Project))
            .estimated_seconds(5),
        OperationSpec::new("get_user_content", OperationKind::Read, RiskTier::Low)
            .describe("Inventory everything a user owns")
            .param(ParameterSpec::required("username", Text).resource(ContentType::User))
            .estimated_seconds(3),
        OperationSpec::new("analyze_content_importance", OperationKind::Read, RiskTier::Low)
            .describe("Rank a user's content by usage and references")
            .param(ParameterSpec::required("user", Text).resource(ContentType::User))
            .param(ParameterSpec::optional("inventory", Any))
            .estimated_seconds(5),
        OperationSpec::new("create_migration_plan", OperationKind::Read, RiskTier::Low)
            .describe("Decide which content moves to which owner")
            .param(ParameterSpec::required("from_user", Text).resource(ContentType::User))
            .param(ParameterSpec::required("to_user", Text).resource(ContentType::User))
            .param(ParameterSpec::optional("importance", Any))
            .estimated_seconds(2),
        OperationSpec::new("list_content_permissions", OperationKind::Read, RiskTier::Low)
            .describe("List explicit permissions on content")
            .param(ParameterSpec::required("content_type", Text))
            .param(ParameterSpec::optional("items", Any))
            .estimated_seconds(5),
        OperationSpec::new("summarize_audit", OperationKind::Read, RiskTier::Low)
            .describe("Summarize permission findings")
            .param(ParameterSpec::optional("scope", Text))
            .param(ParameterSpec::optional("findings", Any))
            .estimated_seconds(1),
        // Gate
        OperationSpec::new(
            "request_user_confirmation",
            OperationKind::Confirmation,
            RiskTier::Low,
        )
        .describe("Ask an administrator to approve the items that follow")
        .param(ParameterSpec::required("action", Text))
        .param(ParameterSpec::optional("items", Any))
        .estimated_seconds(1),
        // Mutations
        OperationSpec::new("bulk_move_content", OperationKind::Move, RiskTier::Medium)
            .describe("Move content items into a target project")
            .param(ParameterSpec::required("target_project", Text).resource(ContentType::Project))
            .param(ParameterSpec::required("items", Array))
            .inverse("restore_from_archive")
            .idempotent(true)
            .estimated_seconds(10),
        OperationSpec::new("restore_from_archive", OperationKind::Move, RiskTier::Medium)
            .describe("Move archived items back to their original projects")
            .param(ParameterSpec::required("items", Any))
            .idempotent(true)
            .estimated_seconds(10),
        OperationSpec::new("consolidate_content", OperationKind::Update, RiskTier::Medium)
            .describe("Replace duplicate content with a single canonical copy")
            .param(ParameterSpec::required("duplicates", Array))
            .destructive(true)
            .inverse("restore_content")
            .estimated_seconds(10),
        OperationSpec::new("restore_content", OperationKind::Create, RiskTier::Medium)
            .describe("Recreate content removed by consolidation")
            .param(ParameterSpec::required("items", Any))
            .estimated_seconds(10),
        OperationSpec::new("bulk_transfer_ownership", OperationKind::Update, RiskTier::Medium)
            .describe("Transfer ownership of content between users")
            .param(ParameterSpec::required("from_user", Text).resource(ContentType::User))
            .param(ParameterSpec::required("to_user", Text).resource(ContentType::User))
            .param(ParameterSpec::optional("migration_plan", Any))
            .inverse("restore_ownership")
            .idempotent(true)
            .estimated_seconds(10),
        OperationSpec::new("restore_ownership", OperationKind::Update, RiskTier::Medium)
            .describe("Return transferred content to its original owner")
            .param(ParameterSpec::required("original_user", Text))
            .param(ParameterSpec::optional("transferred", Any))
            .idempotent(true)
            .estimated_seconds(10),
        OperationSpec::new("update_user_permissions", OperationKind::Update, RiskTier::High)
            .describe("Grant or revoke a user's site permissions")
            .param(ParameterSpec::required("user", Text).resource(ContentType::User))
            .param(ParameterSpec::required("action", Text))
            .destructive(true)
            .inverse("restore_permissions")
            .idempotent(true)
            .estimated_seconds(5),
        OperationSpec::new("restore_permissions", OperationKind::Update, RiskTier::Medium)
            .describe("Reapply previously revoked permissions")
            .param(ParameterSpec::required("user", Text))
            .param(ParameterSpec::optional("permissions", Any))
            .idempotent(true)
            .estimated_seconds(5),
        OperationSpec::new("move_workbook", OperationKind::Move, RiskTier::Medium)
            .describe("Move a single workbook to another project")
            .param(ParameterSpec::required("workbook_name", Text).resource(ContentType::Workbook))
            .param(ParameterSpec::required("target_project", Text).resource(ContentType::Project))
            .idempotent(true)
            .estimated_seconds(2),
        OperationSpec::new("delete_workbook", OperationKind::Delete, RiskTier::High)
            .describe("Delete a workbook permanently")
            .param(ParameterSpec::required("workbook_name", Text).resource(ContentType::Workbook))
            .estimated_seconds(2),
    ]
}

/// Executor that performs nothing and echoes its arguments back
#[derive(Debug, Clone)]
pub struct SimulatedOperation {
    operation: String,
}

impl SimulatedOperation {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
        }
    }
}

#[async_trait]
impl OperationExecutor for SimulatedOperation {
    async fn execute(&self, arguments: &Arguments) -> Result<Value, OperationError> {
        debug!(operation = %self.operation, "Simulating operation");
        Ok(json!({
            "operation": self.operation,
            "simulated": true,
            "arguments": Value::Object(arguments.clone()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_builtin_names_are_unique() {
        let specs = admin_operation_specs();
        let names: HashSet<_> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names.len(), specs.len());
    }

    #[test]
    fn test_every_inverse_is_registered() {
        let specs = admin_operation_specs();
        let names: HashSet<_> = specs.iter().map(|s| s.name.clone()).collect();
        for spec in &specs {
            if let Some(inverse) = &spec.inverse {
                assert!(names.contains(inverse), "{} has unknown inverse", spec.name);
            }
        }
    }

    #[test]
    fn test_revoke_is_destructive_and_high_risk() {
        let specs = admin_operation_specs();
        let revoke = specs
            .iter()
            .find(|s| s.name == "update_user_permissions")
            .unwrap();
        assert!(revoke.destructive);
        assert_eq!(revoke.risk_tier, RiskTier::High);
    }

    #[test]
    fn test_reassignments_are_idempotent_but_consolidation_is_not() {
        let specs = admin_operation_specs();
        let spec = |name: &str| specs.iter().find(|s| s.name == name).unwrap();
        assert!(spec("bulk_transfer_ownership").idempotent);
        assert!(spec("restore_from_archive").idempotent);
        assert!(!spec("consolidate_content").idempotent);
        assert!(!spec("delete_workbook").idempotent);
        assert!(spec("move_workbook").inverse.is_none());
    }

    #[tokio::test]
    async fn test_simulated_operation_echoes_arguments() {
        let op = SimulatedOperation::new("search_workbooks");
        let mut args = Arguments::new();
        args.insert("project_name".into(), json!("Finance"));

        let result = op.execute(&args).await.unwrap();
        assert_eq!(result["operation"], "search_workbooks");
        assert_eq!(result["arguments"]["project_name"], "Finance");
    }
}
