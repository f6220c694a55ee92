//! Keyword template strategy

use async_trait::async_trait;

use super::extract::extract_parameters;
use super::{IntentKind, IntentStrategy, WorkflowIntent};

const CLEANUP_KEYWORDS: &[&str] = &[
    "clean up",
    "cleanup",
    "archive",
    "remove unused",
    "organize content",
    "tidy up",
];

const MIGRATION_KEYWORDS: &[&str] = &[
    "migrate",
    "transfer",
    "move user",
    "reassign",
    "user leaving",
    "offboard",
];

const AUDIT_KEYWORDS: &[&str] = &[
    "audit",
    "review permissions",
    "check access",
    "security review",
    "compliance",
];

/// Match a request against the fixed keyword sets, in precedence order
pub fn match_kind(raw_text: &str) -> Option<IntentKind> {
    let lower = raw_text.to_lowercase();
    let matches = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(k));

    if matches(CLEANUP_KEYWORDS) {
        Some(IntentKind::Cleanup)
    } else if matches(MIGRATION_KEYWORDS) {
        Some(IntentKind::Migration)
    } else if matches(AUDIT_KEYWORDS) {
        Some(IntentKind::Audit)
    } else {
        None
    }
}

#[derive(Debug, Default, Clone)]
pub struct TemplateStrategy;

impl TemplateStrategy {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl IntentStrategy for TemplateStrategy {
    fn name(&self) -> &'static str {
        "template"
    }

    async fn interpret(&self, raw_text: &str) -> Option<WorkflowIntent> {
        let kind = match_kind(raw_text)?;
        Some(WorkflowIntent {
            kind,
            raw_text: raw_text.to_string(),
            extracted_parameters: extract_parameters(kind, raw_text),
        })
    }
}
