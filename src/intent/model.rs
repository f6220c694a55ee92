//! Language-model strategy
//!
//! Asks an external model to classify the request and return its parameters
//! as JSON. Any failure (transport error, prose instead of JSON, unknown
//! kind) is treated as "not recognized" so the parser falls back to custom.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

use super::{IntentKind, IntentStrategy, WorkflowIntent};

/// External completion service
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct ModelIntent {
    kind: String,
    #[serde(default)]
    parameters: serde_json::Map<String, Value>,
}

pub struct ModelStrategy {
    model: Arc<dyn LanguageModel>,
}

impl ModelStrategy {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    fn prompt(raw_text: &str) -> String {
        format!(
            "Classify this analytics site administration request.\n\
             Respond with only a JSON object of the form \
             {{\"kind\": \"cleanup|migration|audit|custom\", \"parameters\": {{...}}}}.\n\
             Use parameter keys project, user, target_user, age_threshold, scope \
             where they apply.\n\
             Request: {raw_text}"
        )
    }
}

/// Pull the outermost JSON object out of a completion that may carry prose or code fences
fn json_object(completion: &str) -> Option<&str> {
    let start = completion.find('{')?;
    let end = completion.rfind('}')?;
    (start < end).then(|| &completion[start..=end])
}

fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) fn adapt_completion(raw_text: &str, completion: &str) -> Option<WorkflowIntent> {
    let parsed: ModelIntent = serde_json::from_str(json_object(completion)?).ok()?;
    let kind = IntentKind::from_name(&parsed.kind)?;

    let extracted_parameters: BTreeMap<String, String> = if kind == IntentKind::Custom {
        BTreeMap::new()
    } else {
        parsed
            .parameters
            .iter()
            .filter_map(|(k, v)| stringify(v).map(|s| (k.clone(), s)))
            .collect()
    };

    Some(WorkflowIntent {
        kind,
        raw_text: raw_text.to_string(),
        extracted_parameters,
    })
}

#[async_trait]
impl IntentStrategy for ModelStrategy {
    fn name(&self) -> &'static str {
        "model"
    }

    async fn interpret(&self, raw_text: &str) -> Option<WorkflowIntent> {
        let completion = match self.model.complete(&Self::prompt(raw_text)).await {
            Ok(completion) => completion,
            Err(e) => {
                warn!("Language model unavailable for intent parsing: {e}");
                return None;
            }
        };

        let intent = adapt_completion(raw_text, &completion);
        if intent.is_none() {
            warn!("Language model returned an unusable intent");
        }
        intent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockLanguageModel;

    #[test]
    fn test_adapt_fenced_completion() {
        let completion = concat!(
            "Sure!\n```json\n",
            r#"{"kind": "cleanup", "parameters": {"project": "Ops", "age_threshold": 30}}"#,
            "\n```"
        );
        let intent = adapt_completion("tidy", completion).unwrap();

        assert_eq!(intent.kind, IntentKind::Cleanup);
        assert_eq!(intent.parameter("project"), Some("Ops"));
        assert_eq!(intent.parameter("age_threshold"), Some("30"));
        assert_eq!(intent.raw_text, "tidy");
    }

    #[test]
    fn test_custom_answer_drops_parameters() {
        let completion = r#"{"kind": "custom", "parameters": {"project": "Ops", "user": "mark"}}"#;
        let intent = adapt_completion("rename the dashboards", completion).unwrap();

        assert_eq!(intent.kind, IntentKind::Custom);
        assert!(intent.extracted_parameters.is_empty());
        assert_eq!(intent.raw_text, "rename the dashboards");
    }

    #[test]
    fn test_adapt_rejects_prose_and_unknown_kinds() {
        assert!(adapt_completion("x", "I cannot help with that").is_none());
        assert!(adapt_completion("x", r#"{"kind": "deploy"}"#).is_none());
    }

    #[tokio::test]
    async fn test_model_failure_is_not_recognized() {
        let strategy = ModelStrategy::new(Arc::new(MockLanguageModel::failing()));
        assert!(strategy.interpret("anything").await.is_none());
    }
}
