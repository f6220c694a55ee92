//! Intent parsing
//!
//! Turns a free-form administration request into a [`WorkflowIntent`].
//! Strategies are tried in order: the keyword template strategy is always
//! present and always first; a language-model strategy can be appended when
//! configured. Parsing never fails; unrecognized requests become
//! [`IntentKind::Custom`] with no parameters and the raw text preserved.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub mod extract;
pub mod model;
pub mod template;

pub use model::{LanguageModel, ModelStrategy};
pub use template::TemplateStrategy;

use crate::config::OrchestratorConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    Cleanup,
    Migration,
    Audit,
    Custom,
}

impl IntentKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "cleanup" | "content_cleanup" => Some(IntentKind::Cleanup),
            "migration" | "user_migration" => Some(IntentKind::Migration),
            "audit" | "permission_audit" => Some(IntentKind::Audit),
            "custom" => Some(IntentKind::Custom),
            _ => None,
        }
    }
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IntentKind::Cleanup => "cleanup",
            IntentKind::Migration => "migration",
            IntentKind::Audit => "audit",
            IntentKind::Custom => "custom",
        };
        f.write_str(s)
    }
}

/// Structured interpretation of a free-form request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowIntent {
    pub kind: IntentKind,
    pub raw_text: String,
    pub extracted_parameters: BTreeMap<String, String>,
}

impl WorkflowIntent {
    pub fn new(kind: IntentKind, raw_text: impl Into<String>) -> Self {
        Self {
            kind,
            raw_text: raw_text.into(),
            extracted_parameters: BTreeMap::new(),
        }
    }

    pub fn custom(raw_text: impl Into<String>) -> Self {
        Self::new(IntentKind::Custom, raw_text)
    }

    pub fn with_parameter(mut self, key: &str, value: impl Into<String>) -> Self {
        self.extracted_parameters
            .insert(key.to_string(), value.into());
        self
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.extracted_parameters.get(key).map(String::as_str)
    }
}

/// One way of interpreting a request
#[async_trait]
pub trait IntentStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `None` when this strategy does not recognize the request
    async fn interpret(&self, raw_text: &str) -> Option<WorkflowIntent>;
}

pub struct IntentParser {
    strategies: Vec<Box<dyn IntentStrategy>>,
}

impl Default for IntentParser {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentParser {
    /// Template matching only
    pub fn new() -> Self {
        Self {
            strategies: vec![Box::new(TemplateStrategy::new())],
        }
    }

    /// Template matching, then the language model for anything unmatched
    pub fn with_model(model: Arc<dyn LanguageModel>) -> Self {
        let mut parser = Self::new();
        parser
            .strategies
            .push(Box::new(ModelStrategy::new(model)));
        parser
    }

    /// Select strategies from configuration; the model is consulted only when
    /// enabled and supplied
    pub fn from_config(config: &OrchestratorConfig, model: Option<Arc<dyn LanguageModel>>) -> Self {
        match model {
            Some(model) if config.use_language_model => Self::with_model(model),
            _ => Self::new(),
        }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub async fn parse(&self, raw_text: &str) -> WorkflowIntent {
        for strategy in &self.strategies {
            if let Some(intent) = strategy.interpret(raw_text).await {
                debug!(
                    strategy = strategy.name(),
                    kind = %intent.kind,
                    "Request interpreted"
                );
                return intent;
            }
        }

        debug!("No strategy recognized request, falling back to custom");
        WorkflowIntent::custom(raw_text)
    }
}
