//! Operation catalog
//!
//! Maps an operation name to its parameter schema, declared risk tier and the
//! executor that performs it. The catalog is assembled once at startup and is
//! read-only afterwards, so it is shared between runs behind an `Arc` without
//! further synchronization.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub mod builtin;

pub use builtin::{admin_operation_specs, SimulatedOperation};

/// Arguments passed to an operation executor
pub type Arguments = serde_json::Map<String, Value>;

/// Declared risk of an operation, ordered from least to most risky
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    #[default]
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
        };
        f.write_str(s)
    }
}

/// What an operation does to site content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Read,
    Create,
    Update,
    Delete,
    Move,
    Publish,
    Refresh,
    /// A gate that asks a human to approve what follows it
    Confirmation,
}

impl OperationKind {
    /// Contribution of one step of this kind to a plan's risk score
    pub fn risk_weight(&self) -> u32 {
        match self {
            OperationKind::Delete => 3,
            OperationKind::Move => 2,
            OperationKind::Update => 1,
            _ => 0,
        }
    }

    /// Delete and move are not trivially reversible
    pub fn is_destructive(&self) -> bool {
        matches!(self, OperationKind::Delete | OperationKind::Move)
    }
}

/// Kinds of site content a name argument can refer to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Project,
    Workbook,
    Datasource,
    User,
    Group,
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContentType::Project => "project",
            ContentType::Workbook => "workbook",
            ContentType::Datasource => "datasource",
            ContentType::User => "user",
            ContentType::Group => "group",
        };
        f.write_str(s)
    }
}

/// JSON type accepted by a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    String,
    Integer,
    Boolean,
    Array,
    Object,
    Any,
}

impl ParameterType {
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParameterType::String => value.is_string(),
            ParameterType::Integer => value.is_i64() || value.is_u64(),
            ParameterType::Boolean => value.is_boolean(),
            ParameterType::Array => value.is_array(),
            ParameterType::Object => value.is_object(),
            ParameterType::Any => true,
        }
    }
}

/// Returns true for string values of the form `{{ ... }}`, which are bound at run time
pub fn is_placeholder(value: &Value) -> bool {
    value
        .as_str()
        .map(|s| {
            let s = s.trim();
            s.starts_with("{{") && s.ends_with("}}")
        })
        .unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    #[serde(default)]
    pub required: bool,
    /// Content type when the argument names a site resource
    #[serde(default)]
    pub resource: Option<ContentType>,
}

impl ParameterSpec {
    pub fn required(name: &str, param_type: ParameterType) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            required: true,
            resource: None,
        }
    }

    pub fn optional(name: &str, param_type: ParameterType) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type)
        }
    }

    pub fn resource(mut self, content_type: ContentType) -> Self {
        self.resource = Some(content_type);
        self
    }
}

/// Static description of one atomic admin operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSpec {
    pub name: String,
    pub description: String,
    pub kind: OperationKind,
    pub risk_tier: RiskTier,
    /// Delete, revoke or overwrite semantics
    pub destructive: bool,
    /// Safe to repeat after a timeout left the outcome unknown
    pub idempotent: bool,
    pub parameters: Vec<ParameterSpec>,
    /// Name of the operation that undoes this one
    pub inverse: Option<String>,
    pub estimated_seconds: u32,
}

impl OperationSpec {
    pub fn new(name: &str, kind: OperationKind, risk_tier: RiskTier) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            kind,
            risk_tier,
            destructive: kind.is_destructive(),
            idempotent: matches!(kind, OperationKind::Read | OperationKind::Confirmation),
            parameters: Vec::new(),
            inverse: None,
            estimated_seconds: 1,
        }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn param(mut self, parameter: ParameterSpec) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn inverse(mut self, operation: &str) -> Self {
        self.inverse = Some(operation.to_string());
        self
    }

    pub fn destructive(mut self, destructive: bool) -> Self {
        self.destructive = destructive;
        self
    }

    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    pub fn estimated_seconds(mut self, seconds: u32) -> Self {
        self.estimated_seconds = seconds;
        self
    }

    pub fn is_confirmation_gate(&self) -> bool {
        self.kind == OperationKind::Confirmation
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Check arguments against the parameter schema.
    ///
    /// Placeholder strings are accepted for any type since they are bound at
    /// run time. Returns one message per problem; empty means the arguments fit.
    pub fn check_arguments(&self, arguments: &Arguments) -> Vec<String> {
        let mut problems = Vec::new();

        for parameter in &self.parameters {
            match arguments.get(&parameter.name) {
                None | Some(Value::Null) if parameter.required => {
                    problems.push(format!(
                        "missing required argument '{}' for {}",
                        parameter.name, self.name
                    ));
                }
                Some(value)
                    if !value.is_null()
                        && !is_placeholder(value)
                        && !parameter.param_type.accepts(value) =>
                {
                    problems.push(format!(
                        "argument '{}' for {} must be {:?}",
                        parameter.name, self.name, parameter.param_type
                    ));
                }
                _ => {}
            }
        }

        problems
    }
}

/// Failure class that drives the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network, timeout or throttling; retried
    Transient,
    /// Validation or permission; never retried
    Permanent,
}

/// Error returned by an operation executor
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OperationError {
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl OperationError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    /// Classify an untyped failure message from the admin API
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        if is_transient_message(&message) {
            Self::Transient(message)
        } else {
            Self::Permanent(message)
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            OperationError::Transient(_) => ErrorClass::Transient,
            OperationError::Permanent(_) => ErrorClass::Permanent,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            OperationError::Transient(m) | OperationError::Permanent(m) => m,
        }
    }
}

fn is_transient_message(message: &str) -> bool {
    let transient_patterns = [
        "rate limit",
        "timeout",
        "timed out",
        "connection refused",
        "connection reset",
        "temporary failure",
        "network",
        "503",
        "429",
        "could not connect",
    ];

    let lower = message.to_lowercase();
    transient_patterns.iter().any(|p| lower.contains(p))
}

/// Capability that performs one catalog operation against the admin API
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    async fn execute(&self, arguments: &Arguments) -> Result<Value, OperationError>;
}

#[derive(Clone)]
pub struct CatalogEntry {
    pub spec: OperationSpec,
    pub executor: Arc<dyn OperationExecutor>,
}

impl fmt::Debug for CatalogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogEntry")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

/// Registry of operations available to workflow steps
#[derive(Debug, Clone, Default)]
pub struct OperationCatalog {
    entries: HashMap<String, CatalogEntry>,
}

impl OperationCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from specs, creating each executor with `factory`
    pub fn from_specs<F>(specs: Vec<OperationSpec>, factory: F) -> Self
    where
        F: Fn(&OperationSpec) -> Arc<dyn OperationExecutor>,
    {
        let mut catalog = Self::new();
        for spec in specs {
            let executor = factory(&spec);
            catalog.insert(spec, executor);
        }
        catalog
    }

    /// The built-in admin operations, each backed by a [`SimulatedOperation`]
    pub fn simulated() -> Self {
        Self::from_specs(admin_operation_specs(), |spec| {
            Arc::new(SimulatedOperation::new(&spec.name))
        })
    }

    pub fn register(mut self, spec: OperationSpec, executor: Arc<dyn OperationExecutor>) -> Self {
        self.insert(spec, executor);
        self
    }

    pub fn insert(&mut self, spec: OperationSpec, executor: Arc<dyn OperationExecutor>) {
        self.entries
            .insert(spec.name.clone(), CatalogEntry { spec, executor });
    }

    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries.get(name)
    }

    pub fn spec(&self, name: &str) -> Option<&OperationSpec> {
        self.entries.get(name).map(|e| &e.spec)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
