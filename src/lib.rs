//! # adminflow
//!
//! Workflow orchestration for administering an analytics site. A single
//! high-level request ("clean up the Finance project", "offboard user
//! john.doe") is turned into a dependency-ordered plan of atomic admin
//! operations, validated, gated on confirmation when risky, executed with
//! bounded parallelism, and rolled back on failure.
//!
//! ## Modules
//!
//! - `catalog` - Operation specs, risk tiers and executor capabilities
//! - `intent` - Request parsing into a structured intent
//! - `planner` - Intent to plan expansion via per-kind templates
//! - `graph` - Step dependency graph (cycles, ordering, ancestry)
//! - `validator` - Pre-execution checks and risk assessment
//! - `run` - Mutable run and step records, status views
//! - `executor` - Ready-set scheduling, retries, timeouts, cancellation
//! - `rollback` - Best-effort reversal of completed steps
//! - `store` - Plan and run persistence
//! - `events` - Progress event bus
//! - `confirmation` - Approval channel
//! - `orchestrator` - Lifecycle state machine and public surface
//! - `config` - Orchestrator configuration
//! - `testing` - Test doubles for collaborators

pub mod app;
pub mod catalog;
pub mod config;
pub mod confirmation;
pub mod error;
pub mod events;
pub mod executor;
pub mod graph;
pub mod intent;
pub mod orchestrator;
pub mod planner;
pub mod rollback;
pub mod run;
pub mod store;
pub mod validator;

pub mod testing;

pub use catalog::{OperationCatalog, OperationError, OperationExecutor, OperationSpec, RiskTier};
pub use config::OrchestratorConfig;
pub use confirmation::{
    AutoApprove, ConfirmationChannel, ConfirmationDecision, DeferredConfirmation,
};
pub use error::{AdminflowError, Result};
pub use intent::{IntentKind, IntentParser, WorkflowIntent};
pub use orchestrator::WorkflowOrchestrator;
pub use planner::{StepDraft, WorkflowPlan, WorkflowPlanner, WorkflowStep};
pub use run::{RunStatus, StepStatus, WorkflowRun, WorkflowStatusView};
pub use store::{InMemoryWorkflowStore, JsonFileStore, WorkflowStore};
pub use validator::{ValidationResult, WorkflowValidator};
