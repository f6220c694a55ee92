//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::Arc;

use adminflow::catalog::{
    OperationCatalog, OperationKind, OperationSpec, ParameterSpec, ParameterType, RiskTier,
};
use adminflow::testing::MockOperation;
use adminflow::{AutoApprove, ConfirmationChannel, DeferredConfirmation, WorkflowOrchestrator};

/// A spec that accepts any `input` argument
pub fn op_spec(name: &str, risk: RiskTier) -> OperationSpec {
    OperationSpec::new(name, OperationKind::Update, risk)
        .param(ParameterSpec::optional("input", ParameterType::Any))
}

/// The simulated admin catalog with extra mock operations registered
pub fn catalog_with(ops: Vec<(OperationSpec, Arc<MockOperation>)>) -> Arc<OperationCatalog> {
    let mut catalog = OperationCatalog::simulated();
    for (spec, op) in ops {
        catalog.insert(spec, op);
    }
    Arc::new(catalog)
}

pub fn auto_approving(catalog: Arc<OperationCatalog>) -> WorkflowOrchestrator {
    build(catalog, Arc::new(AutoApprove))
}

pub fn deferring(catalog: Arc<OperationCatalog>) -> WorkflowOrchestrator {
    build(catalog, Arc::new(DeferredConfirmation))
}

fn build(
    catalog: Arc<OperationCatalog>,
    confirmation: Arc<dyn ConfirmationChannel>,
) -> WorkflowOrchestrator {
    WorkflowOrchestrator::builder(catalog)
        .confirmation(confirmation)
        .build()
}
