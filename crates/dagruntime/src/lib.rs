//! Workflow execution runtime
//!
//! This crate provides the orchestration policy, the execution engine that
//! drives a workflow to completion, the coordinator that runs many
//! workflows on a bounded pool, and the service layer callers talk to.

mod assembler;
mod coordinator;
mod error;
mod executor;
mod orchestrator;
mod registry;
mod runtime;
mod service;
mod store;

pub use assembler::{
    CreateWorkflowCommand, EdgeDefinition, NodeDefinition, NodeSpec, WorkflowAssembler,
    WorkflowDefinition,
};
pub use coordinator::{
    ExecutionContext, ExecutionCoordinator, ExecutionHandle, ExecutionStatistics, ExecutionStatus,
    SaturationPolicy,
};
pub use error::CoordinatorError;
pub use executor::{ExecutionEngine, SharedWorkflow};
pub use orchestrator::{orchestrator_for, OrchestrationType, Orchestrator, StaticOrchestrator};
pub use registry::{FnFactory, NodeFactory, NodeMetadata, NodeRegistry, PortDefinition};
pub use runtime::{FlowRuntime, RuntimeConfig};
pub use service::{
    NodeStatusReport, OperationResult, WorkflowFilter, WorkflowService, WorkflowStatusReport,
    WorkflowSummary,
};
pub use store::{InMemoryWorkflowStore, WorkflowRepository};
