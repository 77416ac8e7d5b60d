//! Core abstractions for the dag engine
//!
//! This crate provides the workflow graph model that every other component
//! depends on: identifiers, nodes and their unit-of-work contract, edges and
//! their condition language, the workflow aggregate and its lifecycle events.
//! It has no scheduling logic of its own.

pub mod condition;
mod edge;
mod error;
pub mod events;
mod ids;
mod node;
mod workflow;

pub use edge::{Edge, EdgeBuilder, EdgeType};
pub use error::{FlowError, NodeError, WorkflowError};
pub use events::*;
pub use ids::{EdgeId, IdError, NodeId, WorkflowId};
pub use node::{
    fold_output, DynUnitOfWork, FnWork, Invocation, Node, NodeContext, NodeStatus, NodeType,
    UnitOfWork, ERROR_MESSAGE_KEY,
};
pub use serde_json::Value;
pub use workflow::{ErrorHandling, Workflow, WorkflowBuilder, WorkflowSettings, WorkflowStatus};

/// String-keyed map used for workflow context, node input and node output
pub type ContextMap = std::collections::HashMap<String, Value>;

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
