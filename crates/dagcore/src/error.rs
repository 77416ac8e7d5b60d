use crate::ids::IdError;
use crate::node::NodeStatus;
use crate::workflow::WorkflowStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Identifier error: {0}")]
    Id(#[from] IdError),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid output: {0}")]
    InvalidOutput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Cancelled")]
    Cancelled,

    #[error("Node '{node}' cannot {action} from {from}")]
    IllegalTransition {
        node: String,
        action: &'static str,
        from: NodeStatus,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Invalid workflow: {0}")]
    Invalid(String),

    #[error("Cyclic dependency detected at node '{node}'")]
    CyclicDependency { node: String },

    #[error("Orphaned nodes not reachable from the START node: {}", .0.join(", "))]
    OrphanedNodes(Vec<String>),

    #[error("Workflow must contain a START node")]
    MissingStartNode,

    #[error("Workflow must contain exactly one START node, found {0}")]
    MultipleStartNodes(usize),

    #[error("Node '{node}' depends on unknown node '{dependency}'")]
    UnknownDependency { node: String, dependency: String },

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Edge not found: {0}")]
    EdgeNotFound(String),

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Invalid connection: {0}")]
    InvalidConnection(String),

    #[error("Cannot modify the structure of a {0} workflow")]
    StructureLocked(WorkflowStatus),

    #[error("Workflow cannot {action} from {from}")]
    IllegalTransition {
        action: &'static str,
        from: WorkflowStatus,
    },

    #[error("Cannot start a workflow without nodes")]
    EmptyWorkflow,

    #[error(transparent)]
    Node(#[from] NodeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = WorkflowError::OrphanedNodes(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(
            error.to_string(),
            "Orphaned nodes not reachable from the START node: a, b"
        );

        let error = NodeError::IllegalTransition {
            node: "work".to_string(),
            action: "complete",
            from: NodeStatus::Idle,
        };
        assert_eq!(error.to_string(), "Node 'work' cannot complete from IDLE");
    }

    #[test]
    fn test_node_error_converts_into_workflow_error() {
        let error: WorkflowError = NodeError::Cancelled.into();
        assert_eq!(error.to_string(), "Cancelled");
    }
}
