//! String-backed identifiers for workflows, nodes and edges.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("{kind} id cannot be blank")]
    Blank { kind: &'static str },
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Wraps an existing value, rejecting blank input.
            pub fn of(value: impl Into<String>) -> Result<Self, IdError> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(IdError::Blank { kind: $kind });
                }
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::of(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }
    };
}

string_id!(
    /// Identity of a workflow aggregate.
    WorkflowId,
    "workflow"
);

string_id!(
    /// Identity of a node inside a workflow.
    NodeId,
    "node"
);

string_id!(
    /// Identity of an edge inside a workflow.
    EdgeId,
    "edge"
);

impl WorkflowId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl NodeId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl EdgeId {
    pub fn generate() -> Self {
        Self(format!("edge_{}", Uuid::new_v4().simple()))
    }

    /// Deterministic id for the edge connecting `source` to `target`.
    pub fn from_nodes(source: &NodeId, target: &NodeId) -> Self {
        Self(format!("edge_{}_to_{}", source, target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(NodeId::generate(), NodeId::generate());
        assert_ne!(WorkflowId::generate(), WorkflowId::generate());
        assert!(EdgeId::generate().as_str().starts_with("edge_"));
    }

    #[test]
    fn test_of_rejects_blank_values() {
        assert_eq!(NodeId::of("   "), Err(IdError::Blank { kind: "node" }));
        assert_eq!(
            WorkflowId::of(""),
            Err(IdError::Blank { kind: "workflow" })
        );
    }

    #[test]
    fn test_equality_is_by_value() {
        let a = NodeId::of("fetch").unwrap();
        let b = NodeId::of("fetch").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "fetch");
    }

    #[test]
    fn test_of_keeps_value_as_given() {
        let padded = NodeId::of(" fetch ").unwrap();
        assert_eq!(padded.as_str(), " fetch ");
        assert_ne!(padded, NodeId::of("fetch").unwrap());
    }

    #[test]
    fn test_edge_id_from_nodes() {
        let source = NodeId::of("a").unwrap();
        let target = NodeId::of("b").unwrap();
        assert_eq!(EdgeId::from_nodes(&source, &target).as_str(), "edge_a_to_b");
    }

    #[test]
    fn test_serde_rejects_blank() {
        let parsed: Result<NodeId, _> = serde_json::from_str("\"\"");
        assert!(parsed.is_err());
        let parsed: NodeId = serde_json::from_str("\"n1\"").unwrap();
        assert_eq!(parsed.as_str(), "n1");
    }
}
