use dagcore::{ContextMap, DynUnitOfWork, NodeError, NodeType, WorkflowError};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Factory trait for creating units of work
pub trait NodeFactory: Send + Sync {
    /// Create a new unit of work with the given configuration
    fn create(&self, config: &ContextMap) -> Result<Arc<dyn DynUnitOfWork>, NodeError>;

    /// Kind identifier, e.g. "debug.log"
    fn kind(&self) -> &str;

    /// Optional: description, input/output ports, suggested node type
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::default()
    }
}

/// Metadata about a node kind
#[derive(Debug, Clone, Serialize)]
pub struct NodeMetadata {
    pub description: String,
    pub category: String,
    pub node_type: NodeType,
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            node_type: NodeType::Custom,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PortDefinition {
    pub name: String,
    pub description: String,
    pub required: bool,
}

impl PortDefinition {
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: false,
        }
    }
}

/// Factory backed by a closure over the node configuration.
pub struct FnFactory<F> {
    kind: String,
    metadata: NodeMetadata,
    create: F,
}

impl<F> FnFactory<F>
where
    F: Fn(&ContextMap) -> Result<Arc<dyn DynUnitOfWork>, NodeError> + Send + Sync,
{
    pub fn new(kind: impl Into<String>, create: F) -> Self {
        Self {
            kind: kind.into(),
            metadata: NodeMetadata::default(),
            create,
        }
    }

    pub fn with_metadata(mut self, metadata: NodeMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

impl<F> NodeFactory for FnFactory<F>
where
    F: Fn(&ContextMap) -> Result<Arc<dyn DynUnitOfWork>, NodeError> + Send + Sync,
{
    fn create(&self, config: &ContextMap) -> Result<Arc<dyn DynUnitOfWork>, NodeError> {
        (self.create)(config)
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    fn metadata(&self) -> NodeMetadata {
        self.metadata.clone()
    }
}

/// Registry of available node kinds
pub struct NodeRegistry {
    factories: HashMap<String, Arc<dyn NodeFactory>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a node factory
    pub fn register(&mut self, factory: Arc<dyn NodeFactory>) {
        let kind = factory.kind().to_string();
        tracing::debug!("Registering node kind: {}", kind);
        self.factories.insert(kind, factory);
    }

    /// Create a unit of work from a kind and config
    pub fn create_work(
        &self,
        kind: &str,
        config: &ContextMap,
    ) -> Result<Arc<dyn DynUnitOfWork>, WorkflowError> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| WorkflowError::UnknownNodeType(kind.to_string()))?;

        factory
            .create(config)
            .map_err(|e| WorkflowError::Invalid(format!("Failed to create node '{}': {}", kind, e)))
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// All registered kinds, sorted
    pub fn list_node_types(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Get metadata for a node kind
    pub fn get_metadata(&self, kind: &str) -> Option<NodeMetadata> {
        self.factories.get(kind).map(|f| f.metadata())
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
