use async_trait::async_trait;
use dagcore::{ContextMap, DynUnitOfWork, NodeContext, NodeError, UnitOfWork, Value};
use dagruntime::{NodeFactory, NodeMetadata, PortDefinition};
use serde_json::json;
use std::sync::Arc;

/// Simple debug node that logs its inputs
pub struct DebugNode;

#[async_trait]
impl UnitOfWork for DebugNode {
    type Input = ContextMap;
    type Output = ContextMap;

    fn kind(&self) -> &str {
        "debug.log"
    }

    async fn execute(&self, input: ContextMap, ctx: &NodeContext) -> Result<ContextMap, NodeError> {
        let message = input
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("(no message)")
            .to_string();

        tracing::info!(node = %ctx.node_name, "DEBUG: {}", message);

        // Also log all inputs for visibility
        let mut keys: Vec<&String> = input.keys().collect();
        keys.sort();
        for key in keys {
            tracing::debug!(node = %ctx.node_name, "  {}: {}", key, input[key]);
        }

        let mut output = ContextMap::new();
        output.insert("message".to_string(), json!(message));
        Ok(output)
    }
}

pub struct DebugNodeFactory;

impl NodeFactory for DebugNodeFactory {
    fn create(&self, _config: &ContextMap) -> Result<Arc<dyn DynUnitOfWork>, NodeError> {
        Ok(Arc::new(DebugNode))
    }

    fn kind(&self) -> &str {
        "debug.log"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Logs input values for debugging".to_string(),
            category: "debug".to_string(),
            inputs: vec![PortDefinition::optional("message", "Line to log")],
            outputs: vec![PortDefinition::required("message", "The logged line")],
            ..NodeMetadata::default()
        }
    }
}

/// Always fails with its configured message
pub struct FailNode {
    message: String,
}

impl FailNode {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl UnitOfWork for FailNode {
    type Input = ContextMap;
    type Output = ();

    fn kind(&self) -> &str {
        "debug.fail"
    }

    async fn execute(&self, _input: ContextMap, _ctx: &NodeContext) -> Result<(), NodeError> {
        Err(NodeError::ExecutionFailed(self.message.clone()))
    }
}

pub struct FailNodeFactory;

impl NodeFactory for FailNodeFactory {
    fn create(&self, config: &ContextMap) -> Result<Arc<dyn DynUnitOfWork>, NodeError> {
        let message = config
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("intentional failure");
        Ok(Arc::new(FailNode::new(message)))
    }

    fn kind(&self) -> &str {
        "debug.fail"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Fails with the configured message".to_string(),
            category: "debug".to_string(),
            ..NodeMetadata::default()
        }
    }
}
