use async_trait::async_trait;
use dagcore::{ContextMap, DynUnitOfWork, NodeContext, NodeError, UnitOfWork, Value};
use dagruntime::{NodeFactory, NodeMetadata, PortDefinition};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct ParseInput {
    pub json: String,
}

#[derive(Debug, Serialize)]
pub struct ParseOutput {
    pub parsed: Value,
}

/// Parse JSON string to Value
pub struct JsonParseNode;

#[async_trait]
impl UnitOfWork for JsonParseNode {
    type Input = ParseInput;
    type Output = ParseOutput;

    fn kind(&self) -> &str {
        "transform.json_parse"
    }

    async fn execute(&self, input: ParseInput, _ctx: &NodeContext) -> Result<ParseOutput, NodeError> {
        let parsed = serde_json::from_str(&input.json)
            .map_err(|e| NodeError::ExecutionFailed(format!("JSON parse error: {}", e)))?;
        Ok(ParseOutput { parsed })
    }
}

pub struct JsonParseNodeFactory;

impl NodeFactory for JsonParseNodeFactory {
    fn create(&self, _config: &ContextMap) -> Result<Arc<dyn DynUnitOfWork>, NodeError> {
        Ok(Arc::new(JsonParseNode))
    }

    fn kind(&self) -> &str {
        "transform.json_parse"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Parse JSON string".to_string(),
            category: "transform".to_string(),
            inputs: vec![PortDefinition::required("json", "JSON text")],
            outputs: vec![PortDefinition::required("parsed", "Parsed value")],
            ..NodeMetadata::default()
        }
    }
}

/// Stringify Value to JSON
pub struct JsonStringifyNode;

#[async_trait]
impl UnitOfWork for JsonStringifyNode {
    type Input = ContextMap;
    type Output = ContextMap;

    fn kind(&self) -> &str {
        "transform.json_stringify"
    }

    async fn execute(&self, _input: ContextMap, ctx: &NodeContext) -> Result<ContextMap, NodeError> {
        let value = ctx.require_input("value")?;

        let json_str = serde_json::to_string_pretty(value)
            .map_err(|e| NodeError::ExecutionFailed(format!("JSON stringify error: {}", e)))?;

        let mut output = ContextMap::new();
        output.insert("json".to_string(), Value::String(json_str));
        Ok(output)
    }
}

pub struct JsonStringifyNodeFactory;

impl NodeFactory for JsonStringifyNodeFactory {
    fn create(&self, _config: &ContextMap) -> Result<Arc<dyn DynUnitOfWork>, NodeError> {
        Ok(Arc::new(JsonStringifyNode))
    }

    fn kind(&self) -> &str {
        "transform.json_stringify"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Convert value to JSON string".to_string(),
            category: "transform".to_string(),
            inputs: vec![PortDefinition::required("value", "Any value")],
            outputs: vec![PortDefinition::required("json", "Pretty-printed JSON")],
            ..NodeMetadata::default()
        }
    }
}

/// Emits a fixed set of values taken from its configuration
pub struct SetValuesNode {
    values: ContextMap,
}

impl SetValuesNode {
    pub fn new(values: ContextMap) -> Self {
        Self { values }
    }
}

#[async_trait]
impl UnitOfWork for SetValuesNode {
    type Input = ContextMap;
    type Output = ContextMap;

    fn kind(&self) -> &str {
        "transform.set"
    }

    async fn execute(&self, _input: ContextMap, _ctx: &NodeContext) -> Result<ContextMap, NodeError> {
        Ok(self.values.clone())
    }
}

pub struct SetValuesNodeFactory;

impl NodeFactory for SetValuesNodeFactory {
    fn create(&self, config: &ContextMap) -> Result<Arc<dyn DynUnitOfWork>, NodeError> {
        match config.get("values") {
            Some(Value::Object(fields)) => Ok(Arc::new(SetValuesNode::new(
                fields.clone().into_iter().collect(),
            ))),
            Some(other) => Err(NodeError::Configuration(format!(
                "values must be an object, got {}",
                other
            ))),
            None => Err(NodeError::Configuration("missing 'values'".to_string())),
        }
    }

    fn kind(&self) -> &str {
        "transform.set"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Emit configured values".to_string(),
            category: "transform".to_string(),
            ..NodeMetadata::default()
        }
    }
}
