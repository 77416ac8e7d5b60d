use async_trait::async_trait;
use chrono::Utc;
use dagcore::{ContextMap, DynUnitOfWork, NodeContext, NodeError, NodeType, UnitOfWork, Value};
use dagruntime::{NodeFactory, NodeMetadata, PortDefinition};
use serde_json::json;
use std::sync::Arc;

/// Opens a workflow: merges its configured initial data with the input and
/// stamps when and where the run started.
pub struct StartNode {
    initial_data: ContextMap,
}

impl StartNode {
    pub fn new(initial_data: ContextMap) -> Self {
        Self { initial_data }
    }

    pub fn initial_data(&self) -> &ContextMap {
        &self.initial_data
    }
}

#[async_trait]
impl UnitOfWork for StartNode {
    type Input = ContextMap;
    type Output = ContextMap;

    fn kind(&self) -> &str {
        "control.start"
    }

    async fn execute(&self, input: ContextMap, ctx: &NodeContext) -> Result<ContextMap, NodeError> {
        let mut output = self.initial_data.clone();
        output.extend(input);
        output.insert("workflowStartTime".into(), json!(Utc::now().timestamp_millis()));
        output.insert("startNodeId".into(), json!(ctx.node_id.as_str()));
        output.insert("startNodeName".into(), json!(ctx.node_name));
        tracing::debug!(node = %ctx.node_name, items = output.len(), "workflow input prepared");
        Ok(output)
    }
}

pub struct StartNodeFactory;

impl NodeFactory for StartNodeFactory {
    fn create(&self, config: &ContextMap) -> Result<Arc<dyn DynUnitOfWork>, NodeError> {
        let initial_data = match config.get("initial_data") {
            None | Some(Value::Null) => ContextMap::new(),
            Some(Value::Object(fields)) => fields.clone().into_iter().collect(),
            Some(other) => {
                return Err(NodeError::Configuration(format!(
                    "initial_data must be an object, got {}",
                    other
                )))
            }
        };
        Ok(Arc::new(StartNode::new(initial_data)))
    }

    fn kind(&self) -> &str {
        "control.start"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Entry point: merges initial data and records the start time".to_string(),
            category: "control".to_string(),
            node_type: NodeType::Start,
            inputs: vec![],
            outputs: vec![
                PortDefinition::required("workflowStartTime", "Epoch milliseconds"),
                PortDefinition::required("startNodeId", "Id of this node"),
                PortDefinition::required("startNodeName", "Name of this node"),
            ],
        }
    }
}

/// Closes a workflow: collects the accumulated input and adds a summary.
pub struct EndNode {
    collect_all: bool,
}

impl EndNode {
    pub fn new(collect_all: bool) -> Self {
        Self { collect_all }
    }

    fn summary(output: &ContextMap) -> Value {
        let has_errors = output.keys().any(|key| {
            let key = key.to_lowercase();
            key.contains("error") || key.contains("exception")
        });
        let status = if has_errors {
            "COMPLETED_WITH_ERRORS"
        } else {
            "COMPLETED_SUCCESSFULLY"
        };
        json!({
            "totalDataItems": output.len(),
            "hasErrors": has_errors,
            "executionStatus": status,
        })
    }
}

impl Default for EndNode {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl UnitOfWork for EndNode {
    type Input = ContextMap;
    type Output = ContextMap;

    fn kind(&self) -> &str {
        "control.end"
    }

    async fn execute(&self, input: ContextMap, ctx: &NodeContext) -> Result<ContextMap, NodeError> {
        let now = Utc::now().timestamp_millis();
        let started = input.get("workflowStartTime").and_then(Value::as_i64);

        let mut output = if self.collect_all {
            input
        } else {
            ContextMap::new()
        };
        output.insert("workflowEndTime".into(), json!(now));
        output.insert("endNodeId".into(), json!(ctx.node_id.as_str()));
        output.insert("endNodeName".into(), json!(ctx.node_name));
        if let Some(started) = started {
            output.insert("workflowDuration".into(), json!(now - started));
        }

        let summary = Self::summary(&output);
        output.insert("executionSummary".into(), summary);
        Ok(output)
    }
}

pub struct EndNodeFactory;

impl NodeFactory for EndNodeFactory {
    fn create(&self, config: &ContextMap) -> Result<Arc<dyn DynUnitOfWork>, NodeError> {
        let collect_all = match config.get("collect_all") {
            None | Some(Value::Null) => true,
            Some(Value::Bool(flag)) => *flag,
            Some(other) => {
                return Err(NodeError::Configuration(format!(
                    "collect_all must be a boolean, got {}",
                    other
                )))
            }
        };
        Ok(Arc::new(EndNode::new(collect_all)))
    }

    fn kind(&self) -> &str {
        "control.end"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Exit point: collects results and adds an execution summary".to_string(),
            category: "control".to_string(),
            node_type: NodeType::End,
            inputs: vec![PortDefinition::optional(
                "workflowStartTime",
                "Used to compute workflowDuration",
            )],
            outputs: vec![
                PortDefinition::required("workflowEndTime", "Epoch milliseconds"),
                PortDefinition::optional("workflowDuration", "Milliseconds since the start node ran"),
                PortDefinition::required("executionSummary", "Item count and error flag"),
            ],
        }
    }
}
