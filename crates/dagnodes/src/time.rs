use async_trait::async_trait;
use dagcore::{ContextMap, DynUnitOfWork, NodeContext, NodeError, UnitOfWork, Value};
use dagruntime::{NodeFactory, NodeMetadata};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Delays execution for a fixed duration, then passes its input through
pub struct DelayNode {
    delay: Duration,
}

impl DelayNode {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl UnitOfWork for DelayNode {
    type Input = ContextMap;
    type Output = ContextMap;

    fn kind(&self) -> &str {
        "time.delay"
    }

    async fn execute(&self, input: ContextMap, ctx: &NodeContext) -> Result<ContextMap, NodeError> {
        tracing::info!(node = %ctx.node_name, delay_ms = self.delay.as_millis() as u64, "delaying");

        tokio::select! {
            _ = sleep(self.delay) => Ok(input),
            _ = ctx.cancellation.cancelled() => Err(NodeError::Cancelled),
        }
    }
}

pub struct DelayNodeFactory;

impl NodeFactory for DelayNodeFactory {
    fn create(&self, config: &ContextMap) -> Result<Arc<dyn DynUnitOfWork>, NodeError> {
        // Default to 1 second if not specified
        let delay_ms = match config.get("delay_ms") {
            None | Some(Value::Null) => 1000,
            Some(value) => value.as_u64().ok_or_else(|| {
                NodeError::Configuration(format!(
                    "delay_ms must be a non-negative integer, got {}",
                    value
                ))
            })?,
        };
        Ok(Arc::new(DelayNode::new(Duration::from_millis(delay_ms))))
    }

    fn kind(&self) -> &str {
        "time.delay"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Delay execution for specified milliseconds".to_string(),
            category: "time".to_string(),
            ..NodeMetadata::default()
        }
    }
}
